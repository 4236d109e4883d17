//! Append-only write-ahead journal for multi-collection transactions.
//!
//! Each line is one JSON [`JournalEntry`]. An `intent` line lists every
//! record a transaction writes; a `commit` line follows once all affected
//! collections were saved. Intents without a commit are replayed on startup.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use parkspot_common::models::{Booking, Spot};
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::gateway::Collection;
use super::StoreError;

/// A full-record upsert. Replaying one twice is harmless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "record", rename_all = "snake_case")]
pub enum Mutation {
    PutBooking(Booking),
    PutSpot(Spot),
}

impl Mutation {
    pub fn collection(&self) -> Collection {
        match self {
            Mutation::PutBooking(_) => Collection::Bookings,
            Mutation::PutSpot(_) => Collection::Spots,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JournalEntry {
    Intent { txn_id: String, mutations: Vec<Mutation> },
    Commit { txn_id: String },
}

/// An intent that has no matching commit marker.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTxn {
    pub txn_id: String,
    pub mutations: Vec<Mutation>,
}

pub struct Journal {
    path: PathBuf,
    file: File,
    entries: usize,
}

impl Journal {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        truncate_torn_tail(&path).await?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let entries = read_entries(&path).await?.len();
        Ok(Self {
            path,
            file,
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries written since the last compaction.
    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Append one entry and fsync it before returning.
    pub async fn append(&mut self, entry: &JournalEntry) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        self.file.write_all(&line).await?;
        self.file.sync_data().await?;
        self.entries += 1;
        Ok(())
    }

    /// Intents in the journal that were never committed, in write order.
    pub async fn pending(&self) -> Result<Vec<PendingTxn>, StoreError> {
        let entries = read_entries(&self.path).await?;
        let committed: HashSet<&str> = entries
            .iter()
            .filter_map(|e| match e {
                JournalEntry::Commit { txn_id } => Some(txn_id.as_str()),
                _ => None,
            })
            .collect();

        Ok(entries
            .iter()
            .filter_map(|e| match e {
                JournalEntry::Intent { txn_id, mutations } if !committed.contains(txn_id.as_str()) => {
                    Some(PendingTxn {
                        txn_id: txn_id.clone(),
                        mutations: mutations.clone(),
                    })
                }
                _ => None,
            })
            .collect())
    }

    /// Drop every entry. Only valid once all intents are committed.
    pub async fn compact(&mut self) -> Result<(), StoreError> {
        self.file.set_len(0).await?;
        self.file.sync_data().await?;
        self.entries = 0;
        tracing::debug!(path = %self.path.display(), "journal compacted");
        Ok(())
    }
}

/// Cut an unterminated last line so later appends start on a fresh line.
async fn truncate_torn_tail(path: &Path) -> Result<(), StoreError> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if text.is_empty() || text.ends_with('\n') {
        return Ok(());
    }
    let keep = text.rfind('\n').map(|i| i + 1).unwrap_or(0);
    tracing::warn!(path = %path.display(), dropped = text.len() - keep, "truncating torn journal tail");
    let file = OpenOptions::new().write(true).open(path).await?;
    file.set_len(keep as u64).await?;
    file.sync_data().await?;
    Ok(())
}

async fn read_entries(path: &Path) -> Result<Vec<JournalEntry>, StoreError> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let mut entries = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        match serde_json::from_str(line) {
            Ok(entry) => entries.push(entry),
            // A torn final line is a write that was never acknowledged.
            Err(err) if i + 1 == lines.len() => {
                tracing::warn!(?err, path = %path.display(), "ignoring torn journal tail");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(entries)
}
