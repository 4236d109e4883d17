//! Serialized in-memory view of the record collections.
//!
//! All reads and writes go through one async mutex, so a check-then-act
//! sequence performed on a [`StoreTxn`] is atomic with respect to every other
//! request. Commits are journaled before they are applied (see
//! [`super::journal`]), which turns the two independent collection saves into
//! one recoverable transaction.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parkspot_common::id::{prefix, prefixed_ulid};
use parkspot_common::models::{Booking, Spot, UserRecord};
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, MutexGuard};

use super::gateway::{Collection, PersistenceGateway};
use super::journal::{Journal, JournalEntry, Mutation, PendingTxn};
use super::StoreError;

/// Compact the journal once it grows past this many entries and nothing is
/// pending.
const COMPACT_THRESHOLD: usize = 256;

struct Inner {
    users: BTreeMap<String, UserRecord>,
    spots: BTreeMap<String, Spot>,
    bookings: Vec<Booking>,
    journal: Journal,
    /// Journaled transactions whose collection saves have not succeeded yet.
    unreconciled: Vec<PendingTxn>,
}

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    pub txn_id: String,
    /// The transaction is durable in the journal but at least one collection
    /// save failed; it will be retried.
    pub reconciliation_pending: bool,
}

pub struct BookingStore {
    gateway: Arc<dyn PersistenceGateway>,
    persist_timeout: Duration,
    inner: Mutex<Inner>,
}

impl BookingStore {
    /// Load every collection, then replay journal intents that never got a
    /// commit marker.
    pub async fn open(
        gateway: Arc<dyn PersistenceGateway>,
        journal_path: impl Into<PathBuf>,
        persist_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let users: Vec<UserRecord> = load_typed(gateway.as_ref(), Collection::Users).await?;
        let spots: Vec<Spot> = load_typed(gateway.as_ref(), Collection::Spots).await?;
        let bookings: Vec<Booking> = load_typed(gateway.as_ref(), Collection::Bookings).await?;
        let journal = Journal::open(journal_path).await?;
        let pending = journal.pending().await?;

        let mut inner = Inner {
            users: users.into_iter().map(|u| (u.id.clone(), u)).collect(),
            spots: spots.into_iter().map(|s| (s.id.clone(), s)).collect(),
            bookings,
            journal,
            unreconciled: Vec::new(),
        };

        if !pending.is_empty() {
            tracing::warn!(count = pending.len(), "replaying uncommitted journal transactions");
            for txn in &pending {
                inner.apply(&txn.mutations);
            }
            inner.unreconciled = pending;
        }

        let store = Self {
            gateway,
            persist_timeout,
            inner: Mutex::new(inner),
        };

        {
            let mut inner = store.inner.lock().await;
            if let Err(err) = store.reconcile_locked(&mut inner).await {
                tracing::error!(?err, "startup reconciliation failed; will retry on next commit");
            }
            tracing::info!(
                users = inner.users.len(),
                spots = inner.spots.len(),
                bookings = inner.bookings.len(),
                "booking store loaded"
            );
        }

        Ok(store)
    }

    /// Start a serialized transaction. Other callers wait until the returned
    /// guard is committed or dropped.
    pub async fn begin(&self) -> StoreTxn<'_> {
        StoreTxn {
            store: self,
            inner: self.inner.lock().await,
        }
    }

    pub async fn user(&self, id: &str) -> Option<UserRecord> {
        let mut txn = self.begin().await;
        txn.load_user(id).await.unwrap_or_else(|err| {
            tracing::warn!(?err, user_id = %id, "user reload failed");
            None
        })
    }

    pub async fn spot(&self, id: &str) -> Option<Spot> {
        let mut txn = self.begin().await;
        txn.load_spot(id).await.unwrap_or_else(|err| {
            tracing::warn!(?err, spot_id = %id, "spot reload failed");
            None
        })
    }

    pub async fn booking(&self, id: &str) -> Option<Booking> {
        self.inner.lock().await.bookings.iter().find(|b| b.id == id).cloned()
    }

    pub async fn bookings_for_user(&self, user_id: &str) -> Vec<Booking> {
        self.inner
            .lock()
            .await
            .bookings
            .iter()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn booking_count(&self) -> usize {
        self.inner.lock().await.bookings.len()
    }

    /// Number of journaled transactions still waiting for a successful save.
    pub async fn unreconciled(&self) -> usize {
        self.inner.lock().await.unreconciled.len()
    }

    /// Retry saves for unreconciled transactions. Returns how many were
    /// settled.
    pub async fn reconcile(&self) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock().await;
        self.reconcile_locked(&mut inner).await
    }

    /// Settle pending saves and compact the journal. Called at shutdown.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        self.reconcile_locked(&mut inner).await?;
        if inner.unreconciled.is_empty() && !inner.journal.is_empty() {
            inner.journal.compact().await?;
        }
        Ok(())
    }

    async fn reconcile_locked(&self, inner: &mut Inner) -> Result<usize, StoreError> {
        if inner.unreconciled.is_empty() {
            return Ok(0);
        }
        let collections: BTreeSet<Collection> = inner
            .unreconciled
            .iter()
            .flat_map(|t| t.mutations.iter().map(Mutation::collection))
            .collect();
        for collection in collections {
            self.save(inner, collection).await?;
        }

        let settled = std::mem::take(&mut inner.unreconciled);
        for txn in &settled {
            mark_committed(inner, &txn.txn_id).await;
        }
        tracing::info!(count = settled.len(), "reconciled journaled transactions");
        Ok(settled.len())
    }

    /// Writes the whole collection. Spots are shared with the listing
    /// screens, so the stored copy is merged in first and records created
    /// elsewhere are written back rather than dropped.
    async fn save(&self, inner: &mut Inner, collection: Collection) -> Result<(), StoreError> {
        if collection == Collection::Spots {
            match self.load::<Spot>(Collection::Spots).await {
                Ok(fresh) => inner.merge_spots(fresh),
                Err(err) => tracing::warn!(?err, "spot refresh before save failed; writing cached view"),
            }
        }
        let records = match collection {
            Collection::Users => to_values(inner.users.values())?,
            Collection::Spots => to_values(inner.spots.values())?,
            Collection::Bookings => to_values(inner.bookings.iter())?,
        };
        match tokio::time::timeout(self.persist_timeout, self.gateway.save(collection, records)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout {
                collection,
                timeout: self.persist_timeout,
            }),
        }
    }

    async fn load<T: DeserializeOwned>(&self, collection: Collection) -> Result<Vec<T>, StoreError> {
        match tokio::time::timeout(self.persist_timeout, load_typed(self.gateway.as_ref(), collection)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout {
                collection,
                timeout: self.persist_timeout,
            }),
        }
    }
}

/// Exclusive access to the store for one check-then-act sequence.
pub struct StoreTxn<'a> {
    store: &'a BookingStore,
    inner: MutexGuard<'a, Inner>,
}

impl StoreTxn<'_> {
    pub fn user(&self, id: &str) -> Option<&UserRecord> {
        self.inner.users.get(id)
    }

    pub fn spot(&self, id: &str) -> Option<&Spot> {
        self.inner.spots.get(id)
    }

    /// Like [`user`](Self::user), but a miss reloads the users collection
    /// from the gateway so accounts created after startup are found.
    pub async fn load_user(&mut self, id: &str) -> Result<Option<UserRecord>, StoreError> {
        if let Some(user) = self.inner.users.get(id) {
            return Ok(Some(user.clone()));
        }
        let fresh: Vec<UserRecord> = self.store.load(Collection::Users).await?;
        tracing::debug!(user_id = %id, loaded = fresh.len(), "user cache miss; reloaded users");
        self.inner.merge_users(fresh);
        Ok(self.inner.users.get(id).cloned())
    }

    /// Like [`spot`](Self::spot), but a miss reloads the spots collection.
    pub async fn load_spot(&mut self, id: &str) -> Result<Option<Spot>, StoreError> {
        if let Some(spot) = self.inner.spots.get(id) {
            return Ok(Some(spot.clone()));
        }
        let fresh: Vec<Spot> = self.store.load(Collection::Spots).await?;
        tracing::debug!(spot_id = %id, loaded = fresh.len(), "spot cache miss; reloaded spots");
        self.inner.merge_spots(fresh);
        Ok(self.inner.spots.get(id).cloned())
    }

    pub fn booking(&self, id: &str) -> Option<&Booking> {
        self.inner.bookings.iter().find(|b| b.id == id)
    }

    /// Find the booking created from a payment session or payment id.
    pub fn find_by_payment(&self, session_id: Option<&str>, payment_id: Option<&str>) -> Option<&Booking> {
        self.inner
            .bookings
            .iter()
            .find(|b| b.matches_payment(session_id, payment_id))
    }

    pub fn bookings_for_spot<'s>(&'s self, spot_id: &'s str) -> impl Iterator<Item = &'s Booking> + 's {
        self.inner.bookings.iter().filter(move |b| b.spot_id == spot_id)
    }

    /// Journal, apply and save `mutations` as one transaction.
    ///
    /// A failure while writing the journal intent leaves no trace and is
    /// returned as an error. Once the intent is durable the transaction is
    /// authoritative: a failed collection save is recorded for reconciliation
    /// and reported through [`CommitReceipt::reconciliation_pending`].
    pub async fn commit(mut self, mutations: Vec<Mutation>) -> Result<CommitReceipt, StoreError> {
        let store = self.store;
        let inner = &mut *self.inner;

        if let Err(err) = store.reconcile_locked(inner).await {
            tracing::warn!(?err, "reconciliation before commit failed");
        }

        let txn_id = prefixed_ulid(prefix::TRANSACTION);
        inner
            .journal
            .append(&JournalEntry::Intent {
                txn_id: txn_id.clone(),
                mutations: mutations.clone(),
            })
            .await?;

        inner.apply(&mutations);

        let collections: BTreeSet<Collection> = mutations
            .iter()
            .map(Mutation::collection)
            .collect();
        let mut failure = None;
        for collection in collections {
            if let Err(err) = store.save(inner, collection).await {
                failure = Some(err);
                break;
            }
        }

        if let Some(err) = failure {
            tracing::error!(
                %txn_id,
                ?err,
                "collection save failed after journaling; flagged for reconciliation"
            );
            inner.unreconciled.push(PendingTxn {
                txn_id: txn_id.clone(),
                mutations,
            });
            return Ok(CommitReceipt {
                txn_id,
                reconciliation_pending: true,
            });
        }

        mark_committed(inner, &txn_id).await;
        if inner.unreconciled.is_empty() && inner.journal.len() >= COMPACT_THRESHOLD {
            if let Err(err) = inner.journal.compact().await {
                tracing::warn!(?err, "journal compaction failed");
            }
        }

        Ok(CommitReceipt {
            txn_id,
            reconciliation_pending: false,
        })
    }
}

impl Inner {
    fn apply(&mut self, mutations: &[Mutation]) {
        for mutation in mutations {
            match mutation {
                Mutation::PutBooking(booking) => {
                    match self.bookings.iter_mut().find(|b| b.id == booking.id) {
                        Some(existing) => *existing = booking.clone(),
                        None => self.bookings.push(booking.clone()),
                    }
                }
                Mutation::PutSpot(spot) => {
                    self.spots.insert(spot.id.clone(), spot.clone());
                }
            }
        }
    }

    fn merge_users(&mut self, fresh: Vec<UserRecord>) {
        for user in fresh {
            self.users.insert(user.id.clone(), user);
        }
    }

    /// Unknown spots are adopted as stored. Known spots keep their booking
    /// state (`available`, `bookings`) from memory and take listing fields
    /// from the stored copy.
    fn merge_spots(&mut self, fresh: Vec<Spot>) {
        for stored in fresh {
            match self.spots.get_mut(&stored.id) {
                Some(cached) => {
                    cached.owner = stored.owner;
                    cached.location = stored.location;
                    cached.extra = stored.extra;
                    if !stored.title.is_empty() {
                        cached.title = stored.title;
                    }
                }
                None => {
                    self.spots.insert(stored.id.clone(), stored);
                }
            }
        }
    }
}

impl PartialOrd for Collection {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Collection {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl Collection {
    /// Bookings are saved before spots so a crash between the two saves
    /// leaves a booking without its spot update, never the reverse.
    fn rank(self) -> u8 {
        match self {
            Collection::Bookings => 0,
            Collection::Spots => 1,
            Collection::Users => 2,
        }
    }
}

async fn mark_committed(inner: &mut Inner, txn_id: &str) {
    let entry = JournalEntry::Commit {
        txn_id: txn_id.to_string(),
    };
    if let Err(err) = inner.journal.append(&entry).await {
        // Replay of an already-saved intent is idempotent.
        tracing::warn!(%txn_id, ?err, "failed to write commit marker");
    }
}

async fn load_typed<T: DeserializeOwned>(
    gateway: &dyn PersistenceGateway,
    collection: Collection,
) -> Result<Vec<T>, StoreError> {
    gateway
        .load(collection)
        .await?
        .into_iter()
        .map(|v| serde_json::from_value(v).map_err(StoreError::from))
        .collect()
}

fn to_values<'a, T: serde::Serialize + 'a>(
    records: impl Iterator<Item = &'a T>,
) -> Result<Vec<serde_json::Value>, StoreError> {
    records
        .map(|r| serde_json::to_value(r).map_err(StoreError::from))
        .collect()
}
