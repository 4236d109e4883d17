use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::StoreError;

/// The three independent record collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Users,
    Spots,
    Bookings,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Collection::Users, Collection::Spots, Collection::Bookings];

    pub fn file_name(self) -> &'static str {
        match self {
            Collection::Users => "users.json",
            Collection::Spots => "spots.json",
            Collection::Bookings => "bookings.json",
        }
    }
}

/// Whole-collection load/save over some backing store.
///
/// Implementations guarantee nothing across collections: two `save` calls are
/// two independent writes. [`super::store::BookingStore`] adds the journal that
/// makes a multi-collection update recoverable.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn load(&self, collection: Collection) -> Result<Vec<Value>, StoreError>;
    async fn save(&self, collection: Collection, records: Vec<Value>) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// JSON files in a data directory
// ---------------------------------------------------------------------------

/// One JSON array file per collection. Saves go through a temp file and a
/// rename so a crash never leaves a half-written collection.
pub struct FileGateway {
    dir: PathBuf,
}

impl FileGateway {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, collection: Collection) -> PathBuf {
        self.dir.join(collection.file_name())
    }
}

#[async_trait]
impl PersistenceGateway for FileGateway {
    async fn load(&self, collection: Collection) -> Result<Vec<Value>, StoreError> {
        let bytes = match tokio::fs::read(self.path(collection)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn save(&self, collection: Collection, records: Vec<Value>) -> Result<(), StoreError> {
        let path = self.path(collection);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(&records)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (for tests)
// ---------------------------------------------------------------------------

pub struct MemoryGateway {
    data: Mutex<HashMap<Collection, Vec<Value>>>,
    failing: Mutex<HashSet<Collection>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Seed a collection with raw records.
    pub fn with_records(self, collection: Collection, records: Vec<Value>) -> Self {
        self.data.lock().insert(collection, records);
        self
    }

    /// Append a record as another writer sharing the backing store would.
    pub fn push_record(&self, collection: Collection, record: Value) {
        self.data.lock().entry(collection).or_default().push(record);
    }

    /// Make every subsequent save of `collection` fail until cleared.
    pub fn fail_saves(&self, collection: Collection, failing: bool) {
        let mut set = self.failing.lock();
        if failing {
            set.insert(collection);
        } else {
            set.remove(&collection);
        }
    }

    /// The records last saved for a collection.
    pub fn records(&self, collection: Collection) -> Vec<Value> {
        self.data.lock().get(&collection).cloned().unwrap_or_default()
    }
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn load(&self, collection: Collection) -> Result<Vec<Value>, StoreError> {
        Ok(self.records(collection))
    }

    async fn save(&self, collection: Collection, records: Vec<Value>) -> Result<(), StoreError> {
        if self.failing.lock().contains(&collection) {
            return Err(StoreError::Gateway {
                collection,
                message: "injected failure".to_string(),
            });
        }
        self.data.lock().insert(collection, records);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(parkspot_common::id::prefixed_ulid("gateway_test"))
    }

    #[tokio::test]
    async fn file_gateway_missing_collection_loads_empty() {
        let gw = FileGateway::open(temp_dir()).await.unwrap();
        assert!(gw.load(Collection::Spots).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_gateway_save_then_load() {
        let dir = temp_dir();
        let gw = FileGateway::open(&dir).await.unwrap();
        let records = vec![serde_json::json!({ "id": "spot_1", "owner": "o" })];
        gw.save(Collection::Spots, records.clone()).await.unwrap();

        assert_eq!(gw.load(Collection::Spots).await.unwrap(), records);
        assert!(dir.join("spots.json").exists());
        assert!(!dir.join("spots.json.tmp").exists());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn memory_gateway_injected_failure() {
        let gw = MemoryGateway::new();
        gw.fail_saves(Collection::Bookings, true);
        assert!(gw.save(Collection::Bookings, vec![]).await.is_err());
        assert!(gw.save(Collection::Spots, vec![]).await.is_ok());

        gw.fail_saves(Collection::Bookings, false);
        assert!(gw.save(Collection::Bookings, vec![]).await.is_ok());
    }
}
