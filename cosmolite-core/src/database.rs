// cosmolite-core/src/database.rs
// Pure Rust database API

use std::path::Path;
use std::sync::Arc;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::info;

use crate::storage::{CompactionStats, StorageEngine};
use crate::collection_core::CollectionCore;
use crate::error::{Result, CosmoLiteError};
use crate::procedure::ProcedureRegistry;

/// Pure Rust CosmoLite Database
///
/// Cheap to clone; clones share the same storage and procedure registries.
#[derive(Clone)]
pub struct DatabaseCore {
    storage: Arc<RwLock<StorageEngine>>,
    /// Stored procedures live in process memory, one registry per collection
    procedures: Arc<DashMap<String, Arc<ProcedureRegistry>>>,
}

impl DatabaseCore {
    /// Open or create a database file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let storage = StorageEngine::open(path.as_ref())?;
        info!(
            path = %path.as_ref().display(),
            collections = storage.list_collections().len(),
            "Opened database"
        );
        Ok(Self::with_storage(storage))
    }

    /// Database without a backing file
    pub fn in_memory() -> Self {
        Self::with_storage(StorageEngine::in_memory())
    }

    fn with_storage(storage: StorageEngine) -> Self {
        DatabaseCore {
            storage: Arc::new(RwLock::new(storage)),
            procedures: Arc::new(DashMap::new()),
        }
    }

    /// Get collection (creates if doesn't exist)
    pub fn collection(&self, name: &str) -> Result<CollectionCore> {
        validate_collection_name(name)?;

        let registry = self
            .procedures
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(ProcedureRegistry::new(name)))
            .clone();

        CollectionCore::new(name.to_string(), Arc::clone(&self.storage), registry)
    }

    /// List all collection names
    pub fn list_collections(&self) -> Vec<String> {
        self.storage.read().list_collections()
    }

    /// Drop collection together with its registered procedures
    pub fn drop_collection(&self, name: &str) -> Result<()> {
        self.storage.write().drop_collection(name)?;
        self.procedures.remove(name);
        Ok(())
    }

    /// Flush all changes to disk
    pub fn flush(&self) -> Result<()> {
        self.storage.write().flush()
    }

    /// Get database statistics as JSON
    pub fn stats(&self) -> serde_json::Value {
        self.storage.read().stats()
    }

    /// Storage compaction - removes superseded versions and deleted documents
    pub fn compact(&self) -> Result<CompactionStats> {
        self.storage.write().compact()
    }

    pub fn is_persistent(&self) -> bool {
        self.storage.read().is_persistent()
    }
}

fn validate_collection_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CosmoLiteError::Validation("collection name must not be empty".into()));
    }
    if name.contains(|c: char| c == '/' || c == '\\' || c == '#' || c == '?') {
        return Err(CosmoLiteError::Validation(format!(
            "collection name '{}' contains a reserved character", name
        )));
    }
    Ok(())
}
