// storage/mod.rs
// Storage engine module
//
// The database file is a header followed by an append-only log of records.
// Opening the file replays the log into memory; every mutation is appended
// before it is applied.

mod compaction;
mod metadata;
mod io;

use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use ahash::AHashMap;
use serde::{Serialize, Deserialize};
use crate::document::Document;
use crate::error::{Result, CosmoLiteError};

pub use compaction::CompactionStats;

/// Fixed header at the start of the file: bincode(magic [u8; 8], version u32)
pub const HEADER_SIZE: u64 = 12;
pub const MAGIC: [u8; 8] = *b"COSMOLTE";
pub const FORMAT_VERSION: u32 = 1;

/// Database file header
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub magic: [u8; 8],
    pub version: u32,
}

impl Default for Header {
    fn default() -> Self {
        Header {
            magic: MAGIC,
            version: FORMAT_VERSION,
        }
    }
}

/// One entry of the storage log
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) enum LogRecord {
    CreateCollection { name: String, next_seq: u64 },
    DropCollection { name: String },
    /// `body` is the JSON encoding of the full document
    Put { collection: String, seq: u64, body: Vec<u8> },
    Delete { collection: String, seq: u64 },
}

/// Live state of one collection.
///
/// Documents are keyed by a per-collection sequence number assigned at
/// insert time; scans run in sequence (insertion) order and a replace keeps
/// the document's position.
#[derive(Debug, Clone)]
pub struct CollectionState {
    pub name: String,
    next_seq: u64,
    documents: BTreeMap<u64, Document>,
    by_id: AHashMap<String, u64>,
    by_self: AHashMap<String, u64>,
}

impl CollectionState {
    fn new(name: String, next_seq: u64) -> Self {
        CollectionState {
            name,
            next_seq: next_seq.max(1),
            documents: BTreeMap::new(),
            by_id: AHashMap::new(),
            by_self: AHashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn get_by_id(&self, id: &str) -> Option<(u64, &Document)> {
        let seq = *self.by_id.get(id)?;
        self.documents.get(&seq).map(|doc| (seq, doc))
    }

    pub fn get_by_self(&self, self_link: &str) -> Option<(u64, &Document)> {
        let seq = *self.by_self.get(self_link)?;
        self.documents.get(&seq).map(|doc| (seq, doc))
    }

    /// Documents strictly after `after` (from the start when `None`), in sequence order
    pub fn scan_from(&self, after: Option<u64>) -> impl Iterator<Item = (u64, &Document)> {
        let lower = match after {
            Some(seq) => Bound::Excluded(seq),
            None => Bound::Unbounded,
        };
        self.documents
            .range((lower, Bound::Unbounded))
            .map(|(seq, doc)| (*seq, doc))
    }

    fn put(&mut self, seq: u64, doc: Document) {
        if let Some(old) = self.documents.get(&seq) {
            self.by_id.remove(&old.id);
            self.by_self.remove(&old.self_link);
        }
        self.by_id.insert(doc.id.clone(), seq);
        self.by_self.insert(doc.self_link.clone(), seq);
        self.documents.insert(seq, doc);
        self.next_seq = self.next_seq.max(seq + 1);
    }

    fn delete(&mut self, seq: u64) -> Option<Document> {
        let doc = self.documents.remove(&seq)?;
        self.by_id.remove(&doc.id);
        self.by_self.remove(&doc.self_link);
        Some(doc)
    }
}

/// Storage engine - file-backed append-only log, or purely in memory
#[derive(Debug)]
pub struct StorageEngine {
    file: Option<File>,
    file_path: Option<PathBuf>,
    header: Header,
    collections: HashMap<String, CollectionState>,
    /// Records in the log (live and superseded); compaction resets it
    record_count: u64,
}

impl StorageEngine {
    /// Open or create a database file and replay its log
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let exists = path.exists();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let mut storage = StorageEngine {
            file: None,
            file_path: Some(path),
            header: Header::default(),
            collections: HashMap::new(),
            record_count: 0,
        };

        if exists && file.metadata()?.len() > 0 {
            storage.header = Self::load_header(&mut file)?;
            storage.file = Some(file);
            storage.replay()?;
        } else {
            Self::write_header(&mut file, &storage.header)?;
            file.sync_all()?;
            storage.file = Some(file);
        }

        Ok(storage)
    }

    /// Storage without a backing file; contents vanish on drop
    pub fn in_memory() -> Self {
        StorageEngine {
            file: None,
            file_path: None,
            header: Header::default(),
            collections: HashMap::new(),
            record_count: 0,
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.file.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    pub fn create_collection(&mut self, name: &str) -> Result<()> {
        if self.collections.contains_key(name) {
            return Err(CosmoLiteError::CollectionExists(name.to_string()));
        }

        self.append_record(&LogRecord::CreateCollection {
            name: name.to_string(),
            next_seq: 1,
        })?;
        self.collections
            .insert(name.to_string(), CollectionState::new(name.to_string(), 1));

        Ok(())
    }

    pub fn drop_collection(&mut self, name: &str) -> Result<()> {
        if !self.collections.contains_key(name) {
            return Err(CosmoLiteError::CollectionNotFound(name.to_string()));
        }

        self.append_record(&LogRecord::DropCollection { name: name.to_string() })?;
        self.collections.remove(name);

        Ok(())
    }

    pub fn has_collection(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    /// Collection names, sorted
    pub fn list_collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn collection(&self, name: &str) -> Result<&CollectionState> {
        self.collections
            .get(name)
            .ok_or_else(|| CosmoLiteError::CollectionNotFound(name.to_string()))
    }

    /// Store a new document; its id and self link must be unused. Returns its sequence number.
    pub fn insert_document(&mut self, collection: &str, doc: Document) -> Result<u64> {
        let state = self.collection(collection)?;
        if state.by_id.contains_key(&doc.id) {
            return Err(CosmoLiteError::DocumentExists(doc.id));
        }
        if state.by_self.contains_key(&doc.self_link) {
            return Err(CosmoLiteError::DocumentExists(doc.self_link));
        }
        let seq = state.next_seq;

        self.log_put(collection, seq, &doc)?;
        self.state_mut(collection)?.put(seq, doc);

        Ok(seq)
    }

    /// Overwrite the document stored under `seq`. The id must not change.
    pub fn replace_document(&mut self, collection: &str, seq: u64, doc: Document) -> Result<()> {
        let state = self.collection(collection)?;
        match state.documents.get(&seq) {
            Some(old) if old.id == doc.id => {}
            Some(old) => {
                return Err(CosmoLiteError::Validation(format!(
                    "cannot change document id '{}' to '{}'", old.id, doc.id
                )));
            }
            None => return Err(CosmoLiteError::DocumentNotFound(doc.id)),
        }

        self.log_put(collection, seq, &doc)?;
        self.state_mut(collection)?.put(seq, doc);

        Ok(())
    }

    pub fn remove_document(&mut self, collection: &str, seq: u64) -> Result<Document> {
        let state = self.collection(collection)?;
        if !state.documents.contains_key(&seq) {
            return Err(CosmoLiteError::DocumentNotFound(format!("{}#{}", collection, seq)));
        }

        self.append_record(&LogRecord::Delete {
            collection: collection.to_string(),
            seq,
        })?;

        self.state_mut(collection)?
            .delete(seq)
            .ok_or_else(|| CosmoLiteError::DocumentNotFound(format!("{}#{}", collection, seq)))
    }

    /// Flush - fsync the log
    pub fn flush(&mut self) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.sync_all()?;
        }
        Ok(())
    }

    pub fn stats(&self) -> serde_json::Value {
        serde_json::json!({
            "file_path": self.file_path.as_ref().map(|p| p.to_string_lossy().to_string()),
            "file_size": self.file_len().unwrap_or(0),
            "format_version": self.header.version,
            "record_count": self.record_count,
            "collection_count": self.collections.len(),
            "collections": self.list_collections().iter().map(|name| {
                serde_json::json!({
                    "name": name,
                    "document_count": self.collections.get(name).map_or(0, |c| c.len()),
                })
            }).collect::<Vec<_>>(),
        })
    }

    fn log_put(&mut self, collection: &str, seq: u64, doc: &Document) -> Result<()> {
        if self.file.is_none() {
            self.record_count += 1;
            return Ok(());
        }

        let body = serde_json::to_vec(doc)?;
        self.append_record(&LogRecord::Put {
            collection: collection.to_string(),
            seq,
            body,
        })?;
        Ok(())
    }

    fn state_mut(&mut self, name: &str) -> Result<&mut CollectionState> {
        self.collections
            .get_mut(name)
            .ok_or_else(|| CosmoLiteError::CollectionNotFound(name.to_string()))
    }
}
