// cosmolite-core/src/collection_core.rs
// Store primitives for one collection, plus stored procedure execution

use std::fmt;
use std::sync::Arc;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Serialize, Deserialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::storage::StorageEngine;
use crate::document::Document;
use crate::error::{Result, CosmoLiteError};
use crate::procedure::{ExecuteOptions, ProcedureContext, ProcedureRef, ProcedureRegistry, StoredProcedure};
use crate::query::Query;

pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Opaque cursor for resuming a paged query
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContinuationToken(String);

impl ContinuationToken {
    pub fn new(token: impl Into<String>) -> Self {
        ContinuationToken(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn after_seq(seq: u64) -> Self {
        ContinuationToken(format!("+{:x}", seq))
    }

    fn seq(&self) -> Result<u64> {
        self.0
            .strip_prefix('+')
            .and_then(|hex| u64::from_str_radix(hex, 16).ok())
            .ok_or_else(|| CosmoLiteError::Validation(format!("invalid continuation token '{}'", self.0)))
    }
}

impl fmt::Display for ContinuationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Paging options for [`CollectionCore::query_documents`]
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Stored documents examined per page
    pub page_size: usize,
    pub continuation: Option<ContinuationToken>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        QueryOptions {
            page_size: DEFAULT_PAGE_SIZE,
            continuation: None,
        }
    }
}

/// One page of query results.
///
/// A page covers up to `page_size` stored documents in insertion order.
/// Documents in that window that fail the filter are skipped, so a page can
/// hold fewer results than `page_size`, or none, and still carry a
/// continuation. `continuation == None` means the query is complete.
#[derive(Debug, Clone, Default)]
pub struct QueryPage {
    pub documents: Vec<Document>,
    pub continuation: Option<ContinuationToken>,
}

/// Pure Rust Collection - language-independent core logic
pub struct CollectionCore {
    pub name: String,
    storage: Arc<RwLock<StorageEngine>>,
    procedures: Arc<ProcedureRegistry>,
}

impl CollectionCore {
    /// Create new collection (or get existing)
    pub fn new(
        name: String,
        storage: Arc<RwLock<StorageEngine>>,
        procedures: Arc<ProcedureRegistry>,
    ) -> Result<Self> {
        {
            let mut storage_guard = storage.write();
            if !storage_guard.has_collection(&name) {
                storage_guard.create_collection(&name)?;
            }
        }

        Ok(CollectionCore {
            name,
            storage,
            procedures,
        })
    }

    /// Insert a new document. The body's `id` is used when present, otherwise one is generated.
    pub fn create_document(&self, body: Value) -> Result<Document> {
        let (id, fields) = Document::split_body(body)?;
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut doc = Document::new(id, fields);
        doc.self_link = format!("colls/{}/docs/{}", self.name, Uuid::new_v4().simple());
        stamp(&mut doc);

        self.storage.write().insert_document(&self.name, doc.clone())?;
        debug!(collection = %self.name, id = %doc.id, "Created document");

        Ok(doc)
    }

    pub fn read_document(&self, id: &str) -> Result<Option<Document>> {
        let storage = self.storage.read();
        let state = storage.collection(&self.name)?;
        Ok(state.get_by_id(id).map(|(_, doc)| doc.clone()))
    }

    pub fn count_documents(&self) -> Result<u64> {
        let storage = self.storage.read();
        Ok(storage.collection(&self.name)?.len() as u64)
    }

    /// Fetch one page of documents matching `query`
    pub fn query_documents(&self, query: &Query, options: &QueryOptions) -> Result<QueryPage> {
        let after = options.continuation.as_ref().map(|t| t.seq()).transpose()?;
        let page_size = options.page_size.max(1);

        let storage = self.storage.read();
        let state = storage.collection(&self.name)?;

        let mut documents = Vec::new();
        let mut scanned = 0usize;
        let mut last_seq = None;
        let mut window = state.scan_from(after);

        for (seq, doc) in window.by_ref() {
            scanned += 1;
            last_seq = Some(seq);
            if query.matches(doc) {
                documents.push(doc.clone());
            }
            if scanned == page_size {
                break;
            }
        }

        let more = scanned == page_size && window.next().is_some();
        let continuation = match last_seq {
            Some(seq) if more => Some(ContinuationToken::after_seq(seq)),
            _ => None,
        };

        Ok(QueryPage { documents, continuation })
    }

    /// Replace the stored document addressed by `doc.self_link`.
    ///
    /// With `if_match`, the write only happens if the stored `_etag` still
    /// equals it; otherwise `ConcurrencyConflict`. Returns the stored version
    /// with its new `_etag` and `_ts`.
    pub fn replace_document(&self, doc: &Document, if_match: Option<&str>) -> Result<Document> {
        let mut storage = self.storage.write();

        let seq = {
            let state = storage.collection(&self.name)?;
            let (seq, current) = state
                .get_by_self(&doc.self_link)
                .ok_or_else(|| CosmoLiteError::DocumentNotFound(doc.id.clone()))?;
            check_etag(current, if_match)?;
            seq
        };

        let mut updated = doc.clone();
        stamp(&mut updated);
        storage.replace_document(&self.name, seq, updated.clone())?;

        Ok(updated)
    }

    /// Delete the document addressed by `self_link`, optionally guarded by `if_match`
    pub fn delete_document(&self, self_link: &str, if_match: Option<&str>) -> Result<Document> {
        let mut storage = self.storage.write();

        let seq = {
            let state = storage.collection(&self.name)?;
            let (seq, current) = state
                .get_by_self(self_link)
                .ok_or_else(|| CosmoLiteError::DocumentNotFound(self_link.to_string()))?;
            check_etag(current, if_match)?;
            seq
        };

        storage.remove_document(&self.name, seq)
    }

    // ========== STORED PROCEDURES ==========

    pub fn procedures(&self) -> &ProcedureRegistry {
        &self.procedures
    }

    /// Register a procedure under its id. Fails with `ProcedureExists` if the id is taken.
    pub fn create_procedure(&self, procedure: Arc<dyn StoredProcedure>) -> Result<ProcedureRef> {
        self.procedures.create(procedure)
    }

    pub fn read_procedure(&self, id: &str) -> Option<ProcedureRef> {
        self.procedures.read(id)
    }

    /// Run a registered procedure against this collection
    pub fn execute_procedure(
        &self,
        procedure: &ProcedureRef,
        args: Value,
        options: ExecuteOptions,
    ) -> Result<Value> {
        let sproc = self.procedures.resolve(procedure)?;

        let mut ctx = ProcedureContext::new(self, options.budget).with_page_size(options.page_size);
        let result = sproc.execute(&mut ctx, args);

        debug!(
            collection = %self.name,
            procedure = %procedure.id,
            operations = ctx.budget().used(),
            budget_exhausted = ctx.budget().is_exhausted(),
            ok = result.is_ok(),
            "Executed stored procedure"
        );

        result
    }
}

fn stamp(doc: &mut Document) {
    doc.etag = Uuid::new_v4().to_string();
    doc.ts = Utc::now().timestamp();
}

fn check_etag(current: &Document, if_match: Option<&str>) -> Result<()> {
    match if_match {
        Some(expected) if current.etag != expected => Err(CosmoLiteError::ConcurrencyConflict {
            id: current.id.clone(),
            expected: expected.to_string(),
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn collection() -> CollectionCore {
        let storage = Arc::new(RwLock::new(StorageEngine::in_memory()));
        let registry = Arc::new(ProcedureRegistry::new("items"));
        CollectionCore::new("items".to_string(), storage, registry).unwrap()
    }

    #[test]
    fn test_create_assigns_system_fields() {
        let coll = collection();
        let doc = coll.create_document(json!({"id": "1", "key": "test"})).unwrap();

        assert_eq!(doc.id, "1");
        assert!(doc.self_link.starts_with("colls/items/docs/"));
        assert!(!doc.etag.is_empty());
        assert!(doc.ts > 0);
        assert_eq!(coll.read_document("1").unwrap(), Some(doc));
    }

    #[test]
    fn test_create_generates_id() {
        let coll = collection();
        let doc = coll.create_document(json!({"key": "test"})).unwrap();

        assert_eq!(doc.id.len(), 36);
        assert!(coll.read_document(&doc.id).unwrap().is_some());
    }

    #[test]
    fn test_create_duplicate_id_fails() {
        let coll = collection();
        coll.create_document(json!({"id": "1"})).unwrap();

        let err = coll.create_document(json!({"id": "1"})).unwrap_err();
        assert!(matches!(err, CosmoLiteError::DocumentExists(_)));
        assert_eq!(coll.count_documents().unwrap(), 1);
    }

    #[test]
    fn test_query_pages_with_continuation() {
        let coll = collection();
        for i in 0..5 {
            coll.create_document(json!({"id": format!("d{}", i)})).unwrap();
        }

        let mut options = QueryOptions { page_size: 2, continuation: None };
        let mut seen = Vec::new();
        let mut pages = 0;
        loop {
            let page = coll.query_documents(&Query::all(), &options).unwrap();
            pages += 1;
            seen.extend(page.documents.into_iter().map(|d| d.id));
            match page.continuation {
                Some(token) => options.continuation = Some(token),
                None => break,
            }
        }

        assert_eq!(pages, 3);
        assert_eq!(seen, vec!["d0", "d1", "d2", "d3", "d4"]);
    }

    #[test]
    fn test_exact_page_boundary_has_no_continuation() {
        let coll = collection();
        for i in 0..2 {
            coll.create_document(json!({"id": format!("d{}", i)})).unwrap();
        }

        let options = QueryOptions { page_size: 2, continuation: None };
        let page = coll.query_documents(&Query::all(), &options).unwrap();

        assert_eq!(page.documents.len(), 2);
        assert!(page.continuation.is_none());
    }

    #[test]
    fn test_filtered_page_can_be_empty_with_continuation() {
        let coll = collection();
        for i in 0..4 {
            coll.create_document(json!({"id": format!("d{}", i)})).unwrap();
        }

        let options = QueryOptions { page_size: 2, continuation: None };
        let page = coll.query_documents(&Query::by_id("d3"), &options).unwrap();

        assert!(page.documents.is_empty());
        assert!(page.continuation.is_some());

        let next = QueryOptions { page_size: 2, continuation: page.continuation };
        let page = coll.query_documents(&Query::by_id("d3"), &next).unwrap();
        assert_eq!(page.documents.len(), 1);
        assert!(page.continuation.is_none());
    }

    #[test]
    fn test_invalid_continuation_token() {
        let coll = collection();
        let options = QueryOptions {
            page_size: 10,
            continuation: Some(ContinuationToken::new("garbage")),
        };

        let err = coll.query_documents(&Query::all(), &options).unwrap_err();
        assert!(matches!(err, CosmoLiteError::Validation(_)));
    }

    #[test]
    fn test_replace_with_matching_etag() {
        let coll = collection();
        let mut doc = coll.create_document(json!({"id": "1", "v": 1})).unwrap();
        let old_etag = doc.etag.clone();

        doc.set("v".into(), json!(2));
        let replaced = coll.replace_document(&doc, Some(&old_etag)).unwrap();

        assert_ne!(replaced.etag, old_etag);
        assert_eq!(coll.read_document("1").unwrap().unwrap().get("v").unwrap(), &json!(2));
    }

    #[test]
    fn test_replace_with_stale_etag_conflicts() {
        let coll = collection();
        let original = coll.create_document(json!({"id": "1", "v": 1})).unwrap();

        let mut first = original.clone();
        first.set("v".into(), json!(2));
        coll.replace_document(&first, Some(&original.etag)).unwrap();

        let mut second = original.clone();
        second.set("v".into(), json!(3));
        let err = coll.replace_document(&second, Some(&original.etag)).unwrap_err();

        assert!(matches!(err, CosmoLiteError::ConcurrencyConflict { .. }));
        assert_eq!(coll.read_document("1").unwrap().unwrap().get("v").unwrap(), &json!(2));
    }

    #[test]
    fn test_replace_missing_document() {
        let coll = collection();
        let doc = coll.create_document(json!({"id": "1"})).unwrap();
        coll.delete_document(&doc.self_link, None).unwrap();

        let err = coll.replace_document(&doc, Some(&doc.etag)).unwrap_err();
        assert!(matches!(err, CosmoLiteError::DocumentNotFound(_)));
    }

    #[test]
    fn test_delete_document() {
        let coll = collection();
        let doc = coll.create_document(json!({"id": "1"})).unwrap();

        assert!(matches!(
            coll.delete_document(&doc.self_link, Some("stale")),
            Err(CosmoLiteError::ConcurrencyConflict { .. })
        ));
        let removed = coll.delete_document(&doc.self_link, Some(&doc.etag)).unwrap();

        assert_eq!(removed.id, "1");
        assert_eq!(coll.count_documents().unwrap(), 0);
        assert!(matches!(
            coll.delete_document(&doc.self_link, None),
            Err(CosmoLiteError::DocumentNotFound(_))
        ));
    }
}
