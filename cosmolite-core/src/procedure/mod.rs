// procedure/mod.rs
// Stored procedures: registration, execution context, built-in procedures
//
// A procedure runs on the caller's thread against a ProcedureContext. Every
// store step goes through the context, which asks the ExecutionBudget first;
// a refused step returns `None` / `false` and the procedure decides how to
// stop.

mod bulk_delete;
mod update;

use std::sync::Arc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Serialize, Deserialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::budget::ExecutionBudget;
use crate::collection_core::{CollectionCore, ContinuationToken, QueryOptions, QueryPage, DEFAULT_PAGE_SIZE};
use crate::document::Document;
use crate::error::{Result, CosmoLiteError};
use crate::query::Query;

pub use bulk_delete::{BulkDeleteOutcome, BulkDeleteProcedure, BULK_DELETE_PROCEDURE_ID};
pub use update::{UpdateProcedure, UPDATE_PROCEDURE_ID};

/// Server-side logic invoked through [`CollectionCore::execute_procedure`]
pub trait StoredProcedure: Send + Sync {
    /// Stable identifier the procedure is registered under
    fn id(&self) -> &str;

    fn execute(&self, ctx: &mut ProcedureContext<'_>, args: Value) -> Result<Value>;
}

/// Handle to a registered procedure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureRef {
    pub id: String,
    #[serde(rename = "_self")]
    pub self_link: String,
}

/// Per-invocation options
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    pub budget: ExecutionBudget,
    /// Documents examined per query page
    pub page_size: usize,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        ExecuteOptions {
            budget: ExecutionBudget::unlimited(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

struct RegisteredProcedure {
    reference: ProcedureRef,
    procedure: Arc<dyn StoredProcedure>,
}

/// Procedures registered against one collection
pub struct ProcedureRegistry {
    collection: String,
    procedures: DashMap<String, RegisteredProcedure>,
}

impl ProcedureRegistry {
    pub fn new(collection: impl Into<String>) -> Self {
        ProcedureRegistry {
            collection: collection.into(),
            procedures: DashMap::new(),
        }
    }

    pub fn create(&self, procedure: Arc<dyn StoredProcedure>) -> Result<ProcedureRef> {
        let id = procedure.id().to_string();
        if id.is_empty() {
            return Err(CosmoLiteError::Validation("procedure id must not be empty".into()));
        }

        match self.procedures.entry(id.clone()) {
            Entry::Occupied(_) => Err(CosmoLiteError::ProcedureExists(id)),
            Entry::Vacant(slot) => {
                let reference = ProcedureRef {
                    self_link: format!("colls/{}/sprocs/{}", self.collection, Uuid::new_v4().simple()),
                    id,
                };
                slot.insert(RegisteredProcedure {
                    reference: reference.clone(),
                    procedure,
                });
                debug!(collection = %self.collection, procedure = %reference.id, "Registered stored procedure");
                Ok(reference)
            }
        }
    }

    pub fn read(&self, id: &str) -> Option<ProcedureRef> {
        self.procedures.get(id).map(|entry| entry.reference.clone())
    }

    /// Registered procedures, sorted by id
    pub fn list(&self) -> Vec<ProcedureRef> {
        let mut refs: Vec<ProcedureRef> = self
            .procedures
            .iter()
            .map(|entry| entry.reference.clone())
            .collect();
        refs.sort_by(|a, b| a.id.cmp(&b.id));
        refs
    }

    pub fn delete(&self, id: &str) -> bool {
        self.procedures.remove(id).is_some()
    }

    /// Look up the procedure behind `reference`. A reference to a deleted (or
    /// deleted and re-created) procedure does not resolve.
    pub fn resolve(&self, reference: &ProcedureRef) -> Result<Arc<dyn StoredProcedure>> {
        match self.procedures.get(&reference.id) {
            Some(entry) if entry.reference.self_link == reference.self_link => {
                Ok(Arc::clone(&entry.procedure))
            }
            _ => Err(CosmoLiteError::ProcedureNotFound(reference.id.clone())),
        }
    }
}

/// What a running procedure sees of the store
pub struct ProcedureContext<'a> {
    collection: &'a CollectionCore,
    budget: ExecutionBudget,
    page_size: usize,
}

impl<'a> ProcedureContext<'a> {
    pub fn new(collection: &'a CollectionCore, budget: ExecutionBudget) -> Self {
        ProcedureContext {
            collection,
            budget,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn collection_name(&self) -> &str {
        &self.collection.name
    }

    pub fn budget(&self) -> &ExecutionBudget {
        &self.budget
    }

    /// One query page, or `None` if the budget refused the step
    pub fn query_documents(
        &mut self,
        query: &Query,
        continuation: Option<&ContinuationToken>,
    ) -> Result<Option<QueryPage>> {
        if !self.accept("query") {
            return Ok(None);
        }

        let options = QueryOptions {
            page_size: self.page_size,
            continuation: continuation.cloned(),
        };
        self.collection.query_documents(query, &options).map(Some)
    }

    /// Replace `doc` if its stored `_etag` still equals `if_match`.
    /// `None` if the budget refused the step.
    pub fn replace_document(&mut self, doc: &Document, if_match: &str) -> Result<Option<Document>> {
        if !self.accept("replace") {
            return Ok(None);
        }

        self.collection.replace_document(doc, Some(if_match)).map(Some)
    }

    /// Delete by self link. `false` if the budget refused the step.
    pub fn delete_document(&mut self, self_link: &str) -> Result<bool> {
        if !self.accept("delete") {
            return Ok(false);
        }

        self.collection.delete_document(self_link, None)?;
        Ok(true)
    }

    fn accept(&mut self, step: &str) -> bool {
        let accepted = self.budget.try_accept();
        if !accepted {
            debug!(
                collection = %self.collection.name,
                step,
                operations = self.budget.used(),
                "Step not accepted, execution budget exhausted"
            );
        }
        accepted
    }
}
