// cosmolite-core/src/repository.rs
// Typed repository over one collection, backed by the built-in stored procedures

use std::marker::PhantomData;
use std::sync::Arc;
use std::thread;
use once_cell::sync::OnceCell;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::collection_core::{CollectionCore, ContinuationToken, QueryOptions};
use crate::config::RepositoryConfig;
use crate::database::DatabaseCore;
use crate::document::Document;
use crate::error::{Result, CosmoLiteError};
use crate::procedure::{
    BulkDeleteOutcome, BulkDeleteProcedure, ProcedureRef, StoredProcedure, UpdateProcedure,
};
use crate::query::Query;
use crate::update::UpdateCommands;

/// A type stored as one document per value.
///
/// The serialized form must carry a string `id`. `validate` runs before
/// every create and after every update.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// Procedure handles resolved by [`Repository::ensure_procedures`]
#[derive(Debug, Clone)]
pub struct Procedures {
    pub update: ProcedureRef,
    pub bulk_delete: ProcedureRef,
}

pub struct Repository<E> {
    collection: CollectionCore,
    config: RepositoryConfig,
    procedures: OnceCell<Procedures>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Repository<E> {
    pub fn new(db: &DatabaseCore, collection: &str, config: RepositoryConfig) -> Result<Self> {
        Self::from_collection(db.collection(collection)?, config)
    }

    pub fn from_collection(collection: CollectionCore, config: RepositoryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Repository {
            collection,
            config,
            procedures: OnceCell::new(),
            _entity: PhantomData,
        })
    }

    pub fn collection(&self) -> &CollectionCore {
        &self.collection
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    // ========== CRUD ==========

    pub fn create(&self, entity: &E) -> Result<E> {
        check_entity(entity)?;
        let doc = self.collection.create_document(serde_json::to_value(entity)?)?;
        to_entity(doc)
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<E>> {
        self.collection.read_document(id)?.map(to_entity).transpose()
    }

    /// Every entity matching `filter`, across all pages
    pub fn find(&self, filter: &Value) -> Result<Vec<E>> {
        let query = Query::from_json(filter)?;
        let mut options = QueryOptions {
            page_size: self.config.page_size,
            continuation: None,
        };
        let mut results = Vec::new();

        loop {
            let page = self.collection.query_documents(&query, &options)?;
            for doc in page.documents {
                results.push(to_entity(doc)?);
            }
            match page.continuation {
                Some(token) => options.continuation = Some(token),
                None => return Ok(results),
            }
        }
    }

    /// One page of entities matching `filter`
    pub fn find_page(
        &self,
        filter: &Value,
        continuation: Option<ContinuationToken>,
    ) -> Result<(Vec<E>, Option<ContinuationToken>)> {
        let query = Query::from_json(filter)?;
        let options = QueryOptions {
            page_size: self.config.page_size,
            continuation,
        };

        let page = self.collection.query_documents(&query, &options)?;
        let entities = page
            .documents
            .into_iter()
            .map(to_entity)
            .collect::<Result<Vec<E>>>()?;
        Ok((entities, page.continuation))
    }

    pub fn count(&self) -> Result<u64> {
        self.collection.count_documents()
    }

    /// Delete by id. `false` if there was nothing to delete.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let Some(doc) = self.collection.read_document(id)? else {
            return Ok(false);
        };

        match self.collection.delete_document(&doc.self_link, None) {
            Ok(_) => Ok(true),
            Err(CosmoLiteError::DocumentNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    // ========== PROCEDURE-BACKED OPERATIONS ==========

    /// Apply `commands` to the document `id` through the `update` procedure.
    ///
    /// Concurrency conflicts and exhausted budgets are retried with backoff
    /// up to `retry.max_attempts`; every retry re-reads the document.
    pub fn update(&self, id: &str, commands: &UpdateCommands) -> Result<E> {
        if id.is_empty() {
            return Err(CosmoLiteError::Validation("document id must not be empty".into()));
        }

        let procedures = self.ensure_procedures()?;
        let args = json!([id, commands.to_json()]);
        let policy = &self.config.retry;
        let mut attempt = 1;

        let raw = loop {
            match self.collection.execute_procedure(
                &procedures.update,
                args.clone(),
                self.config.execute_options(),
            ) {
                Ok(raw) => break raw,
                Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                    let delay = policy.backoff(attempt);
                    debug!(
                        collection = %self.collection.name,
                        id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying update"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_retryable() {
                        warn!(collection = %self.collection.name, id, attempt, error = %err, "Update gave up");
                    }
                    return Err(err);
                }
            }
        };

        let entity: E = serde_json::from_value(raw)?;
        check_entity(&entity)?;
        Ok(entity)
    }

    /// Delete every document through the `bulkDelete` procedure, invoking it
    /// until it reports a complete run. Returns the number deleted.
    ///
    /// An invocation that deletes nothing and stops short counts as a failed
    /// attempt; after `retry.max_attempts` of those in a row the call fails
    /// with `BudgetExceeded`.
    pub fn remove_all(&self) -> Result<u64> {
        let procedures = self.ensure_procedures()?;
        let policy = &self.config.retry;
        let mut total = 0u64;
        let mut stalled = 0u32;

        loop {
            let raw = self.collection.execute_procedure(
                &procedures.bulk_delete,
                json!([]),
                self.config.execute_options(),
            )?;
            let outcome = BulkDeleteOutcome::from_value(raw)?;
            total += outcome.deleted;

            if outcome.complete {
                info!(collection = %self.collection.name, deleted = total, "Removed all documents");
                return Ok(total);
            }

            if outcome.deleted > 0 {
                stalled = 0;
                continue;
            }

            stalled += 1;
            if stalled >= policy.max_attempts {
                warn!(collection = %self.collection.name, deleted = total, "Bulk delete made no progress");
                return Err(CosmoLiteError::BudgetExceeded(format!(
                    "bulk delete after {} documents",
                    total
                )));
            }
            thread::sleep(policy.backoff(stalled));
        }
    }

    /// Register the built-in procedures on the collection, or pick up the
    /// ones already there. Resolved once per repository.
    pub fn ensure_procedures(&self) -> Result<&Procedures> {
        self.procedures.get_or_try_init(|| {
            let procedures = Procedures {
                update: provision(&self.collection, Arc::new(UpdateProcedure))?,
                bulk_delete: provision(&self.collection, Arc::new(BulkDeleteProcedure))?,
            };
            debug!(collection = %self.collection.name, "Procedures provisioned");
            Ok(procedures)
        })
    }
}

fn provision(collection: &CollectionCore, procedure: Arc<dyn StoredProcedure>) -> Result<ProcedureRef> {
    let id = procedure.id().to_string();
    if let Some(existing) = collection.read_procedure(&id) {
        return Ok(existing);
    }

    match collection.create_procedure(procedure) {
        Ok(created) => Ok(created),
        // Lost a race with another creator
        Err(CosmoLiteError::ProcedureExists(_)) => collection
            .read_procedure(&id)
            .ok_or(CosmoLiteError::ProcedureNotFound(id)),
        Err(e) => Err(e),
    }
}

fn to_entity<E: Entity>(doc: Document) -> Result<E> {
    Ok(serde_json::from_value(doc.into())?)
}

fn check_entity<E: Entity>(entity: &E) -> Result<()> {
    entity.validate().map_err(CosmoLiteError::EntityValidation)
}
