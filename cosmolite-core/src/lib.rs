// cosmolite-core/src/lib.rs
// Pure Rust document store with etag concurrency and stored procedures

pub mod error;
pub mod document;
pub mod query;
pub mod update;
pub mod budget;
pub mod storage;
pub mod collection_core;
pub mod procedure;
pub mod database;
pub mod config;
pub mod repository;

// Public exports
pub use error::{CosmoLiteError, ErrorKind, Result};
pub use document::Document;
pub use query::Query;
pub use update::UpdateCommands;
pub use budget::ExecutionBudget;
pub use storage::{StorageEngine, CompactionStats};
pub use collection_core::{CollectionCore, ContinuationToken, QueryOptions, QueryPage};
pub use procedure::{
    BulkDeleteOutcome, BulkDeleteProcedure, ExecuteOptions, ProcedureContext, ProcedureRef,
    ProcedureRegistry, StoredProcedure, UpdateProcedure, BULK_DELETE_PROCEDURE_ID,
    UPDATE_PROCEDURE_ID,
};
pub use database::DatabaseCore;
pub use config::{BudgetConfig, RepositoryConfig, RetryPolicy};
pub use repository::{Entity, Procedures, Repository};
