// procedure/bulk_delete.rs
// The "bulkDelete" stored procedure: drain a collection page by page

use serde::{Serialize, Deserialize};
use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::query::Query;
use super::{ProcedureContext, StoredProcedure};

pub const BULK_DELETE_PROCEDURE_ID: &str = "bulkDelete";

/// Wire result: `{"deleted": n, "complete": bool}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkDeleteOutcome {
    pub deleted: u64,
    /// `false` when the budget stopped the run before the collection was empty
    pub complete: bool,
}

impl BulkDeleteOutcome {
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

/// Deletes every document of the collection, one at a time.
///
/// Each fetched page is fully deleted before the next query. When the budget
/// refuses a query or a delete, the run stops and reports what it deleted so
/// far with `complete: false`; documents still queued from the current page
/// are left for the next invocation. Store errors abort the run.
#[derive(Debug, Clone, Copy, Default)]
pub struct BulkDeleteProcedure;

impl BulkDeleteProcedure {
    pub fn run(ctx: &mut ProcedureContext<'_>) -> Result<BulkDeleteOutcome> {
        let query = Query::all();
        let mut deleted = 0u64;
        let mut continuation = None;

        loop {
            let Some(page) = ctx.query_documents(&query, continuation.as_ref())? else {
                return Ok(Self::stopped(ctx, deleted));
            };

            if page.documents.is_empty() && page.continuation.is_none() {
                debug!(collection = ctx.collection_name(), deleted, "Bulk delete drained collection");
                return Ok(BulkDeleteOutcome { deleted, complete: true });
            }

            for doc in &page.documents {
                if !ctx.delete_document(&doc.self_link)? {
                    return Ok(Self::stopped(ctx, deleted));
                }
                deleted += 1;
            }

            // After the last page this restarts from the top, which confirms the collection is empty
            continuation = page.continuation;
        }
    }

    fn stopped(ctx: &ProcedureContext<'_>, deleted: u64) -> BulkDeleteOutcome {
        debug!(
            collection = ctx.collection_name(),
            deleted,
            "Bulk delete stopped by execution budget"
        );
        BulkDeleteOutcome { deleted, complete: false }
    }
}

impl StoredProcedure for BulkDeleteProcedure {
    fn id(&self) -> &str {
        BULK_DELETE_PROCEDURE_ID
    }

    fn execute(&self, ctx: &mut ProcedureContext<'_>, _args: Value) -> Result<Value> {
        let outcome = Self::run(ctx)?;
        Ok(serde_json::to_value(outcome)?)
    }
}
