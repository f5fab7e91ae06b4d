// procedure/update.rs
// The "update" stored procedure: find by id, apply operators, conditional replace

use serde_json::Value;
use tracing::debug;

use crate::document::Document;
use crate::error::{Result, CosmoLiteError};
use crate::query::Query;
use crate::update::UpdateCommands;
use super::{ProcedureContext, StoredProcedure};

pub const UPDATE_PROCEDURE_ID: &str = "update";

/// Args: `[id, commands]`. Result: the updated document.
///
/// Writes at most once, guarded by the `_etag` that was read. A concurrent
/// writer makes the replace fail with `ConcurrencyConflict`; nothing is
/// retried here.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateProcedure;

impl UpdateProcedure {
    pub fn run(ctx: &mut ProcedureContext<'_>, id: &str, commands: &UpdateCommands) -> Result<Document> {
        if id.is_empty() {
            return Err(CosmoLiteError::Validation("document id must not be empty".into()));
        }

        let current = Self::locate(ctx, id)?;
        let updated = commands.applied_to(&current)?;
        Self::commit(ctx, &updated, &current.etag)
    }

    /// Find the document with `id`, following continuations across pages
    /// that came back empty.
    pub(crate) fn locate(ctx: &mut ProcedureContext<'_>, id: &str) -> Result<Document> {
        let query = Query::by_id(id);
        let mut continuation = None;

        loop {
            let page = ctx
                .query_documents(&query, continuation.as_ref())?
                .ok_or_else(|| CosmoLiteError::BudgetExceeded("update query".into()))?;

            if let Some(doc) = page.documents.into_iter().next() {
                return Ok(doc);
            }

            match page.continuation {
                Some(next) => {
                    debug!(collection = ctx.collection_name(), id, "Empty page, following continuation");
                    continuation = Some(next);
                }
                None => return Err(CosmoLiteError::DocumentNotFound(id.to_string())),
            }
        }
    }

    pub(crate) fn commit(ctx: &mut ProcedureContext<'_>, updated: &Document, read_etag: &str) -> Result<Document> {
        ctx.replace_document(updated, read_etag)?
            .ok_or_else(|| CosmoLiteError::BudgetExceeded("update replace".into()))
    }

    fn parse_args(args: Value) -> Result<(String, UpdateCommands)> {
        let Value::Array(items) = args else {
            return Err(CosmoLiteError::Validation("update expects [id, commands]".into()));
        };

        let id = match items.first() {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            _ => return Err(CosmoLiteError::Validation("update requires a non-empty string id".into())),
        };
        let commands = UpdateCommands::from_json(items.get(1).unwrap_or(&Value::Null))?;

        Ok((id, commands))
    }
}

impl StoredProcedure for UpdateProcedure {
    fn id(&self) -> &str {
        UPDATE_PROCEDURE_ID
    }

    fn execute(&self, ctx: &mut ProcedureContext<'_>, args: Value) -> Result<Value> {
        let (id, commands) = Self::parse_args(args)?;
        let updated = Self::run(ctx, &id, &commands)?;
        Ok(updated.into())
    }
}
