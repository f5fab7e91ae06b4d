// storage/compaction.rs
// Storage compaction functionality

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};
use crate::error::Result;
use super::io::encode_frame;
use super::{Header, LogRecord, StorageEngine};

/// Compaction statistics
#[derive(Debug, Clone, Default)]
pub struct CompactionStats {
    pub size_before: u64,
    pub size_after: u64,
    pub records_before: u64,
    pub records_after: u64,
    pub documents_kept: u64,
}

impl CompactionStats {
    pub fn space_saved(&self) -> u64 {
        self.size_before.saturating_sub(self.size_after)
    }

    /// Superseded versions, deletes and dropped collections that were discarded
    pub fn records_removed(&self) -> u64 {
        self.records_before.saturating_sub(self.records_after)
    }
}

impl StorageEngine {
    /// Storage compaction - rewrites the log with only the live state.
    /// The new log is written next to the old one and renamed over it. On
    /// failure the engine keeps appending to the old log.
    pub fn compact(&mut self) -> Result<CompactionStats> {
        let mut stats = CompactionStats {
            size_before: self.file_len()?,
            records_before: self.record_count,
            ..Default::default()
        };

        let mut records = Vec::new();
        for name in self.list_collections() {
            let state = self.collection(&name)?;
            records.push(LogRecord::CreateCollection {
                name: name.clone(),
                next_seq: state.next_seq,
            });
            for (seq, doc) in state.scan_from(None) {
                records.push(LogRecord::Put {
                    collection: name.clone(),
                    seq,
                    body: serde_json::to_vec(doc)?,
                });
                stats.documents_kept += 1;
            }
        }
        stats.records_after = records.len() as u64;

        let Some(path) = self.file_path.clone() else {
            // Nothing to rewrite; the in-memory state is already compact
            self.record_count = stats.records_after;
            return Ok(stats);
        };

        let temp_path = path.with_extension("compact");
        let new_file = match Self::write_compacted(&temp_path, &self.header, &records)
            .and_then(|file| fs::rename(&temp_path, &path).map(|_| file).map_err(Into::into))
        {
            Ok(file) => file,
            Err(e) => {
                // The old log and its handle stay in use
                let _ = fs::remove_file(&temp_path);
                warn!(path = %path.display(), error = %e, "Compaction failed, keeping existing log");
                return Err(e);
            }
        };

        // The handle used to write the compacted log now refers to `path`
        self.file = Some(new_file);
        self.record_count = stats.records_after;
        stats.size_after = self.file_len()?;

        info!(
            size_before = stats.size_before,
            size_after = stats.size_after,
            records_removed = stats.records_removed(),
            "Compacted storage log"
        );

        Ok(stats)
    }

    fn write_compacted(temp_path: &Path, header: &Header, records: &[LogRecord]) -> Result<File> {
        let mut new_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(temp_path)?;

        Self::write_header(&mut new_file, header)?;
        for record in records {
            new_file.write_all(&encode_frame(record)?)?;
        }
        new_file.sync_all()?;

        Ok(new_file)
    }
}
