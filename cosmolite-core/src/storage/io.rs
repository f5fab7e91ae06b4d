// storage/io.rs
// Low-level record framing for the storage log
//
// Frame layout: [payload length: u32 LE][payload][crc32(payload): u32 LE]

use std::fs::File;
use std::io::{Read, Write, Seek, SeekFrom};
use crate::error::{Result, CosmoLiteError};
use super::{LogRecord, StorageEngine};

/// Outcome of reading one frame during replay
pub(super) enum Frame {
    Record(LogRecord, u64),
    /// Clean end of log
    End,
    /// Incomplete frame at the end of the file (interrupted append)
    TornTail,
}

pub(super) fn encode_frame(record: &LogRecord) -> Result<Vec<u8>> {
    let payload = bincode::serialize(record)?;
    let mut buf = Vec::with_capacity(payload.len() + 8);

    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&payload);
    buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());

    Ok(buf)
}

/// Read the frame starting at `offset`. Returns the record and the offset of the next frame.
pub(super) fn read_frame(file: &mut File, offset: u64, file_len: u64) -> Result<Frame> {
    if offset >= file_len {
        return Ok(Frame::End);
    }
    if file_len - offset < 8 {
        return Ok(Frame::TornTail);
    }

    file.seek(SeekFrom::Start(offset))?;

    let mut len_bytes = [0u8; 4];
    file.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as u64;

    if file_len - offset < 8 + len {
        return Ok(Frame::TornTail);
    }

    let mut payload = vec![0u8; len as usize];
    file.read_exact(&mut payload)?;

    let mut crc_bytes = [0u8; 4];
    file.read_exact(&mut crc_bytes)?;

    if crc32fast::hash(&payload) != u32::from_le_bytes(crc_bytes) {
        return Err(CosmoLiteError::Corruption(format!("checksum mismatch in record at offset {}", offset)));
    }

    let record: LogRecord = bincode::deserialize(&payload)
        .map_err(|e| CosmoLiteError::Corruption(format!("undecodable record at offset {}: {}", offset, e)))?;

    Ok(Frame::Record(record, offset + 8 + len))
}

impl StorageEngine {
    /// Append a record to the end of the log. No-op for in-memory engines.
    /// Returns the offset where the record was written.
    pub(super) fn append_record(&mut self, record: &LogRecord) -> Result<Option<u64>> {
        let Some(file) = self.file.as_mut() else {
            self.record_count += 1;
            return Ok(None);
        };

        let frame = encode_frame(record)?;
        let offset = file.seek(SeekFrom::End(0))?;
        file.write_all(&frame)?;
        self.record_count += 1;

        Ok(Some(offset))
    }

    /// Get file length (0 for in-memory engines)
    pub fn file_len(&self) -> Result<u64> {
        match &self.file {
            Some(file) => Ok(file.metadata()?.len()),
            None => Ok(0),
        }
    }
}
