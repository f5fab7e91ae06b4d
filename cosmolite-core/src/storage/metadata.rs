// storage/metadata.rs
// Header handling and log replay for storage engine

use std::fs::File;
use std::io::{Read, Write, Seek, SeekFrom};
use tracing::{debug, warn};
use crate::document::Document;
use crate::error::{Result, CosmoLiteError};
use super::io::{read_frame, Frame};
use super::{CollectionState, Header, LogRecord, StorageEngine, HEADER_SIZE, MAGIC, FORMAT_VERSION};

impl StorageEngine {
    pub(super) fn load_header(file: &mut File) -> Result<Header> {
        file.seek(SeekFrom::Start(0))?;

        let mut header_bytes = vec![0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header_bytes)
            .map_err(|_| CosmoLiteError::Corruption("File too short for header".into()))?;

        let header: Header = bincode::deserialize(&header_bytes)
            .map_err(|e| CosmoLiteError::Corruption(format!("Invalid header: {}", e)))?;

        if header.magic != MAGIC {
            return Err(CosmoLiteError::Corruption("Invalid magic number".into()));
        }
        if header.version != FORMAT_VERSION {
            return Err(CosmoLiteError::Corruption(format!(
                "Unsupported format version {}", header.version
            )));
        }

        Ok(header)
    }

    /// Write the header at the start of `writer`; returns the offset right after it
    pub(super) fn write_header<W: Write + Seek>(writer: &mut W, header: &Header) -> Result<u64> {
        writer.seek(SeekFrom::Start(0))?;

        let header_bytes = bincode::serialize(header)?;
        writer.write_all(&header_bytes)?;

        Ok(writer.stream_position()?)
    }

    /// Rebuild the in-memory state from the log.
    ///
    /// An incomplete frame at the end of the file is an interrupted append and
    /// is cut off; a complete frame with a bad checksum is corruption.
    pub(super) fn replay(&mut self) -> Result<()> {
        let Some(mut file) = self.file.take() else {
            return Ok(());
        };

        let file_len = file.metadata()?.len();
        let mut offset = HEADER_SIZE;
        let mut replayed = 0u64;

        let outcome = loop {
            match read_frame(&mut file, offset, file_len) {
                Ok(Frame::Record(record, next)) => {
                    if let Err(e) = self.apply_record(record) {
                        break Err(e);
                    }
                    replayed += 1;
                    offset = next;
                }
                Ok(Frame::End) => break Ok(()),
                Ok(Frame::TornTail) => {
                    warn!(
                        offset,
                        discarded_bytes = file_len - offset,
                        "Discarding incomplete record at end of log"
                    );
                    if let Err(e) = file.set_len(offset) {
                        break Err(e.into());
                    }
                    break Ok(());
                }
                Err(e) => break Err(e),
            }
        };

        self.file = Some(file);
        self.record_count = replayed;
        outcome?;

        debug!(records = replayed, collections = self.collections.len(), "Replayed storage log");
        Ok(())
    }

    fn apply_record(&mut self, record: LogRecord) -> Result<()> {
        match record {
            LogRecord::CreateCollection { name, next_seq } => {
                self.collections
                    .insert(name.clone(), CollectionState::new(name, next_seq));
            }
            LogRecord::DropCollection { name } => {
                self.collections.remove(&name);
            }
            LogRecord::Put { collection, seq, body } => {
                let doc: Document = serde_json::from_slice(&body)?;
                self.replayed_collection(&collection)?.put(seq, doc);
            }
            LogRecord::Delete { collection, seq } => {
                self.replayed_collection(&collection)?.delete(seq);
            }
        }
        Ok(())
    }

    fn replayed_collection(&mut self, name: &str) -> Result<&mut CollectionState> {
        self.collections.get_mut(name).ok_or_else(|| {
            CosmoLiteError::Corruption(format!("Log record for unknown collection '{}'", name))
        })
    }
}
