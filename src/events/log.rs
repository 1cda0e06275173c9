//! Append-only event log on disk.

use super::{paginate, EventLog, EventPage};
use crate::error::{HistoryError, Result};
use crate::types::{ContentId, EntityId, EventRecord};
use async_trait::async_trait;
use chrono::Utc;
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Magic bytes for event records.
const EVENT_MAGIC: &[u8; 4] = b"EVT\0";

/// Current record format version.
const EVENT_VERSION: u8 = 1;

/// Event log persisted as a single append-only file.
///
/// The file is exclusively locked while open. All events are indexed by
/// entity in memory on open. A torn record at the tail (crash mid-append)
/// is truncated away; a damaged record with intact records after it fails
/// the open with [`HistoryError::Corruption`].
pub struct FileEventLog {
    path: PathBuf,
    file: Mutex<LogFile>,
    index: RwLock<HashMap<EntityId, Vec<EventRecord>>>,
    next_index: Mutex<u64>,
}

impl FileEventLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        file.try_lock_exclusive().map_err(|_| HistoryError::Locked)?;

        let (records, valid_len) = Self::scan(&mut file)?;
        let file_len = file.metadata()?.len();
        if valid_len < file_len {
            warn!(
                path = %path.display(),
                valid_len,
                file_len,
                "truncating torn event log tail"
            );
            file.set_len(valid_len)?;
        }

        let next_index = records.iter().map(|r| r.sequence_index + 1).max().unwrap_or(0);

        let mut index: HashMap<EntityId, Vec<EventRecord>> = HashMap::new();
        for record in records {
            index.entry(record.entity_id.clone()).or_default().push(record);
        }

        debug!(path = %path.display(), next_index, entities = index.len(), "opened event log");

        Ok(Self {
            path,
            file: Mutex::new(LogFile {
                file,
                len: valid_len,
            }),
            index: RwLock::new(index),
            next_index: Mutex::new(next_index),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of events across all entities.
    pub fn len(&self) -> usize {
        self.index.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn encode(record: &EventRecord) -> Result<Vec<u8>> {
        let entity = record.entity_id.as_str().as_bytes();
        let content = record.content_identifier.as_str().as_bytes();
        if entity.len() > u16::MAX as usize || content.len() > u16::MAX as usize {
            return Err(HistoryError::InvalidArgument("identifier too long".into()));
        }

        let mut body = Vec::with_capacity(4 + entity.len() + content.len() + 16);
        body.extend_from_slice(&(entity.len() as u16).to_le_bytes());
        body.extend_from_slice(entity);
        body.extend_from_slice(&(content.len() as u16).to_le_bytes());
        body.extend_from_slice(content);
        body.extend_from_slice(&record.sequence_index.to_le_bytes());
        body.extend_from_slice(&record.timestamp.to_le_bytes());

        let mut buf = Vec::with_capacity(EVENT_MAGIC.len() + 1 + 4 + body.len() + 4);
        buf.extend_from_slice(EVENT_MAGIC);
        buf.push(EVENT_VERSION);
        buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
        buf.extend_from_slice(&body);
        buf.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        Ok(buf)
    }

    /// Read every intact record; returns them with the length of the valid prefix.
    fn scan(file: &mut File) -> Result<(Vec<EventRecord>, u64)> {
        let mut bytes = Vec::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut bytes)?;

        let mut records = Vec::new();
        let mut offset = 0usize;

        while offset < bytes.len() {
            match Self::read_record(&bytes[offset..]) {
                Ok((record, size)) => {
                    records.push(record);
                    offset += size;
                }
                Err(e) => {
                    if let Some(next) = Self::next_intact_record(&bytes, offset + 1) {
                        return Err(HistoryError::Corruption(format!(
                            "damaged event record at byte {} precedes an intact one at byte {}: {}",
                            offset, next, e
                        )));
                    }
                    debug!(offset, error = %e, "event log ends in a torn record");
                    break;
                }
            }
        }

        Ok((records, offset as u64))
    }

    /// Offset of the first record at or after `from` that decodes cleanly.
    fn next_intact_record(bytes: &[u8], from: usize) -> Option<usize> {
        (from..bytes.len())
            .filter(|&at| bytes[at..].starts_with(EVENT_MAGIC))
            .find(|&at| Self::read_record(&bytes[at..]).is_ok())
    }

    /// Decode the record at the start of `bytes`; returns it with its size.
    fn read_record(bytes: &[u8]) -> Result<(EventRecord, usize)> {
        let mut cursor = bytes;

        let magic: [u8; 4] = take_array(&mut cursor)?;
        if &magic != EVENT_MAGIC {
            return Err(HistoryError::InvalidFormat("Invalid event magic".into()));
        }

        let [version] = take_array::<1>(&mut cursor)?;
        if version != EVENT_VERSION {
            return Err(HistoryError::InvalidFormat(format!(
                "Unsupported event version: {}",
                version
            )));
        }

        let body_len = u32::from_le_bytes(take_array(&mut cursor)?) as usize;
        let body = take_slice(&mut cursor, body_len)?;

        let stored = u32::from_le_bytes(take_array(&mut cursor)?);
        let computed = crc32fast::hash(body);
        if stored != computed {
            return Err(HistoryError::ChecksumMismatch {
                expected: stored,
                got: computed,
            });
        }

        let record = Self::decode_body(body)?;
        Ok((record, bytes.len() - cursor.len()))
    }

    fn decode_body(body: &[u8]) -> Result<EventRecord> {
        let mut cursor = body;
        let entity_id = EntityId(take_string(&mut cursor)?);
        let content_identifier = ContentId(take_string(&mut cursor)?);
        let sequence_index = u64::from_le_bytes(take_array(&mut cursor)?);
        let timestamp = i64::from_le_bytes(take_array(&mut cursor)?);

        if !cursor.is_empty() {
            return Err(HistoryError::Corruption("trailing bytes in event record".into()));
        }

        Ok(EventRecord {
            entity_id,
            content_identifier,
            sequence_index,
            timestamp,
        })
    }
}

/// The open log file and the length of its intact prefix.
struct LogFile {
    file: File,
    len: u64,
}

impl LogFile {
    /// Write one encoded record directly after the intact prefix.
    ///
    /// On failure the file is cut back to the prefix, so a partial record is
    /// never followed by a later one.
    fn append(&mut self, buf: &[u8]) -> io::Result<()> {
        match self.write_after_prefix(buf) {
            Ok(()) => {
                self.len += buf.len() as u64;
                Ok(())
            }
            Err(e) => {
                if let Err(cut) = self.file.set_len(self.len) {
                    warn!(len = self.len, error = %cut, "could not cut back partial event record");
                }
                Err(e)
            }
        }
    }

    fn write_after_prefix(&mut self, buf: &[u8]) -> io::Result<()> {
        // Leftovers of an earlier failed append that could not be cut back
        if self.file.metadata()?.len() != self.len {
            self.file.set_len(self.len)?;
        }
        self.file.seek(SeekFrom::Start(self.len))?;
        self.file.write_all(buf)?;
        self.file.sync_data()
    }
}

fn take_slice<'a>(cursor: &mut &'a [u8], len: usize) -> Result<&'a [u8]> {
    if cursor.len() < len {
        return Err(HistoryError::Corruption("truncated event record".into()));
    }
    let (head, rest) = cursor.split_at(len);
    *cursor = rest;
    Ok(head)
}

fn take_array<const N: usize>(cursor: &mut &[u8]) -> Result<[u8; N]> {
    let mut out = [0u8; N];
    out.copy_from_slice(take_slice(cursor, N)?);
    Ok(out)
}

fn take_string(cursor: &mut &[u8]) -> Result<String> {
    let len = u16::from_le_bytes(take_array(cursor)?) as usize;
    let bytes = take_slice(cursor, len)?;
    String::from_utf8(bytes.to_vec()).map_err(|e| HistoryError::Corruption(e.to_string()))
}

#[async_trait]
impl EventLog for FileEventLog {
    async fn append(&self, entity_id: &EntityId, content_id: &ContentId) -> Result<EventRecord> {
        let mut next_index = self.next_index.lock();

        let record = EventRecord {
            entity_id: entity_id.clone(),
            content_identifier: content_id.clone(),
            sequence_index: *next_index,
            timestamp: Utc::now().timestamp_millis(),
        };
        let buf = Self::encode(&record)?;

        let written = self.file.lock().append(&buf);
        if let Err(e) = written {
            return Err(HistoryError::AppendRejected {
                entity_id: entity_id.clone(),
                content_id: content_id.clone(),
                reason: e.to_string(),
            });
        }

        *next_index += 1;
        self.index
            .write()
            .entry(entity_id.clone())
            .or_default()
            .push(record.clone());

        Ok(record)
    }

    async fn query_page(
        &self,
        entity_id: &EntityId,
        page: u32,
        page_size: u32,
    ) -> Result<EventPage> {
        let index = self.index.read();
        let events = index.get(entity_id).map(Vec::as_slice).unwrap_or(&[]);
        paginate(events, page, page_size)
    }
}
