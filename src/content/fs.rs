//! Filesystem content store.
//!
//! Blobs are stored by their SHA-256 identifier, sharded into directories by
//! the first byte of the hash (like Git objects).

use super::{Gateway, Publisher};
use crate::error::{AttemptError, HistoryError, Result};
use crate::types::ContentId;
use async_trait::async_trait;
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for blob files.
const BLOB_MAGIC: &[u8; 4] = b"SNP\0";

/// Current blob format version.
const BLOB_VERSION: u8 = 1;

/// Directory-backed store acting as both gateway and publisher.
#[derive(Clone)]
pub struct FsBlobStore {
    path: PathBuf,
}

impl FsBlobStore {
    /// Open (creating if needed) a store rooted at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    /// Store a blob, returning its identifier.
    ///
    /// Storing an existing blob is a no-op.
    pub fn store(&self, content: &[u8]) -> Result<ContentId> {
        let id = ContentId::from_bytes(content);

        if self.exists(&id) {
            return Ok(id);
        }

        fs::create_dir_all(self.shard_path(&id))?;

        // Write to a temp file first so readers never see a partial blob
        let final_path = self.blob_path(&id);
        let tmp_path = final_path.with_extension("tmp");
        let mut file = File::create(&tmp_path)?;

        file.write_all(BLOB_MAGIC)?;
        file.write_all(&[BLOB_VERSION])?;
        file.write_all(&(content.len() as u64).to_le_bytes())?;
        file.write_all(content)?;
        file.write_all(&crc32fast::hash(content).to_le_bytes())?;
        file.sync_all()?;

        fs::rename(&tmp_path, &final_path)?;
        Ok(id)
    }

    /// Read a blob, verifying checksum and identifier.
    pub fn load(&self, id: &ContentId) -> Result<Option<Vec<u8>>> {
        let mut file = match File::open(self.blob_path(id)) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != BLOB_MAGIC {
            return Err(HistoryError::InvalidFormat("Invalid blob magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != BLOB_VERSION {
            return Err(HistoryError::InvalidFormat(format!(
                "Unsupported blob version: {}",
                version[0]
            )));
        }

        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let mut content = vec![0u8; u64::from_le_bytes(len_bytes) as usize];
        file.read_exact(&mut content)?;

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let stored = u32::from_le_bytes(checksum_bytes);
        let computed = crc32fast::hash(&content);
        if stored != computed {
            return Err(HistoryError::ChecksumMismatch {
                expected: stored,
                got: computed,
            });
        }

        if &ContentId::from_bytes(&content) != id {
            return Err(HistoryError::Corruption(format!("blob {} does not match its id", id)));
        }

        Ok(Some(content))
    }

    pub fn exists(&self, id: &ContentId) -> bool {
        self.blob_path(id).exists()
    }

    /// List all stored identifiers.
    pub fn list(&self) -> Result<Vec<ContentId>> {
        let mut ids = Vec::new();

        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            for blob_entry in fs::read_dir(entry.path())? {
                let name = blob_entry?.file_name().to_string_lossy().into_owned();
                if name.len() == 64 && name.chars().all(|c| c.is_ascii_hexdigit()) {
                    ids.push(ContentId(name));
                }
            }
        }

        Ok(ids)
    }

    fn shard_path(&self, id: &ContentId) -> PathBuf {
        let shard: String = id.as_str().chars().take(2).collect();
        self.path.join(shard)
    }

    fn blob_path(&self, id: &ContentId) -> PathBuf {
        self.shard_path(id).join(id.as_str())
    }
}

fn join_error(e: tokio::task::JoinError) -> AttemptError {
    AttemptError::Transport(format!("blocking task failed: {}", e))
}

#[async_trait]
impl Gateway for FsBlobStore {
    fn name(&self) -> &str {
        "local-fs"
    }

    async fn fetch(&self, content_id: &ContentId) -> std::result::Result<Vec<u8>, AttemptError> {
        // Identifiers from remote logs are untrusted path components
        if !content_id.as_str().chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(AttemptError::Status(400));
        }

        let store = self.clone();
        let id = content_id.clone();
        match tokio::task::spawn_blocking(move || store.load(&id))
            .await
            .map_err(join_error)?
        {
            Ok(Some(content)) => Ok(content),
            Ok(None) => Err(AttemptError::Status(404)),
            Err(e) => Err(AttemptError::Malformed(e.to_string())),
        }
    }
}

#[async_trait]
impl Publisher for FsBlobStore {
    fn name(&self) -> &str {
        "local-fs"
    }

    async fn publish(&self, blob: &[u8]) -> std::result::Result<ContentId, AttemptError> {
        let store = self.clone();
        let blob = blob.to_vec();
        tokio::task::spawn_blocking(move || store.store(&blob))
            .await
            .map_err(join_error)?
            .map_err(|e| AttemptError::Rejected(e.to_string()))
    }
}
