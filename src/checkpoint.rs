//! Checkpoint persistence.
//!
//! A checkpoint records which mentions a batch has consumed plus a snapshot
//! of the registry, so a restarted batch picks up where it stopped.
//!
//! # File format
//!
//! One JSON envelope:
//!
//! ```text
//! { "format_version": 1, "checksum": <crc32 of payload>, "payload": "<json>" }
//! ```
//!
//! The payload is carried as a string so the checksum covers its exact
//! bytes. Writes go to a uniquely named temp file that is flushed, fsynced
//! and renamed over the old checkpoint; a crash at any point leaves either
//! the old or the new file intact.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::entity::{Entity, EntityId};
use crate::error::CheckpointError;
use crate::mention::MentionId;
use crate::relationship::ClassificationRecord;

/// Current checkpoint format version.
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

/// Pipeline stage a checkpoint was taken in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Folding mentions into the registry
    #[default]
    Resolution,
    /// Typing and labelling entities
    Classification,
    /// Both stages finished
    Complete,
}

/// Persisted batch progress.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointState {
    /// Mentions already folded into the registry
    pub processed_ids: BTreeSet<MentionId>,
    /// When the checkpoint was taken
    pub last_updated: DateTime<Utc>,
    /// Stage in progress when the checkpoint was taken
    #[serde(default)]
    pub stage: Stage,
    /// Registry entities at checkpoint time
    #[serde(default)]
    pub entities: BTreeMap<EntityId, Entity>,
    /// Merged labels at checkpoint time
    #[serde(default)]
    pub classifications: BTreeMap<EntityId, Vec<ClassificationRecord>>,
}

impl CheckpointState {
    /// Returns true if a mention was already processed.
    #[must_use]
    pub fn is_processed(&self, id: &MentionId) -> bool {
        self.processed_ids.contains(id)
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    format_version: u32,
    checksum: u32,
    payload: String,
}

/// Reads and atomically writes one checkpoint file.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    /// Creates a store for `path`. Nothing is touched until the first save.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The checkpoint file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the checkpoint, or `None` if there is none yet.
    ///
    /// # Errors
    ///
    /// Any unreadable, unparseable, mis-versioned or checksum-failing file is
    /// reported as a [`CheckpointError`]; it is never treated as absent.
    pub fn load(&self) -> Result<Option<CheckpointState>, CheckpointError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.unreadable(e)),
        };

        let envelope: Envelope = serde_json::from_slice(&bytes).map_err(|e| self.unreadable(e))?;
        if envelope.format_version != CHECKPOINT_FORMAT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                path: self.path.clone(),
                version: envelope.format_version,
            });
        }

        let computed = crc32fast::hash(envelope.payload.as_bytes());
        if computed != envelope.checksum {
            return Err(CheckpointError::ChecksumMismatch {
                path: self.path.clone(),
                stored: envelope.checksum,
                computed,
            });
        }

        let state: CheckpointState =
            serde_json::from_str(&envelope.payload).map_err(|e| self.unreadable(e))?;
        info!(
            path = %self.path.display(),
            processed = state.processed_ids.len(),
            entities = state.entities.len(),
            stage = ?state.stage,
            "checkpoint loaded"
        );
        Ok(Some(state))
    }

    /// Writes the checkpoint atomically.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::WriteFailed`] if any step fails; the
    /// previous checkpoint is left in place.
    pub fn save(&self, state: &CheckpointState) -> Result<(), CheckpointError> {
        let payload = serde_json::to_string(state).map_err(|e| self.write_failed(e))?;
        let envelope = Envelope {
            format_version: CHECKPOINT_FORMAT_VERSION,
            checksum: crc32fast::hash(payload.as_bytes()),
            payload,
        };
        let bytes = serde_json::to_vec(&envelope).map_err(|e| self.write_failed(e))?;

        let mut writer = AtomicFileWriter::create(&self.path).map_err(|e| self.write_failed(e))?;
        writer.write_all(&bytes).map_err(|e| self.write_failed(e))?;
        writer.commit().map_err(|e| self.write_failed(e))?;

        debug!(
            path = %self.path.display(),
            processed = state.processed_ids.len(),
            bytes = bytes.len(),
            "checkpoint written"
        );
        Ok(())
    }

    /// Deletes the checkpoint for a fresh start.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::WriteFailed`] if the file exists and
    /// cannot be removed.
    pub fn clear(&self) -> Result<(), CheckpointError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "checkpoint cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.write_failed(e)),
        }
    }

    fn unreadable(&self, e: impl std::fmt::Display) -> CheckpointError {
        CheckpointError::Unreadable {
            path: self.path.clone(),
            message: e.to_string(),
        }
    }

    fn write_failed(&self, e: impl std::fmt::Display) -> CheckpointError {
        CheckpointError::WriteFailed {
            path: self.path.clone(),
            message: e.to_string(),
        }
    }
}

/// Write-to-temp-then-rename file writer.
///
/// Dropping the writer without committing removes the temp file.
struct AtomicFileWriter {
    temp_path: Option<PathBuf>,
    final_path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl AtomicFileWriter {
    fn create(final_path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = final_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut temp_name = final_path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        temp_name.push(format!(".tmp.{}", Uuid::new_v4()));
        let temp_path = final_path.with_file_name(temp_name);

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)?;

        Ok(Self {
            temp_path: Some(temp_path),
            final_path: final_path.to_path_buf(),
            writer: Some(BufWriter::new(file)),
        })
    }

    fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| std::io::Error::other("writer already consumed"))?;
        writer.write_all(bytes)
    }

    fn commit(mut self) -> std::io::Result<()> {
        let mut writer = self
            .writer
            .take()
            .ok_or_else(|| std::io::Error::other("writer already consumed"))?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);

        let temp_path = self
            .temp_path
            .take()
            .ok_or_else(|| std::io::Error::other("temp path already consumed"))?;
        if let Err(e) = fs::rename(&temp_path, &self.final_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }

        // Persist the rename itself.
        #[cfg(unix)]
        {
            if let Some(parent) = self.final_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                File::open(parent)?.sync_all()?;
            }
        }
        Ok(())
    }
}

impl Drop for AtomicFileWriter {
    fn drop(&mut self) {
        self.writer.take();
        if let Some(ref temp_path) = self.temp_path {
            if temp_path.exists() {
                let _ = fs::remove_file(temp_path);
            }
        }
    }
}
