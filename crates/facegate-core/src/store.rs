use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tempfile::NamedTempFile;

use crate::codec;
use crate::error::{FaceGateError, FaceGateResult};
use crate::types::{IdentityProfile, IdentityRecord};

/// In-memory identity collection, keyed by `identity_key`.
///
/// Records keep their enrollment order; matching does not depend on it
/// except as the tie-break documented on [`MatchPolicy`](crate::MatchPolicy).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentityStore {
    records: Vec<IdentityRecord>,
}

impl IdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store, enforcing key uniqueness and a single dimensionality.
    pub fn from_records(records: Vec<IdentityRecord>) -> FaceGateResult<Self> {
        let mut store = Self::new();
        for record in records {
            store.insert(record)?;
        }
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[IdentityRecord] {
        &self.records
    }

    pub fn get(&self, identity_key: &str) -> Option<&IdentityRecord> {
        self.records.iter().find(|r| r.identity_key == identity_key)
    }

    pub fn contains(&self, identity_key: &str) -> bool {
        self.get(identity_key).is_some()
    }

    /// Embedding dimensionality shared by every record, `None` when empty.
    pub fn dimension(&self) -> Option<usize> {
        self.records.first().map(|r| r.embedding.dimension())
    }

    pub fn profiles(&self) -> Vec<IdentityProfile> {
        self.records.iter().map(IdentityRecord::profile).collect()
    }

    pub fn insert(&mut self, record: IdentityRecord) -> FaceGateResult<()> {
        if self.contains(&record.identity_key) {
            return Err(FaceGateError::DuplicateIdentity(record.identity_key));
        }

        let dim = record.embedding.dimension();
        if dim == 0 {
            return Err(FaceGateError::InvalidEmbedding("embedding is empty".into()));
        }
        if !record.embedding.is_finite() {
            return Err(FaceGateError::InvalidEmbedding(
                "embedding contains non-finite values".into(),
            ));
        }
        if let Some(expected) = self.dimension() {
            if expected != dim {
                return Err(FaceGateError::InvalidEmbedding(format!(
                    "expected {expected}-dim embedding, got {dim}"
                )));
            }
        }

        self.records.push(record);
        Ok(())
    }

    pub fn remove(&mut self, identity_key: &str) -> FaceGateResult<IdentityRecord> {
        self.take(identity_key)
            .map(|(_, record)| record)
            .ok_or_else(|| FaceGateError::NotFound(identity_key.to_string()))
    }

    pub(crate) fn take(&mut self, identity_key: &str) -> Option<(usize, IdentityRecord)> {
        let idx = self
            .records
            .iter()
            .position(|r| r.identity_key == identity_key)?;
        Some((idx, self.records.remove(idx)))
    }

    pub(crate) fn restore(&mut self, idx: usize, record: IdentityRecord) {
        let idx = idx.min(self.records.len());
        self.records.insert(idx, record);
    }
}

/// The durable file backing an [`IdentityStore`].
#[derive(Debug, Clone)]
pub struct StoreFile {
    path: PathBuf,
}

impl StoreFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the store, or an empty one when the file does not exist yet.
    pub fn load(&self) -> FaceGateResult<IdentityStore> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no identity store yet; starting empty");
                return Ok(IdentityStore::new());
            }
            Err(source) => {
                return Err(FaceGateError::StoreRead {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let snapshot = codec::decode(&bytes).map_err(|err| self.corrupt(err.to_string()))?;
        let store = IdentityStore::from_records(snapshot.records)
            .map_err(|err| self.corrupt(err.to_string()))?;

        tracing::debug!(
            path = %self.path.display(),
            identities = store.len(),
            saved_at = %snapshot.saved_at,
            "identity store loaded"
        );
        Ok(store)
    }

    /// Replace the file atomically: write a sibling temp file, fsync, rename.
    ///
    /// On any failure the previous file is left as it was.
    pub fn save(&self, store: &IdentityStore) -> FaceGateResult<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(|source| self.write_error(source))?;

        let bytes = codec::encode(store.records(), Utc::now())
            .map_err(|err| self.write_error(io::Error::new(io::ErrorKind::InvalidData, err)))?;

        let mut tmp = NamedTempFile::new_in(parent).map_err(|source| self.write_error(source))?;
        {
            let file = tmp.as_file_mut();
            let mut writer = BufWriter::new(&mut *file);
            writer
                .write_all(&bytes)
                .map_err(|source| self.write_error(source))?;
            writer.flush().map_err(|source| self.write_error(source))?;
        }
        tmp.as_file()
            .sync_all()
            .map_err(|source| self.write_error(source))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(fs::Permissions::from_mode(0o600))
                .map_err(|source| self.write_error(source))?;
        }

        tmp.persist(&self.path)
            .map_err(|err| self.write_error(err.error))?;

        tracing::debug!(
            path = %self.path.display(),
            identities = store.len(),
            bytes = bytes.len(),
            "identity store saved"
        );
        Ok(())
    }

    fn corrupt(&self, message: String) -> FaceGateError {
        FaceGateError::CorruptStore {
            path: self.path.clone(),
            message,
        }
    }

    fn write_error(&self, source: io::Error) -> FaceGateError {
        FaceGateError::StoreWrite {
            path: self.path.clone(),
            source,
        }
    }
}
