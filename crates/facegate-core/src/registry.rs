use crate::error::{FaceGateError, FaceGateResult};
use crate::store::{IdentityStore, StoreFile};
use crate::types::IdentityRecord;

/// An [`IdentityStore`] bound to its durable file.
///
/// Every mutation is saved before it returns. If the save fails, the
/// in-memory change is undone so memory and disk stay in step.
#[derive(Debug)]
pub struct IdentityRegistry {
    store: IdentityStore,
    file: StoreFile,
}

impl IdentityRegistry {
    /// Load the registry from `file` (empty if the file does not exist).
    pub fn open(file: StoreFile) -> FaceGateResult<Self> {
        let store = file.load()?;
        tracing::info!(
            path = %file.path().display(),
            identities = store.len(),
            "identity registry opened"
        );
        Ok(Self { store, file })
    }

    /// Wrap an already-loaded store. Nothing is written until the first mutation.
    pub fn with_store(store: IdentityStore, file: StoreFile) -> Self {
        Self { store, file }
    }

    pub fn store(&self) -> &IdentityStore {
        &self.store
    }

    pub fn file(&self) -> &StoreFile {
        &self.file
    }

    pub fn insert(&mut self, record: IdentityRecord) -> FaceGateResult<()> {
        let key = record.identity_key.clone();
        self.store.insert(record)?;

        if let Err(err) = self.file.save(&self.store) {
            self.store.take(&key);
            tracing::error!(identity = %key, error = %err, "save failed; insert rolled back");
            return Err(err);
        }
        Ok(())
    }

    pub fn remove(&mut self, identity_key: &str) -> FaceGateResult<IdentityRecord> {
        let Some((idx, record)) = self.store.take(identity_key) else {
            return Err(FaceGateError::NotFound(identity_key.to_string()));
        };

        if let Err(err) = self.file.save(&self.store) {
            self.store.restore(idx, record);
            tracing::error!(identity = identity_key, error = %err, "save failed; removal rolled back");
            return Err(err);
        }
        Ok(record)
    }
}
