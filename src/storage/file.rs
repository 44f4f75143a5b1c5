use crate::error::StorageError;
use crate::snapshot::LedgerSnapshot;
use crate::storage_traits::SnapshotStore;
use anyhow::Context;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Snapshot store backed by a single bincode file.
///
/// Saves go to a sibling temporary file that is renamed over the target, so
/// a reader never sees a half-written snapshot.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn save(&self, snapshot: &LedgerSnapshot) -> Result<(), StorageError> {
        let bytes = snapshot.to_bytes()?;
        let temp = self.temp_path();

        let mut file = fs::File::create(&temp)
            .with_context(|| format!("failed to create {}", temp.display()))?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp, &self.path)
            .with_context(|| format!("failed to move snapshot to {}", self.path.display()))?;
        Ok(())
    }

    fn load(&self) -> Result<Option<LedgerSnapshot>, StorageError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(LedgerSnapshot::from_bytes(&bytes)?))
    }
}
