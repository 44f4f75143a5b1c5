use crate::{
    commitment::Commitment,
    error::StorageError,
    id::UnitsObjectId,
    objects::{Approval, Timestamp, UnitId},
    snapshot::{ApprovalSnapshot, LedgerSnapshot, UnitSnapshot},
    storage_traits::SnapshotStore,
};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use serde::{Deserialize, Serialize};
use std::{
    fmt::Debug,
    path::{Path, PathBuf},
    sync::Arc,
};

// Column family names used to organize different parts of a snapshot
const CF_META: &str = "meta";
const CF_UNITS: &str = "units";
const CF_APPROVALS: &str = "approvals";

const HEADER_KEY: &[u8] = b"header";

#[derive(Serialize, Deserialize)]
struct SnapshotHeader {
    version: u32,
    taken_at: Timestamp,
    paused: bool,
    commitment: Commitment,
}

/// RocksDB snapshot store.
///
/// Units are keyed by big-endian unit id and approvals by unit id followed
/// by the holder, so iteration yields both in snapshot order. A save is one
/// atomic write batch.
pub struct RocksDbSnapshotStore {
    db: Arc<DB>,
    db_path: PathBuf,
}

fn approval_key(unit_id: UnitId, holder: &UnitsObjectId) -> Vec<u8> {
    let mut key = Vec::with_capacity(40);
    key.extend_from_slice(&unit_id.0.to_be_bytes());
    key.extend_from_slice(holder.as_ref());
    key
}

impl RocksDbSnapshotStore {
    /// Opens (or creates) the database at the specified path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db_path = path.as_ref().to_path_buf();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = [CF_META, CF_UNITS, CF_APPROVALS]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));
        let db = DB::open_cf_descriptors(&opts, &db_path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            db_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::Database(format!("missing column family {}", name)))
    }

    /// Queue deletes for every key currently in `cf`
    fn clear_cf(&self, batch: &mut WriteBatch, cf: &ColumnFamily) -> Result<(), StorageError> {
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            batch.delete_cf(cf, key);
        }
        Ok(())
    }
}

impl SnapshotStore for RocksDbSnapshotStore {
    fn save(&self, snapshot: &LedgerSnapshot) -> Result<(), StorageError> {
        let meta = self.cf(CF_META)?;
        let units = self.cf(CF_UNITS)?;
        let approvals = self.cf(CF_APPROVALS)?;

        let mut batch = WriteBatch::default();
        self.clear_cf(&mut batch, units)?;
        self.clear_cf(&mut batch, approvals)?;

        let header = SnapshotHeader {
            version: snapshot.version,
            taken_at: snapshot.taken_at,
            paused: snapshot.paused,
            commitment: snapshot.commitment,
        };
        batch.put_cf(meta, HEADER_KEY, bincode::serialize(&header)?);

        for unit in &snapshot.units {
            batch.put_cf(units, unit.unit_id.0.to_be_bytes(), bincode::serialize(unit)?);
        }
        for entry in &snapshot.approvals {
            batch.put_cf(
                approvals,
                approval_key(entry.unit_id, &entry.holder),
                bincode::serialize(&entry.approval)?,
            );
        }

        self.db.write(batch)?;
        Ok(())
    }

    fn load(&self) -> Result<Option<LedgerSnapshot>, StorageError> {
        let Some(header_bytes) = self.db.get_cf(self.cf(CF_META)?, HEADER_KEY)? else {
            return Ok(None);
        };
        let header: SnapshotHeader = bincode::deserialize(&header_bytes)?;

        let mut units = Vec::new();
        for item in self.db.iterator_cf(self.cf(CF_UNITS)?, IteratorMode::Start) {
            let (_, value) = item?;
            let unit: UnitSnapshot = bincode::deserialize(&value)?;
            units.push(unit);
        }

        let mut approvals = Vec::new();
        for item in self.db.iterator_cf(self.cf(CF_APPROVALS)?, IteratorMode::Start) {
            let (key, value) = item?;
            if key.len() != 40 {
                return Err(StorageError::Integrity(format!(
                    "approval key is {} bytes, not 40",
                    key.len()
                )));
            }
            let mut unit_bytes = [0u8; 8];
            unit_bytes.copy_from_slice(&key[..8]);
            let holder = UnitsObjectId::from_slice(&key[8..])
                .ok_or_else(|| StorageError::Integrity("bad holder in approval key".to_string()))?;
            let approval: Approval = bincode::deserialize(&value)?;
            approvals.push(ApprovalSnapshot {
                unit_id: UnitId(u64::from_be_bytes(unit_bytes)),
                holder,
                approval,
            });
        }

        Ok(Some(LedgerSnapshot {
            version: header.version,
            taken_at: header.taken_at,
            paused: header.paused,
            units,
            approvals,
            commitment: header.commitment,
        }))
    }
}

impl Debug for RocksDbSnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksDbSnapshotStore")
            .field("db_path", &self.db_path)
            .finish()
    }
}
