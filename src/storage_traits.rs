use crate::error::StorageError;
use crate::snapshot::LedgerSnapshot;

/// Durable home for ledger snapshots.
///
/// A store holds at most one snapshot; saving replaces whatever was there.
/// Loading returns the snapshot exactly as saved. Commitment and invariant
/// checks are left to [`crate::FractionalizationController::restore`].
pub trait SnapshotStore {
    /// Persist `snapshot`, replacing the previous one
    ///
    /// # Parameters
    /// * `snapshot` - The snapshot to persist
    ///
    /// # Returns
    /// Ok(()) once the snapshot is durable
    fn save(&self, snapshot: &LedgerSnapshot) -> Result<(), StorageError>;

    /// Load the most recently saved snapshot
    ///
    /// # Returns
    /// Some(snapshot) if one was saved, None for an empty store
    fn load(&self) -> Result<Option<LedgerSnapshot>, StorageError>;
}
