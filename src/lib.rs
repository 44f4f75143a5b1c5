//! Fractional ownership ledger for UNITS.
//!
//! An indivisible unit is issued into a custody account and represented by
//! a fixed number of shares spread across holders. Shares only move through
//! transfers an ADMIN executes against a holder's time-bounded approval, and
//! the unit is released again once one holder has gathered every share.

pub mod approvals;
pub mod clock;
pub mod commitment;
pub mod config;
pub mod controller;
pub mod custody;
pub mod error;
pub mod events;
pub mod id;
pub mod journal;
pub mod objects;
pub mod roles;
pub mod shares;
pub mod snapshot;
pub mod storage;
pub mod storage_traits;
pub mod transfer;

// Re-export the main types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use commitment::Commitment;
pub use config::FractionConfig;
pub use controller::FractionalizationController;
pub use custody::{ForeignAssetLedger, InMemoryForeignLedger, InMemoryUnitLedger, UnitLedger};
pub use error::{CustodyError, FractionError, StorageError};
pub use events::{EventSink, FanoutEventSink, FractionEvent, LogEventSink, MemoryEventSink};
pub use id::UnitsObjectId;
pub use journal::{FileEventJournal, JournalEntry};
pub use objects::{
    Approval, AssetKind, ForeignAsset, FractionalUnit, HolderRecord, MintRequest, ShareTransfer,
    Timestamp, UnitId,
};
pub use roles::{Capability, RoleProvider, RoleRegistry};
pub use snapshot::LedgerSnapshot;
pub use storage::FileSnapshotStore;
pub use storage_traits::SnapshotStore;

// Re-export the storage implementations
#[cfg(feature = "rocksdb")]
pub use storage::RocksDbSnapshotStore;
#[cfg(feature = "sqlite")]
pub use storage::SqliteSnapshotStore;
