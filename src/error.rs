use crate::id::UnitsObjectId;
use crate::objects::UnitId;
use crate::roles::Capability;
use std::io;
use thiserror::Error;

/// Every way a fractional ledger operation can be rejected.
///
/// All of these are caller-input or precondition violations. None is
/// retried internally and none leaves partial state behind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FractionError {
    /// Caller lacks the capability the operation requires
    #[error("{caller} lacks the {capability} capability")]
    Unauthorized {
        caller: UnitsObjectId,
        capability: Capability,
    },

    #[error("{0} is not fractionalized")]
    NotFractionalized(UnitId),

    #[error("{0} is already fractionalized")]
    AlreadyFractionalized(UnitId),

    /// The underlying unit already exists in the custody ledger
    #[error("{0} has already been issued")]
    UnitAlreadyIssued(UnitId),

    #[error("ledger is paused")]
    Paused,

    #[error("ledger is not paused")]
    NotPaused,

    #[error("invalid share count {shares} (allowed 1..={max})")]
    InvalidShareCount { shares: u64, max: u64 },

    #[error("invalid amount {0}")]
    InvalidAmount(u64),

    #[error("invalid recipient {0}")]
    InvalidRecipient(UnitsObjectId),

    #[error("{unit_id} already has the maximum of {max} holders")]
    TooManyHolders { unit_id: UnitId, max: usize },

    #[error("invalid batch size {size} (allowed 1..={max})")]
    InvalidBatchSize { size: usize, max: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no approval to revoke for {holder} on {unit_id}")]
    NoApprovalToRevoke {
        unit_id: UnitId,
        holder: UnitsObjectId,
    },

    #[error("insufficient approval: requested {requested}, approved {approved}")]
    InsufficientApproval { requested: u64, approved: u64 },

    #[error("approval expired at {expiry} (now {now})")]
    ApprovalExpired { expiry: u64, now: u64 },

    #[error("{holder} holds no shares of {unit_id}")]
    SenderHasNoShares {
        unit_id: UnitId,
        holder: UnitsObjectId,
    },

    #[error("insufficient shares: requested {requested}, held {held}")]
    InsufficientShares { requested: u64, held: u64 },

    #[error("redemption requires all {total} shares, holder has {held}")]
    MustOwnAllShares { held: u64, total: u64 },

    /// Direct transfers of the underlying unit are never executed
    #[error("direct transfer of {0} is disabled")]
    DirectTransferDisabled(UnitId),

    #[error("foreign asset transfer failed: {0}")]
    ForeignTransferFailed(String),

    #[error("custody ledger error: {0}")]
    Custody(#[from] CustodyError),

    #[error("snapshot rejected: {0}")]
    SnapshotRejected(String),
}

/// Errors raised by the underlying unit ledger
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CustodyError {
    #[error("{0} already exists")]
    AlreadyIssued(UnitId),

    #[error("{unit_id} is not held by {account}")]
    NotHeld {
        unit_id: UnitId,
        account: UnitsObjectId,
    },

    #[error("custody ledger unavailable: {0}")]
    Unavailable(String),
}

/// Errors from persisting snapshots and journals
#[derive(Error, Debug)]
pub enum StorageError {
    /// IO errors that occur when reading/writing files
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Errors that occur with the underlying storage backend
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Stored data failed its commitment or invariant checks
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    /// Errors that occur during journal operations
    #[error("Journal error: {0}")]
    Journal(String),

    /// Anyhow error wrapper for error context
    #[error(transparent)]
    Context(#[from] anyhow::Error),
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

#[cfg(feature = "rocksdb")]
impl From<rocksdb::Error> for StorageError {
    fn from(err: rocksdb::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}
