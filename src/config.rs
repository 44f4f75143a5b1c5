use crate::error::{FractionError, StorageError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Upper bound on the shares a single unit may be split into
pub const DEFAULT_MAX_SHARES: u64 = 1_000_000;

/// Upper bound on distinct holders per unit; bounds every holder-list scan
pub const DEFAULT_MAX_FRACTION_OWNERS: usize = 50;

/// Upper bound on entries in one batch mint
pub const DEFAULT_MAX_BATCH_SIZE: usize = 50;

/// Lifetime of a holder approval: 48 hours
pub const DEFAULT_APPROVAL_WINDOW_SECS: u64 = 48 * 60 * 60;

/// Limits enforced by the fractional ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FractionConfig {
    pub max_shares: u64,
    pub max_fraction_owners: usize,
    pub max_batch_size: usize,
    pub approval_window_secs: u64,
}

impl Default for FractionConfig {
    fn default() -> Self {
        Self {
            max_shares: DEFAULT_MAX_SHARES,
            max_fraction_owners: DEFAULT_MAX_FRACTION_OWNERS,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            approval_window_secs: DEFAULT_APPROVAL_WINDOW_SECS,
        }
    }
}

impl FractionConfig {
    /// Parse a JSON document; absent fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self, StorageError> {
        let config: FractionConfig = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Reject limits that would make every operation fail
    pub fn validate(&self) -> Result<(), FractionError> {
        if self.max_shares == 0 {
            return Err(FractionError::InvalidConfig(
                "max_shares must be greater than zero".to_string(),
            ));
        }
        if self.max_fraction_owners == 0 {
            return Err(FractionError::InvalidConfig(
                "max_fraction_owners must be greater than zero".to_string(),
            ));
        }
        if self.max_batch_size == 0 {
            return Err(FractionError::InvalidConfig(
                "max_batch_size must be greater than zero".to_string(),
            ));
        }
        if self.approval_window_secs == 0 {
            return Err(FractionError::InvalidConfig(
                "approval_window_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
