use crate::approvals::ApprovalRegistry;
use crate::commitment::{state_commitment, Commitment};
use crate::config::FractionConfig;
use crate::error::{FractionError, StorageError};
use crate::id::UnitsObjectId;
use crate::objects::{Approval, FractionalUnit, HolderRecord, Timestamp, UnitId};
use crate::shares::ShareLedger;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Layout version written into every snapshot
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSnapshot {
    pub unit_id: UnitId,
    pub total_shares: u64,
    pub holders: Vec<HolderRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalSnapshot {
    pub unit_id: UnitId,
    pub holder: UnitsObjectId,
    pub approval: Approval,
}

/// Complete copy of the fractional ledger's state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub version: u32,
    pub taken_at: Timestamp,
    pub paused: bool,
    /// Sorted by unit id
    pub units: Vec<UnitSnapshot>,
    /// Sorted by (unit id, holder)
    pub approvals: Vec<ApprovalSnapshot>,
    pub commitment: Commitment,
}

impl LedgerSnapshot {
    pub(crate) fn capture(
        shares: &ShareLedger,
        approvals: &ApprovalRegistry,
        paused: bool,
        taken_at: Timestamp,
    ) -> Self {
        let mut units: Vec<UnitSnapshot> = shares
            .units()
            .map(|(unit_id, unit)| UnitSnapshot {
                unit_id: *unit_id,
                total_shares: unit.total_shares,
                holders: unit.holders.clone(),
            })
            .collect();
        units.sort_by_key(|unit| unit.unit_id);

        let mut approvals: Vec<ApprovalSnapshot> = approvals
            .iter()
            .map(|((unit_id, holder), approval)| ApprovalSnapshot {
                unit_id: *unit_id,
                holder: *holder,
                approval: *approval,
            })
            .collect();
        approvals.sort_by_key(|entry| (entry.unit_id, entry.holder));

        let mut snapshot = Self {
            version: SNAPSHOT_VERSION,
            taken_at,
            paused,
            units,
            approvals,
            commitment: [0u8; 32],
        };
        snapshot.commitment = snapshot.compute_commitment();
        snapshot
    }

    /// Recompute the commitment from the snapshot's content
    pub fn compute_commitment(&self) -> Commitment {
        let units: Vec<(UnitId, FractionalUnit)> = self
            .units
            .iter()
            .map(|unit| {
                (
                    unit.unit_id,
                    FractionalUnit {
                        total_shares: unit.total_shares,
                        holders: unit.holders.clone(),
                    },
                )
            })
            .collect();

        state_commitment(
            units.iter().map(|(unit_id, unit)| (*unit_id, unit)),
            self.approvals
                .iter()
                .map(|entry| (entry.unit_id, entry.holder, entry.approval)),
            self.paused,
            self.taken_at,
        )
    }

    /// Check the commitment and every ledger invariant under `config`
    pub fn verify(&self, config: &FractionConfig) -> Result<(), FractionError> {
        let reject = |reason: String| Err(FractionError::SnapshotRejected(reason));

        if self.version != SNAPSHOT_VERSION {
            return reject(format!("unsupported snapshot version {}", self.version));
        }
        if self.compute_commitment() != self.commitment {
            return reject("commitment does not match content".to_string());
        }

        let mut seen_units = HashSet::new();
        for unit in &self.units {
            if !seen_units.insert(unit.unit_id) {
                return reject(format!("{} appears twice", unit.unit_id));
            }
            if unit.total_shares == 0 || unit.total_shares > config.max_shares {
                return reject(format!(
                    "{} has invalid total {}",
                    unit.unit_id, unit.total_shares
                ));
            }
            if unit.holders.is_empty() || unit.holders.len() > config.max_fraction_owners {
                return reject(format!(
                    "{} has {} holders",
                    unit.unit_id,
                    unit.holders.len()
                ));
            }

            let mut owners = HashSet::new();
            let mut sum: u128 = 0;
            for record in &unit.holders {
                if record.shares == 0 || record.owner.is_null() {
                    return reject(format!("{} has an empty holder record", unit.unit_id));
                }
                if !owners.insert(record.owner) {
                    return reject(format!("{} lists {} twice", unit.unit_id, record.owner));
                }
                sum += record.shares as u128;
            }
            if sum != unit.total_shares as u128 {
                return reject(format!(
                    "{} holder balances sum to {} instead of {}",
                    unit.unit_id, sum, unit.total_shares
                ));
            }
        }

        let mut seen_approvals = HashSet::new();
        for entry in &self.approvals {
            if !seen_units.contains(&entry.unit_id) {
                return reject(format!("approval for inactive {}", entry.unit_id));
            }
            if entry.approval.approved_shares == 0 {
                return reject(format!("zero approval stored for {}", entry.unit_id));
            }
            if !seen_approvals.insert((entry.unit_id, entry.holder)) {
                return reject(format!(
                    "duplicate approval for {} on {}",
                    entry.holder, entry.unit_id
                ));
            }
        }

        Ok(())
    }

    /// Split into the maps the ledger components are built from
    pub(crate) fn into_parts(
        self,
    ) -> (
        HashMap<UnitId, FractionalUnit>,
        HashMap<(UnitId, UnitsObjectId), Approval>,
    ) {
        let units = self
            .units
            .into_iter()
            .map(|unit| {
                (
                    unit.unit_id,
                    FractionalUnit {
                        total_shares: unit.total_shares,
                        holders: unit.holders,
                    },
                )
            })
            .collect();
        let approvals = self
            .approvals
            .into_iter()
            .map(|entry| ((entry.unit_id, entry.holder), entry.approval))
            .collect();
        (units, approvals)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StorageError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        Ok(bincode::deserialize(bytes)?)
    }
}
