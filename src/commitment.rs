//! Blake3 commitments over fractional state.
//!
//! A commitment fixes the exact content of a unit (or a whole snapshot)
//! independent of holder-list order, so observers can compare state across
//! hosts and a restored snapshot can be checked against what was saved.

use crate::id::UnitsObjectId;
use crate::objects::{Approval, FractionalUnit, HolderRecord, Timestamp, UnitId};

pub type Commitment = [u8; 32];

const UNIT_DOMAIN: &[u8] = b"UNITS_Fraction_Unit";
const SNAPSHOT_DOMAIN: &[u8] = b"UNITS_Fraction_Snapshot";

fn hash_holders(hasher: &mut blake3::Hasher, holders: &[HolderRecord]) {
    let mut sorted: Vec<&HolderRecord> = holders.iter().collect();
    sorted.sort_by_key(|record| record.owner);

    hasher.update(&(sorted.len() as u64).to_le_bytes());
    for record in sorted {
        hasher.update(record.owner.as_ref());
        hasher.update(&record.shares.to_le_bytes());
    }
}

/// Commitment to one unit's total and holder balances
pub fn unit_commitment(unit_id: UnitId, unit: &FractionalUnit) -> Commitment {
    let mut hasher = blake3::Hasher::new();
    hasher.update(UNIT_DOMAIN);
    hasher.update(&unit_id.0.to_le_bytes());
    hasher.update(&unit.total_shares.to_le_bytes());
    hash_holders(&mut hasher, &unit.holders);
    *hasher.finalize().as_bytes()
}

/// Commitment over a full ledger state.
///
/// `units` and `approvals` may come in any order.
pub fn state_commitment<'a>(
    units: impl IntoIterator<Item = (UnitId, &'a FractionalUnit)>,
    approvals: impl IntoIterator<Item = (UnitId, UnitsObjectId, Approval)>,
    paused: bool,
    taken_at: Timestamp,
) -> Commitment {
    let mut unit_leaves: Vec<(UnitId, Commitment)> = units
        .into_iter()
        .map(|(unit_id, unit)| (unit_id, unit_commitment(unit_id, unit)))
        .collect();
    unit_leaves.sort_by_key(|(unit_id, _)| *unit_id);

    let mut approval_leaves: Vec<(UnitId, UnitsObjectId, Approval)> =
        approvals.into_iter().collect();
    approval_leaves.sort_by_key(|(unit_id, holder, _)| (*unit_id, *holder));

    let mut hasher = blake3::Hasher::new();
    hasher.update(SNAPSHOT_DOMAIN);
    hasher.update(&[paused as u8]);
    hasher.update(&taken_at.to_le_bytes());

    hasher.update(&(unit_leaves.len() as u64).to_le_bytes());
    for (_, leaf) in &unit_leaves {
        hasher.update(leaf);
    }

    hasher.update(&(approval_leaves.len() as u64).to_le_bytes());
    for (unit_id, holder, approval) in &approval_leaves {
        hasher.update(&unit_id.0.to_le_bytes());
        hasher.update(holder.as_ref());
        hasher.update(&approval.approved_shares.to_le_bytes());
        hasher.update(&approval.expiry.to_le_bytes());
    }

    *hasher.finalize().as_bytes()
}
