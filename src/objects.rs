use crate::id::UnitsObjectId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Seconds since the UNIX epoch, as supplied by a [`crate::clock::Clock`]
pub type Timestamp = u64;

/// Identifier of an indivisible underlying unit (e.g. a property token)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId(pub u64);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit#{}", self.0)
    }
}

impl From<u64> for UnitId {
    fn from(id: u64) -> Self {
        UnitId(id)
    }
}

/// A holder's balance in one unit. An owner appears at most once per unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HolderRecord {
    pub owner: UnitsObjectId,
    pub shares: u64,
}

impl HolderRecord {
    pub fn new(owner: UnitsObjectId, shares: u64) -> Self {
        Self { owner, shares }
    }
}

/// Fractional state of a unit while it is fractionalized.
///
/// `holders` is unordered: removals swap the last record into the freed
/// slot, so positions change across mutations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FractionalUnit {
    pub total_shares: u64,
    pub holders: Vec<HolderRecord>,
}

impl FractionalUnit {
    /// Sum of all holder balances; equals `total_shares` for a consistent unit
    pub fn allocated_shares(&self) -> u128 {
        self.holders.iter().map(|h| h.shares as u128).sum()
    }
}

/// A holder's time-bounded authorization for the mediator to move shares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub approved_shares: u64,
    pub expiry: Timestamp,
}

impl Approval {
    /// An approval is still usable at exactly its expiry timestamp
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expiry < now
    }
}

/// One entry of a (batch) mint request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintRequest {
    pub unit_id: UnitId,
    pub to: UnitsObjectId,
    pub shares: u64,
}

impl MintRequest {
    pub fn new(unit_id: UnitId, to: UnitsObjectId, shares: u64) -> Self {
        Self {
            unit_id,
            to,
            shares,
        }
    }
}

/// A mediated share transfer between two holders of the same unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareTransfer {
    pub unit_id: UnitId,
    pub from: UnitsObjectId,
    pub to: UnitsObjectId,
    pub amount: u64,
}

impl ShareTransfer {
    pub fn new(
        unit_id: UnitId,
        from: UnitsObjectId,
        to: UnitsObjectId,
        amount: u64,
    ) -> Self {
        Self {
            unit_id,
            from,
            to,
            amount,
        }
    }
}

/// Kind of asset held by a foreign ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetKind {
    /// Interchangeable balance (amount is a quantity)
    Fungible,
    /// A single token id of a multi-asset contract
    Token(u64),
}

/// An asset that does not belong to this ledger but ended up in custody
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignAsset {
    /// Contract or ledger the asset lives in
    pub contract: UnitsObjectId,
    pub kind: AssetKind,
}
