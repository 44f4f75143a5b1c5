//! Per-unit share bookkeeping.
//!
//! The ledger owns, for every fractionalized unit, its total share count and
//! the unordered list of `(holder, balance)` records. Every mutator checks
//! its preconditions first and only then touches state, so a returned error
//! always means nothing changed.

use crate::error::FractionError;
use crate::id::UnitsObjectId;
use crate::objects::{FractionalUnit, HolderRecord, UnitId};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct ShareLedger {
    units: HashMap<UnitId, FractionalUnit>,
    max_shares: u64,
    max_holders: usize,
}

impl ShareLedger {
    pub fn new(max_shares: u64, max_holders: usize) -> Self {
        Self {
            units: HashMap::new(),
            max_shares,
            max_holders,
        }
    }

    pub fn max_holders(&self) -> usize {
        self.max_holders
    }

    pub fn max_shares(&self) -> u64 {
        self.max_shares
    }

    pub fn is_fractionalized(&self, unit_id: UnitId) -> bool {
        self.units.contains_key(&unit_id)
    }

    /// Total shares of a unit; 0 when it is not fractionalized
    pub fn total_shares(&self, unit_id: UnitId) -> u64 {
        self.units
            .get(&unit_id)
            .map(|unit| unit.total_shares)
            .unwrap_or(0)
    }

    pub fn unit(&self, unit_id: UnitId) -> Option<&FractionalUnit> {
        self.units.get(&unit_id)
    }

    /// All fractionalized units, in no particular order
    pub fn units(&self) -> impl Iterator<Item = (&UnitId, &FractionalUnit)> {
        self.units.iter()
    }

    fn active(&self, unit_id: UnitId) -> Result<&FractionalUnit, FractionError> {
        self.units
            .get(&unit_id)
            .ok_or(FractionError::NotFractionalized(unit_id))
    }

    /// Holder records of a unit. Order is unspecified and changes whenever
    /// a holder is removed.
    pub fn holders(&self, unit_id: UnitId) -> Result<&[HolderRecord], FractionError> {
        Ok(&self.active(unit_id)?.holders)
    }

    /// Position of `holder` in the unit's holder list, if present
    pub fn find_holder(
        &self,
        unit_id: UnitId,
        holder: &UnitsObjectId,
    ) -> Result<Option<usize>, FractionError> {
        Ok(self
            .active(unit_id)?
            .holders
            .iter()
            .position(|record| record.owner == *holder))
    }

    /// Balance of `holder` in a unit; 0 for non-holders and inactive units
    pub fn balance_of(&self, unit_id: UnitId, holder: &UnitsObjectId) -> u64 {
        self.units
            .get(&unit_id)
            .and_then(|unit| unit.holders.iter().find(|record| record.owner == *holder))
            .map(|record| record.shares)
            .unwrap_or(0)
    }

    /// Check the share count against the configured bounds
    pub fn validate_share_count(&self, shares: u64) -> Result<(), FractionError> {
        if shares == 0 || shares > self.max_shares {
            return Err(FractionError::InvalidShareCount {
                shares,
                max: self.max_shares,
            });
        }
        Ok(())
    }

    /// Fractionalize a unit, giving every share to `holder`
    pub fn allocate(
        &mut self,
        unit_id: UnitId,
        holder: UnitsObjectId,
        shares: u64,
    ) -> Result<(), FractionError> {
        if self.is_fractionalized(unit_id) {
            return Err(FractionError::AlreadyFractionalized(unit_id));
        }
        self.validate_share_count(shares)?;

        self.units.insert(
            unit_id,
            FractionalUnit {
                total_shares: shares,
                holders: vec![HolderRecord::new(holder, shares)],
            },
        );
        Ok(())
    }

    /// Fail with `TooManyHolders` if `to` would be a new holder of a unit
    /// whose holder list is full
    pub fn ensure_can_receive(
        &self,
        unit_id: UnitId,
        to: &UnitsObjectId,
    ) -> Result<(), FractionError> {
        let unit = self.active(unit_id)?;
        let is_new = !unit.holders.iter().any(|record| record.owner == *to);
        if is_new && unit.holders.len() >= self.max_holders {
            return Err(FractionError::TooManyHolders {
                unit_id,
                max: self.max_holders,
            });
        }
        Ok(())
    }

    /// Move `amount` shares from `from` to `to` within one unit.
    ///
    /// A sender left with zero shares is removed by swapping the last record
    /// into its slot. Moving shares to oneself is a no-op once validated.
    pub fn move_shares(
        &mut self,
        unit_id: UnitId,
        from: &UnitsObjectId,
        to: &UnitsObjectId,
        amount: u64,
    ) -> Result<(), FractionError> {
        let from_index = self
            .find_holder(unit_id, from)?
            .ok_or(FractionError::SenderHasNoShares {
                unit_id,
                holder: *from,
            })?;
        let held = self.active(unit_id)?.holders[from_index].shares;
        if held < amount {
            return Err(FractionError::InsufficientShares {
                requested: amount,
                held,
            });
        }
        self.ensure_can_receive(unit_id, to)?;

        if from == to || amount == 0 {
            return Ok(());
        }

        let max_holders = self.max_holders;
        let unit = self
            .units
            .get_mut(&unit_id)
            .ok_or(FractionError::NotFractionalized(unit_id))?;

        let before = unit.allocated_shares();

        match unit.holders.iter_mut().find(|record| record.owner == *to) {
            Some(record) => record.shares += amount,
            None => {
                debug_assert!(unit.holders.len() < max_holders);
                unit.holders.push(HolderRecord::new(*to, amount));
            }
        }

        // `from_index` is still valid: pushes only append
        unit.holders[from_index].shares -= amount;
        if unit.holders[from_index].shares == 0 {
            unit.holders.swap_remove(from_index);
        }

        debug_assert_eq!(before, unit.allocated_shares());

        Ok(())
    }

    /// Retire a unit's fractional state, returning what was removed
    pub fn reset(&mut self, unit_id: UnitId) -> Result<FractionalUnit, FractionError> {
        self.units
            .remove(&unit_id)
            .ok_or(FractionError::NotFractionalized(unit_id))
    }

    /// Replace every unit at once; used when restoring a snapshot
    pub(crate) fn replace_units(&mut self, units: HashMap<UnitId, FractionalUnit>) {
        self.units = units;
    }
}
