//! Interfaces to the ledgers that hold actual assets.
//!
//! The fractional ledger never owns the underlying units itself: it asks a
//! [`UnitLedger`] to issue them into a custody account at mint time and to
//! release them to the redeeming holder. Assets that arrive in custody by
//! mistake live on a [`ForeignAssetLedger`] and can only be swept out.

use crate::error::CustodyError;
use crate::id::UnitsObjectId;
use crate::objects::{AssetKind, ForeignAsset, UnitId};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Multi-asset ledger carrying the indivisible underlying units.
///
/// Each unit has a supply of exactly one.
pub trait UnitLedger: Send + Sync {
    /// Current holder of the unit, if it has been issued
    fn owner_of(&self, unit_id: UnitId) -> Option<UnitsObjectId>;

    /// 1 if `account` holds the unit, else 0
    fn balance_of(&self, account: &UnitsObjectId, unit_id: UnitId) -> u64 {
        match self.owner_of(unit_id) {
            Some(owner) if owner == *account => 1,
            _ => 0,
        }
    }

    /// Credit a newly created unit to `account`
    fn issue(&self, account: &UnitsObjectId, unit_id: UnitId) -> Result<(), CustodyError>;

    /// Debit `from` and credit `to`
    fn release(
        &self,
        from: &UnitsObjectId,
        to: &UnitsObjectId,
        unit_id: UnitId,
    ) -> Result<(), CustodyError>;

    /// Destroy a unit held by `account`
    fn burn(&self, account: &UnitsObjectId, unit_id: UnitId) -> Result<(), CustodyError>;
}

#[derive(Debug, Default)]
pub struct InMemoryUnitLedger {
    owners: Mutex<HashMap<UnitId, UnitsObjectId>>,
}

impl InMemoryUnitLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn owners(&self) -> std::sync::MutexGuard<'_, HashMap<UnitId, UnitsObjectId>> {
        self.owners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl UnitLedger for InMemoryUnitLedger {
    fn owner_of(&self, unit_id: UnitId) -> Option<UnitsObjectId> {
        self.owners().get(&unit_id).copied()
    }

    fn issue(&self, account: &UnitsObjectId, unit_id: UnitId) -> Result<(), CustodyError> {
        let mut owners = self.owners();
        if owners.contains_key(&unit_id) {
            return Err(CustodyError::AlreadyIssued(unit_id));
        }
        owners.insert(unit_id, *account);
        Ok(())
    }

    fn release(
        &self,
        from: &UnitsObjectId,
        to: &UnitsObjectId,
        unit_id: UnitId,
    ) -> Result<(), CustodyError> {
        let mut owners = self.owners();
        match owners.get_mut(&unit_id) {
            Some(owner) if owner == from => {
                *owner = *to;
                Ok(())
            }
            _ => Err(CustodyError::NotHeld {
                unit_id,
                account: *from,
            }),
        }
    }

    fn burn(&self, account: &UnitsObjectId, unit_id: UnitId) -> Result<(), CustodyError> {
        let mut owners = self.owners();
        if owners.get(&unit_id) != Some(account) {
            return Err(CustodyError::NotHeld {
                unit_id,
                account: *account,
            });
        }
        owners.remove(&unit_id);
        Ok(())
    }
}

/// Ledger for assets this system does not manage
pub trait ForeignAssetLedger: Send + Sync {
    fn transfer(
        &self,
        asset: &ForeignAsset,
        from: &UnitsObjectId,
        to: &UnitsObjectId,
        amount: u64,
    ) -> Result<(), String>;
}

/// Balances of foreign assets per account
#[derive(Debug, Default)]
pub struct InMemoryForeignLedger {
    balances: Mutex<HashMap<(ForeignAsset, UnitsObjectId), u64>>,
}

impl InMemoryForeignLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deposit(&self, asset: ForeignAsset, account: UnitsObjectId, amount: u64) {
        let mut balances = self.balances.lock().unwrap_or_else(PoisonError::into_inner);
        let balance = balances.entry((asset, account)).or_insert(0);
        *balance = balance.saturating_add(amount);
    }

    pub fn balance_of(&self, asset: &ForeignAsset, account: &UnitsObjectId) -> u64 {
        let balances = self.balances.lock().unwrap_or_else(PoisonError::into_inner);
        balances.get(&(*asset, *account)).copied().unwrap_or(0)
    }
}

impl ForeignAssetLedger for InMemoryForeignLedger {
    fn transfer(
        &self,
        asset: &ForeignAsset,
        from: &UnitsObjectId,
        to: &UnitsObjectId,
        amount: u64,
    ) -> Result<(), String> {
        if let AssetKind::Token(_) = asset.kind {
            if amount != 1 {
                return Err(format!("token assets move one at a time, got {}", amount));
            }
        }

        let mut balances = self.balances.lock().unwrap_or_else(PoisonError::into_inner);
        let held = balances.get(&(*asset, *from)).copied().unwrap_or(0);
        if held < amount {
            return Err(format!("balance {} is below requested {}", held, amount));
        }

        if held == amount {
            balances.remove(&(*asset, *from));
        } else {
            balances.insert((*asset, *from), held - amount);
        }
        let balance = balances.entry((*asset, *to)).or_insert(0);
        *balance = balance.saturating_add(amount);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(byte: u8) -> UnitsObjectId {
        UnitsObjectId::new([byte; 32])
    }

    #[test]
    fn test_issue_release_burn() {
        let ledger = InMemoryUnitLedger::new();
        let custody = account(1);
        let holder = account(2);

        ledger.issue(&custody, UnitId(1)).unwrap();
        assert_eq!(ledger.owner_of(UnitId(1)), Some(custody));
        assert_eq!(ledger.balance_of(&custody, UnitId(1)), 1);
        assert_eq!(
            ledger.issue(&holder, UnitId(1)),
            Err(CustodyError::AlreadyIssued(UnitId(1)))
        );

        // Only the current holder can release
        assert!(ledger.release(&holder, &custody, UnitId(1)).is_err());
        ledger.release(&custody, &holder, UnitId(1)).unwrap();
        assert_eq!(ledger.balance_of(&holder, UnitId(1)), 1);
        assert_eq!(ledger.balance_of(&custody, UnitId(1)), 0);

        assert!(ledger.burn(&custody, UnitId(1)).is_err());
        ledger.burn(&holder, UnitId(1)).unwrap();
        assert_eq!(ledger.owner_of(UnitId(1)), None);
    }

    #[test]
    fn test_foreign_transfer() {
        let ledger = InMemoryForeignLedger::new();
        let asset = ForeignAsset {
            contract: account(7),
            kind: AssetKind::Fungible,
        };
        ledger.deposit(asset, account(1), 100);

        assert!(ledger.transfer(&asset, &account(1), &account(2), 101).is_err());
        ledger.transfer(&asset, &account(1), &account(2), 60).unwrap();
        assert_eq!(ledger.balance_of(&asset, &account(1)), 40);
        assert_eq!(ledger.balance_of(&asset, &account(2)), 60);
    }

    #[test]
    fn test_foreign_token_moves_singly() {
        let ledger = InMemoryForeignLedger::new();
        let asset = ForeignAsset {
            contract: account(7),
            kind: AssetKind::Token(3),
        };
        ledger.deposit(asset, account(1), 1);

        assert!(ledger.transfer(&asset, &account(1), &account(2), 2).is_err());
        ledger.transfer(&asset, &account(1), &account(2), 1).unwrap();
        assert_eq!(ledger.balance_of(&asset, &account(2)), 1);
    }
}
