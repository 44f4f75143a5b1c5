use crate::error::FractionError;
use crate::id::UnitsObjectId;
use crate::objects::{Approval, Timestamp, UnitId};
use std::collections::HashMap;

/// Time-bounded permissions for the mediator to move a holder's shares.
///
/// One live approval per (unit, holder). Granting again replaces the old
/// approval outright; a record that drops to zero shares is deleted.
#[derive(Debug, Clone)]
pub struct ApprovalRegistry {
    approvals: HashMap<(UnitId, UnitsObjectId), Approval>,
    window_secs: u64,
}

impl ApprovalRegistry {
    pub fn new(window_secs: u64) -> Self {
        Self {
            approvals: HashMap::new(),
            window_secs,
        }
    }

    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    /// Stored approval, live or expired
    pub fn get(&self, unit_id: UnitId, holder: &UnitsObjectId) -> Option<&Approval> {
        self.approvals.get(&(unit_id, *holder))
    }

    /// Shares the mediator may currently move; 0 when absent or expired
    pub fn approved(&self, unit_id: UnitId, holder: &UnitsObjectId, now: Timestamp) -> u64 {
        self.get(unit_id, holder)
            .filter(|approval| !approval.is_expired(now))
            .map(|approval| approval.approved_shares)
            .unwrap_or(0)
    }

    /// All stored approvals, in no particular order
    pub fn iter(&self) -> impl Iterator<Item = (&(UnitId, UnitsObjectId), &Approval)> {
        self.approvals.iter()
    }

    /// Grant (or replace) an approval valid until `now + window`.
    ///
    /// The holder's balance is checked by the caller.
    pub fn grant(
        &mut self,
        unit_id: UnitId,
        holder: UnitsObjectId,
        shares: u64,
        now: Timestamp,
    ) -> Result<Approval, FractionError> {
        if shares == 0 {
            return Err(FractionError::InvalidAmount(shares));
        }
        let approval = Approval {
            approved_shares: shares,
            expiry: now.saturating_add(self.window_secs),
        };
        self.approvals.insert((unit_id, holder), approval);
        Ok(approval)
    }

    pub fn revoke(
        &mut self,
        unit_id: UnitId,
        holder: &UnitsObjectId,
    ) -> Result<Approval, FractionError> {
        self.approvals
            .remove(&(unit_id, *holder))
            .ok_or(FractionError::NoApprovalToRevoke {
                unit_id,
                holder: *holder,
            })
    }

    /// Validate that `amount` could be consumed at `now`, without consuming it
    pub fn check(
        &self,
        unit_id: UnitId,
        holder: &UnitsObjectId,
        amount: u64,
        now: Timestamp,
    ) -> Result<&Approval, FractionError> {
        let approval = self
            .get(unit_id, holder)
            .ok_or(FractionError::InsufficientApproval {
                requested: amount,
                approved: 0,
            })?;
        if approval.is_expired(now) {
            return Err(FractionError::ApprovalExpired {
                expiry: approval.expiry,
                now,
            });
        }
        if amount > approval.approved_shares {
            return Err(FractionError::InsufficientApproval {
                requested: amount,
                approved: approval.approved_shares,
            });
        }
        Ok(approval)
    }

    /// Use up `amount` of the approval and return what remains.
    ///
    /// The remainder keeps its original expiry; an exact match deletes it.
    pub fn consume(
        &mut self,
        unit_id: UnitId,
        holder: &UnitsObjectId,
        amount: u64,
        now: Timestamp,
    ) -> Result<u64, FractionError> {
        self.check(unit_id, holder, amount, now)?;

        let key = (unit_id, *holder);
        let remaining = match self.approvals.get_mut(&key) {
            Some(approval) => {
                approval.approved_shares -= amount;
                approval.approved_shares
            }
            None => 0,
        };
        if remaining == 0 {
            self.approvals.remove(&key);
        }
        Ok(remaining)
    }

    /// Drop every approval for a unit; returns how many were removed
    pub fn clear_unit(&mut self, unit_id: UnitId) -> usize {
        let before = self.approvals.len();
        self.approvals.retain(|(unit, _), _| *unit != unit_id);
        before - self.approvals.len()
    }

    pub(crate) fn replace_all(&mut self, approvals: HashMap<(UnitId, UnitsObjectId), Approval>) {
        self.approvals = approvals;
    }
}
