//! Owner-mediated share transfers.
//!
//! Holders never move shares themselves. A holder grants an approval, and a
//! caller with the ADMIN capability executes the transfer against it. Every
//! precondition is checked before the approval is consumed or the ledger is
//! touched, so a rejected transfer leaves no trace.

use crate::approvals::ApprovalRegistry;
use crate::error::FractionError;
use crate::events::FractionEvent;
use crate::id::UnitsObjectId;
use crate::objects::{ShareTransfer, Timestamp};
use crate::roles::Capability;
use crate::shares::ShareLedger;
use log::debug;

/// Executes mediated transfers over a share ledger and approval registry
#[derive(Debug, Default, Clone, Copy)]
pub struct TransferAuthority;

impl TransferAuthority {
    pub fn new() -> Self {
        Self
    }

    /// Run every check a transfer needs without mutating anything
    pub fn validate(
        &self,
        shares: &ShareLedger,
        approvals: &ApprovalRegistry,
        transfer: &ShareTransfer,
        now: Timestamp,
        caller: &UnitsObjectId,
        caller_authorized: bool,
    ) -> Result<(), FractionError> {
        let ShareTransfer {
            unit_id,
            from,
            to,
            amount,
        } = *transfer;

        if !caller_authorized {
            return Err(FractionError::Unauthorized {
                caller: *caller,
                capability: Capability::Admin,
            });
        }

        if !shares.is_fractionalized(unit_id) {
            return Err(FractionError::NotFractionalized(unit_id));
        }

        if amount == 0 || amount > shares.total_shares(unit_id) {
            return Err(FractionError::InvalidAmount(amount));
        }

        if to.is_null() || to == from {
            return Err(FractionError::InvalidRecipient(to));
        }

        approvals.check(unit_id, &from, amount, now)?;

        let index = shares
            .find_holder(unit_id, &from)?
            .ok_or(FractionError::SenderHasNoShares {
                unit_id,
                holder: from,
            })?;
        let held = shares.holders(unit_id)?[index].shares;
        if held < amount {
            return Err(FractionError::InsufficientShares {
                requested: amount,
                held,
            });
        }

        shares.ensure_can_receive(unit_id, &to)
    }

    /// Validate, consume the sender's approval, then move the shares.
    ///
    /// Returns the event describing the completed transfer.
    pub fn transfer_as_owner(
        &self,
        shares: &mut ShareLedger,
        approvals: &mut ApprovalRegistry,
        transfer: &ShareTransfer,
        now: Timestamp,
        caller: &UnitsObjectId,
        caller_authorized: bool,
    ) -> Result<FractionEvent, FractionError> {
        if let Err(err) = self.validate(shares, approvals, transfer, now, caller, caller_authorized)
        {
            debug!("rejected transfer {:?}: {}", transfer, err);
            return Err(err);
        }

        // Both calls re-check what `validate` already established and
        // cannot fail here.
        let remaining_approval =
            approvals.consume(transfer.unit_id, &transfer.from, transfer.amount, now)?;
        shares.move_shares(transfer.unit_id, &transfer.from, &transfer.to, transfer.amount)?;

        Ok(FractionEvent::SharesTransferred {
            unit_id: transfer.unit_id,
            from: transfer.from,
            to: transfer.to,
            amount: transfer.amount,
            remaining_approval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_APPROVAL_WINDOW_SECS;
    use crate::objects::UnitId;

    const T0: Timestamp = 1_700_000_000;

    fn holder(byte: u8) -> UnitsObjectId {
        UnitsObjectId::new([byte; 32])
    }

    fn admin() -> UnitsObjectId {
        holder(0xAD)
    }

    struct Fixture {
        shares: ShareLedger,
        approvals: ApprovalRegistry,
        authority: TransferAuthority,
    }

    impl Fixture {
        /// Unit 5 fractionalized to holder(1) with 100 shares
        fn new(max_holders: usize) -> Self {
            let mut shares = ShareLedger::new(1_000_000, max_holders);
            shares.allocate(UnitId(5), holder(1), 100).unwrap();
            Self {
                shares,
                approvals: ApprovalRegistry::new(DEFAULT_APPROVAL_WINDOW_SECS),
                authority: TransferAuthority::new(),
            }
        }

        fn transfer(
            &mut self,
            transfer: ShareTransfer,
            now: Timestamp,
            authorized: bool,
        ) -> Result<FractionEvent, FractionError> {
            self.authority.transfer_as_owner(
                &mut self.shares,
                &mut self.approvals,
                &transfer,
                now,
                &admin(),
                authorized,
            )
        }
    }

    #[test]
    fn test_transfer_consumes_approval_and_moves_shares() {
        let mut fx = Fixture::new(50);
        fx.approvals.grant(UnitId(5), holder(1), 40, T0).unwrap();

        let event = fx
            .transfer(ShareTransfer::new(UnitId(5), holder(1), holder(2), 40), T0, true)
            .unwrap();

        assert_eq!(
            event,
            FractionEvent::SharesTransferred {
                unit_id: UnitId(5),
                from: holder(1),
                to: holder(2),
                amount: 40,
                remaining_approval: 0,
            }
        );
        assert_eq!(fx.shares.balance_of(UnitId(5), &holder(1)), 60);
        assert_eq!(fx.shares.balance_of(UnitId(5), &holder(2)), 40);
        assert_eq!(fx.approvals.approved(UnitId(5), &holder(1), T0), 0);
    }

    #[test]
    fn test_check_order() {
        let mut fx = Fixture::new(50);
        fx.approvals.grant(UnitId(5), holder(1), 40, T0).unwrap();

        assert_eq!(
            fx.transfer(ShareTransfer::new(UnitId(5), holder(1), holder(2), 10), T0, false),
            Err(FractionError::Unauthorized {
                caller: admin(),
                capability: Capability::Admin
            })
        );
        assert_eq!(
            fx.transfer(ShareTransfer::new(UnitId(6), holder(1), holder(2), 10), T0, true),
            Err(FractionError::NotFractionalized(UnitId(6)))
        );
        assert_eq!(
            fx.transfer(ShareTransfer::new(UnitId(5), holder(1), holder(2), 0), T0, true),
            Err(FractionError::InvalidAmount(0))
        );
        assert_eq!(
            fx.transfer(ShareTransfer::new(UnitId(5), holder(1), holder(2), 101), T0, true),
            Err(FractionError::InvalidAmount(101))
        );
        assert_eq!(
            fx.transfer(ShareTransfer::new(UnitId(5), holder(1), UnitsObjectId::null(), 10), T0, true),
            Err(FractionError::InvalidRecipient(UnitsObjectId::null()))
        );
        assert_eq!(
            fx.transfer(ShareTransfer::new(UnitId(5), holder(1), holder(1), 10), T0, true),
            Err(FractionError::InvalidRecipient(holder(1)))
        );
        assert_eq!(
            fx.transfer(ShareTransfer::new(UnitId(5), holder(1), holder(2), 50), T0, true),
            Err(FractionError::InsufficientApproval { requested: 50, approved: 40 })
        );

        // Nothing moved
        assert_eq!(fx.shares.balance_of(UnitId(5), &holder(1)), 100);
        assert_eq!(fx.approvals.approved(UnitId(5), &holder(1), T0), 40);
    }

    #[test]
    fn test_approval_checked_before_balance() {
        let mut fx = Fixture::new(50);

        // holder(3) has no shares and no approval: the approval fails first
        assert_eq!(
            fx.transfer(ShareTransfer::new(UnitId(5), holder(3), holder(2), 10), T0, true),
            Err(FractionError::InsufficientApproval { requested: 10, approved: 0 })
        );

        fx.approvals.grant(UnitId(5), holder(3), 10, T0).unwrap();
        assert_eq!(
            fx.transfer(ShareTransfer::new(UnitId(5), holder(3), holder(2), 10), T0, true),
            Err(FractionError::SenderHasNoShares {
                unit_id: UnitId(5),
                holder: holder(3)
            })
        );
        // Failed transfer did not consume the approval
        assert_eq!(fx.approvals.approved(UnitId(5), &holder(3), T0), 10);
    }

    #[test]
    fn test_insufficient_shares_after_approval() {
        let mut fx = Fixture::new(50);
        fx.approvals.grant(UnitId(5), holder(1), 100, T0).unwrap();
        fx.transfer(ShareTransfer::new(UnitId(5), holder(1), holder(2), 70), T0, true)
            .unwrap();

        // Re-approve more than the 30 shares the holder has left
        fx.approvals.grant(UnitId(5), holder(1), 100, T0).unwrap();
        assert_eq!(
            fx.transfer(ShareTransfer::new(UnitId(5), holder(1), holder(2), 31), T0, true),
            Err(FractionError::InsufficientShares { requested: 31, held: 30 })
        );
    }

    #[test]
    fn test_expired_approval() {
        let mut fx = Fixture::new(50);
        fx.approvals.grant(UnitId(5), holder(1), 40, T0).unwrap();
        let window = DEFAULT_APPROVAL_WINDOW_SECS;

        fx.transfer(
            ShareTransfer::new(UnitId(5), holder(1), holder(2), 10),
            T0 + window - 1,
            true,
        )
        .unwrap();

        assert_eq!(
            fx.transfer(
                ShareTransfer::new(UnitId(5), holder(1), holder(2), 10),
                T0 + window + 1,
                true
            ),
            Err(FractionError::ApprovalExpired {
                expiry: T0 + window,
                now: T0 + window + 1
            })
        );
        assert_eq!(fx.shares.balance_of(UnitId(5), &holder(1)), 90);
    }

    #[test]
    fn test_holder_cap_is_checked_before_consuming() {
        let mut fx = Fixture::new(2);
        fx.approvals.grant(UnitId(5), holder(1), 100, T0).unwrap();
        fx.transfer(ShareTransfer::new(UnitId(5), holder(1), holder(2), 10), T0, true)
            .unwrap();

        assert_eq!(
            fx.transfer(ShareTransfer::new(UnitId(5), holder(1), holder(3), 10), T0, true),
            Err(FractionError::TooManyHolders {
                unit_id: UnitId(5),
                max: 2
            })
        );
        assert_eq!(fx.approvals.approved(UnitId(5), &holder(1), T0), 90);
        assert_eq!(fx.shares.holders(UnitId(5)).unwrap().len(), 2);
    }

    #[test]
    fn test_partial_consumption_leaves_remainder() {
        let mut fx = Fixture::new(50);
        fx.approvals.grant(UnitId(5), holder(1), 40, T0).unwrap();

        let event = fx
            .transfer(ShareTransfer::new(UnitId(5), holder(1), holder(2), 15), T0 + 10, true)
            .unwrap();

        assert!(matches!(
            event,
            FractionEvent::SharesTransferred {
                remaining_approval: 25,
                ..
            }
        ));
    }
}
