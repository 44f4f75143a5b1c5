//! The fractionalization controller.
//!
//! This is the only entry point that mutates fractional state. It composes
//! the share ledger, the approval registry and the transfer authority with
//! the external collaborators (roles, custody ledger, clock, event sink) and
//! serializes every operation behind a single write lock: one logical
//! operation validates, calls out, applies and publishes its events before
//! the next one may start, across all units.
//!
//! Event sinks are invoked while the lock is held and must not call back
//! into the controller.

use crate::approvals::ApprovalRegistry;
use crate::clock::Clock;
use crate::commitment::{unit_commitment, Commitment};
use crate::config::FractionConfig;
use crate::custody::{ForeignAssetLedger, UnitLedger};
use crate::error::{CustodyError, FractionError, StorageError};
use crate::events::{EventSink, FractionEvent};
use crate::id::UnitsObjectId;
use crate::objects::{
    Approval, ForeignAsset, HolderRecord, MintRequest, ShareTransfer, Timestamp, UnitId,
};
use crate::roles::{Capability, RoleProvider};
use crate::shares::ShareLedger;
use crate::snapshot::LedgerSnapshot;
use crate::storage_traits::SnapshotStore;
use crate::transfer::TransferAuthority;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Seed the custody account is derived from
pub const CUSTODY_SEED: &[u8] = b"UNITS_Fraction_Custody";

/// Mutable core state, guarded as one unit
#[derive(Debug)]
struct LedgerState {
    shares: ShareLedger,
    approvals: ApprovalRegistry,
    paused: bool,
}

impl LedgerState {
    fn ensure_not_paused(&self) -> Result<(), FractionError> {
        if self.paused {
            return Err(FractionError::Paused);
        }
        Ok(())
    }
}

pub struct FractionalizationController {
    config: FractionConfig,
    custody: UnitsObjectId,
    authority: TransferAuthority,
    state: RwLock<LedgerState>,
    roles: Arc<dyn RoleProvider>,
    units: Arc<dyn UnitLedger>,
    foreign: Option<Arc<dyn ForeignAssetLedger>>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
}

/// Log a rejected operation at debug level and pass the result through
fn logged<T>(operation: &str, result: Result<T, FractionError>) -> Result<T, FractionError> {
    if let Err(err) = &result {
        debug!("{} rejected: {}", operation, err);
    }
    result
}

fn custody_error(err: CustodyError) -> FractionError {
    match err {
        CustodyError::AlreadyIssued(unit_id) => FractionError::UnitAlreadyIssued(unit_id),
        other => FractionError::Custody(other),
    }
}

impl FractionalizationController {
    pub fn new(
        config: FractionConfig,
        roles: Arc<dyn RoleProvider>,
        units: Arc<dyn UnitLedger>,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, FractionError> {
        config.validate()?;

        let (custody, _) = UnitsObjectId::try_find_uid(&[CUSTODY_SEED]).ok_or_else(|| {
            FractionError::InvalidConfig("no custody account for seed".to_string())
        })?;

        Ok(Self {
            config,
            custody,
            authority: TransferAuthority::new(),
            state: RwLock::new(LedgerState {
                shares: ShareLedger::new(config.max_shares, config.max_fraction_owners),
                approvals: ApprovalRegistry::new(config.approval_window_secs),
                paused: false,
            }),
            roles,
            units,
            foreign: None,
            events,
            clock,
        })
    }

    /// Attach the ledger used to sweep foreign assets out of custody
    pub fn with_foreign_ledger(mut self, ledger: Arc<dyn ForeignAssetLedger>) -> Self {
        self.foreign = Some(ledger);
        self
    }

    pub fn config(&self) -> &FractionConfig {
        &self.config
    }

    /// Account that holds underlying units while they are fractionalized
    pub fn custody_account(&self) -> UnitsObjectId {
        self.custody
    }

    fn read(&self) -> RwLockReadGuard<'_, LedgerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, LedgerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn require(&self, caller: &UnitsObjectId, capability: Capability) -> Result<(), FractionError> {
        if self.roles.has_capability(caller, capability) {
            Ok(())
        } else {
            Err(FractionError::Unauthorized {
                caller: *caller,
                capability,
            })
        }
    }

    fn publish(&self, event: FractionEvent) {
        self.events.publish(&event);
    }

    /// Checks shared by single and batch minting, in reporting order
    fn validate_mint(&self, state: &LedgerState, request: &MintRequest) -> Result<(), FractionError> {
        if request.to.is_null() {
            return Err(FractionError::InvalidRecipient(request.to));
        }
        if self.units.owner_of(request.unit_id).is_some() {
            return Err(FractionError::UnitAlreadyIssued(request.unit_id));
        }
        if state.shares.is_fractionalized(request.unit_id) {
            return Err(FractionError::AlreadyFractionalized(request.unit_id));
        }
        state.shares.validate_share_count(request.shares)
    }

    fn minted_events(&self, request: &MintRequest) -> [FractionEvent; 2] {
        [
            FractionEvent::UnitMinted {
                unit_id: request.unit_id,
                custody: self.custody,
            },
            FractionEvent::UnitFractionalized {
                unit_id: request.unit_id,
                owner: request.to,
                total_shares: request.shares,
            },
        ]
    }

    /// Issue a unit into custody and give all `shares` of it to `to`
    pub fn mint_and_fractionalize(
        &self,
        caller: &UnitsObjectId,
        unit_id: UnitId,
        to: UnitsObjectId,
        shares: u64,
    ) -> Result<(), FractionError> {
        let request = MintRequest::new(unit_id, to, shares);
        let mut state = self.write();

        logged("mint", (|| {
            self.require(caller, Capability::Minter)?;
            state.ensure_not_paused()?;
            self.validate_mint(&state, &request)?;

            self.units
                .issue(&self.custody, unit_id)
                .map_err(custody_error)?;
            state.shares.allocate(unit_id, to, shares)
        })())?;

        info!("{} fractionalized into {} shares for {}", unit_id, shares, to);
        for event in self.minted_events(&request) {
            self.publish(event);
        }
        Ok(())
    }

    /// Mint several units as one all-or-nothing operation
    pub fn batch_mint_and_fractionalize(
        &self,
        caller: &UnitsObjectId,
        requests: &[MintRequest],
    ) -> Result<(), FractionError> {
        let mut state = self.write();

        logged("batch mint", (|| {
            self.require(caller, Capability::Minter)?;
            state.ensure_not_paused()?;
            if requests.is_empty() || requests.len() > self.config.max_batch_size {
                return Err(FractionError::InvalidBatchSize {
                    size: requests.len(),
                    max: self.config.max_batch_size,
                });
            }

            let mut pending = HashSet::with_capacity(requests.len());
            for request in requests {
                self.validate_mint(&state, request)?;
                if !pending.insert(request.unit_id) {
                    return Err(FractionError::UnitAlreadyIssued(request.unit_id));
                }
            }

            let mut issued: Vec<UnitId> = Vec::with_capacity(requests.len());
            for request in requests {
                if let Err(err) = self.units.issue(&self.custody, request.unit_id) {
                    let mut stranded = Vec::new();
                    for unit_id in issued.iter().rev() {
                        if let Err(burn_err) = self.units.burn(&self.custody, *unit_id) {
                            warn!("failed to roll back issue of {}: {}", unit_id, burn_err);
                            stranded.push(unit_id.to_string());
                        }
                    }
                    if stranded.is_empty() {
                        return Err(custody_error(err));
                    }
                    return Err(FractionError::Custody(CustodyError::Unavailable(format!(
                        "issue of {} failed ({}) and units [{}] remain issued to custody",
                        request.unit_id,
                        err,
                        stranded.join(", ")
                    ))));
                }
                issued.push(request.unit_id);
            }

            for request in requests {
                state.shares.allocate(request.unit_id, request.to, request.shares)?;
            }
            Ok(())
        })())?;

        info!("batch fractionalized {} units", requests.len());
        for request in requests {
            for event in self.minted_events(request) {
                self.publish(event);
            }
        }
        Ok(())
    }

    /// Let the mediator move up to `shares` of the caller's shares for the
    /// approval window. Replaces any earlier approval.
    pub fn approve(
        &self,
        caller: &UnitsObjectId,
        unit_id: UnitId,
        shares: u64,
    ) -> Result<Approval, FractionError> {
        let now = self.clock.now();
        let mut state = self.write();

        let approval = logged("approve", (|| {
            state.ensure_not_paused()?;
            if !state.shares.is_fractionalized(unit_id) {
                return Err(FractionError::NotFractionalized(unit_id));
            }
            if shares == 0 {
                return Err(FractionError::InvalidAmount(shares));
            }
            let held = match state.shares.find_holder(unit_id, caller)? {
                Some(index) => state.shares.holders(unit_id)?[index].shares,
                None => {
                    return Err(FractionError::SenderHasNoShares {
                        unit_id,
                        holder: *caller,
                    })
                }
            };
            if held < shares {
                return Err(FractionError::InsufficientShares {
                    requested: shares,
                    held,
                });
            }
            state.approvals.grant(unit_id, *caller, shares, now)
        })())?;

        info!("{} approved {} shares of {}", caller, shares, unit_id);
        self.publish(FractionEvent::ApprovalGranted {
            unit_id,
            holder: *caller,
            shares,
            expiry: approval.expiry,
        });
        Ok(approval)
    }

    /// Withdraw the caller's approval. Allowed while paused.
    pub fn revoke_approval(&self, caller: &UnitsObjectId, unit_id: UnitId) -> Result<(), FractionError> {
        let mut state = self.write();

        logged("revoke", state.approvals.revoke(unit_id, caller))?;

        info!("{} revoked approval on {}", caller, unit_id);
        self.publish(FractionEvent::ApprovalRevoked {
            unit_id,
            holder: *caller,
        });
        Ok(())
    }

    /// Move shares between holders on the mediator's authority
    pub fn transfer_as_owner(
        &self,
        caller: &UnitsObjectId,
        transfer: ShareTransfer,
    ) -> Result<(), FractionError> {
        let now = self.clock.now();
        let mut state = self.write();

        let event = logged("transfer", (|| {
            self.require(caller, Capability::Admin)?;
            state.ensure_not_paused()?;
            let LedgerState {
                shares, approvals, ..
            } = &mut *state;
            self.authority
                .transfer_as_owner(shares, approvals, &transfer, now, caller, true)
        })())?;

        info!(
            "{} moved {} shares of {} from {} to {}",
            caller, transfer.amount, transfer.unit_id, transfer.from, transfer.to
        );
        self.publish(event);
        Ok(())
    }

    /// Reclaim the underlying unit once the caller holds every share
    pub fn redeem(&self, caller: &UnitsObjectId, unit_id: UnitId) -> Result<(), FractionError> {
        let mut state = self.write();

        let total_shares = logged("redeem", (|| {
            state.ensure_not_paused()?;
            let total = state.shares.total_shares(unit_id);
            let index = state
                .shares
                .find_holder(unit_id, caller)?
                .ok_or(FractionError::SenderHasNoShares {
                    unit_id,
                    holder: *caller,
                })?;
            let held = state.shares.holders(unit_id)?[index].shares;
            if held != total {
                return Err(FractionError::MustOwnAllShares { held, total });
            }

            self.units
                .release(&self.custody, caller, unit_id)
                .map_err(custody_error)?;
            state.approvals.clear_unit(unit_id);
            state.shares.reset(unit_id)?;
            Ok(total)
        })())?;

        info!("{} redeemed {} ({} shares)", caller, unit_id, total_shares);
        self.publish(FractionEvent::UnitRedeemed {
            unit_id,
            holder: *caller,
            total_shares,
        });
        Ok(())
    }

    /// Direct peer-to-peer transfers of an underlying unit are never
    /// executed; ownership only changes through minting and redemption.
    pub fn transfer_unit(
        &self,
        caller: &UnitsObjectId,
        from: &UnitsObjectId,
        to: &UnitsObjectId,
        unit_id: UnitId,
    ) -> Result<(), FractionError> {
        debug!(
            "direct transfer of {} from {} to {} by {} refused",
            unit_id, from, to, caller
        );
        Err(FractionError::DirectTransferDisabled(unit_id))
    }

    pub fn pause(&self, caller: &UnitsObjectId) -> Result<(), FractionError> {
        let mut state = self.write();
        logged("pause", (|| {
            self.require(caller, Capability::Admin)?;
            state.ensure_not_paused()?;
            state.paused = true;
            Ok(())
        })())?;

        warn!("fractional ledger paused by {}", caller);
        self.publish(FractionEvent::Paused { by: *caller });
        Ok(())
    }

    pub fn unpause(&self, caller: &UnitsObjectId) -> Result<(), FractionError> {
        let mut state = self.write();
        logged("unpause", (|| {
            self.require(caller, Capability::Admin)?;
            if !state.paused {
                return Err(FractionError::NotPaused);
            }
            state.paused = false;
            Ok(())
        })())?;

        info!("fractional ledger unpaused by {}", caller);
        self.publish(FractionEvent::Unpaused { by: *caller });
        Ok(())
    }

    /// Send a foreign asset that ended up in custody to `to`
    pub fn sweep_foreign_asset(
        &self,
        caller: &UnitsObjectId,
        asset: ForeignAsset,
        to: UnitsObjectId,
        amount: u64,
    ) -> Result<(), FractionError> {
        let _state = self.write();

        logged("sweep", (|| {
            self.require(caller, Capability::Admin)?;
            if to.is_null() {
                return Err(FractionError::InvalidRecipient(to));
            }
            if amount == 0 {
                return Err(FractionError::InvalidAmount(amount));
            }
            let ledger = self.foreign.as_ref().ok_or_else(|| {
                FractionError::ForeignTransferFailed(
                    "no foreign asset ledger configured".to_string(),
                )
            })?;
            ledger
                .transfer(&asset, &self.custody, &to, amount)
                .map_err(FractionError::ForeignTransferFailed)
        })())?;

        info!("swept {} of {:?} to {}", amount, asset, to);
        self.publish(FractionEvent::ForeignAssetSwept { asset, to, amount });
        Ok(())
    }

    /// Current holders of a unit, in no particular order
    pub fn get_fraction_owners(&self, unit_id: UnitId) -> Result<Vec<HolderRecord>, FractionError> {
        Ok(self.read().shares.holders(unit_id)?.to_vec())
    }

    /// Shares the mediator may currently move for `holder`; 0 if the
    /// approval is absent or expired
    pub fn get_approved_fractions(&self, unit_id: UnitId, holder: &UnitsObjectId) -> u64 {
        let now = self.clock.now();
        self.read().approvals.approved(unit_id, holder, now)
    }

    pub fn total_shares(&self, unit_id: UnitId) -> u64 {
        self.read().shares.total_shares(unit_id)
    }

    pub fn is_fractionalized(&self, unit_id: UnitId) -> bool {
        self.read().shares.is_fractionalized(unit_id)
    }

    pub fn balance_of(&self, unit_id: UnitId, holder: &UnitsObjectId) -> u64 {
        self.read().shares.balance_of(unit_id, holder)
    }

    pub fn is_paused(&self) -> bool {
        self.read().paused
    }

    /// Order-independent commitment to a unit's current fractional state
    pub fn unit_commitment(&self, unit_id: UnitId) -> Option<Commitment> {
        let state = self.read();
        state
            .shares
            .unit(unit_id)
            .map(|unit| unit_commitment(unit_id, unit))
    }

    /// Capture the full core state
    pub fn snapshot(&self) -> LedgerSnapshot {
        let taken_at: Timestamp = self.clock.now();
        let state = self.read();
        LedgerSnapshot::capture(&state.shares, &state.approvals, state.paused, taken_at)
    }

    /// Replace the core state with a verified snapshot.
    ///
    /// This is for host startup; a rejected snapshot leaves state untouched.
    pub fn restore(&self, snapshot: LedgerSnapshot) -> Result<(), FractionError> {
        logged("restore", snapshot.verify(&self.config))?;

        let paused = snapshot.paused;
        let (units, approvals) = snapshot.into_parts();
        let count = units.len();

        let mut state = self.write();
        state.shares.replace_units(units);
        state.approvals.replace_all(approvals);
        state.paused = paused;

        info!("restored fractional state for {} units", count);
        Ok(())
    }

    /// Snapshot the state and hand it to `store`
    pub fn persist(&self, store: &dyn SnapshotStore) -> Result<LedgerSnapshot, StorageError> {
        let snapshot = self.snapshot();
        store.save(&snapshot)?;
        Ok(snapshot)
    }

    /// Restore from the latest snapshot in `store`; false if it is empty
    pub fn recover(&self, store: &dyn SnapshotStore) -> Result<bool, StorageError> {
        let Some(snapshot) = store.load()? else {
            return Ok(false);
        };
        self.restore(snapshot)
            .map_err(|err| StorageError::Integrity(err.to_string()))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::DEFAULT_APPROVAL_WINDOW_SECS;
    use crate::custody::{InMemoryForeignLedger, InMemoryUnitLedger};
    use crate::events::MemoryEventSink;
    use crate::objects::AssetKind;
    use crate::roles::RoleRegistry;

    const T0: Timestamp = 1_700_000_000;

    fn id(byte: u8) -> UnitsObjectId {
        UnitsObjectId::new([byte; 32])
    }

    fn admin() -> UnitsObjectId {
        id(0xAD)
    }

    fn minter() -> UnitsObjectId {
        id(0x11)
    }

    struct Harness {
        controller: FractionalizationController,
        units: Arc<InMemoryUnitLedger>,
        foreign: Arc<InMemoryForeignLedger>,
        events: Arc<MemoryEventSink>,
        clock: Arc<ManualClock>,
    }

    fn harness_with(config: FractionConfig) -> Harness {
        let roles = Arc::new(RoleRegistry::with_admin(admin()));
        roles.grant(minter(), Capability::Minter);
        let units = Arc::new(InMemoryUnitLedger::new());
        let foreign = Arc::new(InMemoryForeignLedger::new());
        let events = Arc::new(MemoryEventSink::new());
        let clock = Arc::new(ManualClock::new(T0));

        let controller = FractionalizationController::new(
            config,
            roles,
            units.clone(),
            events.clone(),
            clock.clone(),
        )
        .unwrap()
        .with_foreign_ledger(foreign.clone());

        Harness {
            controller,
            units,
            foreign,
            events,
            clock,
        }
    }

    fn harness() -> Harness {
        harness_with(FractionConfig::default())
    }

    #[test]
    fn test_mint_and_fractionalize() {
        let h = harness();

        h.controller
            .mint_and_fractionalize(&minter(), UnitId(1), id(1), 1_000)
            .unwrap();

        assert!(h.controller.is_fractionalized(UnitId(1)));
        assert_eq!(h.controller.total_shares(UnitId(1)), 1_000);
        assert_eq!(
            h.controller.get_fraction_owners(UnitId(1)).unwrap(),
            vec![HolderRecord::new(id(1), 1_000)]
        );
        assert_eq!(
            h.units.owner_of(UnitId(1)),
            Some(h.controller.custody_account())
        );
        assert_eq!(
            h.events.events(),
            vec![
                FractionEvent::UnitMinted {
                    unit_id: UnitId(1),
                    custody: h.controller.custody_account()
                },
                FractionEvent::UnitFractionalized {
                    unit_id: UnitId(1),
                    owner: id(1),
                    total_shares: 1_000
                },
            ]
        );
    }

    #[test]
    fn test_mint_rejections() {
        let h = harness();

        assert_eq!(
            h.controller.mint_and_fractionalize(&id(1), UnitId(1), id(1), 10),
            Err(FractionError::Unauthorized {
                caller: id(1),
                capability: Capability::Minter
            })
        );
        assert_eq!(
            h.controller
                .mint_and_fractionalize(&minter(), UnitId(1), UnitsObjectId::null(), 10),
            Err(FractionError::InvalidRecipient(UnitsObjectId::null()))
        );
        assert_eq!(
            h.controller.mint_and_fractionalize(&minter(), UnitId(1), id(1), 0),
            Err(FractionError::InvalidShareCount {
                shares: 0,
                max: 1_000_000
            })
        );
        assert_eq!(
            h.controller
                .mint_and_fractionalize(&minter(), UnitId(1), id(1), 1_000_001),
            Err(FractionError::InvalidShareCount {
                shares: 1_000_001,
                max: 1_000_000
            })
        );

        // Nothing was issued by the rejected attempts
        assert_eq!(h.units.owner_of(UnitId(1)), None);
        assert!(h.events.events().is_empty());

        h.controller
            .mint_and_fractionalize(&minter(), UnitId(1), id(1), 10)
            .unwrap();
        assert_eq!(
            h.controller.mint_and_fractionalize(&minter(), UnitId(1), id(2), 10),
            Err(FractionError::UnitAlreadyIssued(UnitId(1)))
        );
    }

    #[test]
    fn test_already_fractionalized_without_underlying() {
        let h = harness();
        h.controller
            .mint_and_fractionalize(&minter(), UnitId(1), id(1), 10)
            .unwrap();

        // The custody ledger lost track of the unit but the shares remain
        h.units
            .burn(&h.controller.custody_account(), UnitId(1))
            .unwrap();

        assert_eq!(
            h.controller.mint_and_fractionalize(&minter(), UnitId(1), id(2), 10),
            Err(FractionError::AlreadyFractionalized(UnitId(1)))
        );
    }

    #[test]
    fn test_batch_mint() {
        let h = harness();
        let batch = [
            MintRequest::new(UnitId(1), id(1), 100),
            MintRequest::new(UnitId(2), id(2), 200),
        ];

        h.controller
            .batch_mint_and_fractionalize(&minter(), &batch)
            .unwrap();

        assert_eq!(h.controller.total_shares(UnitId(1)), 100);
        assert_eq!(h.controller.total_shares(UnitId(2)), 200);
        assert_eq!(h.events.events().len(), 4);
    }

    #[test]
    fn test_batch_mint_is_all_or_nothing() {
        let h = harness();
        h.controller
            .mint_and_fractionalize(&minter(), UnitId(3), id(1), 10)
            .unwrap();
        h.events.drain();

        let batch = [
            MintRequest::new(UnitId(1), id(1), 100),
            MintRequest::new(UnitId(2), id(2), 0),
        ];
        assert_eq!(
            h.controller.batch_mint_and_fractionalize(&minter(), &batch),
            Err(FractionError::InvalidShareCount {
                shares: 0,
                max: 1_000_000
            })
        );

        let duplicate = [
            MintRequest::new(UnitId(4), id(1), 100),
            MintRequest::new(UnitId(4), id(2), 100),
        ];
        assert_eq!(
            h.controller.batch_mint_and_fractionalize(&minter(), &duplicate),
            Err(FractionError::UnitAlreadyIssued(UnitId(4)))
        );

        let existing = [
            MintRequest::new(UnitId(5), id(1), 100),
            MintRequest::new(UnitId(3), id(2), 100),
        ];
        assert_eq!(
            h.controller.batch_mint_and_fractionalize(&minter(), &existing),
            Err(FractionError::UnitAlreadyIssued(UnitId(3)))
        );

        for unit in [1, 2, 4, 5] {
            assert!(!h.controller.is_fractionalized(UnitId(unit)));
            assert_eq!(h.units.owner_of(UnitId(unit)), None);
        }
        assert!(h.events.events().is_empty());
    }

    /// Unit ledger that refuses one issue and, optionally, every burn
    struct FlakyUnitLedger {
        inner: InMemoryUnitLedger,
        refuse_issue: UnitId,
        refuse_burns: bool,
    }

    impl UnitLedger for FlakyUnitLedger {
        fn owner_of(&self, unit_id: UnitId) -> Option<UnitsObjectId> {
            self.inner.owner_of(unit_id)
        }

        fn issue(&self, account: &UnitsObjectId, unit_id: UnitId) -> Result<(), CustodyError> {
            if unit_id == self.refuse_issue {
                return Err(CustodyError::Unavailable("issuer offline".to_string()));
            }
            self.inner.issue(account, unit_id)
        }

        fn release(
            &self,
            from: &UnitsObjectId,
            to: &UnitsObjectId,
            unit_id: UnitId,
        ) -> Result<(), CustodyError> {
            self.inner.release(from, to, unit_id)
        }

        fn burn(&self, account: &UnitsObjectId, unit_id: UnitId) -> Result<(), CustodyError> {
            if self.refuse_burns {
                return Err(CustodyError::Unavailable("burn disabled".to_string()));
            }
            self.inner.burn(account, unit_id)
        }
    }

    fn flaky_controller(units: Arc<FlakyUnitLedger>) -> FractionalizationController {
        let roles = Arc::new(RoleRegistry::with_admin(admin()));
        roles.grant(minter(), Capability::Minter);
        FractionalizationController::new(
            FractionConfig::default(),
            roles,
            units,
            Arc::new(MemoryEventSink::new()),
            Arc::new(ManualClock::new(T0)),
        )
        .unwrap()
    }

    #[test]
    fn test_batch_issue_failure_rolls_back() {
        let units = Arc::new(FlakyUnitLedger {
            inner: InMemoryUnitLedger::new(),
            refuse_issue: UnitId(3),
            refuse_burns: false,
        });
        let controller = flaky_controller(units.clone());
        let batch = [
            MintRequest::new(UnitId(1), id(1), 10),
            MintRequest::new(UnitId(2), id(1), 10),
            MintRequest::new(UnitId(3), id(1), 10),
        ];

        assert_eq!(
            controller.batch_mint_and_fractionalize(&minter(), &batch),
            Err(FractionError::Custody(CustodyError::Unavailable(
                "issuer offline".to_string()
            )))
        );
        assert_eq!(units.owner_of(UnitId(1)), None);
        assert_eq!(units.owner_of(UnitId(2)), None);
        assert!(!controller.is_fractionalized(UnitId(1)));
    }

    #[test]
    fn test_batch_rollback_failure_names_stranded_units() {
        let units = Arc::new(FlakyUnitLedger {
            inner: InMemoryUnitLedger::new(),
            refuse_issue: UnitId(3),
            refuse_burns: true,
        });
        let controller = flaky_controller(units.clone());
        let batch = [
            MintRequest::new(UnitId(1), id(1), 10),
            MintRequest::new(UnitId(2), id(1), 10),
            MintRequest::new(UnitId(3), id(1), 10),
        ];

        let err = controller
            .batch_mint_and_fractionalize(&minter(), &batch)
            .unwrap_err();
        let message = match err {
            FractionError::Custody(CustodyError::Unavailable(message)) => message,
            other => panic!("unexpected error: {:?}", other),
        };
        assert!(message.contains(&UnitId(1).to_string()));
        assert!(message.contains(&UnitId(2).to_string()));
        assert!(message.contains("issuer offline"));

        // The shares side stays untouched even though custody is stranded
        assert_eq!(units.owner_of(UnitId(1)), Some(controller.custody_account()));
        assert!(!controller.is_fractionalized(UnitId(1)));
        assert!(!controller.is_fractionalized(UnitId(2)));
    }

    #[test]
    fn test_batch_size_bounds() {
        let h = harness_with(FractionConfig {
            max_batch_size: 2,
            ..FractionConfig::default()
        });

        assert_eq!(
            h.controller.batch_mint_and_fractionalize(&minter(), &[]),
            Err(FractionError::InvalidBatchSize { size: 0, max: 2 })
        );

        let batch: Vec<_> = (1..=3)
            .map(|unit| MintRequest::new(UnitId(unit), id(1), 10))
            .collect();
        assert_eq!(
            h.controller.batch_mint_and_fractionalize(&minter(), &batch),
            Err(FractionError::InvalidBatchSize { size: 3, max: 2 })
        );
    }

    #[test]
    fn test_approve_requires_balance() {
        let h = harness();
        h.controller
            .mint_and_fractionalize(&minter(), UnitId(5), id(1), 100)
            .unwrap();

        assert_eq!(
            h.controller.approve(&id(1), UnitId(6), 10),
            Err(FractionError::NotFractionalized(UnitId(6)))
        );
        assert_eq!(
            h.controller.approve(&id(1), UnitId(5), 0),
            Err(FractionError::InvalidAmount(0))
        );
        assert_eq!(
            h.controller.approve(&id(2), UnitId(5), 10),
            Err(FractionError::SenderHasNoShares {
                unit_id: UnitId(5),
                holder: id(2)
            })
        );
        assert_eq!(
            h.controller.approve(&id(1), UnitId(5), 101),
            Err(FractionError::InsufficientShares {
                requested: 101,
                held: 100
            })
        );

        let approval = h.controller.approve(&id(1), UnitId(5), 40).unwrap();
        assert_eq!(approval.expiry, T0 + DEFAULT_APPROVAL_WINDOW_SECS);
        assert_eq!(h.controller.get_approved_fractions(UnitId(5), &id(1)), 40);
    }

    #[test]
    fn test_revoke_twice() {
        let h = harness();
        h.controller
            .mint_and_fractionalize(&minter(), UnitId(5), id(1), 100)
            .unwrap();
        h.controller.approve(&id(1), UnitId(5), 40).unwrap();

        h.controller.revoke_approval(&id(1), UnitId(5)).unwrap();
        let before = h.controller.snapshot();

        assert_eq!(
            h.controller.revoke_approval(&id(1), UnitId(5)),
            Err(FractionError::NoApprovalToRevoke {
                unit_id: UnitId(5),
                holder: id(1)
            })
        );
        assert_eq!(h.controller.snapshot(), before);
    }

    #[test]
    fn test_transfer_requires_admin() {
        let h = harness();
        h.controller
            .mint_and_fractionalize(&minter(), UnitId(5), id(1), 100)
            .unwrap();
        h.controller.approve(&id(1), UnitId(5), 40).unwrap();

        // Holders cannot move their own shares, even with an approval
        assert_eq!(
            h.controller
                .transfer_as_owner(&id(1), ShareTransfer::new(UnitId(5), id(1), id(2), 10)),
            Err(FractionError::Unauthorized {
                caller: id(1),
                capability: Capability::Admin
            })
        );
        assert_eq!(h.controller.balance_of(UnitId(5), &id(1)), 100);
    }

    #[test]
    fn test_transfer_expiry_uses_clock() {
        let h = harness();
        h.controller
            .mint_and_fractionalize(&minter(), UnitId(5), id(1), 100)
            .unwrap();
        h.controller.approve(&id(1), UnitId(5), 40).unwrap();

        h.clock.set(T0 + DEFAULT_APPROVAL_WINDOW_SECS - 1);
        h.controller
            .transfer_as_owner(&admin(), ShareTransfer::new(UnitId(5), id(1), id(2), 10))
            .unwrap();

        h.clock.set(T0 + DEFAULT_APPROVAL_WINDOW_SECS + 1);
        assert_eq!(
            h.controller
                .transfer_as_owner(&admin(), ShareTransfer::new(UnitId(5), id(1), id(2), 10)),
            Err(FractionError::ApprovalExpired {
                expiry: T0 + DEFAULT_APPROVAL_WINDOW_SECS,
                now: T0 + DEFAULT_APPROVAL_WINDOW_SECS + 1
            })
        );
        assert_eq!(h.controller.get_approved_fractions(UnitId(5), &id(1)), 0);
        assert_eq!(h.controller.balance_of(UnitId(5), &id(2)), 10);
    }

    #[test]
    fn test_redeem() {
        let h = harness();
        h.controller
            .mint_and_fractionalize(&minter(), UnitId(1), id(1), 1_000)
            .unwrap();
        h.controller.approve(&id(1), UnitId(1), 100).unwrap();

        h.controller.redeem(&id(1), UnitId(1)).unwrap();

        assert!(!h.controller.is_fractionalized(UnitId(1)));
        assert_eq!(h.controller.total_shares(UnitId(1)), 0);
        assert_eq!(
            h.controller.get_fraction_owners(UnitId(1)),
            Err(FractionError::NotFractionalized(UnitId(1)))
        );
        assert_eq!(h.controller.get_approved_fractions(UnitId(1), &id(1)), 0);
        assert_eq!(h.units.owner_of(UnitId(1)), Some(id(1)));
        assert_eq!(
            h.events.events().last(),
            Some(&FractionEvent::UnitRedeemed {
                unit_id: UnitId(1),
                holder: id(1),
                total_shares: 1_000
            })
        );

        // The underlying unit now belongs to the holder, so it cannot be re-minted
        assert_eq!(
            h.controller.mint_and_fractionalize(&minter(), UnitId(1), id(1), 10),
            Err(FractionError::UnitAlreadyIssued(UnitId(1)))
        );
    }

    #[test]
    fn test_redeem_rejections() {
        let h = harness();
        assert_eq!(
            h.controller.redeem(&id(1), UnitId(1)),
            Err(FractionError::NotFractionalized(UnitId(1)))
        );

        h.controller
            .mint_and_fractionalize(&minter(), UnitId(1), id(1), 100)
            .unwrap();
        h.controller.approve(&id(1), UnitId(1), 1).unwrap();
        h.controller
            .transfer_as_owner(&admin(), ShareTransfer::new(UnitId(1), id(1), id(2), 1))
            .unwrap();

        assert_eq!(
            h.controller.redeem(&id(3), UnitId(1)),
            Err(FractionError::SenderHasNoShares {
                unit_id: UnitId(1),
                holder: id(3)
            })
        );
        assert_eq!(
            h.controller.redeem(&id(1), UnitId(1)),
            Err(FractionError::MustOwnAllShares {
                held: 99,
                total: 100
            })
        );
        assert_eq!(
            h.units.owner_of(UnitId(1)),
            Some(h.controller.custody_account())
        );
    }

    #[test]
    fn test_redeem_fails_cleanly_when_custody_lost() {
        let h = harness();
        h.controller
            .mint_and_fractionalize(&minter(), UnitId(1), id(1), 100)
            .unwrap();
        h.units
            .release(&h.controller.custody_account(), &id(9), UnitId(1))
            .unwrap();

        assert!(matches!(
            h.controller.redeem(&id(1), UnitId(1)),
            Err(FractionError::Custody(CustodyError::NotHeld { .. }))
        ));
        assert!(h.controller.is_fractionalized(UnitId(1)));
        assert_eq!(h.controller.balance_of(UnitId(1), &id(1)), 100);
    }

    #[test]
    fn test_direct_transfer_always_rejected() {
        let h = harness();
        h.controller
            .mint_and_fractionalize(&minter(), UnitId(1), id(1), 100)
            .unwrap();
        let custody = h.controller.custody_account();

        for caller in [admin(), minter(), id(1), custody] {
            assert_eq!(
                h.controller.transfer_unit(&caller, &custody, &id(2), UnitId(1)),
                Err(FractionError::DirectTransferDisabled(UnitId(1)))
            );
        }
        assert_eq!(h.units.owner_of(UnitId(1)), Some(custody));
    }

    #[test]
    fn test_pause_blocks_mutations_but_not_revoke() {
        let h = harness();
        h.controller
            .mint_and_fractionalize(&minter(), UnitId(1), id(1), 100)
            .unwrap();
        h.controller.approve(&id(1), UnitId(1), 10).unwrap();

        assert!(matches!(
            h.controller.pause(&id(1)),
            Err(FractionError::Unauthorized { .. })
        ));
        assert_eq!(h.controller.unpause(&admin()), Err(FractionError::NotPaused));
        h.controller.pause(&admin()).unwrap();
        assert!(h.controller.is_paused());
        assert_eq!(h.controller.pause(&admin()), Err(FractionError::Paused));

        assert_eq!(
            h.controller.mint_and_fractionalize(&minter(), UnitId(2), id(1), 10),
            Err(FractionError::Paused)
        );
        assert_eq!(
            h.controller.approve(&id(1), UnitId(1), 20),
            Err(FractionError::Paused)
        );
        assert_eq!(
            h.controller
                .transfer_as_owner(&admin(), ShareTransfer::new(UnitId(1), id(1), id(2), 5)),
            Err(FractionError::Paused)
        );
        assert_eq!(
            h.controller.redeem(&id(1), UnitId(1)),
            Err(FractionError::Paused)
        );
        h.controller.revoke_approval(&id(1), UnitId(1)).unwrap();

        h.controller.unpause(&admin()).unwrap();
        assert!(!h.controller.is_paused());
        h.controller.redeem(&id(1), UnitId(1)).unwrap();
    }

    #[test]
    fn test_sweep_foreign_asset() {
        let h = harness();
        let custody = h.controller.custody_account();
        let asset = ForeignAsset {
            contract: id(0xEE),
            kind: AssetKind::Fungible,
        };
        h.foreign.deposit(asset, custody, 500);

        assert!(matches!(
            h.controller.sweep_foreign_asset(&minter(), asset, id(1), 10),
            Err(FractionError::Unauthorized { .. })
        ));
        assert_eq!(
            h.controller
                .sweep_foreign_asset(&admin(), asset, UnitsObjectId::null(), 10),
            Err(FractionError::InvalidRecipient(UnitsObjectId::null()))
        );
        assert!(matches!(
            h.controller.sweep_foreign_asset(&admin(), asset, id(1), 501),
            Err(FractionError::ForeignTransferFailed(_))
        ));

        h.controller
            .sweep_foreign_asset(&admin(), asset, id(1), 500)
            .unwrap();
        assert_eq!(h.foreign.balance_of(&asset, &id(1)), 500);
        assert_eq!(
            h.events.events().last(),
            Some(&FractionEvent::ForeignAssetSwept {
                asset,
                to: id(1),
                amount: 500
            })
        );
    }

    #[test]
    fn test_sweep_without_foreign_ledger() {
        let roles = Arc::new(RoleRegistry::with_admin(admin()));
        let controller = FractionalizationController::new(
            FractionConfig::default(),
            roles,
            Arc::new(InMemoryUnitLedger::new()),
            Arc::new(MemoryEventSink::new()),
            Arc::new(ManualClock::new(T0)),
        )
        .unwrap();
        let asset = ForeignAsset {
            contract: id(0xEE),
            kind: AssetKind::Token(1),
        };

        assert!(matches!(
            controller.sweep_foreign_asset(&admin(), asset, id(1), 1),
            Err(FractionError::ForeignTransferFailed(_))
        ));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = FractionalizationController::new(
            FractionConfig {
                max_shares: 0,
                ..FractionConfig::default()
            },
            Arc::new(RoleRegistry::new()),
            Arc::new(InMemoryUnitLedger::new()),
            Arc::new(MemoryEventSink::new()),
            Arc::new(ManualClock::new(T0)),
        );
        assert!(matches!(result, Err(FractionError::InvalidConfig(_))));
    }

    #[test]
    fn test_snapshot_restore() {
        let h = harness();
        h.controller
            .mint_and_fractionalize(&minter(), UnitId(5), id(1), 100)
            .unwrap();
        h.controller.approve(&id(1), UnitId(5), 40).unwrap();
        h.controller
            .transfer_as_owner(&admin(), ShareTransfer::new(UnitId(5), id(1), id(2), 15))
            .unwrap();
        let snapshot = h.controller.snapshot();
        let commitment = h.controller.unit_commitment(UnitId(5)).unwrap();

        let fresh = harness();
        fresh.controller.restore(snapshot.clone()).unwrap();

        assert_eq!(fresh.controller.balance_of(UnitId(5), &id(1)), 85);
        assert_eq!(fresh.controller.balance_of(UnitId(5), &id(2)), 15);
        assert_eq!(fresh.controller.get_approved_fractions(UnitId(5), &id(1)), 25);
        assert_eq!(fresh.controller.unit_commitment(UnitId(5)), Some(commitment));

        let mut tampered = snapshot;
        tampered.approvals[0].approval.approved_shares = 99;
        assert!(matches!(
            fresh.controller.restore(tampered),
            Err(FractionError::SnapshotRejected(_))
        ));
        assert_eq!(fresh.controller.get_approved_fractions(UnitId(5), &id(1)), 25);
    }
}
