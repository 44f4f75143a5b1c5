use crate::id::UnitsObjectId;
use crate::objects::{ForeignAsset, Timestamp, UnitId};
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};

/// Audit events published after an operation has taken effect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FractionEvent {
    /// The underlying unit was issued into custody
    UnitMinted {
        unit_id: UnitId,
        custody: UnitsObjectId,
    },
    UnitFractionalized {
        unit_id: UnitId,
        owner: UnitsObjectId,
        total_shares: u64,
    },
    ApprovalGranted {
        unit_id: UnitId,
        holder: UnitsObjectId,
        shares: u64,
        expiry: Timestamp,
    },
    ApprovalRevoked {
        unit_id: UnitId,
        holder: UnitsObjectId,
    },
    SharesTransferred {
        unit_id: UnitId,
        from: UnitsObjectId,
        to: UnitsObjectId,
        amount: u64,
        /// Approval left for `from` after this transfer
        remaining_approval: u64,
    },
    /// Fractional state retired and the unit released to `holder`
    UnitRedeemed {
        unit_id: UnitId,
        holder: UnitsObjectId,
        total_shares: u64,
    },
    ForeignAssetSwept {
        asset: ForeignAsset,
        to: UnitsObjectId,
        amount: u64,
    },
    Paused {
        by: UnitsObjectId,
    },
    Unpaused {
        by: UnitsObjectId,
    },
}

impl FractionEvent {
    /// Unit the event concerns, if any
    pub fn unit_id(&self) -> Option<UnitId> {
        match self {
            FractionEvent::UnitMinted { unit_id, .. }
            | FractionEvent::UnitFractionalized { unit_id, .. }
            | FractionEvent::ApprovalGranted { unit_id, .. }
            | FractionEvent::ApprovalRevoked { unit_id, .. }
            | FractionEvent::SharesTransferred { unit_id, .. }
            | FractionEvent::UnitRedeemed { unit_id, .. } => Some(*unit_id),
            FractionEvent::ForeignAssetSwept { .. }
            | FractionEvent::Paused { .. }
            | FractionEvent::Unpaused { .. } => None,
        }
    }
}

/// Downstream observer of ledger events
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &FractionEvent);
}

/// Collects events in memory
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<FractionEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<FractionEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remove and return everything collected so far
    pub fn drain(&self) -> Vec<FractionEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl EventSink for MemoryEventSink {
    fn publish(&self, event: &FractionEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// Writes every event to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn publish(&self, event: &FractionEvent) {
        info!("fraction event: {:?}", event);
    }
}

/// Fans one event out to several sinks
#[derive(Default)]
pub struct FanoutEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutEventSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for FanoutEventSink {
    fn publish(&self, event: &FractionEvent) {
        for sink in &self.sinks {
            sink.publish(event);
        }
    }
}
