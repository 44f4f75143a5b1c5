use crate::id::UnitsObjectId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{PoisonError, RwLock};

/// Privileges the fractional ledger checks before acting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// May mint and fractionalize units
    Minter,
    /// May mediate share transfers, pause/unpause and sweep foreign assets
    Admin,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Minter => write!(f, "MINTER"),
            Capability::Admin => write!(f, "ADMIN"),
        }
    }
}

/// Answers "is this caller authorized"; credential issuance lives elsewhere
pub trait RoleProvider: Send + Sync {
    fn has_capability(&self, identity: &UnitsObjectId, capability: Capability) -> bool;
}

/// In-memory role table
#[derive(Debug, Default)]
pub struct RoleRegistry {
    grants: RwLock<HashMap<Capability, HashSet<UnitsObjectId>>>,
}

impl RoleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry where `admin` holds both capabilities
    pub fn with_admin(admin: UnitsObjectId) -> Self {
        let registry = Self::new();
        registry.grant(admin, Capability::Admin);
        registry.grant(admin, Capability::Minter);
        registry
    }

    /// Returns false if the identity already held the capability
    pub fn grant(&self, identity: UnitsObjectId, capability: Capability) -> bool {
        let mut grants = self.grants.write().unwrap_or_else(PoisonError::into_inner);
        grants.entry(capability).or_default().insert(identity)
    }

    /// Returns false if the identity did not hold the capability
    pub fn revoke(&self, identity: &UnitsObjectId, capability: Capability) -> bool {
        let mut grants = self.grants.write().unwrap_or_else(PoisonError::into_inner);
        grants
            .get_mut(&capability)
            .map(|holders| holders.remove(identity))
            .unwrap_or(false)
    }
}

impl RoleProvider for RoleRegistry {
    fn has_capability(&self, identity: &UnitsObjectId, capability: Capability) -> bool {
        let grants = self.grants.read().unwrap_or_else(PoisonError::into_inner);
        grants
            .get(&capability)
            .map(|holders| holders.contains(identity))
            .unwrap_or(false)
    }
}
