use curve25519_dalek::edwards::CompressedEdwardsY;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::ops::Deref;

// UnitsObjectId identifies every party the fractional ledger talks about:
// holders, callers, the custody account and foreign asset contracts.
// It is a 32 byte long identifier, resembling a public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitsObjectId([u8; 32]);

impl Default for UnitsObjectId {
    fn default() -> Self {
        UnitsObjectId([0; 32])
    }
}

impl Deref for UnitsObjectId {
    type Target = [u8; 32];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<[u8]> for UnitsObjectId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for UnitsObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl UnitsObjectId {
    pub fn new(uid: [u8; 32]) -> Self {
        UnitsObjectId(uid)
    }

    /// The null identity (all zero bytes). Never a valid recipient.
    pub fn null() -> Self {
        Self::default()
    }

    pub fn is_null(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Rebuild an id from a byte slice read back from storage
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; 32] = bytes.try_into().ok()?;
        Some(UnitsObjectId(array))
    }

    pub fn create_object_id(seeds: &[&[u8]], bump: u8) -> [u8; 32] {
        let mut hasher = Sha256::new();

        // Domain separator
        hasher.update(b"UNITS_Object");

        for seed in seeds {
            hasher.update(seed);
        }

        hasher.update([bump]);

        hasher.finalize().into()
    }

    /// Check that a 32-byte array is not a valid point on the ed25519 curve,
    /// so no private key can exist for it
    pub fn is_off_curve(bytes: &[u8; 32]) -> bool {
        let Ok(compressed_edwards_y) = CompressedEdwardsY::from_slice(bytes.as_ref()) else {
            return true;
        };
        compressed_edwards_y.decompress().is_none()
    }

    /// Try to find a program-owned UnitsObjectId for the given seeds
    pub fn try_find_uid(seeds: &[&[u8]]) -> Option<(UnitsObjectId, u8)> {
        for bump in (0..=u8::MAX).rev() {
            let id = UnitsObjectId::create_object_id(seeds, bump);
            if UnitsObjectId::is_off_curve(&id) {
                return Some((UnitsObjectId(id), bump));
            }
        }
        None
    }
}
