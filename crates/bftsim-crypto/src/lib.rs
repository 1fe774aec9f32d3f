//! # bftsim-crypto: Signing boundary for `bftsim`
//!
//! Replicas sign every inter-replica protocol message and verify the
//! signature against the claimed sender before acting on it. The replica
//! core treats both operations as opaque; this crate provides:
//!
//! - [`Signer`] / [`Verifier`]: the traits the core depends on
//! - [`Ed25519Signer`] / [`Ed25519Verifier`]: Ed25519 implementations
//! - [`NopSigner`] / [`NopVerifier`]: pass-through implementations for
//!   crash-fault-only runs
//!
//! # Example
//!
//! ```
//! use bftsim_crypto::{Signer, Verifier, deterministic_keyring};
//! use bftsim_types::ReplicaId;
//!
//! let (signers, verifier) = deterministic_keyring(4);
//! let sig = signers[1].sign(b"prepare");
//! assert!(verifier.verify(b"prepare", &sig, ReplicaId::new(1)));
//! assert!(!verifier.verify(b"prepare", &sig, ReplicaId::new(2)));
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use bftsim_types::ReplicaId;
use ed25519_dalek::{Signature, SigningKey, VerifyingKey};
use thiserror::Error;

/// Errors from constructing key material.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid verifying key for {replica}: {reason}")]
    InvalidVerifyingKey { replica: ReplicaId, reason: String },

    #[error("degenerate all-zero seed")]
    DegenerateSeed,
}

/// Produces signatures over message bytes.
pub trait Signer: Send + Sync {
    fn sign(&self, bytes: &[u8]) -> Vec<u8>;
}

/// Checks signatures against the replica that claims to have produced them.
pub trait Verifier: Send + Sync {
    fn verify(&self, bytes: &[u8], signature: &[u8], claimed_signer: ReplicaId) -> bool;
}

// ============================================================================
// Ed25519
// ============================================================================

/// Ed25519 signing key for one replica.
pub struct Ed25519Signer {
    key: SigningKey,
}

// Manual Debug implementation to avoid exposing key material
impl std::fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("key", &"<redacted>")
            .finish()
    }
}

impl Ed25519Signer {
    /// Creates a signer from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Result<Self, CryptoError> {
        if seed == &[0u8; 32] {
            return Err(CryptoError::DegenerateSeed);
        }
        Ok(Self {
            key: SigningKey::from_bytes(seed),
        })
    }

    /// Deterministic key derived from the replica id.
    ///
    /// Only suitable for simulation: every run derives the same keys.
    pub fn deterministic(replica: ReplicaId) -> Self {
        Self {
            key: SigningKey::from_bytes(&deterministic_seed(replica)),
        }
    }

    pub fn verifying_key_bytes(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }
}

impl Signer for Ed25519Signer {
    fn sign(&self, bytes: &[u8]) -> Vec<u8> {
        use ed25519_dalek::Signer as _;
        self.key.sign(bytes).to_bytes().to_vec()
    }
}

/// Verifying keys of every replica in a group.
#[derive(Debug, Clone, Default)]
pub struct Ed25519Verifier {
    keys: BTreeMap<ReplicaId, VerifyingKey>,
}

impl Ed25519Verifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the public key of `replica`.
    pub fn insert(&mut self, replica: ReplicaId, key: &[u8; 32]) -> Result<(), CryptoError> {
        let key = VerifyingKey::from_bytes(key).map_err(|e| CryptoError::InvalidVerifyingKey {
            replica,
            reason: e.to_string(),
        })?;
        self.keys.insert(replica, key);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl Verifier for Ed25519Verifier {
    fn verify(&self, bytes: &[u8], signature: &[u8], claimed_signer: ReplicaId) -> bool {
        let Some(key) = self.keys.get(&claimed_signer) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        key.verify_strict(bytes, &signature).is_ok()
    }
}

/// Builds deterministic signers for replicas `0..n` and a verifier that
/// knows all of their public keys.
pub fn deterministic_keyring(n: usize) -> (Vec<Arc<dyn Signer>>, Arc<dyn Verifier>) {
    let mut verifier = Ed25519Verifier::new();
    let signers = (0..n as u32)
        .map(ReplicaId::new)
        .map(|replica| {
            let signer = Ed25519Signer::deterministic(replica);
            verifier.keys.insert(replica, signer.key.verifying_key());
            Arc::new(signer) as Arc<dyn Signer>
        })
        .collect();
    (signers, Arc::new(verifier))
}

fn deterministic_seed(replica: ReplicaId) -> [u8; 32] {
    let mut seed = [0u8; 32];
    seed[..4].copy_from_slice(&replica.as_u32().to_le_bytes());
    seed[4..12].copy_from_slice(b"bftsimky");
    seed
}

// ============================================================================
// No-op
// ============================================================================

/// Signer that produces empty signatures.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopSigner;

impl Signer for NopSigner {
    fn sign(&self, _bytes: &[u8]) -> Vec<u8> {
        Vec::new()
    }
}

/// Verifier that accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopVerifier;

impl Verifier for NopVerifier {
    fn verify(&self, _bytes: &[u8], _signature: &[u8], _claimed_signer: ReplicaId) -> bool {
        true
    }
}

// ============================================================================
// Tests
// ============================================================================
