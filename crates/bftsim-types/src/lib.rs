//! # bftsim-types: Core types for `bftsim`
//!
//! This crate contains shared types used across the workspace:
//! - Protocol identifiers ([`ReplicaId`], [`ViewNumber`], [`OpNumber`])
//! - Client identifiers ([`ClientId`], [`RequestId`])
//! - Multicast groups ([`GroupId`])
//! - Operation digests ([`struct@Digest`])
//! - Cluster membership ([`ReplicaAddress`], [`ClusterConfig`])

use std::fmt::{Debug, Display};

use serde::{Deserialize, Serialize};

// ============================================================================
// Replica and View Identifiers
// ============================================================================

/// Index of a replica within its group's configuration.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ReplicaId(u32);

impl ReplicaId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Returns the id as a `usize` for indexing into replica lists.
    pub fn as_index(&self) -> usize {
        self.0 as usize
    }
}

impl Display for ReplicaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "R{}", self.0)
    }
}

impl From<u32> for ReplicaId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// View number. Each view has exactly one primary.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ViewNumber(u64);

impl ViewNumber {
    pub const ZERO: ViewNumber = ViewNumber(0);

    pub const fn new(view: u64) -> Self {
        Self(view)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for ViewNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Sequence number assigned by the primary to an accepted operation.
///
/// `OpNumber::ZERO` means "nothing assigned yet"; the first operation is 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct OpNumber(u64);

impl OpNumber {
    pub const ZERO: OpNumber = OpNumber(0);

    pub const fn new(op: u64) -> Self {
        Self(op)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for OpNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "op{}", self.0)
    }
}

// ============================================================================
// Client Identifiers
// ============================================================================

/// Identifier of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientId(u64);

impl ClientId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client#{}", self.0)
    }
}

/// Per-client request number. Clients issue them in increasing order,
/// starting at 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct RequestId(u64);

impl RequestId {
    pub const ZERO: RequestId = RequestId(0);

    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req{}", self.0)
    }
}

/// Identifier of a multicast group (a replica group / shard).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct GroupId(u32);

impl GroupId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "g{}", self.0)
    }
}

// ============================================================================
// Digest
// ============================================================================

/// BLAKE3 digest of a client operation.
///
/// Prepare and Commit votes carry the digest instead of the operation so
/// that only the PrePrepare transports the payload.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Digest([u8; 32]);

impl Digest {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Digest over the identity of a request and its operation bytes.
    pub fn of_request(client_id: ClientId, request_id: RequestId, op: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&client_id.as_u64().to_le_bytes());
        hasher.update(&request_id.as_u64().to_le_bytes());
        hasher.update(op);
        Self(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Digest({self})")
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

// ============================================================================
// Cluster Membership
// ============================================================================

/// Host/port pair identifying a replica in the configuration.
///
/// The simulated transport maps these to its own addresses at registration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReplicaAddress {
    pub host: String,
    pub port: String,
}

impl ReplicaAddress {
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
        }
    }
}

impl Display for ReplicaAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Why a replica list cannot form a group.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClusterConfigError {
    #[error("cluster must have at least one replica")]
    Empty,

    #[error("cluster of {n} replicas cannot tolerate f={f} (need at least 3f + 1)")]
    TooSmall { n: usize, f: usize },
}

/// Configuration of one replica group.
///
/// Supplies the replica count, the fault threshold `f`, the deterministic
/// leader-selection function, and the address list used for group
/// membership. Deserializing applies the same checks as
/// [`ClusterConfig::try_new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "UncheckedClusterConfig")]
pub struct ClusterConfig {
    group: GroupId,
    f: usize,
    replicas: Vec<ReplicaAddress>,
}

#[derive(Deserialize)]
struct UncheckedClusterConfig {
    group: GroupId,
    f: usize,
    replicas: Vec<ReplicaAddress>,
}

impl TryFrom<UncheckedClusterConfig> for ClusterConfig {
    type Error = ClusterConfigError;

    fn try_from(raw: UncheckedClusterConfig) -> Result<Self, Self::Error> {
        Self::try_new(raw.group, raw.f, raw.replicas)
    }
}

impl ClusterConfig {
    /// Creates a configuration for `group` tolerating `f` faulty replicas.
    ///
    /// # Panics
    ///
    /// Panics if `replicas` is empty or smaller than `3f + 1`.
    pub fn new(group: GroupId, f: usize, replicas: Vec<ReplicaAddress>) -> Self {
        match Self::try_new(group, f, replicas) {
            Ok(config) => config,
            Err(e) => panic!("{e}"),
        }
    }

    /// Checked form of [`ClusterConfig::new`].
    pub fn try_new(
        group: GroupId,
        f: usize,
        replicas: Vec<ReplicaAddress>,
    ) -> Result<Self, ClusterConfigError> {
        if replicas.is_empty() {
            return Err(ClusterConfigError::Empty);
        }
        if replicas.len() <= 3 * f {
            return Err(ClusterConfigError::TooSmall {
                n: replicas.len(),
                f,
            });
        }
        Ok(Self { group, f, replicas })
    }

    /// Builds a `localhost` configuration with `3f + 1` replicas on
    /// consecutive ports starting at `base_port`.
    pub fn localhost(f: usize, base_port: u16) -> Self {
        let replicas = (0..=(3 * f) as u16)
            .map(|i| ReplicaAddress::new("localhost", (base_port + i).to_string()))
            .collect();
        Self::new(GroupId::default(), f, replicas)
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    /// Maximum number of faulty replicas tolerated.
    pub fn f(&self) -> usize {
        self.f
    }

    /// Number of replicas in the group.
    pub fn n(&self) -> usize {
        self.replicas.len()
    }

    pub fn replicas(&self) -> impl Iterator<Item = ReplicaId> + '_ {
        (0..self.replicas.len() as u32).map(ReplicaId::new)
    }

    pub fn replica_address(&self, id: ReplicaId) -> Option<&ReplicaAddress> {
        self.replicas.get(id.as_index())
    }

    pub fn addresses(&self) -> &[ReplicaAddress] {
        &self.replicas
    }

    pub fn contains(&self, id: ReplicaId) -> bool {
        id.as_index() < self.replicas.len()
    }

    /// Deterministic leader selection: round-robin over the replica list.
    pub fn leader_index(&self, view: ViewNumber) -> ReplicaId {
        ReplicaId::new((view.as_u64() % self.replicas.len() as u64) as u32)
    }

    /// Prepare votes needed besides the primary's PrePrepare (`2f`).
    pub fn prepare_quorum(&self) -> usize {
        2 * self.f
    }

    /// Commit votes needed to commit locally (`2f + 1`).
    pub fn commit_quorum(&self) -> usize {
        2 * self.f + 1
    }

    /// Matching replies a client waits for (`f + 1`).
    pub fn reply_quorum(&self) -> usize {
        self.f + 1
    }
}

// ============================================================================
// Tests
// ============================================================================
