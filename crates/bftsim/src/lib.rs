//! # bftsim
//!
//! Practical Byzantine Fault Tolerance over a deterministic, single-process
//! simulated network.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                            bftsim                            │
//! │  ┌──────────┐   ┌──────────────┐   ┌────────────────────┐    │
//! │  │  Client  │ → │ SimTransport │ → │ PbftReplica × n    │    │
//! │  │ (f + 1)  │ ← │ (filters,    │ ← │ (quorums, ordered  │    │
//! │  │          │   │  timers)     │   │  execution)        │    │
//! │  └──────────┘   └──────────────┘   └────────────────────┘    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use bftsim::{AppReplica, ClientId, Cluster, ClusterConfig, OpNumber, SimConfig};
//! use bytes::Bytes;
//!
//! struct Echo;
//!
//! impl AppReplica for Echo {
//!     fn replica_upcall(&mut self, _op: OpNumber, request: &[u8]) -> Bytes {
//!         Bytes::copy_from_slice(request)
//!     }
//!
//!     fn unlogged_upcall(&mut self, request: &[u8]) -> Bytes {
//!         Bytes::copy_from_slice(request)
//!     }
//! }
//!
//! let mut cluster = Cluster::new(ClusterConfig::localhost(1, 12345), SimConfig::until_idle(), |_| Echo);
//! let client = ClientId::new(1);
//! cluster.add_client(client);
//!
//! cluster.invoke(client, "hello").unwrap();
//! cluster.run();
//!
//! assert_eq!(cluster.client(client).last_reply(), Some(&Bytes::from_static(b"hello")));
//! ```
//!
//! # Modules
//!
//! - **Harness**: [`Cluster`], [`Node`]
//! - **Protocol**: [`bftsim_pbft`] replica, client, quorum sets, messages
//! - **Network**: [`bftsim_sim`] transport, filters, timers
//! - **Foundation**: identifiers, configuration, crypto

mod cluster;
pub mod telemetry;

pub use cluster::{Cluster, Node, sim_config};

// Re-export member crates
pub use bftsim_config as config;
pub use bftsim_crypto as crypto;
pub use bftsim_pbft as pbft;
pub use bftsim_sim as sim;
pub use bftsim_types as types;

// Re-export the types most harnesses need
pub use bftsim_config::{BftsimConfig, ConfigLoader};
pub use bftsim_pbft::{
    AppReplica, ByzantineQuorumSet, ClientError, LogEntry, OpStatus, PbftClient, PbftMessage,
    PbftReplica, QuorumSet, tags,
};
pub use bftsim_sim::{
    FilterId, RunMode, RunSummary, SimAddress, SimConfig, SimTransport, StopReason, Transport,
    filters,
};
pub use bftsim_types::{
    ClientId, ClusterConfig, ClusterConfigError, Digest, GroupId, OpNumber, ReplicaAddress,
    ReplicaId, RequestId, ViewNumber,
};
