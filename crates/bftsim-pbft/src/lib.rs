//! # bftsim-pbft: PBFT normal-case agreement
//!
//! Replica and client state machines for Practical Byzantine Fault
//! Tolerance, written against the [`bftsim_sim::Transport`] boundary.
//!
//! A group of `n >= 3f + 1` replicas orders client requests in three
//! phases and executes them in sequence-number order:
//!
//! | Step | Condition |
//! |------|-----------|
//! | PrePrepared | the primary's PrePrepare for `(view, op)` is logged |
//! | Prepared | PrePrepared and `2f` matching Prepares from backups |
//! | Committed-local | Prepared and `2f + 1` matching Commits |
//! | Executed | committed-local and every lower sequence number executed |
//!
//! Clients accept a result once `f + 1` replicas agree on it.
//!
//! ## Modules
//!
//! - [`quorum`]: plain and content-bucketed vote counting
//! - [`message`]: wire messages, signatures, type tags
//! - [`PbftReplica`]: the replica state machine
//! - [`PbftClient`]: single-outstanding-request client
//! - [`AppReplica`]: the replicated application

mod app;
mod client;
mod error;
pub mod message;
mod outbox;
pub mod quorum;
mod replica;

pub use app::AppReplica;
pub use client::{CompletedRequest, PbftClient, PendingRequest};
pub use error::{ClientError, MessageError};
pub use message::{
    Attributed, Commit, PbftMessage, PrePrepare, Prepare, Reply, Request, Signed, UnloggedReply,
    UnloggedRequest, tags,
};
pub use quorum::{ByzantineQuorumSet, QuorumSet};
pub use replica::{ClientTableEntry, LogEntry, OpStatus, PbftReplica, Vote};
