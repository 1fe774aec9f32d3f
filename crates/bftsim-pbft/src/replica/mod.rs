//! PBFT replica state machine.
//!
//! The replica is driven entirely by deliveries from the transport. All
//! protocol progress is derived from the quorum tables; there are no
//! explicit per-operation state writes.
//!
//! # Protocol Overview
//!
//! ```text
//! Client ──Request──► Primary
//!                       │
//!                       ├──PrePrepare──► Backup₁ ──Prepare──► All
//!                       ├──PrePrepare──► Backup₂ ──Prepare──► All
//!                       │
//!            (2f matching Prepares: prepared)
//!                       │
//!          All ──Commit──► All
//!                       │
//!            (2f + 1 matching Commits: committed-local, execute in order)
//!                       │
//! Client ◄──Reply── every replica
//! ```
//!
//! # Limitations
//!
//! This is the normal-case fast path only. There is no view change,
//! recovery, or request forwarding; a backup that receives a client request
//! records where the client lives and otherwise ignores it.
//! [`PbftReplica::enter_view`] and [`PbftReplica::clear_quorums`] are the
//! hooks a view-change layer would drive.

mod normal;
mod state;

pub use state::{ClientTableEntry, LogEntry, OpStatus, Vote};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use bftsim_crypto::{NopSigner, NopVerifier, Signer, Verifier};
use bftsim_sim::{MultiStamp, SimAddress, Transport, TransportReceiver};
use bftsim_types::{ClientId, ClusterConfig, OpNumber, ReplicaId, ViewNumber};
use bytes::Bytes;
use serde::Serialize;

use crate::message::{Attributed, PrePrepare, Signed};
use crate::outbox::Outbox;
use crate::quorum::QuorumSet;
use crate::{AppReplica, PbftMessage};

// ============================================================================
// Replica
// ============================================================================

/// One member of a PBFT replica group.
pub struct PbftReplica<A: AppReplica> {
    config: ClusterConfig,
    replica_id: ReplicaId,
    addr: Option<SimAddress>,

    view: ViewNumber,
    /// Highest sequence number assigned or accepted.
    last_assigned: OpNumber,
    last_executed: OpNumber,

    /// Logged PrePrepares that have not been executed yet.
    pre_prepares: BTreeMap<OpNumber, PrePrepare>,
    prepares: QuorumSet<OpNumber, Vote>,
    commits: QuorumSet<OpNumber, Vote>,
    /// Sequence numbers this replica already sent a Commit for.
    commits_sent: BTreeSet<OpNumber>,

    client_table: BTreeMap<ClientId, ClientTableEntry>,
    client_addresses: BTreeMap<ClientId, SimAddress>,
    log: Vec<LogEntry>,

    signer: Arc<dyn Signer>,
    verifier: Arc<dyn Verifier>,
    app: A,
}

impl<A: AppReplica> PbftReplica<A> {
    /// Creates replica `replica_id` of `config` in view 0.
    ///
    /// # Panics
    ///
    /// Panics if `replica_id` is not part of `config`.
    pub fn new(
        config: ClusterConfig,
        replica_id: ReplicaId,
        app: A,
        signer: Arc<dyn Signer>,
        verifier: Arc<dyn Verifier>,
    ) -> Self {
        assert!(
            config.contains(replica_id),
            "{replica_id} is not part of a {}-replica configuration",
            config.n()
        );
        Self {
            prepares: QuorumSet::new(config.prepare_quorum()),
            commits: QuorumSet::new(config.commit_quorum()),
            config,
            replica_id,
            addr: None,
            view: ViewNumber::ZERO,
            last_assigned: OpNumber::ZERO,
            last_executed: OpNumber::ZERO,
            pre_prepares: BTreeMap::new(),
            commits_sent: BTreeSet::new(),
            client_table: BTreeMap::new(),
            client_addresses: BTreeMap::new(),
            log: Vec::new(),
            signer,
            verifier,
            app,
        }
    }

    /// Creates a replica that neither signs nor checks signatures.
    pub fn unsigned(config: ClusterConfig, replica_id: ReplicaId, app: A) -> Self {
        Self::new(
            config,
            replica_id,
            app,
            Arc::new(NopSigner),
            Arc::new(NopVerifier),
        )
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn replica_id(&self) -> ReplicaId {
        self.replica_id
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn address(&self) -> Option<SimAddress> {
        self.addr
    }

    pub fn view(&self) -> ViewNumber {
        self.view
    }

    pub fn primary(&self) -> ReplicaId {
        self.config.leader_index(self.view)
    }

    pub fn is_primary(&self) -> bool {
        self.primary() == self.replica_id
    }

    pub fn last_assigned(&self) -> OpNumber {
        self.last_assigned
    }

    pub fn last_executed(&self) -> OpNumber {
        self.last_executed
    }

    /// Every sequence number executed so far, in order.
    pub fn executed_log(&self) -> &[LogEntry] {
        &self.log
    }

    pub fn client_entry(&self, client: ClientId) -> Option<&ClientTableEntry> {
        self.client_table.get(&client)
    }

    /// The logged, not yet executed PrePrepare for `op`.
    pub fn pre_prepare(&self, op: OpNumber) -> Option<&PrePrepare> {
        self.pre_prepares.get(&op)
    }

    pub fn app(&self) -> &A {
        &self.app
    }

    pub fn app_mut(&mut self) -> &mut A {
        &mut self.app
    }

    // ------------------------------------------------------------------------
    // View hooks
    // ------------------------------------------------------------------------

    /// Moves to `view`. Views never go backwards.
    ///
    /// # Panics
    ///
    /// Panics if `view` is lower than the current view.
    pub fn enter_view(&mut self, view: ViewNumber) {
        assert!(
            view >= self.view,
            "{} cannot move back from {} to {view}",
            self.replica_id,
            self.view
        );
        if view > self.view {
            tracing::info!(replica = %self.replica_id, from = %self.view, to = %view, "entering view");
            self.view = view;
        }
    }

    /// Drops all recorded Prepare and Commit votes.
    pub fn clear_quorums(&mut self) {
        self.prepares.clear_all();
        self.commits.clear_all();
        self.commits_sent.clear();
    }

    // ------------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------------

    /// Handles one decoded message from `src`.
    pub fn handle(&mut self, transport: &mut dyn Transport, src: SimAddress, msg: PbftMessage) {
        let Some(me) = self.addr else {
            tracing::warn!(replica = %self.replica_id, "message delivered before registration");
            return;
        };
        let mut out = Outbox::new(transport, me);

        match msg {
            PbftMessage::Request(request) => self.on_request(&mut out, src, request),
            PbftMessage::UnloggedRequest(request) => {
                self.on_unlogged_request(&mut out, src, request);
            }
            PbftMessage::PrePrepare(signed) => {
                if self.authenticate(&signed) {
                    self.on_pre_prepare(&mut out, signed.body);
                }
            }
            PbftMessage::Prepare(signed) => {
                if self.authenticate(&signed) {
                    self.on_prepare(&mut out, signed.body);
                }
            }
            PbftMessage::Commit(signed) => {
                if self.authenticate(&signed) {
                    self.on_commit(&mut out, signed.body);
                }
            }
            PbftMessage::Reply(_) | PbftMessage::UnloggedReply(_) => {
                tracing::debug!(replica = %self.replica_id, %src, "ignoring reply sent to a replica");
            }
        }
    }

    /// Checks that the claimed sender is a member and signed the message.
    fn authenticate<T: Serialize + Attributed>(&self, signed: &Signed<T>) -> bool {
        let sender = signed.body.sender();
        if !self.config.contains(sender) {
            tracing::warn!(replica = %self.replica_id, %sender, "message from unknown replica");
            return false;
        }
        if !signed.verify(self.verifier.as_ref()) {
            tracing::warn!(replica = %self.replica_id, %sender, "signature verification failed");
            return false;
        }
        true
    }

    fn sign<T: Serialize + Attributed>(&self, body: T) -> Option<Signed<T>> {
        match Signed::sign(body, self.signer.as_ref()) {
            Ok(signed) => Some(signed),
            Err(error) => {
                tracing::error!(replica = %self.replica_id, %error, "failed to sign message");
                None
            }
        }
    }
}

impl<A: AppReplica> TransportReceiver for PbftReplica<A> {
    fn on_registered(&mut self, addr: SimAddress) {
        self.addr = Some(addr);
    }

    fn receive(
        &mut self,
        transport: &mut dyn Transport,
        src: SimAddress,
        msg_type: &str,
        payload: &Bytes,
        _stamp: Option<&MultiStamp>,
    ) {
        match PbftMessage::decode(msg_type, payload) {
            Ok(msg) => self.handle(transport, src, msg),
            Err(error) => {
                tracing::warn!(replica = %self.replica_id, %src, %error, "undecodable message");
            }
        }
    }
}

impl<A: AppReplica> std::fmt::Debug for PbftReplica<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PbftReplica")
            .field("replica_id", &self.replica_id)
            .field("view", &self.view)
            .field("last_assigned", &self.last_assigned)
            .field("last_executed", &self.last_executed)
            .field("pending", &self.pre_prepares.len())
            .finish_non_exhaustive()
    }
}
