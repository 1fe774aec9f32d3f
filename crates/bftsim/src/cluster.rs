//! In-process PBFT cluster on one simulated transport.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                        Cluster                          │
//! │  ┌───────────┐  ┌───────────┐       ┌───────────┐       │
//! │  │ Replica 0 │  │ Replica 1 │  ...  │  Client   │       │
//! │  └─────┬─────┘  └─────┬─────┘       └─────┬─────┘       │
//! │        └──────────────┴─────────┬─────────┘             │
//! │                         ┌───────▼───────┐               │
//! │                         │ SimTransport  │ ◄── filters   │
//! │                         └───────────────┘               │
//! └─────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use bftsim_config::{BftsimConfig, ConfigError, SimulationMode, SimulationSection};
use bftsim_crypto::deterministic_keyring;
use bftsim_pbft::{AppReplica, ClientError, PbftClient, PbftReplica};
use bftsim_sim::{
    EndpointRole, MultiStamp, RunSummary, SimAddress, SimConfig, SimTransport, TimerId,
    Transport, TransportReceiver,
};
use bftsim_types::{ClientId, ClusterConfig, ReplicaId, RequestId};
use bytes::Bytes;

// ============================================================================
// Node
// ============================================================================

/// Anything registered with a cluster's transport.
#[derive(Debug)]
pub enum Node<A: AppReplica> {
    Replica(PbftReplica<A>),
    Client(PbftClient),
}

impl<A: AppReplica> TransportReceiver for Node<A> {
    fn on_registered(&mut self, addr: SimAddress) {
        match self {
            Node::Replica(replica) => replica.on_registered(addr),
            Node::Client(client) => client.on_registered(addr),
        }
    }

    fn on_timer(&mut self, transport: &mut dyn Transport, id: TimerId) {
        match self {
            Node::Replica(replica) => replica.on_timer(transport, id),
            Node::Client(client) => client.on_timer(transport, id),
        }
    }

    fn receive(
        &mut self,
        transport: &mut dyn Transport,
        src: SimAddress,
        msg_type: &str,
        payload: &Bytes,
        stamp: Option<&MultiStamp>,
    ) {
        match self {
            Node::Replica(replica) => replica.receive(transport, src, msg_type, payload, stamp),
            Node::Client(client) => client.receive(transport, src, msg_type, payload, stamp),
        }
    }
}

// ============================================================================
// Cluster
// ============================================================================

/// One replica group and its clients.
pub struct Cluster<A: AppReplica> {
    config: ClusterConfig,
    sim: SimConfig,
    transport: SimTransport<Node<A>>,
    replicas: Vec<SimAddress>,
    clients: BTreeMap<ClientId, SimAddress>,
}

impl<A: AppReplica> Cluster<A> {
    /// Builds a cluster whose replicas do not sign their votes.
    ///
    /// `app` is called once per replica to create its application.
    pub fn new(config: ClusterConfig, sim: SimConfig, app: impl FnMut(ReplicaId) -> A) -> Self {
        Self::build(config, sim, app, false)
    }

    /// Builds a cluster whose replicas sign and verify every vote with
    /// deterministic Ed25519 keys.
    pub fn signed(config: ClusterConfig, sim: SimConfig, app: impl FnMut(ReplicaId) -> A) -> Self {
        Self::build(config, sim, app, true)
    }

    /// Builds a signed cluster from loaded configuration.
    pub fn from_config(
        config: &BftsimConfig,
        app: impl FnMut(ReplicaId) -> A,
    ) -> Result<Self, ConfigError> {
        let cluster = config.cluster_config()?;
        Ok(Self::signed(cluster, sim_config(&config.simulation), app))
    }

    fn build(
        config: ClusterConfig,
        sim: SimConfig,
        mut app: impl FnMut(ReplicaId) -> A,
        signed: bool,
    ) -> Self {
        let mut transport = SimTransport::new();
        let keys = signed.then(|| deterministic_keyring(config.n()));

        let replicas = config
            .replicas()
            .map(|id| {
                let replica = match &keys {
                    Some((signers, verifier)) => PbftReplica::new(
                        config.clone(),
                        id,
                        app(id),
                        Arc::clone(&signers[id.as_index()]),
                        Arc::clone(verifier),
                    ),
                    None => PbftReplica::unsigned(config.clone(), id, app(id)),
                };
                transport.register(
                    Node::Replica(replica),
                    config.replica_address(id).cloned(),
                    EndpointRole::replica(config.group(), id),
                )
            })
            .collect();

        tracing::info!(n = config.n(), f = config.f(), signed, "cluster started");
        Self {
            config,
            sim,
            transport,
            replicas,
            clients: BTreeMap::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Clients
    // ------------------------------------------------------------------------

    /// Registers a new client.
    ///
    /// # Panics
    ///
    /// Panics if `id` is already registered.
    pub fn add_client(&mut self, id: ClientId) -> SimAddress {
        assert!(!self.clients.contains_key(&id), "{id} registered twice");
        let client = PbftClient::new(self.config.clone(), id);
        let addr = self
            .transport
            .register(Node::Client(client), None, EndpointRole::Client);
        self.clients.insert(id, addr);
        addr
    }

    /// Starts an ordered request from `client`. Call [`Cluster::run`] to
    /// drive it.
    pub fn invoke(&mut self, client: ClientId, op: impl Into<Bytes>) -> Result<RequestId, ClientError> {
        self.with_client(client, |c, transport| c.invoke(transport, op))
    }

    pub fn invoke_unlogged(
        &mut self,
        client: ClientId,
        replica: ReplicaId,
        op: impl Into<Bytes>,
    ) -> Result<RequestId, ClientError> {
        self.with_client(client, |c, transport| c.invoke_unlogged(transport, replica, op))
    }

    /// Sends the client's last ordered request again.
    pub fn resend(&mut self, client: ClientId) -> Result<RequestId, ClientError> {
        self.with_client(client, |c, transport| c.resend_last(transport))
    }

    fn with_client<R>(
        &mut self,
        client: ClientId,
        f: impl FnOnce(&mut PbftClient, &mut dyn Transport) -> R,
    ) -> R {
        let addr = self.client_address(client);
        let outcome = self.transport.with_endpoint(addr, |node, transport| match node {
            Node::Client(c) => Some(f(c, transport)),
            Node::Replica(_) => None,
        });
        match outcome.flatten() {
            Some(result) => result,
            None => panic!("{client} is not a registered client"),
        }
    }

    // ------------------------------------------------------------------------
    // Running
    // ------------------------------------------------------------------------

    /// Runs the transport with the cluster's run configuration.
    pub fn run(&mut self) -> RunSummary {
        let sim = self.sim.clone();
        self.run_with(&sim)
    }

    pub fn run_with(&mut self, sim: &SimConfig) -> RunSummary {
        self.transport.run(sim)
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn transport(&self) -> &SimTransport<Node<A>> {
        &self.transport
    }

    /// Direct access for filters, timers, and sessions.
    pub fn transport_mut(&mut self) -> &mut SimTransport<Node<A>> {
        &mut self.transport
    }

    pub fn replica_address(&self, id: ReplicaId) -> SimAddress {
        self.replicas[id.as_index()]
    }

    /// # Panics
    ///
    /// Panics if `client` was never added.
    pub fn client_address(&self, client: ClientId) -> SimAddress {
        match self.clients.get(&client) {
            Some(addr) => *addr,
            None => panic!("{client} is not a registered client"),
        }
    }

    pub fn replica(&self, id: ReplicaId) -> &PbftReplica<A> {
        match self.transport.endpoint(self.replica_address(id)) {
            Some(Node::Replica(replica)) => replica,
            _ => panic!("{id} is not a replica of this cluster"),
        }
    }

    pub fn replica_mut(&mut self, id: ReplicaId) -> &mut PbftReplica<A> {
        let addr = self.replica_address(id);
        match self.transport.endpoint_mut(addr) {
            Some(Node::Replica(replica)) => replica,
            _ => panic!("{id} is not a replica of this cluster"),
        }
    }

    pub fn replicas(&self) -> impl Iterator<Item = &PbftReplica<A>> {
        self.config.replicas().map(|id| self.replica(id))
    }

    pub fn client(&self, client: ClientId) -> &PbftClient {
        match self.transport.endpoint(self.client_address(client)) {
            Some(Node::Client(c)) => c,
            _ => panic!("{client} is not a registered client"),
        }
    }
}

/// Maps the `[simulation]` section onto a run configuration.
pub fn sim_config(section: &SimulationSection) -> SimConfig {
    let base = match section.mode {
        SimulationMode::UntilIdle => SimConfig::until_idle(),
        SimulationMode::Continuous => SimConfig::continuous(),
    };
    match section.max_steps {
        0 => base,
        max => base.with_max_steps(max),
    }
}
