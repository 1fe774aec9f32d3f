//! Replica and client behaviour over the simulated transport.

use std::sync::Arc;

use bftsim_crypto::{NopSigner, Signer, Verifier, deterministic_keyring};
use bftsim_pbft::{
    AppReplica, ClientError, Commit, OpStatus, PbftClient, PbftMessage, PbftReplica, PrePrepare,
    Prepare, Request, Signed, tags,
};
use bftsim_sim::{
    EndpointRole, MultiStamp, SimAddress, SimTransport, Transport, TransportReceiver,
};
use bftsim_types::{ClientId, ClusterConfig, OpNumber, ReplicaId, RequestId, ViewNumber};
use bytes::Bytes;

// ============================================================================
// Harness
// ============================================================================

#[derive(Debug, Default)]
struct EchoApp {
    ordered: Vec<(OpNumber, Bytes)>,
    unlogged: usize,
}

impl AppReplica for EchoApp {
    fn replica_upcall(&mut self, op: OpNumber, request: &[u8]) -> Bytes {
        self.ordered.push((op, Bytes::copy_from_slice(request)));
        Bytes::from(format!("reply: {}", String::from_utf8_lossy(request)))
    }

    fn unlogged_upcall(&mut self, request: &[u8]) -> Bytes {
        self.unlogged += 1;
        Bytes::from(format!("unlreply: {}", String::from_utf8_lossy(request)))
    }
}

/// Stands in for a replica and records everything sent to it.
#[derive(Debug, Default)]
struct Stub {
    received: Vec<PbftMessage>,
}

enum Node {
    Replica(PbftReplica<EchoApp>),
    Client(PbftClient),
    Stub(Stub),
}

impl TransportReceiver for Node {
    fn on_registered(&mut self, addr: SimAddress) {
        match self {
            Node::Replica(r) => r.on_registered(addr),
            Node::Client(c) => c.on_registered(addr),
            Node::Stub(_) => {}
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
            Node::Replica(r) => r.receive(transport, src, msg_type, payload, stamp),
            Node::Client(c) => c.receive(transport, src, msg_type, payload, stamp),
            Node::Stub(p) => p
                .received
                .push(PbftMessage::decode(msg_type, payload).expect("well-formed message")),
        }
    }
}

struct Harness {
    config: ClusterConfig,
    transport: SimTransport<Node>,
    replicas: Vec<SimAddress>,
}

impl Harness {
    /// `3f + 1` replicas; indices in `stubs` are registered as stubs.
    fn new(f: usize, stubs: &[u32]) -> Self {
        let config = ClusterConfig::localhost(f, 12345);
        Self::with_keys(config, stubs, None)
    }

    fn with_keys(
        config: ClusterConfig,
        stubs: &[u32],
        keys: Option<(Vec<Arc<dyn Signer>>, Arc<dyn Verifier>)>,
    ) -> Self {
        let mut transport = SimTransport::new();
        let mut replicas = Vec::new();
        for id in config.replicas() {
            let node = if stubs.contains(&id.as_u32()) {
                Node::Stub(Stub::default())
            } else {
                let replica = match &keys {
                    Some((signers, verifier)) => PbftReplica::new(
                        config.clone(),
                        id,
                        EchoApp::default(),
                        Arc::clone(&signers[id.as_index()]),
                        Arc::clone(verifier),
                    ),
                    None => PbftReplica::unsigned(config.clone(), id, EchoApp::default()),
                };
                Node::Replica(replica)
            };
            let addr = transport.register(
                node,
                config.replica_address(id).cloned(),
                EndpointRole::replica(config.group(), id),
            );
            replicas.push(addr);
        }
        Self {
            config,
            transport,
            replicas,
        }
    }

    fn add_client(&mut self, id: u64) -> SimAddress {
        let client = PbftClient::new(self.config.clone(), ClientId::new(id));
        self.transport
            .register(Node::Client(client), None, EndpointRole::Client)
    }

    fn replica(&self, index: u32) -> &PbftReplica<EchoApp> {
        match self.transport.endpoint(self.replicas[index as usize]) {
            Some(Node::Replica(r)) => r,
            _ => panic!("replica {index} is not a replica"),
        }
    }

    fn stub(&self, index: u32) -> &Stub {
        match self.transport.endpoint(self.replicas[index as usize]) {
            Some(Node::Stub(p)) => p,
            _ => panic!("replica {index} is not a stub"),
        }
    }

    fn client(&self, addr: SimAddress) -> &PbftClient {
        match self.transport.endpoint(addr) {
            Some(Node::Client(c)) => c,
            _ => panic!("{addr} is not a client"),
        }
    }

    fn with_client<R>(
        &mut self,
        addr: SimAddress,
        f: impl FnOnce(&mut PbftClient, &mut dyn Transport) -> R,
    ) -> R {
        self.transport
            .with_endpoint(addr, |node, transport| match node {
                Node::Client(c) => f(c, transport),
                _ => panic!("{addr} is not a client"),
            })
            .expect("registered client")
    }

    /// Sends `msg` as if it came from replica `from`.
    fn inject(&mut self, from: u32, to: u32, msg: PbftMessage) {
        let payload = msg.encode().expect("encodes");
        let src = self.replicas[from as usize];
        let dst = self.replicas[to as usize];
        self.transport.send(src, dst, msg.type_tag(), payload);
    }
}

fn request(client: u64, request_id: u64, op: &'static [u8]) -> Request {
    Request {
        client_id: ClientId::new(client),
        request_id: RequestId::new(request_id),
        op: Bytes::from_static(op),
    }
}

fn pre_prepare(view: u64, op: u64, primary: u32, request: Request) -> PbftMessage {
    let body = PrePrepare {
        view: ViewNumber::new(view),
        op: OpNumber::new(op),
        digest: request.digest(),
        replica: ReplicaId::new(primary),
        request,
    };
    PbftMessage::PrePrepare(Signed::sign(body, &NopSigner).expect("signs"))
}

fn prepare(op: u64, replica: u32, request: &Request) -> PbftMessage {
    let body = Prepare {
        view: ViewNumber::ZERO,
        op: OpNumber::new(op),
        digest: request.digest(),
        replica: ReplicaId::new(replica),
    };
    PbftMessage::Prepare(Signed::sign(body, &NopSigner).expect("signs"))
}

fn commit(op: u64, replica: u32, request: &Request) -> PbftMessage {
    let body = Commit {
        view: ViewNumber::ZERO,
        op: OpNumber::new(op),
        digest: request.digest(),
        replica: ReplicaId::new(replica),
    };
    PbftMessage::Commit(Signed::sign(body, &NopSigner).expect("signs"))
}

fn count(messages: &[PbftMessage], tag: &str) -> usize {
    messages.iter().filter(|m| m.type_tag() == tag).count()
}

// ============================================================================
// End to end
// ============================================================================

#[test]
fn single_replica_executes_and_replies() {
    let mut h = Harness::new(0, &[]);
    let client = h.add_client(1);

    h.with_client(client, |c, t| c.invoke(t, "test")).expect("invoke");
    h.transport.run_until_idle();

    assert_eq!(h.client(client).last_reply(), Some(&Bytes::from_static(b"reply: test")));
    assert!(h.client(client).pending().is_none());
    assert_eq!(h.replica(0).last_executed(), OpNumber::new(1));
}

#[test]
fn four_replicas_agree_and_client_completes() {
    let mut h = Harness::new(1, &[]);
    let client = h.add_client(1);

    h.with_client(client, |c, t| c.invoke(t, "test")).expect("invoke");
    h.transport.run_until_idle();

    assert_eq!(h.client(client).last_reply(), Some(&Bytes::from_static(b"reply: test")));
    for i in 0..4 {
        let replica = h.replica(i);
        assert_eq!(replica.last_executed(), OpNumber::new(1));
        assert_eq!(replica.app().ordered.len(), 1, "replica {i} applied once");
        assert_eq!(replica.status(OpNumber::new(1)), OpStatus::Executed);
        let entry = replica.client_entry(ClientId::new(1)).expect("client table entry");
        assert_eq!(entry.last_request_id, RequestId::new(1));
    }
}

#[test]
fn unlogged_request_bypasses_ordering() {
    let mut h = Harness::new(1, &[]);
    let client = h.add_client(1);

    h.with_client(client, |c, t| c.invoke_unlogged(t, ReplicaId::new(2), "test2"))
        .expect("invoke");
    h.transport.run_until_idle();

    let done = h.client(client).completed();
    assert_eq!(done.len(), 1);
    assert!(done[0].unlogged);
    assert_eq!(done[0].reply, Bytes::from_static(b"unlreply: test2"));
    assert_eq!(h.replica(2).app().unlogged, 1);
    for i in 0..4 {
        assert!(h.replica(i).app().ordered.is_empty());
        assert_eq!(h.replica(i).last_executed(), OpNumber::ZERO);
    }
}

#[test]
fn replicas_execute_in_the_same_order() {
    let mut h = Harness::new(1, &[]);
    let a = h.add_client(1);
    let b = h.add_client(2);

    for op in ["x", "y", "z"] {
        h.with_client(a, |c, t| c.invoke(t, op)).expect("invoke a");
        h.with_client(b, |c, t| c.invoke(t, op)).expect("invoke b");
        h.transport.run_until_idle();
    }

    let reference: Vec<_> = h.replica(0).executed_log().to_vec();
    assert_eq!(reference.len(), 6);
    for (i, entry) in reference.iter().enumerate() {
        assert_eq!(entry.op, OpNumber::new(i as u64 + 1));
    }
    for i in 1..4 {
        assert_eq!(h.replica(i).executed_log(), reference.as_slice());
    }
    assert_eq!(h.client(a).completed().len(), 3);
    assert_eq!(h.client(b).completed().len(), 3);
}

#[test]
fn client_rejects_a_second_outstanding_request() {
    let mut h = Harness::new(1, &[]);
    let client = h.add_client(1);

    h.with_client(client, |c, t| c.invoke(t, "one")).expect("invoke");
    let err = h.with_client(client, |c, t| c.invoke(t, "two")).unwrap_err();
    assert!(matches!(err, ClientError::RequestPending(id) if id == RequestId::new(1)));

    let err = h
        .with_client(client, |c, t| c.invoke_unlogged(t, ReplicaId::new(9), "x"))
        .unwrap_err();
    assert!(matches!(err, ClientError::RequestPending(_)));
}

#[test]
fn unknown_replica_is_rejected() {
    let mut h = Harness::new(1, &[]);
    let client = h.add_client(1);

    let err = h
        .with_client(client, |c, t| c.invoke_unlogged(t, ReplicaId::new(9), "x"))
        .unwrap_err();
    assert!(matches!(err, ClientError::UnknownReplica(_)));
    assert!(h.client(client).pending().is_none());
}

#[test]
fn unresolved_unlogged_target_leaves_the_client_free() {
    let config = ClusterConfig::localhost(1, 12345);
    let mut transport: SimTransport<Node> = SimTransport::new();
    let client = transport.register(
        Node::Client(PbftClient::new(config, ClientId::new(1))),
        None,
        EndpointRole::Client,
    );
    fn client_of(node: &mut Node) -> &mut PbftClient {
        match node {
            Node::Client(c) => c,
            _ => panic!("not a client"),
        }
    }

    let err = transport
        .with_endpoint(client, |node, t| client_of(node).invoke_unlogged(t, ReplicaId::new(0), "x"))
        .expect("registered client")
        .unwrap_err();
    assert!(matches!(err, ClientError::Unresolved(id) if id == ReplicaId::new(0)));
    assert!(transport.endpoint(client).is_some_and(|node| match node {
        Node::Client(c) => c.pending().is_none(),
        _ => false,
    }));

    let id = transport
        .with_endpoint(client, |node, t| client_of(node).invoke(t, "y"))
        .expect("registered client")
        .expect("client accepts the next request");
    assert_eq!(id, RequestId::new(1));

    let stats = transport.stats();
    assert_eq!(stats.messages_sent, 0);
}

#[test]
fn resubmission_replays_the_cached_reply() {
    let mut h = Harness::new(1, &[]);
    let client = h.add_client(1);

    h.with_client(client, |c, t| c.invoke(t, "test")).expect("invoke");
    h.transport.run_until_idle();
    let id = h.with_client(client, |c, t| c.resend_last(t)).expect("resend");
    h.transport.run_until_idle();

    assert_eq!(id, RequestId::new(1));
    let done = h.client(client).completed();
    assert_eq!(done.len(), 2);
    assert_eq!(done[0].reply, done[1].reply);
    for i in 0..4 {
        assert_eq!(h.replica(i).app().ordered.len(), 1, "replica {i} applied once");
        assert_eq!(h.replica(i).last_executed(), OpNumber::new(1));
    }
}

#[test]
fn nothing_to_resend_before_first_request() {
    let mut h = Harness::new(0, &[]);
    let client = h.add_client(1);
    let err = h.with_client(client, |c, t| c.resend_last(t)).unwrap_err();
    assert!(matches!(err, ClientError::NothingToResend));
}

// ============================================================================
// Single replica against stubs
// ============================================================================

#[test]
fn backup_ignores_client_requests() {
    let mut h = Harness::new(1, &[0, 2, 3]);
    let client = h.add_client(1);
    let payload = PbftMessage::Request(request(1, 1, b"op")).encode().expect("encodes");
    let backup = h.replicas[1];
    h.transport.send(client, backup, tags::REQUEST, payload);
    h.transport.run_until_idle();

    assert!(h.replica(1).pre_prepare(OpNumber::new(1)).is_none());
    assert!(h.stub(0).received.is_empty());
}

#[test]
fn backup_prepares_on_pre_prepare() {
    let mut h = Harness::new(1, &[0, 2, 3]);
    let req = request(1, 1, b"op");
    h.inject(0, 1, pre_prepare(0, 1, 0, req));
    h.transport.run_until_idle();

    assert_eq!(h.replica(1).status(OpNumber::new(1)), OpStatus::PrePrepared);
    for stub in [0, 2, 3] {
        assert_eq!(count(&h.stub(stub).received, tags::PREPARE), 1);
    }
}

#[test]
fn invalid_pre_prepares_are_ignored() {
    let mut h = Harness::new(1, &[0, 2, 3]);

    // Wrong view.
    h.inject(0, 1, pre_prepare(1, 1, 0, request(1, 1, b"a")));
    // Not the primary of view 0.
    h.inject(2, 1, pre_prepare(0, 1, 2, request(1, 1, b"a")));
    // Digest does not match the carried request.
    let mut forged = PrePrepare {
        view: ViewNumber::ZERO,
        op: OpNumber::new(1),
        digest: request(1, 1, b"a").digest(),
        replica: ReplicaId::new(0),
        request: request(1, 1, b"b"),
    };
    h.inject(0, 1, PbftMessage::PrePrepare(Signed::sign(forged.clone(), &NopSigner).expect("signs")));
    h.transport.run_until_idle();

    assert_eq!(h.replica(1).status(OpNumber::new(1)), OpStatus::Idle);
    assert_eq!(count(&h.stub(0).received, tags::PREPARE), 0);

    // A valid one is accepted, a conflicting one afterwards is not.
    forged.digest = forged.request.digest();
    h.inject(0, 1, PbftMessage::PrePrepare(Signed::sign(forged, &NopSigner).expect("signs")));
    h.inject(0, 1, pre_prepare(0, 1, 0, request(1, 1, b"c")));
    h.transport.run_until_idle();

    let logged = h.replica(1).pre_prepare(OpNumber::new(1)).expect("logged");
    assert_eq!(logged.request.op, Bytes::from_static(b"b"));
    assert_eq!(count(&h.stub(0).received, tags::PREPARE), 1);
}

#[test]
fn prepares_from_the_primary_or_with_other_digests_do_not_count() {
    let mut h = Harness::new(1, &[0, 2, 3]);
    let req = request(1, 1, b"op");
    let other = request(1, 1, b"other");

    h.inject(0, 1, pre_prepare(0, 1, 0, req.clone()));
    h.inject(0, 1, prepare(1, 0, &req));
    h.inject(2, 1, prepare(1, 2, &other));
    h.transport.run_until_idle();
    assert_eq!(h.replica(1).status(OpNumber::new(1)), OpStatus::PrePrepared);

    h.inject(3, 1, prepare(1, 3, &req));
    h.transport.run_until_idle();
    assert_eq!(h.replica(1).status(OpNumber::new(1)), OpStatus::Prepared);
    assert_eq!(count(&h.stub(0).received, tags::COMMIT), 1);
}

#[test]
fn prepares_before_pre_prepare_are_kept() {
    let mut h = Harness::new(1, &[0, 2, 3]);
    let req = request(1, 1, b"op");

    h.inject(2, 1, prepare(1, 2, &req));
    h.transport.run_until_idle();
    assert_eq!(h.replica(1).status(OpNumber::new(1)), OpStatus::Idle);

    h.inject(0, 1, pre_prepare(0, 1, 0, req));
    h.transport.run_until_idle();
    assert_eq!(h.replica(1).status(OpNumber::new(1)), OpStatus::Prepared);
}

#[test]
fn later_sequence_number_waits_for_earlier_one() {
    let mut h = Harness::new(1, &[0, 2, 3]);
    let first = request(7, 1, b"a");
    let second = request(8, 1, b"b");

    for (op, req) in [(1, &first), (2, &second)] {
        h.inject(0, 1, pre_prepare(0, op, 0, req.clone()));
        h.inject(2, 1, prepare(op, 2, req));
    }
    for from in [0, 2] {
        h.inject(from, 1, commit(2, from, &second));
    }
    h.transport.run_until_idle();

    let replica = h.replica(1);
    assert_eq!(replica.status(OpNumber::new(1)), OpStatus::Prepared);
    assert_eq!(replica.status(OpNumber::new(2)), OpStatus::CommittedLocal);
    assert_eq!(replica.last_executed(), OpNumber::ZERO);

    for from in [0, 2] {
        h.inject(from, 1, commit(1, from, &first));
    }
    h.transport.run_until_idle();

    let replica = h.replica(1);
    assert_eq!(replica.last_executed(), OpNumber::new(2));
    let ops: Vec<_> = replica.executed_log().iter().map(|e| e.op).collect();
    assert_eq!(ops, vec![OpNumber::new(1), OpNumber::new(2)]);
    let applied: Vec<_> = replica.app().ordered.iter().map(|(_, op)| op.clone()).collect();
    assert_eq!(applied, vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
}

#[test]
fn duplicate_request_in_the_log_is_replayed_not_applied() {
    let mut h = Harness::new(1, &[0, 2, 3]);
    let req = request(1, 1, b"op");

    for op in [1, 2] {
        h.inject(0, 1, pre_prepare(0, op, 0, req.clone()));
        h.inject(2, 1, prepare(op, 2, &req));
        for from in [0, 2] {
            h.inject(from, 1, commit(op, from, &req));
        }
    }
    h.transport.run_until_idle();

    let replica = h.replica(1);
    assert_eq!(replica.last_executed(), OpNumber::new(2));
    assert_eq!(replica.app().ordered.len(), 1);
    let replayed: Vec<_> = replica.executed_log().iter().map(|e| e.replayed).collect();
    assert_eq!(replayed, vec![false, true]);
}

#[test]
fn views_only_move_forward() {
    let mut h = Harness::new(1, &[0, 2, 3]);
    let req = request(1, 1, b"op");
    h.inject(0, 1, pre_prepare(0, 1, 0, req.clone()));
    h.inject(2, 1, prepare(1, 2, &req));
    h.transport.run_until_idle();
    assert_eq!(h.replica(1).status(OpNumber::new(1)), OpStatus::Prepared);

    let addr = h.replicas[1];
    h.transport.with_endpoint(addr, |node, _| {
        let Node::Replica(replica) = node else {
            panic!("replica 1 is a replica");
        };
        replica.enter_view(ViewNumber::new(1));
        replica.clear_quorums();
        assert!(replica.is_primary());
        // The old view's PrePrepare no longer anchors votes.
        assert_eq!(replica.status(OpNumber::new(1)), OpStatus::Idle);
    });
}

#[test]
#[should_panic(expected = "cannot move back")]
fn entering_an_older_view_panics() {
    let config = ClusterConfig::localhost(1, 12345);
    let mut replica = PbftReplica::unsigned(config, ReplicaId::new(0), EchoApp::default());
    replica.enter_view(ViewNumber::new(2));
    replica.enter_view(ViewNumber::new(1));
}

// ============================================================================
// Signatures
// ============================================================================

#[test]
fn forged_prepares_are_dropped() {
    let config = ClusterConfig::localhost(1, 12345);
    let (signers, verifier) = deterministic_keyring(config.n());
    let mut h = Harness::with_keys(
        config,
        &[0, 2, 3],
        Some((signers.clone(), Arc::clone(&verifier))),
    );
    let req = request(1, 1, b"op");

    let pp = PrePrepare {
        view: ViewNumber::ZERO,
        op: OpNumber::new(1),
        digest: req.digest(),
        replica: ReplicaId::new(0),
        request: req.clone(),
    };
    h.inject(0, 1, PbftMessage::PrePrepare(Signed::sign(pp, signers[0].as_ref()).expect("signs")));

    // Claims to be replica 2 but is signed with replica 3's key.
    let forged = Prepare {
        view: ViewNumber::ZERO,
        op: OpNumber::new(1),
        digest: req.digest(),
        replica: ReplicaId::new(2),
    };
    h.inject(3, 1, PbftMessage::Prepare(Signed::sign(forged.clone(), signers[3].as_ref()).expect("signs")));
    h.transport.run_until_idle();
    assert_eq!(h.replica(1).status(OpNumber::new(1)), OpStatus::PrePrepared);

    h.inject(2, 1, PbftMessage::Prepare(Signed::sign(forged, signers[2].as_ref()).expect("signs")));
    h.transport.run_until_idle();
    assert_eq!(h.replica(1).status(OpNumber::new(1)), OpStatus::Prepared);

    // Outgoing votes carry valid signatures.
    let Some(PbftMessage::Commit(signed)) = h
        .stub(0)
        .received
        .iter()
        .find(|m| m.type_tag() == tags::COMMIT)
    else {
        panic!("replica 1 broadcast a commit");
    };
    assert!(signed.verify(verifier.as_ref()));
}

#[test]
#[should_panic(expected = "is not part of")]
fn replica_outside_the_configuration_panics() {
    let config = ClusterConfig::localhost(0, 12345);
    let _ = PbftReplica::unsigned(config, ReplicaId::new(3), EchoApp::default());
}
