//! End-to-end scenarios on a full cluster.

use bftsim::sim::filters;
use bftsim::telemetry::{init_test_from_config, init_test_tracing};
use bftsim::{
    AppReplica, BftsimConfig, ClientId, Cluster, ClusterConfig, FilterId, OpNumber, OpStatus,
    ReplicaId, RequestId, SimConfig, StopReason, tags,
};
use bytes::Bytes;
use test_case::test_case;

#[derive(Debug, Default)]
struct TestApp {
    ordered: Vec<Bytes>,
    unlogged: usize,
}

impl AppReplica for TestApp {
    fn replica_upcall(&mut self, _op: OpNumber, request: &[u8]) -> Bytes {
        self.ordered.push(Bytes::copy_from_slice(request));
        Bytes::from(format!("reply: {}", String::from_utf8_lossy(request)))
    }

    fn unlogged_upcall(&mut self, request: &[u8]) -> Bytes {
        self.unlogged += 1;
        Bytes::from(format!("unlreply: {}", String::from_utf8_lossy(request)))
    }
}

const CLIENT: ClientId = ClientId::new(1);

fn cluster(f: usize) -> Cluster<TestApp> {
    init_test_tracing("warn");
    let mut cluster = Cluster::signed(
        ClusterConfig::localhost(f, 12345),
        SimConfig::until_idle(),
        |_| TestApp::default(),
    );
    cluster.add_client(CLIENT);
    cluster
}

// ============================================================================
// Basic operation
// ============================================================================

#[test]
fn one_op() {
    let mut cluster = cluster(0);
    cluster.invoke(CLIENT, "test").expect("invoke");
    let summary = cluster.run();

    assert_eq!(summary.stop_reason, StopReason::Idle);
    assert_eq!(
        cluster.client(CLIENT).last_reply(),
        Some(&Bytes::from_static(b"reply: test"))
    );
}

#[test]
fn unlogged() {
    let mut cluster = cluster(0);
    cluster
        .invoke_unlogged(CLIENT, ReplicaId::new(0), "test2")
        .expect("invoke");
    cluster.run();

    assert_eq!(
        cluster.client(CLIENT).last_reply(),
        Some(&Bytes::from_static(b"unlreply: test2"))
    );
    let app = cluster.replica(ReplicaId::new(0)).app();
    assert!(app.ordered.is_empty());
    assert_eq!(app.unlogged, 1);
}

#[test_case(1 ; "four replicas")]
#[test_case(2 ; "seven replicas")]
fn every_replica_executes(f: usize) {
    let mut cluster = cluster(f);
    for op in ["a", "b", "c"] {
        cluster.invoke(CLIENT, op).expect("invoke");
        cluster.run();
    }

    let replies: Vec<_> = cluster
        .client(CLIENT)
        .completed()
        .iter()
        .map(|done| done.reply.clone())
        .collect();
    assert_eq!(replies, ["reply: a", "reply: b", "reply: c"].map(Bytes::from));

    let reference = cluster.replica(ReplicaId::new(0)).executed_log().to_vec();
    assert_eq!(reference.len(), 3);
    for replica in cluster.replicas() {
        assert_eq!(replica.executed_log(), reference.as_slice());
        assert_eq!(replica.app().ordered.len(), 3);
    }
}

// ============================================================================
// Faults
// ============================================================================

#[test_case(1 ; "f=1")]
#[test_case(2 ; "f=2")]
fn progress_with_f_silent_backups(f: usize) {
    let mut cluster = cluster(f);
    let n = cluster.config().n() as u32;
    let silent: Vec<_> = (n - f as u32..n).map(ReplicaId::new).collect();
    for (i, id) in silent.iter().enumerate() {
        let addr = cluster.replica_address(*id);
        cluster
            .transport_mut()
            .add_filter(FilterId(i as u32), filters::isolate(addr));
    }

    cluster.invoke(CLIENT, "test").expect("invoke");
    cluster.run();

    assert_eq!(
        cluster.client(CLIENT).last_reply(),
        Some(&Bytes::from_static(b"reply: test"))
    );
    for id in cluster.config().replicas() {
        let expected = if silent.contains(&id) {
            OpNumber::ZERO
        } else {
            OpNumber::new(1)
        };
        assert_eq!(cluster.replica(id).last_executed(), expected, "{id}");
    }
}

/// Several clients over several rounds, `f` backups cut off and every
/// remaining message randomly delayed. Every live replica must execute the
/// same gap-free sequence, each request exactly once.
#[test_case(1 ; "f=1")]
#[test_case(2 ; "f=2")]
fn live_replicas_agree_under_random_delay(f: usize) {
    const ROUNDS: u64 = 4;
    let clients: Vec<ClientId> = (1..=3).map(ClientId::new).collect();

    for seed in 0..8u64 {
        init_test_tracing("warn");
        let mut cluster = Cluster::signed(
            ClusterConfig::localhost(f, 12345),
            SimConfig::until_idle(),
            |_| TestApp::default(),
        );
        for client in &clients {
            cluster.add_client(*client);
        }

        let n = cluster.config().n() as u32;
        let silent: Vec<_> = (n - f as u32..n).map(ReplicaId::new).collect();
        for (i, id) in silent.iter().enumerate() {
            let addr = cluster.replica_address(*id);
            cluster
                .transport_mut()
                .add_filter(FilterId(i as u32), filters::isolate(addr));
        }
        cluster
            .transport_mut()
            .add_filter(FilterId(100), filters::random_delay(seed, 20));

        for round in 0..ROUNDS {
            for client in &clients {
                cluster
                    .invoke(*client, format!("{client}-{round}"))
                    .expect("invoke");
            }
            let summary = cluster.run();
            assert_eq!(summary.stop_reason, StopReason::Idle, "seed {seed}");
        }

        let total = ROUNDS as usize * clients.len();
        for client in &clients {
            let done = cluster.client(*client).completed();
            assert_eq!(done.len(), ROUNDS as usize, "seed {seed}, {client}");
            assert!(cluster.client(*client).pending().is_none(), "seed {seed}, {client}");
        }

        let live: Vec<_> = cluster
            .config()
            .replicas()
            .filter(|id| !silent.contains(id))
            .collect();
        let reference = cluster.replica(live[0]).executed_log().to_vec();
        assert_eq!(reference.len(), total, "seed {seed}");

        let ops: Vec<u64> = reference.iter().map(|entry| entry.op.as_u64()).collect();
        assert_eq!(ops, (1..=total as u64).collect::<Vec<_>>(), "seed {seed}");
        assert!(reference.iter().all(|entry| !entry.replayed), "seed {seed}");

        let mut requests: Vec<_> = reference
            .iter()
            .map(|entry| (entry.client_id, entry.request_id))
            .collect();
        requests.sort();
        requests.dedup();
        assert_eq!(requests.len(), total, "seed {seed}: a request executed twice");
        for client in &clients {
            for request in 1..=ROUNDS {
                assert!(
                    requests.contains(&(*client, RequestId::new(request))),
                    "seed {seed}: {client} request {request} never executed"
                );
            }
        }

        for id in &live {
            assert_eq!(
                cluster.replica(*id).executed_log(),
                reference.as_slice(),
                "seed {seed}: {id} diverged"
            );
            assert_eq!(cluster.replica(*id).app().ordered.len(), total, "seed {seed}");
        }
        for id in &silent {
            assert_eq!(cluster.replica(*id).last_executed(), OpNumber::ZERO, "seed {seed}");
        }
    }
}

#[test]
fn no_progress_without_the_primary() {
    let mut cluster = cluster(1);
    let primary = cluster.replica_address(ReplicaId::new(0));
    cluster
        .transport_mut()
        .add_filter(FilterId(0), filters::isolate(primary));

    cluster.invoke(CLIENT, "test").expect("invoke");
    cluster.run();

    assert_eq!(
        cluster.client(CLIENT).pending().map(|p| p.request_id),
        Some(RequestId::new(1))
    );
    for replica in cluster.replicas() {
        assert_eq!(replica.last_executed(), OpNumber::ZERO);
    }
}

#[test]
fn nothing_executes_without_commits() {
    let mut cluster = cluster(1);
    cluster
        .transport_mut()
        .add_filter(FilterId(0), filters::drop_message_type(tags::COMMIT));

    cluster.invoke(CLIENT, "test").expect("invoke");
    cluster.run();

    for replica in cluster.replicas() {
        assert_eq!(replica.status(OpNumber::new(1)), OpStatus::Prepared);
        assert_eq!(replica.last_executed(), OpNumber::ZERO);
    }

    assert!(cluster.client(CLIENT).pending().is_some());
}

#[test]
fn delayed_commits_advance_virtual_time() {
    let mut cluster = cluster(1);
    cluster
        .transport_mut()
        .add_filter(FilterId(0), filters::delay_message_type(tags::COMMIT, 50));

    cluster.invoke(CLIENT, "test").expect("invoke");
    let summary = cluster.run();

    assert_eq!(summary.final_time_ms, 50);
    assert!(summary.timers_fired > 0);
    assert_eq!(
        cluster.client(CLIENT).last_reply(),
        Some(&Bytes::from_static(b"reply: test"))
    );
}

#[test]
fn resubmission_is_answered_from_the_client_table() {
    let mut cluster = cluster(1);
    cluster.invoke(CLIENT, "test").expect("invoke");
    cluster.run();
    cluster.resend(CLIENT).expect("resend");
    cluster.run();

    let completed = cluster.client(CLIENT).completed();
    assert_eq!(completed.len(), 2);
    assert_eq!(completed[0].reply, completed[1].reply);
    for replica in cluster.replicas() {
        assert_eq!(replica.app().ordered.len(), 1);
    }
}

#[test]
fn step_limit_cuts_a_run_short() {
    let mut cluster = cluster(1);
    cluster.invoke(CLIENT, "test").expect("invoke");
    let summary = cluster.run_with(&SimConfig::until_idle().with_max_steps(0));

    assert_eq!(summary.stop_reason, StopReason::StepLimit);
    assert!(cluster.transport().has_work());
    assert!(cluster.client(CLIENT).pending().is_some());
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn cluster_from_loaded_configuration() {
    let config: BftsimConfig = bftsim::config::from_toml_str(
        r#"
        [cluster]
        f = 1
        replicas = [
            { host = "node-a", port = "7000" },
            { host = "node-b", port = "7000" },
            { host = "node-c", port = "7000" },
            { host = "node-d", port = "7000" },
        ]

        [simulation]
        mode = "until-idle"
        max_steps = 1000

        [logging]
        filter = "warn"
        "#,
    )
    .expect("parses");
    init_test_from_config(&config);

    let mut cluster = Cluster::from_config(&config, |_| TestApp::default()).expect("valid");
    cluster.add_client(CLIENT);
    cluster.invoke(CLIENT, "test").expect("invoke");
    let summary = cluster.run();

    assert_eq!(summary.stop_reason, StopReason::Idle);
    assert_eq!(cluster.config().n(), 4);
    assert_eq!(cluster.client(CLIENT).completed().len(), 1);
}

#[test]
fn undersized_configuration_is_rejected() {
    let config: BftsimConfig = bftsim::config::from_toml_str(
        r#"
        [cluster]
        f = 1
        replicas = [{ host = "localhost", port = "7000" }]
        "#,
    )
    .expect("parses");

    assert!(Cluster::from_config(&config, |_| TestApp::default()).is_err());
}
