//! The simulated network and its run loop.
//!
//! [`SimTransport`] owns the registered endpoints and a [`SimNetwork`]. The
//! two are separate fields so that an endpoint handling a delivery can be
//! handed the network as `&mut dyn Transport` while the transport still
//! holds the endpoint map.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bftsim_types::{GroupId, ReplicaAddress};
use bytes::Bytes;

use crate::filter::FilterChain;
use crate::timer::TimerAction;
use crate::{
    EndpointRole, Filter, FilterId, FilterInput, MultiStamp, NetworkStats, QueuedMessage,
    RunMode, RunSummary, SendResult, SimAddress, SimConfig, StopReason, TimerCallback,
    TimerHandle, TimerId, Transport, TransportError, TransportReceiver,
};

// ============================================================================
// Network State
// ============================================================================

/// Everything about the network except the endpoints themselves.
#[derive(Debug)]
pub struct SimNetwork {
    queue: VecDeque<QueuedMessage>,
    filters: FilterChain,
    roles: BTreeMap<SimAddress, EndpointRole>,
    addr_lookup: BTreeMap<ReplicaAddress, SimAddress>,
    /// Per-group ordered-multicast counters for the current session.
    counters: BTreeMap<GroupId, u64>,
    session: u64,
    next_addr: u32,
    timers: TimerHandle,
    running: Arc<AtomicBool>,
    stats: NetworkStats,
}

impl SimNetwork {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            filters: FilterChain::default(),
            roles: BTreeMap::new(),
            addr_lookup: BTreeMap::new(),
            counters: BTreeMap::new(),
            session: 0,
            next_addr: 0,
            timers: TimerHandle::new(),
            running: Arc::new(AtomicBool::new(false)),
            stats: NetworkStats::default(),
        }
    }

    fn role_of(&self, addr: SimAddress) -> EndpointRole {
        match self.roles.get(&addr) {
            Some(role) => *role,
            None => panic!("{addr} is not registered with this transport"),
        }
    }

    /// Runs the filters and queues or delays the message.
    fn dispatch(
        &mut self,
        src: SimAddress,
        dst: SimAddress,
        msg_type: &str,
        payload: Bytes,
        stamp: Option<MultiStamp>,
    ) -> SendResult {
        let src_role = self.role_of(src);
        let dst_role = self.role_of(dst);
        self.stats.messages_sent += 1;

        let mut delay_ms = 0;
        let input = FilterInput {
            src,
            src_role,
            dst,
            dst_role,
            msg_type,
            payload: &payload,
            stamp: stamp.as_ref(),
        };
        if let Some(filter) = self.filters.run(&input, &mut delay_ms) {
            tracing::debug!(%src, %dst, msg_type, %filter, "message dropped by filter");
            self.stats.messages_dropped += 1;
            return SendResult::Dropped;
        }

        let msg = QueuedMessage {
            dst,
            src,
            msg_type: msg_type.to_string(),
            payload,
            stamp,
        };
        if delay_ms == 0 {
            self.queue.push_back(msg);
            SendResult::Queued
        } else {
            self.stats.messages_delayed += 1;
            let deliver_at_ms = self.timers.now_ms().saturating_add(delay_ms);
            self.timers
                .schedule_action(delay_ms, TimerAction::Deliver(msg));
            SendResult::Delayed { deliver_at_ms }
        }
    }

    fn group_members(&self, group: GroupId) -> impl Iterator<Item = SimAddress> + '_ {
        self.roles
            .iter()
            .filter(move |(_, role)| role.group() == Some(group))
            .map(|(addr, _)| *addr)
    }
}

impl Transport for SimNetwork {
    fn send(
        &mut self,
        src: SimAddress,
        dst: SimAddress,
        msg_type: &str,
        payload: Bytes,
    ) -> SendResult {
        self.dispatch(src, dst, msg_type, payload, None)
    }

    fn ordered_multicast(
        &mut self,
        src: SimAddress,
        groups: &[GroupId],
        msg_type: &str,
        payload: Bytes,
    ) -> Result<MultiStamp, TransportError> {
        if groups.is_empty() {
            return Err(TransportError::NoGroups);
        }
        if let Some(group) = groups
            .iter()
            .find(|group| self.group_members(**group).next().is_none())
        {
            return Err(TransportError::UnknownGroup(*group));
        }

        let mut stamp = MultiStamp {
            session: self.session,
            seqnums: BTreeMap::new(),
        };
        for group in groups {
            let counter = self.counters.entry(*group).or_insert(0);
            *counter += 1;
            stamp.seqnums.insert(*group, *counter);
        }

        let recipients: Vec<SimAddress> = self
            .roles
            .iter()
            .filter(|(addr, role)| {
                **addr != src && role.group().is_some_and(|g| groups.contains(&g))
            })
            .map(|(addr, _)| *addr)
            .collect();

        self.stats.multicasts += 1;
        tracing::trace!(%src, msg_type, %stamp, recipients = recipients.len(), "ordered multicast");
        for dst in recipients {
            self.dispatch(src, dst, msg_type, payload.clone(), Some(stamp.clone()));
        }
        Ok(stamp)
    }

    fn lookup_address(&self, addr: &ReplicaAddress) -> Option<SimAddress> {
        let found = self.addr_lookup.get(addr).copied();
        if found.is_none() {
            tracing::warn!(address = %addr, "lookup of unregistered replica address");
        }
        found
    }

    fn timer(&mut self, delay_ms: u64, callback: TimerCallback) -> TimerId {
        self.timers
            .schedule_action(delay_ms, TimerAction::Callback(callback))
    }

    fn wake_after(&mut self, owner: SimAddress, delay_ms: u64) -> TimerId {
        self.timers.schedule_action(delay_ms, TimerAction::Wake(owner))
    }

    fn cancel_timer(&mut self, id: TimerId) -> bool {
        self.timers.cancel(id)
    }

    fn cancel_all_timers(&mut self) {
        self.timers.cancel_all();
    }

    fn now_ms(&self) -> u64 {
        self.timers.now_ms()
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

// ============================================================================
// Stop Handle
// ============================================================================

/// Ends a continuous run from outside the run loop.
#[derive(Debug, Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Simulated Transport
// ============================================================================

/// Work done by one [`SimTransport::step`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepOutcome {
    pub delivered: u64,
    pub timer_fired: bool,
}

impl StepOutcome {
    pub fn is_idle(&self) -> bool {
        self.delivered == 0 && !self.timer_fired
    }
}

/// Single-process discrete-event transport.
///
/// Generic over the endpoint type so harnesses can keep typed access to the
/// endpoints they registered; the default holds arbitrary boxed receivers.
pub struct SimTransport<E = Box<dyn TransportReceiver>> {
    endpoints: BTreeMap<SimAddress, E>,
    network: SimNetwork,
}

impl<E: TransportReceiver> SimTransport<E> {
    pub fn new() -> Self {
        Self {
            endpoints: BTreeMap::new(),
            network: SimNetwork::new(),
        }
    }

    /// Registers an endpoint and returns the address assigned to it.
    ///
    /// Replicas pass their configured address so peers can resolve it with
    /// [`Transport::lookup_address`].
    ///
    /// # Panics
    ///
    /// Panics if `address` is already registered.
    pub fn register(
        &mut self,
        mut endpoint: E,
        address: Option<ReplicaAddress>,
        role: EndpointRole,
    ) -> SimAddress {
        let addr = SimAddress::from_raw(self.network.next_addr);
        self.network.next_addr += 1;

        if let Some(address) = address {
            let previous = self.network.addr_lookup.insert(address.clone(), addr);
            assert!(previous.is_none(), "{address} registered twice");
        }
        self.network.roles.insert(addr, role);

        endpoint.on_registered(addr);
        self.endpoints.insert(addr, endpoint);
        tracing::debug!(%addr, %role, "endpoint registered");
        addr
    }

    pub fn endpoint(&self, addr: SimAddress) -> Option<&E> {
        self.endpoints.get(&addr)
    }

    pub fn endpoint_mut(&mut self, addr: SimAddress) -> Option<&mut E> {
        self.endpoints.get_mut(&addr)
    }

    pub fn endpoints(&self) -> impl Iterator<Item = (SimAddress, &E)> {
        self.endpoints.iter().map(|(addr, e)| (*addr, e))
    }

    /// Runs `f` with an endpoint and the transport it may send through.
    pub fn with_endpoint<R>(
        &mut self,
        addr: SimAddress,
        f: impl FnOnce(&mut E, &mut dyn Transport) -> R,
    ) -> Option<R> {
        let endpoint = self.endpoints.get_mut(&addr)?;
        Some(f(endpoint, &mut self.network as &mut dyn Transport))
    }

    pub fn role(&self, addr: SimAddress) -> Option<EndpointRole> {
        self.network.roles.get(&addr).copied()
    }

    // ------------------------------------------------------------------------
    // Fault injection
    // ------------------------------------------------------------------------

    pub fn add_filter(&mut self, id: FilterId, filter: impl Filter + 'static) {
        self.network.filters.add(id, Box::new(filter));
    }

    pub fn remove_filter(&mut self, id: FilterId) -> bool {
        self.network.filters.remove(id)
    }

    // ------------------------------------------------------------------------
    // Ordered multicast sessions
    // ------------------------------------------------------------------------

    /// Starts a new multicast session; every group counter restarts.
    pub fn session_change(&mut self) {
        self.network.session += 1;
        self.network.counters.clear();
        tracing::debug!(session = self.network.session, "multicast session changed");
    }

    pub fn session(&self) -> u64 {
        self.network.session
    }

    // ------------------------------------------------------------------------
    // Handles and introspection
    // ------------------------------------------------------------------------

    pub fn timer_handle(&self) -> TimerHandle {
        self.network.timers.clone()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            running: Arc::clone(&self.network.running),
        }
    }

    pub fn stats(&self) -> NetworkStats {
        self.network.stats
    }

    /// Messages waiting in the ready queue.
    pub fn pending_messages(&self) -> usize {
        self.network.queue.len()
    }

    /// Whether a single-shot run would keep going.
    pub fn has_work(&self) -> bool {
        !self.network.queue.is_empty() || self.network.timers.has_live_timers()
    }

    // ------------------------------------------------------------------------
    // Run loop
    // ------------------------------------------------------------------------

    /// Delivers every ready message in FIFO order, then fires at most one
    /// timer, advancing the clock to its deadline.
    ///
    /// Messages sent during delivery join the back of the queue and are
    /// delivered in the same step.
    pub fn step(&mut self) -> StepOutcome {
        let mut outcome = StepOutcome::default();

        while let Some(msg) = self.network.queue.pop_front() {
            let Some(endpoint) = self.endpoints.get_mut(&msg.dst) else {
                panic!("queued message for unregistered {}", msg.dst);
            };
            tracing::trace!(src = %msg.src, dst = %msg.dst, msg_type = %msg.msg_type, "deliver");
            self.network.stats.messages_delivered += 1;
            outcome.delivered += 1;
            endpoint.receive(
                &mut self.network,
                msg.src,
                &msg.msg_type,
                &msg.payload,
                msg.stamp.as_ref(),
            );
        }

        if let Some((id, action)) = self.network.timers.pop_next() {
            tracing::trace!(timer = %id, now_ms = self.network.timers.now_ms(), "timer fired");
            self.network.stats.timers_fired += 1;
            outcome.timer_fired = true;
            match action {
                TimerAction::Deliver(msg) => self.network.queue.push_back(msg),
                TimerAction::Callback(callback) => callback(&mut self.network as &mut dyn Transport),
                TimerAction::Wake(owner) => match self.endpoints.get_mut(&owner) {
                    Some(endpoint) => endpoint.on_timer(&mut self.network, id),
                    None => tracing::warn!(timer = %id, %owner, "wake for unregistered endpoint"),
                },
            }
        }

        outcome
    }

    /// Steps until the run ends as `config` prescribes.
    ///
    /// A continuous run re-arms the running flag on entry and ends when
    /// [`Transport::stop`] or [`StopHandle::stop`] clears it. While idle it
    /// yields, waiting for timers scheduled from other threads.
    pub fn run(&mut self, config: &SimConfig) -> RunSummary {
        self.network.running.store(true, Ordering::SeqCst);
        let mut summary = RunSummary::default();

        let reason = loop {
            if config.max_steps.is_some_and(|max| summary.steps >= max) {
                break StopReason::StepLimit;
            }
            match config.mode {
                RunMode::UntilIdle if !self.has_work() => break StopReason::Idle,
                RunMode::Continuous if !self.network.running.load(Ordering::SeqCst) => {
                    break StopReason::Stopped;
                }
                _ => {}
            }

            let outcome = self.step();
            summary.steps += 1;
            summary.messages_delivered += outcome.delivered;
            summary.timers_fired += u64::from(outcome.timer_fired);

            if config.mode == RunMode::Continuous && outcome.is_idle() {
                std::thread::yield_now();
            }
        };

        self.network.running.store(false, Ordering::SeqCst);
        summary.final_time_ms = self.network.timers.now_ms();
        summary.stop_reason = reason;
        tracing::debug!(
            steps = summary.steps,
            delivered = summary.messages_delivered,
            timers = summary.timers_fired,
            now_ms = summary.final_time_ms,
            ?reason,
            "run finished"
        );
        summary
    }

    /// Single-shot run with no step bound.
    pub fn run_until_idle(&mut self) -> RunSummary {
        self.run(&SimConfig::default())
    }
}

impl<E: TransportReceiver> Default for SimTransport<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Transport for SimTransport<E> {
    fn send(
        &mut self,
        src: SimAddress,
        dst: SimAddress,
        msg_type: &str,
        payload: Bytes,
    ) -> SendResult {
        self.network.send(src, dst, msg_type, payload)
    }

    fn ordered_multicast(
        &mut self,
        src: SimAddress,
        groups: &[GroupId],
        msg_type: &str,
        payload: Bytes,
    ) -> Result<MultiStamp, TransportError> {
        self.network.ordered_multicast(src, groups, msg_type, payload)
    }

    fn lookup_address(&self, addr: &ReplicaAddress) -> Option<SimAddress> {
        self.network.lookup_address(addr)
    }

    fn timer(&mut self, delay_ms: u64, callback: TimerCallback) -> TimerId {
        self.network.timer(delay_ms, callback)
    }

    fn wake_after(&mut self, owner: SimAddress, delay_ms: u64) -> TimerId {
        self.network.wake_after(owner, delay_ms)
    }

    fn cancel_timer(&mut self, id: TimerId) -> bool {
        self.network.cancel_timer(id)
    }

    fn cancel_all_timers(&mut self) {
        self.network.cancel_all_timers();
    }

    fn now_ms(&self) -> u64 {
        self.network.now_ms()
    }

    fn stop(&mut self) {
        self.network.stop();
    }
}
