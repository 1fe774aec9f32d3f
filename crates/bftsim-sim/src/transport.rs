//! Transport boundary between protocol endpoints and the network.
//!
//! Protocol code only ever talks to `&mut dyn Transport`; the simulated
//! network is one implementation of it.

use bftsim_types::{GroupId, ReplicaAddress};
use bytes::Bytes;

use crate::{MultiStamp, SendResult, SimAddress, TimerId, TransportError};

/// Operations available to an endpoint while it handles a delivery or a
/// timer.
pub trait Transport {
    /// Sends `payload` from `src` to `dst`.
    ///
    /// # Panics
    ///
    /// Panics if `dst` was never registered.
    fn send(&mut self, src: SimAddress, dst: SimAddress, msg_type: &str, payload: Bytes)
    -> SendResult;

    /// Sends `payload` to every replica of every listed group except `src`,
    /// stamped with the next per-group sequence numbers of the current
    /// session. Returns the stamp.
    fn ordered_multicast(
        &mut self,
        src: SimAddress,
        groups: &[GroupId],
        msg_type: &str,
        payload: Bytes,
    ) -> Result<MultiStamp, TransportError>;

    /// Resolves a configured replica address. Misses are logged and return
    /// `None`.
    fn lookup_address(&self, addr: &ReplicaAddress) -> Option<SimAddress>;

    /// Schedules `callback` after `delay_ms` of virtual time.
    ///
    /// The callback only sees the transport. Use [`Transport::wake_after`]
    /// for a timeout that must reach the endpoint's own state.
    fn timer(&mut self, delay_ms: u64, callback: crate::TimerCallback) -> TimerId;

    /// Arms a timer that calls [`TransportReceiver::on_timer`] on `owner`
    /// after `delay_ms` of virtual time. Cancel it like any other timer.
    fn wake_after(&mut self, owner: SimAddress, delay_ms: u64) -> TimerId;

    /// Cancels a pending timer. Returns whether it was found.
    fn cancel_timer(&mut self, id: TimerId) -> bool;

    /// Cancels every pending timer and stops timer processing for the rest
    /// of the run.
    fn cancel_all_timers(&mut self);

    /// Current virtual time in milliseconds.
    fn now_ms(&self) -> u64;

    /// Ends a continuous run after the current step.
    fn stop(&mut self);
}

/// An endpoint registered with a transport.
pub trait TransportReceiver {
    /// Called once with the address the transport assigned.
    fn on_registered(&mut self, _addr: SimAddress) {}

    /// Called when a timer armed with [`Transport::wake_after`] fires.
    fn on_timer(&mut self, _transport: &mut dyn Transport, _id: TimerId) {}

    /// Handles one delivered message.
    fn receive(
        &mut self,
        transport: &mut dyn Transport,
        src: SimAddress,
        msg_type: &str,
        payload: &Bytes,
        stamp: Option<&MultiStamp>,
    );
}

impl<T: TransportReceiver + ?Sized> TransportReceiver for Box<T> {
    fn on_registered(&mut self, addr: SimAddress) {
        (**self).on_registered(addr);
    }

    fn on_timer(&mut self, transport: &mut dyn Transport, id: TimerId) {
        (**self).on_timer(transport, id);
    }

    fn receive(
        &mut self,
        transport: &mut dyn Transport,
        src: SimAddress,
        msg_type: &str,
        payload: &Bytes,
        stamp: Option<&MultiStamp>,
    ) {
        (**self).receive(transport, src, msg_type, payload, stamp);
    }
}
