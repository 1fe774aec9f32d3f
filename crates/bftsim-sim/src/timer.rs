//! Timer registry and virtual clock.
//!
//! The registry is the only piece of the simulator that may be touched from
//! outside the run loop, so it lives behind a mutex and is shared through
//! [`TimerHandle`]. The virtual clock sits inside the same lock: it only
//! moves when a timer is popped.

use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{QueuedMessage, SimAddress, Transport};

/// Identifier returned when a timer is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

impl TimerId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Callback run when a timer fires.
pub type TimerCallback = Box<dyn FnOnce(&mut dyn Transport) + Send>;

pub(crate) enum TimerAction {
    /// A filter-delayed message; firing moves it to the ready queue.
    Deliver(QueuedMessage),
    Callback(TimerCallback),
    /// Hands the firing back to the endpoint that armed it.
    Wake(SimAddress),
}

impl fmt::Debug for TimerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deliver(msg) => f.debug_tuple("Deliver").field(&msg.msg_type).finish(),
            Self::Callback(_) => f.write_str("Callback(..)"),
            Self::Wake(owner) => f.debug_tuple("Wake").field(owner).finish(),
        }
    }
}

#[derive(Debug)]
struct TimerQueue {
    // (deadline, id) orders by time, then by scheduling order on ties.
    timers: BTreeMap<(u64, TimerId), TimerAction>,
    deadlines: BTreeMap<TimerId, u64>,
    now_ms: u64,
    next_id: u64,
    enabled: bool,
}

/// Shared handle to the timer registry of one simulated transport.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    inner: Arc<Mutex<TimerQueue>>,
}

impl TimerHandle {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(TimerQueue {
                timers: BTreeMap::new(),
                deadlines: BTreeMap::new(),
                now_ms: 0,
                next_id: 1,
                enabled: true,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TimerQueue> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Schedules `callback` to run `delay_ms` after the current virtual time.
    pub fn schedule(
        &self,
        delay_ms: u64,
        callback: impl FnOnce(&mut dyn Transport) + Send + 'static,
    ) -> TimerId {
        self.schedule_action(delay_ms, TimerAction::Callback(Box::new(callback)))
    }

    pub(crate) fn schedule_action(&self, delay_ms: u64, action: TimerAction) -> TimerId {
        let mut queue = self.lock();
        let id = TimerId(queue.next_id);
        queue.next_id += 1;
        let deadline = queue.now_ms.saturating_add(delay_ms);
        queue.timers.insert((deadline, id), action);
        queue.deadlines.insert(id, deadline);
        id
    }

    /// Removes a pending timer. Returns whether it was still pending.
    pub fn cancel(&self, id: TimerId) -> bool {
        let mut queue = self.lock();
        match queue.deadlines.remove(&id) {
            Some(deadline) => queue.timers.remove(&(deadline, id)).is_some(),
            None => false,
        }
    }

    /// Drops every pending timer and stops timer processing for the rest of
    /// the run.
    pub fn cancel_all(&self) {
        let mut queue = self.lock();
        queue.timers.clear();
        queue.deadlines.clear();
        queue.enabled = false;
    }

    /// Current virtual time in milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.lock().now_ms
    }

    /// Number of timers waiting to fire.
    pub fn pending(&self) -> usize {
        self.lock().timers.len()
    }

    /// Whether timers are still being processed.
    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    /// Deadline of the earliest pending timer.
    pub fn next_deadline(&self) -> Option<u64> {
        let queue = self.lock();
        if !queue.enabled {
            return None;
        }
        queue.timers.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Whether a run in single-shot mode still has timer work to do.
    pub(crate) fn has_live_timers(&self) -> bool {
        let queue = self.lock();
        queue.enabled && !queue.timers.is_empty()
    }

    /// Pops the earliest timer and advances the clock to its deadline.
    ///
    /// The lock is released before the caller runs the action, so callbacks
    /// may schedule further timers.
    pub(crate) fn pop_next(&self) -> Option<(TimerId, TimerAction)> {
        let mut queue = self.lock();
        if !queue.enabled {
            return None;
        }
        let ((deadline, id), action) = queue.timers.pop_first()?;
        queue.deadlines.remove(&id);
        debug_assert!(deadline >= queue.now_ms, "timer deadline in the past");
        queue.now_ms = queue.now_ms.max(deadline);
        Some((id, action))
    }
}
