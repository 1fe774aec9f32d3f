//! # bftsim-sim: Deterministic network simulation for `bftsim`
//!
//! A single-process discrete-event network. Endpoints register with a
//! [`SimTransport`], exchange opaque typed payloads, and schedule timers
//! against a virtual clock. Nothing here knows about the protocol running on
//! top.
//!
//! ## Scheduling
//!
//! Each [`SimTransport::step`]:
//!
//! 1. Delivers every ready message in FIFO order, including messages sent
//!    while delivering.
//! 2. Fires at most one timer (earliest deadline, scheduling order on ties),
//!    advancing the virtual clock to its deadline.
//!
//! The clock never moves on delivery. All zero-delay effects of a delivery
//! are observed before time advances.
//!
//! ## Fault injection
//!
//! Filters see every send before it is queued and may drop it or change its
//! delay. See [`filters`] for ready-made ones.
//!
//! ## Quick Start
//!
//! ```
//! use bftsim_sim::{EndpointRole, MultiStamp, SimAddress, SimTransport, Transport, TransportReceiver};
//! use bytes::Bytes;
//!
//! #[derive(Default)]
//! struct Counter(usize);
//!
//! impl TransportReceiver for Counter {
//!     fn receive(
//!         &mut self,
//!         _transport: &mut dyn Transport,
//!         _src: SimAddress,
//!         _msg_type: &str,
//!         _payload: &Bytes,
//!         _stamp: Option<&MultiStamp>,
//!     ) {
//!         self.0 += 1;
//!     }
//! }
//!
//! let mut transport: SimTransport = SimTransport::new();
//! let a = transport.register(Box::new(Counter::default()), None, EndpointRole::Client);
//! let b = transport.register(Box::new(Counter::default()), None, EndpointRole::Client);
//! transport.send(a, b, "ping", Bytes::from_static(b"hi"));
//!
//! let summary = transport.run_until_idle();
//! assert_eq!(summary.messages_delivered, 1);
//! ```

mod address;
mod error;
mod filter;
pub mod filters;
mod message;
mod network;
mod timer;
mod transport;

pub use address::{EndpointRole, SimAddress};
pub use error::TransportError;
pub use filter::{Filter, FilterId, FilterInput};
pub use message::{MultiStamp, NetworkStats, QueuedMessage, SendResult};
pub use network::{SimNetwork, SimTransport, StepOutcome, StopHandle};
pub use timer::{TimerCallback, TimerHandle, TimerId};
pub use transport::{Transport, TransportReceiver};

// ============================================================================
// Run Configuration
// ============================================================================

/// How long [`SimTransport::run`] keeps stepping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunMode {
    /// Until no message is queued and no live timer is pending.
    #[default]
    UntilIdle,
    /// Until [`Transport::stop`] or [`StopHandle::stop`] is called.
    Continuous,
}

/// Configuration for a simulation run.
#[derive(Debug, Clone, Default)]
pub struct SimConfig {
    pub mode: RunMode,
    /// Maximum number of steps before the run is cut off.
    pub max_steps: Option<u64>,
}

impl SimConfig {
    pub fn until_idle() -> Self {
        Self::default()
    }

    pub fn continuous() -> Self {
        Self {
            mode: RunMode::Continuous,
            max_steps: None,
        }
    }

    /// Sets the maximum number of steps.
    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = Some(max_steps);
        self
    }
}

/// Why a run returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StopReason {
    #[default]
    Idle,
    Stopped,
    StepLimit,
}

/// Summary of a completed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub steps: u64,
    pub messages_delivered: u64,
    pub timers_fired: u64,
    /// Virtual time when the run ended.
    pub final_time_ms: u64,
    pub stop_reason: StopReason,
}
