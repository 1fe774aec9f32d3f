//! Messages in flight and ordered-multicast stamps.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use bftsim_types::GroupId;
use bytes::Bytes;

use crate::SimAddress;

/// Ordering metadata attached to an ordered multicast.
///
/// Each listed group gets the next value of its counter for the current
/// session. Receivers use the counters to detect gaps; the network does not
/// enforce anything with them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MultiStamp {
    pub session: u64,
    pub seqnums: BTreeMap<GroupId, u64>,
}

impl MultiStamp {
    /// Sequence number assigned to `group`, if the stamp covers it.
    pub fn seqnum(&self, group: GroupId) -> Option<u64> {
        self.seqnums.get(&group).copied()
    }
}

impl Display for MultiStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}[", self.session)?;
        for (i, (group, seq)) in self.seqnums.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{group}:{seq}")?;
        }
        write!(f, "]")
    }
}

/// A message that passed all filters and waits for delivery.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub dst: SimAddress,
    pub src: SimAddress,
    pub msg_type: String,
    pub payload: Bytes,
    pub stamp: Option<MultiStamp>,
}

/// Outcome of a send as seen by the sender.
///
/// None of these is a failure: a filtered message is indistinguishable from
/// one lost on a real network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    /// Appended to the ready queue.
    Queued,
    /// Held back by a filter until the virtual clock reaches `deliver_at_ms`.
    Delayed { deliver_at_ms: u64 },
    /// Dropped by a filter.
    Dropped,
}

/// Counters maintained by the network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub messages_sent: u64,
    pub messages_delivered: u64,
    pub messages_dropped: u64,
    pub messages_delayed: u64,
    pub multicasts: u64,
    pub timers_fired: u64,
}
