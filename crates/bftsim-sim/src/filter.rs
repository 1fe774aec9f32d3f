//! Send filters for fault injection.
//!
//! Every send passes through the registered filters in registration order
//! before it is queued. A filter may lengthen (or shorten) the delivery delay
//! and may veto delivery entirely.

use std::fmt::{self, Display};

use bytes::Bytes;

use crate::{EndpointRole, MultiStamp, SimAddress};

/// Caller-chosen identifier for a registered filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FilterId(pub u32);

impl Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "filter#{}", self.0)
    }
}

/// Everything a filter may look at.
#[derive(Debug, Clone, Copy)]
pub struct FilterInput<'a> {
    pub src: SimAddress,
    pub src_role: EndpointRole,
    pub dst: SimAddress,
    pub dst_role: EndpointRole,
    pub msg_type: &'a str,
    pub payload: &'a Bytes,
    pub stamp: Option<&'a MultiStamp>,
}

/// Decides whether a message is delivered, possibly adjusting its delay.
pub trait Filter: Send {
    /// Returns `false` to drop the message.
    fn apply(&mut self, input: &FilterInput<'_>, delay_ms: &mut u64) -> bool;
}

impl<F> Filter for F
where
    F: FnMut(&FilterInput<'_>, &mut u64) -> bool + Send,
{
    fn apply(&mut self, input: &FilterInput<'_>, delay_ms: &mut u64) -> bool {
        self(input, delay_ms)
    }
}

/// Filters in registration order.
#[derive(Default)]
pub(crate) struct FilterChain {
    filters: Vec<(FilterId, Box<dyn Filter>)>,
}

impl FilterChain {
    /// Registers `filter`. Re-using an id replaces that filter in place.
    pub(crate) fn add(&mut self, id: FilterId, filter: Box<dyn Filter>) {
        match self.filters.iter_mut().find(|(existing, _)| *existing == id) {
            Some(slot) => slot.1 = filter,
            None => self.filters.push((id, filter)),
        }
    }

    pub(crate) fn remove(&mut self, id: FilterId) -> bool {
        let before = self.filters.len();
        self.filters.retain(|(existing, _)| *existing != id);
        self.filters.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.filters.len()
    }

    /// Runs every filter. Returns the first filter that vetoed, if any.
    ///
    /// Filters after a veto are not consulted.
    pub(crate) fn run(&mut self, input: &FilterInput<'_>, delay_ms: &mut u64) -> Option<FilterId> {
        for (id, filter) in &mut self.filters {
            if !filter.apply(input, delay_ms) {
                return Some(*id);
            }
        }
        None
    }
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.filters.iter().map(|(id, _)| id))
            .finish()
    }
}
