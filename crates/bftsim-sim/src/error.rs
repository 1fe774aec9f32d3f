//! Error types for the simulated transport.

use bftsim_types::GroupId;

/// Errors a caller of the transport can recover from.
///
/// Sending to an address that was never registered is a programming error
/// and panics instead.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransportError {
    /// An ordered multicast named a group with no registered members.
    #[error("multicast group {0} has no registered members")]
    UnknownGroup(GroupId),

    /// An ordered multicast named no groups at all.
    #[error("ordered multicast requires at least one group")]
    NoGroups,
}
