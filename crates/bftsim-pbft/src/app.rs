//! Application boundary.

use bftsim_types::OpNumber;
use bytes::Bytes;

/// The replicated state machine a replica executes operations against.
pub trait AppReplica {
    /// Applies a committed operation. Called once per sequence number, in
    /// order.
    fn replica_upcall(&mut self, op: OpNumber, request: &[u8]) -> Bytes;

    /// Serves an operation outside the ordering protocol.
    fn unlogged_upcall(&mut self, request: &[u8]) -> Bytes;
}

impl<T: AppReplica + ?Sized> AppReplica for Box<T> {
    fn replica_upcall(&mut self, op: OpNumber, request: &[u8]) -> Bytes {
        (**self).replica_upcall(op, request)
    }

    fn unlogged_upcall(&mut self, request: &[u8]) -> Bytes {
        (**self).unlogged_upcall(request)
    }
}
