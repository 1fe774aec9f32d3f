//! Error types for PBFT messages and clients.

use bftsim_types::{ReplicaId, RequestId};

/// Encoding or decoding a protocol message failed.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] postcard::Error),

    #[error("failed to decode {msg_type} message: {source}")]
    Decode {
        msg_type: String,
        #[source]
        source: postcard::Error,
    },

    /// The payload decoded to a different message than its type tag claims.
    #[error("type tag {tag} does not match decoded {decoded} message")]
    TypeMismatch { tag: String, decoded: &'static str },
}

/// Errors returned to callers of [`crate::PbftClient`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Only one request may be outstanding at a time.
    #[error("{0} is still waiting for a reply")]
    RequestPending(RequestId),

    #[error("{0} is not part of the configuration")]
    UnknownReplica(ReplicaId),

    /// The transport knows no endpoint for the replica's address.
    #[error("address of {0} did not resolve")]
    Unresolved(ReplicaId),

    #[error("client used before it was registered with a transport")]
    NotRegistered,

    #[error("no ordered request has been sent yet")]
    NothingToResend,

    #[error(transparent)]
    Encode(#[from] MessageError),
}
