//! PBFT protocol messages.
//!
//! ## Client traffic
//! - [`Request`] - Client → All replicas: order and execute this operation
//! - [`UnloggedRequest`] - Client → One replica: execute outside the log
//! - [`Reply`] - Replica → Client: result of an ordered operation
//! - [`UnloggedReply`] - Replica → Client: result of an unlogged operation
//!
//! ## Agreement
//! - [`PrePrepare`] - Primary → Backups: operation bound to a sequence number
//! - [`Prepare`] - Backup → All: I accept that binding
//! - [`Commit`] - Replica → All: the binding is prepared at my replica
//!
//! Agreement messages travel inside [`Signed`]. Every message is encoded
//! with `postcard` and handed to the transport as `(type tag, bytes)`.

use bftsim_crypto::{Signer, Verifier};
use bftsim_types::{ClientId, Digest, OpNumber, ReplicaId, RequestId, ViewNumber};
use bytes::Bytes;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::MessageError;

// ============================================================================
// Client Messages
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub client_id: ClientId,
    pub request_id: RequestId,
    pub op: Bytes,
}

impl Request {
    pub fn digest(&self) -> Digest {
        Digest::of_request(self.client_id, self.request_id, &self.op)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnloggedRequest {
    pub client_id: ClientId,
    pub request_id: RequestId,
    pub op: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub view: ViewNumber,
    pub client_id: ClientId,
    pub request_id: RequestId,
    pub replica: ReplicaId,
    pub reply: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnloggedReply {
    pub request_id: RequestId,
    pub replica: ReplicaId,
    pub reply: Bytes,
}

// ============================================================================
// Agreement Messages
// ============================================================================

/// Binds `request` to sequence number `op` in `view`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrePrepare {
    pub view: ViewNumber,
    pub op: OpNumber,
    pub digest: Digest,
    pub replica: ReplicaId,
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prepare {
    pub view: ViewNumber,
    pub op: OpNumber,
    pub digest: Digest,
    pub replica: ReplicaId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub view: ViewNumber,
    pub op: OpNumber,
    pub digest: Digest,
    pub replica: ReplicaId,
}

/// Agreement messages name the replica that claims to have sent them.
pub trait Attributed {
    fn sender(&self) -> ReplicaId;
}

impl Attributed for PrePrepare {
    fn sender(&self) -> ReplicaId {
        self.replica
    }
}

impl Attributed for Prepare {
    fn sender(&self) -> ReplicaId {
        self.replica
    }
}

impl Attributed for Commit {
    fn sender(&self) -> ReplicaId {
        self.replica
    }
}

/// A message body with a signature over its canonical encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signed<T> {
    pub body: T,
    pub signature: Vec<u8>,
}

impl<T: Serialize + Attributed> Signed<T> {
    pub fn sign(body: T, signer: &dyn Signer) -> Result<Self, MessageError> {
        let bytes = postcard::to_allocvec(&body).map_err(MessageError::Encode)?;
        let signature = signer.sign(&bytes);
        Ok(Self { body, signature })
    }

    /// Checks the signature against the replica named in the body.
    pub fn verify(&self, verifier: &dyn Verifier) -> bool {
        match postcard::to_allocvec(&self.body) {
            Ok(bytes) => verifier.verify(&bytes, &self.signature, self.body.sender()),
            Err(_) => false,
        }
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// Every message the replica and client exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PbftMessage {
    Request(Request),
    UnloggedRequest(UnloggedRequest),
    Reply(Reply),
    UnloggedReply(UnloggedReply),
    PrePrepare(Signed<PrePrepare>),
    Prepare(Signed<Prepare>),
    Commit(Signed<Commit>),
}

impl PbftMessage {
    /// Type tag the transport and its filters see.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::Request(_) => tags::REQUEST,
            Self::UnloggedRequest(_) => tags::UNLOGGED_REQUEST,
            Self::Reply(_) => tags::REPLY,
            Self::UnloggedReply(_) => tags::UNLOGGED_REPLY,
            Self::PrePrepare(_) => tags::PRE_PREPARE,
            Self::Prepare(_) => tags::PREPARE,
            Self::Commit(_) => tags::COMMIT,
        }
    }

    pub fn encode(&self) -> Result<Bytes, MessageError> {
        encode(self)
    }

    /// Decodes `payload` and checks it against `msg_type`.
    pub fn decode(msg_type: &str, payload: &[u8]) -> Result<Self, MessageError> {
        let msg: Self = decode(msg_type, payload)?;
        if msg.type_tag() != msg_type {
            return Err(MessageError::TypeMismatch {
                tag: msg_type.to_string(),
                decoded: msg.type_tag(),
            });
        }
        Ok(msg)
    }
}

/// Transport type tags, usable with message-type filters.
pub mod tags {
    pub const REQUEST: &str = "pbft.Request";
    pub const UNLOGGED_REQUEST: &str = "pbft.UnloggedRequest";
    pub const REPLY: &str = "pbft.Reply";
    pub const UNLOGGED_REPLY: &str = "pbft.UnloggedReply";
    pub const PRE_PREPARE: &str = "pbft.PrePrepare";
    pub const PREPARE: &str = "pbft.Prepare";
    pub const COMMIT: &str = "pbft.Commit";
}

fn encode<T: Serialize>(value: &T) -> Result<Bytes, MessageError> {
    postcard::to_allocvec(value)
        .map(Bytes::from)
        .map_err(MessageError::Encode)
}

fn decode<T: DeserializeOwned>(msg_type: &str, payload: &[u8]) -> Result<T, MessageError> {
    postcard::from_bytes(payload).map_err(|source| MessageError::Decode {
        msg_type: msg_type.to_string(),
        source,
    })
}
