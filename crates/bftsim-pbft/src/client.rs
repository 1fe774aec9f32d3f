//! PBFT client.
//!
//! A client keeps at most one request outstanding. Ordered requests go to
//! every replica and complete once `f + 1` replicas returned the same
//! result; unlogged requests go to a single replica and complete on its
//! answer.

use bftsim_sim::{MultiStamp, SimAddress, Transport, TransportReceiver};
use bftsim_types::{ClientId, ClusterConfig, ReplicaId, RequestId};
use bytes::Bytes;

use crate::message::{Reply, Request, UnloggedReply, UnloggedRequest};
use crate::outbox::Outbox;
use crate::quorum::ByzantineQuorumSet;
use crate::{ClientError, PbftMessage};

/// The request a client is waiting on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub request_id: RequestId,
    pub op: Bytes,
    pub unlogged: bool,
}

/// A finished request and the result it was accepted with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedRequest {
    pub request_id: RequestId,
    pub op: Bytes,
    pub reply: Bytes,
    pub unlogged: bool,
}

#[derive(Debug)]
pub struct PbftClient {
    config: ClusterConfig,
    client_id: ClientId,
    addr: Option<SimAddress>,
    last_request_id: RequestId,
    pending: Option<PendingRequest>,
    /// Ordered replies, bucketed by result.
    replies: ByzantineQuorumSet<RequestId, Bytes>,
    completed: Vec<CompletedRequest>,
    last_ordered: Option<Request>,
}

impl PbftClient {
    pub fn new(config: ClusterConfig, client_id: ClientId) -> Self {
        Self {
            replies: ByzantineQuorumSet::new(config.reply_quorum()),
            config,
            client_id,
            addr: None,
            last_request_id: RequestId::ZERO,
            pending: None,
            completed: Vec::new(),
            last_ordered: None,
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn address(&self) -> Option<SimAddress> {
        self.addr
    }

    pub fn pending(&self) -> Option<&PendingRequest> {
        self.pending.as_ref()
    }

    /// Requests completed so far, oldest first.
    pub fn completed(&self) -> &[CompletedRequest] {
        &self.completed
    }

    pub fn last_reply(&self) -> Option<&Bytes> {
        self.completed.last().map(|done| &done.reply)
    }

    // ------------------------------------------------------------------------
    // Invocation
    // ------------------------------------------------------------------------

    /// Sends `op` to every replica for ordering.
    pub fn invoke(
        &mut self,
        transport: &mut dyn Transport,
        op: impl Into<Bytes>,
    ) -> Result<RequestId, ClientError> {
        let me = self.ready()?;
        let op = op.into();
        let request = Request {
            client_id: self.client_id,
            request_id: self.last_request_id.next(),
            op: op.clone(),
        };
        let msg = PbftMessage::Request(request.clone());
        msg.encode()?;

        self.last_request_id = request.request_id;
        self.pending = Some(PendingRequest {
            request_id: request.request_id,
            op,
            unlogged: false,
        });

        let sent = Outbox::new(transport, me).broadcast(&self.config, None, &msg);
        tracing::debug!(client = %self.client_id, request = %request.request_id, replicas = sent, "sent request");
        self.last_ordered = Some(request.clone());
        Ok(request.request_id)
    }

    /// Sends `op` to `replica` outside the ordering protocol.
    pub fn invoke_unlogged(
        &mut self,
        transport: &mut dyn Transport,
        replica: ReplicaId,
        op: impl Into<Bytes>,
    ) -> Result<RequestId, ClientError> {
        let me = self.ready()?;
        if !self.config.contains(replica) {
            return Err(ClientError::UnknownReplica(replica));
        }
        let op = op.into();
        let request = UnloggedRequest {
            client_id: self.client_id,
            request_id: self.last_request_id.next(),
            op: op.clone(),
        };
        let msg = PbftMessage::UnloggedRequest(request);
        msg.encode()?;

        // Nothing is recorded until the target resolves, so a miss leaves the
        // client free for the next request.
        let mut out = Outbox::new(transport, me);
        let dst = out
            .resolve(&self.config, replica)
            .ok_or(ClientError::Unresolved(replica))?;

        let request_id = self.last_request_id.next();
        self.last_request_id = request_id;
        self.pending = Some(PendingRequest {
            request_id,
            op,
            unlogged: true,
        });
        out.send(dst, &msg);
        Ok(request_id)
    }

    /// Sends the last ordered request again under the same request id.
    pub fn resend_last(&mut self, transport: &mut dyn Transport) -> Result<RequestId, ClientError> {
        let me = self.addr.ok_or(ClientError::NotRegistered)?;
        let request = self.last_ordered.clone().ok_or(ClientError::NothingToResend)?;

        if self.pending.is_none() {
            self.pending = Some(PendingRequest {
                request_id: request.request_id,
                op: request.op.clone(),
                unlogged: false,
            });
        }
        Outbox::new(transport, me).broadcast(
            &self.config,
            None,
            &PbftMessage::Request(request.clone()),
        );
        tracing::debug!(client = %self.client_id, request = %request.request_id, "resent request");
        Ok(request.request_id)
    }

    fn ready(&self) -> Result<SimAddress, ClientError> {
        let me = self.addr.ok_or(ClientError::NotRegistered)?;
        match &self.pending {
            Some(pending) => Err(ClientError::RequestPending(pending.request_id)),
            None => Ok(me),
        }
    }

    // ------------------------------------------------------------------------
    // Replies
    // ------------------------------------------------------------------------

    /// Handles one decoded message.
    pub fn handle(&mut self, src: SimAddress, msg: PbftMessage) {
        match msg {
            PbftMessage::Reply(reply) => self.on_reply(reply),
            PbftMessage::UnloggedReply(reply) => self.on_unlogged_reply(reply),
            other => {
                tracing::debug!(client = %self.client_id, %src, msg_type = other.type_tag(), "ignoring message sent to a client");
            }
        }
    }

    fn on_reply(&mut self, reply: Reply) {
        if reply.client_id != self.client_id {
            tracing::warn!(client = %self.client_id, addressed = %reply.client_id, "reply for another client");
            return;
        }
        if !self.config.contains(reply.replica) {
            tracing::warn!(client = %self.client_id, replica = %reply.replica, "reply from unknown replica");
            return;
        }
        let Some(pending) = self
            .pending
            .as_ref()
            .filter(|p| !p.unlogged && p.request_id == reply.request_id)
        else {
            tracing::trace!(client = %self.client_id, request = %reply.request_id, "stale reply");
            return;
        };
        let request_id = pending.request_id;

        if !self
            .replies
            .record(request_id, reply.replica, reply.reply.clone())
        {
            return;
        }

        self.replies.clear(&request_id);
        if let Some(pending) = self.pending.take() {
            tracing::info!(client = %self.client_id, request = %request_id, "request completed");
            self.completed.push(CompletedRequest {
                request_id,
                op: pending.op,
                reply: reply.reply,
                unlogged: false,
            });
        }
    }

    fn on_unlogged_reply(&mut self, reply: UnloggedReply) {
        let matches = self
            .pending
            .as_ref()
            .is_some_and(|p| p.unlogged && p.request_id == reply.request_id);
        if !matches {
            tracing::trace!(client = %self.client_id, request = %reply.request_id, "stale unlogged reply");
            return;
        }
        if let Some(pending) = self.pending.take() {
            tracing::info!(client = %self.client_id, request = %reply.request_id, replica = %reply.replica, "unlogged request completed");
            self.completed.push(CompletedRequest {
                request_id: pending.request_id,
                op: pending.op,
                reply: reply.reply,
                unlogged: true,
            });
        }
    }
}

impl TransportReceiver for PbftClient {
    fn on_registered(&mut self, addr: SimAddress) {
        self.addr = Some(addr);
    }

    fn receive(
        &mut self,
        _transport: &mut dyn Transport,
        src: SimAddress,
        msg_type: &str,
        payload: &Bytes,
        _stamp: Option<&MultiStamp>,
    ) {
        match PbftMessage::decode(msg_type, payload) {
            Ok(msg) => self.handle(src, msg),
            Err(error) => {
                tracing::warn!(client = %self.client_id, %src, %error, "undecodable message");
            }
        }
    }
}
