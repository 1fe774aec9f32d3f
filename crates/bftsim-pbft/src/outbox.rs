//! Encoding and addressing of outgoing messages.

use bftsim_sim::{SimAddress, Transport};
use bftsim_types::{ClusterConfig, ReplicaId};

use crate::PbftMessage;

/// The transport as seen by one endpoint while it handles an event.
pub(crate) struct Outbox<'a> {
    transport: &'a mut dyn Transport,
    me: SimAddress,
}

impl<'a> Outbox<'a> {
    pub(crate) fn new(transport: &'a mut dyn Transport, me: SimAddress) -> Self {
        Self { transport, me }
    }

    pub(crate) fn send(&mut self, dst: SimAddress, msg: &PbftMessage) {
        match msg.encode() {
            Ok(payload) => {
                self.transport.send(self.me, dst, msg.type_tag(), payload);
            }
            Err(error) => {
                tracing::error!(%error, msg_type = msg.type_tag(), "dropping unencodable message");
            }
        }
    }

    /// Sends `msg` to every replica in `config` except `except`.
    ///
    /// Replicas whose configured address does not resolve are skipped; the
    /// transport logs the miss. Returns how many replicas were addressed.
    pub(crate) fn broadcast(
        &mut self,
        config: &ClusterConfig,
        except: Option<ReplicaId>,
        msg: &PbftMessage,
    ) -> usize {
        let payload = match msg.encode() {
            Ok(payload) => payload,
            Err(error) => {
                tracing::error!(%error, msg_type = msg.type_tag(), "dropping unencodable message");
                return 0;
            }
        };

        let mut sent = 0;
        for replica in config.replicas().filter(|id| Some(*id) != except) {
            let Some(dst) = config
                .replica_address(replica)
                .and_then(|addr| self.transport.lookup_address(addr))
            else {
                continue;
            };
            self.transport
                .send(self.me, dst, msg.type_tag(), payload.clone());
            sent += 1;
        }
        sent
    }

    /// Resolves the transport address of `replica`.
    pub(crate) fn resolve(&self, config: &ClusterConfig, replica: ReplicaId) -> Option<SimAddress> {
        config
            .replica_address(replica)
            .and_then(|addr| self.transport.lookup_address(addr))
    }
}
