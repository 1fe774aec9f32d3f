//! Normal-case agreement: request, PrePrepare, Prepare, Commit, execution.

use bftsim_sim::SimAddress;
use bftsim_types::OpNumber;

use super::{ClientTableEntry, LogEntry, PbftReplica, Vote};
use crate::message::{
    Commit, PrePrepare, Prepare, Reply, Request, UnloggedReply, UnloggedRequest,
};
use crate::outbox::Outbox;
use crate::{AppReplica, PbftMessage};

impl<A: AppReplica> PbftReplica<A> {
    // ========================================================================
    // Client Requests
    // ========================================================================

    pub(super) fn on_request(&mut self, out: &mut Outbox<'_>, src: SimAddress, request: Request) {
        self.client_addresses.insert(request.client_id, src);

        // Resubmission of something already executed: answer from the cache.
        if let Some(entry) = self
            .client_table
            .get(&request.client_id)
            .filter(|entry| request.request_id <= entry.last_request_id)
        {
            tracing::debug!(
                replica = %self.replica_id,
                client = %request.client_id,
                request = %request.request_id,
                "resending cached reply"
            );
            out.send(src, &PbftMessage::Reply(entry.reply.clone()));
            return;
        }

        if !self.is_primary() {
            tracing::debug!(
                replica = %self.replica_id,
                client = %request.client_id,
                primary = %self.primary(),
                "ignoring request at backup"
            );
            return;
        }

        let op = self.last_assigned.next();
        self.last_assigned = op;

        let pre_prepare = PrePrepare {
            view: self.view,
            op,
            digest: request.digest(),
            replica: self.replica_id,
            request,
        };
        tracing::debug!(
            replica = %self.replica_id,
            %op,
            client = %pre_prepare.request.client_id,
            request = %pre_prepare.request.request_id,
            "assigned sequence number"
        );
        self.pre_prepares.insert(op, pre_prepare.clone());

        if let Some(signed) = self.sign(pre_prepare) {
            out.broadcast(
                &self.config,
                Some(self.replica_id),
                &PbftMessage::PrePrepare(signed),
            );
        }

        self.broadcast_commit_if_prepared(out, op);
        self.execute_available(out);
    }

    pub(super) fn on_unlogged_request(
        &mut self,
        out: &mut Outbox<'_>,
        src: SimAddress,
        request: UnloggedRequest,
    ) {
        let reply = self.app.unlogged_upcall(&request.op);
        out.send(
            src,
            &PbftMessage::UnloggedReply(UnloggedReply {
                request_id: request.request_id,
                replica: self.replica_id,
                reply,
            }),
        );
    }

    // ========================================================================
    // Agreement
    // ========================================================================

    pub(super) fn on_pre_prepare(&mut self, out: &mut Outbox<'_>, pre_prepare: PrePrepare) {
        let op = pre_prepare.op;

        if pre_prepare.view != self.view {
            tracing::debug!(replica = %self.replica_id, %op, view = %pre_prepare.view, "PrePrepare from another view");
            return;
        }
        if pre_prepare.replica != self.primary() {
            tracing::warn!(
                replica = %self.replica_id,
                %op,
                sender = %pre_prepare.replica,
                "PrePrepare not sent by the primary"
            );
            return;
        }
        if self.is_primary() || op <= self.last_executed {
            return;
        }
        if pre_prepare.digest != pre_prepare.request.digest() {
            tracing::warn!(replica = %self.replica_id, %op, "PrePrepare digest does not match its request");
            return;
        }
        if let Some(existing) = self.pre_prepares.get(&op).filter(|pp| pp.view == self.view) {
            if existing.digest != pre_prepare.digest {
                tracing::warn!(
                    replica = %self.replica_id,
                    %op,
                    "conflicting PrePrepare for a bound sequence number"
                );
            }
            return;
        }

        let vote = Vote {
            view: pre_prepare.view,
            digest: pre_prepare.digest,
        };
        self.last_assigned = self.last_assigned.max(op);
        self.pre_prepares.insert(op, pre_prepare);
        self.prepares.record(op, self.replica_id, vote);

        let prepare = Prepare {
            view: vote.view,
            op,
            digest: vote.digest,
            replica: self.replica_id,
        };
        if let Some(signed) = self.sign(prepare) {
            out.broadcast(&self.config, Some(self.replica_id), &PbftMessage::Prepare(signed));
        }

        self.broadcast_commit_if_prepared(out, op);
        self.execute_available(out);
    }

    pub(super) fn on_prepare(&mut self, out: &mut Outbox<'_>, prepare: Prepare) {
        if prepare.view != self.view || prepare.op <= self.last_executed {
            return;
        }
        // The primary's PrePrepare is its prepare.
        if prepare.replica == self.primary() {
            tracing::debug!(replica = %self.replica_id, op = %prepare.op, "ignoring Prepare from the primary");
            return;
        }

        self.prepares.record(
            prepare.op,
            prepare.replica,
            Vote {
                view: prepare.view,
                digest: prepare.digest,
            },
        );
        self.broadcast_commit_if_prepared(out, prepare.op);
        self.execute_available(out);
    }

    pub(super) fn on_commit(&mut self, out: &mut Outbox<'_>, commit: Commit) {
        if commit.view != self.view || commit.op <= self.last_executed {
            return;
        }

        self.commits.record(
            commit.op,
            commit.replica,
            Vote {
                view: commit.view,
                digest: commit.digest,
            },
        );
        self.execute_available(out);
    }

    /// Sends this replica's Commit for `op` the first time `op` is prepared.
    fn broadcast_commit_if_prepared(&mut self, out: &mut Outbox<'_>, op: OpNumber) {
        if self.commits_sent.contains(&op) || !self.prepared(op) {
            return;
        }
        let Some(vote) = self.expected_vote(op) else {
            return;
        };

        self.commits_sent.insert(op);
        self.commits.record(op, self.replica_id, vote);
        tracing::debug!(replica = %self.replica_id, %op, "prepared");

        let commit = Commit {
            view: vote.view,
            op,
            digest: vote.digest,
            replica: self.replica_id,
        };
        if let Some(signed) = self.sign(commit) {
            out.broadcast(&self.config, Some(self.replica_id), &PbftMessage::Commit(signed));
        }
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Executes committed sequence numbers in order, stopping at the first
    /// gap.
    fn execute_available(&mut self, out: &mut Outbox<'_>) {
        loop {
            let op = self.last_executed.next();
            if !self.committed_local(op) {
                break;
            }
            let Some(pre_prepare) = self.pre_prepares.remove(&op) else {
                break;
            };
            self.execute(out, pre_prepare);
        }
    }

    fn execute(&mut self, out: &mut Outbox<'_>, pre_prepare: PrePrepare) {
        let PrePrepare {
            view,
            op,
            digest,
            request,
            ..
        } = pre_prepare;
        debug_assert_eq!(op, self.last_executed.next());

        let cached = self
            .client_table
            .get(&request.client_id)
            .filter(|entry| request.request_id <= entry.last_request_id)
            .map(|entry| entry.reply.clone());
        let replayed = cached.is_some();

        let reply = match cached {
            Some(reply) => reply,
            None => {
                let result = self.app.replica_upcall(op, &request.op);
                let reply = Reply {
                    view,
                    client_id: request.client_id,
                    request_id: request.request_id,
                    replica: self.replica_id,
                    reply: result,
                };
                self.client_table.insert(
                    request.client_id,
                    ClientTableEntry {
                        last_request_id: request.request_id,
                        reply: reply.clone(),
                    },
                );
                reply
            }
        };

        self.last_executed = op;
        self.log.push(LogEntry {
            op,
            view,
            client_id: request.client_id,
            request_id: request.request_id,
            digest,
            replayed,
        });
        self.prepares.clear(&op);
        self.commits.clear(&op);
        self.commits_sent.remove(&op);

        tracing::info!(
            replica = %self.replica_id,
            %op,
            client = %request.client_id,
            request = %request.request_id,
            replayed,
            "executed"
        );

        match self.client_addresses.get(&request.client_id) {
            Some(dst) => out.send(*dst, &PbftMessage::Reply(reply)),
            None => {
                tracing::debug!(replica = %self.replica_id, client = %request.client_id, "client address unknown, reply not sent");
            }
        }
    }
}
