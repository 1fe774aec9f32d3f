//! Replica bookkeeping: client table, executed log, and the derived
//! per-sequence-number predicates.

use bftsim_types::{ClientId, Digest, OpNumber, RequestId, ViewNumber};

use crate::message::Reply;

use super::PbftReplica;
use crate::AppReplica;

/// What a Prepare or Commit vote agrees to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vote {
    pub view: ViewNumber,
    pub digest: Digest,
}

/// Last executed request of one client and the reply it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientTableEntry {
    pub last_request_id: RequestId,
    pub reply: Reply,
}

/// One sequence number as the execution sweep saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub op: OpNumber,
    pub view: ViewNumber,
    pub client_id: ClientId,
    pub request_id: RequestId,
    pub digest: Digest,
    /// The request was a resubmission and the cached reply was replayed
    /// instead of invoking the application.
    pub replayed: bool,
}

/// Per-sequence-number protocol progress, derived from the quorum tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OpStatus {
    Idle,
    PrePrepared,
    Prepared,
    CommittedLocal,
    Executed,
}

impl<A: AppReplica> PbftReplica<A> {
    /// The vote a matching Prepare or Commit for `op` must carry, if a
    /// PrePrepare for `op` is logged in the current view.
    pub(super) fn expected_vote(&self, op: OpNumber) -> Option<Vote> {
        self.pre_prepares
            .get(&op)
            .filter(|pp| pp.view == self.view)
            .map(|pp| Vote {
                view: pp.view,
                digest: pp.digest,
            })
    }

    /// PrePrepared and at least `2f` backups sent matching Prepares.
    pub fn prepared(&self, op: OpNumber) -> bool {
        let Some(expected) = self.expected_vote(op) else {
            return false;
        };
        let matching = self
            .prepares
            .peek(&op)
            .map_or(0, |votes| votes.values().filter(|v| **v == expected).count());
        matching >= self.prepares.required()
    }

    /// Prepared and at least `2f + 1` replicas sent matching Commits.
    pub fn committed_local(&self, op: OpNumber) -> bool {
        if !self.prepared(op) {
            return false;
        }
        let Some(expected) = self.expected_vote(op) else {
            return false;
        };
        let matching = self
            .commits
            .peek(&op)
            .map_or(0, |votes| votes.values().filter(|v| **v == expected).count());
        matching >= self.commits.required()
    }

    pub fn status(&self, op: OpNumber) -> OpStatus {
        if op != OpNumber::ZERO && op <= self.last_executed {
            OpStatus::Executed
        } else if self.committed_local(op) {
            OpStatus::CommittedLocal
        } else if self.prepared(op) {
            OpStatus::Prepared
        } else if self.expected_vote(op).is_some() {
            OpStatus::PrePrepared
        } else {
            OpStatus::Idle
        }
    }
}
