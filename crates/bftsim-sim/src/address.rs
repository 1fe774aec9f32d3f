//! Value-typed endpoint addresses.

use std::fmt::{self, Display};

use bftsim_types::{GroupId, ReplicaId};

/// Address assigned to an endpoint when it registers with a simulated
/// transport. Addresses are only meaningful within the transport that
/// issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SimAddress(u32);

impl SimAddress {
    pub(crate) fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl Display for SimAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sim#{}", self.0)
    }
}

/// What an endpoint is, as far as ordered multicast and filters care.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointRole {
    /// Member `index` of replica group `group`.
    Replica { group: GroupId, index: ReplicaId },
    Client,
}

impl EndpointRole {
    pub fn replica(group: GroupId, index: ReplicaId) -> Self {
        Self::Replica { group, index }
    }

    /// Group this endpoint belongs to, if it is a replica.
    pub fn group(&self) -> Option<GroupId> {
        match self {
            Self::Replica { group, .. } => Some(*group),
            Self::Client => None,
        }
    }

    /// Index within its group, if it is a replica.
    pub fn replica_index(&self) -> Option<ReplicaId> {
        match self {
            Self::Replica { index, .. } => Some(*index),
            Self::Client => None,
        }
    }
}

impl Display for EndpointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Replica { group, index } => write!(f, "{group}/{index}"),
            Self::Client => write!(f, "client"),
        }
    }
}
