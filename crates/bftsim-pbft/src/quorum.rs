//! Quorum certificate bookkeeping.
//!
//! Two flavours:
//!
//! - [`QuorumSet`]: one vote per participant per key; a quorum is any
//!   `required` distinct participants.
//! - [`ByzantineQuorumSet`]: per key, participants are bucketed by the exact
//!   content they voted for; a quorum is `required` distinct supporters of
//!   one content value.
//!
//! Both recompute the threshold on every call with `>=`, so a quorum stays
//! detected once crossed. Neither ever rejects a vote.

use std::collections::{BTreeMap, BTreeSet};

use bftsim_types::ReplicaId;

// ============================================================================
// QuorumSet
// ============================================================================

/// Collects one vote per participant for each key.
///
/// A later vote from the same participant for the same key replaces the
/// earlier one.
#[derive(Debug, Clone)]
pub struct QuorumSet<K, V> {
    required: usize,
    entries: BTreeMap<K, BTreeMap<ReplicaId, V>>,
}

impl<K: Ord, V> QuorumSet<K, V> {
    pub fn new(required: usize) -> Self {
        Self {
            required,
            entries: BTreeMap::new(),
        }
    }

    /// Number of distinct participants that make a quorum.
    pub fn required(&self) -> usize {
        self.required
    }

    /// Stores `vote` for `participant` under `key`.
    ///
    /// Returns every vote for `key` if there are at least `required` of them.
    pub fn record(
        &mut self,
        key: K,
        participant: ReplicaId,
        vote: V,
    ) -> Option<&BTreeMap<ReplicaId, V>> {
        let votes = self.entries.entry(key).or_default();
        votes.insert(participant, vote);
        (votes.len() >= self.required).then_some(&*votes)
    }

    /// Current votes for `key`, quorum or not.
    pub fn peek(&self, key: &K) -> Option<&BTreeMap<ReplicaId, V>> {
        self.entries.get(key)
    }

    /// Votes for `key` if they form a quorum.
    pub fn check(&self, key: &K) -> Option<&BTreeMap<ReplicaId, V>> {
        self.entries
            .get(key)
            .filter(|votes| votes.len() >= self.required)
    }

    pub fn clear(&mut self, key: &K) {
        self.entries.remove(key);
    }

    pub fn clear_all(&mut self) {
        self.entries.clear();
    }

    /// Number of keys with at least one vote.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// ByzantineQuorumSet
// ============================================================================

/// Counts distinct supporters per content value for each key.
///
/// A participant that votes for two different contents under one key is a
/// supporter of both.
#[derive(Debug, Clone)]
pub struct ByzantineQuorumSet<K, C> {
    required: usize,
    entries: BTreeMap<K, BTreeMap<C, BTreeSet<ReplicaId>>>,
}

impl<K: Ord, C: Ord> ByzantineQuorumSet<K, C> {
    pub fn new(required: usize) -> Self {
        Self {
            required,
            entries: BTreeMap::new(),
        }
    }

    pub fn required(&self) -> usize {
        self.required
    }

    /// Adds `participant` to the supporters of `content` under `key`.
    ///
    /// Returns whether that content now has at least `required` supporters.
    pub fn record(&mut self, key: K, participant: ReplicaId, content: C) -> bool {
        let supporters = self
            .entries
            .entry(key)
            .or_default()
            .entry(content)
            .or_default();
        supporters.insert(participant);
        supporters.len() >= self.required
    }

    /// Number of distinct supporters of `content` under `key`.
    pub fn supporters(&self, key: &K, content: &C) -> usize {
        self.entries
            .get(key)
            .and_then(|contents| contents.get(content))
            .map_or(0, BTreeSet::len)
    }

    /// A content value under `key` that has reached the threshold, if any.
    pub fn quorum_content(&self, key: &K) -> Option<&C> {
        self.entries.get(key)?.iter().find_map(|(content, supporters)| {
            (supporters.len() >= self.required).then_some(content)
        })
    }

    pub fn clear(&mut self, key: &K) {
        self.entries.remove(key);
    }

    pub fn clear_all(&mut self) {
        self.entries.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================
