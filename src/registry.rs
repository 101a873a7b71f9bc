use crate::types::{BuildId, ConnectionId};
use dashmap::{DashMap, DashSet};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Connection <-> build-id subscription index plus the set of build ids the
/// global refresh cycle must fetch.
///
/// Backed by sharded maps, so operations on disjoint connections or build ids
/// never contend on a common lock. The forward index, reverse index and
/// pending set are not updated under one transaction; they are mutually
/// consistent by the time each public operation returns, which is enough for
/// the refresh cycle that reads them.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    // connection -> builds it watches
    forward: Arc<DashMap<ConnectionId, HashSet<BuildId>>>,
    // build -> connections watching it
    reverse: Arc<DashMap<BuildId, HashSet<ConnectionId>>>,
    // domain of `reverse`, materialized for the global refresh cycle
    pending: Arc<DashSet<BuildId>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the connection's whole subscription set. Ids that are empty
    /// or still carry the unlinked-build placeholder prefix are dropped.
    pub fn replace_subscriptions(
        &self,
        conn: &ConnectionId,
        build_ids: impl IntoIterator<Item = BuildId>,
    ) {
        self.remove_all_subscriptions(conn);

        let builds: HashSet<BuildId> = build_ids
            .into_iter()
            .filter(BuildId::is_watchable)
            .collect();
        for build in &builds {
            self.reverse
                .entry(build.clone())
                .or_default()
                .insert(conn.clone());
            self.pending.insert(build.clone());
        }
        // Insert even when empty: the connection still takes part in global
        // refresh lifecycle notices.
        self.forward.insert(conn.clone(), builds);
    }

    /// Adds to the connection's subscription set without touching what is
    /// already there. Idempotent.
    pub fn merge_subscriptions(
        &self,
        conn: &ConnectionId,
        build_ids: impl IntoIterator<Item = BuildId>,
    ) {
        let builds: Vec<BuildId> = build_ids
            .into_iter()
            .filter(BuildId::is_watchable)
            .collect();
        if builds.is_empty() {
            return;
        }
        self.forward
            .entry(conn.clone())
            .or_default()
            .extend(builds.iter().cloned());
        for build in builds {
            self.reverse
                .entry(build.clone())
                .or_default()
                .insert(conn.clone());
            self.pending.insert(build);
        }
    }

    /// Removes one (connection, build) pair. The build id leaves the pending
    /// set when its last subscriber is gone.
    pub fn remove_subscription(&self, conn: &ConnectionId, build_id: &BuildId) {
        if let Some(mut builds) = self.forward.get_mut(conn) {
            builds.remove(build_id);
        }
        self.collect_if_orphaned(conn, build_id);
        debug!(build=%build_id, conn=%conn, "removed subscription");
    }

    /// Removes everything the connection subscribed to, garbage-collecting
    /// each build id it was the last subscriber of. Invoked on disconnect.
    pub fn remove_all_subscriptions(&self, conn: &ConnectionId) {
        let builds = match self.forward.remove(conn) {
            Some((_, builds)) => builds,
            None => return,
        };
        for build in &builds {
            self.collect_if_orphaned(conn, build);
        }
        debug!(conn=%conn, count = builds.len(), "removed all subscriptions");
    }

    /// Connections currently watching `build_id`, snapshotted.
    pub fn subscribers_of(&self, build_id: &BuildId) -> Vec<ConnectionId> {
        self.reverse
            .get(build_id)
            .map(|conns| conns.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Builds the given connection currently watches, snapshotted.
    pub fn builds_for(&self, conn: &ConnectionId) -> Vec<BuildId> {
        self.forward
            .get(conn)
            .map(|builds| builds.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// All known connections, snapshotted. Target set of a global refresh.
    pub fn connections(&self) -> Vec<ConnectionId> {
        self.forward.iter().map(|e| e.key().clone()).collect()
    }

    /// Build ids with at least one subscriber, snapshotted. Fetch set of a
    /// global refresh.
    pub fn pending_builds(&self) -> Vec<BuildId> {
        self.pending.iter().map(|b| b.clone()).collect()
    }

    pub fn is_subscribed(&self, conn: &ConnectionId, build_id: &BuildId) -> bool {
        self.forward
            .get(conn)
            .map(|builds| builds.contains(build_id))
            .unwrap_or(false)
    }

    // Drops `conn` from the build's reverse bucket; when the bucket empties,
    // deletes it and retires the id from the pending set. The guard must be
    // released before the keyed remove or the shard would deadlock.
    fn collect_if_orphaned(&self, conn: &ConnectionId, build_id: &BuildId) {
        let orphaned = {
            match self.reverse.get_mut(build_id) {
                Some(mut conns) => {
                    conns.remove(conn);
                    conns.is_empty()
                }
                None => false,
            }
        };
        if orphaned
            && self
                .reverse
                .remove_if(build_id, |_, conns| conns.is_empty())
                .is_some()
        {
            self.pending.remove(build_id);
        }
    }
}
