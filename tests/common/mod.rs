use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ci_build_watcher::{
    BuildId, BuildStatusProvider, ClientMessage, ClientNotifier, ConnectionId, StatusUpdate,
    SubscriptionRegistry,
};
use dashmap::DashMap;
use std::sync::Mutex;

/// Notifier that records every envelope instead of delivering it.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(Option<ConnectionId>, ClientMessage)>>,
}

#[allow(dead_code)]
impl RecordingNotifier {
    pub fn messages_for(&self, conn: &ConnectionId) -> Vec<ClientMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| to.as_ref() == Some(conn))
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn broadcasts(&self) -> Vec<ClientMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| to.is_none())
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn status_updates_for(&self, conn: &ConnectionId) -> Vec<StatusUpdate> {
        self.messages_for(conn)
            .into_iter()
            .filter_map(|m| match m {
                ClientMessage::Status(update) => Some(update),
                _ => None,
            })
            .collect()
    }

    pub fn status_dispatch_count(&self) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, m)| matches!(m, ClientMessage::Status(_)))
            .count()
    }
}

impl ClientNotifier for RecordingNotifier {
    fn send(&self, conn: &ConnectionId, message: ClientMessage) {
        self.sent
            .lock()
            .unwrap()
            .push((Some(conn.clone()), message));
    }

    fn broadcast(&self, message: ClientMessage) {
        self.sent.lock().unwrap().push((None, message));
    }
}

/// Provider backed by a fixed map of results; unknown build ids fail. Counts
/// fetches per id.
#[derive(Default)]
pub struct StaticProvider {
    results: DashMap<BuildId, StatusUpdate>,
    pub fetches: DashMap<BuildId, usize>,
}

#[allow(dead_code)]
impl StaticProvider {
    pub fn with_build(self, id: &str) -> Self {
        self.results.insert(
            BuildId::from(id),
            StatusUpdate {
                external_id: id.to_string(),
                name: format!("build {id}"),
                ..StatusUpdate::default()
            },
        );
        self
    }

    pub fn fetch_count(&self, id: &str) -> usize {
        self.fetches
            .get(&BuildId::from(id))
            .map(|c| *c)
            .unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.fetches.iter().map(|e| *e.value()).sum()
    }
}

#[async_trait]
impl BuildStatusProvider for StaticProvider {
    async fn latest_build(&self, build_id: &BuildId) -> Result<StatusUpdate> {
        *self.fetches.entry(build_id.clone()).or_insert(0) += 1;
        self.results
            .get(build_id)
            .map(|u| u.clone())
            .ok_or_else(|| anyhow!("no build result for {build_id}"))
    }
}

/// Provider that tears down a connection's subscriptions while the fetch is
/// in flight, to exercise dispatch-time recipient resolution.
#[allow(dead_code)]
pub struct UnsubscribingProvider {
    pub registry: SubscriptionRegistry,
    pub victim: ConnectionId,
}

#[async_trait]
impl BuildStatusProvider for UnsubscribingProvider {
    async fn latest_build(&self, build_id: &BuildId) -> Result<StatusUpdate> {
        self.registry.remove_all_subscriptions(&self.victim);
        Ok(StatusUpdate {
            external_id: build_id.0.clone(),
            ..StatusUpdate::default()
        })
    }
}
