use crate::bus::ClientNotifier;
use crate::fetch::BuildStatusProvider;
use crate::registry::SubscriptionRegistry;
use crate::teamcity::TeamCityConfig;
use crate::types::{BuildId, ClientMessage, ConnectionId, RefreshPhase};
use futures::future::join_all;
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, error};

#[derive(Clone, Debug, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub teamcity: TeamCityConfig,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval(),
            listen_addr: default_listen_addr(),
            teamcity: TeamCityConfig::default(),
        }
    }
}

fn default_refresh_interval() -> u64 {
    300
}

fn default_listen_addr() -> String {
    "127.0.0.1:9200".into()
}

/// Drives one refresh cycle: fetch every target build id concurrently, then
/// push each result to whoever subscribes to it.
///
/// Cycles are not mutually exclusive. A targeted refresh overlapping the
/// periodic global one may fetch the same build id twice; subscribers just
/// see the status again.
#[derive(Clone)]
pub struct RefreshOrchestrator {
    registry: SubscriptionRegistry,
    provider: Arc<dyn BuildStatusProvider>,
    notifier: Arc<dyn ClientNotifier>,
}

impl RefreshOrchestrator {
    pub fn new(
        registry: SubscriptionRegistry,
        provider: Arc<dyn BuildStatusProvider>,
        notifier: Arc<dyn ClientNotifier>,
    ) -> Self {
        Self {
            registry,
            provider,
            notifier,
        }
    }

    /// Global cycle: every connection is notified, every pending build id is
    /// fetched once, and each result fans out to the connections subscribed
    /// to it at dispatch time.
    pub async fn refresh_all(&self) {
        self.run_cycle(None).await;
    }

    /// Targeted cycle: only `conn` is notified and only its own build ids are
    /// fetched; results go to that connection alone.
    pub async fn refresh_connection(&self, conn: &ConnectionId) {
        self.run_cycle(Some(conn)).await;
    }

    /// Periodic global refresh on a fixed interval (5 minutes by default).
    /// The interval is floored to 30s.
    pub fn spawn_periodic(&self, interval_secs: u64) -> tokio::task::JoinHandle<()> {
        let orchestrator = self.clone();
        let secs = interval_secs.max(30);
        tokio::spawn(async move {
            loop {
                sleep(Duration::from_secs(secs)).await;
                orchestrator.refresh_all().await;
            }
        })
    }

    async fn run_cycle(&self, target: Option<&ConnectionId>) {
        let targets: Vec<ConnectionId> = match target {
            Some(conn) => vec![conn.clone()],
            None => self.registry.connections(),
        };
        for conn in &targets {
            debug!(conn=%conn, "refreshing build results");
            self.notifier
                .send(conn, ClientMessage::info("Your builds are being refreshed"));
            self.notifier
                .send(conn, ClientMessage::lifecycle(RefreshPhase::Start));
        }

        let builds: Vec<BuildId> = match target {
            Some(conn) => self.registry.builds_for(conn),
            None => self.registry.pending_builds(),
        };
        let fetches = builds
            .iter()
            .map(|build| self.fetch_and_dispatch(build, target));
        join_all(fetches).await;

        // The stop notice goes to every connection, even when the cycle was
        // targeted.
        self.notifier
            .broadcast(ClientMessage::lifecycle(RefreshPhase::Stop));
    }

    async fn fetch_and_dispatch(&self, build: &BuildId, target: Option<&ConnectionId>) {
        match self.provider.latest_build(build).await {
            Ok(update) => {
                // Recipients are resolved now, not at cycle start, so a
                // connection that unsubscribed mid-cycle is skipped.
                let recipients = match target {
                    Some(conn) => vec![conn.clone()],
                    None => self.registry.subscribers_of(build),
                };
                for conn in recipients {
                    debug!(build=%build, conn=%conn, "sending build result");
                    self.notifier.send(&conn, ClientMessage::Status(update.clone()));
                }
            }
            Err(e) => {
                error!(err=%e, build=%build, "failed to fetch latest build result");
            }
        }
    }
}
