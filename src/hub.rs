use crate::bus::ClientNotifier;
use crate::refresh::RefreshOrchestrator;
use crate::registry::SubscriptionRegistry;
use crate::store::ProjectStore;
use crate::types::{BuildConfig, BuildId, ClientMessage, ConnectionId, Project};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error};

/// Transport-agnostic entry points for everything a client can ask for. The
/// transport layer (whatever it is) maps its own frames onto these calls; all
/// replies travel back through the notifier, never as return values.
pub struct DashboardHub {
    registry: SubscriptionRegistry,
    refresh: RefreshOrchestrator,
    store: Arc<dyn ProjectStore>,
    notifier: Arc<dyn ClientNotifier>,
}

/// Client-originated commands in wire form, for transports that speak JSON.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum HubCommand {
    RequestRefresh,
    RequestAllProjectBuilds,
    Subscribe { builds: Vec<BuildConfig> },
    AddSubscriptions { builds: Vec<BuildConfig> },
    Unsubscribe { build: BuildConfig },
    AddProject { project: Project },
    UpdateProjectName { project_id: i64, name: String },
    RemoveProject { project_id: i64 },
    AddBuildToProject { project_id: i64, build: BuildConfig },
    RemoveBuild { build_id: i64 },
    UpdateBuildExternalId { build_id: i64, name: String, external_id: String },
}

impl DashboardHub {
    pub fn new(
        registry: SubscriptionRegistry,
        refresh: RefreshOrchestrator,
        store: Arc<dyn ProjectStore>,
        notifier: Arc<dyn ClientNotifier>,
    ) -> Self {
        Self {
            registry,
            refresh,
            store,
            notifier,
        }
    }

    pub async fn dispatch(&self, user: &str, conn: &ConnectionId, command: HubCommand) {
        match command {
            HubCommand::RequestRefresh => self.request_refresh(conn).await,
            HubCommand::RequestAllProjectBuilds => self.request_all_project_builds(conn).await,
            HubCommand::Subscribe { builds } => self.subscribe(conn, &builds),
            HubCommand::AddSubscriptions { builds } => self.add_subscriptions(conn, &builds),
            HubCommand::Unsubscribe { build } => self.unsubscribe(conn, &build),
            HubCommand::AddProject { project } => self.add_project(user, conn, project).await,
            HubCommand::UpdateProjectName { project_id, name } => {
                self.update_project_name(conn, project_id, &name).await
            }
            HubCommand::RemoveProject { project_id } => self.remove_project(conn, project_id).await,
            HubCommand::AddBuildToProject { project_id, build } => {
                self.add_build_to_project(conn, project_id, build).await
            }
            HubCommand::RemoveBuild { build_id } => self.remove_build(conn, build_id).await,
            HubCommand::UpdateBuildExternalId {
                build_id,
                name,
                external_id,
            } => {
                self.update_build_external_id(conn, build_id, &name, &external_id)
                    .await
            }
        }
    }

    /// Connect flow: push the user's projects, register their builds as this
    /// connection's subscriptions, then refresh just this connection.
    pub async fn on_connected(&self, user: &str, conn: &ConnectionId) {
        debug!(user, conn=%conn, "connected");
        self.send_projects_and_register(user, conn).await;
        self.refresh.refresh_connection(conn).await;
    }

    /// Reconnect re-registers subscriptions but does not trigger a refresh;
    /// the next periodic cycle picks the builds up.
    pub async fn on_reconnected(&self, user: &str, conn: &ConnectionId) {
        debug!(user, conn=%conn, "reconnected");
        self.send_projects_and_register(user, conn).await;
    }

    pub fn on_disconnected(&self, conn: &ConnectionId) {
        debug!(conn=%conn, "disconnected");
        self.registry.remove_all_subscriptions(conn);
    }

    pub async fn request_refresh(&self, conn: &ConnectionId) {
        self.refresh.refresh_connection(conn).await;
    }

    pub async fn request_all_project_builds(&self, conn: &ConnectionId) {
        match self.store.all_build_configs().await {
            Ok(builds) => self
                .notifier
                .send(conn, ClientMessage::BuildSnapshot(builds)),
            Err(e) => error!(err=%e, "failed to load all project builds"),
        }
    }

    /// Full replace of the connection's watched set.
    pub fn subscribe(&self, conn: &ConnectionId, builds: &[BuildConfig]) {
        self.registry
            .replace_subscriptions(conn, builds.iter().map(|b| BuildId::new(&*b.external_id)));
    }

    /// Additive subscription update.
    pub fn add_subscriptions(&self, conn: &ConnectionId, builds: &[BuildConfig]) {
        self.registry
            .merge_subscriptions(conn, builds.iter().map(|b| BuildId::new(&*b.external_id)));
    }

    pub fn unsubscribe(&self, conn: &ConnectionId, build: &BuildConfig) {
        self.registry
            .remove_subscription(conn, &BuildId::new(&*build.external_id));
    }

    pub async fn add_project(&self, user: &str, conn: &ConnectionId, project: Project) {
        let old_id = project.id;
        match self.store.add_project(user, project).await {
            Ok(created) => self.notifier.send(
                conn,
                ClientMessage::ProjectUpdated {
                    old_id,
                    project: created,
                },
            ),
            Err(e) => error!(err=%e, "failed to add project"),
        }
    }

    pub async fn update_project_name(&self, conn: &ConnectionId, project_id: i64, name: &str) {
        match self.store.rename_project(project_id, name).await {
            Ok(true) => self
                .notifier
                .send(conn, ClientMessage::success(format!("Project {name} updated."))),
            Ok(false) => {}
            Err(e) => error!(err=%e, project_id, "failed to rename project"),
        }
    }

    /// Removing a project also drops this connection's subscriptions to the
    /// project's builds.
    pub async fn remove_project(&self, conn: &ConnectionId, project_id: i64) {
        match self.store.remove_project(project_id).await {
            Ok(Some(removed)) => {
                for build in &removed.builds {
                    self.registry
                        .remove_subscription(conn, &BuildId::new(&*build.external_id));
                }
                self.notifier
                    .send(conn, ClientMessage::success("Project removed"));
            }
            Ok(None) => {}
            Err(e) => error!(err=%e, project_id, "failed to remove project"),
        }
    }

    pub async fn add_build_to_project(
        &self,
        conn: &ConnectionId,
        project_id: i64,
        build: BuildConfig,
    ) {
        let old_id = build.id;
        match self.store.add_build(project_id, build).await {
            Ok(Some(created)) => {
                self.add_subscriptions(conn, std::slice::from_ref(&created));
                self.notifier.send(
                    conn,
                    ClientMessage::BuildUpdated {
                        old_id,
                        build: created,
                    },
                );
            }
            Ok(None) => {}
            Err(e) => error!(err=%e, project_id, "failed to add build"),
        }
    }

    pub async fn remove_build(&self, conn: &ConnectionId, build_id: i64) {
        match self.store.remove_build(build_id).await {
            Ok(Some(removed)) => {
                self.unsubscribe(conn, &removed);
                self.notifier
                    .send(conn, ClientMessage::success("Build removed"));
            }
            Ok(None) => {}
            Err(e) => error!(err=%e, build_id, "failed to remove build"),
        }
    }

    pub async fn update_build_external_id(
        &self,
        conn: &ConnectionId,
        build_id: i64,
        name: &str,
        external_id: &str,
    ) {
        match self
            .store
            .update_build_external_id(build_id, name, external_id)
            .await
        {
            Ok(true) => {
                self.registry
                    .merge_subscriptions(conn, [BuildId::new(external_id)]);
                self.notifier
                    .send(conn, ClientMessage::success(format!("Build {name} updated.")));
            }
            Ok(false) => {}
            Err(e) => error!(err=%e, build_id, "failed to update build external id"),
        }
    }

    async fn send_projects_and_register(&self, user: &str, conn: &ConnectionId) {
        let projects = match self.store.projects_for(user).await {
            Ok(projects) => projects,
            Err(e) => {
                error!(err=%e, user, "failed to load user projects");
                Vec::new()
            }
        };
        let builds: Vec<BuildId> = projects
            .iter()
            .flat_map(|p| p.builds.iter())
            .map(|b| BuildId::new(&*b.external_id))
            .collect();
        self.registry.replace_subscriptions(conn, builds);

        debug!(user, conn=%conn, "sending projects and build configs");
        self.notifier
            .send(conn, ClientMessage::ProjectSnapshot(projects));
        self.notifier
            .send(conn, ClientMessage::info("Your builds are being retrieved"));
    }
}
