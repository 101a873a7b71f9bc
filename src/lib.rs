pub mod bus;
pub mod fetch;
pub mod hub;
pub mod refresh;
pub mod registry;
pub mod store;
pub mod teamcity;
pub mod types;

pub use bus::{ClientBus, ClientNotifier, Envelope, SharedClientBus};
pub use fetch::BuildStatusProvider;
pub use hub::{DashboardHub, HubCommand};
pub use refresh::{RefreshOrchestrator, WatcherConfig};
pub use registry::SubscriptionRegistry;
pub use store::{MemoryStore, ProjectStore};
pub use teamcity::{TeamCityClient, TeamCityConfig};
pub use types::{
    BuildConfig, BuildId, BuildStatus, ClientMessage, ConnectionId, FeedbackLevel, Project,
    RefreshPhase, StatusUpdate,
};
