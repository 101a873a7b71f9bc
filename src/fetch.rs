use crate::types::{BuildId, StatusUpdate};
use anyhow::Result;
use async_trait::async_trait;

/// Adapter to the external CI server. Safe to call concurrently for distinct
/// build ids; the refresh cycle treats every failure the same way (log and
/// skip that id for the cycle).
#[async_trait]
pub trait BuildStatusProvider: Send + Sync {
    async fn latest_build(&self, build_id: &BuildId) -> Result<StatusUpdate>;
}
