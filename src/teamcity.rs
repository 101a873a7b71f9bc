use crate::fetch::BuildStatusProvider;
use crate::types::{BuildId, BuildStatus, StatusUpdate};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, error};

#[derive(Clone, Debug, Deserialize)]
pub struct TeamCityConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for TeamCityConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            username: None,
            password: None,
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8111".into()
}

/// REST client for a TeamCity server. Uses `guestAuth` unless credentials are
/// configured.
pub struct TeamCityClient {
    client: reqwest::Client,
    cfg: TeamCityConfig,
}

impl TeamCityClient {
    pub fn new(cfg: TeamCityConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("failed to build http client")?;
        Ok(Self { client, cfg })
    }

    fn rest_url(&self, path: &str) -> String {
        let auth = if self.cfg.username.is_some() {
            "httpAuth"
        } else {
            "guestAuth"
        };
        format!(
            "{}/{}/app/rest/{}",
            self.cfg.base_url.trim_end_matches('/'),
            auth,
            path
        )
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let mut request = self
            .client
            .get(self.rest_url(path))
            .header("Accept", "application/json");
        if let (Some(user), Some(pass)) = (&self.cfg.username, &self.cfg.password) {
            request = request.basic_auth(user, Some(pass));
        }
        let response = request.send().await?.error_for_status()?;
        Ok(response.json::<T>().await?)
    }

    async fn last_finished_build(&self, build_id: &BuildId) -> Result<BuildRef> {
        let path = format!("builds?locator=buildType:{build_id},running:false,count:1");
        let builds: BuildList = self.get_json(&path).await?;
        builds
            .build
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no finished build for {build_id}"))
    }

    async fn build_detail(&self, id: i64) -> Result<BuildDetail> {
        self.get_json(&format!("builds/id:{id}")).await
    }

    // A build without statistics is still a valid result; the counters just
    // stay at zero.
    async fn build_statistics(&self, id: i64) -> HashMap<String, String> {
        match self
            .get_json::<StatisticsList>(&format!("builds/id:{id}/statistics"))
            .await
        {
            Ok(stats) => stats
                .property
                .into_iter()
                .map(|p| (p.name, p.value))
                .collect(),
            Err(e) => {
                error!(err=%e, build=%id, "failed to fetch build statistics");
                HashMap::new()
            }
        }
    }

    async fn is_running_a_build(&self, build_id: &BuildId) -> Result<bool> {
        let path = format!("builds?locator=buildType:{build_id},running:true");
        let builds: BuildList = self.get_json(&path).await?;
        Ok(builds.count > 0)
    }
}

#[async_trait]
impl BuildStatusProvider for TeamCityClient {
    async fn latest_build(&self, build_id: &BuildId) -> Result<StatusUpdate> {
        debug!(build=%build_id, "retrieving last build");
        let build = self.last_finished_build(build_id).await?;

        debug!(build=%build.id, "retrieving build details");
        let detail = self.build_detail(build.id).await?;
        let stats = self.build_statistics(build.id).await;

        let mut update = StatusUpdate {
            external_id: build_id.0.clone(),
            name: detail.build_type.map(|bt| bt.name).unwrap_or_default(),
            version: detail.number.unwrap_or_default(),
            status: parse_status(detail.status.as_deref()),
            url: detail.web_url.unwrap_or_default(),
            start_time: detail.start_date.as_deref().and_then(parse_timestamp),
            finish_time: detail.finish_date.as_deref().and_then(parse_timestamp),
            tests_passed: stat(&stats, "PassedTestCount"),
            tests_failed: stat(&stats, "FailedTestCount"),
            tests_ignored: stat(&stats, "IgnoredTestCount"),
            statements_covered: stat(&stats, "CodeCoverageAbsSCovered"),
            statements_total: stat(&stats, "CodeCoverageAbsSTotal"),
        };

        if self.is_running_a_build(build_id).await.unwrap_or(false) {
            update.status = BuildStatus::Running;
        }
        Ok(update)
    }
}

fn stat(stats: &HashMap<String, String>, key: &str) -> u32 {
    stats
        .get(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or_default()
}

fn parse_status(status: Option<&str>) -> BuildStatus {
    match status {
        Some("SUCCESS") => BuildStatus::Success,
        Some("FAILURE") | Some("ERROR") => BuildStatus::Failure,
        _ => BuildStatus::Unknown,
    }
}

// TeamCity timestamps look like `20150823T174523+0000`.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, "%Y%m%dT%H%M%S%z")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[derive(Debug, Deserialize)]
struct BuildList {
    #[serde(default)]
    count: u32,
    #[serde(default)]
    build: Vec<BuildRef>,
}

#[derive(Debug, Deserialize)]
struct BuildRef {
    id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildDetail {
    #[serde(default)]
    number: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    web_url: Option<String>,
    #[serde(default)]
    start_date: Option<String>,
    #[serde(default)]
    finish_date: Option<String>,
    #[serde(default)]
    build_type: Option<BuildTypeRef>,
}

#[derive(Debug, Deserialize)]
struct BuildTypeRef {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct StatisticsList {
    #[serde(default)]
    property: Vec<StatProperty>,
}

#[derive(Debug, Deserialize)]
struct StatProperty {
    name: String,
    value: String,
}
