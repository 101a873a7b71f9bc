use crate::types::{BuildConfig, Project};
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};

/// Persistence boundary for user-owned project/build configuration records.
/// The watcher only reads the shapes; where they actually live is someone
/// else's problem.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn projects_for(&self, user: &str) -> Result<Vec<Project>>;
    async fn all_build_configs(&self) -> Result<Vec<BuildConfig>>;
    async fn add_project(&self, user: &str, project: Project) -> Result<Project>;
    async fn rename_project(&self, project_id: i64, name: &str) -> Result<bool>;
    async fn remove_project(&self, project_id: i64) -> Result<Option<Project>>;
    async fn add_build(&self, project_id: i64, build: BuildConfig) -> Result<Option<BuildConfig>>;
    async fn remove_build(&self, build_id: i64) -> Result<Option<BuildConfig>>;
    async fn update_build_external_id(
        &self,
        build_id: i64,
        name: &str,
        external_id: &str,
    ) -> Result<bool>;
}

/// In-memory store, used by the binary and the tests.
#[derive(Default)]
pub struct MemoryStore {
    projects: DashMap<String, Vec<Project>>,
    next_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, user: &str, projects: Vec<Project>) {
        for mut project in projects {
            project.id = self.fresh_id();
            for build in &mut project.builds {
                build.id = self.fresh_id();
            }
            self.projects.entry(user.to_string()).or_default().push(project);
        }
    }

    fn fresh_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn projects_for(&self, user: &str) -> Result<Vec<Project>> {
        Ok(self
            .projects
            .get(user)
            .map(|p| p.clone())
            .unwrap_or_default())
    }

    async fn all_build_configs(&self) -> Result<Vec<BuildConfig>> {
        Ok(self
            .projects
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .flat_map(|p| p.builds.clone())
                    .collect::<Vec<_>>()
            })
            .collect())
    }

    async fn add_project(&self, user: &str, mut project: Project) -> Result<Project> {
        project.id = self.fresh_id();
        for build in &mut project.builds {
            build.id = self.fresh_id();
        }
        self.projects
            .entry(user.to_string())
            .or_default()
            .push(project.clone());
        Ok(project)
    }

    async fn rename_project(&self, project_id: i64, name: &str) -> Result<bool> {
        for mut entry in self.projects.iter_mut() {
            if let Some(project) = entry.value_mut().iter_mut().find(|p| p.id == project_id) {
                project.name = name.to_string();
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn remove_project(&self, project_id: i64) -> Result<Option<Project>> {
        for mut entry in self.projects.iter_mut() {
            if let Some(pos) = entry.value().iter().position(|p| p.id == project_id) {
                return Ok(Some(entry.value_mut().remove(pos)));
            }
        }
        Ok(None)
    }

    async fn add_build(&self, project_id: i64, mut build: BuildConfig) -> Result<Option<BuildConfig>> {
        for mut entry in self.projects.iter_mut() {
            if let Some(project) = entry.value_mut().iter_mut().find(|p| p.id == project_id) {
                build.id = self.fresh_id();
                project.builds.push(build.clone());
                return Ok(Some(build));
            }
        }
        Ok(None)
    }

    async fn remove_build(&self, build_id: i64) -> Result<Option<BuildConfig>> {
        for mut entry in self.projects.iter_mut() {
            for project in entry.value_mut().iter_mut() {
                if let Some(pos) = project.builds.iter().position(|b| b.id == build_id) {
                    return Ok(Some(project.builds.remove(pos)));
                }
            }
        }
        Ok(None)
    }

    async fn update_build_external_id(
        &self,
        build_id: i64,
        name: &str,
        external_id: &str,
    ) -> Result<bool> {
        for mut entry in self.projects.iter_mut() {
            for project in entry.value_mut().iter_mut() {
                if let Some(build) = project.builds.iter_mut().find(|b| b.id == build_id) {
                    build.name = name.to_string();
                    build.external_id = external_id.to_string();
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}
