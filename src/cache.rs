//! Authorization cache: per-user project-id sets plus a shared project
//! detail table, kept in process memory behind `RwLock`s.
//!
//! The cache is a disposable projection. Reconciliation and webhook updates
//! write it; the read path falls back to the relational store on a miss and
//! repopulates both tables from the result.

use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;
use tracing::{error, warn};

use crate::db::{self, Pool};
use crate::model::Project;

#[derive(Default)]
pub struct AuthCache {
    user_ids: RwLock<HashMap<String, HashSet<String>>>,
    projects: RwLock<HashMap<String, Project>>,
}

impl AuthCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached project-id set for a user, if one has been populated.
    pub async fn user_project_ids(&self, email: &str) -> Option<HashSet<String>> {
        self.user_ids.read().await.get(email).cloned()
    }

    /// Swap a user's id-set wholesale. Clearing before repopulating is what
    /// makes revoked projects disappear.
    pub async fn replace_user_projects(&self, email: &str, ids: HashSet<String>) {
        self.user_ids.write().await.insert(email.to_string(), ids);
    }

    pub async fn upsert_project(&self, project: Project) {
        self.projects
            .write()
            .await
            .insert(project.id.clone(), project);
    }

    pub async fn get_project(&self, id: &str) -> Option<Project> {
        self.projects.read().await.get(id).cloned()
    }

    /// Batch-fetch details for an id-set. Ids without a cached detail row
    /// are skipped; reconciliation heals them on its next pass.
    pub async fn projects_by_ids(&self, ids: &HashSet<String>) -> Vec<Project> {
        let projects = self.projects.read().await;
        let mut found: Vec<Project> = ids
            .iter()
            .filter_map(|id| projects.get(id).cloned())
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }
}

/// The projects a user may see.
///
/// Cache first; on an absent or empty id-set, fall back to the relational
/// join and repopulate the cache from it. A relational failure yields an
/// empty list rather than an error so the jobs page always renders.
pub async fn visible_projects(cache: &AuthCache, pool: &Pool, email: &str) -> Vec<Project> {
    if let Some(ids) = cache.user_project_ids(email).await {
        if !ids.is_empty() {
            return cache.projects_by_ids(&ids).await;
        }
    }

    let from_store = match db::projects_for_user(pool, email).await {
        Ok(projects) => projects,
        Err(err) => {
            error!(?err, email, "project lookup failed; returning no projects");
            return Vec::new();
        }
    };

    if from_store.is_empty() {
        warn!(email, "user has no visible projects");
    }

    let ids: HashSet<String> = from_store.iter().map(|p| p.id.clone()).collect();
    for project in &from_store {
        cache.upsert_project(project.clone()).await;
    }
    cache.replace_user_projects(email, ids).await;
    from_store
}
