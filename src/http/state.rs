use std::sync::Arc;

use crate::cache::AuthCache;
use crate::config::Config;
use crate::db::Pool;
use crate::sync::SyncEngine;
use crate::zoho::ZohoService;

/// Shared application state available to all handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything non-trivial is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub cache: Arc<AuthCache>,
    pub zoho: Arc<dyn ZohoService>,
    pub sync: Arc<SyncEngine>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(pool: Pool, zoho: Arc<dyn ZohoService>, config: Arc<Config>) -> Self {
        let sync = Arc::new(SyncEngine::new(pool.clone(), zoho.clone()));
        Self {
            pool,
            cache: Arc::new(AuthCache::new()),
            zoho,
            sync,
            config,
        }
    }
}
