//! Control-plane route sync.
//!
//! A `RouteSource` produces complete route tables. Each table is built into
//! chains up front and installed with one atomic swap; if any route fails to
//! build, nothing changes and the previous table keeps serving.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use chainward_core::error::{ChainwardError, Result};

use crate::app_state::AppState;
use crate::config::{self, RouteConfig};

#[async_trait]
pub trait RouteSource: Send + Sync {
    /// Human-readable origin, for logs.
    fn describe(&self) -> String;

    /// The full route table, or `None` when nothing changed since the last call.
    async fn snapshot(&self) -> Result<Option<Vec<RouteConfig>>>;
}

/// Routes document on local disk, re-read when its mtime moves.
pub struct FileRouteSource {
    path: PathBuf,
    last_modified: Mutex<Option<SystemTime>>,
}

impl FileRouteSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_modified: Mutex::new(None),
        }
    }
}

#[async_trait]
impl RouteSource for FileRouteSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn snapshot(&self) -> Result<Option<Vec<RouteConfig>>> {
        let meta = tokio::fs::metadata(&self.path).await.map_err(|e| {
            ChainwardError::Config(format!("stat {} failed: {e}", self.path.display()))
        })?;
        let modified = meta.modified().ok();

        {
            let last = self
                .last_modified
                .lock()
                .map_err(|_| ChainwardError::Internal("route source lock poisoned".into()))?;
            if modified.is_some() && *last == modified {
                return Ok(None);
            }
        }

        let text = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ChainwardError::Config(format!("read {} failed: {e}", self.path.display()))
        })?;
        let doc = config::load_routes_from_str(&text)?;

        // only remember the mtime once the document parsed, so a bad edit is retried
        *self
            .last_modified
            .lock()
            .map_err(|_| ChainwardError::Internal("route source lock poisoned".into()))? = modified;
        Ok(Some(doc.routes))
    }
}

/// Build every route's chain and replace the whole table. All or nothing.
pub fn sync_routes(app: &AppState, routes: &[RouteConfig]) -> Result<usize> {
    config::schema::validate_routes(routes)?;

    let mut table = HashMap::with_capacity(routes.len());
    for route in routes {
        let chain = app
            .policies()
            .build_chain(&route.policies)
            .map_err(|e| ChainwardError::Config(format!("route {}: {e}", route.key)))?;
        table.insert(route.key.clone(), chain);
    }

    let count = table.len();
    app.kernel().apply_whole_routes(table);
    Ok(count)
}

/// Pull once from `source` and apply. Returns whether a new table went in.
pub async fn sync_once(app: &AppState, source: &dyn RouteSource) -> Result<bool> {
    let Some(routes) = source.snapshot().await? else {
        app.metrics().route_syncs.inc(&[("result", "unchanged")]);
        return Ok(false);
    };
    match sync_routes(app, &routes) {
        Ok(count) => {
            app.metrics().route_syncs.inc(&[("result", "applied")]);
            tracing::info!(source = %source.describe(), routes = count, "route table applied");
            Ok(true)
        }
        Err(e) => {
            app.metrics().route_syncs.inc(&[("result", "rejected")]);
            Err(e)
        }
    }
}

/// Poll `source` forever. Failures are logged and the current table stays.
pub async fn run_sync_loop(app: AppState, source: Arc<dyn RouteSource>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = sync_once(&app, source.as_ref()).await {
            tracing::warn!(source = %source.describe(), error = %e, "route sync failed; keeping current table");
        }
    }
}
