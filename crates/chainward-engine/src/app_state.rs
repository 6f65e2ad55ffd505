//! Shared application state for the chainward engine.
//!
//! One instance per process, cloned into every stream task and admin
//! handler. The route registry is the only part written after boot.

use std::sync::Arc;

use chainward_core::error::{ChainwardError, Result};

use crate::condition::{ConditionEvaluator, LiteralEvaluator};
use crate::config::EngineConfig;
use crate::control;
use crate::kernel::{Kernel, PolicyRegistry, Translator};
use crate::obs::metrics::EngineMetrics;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    cfg: EngineConfig,
    kernel: Kernel,
    policies: PolicyRegistry,
    evaluator: Arc<dyn ConditionEvaluator>,
    translator: Translator,
    metrics: EngineMetrics,
}

impl AppState {
    /// Build application state and install the config's inline routes.
    pub fn new(
        cfg: EngineConfig,
        policies: PolicyRegistry,
        evaluator: Arc<dyn ConditionEvaluator>,
    ) -> Result<Self> {
        if cfg.control_plane.routes_file.is_some() && !cfg.routes.is_empty() {
            return Err(ChainwardError::Config(
                "inline routes and control_plane.routes_file are mutually exclusive".into(),
            ));
        }

        let translator = Translator::new(cfg.server.engine_namespace.clone());
        let state = Self {
            inner: Arc::new(AppStateInner {
                cfg,
                kernel: Kernel::new(),
                policies,
                evaluator,
                translator,
                metrics: EngineMetrics::default(),
            }),
        };

        if !state.cfg().routes.is_empty() {
            let routes = state.cfg().routes.clone();
            let count = control::sync_routes(&state, &routes)?;
            tracing::info!(routes = count, "inline routes installed");
        }

        Ok(state)
    }

    /// No registered policies, literal conditions only.
    pub fn with_defaults(cfg: EngineConfig) -> Result<Self> {
        Self::new(cfg, PolicyRegistry::new(), Arc::new(LiteralEvaluator))
    }

    pub fn cfg(&self) -> &EngineConfig {
        &self.inner.cfg
    }

    pub fn kernel(&self) -> &Kernel {
        &self.inner.kernel
    }

    pub fn policies(&self) -> &PolicyRegistry {
        &self.inner.policies
    }

    pub fn evaluator(&self) -> &dyn ConditionEvaluator {
        self.inner.evaluator.as_ref()
    }

    pub fn translator(&self) -> &Translator {
        &self.inner.translator
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.inner.metrics
    }

    pub fn route_metadata_namespace(&self) -> &str {
        &self.inner.cfg.server.route_metadata_namespace
    }

    pub fn is_draining(&self) -> bool {
        self.inner.metrics.is_draining()
    }

    pub fn set_draining(&self) {
        self.inner.metrics.set_draining();
    }

    /// Gauges computed on scrape.
    pub fn metrics_extra(&self) -> Vec<(&'static str, u64)> {
        vec![("chainward_routes", self.kernel().len() as u64)]
    }
}
