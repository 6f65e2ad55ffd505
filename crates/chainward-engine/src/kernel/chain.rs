//! Policy chains and the policy instance registry they are built from.

use std::sync::Arc;

use dashmap::DashMap;

use chainward_core::error::{ChainwardError, Result};
use chainward_core::{Policy, PolicySpec, ProcessingMode};

/// One (policy instance, spec) pair.
#[derive(Clone)]
pub struct ChainEntry {
    pub policy: Arc<dyn Policy>,
    pub spec: PolicySpec,
    /// `policy.mode()`, captured at build time.
    pub mode: ProcessingMode,
}

impl std::fmt::Debug for ChainEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainEntry")
            .field("spec", &self.spec)
            .field("mode", &self.mode)
            .finish()
    }
}

/// Ordered, immutable policy chain bound to a route.
///
/// Order is the application order for header/body mutation and
/// short-circuit precedence. The aggregate flags are computed once here
/// and never per request.
#[derive(Debug, Clone)]
pub struct PolicyChain {
    entries: Vec<ChainEntry>,
    mode: ProcessingMode,
    requires_request_body: bool,
    requires_response_body: bool,
    has_execution_conditions: bool,
}

impl PolicyChain {
    /// Validate every enabled policy's params and derive the chain flags.
    pub fn new(entries: Vec<(Arc<dyn Policy>, PolicySpec)>) -> Result<Self> {
        let mut built = Vec::with_capacity(entries.len());
        let mut mode = ProcessingMode::SKIP_ALL;
        let mut has_execution_conditions = false;

        for (policy, spec) in entries {
            let policy_mode = policy.mode();
            if spec.enabled {
                policy.validate(&spec.params).map_err(|e| {
                    ChainwardError::Config(format!(
                        "policy {}:{} rejected its params: {e}",
                        spec.name, spec.version
                    ))
                })?;
                mode = mode.merge(policy_mode);
                has_execution_conditions |= spec.has_condition();
            }
            built.push(ChainEntry {
                policy,
                spec,
                mode: policy_mode,
            });
        }

        Ok(Self {
            entries: built,
            mode,
            requires_request_body: mode.requires_request_body(),
            requires_response_body: mode.requires_response_body(),
            has_execution_conditions,
        })
    }

    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            mode: ProcessingMode::SKIP_ALL,
            requires_request_body: false,
            requires_response_body: false,
            has_execution_conditions: false,
        }
    }

    pub fn entries(&self) -> &[ChainEntry] {
        &self.entries
    }

    pub fn enabled_entries(&self) -> impl Iterator<Item = &ChainEntry> {
        self.entries.iter().filter(|e| e.spec.enabled)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Aggregate over enabled policies, most demanding value per axis.
    pub fn mode(&self) -> ProcessingMode {
        self.mode
    }

    pub fn requires_request_body(&self) -> bool {
        self.requires_request_body
    }

    pub fn requires_response_body(&self) -> bool {
        self.requires_response_body
    }

    pub fn has_execution_conditions(&self) -> bool {
        self.has_execution_conditions
    }
}

/// Policy instances keyed by `(name, version)`.
#[derive(Default)]
pub struct PolicyRegistry {
    policies: DashMap<(String, String), Arc<dyn Policy>>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self {
            policies: DashMap::new(),
        }
    }

    pub fn register(&self, name: &str, version: &str, policy: Arc<dyn Policy>) {
        self.policies.insert((name.to_string(), version.to_string()), policy);
    }

    pub fn get(&self, name: &str, version: &str) -> Option<Arc<dyn Policy>> {
        self.policies
            .get(&(name.to_string(), version.to_string()))
            .map(|e| e.value().clone())
    }

    pub fn registered(&self) -> Vec<(String, String)> {
        let mut out: Vec<_> = self.policies.iter().map(|e| e.key().clone()).collect();
        out.sort();
        out
    }

    /// Resolve specs into a chain. Unknown policies and rejected params are config errors.
    pub fn build_chain(&self, specs: &[PolicySpec]) -> Result<PolicyChain> {
        let mut entries = Vec::with_capacity(specs.len());
        for spec in specs {
            let policy = self.get(&spec.name, &spec.version).ok_or_else(|| {
                ChainwardError::Config(format!(
                    "unknown policy {}:{}",
                    spec.name, spec.version
                ))
            })?;
            entries.push((policy, spec.clone()));
        }
        PolicyChain::new(entries)
    }
}
