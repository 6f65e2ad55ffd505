//! Route registry: route key -> policy chain.
//!
//! The table is an immutable `HashMap` behind an `ArcSwap`. Readers take a
//! snapshot without locking; writers build a new table and publish it in
//! one store, so no reader ever sees a half-applied update. Chains are never
//! mutated after registration; an update installs a new `Arc<PolicyChain>`
//! and in-flight requests keep the one they already hold.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use super::chain::PolicyChain;

type RouteTable = HashMap<String, Arc<PolicyChain>>;

pub struct Kernel {
    routes: ArcSwap<RouteTable>,
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel {
    pub fn new() -> Self {
        Self {
            routes: ArcSwap::from_pointee(RouteTable::new()),
        }
    }

    /// Replace the chain for one key.
    pub fn register_route(&self, key: impl Into<String>, chain: PolicyChain) -> Arc<PolicyChain> {
        let key = key.into();
        let chain = Arc::new(chain);
        self.routes.rcu(|current| {
            let mut next = RouteTable::clone(current);
            next.insert(key.clone(), Arc::clone(&chain));
            next
        });
        tracing::debug!(route = %key, policies = chain.len(), "route registered");
        chain
    }

    /// Withdraw a route. Returns whether it existed.
    pub fn unregister_route(&self, key: &str) -> bool {
        let mut existed = false;
        self.routes.rcu(|current| {
            let mut next = RouteTable::clone(current);
            existed = next.remove(key).is_some();
            next
        });
        if existed {
            tracing::debug!(route = %key, "route withdrawn");
        }
        existed
    }

    /// Replace the whole table (full control-plane resync).
    pub fn apply_whole_routes(&self, routes: HashMap<String, PolicyChain>) {
        let next: RouteTable = routes
            .into_iter()
            .map(|(k, chain)| (k, Arc::new(chain)))
            .collect();
        let count = next.len();
        self.routes.store(Arc::new(next));
        tracing::info!(routes = count, "route table replaced");
    }

    /// Current chain for `key`; `None` means skip all processing.
    pub fn get_policy_chain_for_key(&self, key: &str) -> Option<Arc<PolicyChain>> {
        self.routes.load().get(key).cloned()
    }

    pub fn route_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.routes.load().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Consistent view of the whole table.
    pub fn snapshot(&self) -> Arc<HashMap<String, Arc<PolicyChain>>> {
        self.routes.load_full()
    }

    pub fn len(&self) -> usize {
        self.routes.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
