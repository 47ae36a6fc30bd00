//! Load balancing over pools of equivalent targets.
//!
//! A pool is a named set of channels that can all serve the same traffic.
//! [`LoadBalancer::acquire`] selects one member and counts it as an active
//! connection until [`LoadBalancer::release`], so least-connections sees the
//! real outstanding load even when deliveries overlap.

use std::collections::HashMap;

use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Member selection strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BalanceStrategy {
    /// Cycle through members in registration order.
    #[default]
    RoundRobin,
    /// Pick a uniformly random member.
    Random,
    /// Pick the member with the fewest outstanding connections.
    LeastConnections,
}

#[derive(Debug)]
struct PoolMember {
    target: String,
    active: u64,
}

#[derive(Debug, Default)]
struct Pool {
    members: Vec<PoolMember>,
    cursor: usize,
}

/// Selects targets from registered pools.
pub struct LoadBalancer {
    strategy: BalanceStrategy,
    pools: RwLock<HashMap<String, Pool>>,
}

impl LoadBalancer {
    #[must_use]
    pub fn new(strategy: BalanceStrategy) -> Self {
        Self {
            strategy,
            pools: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn strategy(&self) -> BalanceStrategy {
        self.strategy
    }

    /// Registers (or replaces) a pool. Connection counts start at zero.
    pub fn register_pool(&self, name: &str, targets: Vec<String>) {
        let members = targets
            .into_iter()
            .map(|target| PoolMember { target, active: 0 })
            .collect::<Vec<_>>();
        debug!(pool = %name, members = members.len(), "pool registered");
        self.pools
            .write()
            .insert(name.to_string(), Pool { members, cursor: 0 });
    }

    /// Drops a pool. Returns false if it was not registered.
    pub fn remove_pool(&self, name: &str) -> bool {
        self.pools.write().remove(name).is_some()
    }

    /// Names of all registered pools.
    #[must_use]
    pub fn pool_names(&self) -> Vec<String> {
        self.pools.read().keys().cloned().collect()
    }

    /// Selects a member of `pool` and counts it as one active connection.
    ///
    /// Returns `None` for an unknown or empty pool.
    #[must_use]
    pub fn acquire(&self, pool: &str) -> Option<String> {
        let mut pools = self.pools.write();
        let pool = pools.get_mut(pool)?;
        if pool.members.is_empty() {
            return None;
        }

        let index = match self.strategy {
            BalanceStrategy::RoundRobin => {
                let index = pool.cursor % pool.members.len();
                pool.cursor = pool.cursor.wrapping_add(1);
                index
            }
            BalanceStrategy::Random => rand::thread_rng().gen_range(0..pool.members.len()),
            BalanceStrategy::LeastConnections => pool
                .members
                .iter()
                .enumerate()
                .min_by_key(|(_, member)| member.active)
                .map(|(index, _)| index)
                .unwrap_or(0),
        };

        let member = &mut pool.members[index];
        member.active += 1;
        Some(member.target.clone())
    }

    /// Returns a connection taken by [`acquire`](Self::acquire).
    pub fn release(&self, pool: &str, target: &str) {
        let mut pools = self.pools.write();
        if let Some(pool) = pools.get_mut(pool) {
            if let Some(member) = pool.members.iter_mut().find(|m| m.target == target) {
                member.active = member.active.saturating_sub(1);
            }
        }
    }

    /// Outstanding connections for one member, for diagnostics.
    #[must_use]
    pub fn active_connections(&self, pool: &str, target: &str) -> u64 {
        self.pools.read().get(pool).map_or(0, |pool| {
            pool.members
                .iter()
                .find(|m| m.target == target)
                .map_or(0, |m| m.active)
        })
    }
}
