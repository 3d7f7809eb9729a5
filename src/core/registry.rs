//! Agent Registry (component B). The single source of truth for agent
//! records; every other component reads through it and mutates only via
//! its API.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::agents::agent::{Agent, AgentConfig, AgentStatus};
use crate::store::{CoordinationStore, SharedStore};
use crate::utils::error::{HiveError, HiveResult};

struct CacheEntry {
    agent: Agent,
    cached_at: Instant,
}

/// Counts and performance means returned by [`AgentRegistry::stats`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct RegistryStats {
    pub total: usize,
    pub by_type: std::collections::HashMap<String, usize>,
    pub by_status: std::collections::HashMap<String, usize>,
    pub mean_success_rate: f64,
}

pub struct AgentRegistry {
    store: SharedStore,
    swarm_id: String,
    cache_ttl: std::time::Duration,
    cache: DashMap<Uuid, CacheEntry>,
    by_type: DashMap<String, HashSet<Uuid>>,
    // serializes concurrent updaters per agent, per §5's ordering guarantee
    write_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl AgentRegistry {
    #[must_use]
    pub fn new(store: SharedStore, swarm_id: String, cache_ttl: std::time::Duration) -> Self {
        Self {
            store,
            swarm_id,
            cache_ttl,
            cache: DashMap::new(),
            by_type: DashMap::new(),
            write_locks: DashMap::new(),
        }
    }

    fn agent_key(&self, id: Uuid) -> String {
        crate::store::swarm_channel(&self.swarm_id, &format!("fleet:agent:{id}"))
    }

    fn lock_for(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.write_locks.entry(id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    async fn persist(&self, agent: &Agent) -> HiveResult<()> {
        self.store
            .set_with_ttl(&self.agent_key(agent.id), agent, Some(std::time::Duration::from_secs(3600)))
            .await
    }

    /// Assign an id, insert into the canonical map and the type/global
    /// indexes, and persist to the store. Emits `agent_registered`.
    pub async fn register(&self, config: AgentConfig) -> HiveResult<Uuid> {
        let agent = Agent::new(config);
        let id = agent.id;
        let pool_type = agent.pool_type.clone();

        self.persist(&agent).await?;
        self.cache.insert(
            id,
            CacheEntry {
                agent,
                cached_at: Instant::now(),
            },
        );
        self.by_type.entry(pool_type).or_default().insert(id);
        self.store.set_add("fleet:agents:all", &id.to_string()).await?;

        let _ = self
            .store
            .publish(
                &crate::store::swarm_channel(&self.swarm_id, "fleet"),
                &serde_json::to_vec(&serde_json::json!({
                    "type": "agent_registered",
                    "agent_id": id,
                }))?,
            )
            .await;

        Ok(id)
    }

    /// Remove from all indexes and the store. Fails if the agent has an
    /// active allocation (callers drain first).
    pub async fn unregister(&self, id: Uuid) -> HiveResult<()> {
        let guard = self.lock_for(id);
        let _permit = guard.lock().await;

        let agent = self.get(id).await?.ok_or_else(|| HiveError::AgentNotFound { id: id.to_string() })?;
        if agent.status == AgentStatus::Busy {
            return Err(HiveError::AgentHasActiveAllocation { id: id.to_string() });
        }

        self.cache.remove(&id);
        if let Some(mut set) = self.by_type.get_mut(&agent.pool_type) {
            set.remove(&id);
        }
        self.store.set_remove("fleet:agents:all", &id.to_string()).await?;
        self.store.delete(&self.agent_key(id)).await?;

        let _ = self
            .store
            .publish(
                &crate::store::swarm_channel(&self.swarm_id, "fleet"),
                &serde_json::to_vec(&serde_json::json!({
                    "type": "agent_terminated",
                    "agent_id": id,
                }))?,
            )
            .await;

        Ok(())
    }

    /// Consult the local read-through cache before the store.
    pub async fn get(&self, id: Uuid) -> HiveResult<Option<Agent>> {
        if let Some(entry) = self.cache.get(&id) {
            if entry.cached_at.elapsed() < self.cache_ttl {
                return Ok(Some(entry.agent.clone()));
            }
        }

        let stored: Option<Agent> = self.store.get(&self.agent_key(id)).await?;
        if let Some(agent) = &stored {
            self.cache.insert(
                id,
                CacheEntry {
                    agent: agent.clone(),
                    cached_at: Instant::now(),
                },
            );
        }
        Ok(stored)
    }

    /// Read-modify-write. Version increments monotonically; index updates
    /// happen atomically with the write when `pool_type`/`status` change.
    /// Concurrent updaters on the same agent are serialized.
    pub async fn update<F>(&self, id: Uuid, mutate: F) -> HiveResult<Agent>
    where
        F: FnOnce(&mut Agent),
    {
        let guard = self.lock_for(id);
        let _permit = guard.lock().await;

        let mut agent = self
            .get(id)
            .await?
            .ok_or_else(|| HiveError::AgentNotFound { id: id.to_string() })?;
        let previous_type = agent.pool_type.clone();
        let previous_status = agent.status;

        mutate(&mut agent);
        agent.touch();

        if agent.pool_type != previous_type {
            if previous_status == AgentStatus::Busy {
                return Err(HiveError::InvalidStateTransition {
                    from: previous_type,
                    to: agent.pool_type.clone(),
                });
            }
            if let Some(mut set) = self.by_type.get_mut(&previous_type) {
                set.remove(&id);
            }
            self.by_type.entry(agent.pool_type.clone()).or_default().insert(id);
        }

        self.persist(&agent).await?;
        self.cache.insert(
            id,
            CacheEntry {
                agent: agent.clone(),
                cached_at: Instant::now(),
            },
        );
        Ok(agent)
    }

    /// Cheap path that only touches `health.last_heartbeat`.
    pub async fn update_heartbeat(&self, id: Uuid, ts: DateTime<Utc>) -> HiveResult<()> {
        self.update(id, |agent| agent.health.last_heartbeat = ts).await?;
        Ok(())
    }

    #[must_use]
    pub async fn list_all(&self) -> Vec<Agent> {
        self.cache.iter().map(|e| e.agent.clone()).collect()
    }

    #[must_use]
    pub async fn list_by_type(&self, pool_type: &str) -> Vec<Agent> {
        let mut out = Vec::new();
        if let Some(ids) = self.by_type.get(pool_type) {
            for id in ids.iter() {
                if let Some(entry) = self.cache.get(id) {
                    out.push(entry.agent.clone());
                }
            }
        }
        out
    }

    #[must_use]
    pub async fn list_by_status(&self, status: AgentStatus) -> Vec<Agent> {
        self.cache
            .iter()
            .filter(|e| e.agent.status == status)
            .map(|e| e.agent.clone())
            .collect()
    }

    #[must_use]
    pub async fn find_by_capabilities(&self, required: &HashSet<String>) -> Vec<Agent> {
        self.cache
            .iter()
            .filter(|e| e.agent.has_capabilities(required))
            .map(|e| e.agent.clone())
            .collect()
    }

    /// Idle agents of `pool_type`, lowest-success-rate-first. This is
    /// intentional: it rotates idle agents with weaker recent track
    /// records back into service rather than always preferring the
    /// agents already proven fastest, which would otherwise starve the
    /// rest of the pool of task volume.
    #[must_use]
    pub async fn idle_agents(&self, pool_type: &str, limit: usize) -> Vec<Agent> {
        let mut idle: Vec<Agent> = self
            .list_by_type(pool_type)
            .await
            .into_iter()
            .filter(Agent::is_selectable)
            .collect();
        idle.sort_by(|a, b| {
            a.performance
                .success_rate
                .partial_cmp(&b.performance.success_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        idle.truncate(limit);
        idle
    }

    #[must_use]
    pub async fn stats(&self) -> RegistryStats {
        let all = self.list_all().await;
        let mut by_type = std::collections::HashMap::new();
        let mut by_status = std::collections::HashMap::new();
        let mut success_sum = 0.0;

        for agent in &all {
            *by_type.entry(agent.pool_type.clone()).or_insert(0usize) += 1;
            *by_status.entry(agent.status.to_string()).or_insert(0usize) += 1;
            success_sum += agent.performance.success_rate;
        }

        let mean_success_rate = if all.is_empty() {
            0.0
        } else {
            success_sum / all.len() as f64
        };

        RegistryStats {
            total: all.len(),
            by_type,
            by_status,
            mean_success_rate,
        }
    }

    /// Purge records whose `updated_at` is older than `ttl`.
    pub async fn cleanup(&self, ttl: chrono::Duration) -> usize {
        let cutoff = Utc::now() - ttl;
        let stale: Vec<Uuid> = self
            .cache
            .iter()
            .filter(|e| e.agent.updated_at < cutoff)
            .map(|e| *e.key())
            .collect();

        for id in &stale {
            let _ = self.unregister(*id).await;
        }
        stale.len()
    }
}
