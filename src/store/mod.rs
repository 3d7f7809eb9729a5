//! Coordination Store Client.
//!
//! Every other subsystem (agent registry, resource allocator, health
//! monitor, fleet coordinator, autoscaler) depends on this module for
//! shared state and pub/sub. The reference backend here is in-process:
//! a `DashMap`-backed KV/hash/set store plus a broadcast-based channel
//! registry for publish/subscribe and an mpsc-correlated request/response
//! helper. The contract is expressed as an `async_trait` so a networked
//! backend could be substituted without touching callers.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::time::Instant;

use crate::utils::error::{HiveError, HiveResult};

/// Default TTL applied to ephemeral state (agents, allocations, health
/// snapshots) when a caller does not specify one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

const BROADCAST_CAPACITY: usize = 1024;

#[derive(Clone)]
struct StoredValue {
    json: serde_json::Value,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self) -> bool {
        matches!(self.expires_at, Some(t) if Instant::now() >= t)
    }
}

/// The contract every other component consults for shared state and
/// pub/sub. All values are JSON-encoded; nested structures round-trip
/// byte-for-byte through hash operations.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> HiveResult<Option<T>>;
    async fn set_with_ttl<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> HiveResult<()>;
    async fn delete(&self, key: &str) -> HiveResult<()>;

    async fn hash_set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        field: &str,
        value: &T,
    ) -> HiveResult<()>;
    async fn hash_get_all(&self, key: &str) -> HiveResult<HashMap<String, serde_json::Value>>;

    async fn set_add(&self, key: &str, member: &str) -> HiveResult<()>;
    async fn set_remove(&self, key: &str, member: &str) -> HiveResult<()>;
    async fn set_members(&self, key: &str) -> HiveResult<Vec<String>>;

    async fn list_length(&self, key: &str) -> HiveResult<usize>;

    async fn publish(&self, channel: &str, payload: &[u8]) -> HiveResult<()>;
    fn subscribe(&self, channel: &str) -> broadcast::Receiver<Vec<u8>>;

    /// Send `message` on `channel` and await a correlated response within
    /// `timeout`. The responder must call [`InMemoryStore::respond`] with
    /// the same correlation id carried in the request payload.
    async fn request(
        &self,
        channel: &str,
        message: serde_json::Value,
        timeout: Duration,
    ) -> HiveResult<serde_json::Value>;
}

/// In-process implementation backed by `DashMap` + `tokio::sync::broadcast`.
pub struct InMemoryStore {
    kv: DashMap<String, StoredValue>,
    hashes: DashMap<String, HashMap<String, serde_json::Value>>,
    sets: DashMap<String, std::collections::HashSet<String>>,
    lists: DashMap<String, Vec<serde_json::Value>>,
    channels: DashMap<String, broadcast::Sender<Vec<u8>>>,
    pending_requests: DashMap<u64, oneshot::Sender<serde_json::Value>>,
    next_correlation_id: AtomicU64,
    // serializes read-modify-write on hash/set keys shared across tasks
    write_lock: Mutex<()>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            kv: DashMap::new(),
            hashes: DashMap::new(),
            sets: DashMap::new(),
            lists: DashMap::new(),
            channels: DashMap::new(),
            pending_requests: DashMap::new(),
            next_correlation_id: AtomicU64::new(1),
            write_lock: Mutex::new(()),
        }
    }

    fn channel_sender(&self, channel: &str) -> broadcast::Sender<Vec<u8>> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(BROADCAST_CAPACITY).0)
            .clone()
    }

    /// Fulfil a pending `request()` call. Responders read `correlation_id`
    /// out of the request payload they received via `subscribe`.
    pub fn respond(&self, correlation_id: u64, response: serde_json::Value) -> bool {
        if let Some((_, tx)) = self.pending_requests.remove(&correlation_id) {
            tx.send(response).is_ok()
        } else {
            false
        }
    }

    /// Append a value to a list (supporting operation for `list_length`;
    /// the spec's contract only requires reading length, but something
    /// has to populate the list).
    pub async fn list_push(&self, key: &str, value: serde_json::Value) -> HiveResult<()> {
        let _guard = self.write_lock.lock().await;
        self.lists.entry(key.to_string()).or_default().push(value);
        Ok(())
    }

    /// Remove expired keys. Intended to be run on a periodic sweep
    /// alongside each subsystem's own cleanup.
    pub fn sweep_expired(&self) {
        self.kv.retain(|_, v| !v.is_expired());
    }
}

#[async_trait]
impl CoordinationStore for InMemoryStore {
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> HiveResult<Option<T>> {
        match self.kv.get(key) {
            Some(entry) if !entry.is_expired() => {
                let value: T = serde_json::from_value(entry.json.clone())?;
                Ok(Some(value))
            }
            Some(_) => {
                self.kv.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_with_ttl<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> HiveResult<()> {
        let json = serde_json::to_value(value)?;
        let expires_at = Some(ttl.unwrap_or(DEFAULT_TTL)).map(|d| Instant::now() + d);
        self.kv.insert(key.to_string(), StoredValue { json, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> HiveResult<()> {
        self.kv.remove(key);
        Ok(())
    }

    async fn hash_set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        field: &str,
        value: &T,
    ) -> HiveResult<()> {
        let json = serde_json::to_value(value)?;
        let _guard = self.write_lock.lock().await;
        self.hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), json);
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> HiveResult<HashMap<String, serde_json::Value>> {
        Ok(self.hashes.get(key).map(|m| m.clone()).unwrap_or_default())
    }

    async fn set_add(&self, key: &str, member: &str) -> HiveResult<()> {
        let _guard = self.write_lock.lock().await;
        self.sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> HiveResult<()> {
        let _guard = self.write_lock.lock().await;
        if let Some(mut set) = self.sets.get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> HiveResult<Vec<String>> {
        Ok(self
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_length(&self, key: &str) -> HiveResult<usize> {
        Ok(self.lists.get(key).map(|l| l.len()).unwrap_or(0))
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> HiveResult<()> {
        let sender = self.channel_sender(channel);
        // no subscribers is not an error: connection failures on publish
        // are logged and swallowed, not propagated.
        if sender.send(payload.to_vec()).is_err() {
            tracing::debug!(channel, "publish with no active subscribers");
        }
        Ok(())
    }

    fn subscribe(&self, channel: &str) -> broadcast::Receiver<Vec<u8>> {
        self.channel_sender(channel).subscribe()
    }

    async fn request(
        &self,
        channel: &str,
        mut message: serde_json::Value,
        timeout: Duration,
    ) -> HiveResult<serde_json::Value> {
        let correlation_id = self.next_correlation_id.fetch_add(1, Ordering::SeqCst);
        if let Some(obj) = message.as_object_mut() {
            obj.insert("correlation_id".to_string(), correlation_id.into());
        }

        let (tx, rx) = oneshot::channel();
        self.pending_requests.insert(correlation_id, tx);

        let payload = serde_json::to_vec(&message)?;
        self.publish(channel, &payload).await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                self.pending_requests.remove(&correlation_id);
                Err(HiveError::OperationFailed {
                    reason: format!("request on channel {channel} dropped before response"),
                })
            }
            Err(_) => {
                self.pending_requests.remove(&correlation_id);
                Err(HiveError::Timeout {
                    operation: format!("request on channel {channel}"),
                    duration_ms: timeout.as_millis() as u64,
                })
            }
        }
    }
}

/// Build the store-key prefix used for a given fleet/swarm instance, per
/// the `swarm:<id>:` convention described for bus channels and persisted
/// state keys.
#[must_use]
pub fn swarm_prefix(swarm_id: &str) -> String {
    format!("swarm:{swarm_id}:")
}

#[must_use]
pub fn swarm_channel(swarm_id: &str, suffix: &str) -> String {
    format!("{}{}", swarm_prefix(swarm_id), suffix)
}

/// Shared handle type used throughout the engine.
pub type SharedStore = Arc<InMemoryStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        a: u32,
        b: String,
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = InMemoryStore::new();
        let value = Sample {
            a: 7,
            b: "hello".to_string(),
        };
        store.set_with_ttl("k", &value, None).await.unwrap();
        let got: Option<Sample> = store.get("k").await.unwrap();
        assert_eq!(got, Some(value));
    }

    #[tokio::test]
    async fn get_missing_key_returns_none() {
        let store = InMemoryStore::new();
        let got: Option<Sample> = store.get("missing").await.unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn expired_key_is_treated_as_absent() {
        let store = InMemoryStore::new();
        store
            .set_with_ttl("k", &42u32, Some(Duration::from_millis(1)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let got: Option<u32> = store.get("k").await.unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn hash_set_and_get_all() {
        let store = InMemoryStore::new();
        store.hash_set("h", "x", &1u32).await.unwrap();
        store.hash_set("h", "y", &2u32).await.unwrap();
        let all = store.hash_get_all("h").await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn set_add_remove_members() {
        let store = InMemoryStore::new();
        store.set_add("s", "one").await.unwrap();
        store.set_add("s", "two").await.unwrap();
        store.set_remove("s", "one").await.unwrap();
        let members = store.set_members("s").await.unwrap();
        assert_eq!(members, vec!["two".to_string()]);
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_error() {
        let store = InMemoryStore::new();
        store.publish("swarm:test:events", b"hello").await.unwrap();
    }

    #[tokio::test]
    async fn publish_is_received_by_subscriber() {
        let store = InMemoryStore::new();
        let mut rx = store.subscribe("swarm:test:events");
        store.publish("swarm:test:events", b"hello").await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received, b"hello");
    }

    #[tokio::test]
    async fn request_times_out_with_no_responder() {
        let store = InMemoryStore::new();
        let result = store
            .request("swarm:test:rpc", serde_json::json!({}), Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(HiveError::Timeout { .. })));
    }

    #[tokio::test]
    async fn request_resolves_when_responder_replies() {
        let store = Arc::new(InMemoryStore::new());
        let mut rx = store.subscribe("swarm:test:rpc");
        let responder = Arc::clone(&store);
        let handle = tokio::spawn(async move {
            let raw = rx.recv().await.unwrap();
            let msg: serde_json::Value = serde_json::from_slice(&raw).unwrap();
            let correlation_id = msg["correlation_id"].as_u64().unwrap();
            responder.respond(correlation_id, serde_json::json!({"ok": true}));
        });
        let response = store
            .request(
                "swarm:test:rpc",
                serde_json::json!({"action": "ping"}),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        handle.await.unwrap();
        assert_eq!(response["ok"], true);
    }

    #[test]
    fn swarm_prefix_matches_convention() {
        assert_eq!(swarm_prefix("fleet-1"), "swarm:fleet-1:");
        assert_eq!(swarm_channel("fleet-1", "events"), "swarm:fleet-1:events");
    }
}
