// Copyright 2025 Pixelport (https://github.com/pixelport)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Key/value cache layer with TTL.
//!
//! One interface, two interchangeable backends: a single-node in-process
//! cache and a sharded multi-node cache. A miss is a first-class outcome
//! (`NotFound`); transport failures are `Cache` errors and never masquerade
//! as misses. Deleting a missing key succeeds. Every operation is counted
//! and timed.

pub mod memory;
pub mod metrics;
pub mod sharded;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use pixelport_core::{Error, ErrorKind, Result};

pub use metrics::{CacheMetrics, CacheStats, Op};

/// One cache entry to store.
#[derive(Debug, Clone)]
pub struct Item {
    pub key: String,
    pub value: Vec<u8>,
    pub ttl: Duration,
}

impl Item {
    pub fn new(key: impl Into<String>, value: Vec<u8>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            value,
            ttl,
        }
    }
}

/// The cache backend interface. Callers never branch on the concrete type.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Fetch one key. A missing key is `NotFound`, not an error.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Fetch many keys; absent keys are simply not in the result map.
    async fn get_multi(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        let mut found = HashMap::new();
        for key in keys {
            match self.get(key).await {
                Ok(value) => {
                    found.insert(key.clone(), value);
                }
                Err(e) if e.kind == ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(found)
    }

    /// Store one entry with its TTL.
    async fn set(&self, item: Item) -> Result<()>;

    /// Remove a key. Removing a missing key is success.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Cache configuration; `backend` selects the concrete type at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// `"memory"` or `"sharded"`.
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Server addresses for the sharded backend (`redis://host:port`).
    #[serde(default)]
    pub servers: Vec<String>,

    /// Entry cap for the memory backend.
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,
}

fn default_backend() -> String {
    "memory".to_string()
}

fn default_max_entries() -> u64 {
    100_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            servers: Vec::new(),
            max_entries: default_max_entries(),
        }
    }
}

/// The client every other component holds. Wraps the selected backend,
/// records metrics, and allows a live backend swap; normal traffic only
/// takes the reader path.
pub struct CacheClient {
    backend: RwLock<Arc<dyn Cache>>,
    metrics: CacheMetrics,
}

impl CacheClient {
    /// Construct the backend named by the configuration.
    pub async fn connect(config: &CacheConfig) -> Result<Self> {
        let backend: Arc<dyn Cache> = match config.backend.as_str() {
            "memory" => Arc::new(memory::MemoryCache::new(config.max_entries)),
            "sharded" => Arc::new(sharded::ShardedCache::connect(&config.servers).await?),
            other => {
                return Err(Error::new(
                    ErrorKind::Cache,
                    format!("unknown cache backend {other:?}"),
                ))
            }
        };
        Ok(Self::with_backend(backend))
    }

    pub fn with_backend(backend: Arc<dyn Cache>) -> Self {
        Self {
            backend: RwLock::new(backend),
            metrics: CacheMetrics::default(),
        }
    }

    /// Swap the live backend. Rare; in-flight operations keep the old one.
    pub fn swap_backend(&self, backend: Arc<dyn Cache>) {
        tracing::info!("cache backend swapped");
        *self.backend.write() = backend;
    }

    fn current(&self) -> Arc<dyn Cache> {
        self.backend.read().clone()
    }

    pub fn stats(&self) -> CacheStats {
        self.metrics.snapshot()
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let start = Instant::now();
        let result = self.current().get(key).await;
        match &result {
            Ok(_) => self.metrics.record(Op::Hit, start.elapsed()),
            Err(e) if e.kind == ErrorKind::NotFound => {
                self.metrics.record(Op::Miss, start.elapsed())
            }
            Err(_) => self.metrics.record(Op::Error, start.elapsed()),
        }
        result
    }

    pub async fn get_multi(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        let start = Instant::now();
        let result = self.current().get_multi(keys).await;
        match &result {
            Ok(found) => {
                for key in keys {
                    let op = if found.contains_key(key) { Op::Hit } else { Op::Miss };
                    self.metrics.record(op, start.elapsed());
                }
            }
            Err(_) => self.metrics.record(Op::Error, start.elapsed()),
        }
        result
    }

    pub async fn set(&self, item: Item) -> Result<()> {
        let start = Instant::now();
        let result = self.current().set(item).await;
        match &result {
            Ok(()) => self.metrics.record(Op::Set, start.elapsed()),
            Err(_) => self.metrics.record(Op::Error, start.elapsed()),
        }
        result
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let start = Instant::now();
        let result = self.current().delete(key).await;
        match &result {
            Ok(()) => self.metrics.record(Op::Delete, start.elapsed()),
            Err(_) => self.metrics.record(Op::Error, start.elapsed()),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn client_records_hits_and_misses() {
        let client =
            CacheClient::with_backend(Arc::new(memory::MemoryCache::new(100)));
        client
            .set(Item::new("Account::a-1", b"doc".to_vec(), Duration::from_secs(60)))
            .await
            .unwrap();

        assert_eq!(client.get("Account::a-1").await.unwrap(), b"doc");
        let miss = client.get("Account::a-2").await.unwrap_err();
        assert_eq!(miss.kind, ErrorKind::NotFound);

        let stats = client.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 1);
    }

    #[tokio::test]
    async fn delete_of_missing_key_is_success() {
        let client =
            CacheClient::with_backend(Arc::new(memory::MemoryCache::new(100)));
        client.delete("Game::missing").await.unwrap();
    }

    #[tokio::test]
    async fn get_multi_skips_absent_keys() {
        let client =
            CacheClient::with_backend(Arc::new(memory::MemoryCache::new(100)));
        client
            .set(Item::new("User::u1", b"a".to_vec(), Duration::from_secs(60)))
            .await
            .unwrap();
        let found = client
            .get_multi(&["User::u1".to_string(), "User::u2".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found["User::u1"], b"a");
    }

    #[tokio::test]
    async fn backend_swap_keeps_serving() {
        let client =
            CacheClient::with_backend(Arc::new(memory::MemoryCache::new(100)));
        client
            .set(Item::new("k", b"v".to_vec(), Duration::from_secs(60)))
            .await
            .unwrap();
        client.swap_backend(Arc::new(memory::MemoryCache::new(100)));
        // Fresh backend: the old entry is gone but the client still works.
        assert_eq!(
            client.get("k").await.unwrap_err().kind,
            ErrorKind::NotFound
        );
    }
}
