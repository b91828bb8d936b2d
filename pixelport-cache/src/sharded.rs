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

//! Sharded multi-node cache backend.
//!
//! Keys map to servers with the Jenkins one-at-a-time hash. The mapping is
//! a wire contract: same key and same server list must pick the same server
//! across processes and releases, so cache warmth survives a rewrite.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use pixelport_core::{Error, ErrorKind, Result};

use crate::{Cache, Item};

/// Jenkins one-at-a-time. Bit-stable; do not change.
pub fn jenkins_hash(key: &[u8]) -> u32 {
    let mut h: u32 = 0;
    for &b in key {
        h = h.wrapping_add(b as u32);
        h = h.wrapping_add(h << 10);
        h ^= h >> 6;
    }
    h = h.wrapping_add(h << 3);
    h ^= h >> 11;
    h = h.wrapping_add(h << 15);
    h
}

/// Index of the server responsible for `key` among `n` servers.
pub fn server_index(key: &str, n: usize) -> usize {
    (jenkins_hash(key.as_bytes()) as usize) % n
}

/// Cache over N redis nodes with deterministic key placement.
pub struct ShardedCache {
    servers: Vec<ConnectionManager>,
}

impl ShardedCache {
    pub async fn connect(addresses: &[String]) -> Result<Self> {
        if addresses.is_empty() {
            return Err(Error::new(
                ErrorKind::Cache,
                "sharded cache requires at least one server",
            ));
        }
        let mut servers = Vec::with_capacity(addresses.len());
        for address in addresses {
            let client = redis::Client::open(address.as_str())
                .map_err(|e| transport(address, e))?;
            let manager = ConnectionManager::new(client)
                .await
                .map_err(|e| transport(address, e))?;
            servers.push(manager);
        }
        Ok(Self { servers })
    }

    fn server_for(&self, key: &str) -> ConnectionManager {
        self.servers[server_index(key, self.servers.len())].clone()
    }
}

fn transport(context: &str, e: redis::RedisError) -> Error {
    Error::new(ErrorKind::Cache, format!("cache transport failure: {e}"))
        .with_data(serde_json::json!({ "context": context }))
}

#[async_trait]
impl Cache for ShardedCache {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let mut conn = self.server_for(key);
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| transport(key, e))?;
        value.ok_or_else(|| Error::new(ErrorKind::NotFound, format!("cache miss for {key}")))
    }

    async fn get_multi(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        // Group keys per server, one MGET each.
        let mut by_server: HashMap<usize, Vec<&String>> = HashMap::new();
        for key in keys {
            by_server
                .entry(server_index(key, self.servers.len()))
                .or_default()
                .push(key);
        }

        let mut found = HashMap::new();
        for (index, server_keys) in by_server {
            let mut conn = self.servers[index].clone();
            let mut cmd = redis::cmd("MGET");
            for key in &server_keys {
                cmd.arg(key.as_str());
            }
            let values: Vec<Option<Vec<u8>>> = cmd
                .query_async(&mut conn)
                .await
                .map_err(|e| transport(&format!("server {index}"), e))?;
            for (key, value) in server_keys.into_iter().zip(values) {
                if let Some(value) = value {
                    found.insert(key.clone(), value);
                }
            }
        }
        Ok(found)
    }

    async fn set(&self, item: Item) -> Result<()> {
        let mut conn = self.server_for(&item.key);
        let secs = item.ttl.as_secs().max(1);
        redis::cmd("SET")
            .arg(&item.key)
            .arg(&item.value)
            .arg("EX")
            .arg(secs)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| transport(&item.key, e))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.server_for(key);
        // DEL of a missing key returns 0; both outcomes are success.
        redis::cmd("DEL")
            .arg(key)
            .query_async::<i64>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| transport(key, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jenkins_published_vectors() {
        assert_eq!(jenkins_hash(b"a"), 0xca2e9442);
        assert_eq!(
            jenkins_hash(b"The quick brown fox jumps over the lazy dog"),
            0x519e91f5
        );
        assert_eq!(jenkins_hash(b""), 0);
    }

    #[test]
    fn placement_is_stable() {
        let keys = ["Account::a-1", "User::u@x.dev", "Game::g-9", "Token::Auth::t"];
        for key in keys {
            let first = server_index(key, 3);
            for _ in 0..16 {
                assert_eq!(server_index(key, 3), first);
            }
            assert!(first < 3);
        }
    }

    #[test]
    fn placement_spreads_across_servers() {
        let mut seen = [false; 4];
        for i in 0..256 {
            seen[server_index(&format!("Game::g-{i}"), 4)] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }
}
