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

//! Per-operation counters and latency tracking for the cache layer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Operation tag for a recorded cache call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Hit,
    Miss,
    Set,
    Delete,
    Error,
}

#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
    latency_micros: AtomicU64,
    samples: AtomicU64,
}

impl CacheMetrics {
    pub fn record(&self, op: Op, latency: Duration) {
        let counter = match op {
            Op::Hit => &self.hits,
            Op::Miss => &self.misses,
            Op::Set => &self.sets,
            Op::Delete => &self.deletes,
            Op::Error => &self.errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.latency_micros
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
        self.samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        let samples = self.samples.load(Ordering::Relaxed);
        let total_micros = self.latency_micros.load(Ordering::Relaxed);
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            avg_latency_micros: if samples > 0 { total_micros / samples } else { 0 },
        }
    }
}

/// Point-in-time counters, reported by the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
    pub avg_latency_micros: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = CacheMetrics::default();
        metrics.record(Op::Hit, Duration::from_micros(100));
        metrics.record(Op::Hit, Duration::from_micros(300));
        metrics.record(Op::Miss, Duration::from_micros(200));
        metrics.record(Op::Error, Duration::from_micros(400));

        let stats = metrics.snapshot();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.avg_latency_micros, 250);
    }
}
