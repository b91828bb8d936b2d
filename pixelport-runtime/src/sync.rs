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

//! Optional backend sync.
//!
//! The loop thread pushes serialized snapshots into a bounded queue; a
//! worker thread ships them with `If-Match` on `updated_at`. When the
//! backend is slow the queue drops its oldest snapshot rather than block
//! the frame loop.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use pixelport_core::Game;

/// One pending upload.
struct Snapshot {
    body: String,
    updated_at: String,
}

struct Queue {
    items: Mutex<VecDeque<Snapshot>>,
    ready: Condvar,
    capacity: usize,
}

pub struct SyncWorker {
    queue: Arc<Queue>,
    // Detached; exits with the process.
    _handle: thread::JoinHandle<()>,
}

impl SyncWorker {
    /// Spawn the worker. `api_url` is the game update endpoint; `token` is
    /// the bearer credential.
    pub fn start(api_url: String, token: String, capacity: usize) -> Self {
        let queue = Arc::new(Queue {
            items: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            capacity: capacity.max(1),
        });

        let worker_queue = queue.clone();
        let handle = thread::spawn(move || run(worker_queue, api_url, token));
        Self {
            queue,
            _handle: handle,
        }
    }

    /// Queue a snapshot; drops the oldest when full. Never blocks.
    pub fn push(&self, game: &Game) {
        let Ok(body) = serde_json::to_string(game) else {
            return;
        };
        let snapshot = Snapshot {
            body,
            updated_at: game.updated_at.to_rfc3339(),
        };
        let mut items = self.queue.items.lock();
        if items.len() >= self.queue.capacity {
            items.pop_front();
            debug!("sync queue full, dropped oldest snapshot");
        }
        items.push_back(snapshot);
        drop(items);
        self.queue.ready.notify_one();
    }

    /// Queue depth, for tests and debug overlays.
    pub fn pending(&self) -> usize {
        self.queue.items.lock().len()
    }
}

fn run(queue: Arc<Queue>, api_url: String, token: String) {
    let client = match reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "sync worker could not build http client");
            return;
        }
    };

    loop {
        let snapshot = {
            let mut items = queue.items.lock();
            while items.is_empty() {
                queue.ready.wait(&mut items);
            }
            items.pop_front().unwrap()
        };

        let result = client
            .put(&api_url)
            .bearer_auth(&token)
            .header("If-Match", &snapshot.updated_at)
            .header("content-type", "application/json")
            .body(snapshot.body)
            .send();
        match result {
            Ok(response) if response.status().is_success() => {
                debug!("state synced");
            }
            Ok(response) => {
                warn!(status = %response.status(), "sync rejected");
            }
            Err(e) => {
                warn!(error = %e, "sync failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use chrono::Utc;
    use pixelport_core::{GameSource, GameStatus, Image, Object};
    use std::collections::HashMap;

    fn game() -> Game {
        Game {
            id: "g".into(),
            account_id: "a".into(),
            public: false,
            name: "g".into(),
            version: 1,
            description: String::new(),
            debug: false,
            w: 800,
            h: 600,
            status: GameStatus::Active,
            status_data: serde_json::Value::Null,
            subject: Object {
                id: "p".into(),
                name: String::new(),
                hidden: false,
                x: 0,
                y: 0,
                z: 0,
                w: 8,
                h: 8,
                r: 0,
                image: "p".into(),
                data: serde_json::Value::Null,
            },
            objects: HashMap::new(),
            images: HashMap::from([(
                "p".to_string(),
                Image {
                    id: "p".into(),
                    name: String::new(),
                    data: base64::engine::general_purpose::STANDARD.encode(b"x"),
                    w: 8,
                    h: 8,
                },
            )]),
            script: String::new(),
            source: GameSource::App,
            commit_hash: String::new(),
            tags: Vec::new(),
            prompts: None,
            data: serde_json::Value::Null,
            previous_id: None,
            created_at: Utc::now(),
            created_by: "sys".into(),
            updated_at: Utc::now(),
            updated_by: "sys".into(),
        }
    }

    #[test]
    fn queue_drops_oldest_when_full() {
        // An unroutable endpoint: the worker will fail to send, which is
        // fine; this exercises only the queue discipline.
        let worker = SyncWorker::start("http://127.0.0.1:9/api".into(), "t".into(), 2);
        let game = game();
        for _ in 0..8 {
            worker.push(&game);
        }
        assert!(worker.pending() <= 2);
    }
}
