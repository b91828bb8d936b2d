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

//! GitHub-style hosted API adapter: contents endpoint for shallow listing
//! and blobs, tree endpoint for the recursive listing, token auth.

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;

use pixelport_core::{Error, ErrorKind, Result};

use crate::{hidden_path, mimetype_for, upstream_error, Entry, Repo, RepoUrl};

pub struct GithubRepo {
    url: RepoUrl,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ContentEntry {
    name: String,
    path: String,
    #[serde(rename = "type")]
    entry_type: String,
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Deserialize)]
struct ContentFile {
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    entry_type: String,
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    sha: String,
}

impl GithubRepo {
    pub fn new(url: RepoUrl) -> Self {
        Self {
            url,
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    fn api_base(&self) -> String {
        if self.url.host == "github.com" {
            "https://api.github.com".to_string()
        } else {
            format!("https://{}/api/v3", self.url.host)
        }
    }

    /// Join the configured subpath with a caller path.
    fn full_path(&self, path: &str) -> String {
        join(&self.url.path, path)
    }

    /// Strip the configured subpath so returned paths are adapter-relative.
    fn relative(&self, path: &str) -> String {
        match path.strip_prefix(&self.url.path) {
            Some(rest) if !self.url.path.is_empty() => rest.trim_start_matches('/').to_string(),
            _ => path.to_string(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        context: &str,
    ) -> Result<T> {
        let mut request = self
            .http
            .get(endpoint)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "pixelport");
        if !self.url.token.is_empty() {
            request = request.bearer_auth(&self.url.token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::new(ErrorKind::Client, format!("{context} failed: {e}")))?;
        let status = response.status().as_u16();
        if status == 404 || status >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(upstream_error(status, context, &body));
        }
        response
            .json()
            .await
            .map_err(|e| Error::new(ErrorKind::Client, format!("{context} decode failed: {e}")))
    }
}

fn join(base: &str, path: &str) -> String {
    let base = base.trim_matches('/');
    let path = path.trim_matches('/');
    match (base.is_empty(), path.is_empty()) {
        (true, _) => path.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{base}/{path}"),
    }
}

#[async_trait]
impl Repo for GithubRepo {
    async fn list(&self, path: &str) -> Result<Vec<Entry>> {
        let full = self.full_path(path);
        let endpoint = format!(
            "{}/repos/{}/{}/contents/{}?ref={}",
            self.api_base(),
            self.url.owner,
            self.url.repo,
            full,
            self.url.reference
        );
        let entries: Vec<ContentEntry> = self.get_json(&endpoint, "repository list").await?;

        Ok(entries
            .into_iter()
            .filter(|e| !hidden_path(&e.path))
            .map(|e| {
                let path = self.relative(&e.path);
                let is_dir = e.entry_type == "dir";
                Entry {
                    mimetype: if is_dir { String::new() } else { mimetype_for(&path).to_string() },
                    entry_type: if is_dir { "dir" } else { "file" }.to_string(),
                    path,
                    name: e.name,
                    size: e.size,
                    commit_hash: String::new(),
                }
            })
            .collect())
    }

    async fn list_all(&self, path: &str) -> Result<Vec<Entry>> {
        let endpoint = format!(
            "{}/repos/{}/{}/git/trees/{}?recursive=1",
            self.api_base(),
            self.url.owner,
            self.url.repo,
            self.url.reference
        );
        let tree: TreeResponse = self.get_json(&endpoint, "repository tree").await?;

        let prefix = self.full_path(path);
        let mut entries = Vec::new();
        for item in tree.tree {
            if !prefix.is_empty()
                && item.path != prefix
                && !item.path.starts_with(&format!("{prefix}/"))
            {
                continue;
            }
            if hidden_path(&item.path) {
                continue;
            }
            let is_dir = item.entry_type == "tree";
            let path = self.relative(&item.path);
            if path.is_empty() {
                continue;
            }
            let name = path.rsplit('/').next().unwrap_or(&path).to_string();
            entries.push(Entry {
                mimetype: if is_dir { String::new() } else { mimetype_for(&path).to_string() },
                entry_type: if is_dir { "dir" } else { "file" }.to_string(),
                path,
                name,
                size: item.size,
                commit_hash: String::new(),
            });
        }
        Ok(entries)
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.full_path(path);
        let endpoint = format!(
            "{}/repos/{}/{}/contents/{}?ref={}",
            self.api_base(),
            self.url.owner,
            self.url.repo,
            full,
            self.url.reference
        );
        let file: ContentFile = self.get_json(&endpoint, "repository blob").await?;
        if file.encoding != "base64" {
            return Err(Error::new(
                ErrorKind::Client,
                format!("unexpected blob encoding {:?} for {path}", file.encoding),
            ));
        }
        let compact: String = file.content.split_whitespace().collect();
        base64::engine::general_purpose::STANDARD
            .decode(compact)
            .map_err(|e| Error::new(ErrorKind::Client, format!("blob decode failed: {e}")))
    }

    async fn commit(&self) -> Result<String> {
        let endpoint = format!(
            "{}/repos/{}/{}/commits/{}",
            self.api_base(),
            self.url.owner,
            self.url.repo,
            self.url.reference
        );
        let commit: CommitResponse = self.get_json(&endpoint, "repository commit").await?;
        Ok(commit.sha)
    }
}
