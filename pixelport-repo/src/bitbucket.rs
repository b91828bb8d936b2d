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

//! Bitbucket-style hosted API adapter: the paginated `src` file API with
//! per-entry commit metadata, basic auth.

use async_trait::async_trait;
use serde::Deserialize;

use pixelport_core::{Error, ErrorKind, Result};

use crate::{hidden_path, mimetype_for, upstream_error, Entry, Repo, RepoUrl};

pub struct BitbucketRepo {
    url: RepoUrl,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SrcPage {
    values: Vec<SrcEntry>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SrcEntry {
    path: String,
    #[serde(rename = "type")]
    entry_type: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    commit: Option<SrcCommit>,
}

#[derive(Debug, Deserialize)]
struct SrcCommit {
    hash: String,
}

#[derive(Debug, Deserialize)]
struct BranchResponse {
    target: BranchTarget,
}

#[derive(Debug, Deserialize)]
struct BranchTarget {
    hash: String,
}

impl BitbucketRepo {
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
        if self.url.host == "bitbucket.org" {
            "https://api.bitbucket.org/2.0".to_string()
        } else {
            format!("https://{}/api/2.0", self.url.host)
        }
    }

    fn full_path(&self, path: &str) -> String {
        let base = self.url.path.trim_matches('/');
        let path = path.trim_matches('/');
        match (base.is_empty(), path.is_empty()) {
            (true, _) => path.to_string(),
            (_, true) => base.to_string(),
            _ => format!("{base}/{path}"),
        }
    }

    fn relative(&self, path: &str) -> String {
        match path.strip_prefix(self.url.path.trim_matches('/')) {
            Some(rest) if !self.url.path.is_empty() => rest.trim_start_matches('/').to_string(),
            _ => path.to_string(),
        }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.url.user.is_empty() && self.url.token.is_empty() {
            request
        } else {
            request.basic_auth(&self.url.user, Some(&self.url.token))
        }
    }

    async fn send(&self, endpoint: &str, context: &str) -> Result<reqwest::Response> {
        let response = self
            .authorized(self.http.get(endpoint).header("User-Agent", "pixelport"))
            .send()
            .await
            .map_err(|e| Error::new(ErrorKind::Client, format!("{context} failed: {e}")))?;
        let status = response.status().as_u16();
        if status >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(upstream_error(status, context, &body));
        }
        Ok(response)
    }

    /// Walk every page of a `src` directory listing.
    async fn list_dir(&self, path: &str) -> Result<Vec<SrcEntry>> {
        let full = self.full_path(path);
        let mut endpoint = format!(
            "{}/repositories/{}/{}/src/{}/{}",
            self.api_base(),
            self.url.owner,
            self.url.repo,
            self.url.reference,
            full
        );
        let mut entries = Vec::new();
        loop {
            let page: SrcPage = self
                .send(&endpoint, "repository list")
                .await?
                .json()
                .await
                .map_err(|e| {
                    Error::new(ErrorKind::Client, format!("repository list decode failed: {e}"))
                })?;
            entries.extend(page.values);
            match page.next {
                Some(next) => endpoint = next,
                None => break,
            }
        }
        Ok(entries)
    }

    fn to_entry(&self, entry: SrcEntry) -> Entry {
        let is_dir = entry.entry_type == "commit_directory";
        let path = self.relative(&entry.path);
        let name = path.rsplit('/').next().unwrap_or(&path).to_string();
        Entry {
            mimetype: if is_dir { String::new() } else { mimetype_for(&path).to_string() },
            entry_type: if is_dir { "dir" } else { "file" }.to_string(),
            commit_hash: entry.commit.map(|c| c.hash).unwrap_or_default(),
            size: entry.size,
            path,
            name,
        }
    }
}

#[async_trait]
impl Repo for BitbucketRepo {
    async fn list(&self, path: &str) -> Result<Vec<Entry>> {
        Ok(self
            .list_dir(path)
            .await?
            .into_iter()
            .filter(|e| !hidden_path(&e.path))
            .map(|e| self.to_entry(e))
            .collect())
    }

    async fn list_all(&self, path: &str) -> Result<Vec<Entry>> {
        // The src API is one directory per call; recurse breadth-first.
        let mut pending = vec![path.trim_matches('/').to_string()];
        let mut entries = Vec::new();
        while let Some(dir) = pending.pop() {
            for entry in self.list_dir(&dir).await? {
                if hidden_path(&entry.path) {
                    continue;
                }
                let mapped = self.to_entry(entry);
                if mapped.is_dir() {
                    pending.push(mapped.path.clone());
                }
                entries.push(mapped);
            }
        }
        Ok(entries)
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.full_path(path);
        let endpoint = format!(
            "{}/repositories/{}/{}/src/{}/{}",
            self.api_base(),
            self.url.owner,
            self.url.repo,
            self.url.reference,
            full
        );
        let response = self.send(&endpoint, "repository blob").await?;
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| Error::new(ErrorKind::Client, format!("blob read failed: {e}")))
    }

    async fn commit(&self) -> Result<String> {
        let endpoint = format!(
            "{}/repositories/{}/{}/refs/branches/{}",
            self.api_base(),
            self.url.owner,
            self.url.repo,
            self.url.reference
        );
        let branch: BranchResponse = self
            .send(&endpoint, "repository branch")
            .await?
            .json()
            .await
            .map_err(|e| {
                Error::new(ErrorKind::Client, format!("repository branch decode failed: {e}"))
            })?;
        Ok(branch.target.hash)
    }
}
