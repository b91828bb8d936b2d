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

//! Account documents.
//!
//! An account is the ownership boundary for users, games, and AI
//! credentials. Repo import state (`repo_status`, `game_commit_hash`) is
//! owned by the import loop; nothing else transitions it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::field::{Field, FieldDecode};

/// Account lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    #[default]
    Active,
    Inactive,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(AccountStatus::Active),
            "inactive" => Ok(AccountStatus::Inactive),
            other => Err(Error::invalid_request(format!(
                "invalid account status {other:?}"
            ))),
        }
    }
}

/// Import-repository status, transitioned only by the import loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoStatus {
    Active,
    #[default]
    Inactive,
    Importing,
    Error,
}

impl RepoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoStatus::Active => "active",
            RepoStatus::Inactive => "inactive",
            RepoStatus::Importing => "importing",
            RepoStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(RepoStatus::Active),
            "inactive" => Ok(RepoStatus::Inactive),
            "importing" => Ok(RepoStatus::Importing),
            "error" => Ok(RepoStatus::Error),
            other => Err(Error::invalid_request(format!(
                "invalid repo status {other:?}"
            ))),
        }
    }
}

impl FieldDecode for AccountStatus {
    fn decode(value: serde_json::Value) -> std::result::Result<Self, String> {
        let s = String::decode(value)?;
        AccountStatus::parse(&s).map_err(|e| e.message)
    }
}

impl FieldDecode for RepoStatus {
    fn decode(value: serde_json::Value) -> std::result::Result<Self, String> {
        let s = String::decode(value)?;
        RepoStatus::parse(&s).map_err(|e| e.message)
    }
}

/// An account document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub account_id: String,
    pub name: String,
    #[serde(default)]
    pub status: AccountStatus,
    #[serde(default)]
    pub repo: String,
    #[serde(default)]
    pub repo_status: RepoStatus,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub repo_status_data: serde_json::Value,
    #[serde(default)]
    pub game_commit_hash: String,
    pub game_limit: i64,
    /// Opaque AI credential. Never returned by the HTTP surface.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ai_api_key: String,
    #[serde(default)]
    pub ai_max_tokens: i64,
    #[serde(default)]
    pub ai_thinking_budget: i64,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}

impl Account {
    /// Validate the invariants every stored account must satisfy.
    pub fn validate(&self) -> Result<()> {
        if self.account_id.is_empty() {
            return Err(Error::invalid_request("account_id must not be empty"));
        }
        if self.name.is_empty() {
            return Err(Error::invalid_request("account name must not be empty"));
        }
        if self.game_limit < 0 {
            return Err(Error::invalid_request("game_limit must not be negative"));
        }
        Ok(())
    }
}

/// Tolerant patch for account updates. Repo import state is deliberately
/// narrow: `repo` may be patched by admins, the status fields only through
/// the import loop's typed transitions.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AccountPatch {
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub name: Field<String>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub status: Field<AccountStatus>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub repo: Field<String>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub repo_status: Field<RepoStatus>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub repo_status_data: Field<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub game_commit_hash: Field<String>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub game_limit: Field<i64>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub ai_api_key: Field<String>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub ai_max_tokens: Field<i64>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub ai_thinking_budget: Field<i64>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub data: Field<serde_json::Value>,
}

impl AccountPatch {
    /// True when no field is set; a no-op patch must not touch `updated_at`.
    pub fn is_empty(&self) -> bool {
        self.name.is_unset()
            && self.status.is_unset()
            && self.repo.is_unset()
            && self.repo_status.is_unset()
            && self.repo_status_data.is_unset()
            && self.game_commit_hash.is_unset()
            && self.game_limit.is_unset()
            && self.ai_api_key.is_unset()
            && self.ai_max_tokens.is_unset()
            && self.ai_thinking_budget.is_unset()
            && self.data.is_unset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Account {
        Account {
            account_id: "a-1".into(),
            name: "default".into(),
            status: AccountStatus::Active,
            repo: String::new(),
            repo_status: RepoStatus::Inactive,
            repo_status_data: serde_json::Value::Null,
            game_commit_hash: String::new(),
            game_limit: 10,
            ai_api_key: String::new(),
            ai_max_tokens: 4096,
            ai_thinking_budget: 0,
            data: serde_json::Value::Null,
            created_at: Utc::now(),
            created_by: "sys".into(),
            updated_at: Utc::now(),
            updated_by: "sys".into(),
        }
    }

    #[test]
    fn validate_rejects_blank_name() {
        let mut a = account();
        a.name.clear();
        assert!(a.validate().is_err());
    }

    #[test]
    fn patch_coerces_limit_from_string() {
        let patch: AccountPatch = serde_json::from_str(r#"{"game_limit":"3"}"#).unwrap();
        assert_eq!(*patch.game_limit.value().unwrap(), 3);
        assert!(!patch.is_empty());
    }

    #[test]
    fn empty_patch_is_detected() {
        let patch: AccountPatch = serde_json::from_str("{}").unwrap();
        assert!(patch.is_empty());
    }

    #[test]
    fn repo_status_parse_round_trip() {
        for s in ["active", "inactive", "importing", "error"] {
            assert_eq!(RepoStatus::parse(s).unwrap().as_str(), s);
        }
        assert!(RepoStatus::parse("bogus").is_err());
    }
}
