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

//! User documents and authorization scopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::field::{Field, FieldDecode};

/// The closed set of authorization scopes. Scope strings are
/// space-separated lists of these values; anything else is refused.
pub const SCOPES: &[&str] = &[
    "account:read",
    "account:admin",
    "user:read",
    "user:write",
    "games:read",
    "games:write",
    "resource:read",
    "resource:write",
    "superuser",
];

/// Validate a space-separated scope string against the closed set.
pub fn validate_scopes(scopes: &str) -> Result<()> {
    for scope in scopes.split_whitespace() {
        if !SCOPES.contains(&scope) {
            return Err(Error::invalid_request(format!("unknown scope {scope:?}")));
        }
    }
    Ok(())
}

/// True when `held` (space-separated) grants `want`. `superuser` grants
/// everything.
pub fn scope_allows(held: &str, want: &str) -> bool {
    held.split_whitespace()
        .any(|s| s == want || s == "superuser")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    Inactive,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(UserStatus::Active),
            "inactive" => Ok(UserStatus::Inactive),
            other => Err(Error::invalid_request(format!(
                "invalid user status {other:?}"
            ))),
        }
    }
}

impl FieldDecode for UserStatus {
    fn decode(value: serde_json::Value) -> std::result::Result<Self, String> {
        let s = String::decode(value)?;
        UserStatus::parse(&s).map_err(|e| e.message)
    }
}

/// A user document. `user_id` is email-shaped and globally unique; the
/// owning account must exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub account_id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub status: UserStatus,
    #[serde(default)]
    pub scopes: String,
    /// SHA-256 password digest. Never serialized outward.
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}

impl User {
    pub fn validate(&self) -> Result<()> {
        if self.user_id.is_empty() || !self.user_id.contains('@') {
            return Err(Error::invalid_request(format!(
                "user_id must be email-shaped, got {:?}",
                self.user_id
            )));
        }
        if self.account_id.is_empty() {
            return Err(Error::invalid_request("account_id must not be empty"));
        }
        validate_scopes(&self.scopes)
    }
}

/// Tolerant patch for user updates.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct UserPatch {
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub email: Field<String>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub first_name: Field<String>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub last_name: Field<String>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub status: Field<UserStatus>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub scopes: Field<String>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub password: Field<String>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub data: Field<serde_json::Value>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.email.is_unset()
            && self.first_name.is_unset()
            && self.last_name.is_unset()
            && self.status.is_unset()
            && self.scopes.is_unset()
            && self.password.is_unset()
            && self.data.is_unset()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(scopes) = self.scopes.value() {
            validate_scopes(scopes)?;
        }
        Ok(())
    }
}
