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

//! Platform error taxonomy and wire envelope.
//!
//! Every component reports failures through [`Error`]: a kind from the fixed
//! taxonomy, a message, the time of first failure, and a structured data bag.
//! Wrapping preserves the original time and the deepest kind so the HTTP
//! status reported to clients reflects the root cause, not the outermost
//! layer that happened to observe it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result alias used across all Pixelport crates.
pub type Result<T> = std::result::Result<T, Error>;

/// The closed set of error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidRequest,
    InvalidHeader,
    InvalidParameter,
    Unauthorized,
    Forbidden,
    NotFound,
    NotAllowed,
    Conflict,
    Canceled,
    Timeout,
    Server,
    Cache,
    Client,
    Database,
    Search,
    Import,
    Maintenance,
    Unavailable,
    Unimplemented,
    RateLimit,
}

impl ErrorKind {
    /// Short symbolic name used in the wire envelope.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "InvalidRequest",
            ErrorKind::InvalidHeader => "InvalidHeader",
            ErrorKind::InvalidParameter => "InvalidParameter",
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::Forbidden => "Forbidden",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::NotAllowed => "NotAllowed",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::Canceled => "Canceled",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Server => "Server",
            ErrorKind::Cache => "Cache",
            ErrorKind::Client => "Client",
            ErrorKind::Database => "Database",
            ErrorKind::Search => "Search",
            ErrorKind::Import => "Import",
            ErrorKind::Maintenance => "Maintenance",
            ErrorKind::Unavailable => "Unavailable",
            ErrorKind::Unimplemented => "Unimplemented",
            ErrorKind::RateLimit => "RateLimit",
        }
    }

    /// Terminal HTTP status for this kind.
    pub fn status(&self) -> u16 {
        match self {
            ErrorKind::InvalidRequest
            | ErrorKind::InvalidHeader
            | ErrorKind::InvalidParameter => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::NotAllowed => 405,
            ErrorKind::Conflict => 409,
            ErrorKind::Canceled | ErrorKind::Timeout => 408,
            ErrorKind::RateLimit => 429,
            ErrorKind::Unimplemented => 501,
            ErrorKind::Maintenance | ErrorKind::Unavailable => 503,
            ErrorKind::Server
            | ErrorKind::Cache
            | ErrorKind::Client
            | ErrorKind::Database
            | ErrorKind::Search
            | ErrorKind::Import => 500,
        }
    }

    /// Whether an outbound call failing with this kind may be retried.
    /// Only the prompt pipeline acts on this.
    pub fn transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout | ErrorKind::RateLimit | ErrorKind::Unavailable
        )
    }
}

/// A platform error: kind, message, time of first failure, structured data,
/// and an optional wrapped cause.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Box<Error>>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            time: Utc::now(),
            data: serde_json::Value::Null,
            source: None,
        }
    }

    /// Attach a structured data bag.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Wrap an upstream error, preserving its time.
    pub fn wrap(kind: ErrorKind, message: impl Into<String>, source: Error) -> Self {
        Self {
            kind,
            message: message.into(),
            time: source.time,
            data: serde_json::Value::Null,
            source: Some(Box::new(source)),
        }
    }

    /// The deepest kind in the wrap chain. Drives the HTTP status.
    pub fn deepest_kind(&self) -> ErrorKind {
        match &self.source {
            Some(inner) => inner.deepest_kind(),
            None => self.kind,
        }
    }

    /// Terminal HTTP status derived from the deepest kind.
    pub fn status(&self) -> u16 {
        self.deepest_kind().status()
    }

    /// Whether the deepest failure is transient.
    pub fn transient(&self) -> bool {
        self.deepest_kind().transient()
    }

    /// True when the failure came from a client disconnect or deadline.
    /// These are counted, not logged as server errors.
    pub fn is_context(&self) -> bool {
        matches!(self.deepest_kind(), ErrorKind::Canceled | ErrorKind::Timeout)
    }

    /// Render the wire envelope for this error.
    pub fn envelope(&self, procedure: &str, server: &str) -> Envelope {
        Envelope {
            code: self.deepest_kind().code().to_string(),
            status: self.status(),
            message: self.message.clone(),
            procedure: procedure.to_string(),
            server: server.to_string(),
            time: self.time,
            data: self.data.clone(),
            error: self.source.as_ref().map(|s| s.message.clone()),
        }
    }

    // Shorthand constructors for the common kinds.

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn not_found(resource: &str, id: &str) -> Self {
        Self::new(ErrorKind::NotFound, format!("{resource} not found"))
            .with_data(serde_json::json!({ "resource": resource, "id": id }))
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Server, message)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)?;
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref().map(|e| e as _)
    }
}

/// The JSON error envelope returned by the HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub code: String,
    pub status: u16,
    pub message: String,
    pub procedure: String,
    pub server: String,
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_deepest_kind() {
        let inner = Error::new(ErrorKind::NotFound, "game not found");
        let outer = Error::wrap(ErrorKind::Import, "import failed", inner);
        assert_eq!(outer.deepest_kind(), ErrorKind::NotFound);
        assert_eq!(outer.status(), 404);
    }

    #[test]
    fn wrap_preserves_time() {
        let inner = Error::new(ErrorKind::Cache, "connect refused");
        let t = inner.time;
        let outer = Error::wrap(ErrorKind::Server, "account lookup failed", inner);
        assert_eq!(outer.time, t);
    }

    #[test]
    fn envelope_carries_code_and_status() {
        let err = Error::forbidden("game limit reached")
            .with_data(serde_json::json!({ "limit": 5 }));
        let env = err.envelope("create_game", "api-1");
        assert_eq!(env.code, "Forbidden");
        assert_eq!(env.status, 403);
        assert_eq!(env.procedure, "create_game");
        assert_eq!(env.data["limit"], 5);
    }

    #[test]
    fn transient_kinds() {
        assert!(ErrorKind::Timeout.transient());
        assert!(ErrorKind::RateLimit.transient());
        assert!(!ErrorKind::InvalidRequest.transient());
        assert!(!ErrorKind::NotFound.transient());
    }

    #[test]
    fn context_errors_detected_through_wrapping() {
        let inner = Error::new(ErrorKind::Canceled, "client went away");
        let outer = Error::wrap(ErrorKind::Client, "ai call failed", inner);
        assert!(outer.is_context());
    }
}
