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

//! Tolerant fields for partial updates.
//!
//! A [`Field<T>`] records whether the field was present in the payload
//! (`set`), whether it was non-null (`valid`), and the typed value. Patch
//! documents are built from tolerant fields: on update only `set` fields are
//! written, and `set && !valid` writes an explicit null. Decoding accepts the
//! obvious cross-type coercions (numeric strings, epoch-or-RFC3339
//! timestamps, truthy strings) and refuses everything else.
//!
//! Presence is driven by serde: patch structs mark every field
//! `#[serde(default, skip_serializing_if = "Field::is_unset")]`, so a key
//! absent from the payload deserializes to the unset state and never
//! round-trips back out.

use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};

/// A value tagged with presence and validity.
#[derive(Debug, Clone, PartialEq)]
pub struct Field<T> {
    set: bool,
    valid: bool,
    value: Option<T>,
}

impl<T> Field<T> {
    /// Field absent from the payload.
    pub fn unset() -> Self {
        Self {
            set: false,
            valid: false,
            value: None,
        }
    }

    /// Field present as an explicit null.
    pub fn null() -> Self {
        Self {
            set: true,
            valid: false,
            value: None,
        }
    }

    /// Field present with a value.
    pub fn some(value: T) -> Self {
        Self {
            set: true,
            valid: true,
            value: Some(value),
        }
    }

    pub fn is_set(&self) -> bool {
        self.set
    }

    pub fn is_unset(&self) -> bool {
        !self.set
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// True when the payload carried an explicit null.
    pub fn is_null(&self) -> bool {
        self.set && !self.valid
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<T> {
        self.value
    }

    /// Apply the tolerant-update rule to a target slot: unset leaves it
    /// alone, null clears it to the type default, a value replaces it.
    pub fn apply(self, target: &mut T)
    where
        T: Default,
    {
        if !self.set {
            return;
        }
        *target = self.value.unwrap_or_default();
    }
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Self::unset()
    }
}

impl<T> From<Option<T>> for Field<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Field::some(v),
            None => Field::null(),
        }
    }
}

/// Decode a JSON value into the field's payload type, applying the
/// tolerated coercions. Implementations refuse anything else.
pub trait FieldDecode: Sized {
    fn decode(value: serde_json::Value) -> Result<Self, String>;
}

impl FieldDecode for String {
    fn decode(value: serde_json::Value) -> Result<Self, String> {
        match value {
            serde_json::Value::String(s) => Ok(s),
            other => Err(format!("expected string, got {other}")),
        }
    }
}

impl FieldDecode for i64 {
    fn decode(value: serde_json::Value) -> Result<Self, String> {
        match value {
            serde_json::Value::Number(n) => n
                .as_i64()
                .ok_or_else(|| format!("expected integer, got {n}")),
            serde_json::Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| format!("expected integer, got {s:?}")),
            other => Err(format!("expected integer, got {other}")),
        }
    }
}

impl FieldDecode for f64 {
    fn decode(value: serde_json::Value) -> Result<Self, String> {
        match value {
            serde_json::Value::Number(n) => {
                n.as_f64().ok_or_else(|| format!("expected number, got {n}"))
            }
            serde_json::Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("expected number, got {s:?}")),
            other => Err(format!("expected number, got {other}")),
        }
    }
}

impl FieldDecode for bool {
    fn decode(value: serde_json::Value) -> Result<Self, String> {
        match value {
            serde_json::Value::Bool(b) => Ok(b),
            serde_json::Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "yes" | "y" | "1" => Ok(true),
                "false" | "f" | "no" | "n" | "0" => Ok(false),
                _ => Err(format!("expected boolean, got {s:?}")),
            },
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(0) => Ok(false),
                Some(1) => Ok(true),
                _ => Err(format!("expected boolean, got {n}")),
            },
            other => Err(format!("expected boolean, got {other}")),
        }
    }
}

impl FieldDecode for chrono::DateTime<chrono::Utc> {
    fn decode(value: serde_json::Value) -> Result<Self, String> {
        match value {
            serde_json::Value::String(s) => chrono::DateTime::parse_from_rfc3339(&s)
                .map(|t| t.with_timezone(&chrono::Utc))
                .or_else(|_| {
                    s.trim()
                        .parse::<i64>()
                        .map_err(|_| ())
                        .and_then(|secs| {
                            chrono::DateTime::<chrono::Utc>::from_timestamp(secs, 0).ok_or(())
                        })
                        .map_err(|_| format!("expected timestamp, got {s:?}"))
                }),
            serde_json::Value::Number(n) => n
                .as_i64()
                .and_then(|secs| chrono::DateTime::<chrono::Utc>::from_timestamp(secs, 0))
                .ok_or_else(|| format!("expected epoch seconds, got {n}")),
            other => Err(format!("expected timestamp, got {other}")),
        }
    }
}

impl FieldDecode for serde_json::Value {
    fn decode(value: serde_json::Value) -> Result<Self, String> {
        Ok(value)
    }
}

impl FieldDecode for Vec<String> {
    fn decode(value: serde_json::Value) -> Result<Self, String> {
        match value {
            serde_json::Value::Array(items) => items
                .into_iter()
                .map(|v| match v {
                    serde_json::Value::String(s) => Ok(s),
                    other => Err(format!("expected string array element, got {other}")),
                })
                .collect(),
            other => Err(format!("expected string array, got {other}")),
        }
    }
}

/// Strict serde decoding for composite field payloads. No coercions; the
/// nested type's own deserializer is the schema.
#[macro_export]
macro_rules! impl_field_decode_serde {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::field::FieldDecode for $ty {
                fn decode(value: serde_json::Value) -> ::std::result::Result<Self, String> {
                    serde_json::from_value(value).map_err(|e| e.to_string())
                }
            }
        )+
    };
}

impl<'de, T: FieldDecode> Deserialize<'de> for Field<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = serde_json::Value::deserialize(deserializer)?;
        if raw.is_null() {
            return Ok(Field::null());
        }
        T::decode(raw)
            .map(Field::some)
            .map_err(serde::de::Error::custom)
    }
}

impl<T: Serialize> Serialize for Field<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match &self.value {
            Some(v) if self.valid => v.serialize(serializer),
            _ => serializer.serialize_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize)]
    struct Patch {
        #[serde(default)]
        name: Field<String>,
        #[serde(default)]
        game_limit: Field<i64>,
        #[serde(default)]
        debug: Field<bool>,
        #[serde(default)]
        updated_at: Field<chrono::DateTime<chrono::Utc>>,
    }

    #[test]
    fn missing_fields_stay_unset() {
        let patch: Patch = serde_json::from_str(r#"{"name":"g1"}"#).unwrap();
        assert!(patch.name.is_set());
        assert_eq!(patch.name.value().unwrap(), "g1");
        assert!(patch.game_limit.is_unset());
        assert!(patch.debug.is_unset());
    }

    #[test]
    fn explicit_null_is_set_but_invalid() {
        let patch: Patch = serde_json::from_str(r#"{"name":null}"#).unwrap();
        assert!(patch.name.is_set());
        assert!(patch.name.is_null());
        assert!(patch.name.value().is_none());
    }

    #[test]
    fn numeric_string_coerces_to_int() {
        let patch: Patch = serde_json::from_str(r#"{"game_limit":"25"}"#).unwrap();
        assert_eq!(*patch.game_limit.value().unwrap(), 25);
    }

    #[test]
    fn truthy_string_coerces_to_bool() {
        let patch: Patch = serde_json::from_str(r#"{"debug":"yes"}"#).unwrap();
        assert!(*patch.debug.value().unwrap());
    }

    #[test]
    fn epoch_seconds_coerce_to_timestamp() {
        let patch: Patch = serde_json::from_str(r#"{"updated_at":1700000000}"#).unwrap();
        assert_eq!(patch.updated_at.value().unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn rfc3339_parses() {
        let patch: Patch =
            serde_json::from_str(r#"{"updated_at":"2024-01-15T10:30:00Z"}"#).unwrap();
        assert_eq!(
            patch.updated_at.value().unwrap().to_rfc3339(),
            "2024-01-15T10:30:00+00:00"
        );
    }

    #[test]
    fn garbage_is_refused() {
        let result: Result<Patch, _> = serde_json::from_str(r#"{"game_limit":{"a":1}}"#);
        assert!(result.is_err());
        let result: Result<Patch, _> = serde_json::from_str(r#"{"debug":"maybe"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn apply_honors_set_and_null() {
        let mut name = "before".to_string();
        Field::<String>::unset().apply(&mut name);
        assert_eq!(name, "before");
        Field::some("after".to_string()).apply(&mut name);
        assert_eq!(name, "after");
        Field::<String>::null().apply(&mut name);
        assert_eq!(name, "");
    }
}
