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

//! Compile the search AST to parameterized SQL.
//!
//! Only allow-listed fields are queryable or sortable; everything else is a
//! `Search` error. The account-scope predicate is appended by the store, not
//! here, so this module never sees or emits account conditions.

use pixelport_core::search::{Query, SortKey};
use pixelport_core::{Error, ErrorKind, Result};

/// A bound query parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Text(String),
    Int(i64),
}

#[derive(Clone, Copy)]
enum FieldKind {
    /// Substring match.
    Like,
    /// Exact text match.
    Text,
    /// Integer comparison; accepts numeric strings.
    Int,
    /// Boolean stored as 0/1; accepts truthy strings.
    Bool,
    /// `key:value` strings stored as a JSON array; matched by containment.
    Tags,
}

fn field_kind(field: &str) -> Result<FieldKind> {
    Ok(match field {
        "name" | "description" => FieldKind::Like,
        "id" | "status" | "source" | "commit_hash" | "created_by" | "updated_by"
        | "previous_id" => FieldKind::Text,
        "version" | "w" | "h" => FieldKind::Int,
        "public" | "debug" => FieldKind::Bool,
        "tags" => FieldKind::Tags,
        other => {
            return Err(Error::new(
                ErrorKind::Search,
                format!("unknown search field {other:?}"),
            ))
        }
    })
}

/// Compile a parsed query into a SQL condition and its parameters.
pub fn compile(query: &Query) -> Result<(String, Vec<Param>)> {
    let mut params = Vec::new();
    let sql = compile_node(query, &mut params)?;
    Ok((sql, params))
}

fn compile_node(query: &Query, params: &mut Vec<Param>) -> Result<String> {
    match query {
        Query::And(terms) => join_nodes(terms, " AND ", params),
        Query::Or(terms) => join_nodes(terms, " OR ", params),
        Query::Not(inner) => Ok(format!("NOT {}", compile_node(inner, params)?)),
        Query::Term { field, value, .. } => {
            let field = field.as_deref().unwrap_or("name");
            compile_term(field, value, params)
        }
    }
}

fn join_nodes(terms: &[Query], separator: &str, params: &mut Vec<Param>) -> Result<String> {
    let compiled: Vec<String> = terms
        .iter()
        .map(|t| compile_node(t, params))
        .collect::<Result<_>>()?;
    Ok(format!("({})", compiled.join(separator)))
}

fn compile_term(field: &str, value: &str, params: &mut Vec<Param>) -> Result<String> {
    match field_kind(field)? {
        FieldKind::Like => {
            params.push(Param::Text(format!("%{value}%")));
            Ok(format!("{field} LIKE ?"))
        }
        FieldKind::Text => {
            params.push(Param::Text(value.to_string()));
            Ok(format!("{field} = ?"))
        }
        FieldKind::Int => {
            let parsed = value.parse::<i64>().map_err(|_| {
                Error::new(
                    ErrorKind::Search,
                    format!("field {field:?} needs an integer, got {value:?}"),
                )
            })?;
            params.push(Param::Int(parsed));
            Ok(format!("{field} = ?"))
        }
        FieldKind::Bool => {
            let parsed = match value.to_ascii_lowercase().as_str() {
                "true" | "t" | "yes" | "1" => 1,
                "false" | "f" | "no" | "0" => 0,
                _ => {
                    return Err(Error::new(
                        ErrorKind::Search,
                        format!("field {field:?} needs a boolean, got {value:?}"),
                    ))
                }
            };
            params.push(Param::Int(parsed));
            Ok(format!("{field} = ?"))
        }
        FieldKind::Tags => {
            // Tags are stored as a JSON array of "k:v" strings.
            params.push(Param::Text(format!("%\"{value}\"%")));
            Ok("tags LIKE ?".to_string())
        }
    }
}

/// Compile the sort list into an ORDER BY clause. Empty input falls back to
/// newest-first.
pub fn compile_sort(keys: &[SortKey]) -> Result<String> {
    if keys.is_empty() {
        return Ok("created_at DESC".to_string());
    }
    let mut clauses = Vec::with_capacity(keys.len());
    for key in keys {
        match key.field.as_str() {
            "name" | "version" | "status" | "source" | "public" | "debug" | "w" | "h"
            | "created_at" | "updated_at" => clauses.push(format!(
                "{} {}",
                key.field,
                if key.descending { "DESC" } else { "ASC" }
            )),
            other => {
                return Err(Error::new(
                    ErrorKind::Search,
                    format!("unknown sort field {other:?}"),
                ))
            }
        }
    }
    Ok(clauses.join(", "))
}
