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

//! The game search query language.
//!
//! Queries are grouped boolean expressions of `field:value` and
//! `field:"phrase"` terms; unquoted bare words match the `name` field.
//! `AND` is implicit between adjacent terms; `OR` and `NOT` and parentheses
//! group as usual. The parser produces an AST; the store compiles it to
//! parameterized SQL against an allow-list of fields.

use crate::error::{Error, ErrorKind, Result};

/// Parsed search expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    And(Vec<Query>),
    Or(Vec<Query>),
    Not(Box<Query>),
    /// A single term. `field == None` means the bare-word `name` match.
    Term {
        field: Option<String>,
        value: String,
        phrase: bool,
    },
}

/// One sort key: field name and descending flag.
#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub field: String,
    pub descending: bool,
}

/// Parse a comma-separated sort list; `-` prefixes descending fields.
pub fn parse_sort(sort: &str) -> Vec<SortKey> {
    sort.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| match s.strip_prefix('-') {
            Some(field) => SortKey {
                field: field.to_string(),
                descending: true,
            },
            None => SortKey {
                field: s.to_string(),
                descending: false,
            },
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open,
    Close,
    And,
    Or,
    Not,
    Word(String),
    Phrase(String),
    FieldTerm { field: String, value: String, phrase: bool },
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '"' => {
                chars.next();
                tokens.push(Token::Phrase(read_quoted(&mut chars)?));
            }
            _ => {
                let word = read_word(&mut chars);
                if chars.peek() == Some(&':') {
                    chars.next();
                    let (value, phrase) = if chars.peek() == Some(&'"') {
                        chars.next();
                        (read_quoted(&mut chars)?, true)
                    } else {
                        (read_value(&mut chars), false)
                    };
                    if value.is_empty() {
                        return Err(Error::new(
                            ErrorKind::Search,
                            format!("empty value for field {word:?}"),
                        ));
                    }
                    tokens.push(Token::FieldTerm {
                        field: word,
                        value,
                        phrase,
                    });
                } else {
                    match word.to_ascii_uppercase().as_str() {
                        "AND" => tokens.push(Token::And),
                        "OR" => tokens.push(Token::Or),
                        "NOT" => tokens.push(Token::Not),
                        _ if word.is_empty() => {
                            return Err(Error::new(
                                ErrorKind::Search,
                                format!("unexpected character {:?}", chars.next().unwrap()),
                            ))
                        }
                        _ => tokens.push(Token::Word(word)),
                    }
                }
            }
        }
    }
    Ok(tokens)
}

fn read_word(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut word = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() || matches!(c, '(' | ')' | ':' | '"') {
            break;
        }
        word.push(c);
        chars.next();
    }
    word
}

/// Field values may themselves contain colons (`tags:genre:platformer`).
fn read_value(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut value = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() || matches!(c, '(' | ')' | '"') {
            break;
        }
        value.push(c);
        chars.next();
    }
    value
}

fn read_quoted(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Result<String> {
    let mut value = String::new();
    for c in chars.by_ref() {
        if c == '"' {
            return Ok(value);
        }
        value.push(c);
    }
    Err(Error::new(ErrorKind::Search, "unterminated phrase"))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_or(&mut self) -> Result<Query> {
        let mut terms = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.next();
            terms.push(self.parse_and()?);
        }
        Ok(if terms.len() == 1 {
            terms.pop().unwrap()
        } else {
            Query::Or(terms)
        })
    }

    fn parse_and(&mut self) -> Result<Query> {
        let mut terms = vec![self.parse_unary()?];
        loop {
            match self.peek() {
                Some(&Token::And) => {
                    self.next();
                    terms.push(self.parse_unary()?);
                }
                // Adjacent terms are an implicit AND.
                Some(&Token::Open)
                | Some(&Token::Not)
                | Some(&Token::Word(_))
                | Some(&Token::Phrase(_))
                | Some(&Token::FieldTerm { .. }) => {
                    terms.push(self.parse_unary()?);
                }
                _ => break,
            }
        }
        Ok(if terms.len() == 1 {
            terms.pop().unwrap()
        } else {
            Query::And(terms)
        })
    }

    fn parse_unary(&mut self) -> Result<Query> {
        if self.peek() == Some(&Token::Not) {
            self.next();
            return Ok(Query::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Query> {
        match self.next() {
            Some(Token::Open) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::Close) => Ok(inner),
                    _ => Err(Error::new(ErrorKind::Search, "missing closing parenthesis")),
                }
            }
            Some(Token::Word(value)) => Ok(Query::Term {
                field: None,
                value,
                phrase: false,
            }),
            Some(Token::Phrase(value)) => Ok(Query::Term {
                field: None,
                value,
                phrase: true,
            }),
            Some(Token::FieldTerm {
                field,
                value,
                phrase,
            }) => Ok(Query::Term {
                field: Some(field),
                value,
                phrase,
            }),
            other => Err(Error::new(
                ErrorKind::Search,
                format!("unexpected token {other:?}"),
            )),
        }
    }
}

/// Parse a search string. An empty or whitespace-only string yields `None`.
pub fn parse(input: &str) -> Result<Option<Query>> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Ok(None);
    }
    let mut parser = Parser { tokens, pos: 0 };
    let query = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(Error::new(
            ErrorKind::Search,
            format!("trailing tokens after position {}", parser.pos),
        ));
    }
    Ok(Some(query))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(field: Option<&str>, value: &str) -> Query {
        Query::Term {
            field: field.map(String::from),
            value: value.to_string(),
            phrase: false,
        }
    }

    #[test]
    fn empty_query_is_none() {
        assert_eq!(parse("").unwrap(), None);
        assert_eq!(parse("   ").unwrap(), None);
    }

    #[test]
    fn bare_word_matches_name() {
        assert_eq!(parse("platformer").unwrap().unwrap(), term(None, "platformer"));
    }

    #[test]
    fn field_terms() {
        assert_eq!(
            parse("status:active").unwrap().unwrap(),
            term(Some("status"), "active")
        );
        assert_eq!(
            parse(r#"name:"space race""#).unwrap().unwrap(),
            Query::Term {
                field: Some("name".into()),
                value: "space race".into(),
                phrase: true,
            }
        );
    }

    #[test]
    fn implicit_and() {
        assert_eq!(
            parse("status:active platformer").unwrap().unwrap(),
            Query::And(vec![term(Some("status"), "active"), term(None, "platformer")])
        );
    }

    #[test]
    fn grouped_boolean() {
        let query = parse("(status:active OR status:new) AND NOT source:git")
            .unwrap()
            .unwrap();
        assert_eq!(
            query,
            Query::And(vec![
                Query::Or(vec![
                    term(Some("status"), "active"),
                    term(Some("status"), "new"),
                ]),
                Query::Not(Box::new(term(Some("source"), "git"))),
            ])
        );
    }

    #[test]
    fn value_may_contain_colons() {
        assert_eq!(
            parse("tags:genre:platformer").unwrap().unwrap(),
            term(Some("tags"), "genre:platformer")
        );
    }

    #[test]
    fn unterminated_phrase_is_an_error() {
        assert!(parse(r#"name:"oops"#).is_err());
    }

    #[test]
    fn unbalanced_parens_are_an_error() {
        assert!(parse("(status:active").is_err());
        assert!(parse("status:active)").is_err());
    }

    #[test]
    fn empty_field_value_is_an_error() {
        assert!(parse("status:").is_err());
    }

    #[test]
    fn sort_parsing() {
        let keys = parse_sort("-updated_at, name");
        assert_eq!(
            keys,
            vec![
                SortKey {
                    field: "updated_at".into(),
                    descending: true
                },
                SortKey {
                    field: "name".into(),
                    descending: false
                },
            ]
        );
        assert!(parse_sort("").is_empty());
    }
}
