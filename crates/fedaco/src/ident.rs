//! SQL identifier parsing.
//!
//! [`Ident`] is the parsed form of a column or table reference as written in builder
//! calls. Quoting is left to the dialect grammar.
//!
//! - Dotted: `schema.table.column`
//! - Aliased: `users.id as uid` (case-insensitive `AS`)
//! - Wildcards: `*`, `users.*`
//! - JSON selectors: `meta->address->city`
//!
//! # Example
//! ```ignore
//! use fedaco::Ident;
//!
//! let c = Ident::parse("users.id as uid")?;
//! assert_eq!(c.alias.as_deref(), Some("uid"));
//! # Ok::<(), fedaco::OrmError>(())
//! ```

use crate::error::{OrmError, OrmResult};

/// A parsed identifier reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident {
    /// Dotted segments; the last one is the column (or table) name.
    pub segments: Vec<String>,
    /// Alias declared with `AS`.
    pub alias: Option<String>,
    /// JSON path following `->` selectors, if any.
    pub json_path: Vec<String>,
}

impl Ident {
    /// Parse an identifier string.
    pub fn parse(s: &str) -> OrmResult<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(OrmError::compile("Identifier cannot be empty"));
        }
        if s.contains('\0') {
            return Err(OrmError::compile("Identifier cannot contain NUL character"));
        }

        let (body, alias) = split_alias(s)?;

        let mut json_parts = body.split("->").map(str::trim);
        let column = json_parts.next().unwrap_or_default();
        let json_path: Vec<String> = json_parts
            .map(|p| p.trim_matches(|c| c == '\'' || c == '"').to_string())
            .collect();
        if json_path.iter().any(String::is_empty) {
            return Err(OrmError::compile(format!("Empty JSON path segment in '{s}'")));
        }

        let segments: Vec<String> = column.split('.').map(|p| p.trim().to_string()).collect();
        for (i, seg) in segments.iter().enumerate() {
            if seg.is_empty() {
                return Err(OrmError::compile(format!("Empty identifier segment in '{s}'")));
            }
            if seg.chars().any(char::is_whitespace) {
                return Err(OrmError::compile(format!("Whitespace in identifier '{s}'")));
            }
            if seg == "*" && i + 1 != segments.len() {
                return Err(OrmError::compile(format!("Wildcard must be the last segment in '{s}'")));
            }
        }
        if segments.last().is_some_and(|c| c == "*") && !json_path.is_empty() {
            return Err(OrmError::compile("JSON selector on a wildcard"));
        }

        Ok(Self {
            segments,
            alias,
            json_path,
        })
    }

    /// Build an identifier from a single, unparsed name.
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            segments: vec![name.into()],
            alias: None,
            json_path: Vec::new(),
        }
    }

    /// The final segment.
    pub fn last(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// Segments before the final one.
    pub fn qualifier(&self) -> &[String] {
        &self.segments[..self.segments.len().saturating_sub(1)]
    }

    pub fn is_wildcard(&self) -> bool {
        self.last() == "*"
    }

    pub fn is_json(&self) -> bool {
        !self.json_path.is_empty()
    }
}

fn split_alias(s: &str) -> OrmResult<(&str, Option<String>)> {
    let lower = s.to_ascii_lowercase();
    match lower.find(" as ") {
        Some(pos) => {
            let body = s[..pos].trim();
            let alias = s[pos + 4..].trim();
            if body.is_empty() || alias.is_empty() || alias.contains(' ') {
                return Err(OrmError::compile(format!("Malformed alias in '{s}'")));
            }
            Ok((body, Some(alias.to_string())))
        }
        None => Ok((s, None)),
    }
}

/// Strip any `AS alias` and qualifier: `users.id as uid` -> `uid`, `users.id` -> `id`.
pub fn output_name(column: &str) -> String {
    match Ident::parse(column) {
        Ok(ident) => match ident.alias.as_deref() {
            Some(alias) => alias.to_string(),
            None => ident.last().to_string(),
        },
        Err(_) => column.to_string(),
    }
}
