//! Time-sharded table naming
//!
//! A sharded entity lives in `<entity><splitter><suffix>` where the suffix is
//! the model-build time formatted with the directive's pattern. The resolver
//! captures its clock once, so every name it hands out for a context points at
//! the same partition.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local};

use crate::error::{ModelError, OrmResult};

/// Splitter and time-format suffix of a sharded entity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShardingDirective {
    splitter: String,
    suffix: String,
}

impl ShardingDirective {
    /// `suffix` accepts `yyyy`/`MM`/`dd`-style tokens or a chrono strftime pattern
    pub fn new(splitter: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            splitter: splitter.into(),
            suffix: suffix.into(),
        }
    }

    pub fn splitter(&self) -> &str {
        &self.splitter
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }
}

/// Computes physical table names for sharded entities
#[derive(Debug, Clone, Copy)]
pub struct ShardResolver {
    resolved_at: DateTime<Local>,
}

impl ShardResolver {
    pub fn new(resolved_at: DateTime<Local>) -> Self {
        Self { resolved_at }
    }

    pub fn now() -> Self {
        Self::new(Local::now())
    }

    pub fn resolved_at(&self) -> DateTime<Local> {
        self.resolved_at
    }

    pub fn physical_name(
        &self,
        entity_name: &str,
        directive: &ShardingDirective,
    ) -> OrmResult<String> {
        let pattern = to_strftime(directive.suffix());
        if StrftimeItems::new(&pattern).any(|item| matches!(item, Item::Error)) {
            return Err(ModelError::Configuration(format!(
                "Invalid shard suffix '{}' on entity '{}'",
                directive.suffix(),
                entity_name
            )));
        }
        Ok(format!(
            "{}{}{}",
            entity_name,
            directive.splitter(),
            self.resolved_at.format(&pattern)
        ))
    }
}

/// Translate `yyyyMMdd`-style tokens into a strftime pattern.
///
/// Patterns already containing `%` are taken as strftime. Text between single
/// quotes is copied literally.
pub fn to_strftime(suffix: &str) -> String {
    if suffix.contains('%') {
        return suffix.to_string();
    }

    let chars: Vec<char> = suffix.chars().collect();
    let mut out = String::with_capacity(suffix.len() * 2);
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '\'' {
            i += 1;
            while i < chars.len() && chars[i] != '\'' {
                out.push(chars[i]);
                i += 1;
            }
            i += 1;
            continue;
        }

        let mut run = 1;
        while i + run < chars.len() && chars[i + run] == c {
            run += 1;
        }

        let token = match (c, run) {
            ('y', 3..) => Some("%Y"),
            ('y', _) => Some("%y"),
            ('M', 2..) => Some("%m"),
            ('M', 1) => Some("%-m"),
            ('d', 2..) => Some("%d"),
            ('d', 1) => Some("%-d"),
            ('H', 2..) => Some("%H"),
            ('H', 1) => Some("%-H"),
            ('h', 2..) => Some("%I"),
            ('h', 1) => Some("%-I"),
            ('m', 2..) => Some("%M"),
            ('m', 1) => Some("%-M"),
            ('s', 2..) => Some("%S"),
            ('s', 1) => Some("%-S"),
            ('f', 3) => Some("%3f"),
            _ => None,
        };

        match token {
            Some(token) => out.push_str(token),
            None => {
                for _ in 0..run {
                    out.push(c);
                }
            }
        }
        i += run;
    }
    out
}
