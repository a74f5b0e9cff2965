// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Glob patterns for key scans and pattern subscriptions.
//!
//! Broker patterns use `*`, `?`, `[...]` and `\` escapes. Matching is done by
//! [`glob::Pattern`]; broker syntax is translated first, since the crate
//! escapes with brackets and treats `**` as a path component.

use glob::{MatchOptions, Pattern};

use crate::domain::broker::ConnectionError;

/// Keys are flat strings: `*` crosses `/` and a leading `.` is ordinary.
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// A compiled broker glob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobPattern {
    raw: String,
    compiled: Pattern,
}

impl GlobPattern {
    pub fn new(raw: &str) -> Result<Self, ConnectionError> {
        let compiled = Pattern::new(&translate(raw)).map_err(|e| ConnectionError::InvalidPattern {
            pattern: raw.to_string(),
            reason: e.msg.to_string(),
        })?;
        Ok(Self {
            raw: raw.to_string(),
            compiled,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, text: &str) -> bool {
        self.compiled.matches_with(text, MATCH_OPTIONS)
    }
}

/// Rewrite `\x` as the crate's bracket escape and collapse `*` runs.
fn translate(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let escaped = chars.next().unwrap_or('\\');
                out.push_str(&Pattern::escape(escaped.encode_utf8(&mut [0; 4])));
            }
            '*' => {
                while chars.peek() == Some(&'*') {
                    chars.next();
                }
                out.push('*');
            }
            other => out.push(other),
        }
    }
    out
}
