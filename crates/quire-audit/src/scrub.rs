//! PII masking and field truncation for trace payloads.
//!
//! The scrubber is built once per tracer from `TraceSettings`. It walks
//! arbitrarily nested JSON and rewrites every string leaf; object keys,
//! numbers, booleans, and nulls pass through untouched.

use regex::{Regex, RegexBuilder};
use serde_json::Value;

use quire_contracts::{
    config::TraceSettings,
    error::{QuireError, QuireResult},
};

/// Appended to any string leaf cut down to `max_field_len`.
pub const TRUNCATION_SUFFIX: &str = "...[truncated]";

#[derive(Debug, Clone)]
pub struct PiiScrubber {
    patterns: Vec<Regex>,
    mask_token: String,
    max_field_len: usize,
}

impl PiiScrubber {
    /// Compile the configured patterns.
    ///
    /// Patterns match case-insensitively. When `mask_pii` is off, no pattern
    /// is compiled and only truncation applies.
    pub fn from_settings(settings: &TraceSettings) -> QuireResult<Self> {
        let patterns = if settings.mask_pii {
            settings
                .pii_patterns
                .iter()
                .map(|p| {
                    RegexBuilder::new(p)
                        .case_insensitive(true)
                        .build()
                        .map_err(|e| QuireError::ConfigError {
                            reason: format!("invalid PII pattern '{}': {}", p, e),
                        })
                })
                .collect::<QuireResult<Vec<_>>>()?
        } else {
            Vec::new()
        };

        Ok(Self {
            patterns,
            mask_token: settings.mask_token.clone(),
            max_field_len: settings.max_field_len,
        })
    }

    /// Return a scrubbed copy of `value`.
    pub fn scrub_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.scrub_text(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.scrub_value(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.scrub_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Mask every pattern match, then truncate.
    pub fn scrub_text(&self, text: &str) -> String {
        let mut out = text.to_string();
        for pattern in &self.patterns {
            if pattern.is_match(&out) {
                out = pattern
                    .replace_all(&out, regex::NoExpand(&self.mask_token))
                    .into_owned();
            }
        }
        self.truncate(out)
    }

    fn truncate(&self, text: String) -> String {
        if self.max_field_len == 0 || text.chars().count() <= self.max_field_len {
            return text;
        }
        let mut cut: String = text.chars().take(self.max_field_len).collect();
        cut.push_str(TRUNCATION_SUFFIX);
        cut
    }
}
