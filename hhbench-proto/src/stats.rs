//! Stats Line Decoding
//!
//! An instance answers `:s` with exactly one line shaped like a flat mapping
//! literal, e.g. `{'sample_size': 1000, 'threshold': 0.125}`. The decoder here
//! is a strict structural parser: string keys (bare or quoted), finite numeric
//! values, no nesting. Anything else is rejected as a protocol error rather
//! than interpreted.

use crate::ProtocolError;
use std::collections::BTreeMap;

/// An immutable mapping from metric name to numeric value, decoded from an
/// instance's self-report. After `finish()`, the owning instance may merge in
/// one extra profiler-derived entry.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatsSnapshot {
    entries: BTreeMap<String, f64>,
}

impl StatsSnapshot {
    /// Parse a stats line of the form `{key: number, ...}`.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let malformed = |reason: &str| ProtocolError::MalformedStats {
            line: line.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = line.trim();
        let body = trimmed
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
            .ok_or_else(|| malformed("not enclosed in braces"))?;

        let mut entries = BTreeMap::new();
        if body.trim().is_empty() {
            return Ok(Self { entries });
        }

        for pair in body.split(',') {
            let (raw_key, raw_value) = pair
                .split_once(':')
                .ok_or_else(|| malformed("entry without ':' separator"))?;

            let key = unquote(raw_key.trim()).ok_or_else(|| malformed("unbalanced key quotes"))?;
            if key.is_empty() {
                return Err(malformed("empty key"));
            }
            if key.contains(['\'', '"', '{', '}', '[', ']']) {
                return Err(malformed("key is not a plain string"));
            }

            let value: f64 = raw_value
                .trim()
                .parse()
                .map_err(|_| malformed("value is not a number"))?;
            if !value.is_finite() {
                return Err(malformed("value is not finite"));
            }

            if entries.insert(key.to_string(), value).is_some() {
                return Err(malformed("duplicate key"));
            }
        }

        Ok(Self { entries })
    }

    /// Look up a metric by name.
    pub fn get(&self, key: &str) -> Option<f64> {
        self.entries.get(key).copied()
    }

    /// Insert or replace a metric. Used once per instance, to merge the
    /// profiler-derived value into the cached final snapshot.
    pub fn insert(&mut self, key: impl Into<String>, value: f64) {
        self.entries.insert(key.into(), value);
    }

    /// Iterate entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Number of metrics in the snapshot.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot holds no metrics.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Strip one matching pair of single or double quotes, if present.
/// Returns `None` for unbalanced quoting.
fn unquote(s: &str) -> Option<&str> {
    for quote in ['\'', '"'] {
        if let Some(rest) = s.strip_prefix(quote) {
            return rest.strip_suffix(quote);
        }
        if s.ends_with(quote) {
            return None;
        }
    }
    Some(s)
}
