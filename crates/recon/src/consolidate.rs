//! Join independent source feeds into one record per composite key.

use std::collections::HashMap;

use crate::model::{Attributes, CompositeKey, SourceRecord, UnifiedRecord};

/// One source feed: its rows plus the fields that form the join key.
///
/// Feeds may name their key fields differently; keys are compared
/// positionally (`key_fields[0]` of every feed is the same logical part).
#[derive(Debug, Clone)]
pub struct Feed {
    pub name: String,
    pub key_fields: Vec<String>,
    pub records: Vec<SourceRecord>,
}

impl Feed {
    pub fn new(name: impl Into<String>, key_fields: &[&str], records: Vec<SourceRecord>) -> Self {
        Self {
            name: name.into(),
            key_fields: key_fields.iter().map(|f| f.to_string()).collect(),
            records,
        }
    }

    pub fn key_for(&self, record: &SourceRecord) -> CompositeKey {
        CompositeKey::new(
            self.key_fields
                .iter()
                .map(|f| record.value(f).unwrap_or("").to_string())
                .collect(),
        )
    }
}

/// Group every feed's rows by composite key and merge each group.
///
/// Output order is first-seen key order across feeds, so runs are
/// reproducible. A key present in only one feed still yields a record.
/// Rows whose key is entirely blank cannot be joined with anything; each
/// becomes its own record so its attributes are not lost.
pub fn consolidate(feeds: &[Feed]) -> Vec<UnifiedRecord> {
    let mut records: Vec<UnifiedRecord> = Vec::new();
    let mut slots: HashMap<CompositeKey, usize> = HashMap::new();

    for feed in feeds {
        for source in &feed.records {
            let key = feed.key_for(source);

            if key.is_blank() {
                records.push(UnifiedRecord::from_source(key, &feed.name, source));
                continue;
            }

            match slots.get(&key) {
                Some(&slot) => records[slot].merge(&feed.name, source),
                None => {
                    slots.insert(key.clone(), records.len());
                    records.push(UnifiedRecord::from_source(key, &feed.name, source));
                }
            }
        }
    }

    records
}

// ---------------------------------------------------------------------------
// Line-delimited JSON feeds
// ---------------------------------------------------------------------------

/// Result of reading a line-delimited JSON export.
#[derive(Debug, Default)]
pub struct ParsedLines {
    pub records: Vec<SourceRecord>,
    /// 1-based line numbers that were not valid JSON objects.
    pub skipped: Vec<usize>,
}

/// Parse one JSON object per line into flat source records.
///
/// Each object is flattened as: top-level scalars, then `fields.*`, then
/// `tags.*` (later sections win on name clashes). Blank lines are ignored
/// silently; lines that are not JSON objects are recorded in `skipped`.
pub fn parse_json_lines(text: &str) -> ParsedLines {
    let mut parsed = ParsedLines::default();

    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let value: serde_json::Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("line {}: skipping malformed JSON ({})", i + 1, e);
                parsed.skipped.push(i + 1);
                continue;
            }
        };

        let Some(obj) = value.as_object() else {
            log::warn!("line {}: skipping non-object JSON", i + 1);
            parsed.skipped.push(i + 1);
            continue;
        };

        let mut fields = Attributes::new();
        for (name, v) in obj {
            if let Some(s) = scalar_string(v) {
                fields.insert(name.clone(), s);
            }
        }
        for section in ["fields", "tags"] {
            if let Some(inner) = obj.get(section).and_then(|v| v.as_object()) {
                for (name, v) in inner {
                    if let Some(s) = scalar_string(v) {
                        fields.insert(name.clone(), s);
                    }
                }
            }
        }

        parsed.records.push(SourceRecord::new(fields));
    }

    parsed
}

fn scalar_string(v: &serde_json::Value) -> Option<String> {
    match v {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
