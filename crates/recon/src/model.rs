use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Attribute name → value. Ordered so payloads and reports are deterministic.
pub type Attributes = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Opaque, target-assigned identifier.
///
/// Only ever built from a listing/lookup response or a create response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Source side
// ---------------------------------------------------------------------------

/// A single row handed over by a parsing collaborator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceRecord {
    pub fields: Attributes,
}

impl SourceRecord {
    pub fn new(fields: Attributes) -> Self {
        Self { fields }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Trimmed value, `None` when absent or blank.
    pub fn value(&self, field: &str) -> Option<&str> {
        non_blank(self.fields.get(field))
    }
}

/// Join key shared by every feed describing one logical entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CompositeKey(Vec<String>);

impl CompositeKey {
    pub fn new(parts: Vec<String>) -> Self {
        Self(parts)
    }

    pub fn single(part: impl Into<String>) -> Self {
        Self(vec![part.into()])
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    /// True when no part carries a value, i.e. the record cannot be joined.
    pub fn is_blank(&self) -> bool {
        self.0.iter().all(|p| p.is_empty())
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            if part.is_empty() {
                f.write_str("-")?;
            } else {
                f.write_str(part)?;
            }
        }
        Ok(())
    }
}

/// One logical entity after feeds have been joined.
#[derive(Debug, Clone, PartialEq)]
pub struct UnifiedRecord {
    pub key: CompositeKey,
    pub attributes: Attributes,
    /// Names of the feeds that contributed, in merge order.
    pub feeds: Vec<String>,
}

impl UnifiedRecord {
    pub fn new(key: CompositeKey) -> Self {
        Self {
            key,
            attributes: Attributes::new(),
            feeds: Vec::new(),
        }
    }

    /// Build a record straight from a single source row (no join needed).
    pub fn from_source(key: CompositeKey, feed: &str, source: &SourceRecord) -> Self {
        let mut record = Self::new(key);
        record.merge(feed, source);
        record
    }

    pub fn value(&self, field: &str) -> Option<&str> {
        non_blank(self.attributes.get(field))
    }

    /// Fold a source row in. Blank values never replace anything; among
    /// non-blank values the last writer wins.
    pub fn merge(&mut self, feed: &str, source: &SourceRecord) {
        for (name, value) in &source.fields {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            self.attributes.insert(name.clone(), value.to_string());
        }
        if !self.feeds.iter().any(|f| f == feed) {
            self.feeds.push(feed.to_string());
        }
    }
}

fn non_blank(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Target side
// ---------------------------------------------------------------------------

/// Name-keyed tag as stored on the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelRecord {
    pub id: TargetId,
    pub name: String,
    #[serde(default)]
    pub color: String,
}

/// Label to be created on a cache miss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLabel {
    pub name: String,
    pub color: String,
    pub description: String,
}

/// Current state of one entity, decoded from a listing.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetRecord {
    pub id: TargetId,
    pub name: String,
    /// Alternate identifying values (addresses, indexes) used by fallback matching.
    pub secondary: Vec<String>,
    pub attributes: Attributes,
    pub labels: Vec<LabelRecord>,
}

impl TargetRecord {
    pub fn new(id: TargetId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            secondary: Vec::new(),
            attributes: Attributes::new(),
            labels: Vec::new(),
        }
    }

    pub fn has_label(&self, name: &str) -> bool {
        let name = name.trim();
        self.labels.iter().any(|l| l.name.eq_ignore_ascii_case(name))
    }
}

// ---------------------------------------------------------------------------
// Run output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Created,
    Updated,
    Skipped,
    Failed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
            Self::Skipped => write!(f, "skipped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Terminal state of one record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordResult {
    pub key: String,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<TargetId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changed: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RecordResult {
    fn new(key: impl Into<String>, outcome: Outcome, target_id: Option<TargetId>) -> Self {
        Self {
            key: key.into(),
            outcome,
            target_id,
            changed: Vec::new(),
            reason: None,
        }
    }

    pub fn created(key: impl Into<String>, id: Option<TargetId>) -> Self {
        Self::new(key, Outcome::Created, id)
    }

    pub fn updated(key: impl Into<String>, id: TargetId, changed: Vec<String>) -> Self {
        Self {
            changed,
            ..Self::new(key, Outcome::Updated, Some(id))
        }
    }

    pub fn skipped(key: impl Into<String>, id: Option<TargetId>) -> Self {
        Self::new(key, Outcome::Skipped, id)
    }

    pub fn failed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(key, Outcome::Failed, None).with_reason(reason)
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_target(mut self, id: TargetId) -> Self {
        self.target_id = Some(id);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub key: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunMeta {
    pub profile: String,
    pub dry_run: bool,
    pub engine_version: String,
    pub run_at: String,
}

/// Counts plus per-record detail for one invocation.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub meta: RunMeta,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<Failure>,
    pub records: Vec<RecordResult>,
}

impl RunSummary {
    pub fn new(profile: &str, dry_run: bool) -> Self {
        Self {
            meta: RunMeta {
                profile: profile.to_string(),
                dry_run,
                engine_version: env!("CARGO_PKG_VERSION").to_string(),
                run_at: chrono::Utc::now().to_rfc3339(),
            },
            created: 0,
            updated: 0,
            skipped: 0,
            failed: 0,
            failures: Vec::new(),
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, result: RecordResult) {
        match result.outcome {
            Outcome::Created => self.created += 1,
            Outcome::Updated => self.updated += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Failed => {
                self.failed += 1;
                self.failures.push(Failure {
                    key: result.key.clone(),
                    reason: result.reason.clone().unwrap_or_default(),
                });
            }
        }
        self.records.push(result);
    }

    /// Fold another run's results in (used when one command runs several
    /// reconcilers, e.g. one per device).
    pub fn absorb(&mut self, other: RunSummary) {
        for record in other.records {
            self.push(record);
        }
    }

    pub fn total(&self) -> usize {
        self.records.len()
    }

    pub fn outcome_of(&self, key: &str) -> Option<Outcome> {
        self.records.iter().find(|r| r.key == key).map(|r| r.outcome)
    }
}
