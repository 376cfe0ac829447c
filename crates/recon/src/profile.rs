use serde::Deserialize;

use crate::model::UnifiedRecord;

/// Describes how one entity kind is reconciled: which attribute names the
/// record, which ones are diffed, which ones reference labels or a
/// dependency.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncProfile {
    /// Shown in summaries and logs.
    pub name: String,
    /// Attribute holding the primary name used for matching.
    pub name_field: String,
    /// Attribute holding the secondary identifier (fallback matching).
    #[serde(default)]
    pub secondary_field: Option<String>,
    /// Attributes that must be non-blank for the record to be processed.
    #[serde(default)]
    pub required_fields: Vec<String>,
    /// Attributes compared against the target to decide on an update.
    #[serde(default)]
    pub tracked_fields: Vec<String>,
    /// Attributes whose values are label names.
    #[serde(default)]
    pub label_fields: Vec<String>,
    /// Attribute naming a related entity that must exist before create.
    #[serde(default)]
    pub dependency_field: Option<String>,
    /// When false, unmatched records are skipped instead of created.
    #[serde(default = "default_true")]
    pub create_missing: bool,
}

fn default_true() -> bool {
    true
}

impl SyncProfile {
    pub fn new(name: impl Into<String>, name_field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            name_field: name_field.into(),
            secondary_field: None,
            required_fields: Vec::new(),
            tracked_fields: Vec::new(),
            label_fields: Vec::new(),
            dependency_field: None,
            create_missing: true,
        }
    }

    /// First required field (the name field always is) that is blank.
    pub fn missing_required<'a>(&'a self, record: &UnifiedRecord) -> Option<&'a str> {
        std::iter::once(&self.name_field)
            .chain(self.required_fields.iter())
            .find(|f| record.value(f).is_none())
            .map(String::as_str)
    }

    /// Label names referenced by the record, de-duplicated case-insensitively,
    /// in field order.
    pub fn desired_labels(&self, record: &UnifiedRecord) -> Vec<String> {
        let mut labels: Vec<String> = Vec::new();
        for field in &self.label_fields {
            if let Some(value) = record.value(field) {
                if !labels.iter().any(|l| l.eq_ignore_ascii_case(value)) {
                    labels.push(value.to_string());
                }
            }
        }
        labels
    }

    pub fn is_dependency(&self, field: &str) -> bool {
        self.dependency_field.as_deref() == Some(field)
    }
}
