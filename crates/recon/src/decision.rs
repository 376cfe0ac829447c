use serde::Serialize;

use crate::model::{TargetId, TargetRecord, UnifiedRecord};
use crate::profile::SyncProfile;
use crate::resolver::{MatchRule, TargetIndex};

/// What a record needs, given the current target snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Decision {
    /// No target record matched.
    Create,
    /// Matched, and at least one tracked attribute or label differs.
    Update {
        id: TargetId,
        rule: MatchRule,
        /// Tracked attributes whose source value differs from the target.
        changed: Vec<String>,
        /// Some desired label is not attached yet.
        labels_changed: bool,
    },
    /// Matched and already in agreement.
    Skip { id: TargetId, rule: MatchRule },
}

impl Decision {
    pub fn target_id(&self) -> Option<&TargetId> {
        match self {
            Self::Create => None,
            Self::Update { id, .. } | Self::Skip { id, .. } => Some(id),
        }
    }
}

/// Decide create/update/skip for one record. Pure: no I/O, no mutation.
pub fn decide(record: &UnifiedRecord, index: &TargetIndex, profile: &SyncProfile) -> Decision {
    let name = record.value(&profile.name_field).unwrap_or("");
    let secondary = profile
        .secondary_field
        .as_deref()
        .and_then(|f| record.value(f));

    let Some(hit) = index.resolve(name, secondary) else {
        return Decision::Create;
    };

    let changed = changed_fields(record, hit.record, profile);
    let labels_changed = profile
        .desired_labels(record)
        .iter()
        .any(|l| !hit.record.has_label(l));

    if changed.is_empty() && !labels_changed {
        Decision::Skip {
            id: hit.record.id.clone(),
            rule: hit.rule,
        }
    } else {
        Decision::Update {
            id: hit.record.id.clone(),
            rule: hit.rule,
            changed,
            labels_changed,
        }
    }
}

/// Tracked fields where the source has a value and the target disagrees.
/// A blank source value never counts as a difference: the target keeps
/// whatever it already has.
pub fn changed_fields(record: &UnifiedRecord, target: &TargetRecord, profile: &SyncProfile) -> Vec<String> {
    profile
        .tracked_fields
        .iter()
        .filter(|field| {
            let Some(wanted) = record.value(field) else {
                return false;
            };
            let current = target.attributes.get(field.as_str()).map(|v| v.trim());
            match current {
                None => true,
                Some(current) if profile.is_dependency(field) => !current.eq_ignore_ascii_case(wanted),
                Some(current) => current != wanted,
            }
        })
        .cloned()
        .collect()
}
