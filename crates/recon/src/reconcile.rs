//! Batch reconciliation: decide per record, then drive the target API.
//!
//! Per-record errors become `Failed` results and the batch continues. Only
//! an authentication failure stops the run.

use std::time::Duration;

use crate::decision::{decide, Decision};
use crate::error::{ApiError, RunAborted, SyncError};
use crate::labels::{LabelCache, SiteCache};
use crate::model::{
    Attributes, LabelRecord, NewLabel, Outcome, RecordResult, RunSummary, TargetId, TargetRecord, UnifiedRecord,
};
use crate::profile::SyncProfile;
use crate::resolver::TargetIndex;

/// Prefix of the placeholder ids a dry run gives to entities it would create.
pub const PLANNED_ID_PREFIX: &str = "planned:";

/// Everything needed to build a create or update payload for one record.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordDraft {
    /// Source composite key, for error messages.
    pub key: String,
    pub name: String,
    pub attributes: Attributes,
    /// Resolved dependency (e.g. site) identifier.
    pub dependency: Option<TargetId>,
    /// Full label set the record should carry after the call.
    pub labels: Vec<LabelRecord>,
}

impl RecordDraft {
    pub fn value(&self, field: &str) -> Option<&str> {
        self.attributes
            .get(field)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// Mutating side of a target system, as seen by the reconciler.
///
/// Implementations translate drafts into wire payloads. Identifiers passed
/// in always come from a listing or from a previous create.
pub trait TargetApi {
    fn create_record(&mut self, draft: &RecordDraft) -> Result<TargetId, ApiError>;

    fn update_record(&mut self, id: &TargetId, draft: &RecordDraft) -> Result<(), ApiError>;

    /// Replace the label set of `id` with `labels`.
    fn attach_labels(&mut self, _id: &TargetId, _labels: &[LabelRecord]) -> Result<(), ApiError> {
        Ok(())
    }

    fn create_label(&mut self, _label: &NewLabel) -> Result<LabelRecord, ApiError> {
        Err(ApiError::Unsupported("label creation"))
    }

    fn create_dependency(&mut self, _name: &str) -> Result<TargetId, ApiError> {
        Err(ApiError::Unsupported("dependency creation"))
    }
}

impl<T: TargetApi + ?Sized> TargetApi for &mut T {
    fn create_record(&mut self, draft: &RecordDraft) -> Result<TargetId, ApiError> {
        (**self).create_record(draft)
    }

    fn update_record(&mut self, id: &TargetId, draft: &RecordDraft) -> Result<(), ApiError> {
        (**self).update_record(id, draft)
    }

    fn attach_labels(&mut self, id: &TargetId, labels: &[LabelRecord]) -> Result<(), ApiError> {
        (**self).attach_labels(id, labels)
    }

    fn create_label(&mut self, label: &NewLabel) -> Result<LabelRecord, ApiError> {
        (**self).create_label(label)
    }

    fn create_dependency(&mut self, name: &str) -> Result<TargetId, ApiError> {
        (**self).create_dependency(name)
    }
}

pub struct Reconciler<A: TargetApi> {
    profile: SyncProfile,
    index: TargetIndex,
    api: A,
    labels: LabelCache,
    sites: SiteCache,
    dry_run: bool,
    pause: Duration,
}

impl<A: TargetApi> Reconciler<A> {
    pub fn new(profile: SyncProfile, index: TargetIndex, api: A) -> Self {
        Self {
            profile,
            index,
            api,
            labels: LabelCache::default(),
            sites: SiteCache::default(),
            dry_run: false,
            pause: Duration::ZERO,
        }
    }

    pub fn with_labels(mut self, labels: LabelCache) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_sites(mut self, sites: SiteCache) -> Self {
        self.sites = sites;
        self
    }

    /// Decide and report, but issue no mutating calls.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Sleep between records that issued writes.
    pub fn pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn index(&self) -> &TargetIndex {
        &self.index
    }

    pub fn labels(&self) -> &LabelCache {
        &self.labels
    }

    pub fn into_api(self) -> A {
        self.api
    }

    /// Reconcile a batch in order. Returns the summary, or [`RunAborted`]
    /// (carrying the partial summary) on an authentication failure.
    pub fn run(&mut self, records: &[UnifiedRecord]) -> Result<RunSummary, RunAborted> {
        let mut summary = RunSummary::new(&self.profile.name, self.dry_run);

        for record in records {
            let key = record.key.to_string();
            match self.process(record, &key) {
                Ok(result) => {
                    let wrote = !self.dry_run && result.outcome != Outcome::Skipped;
                    log::debug!("{}: {}", key, result.outcome);
                    summary.push(result);
                    if wrote && !self.pause.is_zero() {
                        std::thread::sleep(self.pause);
                    }
                }
                Err(SyncError::Fatal(error)) => {
                    log::error!("{}: {}", key, error);
                    return Err(RunAborted { key, error, summary });
                }
                Err(err) => {
                    log::warn!("{}: failed: {}", key, err);
                    summary.push(RecordResult::failed(key, err.to_string()));
                }
            }
        }

        log::info!(
            "{}: {} created, {} updated, {} skipped, {} failed",
            self.profile.name,
            summary.created,
            summary.updated,
            summary.skipped,
            summary.failed,
        );
        Ok(summary)
    }

    fn process(&mut self, record: &UnifiedRecord, key: &str) -> Result<RecordResult, SyncError> {
        if let Some(field) = self.profile.missing_required(record) {
            let gap = SyncError::ValidationGap { field: field.to_string() };
            log::warn!("{}: skipped: {}", key, gap);
            return Ok(RecordResult::skipped(key, None).with_reason(gap.to_string()));
        }

        match decide(record, &self.index, &self.profile) {
            Decision::Create if !self.profile.create_missing => {
                Ok(RecordResult::skipped(key, None).with_reason("not present on target"))
            }
            Decision::Create if self.dry_run => {
                self.remember_planned(record);
                Ok(RecordResult::created(key, None).with_reason("dry run"))
            }
            Decision::Create => self.create(record, key),
            Decision::Update { id, changed, .. } if self.dry_run => {
                Ok(RecordResult::updated(key, id, changed).with_reason("dry run"))
            }
            Decision::Update { id, changed, labels_changed, .. } => {
                self.update(record, key, id, changed, labels_changed)
            }
            Decision::Skip { id, .. } => Ok(RecordResult::skipped(key, Some(id))),
        }
    }

    fn create(&mut self, record: &UnifiedRecord, key: &str) -> Result<RecordResult, SyncError> {
        let dependency = match self.dependency_name(record) {
            Some(name) => Some(self.sites.resolve_or_create(&name, &mut self.api)?),
            None => None,
        };
        let labels = self.resolve_labels(record, &[])?;

        let draft = RecordDraft {
            key: key.to_string(),
            name: record.value(&self.profile.name_field).unwrap_or_default().to_string(),
            attributes: record.attributes.clone(),
            dependency,
            labels,
        };

        let id = self.api.create_record(&draft)?;
        log::info!("{}: created '{}' as {}", key, draft.name, id);

        let mut target = TargetRecord::new(id.clone(), draft.name.clone());
        target.secondary = self.secondary_values(record);
        target.attributes = draft.attributes.clone();

        // The entity exists from here on, so later rows must see it even if
        // the labels do not stick.
        if !draft.labels.is_empty() {
            if let Err(err) = self.api.attach_labels(&id, &draft.labels) {
                self.index.insert(target);
                if err.is_fatal() {
                    return Err(SyncError::Fatal(err));
                }
                let reason = format!("created as {id}, but attaching labels failed: {err}");
                return Ok(RecordResult::failed(key, reason).with_target(id));
            }
        }
        target.labels = draft.labels;
        self.index.insert(target);
        Ok(RecordResult::created(key, Some(id)))
    }

    /// Dry-run stand-in for a create, so later rows in the batch match it
    /// the way they would match the real entity.
    fn remember_planned(&mut self, record: &UnifiedRecord) {
        let name = record.value(&self.profile.name_field).unwrap_or_default().to_string();
        let mut target = TargetRecord::new(TargetId::new(format!("{PLANNED_ID_PREFIX}{}", record.key)), name);
        target.secondary = self.secondary_values(record);
        target.attributes = record.attributes.clone();
        target.labels = self
            .profile
            .desired_labels(record)
            .into_iter()
            .map(|name| LabelRecord {
                id: TargetId::new(format!("{PLANNED_ID_PREFIX}{name}")),
                name,
                color: String::new(),
            })
            .collect();
        self.index.insert(target);
    }

    fn update(
        &mut self,
        record: &UnifiedRecord,
        key: &str,
        id: TargetId,
        changed: Vec<String>,
        labels_changed: bool,
    ) -> Result<RecordResult, SyncError> {
        let Some(current) = self.index.get(&id).cloned() else {
            return Err(SyncError::NoMatch { key: key.to_string() });
        };

        let mut attributes = current.attributes.clone();
        for (name, value) in &record.attributes {
            let value = value.trim();
            if !value.is_empty() {
                attributes.insert(name.clone(), value.to_string());
            }
        }

        let dependency_changed = self
            .profile
            .dependency_field
            .as_ref()
            .is_some_and(|f| changed.contains(f));
        let dependency = match self.dependency_name(record) {
            Some(name) if dependency_changed => Some(self.sites.resolve_or_create(&name, &mut self.api)?),
            _ => None,
        };

        let labels = if labels_changed {
            self.resolve_labels(record, &current.labels)?
        } else {
            current.labels.clone()
        };

        let draft = RecordDraft {
            key: key.to_string(),
            name: current.name.clone(),
            attributes,
            dependency,
            labels,
        };

        if !changed.is_empty() {
            self.api.update_record(&id, &draft)?;
        }
        if labels_changed {
            self.api.attach_labels(&id, &draft.labels)?;
        }
        log::info!("{}: updated {} ({})", key, id, describe_changes(&changed, labels_changed));

        let mut target = current;
        target.attributes = draft.attributes;
        target.labels = draft.labels;
        self.index.insert(target);

        Ok(RecordResult::updated(key, id, changed))
    }

    /// Existing labels plus every desired label, resolving or creating the
    /// missing ones. Existing labels are never dropped.
    fn resolve_labels(&mut self, record: &UnifiedRecord, existing: &[LabelRecord]) -> Result<Vec<LabelRecord>, SyncError> {
        let mut labels = existing.to_vec();
        for name in self.profile.desired_labels(record) {
            if labels.iter().any(|l| l.name.eq_ignore_ascii_case(&name)) {
                continue;
            }
            let label = self.labels.resolve_or_create(&name, &mut self.api)?;
            labels.push(label);
        }
        Ok(labels)
    }

    fn dependency_name(&self, record: &UnifiedRecord) -> Option<String> {
        let field = self.profile.dependency_field.as_deref()?;
        record.value(field).map(str::to_string)
    }

    fn secondary_values(&self, record: &UnifiedRecord) -> Vec<String> {
        self.profile
            .secondary_field
            .as_deref()
            .and_then(|f| record.value(f))
            .map(|v| vec![v.to_string()])
            .unwrap_or_default()
    }
}

fn describe_changes(changed: &[String], labels_changed: bool) -> String {
    let mut parts: Vec<&str> = changed.iter().map(String::as_str).collect();
    if labels_changed {
        parts.push("labels");
    }
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CompositeKey, SourceRecord};

    #[derive(Default)]
    struct Fake {
        creates: Vec<RecordDraft>,
        updates: Vec<(TargetId, RecordDraft)>,
        attached: Vec<(TargetId, Vec<String>)>,
        fail_create_for: Option<&'static str>,
        fail_attach: bool,
    }

    impl TargetApi for Fake {
        fn create_record(&mut self, draft: &RecordDraft) -> Result<TargetId, ApiError> {
            if self.fail_create_for == Some(draft.name.as_str()) {
                return Err(ApiError::MaxRetriesExceeded { attempts: 6, last: "HTTP 503".into() });
            }
            self.creates.push(draft.clone());
            Ok(TargetId::new(format!("new-{}", self.creates.len())))
        }

        fn update_record(&mut self, id: &TargetId, draft: &RecordDraft) -> Result<(), ApiError> {
            self.updates.push((id.clone(), draft.clone()));
            Ok(())
        }

        fn attach_labels(&mut self, id: &TargetId, labels: &[LabelRecord]) -> Result<(), ApiError> {
            if self.fail_attach {
                return Err(ApiError::Rejected { status: 400, message: "label limit".into() });
            }
            self.attached
                .push((id.clone(), labels.iter().map(|l| l.name.clone()).collect()));
            Ok(())
        }

        fn create_label(&mut self, label: &NewLabel) -> Result<LabelRecord, ApiError> {
            Ok(LabelRecord {
                id: TargetId::new(format!("label-{}", label.name)),
                name: label.name.clone(),
                color: label.color.clone(),
            })
        }

        fn create_dependency(&mut self, name: &str) -> Result<TargetId, ApiError> {
            Ok(TargetId::new(format!("site-{name}")))
        }
    }

    fn profile() -> SyncProfile {
        SyncProfile {
            secondary_field: Some("ip_address".into()),
            required_fields: vec!["ip_address".into()],
            tracked_fields: vec!["ip_address".into(), "site".into()],
            label_fields: vec!["role".into()],
            dependency_field: Some("site".into()),
            ..SyncProfile::new("devices", "device_name")
        }
    }

    fn record(name: &str, pairs: &[(&str, &str)]) -> UnifiedRecord {
        let mut fields = vec![("device_name", name)];
        fields.extend_from_slice(pairs);
        UnifiedRecord::from_source(
            CompositeKey::single(name),
            "csv",
            &SourceRecord::from_pairs(fields),
        )
    }

    fn existing() -> TargetIndex {
        let mut t = TargetRecord::new(TargetId::new("42"), "edge-1");
        t.secondary = vec!["10.0.0.1".into()];
        t.attributes.insert("ip_address".into(), "10.0.0.1".into());
        t.attributes.insert("site".into(), "DC1".into());
        t.attributes.insert("snmp_community".into(), "keep-me".into());
        t.labels.push(LabelRecord {
            id: TargetId::new("5"),
            name: "legacy".into(),
            color: String::new(),
        });
        TargetIndex::build(vec![t], None)
    }

    #[test]
    fn creates_with_site_and_labels() {
        let mut reconciler = Reconciler::new(profile(), existing(), Fake::default());
        let records = [record("edge-2", &[("ip_address", "10.0.0.2"), ("site", "DC2"), ("role", "core")])];

        let summary = reconciler.run(&records).unwrap();
        assert_eq!(summary.created, 1);

        let api = reconciler.into_api();
        assert_eq!(api.creates.len(), 1);
        assert_eq!(api.creates[0].dependency, Some(TargetId::new("site-DC2")));
        assert_eq!(api.attached, vec![(TargetId::new("new-1"), vec!["core".to_string()])]);
    }

    #[test]
    fn update_keeps_target_data() {
        let mut reconciler = Reconciler::new(profile(), existing(), Fake::default());
        let records = [record("edge-1", &[("ip_address", "10.0.0.1"), ("site", "DC1"), ("role", "edge")])];

        let summary = reconciler.run(&records).unwrap();
        assert_eq!(summary.updated, 1);

        let api = reconciler.into_api();
        assert!(api.updates.is_empty(), "only labels differ");
        assert_eq!(
            api.attached,
            vec![(TargetId::new("42"), vec!["legacy".to_string(), "edge".to_string()])]
        );
    }

    #[test]
    fn update_overlays_source_onto_target_attributes() {
        let mut reconciler = Reconciler::new(profile(), existing(), Fake::default());
        let records = [record("edge-1", &[("ip_address", "10.0.0.9")])];

        reconciler.run(&records).unwrap();
        let api = reconciler.into_api();
        let (id, draft) = &api.updates[0];
        assert_eq!(id.as_str(), "42");
        assert_eq!(draft.value("ip_address"), Some("10.0.0.9"));
        assert_eq!(draft.value("snmp_community"), Some("keep-me"));
        assert_eq!(draft.value("site"), Some("DC1"));
        assert_eq!(draft.dependency, None);
    }

    #[test]
    fn same_name_twice_creates_once() {
        let mut reconciler = Reconciler::new(profile(), existing(), Fake::default());
        let records = [
            record("edge-7", &[("ip_address", "10.0.0.7")]),
            record("EDGE-7", &[("ip_address", "10.0.0.7")]),
        ];

        let summary = reconciler.run(&records).unwrap();
        assert_eq!((summary.created, summary.skipped), (1, 1));
    }

    #[test]
    fn dry_run_counts_a_repeated_name_once() {
        let mut reconciler = Reconciler::new(profile(), existing(), Fake::default()).dry_run(true);
        let records = [
            record("edge-7", &[("ip_address", "10.0.0.7"), ("role", "core")]),
            record("EDGE-7", &[("ip_address", "10.0.0.7"), ("role", "core")]),
        ];

        let summary = reconciler.run(&records).unwrap();
        assert_eq!((summary.created, summary.skipped), (1, 1));
        assert!(reconciler.into_api().creates.is_empty());
    }

    #[test]
    fn label_failure_after_create_names_the_new_id() {
        let api = Fake {
            fail_attach: true,
            ..Fake::default()
        };
        let mut reconciler = Reconciler::new(profile(), existing(), api);
        let records = [
            record("edge-8", &[("ip_address", "10.0.0.8"), ("role", "core")]),
            record("edge-8", &[("ip_address", "10.0.0.8")]),
        ];

        let summary = reconciler.run(&records).unwrap();
        let first = &summary.records[0];
        assert_eq!(first.outcome, Outcome::Failed);
        assert_eq!(first.target_id, Some(TargetId::new("new-1")));
        assert!(first.reason.as_deref().unwrap().starts_with("created as new-1, but attaching labels failed"));
        // The created entity is matched, not created a second time.
        assert_eq!(summary.records[1].outcome, Outcome::Skipped);
        assert_eq!(reconciler.into_api().creates.len(), 1);
    }

    #[test]
    fn validation_gap_is_skipped_with_reason() {
        let mut reconciler = Reconciler::new(profile(), existing(), Fake::default());
        let summary = reconciler.run(&[record("edge-3", &[("site", "DC1")])]).unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(
            summary.records[0].reason.as_deref(),
            Some("missing required field 'ip_address'")
        );
    }

    #[test]
    fn create_failure_is_isolated() {
        let api = Fake {
            fail_create_for: Some("bad-1"),
            ..Fake::default()
        };
        let mut reconciler = Reconciler::new(profile(), existing(), api);
        let records = [
            record("bad-1", &[("ip_address", "10.1.1.1")]),
            record("ok-1", &[("ip_address", "10.1.1.2")]),
        ];

        let summary = reconciler.run(&records).unwrap();
        assert_eq!(summary.outcome_of("bad-1"), Some(Outcome::Failed));
        assert_eq!(summary.outcome_of("ok-1"), Some(Outcome::Created));
        assert_eq!(summary.failures[0].reason, "gave up after 6 attempts: HTTP 503");
    }

    #[test]
    fn dry_run_issues_no_writes() {
        let mut reconciler = Reconciler::new(profile(), existing(), Fake::default()).dry_run(true);
        let records = [
            record("edge-1", &[("ip_address", "10.0.0.9")]),
            record("edge-5", &[("ip_address", "10.0.0.5"), ("role", "core")]),
        ];

        let summary = reconciler.run(&records).unwrap();
        assert_eq!((summary.updated, summary.created), (1, 1));
        assert!(summary.meta.dry_run);

        let api = reconciler.into_api();
        assert!(api.creates.is_empty() && api.updates.is_empty() && api.attached.is_empty());
    }

    #[test]
    fn create_missing_false_skips_unmatched() {
        let profile = SyncProfile {
            create_missing: false,
            ..profile()
        };
        let mut reconciler = Reconciler::new(profile, existing(), Fake::default());
        let summary = reconciler.run(&[record("ghost", &[("ip_address", "10.9.9.9")])]).unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.records[0].reason.as_deref(), Some("not present on target"));
    }
}
