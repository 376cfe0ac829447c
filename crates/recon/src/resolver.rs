//! Map source identifiers onto target records.
//!
//! The index is built once from a full listing and answered from hash maps.
//! Matching is exact only: no prefixes, no substrings.

use std::collections::HashMap;

use serde::Serialize;

use crate::model::{TargetId, TargetRecord};

/// Which rule produced a match, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    /// Case-insensitive name.
    Name,
    /// Case-insensitive name with the domain suffix appended.
    NameWithSuffix,
    /// Exact secondary identifier (e.g. management address).
    Secondary,
}

#[derive(Debug, Clone, Copy)]
pub struct Match<'a> {
    pub record: &'a TargetRecord,
    pub rule: MatchRule,
}

#[derive(Debug, Clone, Default)]
pub struct TargetIndex {
    records: Vec<TargetRecord>,
    by_name: HashMap<String, usize>,
    by_secondary: HashMap<String, usize>,
    by_id: HashMap<TargetId, usize>,
    domain_suffix: Option<String>,
}

impl TargetIndex {
    /// Index a listing. On duplicate names or secondary values the first
    /// record in listing order wins.
    pub fn build(records: Vec<TargetRecord>, domain_suffix: Option<&str>) -> Self {
        let domain_suffix = domain_suffix
            .map(|s| s.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|s| !s.is_empty());

        let mut index = Self {
            records: Vec::with_capacity(records.len()),
            domain_suffix,
            ..Self::default()
        };
        for record in records {
            index.insert(record);
        }
        index
    }

    /// Add (or replace, by id) a record. Used after a create or update so
    /// later rows in the same run see the new state.
    pub fn insert(&mut self, record: TargetRecord) {
        if let Some(&slot) = self.by_id.get(&record.id) {
            self.records[slot] = record;
            self.reindex(slot);
            return;
        }
        let slot = self.records.len();
        self.by_id.insert(record.id.clone(), slot);
        self.records.push(record);
        self.reindex(slot);
    }

    fn reindex(&mut self, slot: usize) {
        let record = &self.records[slot];
        let name = normalize(&record.name);
        if !name.is_empty() {
            if let Some(&existing) = self.by_name.get(&name) {
                if existing != slot {
                    log::warn!(
                        "duplicate target name '{}' (ids {} and {}); keeping the first",
                        record.name,
                        self.records[existing].id,
                        record.id,
                    );
                }
            } else {
                self.by_name.insert(name, slot);
            }
        }
        for value in &record.secondary {
            let value = value.trim();
            if !value.is_empty() {
                self.by_secondary.entry(value.to_string()).or_insert(slot);
            }
        }
    }

    /// Resolve a source identity. First hit wins:
    /// name, then name + domain suffix, then secondary identifier.
    pub fn resolve(&self, name: &str, secondary: Option<&str>) -> Option<Match<'_>> {
        let name = normalize(name);

        if !name.is_empty() {
            if let Some(&slot) = self.by_name.get(&name) {
                return Some(self.hit(slot, MatchRule::Name));
            }
            if let Some(ref suffix) = self.domain_suffix {
                let qualified = format!("{name}.{suffix}");
                if let Some(&slot) = self.by_name.get(&qualified) {
                    return Some(self.hit(slot, MatchRule::NameWithSuffix));
                }
            }
        }

        let secondary = secondary.map(str::trim).filter(|s| !s.is_empty())?;
        self.by_secondary
            .get(secondary)
            .map(|&slot| self.hit(slot, MatchRule::Secondary))
    }

    /// Identifier-only form of [`resolve`](Self::resolve).
    pub fn resolve_id(&self, name: &str, secondary: Option<&str>) -> Option<&TargetId> {
        self.resolve(name, secondary).map(|m| &m.record.id)
    }

    pub fn get(&self, id: &TargetId) -> Option<&TargetRecord> {
        self.by_id.get(id).map(|&slot| &self.records[slot])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[TargetRecord] {
        &self.records
    }

    fn hit(&self, slot: usize, rule: MatchRule) -> Match<'_> {
        Match {
            record: &self.records[slot],
            rule,
        }
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(id: &str, name: &str, secondary: &[&str]) -> TargetRecord {
        let mut record = TargetRecord::new(TargetId::new(id), name);
        record.secondary = secondary.iter().map(|s| s.to_string()).collect();
        record
    }

    fn index() -> TargetIndex {
        TargetIndex::build(
            vec![
                target("100", "Edge-1", &["10.0.0.1"]),
                target("200", "core-rtr1.example.com", &["10.0.0.2"]),
                target("300", "10.0.0.3", &[]),
                target("400", "lab-sw", &["10.0.0.4"]),
            ],
            Some(".Example.com"),
        )
    }

    #[test]
    fn exact_name_is_case_insensitive() {
        let idx = index();
        let m = idx.resolve("edge-1", None).unwrap();
        assert_eq!(m.record.id.as_str(), "100");
        assert_eq!(m.rule, MatchRule::Name);
    }

    #[test]
    fn suffix_fallback_matches_fqdn() {
        let idx = index();
        let m = idx.resolve("core-rtr1", None).unwrap();
        assert_eq!(m.record.id.as_str(), "200");
        assert_eq!(m.rule, MatchRule::NameWithSuffix);
    }

    #[test]
    fn secondary_used_only_when_name_misses() {
        let idx = index();
        let m = idx.resolve("renamed-box", Some("10.0.0.4")).unwrap();
        assert_eq!(m.record.id.as_str(), "400");
        assert_eq!(m.rule, MatchRule::Secondary);

        // Name wins even when the secondary points elsewhere.
        let m = idx.resolve("edge-1", Some("10.0.0.4")).unwrap();
        assert_eq!(m.record.id.as_str(), "100");
    }

    #[test]
    fn no_partial_matching() {
        let idx = index();
        assert!(idx.resolve("edge", None).is_none());
        assert!(idx.resolve("core-rtr", None).is_none());
        assert!(idx.resolve("", Some("10.0.0")).is_none());
    }

    #[test]
    fn name_that_is_an_address_matches_by_name() {
        let idx = index();
        assert_eq!(idx.resolve_id("10.0.0.3", None).map(|id| id.as_str()), Some("300"));
    }

    #[test]
    fn first_duplicate_wins() {
        let idx = TargetIndex::build(
            vec![target("1", "dup", &[]), target("2", "DUP", &[])],
            None,
        );
        assert_eq!(idx.resolve_id("dup", None).map(|id| id.as_str()), Some("1"));
        assert_eq!(idx.len(), 2);
    }

    #[test]
    fn insert_makes_new_record_resolvable() {
        let mut idx = TargetIndex::build(vec![], None);
        assert!(idx.resolve("fresh", None).is_none());
        idx.insert(target("9", "fresh", &["192.0.2.9"]));
        assert_eq!(idx.resolve_id("FRESH", None).map(|id| id.as_str()), Some("9"));
        assert_eq!(idx.resolve_id("x", Some("192.0.2.9")).map(|id| id.as_str()), Some("9"));
    }
}
