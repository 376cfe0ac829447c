//! Lookup-or-create caches for name-keyed auxiliary entities.
//!
//! Both caches are seeded from a listing fetched once per run and grow as
//! entries are created, so a name is created at most once per run.

use std::collections::HashMap;

use rand::seq::SliceRandom;

use crate::error::{ApiError, SyncError};
use crate::model::{LabelRecord, NewLabel, TargetId};
use crate::reconcile::TargetApi;

/// Colors offered to new labels when no palette is configured.
pub const DEFAULT_PALETTE: &[&str] = &["#91a3b0", "#b64605", "#374d5d", "#2c4d1d", "#3970a7", "#fae57c"];

/// Placeholder replaced by the label name in description templates.
pub const NAME_PLACEHOLDER: &str = "{name}";

// ---------------------------------------------------------------------------
// Palette
// ---------------------------------------------------------------------------

/// How a new label's color is picked. Color is cosmetic, so random choice
/// is allowed; round-robin exists for reproducible output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorMode {
    #[default]
    Random,
    RoundRobin,
}

#[derive(Debug, Clone)]
pub struct Palette {
    colors: Vec<String>,
    mode: ColorMode,
    next: usize,
}

impl Palette {
    /// An empty color list falls back to [`DEFAULT_PALETTE`].
    pub fn new(colors: Vec<String>, mode: ColorMode) -> Self {
        let colors = if colors.is_empty() {
            DEFAULT_PALETTE.iter().map(|c| c.to_string()).collect()
        } else {
            colors
        };
        Self { colors, mode, next: 0 }
    }

    pub fn pick(&mut self) -> String {
        match self.mode {
            ColorMode::Random => self
                .colors
                .choose(&mut rand::thread_rng())
                .cloned()
                .unwrap_or_default(),
            ColorMode::RoundRobin => {
                let color = self.colors[self.next % self.colors.len()].clone();
                self.next += 1;
                color
            }
        }
    }

    pub fn contains(&self, color: &str) -> bool {
        self.colors.iter().any(|c| c.eq_ignore_ascii_case(color))
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self::new(Vec::new(), ColorMode::default())
    }
}

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LabelCache {
    by_name: HashMap<String, LabelRecord>,
    palette: Palette,
    description: String,
    created: Vec<String>,
}

impl LabelCache {
    pub fn new(listing: Vec<LabelRecord>, palette: Palette, description: impl Into<String>) -> Self {
        let mut by_name = HashMap::with_capacity(listing.len());
        for label in listing {
            by_name.entry(label.name.trim().to_lowercase()).or_insert(label);
        }
        Self {
            by_name,
            palette,
            description: description.into(),
            created: Vec::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&LabelRecord> {
        self.by_name.get(&name.trim().to_lowercase())
    }

    /// Cached label for `name`, creating it on the target on first miss.
    ///
    /// Auth failures come back as [`SyncError::Fatal`]; anything else is a
    /// [`SyncError::DependencyFailure`] for the owning record.
    pub fn resolve_or_create<A>(&mut self, name: &str, api: &mut A) -> Result<LabelRecord, SyncError>
    where
        A: TargetApi + ?Sized,
    {
        let name = name.trim();
        if let Some(label) = self.get(name) {
            return Ok(label.clone());
        }

        let new = NewLabel {
            name: name.to_string(),
            color: self.palette.pick(),
            description: self.description.replace(NAME_PLACEHOLDER, name),
        };
        let label = api.create_label(&new).map_err(|e| dependency_error("label", name, e))?;
        log::info!("created label '{}' (id {}, color {})", label.name, label.id, new.color);

        self.created.push(name.to_string());
        self.by_name.insert(name.to_lowercase(), label.clone());
        Ok(label)
    }

    /// Names created during this run, in creation order.
    pub fn created(&self) -> &[String] {
        &self.created
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl Default for LabelCache {
    fn default() -> Self {
        Self::new(Vec::new(), Palette::default(), NAME_PLACEHOLDER)
    }
}

// ---------------------------------------------------------------------------
// Sites (or any other dependency an entity must point at)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct SiteCache {
    by_name: HashMap<String, TargetId>,
}

impl SiteCache {
    pub fn new<I>(listing: I) -> Self
    where
        I: IntoIterator<Item = (String, TargetId)>,
    {
        let mut by_name = HashMap::new();
        for (name, id) in listing {
            by_name.entry(name.trim().to_lowercase()).or_insert(id);
        }
        Self { by_name }
    }

    pub fn get(&self, name: &str) -> Option<&TargetId> {
        self.by_name.get(&name.trim().to_lowercase())
    }

    pub fn resolve_or_create<A>(&mut self, name: &str, api: &mut A) -> Result<TargetId, SyncError>
    where
        A: TargetApi + ?Sized,
    {
        let name = name.trim();
        if let Some(id) = self.get(name) {
            return Ok(id.clone());
        }

        let id = api
            .create_dependency(name)
            .map_err(|e| dependency_error("site", name, e))?;
        log::info!("created site '{}' (id {})", name, id);

        self.by_name.insert(name.to_lowercase(), id.clone());
        Ok(id)
    }
}

fn dependency_error(kind: &'static str, name: &str, err: ApiError) -> SyncError {
    if err.is_fatal() {
        return SyncError::Fatal(err);
    }
    SyncError::DependencyFailure {
        kind,
        name: name.to_string(),
        reason: err.to_string(),
    }
}
