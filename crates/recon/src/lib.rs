//! `invsync-recon` — Inventory reconciliation engine.
//!
//! Pure engine crate: receives source records and a target listing, decides
//! create/update/skip per record and drives a [`TargetApi`] implementation.
//! No HTTP or file IO.

pub mod circuits;
pub mod consolidate;
pub mod decision;
pub mod error;
pub mod labels;
pub mod model;
pub mod profile;
pub mod reconcile;
pub mod resolver;

pub use consolidate::{consolidate, parse_json_lines, Feed};
pub use decision::{decide, Decision};
pub use error::{ApiError, RunAborted, SyncError};
pub use labels::{LabelCache, Palette, SiteCache};
pub use model::{Outcome, RunSummary, TargetId, TargetRecord, UnifiedRecord};
pub use profile::SyncProfile;
pub use reconcile::{RecordDraft, Reconciler, TargetApi};
pub use resolver::TargetIndex;
