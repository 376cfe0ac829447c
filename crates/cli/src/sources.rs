//! Source file adapters: CSV exports and line-delimited JSON tag exports.
//!
//! These only turn files into [`SourceRecord`]s; every engine rule lives in
//! `invsync-recon`.

use std::path::Path;

use invsync_recon::circuits::{Circuit, InterfaceRow};
use invsync_recon::model::SourceRecord;
use invsync_recon::parse_json_lines;

use crate::exit_codes::EXIT_MISSING_INPUT;
use crate::CliError;

fn read_text(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path)
        .map_err(|e| CliError::new(EXIT_MISSING_INPUT, format!("cannot read {}: {e}", path.display())))
}

/// Read a CSV with a header row. Header names are trimmed and lowercased.
/// Every name in `required` must be a column; rows that fail to parse are
/// skipped with a warning.
pub fn read_csv(path: &Path, required: &[&str]) -> Result<Vec<SourceRecord>, CliError> {
    let text = read_text(path)?;
    parse_csv(&text, required).map_err(|e| {
        CliError::new(EXIT_MISSING_INPUT, format!("{}: {}", path.display(), e.message))
            .with_hint(format!("required columns: {}", required.join(", ")))
    })
}

fn parse_csv(text: &str, required: &[&str]) -> Result<Vec<SourceRecord>, CliError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| CliError::new(EXIT_MISSING_INPUT, e.to_string()))?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_ascii_lowercase())
        .collect();

    if let Some(missing) = required.iter().find(|r| !headers.iter().any(|h| h == *r)) {
        return Err(CliError::new(EXIT_MISSING_INPUT, format!("missing column '{missing}'")));
    }

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                log::warn!("row {}: skipping unreadable row ({})", i + 2, e);
                continue;
            }
        };
        rows.push(SourceRecord::from_pairs(
            headers.iter().cloned().zip(record.iter().map(str::to_string)),
        ));
    }
    Ok(rows)
}

/// Read a line-delimited JSON export. Malformed lines are logged and
/// skipped; a missing file is an error.
pub fn read_json_lines(path: &Path) -> Result<Vec<SourceRecord>, CliError> {
    let text = read_text(path)?;
    let parsed = parse_json_lines(&text);
    if !parsed.skipped.is_empty() {
        log::warn!(
            "{}: skipped {} malformed line(s)",
            path.display(),
            parsed.skipped.len()
        );
    }
    Ok(parsed.records)
}

/// Columns a circuit export must have. `circuit_name`, `circuit_type` and
/// `currency` are read when present.
pub const CIRCUIT_COLUMNS: &[&str] = &[
    "circuit_id",
    "site",
    "connect_type",
    "provider",
    "mrc",
    "price_per_mbps",
    "commit_bandwidth",
    "start_date",
    "term",
];

pub fn read_circuits(path: &Path) -> Result<Vec<Circuit>, CliError> {
    let rows = read_csv(path, CIRCUIT_COLUMNS)?;
    Ok(rows
        .iter()
        .map(|r| Circuit {
            circuit_id: field(r, "circuit_id"),
            site: field(r, "site"),
            connect_type: field(r, "connect_type"),
            name: field(r, "circuit_name"),
            circuit_type: field(r, "circuit_type"),
            provider: field(r, "provider"),
            price_per_mbps: field(r, "price_per_mbps"),
            commit_bandwidth: field(r, "commit_bandwidth"),
            start_date: field(r, "start_date"),
            term_months: field(r, "term"),
            currency: field(r, "currency"),
            mrc: field(r, "mrc"),
        })
        .collect())
}

pub fn read_interface_rows(path: &Path) -> Result<Vec<InterfaceRow>, CliError> {
    let rows = read_csv(path, &["device_id", "interface_id", "description", "site"])?;
    Ok(rows
        .iter()
        .map(|r| InterfaceRow {
            device_id: field(r, "device_id"),
            interface_id: field(r, "interface_id"),
            description: field(r, "description"),
            site: field(r, "site"),
        })
        .collect())
}

fn field(record: &SourceRecord, name: &str) -> String {
    record.value(name).unwrap_or_default().to_string()
}
