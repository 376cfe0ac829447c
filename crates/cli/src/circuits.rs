//! `invsync circuits` — correlate circuits with interface descriptions and
//! write a connectivity-cost import.

use std::io::Write;
use std::path::Path;

use invsync_recon::circuits::{correlate, Circuit, InterfaceRow, COST_FORMULA};
use invsync_recon::SyncError;
use serde::Serialize;

use crate::exit_codes::EXIT_OUTPUT;
use crate::sources::{read_circuits, read_interface_rows};
use crate::CliError;

/// One output line. Cost columns are only filled for matched circuits;
/// every other row keeps the ids and carries a note.
#[derive(Debug, Default, Serialize, PartialEq)]
struct Row {
    /// Circuit id as descriptions carry it (whitespace removed).
    circuit_id: String,
    device_id: String,
    interface_id: String,
    side: String,
    connect_type: String,
    provider: String,
    cost_group: String,
    cost_formula: String,
    contract_end: String,
    commit_bandwidth: String,
    mrc: String,
    price_per_mbps: String,
    currency: String,
    /// Circuit id as exported.
    contract_id: String,
    billing_start_day: String,
    note: String,
}

#[derive(Debug, Default, PartialEq)]
struct Tally {
    matched: usize,
    screened: usize,
    unmatched: usize,
    ambiguous: usize,
}

pub fn cmd_circuits(circuits: &Path, interfaces: &Path, output: Option<&Path>) -> Result<(), CliError> {
    let circuits = read_circuits(circuits)?;
    let interfaces = read_interface_rows(interfaces)?;

    let (rows, tally) = correlate_all(&circuits, &interfaces);

    let sink: Box<dyn Write> = match output {
        Some(path) => Box::new(
            std::fs::File::create(path)
                .map_err(|e| CliError::new(EXIT_OUTPUT, format!("cannot create {}: {e}", path.display())))?,
        ),
        None => Box::new(std::io::stdout()),
    };
    let mut writer = csv::Writer::from_writer(sink);
    for row in &rows {
        writer.serialize(row).map_err(write_error)?;
    }
    writer.flush().map_err(write_error)?;

    if let Some(path) = output {
        eprintln!("wrote {}", path.display());
    }
    eprintln!(
        "circuits: {} matched, {} ambiguous, {} unmatched, {} skipped",
        tally.matched, tally.ambiguous, tally.unmatched, tally.screened,
    );
    Ok(())
}

fn write_error(e: impl std::fmt::Display) -> CliError {
    CliError::new(EXIT_OUTPUT, format!("cannot write CSV: {e}"))
}

fn correlate_all(circuits: &[Circuit], interfaces: &[InterfaceRow]) -> (Vec<Row>, Tally) {
    let mut rows = Vec::with_capacity(circuits.len());
    let mut tally = Tally::default();

    for circuit in circuits {
        let mut row = Row {
            circuit_id: circuit.reference(),
            contract_id: circuit.circuit_id.clone(),
            ..Row::default()
        };

        let screened = circuit.screen().or_else(|| circuit.terms().err());
        if let Some(reason) = screened {
            log::debug!("circuit '{}': skipped ({})", circuit.circuit_id, reason);
            tally.screened += 1;
            row.note = reason.to_string();
            rows.push(row);
            continue;
        }

        match correlate(circuit, interfaces) {
            Ok(found) => {
                tally.matched += 1;
                row.device_id = found.device_id;
                row.interface_id = found.interface_id;
                row.side = found.side.to_string();
                fill_costs(&mut row, circuit);
            }
            Err(err @ SyncError::AmbiguousMatch { .. }) => {
                log::warn!("{}", err);
                tally.ambiguous += 1;
                row.note = err.to_string();
            }
            Err(err) => {
                log::info!("{}", err);
                tally.unmatched += 1;
                row.note = "no interface found".to_string();
            }
        }
        rows.push(row);
    }

    (rows, tally)
}

fn fill_costs(row: &mut Row, circuit: &Circuit) {
    // Screening already rejected unreadable dates and terms.
    let Ok(terms) = circuit.terms() else {
        return;
    };
    row.connect_type = circuit.circuit_type.clone();
    row.provider = circuit.provider.clone();
    row.cost_group = circuit.name.clone();
    row.cost_formula = COST_FORMULA.to_string();
    row.contract_end = terms.contract_end.format("%Y-%m-%d").to_string();
    row.mrc = circuit.mrc.trim().to_string();
    row.price_per_mbps = circuit.price_per_mbps.trim().to_string();
    row.currency = terms.currency;
    row.billing_start_day = terms.billing_start_day.to_string();
    match terms.commit_bandwidth {
        Some(bandwidth) => {
            row.commit_bandwidth = bandwidth;
            row.note = "circuit added".to_string();
        }
        None => {
            row.commit_bandwidth = "0".to_string();
            row.note = "commit bandwidth incorrect".to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn circuit(id: &str, site: &str, kind: &str) -> Circuit {
        Circuit {
            circuit_id: id.into(),
            site: site.into(),
            connect_type: kind.into(),
            name: "AMS wave".into(),
            circuit_type: "10G Wave".into(),
            provider: "Zayo".into(),
            price_per_mbps: "0.45".into(),
            commit_bandwidth: "10 Gbps".into(),
            start_date: "2023-03-15 00:00:00".into(),
            term_months: "12".into(),
            currency: "€".into(),
            mrc: "4500".into(),
        }
    }

    fn iface(device: &str, interface: &str, description: &str, site: &str) -> InterfaceRow {
        InterfaceRow {
            device_id: device.into(),
            interface_id: interface.into(),
            description: description.into(),
            site: site.into(),
        }
    }

    #[test]
    fn every_circuit_gets_a_row() {
        let circuits = vec![
            circuit("CKT-1", "AMS1 Equinix", "Transport"),
            circuit("", "AMS1", "Transport"),
            circuit("CKT-2", "FRA1", "Transport"),
            circuit("CKT-3", "LON1", "Internet"),
            Circuit {
                start_date: "15/03/2023".into(),
                ..circuit("CKT-4", "AMS1", "Transport")
            },
        ];
        let interfaces = vec![
            iface("10", "1", "uplink ref=CKT-1", "AMS1"),
            iface("11", "4", "peer ref=CKT-3", "LON1"),
            iface("12", "9", "peer ref=CKT-3 backup", "LON1"),
        ];

        let (rows, tally) = correlate_all(&circuits, &interfaces);

        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0].side, "a");
        assert_eq!(rows[0].device_id, "10");
        assert_eq!(rows[1].note, "circuit id was blank");
        assert_eq!(rows[2].note, "no interface found");
        assert!(rows[3].note.starts_with("ambiguous match for 'CKT-3'"));
        assert_eq!(rows[4].note, "in service start date was invalid");
        assert_eq!(
            tally,
            Tally {
                matched: 1,
                screened: 2,
                unmatched: 1,
                ambiguous: 1
            }
        );
    }

    #[test]
    fn matched_rows_carry_cost_columns() {
        let circuits = vec![circuit("CKT 1", "AMS1 Equinix", "Transport")];
        let interfaces = vec![iface("10", "1", "uplink ref=CKT1", "AMS1")];

        let (rows, _) = correlate_all(&circuits, &interfaces);
        let row = &rows[0];

        assert_eq!(row.circuit_id, "CKT1");
        assert_eq!(row.contract_id, "CKT 1");
        assert_eq!(row.connect_type, "10G Wave");
        assert_eq!(row.cost_group, "AMS wave");
        assert_eq!(row.cost_formula, "Commit (Blended)");
        assert_eq!(row.contract_end, "2024-03-15");
        assert_eq!(row.billing_start_day, "15");
        assert_eq!(row.commit_bandwidth, "10");
        assert_eq!(row.currency, "EUR");
        assert_eq!(row.mrc, "4500");
        assert_eq!(row.note, "circuit added");
    }

    #[test]
    fn unreadable_bandwidth_is_zero_with_a_note() {
        let circuits = vec![Circuit {
            commit_bandwidth: "TBD".into(),
            ..circuit("CKT-1", "AMS1", "Transport")
        }];
        let interfaces = vec![iface("10", "1", "ref=CKT-1", "AMS1")];

        let (rows, _) = correlate_all(&circuits, &interfaces);
        assert_eq!(rows[0].commit_bandwidth, "0");
        assert_eq!(rows[0].note, "commit bandwidth incorrect");
    }
}
