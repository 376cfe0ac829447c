//! Correlate provider circuits with the interfaces that carry them.
//!
//! An interface carries a circuit when its description contains
//! `ref=<circuit id>`. Which end of the circuit it is depends on whether the
//! interface's site appears in the circuit's site name.

use std::sync::OnceLock;

use chrono::{Datelike, Months, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::Serialize;

use crate::error::SyncError;

/// Connect type that marks a single-ended (internet) circuit.
pub const INTERNET: &str = "Internet";

/// Cost formula written on every imported circuit.
pub const COST_FORMULA: &str = "Commit (Blended)";

const DATE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// One row of the provider circuit inventory. All fields are kept as the
/// export wrote them; [`Circuit::screen`] and [`Circuit::terms`] interpret
/// them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Circuit {
    pub circuit_id: String,
    pub site: String,
    pub connect_type: String,
    /// Circuit name, used as the cost group.
    pub name: String,
    pub circuit_type: String,
    pub provider: String,
    pub price_per_mbps: String,
    pub commit_bandwidth: String,
    pub start_date: String,
    pub term_months: String,
    pub currency: String,
    /// Monthly recurring charge.
    pub mrc: String,
}

/// Contract figures derived from a circuit that passed screening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CostTerms {
    pub contract_end: NaiveDate,
    /// Day of month billing starts on.
    pub billing_start_day: u32,
    /// First number in the commit bandwidth column; `None` when there is none.
    pub commit_bandwidth: Option<String>,
    pub currency: String,
}

impl Circuit {
    pub fn is_internet(&self) -> bool {
        self.connect_type.trim().eq_ignore_ascii_case(INTERNET)
    }

    /// Circuit id with whitespace removed, as interface descriptions carry it.
    pub fn reference(&self) -> String {
        self.circuit_id.chars().filter(|c| !c.is_whitespace()).collect()
    }

    /// Description marker with whitespace removed from the id.
    pub fn marker(&self) -> String {
        format!("ref={}", self.reference())
    }

    /// Reason this row should not be correlated at all, if any.
    pub fn screen(&self) -> Option<&'static str> {
        let id = self.circuit_id.trim();
        let provider = self.provider.trim();
        if id.is_empty() {
            Some("circuit id was blank")
        } else if self.start_date.trim().is_empty() {
            Some("in service start date was blank")
        } else if self.term_months.trim().is_empty() {
            Some("term length was blank")
        } else if id.contains("DCS Internal") {
            Some("DCS internal")
        } else if id.contains("cross-connect") {
            Some("cross connect")
        } else if self.connect_type.trim().is_empty() {
            Some("type was blank")
        } else if self.site.trim().is_empty() {
            Some("site name was blank")
        } else if provider.is_empty() {
            Some("provider was blank")
        } else if self.mrc.trim().is_empty() {
            Some("MRC was blank")
        } else if is_zero(&self.mrc) {
            Some("MRC was 0")
        } else if is_zero(&self.price_per_mbps) {
            Some("price per megabit was 0")
        } else if self.price_per_mbps.trim().is_empty() {
            Some("price per megabit was blank")
        } else if provider.contains("SNOW") {
            Some("provider was SNOW")
        } else {
            None
        }
    }

    /// Contract end (start date plus term), billing day, commit bandwidth
    /// and currency code. Errors name the column that could not be read.
    pub fn terms(&self) -> Result<CostTerms, &'static str> {
        let start = parse_date(&self.start_date).ok_or("in service start date was invalid")?;
        let months = parse_months(&self.term_months).ok_or("term length was invalid")?;
        let contract_end = start
            .checked_add_months(Months::new(months))
            .ok_or("term length was invalid")?;

        Ok(CostTerms {
            contract_end,
            billing_start_day: start.day(),
            commit_bandwidth: first_number(&self.commit_bandwidth),
            currency: currency_code(&self.currency),
        })
    }
}

fn is_zero(value: &str) -> bool {
    value.trim().parse::<f64>().is_ok_and(|v| v == 0.0)
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(value, f).ok())
        .map(|dt| dt.date())
        .or_else(|| NaiveDate::parse_from_str(value, "%Y-%m-%d").ok())
}

/// Whole months; spreadsheet exports sometimes write `36.0`.
fn parse_months(value: &str) -> Option<u32> {
    let value = value.trim();
    if let Ok(n) = value.parse::<u32>() {
        return Some(n);
    }
    let f = value.parse::<f64>().ok()?;
    (f >= 0.0 && f.fract() == 0.0 && f <= f64::from(u32::MAX)).then_some(f as u32)
}

fn first_number(value: &str) -> Option<String> {
    static NUMBER: OnceLock<Regex> = OnceLock::new();
    let re = NUMBER.get_or_init(|| Regex::new(r"(\d+\.?\d*)").expect("valid bandwidth pattern"));
    re.captures(value).map(|c| c[1].to_string())
}

/// `$` and `€` become ISO codes; anything else is passed through.
pub fn currency_code(symbol: &str) -> String {
    match symbol.trim() {
        "$" => "USD".to_string(),
        "€" => "EUR".to_string(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceRow {
    pub device_id: String,
    pub interface_id: String,
    pub description: String,
    pub site: String,
}

impl InterfaceRow {
    fn label(&self) -> String {
        format!("{}/{}", self.device_id, self.interface_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    A,
    B,
    Internet,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::A => write!(f, "a"),
            Self::B => write!(f, "b"),
            Self::Internet => write!(f, "internet"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitMatch {
    pub circuit_id: String,
    pub device_id: String,
    pub interface_id: String,
    pub side: Side,
}

/// Pick the interface for `circuit`.
///
/// Internet circuits take any carrying interface. Otherwise the A side
/// (interface site contained in the circuit site) is preferred over the B
/// side. More than one candidate on the chosen side is an
/// [`SyncError::AmbiguousMatch`]; none at all is [`SyncError::NoMatch`].
pub fn correlate(circuit: &Circuit, interfaces: &[InterfaceRow]) -> Result<CircuitMatch, SyncError> {
    let marker = circuit.marker();
    let carrying = interfaces
        .iter()
        .filter(|i| !i.description.trim().is_empty() && i.description.contains(&marker));

    let mut a_side = Vec::new();
    let mut b_side = Vec::new();
    for row in carrying {
        let site = row.site.trim();
        if !circuit.is_internet() && !site.is_empty() && circuit.site.contains(site) {
            a_side.push(row);
        } else {
            b_side.push(row);
        }
    }

    let (side, candidates) = if circuit.is_internet() {
        (Side::Internet, b_side)
    } else if !a_side.is_empty() {
        (Side::A, a_side)
    } else {
        (Side::B, b_side)
    };

    match candidates.as_slice() {
        [] => Err(SyncError::NoMatch {
            key: circuit.circuit_id.clone(),
        }),
        [only] => Ok(CircuitMatch {
            circuit_id: circuit.circuit_id.clone(),
            device_id: only.device_id.clone(),
            interface_id: only.interface_id.clone(),
            side,
        }),
        many => Err(SyncError::AmbiguousMatch {
            key: circuit.circuit_id.clone(),
            candidates: many.iter().map(|r| r.label()).collect(),
        }),
    }
}
