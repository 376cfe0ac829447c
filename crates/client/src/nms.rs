//! NMS device registry: listing and enrichment PATCHes.

use invsync_recon::model::{TargetId, TargetRecord};
use invsync_recon::reconcile::RecordDraft;
use invsync_recon::ApiError;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::api::{id_value, number_or_string, Scalar, SENDING_IPS};
use crate::executor::Executor;

pub const NMS_DEVICES: &str = "nms/devices";

/// Enrichment fields: wire name, attribute, sent as a number.
pub const ENRICHMENT_FIELDS: &[(&str, &str, bool)] = &[
    ("planId", "plan_id", true),
    ("deviceSnmpIp", "snmp_ip", false),
    ("deviceSnmpCommunity", "snmp_community", false),
];

/// One listed device. Older API versions use snake_case names for the id,
/// name and site; both spellings are read.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NmsDevice {
    pub id: Option<Scalar>,
    #[serde(rename = "device_id")]
    pub legacy_id: Option<Scalar>,
    pub device_name: Option<String>,
    pub name: Option<String>,
    pub hostname: Option<String>,
    pub sending_ips: Vec<String>,
    pub device_snmp_ip: Option<String>,
    pub device_snmp_community: Option<String>,
    pub plan_id: Option<Scalar>,
    pub minimize_snmp: Option<bool>,
    pub site_id: Option<Scalar>,
    #[serde(rename = "site_id")]
    pub legacy_site_id: Option<Scalar>,
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl NmsDevice {
    pub fn id(&self) -> Option<&str> {
        present(self.id.as_ref().map(Scalar::as_str)).or_else(|| present(self.legacy_id.as_ref().map(Scalar::as_str)))
    }

    /// Name for reports: the first listed name, else the id.
    pub fn display_name(&self) -> String {
        present(self.device_name.as_deref())
            .or_else(|| present(self.name.as_deref()))
            .or_else(|| present(self.hostname.as_deref()))
            .or_else(|| self.id())
            .unwrap_or("-")
            .to_string()
    }

    fn site(&self) -> Option<&str> {
        present(self.site_id.as_ref().map(Scalar::as_str))
            .or_else(|| present(self.legacy_site_id.as_ref().map(Scalar::as_str)))
    }

    pub fn snmp_ip(&self) -> Option<&str> {
        present(self.device_snmp_ip.as_deref()).or_else(|| self.sending_ips.first().map(String::as_str))
    }

    /// Index entry keyed by id. `None` for devices the listing gives no id.
    pub fn into_target(self) -> Option<TargetRecord> {
        let id = self.id()?.to_string();
        let mut record = TargetRecord::new(TargetId::new(id.clone()), id.clone());
        let name = self.display_name();
        // Only an explicitly set SNMP address counts as enriched.
        let snmp_ip = present(self.device_snmp_ip.as_deref()).map(str::to_string);
        let site = self.site().map(str::to_string);

        let attrs = [
            ("device_id", Some(id)),
            ("device_name", Some(name)),
            (SENDING_IPS, Some(self.sending_ips.join(","))),
            ("snmp_ip", snmp_ip),
            ("snmp_community", self.device_snmp_community),
            ("plan_id", self.plan_id.map(|s| s.0)),
            ("minimize_snmp", self.minimize_snmp.map(|b| b.to_string())),
            ("site_id", site),
        ];
        for (attr, value) in attrs {
            if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
                record.attributes.insert(attr.to_string(), value);
            }
        }
        Some(record)
    }
}

/// The listing comes either bare or wrapped in `{"devices": [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum Listing {
    Bare(Vec<NmsDevice>),
    Wrapped { devices: Vec<NmsDevice> },
}

/// `{"device": {...}}` PATCH body: the listed identity fields plus the
/// enrichment values, with SNMP never minimized. Description, subtype and
/// the other device settings are not sent.
pub fn enrichment_payload(draft: &RecordDraft) -> Value {
    let mut device = Map::new();
    let name = draft.value("device_name").unwrap_or(draft.name.as_str());
    device.insert("deviceName".into(), Value::from(name));

    let sending: Vec<&str> = draft
        .value(SENDING_IPS)
        .map(|v| v.split(',').map(str::trim).filter(|ip| !ip.is_empty()).collect())
        .unwrap_or_default();
    if !sending.is_empty() {
        device.insert("sendingIps".into(), Value::from(sending));
    }
    if let Some(site) = draft.value("site_id") {
        device.insert("siteId".into(), id_value(&TargetId::new(site)));
    }
    for (wire, attr, numeric) in ENRICHMENT_FIELDS {
        let Some(value) = draft.value(attr) else {
            continue;
        };
        let value = if *numeric { number_or_string(value) } else { Value::from(value) };
        device.insert(wire.to_string(), value);
    }
    device.insert("minimizeSnmp".into(), Value::Bool(false));

    json!({ "device": device })
}

pub struct NmsClient {
    exec: Executor,
}

impl NmsClient {
    /// `exec` is rooted at the NMS API base (`.../api/v5`).
    pub fn new(exec: Executor) -> Self {
        Self { exec }
    }

    pub fn list_devices(&self) -> Result<Vec<NmsDevice>, ApiError> {
        let body = self.exec.get(NMS_DEVICES)?;
        let listing: Listing =
            serde_json::from_value(body).map_err(|e| ApiError::Decode(format!("nms devices: {e}")))?;
        Ok(match listing {
            Listing::Bare(devices) | Listing::Wrapped { devices } => devices,
        })
    }

    pub fn patch_device(&self, id: &TargetId, payload: &Value) -> Result<(), ApiError> {
        self.exec.patch(&format!("{NMS_DEVICES}/{id}"), payload).map(|_| ())
    }
}
