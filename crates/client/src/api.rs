//! Typed wire contract for the target inventory API.
//!
//! Responses are decoded here into explicit shapes per entity kind, then
//! converted to engine [`TargetRecord`]s with attribute names that line up
//! with the source feeds (`ip_address`, `site`, `ifindex`, `ifDescr`, …).

use std::collections::HashMap;

use invsync_recon::model::{LabelRecord, NewLabel, TargetId, TargetRecord};
use invsync_recon::ApiError;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::executor::Executor;

// ── Endpoints ───────────────────────────────────────────────────────

pub const DEVICES: &str = "device/v202308beta1/device";
pub const SITES: &str = "site/v202211/sites";
pub const LABELS: &str = "label/v202210/labels";
pub const INTERFACES: &str = "interface/v202108alpha1/interfaces";

/// Site type used when a missing site is created on the fly.
pub const DEFAULT_SITE_TYPE: &str = "SITE_TYPE_OTHER";

/// Attribute holding every listed sending address, comma separated.
pub const SENDING_IPS: &str = "sending_ips";

/// Listed device fields written back on update, with the attribute each
/// one is read from. Numeric fields go out as numbers.
pub const DEVICE_FIELDS: &[(&str, &str, bool)] = &[
    ("deviceSubtype", "subtype", false),
    ("deviceDescription", "description", false),
    ("deviceSampleRate", "sample_rate", true),
    ("deviceBgpType", "bgp_type", false),
    ("deviceSnmpCommunity", "snmp_community", false),
    ("planId", "plan_id", true),
];

// ── Lenient scalars ─────────────────────────────────────────────────

/// Identifier or numeric field that the API may send as a string or a number.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "RawScalar")]
pub struct Scalar(pub String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawScalar {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl From<RawScalar> for Scalar {
    fn from(raw: RawScalar) -> Self {
        Scalar(match raw {
            RawScalar::Int(n) => n.to_string(),
            RawScalar::Float(f) => f.to_string(),
            RawScalar::Bool(b) => b.to_string(),
            RawScalar::Str(s) => s,
        })
    }
}

impl Scalar {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn non_blank(&self) -> Option<&str> {
        let s = self.0.trim();
        (!s.is_empty()).then_some(s)
    }
}

impl From<&Scalar> for TargetId {
    fn from(s: &Scalar) -> Self {
        TargetId::new(s.0.clone())
    }
}

/// Numeric-looking ids go on the wire as numbers.
pub fn id_value(id: &TargetId) -> Value {
    number_or_string(id.as_str())
}

pub(crate) fn number_or_string(s: &str) -> Value {
    match s.trim().parse::<i64>() {
        Ok(n) => Value::from(n),
        Err(_) => Value::from(s.trim()),
    }
}

// ── Wire shapes ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Label {
    pub id: Scalar,
    pub name: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub description: String,
}

impl Label {
    pub fn into_record(self) -> LabelRecord {
        LabelRecord {
            id: TargetId::from(&self.id),
            name: self.name,
            color: self.color,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    pub id: Scalar,
    #[serde(alias = "siteName")]
    pub title: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteRef {
    #[serde(default)]
    pub id: Option<Scalar>,
    #[serde(default, alias = "siteName")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: Scalar,
    pub device_name: String,
    #[serde(default)]
    pub sending_ips: Vec<String>,
    #[serde(default)]
    pub device_snmp_ip: Option<String>,
    #[serde(default)]
    pub site_id: Option<Scalar>,
    #[serde(default)]
    pub site: Option<SiteRef>,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub device_subtype: Option<String>,
    #[serde(default)]
    pub device_description: Option<String>,
    #[serde(default)]
    pub device_sample_rate: Option<Scalar>,
    #[serde(default)]
    pub device_bgp_type: Option<String>,
    #[serde(default)]
    pub device_snmp_community: Option<String>,
    #[serde(default)]
    pub plan_id: Option<Scalar>,
    #[serde(default)]
    pub minimize_snmp: Option<bool>,
}

impl Device {
    pub fn site_id(&self) -> Option<&str> {
        self.site_id
            .as_ref()
            .and_then(Scalar::non_blank)
            .or_else(|| self.site.as_ref()?.id.as_ref()?.non_blank())
    }

    /// `site_names` maps site id → title, from the site listing, for
    /// devices that only carry an id.
    pub fn into_target(self, site_names: &HashMap<String, String>) -> TargetRecord {
        let site_id = self.site_id().map(str::to_string);
        let site_name = self
            .site
            .as_ref()
            .and_then(|s| s.title.clone())
            .or_else(|| site_id.as_ref().and_then(|id| site_names.get(id).cloned()));

        let mut record = TargetRecord::new(TargetId::from(&self.id), self.device_name);
        let snmp_ip = self.device_snmp_ip.filter(|ip| !ip.trim().is_empty());
        let primary_ip = snmp_ip.clone().or_else(|| self.sending_ips.first().cloned());

        if !self.sending_ips.is_empty() {
            record
                .attributes
                .insert(SENDING_IPS.into(), self.sending_ips.join(","));
        }
        let listed = [
            ("description", self.device_description),
            ("sample_rate", self.device_sample_rate.map(|s| s.0)),
            ("bgp_type", self.device_bgp_type),
            ("snmp_community", self.device_snmp_community),
            ("plan_id", self.plan_id.map(|s| s.0)),
            ("minimize_snmp", self.minimize_snmp.map(|b| b.to_string())),
        ];
        for (attr, value) in listed {
            if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
                record.attributes.insert(attr.into(), value);
            }
        }

        record.secondary = self.sending_ips;
        if let Some(ip) = &snmp_ip {
            if !record.secondary.contains(ip) {
                record.secondary.push(ip.clone());
            }
        }
        if let Some(ip) = primary_ip {
            record.attributes.insert("ip_address".into(), ip);
        }
        if let Some(name) = site_name {
            record.attributes.insert("site".into(), name);
        }
        if let Some(id) = site_id {
            record.attributes.insert("site_id".into(), id);
        }
        if let Some(subtype) = self.device_subtype {
            record.attributes.insert("subtype".into(), subtype);
        }
        record.labels = self.labels.into_iter().map(Label::into_record).collect();
        record
    }
}

/// Interface wire fields and the feed attribute each maps to.
pub const INTERFACE_FIELDS: &[(&str, &str)] = &[
    ("snmpId", "ifindex"),
    ("snmpSpeed", "speed"),
    ("snmpType", "type"),
    ("snmpAlias", "description"),
    ("interfaceDescription", "ifDescr"),
    ("interfaceIp", "ip"),
    ("interfaceIpNetmask", "netmask"),
];

/// Wire fields sent as numbers when they parse as one.
const NUMERIC_INTERFACE_FIELDS: &[&str] = &["snmpSpeed", "snmpType"];

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interface {
    pub id: Scalar,
    #[serde(default)]
    pub device_id: Scalar,
    #[serde(flatten)]
    pub fields: HashMap<String, Value>,
}

impl Interface {
    pub fn into_target(self) -> TargetRecord {
        let mut attributes = invsync_recon::model::Attributes::new();
        for (wire, attr) in INTERFACE_FIELDS {
            if let Some(value) = self.fields.get(*wire).and_then(scalar_text) {
                attributes.insert(attr.to_string(), value);
            }
        }
        let name = attributes.get("ifDescr").cloned().unwrap_or_default();
        let mut record = TargetRecord::new(TargetId::from(&self.id), name);
        record.secondary = attributes.get("ifindex").cloned().into_iter().collect();
        record.attributes = attributes;
        record
    }
}

fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Build the `{"interface": {...}}` body from feed attributes.
pub fn interface_payload(
    device_id: &TargetId,
    attributes: &invsync_recon::model::Attributes,
    id: Option<&TargetId>,
) -> Value {
    let mut body = serde_json::Map::new();
    if let Some(id) = id {
        body.insert("id".into(), id_value(id));
    }
    body.insert("deviceId".into(), id_value(device_id));
    for (wire, attr) in INTERFACE_FIELDS {
        let Some(value) = attributes.get(*attr).map(|v| v.trim()).filter(|v| !v.is_empty()) else {
            continue;
        };
        let value = if NUMERIC_INTERFACE_FIELDS.contains(wire) {
            number_or_string(value)
        } else {
            Value::from(value)
        };
        body.insert(wire.to_string(), value);
    }
    json!({ "interface": body })
}

#[derive(Deserialize)]
struct DeviceListing {
    #[serde(default)]
    devices: Vec<Device>,
}

#[derive(Deserialize)]
struct SiteListing {
    #[serde(default)]
    sites: Vec<Site>,
}

#[derive(Deserialize)]
struct LabelListing {
    #[serde(default)]
    labels: Vec<Label>,
}

#[derive(Deserialize)]
struct InterfaceListing {
    #[serde(default)]
    interfaces: Vec<Interface>,
}

// ── Client ──────────────────────────────────────────────────────────

/// Typed calls against the target API. Listings are full reads; the
/// caller builds indexes from them once per run.
pub struct TargetClient {
    exec: Executor,
}

impl TargetClient {
    pub fn new(exec: Executor) -> Self {
        Self { exec }
    }

    pub fn list_devices(&self) -> Result<Vec<Device>, ApiError> {
        let body = self.exec.get(&format!("{DEVICES}?query.noCustomColumns=true"))?;
        Ok(decode::<DeviceListing>(body, "device listing")?.devices)
    }

    /// Single-device lookup; `Ok(None)` when the target answers 404.
    pub fn lookup_device(&self, id_or_name: &str) -> Result<Option<Device>, ApiError> {
        let Some(body) = self.exec.lookup(&format!("{DEVICES}/{}", id_or_name.trim()))? else {
            return Ok(None);
        };
        let inner = body.get("device").cloned().unwrap_or(body);
        decode(inner, "device").map(Some)
    }

    pub fn create_device(&self, payload: &Value) -> Result<TargetId, ApiError> {
        let body = self.exec.post(DEVICES, payload)?;
        created_id(&body, "device")
    }

    pub fn update_device(&self, id: &TargetId, payload: &Value) -> Result<(), ApiError> {
        self.exec.put(&format!("{DEVICES}/{id}"), payload).map(drop)
    }

    /// Replace the device's label set.
    pub fn set_device_labels(&self, id: &TargetId, labels: &[TargetId]) -> Result<(), ApiError> {
        let labels: Vec<Value> = labels.iter().map(|l| json!({ "id": id_value(l) })).collect();
        let payload = json!({ "id": id_value(id), "labels": labels });
        self.exec.put(&format!("{DEVICES}/{id}/labels"), &payload).map(drop)
    }

    pub fn list_sites(&self) -> Result<Vec<Site>, ApiError> {
        let body = self.exec.get(SITES)?;
        Ok(decode::<SiteListing>(body, "site listing")?.sites)
    }

    pub fn create_site(&self, title: &str, site_type: &str) -> Result<Site, ApiError> {
        let payload = json!({ "site": { "title": title, "type": site_type } });
        let body = self.exec.post(SITES, &payload)?;
        decode(unwrap_envelope(body, "site"), "created site")
    }

    pub fn list_labels(&self) -> Result<Vec<Label>, ApiError> {
        let body = self.exec.get(LABELS)?;
        Ok(decode::<LabelListing>(body, "label listing")?.labels)
    }

    pub fn create_label(&self, label: &NewLabel) -> Result<Label, ApiError> {
        let payload = json!({
            "label": {
                "name": label.name,
                "description": label.description,
                "color": label.color,
            }
        });
        let body = self.exec.post(LABELS, &payload)?;
        decode(unwrap_envelope(body, "label"), "created label")
    }

    pub fn list_interfaces(&self, device_id: &TargetId) -> Result<Vec<Interface>, ApiError> {
        let body = self.exec.get(&format!("{INTERFACES}?filters.deviceIds={device_id}"))?;
        Ok(decode::<InterfaceListing>(body, "interface listing")?.interfaces)
    }

    pub fn create_interface(&self, payload: &Value) -> Result<TargetId, ApiError> {
        let body = self.exec.post(INTERFACES, payload)?;
        created_id(&body, "interface")
    }

    pub fn update_interface(&self, id: &TargetId, payload: &Value) -> Result<(), ApiError> {
        self.exec.put(&format!("{INTERFACES}/{id}"), payload).map(drop)
    }
}

fn decode<T: serde::de::DeserializeOwned>(body: Value, what: &str) -> Result<T, ApiError> {
    serde_json::from_value(body).map_err(|e| ApiError::Decode(format!("{what}: {e}")))
}

fn unwrap_envelope(body: Value, key: &str) -> Value {
    match body.get(key) {
        Some(inner) if inner.is_object() => inner.clone(),
        _ => body,
    }
}

/// Identifier of a freshly created entity, from `{"<kind>": {"id": …}}` or
/// a bare `{"id": …}`.
fn created_id(body: &Value, kind: &str) -> Result<TargetId, ApiError> {
    let id = body
        .get(kind)
        .and_then(|inner| inner.get("id"))
        .or_else(|| body.get("id"));
    match id {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(TargetId::new(s.trim())),
        Some(Value::Number(n)) => Ok(TargetId::new(n.to_string())),
        _ => Err(ApiError::Decode(format!("{kind} create response has no id"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_decodes_with_numeric_or_string_ids() {
        let listing: DeviceListing = serde_json::from_value(json!({
            "devices": [
                {"id": "101", "deviceName": "edge-1", "sendingIps": ["10.0.0.1"], "siteId": 7,
                 "labels": [{"id": 5, "name": "core", "color": "#374d5d"}]},
                {"id": 102, "deviceName": "edge-2", "deviceSnmpIp": "10.0.0.2",
                 "site": {"id": "8", "siteName": "FRA1"}}
            ]
        }))
        .unwrap();

        let sites = HashMap::from([("7".to_string(), "AMS1".to_string())]);
        let records: Vec<TargetRecord> = listing.devices.into_iter().map(|d| d.into_target(&sites)).collect();

        assert_eq!(records[0].id.as_str(), "101");
        assert_eq!(records[0].attributes["site"], "AMS1");
        assert_eq!(records[0].attributes["ip_address"], "10.0.0.1");
        assert_eq!(records[0].labels[0].id.as_str(), "5");
        assert_eq!(records[1].id.as_str(), "102");
        assert_eq!(records[1].attributes["site"], "FRA1");
        assert_eq!(records[1].attributes["site_id"], "8");
        assert_eq!(records[1].secondary, vec!["10.0.0.2"]);
    }

    #[test]
    fn device_keeps_listed_settings_as_attributes() {
        let device: Device = serde_json::from_value(json!({
            "id": 11, "deviceName": "edge-1",
            "sendingIps": ["10.0.0.1", "10.0.0.5"],
            "deviceDescription": "Core router in AMS",
            "deviceSampleRate": "100",
            "deviceBgpType": "device",
            "deviceSnmpCommunity": "s3cret-comm",
            "planId": 70649,
            "minimizeSnmp": true
        }))
        .unwrap();
        let record = device.into_target(&HashMap::new());

        assert_eq!(record.attributes[SENDING_IPS], "10.0.0.1,10.0.0.5");
        assert_eq!(record.attributes["description"], "Core router in AMS");
        assert_eq!(record.attributes["sample_rate"], "100");
        assert_eq!(record.attributes["bgp_type"], "device");
        assert_eq!(record.attributes["snmp_community"], "s3cret-comm");
        assert_eq!(record.attributes["plan_id"], "70649");
        assert_eq!(record.attributes["minimize_snmp"], "true");
    }

    #[test]
    fn interface_maps_wire_fields_to_feed_names() {
        let iface: Interface = serde_json::from_value(json!({
            "id": "9001",
            "deviceId": "101",
            "snmpId": "3",
            "snmpSpeed": 10000,
            "interfaceDescription": "xe-0/0/3",
            "interfaceIp": "192.0.2.1",
            "snmpAlias": ""
        }))
        .unwrap();
        let record = iface.into_target();

        assert_eq!(record.name, "xe-0/0/3");
        assert_eq!(record.secondary, vec!["3"]);
        assert_eq!(record.attributes["speed"], "10000");
        assert_eq!(record.attributes["ip"], "192.0.2.1");
        assert!(!record.attributes.contains_key("description"));
    }

    #[test]
    fn interface_payload_sends_numbers_where_numeric() {
        let mut attrs = invsync_recon::model::Attributes::new();
        attrs.insert("ifindex".into(), "3".into());
        attrs.insert("speed".into(), "10000".into());
        attrs.insert("type".into(), "6".into());
        attrs.insert("ifDescr".into(), "xe-0/0/3".into());
        attrs.insert("netmask".into(), " ".into());

        let body = interface_payload(&TargetId::new("101"), &attrs, Some(&TargetId::new("9001")));
        let iface = &body["interface"];
        assert_eq!(iface["id"], 9001);
        assert_eq!(iface["deviceId"], 101);
        assert_eq!(iface["snmpId"], "3");
        assert_eq!(iface["snmpSpeed"], 10000);
        assert_eq!(iface["snmpType"], 6);
        assert!(iface.get("interfaceIpNetmask").is_none());
    }

    #[test]
    fn created_id_accepts_both_envelopes() {
        assert_eq!(created_id(&json!({"device": {"id": 55}}), "device").unwrap().as_str(), "55");
        assert_eq!(created_id(&json!({"id": "abc"}), "site").unwrap().as_str(), "abc");
        assert!(created_id(&json!({}), "label").is_err());
    }
}
