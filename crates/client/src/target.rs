//! [`TargetApi`] adapters: turn engine drafts into device, interface and
//! NMS enrichment payloads.

use invsync_recon::model::{LabelRecord, NewLabel, TargetId};
use invsync_recon::reconcile::{RecordDraft, TargetApi};
use invsync_recon::ApiError;
use serde_json::{json, Map, Value};

use crate::api::{
    id_value, interface_payload, number_or_string, TargetClient, DEFAULT_SITE_TYPE, DEVICE_FIELDS, SENDING_IPS,
};
use crate::nms::{enrichment_payload, NmsClient};

/// Fixed device fields not carried by the source rows.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDefaults {
    pub subtype: String,
    pub sample_rate: u32,
    pub bgp_type: String,
    pub plan_id: Option<u64>,
    pub snmp_community: String,
    pub minimize_snmp: bool,
    pub site_type: String,
    /// `{name}` is replaced by the device name.
    pub description: String,
}

impl Default for DeviceDefaults {
    fn default() -> Self {
        Self {
            subtype: "router".into(),
            sample_rate: 1,
            bgp_type: "none".into(),
            plan_id: None,
            snmp_community: String::new(),
            minimize_snmp: false,
            site_type: DEFAULT_SITE_TYPE.into(),
            description: "Device created by invsync: {name}".into(),
        }
    }
}

pub struct DeviceTarget<'a> {
    client: &'a TargetClient,
    defaults: DeviceDefaults,
}

impl<'a> DeviceTarget<'a> {
    pub fn new(client: &'a TargetClient, defaults: DeviceDefaults) -> Self {
        Self { client, defaults }
    }

    /// `{"device": {...}}` body for a create: record values, then
    /// `[defaults]` for everything the source does not carry.
    pub fn create_payload(&self, draft: &RecordDraft) -> Result<Value, ApiError> {
        let ip = draft
            .value("ip_address")
            .ok_or_else(|| ApiError::InvalidPayload(format!("{}: no ip_address", draft.key)))?;

        let mut device = json!({
            "deviceName": draft.name,
            "deviceSubtype": draft.value("subtype").unwrap_or(self.defaults.subtype.as_str()),
            "sendingIps": [ip],
            "deviceSampleRate": self.defaults.sample_rate,
            "deviceDescription": draft
                .value("description")
                .map(str::to_string)
                .unwrap_or_else(|| self.defaults.description.replace("{name}", &draft.name)),
            "deviceBgpType": self.defaults.bgp_type,
            "minimizeSnmp": self.defaults.minimize_snmp,
            "deviceSnmpIp": ip,
            "deviceSnmpCommunity": self.defaults.snmp_community,
        });

        if let Some(plan) = self.defaults.plan_id {
            device["planId"] = Value::from(plan);
        }
        if let Some(site) = site_of(draft) {
            device["siteId"] = id_value(&site);
        }
        Ok(json!({ "device": device }))
    }

    /// `{"device": {...}}` body for an update of `id`.
    ///
    /// `draft.attributes` already holds the listed device with the source
    /// values laid over it, so every field comes from there. Defaults are
    /// never applied; a field the device does not have is left out. The
    /// source address joins the listed sending addresses instead of
    /// replacing them.
    pub fn update_payload(&self, draft: &RecordDraft, id: &TargetId) -> Value {
        let mut device = Map::new();
        device.insert("id".into(), id_value(id));
        device.insert("deviceName".into(), Value::from(draft.name.as_str()));

        let mut sending: Vec<&str> = draft
            .value(SENDING_IPS)
            .map(|v| v.split(',').map(str::trim).filter(|ip| !ip.is_empty()).collect())
            .unwrap_or_default();
        if let Some(ip) = draft.value("ip_address") {
            if !sending.contains(&ip) {
                sending.push(ip);
            }
            device.insert("deviceSnmpIp".into(), Value::from(ip));
        }
        if !sending.is_empty() {
            device.insert("sendingIps".into(), Value::from(sending));
        }

        for (wire, attr, numeric) in DEVICE_FIELDS {
            let Some(value) = draft.value(attr) else {
                continue;
            };
            let value = if *numeric { number_or_string(value) } else { Value::from(value) };
            device.insert(wire.to_string(), value);
        }
        if let Some(minimize) = draft.value("minimize_snmp").and_then(|v| v.parse::<bool>().ok()) {
            device.insert("minimizeSnmp".into(), Value::from(minimize));
        }
        if let Some(site) = site_of(draft) {
            device.insert("siteId".into(), id_value(&site));
        }
        json!({ "device": device })
    }
}

/// Freshly resolved dependency, else the site the device already has.
fn site_of(draft: &RecordDraft) -> Option<TargetId> {
    draft
        .dependency
        .clone()
        .or_else(|| draft.value("site_id").map(TargetId::new))
}

impl TargetApi for DeviceTarget<'_> {
    fn create_record(&mut self, draft: &RecordDraft) -> Result<TargetId, ApiError> {
        let payload = self.create_payload(draft)?;
        self.client.create_device(&payload)
    }

    fn update_record(&mut self, id: &TargetId, draft: &RecordDraft) -> Result<(), ApiError> {
        let payload = self.update_payload(draft, id);
        self.client.update_device(id, &payload)
    }

    fn attach_labels(&mut self, id: &TargetId, labels: &[LabelRecord]) -> Result<(), ApiError> {
        let ids: Vec<TargetId> = labels.iter().map(|l| l.id.clone()).collect();
        self.client.set_device_labels(id, &ids)
    }

    fn create_label(&mut self, label: &NewLabel) -> Result<LabelRecord, ApiError> {
        self.client.create_label(label).map(|l| l.into_record())
    }

    fn create_dependency(&mut self, name: &str) -> Result<TargetId, ApiError> {
        let site = self.client.create_site(name, &self.defaults.site_type)?;
        Ok(TargetId::from(&site.id))
    }
}

/// Interfaces of a single device. Labels and dependencies do not apply.
pub struct InterfaceTarget<'a> {
    client: &'a TargetClient,
    device_id: TargetId,
}

impl<'a> InterfaceTarget<'a> {
    pub fn new(client: &'a TargetClient, device_id: TargetId) -> Self {
        Self { client, device_id }
    }
}

impl TargetApi for InterfaceTarget<'_> {
    fn create_record(&mut self, draft: &RecordDraft) -> Result<TargetId, ApiError> {
        let payload = interface_payload(&self.device_id, &draft.attributes, None);
        self.client.create_interface(&payload)
    }

    fn update_record(&mut self, id: &TargetId, draft: &RecordDraft) -> Result<(), ApiError> {
        let payload = interface_payload(&self.device_id, &draft.attributes, Some(id));
        self.client.update_interface(id, &payload)
    }
}

/// Enrichment of already listed NMS devices. Devices are never created.
pub struct NmsTarget<'a> {
    client: &'a NmsClient,
}

impl<'a> NmsTarget<'a> {
    pub fn new(client: &'a NmsClient) -> Self {
        Self { client }
    }
}

impl TargetApi for NmsTarget<'_> {
    fn create_record(&mut self, _draft: &RecordDraft) -> Result<TargetId, ApiError> {
        Err(ApiError::Unsupported("NMS device create"))
    }

    fn update_record(&mut self, id: &TargetId, draft: &RecordDraft) -> Result<(), ApiError> {
        self.client.patch_device(id, &enrichment_payload(draft))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{Executor, RetryPolicy};
    use crate::Credentials;
    use invsync_recon::model::Attributes;

    fn client() -> TargetClient {
        TargetClient::new(Executor::new(
            "http://127.0.0.1:9",
            Credentials::Bearer("t".into()),
            RetryPolicy::default(),
        ))
    }

    fn draft(pairs: &[(&str, &str)], dependency: Option<&str>) -> RecordDraft {
        RecordDraft {
            key: "edge-1".into(),
            name: "edge-1".into(),
            attributes: pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect::<Attributes>(),
            dependency: dependency.map(TargetId::new),
            labels: Vec::new(),
        }
    }

    #[test]
    fn device_payload_uses_defaults_and_site() {
        let client = client();
        let target = DeviceTarget::new(
            &client,
            DeviceDefaults {
                plan_id: Some(70649),
                ..DeviceDefaults::default()
            },
        );
        let body = target
            .create_payload(&draft(&[("ip_address", "10.0.0.1"), ("site", "AMS1")], Some("12")))
            .unwrap();
        let device = &body["device"];

        assert_eq!(device["deviceName"], "edge-1");
        assert_eq!(device["deviceSubtype"], "router");
        assert_eq!(device["sendingIps"], json!(["10.0.0.1"]));
        assert_eq!(device["deviceSnmpIp"], "10.0.0.1");
        assert_eq!(device["planId"], 70649);
        assert_eq!(device["siteId"], 12);
        assert_eq!(device["deviceDescription"], "Device created by invsync: edge-1");
        assert!(device.get("id").is_none());
    }

    #[test]
    fn update_payload_keeps_listed_site() {
        let client = client();
        let target = DeviceTarget::new(&client, DeviceDefaults::default());
        let body = target.update_payload(
            &draft(&[("ip_address", "10.0.0.9"), ("site_id", "7")], None),
            &TargetId::new("101"),
        );

        assert_eq!(body["device"]["id"], 101);
        assert_eq!(body["device"]["siteId"], 7);
        assert!(body["device"].get("planId").is_none());
    }

    #[test]
    fn update_payload_never_falls_back_to_defaults() {
        let client = client();
        let target = DeviceTarget::new(
            &client,
            DeviceDefaults {
                plan_id: Some(1),
                snmp_community: "public".into(),
                ..DeviceDefaults::default()
            },
        );
        let body = target.update_payload(
            &draft(&[("ip_address", "10.0.0.7"), (SENDING_IPS, "10.0.0.1, 10.0.0.5")], None),
            &TargetId::new("11"),
        );
        let device = body["device"].as_object().unwrap();

        assert_eq!(device["sendingIps"], json!(["10.0.0.1", "10.0.0.5", "10.0.0.7"]));
        assert_eq!(device["deviceSnmpIp"], "10.0.0.7");
        for absent in ["deviceDescription", "deviceSampleRate", "deviceBgpType", "deviceSnmpCommunity", "planId"] {
            assert!(!device.contains_key(absent), "{absent} should be left out");
        }
    }

    #[test]
    fn device_payload_needs_an_address() {
        let client = client();
        let target = DeviceTarget::new(&client, DeviceDefaults::default());
        let err = target.create_payload(&draft(&[("site", "AMS1")], None)).unwrap_err();
        assert!(matches!(err, ApiError::InvalidPayload(_)));
    }
}
