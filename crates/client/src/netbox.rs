//! Read-only NetBox client: tenants and their devices.

use invsync_recon::ApiError;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::api::Scalar;
use crate::executor::Executor;

const TENANTS: &str = "api/tenancy/tenants/";
const DEVICES: &str = "api/dcim/devices/";
const PAGE_SIZE: usize = 200;

#[derive(Debug, Clone, Deserialize)]
pub struct Tenant {
    pub id: Scalar,
    pub name: String,
    #[serde(default)]
    pub slug: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IpRef {
    pub address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetboxDevice {
    pub id: Scalar,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub primary_ip: Option<IpRef>,
}

impl NetboxDevice {
    /// Primary address without its prefix length (`10.0.0.1/32` → `10.0.0.1`).
    pub fn primary_address(&self) -> Option<&str> {
        let address = self.primary_ip.as_ref()?.address.trim();
        let bare = address.split('/').next().unwrap_or(address);
        (!bare.is_empty()).then_some(bare)
    }
}

#[derive(Deserialize)]
struct Page<T> {
    #[serde(default)]
    next: Option<String>,
    results: Vec<T>,
}

pub struct NetboxClient {
    exec: Executor,
}

impl NetboxClient {
    /// `exec` should carry [`Credentials::Token`](crate::Credentials::Token).
    pub fn new(exec: Executor) -> Self {
        Self { exec }
    }

    pub fn tenants(&self) -> Result<Vec<Tenant>, ApiError> {
        self.collect(&format!("{TENANTS}?limit={PAGE_SIZE}&offset=0"))
    }

    pub fn devices_for_tenant(&self, tenant: &Tenant) -> Result<Vec<NetboxDevice>, ApiError> {
        self.collect(&format!("{DEVICES}?tenant_id={}&limit={PAGE_SIZE}&offset=0", tenant.id.as_str()))
    }

    /// Follow `next` links until the listing is exhausted.
    fn collect<T: DeserializeOwned>(&self, first: &str) -> Result<Vec<T>, ApiError> {
        let mut items = Vec::new();
        let mut next = Some(first.to_string());
        while let Some(path) = next.take() {
            let body: Value = self.exec.get(&path)?;
            let page: Page<T> = serde_json::from_value(body)
                .map_err(|e| ApiError::Decode(format!("netbox {path}: {e}")))?;
            items.extend(page.results);
            next = page.next.filter(|n| !n.trim().is_empty());
        }
        Ok(items)
    }
}
