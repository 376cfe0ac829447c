// Run settings
// Loaded from ./invsync.toml or ~/.config/invsync/config.toml

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const FILE_NAME: &str = "invsync.toml";

pub const ENV_API_BASE: &str = "INVSYNC_API_BASE";
pub const ENV_MAX_RETRIES: &str = "INVSYNC_MAX_RETRIES";
pub const ENV_DOMAIN_SUFFIX: &str = "INVSYNC_DOMAIN_SUFFIX";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("invalid value for {var}: {value:?}")]
    Env { var: &'static str, value: String },
}

/// How credentials are presented to the target API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Email + token header pair
    #[default]
    EmailToken,
    /// `Authorization: Bearer`
    Bearer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetSettings {
    pub base_url: String,
    pub auth: AuthMode,
}

impl Default for TargetSettings {
    fn default() -> Self {
        Self {
            base_url: "https://grpc.api.kentik.com".into(),
            auth: AuthMode::EmailToken,
        }
    }
}

/// Retry and pacing. Waits are counted in `time_unit_ms` units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub time_unit_ms: u64,
    pub rate_limit_fallback_secs: u64,
    pub low_water_mark: u64,
    pub throttle_secs: u64,
    pub timeout_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 5,
            time_unit_ms: 1000,
            rate_limit_fallback_secs: 60,
            low_water_mark: 10,
            throttle_secs: 10,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingSettings {
    /// Appended to source names for the second matching pass (`example.com`).
    pub domain_suffix: Option<String>,
}

/// Device fields that the source rows do not carry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub subtype: String,
    pub plan_id: Option<u64>,
    pub sample_rate: u32,
    pub snmp_community: String,
    pub bgp_type: String,
    pub minimize_snmp: bool,
    pub site_type: String,
    pub description: String,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            subtype: "router".into(),
            plan_id: None,
            sample_rate: 1,
            snmp_community: String::new(),
            bgp_type: "none".into(),
            minimize_snmp: false,
            site_type: "SITE_TYPE_OTHER".into(),
            description: "Device created by invsync: {name}".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMode {
    #[default]
    Random,
    RoundRobin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelSettings {
    /// Empty = built-in palette
    pub palette: Vec<String>,
    pub color_mode: ColorMode,
    /// `{name}` is replaced by the label name
    pub description: String,
    pub tenant_color: String,
    pub tenant_description: String,
}

impl Default for LabelSettings {
    fn default() -> Self {
        Self {
            palette: Vec::new(),
            color_mode: ColorMode::Random,
            description: "{name}".into(),
            tenant_color: "#033a63".into(),
            tenant_description: "Tenant from netbox for team {name}".into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetboxSettings {
    pub base_url: Option<String>,
}

/// NMS device registry enriched by `invsync nms-enrich`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NmsSettings {
    pub base_url: String,
}

impl Default for NmsSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.kentik.com/api/v5".into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub target: TargetSettings,
    pub retry: RetrySettings,
    pub matching: MatchingSettings,
    pub defaults: DeviceSettings,
    pub labels: LabelSettings,
    pub netbox: NetboxSettings,
    pub nms: NmsSettings,
}

impl Settings {
    /// `./invsync.toml` if present, else the per-user config file
    pub fn default_path() -> PathBuf {
        let local = PathBuf::from(FILE_NAME);
        if local.exists() {
            return local;
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("invsync")
            .join("config.toml")
    }

    pub fn from_toml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Load from `path` (or the default location). A missing default file
    /// yields the defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Self::default_path(), false),
        };

        if !explicit && !path.exists() {
            return Ok(Self::default());
        }

        let text = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_toml(&text, &path)
    }

    /// Apply `INVSYNC_*` overrides. `lookup` is `std::env::var(..).ok()` in
    /// the binary.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(base) = get(ENV_API_BASE) {
            self.target.base_url = base;
        }
        if let Some(raw) = get(ENV_MAX_RETRIES) {
            self.retry.max_retries = raw.parse().map_err(|_| ConfigError::Env {
                var: ENV_MAX_RETRIES,
                value: raw.clone(),
            })?;
        }
        if let Some(suffix) = get(ENV_DOMAIN_SUFFIX) {
            self.matching.domain_suffix = Some(suffix);
        }
        Ok(())
    }

    /// Suffix with surrounding dots and blanks removed, if any is left.
    pub fn domain_suffix(&self) -> Option<&str> {
        self.matching
            .domain_suffix
            .as_deref()
            .map(|s| s.trim().trim_matches('.'))
            .filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let s = Settings::from_toml("", Path::new("x.toml")).unwrap();
        assert_eq!(s, Settings::default());
        assert_eq!(s.retry.max_retries, 5);
        assert_eq!(s.retry.rate_limit_fallback_secs, 60);
        assert_eq!(s.labels.tenant_color, "#033a63");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let s = Settings::from_toml(
            r##"
[target]
auth = "bearer"

[retry]
max_retries = 2

[defaults]
plan_id = 70649

[labels]
palette = ["#111111", "#222222"]
color_mode = "round_robin"
"##,
            Path::new("x.toml"),
        )
        .unwrap();

        assert_eq!(s.target.auth, AuthMode::Bearer);
        assert_eq!(s.target.base_url, TargetSettings::default().base_url);
        assert_eq!(s.retry.max_retries, 2);
        assert_eq!(s.retry.time_unit_ms, 1000);
        assert_eq!(s.defaults.plan_id, Some(70649));
        assert_eq!(s.defaults.subtype, "router");
        assert_eq!(s.labels.color_mode, ColorMode::RoundRobin);
        assert_eq!(s.labels.palette.len(), 2);
    }

    #[test]
    fn nms_section_overrides_its_base_url() {
        assert_eq!(Settings::default().nms.base_url, "https://api.kentik.com/api/v5");

        let s = Settings::from_toml("[nms]\nbase_url = \"http://127.0.0.1:9000/v5\"\n", Path::new("x.toml")).unwrap();
        assert_eq!(s.nms.base_url, "http://127.0.0.1:9000/v5");
        assert_eq!(s.target, TargetSettings::default());
    }

    #[test]
    fn unknown_values_are_parse_errors() {
        let err = Settings::from_toml("[target]\nauth = \"kerberos\"\n", Path::new("bad.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn load_reads_explicit_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("invsync.toml");
        fs::write(&path, "[matching]\ndomain_suffix = \".example.com.\"\n").unwrap();

        let s = Settings::load(Some(&path)).unwrap();
        assert_eq!(s.domain_suffix(), Some("example.com"));
    }

    #[test]
    fn missing_explicit_path_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = Settings::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn env_overrides_file_values() {
        let mut s = Settings::default();
        s.apply_env(env(&[
            (ENV_API_BASE, "http://127.0.0.1:8080"),
            (ENV_MAX_RETRIES, "3"),
            (ENV_DOMAIN_SUFFIX, "corp.net"),
        ]))
        .unwrap();

        assert_eq!(s.target.base_url, "http://127.0.0.1:8080");
        assert_eq!(s.retry.max_retries, 3);
        assert_eq!(s.domain_suffix(), Some("corp.net"));
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let mut s = Settings::default();
        s.apply_env(env(&[(ENV_API_BASE, "  ")])).unwrap();
        assert_eq!(s.target.base_url, TargetSettings::default().base_url);
    }

    #[test]
    fn bad_retry_count_names_the_variable() {
        let mut s = Settings::default();
        let err = s.apply_env(env(&[(ENV_MAX_RETRIES, "many")])).unwrap_err();
        assert!(err.to_string().contains(ENV_MAX_RETRIES));
    }
}
