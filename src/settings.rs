//! Saved client settings
//!
//! The same settings live in two places: a TOML file for the command line,
//! and a JSON blob in the host's encrypted preference store. Either one can
//! be turned into a connect payload.

use crate::config::{
    ConnectRequest, DEFAULT_DNS, DEFAULT_MTU, DEFAULT_PING_INTERVAL, DEFAULT_PING_TIMEOUT,
    DEFAULT_UPSTREAM_DNS,
};
use crate::platform::{HostError, PreferenceStore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

pub const SETTINGS_KEY: &str = "settings";
pub const SETTINGS_FILE: &str = "olm.toml";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse settings: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize settings: {0}")]
    SerializeError(#[from] toml::ser::Error),
    #[error("Failed to encode settings: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Preference store error: {0}")]
    StoreError(#[from] HostError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub endpoint: String,
    pub id: String,
    pub secret: String,
    pub user_token: String,
    pub org_id: String,
    pub mtu: u16,
    pub dns: String,
    #[serde(rename = "upstreamDNS")]
    pub upstream_dns: Vec<String>,
    pub holepunch: bool,
    #[serde(rename = "tunnelDNS")]
    pub tunnel_dns: bool,
    #[serde(rename = "overrideDNS")]
    pub override_dns: bool,
    pub ping_interval: String,
    pub ping_timeout: String,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            id: String::new(),
            secret: String::new(),
            user_token: String::new(),
            org_id: String::new(),
            mtu: DEFAULT_MTU,
            dns: DEFAULT_DNS.to_string(),
            upstream_dns: vec![DEFAULT_UPSTREAM_DNS.to_string()],
            holepunch: true,
            tunnel_dns: false,
            override_dns: false,
            ping_interval: DEFAULT_PING_INTERVAL.to_string(),
            ping_timeout: DEFAULT_PING_TIMEOUT.to_string(),
            log_level: "INFO".to_string(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Read settings from the preference store.
    ///
    /// A missing or unreadable blob gives the defaults.
    pub fn load_from(store: &dyn PreferenceStore) -> Result<Self, SettingsError> {
        let Some(json) = store.get(SETTINGS_KEY)? else {
            return Ok(Self::default());
        };

        match serde_json::from_str(&json) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                warn!("Stored settings are unreadable ({}), using defaults", e);
                Ok(Self::default())
            }
        }
    }

    pub fn save_to(&self, store: &dyn PreferenceStore) -> Result<(), SettingsError> {
        let json = serde_json::to_string(self)?;
        store.put(SETTINGS_KEY, &json)?;
        Ok(())
    }

    pub fn to_request(&self) -> ConnectRequest {
        ConnectRequest {
            endpoint: self.endpoint.clone(),
            id: self.id.clone(),
            secret: self.secret.clone(),
            user_token: self.user_token.clone(),
            org_id: self.org_id.clone(),
            mtu: self.mtu,
            dns: self.dns.clone(),
            upstream_dns: self.upstream_dns.clone(),
            holepunch: self.holepunch,
            tunnel_dns: self.tunnel_dns,
            override_dns: self.override_dns,
            ping_interval: self.ping_interval.clone(),
            ping_timeout: self.ping_timeout.clone(),
        }
    }

    /// JSON payload for [`SessionManager::connect`](crate::SessionManager::connect)
    pub fn connect_payload(&self) -> Result<String, SettingsError> {
        Ok(serde_json::to_string(&self.to_request())?)
    }
}

/// Find the settings file to use
///
/// Looks in the current directory first, then the user config directory.
/// Returns `None` if neither exists.
pub fn find_settings_file() -> Option<PathBuf> {
    let local = PathBuf::from(SETTINGS_FILE);
    if local.exists() {
        return Some(local);
    }

    let user = default_settings_path()?;
    if user.exists() {
        return Some(user);
    }

    info!("No settings file found");
    None
}

/// `<config dir>/olm/olm.toml`
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("olm").join(SETTINGS_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::testing::MemoryStore;
    use tempfile::TempDir;

    fn sample() -> Settings {
        Settings {
            endpoint: "https://pangolin.example.com".to_string(),
            id: "olm-1".to_string(),
            secret: "s3cret".to_string(),
            org_id: "org-1".to_string(),
            log_level: "DEBUG".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.mtu, 1420);
        assert_eq!(settings.dns, "9.9.9.9");
        assert!(settings.holepunch);
        assert_eq!(settings.log_level, "INFO");
    }

    #[test]
    fn test_toml_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("olm.toml");

        sample().save(&path).unwrap();
        let loaded = Settings::load(&path).unwrap();

        assert_eq!(loaded, sample());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("olm.toml");
        std::fs::write(&path, "endpoint = \"https://e\"\nid = \"i\"\n").unwrap();

        let loaded = Settings::load(&path).unwrap();

        assert_eq!(loaded.endpoint, "https://e");
        assert_eq!(loaded.mtu, 1420);
        assert_eq!(loaded.ping_timeout, "5s");
    }

    #[test]
    fn test_missing_file() {
        let result = Settings::load(Path::new("/nonexistent/olm.toml"));
        assert!(matches!(result, Err(SettingsError::ReadError(_))));
    }

    #[test]
    fn test_preference_store() {
        let store = MemoryStore::default();

        assert_eq!(Settings::load_from(&store).unwrap(), Settings::default());

        sample().save_to(&store).unwrap();
        assert_eq!(Settings::load_from(&store).unwrap(), sample());
    }

    #[test]
    fn test_corrupt_store_blob() {
        let store = MemoryStore::default();
        store.put(SETTINGS_KEY, "{oops").unwrap();

        assert_eq!(Settings::load_from(&store).unwrap(), Settings::default());
    }

    #[test]
    fn test_connect_payload_translates() {
        let payload = sample().connect_payload().unwrap();
        let config = ConnectionConfig::from_json(&payload).unwrap();

        assert_eq!(config.endpoint, "https://pangolin.example.com");
        assert_eq!(config.org_id, "org-1");
        assert!(config.holepunch);

        let json: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert!(json.get("logLevel").is_none());
        assert!(json.get("upstreamDNS").is_some());
    }
}
