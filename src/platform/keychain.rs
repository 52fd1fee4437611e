//! Preference store backed by the OS credential store

use super::{HostError, PreferenceStore};
use tracing::debug;

pub const DEFAULT_SERVICE: &str = "olm-bridge";

pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new() -> Self {
        Self::with_service(DEFAULT_SERVICE)
    }

    pub fn with_service(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, HostError> {
        keyring::Entry::new(&self.service, key).map_err(|e| HostError::Store(e.to_string()))
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PreferenceStore for KeyringStore {
    fn get(&self, key: &str) -> Result<Option<String>, HostError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => {
                debug!("No stored preference for {}", key);
                Ok(None)
            }
            Err(e) => Err(HostError::Store(e.to_string())),
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<(), HostError> {
        self.entry(key)?
            .set_password(value)
            .map_err(|e| HostError::Store(e.to_string()))
    }
}
