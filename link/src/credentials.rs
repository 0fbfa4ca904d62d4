//! Persisted session credential.
//!
//! The credential is stored as JSON under a fixed key of the profile
//! storage, so every tab sees the same session. Saving or clearing it also
//! dispatches the in-process credential signal, because storage changes are
//! never reported to the tab that made them.

use crate::{
    auth::Credential,
    error::Result,
    storage::TabStorage,
    sync::SignalBus,
};

/// Default storage key of the credential.
pub const DEFAULT_CREDENTIAL_KEY: &str = "auth_token";

/// Reads and writes the current [`Credential`] of a tab.
#[derive(Clone)]
pub struct CredentialStore {
    storage: TabStorage,
    signals: SignalBus,
    key: String,
}

impl CredentialStore {
    pub fn new(storage: TabStorage, signals: SignalBus) -> Self {
        Self::with_key(storage, signals, DEFAULT_CREDENTIAL_KEY)
    }

    pub fn with_key(storage: TabStorage, signals: SignalBus, key: impl Into<String>) -> Self {
        Self {
            storage,
            signals,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn signals(&self) -> &SignalBus {
        &self.signals
    }

    /// Current credential.
    ///
    /// Unreadable, corrupt or unusable entries count as "logged out"; they
    /// are logged, never returned as errors.
    pub fn load(&self) -> Option<Credential> {
        let raw = match self.storage.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("[jobdesk-link] Failed to read credential: {}", e);
                return None;
            },
        };

        match serde_json::from_str::<Credential>(&raw) {
            Ok(credential) if credential.is_usable() => Some(credential),
            Ok(_) => {
                log::warn!("[jobdesk-link] Ignoring stored credential without token or user");
                None
            },
            Err(e) => {
                log::warn!("[jobdesk-link] Ignoring corrupt stored credential: {}", e);
                None
            },
        }
    }

    /// Persist `credential` (login) and notify this tab.
    pub fn save(&self, credential: &Credential) -> Result<()> {
        let json = serde_json::to_string(credential)?;
        self.storage.set(&self.key, &json)?;
        log::info!("[jobdesk-link] Credential saved for user {}", credential.user_id);
        self.signals.credential_changed(&self.key);
        Ok(())
    }

    /// Remove the credential (logout) and notify this tab.
    pub fn clear(&self) -> Result<()> {
        self.storage.remove(&self.key)?;
        log::info!("[jobdesk-link] Credential cleared");
        self.signals.credential_changed(&self.key);
        Ok(())
    }
}
