//! Engine configuration file.
//!
//! # Configuration Format
//!
//! ```toml
//! [server]
//! api_url = "https://api.jobdesk.example/api"  # REST base URL
//! request_timeout_secs = 30
//!
//! [push]
//! ws_url = "wss://ws.jobdesk.example"  # Pusher-compatible endpoint
//! app_key = "jobdesk-app-key"
//! keepalive_interval_secs = 60         # 0 disables keepalive pings
//! pong_timeout_secs = 30
//!
//! [connection]
//! auto_reconnect = true
//! reconnect_delay_ms = 1000
//! max_reconnect_delay_ms = 30000
//! max_reconnect_attempts = 10          # 0 = unlimited
//! stable_session_ms = 10000
//!
//! [notifications]
//! key = "employer_notifications"
//! max_entries = 100
//!
//! [storage]
//! dir = "/var/lib/jobdesk/profile"     # omit for in-memory storage
//! credential_key = "auth_token"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::{
    client::JobdeskClient,
    connection::PusherTransport,
    credentials::DEFAULT_CREDENTIAL_KEY,
    engine::RealtimeEngineBuilder,
    error::{LinkError, Result},
    models::ConnectionOptions,
    notifications::{DEFAULT_MAX_ENTRIES, DEFAULT_NOTIFICATIONS_KEY},
    storage::{FileBackend, ProfileStorage},
    timeouts::LinkTimeouts,
};

/// Engine configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// REST API settings
    pub server: Option<ServerConfig>,

    /// Push endpoint settings
    pub push: Option<PushConfig>,

    /// Reconnection behavior
    pub connection: Option<ConnectionConfig>,

    /// Notification feed settings
    pub notifications: Option<NotificationsConfig>,

    /// Profile storage settings
    pub storage: Option<StorageConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// API base URL (e.g., https://api.jobdesk.example/api)
    pub api_url: Option<String>,

    /// Timeout of each REST request in seconds (default: 30)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushConfig {
    /// WebSocket base URL of the Pusher-compatible server
    pub ws_url: Option<String>,

    /// Application key
    pub app_key: Option<String>,

    /// Inbound silence before a ping in seconds, 0 disables (default: 60)
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,

    /// Wait for any frame after a ping in seconds, 0 disables (default: 30)
    #[serde(default = "default_pong_timeout_secs")]
    pub pong_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Enable automatic reconnection on connection loss (default: true)
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,

    /// Initial delay between reconnection attempts in milliseconds (default: 1000)
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Maximum delay between reconnection attempts in milliseconds (default: 30000)
    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,

    /// Maximum number of reconnection attempts (default: 10).
    ///
    /// 0 means unlimited and maps to `ConnectionOptions::max_reconnect_attempts
    /// = None`; any other value maps to `Some(n)`. There is no TOML spelling
    /// for "never reconnect": use `auto_reconnect = false`.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// A session shorter than this counts as a failed attempt (default: 10000)
    #[serde(default = "default_stable_session_ms")]
    pub stable_session_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Storage key of the notification snapshot
    #[serde(default = "default_notifications_key")]
    pub key: String,

    /// Number of notifications kept (default: 100)
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Profile directory; in-memory storage when absent
    pub dir: Option<PathBuf>,

    /// Storage key of the credential
    #[serde(default = "default_credential_key")]
    pub credential_key: String,
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_keepalive_interval_secs() -> u64 {
    60
}

fn default_pong_timeout_secs() -> u64 {
    30
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_max_reconnect_delay_ms() -> u64 {
    30000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_stable_session_ms() -> u64 {
    10_000
}

fn default_notifications_key() -> String {
    DEFAULT_NOTIFICATIONS_KEY.to_string()
}

fn default_max_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}

fn default_credential_key() -> String {
    DEFAULT_CREDENTIAL_KEY.to_string()
}

impl EngineConfig {
    /// Load configuration from file.
    ///
    /// Returns the default configuration if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!(
                "[jobdesk-link] No config at {}, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            LinkError::ConfigurationError(format!("Failed to read config file: {}", e))
        })?;

        let config: EngineConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self).map_err(|e| {
            LinkError::ConfigurationError(format!("Failed to serialize: {}", e))
        })?;

        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn resolved_server(&self) -> ServerConfig {
        self.server.clone().unwrap_or(ServerConfig {
            api_url: None,
            request_timeout_secs: default_request_timeout_secs(),
        })
    }

    pub fn resolved_push(&self) -> PushConfig {
        self.push.clone().unwrap_or(PushConfig {
            ws_url: None,
            app_key: None,
            keepalive_interval_secs: default_keepalive_interval_secs(),
            pong_timeout_secs: default_pong_timeout_secs(),
        })
    }

    pub fn resolved_connection(&self) -> ConnectionConfig {
        self.connection.clone().unwrap_or(ConnectionConfig {
            auto_reconnect: default_auto_reconnect(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_delay_ms: default_max_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            stable_session_ms: default_stable_session_ms(),
        })
    }

    pub fn resolved_notifications(&self) -> NotificationsConfig {
        self.notifications.clone().unwrap_or(NotificationsConfig {
            key: default_notifications_key(),
            max_entries: default_max_entries(),
        })
    }

    pub fn resolved_storage(&self) -> StorageConfig {
        self.storage.clone().unwrap_or(StorageConfig {
            dir: None,
            credential_key: default_credential_key(),
        })
    }

    /// Reconnection options of the push connection.
    pub fn to_connection_options(&self) -> ConnectionOptions {
        let conn = self.resolved_connection();

        // 0 means unlimited
        let max_attempts = if conn.max_reconnect_attempts == 0 {
            None
        } else {
            Some(conn.max_reconnect_attempts)
        };

        ConnectionOptions::new()
            .with_auto_reconnect(conn.auto_reconnect)
            .with_reconnect_delay_ms(conn.reconnect_delay_ms)
            .with_max_reconnect_delay_ms(conn.max_reconnect_delay_ms)
            .with_max_reconnect_attempts(max_attempts)
            .with_stable_session_ms(conn.stable_session_ms)
    }

    pub fn to_timeouts(&self) -> LinkTimeouts {
        let server = self.resolved_server();
        let push = self.resolved_push();
        LinkTimeouts::builder()
            .request_timeout_secs(server.request_timeout_secs)
            .keepalive_interval_secs(push.keepalive_interval_secs)
            .pong_timeout(Duration::from_secs(push.pong_timeout_secs))
            .build()
    }

    /// REST client for `[server]`.
    pub fn build_client(&self) -> Result<JobdeskClient> {
        let api_url = self.resolved_server().api_url.ok_or_else(|| {
            LinkError::ConfigurationError("[server] api_url is required".into())
        })?;
        JobdeskClient::builder()
            .base_url(api_url)
            .timeouts(self.to_timeouts())
            .build()
    }

    /// Pusher transport for `[push]`, authorizing channels through `api`.
    pub fn build_transport(&self, api: Arc<JobdeskClient>) -> Result<PusherTransport> {
        let push = self.resolved_push();
        let ws_url = push
            .ws_url
            .ok_or_else(|| LinkError::ConfigurationError("[push] ws_url is required".into()))?;
        let app_key = push
            .app_key
            .ok_or_else(|| LinkError::ConfigurationError("[push] app_key is required".into()))?;
        PusherTransport::new(&ws_url, &app_key, api, self.to_timeouts())
    }

    /// Profile storage for `[storage]`.
    pub fn open_profile(&self) -> Result<ProfileStorage> {
        match self.resolved_storage().dir {
            Some(dir) => Ok(ProfileStorage::new(Arc::new(FileBackend::new(dir)?))),
            None => Ok(ProfileStorage::in_memory()),
        }
    }

    /// Engine builder with client, transport, options, timeouts and feed
    /// settings applied. Storage is left to the caller.
    pub fn engine_builder(&self) -> Result<RealtimeEngineBuilder> {
        let client = Arc::new(self.build_client()?);
        let transport = self.build_transport(Arc::clone(&client))?;
        let notifications = self.resolved_notifications();

        Ok(RealtimeEngineBuilder::new()
            .api(client)
            .transport(Arc::new(transport))
            .options(self.to_connection_options())
            .timeouts(self.to_timeouts())
            .notifications_key(notifications.key)
            .max_notifications(notifications.max_entries))
    }
}
