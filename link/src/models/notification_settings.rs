use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// Response of `GET /notification-settings`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettingsResponse {
    pub success: bool,

    #[serde(default)]
    pub data: Option<NotificationSettingsData>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettingsData {
    #[serde(default)]
    pub in_app_notifications: InAppNotifications,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InAppNotifications {
    #[serde(default = "default_true")]
    pub real_time_alerts: bool,
}

impl Default for InAppNotifications {
    fn default() -> Self {
        Self {
            real_time_alerts: true,
        }
    }
}

/// Notification preferences the engine acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationSettings {
    /// Whether the live notification feed is enabled
    pub real_time_alerts: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            real_time_alerts: true,
        }
    }
}

impl NotificationSettingsResponse {
    /// Settings carried by a successful response.
    pub fn settings(&self) -> Option<NotificationSettings> {
        if !self.success {
            return None;
        }
        let real_time_alerts = self
            .data
            .as_ref()
            .map(|d| d.in_app_notifications.real_time_alerts)
            .unwrap_or(true);
        Some(NotificationSettings { real_time_alerts })
    }
}
