//! Data models for the jobdesk-link client library.
//!
//! Defines the Pusher wire frames, the decoded push events, the
//! notification record shared through storage, and the REST responses the
//! engine consumes.

pub mod channel_auth_response;
pub mod client_message;
pub mod connection_options;
pub mod notification;
pub mod notification_settings;
pub mod push_event;
pub mod server_message;
pub mod unread_count_response;

#[cfg(test)]
mod tests;

pub use channel_auth_response::ChannelAuthResponse;
pub use client_message::ClientMessage;
pub use connection_options::ConnectionOptions;
pub use notification::{Notification, NotificationKind};
pub use notification_settings::{
    InAppNotifications, NotificationSettings, NotificationSettingsData,
    NotificationSettingsResponse,
};
pub use push_event::{names as event_names, normalize_event_name, EventBody, PushEvent};
pub use server_message::{ConnectionEstablished, ProtocolError, ServerMessage};
pub use unread_count_response::UnreadCountResponse;
