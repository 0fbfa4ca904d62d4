//! Pusher protocol v7 over `tokio-tungstenite`.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::Arc,
    time::Duration,
};
use tokio::net::TcpStream;
use tokio::time::Instant as TokioInstant;
use tokio_tungstenite::{
    tungstenite::{client::IntoClientRequest, protocol::Message},
    MaybeTlsStream,
};
use url::Url;

use crate::{
    auth::Credential,
    client::DashboardApi,
    connection::transport::{Inbound, PushStream, PushTransport, UNAUTHORIZED_CODE},
    error::{LinkError, Result},
    models::{
        server_message::events, ClientMessage, ConnectionEstablished, ProtocolError,
        ServerMessage,
    },
    timeouts::LinkTimeouts,
};

pub(crate) type WebSocketStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Pusher protocol revision spoken by this client.
pub const PROTOCOL_VERSION: u8 = 7;

const CLIENT_NAME: &str = "jobdesk-link";

const PRIVATE_PREFIX: &str = "private-";

/// Wire name of a logical private channel (`user.42` -> `private-user.42`).
pub fn wire_channel(channel: &str) -> String {
    if channel.starts_with(PRIVATE_PREFIX) {
        channel.to_string()
    } else {
        format!("{}{}", PRIVATE_PREFIX, channel)
    }
}

/// Logical name of a wire channel (`private-user.42` -> `user.42`).
pub fn logical_channel(wire: &str) -> &str {
    wire.strip_prefix(PRIVATE_PREFIX).unwrap_or(wire)
}

/// Build `{ws}/app/{key}?protocol=7&client=jobdesk-link&version=..`.
pub(crate) fn resolve_ws_url(base_url: &str, app_key: &str) -> Result<String> {
    let base = Url::parse(base_url.trim()).map_err(|e| {
        LinkError::ConfigurationError(format!("Invalid push url '{}': {}", base_url, e))
    })?;

    if base.host_str().is_none() {
        return Err(LinkError::ConfigurationError(
            "push url must include a host".to_string(),
        ));
    }
    if !base.username().is_empty() || base.password().is_some() {
        return Err(LinkError::ConfigurationError(
            "push url must not include username/password credentials".to_string(),
        ));
    }
    if app_key.trim().is_empty() {
        return Err(LinkError::ConfigurationError(
            "push app_key is required".to_string(),
        ));
    }

    let ws_scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(LinkError::ConfigurationError(format!(
                "Unsupported push url scheme '{}'; expected ws(s) or http(s)",
                other
            )));
        },
    };

    let mut ws_url = base.clone();
    ws_url.set_scheme(ws_scheme).map_err(|_| {
        LinkError::ConfigurationError("Failed to set WebSocket URL scheme".to_string())
    })?;
    ws_url.set_fragment(None);
    let prefix = base.path().trim_end_matches('/');
    ws_url.set_path(&format!("{}/app/{}", prefix, app_key.trim()));
    ws_url
        .query_pairs_mut()
        .clear()
        .append_pair("protocol", &PROTOCOL_VERSION.to_string())
        .append_pair("client", CLIENT_NAME)
        .append_pair("version", env!("CARGO_PKG_VERSION"));

    Ok(ws_url.to_string())
}

/// Spread keepalive pings of many tabs by +/-20%, deterministically per key.
pub(crate) fn jitter_keepalive_interval(base: Duration, key: &str) -> Duration {
    if base.is_zero() {
        return base;
    }

    let base_ms = base.as_millis() as u64;
    if base_ms <= 1 {
        return base;
    }

    let jitter_span = (base_ms / 5).max(1);
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    let hashed = hasher.finish();

    let offset = (hashed % (2 * jitter_span + 1)) as i64 - jitter_span as i64;
    let jittered_ms = if offset >= 0 {
        base_ms.saturating_add(offset as u64)
    } else {
        base_ms.saturating_sub((-offset) as u64).max(1)
    };

    Duration::from_millis(jittered_ms)
}

/// Classify one text frame received after the handshake.
///
/// Returns `Ok(None)` for frames that need no action.
pub(crate) fn parse_frame(text: &str) -> Result<Option<Inbound>> {
    let frame: ServerMessage = serde_json::from_str(text)?;

    let inbound = match frame.event.as_str() {
        events::PING => Inbound::Ping,
        events::PONG => Inbound::Pong,
        events::ERROR => {
            let error: ProtocolError = serde_json::from_value(frame.payload()).unwrap_or_default();
            Inbound::Error {
                code: error.code,
                message: error.describe(),
            }
        },
        events::SUBSCRIPTION_SUCCEEDED => match &frame.channel {
            Some(channel) => Inbound::Subscribed {
                channel: logical_channel(channel).to_string(),
            },
            None => return Ok(None),
        },
        events::SUBSCRIPTION_ERROR => match &frame.channel {
            Some(channel) => {
                let error: ProtocolError =
                    serde_json::from_value(frame.payload()).unwrap_or_default();
                Inbound::SubscriptionFailed {
                    channel: logical_channel(channel).to_string(),
                    status: error.status.or(error.code),
                    message: error.describe(),
                }
            },
            None => return Ok(None),
        },
        _ if frame.is_protocol_event() => {
            log::debug!("[jobdesk-link] Ignoring protocol frame '{}'", frame.event);
            return Ok(None);
        },
        _ => match &frame.channel {
            Some(channel) => Inbound::Event {
                channel: logical_channel(channel).to_string(),
                event: frame.event.clone(),
                data: frame.payload(),
            },
            None => {
                log::debug!("[jobdesk-link] Ignoring channel-less event '{}'", frame.event);
                return Ok(None);
            },
        },
    };

    Ok(Some(inbound))
}

/// Production [`PushTransport`] speaking Pusher v7.
///
/// Private channels are authorized through
/// [`DashboardApi::authorize_channel`] before each subscribe.
pub struct PusherTransport {
    ws_url: String,
    api: Arc<dyn DashboardApi>,
    timeouts: LinkTimeouts,
}

impl PusherTransport {
    pub fn new(
        base_url: &str,
        app_key: &str,
        api: Arc<dyn DashboardApi>,
        timeouts: LinkTimeouts,
    ) -> Result<Self> {
        Ok(Self {
            ws_url: resolve_ws_url(base_url, app_key)?,
            api,
            timeouts,
        })
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }
}

#[async_trait]
impl PushTransport for PusherTransport {
    async fn open(&self, credential: &Credential) -> Result<Box<dyn PushStream>> {
        log::debug!("[jobdesk-link] Opening push connection to {}", self.ws_url);

        let request = self.ws_url.as_str().into_client_request().map_err(|e| {
            LinkError::WebSocketError(format!("Failed to build WebSocket request: {}", e))
        })?;

        let connect = tokio_tungstenite::connect_async(request);
        let connect_result = if LinkTimeouts::is_no_timeout(self.timeouts.connection_timeout) {
            Ok(connect.await)
        } else {
            tokio::time::timeout(self.timeouts.connection_timeout, connect).await
        };

        let mut ws = match connect_result {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(tokio_tungstenite::tungstenite::Error::Http(response))) => {
                let status = response.status().as_u16();
                return Err(match status {
                    401 | 403 => LinkError::AuthenticationError(format!(
                        "Push endpoint rejected the upgrade (HTTP {})",
                        status
                    )),
                    code => LinkError::WebSocketError(format!("WebSocket HTTP error: {}", code)),
                });
            },
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(LinkError::TimeoutError(format!(
                    "Connection timeout ({:?})",
                    self.timeouts.connection_timeout
                )));
            },
        };

        let established = wait_for_established(&mut ws, self.timeouts.auth_timeout).await?;
        log::info!(
            "[jobdesk-link] Push connection established (socket {})",
            established.socket_id
        );

        Ok(Box::new(PusherStream {
            ws,
            socket_id: established.socket_id,
            credential: credential.clone(),
            api: Arc::clone(&self.api),
        }))
    }
}

/// Wait for `pusher:connection_established`, tolerating keepalive frames.
async fn wait_for_established(
    ws: &mut WebSocketStream,
    auth_timeout: Duration,
) -> Result<ConnectionEstablished> {
    let deadline = TokioInstant::now() + auth_timeout;
    loop {
        let remaining = deadline.saturating_duration_since(TokioInstant::now());
        if remaining.is_zero() {
            return Err(LinkError::TimeoutError(format!(
                "Handshake timeout ({:?})",
                auth_timeout
            )));
        }

        match tokio::time::timeout(remaining, ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                let frame: ServerMessage = serde_json::from_str(text.as_str())?;
                match frame.event.as_str() {
                    events::CONNECTION_ESTABLISHED => {
                        return serde_json::from_value(frame.payload()).map_err(|e| {
                            LinkError::WebSocketError(format!(
                                "Malformed connection_established: {}",
                                e
                            ))
                        });
                    },
                    events::ERROR => {
                        let error: ProtocolError =
                            serde_json::from_value(frame.payload()).unwrap_or_default();
                        return Err(handshake_error(&error));
                    },
                    events::PING => {
                        let _ = send_frame(ws, &ClientMessage::pong()).await;
                    },
                    _ => continue,
                }
            },
            Ok(Some(Ok(Message::Close(frame)))) => {
                if let Some(frame) = frame {
                    let error = ProtocolError {
                        message: Some(frame.reason.as_str().to_string()).filter(|m| !m.is_empty()),
                        code: Some(u16::from(frame.code)),
                        ..Default::default()
                    };
                    return Err(handshake_error(&error));
                }
                return Err(LinkError::NetworkError(
                    "Connection closed during handshake".to_string(),
                ));
            },
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(e))) => return Err(e.into()),
            Ok(None) => {
                return Err(LinkError::NetworkError(
                    "Connection closed before handshake completed".to_string(),
                ));
            },
            Err(_) => {
                return Err(LinkError::TimeoutError(format!(
                    "Handshake timeout ({:?})",
                    auth_timeout
                )));
            },
        }
    }
}

fn handshake_error(error: &ProtocolError) -> LinkError {
    match error.code {
        Some(UNAUTHORIZED_CODE) => LinkError::AuthenticationError(error.describe()),
        Some(code) if (4000..=4299).contains(&code) => LinkError::ServerError {
            status_code: code,
            message: error.describe(),
        },
        _ => LinkError::WebSocketError(error.describe()),
    }
}

async fn send_frame(ws: &mut WebSocketStream, message: &ClientMessage) -> Result<()> {
    let payload = serde_json::to_string(message)?;
    ws.send(Message::Text(payload.into())).await.map_err(|e| {
        LinkError::WebSocketError(format!("Failed to send {}: {}", message.event, e))
    })
}

struct PusherStream {
    ws: WebSocketStream,
    socket_id: String,
    credential: Credential,
    api: Arc<dyn DashboardApi>,
}

#[async_trait]
impl PushStream for PusherStream {
    fn socket_id(&self) -> &str {
        &self.socket_id
    }

    async fn subscribe(&mut self, channel: &str) -> Result<()> {
        let wire = wire_channel(channel);
        let signature = self
            .api
            .authorize_channel(&self.credential, &self.socket_id, &wire)
            .await?;
        send_frame(&mut self.ws, &ClientMessage::subscribe(&wire, &signature.auth)).await
    }

    async fn unsubscribe(&mut self, channel: &str) -> Result<()> {
        send_frame(&mut self.ws, &ClientMessage::unsubscribe(&wire_channel(channel))).await
    }

    async fn ping(&mut self) -> Result<()> {
        send_frame(&mut self.ws, &ClientMessage::ping()).await
    }

    async fn pong(&mut self) -> Result<()> {
        send_frame(&mut self.ws, &ClientMessage::pong()).await
    }

    async fn next_frame(&mut self) -> Option<Result<Inbound>> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => match parse_frame(text.as_str()) {
                    Ok(Some(inbound)) => return Some(Ok(inbound)),
                    Ok(None) => continue,
                    Err(e) => {
                        log::warn!("[jobdesk-link] Dropping unparsable frame: {}", e);
                        continue;
                    },
                },
                Some(Ok(Message::Close(frame))) => {
                    return Some(Ok(match frame {
                        Some(f) => Inbound::Closed {
                            code: Some(u16::from(f.code)),
                            reason: f.reason.as_str().to_string(),
                        },
                        None => Inbound::Closed {
                            code: None,
                            reason: "Server closed connection".to_string(),
                        },
                    }));
                },
                // Transport-level ping/pong is answered by tungstenite itself.
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Some(Err(e.into())),
                None => return None,
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}
