//! Single push connection per credential.
//!
//! [`ConnectionManager`] is the public handle; all socket I/O happens on one
//! background task per credential that owns the stream, the
//! [`ChannelSubscriptionRegistry`] and the reconnect loop. Commands reach the
//! task over an unbounded channel so that handles can unsubscribe from
//! `Drop`.
//!
//! Every task carries a generation number. Tearing a connection down bumps
//! the shared generation first, which immediately mutes the old task: it can
//! no longer publish state, fire handlers or deliver events, even while its
//! network close is still in flight.

use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant as TokioInstant;

use crate::{
    auth::Credential,
    connection::{
        state::{ConnectionFailure, ConnectionState, FailureKind},
        transport::{CloseAction, Inbound, PushStream, PushTransport, UNAUTHORIZED_CODE},
        websocket::jitter_keepalive_interval,
        FAR_FUTURE,
    },
    error::{LinkError, Result},
    event_handlers::{ConnectionError, DisconnectReason, EventHandlers},
    models::{normalize_event_name, ConnectionOptions, PushEvent},
    subscription::{ChannelInfo, ChannelSubscriptionRegistry, ListenerId, SubscriptionHandle},
    timeouts::LinkTimeouts,
};

// ── Commands ────────────────────────────────────────────────────────────────

/// Commands sent from the public API to the background connection task.
pub(crate) enum ConnCmd {
    Subscribe {
        channel: String,
        event: String,
        listener: mpsc::Sender<PushEvent>,
        result_tx: oneshot::Sender<ListenerId>,
    },
    Unsubscribe {
        id: ListenerId,
    },
    ListChannels {
        result_tx: oneshot::Sender<Vec<ChannelInfo>>,
    },
    Reconnect,
    Shutdown,
}

// ── State publishing ────────────────────────────────────────────────────────

/// Publishes state and fires handlers on behalf of one generation.
#[derive(Clone)]
struct StatePublisher {
    state_tx: Arc<watch::Sender<ConnectionState>>,
    current: Arc<AtomicU64>,
    generation: u64,
    handlers: EventHandlers,
}

impl StatePublisher {
    fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.generation
    }

    fn publish(&self, state: ConnectionState) {
        let generation = self.generation;
        let current = &self.current;
        // The generation check runs under the watch lock, so a retired task
        // can never overwrite the state published by its successor.
        let changed = self.state_tx.send_if_modified(|slot| {
            if current.load(Ordering::SeqCst) != generation || *slot == state {
                return false;
            }
            *slot = state.clone();
            true
        });
        if changed {
            log::debug!("[jobdesk-link] Connection state -> {}", state);
            self.handlers.emit_state_change(&state);
        }
    }

    fn emit_connect(&self, socket_id: &str) {
        if self.is_current() {
            self.handlers.emit_connect(socket_id);
        }
    }

    fn emit_disconnect(&self, reason: DisconnectReason) {
        if self.is_current() {
            self.handlers.emit_disconnect(reason);
        }
    }

    fn emit_error(&self, error: ConnectionError) {
        if self.is_current() {
            self.handlers.emit_error(error);
        }
    }
}

// ── ConnectionManager (public handle) ───────────────────────────────────────

struct ActiveConnection {
    credential: Credential,
    cmd_tx: mpsc::UnboundedSender<ConnCmd>,
    generation: u64,
    task: JoinHandle<()>,
}

/// Owns the lifecycle of the single push connection of a tab.
///
/// At most one connection exists at any instant, always for the most
/// recently supplied credential. Must be used from within a tokio runtime.
///
/// # Examples
///
/// ```rust,no_run
/// use jobdesk_link::{
///     ConnectionManager, ConnectionOptions, Credential, EventHandlers, LinkTimeouts,
///     PushTransport,
/// };
/// use std::sync::Arc;
///
/// # async fn example(transport: Arc<dyn PushTransport>) -> jobdesk_link::Result<()> {
/// let manager = ConnectionManager::new(
///     transport,
///     ConnectionOptions::default(),
///     LinkTimeouts::default(),
///     EventHandlers::new(),
/// );
///
/// let credential = Credential::new("token", "42");
/// manager.connect(credential.clone());
///
/// let (tx, mut rx) = tokio::sync::mpsc::channel(16);
/// let _handle = manager
///     .subscribe(&credential.private_channel(), "message.sent", tx)
///     .await?;
/// while let Some(event) = rx.recv().await {
///     println!("{:?}", event);
/// }
/// # Ok(())
/// # }
/// ```
pub struct ConnectionManager {
    transport: Arc<dyn PushTransport>,
    options: ConnectionOptions,
    timeouts: LinkTimeouts,
    handlers: EventHandlers,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    generation: Arc<AtomicU64>,
    active: Mutex<Option<ActiveConnection>>,
    // Task retired by `disconnect()`, awaited by the next connection.
    retired: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn PushTransport>,
        options: ConnectionOptions,
        timeouts: LinkTimeouts,
        handlers: EventHandlers,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            options,
            timeouts,
            handlers,
            state_tx: Arc::new(state_tx),
            generation: Arc::new(AtomicU64::new(0)),
            active: Mutex::new(None),
            retired: Mutex::new(None),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Credential the current connection belongs to.
    pub fn current_credential(&self) -> Option<Credential> {
        self.active.lock().as_ref().map(|c| c.credential.clone())
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn timeouts(&self) -> &LinkTimeouts {
        &self.timeouts
    }

    fn publisher(&self, generation: u64) -> StatePublisher {
        StatePublisher {
            state_tx: Arc::clone(&self.state_tx),
            current: Arc::clone(&self.generation),
            generation,
            handlers: self.handlers.clone(),
        }
    }

    /// Establish a connection for `credential`.
    ///
    /// - Same credential as the current connection: no-op, except that an
    ///   errored connection is retried.
    /// - Different credential: the current connection is torn down (all
    ///   listeners released) and the new one only opens once the old task
    ///   has stopped or `teardown_grace` elapsed.
    pub fn connect(&self, credential: Credential) {
        let mut active = self.active.lock();

        if let Some(current) = active.as_ref() {
            if current.credential == credential {
                if self.state().is_errored() {
                    log::info!("[jobdesk-link] Retrying errored connection");
                    let _ = current.cmd_tx.send(ConnCmd::Reconnect);
                } else {
                    log::debug!("[jobdesk-link] Already connected for this credential");
                }
                return;
            }
        }

        let previous = match active.take() {
            Some(old) => Some(self.retire(old, "Credential changed")),
            None => self.retired.lock().take(),
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let publisher = self.publisher(generation);
        publisher.publish(ConnectionState::Connecting { attempt: 0 });

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let task = ConnectionTask {
            transport: Arc::clone(&self.transport),
            credential: credential.clone(),
            options: self.options.clone(),
            timeouts: self.timeouts.clone(),
            publisher,
            cmd_rx,
            registry: ChannelSubscriptionRegistry::new(),
        };

        log::info!(
            "[jobdesk-link] Opening push connection for user {} (generation {})",
            credential.user_id,
            generation
        );
        let handle = tokio::spawn(task.run(previous));

        *active = Some(ActiveConnection {
            credential,
            cmd_tx,
            generation,
            task: handle,
        });
    }

    /// Tear down the current connection. Idempotent.
    ///
    /// Effective immediately: no event is delivered and no state is
    /// published by the old connection after this returns. A following
    /// `connect` still waits for the old socket to close.
    pub fn disconnect(&self) {
        let old = self.active.lock().take();
        match old {
            Some(old) => {
                let task = self.retire(old, "Client disconnected");
                *self.retired.lock() = Some(task);
            },
            None => log::debug!("[jobdesk-link] disconnect(): nothing to tear down"),
        }
    }

    /// Force a fresh connection attempt for the current credential.
    ///
    /// Returns `false` when there is no credential to connect with.
    pub fn reconnect(&self) -> bool {
        match self.active.lock().as_ref() {
            Some(current) => current.cmd_tx.send(ConnCmd::Reconnect).is_ok(),
            None => false,
        }
    }

    fn retire(&self, old: ActiveConnection, reason: &str) -> JoinHandle<()> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let _ = old.cmd_tx.send(ConnCmd::Shutdown);

        let previous = self.state_tx.send_replace(ConnectionState::Disconnected);
        if previous != ConnectionState::Disconnected {
            self.handlers.emit_state_change(&ConnectionState::Disconnected);
        }
        if previous.is_connected() {
            self.handlers.emit_disconnect(DisconnectReason::new(reason));
        }

        log::info!(
            "[jobdesk-link] Tearing down connection for user {} (generation {}): {}",
            old.credential.user_id,
            old.generation,
            reason
        );
        old.task
    }

    fn command_sender(&self) -> Result<mpsc::UnboundedSender<ConnCmd>> {
        self.active
            .lock()
            .as_ref()
            .map(|c| c.cmd_tx.clone())
            .ok_or_else(|| {
                LinkError::WebSocketError("No active connection: no credential".to_string())
            })
    }

    /// Register `listener` for `event` on `channel`.
    ///
    /// The first listener of a channel triggers the one physical subscribe;
    /// later listeners share it. While the connection is connecting or
    /// errored the listener is registered offline and subscribed once the
    /// connection is up. Fails only when there is no credential or the
    /// connection was torn down concurrently.
    pub async fn subscribe(
        &self,
        channel: &str,
        event: &str,
        listener: mpsc::Sender<PushEvent>,
    ) -> Result<SubscriptionHandle> {
        let cmd_tx = self.command_sender()?;
        let event = normalize_event_name(event).to_string();
        let (result_tx, result_rx) = oneshot::channel();

        cmd_tx
            .send(ConnCmd::Subscribe {
                channel: channel.to_string(),
                event: event.clone(),
                listener,
                result_tx,
            })
            .map_err(|_| LinkError::Cancelled)?;

        let id = result_rx.await.map_err(|_| LinkError::Cancelled)?;
        Ok(SubscriptionHandle::new(id, channel.to_string(), event, cmd_tx))
    }

    /// Channels and listeners of the current connection.
    pub async fn list_channels(&self) -> Vec<ChannelInfo> {
        let Ok(cmd_tx) = self.command_sender() else {
            return Vec::new();
        };
        let (result_tx, result_rx) = oneshot::channel();
        if cmd_tx.send(ConnCmd::ListChannels { result_tx }).is_err() {
            return Vec::new();
        }
        result_rx.await.unwrap_or_default()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(old) = self.active.get_mut().take() {
            self.generation.fetch_add(1, Ordering::SeqCst);
            let _ = old.cmd_tx.send(ConnCmd::Shutdown);
        }
    }
}

// ── Background connection task ──────────────────────────────────────────────

enum Offline {
    Continue,
    Reconnect,
    Shutdown,
}

enum OpenOutcome {
    Opened(Box<dyn PushStream>),
    Failed(LinkError),
    Shutdown,
}

enum SessionEnd {
    Shutdown,
    Lost { immediate: bool },
    Failed(ConnectionFailure),
}

struct ConnectionTask {
    transport: Arc<dyn PushTransport>,
    credential: Credential,
    options: ConnectionOptions,
    timeouts: LinkTimeouts,
    publisher: StatePublisher,
    cmd_rx: mpsc::UnboundedReceiver<ConnCmd>,
    registry: ChannelSubscriptionRegistry,
}

/// Terminal failure for an open error, `None` when it is worth retrying.
fn classify_open_error(err: &LinkError) -> Option<ConnectionFailure> {
    match err {
        LinkError::AuthenticationError(message) => {
            Some(ConnectionFailure::new(FailureKind::Unauthorized, message.clone()))
        },
        LinkError::ServerError {
            status_code,
            message,
        } if CloseAction::from_code(*status_code) == Some(CloseAction::Fatal) => Some(
            ConnectionFailure::new(FailureKind::Protocol, format!("{} (code {})", message, status_code)),
        ),
        LinkError::ConfigurationError(message) => {
            Some(ConnectionFailure::new(FailureKind::Unreachable, message.clone()))
        },
        _ => None,
    }
}

/// How a session ends after the server reported `code`.
fn end_for_code(code: Option<u16>, message: &str) -> SessionEnd {
    match code.and_then(CloseAction::from_code) {
        Some(CloseAction::Fatal) => {
            let kind = if code == Some(UNAUTHORIZED_CODE) {
                FailureKind::Unauthorized
            } else {
                FailureKind::Protocol
            };
            SessionEnd::Failed(ConnectionFailure::new(kind, message))
        },
        Some(CloseAction::Immediate) => SessionEnd::Lost { immediate: true },
        Some(CloseAction::Backoff) | None => SessionEnd::Lost { immediate: false },
    }
}

impl ConnectionTask {
    async fn run(mut self, previous: Option<JoinHandle<()>>) {
        if let Some(previous) = previous {
            self.await_previous(previous).await;
        }

        let mut attempt: u32 = 0;
        loop {
            self.publisher.publish(ConnectionState::Connecting { attempt });

            let mut immediate = false;
            let failure = match self.open().await {
                OpenOutcome::Shutdown => {
                    self.shutdown(None).await;
                    return;
                },
                OpenOutcome::Opened(stream) => {
                    let opened_at = TokioInstant::now();
                    let end = self.run_session(stream).await;
                    self.registry.reset_status();
                    // Sessions that drop right away keep spending the budget
                    if opened_at.elapsed() >= self.options.stable_session() {
                        attempt = 0;
                    }
                    match end {
                        SessionEnd::Shutdown => return,
                        SessionEnd::Lost { immediate: now } => {
                            immediate = now;
                            None
                        },
                        SessionEnd::Failed(failure) => Some(failure),
                    }
                },
                OpenOutcome::Failed(err) => {
                    log::warn!(
                        "[jobdesk-link] Connection attempt {} failed: {}",
                        attempt,
                        err
                    );
                    let failure = classify_open_error(&err);
                    if failure.is_none() {
                        self.publisher
                            .emit_error(ConnectionError::new(err.to_string(), true));
                    }
                    failure
                },
            };

            if let Some(failure) = failure {
                if !self.park(failure).await {
                    return;
                }
                attempt = 0;
                continue;
            }

            attempt += 1;
            if !self.options.allows_attempt(attempt) {
                let message = if self.options.auto_reconnect {
                    format!("Gave up after {} reconnect attempt(s)", attempt - 1)
                } else {
                    "Connection lost and auto-reconnect is disabled".to_string()
                };
                if !self.park(ConnectionFailure::new(FailureKind::Unreachable, message)).await {
                    return;
                }
                attempt = 0;
                continue;
            }

            if immediate {
                log::info!("[jobdesk-link] Reconnecting now (attempt {})", attempt);
                continue;
            }

            let delay = self.options.backoff_delay(attempt);
            log::info!(
                "[jobdesk-link] Reconnecting in {:?} (attempt {})",
                delay,
                attempt
            );
            self.publisher.publish(ConnectionState::Connecting { attempt });
            if !self.sleep_offline(delay).await {
                return;
            }
        }
    }

    /// Let the previous connection finish its teardown before opening.
    async fn await_previous(&self, mut previous: JoinHandle<()>) {
        let grace = self.timeouts.teardown_grace;
        if tokio::time::timeout(grace, &mut previous).await.is_err() {
            log::warn!(
                "[jobdesk-link] Previous connection did not stop within {:?}; aborting it",
                grace
            );
            previous.abort();
            let _ = previous.await;
        }
    }

    /// Open the stream while still serving commands.
    async fn open(&mut self) -> OpenOutcome {
        let transport = Arc::clone(&self.transport);
        let credential = self.credential.clone();
        let open = async move { transport.open(&credential).await };
        tokio::pin!(open);

        loop {
            tokio::select! {
                biased;

                cmd = self.cmd_rx.recv() => {
                    match self.handle_offline(cmd) {
                        Offline::Continue | Offline::Reconnect => {},
                        Offline::Shutdown => return OpenOutcome::Shutdown,
                    }
                }

                result = &mut open => {
                    return match result {
                        Ok(stream) => OpenOutcome::Opened(stream),
                        Err(e) => OpenOutcome::Failed(e),
                    };
                }
            }
        }
    }

    /// Handle a command while no stream is open.
    fn handle_offline(&mut self, cmd: Option<ConnCmd>) -> Offline {
        match cmd {
            Some(ConnCmd::Subscribe {
                channel,
                event,
                listener,
                result_tx,
            }) => {
                let registration = self.registry.register(&channel, &event, listener);
                let _ = result_tx.send(registration.id);
                Offline::Continue
            },
            Some(ConnCmd::Unsubscribe { id }) => {
                self.registry.unregister(id);
                Offline::Continue
            },
            Some(ConnCmd::ListChannels { result_tx }) => {
                let _ = result_tx.send(self.registry.channels());
                Offline::Continue
            },
            Some(ConnCmd::Reconnect) => Offline::Reconnect,
            Some(ConnCmd::Shutdown) | None => Offline::Shutdown,
        }
    }

    /// Wait out a backoff delay. Returns `false` on shutdown.
    async fn sleep_offline(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;

                cmd = self.cmd_rx.recv() => {
                    match self.handle_offline(cmd) {
                        Offline::Continue => {},
                        Offline::Reconnect => return true,
                        Offline::Shutdown => {
                            self.shutdown(None).await;
                            return false;
                        },
                    }
                }

                _ = &mut sleep => return true,
            }
        }
    }

    /// Enter `errored` and wait for a manual reconnect. Returns `false` on
    /// shutdown.
    async fn park(&mut self, failure: ConnectionFailure) -> bool {
        log::warn!("[jobdesk-link] Connection errored: {}", failure);
        self.publisher
            .emit_error(ConnectionError::new(failure.to_string(), false));
        self.publisher.publish(ConnectionState::Errored(failure));

        loop {
            let cmd = self.cmd_rx.recv().await;
            match self.handle_offline(cmd) {
                Offline::Continue => {},
                Offline::Reconnect => {
                    log::info!("[jobdesk-link] Manual reconnect requested");
                    return true;
                },
                Offline::Shutdown => {
                    self.shutdown(None).await;
                    return false;
                },
            }
        }
    }

    /// Release every listener, unsubscribing physically when a stream is open.
    async fn shutdown(&mut self, stream: Option<&mut dyn PushStream>) {
        let channels = self.registry.release_all();
        if let Some(stream) = stream {
            for channel in &channels {
                if let Err(e) = stream.unsubscribe(channel).await {
                    log::debug!("[jobdesk-link] Unsubscribe of '{}' failed: {}", channel, e);
                }
            }
        }
        log::debug!(
            "[jobdesk-link] Connection task for user {} stopped",
            self.credential.user_id
        );
    }

    /// Subscribe one channel physically.
    async fn subscribe_channel(
        &mut self,
        stream: &mut dyn PushStream,
        channel: &str,
    ) -> Option<SessionEnd> {
        match stream.subscribe(channel).await {
            Ok(()) => {
                log::debug!("[jobdesk-link] Subscribe sent for '{}'", channel);
                self.registry.mark_requested(channel);
                None
            },
            Err(LinkError::AuthenticationError(message)) => {
                self.registry.mark_failed(channel);
                Some(SessionEnd::Failed(ConnectionFailure::new(
                    FailureKind::Unauthorized,
                    format!("Authorization of '{}' rejected: {}", channel, message),
                )))
            },
            Err(e) if e.is_transient() => {
                log::warn!("[jobdesk-link] Subscribe of '{}' failed: {}", channel, e);
                self.publisher.emit_error(ConnectionError::new(
                    format!("Failed to subscribe '{}': {}", channel, e),
                    true,
                ));
                Some(SessionEnd::Lost { immediate: false })
            },
            Err(e) => {
                log::warn!("[jobdesk-link] Subscribe of '{}' failed: {}", channel, e);
                self.registry.mark_failed(channel);
                self.publisher.emit_error(ConnectionError::new(
                    format!("Failed to subscribe '{}': {}", channel, e),
                    false,
                ));
                None
            },
        }
    }

    async fn release_channel(&mut self, stream: &mut dyn PushStream, channel: &str) {
        log::debug!("[jobdesk-link] Releasing channel '{}'", channel);
        if let Err(e) = stream.unsubscribe(channel).await {
            log::debug!("[jobdesk-link] Unsubscribe of '{}' failed: {}", channel, e);
        }
    }

    /// Subscribe every registered channel after a (re)connect.
    async fn resubscribe_all(&mut self, stream: &mut dyn PushStream) -> Option<SessionEnd> {
        let channels = self.registry.pending_channels();
        if channels.is_empty() {
            return None;
        }
        log::info!(
            "[jobdesk-link] Subscribing {} registered channel(s)",
            channels.len()
        );
        for channel in channels {
            if let Some(end) = self.subscribe_channel(stream, &channel).await {
                return Some(end);
            }
        }
        None
    }

    async fn end_session(
        &mut self,
        stream: &mut dyn PushStream,
        reason: DisconnectReason,
        end: SessionEnd,
    ) -> SessionEnd {
        self.publisher.emit_disconnect(reason);
        stream.close().await;
        end
    }

    async fn run_session(&mut self, mut stream: Box<dyn PushStream>) -> SessionEnd {
        let socket_id = stream.socket_id().to_string();
        log::info!("[jobdesk-link] Connected (socket {})", socket_id);
        self.publisher.publish(ConnectionState::Connected {
            socket_id: socket_id.clone(),
        });
        self.publisher.emit_connect(&socket_id);

        if let Some(end) = self.resubscribe_all(stream.as_mut()).await {
            let reason = DisconnectReason::new("Channel subscription failed");
            return self.end_session(stream.as_mut(), reason, end).await;
        }

        let has_keepalive = !self.timeouts.keepalive_interval.is_zero();
        let keepalive_dur = if has_keepalive {
            jitter_keepalive_interval(self.timeouts.keepalive_interval, &self.credential.user_id)
        } else {
            FAR_FUTURE
        };
        let pong_timeout_dur = self.timeouts.pong_timeout;
        let has_pong_timeout = has_keepalive && !pong_timeout_dur.is_zero();

        let mut idle_deadline = TokioInstant::now() + keepalive_dur;
        let mut awaiting_pong = false;
        let mut pong_deadline = TokioInstant::now() + FAR_FUTURE;

        loop {
            let idle_sleep = tokio::time::sleep_until(idle_deadline);
            tokio::pin!(idle_sleep);

            let pong_sleep = tokio::time::sleep_until(pong_deadline);
            tokio::pin!(pong_sleep);

            tokio::select! {
                biased;

                _ = &mut pong_sleep, if has_pong_timeout && awaiting_pong => {
                    log::warn!(
                        "[jobdesk-link] Pong timeout ({:?}), server unresponsive",
                        pong_timeout_dur
                    );
                    let reason = DisconnectReason::new(format!(
                        "Pong timeout ({:?})",
                        pong_timeout_dur
                    ));
                    return self
                        .end_session(stream.as_mut(), reason, SessionEnd::Lost { immediate: false })
                        .await;
                }

                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(ConnCmd::Subscribe { channel, event, listener, result_tx }) => {
                            let registration = self.registry.register(&channel, &event, listener);
                            let _ = result_tx.send(registration.id);
                            if registration.opens_channel {
                                if let Some(end) = self.subscribe_channel(stream.as_mut(), &channel).await {
                                    let reason = DisconnectReason::new("Channel subscription failed");
                                    return self.end_session(stream.as_mut(), reason, end).await;
                                }
                            }
                        },
                        Some(ConnCmd::Unsubscribe { id }) => {
                            if let Some(channel) = self.registry.unregister(id) {
                                self.release_channel(stream.as_mut(), &channel).await;
                            }
                        },
                        Some(ConnCmd::ListChannels { result_tx }) => {
                            let _ = result_tx.send(self.registry.channels());
                        },
                        Some(ConnCmd::Reconnect) => {
                            log::info!("[jobdesk-link] Reconnect requested while connected");
                            let reason = DisconnectReason::new("Reconnect requested");
                            return self
                                .end_session(stream.as_mut(), reason, SessionEnd::Lost { immediate: true })
                                .await;
                        },
                        Some(ConnCmd::Shutdown) | None => {
                            self.shutdown(Some(stream.as_mut())).await;
                            stream.close().await;
                            return SessionEnd::Shutdown;
                        },
                    }
                }

                _ = &mut idle_sleep, if has_keepalive && !awaiting_pong => {
                    if let Err(e) = stream.ping().await {
                        log::warn!("[jobdesk-link] Keepalive ping failed: {}", e);
                        let reason = DisconnectReason::new(format!("Keepalive ping failed: {}", e));
                        return self
                            .end_session(stream.as_mut(), reason, SessionEnd::Lost { immediate: false })
                            .await;
                    }
                    if has_pong_timeout {
                        awaiting_pong = true;
                        pong_deadline = TokioInstant::now() + pong_timeout_dur;
                    }
                    idle_deadline = TokioInstant::now() + keepalive_dur;
                }

                frame = stream.next_frame() => {
                    idle_deadline = TokioInstant::now() + keepalive_dur;
                    if awaiting_pong {
                        awaiting_pong = false;
                        pong_deadline = TokioInstant::now() + FAR_FUTURE;
                    }

                    match frame {
                        Some(Ok(Inbound::Event { channel, event, data })) => {
                            if !self.publisher.is_current() {
                                continue;
                            }
                            if let Some(released) = self.registry.dispatch(&channel, &event, &data) {
                                self.release_channel(stream.as_mut(), &released).await;
                            }
                        },
                        Some(Ok(Inbound::Subscribed { channel })) => {
                            log::info!("[jobdesk-link] Subscribed to '{}'", channel);
                            self.registry.mark_subscribed(&channel);
                        },
                        Some(Ok(Inbound::SubscriptionFailed { channel, status, message })) => {
                            log::warn!(
                                "[jobdesk-link] Subscription to '{}' refused (status {:?}): {}",
                                channel, status, message
                            );
                            self.registry.mark_failed(&channel);
                            self.publisher.emit_error(ConnectionError::new(
                                format!("Subscription to '{}' refused: {}", channel, message),
                                false,
                            ));
                        },
                        Some(Ok(Inbound::Ping)) => {
                            if let Err(e) = stream.pong().await {
                                log::warn!("[jobdesk-link] Failed to answer ping: {}", e);
                            }
                        },
                        Some(Ok(Inbound::Pong)) => {
                            log::debug!("[jobdesk-link] Keepalive: received pong");
                        },
                        Some(Ok(Inbound::Error { code, message })) => {
                            if code.and_then(CloseAction::from_code).is_none() {
                                log::warn!("[jobdesk-link] Server error {:?}: {}", code, message);
                                self.publisher.emit_error(ConnectionError::new(message, true));
                                continue;
                            }
                            let end = end_for_code(code, &message);
                            let reason = match code {
                                Some(c) => DisconnectReason::with_code(message, c),
                                None => DisconnectReason::new(message),
                            };
                            return self.end_session(stream.as_mut(), reason, end).await;
                        },
                        Some(Ok(Inbound::Closed { code, reason })) => {
                            let end = end_for_code(code, &reason);
                            let reason = match code {
                                Some(c) => DisconnectReason::with_code(reason, c),
                                None => DisconnectReason::new(reason),
                            };
                            return self.end_session(stream.as_mut(), reason, end).await;
                        },
                        Some(Err(e)) => {
                            self.publisher.emit_error(ConnectionError::new(e.to_string(), true));
                            let reason = DisconnectReason::new(format!("Push stream error: {}", e));
                            return self
                                .end_session(stream.as_mut(), reason, SessionEnd::Lost { immediate: false })
                                .await;
                        },
                        None => {
                            self.publisher.emit_disconnect(DisconnectReason::new("Push stream ended"));
                            return SessionEnd::Lost { immediate: false };
                        },
                    }
                }
            }
        }
    }
}
