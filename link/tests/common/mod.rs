//! Shared fixtures for the integration tests: an in-memory push transport,
//! a fake REST API, and small async helpers.

#![allow(dead_code)]

use async_trait::async_trait;
use jobdesk_link::{
    connection::Inbound,
    models::ChannelAuthResponse,
    ConnectionState, Credential, DashboardApi, LinkError, LinkTimeouts, NotificationSettings,
    PushStream, PushTransport, Result,
};
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Upper bound for anything the tests wait on.
pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn credential(user: &str) -> Credential {
    Credential::new(format!("token-{}", user), user)
}

/// Short timeouts with keepalive disabled so tests never see pings.
pub fn test_timeouts() -> LinkTimeouts {
    LinkTimeouts::builder()
        .keepalive_interval(Duration::ZERO)
        .teardown_grace(Duration::from_millis(500))
        .build()
}

/// Poll `check` until it holds or [`WAIT`] elapses.
pub async fn wait_until<F: FnMut() -> bool>(mut check: F) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Wait for a state matching `pred` on a watch receiver.
pub async fn wait_for_state<F>(rx: &mut watch::Receiver<ConnectionState>, pred: F) -> ConnectionState
where
    F: Fn(&ConnectionState) -> bool,
{
    let state = tokio::time::timeout(WAIT, rx.wait_for(|s| pred(s)))
        .await
        .expect("timed out waiting for connection state")
        .expect("state channel closed");
    state.clone()
}

pub async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(WAIT, fut)
        .await
        .expect("operation timed out")
}

// ── In-memory transport ─────────────────────────────────────────────────────

#[derive(Default)]
struct MockState {
    opens: usize,
    opened_for: Vec<Credential>,
    live: usize,
    max_live: usize,
    scripted_failures: VecDeque<LinkError>,
    subscribe_failures: VecDeque<LinkError>,
    current: Option<mpsc::UnboundedSender<Inbound>>,
    subscribes: Vec<String>,
    unsubscribes: Vec<String>,
    pings: usize,
    swallow_pongs: bool,
    close_every_session: Option<u16>,
}

/// [`PushTransport`] whose streams are driven by the test.
///
/// Every `open` yields a fresh stream unless a failure was scripted with
/// [`MockTransport::fail_next_open`]. Subscribes are acknowledged
/// immediately and pings answered with a pong unless
/// [`MockTransport::swallow_pongs`] was called.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_open(&self, err: LinkError) {
        self.state.lock().unwrap().scripted_failures.push_back(err);
    }

    pub fn fail_next_subscribe(&self, err: LinkError) {
        self.state.lock().unwrap().subscribe_failures.push_back(err);
    }

    /// Leave client pings unanswered.
    pub fn swallow_pongs(&self) {
        self.state.lock().unwrap().swallow_pongs = true;
    }

    /// Close every stream right after it opens, with `code`.
    pub fn close_every_session(&self, code: u16) {
        self.state.lock().unwrap().close_every_session = Some(code);
    }

    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().opens
    }

    pub fn opened_for(&self) -> Vec<Credential> {
        self.state.lock().unwrap().opened_for.clone()
    }

    /// Streams currently open.
    pub fn live(&self) -> usize {
        self.state.lock().unwrap().live
    }

    /// Most streams ever open at the same time.
    pub fn max_live(&self) -> usize {
        self.state.lock().unwrap().max_live
    }

    pub fn subscribes(&self) -> Vec<String> {
        self.state.lock().unwrap().subscribes.clone()
    }

    pub fn unsubscribes(&self) -> Vec<String> {
        self.state.lock().unwrap().unsubscribes.clone()
    }

    pub fn pings(&self) -> usize {
        self.state.lock().unwrap().pings
    }

    fn inject(&self, frame: Inbound) -> bool {
        match self.state.lock().unwrap().current.as_ref() {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    /// Deliver an application event on the current stream.
    pub fn emit(&self, channel: &str, event: &str, data: JsonValue) -> bool {
        self.inject(Inbound::Event {
            channel: channel.to_string(),
            event: event.to_string(),
            data,
        })
    }

    /// Server-side close of the current stream.
    pub fn close_current(&self, code: Option<u16>, reason: &str) -> bool {
        self.inject(Inbound::Closed {
            code,
            reason: reason.to_string(),
        })
    }

    pub fn server_error(&self, code: Option<u16>, message: &str) -> bool {
        self.inject(Inbound::Error {
            code,
            message: message.to_string(),
        })
    }
}

#[async_trait]
impl PushTransport for MockTransport {
    async fn open(&self, credential: &Credential) -> Result<Box<dyn PushStream>> {
        let mut state = self.state.lock().unwrap();
        state.opens += 1;
        state.opened_for.push(credential.clone());
        if let Some(err) = state.scripted_failures.pop_front() {
            return Err(err);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(code) = state.close_every_session {
            let _ = tx.send(Inbound::Closed {
                code: Some(code),
                reason: "Closed by server".to_string(),
            });
        }
        state.current = Some(tx.clone());
        state.live += 1;
        state.max_live = state.max_live.max(state.live);

        Ok(Box::new(MockStream {
            socket_id: format!("{}.{}", state.opens, state.opens * 7),
            tx,
            rx,
            state: Arc::clone(&self.state),
            closed: false,
        }))
    }
}

struct MockStream {
    socket_id: String,
    tx: mpsc::UnboundedSender<Inbound>,
    rx: mpsc::UnboundedReceiver<Inbound>,
    state: Arc<Mutex<MockState>>,
    closed: bool,
}

impl MockStream {
    fn mark_closed(&mut self) {
        if !self.closed {
            self.closed = true;
            self.state.lock().unwrap().live -= 1;
        }
    }
}

#[async_trait]
impl PushStream for MockStream {
    fn socket_id(&self) -> &str {
        &self.socket_id
    }

    async fn subscribe(&mut self, channel: &str) -> Result<()> {
        let failure = {
            let mut state = self.state.lock().unwrap();
            state.subscribes.push(channel.to_string());
            state.subscribe_failures.pop_front()
        };
        if let Some(err) = failure {
            return Err(err);
        }
        let _ = self.tx.send(Inbound::Subscribed {
            channel: channel.to_string(),
        });
        Ok(())
    }

    async fn unsubscribe(&mut self, channel: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .unsubscribes
            .push(channel.to_string());
        Ok(())
    }

    async fn ping(&mut self) -> Result<()> {
        let swallow = {
            let mut state = self.state.lock().unwrap();
            state.pings += 1;
            state.swallow_pongs
        };
        if !swallow {
            let _ = self.tx.send(Inbound::Pong);
        }
        Ok(())
    }

    async fn pong(&mut self) -> Result<()> {
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<Result<Inbound>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.mark_closed();
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        self.mark_closed();
    }
}

// ── Fake REST API ───────────────────────────────────────────────────────────

/// [`DashboardApi`] with scripted answers.
pub struct FakeApi {
    unread: Mutex<Result<u64>>,
    settings: Mutex<Result<NotificationSettings>>,
    unread_calls: AtomicUsize,
    settings_calls: AtomicUsize,
}

impl Default for FakeApi {
    fn default() -> Self {
        Self {
            unread: Mutex::new(Ok(0)),
            settings: Mutex::new(Ok(NotificationSettings::default())),
            unread_calls: AtomicUsize::new(0),
            settings_calls: AtomicUsize::new(0),
        }
    }
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unread(&self, count: u64) {
        *self.unread.lock().unwrap() = Ok(count);
    }

    pub fn fail_unread(&self, err: LinkError) {
        *self.unread.lock().unwrap() = Err(err);
    }

    pub fn set_realtime_alerts(&self, enabled: bool) {
        *self.settings.lock().unwrap() = Ok(NotificationSettings {
            real_time_alerts: enabled,
        });
    }

    pub fn fail_settings(&self, err: LinkError) {
        *self.settings.lock().unwrap() = Err(err);
    }

    pub fn unread_calls(&self) -> usize {
        self.unread_calls.load(Ordering::SeqCst)
    }

    pub fn settings_calls(&self) -> usize {
        self.settings_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DashboardApi for FakeApi {
    async fn fetch_unread_count(&self, _credential: &Credential) -> Result<u64> {
        self.unread_calls.fetch_add(1, Ordering::SeqCst);
        self.unread.lock().unwrap().clone()
    }

    async fn fetch_notification_settings(
        &self,
        _credential: &Credential,
    ) -> Result<NotificationSettings> {
        self.settings_calls.fetch_add(1, Ordering::SeqCst);
        self.settings.lock().unwrap().clone()
    }

    async fn authorize_channel(
        &self,
        _credential: &Credential,
        socket_id: &str,
        wire_channel: &str,
    ) -> Result<ChannelAuthResponse> {
        Ok(ChannelAuthResponse {
            auth: format!("test-key:{}:{}", socket_id, wire_channel),
            channel_data: None,
        })
    }
}
