//! Reconnecting streaming channels keyed by session/file.
//!
//! Each channel runs as one cooperative task owning its transport: a select
//! loop over inbound frames, outbound sends, heartbeat ticks and
//! cancellation. Abnormal closes and stale links reconnect with exponential
//! backoff until the attempt budget is spent, at which point the caller is
//! told to fall back to polling.

pub mod transport;

pub use transport::{Connector, Transport, TransportEvent, WsConnector};

use crate::error::SyncError;
use crate::protocol::{ClientMessage, ServerMessage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
// tokio's Instant so staleness detection follows the runtime clock
// (pausable in tests)
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use transport::{is_normal_close, CLOSE_ABNORMAL};

/// Lifecycle of one channel. `Disconnected` is both the initial and the
/// terminal state; only a successful open resets the attempt counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub heartbeat_interval: Duration,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            max_reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_millis(1000),
            reconnect_max_delay: Duration::from_millis(10000),
        }
    }
}

/// Callbacks into the consumer. Inbound traffic arrives as one typed
/// [`ServerMessage`] through `on_message`; match it exhaustively.
#[async_trait::async_trait]
pub trait ChannelEvents: Send + Sync {
    async fn on_message(&self, key: &str, message: ServerMessage);

    /// Raw frame tap, fired before parsing. Useful for debug logs.
    async fn on_frame(&self, _key: &str, _raw: &str) {}

    async fn on_open(&self, _key: &str) {}

    /// Transport-initiated close. Reconnection is handled internally; this
    /// is informational.
    async fn on_close(&self, _key: &str, _code: u16) {}

    /// Transport or protocol fault. Does not by itself tear the channel
    /// down.
    async fn on_error(&self, _key: &str, _error: &SyncError) {}

    /// The reconnect budget is spent and the channel is terminally
    /// disconnected. Callers switch to polling here.
    async fn on_reconnect_exhausted(&self, _key: &str) {}
}

/// Observable per-channel cell shared between the facade and the task.
struct ChannelShared {
    state: Mutex<ChannelState>,
    attempts: AtomicU32,
    last_activity: Mutex<Instant>,
    last_error: Mutex<Option<String>>,
}

impl ChannelShared {
    fn new() -> Self {
        Self {
            state: Mutex::new(ChannelState::Disconnected),
            attempts: AtomicU32::new(0),
            last_activity: Mutex::new(Instant::now()),
            last_error: Mutex::new(None),
        }
    }

    fn set_state(&self, state: ChannelState) {
        *self.state.lock().unwrap() = state;
    }

    fn state(&self) -> ChannelState {
        *self.state.lock().unwrap()
    }

    fn touch(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_activity.lock().unwrap().elapsed()
    }

    fn record_error(&self, error: &SyncError) {
        *self.last_error.lock().unwrap() = Some(error.to_string());
    }
}

struct Channel {
    shared: Arc<ChannelShared>,
    outbound_tx: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

struct Registry {
    connector: Arc<dyn Connector>,
    config: ChannelConfig,
    channels: Mutex<HashMap<String, Channel>>,
}

impl Registry {
    /// Remove the entry for `key`, but only if it still belongs to the task
    /// asking — an idempotent replace may have put a newer channel there.
    fn remove_if_current(&self, key: &str, shared: &Arc<ChannelShared>) {
        let mut channels = self.channels.lock().unwrap();
        if let Some(channel) = channels.get(key) {
            if Arc::ptr_eq(&channel.shared, shared) {
                channels.remove(key);
            }
        }
    }
}

/// Owns every streaming channel. Construct once, share by reference, and
/// call [`ChannelManager::disconnect_all`] at teardown.
pub struct ChannelManager {
    registry: Arc<Registry>,
}

impl ChannelManager {
    pub fn new(config: ChannelConfig) -> Self {
        Self::with_connector(Arc::new(WsConnector), config)
    }

    pub fn with_connector(connector: Arc<dyn Connector>, config: ChannelConfig) -> Self {
        Self {
            registry: Arc::new(Registry {
                connector,
                config,
                channels: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Opens a channel for `key`, replacing (and closing) any existing one.
    /// Returns immediately; the open completes in the channel task and is
    /// reported through `events.on_open`.
    pub fn connect(&self, key: &str, url: &str, events: Arc<dyn ChannelEvents>) {
        self.disconnect(key);

        let shared = Arc::new(ChannelShared::new());
        let cancel = CancellationToken::new();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        log::info!("📡 Opening channel '{}' -> {}", key, url);
        // Register before spawning so the task can always find (and on a
        // normal close, remove) its own record.
        self.registry.channels.lock().unwrap().insert(
            key.to_string(),
            Channel {
                shared: Arc::clone(&shared),
                outbound_tx,
                cancel: cancel.clone(),
            },
        );
        tokio::spawn(run_channel(
            key.to_string(),
            url.to_string(),
            Arc::clone(&self.registry),
            shared,
            events,
            outbound_rx,
            cancel,
        ));
    }

    /// Serializes and queues `message` if the channel is currently
    /// connected. Returns `false` otherwise — callers decide whether to
    /// buffer or drop.
    pub fn send(&self, key: &str, message: &ClientMessage) -> bool {
        let channels = self.registry.channels.lock().unwrap();
        let Some(channel) = channels.get(key) else {
            return false;
        };
        if channel.shared.state() != ChannelState::Connected {
            return false;
        }
        match serde_json::to_string(message) {
            Ok(text) => channel.outbound_tx.send(text).is_ok(),
            Err(e) => {
                log::warn!("Failed to serialize outbound message: {}", e);
                false
            }
        }
    }

    /// Manual, terminal disconnect: cancels any pending reconnect, closes
    /// the transport with a normal code and drops the record. No-op for
    /// unknown keys.
    pub fn disconnect(&self, key: &str) {
        let removed = self.registry.channels.lock().unwrap().remove(key);
        if let Some(channel) = removed {
            log::info!("🔌 Disconnecting channel '{}'", key);
            channel.cancel.cancel();
        }
    }

    /// Tears down every channel. Used at process shutdown.
    pub fn disconnect_all(&self) {
        let channels: Vec<(String, Channel)> =
            self.registry.channels.lock().unwrap().drain().collect();
        for (key, channel) in channels {
            log::info!("🔌 Disconnecting channel '{}'", key);
            channel.cancel.cancel();
        }
    }

    pub fn state(&self, key: &str) -> ChannelState {
        self.registry
            .channels
            .lock()
            .unwrap()
            .get(key)
            .map(|channel| channel.shared.state())
            .unwrap_or(ChannelState::Disconnected)
    }

    pub fn is_connected(&self, key: &str) -> bool {
        self.state(key) == ChannelState::Connected
    }

    pub fn reconnect_attempts(&self, key: &str) -> u32 {
        self.registry
            .channels
            .lock()
            .unwrap()
            .get(key)
            .map(|channel| channel.shared.attempts.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Number of registered channels (any state).
    pub fn channel_count(&self) -> usize {
        self.registry.channels.lock().unwrap().len()
    }

    pub fn last_error(&self, key: &str) -> Option<String> {
        self.registry
            .channels
            .lock()
            .unwrap()
            .get(key)
            .and_then(|channel| channel.shared.last_error.lock().unwrap().clone())
    }
}

fn reconnect_delay(config: &ChannelConfig, attempts: u32) -> Duration {
    let factor = 1u64 << attempts.min(20);
    let millis = (config.reconnect_base_delay.as_millis() as u64).saturating_mul(factor);
    Duration::from_millis(millis.min(config.reconnect_max_delay.as_millis() as u64))
}

enum DriveOutcome {
    Cancelled,
    Closed { code: u16, reason: String },
    Stale,
}

enum Step {
    Cancelled,
    Outbound(Option<String>),
    Inbound(Option<TransportEvent>),
    Heartbeat,
}

async fn run_channel(
    key: String,
    url: String,
    registry: Arc<Registry>,
    shared: Arc<ChannelShared>,
    events: Arc<dyn ChannelEvents>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) {
    loop {
        shared.set_state(ChannelState::Connecting);

        let dialed = tokio::select! {
            _ = cancel.cancelled() => {
                shared.set_state(ChannelState::Disconnected);
                return;
            }
            dialed = registry.connector.dial(&url) => dialed,
        };

        match dialed {
            Ok(mut transport) => {
                log::info!("✅ Channel '{}' connected", key);
                shared.set_state(ChannelState::Connected);
                shared.attempts.store(0, Ordering::SeqCst);
                shared.touch();
                events.on_open(&key).await;

                let outcome = drive(
                    &key,
                    transport.as_mut(),
                    &registry.config,
                    &shared,
                    events.as_ref(),
                    &mut outbound_rx,
                    &cancel,
                )
                .await;

                match outcome {
                    DriveOutcome::Cancelled => {
                        transport.close().await;
                        shared.set_state(ChannelState::Disconnected);
                        return;
                    }
                    DriveOutcome::Closed { code, reason } => {
                        log::info!(
                            "🔚 Channel '{}' closed by peer (code {}, reason '{}')",
                            key,
                            code,
                            reason
                        );
                        events.on_close(&key, code).await;
                        if is_normal_close(code) {
                            shared.set_state(ChannelState::Disconnected);
                            registry.remove_if_current(&key, &shared);
                            return;
                        }
                    }
                    DriveOutcome::Stale => {
                        log::warn!("💤 Channel '{}' went stale, forcing reconnect", key);
                        transport.close().await;
                    }
                }
            }
            Err(e) => {
                log::warn!("❌ Channel '{}' dial failed: {}", key, e);
                shared.record_error(&e);
                events.on_error(&key, &e).await;
            }
        }

        let attempts = shared.attempts.load(Ordering::SeqCst);
        if attempts >= registry.config.max_reconnect_attempts {
            log::error!(
                "🛑 Channel '{}' gave up after {} reconnect attempts",
                key,
                attempts
            );
            let exhausted = SyncError::Exhausted { attempts };
            shared.record_error(&exhausted);
            shared.set_state(ChannelState::Disconnected);
            events.on_reconnect_exhausted(&key).await;
            return;
        }

        let delay = reconnect_delay(&registry.config, attempts);
        shared.attempts.fetch_add(1, Ordering::SeqCst);
        shared.set_state(ChannelState::Reconnecting);
        log::info!(
            "🔄 Channel '{}' reconnecting in {:?} (attempt {}/{})",
            key,
            delay,
            attempts + 1,
            registry.config.max_reconnect_attempts
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                shared.set_state(ChannelState::Disconnected);
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// The connected phase: pump inbound/outbound traffic until the peer closes,
/// the link goes stale, or the channel is cancelled.
async fn drive(
    key: &str,
    transport: &mut dyn Transport,
    config: &ChannelConfig,
    shared: &ChannelShared,
    events: &dyn ChannelEvents,
    outbound_rx: &mut mpsc::UnboundedReceiver<String>,
    cancel: &CancellationToken,
) -> DriveOutcome {
    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await; // the first tick fires immediately

    loop {
        // Only the inbound arm borrows the transport; sends happen after
        // the select resolves.
        let step = tokio::select! {
            _ = cancel.cancelled() => Step::Cancelled,
            outbound = outbound_rx.recv() => Step::Outbound(outbound),
            event = transport.next_event() => Step::Inbound(event),
            _ = heartbeat.tick() => Step::Heartbeat,
        };

        match step {
            Step::Cancelled => return DriveOutcome::Cancelled,
            Step::Outbound(Some(text)) => {
                if let Err(e) = transport.send_text(text).await {
                    log::warn!("⚠️ Channel '{}' send failed: {}", key, e);
                    shared.record_error(&e);
                    events.on_error(key, &e).await;
                }
            }
            // Sender side dropped: this task has been replaced or torn down.
            Step::Outbound(None) => return DriveOutcome::Cancelled,
            Step::Inbound(Some(TransportEvent::Text(text))) => {
                shared.touch();
                events.on_frame(key, &text).await;
                dispatch(key, &text, events).await;
            }
            Step::Inbound(Some(TransportEvent::Closed { code, reason })) => {
                return DriveOutcome::Closed { code, reason };
            }
            Step::Inbound(Some(TransportEvent::Error(message))) => {
                // Errors surface but don't close the channel; the close
                // event owns that decision.
                let error = SyncError::Connectivity(message);
                log::warn!("⚠️ Channel '{}' transport error: {}", key, error);
                shared.record_error(&error);
                events.on_error(key, &error).await;
            }
            Step::Inbound(None) => {
                // Stream ended without a close frame
                return DriveOutcome::Closed {
                    code: CLOSE_ABNORMAL,
                    reason: String::new(),
                };
            }
            Step::Heartbeat => {
                if shared.idle_for() >= config.heartbeat_interval * 2 {
                    return DriveOutcome::Stale;
                }
                match serde_json::to_string(&ClientMessage::ping_now()) {
                    Ok(ping) => {
                        log::trace!("🏓 Channel '{}' ping", key);
                        if let Err(e) = transport.send_text(ping).await {
                            log::warn!("⚠️ Channel '{}' ping failed: {}", key, e);
                            shared.record_error(&e);
                            events.on_error(key, &e).await;
                        }
                    }
                    Err(e) => log::warn!("Failed to serialize ping: {}", e),
                }
            }
        }
    }
}

/// Parse one frame and hand it to the consumer. A malformed payload is
/// reported, never fatal.
async fn dispatch(key: &str, text: &str, events: &dyn ChannelEvents) {
    match serde_json::from_str::<ServerMessage>(text) {
        Ok(message) => {
            log::debug!("📨 Channel '{}' message: {:?}", key, message);
            events.on_message(key, message).await;
        }
        Err(e) => {
            let error = SyncError::Protocol(format!("Malformed frame: {}", e));
            log::warn!("⚠️ Channel '{}': {} (raw: {})", key, error, text);
            events.on_error(key, &error).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_delay_doubles_up_to_cap() {
        let config = ChannelConfig::default();
        let delays: Vec<u64> = (0..6)
            .map(|attempts| reconnect_delay(&config, attempts).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 10000, 10000]);
    }

    #[test]
    fn test_unknown_key_observability() {
        let manager = ChannelManager::new(ChannelConfig::default());
        assert_eq!(manager.state("nope"), ChannelState::Disconnected);
        assert!(!manager.is_connected("nope"));
        assert_eq!(manager.reconnect_attempts("nope"), 0);
        assert!(manager.last_error("nope").is_none());
    }
}
