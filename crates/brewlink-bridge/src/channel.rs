/*!
 * Persistent message channel for one machine controller.
 *
 * Each device session owns exactly one channel: a long-lived,
 * message-oriented WebSocket connection that reconnects autonomously on any
 * failure. The advertised hostname is re-resolved through the resolution
 * hook immediately before every connection attempt, so address changes are
 * picked up on reconnect. Callers never observe a permanently failed
 * terminal state short of an explicit `close()`.
 */
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};

use crate::error::{BridgeError, Result};
use crate::resolver::Resolve;

/// Connection state of a message channel.
///
/// Owned exclusively by the channel; sessions observe it but never mutate
/// it. `Closing` is reachable only through explicit shutdown and is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// No connection; the reconnect loop will retry after backoff
    Disconnected,
    /// The resolution hook is being invoked for the next attempt
    Resolving,
    /// A connection handshake is in progress
    Connecting,
    /// The connection is established and usable
    Connected,
    /// The channel has been explicitly shut down
    Closing,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelState::Disconnected => "disconnected",
            ChannelState::Resolving => "resolving",
            ChannelState::Connecting => "connecting",
            ChannelState::Connected => "connected",
            ChannelState::Closing => "closing",
        };
        write!(f, "{}", s)
    }
}

/// Event emitted by a message channel
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// The connection state changed
    StateChanged {
        /// The previous state
        old: ChannelState,
        /// The new state
        new: ChannelState,
    },
    /// A successfully decoded inbound payload
    Message(serde_json::Value),
}

/// Options controlling channel timing and buffering
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Timeout for the connection handshake
    pub handshake_timeout: Duration,
    /// Delay before the first reconnect attempt after a failure
    pub initial_backoff: Duration,
    /// Upper bound for the exponential backoff schedule
    pub max_backoff: Duration,
    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
    /// Capacity of the outbound send queue
    pub outbound_capacity: usize,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            event_capacity: 64,
            outbound_capacity: 32,
        }
    }
}

/// Explicit state machine driven by the connection-layer callbacks.
///
/// Keeping the transition table in one place makes the states independently
/// testable without a live network.
#[derive(Debug)]
struct StateMachine {
    state: ChannelState,
    events: broadcast::Sender<ChannelEvent>,
}

impl StateMachine {
    fn new(events: broadcast::Sender<ChannelEvent>) -> Self {
        Self {
            state: ChannelState::Disconnected,
            events,
        }
    }

    fn state(&self) -> ChannelState {
        self.state
    }

    /// Check whether a transition is legal
    fn allowed(from: ChannelState, to: ChannelState) -> bool {
        use ChannelState::*;
        match (from, to) {
            (Closing, _) => false,
            (_, Closing) => true,
            (Disconnected, Resolving) => true,
            (Resolving, Connecting) | (Resolving, Disconnected) => true,
            (Connecting, Connected) | (Connecting, Disconnected) => true,
            (Connected, Disconnected) => true,
            _ => false,
        }
    }

    /// Apply a transition, emitting a status event on success
    fn transition(&mut self, next: ChannelState) -> bool {
        if !Self::allowed(self.state, next) {
            warn!("Ignoring illegal transition {} -> {}", self.state, next);
            return false;
        }

        let old = self.state;
        self.state = next;
        debug!("Channel state {} -> {}", old, next);
        let _ = self.events.send(ChannelEvent::StateChanged { old, new: next });
        true
    }
}

/// A persistent, auto-reconnecting message channel
pub struct MessageChannel {
    machine: Arc<Mutex<StateMachine>>,
    events: broadcast::Sender<ChannelEvent>,
    outbound: mpsc::Sender<String>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for MessageChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageChannel")
            .field("state", &self.state())
            .finish()
    }
}

impl MessageChannel {
    /// Spawn a channel for the given host and port.
    ///
    /// The resolution hook is invoked before every connection attempt, and
    /// the reconnect loop runs until `close()` is called or the channel is
    /// dropped.
    pub fn spawn(
        resolver: Arc<dyn Resolve>,
        host: impl Into<String>,
        port: u16,
        options: ChannelOptions,
    ) -> Self {
        let host = host.into();
        let (events, _) = broadcast::channel(options.event_capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(options.outbound_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let machine = Arc::new(Mutex::new(StateMachine::new(events.clone())));

        let task = tokio::spawn(run(
            Arc::clone(&machine),
            events.clone(),
            resolver,
            host,
            port,
            options,
            outbound_rx,
            shutdown_rx,
        ));

        Self {
            machine,
            events,
            outbound: outbound_tx,
            shutdown: shutdown_tx,
            task: Mutex::new(Some(task)),
        }
    }

    /// Get the current connection state
    pub fn state(&self) -> ChannelState {
        self.machine
            .lock()
            .map(|m| m.state())
            .unwrap_or(ChannelState::Disconnected)
    }

    /// Check whether the channel is currently connected
    pub fn is_connected(&self) -> bool {
        self.state() == ChannelState::Connected
    }

    /// Subscribe to channel events
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    /// Serialize a payload and enqueue it for transmission.
    ///
    /// Fails immediately when the channel is not connected; payloads are
    /// never buffered across a disconnect.
    pub fn send<T: Serialize>(&self, payload: &T) -> Result<()> {
        if !self.is_connected() {
            return Err(BridgeError::DeviceUnreachable);
        }

        let text = serde_json::to_string(payload)?;
        self.outbound.try_send(text).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                BridgeError::Connection("Outbound queue full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => BridgeError::ChannelClosed,
        })
    }

    /// Shut the channel down and wait for its task to finish.
    ///
    /// The channel transitions to the terminal `Closing` state; it never
    /// reconnects afterwards.
    pub async fn close(&self) {
        let _ = self.shutdown.send(true);
        let task = self.task.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

/// Apply a transition on the shared state machine
fn transition(machine: &Arc<Mutex<StateMachine>>, next: ChannelState) {
    if let Ok(mut machine) = machine.lock() {
        machine.transition(next);
    }
}

/// Wait out a backoff delay; returns true if shutdown was requested
async fn backoff_wait(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = shutdown.changed() => true,
    }
}

/// The reconnect loop: Disconnected -> Resolving -> Connecting -> Connected
/// and back on any failure, indefinitely, until shutdown.
#[allow(clippy::too_many_arguments)]
async fn run(
    machine: Arc<Mutex<StateMachine>>,
    events: broadcast::Sender<ChannelEvent>,
    resolver: Arc<dyn Resolve>,
    host: String,
    port: u16,
    options: ChannelOptions,
    mut outbound: mpsc::Receiver<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = options.initial_backoff;

    'reconnect: loop {
        if *shutdown.borrow() {
            break;
        }

        transition(&machine, ChannelState::Resolving);

        let resolved = tokio::select! {
            resolved = resolver.resolve(&host) => resolved,
            _ = shutdown.changed() => break 'reconnect,
        };

        let address = match resolved {
            Ok(address) => address,
            Err(e) => {
                warn!("Failed to resolve {}: {}", host, e);
                transition(&machine, ChannelState::Disconnected);
                if backoff_wait(&mut shutdown, backoff).await {
                    break 'reconnect;
                }
                backoff = (backoff * 2).min(options.max_backoff);
                continue;
            }
        };

        transition(&machine, ChannelState::Connecting);

        let url = format!("ws://{}", SocketAddr::new(address, port));
        let connected = tokio::select! {
            connected = timeout(options.handshake_timeout, connect_async(&url)) => connected,
            _ = shutdown.changed() => break 'reconnect,
        };

        let stream = match connected {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => {
                warn!("Failed to connect to {}: {}", url, e);
                transition(&machine, ChannelState::Disconnected);
                if backoff_wait(&mut shutdown, backoff).await {
                    break 'reconnect;
                }
                backoff = (backoff * 2).min(options.max_backoff);
                continue;
            }
            Err(_) => {
                warn!(
                    "Handshake with {} timed out after {:?}",
                    url, options.handshake_timeout
                );
                transition(&machine, ChannelState::Disconnected);
                if backoff_wait(&mut shutdown, backoff).await {
                    break 'reconnect;
                }
                backoff = (backoff * 2).min(options.max_backoff);
                continue;
            }
        };

        transition(&machine, ChannelState::Connected);
        backoff = options.initial_backoff;

        let (mut sink, mut source) = stream.split();

        loop {
            tokio::select! {
                inbound = source.next() => match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<serde_json::Value>(&text) {
                            Ok(payload) => {
                                let _ = events.send(ChannelEvent::Message(payload));
                            }
                            Err(e) => trace!("Dropping undecodable frame: {}", e),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Connection to {} closed by peer", url);
                        break;
                    }
                    Some(Ok(other)) => trace!("Ignoring non-text frame: {:?}", other),
                    Some(Err(e)) => {
                        warn!("Socket error on {}: {}", url, e);
                        break;
                    }
                },
                queued = outbound.recv() => match queued {
                    Some(text) => {
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            warn!("Failed to send on {}: {}", url, e);
                            break;
                        }
                    }
                    None => break 'reconnect,
                },
                _ = shutdown.changed() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break 'reconnect;
                }
            }
        }

        transition(&machine, ChannelState::Disconnected);

        // Payloads enqueued in the window before the disconnect was observed
        // are stale by the time a new connection exists; drop them.
        while outbound.try_recv().is_ok() {}

        if backoff_wait(&mut shutdown, backoff).await {
            break 'reconnect;
        }
        backoff = (backoff * 2).min(options.max_backoff);
    }

    transition(&machine, ChannelState::Closing);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> StateMachine {
        let (events, _) = broadcast::channel(16);
        StateMachine::new(events)
    }

    #[test]
    fn test_initial_state() {
        assert_eq!(machine().state(), ChannelState::Disconnected);
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut m = machine();
        assert!(m.transition(ChannelState::Resolving));
        assert!(m.transition(ChannelState::Connecting));
        assert!(m.transition(ChannelState::Connected));
        assert!(m.transition(ChannelState::Disconnected));
        assert!(m.transition(ChannelState::Resolving));
        assert_eq!(m.state(), ChannelState::Resolving);
    }

    #[test]
    fn test_failure_transitions() {
        let mut m = machine();
        assert!(m.transition(ChannelState::Resolving));
        // Resolution failure
        assert!(m.transition(ChannelState::Disconnected));
        assert!(m.transition(ChannelState::Resolving));
        assert!(m.transition(ChannelState::Connecting));
        // Handshake failure
        assert!(m.transition(ChannelState::Disconnected));
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let mut m = machine();
        assert!(!m.transition(ChannelState::Connected));
        assert!(!m.transition(ChannelState::Connecting));
        assert_eq!(m.state(), ChannelState::Disconnected);

        assert!(m.transition(ChannelState::Resolving));
        assert!(!m.transition(ChannelState::Connected));
        assert_eq!(m.state(), ChannelState::Resolving);
    }

    #[test]
    fn test_closing_is_terminal() {
        let mut m = machine();
        assert!(m.transition(ChannelState::Closing));
        assert!(!m.transition(ChannelState::Resolving));
        assert!(!m.transition(ChannelState::Disconnected));
        assert_eq!(m.state(), ChannelState::Closing);
    }

    #[test]
    fn test_closing_reachable_from_any_state() {
        for path in [
            vec![],
            vec![ChannelState::Resolving],
            vec![ChannelState::Resolving, ChannelState::Connecting],
            vec![
                ChannelState::Resolving,
                ChannelState::Connecting,
                ChannelState::Connected,
            ],
        ] {
            let mut m = machine();
            for state in path {
                assert!(m.transition(state));
            }
            assert!(m.transition(ChannelState::Closing));
        }
    }

    #[test]
    fn test_transition_emits_status_event() {
        let (events, mut rx) = broadcast::channel(16);
        let mut m = StateMachine::new(events);
        assert!(m.transition(ChannelState::Resolving));

        match rx.try_recv() {
            Ok(ChannelEvent::StateChanged { old, new }) => {
                assert_eq!(old, ChannelState::Disconnected);
                assert_eq!(new, ChannelState::Resolving);
            }
            other => panic!("Expected state change event, got {:?}", other),
        }
    }

    #[test]
    fn test_default_options() {
        let options = ChannelOptions::default();
        assert_eq!(options.handshake_timeout, Duration::from_secs(10));
        assert_eq!(options.initial_backoff, Duration::from_secs(1));
        assert_eq!(options.max_backoff, Duration::from_secs(30));
    }
}
