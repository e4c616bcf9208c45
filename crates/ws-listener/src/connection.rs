//! Connection management: event loop, heartbeat, and reconnection.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::USER_AGENT;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::Error;
use crate::events::{DisconnectCause, Event, EventBus, Subscription};
use crate::frame::Payload;
use crate::heartbeat::{Beat, HeartbeatMonitor};
use crate::protocol::{self, ProtocolMessage};
use crate::reconnect::{Decision, ReconnectPolicy};
use crate::timer::Deadline;
use crate::types::ListenerConfig;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const COMMAND_CHANNEL_CAPACITY: usize = 64;
/// How long `terminate` waits for the close handshake before dropping the socket.
const CLOSE_GRACE: Duration = Duration::from_secs(1);
/// Reported when the peer's close frame carries no status code.
const CLOSE_NO_STATUS: u16 = 1005;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type Frame = Option<Result<Message, tungstenite::Error>>;

// ---------------------------------------------------------------------------
// Public handle
// ---------------------------------------------------------------------------

/// Connection state as seen from outside the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

enum Command {
    Connect,
    Send {
        message: ProtocolMessage,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    Terminate {
        done: oneshot::Sender<()>,
    },
}

/// Handle to a self-healing connection to the event server.
///
/// The transport is owned by a background task; this handle only sends it
/// commands. Clones share that task. Once every clone is dropped the task
/// runs the same cleanup as [`terminate`](Self::terminate) and exits.
///
/// Subscriptions taken with [`subscribe`](Self::subscribe) live across
/// reconnects and receive every later event in publish order.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    bus: Arc<EventBus>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Connect => f.write_str("Connect"),
            Command::Send { message, .. } => f.debug_struct("Send").field("message", message).finish(),
            Command::Terminate { .. } => f.write_str("Terminate"),
        }
    }
}

impl ConnectionManager {
    /// Validate `config` and start the (idle) event loop.
    ///
    /// Must be called from within a Tokio runtime. Nothing is dialled until
    /// [`connect`](Self::connect).
    pub fn new(config: ListenerConfig) -> Result<Self, Error> {
        config.validate()?;
        build_request(&config)?;

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let bus = Arc::new(EventBus::new());

        tokio::spawn(
            EventLoop {
                heartbeat: HeartbeatMonitor::new(config.heartbeat_interval),
                policy: ReconnectPolicy::new(config.reconnect),
                config,
                commands: commands_rx,
                state_tx,
                bus: Arc::clone(&bus),
                transport: None,
                reconnect: Deadline::new(),
                terminated: false,
            }
            .run(),
        );

        Ok(Self {
            commands: commands_tx,
            state: state_rx,
            bus,
        })
    }

    /// Register for events. Register before [`connect`](Self::connect) to
    /// see the first `Connected`.
    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Ask the event loop to open a connection.
    ///
    /// Returns once the request is queued; the outcome arrives as a
    /// `Connected` or `Error` event. A failed attempt enters the reconnect
    /// path. Calling this again after `MaxRetriesReached` or `terminate`
    /// starts over with a fresh attempt counter. No-op while connected or
    /// connecting.
    pub async fn connect(&self) -> Result<(), Error> {
        self.commands
            .send(Command::Connect)
            .await
            .map_err(|_| Error::ManagerGone)
    }

    /// Serialise and write one message on the open connection.
    ///
    /// Fails with [`Error::NotConnected`] unless connected. Write failures
    /// are returned as-is and not retried.
    pub async fn send_message(&self, message: &ProtocolMessage) -> Result<(), Error> {
        if !self.state().is_connected() {
            return Err(Error::NotConnected);
        }
        let (reply, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Send {
                message: message.clone(),
                reply,
            })
            .await
            .map_err(|_| Error::ManagerGone)?;
        reply_rx.await.map_err(|_| Error::ManagerGone)?
    }

    /// Cancel the heartbeat and any pending reconnect, close the transport,
    /// and publish `Terminated`. Safe in any state and on repeated calls.
    pub async fn terminate(&self) {
        let (done, done_rx) = oneshot::channel();
        if self.commands.send(Command::Terminate { done }).await.is_err() {
            // The loop is gone, so there is nothing left to release.
            return;
        }
        let _ = done_rx.await;
    }
}

// ---------------------------------------------------------------------------
// Handshake request
// ---------------------------------------------------------------------------

fn build_request(config: &ListenerConfig) -> Result<Request, Error> {
    let endpoint = config.endpoint()?;
    let mut request = endpoint.as_str().into_client_request()?;
    let user_agent = HeaderValue::from_str(&config.user_agent)
        .map_err(|e| Error::InvalidHeader(format!("User-Agent {:?}: {e}", config.user_agent)))?;
    request.headers_mut().insert(USER_AGENT, user_agent);
    Ok(request)
}

// ---------------------------------------------------------------------------
// Background event loop
// ---------------------------------------------------------------------------

enum LoopAction {
    Continue,
    Stop,
}

struct EventLoop {
    config: ListenerConfig,
    commands: mpsc::Receiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    bus: Arc<EventBus>,
    transport: Option<WsStream>,
    heartbeat: HeartbeatMonitor,
    policy: ReconnectPolicy,
    reconnect: Deadline,
    /// Set by `terminate`, cleared by an explicit `connect`.
    terminated: bool,
}

impl EventLoop {
    async fn run(mut self) {
        loop {
            let action = tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        tracing::debug!("All handles dropped, shutting down");
                        self.terminate().await;
                        LoopAction::Stop
                    }
                },
                frame = next_frame(&mut self.transport) => {
                    self.handle_frame(frame).await;
                    LoopAction::Continue
                }
                beat = self.heartbeat.tick() => {
                    self.handle_beat(beat).await;
                    LoopAction::Continue
                }
                () = self.reconnect.fired() => {
                    tracing::info!(attempt = self.policy.attempt(), "Reconnecting");
                    self.connect().await
                }
            };
            if let LoopAction::Stop = action {
                return;
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    async fn handle_command(&mut self, cmd: Command) -> LoopAction {
        match cmd {
            Command::Connect => {
                if self.transport.is_some() {
                    tracing::debug!("Already connected, ignoring connect");
                    return LoopAction::Continue;
                }
                self.terminated = false;
                self.policy.reset();
                self.connect().await
            }
            Command::Send { message, reply } => {
                let _ = reply.send(self.send(&message).await);
                LoopAction::Continue
            }
            Command::Terminate { done } => {
                self.terminate().await;
                let _ = done.send(());
                LoopAction::Continue
            }
        }
    }

    // --- Opening ---

    /// Dial the endpoint, serving commands while the handshake is pending.
    async fn connect(&mut self) -> LoopAction {
        self.reconnect.cancel();
        self.set_state(ConnectionState::Connecting);

        let request = match build_request(&self.config) {
            Ok(request) => request,
            Err(e) => {
                self.connect_failed(e);
                return LoopAction::Continue;
            }
        };
        tracing::info!(url = %self.config.url, "Connecting to event server");

        let handshake = tokio::time::timeout(
            self.config.handshake_timeout,
            tokio_tungstenite::connect_async(request),
        );
        tokio::pin!(handshake);

        let result = loop {
            tokio::select! {
                result = &mut handshake => break result,
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Terminate { done }) => {
                        tracing::info!("Terminate requested during handshake");
                        self.terminate().await;
                        let _ = done.send(());
                        return LoopAction::Continue;
                    }
                    Some(Command::Send { reply, .. }) => {
                        let _ = reply.send(Err(Error::NotConnected));
                    }
                    Some(Command::Connect) => {
                        tracing::debug!("Connect already in progress");
                    }
                    None => {
                        tracing::debug!("All handles dropped during handshake");
                        self.terminate().await;
                        return LoopAction::Stop;
                    }
                },
            }
        };

        match result {
            Ok(Ok((ws, _response))) => self.on_open(ws),
            Ok(Err(e)) => self.connect_failed(e.into()),
            Err(_) => self.connect_failed(Error::HandshakeTimeout(self.config.handshake_timeout)),
        }
        LoopAction::Continue
    }

    fn on_open(&mut self, ws: WsStream) {
        self.transport = Some(ws);
        self.reconnect.cancel();
        self.policy.reset();
        self.heartbeat.start();
        self.set_state(ConnectionState::Connected);
        tracing::info!(url = %self.config.url, "Connected to event server");
        self.bus.publish(Event::Connected);
    }

    fn connect_failed(&mut self, error: Error) {
        tracing::warn!(
            error = %error,
            attempt = self.policy.attempt(),
            "Connection attempt failed"
        );
        self.set_state(ConnectionState::Disconnected);
        self.bus.publish(Event::Error {
            error: Arc::new(error),
        });
        self.schedule_reconnect();
    }

    // --- Inbound ---

    async fn handle_frame(&mut self, frame: Frame) {
        match frame {
            Some(Ok(Message::Pong(_))) => {
                tracing::trace!("Probe answered");
                self.heartbeat.on_pong();
            }
            Some(Ok(Message::Ping(_))) => {
                // tungstenite queues the pong and flushes it on the next read.
                tracing::trace!("Transport ping received");
            }
            Some(Ok(Message::Close(frame))) => {
                self.finish_close_handshake().await;
                let cause = match frame {
                    Some(frame) => DisconnectCause::Closed {
                        code: u16::from(frame.code),
                        reason: frame.reason.as_str().to_owned(),
                    },
                    None => DisconnectCause::Closed {
                        code: CLOSE_NO_STATUS,
                        reason: String::new(),
                    },
                };
                self.handle_close(cause);
            }
            Some(Ok(msg)) => self.handle_payload(Payload::from(msg)).await,
            Some(Err(e)) => {
                let cause = DisconnectCause::Transport(e.to_string());
                tracing::warn!(error = %e, "WebSocket error");
                self.bus.publish(Event::Error {
                    error: Arc::new(e.into()),
                });
                self.handle_close(cause);
            }
            None => self.handle_close(DisconnectCause::StreamEnded),
        }
    }

    async fn handle_payload(&mut self, payload: Payload) {
        let raw = payload.into_text();
        let message = match protocol::decode(&raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, raw = %raw, "Dropping undecodable frame");
                return;
            }
        };
        tracing::debug!(kind = %message.kind, "Received message");

        let is_signal = message.is_signal();
        self.bus.publish(Event::Message { message, raw });
        if is_signal {
            self.acknowledge_signal().await;
        }
    }

    async fn acknowledge_signal(&mut self) {
        match self.send(&ProtocolMessage::acknowledgment()).await {
            Ok(()) => {
                tracing::info!("Signal received and acknowledged");
                self.bus.publish(Event::SignalReceived);
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to acknowledge signal");
            }
        }
    }

    // --- Outbound ---

    async fn send(&mut self, message: &ProtocolMessage) -> Result<(), Error> {
        if self.transport.is_none() {
            return Err(Error::NotConnected);
        }
        let text = protocol::encode(message)?;
        self.write(Message::text(text)).await?;
        tracing::debug!(kind = %message.kind, "Sent message");
        Ok(())
    }

    /// Write one frame, bounded by the write timeout. On timeout the peer has
    /// stopped reading, so the connection is closed before returning.
    async fn write(&mut self, frame: Message) -> Result<(), Error> {
        let Some(ws) = self.transport.as_mut() else {
            return Err(Error::NotConnected);
        };
        let limit = self.config.write_timeout;
        let outcome = tokio::time::timeout(limit, ws.send(frame)).await;
        match outcome {
            Ok(result) => result.map_err(Error::from),
            Err(_) => {
                let error = Error::WriteTimeout(limit);
                tracing::warn!(timeout = ?limit, "Write stalled, dropping connection");
                self.handle_close(DisconnectCause::Transport(error.to_string()));
                Err(error)
            }
        }
    }

    // --- Heartbeat ---

    async fn handle_beat(&mut self, beat: Beat) {
        match beat {
            Beat::Probe => match self.write(Message::Ping(Bytes::new())).await {
                Ok(()) => tracing::trace!("Probe sent"),
                Err(Error::NotConnected) => self.heartbeat.stop(),
                // The stalled connection was already closed by `write`.
                Err(Error::WriteTimeout(_)) => {}
                Err(e) => {
                    let cause = DisconnectCause::Transport(e.to_string());
                    tracing::warn!(error = %e, "Failed to send probe");
                    self.bus.publish(Event::Error { error: Arc::new(e) });
                    self.handle_close(cause);
                }
            },
            Beat::Dead => {
                tracing::warn!(
                    interval = ?self.config.heartbeat_interval,
                    "No probe response within heartbeat interval, dropping connection"
                );
                self.handle_close(DisconnectCause::HeartbeatTimeout);
            }
        }
    }

    // --- Closing ---

    /// After a peer close frame, keep reading so the queued close reply is
    /// flushed and the stream ends cleanly. Bounded by `CLOSE_GRACE`.
    async fn finish_close_handshake(&mut self) {
        let Some(mut ws) = self.transport.take() else {
            return;
        };
        let drain = async { while let Some(Ok(_)) = ws.next().await {} };
        if tokio::time::timeout(CLOSE_GRACE, drain).await.is_err() {
            tracing::debug!("Peer did not finish the close handshake");
        }
    }

    /// Tear down the current transport and enter the reconnect path.
    fn handle_close(&mut self, cause: DisconnectCause) {
        self.set_state(ConnectionState::Closing);
        self.heartbeat.stop();
        self.transport = None;
        tracing::warn!(%cause, "Connection closed");
        self.bus.publish(Event::Disconnected { cause });
        self.set_state(ConnectionState::Disconnected);
        if !self.terminated {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&mut self) {
        match self.policy.on_failure() {
            Decision::Retry { attempt, delay } => {
                tracing::info!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling reconnect"
                );
                self.reconnect.schedule(delay);
            }
            Decision::GiveUp { attempts } => {
                tracing::error!(attempts, "Maximum reconnection attempts reached");
                self.bus.publish(Event::MaxRetriesReached { attempts });
            }
        }
    }

    async fn terminate(&mut self) {
        self.terminated = true;
        self.reconnect.cancel();
        self.heartbeat.stop();
        if let Some(mut ws) = self.transport.take() {
            self.set_state(ConnectionState::Closing);
            match tokio::time::timeout(CLOSE_GRACE, ws.close(None)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(error = %e, "Close handshake failed"),
                Err(_) => tracing::debug!("Close handshake timed out"),
            }
            self.bus.publish(Event::Disconnected {
                cause: DisconnectCause::Terminated,
            });
        }
        self.set_state(ConnectionState::Disconnected);
        tracing::info!("Connection manager terminated");
        self.bus.publish(Event::Terminated);
    }
}

/// Next inbound frame, or pend forever while there is no transport.
async fn next_frame(transport: &mut Option<WsStream>) -> Frame {
    match transport {
        Some(ws) => ws.next().await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_request_sets_user_agent() {
        let config = ListenerConfig::new("ws://127.0.0.1:5000/feed");
        let request = build_request(&config).unwrap();
        assert_eq!(request.uri().to_string(), "ws://127.0.0.1:5000/feed");
        assert_eq!(
            request.headers().get(USER_AGENT).unwrap(),
            "Solana-Client"
        );
    }

    #[test]
    fn build_request_rejects_bad_header() {
        let mut config = ListenerConfig::new("ws://127.0.0.1:5000");
        config.user_agent = "bad\nagent".into();
        assert!(matches!(
            build_request(&config),
            Err(Error::InvalidHeader(_))
        ));
    }

    #[tokio::test]
    async fn new_rejects_invalid_endpoint() {
        let result = ConnectionManager::new(ListenerConfig::new("http://127.0.0.1:5000"));
        assert!(matches!(result, Err(Error::InvalidEndpoint(_))));
    }

    #[tokio::test]
    async fn new_rejects_zero_heartbeat() {
        let config = ListenerConfig {
            heartbeat_interval: Duration::ZERO,
            ..ListenerConfig::default()
        };
        let result = ConnectionManager::new(config);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn send_while_disconnected_fails() {
        let manager = ConnectionManager::new(ListenerConfig::default()).unwrap();
        let err = manager
            .send_message(&ProtocolMessage::acknowledgment())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn terminate_on_idle_manager_is_harmless() {
        let manager = ConnectionManager::new(ListenerConfig::default()).unwrap();
        let mut events = manager.subscribe();

        manager.terminate().await;
        manager.terminate().await;

        assert!(matches!(events.next().await, Some(Event::Terminated)));
        assert!(matches!(events.next().await, Some(Event::Terminated)));
        assert!(events.try_next().is_none());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn dropping_last_handle_stops_the_loop() {
        let manager = ConnectionManager::new(ListenerConfig::default()).unwrap();
        let mut events = manager.subscribe();
        drop(manager);

        assert!(matches!(events.next().await, Some(Event::Terminated)));
        assert!(events.next().await.is_none());
    }
}
