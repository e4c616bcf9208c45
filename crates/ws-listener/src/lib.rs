//! Self-healing WebSocket listener for a server-driven trigger signal.
//!
//! Keeps one connection to an event server open, answers the server's
//! `ping` signal with the expected `pong`, and reports each signal to
//! subscribers exactly once.
//!
//! # Features
//! - Bounded exponential backoff with a retry limit
//! - Ping/pong heartbeat that detects half-open connections
//! - Malformed frames are dropped without closing the connection
//! - Ordered lifecycle events delivered to any number of subscribers
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), ws_listener::Error> {
//! use ws_listener::{ConnectionManager, Event, ListenerConfig};
//!
//! let manager = ConnectionManager::new(ListenerConfig::from_env())?;
//! let mut events = manager.subscribe();
//! manager.connect().await?;
//!
//! while let Some(event) = events.next().await {
//!     match event {
//!         Event::SignalReceived => println!("signal"),
//!         Event::MaxRetriesReached { .. } => break,
//!         _ => {}
//!     }
//! }
//! manager.terminate().await;
//! # Ok(())
//! # }
//! ```

mod connection;
pub mod events;
pub mod frame;
pub mod heartbeat;
pub mod protocol;
pub mod reconnect;
pub mod timer;
mod types;

pub use connection::{ConnectionManager, ConnectionState};
pub use events::{DisconnectCause, Event, EventBus, Subscription};
pub use frame::Payload;
pub use protocol::ProtocolMessage;
pub use types::{
    DEFAULT_BASE_DELAY, DEFAULT_ENDPOINT, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_HEARTBEAT_INTERVAL,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY, DEFAULT_USER_AGENT, DEFAULT_WRITE_TIMEOUT,
    ENDPOINT_ENV, Error, ListenerConfig, ReconnectConfig,
};
