//! # scribble-transport
//!
//! Transport abstraction layer for Scribble.
//!
//! - **WebSocket** - tokio-tungstenite connections for clients
//! - **Upgrade** - axum WebSocket upgrades on the server
//!
//! ## Transport Abstraction
//!
//! All connections implement the `Connection` trait, so the server's
//! session loop does not care which WebSocket stack is underneath.
//!
//! ```rust,ignore
//! use scribble_transport::Connection;
//!
//! async fn handle_connection(mut conn: impl Connection) {
//!     while let Ok(Some(frame)) = conn.recv().await {
//!         // Process frame
//!     }
//! }
//! ```

mod buffer;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(feature = "axum")]
pub mod upgrade;

pub use traits::{Connection, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{connect, ClientConnection, WebSocketConnection};

#[cfg(feature = "axum")]
pub use upgrade::UpgradedConnection;
