//! WebSocket server module
//!
//! Handles WebSocket connections from poker clients and dispatches their
//! messages through per-connection handlers.

mod handler;
mod protocol;
mod socket;
mod websocket;

pub use handler::*;
pub use protocol::*;
pub use socket::*;
pub use websocket::*;
