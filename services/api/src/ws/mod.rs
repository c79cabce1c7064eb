//! WebSocket Chat Sessions
//!
//! The chat screen talks to the server over a single WebSocket per practice
//! session:
//!
//! - `protocol`: the JSON message format for client-server communication.
//! - `session`: the connection lifecycle, from handshake to termination.
//! - `turn`: one text or audio turn, and reading tutor replies aloud.
//! - `output`: streams synthesized speech back to the browser.

mod output;
pub mod protocol;
pub mod session;
mod turn;

pub use session::ws_handler;
