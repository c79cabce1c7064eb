//! Parley API Library Crate
//!
//! The web service around `parley-core`: configuration, shared state, the
//! REST handlers for accounts and practice sessions, the WebSocket chat
//! protocol, and routing. The `api` binary is a thin wrapper around this library.

pub mod audio_utils;
pub mod config;
pub mod handlers;
pub mod models;
pub mod registry;
pub mod router;
pub mod state;
pub mod ws;
