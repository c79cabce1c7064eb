//! Parley Core
//!
//! The language-practice pipeline: turning a student's level, language and
//! practice mode into model instructions, exchanging text and recorded audio
//! with the tutor model, parsing its replies, and reading them aloud. Also
//! holds the local identity store behind the login screen.

pub mod capture;
pub mod exchange;
pub mod identity;
pub mod instructions;
pub mod llm_client;
pub mod playback;
pub mod profile;
pub mod reply;
pub mod session;
