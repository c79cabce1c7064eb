//! Reply Parser
//!
//! Splits a raw model reply into what the student said and what the tutor
//! answered. Malformed replies are expected; parsing never fails.

use crate::instructions::{RESPONSE_MARKER, TRANSCRIPTION_MARKER};

/// Shown as the transcription when the reply carries no markers at all.
pub const MISSING_TRANSCRIPTION: &str = "(audio processed)";
/// Shown when the transcription segment is present but empty.
pub const EMPTY_TRANSCRIPTION: &str = "(unintelligible)";
/// Shown when the response segment is empty.
pub const EMPTY_RESPONSE: &str = "...";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReply {
    pub transcription: String,
    pub response: String,
}

pub fn parse_reply(raw: &str) -> ParsedReply {
    match raw.split_once(RESPONSE_MARKER) {
        Some((before, after)) => {
            let before = match before.split_once(TRANSCRIPTION_MARKER) {
                Some((_, transcription)) => transcription,
                None => before,
            };
            ParsedReply {
                transcription: non_empty_or(before, EMPTY_TRANSCRIPTION),
                response: non_empty_or(after, EMPTY_RESPONSE),
            }
        }
        None => ParsedReply {
            transcription: MISSING_TRANSCRIPTION.to_string(),
            response: non_empty_or(raw, EMPTY_RESPONSE),
        },
    }
}

fn non_empty_or(segment: &str, placeholder: &str) -> String {
    let segment = segment.trim();
    if segment.is_empty() {
        placeholder.to_string()
    } else {
        segment.to_string()
    }
}
