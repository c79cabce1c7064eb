//! Audio Capture
//!
//! Hold-to-record capture. The microphone is acquired when the hold starts and
//! released when it ends, is cancelled, or the recorder is dropped.

use tracing::{debug, info, warn};

/// Clips smaller than this are treated as silence or noise and never sent.
pub const MIN_CLIP_BYTES: usize = 1000;

/// Upper bound on a single clip. The clip is inlined, base64 encoded, into
/// one model request.
pub const MAX_CLIP_BYTES: usize = 10 * 1024 * 1024;

/// A finished recording, tagged with the content type chosen at capture time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Microphone access was denied")]
    PermissionDenied,
    #[error("Already recording")]
    AlreadyRecording,
    #[error("Recording is too long")]
    ClipTooLong,
}

/// An exclusive audio input device.
pub trait Microphone: Send {
    fn acquire(&mut self) -> Result<(), CaptureError>;
    fn release(&mut self);
}

struct ActiveRecording {
    mime_type: String,
    buffer: Vec<u8>,
}

pub struct Recorder<M: Microphone> {
    microphone: M,
    active: Option<ActiveRecording>,
}

impl<M: Microphone> Recorder<M> {
    pub fn new(microphone: M) -> Self {
        Self {
            microphone,
            active: None,
        }
    }

    pub fn microphone_mut(&mut self) -> &mut M {
        &mut self.microphone
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Starts a hold. Fails if the microphone cannot be acquired.
    pub fn press(&mut self, mime_type: &str) -> Result<(), CaptureError> {
        if self.active.is_some() {
            return Err(CaptureError::AlreadyRecording);
        }
        self.microphone.acquire()?;
        debug!(%mime_type, "Recording started");
        self.active = Some(ActiveRecording {
            mime_type: mime_type.to_string(),
            buffer: Vec::new(),
        });
        Ok(())
    }

    /// Appends a chunk of encoded audio. Ignored when not recording.
    ///
    /// A chunk that would take the clip past `MAX_CLIP_BYTES` abandons the
    /// recording and releases the microphone.
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), CaptureError> {
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        if active.buffer.len() + chunk.len() > MAX_CLIP_BYTES {
            warn!(
                bytes = active.buffer.len() + chunk.len(),
                "Recording exceeded the size limit; discarding it"
            );
            self.cancel();
            return Err(CaptureError::ClipTooLong);
        }
        active.buffer.extend_from_slice(chunk);
        Ok(())
    }

    /// Ends the hold and packages the recording.
    ///
    /// Returns `None` when nothing was recording or the clip is below
    /// `MIN_CLIP_BYTES`.
    pub fn release(&mut self) -> Option<AudioClip> {
        let active = self.active.take()?;
        self.microphone.release();

        if active.buffer.len() < MIN_CLIP_BYTES {
            info!(bytes = active.buffer.len(), "Discarding clip below size threshold");
            return None;
        }
        Some(AudioClip {
            bytes: active.buffer,
            mime_type: active.mime_type,
        })
    }

    /// Abandons the hold without producing a clip.
    pub fn cancel(&mut self) {
        if self.active.take().is_some() {
            self.microphone.release();
        }
    }
}

impl<M: Microphone> Drop for Recorder<M> {
    fn drop(&mut self) {
        self.cancel();
    }
}
