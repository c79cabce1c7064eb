//! Plays tutor speech by streaming it to the browser.

use super::{protocol::ServerMessage, session::{SocketSink, send_msg}};
use crate::audio_utils::{encode_f32_to_base64_i16, resample};
use anyhow::Result;
use async_trait::async_trait;
use parley_core::playback::{AudioOutput, OutputFactory};
use tracing::debug;

/// Samples per `audio_chunk` frame, at the client's rate.
const FRAME_SAMPLES: usize = 4800;

/// An `AudioOutput` backed by the connection's WebSocket sink.
pub struct SocketAudioOutput {
    socket_tx: SocketSink,
    sample_rate: u32,
}

impl SocketAudioOutput {
    pub fn new(socket_tx: SocketSink, sample_rate: u32) -> Self {
        Self {
            socket_tx,
            sample_rate,
        }
    }

    pub fn factory(socket_tx: SocketSink, sample_rate: u32) -> OutputFactory {
        Box::new(move || {
            debug!(sample_rate, "Opening socket audio output");
            Ok(Box::new(SocketAudioOutput::new(socket_tx.clone(), sample_rate))
                as Box<dyn AudioOutput>)
        })
    }
}

#[async_trait]
impl AudioOutput for SocketAudioOutput {
    async fn play(&mut self, samples: &[f32], sample_rate: u32) -> Result<()> {
        let frames = audio_frames(samples, sample_rate, self.sample_rate)?;
        let mut sink = self.socket_tx.lock().await;
        send_msg(&mut sink, ServerMessage::SpeakingStart).await?;
        for frame in frames {
            send_msg(&mut sink, frame).await?;
        }
        send_msg(&mut sink, ServerMessage::SpeakingEnd).await?;
        Ok(())
    }
}

/// Converts samples to the client's rate and splits them into `audio_chunk` frames.
pub fn audio_frames(samples: &[f32], in_rate: u32, out_rate: u32) -> Result<Vec<ServerMessage>> {
    let converted = resample(samples, in_rate as f64, out_rate as f64)?;
    Ok(converted
        .chunks(FRAME_SAMPLES)
        .map(|chunk| ServerMessage::AudioChunk {
            data: encode_f32_to_base64_i16(chunk),
            sample_rate: out_rate,
        })
        .collect())
}
