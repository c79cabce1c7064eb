//! Speech Playback
//!
//! Turns a tutor reply into speech. Synthesis problems are never fatal: the
//! reply text is already on screen, so a failed or empty synthesis simply
//! skips playback.

use crate::llm_client::{LLMClient, ModelError};
use anyhow::Result;
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

/// Sample rate of synthesized speech (mono, 16-bit PCM).
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// A sink that plays mono f32 samples once.
#[async_trait]
pub trait AudioOutput: Send {
    /// Plays the samples and returns when playback has completed.
    async fn play(&mut self, samples: &[f32], sample_rate: u32) -> Result<()>;
}

pub type OutputFactory = Box<dyn Fn() -> Result<Box<dyn AudioOutput>> + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackOutcome {
    /// Audio was played; carries the number of samples.
    Played { samples: usize },
    /// Synthesis failed or returned no audio.
    Silent,
    /// There was no text to speak.
    Skipped,
}

pub struct SpeechPlayer {
    client: Arc<dyn LLMClient>,
    voice: String,
    timeout: Duration,
    factory: OutputFactory,
    output: Option<Box<dyn AudioOutput>>,
}

impl SpeechPlayer {
    /// `factory` is called once, on the first utterance that has audio.
    pub fn new(
        client: Arc<dyn LLMClient>,
        voice: String,
        timeout: Duration,
        factory: OutputFactory,
    ) -> Self {
        Self {
            client,
            voice,
            timeout,
            factory,
            output: None,
        }
    }

    pub async fn speak(&mut self, text: &str) -> Result<PlaybackOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(PlaybackOutcome::Skipped);
        }

        let synthesis = tokio::time::timeout(
            self.timeout,
            self.client.synthesize_speech(text, &self.voice),
        )
        .await
        .unwrap_or(Err(ModelError::Timeout(self.timeout.as_secs())));

        let pcm = match synthesis {
            Ok(pcm) => pcm,
            Err(e) => {
                warn!(error = %e, "Speech synthesis failed; skipping playback");
                return Ok(PlaybackOutcome::Silent);
            }
        };
        let samples = decode_pcm16(&pcm);
        if samples.is_empty() {
            info!("Speech synthesis returned no audio; skipping playback");
            return Ok(PlaybackOutcome::Silent);
        }

        if self.output.is_none() {
            self.output = Some((self.factory)()?);
        }
        if let Some(output) = self.output.as_mut() {
            output.play(&samples, PLAYBACK_SAMPLE_RATE).await?;
        }
        Ok(PlaybackOutcome::Played {
            samples: samples.len(),
        })
    }
}

/// Decodes 16-bit little-endian PCM into samples in `[-1.0, 1.0]`.
/// A trailing odd byte is ignored.
pub fn decode_pcm16(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|chunk| {
            let v = i16::from_le_bytes([chunk[0], chunk[1]]);
            (v as f32 / 32768.0).clamp(-1.0, 1.0)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::MockLLMClient;
    use approx::assert_abs_diff_eq;
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    #[derive(Default)]
    struct Recorded {
        plays: Mutex<Vec<(usize, u32)>>,
        created: AtomicUsize,
    }

    struct RecordingOutput(Arc<Recorded>);

    #[async_trait]
    impl AudioOutput for RecordingOutput {
        async fn play(&mut self, samples: &[f32], sample_rate: u32) -> Result<()> {
            self.0.plays.lock().unwrap().push((samples.len(), sample_rate));
            Ok(())
        }
    }

    fn player(mock: MockLLMClient, recorded: Arc<Recorded>) -> SpeechPlayer {
        let factory: OutputFactory = Box::new(move || {
            recorded.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(RecordingOutput(recorded.clone())) as Box<dyn AudioOutput>)
        });
        SpeechPlayer::new(
            Arc::new(mock),
            "Kore".to_string(),
            Duration::from_secs(5),
            factory,
        )
    }

    #[test]
    fn test_decode_pcm16() {
        let samples = decode_pcm16(&[0x00, 0x40, 0x00, 0x80, 0x01]);
        assert_eq!(samples.len(), 2);
        assert_abs_diff_eq!(samples[0], 0.5, epsilon = 0.0001);
        assert_abs_diff_eq!(samples[1], -1.0, epsilon = 0.0001);
        assert!(decode_pcm16(&[]).is_empty());
    }

    #[tokio::test]
    async fn test_speak_plays_once_and_reuses_output() {
        let mut mock = MockLLMClient::new();
        mock.expect_synthesize_speech()
            .withf(|text, voice| text == "Hello there" && voice == "Kore")
            .times(2)
            .returning(|_, _| Ok(vec![0u8; 480]));

        let recorded = Arc::new(Recorded::default());
        let mut player = player(mock, recorded.clone());

        let first = player.speak(" Hello there ").await.unwrap();
        let second = player.speak("Hello there").await.unwrap();

        assert_eq!(first, PlaybackOutcome::Played { samples: 240 });
        assert_eq!(second, PlaybackOutcome::Played { samples: 240 });
        assert_eq!(recorded.created.load(Ordering::SeqCst), 1);
        assert_eq!(
            *recorded.plays.lock().unwrap(),
            vec![(240, PLAYBACK_SAMPLE_RATE), (240, PLAYBACK_SAMPLE_RATE)]
        );
    }

    #[tokio::test]
    async fn test_failed_synthesis_is_silent() {
        let mut mock = MockLLMClient::new();
        mock.expect_synthesize_speech()
            .returning(|_, _| Err(ModelError::Request("offline".to_string())));

        let recorded = Arc::new(Recorded::default());
        let mut player = player(mock, recorded.clone());

        assert_eq!(player.speak("Hi").await.unwrap(), PlaybackOutcome::Silent);
        assert_eq!(recorded.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_audio_is_silent() {
        let mut mock = MockLLMClient::new();
        mock.expect_synthesize_speech().returning(|_, _| Ok(Vec::new()));

        let recorded = Arc::new(Recorded::default());
        let mut player = player(mock, recorded.clone());

        assert_eq!(player.speak("Hi").await.unwrap(), PlaybackOutcome::Silent);
        assert!(recorded.plays.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blank_text_is_skipped() {
        let mut mock = MockLLMClient::new();
        mock.expect_synthesize_speech().never();

        let mut player = player(mock, Arc::new(Recorded::default()));
        assert_eq!(player.speak("  ").await.unwrap(), PlaybackOutcome::Skipped);
    }
}
