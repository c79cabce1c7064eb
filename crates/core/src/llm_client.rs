use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::session::{Message, Speaker};

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const DEFAULT_CHAT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_TTS_MODEL: &str = "gemini-2.5-flash-preview-tts";
pub const DEFAULT_VOICE: &str = "Kore";

/// Errors from the remote model boundary.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("No API key is configured for the tutor service")]
    MissingCredential,
    #[error("Request to the tutor service failed: {0}")]
    Request(String),
    #[error("Tutor service returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Tutor service returned an unexpected response: {0}")]
    MalformedResponse(String),
    #[error("Tutor service did not answer within {0} seconds")]
    Timeout(u64),
}

/// A prior message replayed to the model as context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
}

impl Turn {
    /// Converts a thread into model history, dropping failure notices.
    pub fn history(messages: &[Message]) -> Vec<Turn> {
        messages
            .iter()
            .filter(|m| !m.notice)
            .map(|m| Turn {
                speaker: m.speaker,
                text: m.text.clone(),
            })
            .collect()
    }
}

/// The three calls the tutor makes against a generative model.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Answers a typed student message.
    async fn generate_text(
        &self,
        instruction: &str,
        history: &[Turn],
        text: &str,
    ) -> Result<String, ModelError>;

    /// Answers a recorded student message. The reply is expected to follow
    /// the transcription/response marker convention.
    async fn generate_text_from_audio(
        &self,
        instruction: &str,
        history: &[Turn],
        audio: &[u8],
        mime_type: &str,
    ) -> Result<String, ModelError>;

    /// Returns raw 16-bit little-endian PCM at 24 kHz mono. An empty vector
    /// means the service produced no audio.
    async fn synthesize_speech(&self, text: &str, voice: &str) -> Result<Vec<u8>, ModelError>;
}

/// An `LLMClient` backed by the Gemini `generateContent` REST endpoint.
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: Option<String>,
    chat_model: String,
    tts_model: String,
}

impl GeminiClient {
    /// Creates a client. Without an API key every call fails with
    /// `ModelError::MissingCredential`.
    pub fn new(api_key: Option<String>, chat_model: String, tts_model: String) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            chat_model,
            tts_model,
        }
    }

    async fn generate(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, ModelError> {
        let api_key = self.api_key.as_ref().ok_or(ModelError::MissingCredential)?;
        let url = format!("{BASE_URL}/{model}:generateContent");
        debug!(%model, "Sending generateContent request");

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| ModelError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorWrapper>(&body)
                .ok()
                .and_then(|w| w.error.message)
                .unwrap_or(body);
            warn!(status = status.as_u16(), %message, "Gemini request rejected");
            return Err(ModelError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<GenerateContentResponse>()
            .await
            .map_err(|e| ModelError::MalformedResponse(e.to_string()))
    }

    fn conversation(history: &[Turn], last: Vec<Part>) -> Vec<Content> {
        let mut contents: Vec<Content> = history
            .iter()
            .map(|turn| Content {
                role: Some(
                    match turn.speaker {
                        Speaker::User => "user",
                        Speaker::Tutor => "model",
                    }
                    .to_string(),
                ),
                parts: vec![Part::Text {
                    text: turn.text.clone(),
                }],
            })
            .collect();
        contents.push(Content {
            role: Some("user".to_string()),
            parts: last,
        });
        contents
    }

    fn system_instruction(instruction: &str) -> Option<Content> {
        Some(Content {
            role: None,
            parts: vec![Part::Text {
                text: instruction.to_string(),
            }],
        })
    }
}

#[async_trait]
impl LLMClient for GeminiClient {
    async fn generate_text(
        &self,
        instruction: &str,
        history: &[Turn],
        text: &str,
    ) -> Result<String, ModelError> {
        let request = GenerateContentRequest {
            contents: Self::conversation(
                history,
                vec![Part::Text {
                    text: text.to_string(),
                }],
            ),
            system_instruction: Self::system_instruction(instruction),
            generation_config: None,
        };
        let response = self.generate(&self.chat_model, &request).await?;
        response.text()
    }

    async fn generate_text_from_audio(
        &self,
        instruction: &str,
        history: &[Turn],
        audio: &[u8],
        mime_type: &str,
    ) -> Result<String, ModelError> {
        let request = GenerateContentRequest {
            contents: Self::conversation(
                history,
                vec![
                    Part::InlineData {
                        inline_data: Blob {
                            mime_type: mime_type.to_string(),
                            data: BASE64_STANDARD.encode(audio),
                        },
                    },
                    Part::Text {
                        text: "Transcribe my recording and reply to it.".to_string(),
                    },
                ],
            ),
            system_instruction: Self::system_instruction(instruction),
            generation_config: None,
        };
        let response = self.generate(&self.chat_model, &request).await?;
        response.text()
    }

    async fn synthesize_speech(&self, text: &str, voice: &str) -> Result<Vec<u8>, ModelError> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part::Text {
                    text: text.to_string(),
                }],
            }],
            system_instruction: None,
            generation_config: Some(GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice.to_string(),
                        },
                    },
                },
            }),
        };
        let response = self.generate(&self.tts_model, &request).await?;
        match response.audio_data() {
            Some(data) => BASE64_STANDARD
                .decode(data)
                .map_err(|e| ModelError::MalformedResponse(format!("audio payload: {e}"))),
            None => Ok(Vec::new()),
        }
    }
}

// --- Gemini wire types ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: Blob,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Blob {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<String>,
    speech_config: SpeechConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

#[derive(Deserialize, Debug, Default)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<ContentResponse>,
}

#[derive(Deserialize, Debug)]
struct ContentResponse {
    #[serde(default)]
    parts: Vec<PartResponse>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PartResponse {
    text: Option<String>,
    inline_data: Option<BlobResponse>,
}

#[derive(Deserialize, Debug)]
struct BlobResponse {
    data: String,
}

#[derive(Deserialize)]
struct ErrorWrapper {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl GenerateContentResponse {
    fn parts(&self) -> impl Iterator<Item = &PartResponse> {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .into_iter()
            .flat_map(|content| content.parts.iter())
    }

    /// Concatenates the text parts of the first candidate.
    fn text(&self) -> Result<String, ModelError> {
        let text: String = self.parts().filter_map(|p| p.text.as_deref()).collect();
        if text.trim().is_empty() {
            return Err(ModelError::MalformedResponse(
                "response contained no text".to_string(),
            ));
        }
        Ok(text)
    }

    fn audio_data(&self) -> Option<&str> {
        self.parts()
            .find_map(|p| p.inline_data.as_ref())
            .map(|blob| blob.data.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_skips_notices() {
        let messages = vec![
            Message::tutor("Hi! How are you?"),
            Message::user("I am fine"),
            Message::notice("Request failed"),
        ];
        let history = Turn::history(&messages);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].speaker, Speaker::Tutor);
        assert_eq!(history[1].text, "I am fine");
    }

    #[test]
    fn test_request_serialization() {
        let history = vec![Turn {
            speaker: Speaker::Tutor,
            text: "Hello".to_string(),
        }];
        let request = GenerateContentRequest {
            contents: GeminiClient::conversation(
                &history,
                vec![Part::InlineData {
                    inline_data: Blob {
                        mime_type: "audio/webm".to_string(),
                        data: "AAAA".to_string(),
                    },
                }],
            ),
            system_instruction: GeminiClient::system_instruction("Be nice"),
            generation_config: None,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["role"], "model");
        assert_eq!(json["contents"][1]["role"], "user");
        assert_eq!(
            json["contents"][1]["parts"][0]["inlineData"]["mimeType"],
            "audio/webm"
        );
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "Be nice");
        assert!(json["systemInstruction"].get("role").is_none());
        assert!(json.get("generationConfig").is_none());
    }

    #[test]
    fn test_speech_config_serialization() {
        let config = GenerationConfig {
            response_modalities: vec!["AUDIO".to_string()],
            speech_config: SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig {
                        voice_name: "Kore".to_string(),
                    },
                },
            },
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(
            json["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Kore"
        );
        assert_eq!(json["responseModalities"][0], "AUDIO");
    }

    #[test]
    fn test_response_text_extraction() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"Hello "},{"text":"there"}]}}]}"#;
        let response: GenerateContentResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.text().unwrap(), "Hello there");

        let empty: GenerateContentResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert!(matches!(empty.text(), Err(ModelError::MalformedResponse(_))));
    }

    #[test]
    fn test_response_audio_extraction() {
        let body = r#"{"candidates":[{"content":{"parts":[{"inlineData":{"mimeType":"audio/L16;codec=pcm;rate=24000","data":"AAEC"}}]}}]}"#;
        let response: GenerateContentResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.audio_data(), Some("AAEC"));

        let none: GenerateContentResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(none.audio_data(), None);
    }

    #[tokio::test]
    async fn test_missing_credential() {
        let client = GeminiClient::new(
            Some("  ".to_string()),
            DEFAULT_CHAT_MODEL.to_string(),
            DEFAULT_TTS_MODEL.to_string(),
        );
        let err = client.generate_text("x", &[], "hello").await.unwrap_err();
        assert!(matches!(err, ModelError::MissingCredential));

        let err = client.synthesize_speech("hello", DEFAULT_VOICE).await.unwrap_err();
        assert!(matches!(err, ModelError::MissingCredential));
    }
}
