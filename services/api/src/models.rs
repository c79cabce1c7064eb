//! API Models
//!
//! Request and response bodies for the REST API, annotated for OpenAPI
//! generation with `utoipa`.

use chrono::{DateTime, Utc};
use parley_core::{
    profile::{ProficiencyLevel, TargetLanguage, UserProfile},
    session::{Message, PracticeMode, PracticeSession, Speaker},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Deserialize, ToSchema)]
pub struct RegisterPayload {
    #[schema(example = "anna")]
    pub username: String,
    pub password: String,
    #[schema(value_type = String, example = "B1")]
    pub level: ProficiencyLevel,
    #[schema(value_type = String, example = "English")]
    pub target_language: TargetLanguage,
}

#[derive(Deserialize, ToSchema)]
pub struct LoginPayload {
    #[schema(example = "anna")]
    pub username: String,
    pub password: String,
}

#[derive(Deserialize, ToSchema, Default)]
pub struct UpdateProfilePayload {
    #[schema(value_type = Option<String>, example = "B2")]
    pub level: Option<ProficiencyLevel>,
    #[schema(value_type = Option<String>, example = "Russian")]
    pub target_language: Option<TargetLanguage>,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct ProfileView {
    pub username: String,
    #[schema(value_type = String, example = "B1")]
    pub level: ProficiencyLevel,
    #[schema(value_type = String, example = "English")]
    pub target_language: TargetLanguage,
}

impl From<UserProfile> for ProfileView {
    fn from(profile: UserProfile) -> Self {
        Self {
            username: profile.username,
            level: profile.proficiency_level,
            target_language: profile.target_language,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct StartSessionPayload {
    #[schema(value_type = String, example = "Custom")]
    pub mode: PracticeMode,
    /// Required when `mode` is `Custom`.
    #[serde(default)]
    #[schema(example = "You are a hotel receptionist and I am checking in.")]
    pub scenario: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct MessageView {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    #[schema(value_type = String, example = "Tutor")]
    pub speaker: Speaker,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub notice: bool,
}

impl From<&Message> for MessageView {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            speaker: message.speaker,
            text: message.text.clone(),
            created_at: message.created_at,
            notice: message.notice,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct SessionView {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    pub owner: String,
    #[schema(value_type = String, example = "Conversation")]
    pub mode: PracticeMode,
    pub custom_scenario_text: String,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<MessageView>,
}

impl From<&PracticeSession> for SessionView {
    fn from(session: &PracticeSession) -> Self {
        Self {
            id: session.id,
            owner: session.owner.clone(),
            mode: session.mode,
            custom_scenario_text: session.custom_scenario_text.clone(),
            created_at: session.created_at,
            messages: session.messages().iter().map(MessageView::from).collect(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json;

    fn profile() -> UserProfile {
        UserProfile {
            username: "anna".to_string(),
            proficiency_level: ProficiencyLevel::B1,
            target_language: TargetLanguage::Russian,
        }
    }

    #[test]
    fn test_register_payload_deserialization() {
        let json = r#"{"username":"anna","password":"pw","level":"C1","target_language":"Russian"}"#;
        let payload: RegisterPayload = serde_json::from_str(json).unwrap();

        assert_eq!(payload.username, "anna");
        assert_eq!(payload.level, ProficiencyLevel::C1);
        assert_eq!(payload.target_language, TargetLanguage::Russian);
    }

    #[test]
    fn test_register_payload_rejects_unknown_level() {
        let json = r#"{"username":"anna","password":"pw","level":"D1","target_language":"English"}"#;
        let result: Result<RegisterPayload, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_update_profile_payload_is_partial() {
        let payload: UpdateProfilePayload = serde_json::from_str(r#"{"level":"A2"}"#).unwrap();
        assert_eq!(payload.level, Some(ProficiencyLevel::A2));
        assert_eq!(payload.target_language, None);

        let empty: UpdateProfilePayload = serde_json::from_str("{}").unwrap();
        assert!(empty.level.is_none() && empty.target_language.is_none());
    }

    #[test]
    fn test_start_session_payload_defaults_scenario() {
        let payload: StartSessionPayload =
            serde_json::from_str(r#"{"mode":"Interview"}"#).unwrap();
        assert_eq!(payload.mode, PracticeMode::Interview);
        assert!(payload.scenario.is_empty());
    }

    #[test]
    fn test_profile_view_from_profile() {
        let view = ProfileView::from(profile());
        let json = serde_json::to_string(&view).unwrap();
        assert_eq!(
            json,
            r#"{"username":"anna","level":"B1","target_language":"Russian"}"#
        );
    }

    #[test]
    fn test_session_view_includes_greeting() {
        let session = PracticeSession::start(&profile(), PracticeMode::Conversation, "").unwrap();
        let view = SessionView::from(&session);

        assert_eq!(view.id, session.id);
        assert_eq!(view.owner, "anna");
        assert_eq!(view.messages.len(), 1);
        assert_eq!(view.messages[0].speaker, Speaker::Tutor);
        assert!(!view.messages[0].notice);
    }

    #[test]
    fn test_error_response_serialization() {
        let error = ErrorResponse {
            message: "Session not found".to_string(),
        };

        let json = serde_json::to_string(&error).unwrap();
        let expected = r#"{"message":"Session not found"}"#;
        assert_eq!(json, expected);
    }
}
