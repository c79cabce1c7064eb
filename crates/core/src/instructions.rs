//! Session Configurator
//!
//! Renders the student's level, target language and practice mode into the
//! system instruction sent with every model call.

use crate::{
    profile::{ProficiencyLevel, TargetLanguage},
    session::PracticeMode,
};

/// Marks the start of the transcribed student speech in an audio reply.
pub const TRANSCRIPTION_MARKER: &str = "[TRANSCRIPTION]";
/// Marks the start of the tutor's answer in an audio reply.
pub const RESPONSE_MARKER: &str = "[RESPONSE]";

/// How the student's utterance reaches the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputModality {
    Text,
    Audio,
}

/// Canned description of what a student at `level` can handle.
pub fn level_description(level: ProficiencyLevel) -> &'static str {
    match level {
        ProficiencyLevel::A1 => {
            "Beginner (A1): knows only basic words and phrases. Use very simple vocabulary, short sentences and the present tense."
        }
        ProficiencyLevel::A2 => {
            "Elementary (A2): handles simple everyday exchanges. Use common vocabulary and simple past and future forms."
        }
        ProficiencyLevel::B1 => {
            "Intermediate (B1): can talk about familiar topics. Use everyday vocabulary with some less common words and compound sentences."
        }
        ProficiencyLevel::B2 => {
            "Upper-intermediate (B2): speaks fluently on most topics. Use natural speech, idioms and varied grammar."
        }
        ProficiencyLevel::C1 => {
            "Advanced (C1): understands complex and implicit meaning. Use rich vocabulary, nuanced phrasing and complex structures."
        }
        ProficiencyLevel::C2 => {
            "Proficient (C2): near-native command of the language. Speak as with a native speaker, including subtle and stylistic corrections."
        }
    }
}

fn mode_context(mode: PracticeMode, scenario: &str) -> String {
    match mode {
        PracticeMode::Conversation => "Context: a casual, informal chat between friends. Be warm, ask about the student's day, interests and plans.".to_string(),
        PracticeMode::Interview => "Context: a formal job interview. You are a professional recruiter: ask one interview question at a time and keep a polite, businesslike tone.".to_string(),
        PracticeMode::Custom => format!("Context: role-play the following scenario and stay in character.\nScenario: {scenario}"),
        PracticeMode::Menu => "Context: general language practice on any everyday topic.".to_string(),
    }
}

/// Builds the system instruction for one model call.
///
/// Pure string assembly; every combination of inputs yields a usable
/// instruction.
pub fn build_instructions(
    level: ProficiencyLevel,
    target_language: TargetLanguage,
    mode: PracticeMode,
    scenario: &str,
    modality: InputModality,
) -> String {
    let language = target_language.tutoring_language();
    let mut out = format!(
        "You are a friendly {language} language tutor. Speak to the student only in {language}.\n\
         Student level: {}\n\
         {}\n\n\
         Rules:\n\
         - If the student makes a mistake, politely point it out and give the corrected phrase, then continue the conversation.\n\
         - Keep every reply short: 2-3 sentences, because replies are read aloud.\n\
         - End with a question or prompt that keeps the student talking.",
        level_description(level),
        mode_context(mode, scenario),
    );

    if modality == InputModality::Audio {
        out.push_str(&format!(
            "\n\nThe student's message is an audio recording. Format your answer exactly as:\n\
             {TRANSCRIPTION_MARKER} <what the student said, transcribed word for word>\n\
             {RESPONSE_MARKER} <your reply>"
        ));
    }

    out
}

/// The first tutor message shown when a session opens.
pub fn greeting(target_language: TargetLanguage, mode: PracticeMode) -> &'static str {
    match (target_language, mode) {
        (TargetLanguage::English, PracticeMode::Interview) => {
            "Good afternoon, and thank you for coming in. Could you start by telling me a little about yourself?"
        }
        (TargetLanguage::English, PracticeMode::Custom) => {
            "Let's begin the scenario. Whenever you're ready, say the first line!"
        }
        (TargetLanguage::English, _) => "Hi! How are you doing today?",
        (TargetLanguage::Russian, PracticeMode::Interview) => {
            "Добрый день, спасибо, что пришли. Расскажите, пожалуйста, немного о себе."
        }
        (TargetLanguage::Russian, PracticeMode::Custom) => {
            "Давайте начнём сценарий. Когда будете готовы, скажите первую реплику!"
        }
        (TargetLanguage::Russian, _) => "Привет! Как у тебя дела сегодня?",
    }
}
