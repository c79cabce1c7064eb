use serde::{Deserialize, Serialize};
use std::fmt;

/// CEFR proficiency level selected by the student.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ProficiencyLevel {
    #[default]
    A1,
    A2,
    B1,
    B2,
    C1,
    C2,
}

impl ProficiencyLevel {
    pub const ALL: [ProficiencyLevel; 6] = [
        ProficiencyLevel::A1,
        ProficiencyLevel::A2,
        ProficiencyLevel::B1,
        ProficiencyLevel::B2,
        ProficiencyLevel::C1,
        ProficiencyLevel::C2,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            ProficiencyLevel::A1 => "A1",
            ProficiencyLevel::A2 => "A2",
            ProficiencyLevel::B1 => "B1",
            ProficiencyLevel::B2 => "B2",
            ProficiencyLevel::C1 => "C1",
            ProficiencyLevel::C2 => "C2",
        }
    }
}

impl fmt::Display for ProficiencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// The language the student is practicing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TargetLanguage {
    #[default]
    English,
    Russian,
}

impl TargetLanguage {
    /// The language the tutor speaks during practice.
    ///
    /// English maps to English; every other target is tutored in Russian.
    pub fn tutoring_language(&self) -> &'static str {
        match self {
            TargetLanguage::English => "English",
            TargetLanguage::Russian => "Russian",
        }
    }
}

/// A registered student as seen by the rest of the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub username: String,
    pub proficiency_level: ProficiencyLevel,
    pub target_language: TargetLanguage,
}

/// A partial profile edit. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub proficiency_level: Option<ProficiencyLevel>,
    pub target_language: Option<TargetLanguage>,
}

impl UserProfile {
    pub fn apply(&mut self, update: &ProfileUpdate) {
        if let Some(level) = update.proficiency_level {
            self.proficiency_level = level;
        }
        if let Some(language) = update.target_language {
            self.target_language = language;
        }
    }
}
