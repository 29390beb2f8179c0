use serde::{Deserialize, Serialize};

/// Overall fluency level assigned by the evaluator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum FluencyRating {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
    Native,
}

/// Scores and feedback for one conversation. All scores are on a 0 to 100
/// scale.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub overall_score: u8,
    pub vocabulary_score: u8,
    pub grammar_score: u8,
    pub pronunciation_score: u8,
    pub coherence_score: u8,
    pub confidence_score: u8,
    pub fluency_rating: FluencyRating,
    /// Short feedback in pt-BR.
    pub feedback: String,
}

/// Feedback used when the evaluator could not produce a result.
pub const FALLBACK_FEEDBACK: &str =
    "Sua prática foi concluída! Continue conversando para expandir seu inglês.";

/// Feedback used when the conversation was too short to be evaluated.
pub const TOO_SHORT_FEEDBACK: &str = "Diálogo muito curto para uma avaliação precisa. \
     Tente conversar mais tópicos na próxima vez!";

impl Evaluation {
    /// An evaluation with every score set to `score`.
    pub fn uniform(score: u8, feedback: impl Into<String>) -> Self {
        Self {
            overall_score: score,
            vocabulary_score: score,
            grammar_score: score,
            pronunciation_score: score,
            coherence_score: score,
            confidence_score: score,
            fluency_rating: FluencyRating::Beginner,
            feedback: feedback.into(),
        }
    }

    /// Neutral mid-range result used whenever evaluation fails.
    pub fn fallback() -> Self {
        Self::uniform(50, FALLBACK_FEEDBACK)
    }

    /// Deterministic low result for conversations too short to judge.
    pub fn too_short() -> Self {
        Self::uniform(10, TOO_SHORT_FEEDBACK)
    }
}

/// The outcome of a finished session, handed to the frontend and stored by
/// the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionResult {
    pub evaluation: Evaluation,
    /// Raw role-tagged transcript that was evaluated.
    pub transcript: String,
    /// Wall-clock time between start and end of the session.
    pub duration_seconds: f64,
    pub avatar_name: String,
}
