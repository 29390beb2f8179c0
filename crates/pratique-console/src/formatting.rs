use std::fmt::Write;

use pratique_bridge::{
    evaluation::SessionResult,
    session::{ConnectionState, SessionStatus},
};

/// Formats the remaining credit as `MM:SS`, or `HH:MM:SS` past an hour.
pub fn format_remaining(seconds: u32) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes:02}:{secs:02}")
    }
}

/// One-line description of what the session is doing, in the product's
/// locale. `feminine` selects the grammatical agreement for the persona.
pub fn status_message(status: &SessionStatus, persona: &str, feminine: bool) -> String {
    if status.finishing {
        return "Finalizando...".to_string();
    }
    if status.reconnecting {
        return "Reconectando...".to_string();
    }

    if status.is_connected() {
        if status.speaking {
            return format!("{persona} está falando...");
        }
        let ending = if feminine { "a" } else { "o" };
        return format!("{persona} está pront{ending} para te ouvir");
    }

    match status.connection {
        ConnectionState::Closed => match status.last_error {
            Some(error) => error.to_string(),
            None => "Sessão encerrada.".to_string(),
        },
        _ => "Iniciando conexão...".to_string(),
    }
}

/// Prefixes a transcript unit with its speaker.
pub fn format_transcript(text: &str, is_user: bool, persona: &str) -> String {
    let speaker = if is_user { "Você" } else { persona };
    format!("{speaker}: {}", text.trim())
}

/// Multi-line summary of a finished session.
pub fn format_result(result: &SessionResult) -> String {
    let evaluation = &result.evaluation;
    let mut out = String::new();
    // writing into a String cannot fail
    let _ = writeln!(
        out,
        "Sessão com {} ({}s)",
        result.avatar_name,
        result.duration_seconds.round() as u64
    );
    let _ = writeln!(out, "Nota geral: {}/100 ({:?})", evaluation.overall_score, evaluation.fluency_rating);
    let _ = writeln!(
        out,
        "Vocabulário {} | Gramática {} | Pronúncia {} | Coerência {} | Confiança {}",
        evaluation.vocabulary_score,
        evaluation.grammar_score,
        evaluation.pronunciation_score,
        evaluation.coherence_score,
        evaluation.confidence_score
    );
    let _ = write!(out, "{}", evaluation.feedback);
    out
}

#[cfg(test)]
mod tests {
    use pratique_bridge::{evaluation::Evaluation, session::SessionError};

    use super::*;

    fn status(connection: ConnectionState) -> SessionStatus {
        SessionStatus {
            connection,
            ..SessionStatus::default()
        }
    }

    #[test]
    fn remaining_time_is_padded() {
        assert_eq!(format_remaining(0), "00:00");
        assert_eq!(format_remaining(61), "01:01");
        assert_eq!(format_remaining(3_725), "01:02:05");
    }

    #[test]
    fn status_follows_priority() {
        let mut current = status(ConnectionState::Open);
        assert_eq!(status_message(&current, "Sophia", true), "Sophia está pronta para te ouvir");
        assert_eq!(status_message(&current, "Léo", false), "Léo está pronto para te ouvir");

        current.speaking = true;
        assert_eq!(status_message(&current, "Léo", false), "Léo está falando...");

        current.reconnecting = true;
        assert_eq!(status_message(&current, "Léo", false), "Reconectando...");

        current.finishing = true;
        assert_eq!(status_message(&current, "Léo", false), "Finalizando...");

        assert_eq!(
            status_message(&status(ConnectionState::Connecting), "Léo", false),
            "Iniciando conexão..."
        );
    }

    #[test]
    fn closed_sessions_show_the_error() {
        let mut closed = status(ConnectionState::Closed);
        closed.last_error = Some(SessionError::ConnectionLost);
        assert_eq!(
            status_message(&closed, "Léo", false),
            SessionError::ConnectionLost.to_string()
        );
    }

    #[test]
    fn results_are_summarized() {
        let result = SessionResult {
            evaluation: Evaluation::uniform(72, "Bom ritmo."),
            transcript: String::new(),
            duration_seconds: 95.4,
            avatar_name: "Maya".to_string(),
        };
        let summary = format_result(&result);
        assert!(summary.starts_with("Sessão com Maya (95s)"));
        assert!(summary.contains("Nota geral: 72/100"));
        assert!(summary.ends_with("Bom ritmo."));
    }
}
