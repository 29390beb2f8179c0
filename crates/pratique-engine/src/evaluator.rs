//! Post-session evaluation.
//!
//! The evaluator is an external collaborator: its failures must never reach
//! the user. [`evaluate_or_fallback`] always produces a complete result.

use futures_util::future::BoxFuture;
use pratique_bridge::evaluation::{Evaluation, FluencyRating};
use pratique_transcript::history::TranscriptLog;
use serde_json::{Value, json};

/// Transcripts shorter than this many characters are not sent anywhere.
const MIN_TRANSCRIPT_CHARS: usize = 50;
/// Transcripts with fewer words than this are not sent anywhere.
const MIN_TRANSCRIPT_WORDS: usize = 10;
/// Only the most recent lines are evaluated.
const EVALUATED_LINES: usize = 10;

const DEFAULT_FEEDBACK: &str = "Excelente prática! Continue assim.";

const SYSTEM_PROMPT: &str =
    "Mentor rigoroso. Seja direto e ultraconciso. Nunca seja prolixo. Use escala 0-100.";

/// Errors that can occur while evaluating a transcript.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    /// No API key was found in the environment.
    #[error("missing API key for the evaluation service")]
    MissingApiKey,
    /// The HTTP request failed or returned an error status.
    #[error("evaluation request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The model answered, but nothing usable could be parsed.
    #[error("malformed evaluation from {0}")]
    Malformed(String),
    /// Every configured model failed.
    #[error("no evaluation model produced a result")]
    Exhausted,
}

/// Scores a finished conversation.
pub trait Evaluator: Send + Sync + 'static {
    fn evaluate(&self, transcript: String) -> BoxFuture<'static, Result<Evaluation, EvaluationError>>;
}

/// Runs `evaluator`, substituting the neutral fallback on any failure.
pub async fn evaluate_or_fallback(evaluator: &dyn Evaluator, transcript: String) -> Evaluation {
    match evaluator.evaluate(transcript).await {
        Ok(evaluation) => evaluation,
        Err(err) => {
            log::warn!("Evaluation failed, using the fallback result: {err}");
            Evaluation::fallback()
        }
    }
}

/// Whether a transcript is too short to be worth evaluating.
pub fn is_too_short(transcript: &str) -> bool {
    let transcript = transcript.trim();
    transcript.chars().count() < MIN_TRANSCRIPT_CHARS
        || transcript.split_whitespace().count() < MIN_TRANSCRIPT_WORDS
}

/// Evaluator backed by the Gemini `generateContent` REST endpoint.
#[derive(Debug, Clone)]
pub struct GeminiEvaluator {
    client: reqwest::Client,
    endpoint: String,
    models: Vec<String>,
    api_key: Option<String>,
}

impl GeminiEvaluator {
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        models: Vec<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            models,
            api_key,
        }
    }

    async fn generate(&self, model: &str, api_key: &str, prompt: &str) -> Result<String, EvaluationError> {
        let url = format!("{}/{model}:generateContent", self.endpoint.trim_end_matches('/'));
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "systemInstruction": { "parts": [{ "text": SYSTEM_PROMPT }] },
            "generationConfig": {
                "maxOutputTokens": 200,
                "temperature": 0.7,
                "responseMimeType": "application/json"
            }
        });

        let response: Value = self
            .client
            .post(url)
            .query(&[("key", api_key)])
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let text: String = response["candidates"][0]["content"]["parts"]
            .as_array()
            .map(|parts| parts.iter().filter_map(|part| part["text"].as_str()).collect())
            .unwrap_or_default();
        Ok(text)
    }
}

impl Evaluator for GeminiEvaluator {
    fn evaluate(&self, transcript: String) -> BoxFuture<'static, Result<Evaluation, EvaluationError>> {
        let this = self.clone();
        Box::pin(async move {
            if is_too_short(&transcript) {
                log::info!("Transcript is too short to evaluate");
                return Ok(Evaluation::too_short());
            }

            let api_key = this.api_key.clone().ok_or(EvaluationError::MissingApiKey)?;
            let prompt = build_prompt(&transcript);
            for model in &this.models {
                match this.generate(model, &api_key, &prompt).await {
                    Ok(text) => match parse_evaluation(&text) {
                        Some(evaluation) => {
                            log::info!("Evaluated the session with {model}");
                            return Ok(evaluation);
                        }
                        None => log::warn!("{}", EvaluationError::Malformed(model.clone())),
                    },
                    Err(EvaluationError::Request(err)) if err.status() == Some(reqwest::StatusCode::NOT_FOUND) => {
                        log::debug!("Evaluation model {model} is not available");
                    }
                    Err(err) => log::warn!("Evaluation with {model} failed: {err}"),
                }
            }

            Err(EvaluationError::Exhausted)
        })
    }
}

fn build_prompt(transcript: &str) -> String {
    let log = TranscriptLog::parse(transcript);
    let recent = if log.is_empty() {
        let lines: Vec<&str> = transcript.lines().filter(|line| !line.trim().is_empty()).collect();
        lines[lines.len().saturating_sub(EVALUATED_LINES)..].join("\n")
    } else {
        log.tail_lines(EVALUATED_LINES).join("\n")
    };

    format!(
        "Aja como Native English Teacher. Analise o transcript e forneça o feedback no formato JSON.
REGRAS DE FEEDBACK:
1. LINGUAGEM OBRIGATÓRIA: Português (pt-BR).
2. ESCALA DE NOTAS: Use 0 a 100.
3. SEJA ULTRACONCISO. Use no MÁXIMO 40 palavras no feedback.
4. Use tópicos curtos.
5. Cite 1 acerto e 1 correção rápidos.
6. Dê 1 dica prática curta.
7. IMPORTANTE: Se o diálogo for curto, dê notas BAIXAS e mencione a falta de profundidade. Avalie a CAPACIDADE.

Transcript: {recent}

JSON schema:
{{
  \"overallScore\": number,
  \"vocabularyScore\": number,
  \"grammarScore\": number,
  \"pronunciationScore\": number,
  \"coherenceScore\": number,
  \"confidenceScore\": number,
  \"fluencyRating\": \"Beginner\"|\"Intermediate\"|\"Advanced\"|\"Native\",
  \"feedback\": \"string\"
}}"
    )
}

/// Parses a model answer into an evaluation, repairing it first if needed.
/// Scores are read on the 0 to 100 scale and clamped.
pub fn parse_evaluation(text: &str) -> Option<Evaluation> {
    let value = parse_lenient_json(text)?;
    if !value.is_object() {
        return None;
    }

    let score = |key: &str| -> u8 {
        let number = match &value[key] {
            Value::Number(number) => number.as_f64(),
            Value::String(text) => text.trim().parse::<f64>().ok(),
            _ => None,
        };
        number
            .filter(|number| number.is_finite())
            .map(|number| number.clamp(0.0, 100.0).round() as u8)
            .unwrap_or(50)
    };

    let fluency_rating = value["fluencyRating"]
        .as_str()
        .and_then(|rating| serde_json::from_value::<FluencyRating>(Value::String(rating.to_string())).ok())
        .unwrap_or_default();
    let feedback = value["feedback"]
        .as_str()
        .filter(|feedback| !feedback.trim().is_empty())
        .unwrap_or(DEFAULT_FEEDBACK)
        .to_string();

    Some(Evaluation {
        overall_score: score("overallScore"),
        vocabulary_score: score("vocabularyScore"),
        grammar_score: score("grammarScore"),
        pronunciation_score: score("pronunciationScore"),
        coherence_score: score("coherenceScore"),
        confidence_score: score("confidenceScore"),
        fluency_rating,
        feedback,
    })
}

/// Parses JSON that may be wrapped in markdown fences or cut off mid-way.
pub fn parse_lenient_json(text: &str) -> Option<Value> {
    let cleaned = strip_fences(text.trim()).trim();
    if cleaned.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str(cleaned) {
        return Some(value);
    }

    log::debug!("Repairing truncated evaluation JSON");
    serde_json::from_str(&repair_truncated_json(cleaned)).ok()
}

fn strip_fences(text: &str) -> &str {
    let inner = match text.split_once("```json") {
        Some((_, rest)) => rest,
        None => match text.split_once("```") {
            Some((_, rest)) => rest,
            None => return text,
        },
    };
    inner.split("```").next().unwrap_or(inner)
}

/// Closes an unterminated string, drops a dangling comma and balances
/// brackets in reverse order of opening.
fn repair_truncated_json(text: &str) -> String {
    let mut closers = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for character in text.chars() {
        if in_string {
            match character {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match character {
            '"' => in_string = true,
            '{' => closers.push('}'),
            '[' => closers.push(']'),
            '}' | ']' => {
                if closers.last() == Some(&character) {
                    closers.pop();
                }
            }
            _ => {}
        }
    }

    let mut repaired = text.to_string();
    if in_string {
        if escaped {
            repaired.pop();
        }
        repaired.push('"');
    }

    let trimmed_len = repaired.trim_end().trim_end_matches(',').trim_end().len();
    repaired.truncate(trimmed_len);
    repaired.extend(closers.into_iter().rev());
    repaired
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_transcripts_are_detected() {
        assert!(is_too_short("User: hi\nAvatar: hello!\n"));
        assert!(is_too_short(&"a".repeat(80)));
        assert!(!is_too_short(
            "User: Yesterday I went to the market with my sister\nAvatar: Nice, what did you buy there?\n"
        ));
    }

    #[test]
    fn fenced_answers_are_unwrapped() {
        let text = "```json\n{\"overallScore\": 72, \"fluencyRating\": \"Intermediate\", \"feedback\": \"Bom!\"}\n```";
        let evaluation = parse_evaluation(text).unwrap();
        assert_eq!(evaluation.overall_score, 72);
        assert_eq!(evaluation.fluency_rating, FluencyRating::Intermediate);
        assert_eq!(evaluation.feedback, "Bom!");
        // missing scores are neutral
        assert_eq!(evaluation.grammar_score, 50);
    }

    #[test]
    fn truncated_answers_are_repaired() {
        let text = r#"{"overallScore": 80, "grammarScore": "65", "feedback": "Acerto: uso do passado. Dica: pratique"#;
        let evaluation = parse_evaluation(text).unwrap();
        assert_eq!(evaluation.overall_score, 80);
        assert_eq!(evaluation.grammar_score, 65);
        assert_eq!(evaluation.feedback, "Acerto: uso do passado. Dica: pratique");

        let nested = r#"{"scores": [1, 2,"#;
        assert_eq!(parse_lenient_json(nested).unwrap(), json!({"scores": [1, 2]}));
    }

    #[test]
    fn scores_are_clamped_not_rescaled() {
        let evaluation =
            parse_evaluation(r#"{"overallScore": 7, "vocabularyScore": 140, "grammarScore": -3}"#).unwrap();
        assert_eq!(evaluation.overall_score, 7);
        assert_eq!(evaluation.vocabulary_score, 100);
        assert_eq!(evaluation.grammar_score, 0);
        assert_eq!(evaluation.feedback, DEFAULT_FEEDBACK);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_evaluation("").is_none());
        assert!(parse_evaluation("I cannot evaluate this").is_none());
        assert!(parse_evaluation("[1, 2]").is_none());
    }

    #[test]
    fn prompt_carries_only_recent_lines() {
        let transcript: String = (0..15).map(|index| format!("User: sentence {index}\n")).collect();
        let prompt = build_prompt(&transcript);
        assert!(!prompt.contains("sentence 4\n"));
        assert!(prompt.contains("User: sentence 5\n"));
        assert!(prompt.contains("User: sentence 14\n"));
    }

    struct FailingEvaluator;

    impl Evaluator for FailingEvaluator {
        fn evaluate(&self, _transcript: String) -> BoxFuture<'static, Result<Evaluation, EvaluationError>> {
            Box::pin(async { Err(EvaluationError::Exhausted) })
        }
    }

    #[tokio::test]
    async fn failures_fall_back_to_neutral_scores() {
        let evaluation = evaluate_or_fallback(&FailingEvaluator, "User: hello".to_string()).await;
        assert_eq!(evaluation, Evaluation::fallback());
    }

    #[tokio::test]
    async fn missing_key_still_handles_short_transcripts() {
        let evaluator = GeminiEvaluator::new(reqwest::Client::new(), "http://localhost", vec![], None);
        assert_eq!(
            evaluator.evaluate("User: hi".to_string()).await.unwrap(),
            Evaluation::too_short()
        );
        assert!(matches!(
            evaluator
                .evaluate("User: this transcript is definitely long enough to be evaluated by a model".to_string())
                .await,
            Err(EvaluationError::MissingApiKey)
        ));
    }
}
