//! Persistence of the user's profile and session history.
//!
//! Two stores implement [`CreditStore`]: [`ProfileStore`] talks to the
//! hosted REST backend, [`LocalCreditStore`] writes the balance back into the
//! configuration file when no backend is configured.

use futures_util::future::BoxFuture;
use pratique_bridge::evaluation::SessionResult;
use pratique_transcript::history::TranscriptLog;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{config::ConfigError, credit::CreditStore};

/// Lines of the previous conversation carried into the next one.
const CONTEXT_LINES: usize = 10;

/// Errors that can occur while reading or writing persisted data.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The HTTP request failed or returned an error status.
    #[error("store request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The user has no profile row.
    #[error("no profile found for user {0}")]
    MissingProfile(String),
    /// Reading or writing the local configuration failed.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Deserialize)]
struct ProfileRow {
    credits_remaining: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SessionContextRow {
    transcript: Option<String>,
}

/// One row of the `sessions` table.
#[derive(Debug, Serialize)]
struct SessionRow<'a> {
    user_id: &'a str,
    avatar_name: &'a str,
    overall_score: u8,
    vocabulary_score: u8,
    grammar_score: u8,
    pronunciation_score: u8,
    fluency_rating: pratique_bridge::evaluation::FluencyRating,
    feedback: &'a str,
    duration_seconds: u64,
    transcript: &'a str,
    date: String,
}

/// Client of the hosted profile backend (a PostgREST interface).
#[derive(Debug, Clone)]
pub struct ProfileStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    access_token: Option<String>,
}

impl ProfileStore {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        access_token: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            access_token,
        }
    }

    fn request(&self, method: reqwest::Method, table: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/rest/v1/{table}", self.base_url.trim_end_matches('/'));
        let token = self.access_token.as_deref().unwrap_or(&self.api_key);
        self.client
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(token)
    }

    /// Reads the user's balance in whole minutes. Negative balances read as
    /// zero.
    pub async fn fetch_remaining_minutes(&self, user_id: &str) -> Result<u32, StoreError> {
        let rows: Vec<ProfileRow> = self
            .request(reqwest::Method::GET, "profiles")
            .query(&[("id", format!("eq.{user_id}")), ("select", "credits_remaining".to_string())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::MissingProfile(user_id.to_string()))?;
        Ok(row.credits_remaining.unwrap_or(0.0).max(0.0).floor() as u32)
    }

    /// Returns the tail of the last conversation the user had with the given
    /// persona, if any.
    pub async fn last_session_context(
        &self,
        user_id: &str,
        avatar_name: &str,
    ) -> Result<Option<String>, StoreError> {
        let rows: Vec<SessionContextRow> = self
            .request(reqwest::Method::GET, "sessions")
            .query(&[
                ("user_id", format!("eq.{user_id}")),
                ("avatar_name", format!("eq.{avatar_name}")),
                ("select", "transcript".to_string()),
                ("order", "date.desc".to_string()),
                ("limit", "1".to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.transcript)
            .map(|transcript| context_tail(&transcript))
            .filter(|context| !context.is_empty()))
    }

    /// Stores a finished session in the user's history.
    pub async fn save_session(&self, user_id: &str, result: &SessionResult) -> Result<(), StoreError> {
        let evaluation = &result.evaluation;
        let row = SessionRow {
            user_id,
            avatar_name: &result.avatar_name,
            overall_score: evaluation.overall_score,
            vocabulary_score: evaluation.vocabulary_score,
            grammar_score: evaluation.grammar_score,
            pronunciation_score: evaluation.pronunciation_score,
            fluency_rating: evaluation.fluency_rating,
            feedback: &evaluation.feedback,
            duration_seconds: result.duration_seconds.max(0.0).round() as u64,
            transcript: &result.transcript,
            date: chrono::Utc::now().to_rfc3339(),
        };

        self.request(reqwest::Method::POST, "sessions")
            .header("Prefer", "return=minimal")
            .json(&row)
            .send()
            .await?
            .error_for_status()?;
        log::info!("Saved the session with {} to the history", result.avatar_name);
        Ok(())
    }
}

impl CreditStore for ProfileStore {
    fn persist_remaining_minutes(
        &self,
        user_id: &str,
        minutes: u32,
    ) -> BoxFuture<'static, Result<(), StoreError>> {
        let request = self
            .request(reqwest::Method::PATCH, "profiles")
            .query(&[("id", format!("eq.{user_id}"))])
            .json(&json!({ "credits_remaining": minutes }));

        Box::pin(async move {
            request.send().await?.error_for_status()?;
            Ok(())
        })
    }
}

/// Keeps the balance in the local configuration file.
#[derive(Debug, Clone, Default)]
pub struct LocalCreditStore;

impl CreditStore for LocalCreditStore {
    fn persist_remaining_minutes(
        &self,
        _user_id: &str,
        minutes: u32,
    ) -> BoxFuture<'static, Result<(), StoreError>> {
        Box::pin(async move {
            let (mut config, _) = crate::config::load_config().await?;
            config.profile.credits_remaining_minutes = minutes;
            crate::config::save_config(&config).await?;
            Ok(())
        })
    }
}

fn context_tail(transcript: &str) -> String {
    let log = TranscriptLog::parse(transcript);
    if log.is_empty() {
        return String::new();
    }
    log.tail_lines(CONTEXT_LINES).join("\n")
}

#[cfg(test)]
mod tests {
    use pratique_bridge::evaluation::Evaluation;

    use super::*;

    #[test]
    fn context_keeps_the_last_lines() {
        let transcript: String = (0..12)
            .map(|index| format!("User: line {index}\nAvatar: reply {index}\n"))
            .collect();
        let context = context_tail(&transcript);

        assert_eq!(context.lines().count(), CONTEXT_LINES);
        assert!(context.starts_with("User: line 7"));
        assert!(context.ends_with("Avatar: reply 11"));
        assert_eq!(context_tail(""), "");
    }

    #[test]
    fn session_rows_use_backend_columns() {
        let result = SessionResult {
            evaluation: Evaluation::uniform(70, "Bom trabalho"),
            transcript: "User: hi\n".to_string(),
            duration_seconds: 61.6,
            avatar_name: "Léo".to_string(),
        };
        let row = SessionRow {
            user_id: "user-1",
            avatar_name: &result.avatar_name,
            overall_score: result.evaluation.overall_score,
            vocabulary_score: result.evaluation.vocabulary_score,
            grammar_score: result.evaluation.grammar_score,
            pronunciation_score: result.evaluation.pronunciation_score,
            fluency_rating: result.evaluation.fluency_rating,
            feedback: &result.evaluation.feedback,
            duration_seconds: result.duration_seconds.round() as u64,
            transcript: &result.transcript,
            date: "2026-01-01T00:00:00+00:00".to_string(),
        };

        let value = serde_json::to_value(&row).unwrap();
        assert_eq!(value["avatar_name"], "Léo");
        assert_eq!(value["overall_score"], 70);
        assert_eq!(value["fluency_rating"], "Beginner");
        assert_eq!(value["duration_seconds"], 62);
        assert!(value.get("coherence_score").is_none());
    }
}
