use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::warn;

use tagdesk_core::domain::session::SessionTurn;
use tagdesk_core::domain::ticket::Tag;
use tagdesk_db::SessionStore;

use crate::llm::LlmClient;
use crate::response::parse_semantic_response;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("semantic classifier timed out after {0:?}")]
    Timeout(Duration),
    #[error("semantic transport failure: {0}")]
    Transport(String),
    #[error("unparseable semantic reply: {0}")]
    Protocol(String),
    #[error("session store failure: {0}")]
    Session(String),
}

#[async_trait]
pub trait SemanticClassifier: Send + Sync {
    /// Classifies the conversation. With a session id, new turns are merged
    /// into the stored session context first so repeated calls see the
    /// cumulative conversation; without one, the turns form an ephemeral
    /// context that is discarded afterwards.
    async fn analyze(
        &self,
        turns: &[SessionTurn],
        session_id: Option<&str>,
    ) -> Result<Tag, ClassifierError>;
}

const SYSTEM_PROMPT: &str = "You classify customer-service conversations for a travel and \
services company.\n\
Pick exactly one service_type from: Flight, Hotel, Visa, eSIM, Wallet, Other.\n\
Pick exactly one category from: Cancellation, Modify, Top Up, Withdraw, Order Re-Check, \
Pre-Purchase, Others.\n\
Judge the customer's actual intent from the whole conversation, not surface keywords. \
Use Other/Others only when the conversation genuinely does not fit.\n\
Reply with a single JSON object and nothing else:\n\
{\"service_type\": \"...\", \"category\": \"...\", \"confidence\": 0.0-1.0, \
\"reasoning\": \"one or two sentences\"}";

/// Layer-2 classifier backed by an LLM. Applies the configured deadline to
/// every attempt and retries a transport failure at most `max_retries` times
/// with a fixed backoff; timeouts are terminal because the caller already
/// waited out a full deadline.
pub struct LlmSemanticClassifier {
    llm: Arc<dyn LlmClient>,
    sessions: Arc<dyn SessionStore>,
    timeout: Duration,
    max_retries: u32,
    retry_backoff: Duration,
}

impl LlmSemanticClassifier {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        sessions: Arc<dyn SessionStore>,
        timeout: Duration,
        max_retries: u32,
    ) -> Self {
        Self { llm, sessions, timeout, max_retries, retry_backoff: Duration::from_millis(250) }
    }

    async fn merged_context(
        &self,
        turns: &[SessionTurn],
        session_id: Option<&str>,
    ) -> Result<Vec<SessionTurn>, ClassifierError> {
        let Some(session_id) = session_id else {
            return Ok(turns.to_vec());
        };

        let mut context = self
            .sessions
            .load(session_id)
            .await
            .map_err(|e| ClassifierError::Session(e.to_string()))?;
        let fresh: Vec<SessionTurn> =
            turns.iter().filter(|turn| !context.contains(turn)).cloned().collect();
        self.sessions
            .append(session_id, &fresh)
            .await
            .map_err(|e| ClassifierError::Session(e.to_string()))?;
        context.extend(fresh);
        Ok(context)
    }
}

fn render_transcript(turns: &[SessionTurn]) -> String {
    turns
        .iter()
        .map(|turn| format!("{}: {}", turn.sender, turn.text))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl SemanticClassifier for LlmSemanticClassifier {
    async fn analyze(
        &self,
        turns: &[SessionTurn],
        session_id: Option<&str>,
    ) -> Result<Tag, ClassifierError> {
        let context = self.merged_context(turns, session_id).await?;
        let user_prompt = render_transcript(&context);

        let mut attempt = 0;
        loop {
            match tokio::time::timeout(self.timeout, self.llm.chat(SYSTEM_PROMPT, &user_prompt))
                .await
            {
                Err(_) => return Err(ClassifierError::Timeout(self.timeout)),
                Ok(Ok(raw)) => return parse_semantic_response(&raw, Utc::now()),
                Ok(Err(error)) if attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        attempt,
                        error = %error,
                        "semantic classifier transport failure, retrying"
                    );
                    tokio::time::sleep(self.retry_backoff).await;
                }
                Ok(Err(error)) => return Err(ClassifierError::Transport(error.to_string())),
            }
        }
    }
}
