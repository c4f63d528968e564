use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use tracing::{info, warn};

use tagdesk_agent::SemanticClassifier;
use tagdesk_core::{
    Category, ConfidenceRouter, ConversationId, KeywordClassifier, Message, MessageKey,
    MetricsRecorder, Route, ServiceError, ServiceType, SessionTurn, TagMethod, Ticket,
    TicketStatus,
};
use tagdesk_db::TicketRepository;

#[derive(Clone, Debug, Deserialize)]
pub struct IncomingMessage {
    pub text: String,
    pub sender: String,
    /// Stamped with the batch timestamp when the sender supplies none.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct IngestionRequest {
    pub conversation_id: String,
    pub timestamp: DateTime<Utc>,
    pub messages: Vec<IncomingMessage>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IngestionOutcome {
    pub ticket_id: String,
    pub conversation_id: String,
    pub service_type: ServiceType,
    pub category: Category,
    pub confidence: f64,
    pub method: TagMethod,
    pub status: TicketStatus,
    pub message_count: usize,
}

/// One async mutex per conversation id. Writers for the same conversation
/// serialize here; different conversations never contend. Entries are kept
/// for the process lifetime, which is bounded by the number of distinct
/// conversations seen.
#[derive(Default)]
struct ConversationLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ConversationLocks {
    async fn acquire(&self, conversation_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(map.entry(conversation_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

/// The ingestion pipeline: upsert ticket, append the new messages, classify
/// the full history, route, escalate when routed semantic, commit atomically.
///
/// A semantic-classifier failure never fails the ingestion. The keyword tag
/// stands in, marked `keyword_fallback` so downstream consumers can tell a
/// degraded result from a genuinely confident keyword one.
pub struct IngestionService {
    tickets: Arc<dyn TicketRepository>,
    keyword: Arc<KeywordClassifier>,
    router: ConfidenceRouter,
    semantic: Arc<dyn SemanticClassifier>,
    metrics: Arc<MetricsRecorder>,
    locks: ConversationLocks,
}

impl IngestionService {
    pub fn new(
        tickets: Arc<dyn TicketRepository>,
        keyword: Arc<KeywordClassifier>,
        router: ConfidenceRouter,
        semantic: Arc<dyn SemanticClassifier>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self { tickets, keyword, router, semantic, metrics, locks: ConversationLocks::default() }
    }

    pub async fn ingest(
        &self,
        mut request: IngestionRequest,
    ) -> Result<IngestionOutcome, ServiceError> {
        validate(&request)?;

        // Normalize the key once so the lock and the ticket lookup agree on
        // which conversation this is.
        request.conversation_id = request.conversation_id.trim().to_string();
        let _guard = self.locks.acquire(&request.conversation_id).await;
        let started = Instant::now();

        // Commit conflicts come from writers outside this process (another
        // replica sharing the database), so one reload-and-redo is enough
        // under the per-conversation lock.
        let mut attempts_left = 1;
        loop {
            match self.ingest_locked(&request, started).await {
                Err(ServiceError::Conflict(ticket_id)) if attempts_left > 0 => {
                    attempts_left -= 1;
                    warn!(ticket_id = %ticket_id, "ingestion commit conflict, retrying once");
                }
                other => return other,
            }
        }
    }

    async fn ingest_locked(
        &self,
        request: &IngestionRequest,
        started: Instant,
    ) -> Result<IngestionOutcome, ServiceError> {
        let now = Utc::now();
        let conversation_id = ConversationId(request.conversation_id.clone());

        let mut ticket = match self.tickets.find_by_conversation(&conversation_id).await {
            Ok(Some(existing)) => existing,
            Ok(None) => Ticket::new(conversation_id.clone(), now),
            Err(error) => return Err(ServiceError::from(error)),
        };

        let new_messages = merge_messages(&mut ticket, request, now);

        let keyword_tag = self.keyword.classify(&ticket.combined_text(), now);
        let (tag, degraded) = match self.router.route(&keyword_tag) {
            Route::Keyword => (keyword_tag, false),
            Route::Semantic => {
                let turns: Vec<SessionTurn> = ticket
                    .messages
                    .iter()
                    .map(|m| SessionTurn::new(m.sender.clone(), m.text.clone(), m.timestamp))
                    .collect();
                match self.semantic.analyze(&turns, Some(&conversation_id.0)).await {
                    Ok(semantic_tag) => (semantic_tag, false),
                    Err(error) => {
                        warn!(
                            conversation_id = %conversation_id,
                            error = %error,
                            "semantic classification failed, keeping keyword tag as fallback"
                        );
                        (keyword_tag.with_method(TagMethod::KeywordFallback), true)
                    }
                }
            }
        };

        ticket.replace_tag(tag.clone(), now);
        self.tickets.commit_ingestion(&ticket, &new_messages).await.map_err(ServiceError::from)?;

        self.metrics.record(tag.method, tag.confidence, started.elapsed(), !degraded);
        info!(
            conversation_id = %conversation_id,
            ticket_id = %ticket.id,
            service_type = %tag.service_type,
            category = %tag.category,
            confidence = tag.confidence,
            method = %tag.method,
            new_messages = new_messages.len(),
            "ingestion committed"
        );

        Ok(IngestionOutcome {
            ticket_id: ticket.id.0,
            conversation_id: conversation_id.0,
            service_type: tag.service_type,
            category: tag.category,
            confidence: tag.confidence,
            method: tag.method,
            status: ticket.status,
            message_count: ticket.messages.len(),
        })
    }
}

fn validate(request: &IngestionRequest) -> Result<(), ServiceError> {
    if request.conversation_id.trim().is_empty() {
        return Err(ServiceError::Validation("conversation_id must not be empty".to_string()));
    }
    if request.messages.is_empty() {
        return Err(ServiceError::Validation("messages must not be empty".to_string()));
    }
    for (index, message) in request.messages.iter().enumerate() {
        if message.text.trim().is_empty() {
            return Err(ServiceError::Validation(format!("messages[{index}].text is empty")));
        }
        if message.sender.trim().is_empty() {
            return Err(ServiceError::Validation(format!("messages[{index}].sender is empty")));
        }
    }
    Ok(())
}

/// Appends the batch to the ticket, skipping redelivered messages. Identity
/// is the (text, sender, timestamp) tuple; the surrounding system supplies no
/// message id. Returns only the genuinely new messages for persistence.
fn merge_messages(
    ticket: &mut Ticket,
    request: &IngestionRequest,
    now: DateTime<Utc>,
) -> Vec<Message> {
    let mut seen: HashSet<MessageKey> = ticket.messages.iter().map(Message::key).collect();
    let mut new_messages = Vec::new();

    for incoming in &request.messages {
        let message = Message {
            id: None,
            ticket_id: Some(ticket.id.clone()),
            text: incoming.text.clone(),
            sender: incoming.sender.clone(),
            timestamp: incoming.timestamp.unwrap_or(request.timestamp),
        };
        if seen.insert(message.key()) {
            ticket.append_message(message.clone(), now);
            new_messages.push(message);
        }
    }

    new_messages
}
