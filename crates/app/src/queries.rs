use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use tagdesk_agent::SemanticClassifier;
use tagdesk_core::{
    Category, KeywordClassifier, KeywordExplanation, MetricsRecorder, ServiceError, ServiceType,
    SessionTurn, Tag, TagMethod, Ticket, TicketId, TicketStats, TicketStatus,
};
use tagdesk_db::TicketRepository;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TicketSummary {
    pub ticket_id: String,
    pub conversation_id: String,
    pub service_type: Option<ServiceType>,
    pub category: Option<Category>,
    pub confidence: Option<f64>,
    pub method: Option<TagMethod>,
    pub status: TicketStatus,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Ticket> for TicketSummary {
    fn from(ticket: &Ticket) -> Self {
        Self {
            ticket_id: ticket.id.0.clone(),
            conversation_id: ticket.conversation_id.0.clone(),
            service_type: ticket.current_tag.as_ref().map(|t| t.service_type),
            category: ticket.current_tag.as_ref().map(|t| t.category),
            confidence: ticket.current_tag.as_ref().map(|t| t.confidence),
            method: ticket.current_tag.as_ref().map(|t| t.method),
            status: ticket.status,
            message_count: ticket.messages.len(),
            created_at: ticket.created_at,
            updated_at: ticket.updated_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MessageView {
    pub id: Option<i64>,
    pub sender: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Full view of one ticket: the summary plus the ordered message history and
/// how many of those messages came from the customer.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TicketDetails {
    #[serde(flatten)]
    pub summary: TicketSummary,
    pub messages: Vec<MessageView>,
    pub user_message_count: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TagExplanation {
    pub ticket_id: String,
    pub service_type: ServiceType,
    pub category: Category,
    pub confidence: f64,
    pub explanation: String,
    pub method: TagMethod,
    pub timestamp: DateTime<Utc>,
    /// Matched keyword phrases per label, recomputed over the stored history.
    pub keyword_matches: KeywordExplanation,
}

/// Read-side and administrative operations: explanation, status updates,
/// listing, stats, and persistence-free direct analysis.
pub struct TicketQueryService {
    tickets: Arc<dyn TicketRepository>,
    keyword: Arc<KeywordClassifier>,
    semantic: Arc<dyn SemanticClassifier>,
    metrics: Arc<MetricsRecorder>,
}

impl TicketQueryService {
    pub fn new(
        tickets: Arc<dyn TicketRepository>,
        keyword: Arc<KeywordClassifier>,
        semantic: Arc<dyn SemanticClassifier>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self { tickets, keyword, semantic, metrics }
    }

    pub async fn explain_tag(&self, ticket_id: &str) -> Result<TagExplanation, ServiceError> {
        let ticket = self.find_ticket(ticket_id).await?;
        let tag = ticket
            .current_tag
            .as_ref()
            .ok_or_else(|| ServiceError::NotFound(format!("ticket {ticket_id} has no tag")))?;

        Ok(TagExplanation {
            ticket_id: ticket.id.0.clone(),
            service_type: tag.service_type,
            category: tag.category,
            confidence: tag.confidence,
            explanation: tag.reasoning.clone(),
            method: tag.method,
            timestamp: tag.timestamp,
            keyword_matches: self.keyword.explain(&ticket.combined_text()),
        })
    }

    pub async fn ticket_details(&self, ticket_id: &str) -> Result<TicketDetails, ServiceError> {
        let ticket = self.find_ticket(ticket_id).await?;
        let messages: Vec<MessageView> = ticket
            .messages
            .iter()
            .map(|message| MessageView {
                id: message.id,
                sender: message.sender.clone(),
                text: message.text.clone(),
                timestamp: message.timestamp,
            })
            .collect();
        let user_message_count = messages.iter().filter(|m| m.sender == "user").count();

        Ok(TicketDetails { summary: TicketSummary::from(&ticket), messages, user_message_count })
    }

    pub async fn update_status(
        &self,
        ticket_id: &str,
        status: TicketStatus,
    ) -> Result<TicketSummary, ServiceError> {
        let mut ticket = self.find_ticket(ticket_id).await?;
        // Validates the transition before touching storage.
        ticket.transition_to(status, Utc::now())?;

        let updated = self
            .tickets
            .update_status(&ticket.id, status)
            .await
            .map_err(ServiceError::from)?
            .ok_or_else(|| ServiceError::NotFound(ticket_id.to_string()))?;
        Ok(TicketSummary::from(&updated))
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<TicketSummary>, ServiceError> {
        let tickets = self.tickets.list(limit, offset).await.map_err(ServiceError::from)?;
        Ok(tickets.iter().map(TicketSummary::from).collect())
    }

    pub async fn stats(&self) -> Result<TicketStats, ServiceError> {
        self.tickets.stats().await.map_err(ServiceError::from)
    }

    /// Diagnostic classification that never touches the ticket store. With a
    /// session id the semantic classifier still accumulates context under
    /// that key; without one the analysis is fully ephemeral.
    pub async fn analyze(
        &self,
        turns: &[SessionTurn],
        session_id: Option<&str>,
    ) -> Result<Tag, ServiceError> {
        if turns.iter().all(|turn| turn.text.trim().is_empty()) {
            return Err(ServiceError::Validation("nothing to analyze".to_string()));
        }

        let started = Instant::now();
        match self.semantic.analyze(turns, session_id).await {
            Ok(tag) => {
                self.metrics.record(tag.method, tag.confidence, started.elapsed(), true);
                Ok(tag)
            }
            Err(error) => {
                self.metrics.record(TagMethod::Semantic, 0.0, started.elapsed(), false);
                Err(ServiceError::Classifier(error.to_string()))
            }
        }
    }

    pub fn metrics_snapshot(&self) -> tagdesk_core::MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    async fn find_ticket(&self, ticket_id: &str) -> Result<Ticket, ServiceError> {
        self.tickets
            .find_by_id(&TicketId(ticket_id.to_string()))
            .await
            .map_err(ServiceError::from)?
            .ok_or_else(|| ServiceError::NotFound(ticket_id.to_string()))
    }
}
