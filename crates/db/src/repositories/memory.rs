use std::collections::HashMap;

use tokio::sync::RwLock;

use tagdesk_core::domain::session::SessionTurn;
use tagdesk_core::domain::ticket::{
    ConversationId, Message, Ticket, TicketId, TicketStats, TicketStatus,
};

use super::{RepositoryError, SessionStore, TicketRepository};

/// Test double mirroring the SQL repository's semantics, including message
/// dedup and optimistic-version conflicts.
#[derive(Default)]
pub struct InMemoryTicketRepository {
    tickets: RwLock<HashMap<String, Ticket>>,
}

#[async_trait::async_trait]
impl TicketRepository for InMemoryTicketRepository {
    async fn find_by_id(&self, id: &TicketId) -> Result<Option<Ticket>, RepositoryError> {
        let tickets = self.tickets.read().await;
        Ok(tickets.values().find(|t| &t.id == id).cloned())
    }

    async fn find_by_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Ticket>, RepositoryError> {
        let tickets = self.tickets.read().await;
        Ok(tickets.get(&conversation_id.0).cloned())
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Ticket>, RepositoryError> {
        let tickets = self.tickets.read().await;
        let mut all = tickets.values().cloned().collect::<Vec<_>>();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.0.cmp(&b.id.0)));
        Ok(all.into_iter().skip(offset.max(0) as usize).take(limit.max(0) as usize).collect())
    }

    async fn stats(&self) -> Result<TicketStats, RepositoryError> {
        let tickets = self.tickets.read().await;
        let mut stats = TicketStats::default();
        let mut confidence_sum = 0.0;
        for ticket in tickets.values() {
            stats.total += 1;
            match ticket.status {
                TicketStatus::Open => stats.open += 1,
                TicketStatus::Pending => stats.pending += 1,
                TicketStatus::Closed => stats.closed += 1,
            }
            if let Some(tag) = &ticket.current_tag {
                stats.tagged += 1;
                confidence_sum += tag.confidence;
            }
        }
        if stats.tagged > 0 {
            stats.average_confidence = confidence_sum / stats.tagged as f64;
        }
        Ok(stats)
    }

    async fn commit_ingestion(
        &self,
        ticket: &Ticket,
        new_messages: &[Message],
    ) -> Result<(), RepositoryError> {
        let mut tickets = self.tickets.write().await;
        let stored_version =
            tickets.get(&ticket.conversation_id.0).map(|stored| stored.version).unwrap_or(0);
        if stored_version != ticket.version {
            return Err(RepositoryError::Conflict(ticket.id.0.clone()));
        }

        let mut committed = ticket.clone();
        committed.version += 1;
        committed.messages = match tickets.get(&ticket.conversation_id.0) {
            Some(stored) => {
                let mut merged = stored.messages.clone();
                let existing =
                    merged.iter().map(Message::key).collect::<std::collections::HashSet<_>>();
                for message in new_messages {
                    if !existing.contains(&message.key()) {
                        merged.push(message.clone());
                    }
                }
                merged
            }
            None => new_messages.to_vec(),
        };
        tickets.insert(ticket.conversation_id.0.clone(), committed);
        Ok(())
    }

    async fn update_status(
        &self,
        id: &TicketId,
        status: TicketStatus,
    ) -> Result<Option<Ticket>, RepositoryError> {
        let mut tickets = self.tickets.write().await;
        for ticket in tickets.values_mut() {
            if &ticket.id == id {
                ticket.status = status;
                ticket.version += 1;
                ticket.updated_at = chrono::Utc::now();
                return Ok(Some(ticket.clone()));
            }
        }
        Ok(None)
    }
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Vec<SessionTurn>>>,
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Vec<SessionTurn>, RepositoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session_id).cloned().unwrap_or_default())
    }

    async fn append(&self, session_id: &str, turns: &[SessionTurn]) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        let stored = sessions.entry(session_id.to_string()).or_default();
        for turn in turns {
            if !stored.contains(turn) {
                stored.push(turn.clone());
            }
        }
        Ok(())
    }
}
