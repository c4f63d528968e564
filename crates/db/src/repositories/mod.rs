use async_trait::async_trait;
use thiserror::Error;

use tagdesk_core::domain::session::SessionTurn;
use tagdesk_core::domain::ticket::{
    ConversationId, Message, Ticket, TicketId, TicketStats, TicketStatus,
};
use tagdesk_core::errors::ServiceError;

pub mod memory;
pub mod session;
pub mod ticket;

pub use memory::{InMemorySessionStore, InMemoryTicketRepository};
pub use session::SqlSessionStore;
pub use ticket::SqlTicketRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("write conflict on ticket {0}")]
    Conflict(String),
}

impl From<RepositoryError> for ServiceError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Conflict(id) => ServiceError::Conflict(id),
            other => ServiceError::Persistence(other.to_string()),
        }
    }
}

#[async_trait]
pub trait TicketRepository: Send + Sync {
    async fn find_by_id(&self, id: &TicketId) -> Result<Option<Ticket>, RepositoryError>;

    async fn find_by_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Ticket>, RepositoryError>;

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Ticket>, RepositoryError>;

    async fn stats(&self) -> Result<TicketStats, RepositoryError>;

    /// Commits one whole ingestion atomically: the ticket row (created when
    /// `ticket.version == 0`, otherwise updated), the new messages, and the
    /// tag land together or not at all. Fails with `Conflict` when another
    /// writer bumped the stored version first.
    async fn commit_ingestion(
        &self,
        ticket: &Ticket,
        new_messages: &[Message],
    ) -> Result<(), RepositoryError>;

    async fn update_status(
        &self,
        id: &TicketId,
        status: TicketStatus,
    ) -> Result<Option<Ticket>, RepositoryError>;
}

/// Durable context for semantic-classifier session continuity, keyed by
/// session id. Turns are ordered; appending an already-present turn is a
/// no-op so redelivered batches never double the context.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Vec<SessionTurn>, RepositoryError>;

    async fn append(&self, session_id: &str, turns: &[SessionTurn]) -> Result<(), RepositoryError>;
}
