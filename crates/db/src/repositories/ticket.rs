use chrono::{DateTime, Utc};

use tagdesk_core::domain::ticket::{
    Category, ConversationId, Message, ServiceType, Tag, TagMethod, Ticket, TicketId, TicketStats,
    TicketStatus,
};

use super::{RepositoryError, TicketRepository};
use crate::DbPool;

pub struct SqlTicketRepository {
    pool: DbPool,
}

impl SqlTicketRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_messages(&self, ticket_id: &str) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT id, ticket_id, text, sender, timestamp FROM messages \
             WHERE ticket_id = ? ORDER BY timestamp ASC, id ASC",
        )
        .bind(ticket_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(MessageRow::into_domain).collect())
    }

    async fn hydrate(&self, row: TicketRow) -> Result<Ticket, RepositoryError> {
        let messages = self.load_messages(&row.ticket_id).await?;
        row.into_domain(messages)
    }
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    ticket_id: String,
    conversation_id: String,
    service_type: Option<String>,
    category: Option<String>,
    confidence: f64,
    method: Option<String>,
    reasoning: String,
    tag_timestamp: Option<DateTime<Utc>>,
    status: String,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

const TICKET_COLUMNS: &str = "ticket_id, conversation_id, service_type, category, confidence, \
     method, reasoning, tag_timestamp, status, version, created_at, updated_at";

impl TicketRow {
    fn into_domain(self, messages: Vec<Message>) -> Result<Ticket, RepositoryError> {
        let decode = |e: tagdesk_core::errors::DomainError| RepositoryError::Decode(e.to_string());

        let current_tag = match (self.service_type, self.category, self.method) {
            (Some(service), Some(category), Some(method)) => Some(Tag {
                service_type: ServiceType::parse(&service).map_err(decode)?,
                category: Category::parse(&category).map_err(decode)?,
                confidence: self.confidence,
                method: TagMethod::parse(&method).map_err(decode)?,
                reasoning: self.reasoning,
                timestamp: self.tag_timestamp.unwrap_or(self.updated_at),
            }),
            (None, None, None) => None,
            _ => {
                return Err(RepositoryError::Decode(format!(
                    "ticket {} has a partially stored tag",
                    self.ticket_id
                )))
            }
        };

        Ok(Ticket {
            id: TicketId(self.ticket_id),
            conversation_id: ConversationId(self.conversation_id),
            messages,
            current_tag,
            status: TicketStatus::parse(&self.status).map_err(decode)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
            version: self.version,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    ticket_id: String,
    text: String,
    sender: String,
    timestamp: DateTime<Utc>,
}

impl MessageRow {
    fn into_domain(self) -> Message {
        Message {
            id: Some(self.id),
            ticket_id: Some(TicketId(self.ticket_id)),
            text: self.text,
            sender: self.sender,
            timestamp: self.timestamp,
        }
    }
}

fn tag_columns(tag: Option<&Tag>) -> (Option<&'static str>, Option<&'static str>, f64, Option<&'static str>, String, Option<DateTime<Utc>>) {
    match tag {
        Some(tag) => (
            Some(tag.service_type.as_str()),
            Some(tag.category.as_str()),
            tag.confidence,
            Some(tag.method.as_str()),
            tag.reasoning.clone(),
            Some(tag.timestamp),
        ),
        None => (None, None, 0.0, None, String::new(), None),
    }
}

fn map_unique_violation(error: sqlx::Error, ticket_id: &str) -> RepositoryError {
    if let sqlx::Error::Database(ref db_error) = error {
        if db_error.is_unique_violation() {
            return RepositoryError::Conflict(ticket_id.to_string());
        }
    }
    RepositoryError::Database(error)
}

#[async_trait::async_trait]
impl TicketRepository for SqlTicketRepository {
    async fn find_by_id(&self, id: &TicketId) -> Result<Option<Ticket>, RepositoryError> {
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE ticket_id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Ticket>, RepositoryError> {
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE conversation_id = ?"
        ))
        .bind(&conversation_id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Ticket>, RepositoryError> {
        let rows = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets ORDER BY created_at DESC, ticket_id LIMIT ? OFFSET ?"
        ))
        .bind(limit.max(0))
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await?;

        let mut tickets = Vec::with_capacity(rows.len());
        for row in rows {
            tickets.push(self.hydrate(row).await?);
        }
        Ok(tickets)
    }

    async fn stats(&self) -> Result<TicketStats, RepositoryError> {
        let (total, open, pending, closed, tagged, average_confidence): (i64, i64, i64, i64, i64, Option<f64>) =
            sqlx::query_as(
                "SELECT COUNT(*), \
                 COALESCE(SUM(status = 'open'), 0), \
                 COALESCE(SUM(status = 'pending'), 0), \
                 COALESCE(SUM(status = 'closed'), 0), \
                 COALESCE(SUM(method IS NOT NULL), 0), \
                 AVG(CASE WHEN method IS NOT NULL THEN confidence END) \
                 FROM tickets",
            )
            .fetch_one(&self.pool)
            .await?;

        Ok(TicketStats {
            total: total as u64,
            open: open as u64,
            pending: pending as u64,
            closed: closed as u64,
            tagged: tagged as u64,
            average_confidence: average_confidence.unwrap_or(0.0),
        })
    }

    async fn commit_ingestion(
        &self,
        ticket: &Ticket,
        new_messages: &[Message],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let (service_type, category, confidence, method, reasoning, tag_timestamp) =
            tag_columns(ticket.current_tag.as_ref());

        if ticket.version == 0 {
            sqlx::query(
                "INSERT INTO tickets (ticket_id, conversation_id, service_type, category, \
                 confidence, method, reasoning, tag_timestamp, status, version, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
            )
            .bind(&ticket.id.0)
            .bind(&ticket.conversation_id.0)
            .bind(service_type)
            .bind(category)
            .bind(confidence)
            .bind(method)
            .bind(&reasoning)
            .bind(tag_timestamp)
            .bind(ticket.status.as_str())
            .bind(ticket.created_at)
            .bind(ticket.updated_at)
            .execute(&mut *tx)
            .await
            // A racing creator for the same conversation_id trips the unique
            // index; surfaced as Conflict so the caller reloads and retries.
            .map_err(|e| map_unique_violation(e, &ticket.id.0))?;
        } else {
            let result = sqlx::query(
                "UPDATE tickets SET service_type = ?, category = ?, confidence = ?, method = ?, \
                 reasoning = ?, tag_timestamp = ?, status = ?, version = version + 1, updated_at = ? \
                 WHERE ticket_id = ? AND version = ?",
            )
            .bind(service_type)
            .bind(category)
            .bind(confidence)
            .bind(method)
            .bind(&reasoning)
            .bind(tag_timestamp)
            .bind(ticket.status.as_str())
            .bind(ticket.updated_at)
            .bind(&ticket.id.0)
            .bind(ticket.version)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(RepositoryError::Conflict(ticket.id.0.clone()));
            }
        }

        for message in new_messages {
            sqlx::query(
                "INSERT OR IGNORE INTO messages (ticket_id, text, sender, timestamp) VALUES (?, ?, ?, ?)",
            )
            .bind(&ticket.id.0)
            .bind(&message.text)
            .bind(&message.sender)
            .bind(message.timestamp)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_status(
        &self,
        id: &TicketId,
        status: TicketStatus,
    ) -> Result<Option<Ticket>, RepositoryError> {
        let result = sqlx::query(
            "UPDATE tickets SET status = ?, version = version + 1, updated_at = ? WHERE ticket_id = ?",
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.find_by_id(id).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use tagdesk_core::domain::ticket::{
        Category, ConversationId, Message, ServiceType, Tag, TagMethod, Ticket, TicketStatus,
    };

    use crate::migrations::run_pending;
    use crate::repositories::{RepositoryError, TicketRepository};
    use crate::{connect_with_settings, DbPool};

    use super::SqlTicketRepository;

    async fn repo() -> (SqlTicketRepository, DbPool) {
        // One connection: a pooled `sqlite::memory:` gives every connection
        // its own database.
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool");
        run_pending(&pool).await.expect("migrations");
        (SqlTicketRepository::new(pool.clone()), pool)
    }

    fn sample_ticket(conversation: &str) -> (Ticket, Vec<Message>) {
        let now = Utc::now();
        let mut ticket = Ticket::new(ConversationId(conversation.to_string()), now);
        let message = Message {
            id: None,
            ticket_id: None,
            text: "cancel my hotel reservation".to_string(),
            sender: "user".to_string(),
            timestamp: now,
        };
        ticket.append_message(message.clone(), now);
        ticket.replace_tag(
            Tag {
                service_type: ServiceType::Hotel,
                category: Category::Cancellation,
                confidence: 0.82,
                method: TagMethod::Keyword,
                reasoning: "matched hotel keywords".to_string(),
                timestamp: now,
            },
            now,
        );
        let new_messages = ticket.messages.clone();
        (ticket, new_messages)
    }

    #[tokio::test]
    async fn commit_and_reload_round_trips_the_aggregate() {
        let (repo, _pool) = repo().await;
        let (ticket, new_messages) = sample_ticket("conv-1");

        repo.commit_ingestion(&ticket, &new_messages).await.expect("commit");
        let loaded = repo
            .find_by_conversation(&ticket.conversation_id)
            .await
            .expect("lookup")
            .expect("ticket exists");

        assert_eq!(loaded.id, ticket.id);
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.status, TicketStatus::Open);
        assert_eq!(loaded.messages.len(), 1);
        let tag = loaded.current_tag.expect("tag stored");
        assert_eq!(tag.service_type, ServiceType::Hotel);
        assert_eq!(tag.method, TagMethod::Keyword);
    }

    #[tokio::test]
    async fn redelivered_messages_are_not_duplicated() {
        let (repo, _pool) = repo().await;
        let (ticket, new_messages) = sample_ticket("conv-2");

        repo.commit_ingestion(&ticket, &new_messages).await.expect("first commit");
        let mut reloaded = repo
            .find_by_conversation(&ticket.conversation_id)
            .await
            .expect("lookup")
            .expect("exists");
        reloaded.updated_at = Utc::now();
        repo.commit_ingestion(&reloaded, &new_messages).await.expect("second commit");

        let final_state = repo
            .find_by_conversation(&ticket.conversation_id)
            .await
            .expect("lookup")
            .expect("exists");
        assert_eq!(final_state.messages.len(), 1);
        assert_eq!(final_state.version, 2);
    }

    #[tokio::test]
    async fn stale_version_commit_is_a_conflict() {
        let (repo, _pool) = repo().await;
        let (ticket, new_messages) = sample_ticket("conv-3");

        repo.commit_ingestion(&ticket, &new_messages).await.expect("create");
        let loaded = repo
            .find_by_conversation(&ticket.conversation_id)
            .await
            .expect("lookup")
            .expect("exists");

        repo.commit_ingestion(&loaded, &[]).await.expect("first writer wins");
        let error = repo.commit_ingestion(&loaded, &[]).await.expect_err("stale write");
        assert!(matches!(error, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn duplicate_conversation_insert_is_a_conflict() {
        let (repo, _pool) = repo().await;
        let (first, first_messages) = sample_ticket("conv-4");
        let (second, second_messages) = sample_ticket("conv-4");

        repo.commit_ingestion(&first, &first_messages).await.expect("create");
        let error =
            repo.commit_ingestion(&second, &second_messages).await.expect_err("duplicate key");
        assert!(matches!(error, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn update_status_persists_and_missing_ticket_yields_none() {
        let (repo, _pool) = repo().await;
        let (ticket, new_messages) = sample_ticket("conv-5");
        repo.commit_ingestion(&ticket, &new_messages).await.expect("create");

        let updated = repo
            .update_status(&ticket.id, TicketStatus::Closed)
            .await
            .expect("update")
            .expect("ticket exists");
        assert_eq!(updated.status, TicketStatus::Closed);

        let missing = repo
            .update_status(&tagdesk_core::domain::ticket::TicketId("absent".into()), TicketStatus::Open)
            .await
            .expect("update call");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn stats_aggregate_counts_and_confidence() {
        let (repo, _pool) = repo().await;
        let (open_ticket, open_messages) = sample_ticket("conv-6");
        repo.commit_ingestion(&open_ticket, &open_messages).await.expect("create open");

        let (mut closed_ticket, closed_messages) = sample_ticket("conv-7");
        closed_ticket.status = TicketStatus::Closed;
        repo.commit_ingestion(&closed_ticket, &closed_messages).await.expect("create closed");

        let stats = repo.stats().await.expect("stats");
        assert_eq!(stats.total, 2);
        assert_eq!(stats.open, 1);
        assert_eq!(stats.closed, 1);
        assert_eq!(stats.tagged, 2);
        assert!((stats.average_confidence - 0.82).abs() < 1e-9);
    }
}
