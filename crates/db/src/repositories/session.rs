use chrono::{DateTime, Utc};

use tagdesk_core::domain::session::SessionTurn;

use super::{RepositoryError, SessionStore};
use crate::DbPool;

/// Durable session context for semantic-classifier continuity. Ordered by
/// turn timestamp then insertion id; the identity index makes re-appending a
/// delivered turn a no-op.
pub struct SqlSessionStore {
    pool: DbPool,
}

impl SqlSessionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct TurnRow {
    sender: String,
    text: String,
    timestamp: DateTime<Utc>,
}

#[async_trait::async_trait]
impl SessionStore for SqlSessionStore {
    async fn load(&self, session_id: &str) -> Result<Vec<SessionTurn>, RepositoryError> {
        let rows = sqlx::query_as::<_, TurnRow>(
            "SELECT sender, text, timestamp FROM session_turns \
             WHERE session_id = ? ORDER BY timestamp ASC, id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| SessionTurn { sender: row.sender, text: row.text, timestamp: row.timestamp })
            .collect())
    }

    async fn append(&self, session_id: &str, turns: &[SessionTurn]) -> Result<(), RepositoryError> {
        if turns.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO sessions (session_id, created_at, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(session_id) DO UPDATE SET updated_at = excluded.updated_at",
        )
        .bind(session_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for turn in turns {
            sqlx::query(
                "INSERT OR IGNORE INTO session_turns (session_id, sender, text, timestamp) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(session_id)
            .bind(&turn.sender)
            .bind(&turn.text)
            .bind(turn.timestamp)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use tagdesk_core::domain::session::SessionTurn;

    use crate::migrations::run_pending;
    use crate::repositories::SessionStore;
    use crate::connect_with_settings;

    use super::SqlSessionStore;

    async fn store() -> SqlSessionStore {
        // One connection: a pooled `sqlite::memory:` gives every connection
        // its own database.
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool");
        run_pending(&pool).await.expect("migrations");
        SqlSessionStore::new(pool)
    }

    #[tokio::test]
    async fn unknown_session_loads_empty() {
        let store = store().await;
        let turns = store.load("absent").await.expect("load");
        assert!(turns.is_empty());
    }

    #[tokio::test]
    async fn append_then_load_preserves_order() {
        let store = store().await;
        let base = Utc::now();
        let turns = vec![
            SessionTurn::new("user", "i need help with my visa", base),
            SessionTurn::new("agent", "which country?", base + chrono::Duration::seconds(1)),
            SessionTurn::new("user", "germany", base + chrono::Duration::seconds(2)),
        ];

        store.append("conv-1", &turns).await.expect("append");
        let loaded = store.load("conv-1").await.expect("load");
        assert_eq!(loaded, turns);
    }

    #[tokio::test]
    async fn re_appending_the_same_turns_is_idempotent() {
        let store = store().await;
        let turns = vec![SessionTurn::new("user", "cancel my esim", Utc::now())];

        store.append("conv-2", &turns).await.expect("first append");
        store.append("conv-2", &turns).await.expect("second append");

        assert_eq!(store.load("conv-2").await.expect("load").len(), 1);
    }

    #[tokio::test]
    async fn sessions_are_isolated_by_key() {
        let store = store().await;
        store
            .append("conv-a", &[SessionTurn::new("user", "hotel question", Utc::now())])
            .await
            .expect("append a");
        store
            .append("conv-b", &[SessionTurn::new("user", "flight question", Utc::now())])
            .await
            .expect("append b");

        assert_eq!(store.load("conv-a").await.expect("load").len(), 1);
        assert_eq!(store.load("conv-b").await.expect("load").len(), 1);
    }
}
