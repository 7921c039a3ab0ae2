use crate::error::{AppError, AppResult};
use crate::models::{Conversation, ConversationStatus};
use async_trait::async_trait;
use deadpool_postgres::Pool;
use tokio_postgres::Row;
use uuid::Uuid;

/// Read access to conversations and block relationships, plus the one write
/// the delivery path needs (clearing a recipient's hidden flag).
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get_conversation(&self, conversation_id: Uuid) -> AppResult<Option<Conversation>>;

    /// Ids of every active conversation `identity` participates in
    async fn list_active_conversations(&self, identity: Uuid) -> AppResult<Vec<Uuid>>;

    async fn get_other_participant(
        &self,
        identity: Uuid,
        conversation_id: Uuid,
    ) -> AppResult<Option<Uuid>> {
        Ok(self
            .get_conversation(conversation_id)
            .await?
            .and_then(|c| c.other_participant(identity)))
    }

    /// True when either side has blocked the other
    async fn is_blocked(&self, a: Uuid, b: Uuid) -> AppResult<bool>;

    /// Clear the hidden flag; returns whether the conversation was hidden.
    async fn unhide_for(&self, identity: Uuid, conversation_id: Uuid) -> AppResult<bool>;
}

fn conversation_from_row(row: &Row) -> AppResult<Conversation> {
    let status: String = row.get("status");
    Ok(Conversation {
        id: row.get("id"),
        participants: [row.get("participant_a"), row.get("participant_b")],
        status: ConversationStatus::from_db(&status)
            .ok_or_else(|| AppError::Database(format!("unknown conversation status {status}")))?,
        created_at: row.get("created_at"),
    })
}

#[derive(Clone)]
pub struct PgConversationStore {
    db: Pool,
}

impl PgConversationStore {
    pub fn new(db: Pool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn get_conversation(&self, conversation_id: Uuid) -> AppResult<Option<Conversation>> {
        let client = self.db.get().await?;
        let row = client
            .query_opt(
                "SELECT id, participant_a, participant_b, status, created_at FROM conversations WHERE id = $1",
                &[&conversation_id],
            )
            .await?;
        row.as_ref().map(conversation_from_row).transpose()
    }

    async fn list_active_conversations(&self, identity: Uuid) -> AppResult<Vec<Uuid>> {
        let client = self.db.get().await?;
        let rows = client
            .query(
                r#"
                SELECT id FROM conversations
                WHERE (participant_a = $1 OR participant_b = $1)
                  AND status = 'active'
                "#,
                &[&identity],
            )
            .await?;
        Ok(rows.iter().map(|row| row.get::<_, Uuid>(0)).collect())
    }

    async fn is_blocked(&self, a: Uuid, b: Uuid) -> AppResult<bool> {
        let client = self.db.get().await?;
        let row = client
            .query_one(
                r#"
                SELECT EXISTS (
                    SELECT 1 FROM user_blocks
                    WHERE (blocker_id = $1 AND blocked_id = $2)
                       OR (blocker_id = $2 AND blocked_id = $1)
                )
                "#,
                &[&a, &b],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn unhide_for(&self, identity: Uuid, conversation_id: Uuid) -> AppResult<bool> {
        let client = self.db.get().await?;
        let removed = client
            .execute(
                "DELETE FROM conversation_hidden WHERE conversation_id = $1 AND user_id = $2",
                &[&conversation_id, &identity],
            )
            .await?;
        Ok(removed > 0)
    }
}
