//! Message ledger
//!
//! Every status transition is a conditional update against the current row
//! state, so two concurrent releases can never both claim the same message.

use crate::error::{AppError, AppResult};
use crate::models::{Message, MessageStatus, MessageType, NewMessage, QueuedReason};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::Row;
use uuid::Uuid;

#[async_trait]
pub trait MessageLedger: Send + Sync {
    /// Persist a new message and assign its per-conversation sequence number.
    async fn insert(&self, new: NewMessage) -> AppResult<Message>;

    async fn get(&self, id: Uuid) -> AppResult<Option<Message>>;

    /// Move `id` from `expected` to `next`. Returns None when the row is no
    /// longer in `expected` (someone else got there first).
    async fn advance_status(
        &self,
        id: Uuid,
        expected: MessageStatus,
        next: MessageStatus,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Message>>;

    /// Claim every `outside_time_boundary` message with `deliver_at <= now`,
    /// flipping it to `sent` in the same statement that selects it.
    async fn release_due(&self, now: DateTime<Utc>) -> AppResult<Vec<Message>>;

    /// Claim every `recipient_calm_mode` message addressed to `recipient`
    /// that was created at or before `up_to`.
    async fn release_calm_mode(
        &self,
        recipient: Uuid,
        up_to: DateTime<Utc>,
    ) -> AppResult<Vec<Message>>;

    /// Recipients that still have `recipient_calm_mode` messages queued
    async fn calm_mode_recipients(&self) -> AppResult<Vec<Uuid>>;

    /// Mark the reader's unread (`sent`/`delivered`) messages in the
    /// conversation up to `up_to_sequence` as read. Returns the ids changed.
    async fn mark_read_up_to(
        &self,
        conversation_id: Uuid,
        reader: Uuid,
        up_to_sequence: i64,
        at: DateTime<Utc>,
    ) -> AppResult<Vec<Uuid>>;
}

/// Order released batches by recipient, then conversation creation order.
pub fn sort_for_release(messages: &mut [Message]) {
    messages.sort_by(|a, b| {
        (a.recipient_id, a.conversation_id, a.sequence_number).cmp(&(
            b.recipient_id,
            b.conversation_id,
            b.sequence_number,
        ))
    });
}

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, recipient_id, content, message_type, \
     status, queued_reason, deliver_at, sequence_number, created_at, delivered_at, read_at";

fn message_from_row(row: &Row) -> AppResult<Message> {
    let message_type: String = row.get("message_type");
    let status: String = row.get("status");
    let queued_reason: Option<String> = row.get("queued_reason");

    Ok(Message {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        sender_id: row.get("sender_id"),
        recipient_id: row.get("recipient_id"),
        content: row.get("content"),
        message_type: MessageType::from_db(&message_type)
            .ok_or_else(|| AppError::Database(format!("unknown message_type {message_type}")))?,
        status: MessageStatus::from_db(&status)
            .ok_or_else(|| AppError::Database(format!("unknown status {status}")))?,
        queued_reason: match queued_reason {
            Some(reason) => Some(
                QueuedReason::from_db(&reason)
                    .ok_or_else(|| AppError::Database(format!("unknown queued_reason {reason}")))?,
            ),
            None => None,
        },
        deliver_at: row.get("deliver_at"),
        sequence_number: row.get("sequence_number"),
        created_at: row.get("created_at"),
        delivered_at: row.get("delivered_at"),
        read_at: row.get("read_at"),
    })
}

fn messages_from_rows(rows: &[Row]) -> AppResult<Vec<Message>> {
    rows.iter().map(message_from_row).collect()
}

#[derive(Clone)]
pub struct PgMessageLedger {
    db: Pool,
}

impl PgMessageLedger {
    pub fn new(db: Pool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MessageLedger for PgMessageLedger {
    async fn insert(&self, new: NewMessage) -> AppResult<Message> {
        let client = self.db.get().await?;
        let id = Uuid::new_v4();
        let queued_reason = new.queued_reason.map(|r| r.to_db());

        // Sequence allocation and insert share one statement so two senders in
        // the same conversation never observe the same number.
        let sql = format!(
            r#"
            WITH next AS (
                INSERT INTO conversation_counters (conversation_id, last_seq)
                VALUES ($2, 1)
                ON CONFLICT (conversation_id)
                DO UPDATE SET last_seq = conversation_counters.last_seq + 1
                RETURNING last_seq
            )
            INSERT INTO messages (
                id,
                conversation_id,
                sender_id,
                recipient_id,
                content,
                message_type,
                status,
                queued_reason,
                deliver_at,
                created_at,
                sequence_number
            )
            SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, next.last_seq
            FROM next
            RETURNING {MESSAGE_COLUMNS}
            "#
        );

        let row = client
            .query_one(
                &sql,
                &[
                    &id,
                    &new.conversation_id,
                    &new.sender_id,
                    &new.recipient_id,
                    &new.content,
                    &new.message_type.to_db(),
                    &new.status.to_db(),
                    &queued_reason,
                    &new.deliver_at,
                    &new.created_at,
                ],
            )
            .await?;

        message_from_row(&row)
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<Message>> {
        let client = self.db.get().await?;
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1");
        let row = client.query_opt(&sql, &[&id]).await?;
        row.as_ref().map(message_from_row).transpose()
    }

    async fn advance_status(
        &self,
        id: Uuid,
        expected: MessageStatus,
        next: MessageStatus,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Message>> {
        if !expected.can_advance_to(next) {
            return Ok(None);
        }

        let delivered_at = (next == MessageStatus::Delivered).then_some(at);
        let read_at = (next == MessageStatus::Read).then_some(at);

        let client = self.db.get().await?;
        let sql = format!(
            r#"
            UPDATE messages
            SET status = $3,
                delivered_at = COALESCE(delivered_at, $4),
                read_at = COALESCE(read_at, $5)
            WHERE id = $1 AND status = $2
            RETURNING {MESSAGE_COLUMNS}
            "#
        );
        let row = client
            .query_opt(
                &sql,
                &[&id, &expected.to_db(), &next.to_db(), &delivered_at, &read_at],
            )
            .await?;
        row.as_ref().map(message_from_row).transpose()
    }

    async fn release_due(&self, now: DateTime<Utc>) -> AppResult<Vec<Message>> {
        let client = self.db.get().await?;
        let sql = format!(
            r#"
            UPDATE messages
            SET status = 'sent'
            WHERE id IN (
                SELECT id FROM messages
                WHERE status = 'queued'
                  AND queued_reason = 'outside_time_boundary'
                  AND deliver_at <= $1
                FOR UPDATE SKIP LOCKED
            )
            AND status = 'queued'
            RETURNING {MESSAGE_COLUMNS}
            "#
        );
        let rows = client.query(&sql, &[&now]).await?;
        let mut released = messages_from_rows(&rows)?;
        sort_for_release(&mut released);
        Ok(released)
    }

    async fn release_calm_mode(
        &self,
        recipient: Uuid,
        up_to: DateTime<Utc>,
    ) -> AppResult<Vec<Message>> {
        let client = self.db.get().await?;
        let sql = format!(
            r#"
            UPDATE messages
            SET status = 'sent'
            WHERE id IN (
                SELECT id FROM messages
                WHERE status = 'queued'
                  AND queued_reason = 'recipient_calm_mode'
                  AND recipient_id = $1
                  AND created_at <= $2
                FOR UPDATE SKIP LOCKED
            )
            AND status = 'queued'
            RETURNING {MESSAGE_COLUMNS}
            "#
        );
        let rows = client.query(&sql, &[&recipient, &up_to]).await?;
        let mut released = messages_from_rows(&rows)?;
        sort_for_release(&mut released);
        Ok(released)
    }

    async fn calm_mode_recipients(&self) -> AppResult<Vec<Uuid>> {
        let client = self.db.get().await?;
        let rows = client
            .query(
                r#"
                SELECT DISTINCT recipient_id
                FROM messages
                WHERE status = 'queued'
                  AND queued_reason = 'recipient_calm_mode'
                "#,
                &[],
            )
            .await?;
        Ok(rows.iter().map(|row| row.get::<_, Uuid>(0)).collect())
    }

    async fn mark_read_up_to(
        &self,
        conversation_id: Uuid,
        reader: Uuid,
        up_to_sequence: i64,
        at: DateTime<Utc>,
    ) -> AppResult<Vec<Uuid>> {
        let client = self.db.get().await?;
        let rows = client
            .query(
                r#"
                UPDATE messages
                SET status = 'read',
                    read_at = $4
                WHERE conversation_id = $1
                  AND recipient_id = $2
                  AND sequence_number <= $3
                  AND status IN ('sent', 'delivered')
                RETURNING id
                "#,
                &[&conversation_id, &reader, &up_to_sequence, &at],
            )
            .await?;
        Ok(rows.iter().map(|row| row.get::<_, Uuid>(0)).collect())
    }
}
