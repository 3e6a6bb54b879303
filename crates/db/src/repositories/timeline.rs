use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use greenlight_core::domain::approval::ApprovalId;
use greenlight_core::domain::quotation::QuotationId;
use greenlight_core::domain::timeline::{TimelineEntry, TimelineEvent};
use greenlight_core::domain::user::UserId;
use greenlight_core::workflow::{StoreError, TimelineStore};

use super::{backend, decode, parse_timestamp};
use crate::DbPool;

/// Append-only audit log. There is deliberately no update or delete path.
pub struct SqlTimelineStore {
    pool: DbPool,
}

impl SqlTimelineStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_entry(row: &SqliteRow) -> Result<TimelineEntry, StoreError> {
    let entry_id: String = row.try_get("entry_id").map_err(|e| decode("entry_id", e))?;
    let approval_id: String =
        row.try_get("approval_id").map_err(|e| decode("approval_id", e))?;
    let quotation_id: String =
        row.try_get("quotation_id").map_err(|e| decode("quotation_id", e))?;
    let event_str: String = row.try_get("event").map_err(|e| decode("event", e))?;
    let actor: String = row.try_get("actor").map_err(|e| decode("actor", e))?;
    let detail: Option<String> = row.try_get("detail").map_err(|e| decode("detail", e))?;
    let occurred_at_str: String =
        row.try_get("occurred_at").map_err(|e| decode("occurred_at", e))?;

    let event = TimelineEvent::parse(&event_str)
        .ok_or_else(|| decode("event", format!("unknown event `{event_str}`")))?;

    Ok(TimelineEntry {
        entry_id,
        approval_id: ApprovalId(approval_id),
        quotation_id: QuotationId(quotation_id),
        event,
        actor: UserId(actor),
        detail,
        occurred_at: parse_timestamp("occurred_at", &occurred_at_str)?,
    })
}

#[async_trait]
impl TimelineStore for SqlTimelineStore {
    async fn append(&self, entry: TimelineEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO timeline_entry (entry_id, approval_id, quotation_id, event, actor, \
                 detail, occurred_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.entry_id)
        .bind(&entry.approval_id.0)
        .bind(&entry.quotation_id.0)
        .bind(entry.event.as_str())
        .bind(&entry.actor.0)
        .bind(&entry.detail)
        .bind(entry.occurred_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn for_approval(&self, id: &ApprovalId) -> Result<Vec<TimelineEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT entry_id, approval_id, quotation_id, event, actor, detail, occurred_at
             FROM timeline_entry WHERE approval_id = ?
             ORDER BY occurred_at ASC, entry_id ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn for_quotation(&self, id: &QuotationId) -> Result<Vec<TimelineEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT entry_id, approval_id, quotation_id, event, actor, detail, occurred_at
             FROM timeline_entry WHERE quotation_id = ?
             ORDER BY occurred_at ASC, entry_id ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(row_to_entry).collect()
    }
}
