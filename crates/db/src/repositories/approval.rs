use async_trait::async_trait;
use sqlx::sqlite::{Sqlite, SqliteRow};
use sqlx::{QueryBuilder, Row};

use greenlight_core::domain::approval::{
    ApprovalId, ApprovalKind, ApprovalRequest, ApprovalStatus, Magnitude,
};
use greenlight_core::domain::quotation::QuotationId;
use greenlight_core::domain::roles::Tier;
use greenlight_core::domain::user::UserId;
use greenlight_core::workflow::{ApprovalStore, Page, PageOf, PendingFilter, StoreError};

use super::{backend, decode, parse_optional_timestamp, parse_timestamp};
use crate::DbPool;

pub struct SqlApprovalStore {
    pool: DbPool,
}

impl SqlApprovalStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = "id, quotation_id, kind, magnitude_unit, magnitude_value, status, \
     required_tier, requested_by, requested_at, note, approver, decided_at, decision_reason, \
     escalated_from_tier, escalated_at, escalation_reason, parent_approval_id, created_at, \
     updated_at";

fn magnitude_unit(magnitude: &Magnitude) -> &'static str {
    match magnitude {
        Magnitude::Percent(_) => "percent",
        Magnitude::Amount(_) => "amount",
    }
}

fn parse_magnitude(unit: &str, value: &str) -> Result<Magnitude, StoreError> {
    let parsed = value.parse().map_err(|e| decode("magnitude_value", e))?;
    match unit {
        "percent" => Ok(Magnitude::Percent(parsed)),
        "amount" => Ok(Magnitude::Amount(parsed)),
        other => Err(decode("magnitude_unit", format!("unknown unit `{other}`"))),
    }
}

fn row_to_approval(row: &SqliteRow) -> Result<ApprovalRequest, StoreError> {
    let id: String = row.try_get("id").map_err(|e| decode("id", e))?;
    let quotation_id: String =
        row.try_get("quotation_id").map_err(|e| decode("quotation_id", e))?;
    let kind_str: String = row.try_get("kind").map_err(|e| decode("kind", e))?;
    let unit_str: String =
        row.try_get("magnitude_unit").map_err(|e| decode("magnitude_unit", e))?;
    let value_str: String =
        row.try_get("magnitude_value").map_err(|e| decode("magnitude_value", e))?;
    let status_str: String = row.try_get("status").map_err(|e| decode("status", e))?;
    let required_tier_str: String =
        row.try_get("required_tier").map_err(|e| decode("required_tier", e))?;
    let requested_by: String =
        row.try_get("requested_by").map_err(|e| decode("requested_by", e))?;
    let requested_at_str: String =
        row.try_get("requested_at").map_err(|e| decode("requested_at", e))?;
    let note: Option<String> = row.try_get("note").map_err(|e| decode("note", e))?;
    let approver: Option<String> = row.try_get("approver").map_err(|e| decode("approver", e))?;
    let decided_at_str: Option<String> =
        row.try_get("decided_at").map_err(|e| decode("decided_at", e))?;
    let decision_reason: Option<String> =
        row.try_get("decision_reason").map_err(|e| decode("decision_reason", e))?;
    let escalated_from_tier_str: Option<String> =
        row.try_get("escalated_from_tier").map_err(|e| decode("escalated_from_tier", e))?;
    let escalated_at_str: Option<String> =
        row.try_get("escalated_at").map_err(|e| decode("escalated_at", e))?;
    let escalation_reason: Option<String> =
        row.try_get("escalation_reason").map_err(|e| decode("escalation_reason", e))?;
    let parent_approval_id: Option<String> =
        row.try_get("parent_approval_id").map_err(|e| decode("parent_approval_id", e))?;
    let created_at_str: String =
        row.try_get("created_at").map_err(|e| decode("created_at", e))?;
    let updated_at_str: String =
        row.try_get("updated_at").map_err(|e| decode("updated_at", e))?;

    let kind = ApprovalKind::parse(&kind_str)
        .ok_or_else(|| decode("kind", format!("unknown kind `{kind_str}`")))?;
    let status = ApprovalStatus::parse(&status_str)
        .ok_or_else(|| decode("status", format!("unknown status `{status_str}`")))?;
    let required_tier =
        Tier::parse(&required_tier_str).map_err(|e| decode("required_tier", e))?;
    let escalated_from_tier = escalated_from_tier_str
        .map(|s| Tier::parse(&s).map_err(|e| decode("escalated_from_tier", e)))
        .transpose()?;

    Ok(ApprovalRequest {
        id: ApprovalId(id),
        quotation_id: QuotationId(quotation_id),
        kind,
        magnitude: parse_magnitude(&unit_str, &value_str)?,
        status,
        required_tier,
        requested_by: UserId(requested_by),
        requested_at: parse_timestamp("requested_at", &requested_at_str)?,
        note,
        approver: approver.map(UserId),
        decided_at: parse_optional_timestamp("decided_at", decided_at_str)?,
        decision_reason,
        escalated_from_tier,
        escalated_at: parse_optional_timestamp("escalated_at", escalated_at_str)?,
        escalation_reason,
        parent_approval_id: parent_approval_id.map(ApprovalId),
        created_at: parse_timestamp("created_at", &created_at_str)?,
        updated_at: parse_timestamp("updated_at", &updated_at_str)?,
    })
}

fn push_filter_clauses(builder: &mut QueryBuilder<'_, Sqlite>, filter: &PendingFilter) {
    match filter.status {
        Some(status) => {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        None => {
            builder.push(" AND status IN ('pending', 'escalated')");
        }
    }
    if let Some(requester) = &filter.requested_by {
        builder.push(" AND requested_by = ").push_bind(requester.0.clone());
    }
    if let Some(approver) = &filter.approver {
        builder.push(" AND approver = ").push_bind(approver.0.clone());
    }
    if let Some(min) = filter.min_magnitude {
        builder
            .push(" AND CAST(magnitude_value AS REAL) >= CAST(")
            .push_bind(min.to_string())
            .push(" AS REAL)");
    }
    if let Some(max) = filter.max_magnitude {
        builder
            .push(" AND CAST(magnitude_value AS REAL) <= CAST(")
            .push_bind(max.to_string())
            .push(" AS REAL)");
    }
    // RFC 3339 timestamps in a uniform offset compare correctly as text.
    if let Some(after) = filter.requested_after {
        builder.push(" AND requested_at >= ").push_bind(after.to_rfc3339());
    }
    if let Some(before) = filter.requested_before {
        builder.push(" AND requested_at <= ").push_bind(before.to_rfc3339());
    }
}

#[async_trait]
impl ApprovalStore for SqlApprovalStore {
    async fn insert(&self, approval: ApprovalRequest) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO approval_request (id, quotation_id, kind, magnitude_unit, \
                 magnitude_value, status, required_tier, requested_by, requested_at, note, \
                 approver, decided_at, decision_reason, escalated_from_tier, escalated_at, \
                 escalation_reason, parent_approval_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&approval.id.0)
        .bind(&approval.quotation_id.0)
        .bind(approval.kind.as_str())
        .bind(magnitude_unit(&approval.magnitude))
        .bind(approval.magnitude.value().to_string())
        .bind(approval.status.as_str())
        .bind(approval.required_tier.as_str())
        .bind(&approval.requested_by.0)
        .bind(approval.requested_at.to_rfc3339())
        .bind(&approval.note)
        .bind(approval.approver.as_ref().map(|u| u.0.clone()))
        .bind(approval.decided_at.map(|dt| dt.to_rfc3339()))
        .bind(&approval.decision_reason)
        .bind(approval.escalated_from_tier.map(|t| t.as_str()))
        .bind(approval.escalated_at.map(|dt| dt.to_rfc3339()))
        .bind(&approval.escalation_reason)
        .bind(approval.parent_approval_id.as_ref().map(|p| p.0.clone()))
        .bind(approval.created_at.to_rfc3339())
        .bind(approval.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn find_by_id(&self, id: &ApprovalId) -> Result<Option<ApprovalRequest>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM approval_request WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(ref r) => Ok(Some(row_to_approval(r)?)),
            None => Ok(None),
        }
    }

    async fn find_by_quotation(
        &self,
        quotation_id: &QuotationId,
    ) -> Result<Vec<ApprovalRequest>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM approval_request \
             WHERE quotation_id = ? ORDER BY created_at ASC, id ASC"
        ))
        .bind(&quotation_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(row_to_approval).collect()
    }

    async fn list_pending(
        &self,
        filter: &PendingFilter,
        page: Page,
    ) -> Result<PageOf<ApprovalRequest>, StoreError> {
        let mut count_builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) AS count FROM approval_request WHERE 1 = 1");
        push_filter_clauses(&mut count_builder, filter);
        let total = count_builder
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?
            .get::<i64, _>("count") as u64;

        let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(format!(
            "SELECT {SELECT_COLUMNS} FROM approval_request WHERE 1 = 1"
        ));
        push_filter_clauses(&mut builder, filter);
        builder.push(" ORDER BY requested_at ASC, id ASC");
        builder.push(" LIMIT ").push_bind(i64::from(page.limit));
        builder.push(" OFFSET ").push_bind(i64::from(page.offset));

        let rows = builder.build().fetch_all(&self.pool).await.map_err(backend)?;
        let items = rows.iter().map(row_to_approval).collect::<Result<Vec<_>, _>>()?;

        Ok(PageOf { items, total, offset: page.offset, limit: page.limit })
    }

    async fn transition(
        &self,
        updated: &ApprovalRequest,
        expected: ApprovalStatus,
    ) -> Result<bool, StoreError> {
        // The status predicate in the WHERE clause makes this a conditional
        // write; a stale caller matches zero rows and changes nothing.
        let result = sqlx::query(
            "UPDATE approval_request
             SET status = ?, required_tier = ?, approver = ?, decided_at = ?,
                 decision_reason = ?, escalated_from_tier = ?, escalated_at = ?,
                 escalation_reason = ?, updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(updated.status.as_str())
        .bind(updated.required_tier.as_str())
        .bind(updated.approver.as_ref().map(|u| u.0.clone()))
        .bind(updated.decided_at.map(|dt| dt.to_rfc3339()))
        .bind(&updated.decision_reason)
        .bind(updated.escalated_from_tier.map(|t| t.as_str()))
        .bind(updated.escalated_at.map(|dt| dt.to_rfc3339()))
        .bind(&updated.escalation_reason)
        .bind(updated.updated_at.to_rfc3339())
        .bind(&updated.id.0)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(result.rows_affected() == 1)
    }
}
