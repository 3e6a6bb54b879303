use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use greenlight_core::domain::approval::ApprovalId;
use greenlight_core::domain::quotation::{Quotation, QuotationId};
use greenlight_core::workflow::{LockAcquire, QuotationLocker, StoreError};

use super::{backend, decode, parse_timestamp};
use crate::DbPool;

/// Quotation reads plus the conditional lock column. The lock is a single
/// nullable `locked_by_approval_id`; acquire and release are both one-row
/// conditional updates so concurrent callers serialize in the database.
pub struct SqlQuotationStore {
    pool: DbPool,
}

impl SqlQuotationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert or refresh a quotation row. Quotations are owned by the wider
    /// CRM; this exists for bootstrap seeding and tests.
    pub async fn seed(&self, quotation: Quotation) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO quotation (id, account_name, total, currency, \
                 locked_by_approval_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 account_name = excluded.account_name,
                 total = excluded.total,
                 currency = excluded.currency",
        )
        .bind(&quotation.id.0)
        .bind(&quotation.account_name)
        .bind(quotation.total.to_string())
        .bind(&quotation.currency)
        .bind(quotation.locked_by.as_ref().map(|a| a.0.clone()))
        .bind(quotation.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }
}

fn row_to_quotation(row: &SqliteRow) -> Result<Quotation, StoreError> {
    let id: String = row.try_get("id").map_err(|e| decode("id", e))?;
    let account_name: String =
        row.try_get("account_name").map_err(|e| decode("account_name", e))?;
    let total_str: String = row.try_get("total").map_err(|e| decode("total", e))?;
    let currency: String = row.try_get("currency").map_err(|e| decode("currency", e))?;
    let locked_by: Option<String> =
        row.try_get("locked_by_approval_id").map_err(|e| decode("locked_by_approval_id", e))?;
    let created_at_str: String =
        row.try_get("created_at").map_err(|e| decode("created_at", e))?;

    Ok(Quotation {
        id: QuotationId(id),
        account_name,
        total: total_str.parse().map_err(|e| decode("total", e))?,
        currency,
        locked_by: locked_by.map(ApprovalId),
        created_at: parse_timestamp("created_at", &created_at_str)?,
    })
}

#[async_trait]
impl QuotationLocker for SqlQuotationStore {
    async fn find_quotation(&self, id: &QuotationId) -> Result<Option<Quotation>, StoreError> {
        let row = sqlx::query(
            "SELECT id, account_name, total, currency, locked_by_approval_id, created_at
             FROM quotation WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(ref r) => Ok(Some(row_to_quotation(r)?)),
            None => Ok(None),
        }
    }

    async fn try_acquire(
        &self,
        quotation_id: &QuotationId,
        owner: &ApprovalId,
    ) -> Result<LockAcquire, StoreError> {
        let result = sqlx::query(
            "UPDATE quotation SET locked_by_approval_id = ?
             WHERE id = ? AND locked_by_approval_id IS NULL",
        )
        .bind(&owner.0)
        .bind(&quotation_id.0)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 1 {
            return Ok(LockAcquire::Acquired);
        }

        // Zero rows means either a holder or no such quotation; read back to
        // tell the two apart.
        match self.find_quotation(quotation_id).await? {
            Some(quotation) => match quotation.locked_by {
                Some(holder) => Ok(LockAcquire::Held(holder)),
                // The lock cleared between our update and the read; the
                // caller treats this like losing the race and retries.
                None => Ok(LockAcquire::Held(owner.clone())),
            },
            None => Ok(LockAcquire::UnknownQuotation),
        }
    }

    async fn release(
        &self,
        quotation_id: &QuotationId,
        expected_owner: &ApprovalId,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE quotation SET locked_by_approval_id = NULL
             WHERE id = ? AND locked_by_approval_id = ?",
        )
        .bind(&quotation_id.0)
        .bind(&expected_owner.0)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use greenlight_core::domain::approval::ApprovalId;
    use greenlight_core::domain::quotation::{Quotation, QuotationId};
    use greenlight_core::workflow::{LockAcquire, QuotationLocker};

    use super::SqlQuotationStore;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> SqlQuotationStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let store = SqlQuotationStore::new(pool);
        store
            .seed(Quotation {
                id: QuotationId("Q-100".to_string()),
                account_name: "Acme".to_string(),
                total: Decimal::new(250_000, 2),
                currency: "USD".to_string(),
                locked_by: None,
                created_at: Utc::now(),
            })
            .await
            .expect("seed");
        store
    }

    #[tokio::test]
    async fn acquire_then_release_round_trips_the_lock() {
        let store = setup().await;
        let q = QuotationId("Q-100".to_string());
        let owner = ApprovalId("APR-1".to_string());

        assert_eq!(store.try_acquire(&q, &owner).await.expect("acquire"), LockAcquire::Acquired);
        let locked = store.find_quotation(&q).await.expect("find").expect("exists");
        assert_eq!(locked.locked_by, Some(owner.clone()));

        assert!(store.release(&q, &owner).await.expect("release"));
        let unlocked = store.find_quotation(&q).await.expect("find").expect("exists");
        assert!(unlocked.locked_by.is_none());
    }

    #[tokio::test]
    async fn second_acquire_reports_the_holder() {
        let store = setup().await;
        let q = QuotationId("Q-100".to_string());
        let first = ApprovalId("APR-1".to_string());
        let second = ApprovalId("APR-2".to_string());

        assert_eq!(store.try_acquire(&q, &first).await.expect("acquire"), LockAcquire::Acquired);
        assert_eq!(
            store.try_acquire(&q, &second).await.expect("second acquire"),
            LockAcquire::Held(first),
        );
    }

    #[tokio::test]
    async fn release_by_a_non_owner_is_refused() {
        let store = setup().await;
        let q = QuotationId("Q-100".to_string());
        let owner = ApprovalId("APR-1".to_string());
        let stranger = ApprovalId("APR-2".to_string());

        assert_eq!(store.try_acquire(&q, &owner).await.expect("acquire"), LockAcquire::Acquired);
        assert!(!store.release(&q, &stranger).await.expect("release attempt"));

        let still_locked = store.find_quotation(&q).await.expect("find").expect("exists");
        assert_eq!(still_locked.locked_by, Some(owner));
    }

    #[tokio::test]
    async fn acquire_on_a_missing_quotation_reports_unknown() {
        let store = setup().await;
        let outcome = store
            .try_acquire(&QuotationId("Q-404".to_string()), &ApprovalId("APR-1".to_string()))
            .await
            .expect("acquire");
        assert_eq!(outcome, LockAcquire::UnknownQuotation);
    }
}
