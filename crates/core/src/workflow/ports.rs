use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::approval::{ApprovalId, ApprovalRequest, ApprovalStatus};
use crate::domain::quotation::{Quotation, QuotationId};
use crate::domain::timeline::TimelineEntry;
use crate::domain::user::{UserId, UserProfile};
use crate::workflow::error::StoreError;

/// Filters for the pending queue. All fields are conjunctive; `None` means
/// unfiltered.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingFilter {
    pub status: Option<ApprovalStatus>,
    pub requested_by: Option<UserId>,
    pub approver: Option<UserId>,
    pub min_magnitude: Option<Decimal>,
    pub max_magnitude: Option<Decimal>,
    pub requested_after: Option<DateTime<Utc>>,
    pub requested_before: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub offset: u32,
    pub limit: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self { offset: 0, limit: 50 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageOf<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub offset: u32,
    pub limit: u32,
}

#[async_trait]
pub trait ApprovalStore: Send + Sync {
    async fn insert(&self, approval: ApprovalRequest) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: &ApprovalId) -> Result<Option<ApprovalRequest>, StoreError>;

    async fn find_by_quotation(
        &self,
        quotation_id: &QuotationId,
    ) -> Result<Vec<ApprovalRequest>, StoreError>;

    async fn list_pending(
        &self,
        filter: &PendingFilter,
        page: Page,
    ) -> Result<PageOf<ApprovalRequest>, StoreError>;

    /// Conditioned single-row update: persist `updated` only if the stored
    /// status still equals `expected`. Returns `false` when the condition no
    /// longer holds — the caller lost a concurrency race or is acting on a
    /// stale read, and must not overwrite.
    async fn transition(
        &self,
        updated: &ApprovalRequest,
        expected: ApprovalStatus,
    ) -> Result<bool, StoreError>;
}

/// Outcome of a conditional lock acquisition on a quotation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LockAcquire {
    Acquired,
    Held(ApprovalId),
    UnknownQuotation,
}

/// The lock lives on the quotation record, owned by whatever persists
/// quotations. Acquire and release are both conditional updates so racing
/// callers resolve to exactly one winner.
#[async_trait]
pub trait QuotationLocker: Send + Sync {
    async fn find_quotation(&self, id: &QuotationId) -> Result<Option<Quotation>, StoreError>;

    /// Set the lock to `owner` only if it is currently clear.
    async fn try_acquire(
        &self,
        quotation_id: &QuotationId,
        owner: &ApprovalId,
    ) -> Result<LockAcquire, StoreError>;

    /// Clear the lock only if it is currently held by `expected_owner`.
    /// Returns `false` when the owner did not match.
    async fn release(
        &self,
        quotation_id: &QuotationId,
        expected_owner: &ApprovalId,
    ) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait TimelineStore: Send + Sync {
    async fn append(&self, entry: TimelineEntry) -> Result<(), StoreError>;

    async fn for_approval(&self, id: &ApprovalId) -> Result<Vec<TimelineEntry>, StoreError>;

    async fn for_quotation(&self, id: &QuotationId) -> Result<Vec<TimelineEntry>, StoreError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn resolve(&self, id: &UserId) -> Result<Option<UserProfile>, StoreError>;
}

/// Best-effort downstream notification. A failed notify never fails the
/// transition that already committed; the engine logs and moves on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, entry: &TimelineEntry) -> Result<(), StoreError>;
}
