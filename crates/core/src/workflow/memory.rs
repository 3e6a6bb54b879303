use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::approval::{ApprovalId, ApprovalRequest, ApprovalStatus};
use crate::domain::quotation::{Quotation, QuotationId};
use crate::domain::timeline::TimelineEntry;
use crate::domain::user::{UserId, UserProfile};
use crate::workflow::error::StoreError;
use crate::workflow::ports::{
    ApprovalStore, LockAcquire, Notifier, Page, PageOf, PendingFilter, QuotationLocker,
    TimelineStore, UserDirectory,
};

/// In-memory port implementations. Each write takes the same conditional
/// path as the SQL implementations so concurrency tests against them are
/// honest about CAS semantics.
#[derive(Clone, Default)]
pub struct InMemoryApprovalStore {
    approvals: Arc<RwLock<HashMap<String, ApprovalRequest>>>,
}

#[async_trait]
impl ApprovalStore for InMemoryApprovalStore {
    async fn insert(&self, approval: ApprovalRequest) -> Result<(), StoreError> {
        let mut approvals = self.approvals.write().await;
        approvals.insert(approval.id.0.clone(), approval);
        Ok(())
    }

    async fn find_by_id(&self, id: &ApprovalId) -> Result<Option<ApprovalRequest>, StoreError> {
        let approvals = self.approvals.read().await;
        Ok(approvals.get(&id.0).cloned())
    }

    async fn find_by_quotation(
        &self,
        quotation_id: &QuotationId,
    ) -> Result<Vec<ApprovalRequest>, StoreError> {
        let approvals = self.approvals.read().await;
        let mut matching: Vec<ApprovalRequest> = approvals
            .values()
            .filter(|approval| approval.quotation_id == *quotation_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matching)
    }

    async fn list_pending(
        &self,
        filter: &PendingFilter,
        page: Page,
    ) -> Result<PageOf<ApprovalRequest>, StoreError> {
        let approvals = self.approvals.read().await;
        let mut matching: Vec<ApprovalRequest> = approvals
            .values()
            .filter(|approval| match filter.status {
                Some(status) => approval.status == status,
                None => approval.status.is_open(),
            })
            .filter(|approval| {
                filter
                    .requested_by
                    .as_ref()
                    .map_or(true, |requester| approval.requested_by == *requester)
            })
            .filter(|approval| {
                filter
                    .approver
                    .as_ref()
                    .map_or(true, |approver| approval.approver.as_ref() == Some(approver))
            })
            .filter(|approval| {
                filter.min_magnitude.map_or(true, |min| approval.magnitude.value() >= min)
                    && filter.max_magnitude.map_or(true, |max| approval.magnitude.value() <= max)
            })
            .filter(|approval| {
                filter.requested_after.map_or(true, |after| approval.requested_at >= after)
                    && filter.requested_before.map_or(true, |before| approval.requested_at <= before)
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.requested_at.cmp(&b.requested_at));

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect();
        Ok(PageOf { items, total, offset: page.offset, limit: page.limit })
    }

    async fn transition(
        &self,
        updated: &ApprovalRequest,
        expected: ApprovalStatus,
    ) -> Result<bool, StoreError> {
        let mut approvals = self.approvals.write().await;
        match approvals.get_mut(&updated.id.0) {
            Some(stored) if stored.status == expected => {
                *stored = updated.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Ok(false),
        }
    }
}

#[derive(Clone, Default)]
pub struct InMemoryQuotationLocker {
    quotations: Arc<RwLock<HashMap<String, Quotation>>>,
}

impl InMemoryQuotationLocker {
    pub async fn seed(&self, quotation: Quotation) {
        let mut quotations = self.quotations.write().await;
        quotations.insert(quotation.id.0.clone(), quotation);
    }
}

#[async_trait]
impl QuotationLocker for InMemoryQuotationLocker {
    async fn find_quotation(&self, id: &QuotationId) -> Result<Option<Quotation>, StoreError> {
        let quotations = self.quotations.read().await;
        Ok(quotations.get(&id.0).cloned())
    }

    async fn try_acquire(
        &self,
        quotation_id: &QuotationId,
        owner: &ApprovalId,
    ) -> Result<LockAcquire, StoreError> {
        let mut quotations = self.quotations.write().await;
        match quotations.get_mut(&quotation_id.0) {
            Some(quotation) => match &quotation.locked_by {
                Some(holder) => Ok(LockAcquire::Held(holder.clone())),
                None => {
                    quotation.locked_by = Some(owner.clone());
                    Ok(LockAcquire::Acquired)
                }
            },
            None => Ok(LockAcquire::UnknownQuotation),
        }
    }

    async fn release(
        &self,
        quotation_id: &QuotationId,
        expected_owner: &ApprovalId,
    ) -> Result<bool, StoreError> {
        let mut quotations = self.quotations.write().await;
        match quotations.get_mut(&quotation_id.0) {
            Some(quotation) if quotation.locked_by.as_ref() == Some(expected_owner) => {
                quotation.locked_by = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Clone, Default)]
pub struct InMemoryTimelineStore {
    entries: Arc<RwLock<Vec<TimelineEntry>>>,
}

#[async_trait]
impl TimelineStore for InMemoryTimelineStore {
    async fn append(&self, entry: TimelineEntry) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.push(entry);
        Ok(())
    }

    async fn for_approval(&self, id: &ApprovalId) -> Result<Vec<TimelineEntry>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries.iter().filter(|entry| entry.approval_id == *id).cloned().collect())
    }

    async fn for_quotation(&self, id: &QuotationId) -> Result<Vec<TimelineEntry>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries.iter().filter(|entry| entry.quotation_id == *id).cloned().collect())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryUserDirectory {
    users: Arc<RwLock<HashMap<String, UserProfile>>>,
}

impl InMemoryUserDirectory {
    pub async fn seed(&self, user: UserProfile) {
        let mut users = self.users.write().await;
        users.insert(user.id.0.clone(), user);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn resolve(&self, id: &UserId) -> Result<Option<UserProfile>, StoreError> {
        let users = self.users.read().await;
        Ok(users.get(&id.0).cloned())
    }
}

/// Captures notifications for assertions; optionally fails every call to
/// exercise the fire-and-forget contract.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    pub fail: bool,
    sent: Arc<RwLock<Vec<TimelineEntry>>>,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self { fail: true, sent: Arc::default() }
    }

    pub async fn sent(&self) -> Vec<TimelineEntry> {
        self.sent.read().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, entry: &TimelineEntry) -> Result<(), StoreError> {
        if self.fail {
            return Err(StoreError::Backend("notifier unavailable".to_string()));
        }
        let mut sent = self.sent.write().await;
        sent.push(entry.clone());
        Ok(())
    }
}
