use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::approval::{
    ApprovalId, ApprovalKind, ApprovalRequest, ApprovalStatus, Magnitude,
};
use crate::domain::quotation::QuotationId;
use crate::domain::roles::Tier;
use crate::domain::timeline::{TimelineEntry, TimelineEvent};
use crate::domain::user::{UserId, UserProfile};
use crate::policy::AuthorityPolicy;
use crate::workflow::error::WorkflowError;
use crate::workflow::ports::{
    ApprovalStore, LockAcquire, Notifier, Page, PageOf, PendingFilter, QuotationLocker,
    TimelineStore, UserDirectory,
};

/// Behavior switches left to deployment policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// Whether a decider may approve a request they opened themselves.
    /// Off by default; an Admin who self-requests then needs another Admin.
    pub allow_self_approval: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInput {
    pub quotation_id: QuotationId,
    pub requested_by: UserId,
    pub kind: ApprovalKind,
    pub magnitude: Magnitude,
    pub note: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResubmitInput {
    pub parent_approval_id: ApprovalId,
    pub resubmitted_by: UserId,
    pub magnitude: Magnitude,
    pub note: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkFailure {
    pub approval_id: ApprovalId,
    pub code: String,
    pub reason: String,
}

/// Per-item outcomes of a bulk approval. Never all-or-nothing: one item's
/// failure does not roll back or block the others.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkOutcome {
    pub approved: Vec<ApprovalId>,
    pub failed: Vec<BulkFailure>,
}

/// Filter for timeline reads. Exactly one key, by construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimelineQuery {
    Approval(ApprovalId),
    Quotation(QuotationId),
}

/// Orchestrates the tiered approval workflow over its collaborator ports.
/// Holds no mutable state of its own: every cross-request coordination point
/// is a conditioned update against the persisted status or the quotation
/// lock, so concurrent invocations resolve to exactly one winner.
#[derive(Clone)]
pub struct ApprovalWorkflow {
    approvals: Arc<dyn ApprovalStore>,
    quotations: Arc<dyn QuotationLocker>,
    timeline: Arc<dyn TimelineStore>,
    directory: Arc<dyn UserDirectory>,
    notifier: Arc<dyn Notifier>,
    policy: AuthorityPolicy,
    settings: WorkflowSettings,
}

enum Decision {
    Approve,
    Reject,
}

impl ApprovalWorkflow {
    pub fn new(
        approvals: Arc<dyn ApprovalStore>,
        quotations: Arc<dyn QuotationLocker>,
        timeline: Arc<dyn TimelineStore>,
        directory: Arc<dyn UserDirectory>,
        notifier: Arc<dyn Notifier>,
        policy: AuthorityPolicy,
        settings: WorkflowSettings,
    ) -> Self {
        Self { approvals, quotations, timeline, directory, notifier, policy, settings }
    }

    /// Open a new approval request and lock the quotation behind it.
    pub async fn request(&self, input: RequestInput) -> Result<ApprovalRequest, WorkflowError> {
        validate_magnitude(&input.magnitude)?;
        let requester = self.resolve_user(&input.requested_by).await?;
        if !requester.role.may_request() {
            return Err(WorkflowError::Validation(format!(
                "role `{}` may not open approval requests",
                requester.role.as_str()
            )));
        }

        let required_tier = self.policy.required_tier(input.kind, &input.magnitude);
        let approval = ApprovalRequest::open(
            input.quotation_id.clone(),
            input.kind,
            input.magnitude,
            required_tier,
            input.requested_by.clone(),
            input.note.clone(),
            None,
        );

        self.acquire_lock(&approval).await?;
        if let Err(error) = self.approvals.insert(approval.clone()).await {
            self.release_orphaned_lock(&approval).await;
            return Err(error.into());
        }

        let entry = TimelineEntry::record(
            approval.id.clone(),
            approval.quotation_id.clone(),
            TimelineEvent::Requested,
            input.requested_by,
            input.note,
        );
        self.append_and_notify(entry).await?;

        Ok(approval)
    }

    /// Approve a Pending or Escalated request. The decider's tier is
    /// re-checked against the required tier on every call, and the policy is
    /// re-evaluated in case its configuration changed since request time.
    pub async fn approve(
        &self,
        approval_id: &ApprovalId,
        decider: &UserId,
        note: Option<String>,
    ) -> Result<ApprovalRequest, WorkflowError> {
        self.decide(approval_id, decider, note, Decision::Approve, TimelineEvent::Approved)
            .await
    }

    /// Reject a Pending or Escalated request. A reason is mandatory.
    pub async fn reject(
        &self,
        approval_id: &ApprovalId,
        decider: &UserId,
        reason: String,
    ) -> Result<ApprovalRequest, WorkflowError> {
        if reason.trim().is_empty() {
            return Err(WorkflowError::Validation(
                "a rejection requires a non-empty reason".to_string(),
            ));
        }
        self.decide(approval_id, decider, Some(reason), Decision::Reject, TimelineEvent::Rejected)
            .await
    }

    /// Raise a Pending request to the next tier, in place. No new row is
    /// created and the quotation lock stays with the same approval id.
    pub async fn escalate(
        &self,
        approval_id: &ApprovalId,
        escalator: &UserId,
        reason: Option<String>,
    ) -> Result<ApprovalRequest, WorkflowError> {
        let approval = self.load(approval_id).await?;
        if approval.status != ApprovalStatus::Pending {
            return Err(WorkflowError::InvalidStatus {
                approval_id: approval.id,
                status: approval.status,
            });
        }

        let escalator_profile = self.resolve_user(escalator).await?;
        let held = escalator_profile.role.tier();
        if held.map_or(true, |tier| tier < approval.required_tier) {
            return Err(WorkflowError::Unauthorized { required: approval.required_tier, held });
        }

        let raised = approval.required_tier.next().ok_or_else(|| {
            WorkflowError::Validation(format!(
                "approval `{}` already requires the top tier",
                approval.id
            ))
        })?;

        let mut updated = approval.clone();
        updated.status = ApprovalStatus::Escalated;
        updated.escalated_from_tier = Some(approval.required_tier);
        updated.escalated_at = Some(Utc::now());
        updated.escalation_reason = reason.clone();
        updated.required_tier = raised;
        updated.updated_at = Utc::now();

        self.commit(&updated, approval.status).await?;

        let entry = TimelineEntry::record(
            updated.id.clone(),
            updated.quotation_id.clone(),
            TimelineEvent::Escalated,
            escalator.clone(),
            reason,
        );
        self.append_and_notify(entry).await?;

        Ok(updated)
    }

    /// Supersede a Rejected request with a fresh Pending one. The parent row
    /// is never touched; the chain grows forward only.
    pub async fn resubmit(&self, input: ResubmitInput) -> Result<ApprovalRequest, WorkflowError> {
        validate_magnitude(&input.magnitude)?;

        let parent = self.load(&input.parent_approval_id).await?;
        if parent.status != ApprovalStatus::Rejected {
            return Err(WorkflowError::InvalidStatus {
                approval_id: parent.id,
                status: parent.status,
            });
        }

        let resubmitter = self.resolve_user(&input.resubmitted_by).await?;
        if !resubmitter.role.may_request() {
            return Err(WorkflowError::Validation(format!(
                "role `{}` may not open approval requests",
                resubmitter.role.as_str()
            )));
        }

        let required_tier = self.policy.required_tier(parent.kind, &input.magnitude);
        let approval = ApprovalRequest::open(
            parent.quotation_id.clone(),
            parent.kind,
            input.magnitude,
            required_tier,
            input.resubmitted_by.clone(),
            input.note.clone(),
            Some(parent.id.clone()),
        );

        // Rejection released the lock already; re-check rather than assume.
        self.acquire_lock(&approval).await?;
        if let Err(error) = self.approvals.insert(approval.clone()).await {
            self.release_orphaned_lock(&approval).await;
            return Err(error.into());
        }

        let entry = TimelineEntry::record(
            approval.id.clone(),
            approval.quotation_id.clone(),
            TimelineEvent::Resubmitted,
            input.resubmitted_by,
            Some(format!("supersedes approval `{}`", parent.id)),
        );
        self.append_and_notify(entry).await?;

        Ok(approval)
    }

    /// Approve a batch of requests with per-item independence. Every id goes
    /// through the same guards and conditioned update as a single approval;
    /// failures come back as data, never as an all-or-nothing rollback.
    pub async fn bulk_approve(&self, approval_ids: &[ApprovalId], decider: &UserId) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for approval_id in approval_ids {
            match self
                .decide(approval_id, decider, None, Decision::Approve, TimelineEvent::BulkApproved)
                .await
            {
                Ok(approved) => outcome.approved.push(approved.id),
                Err(error) => outcome.failed.push(BulkFailure {
                    approval_id: approval_id.clone(),
                    code: error.code().to_string(),
                    reason: error.to_string(),
                }),
            }
        }
        outcome
    }

    pub async fn get_by_id(&self, approval_id: &ApprovalId) -> Result<ApprovalRequest, WorkflowError> {
        self.load(approval_id).await
    }

    pub async fn get_by_quotation(
        &self,
        quotation_id: &QuotationId,
    ) -> Result<Vec<ApprovalRequest>, WorkflowError> {
        Ok(self.approvals.find_by_quotation(quotation_id).await?)
    }

    pub async fn get_pending(
        &self,
        filter: &PendingFilter,
        page: Page,
    ) -> Result<PageOf<ApprovalRequest>, WorkflowError> {
        Ok(self.approvals.list_pending(filter, page).await?)
    }

    pub async fn get_timeline(
        &self,
        query: &TimelineQuery,
    ) -> Result<Vec<TimelineEntry>, WorkflowError> {
        let entries = match query {
            TimelineQuery::Approval(id) => self.timeline.for_approval(id).await?,
            TimelineQuery::Quotation(id) => self.timeline.for_quotation(id).await?,
        };
        Ok(entries)
    }

    async fn decide(
        &self,
        approval_id: &ApprovalId,
        decider: &UserId,
        note: Option<String>,
        decision: Decision,
        event: TimelineEvent,
    ) -> Result<ApprovalRequest, WorkflowError> {
        let approval = self.load(approval_id).await?;
        if !approval.status.is_open() {
            return Err(WorkflowError::InvalidStatus {
                approval_id: approval.id,
                status: approval.status,
            });
        }

        let decider_profile = self.resolve_user(decider).await?;
        self.check_decision_authority(&approval, &decider_profile, &decision)?;

        let mut updated = approval.clone();
        updated.status = match decision {
            Decision::Approve => ApprovalStatus::Approved,
            Decision::Reject => ApprovalStatus::Rejected,
        };
        updated.approver = Some(decider.clone());
        updated.decided_at = Some(Utc::now());
        updated.decision_reason = note.clone();
        updated.updated_at = Utc::now();

        self.commit(&updated, approval.status).await?;

        // Both terminal outcomes free the quotation; resubmission re-locks.
        let released =
            self.quotations.release(&updated.quotation_id, &updated.id).await?;
        if !released {
            tracing::warn!(
                event_name = "workflow.lock_release_mismatch",
                approval_id = %updated.id,
                quotation_id = %updated.quotation_id,
                "quotation lock was not held by the deciding approval"
            );
        }

        let entry = TimelineEntry::record(
            updated.id.clone(),
            updated.quotation_id.clone(),
            event,
            decider.clone(),
            note,
        );
        self.append_and_notify(entry).await?;

        Ok(updated)
    }

    fn check_decision_authority(
        &self,
        approval: &ApprovalRequest,
        decider: &UserProfile,
        decision: &Decision,
    ) -> Result<(), WorkflowError> {
        // Stored tier can lag a policy change; the effective requirement is
        // whichever is higher.
        let policy_tier = self.policy.required_tier(approval.kind, &approval.magnitude);
        let effective = approval.required_tier.max(policy_tier);

        // Rejecting a Pending request only needs decision authority at all;
        // approving, or deciding an Escalated request, needs the full tier.
        let required = match (decision, approval.status) {
            (Decision::Reject, ApprovalStatus::Pending) => Tier::Manager,
            _ => effective,
        };

        let held = decider.role.tier();
        match held {
            Some(tier) if tier >= required => {}
            _ => return Err(WorkflowError::Unauthorized { required, held }),
        }

        if !self.settings.allow_self_approval
            && matches!(decision, Decision::Approve)
            && decider.id == approval.requested_by
        {
            return Err(WorkflowError::Unauthorized { required, held });
        }

        Ok(())
    }

    async fn acquire_lock(&self, approval: &ApprovalRequest) -> Result<(), WorkflowError> {
        match self.quotations.try_acquire(&approval.quotation_id, &approval.id).await? {
            LockAcquire::Acquired => Ok(()),
            LockAcquire::Held(_) => Err(WorkflowError::QuotationLocked {
                quotation_id: approval.quotation_id.clone(),
            }),
            LockAcquire::UnknownQuotation => {
                Err(WorkflowError::UnknownQuotation(approval.quotation_id.clone()))
            }
        }
    }

    /// Insert failed after the lock was taken: unwind it so the quotation is
    /// not stuck behind an approval id that has no row.
    async fn release_orphaned_lock(&self, approval: &ApprovalRequest) {
        if let Err(error) =
            self.quotations.release(&approval.quotation_id, &approval.id).await
        {
            tracing::warn!(
                event_name = "workflow.lock_unwind_failed",
                approval_id = %approval.id,
                quotation_id = %approval.quotation_id,
                error = %error,
                "quotation lock could not be released after a failed insert"
            );
        }
    }

    async fn commit(
        &self,
        updated: &ApprovalRequest,
        expected: ApprovalStatus,
    ) -> Result<(), WorkflowError> {
        let won = self.approvals.transition(updated, expected).await?;
        if !won {
            // Zero rows matched: a concurrent actor got there first.
            return Err(WorkflowError::InvalidStatus {
                approval_id: updated.id.clone(),
                status: expected,
            });
        }
        Ok(())
    }

    async fn append_and_notify(&self, entry: TimelineEntry) -> Result<(), WorkflowError> {
        self.timeline.append(entry.clone()).await?;
        if let Err(error) = self.notifier.notify(&entry).await {
            tracing::warn!(
                event_name = "workflow.notify_failed",
                approval_id = %entry.approval_id,
                quotation_id = %entry.quotation_id,
                timeline_event = entry.event.as_str(),
                error = %error,
                "downstream notification failed; transition already committed"
            );
        }
        Ok(())
    }

    async fn load(&self, approval_id: &ApprovalId) -> Result<ApprovalRequest, WorkflowError> {
        self.approvals
            .find_by_id(approval_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(approval_id.clone()))
    }

    async fn resolve_user(&self, user_id: &UserId) -> Result<UserProfile, WorkflowError> {
        self.directory.resolve(user_id).await?.ok_or_else(|| {
            WorkflowError::Validation(format!("user `{user_id}` is not in the directory"))
        })
    }
}

fn validate_magnitude(magnitude: &Magnitude) -> Result<(), WorkflowError> {
    let value = magnitude.value();
    if value <= Decimal::ZERO {
        return Err(WorkflowError::Validation(format!(
            "magnitude must be positive, got {value}"
        )));
    }
    if let Magnitude::Percent(pct) = magnitude {
        if *pct > Decimal::new(10_000, 2) {
            return Err(WorkflowError::Validation(format!(
                "percentage magnitude cannot exceed 100%, got {pct}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{
        ApprovalWorkflow, BulkOutcome, RequestInput, ResubmitInput, TimelineQuery,
        WorkflowSettings,
    };
    use crate::domain::approval::{
        ApprovalId, ApprovalKind, ApprovalRequest, ApprovalStatus, Magnitude,
    };
    use crate::domain::quotation::{Quotation, QuotationId};
    use crate::domain::roles::{Role, Tier};
    use crate::domain::timeline::TimelineEvent;
    use crate::domain::user::{UserId, UserProfile};
    use crate::policy::{AuthorityPolicy, TierSchedule};
    use crate::workflow::error::{StoreError, WorkflowError};
    use crate::workflow::memory::{
        InMemoryApprovalStore, InMemoryQuotationLocker, InMemoryTimelineStore,
        InMemoryUserDirectory, RecordingNotifier,
    };
    use crate::workflow::ports::{
        ApprovalStore, Page, PageOf, PendingFilter, QuotationLocker,
    };

    struct Harness {
        approvals: Arc<InMemoryApprovalStore>,
        quotations: Arc<InMemoryQuotationLocker>,
        timeline: Arc<InMemoryTimelineStore>,
        directory: Arc<InMemoryUserDirectory>,
        notifier: Arc<RecordingNotifier>,
    }

    impl Harness {
        async fn new() -> Self {
            let harness = Self {
                approvals: Arc::new(InMemoryApprovalStore::default()),
                quotations: Arc::new(InMemoryQuotationLocker::default()),
                timeline: Arc::new(InMemoryTimelineStore::default()),
                directory: Arc::new(InMemoryUserDirectory::default()),
                notifier: Arc::new(RecordingNotifier::default()),
            };
            for (id, role) in [
                ("u-rep", Role::SalesRep),
                ("u-mgr", Role::Manager),
                ("u-mgr-2", Role::Manager),
                ("u-admin", Role::Admin),
                ("u-admin-2", Role::Admin),
            ] {
                harness
                    .directory
                    .seed(UserProfile {
                        id: UserId(id.to_string()),
                        display_name: id.to_string(),
                        role,
                        team_id: Some("emea".to_string()),
                    })
                    .await;
            }
            for quotation in ["Q-1", "Q-2", "Q-3"] {
                harness
                    .quotations
                    .seed(Quotation {
                        id: QuotationId(quotation.to_string()),
                        account_name: "Acme".to_string(),
                        total: Decimal::new(20_000_00, 2),
                        currency: "USD".to_string(),
                        locked_by: None,
                        created_at: Utc::now(),
                    })
                    .await;
            }
            harness
        }

        fn engine(&self) -> ApprovalWorkflow {
            self.engine_with(AuthorityPolicy::default(), WorkflowSettings::default())
        }

        fn engine_with(
            &self,
            policy: AuthorityPolicy,
            settings: WorkflowSettings,
        ) -> ApprovalWorkflow {
            ApprovalWorkflow::new(
                self.approvals.clone(),
                self.quotations.clone(),
                self.timeline.clone(),
                self.directory.clone(),
                self.notifier.clone(),
                policy,
                settings,
            )
        }
    }

    fn percent(pct: i64) -> Magnitude {
        Magnitude::Percent(Decimal::new(pct * 100, 2))
    }

    fn discount_request(quotation: &str, requester: &str, magnitude: Magnitude) -> RequestInput {
        RequestInput {
            quotation_id: QuotationId(quotation.to_string()),
            requested_by: UserId(requester.to_string()),
            kind: ApprovalKind::Discount,
            magnitude,
            note: None,
        }
    }

    #[tokio::test]
    async fn request_locks_quotation_and_derives_the_tier() {
        let harness = Harness::new().await;
        let engine = harness.engine();

        let approval = engine
            .request(discount_request("Q-1", "u-rep", percent(10)))
            .await
            .expect("request");

        assert_eq!(approval.status, ApprovalStatus::Pending);
        assert_eq!(approval.required_tier, Tier::Manager);

        let quotation = harness
            .quotations
            .find_quotation(&approval.quotation_id)
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(quotation.locked_by, Some(approval.id.clone()));

        let timeline =
            engine.get_timeline(&TimelineQuery::Approval(approval.id)).await.expect("timeline");
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline[0].event, TimelineEvent::Requested);
    }

    #[tokio::test]
    async fn second_request_on_a_locked_quotation_conflicts() {
        let harness = Harness::new().await;
        let engine = harness.engine();

        engine.request(discount_request("Q-1", "u-rep", percent(10))).await.expect("first");
        let error = engine
            .request(discount_request("Q-1", "u-admin", percent(5)))
            .await
            .expect_err("second must conflict");

        assert!(matches!(error, WorkflowError::QuotationLocked { .. }));
    }

    #[tokio::test]
    async fn racing_requests_yield_exactly_one_open_approval() {
        let harness = Harness::new().await;
        let engine = harness.engine();

        let (first, second) = tokio::join!(
            engine.request(discount_request("Q-1", "u-rep", percent(10))),
            engine.request(discount_request("Q-1", "u-admin", percent(8))),
        );

        let successes = [&first, &second].iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1, "exactly one request may win the lock");

        let loser = if first.is_err() { first } else { second };
        assert!(matches!(loser, Err(WorkflowError::QuotationLocked { .. })));
    }

    #[tokio::test]
    async fn request_validation_precedes_any_state_change() {
        let harness = Harness::new().await;
        let engine = harness.engine();

        let zero = engine
            .request(discount_request("Q-1", "u-rep", percent(0)))
            .await
            .expect_err("zero magnitude");
        assert!(matches!(zero, WorkflowError::Validation(_)));

        let overflow = engine
            .request(discount_request("Q-1", "u-rep", percent(120)))
            .await
            .expect_err("over 100 percent");
        assert!(matches!(overflow, WorkflowError::Validation(_)));

        // Nothing was locked and nothing reached the timeline.
        let quotation = harness
            .quotations
            .find_quotation(&QuotationId("Q-1".to_string()))
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(quotation.locked_by, None);
        let timeline = engine
            .get_timeline(&TimelineQuery::Quotation(QuotationId("Q-1".to_string())))
            .await
            .expect("timeline");
        assert!(timeline.is_empty());
    }

    #[tokio::test]
    async fn managers_cannot_open_requests() {
        let harness = Harness::new().await;
        let engine = harness.engine();

        let error = engine
            .request(discount_request("Q-1", "u-mgr", percent(10)))
            .await
            .expect_err("manager is not an initiating role");
        assert!(matches!(error, WorkflowError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_quotation_is_a_distinct_failure() {
        let harness = Harness::new().await;
        let engine = harness.engine();

        let error = engine
            .request(discount_request("Q-404", "u-rep", percent(10)))
            .await
            .expect_err("missing quotation");
        assert!(matches!(error, WorkflowError::UnknownQuotation(_)));
    }

    #[tokio::test]
    async fn approve_releases_the_lock_and_appends_in_order() {
        let harness = Harness::new().await;
        let engine = harness.engine();

        let approval = engine
            .request(discount_request("Q-1", "u-rep", percent(10)))
            .await
            .expect("request");
        let approved = engine
            .approve(&approval.id, &UserId("u-mgr".to_string()), Some("fine".to_string()))
            .await
            .expect("approve");

        assert_eq!(approved.status, ApprovalStatus::Approved);
        assert_eq!(approved.approver, Some(UserId("u-mgr".to_string())));
        assert!(approved.decided_at.is_some());

        let quotation = harness
            .quotations
            .find_quotation(&approval.quotation_id)
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(quotation.locked_by, None);

        let timeline = engine
            .get_timeline(&TimelineQuery::Quotation(QuotationId("Q-1".to_string())))
            .await
            .expect("timeline");
        let events: Vec<_> = timeline.iter().map(|entry| entry.event).collect();
        assert_eq!(events, vec![TimelineEvent::Requested, TimelineEvent::Approved]);
    }

    #[tokio::test]
    async fn tier_is_rechecked_on_every_decision() {
        let harness = Harness::new().await;
        let engine = harness.engine();

        // 18% with the default 15% threshold requires Admin.
        let approval = engine
            .request(discount_request("Q-1", "u-rep", percent(18)))
            .await
            .expect("request");
        assert_eq!(approval.required_tier, Tier::Admin);

        let denied = engine
            .approve(&approval.id, &UserId("u-mgr".to_string()), None)
            .await
            .expect_err("manager lacks the tier");
        assert!(matches!(
            denied,
            WorkflowError::Unauthorized { required: Tier::Admin, held: Some(Tier::Manager) }
        ));

        engine
            .approve(&approval.id, &UserId("u-admin".to_string()), None)
            .await
            .expect("admin approves");
    }

    #[tokio::test]
    async fn policy_changes_tighten_already_open_requests() {
        let harness = Harness::new().await;
        let engine = harness.engine();

        let approval = engine
            .request(discount_request("Q-1", "u-rep", percent(10)))
            .await
            .expect("request at manager tier");
        assert_eq!(approval.required_tier, Tier::Manager);

        // Same stores, stricter policy: the stored tier no longer suffices.
        let strict = harness.engine_with(
            AuthorityPolicy::uniform(TierSchedule {
                percent_threshold: Decimal::new(500, 2),
                ..TierSchedule::default()
            }),
            WorkflowSettings::default(),
        );

        let denied = strict
            .approve(&approval.id, &UserId("u-mgr".to_string()), None)
            .await
            .expect_err("policy re-evaluation raises the bar");
        assert!(matches!(denied, WorkflowError::Unauthorized { required: Tier::Admin, .. }));
    }

    #[tokio::test]
    async fn terminal_approvals_are_immutable() {
        let harness = Harness::new().await;
        let engine = harness.engine();

        let approval = engine
            .request(discount_request("Q-1", "u-rep", percent(10)))
            .await
            .expect("request");
        let approved = engine
            .approve(&approval.id, &UserId("u-mgr".to_string()), None)
            .await
            .expect("approve");

        for error in [
            engine.approve(&approval.id, &UserId("u-admin".to_string()), None).await,
            engine
                .reject(&approval.id, &UserId("u-admin".to_string()), "no".to_string())
                .await,
            engine.escalate(&approval.id, &UserId("u-admin".to_string()), None).await,
        ] {
            assert!(matches!(error, Err(WorkflowError::InvalidStatus { .. })));
        }

        let stored = engine.get_by_id(&approval.id).await.expect("get");
        assert_eq!(stored, approved);
    }

    #[tokio::test]
    async fn any_manager_may_reject_a_pending_admin_tier_request() {
        let harness = Harness::new().await;
        let engine = harness.engine();

        let approval = engine
            .request(discount_request("Q-1", "u-rep", percent(18)))
            .await
            .expect("request");
        assert_eq!(approval.required_tier, Tier::Admin);

        let rejected = engine
            .reject(&approval.id, &UserId("u-mgr".to_string()), "too deep".to_string())
            .await
            .expect("manager may reject pending");
        assert_eq!(rejected.status, ApprovalStatus::Rejected);

        // Rejection also frees the quotation.
        let quotation = harness
            .quotations
            .find_quotation(&approval.quotation_id)
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(quotation.locked_by, None);
    }

    #[tokio::test]
    async fn reject_requires_a_reason() {
        let harness = Harness::new().await;
        let engine = harness.engine();

        let approval = engine
            .request(discount_request("Q-1", "u-rep", percent(10)))
            .await
            .expect("request");
        let error = engine
            .reject(&approval.id, &UserId("u-mgr".to_string()), "   ".to_string())
            .await
            .expect_err("blank reason");
        assert!(matches!(error, WorkflowError::Validation(_)));
    }

    #[tokio::test]
    async fn escalation_raises_the_tier_in_place_and_keeps_the_lock() {
        let harness = Harness::new().await;
        let engine = harness.engine();

        let approval = engine
            .request(discount_request("Q-1", "u-rep", percent(10)))
            .await
            .expect("request");
        let escalated = engine
            .escalate(
                &approval.id,
                &UserId("u-mgr".to_string()),
                Some("outside my comfort".to_string()),
            )
            .await
            .expect("escalate");

        assert_eq!(escalated.id, approval.id);
        assert_eq!(escalated.status, ApprovalStatus::Escalated);
        assert_eq!(escalated.required_tier, Tier::Admin);
        assert_eq!(escalated.escalated_from_tier, Some(Tier::Manager));
        assert!(escalated.escalated_at.is_some());

        // The same approval still holds the quotation.
        let conflict = engine
            .request(discount_request("Q-1", "u-admin", percent(5)))
            .await
            .expect_err("still locked");
        assert!(matches!(conflict, WorkflowError::QuotationLocked { .. }));

        // A manager can no longer decide it, not even reject.
        let denied = engine
            .reject(&approval.id, &UserId("u-mgr".to_string()), "nope".to_string())
            .await
            .expect_err("escalated requires the raised tier");
        assert!(matches!(denied, WorkflowError::Unauthorized { .. }));

        let approved = engine
            .approve(&approval.id, &UserId("u-admin".to_string()), None)
            .await
            .expect("admin decides the escalated request");
        assert_eq!(approved.status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn escalating_past_the_ceiling_fails() {
        let harness = Harness::new().await;
        let engine = harness.engine();

        let approval = engine
            .request(discount_request("Q-1", "u-rep", percent(18)))
            .await
            .expect("request at admin tier");
        let error = engine
            .escalate(&approval.id, &UserId("u-admin".to_string()), None)
            .await
            .expect_err("admin is the ceiling");
        assert!(matches!(error, WorkflowError::Validation(_)));

        let stored = engine.get_by_id(&approval.id).await.expect("get");
        assert_eq!(stored.status, ApprovalStatus::Pending);
    }

    #[tokio::test]
    async fn resubmission_chains_forward_without_touching_the_parent() {
        let harness = Harness::new().await;
        let engine = harness.engine();

        let parent = engine
            .request(discount_request("Q-1", "u-rep", percent(18)))
            .await
            .expect("request");
        engine
            .reject(&parent.id, &UserId("u-admin".to_string()), "too deep".to_string())
            .await
            .expect("reject");

        let child = engine
            .resubmit(ResubmitInput {
                parent_approval_id: parent.id.clone(),
                resubmitted_by: UserId("u-rep".to_string()),
                magnitude: percent(12),
                note: Some("trimmed the ask".to_string()),
            })
            .await
            .expect("resubmit");

        assert_eq!(child.parent_approval_id, Some(parent.id.clone()));
        assert_eq!(child.status, ApprovalStatus::Pending);
        // Lower magnitude re-runs the policy: Manager suffices now.
        assert_eq!(child.required_tier, Tier::Manager);

        let stored_parent = engine.get_by_id(&parent.id).await.expect("parent");
        assert_eq!(stored_parent.status, ApprovalStatus::Rejected);

        // The child holds the lock again.
        let quotation = harness
            .quotations
            .find_quotation(&child.quotation_id)
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(quotation.locked_by, Some(child.id.clone()));

        let events: Vec<_> = engine
            .get_timeline(&TimelineQuery::Quotation(QuotationId("Q-1".to_string())))
            .await
            .expect("timeline")
            .iter()
            .map(|entry| entry.event)
            .collect();
        assert_eq!(
            events,
            vec![TimelineEvent::Requested, TimelineEvent::Rejected, TimelineEvent::Resubmitted]
        );
    }

    #[tokio::test]
    async fn only_rejected_requests_can_be_resubmitted() {
        let harness = Harness::new().await;
        let engine = harness.engine();

        let approval = engine
            .request(discount_request("Q-1", "u-rep", percent(10)))
            .await
            .expect("request");
        let error = engine
            .resubmit(ResubmitInput {
                parent_approval_id: approval.id.clone(),
                resubmitted_by: UserId("u-rep".to_string()),
                magnitude: percent(8),
                note: None,
            })
            .await
            .expect_err("pending parent");
        assert!(matches!(error, WorkflowError::InvalidStatus { .. }));
    }

    #[tokio::test]
    async fn bulk_approve_is_independent_per_item() {
        let harness = Harness::new().await;
        let engine = harness.engine();

        let a = engine
            .request(discount_request("Q-1", "u-rep", percent(10)))
            .await
            .expect("a");
        let b = engine
            .request(discount_request("Q-2", "u-rep", percent(10)))
            .await
            .expect("b");
        let c = engine
            .request(discount_request("Q-3", "u-rep", percent(10)))
            .await
            .expect("c");

        // B is already decided before the batch runs.
        engine.approve(&b.id, &UserId("u-mgr".to_string()), None).await.expect("pre-approve b");

        let BulkOutcome { approved, failed } = engine
            .bulk_approve(
                &[a.id.clone(), b.id.clone(), c.id.clone()],
                &UserId("u-mgr".to_string()),
            )
            .await;

        assert_eq!(approved, vec![a.id.clone(), c.id.clone()]);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].approval_id, b.id);
        assert_eq!(failed[0].code, "invalid_status");

        let a_events = engine
            .get_timeline(&TimelineQuery::Approval(a.id))
            .await
            .expect("timeline")
            .iter()
            .map(|entry| entry.event)
            .collect::<Vec<_>>();
        assert_eq!(a_events, vec![TimelineEvent::Requested, TimelineEvent::BulkApproved]);
    }

    #[tokio::test]
    async fn racing_decisions_produce_one_winner() {
        let harness = Harness::new().await;
        let engine = harness.engine();

        let approval = engine
            .request(discount_request("Q-1", "u-rep", percent(10)))
            .await
            .expect("request");

        let approver = UserId("u-mgr".to_string());
        let rejecter = UserId("u-mgr-2".to_string());
        let (approve, reject) = tokio::join!(
            engine.approve(&approval.id, &approver, None),
            engine.reject(&approval.id, &rejecter, "no".to_string()),
        );

        let successes = [approve.is_ok(), reject.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(successes, 1, "exactly one decision may commit");

        let stored = engine.get_by_id(&approval.id).await.expect("get");
        match (&approve, &reject) {
            (Ok(winner), Err(WorkflowError::InvalidStatus { .. })) => {
                assert_eq!(stored.status, ApprovalStatus::Approved);
                assert_eq!(stored.approver, winner.approver);
            }
            (Err(WorkflowError::InvalidStatus { .. }), Ok(winner)) => {
                assert_eq!(stored.status, ApprovalStatus::Rejected);
                assert_eq!(stored.approver, winner.approver);
            }
            other => panic!("unexpected race outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn self_approval_is_gated_by_configuration() {
        let harness = Harness::new().await;
        let engine = harness.engine();

        let approval = engine
            .request(discount_request("Q-1", "u-admin", percent(18)))
            .await
            .expect("admin self-request");

        let denied = engine
            .approve(&approval.id, &UserId("u-admin".to_string()), None)
            .await
            .expect_err("self-approval is off by default");
        assert!(matches!(denied, WorkflowError::Unauthorized { .. }));

        // Another admin can still decide it.
        let permissive = harness.engine_with(
            AuthorityPolicy::default(),
            WorkflowSettings { allow_self_approval: true },
        );
        let approved = permissive
            .approve(&approval.id, &UserId("u-admin".to_string()), None)
            .await
            .expect("flag permits self-approval");
        assert_eq!(approved.status, ApprovalStatus::Approved);
    }

    struct InsertRefusedStore;

    #[async_trait]
    impl ApprovalStore for InsertRefusedStore {
        async fn insert(&self, _approval: ApprovalRequest) -> Result<(), StoreError> {
            Err(StoreError::Backend("disk full".to_string()))
        }

        async fn find_by_id(
            &self,
            _id: &ApprovalId,
        ) -> Result<Option<ApprovalRequest>, StoreError> {
            Ok(None)
        }

        async fn find_by_quotation(
            &self,
            _quotation_id: &QuotationId,
        ) -> Result<Vec<ApprovalRequest>, StoreError> {
            Ok(Vec::new())
        }

        async fn list_pending(
            &self,
            _filter: &PendingFilter,
            page: Page,
        ) -> Result<PageOf<ApprovalRequest>, StoreError> {
            Ok(PageOf { items: Vec::new(), total: 0, offset: page.offset, limit: page.limit })
        }

        async fn transition(
            &self,
            _updated: &ApprovalRequest,
            _expected: ApprovalStatus,
        ) -> Result<bool, StoreError> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn failed_insert_releases_the_quotation_lock() {
        let harness = Harness::new().await;
        let engine = ApprovalWorkflow::new(
            Arc::new(InsertRefusedStore),
            harness.quotations.clone(),
            harness.timeline.clone(),
            harness.directory.clone(),
            harness.notifier.clone(),
            AuthorityPolicy::default(),
            WorkflowSettings::default(),
        );

        let denied = engine
            .request(discount_request("Q-1", "u-rep", percent(10)))
            .await
            .expect_err("insert refusal propagates");
        assert!(matches!(denied, WorkflowError::Store(_)));

        let quotation = harness
            .quotations
            .find_quotation(&QuotationId("Q-1".to_string()))
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(quotation.locked_by, None, "the lock must not outlive the failed request");
    }

    #[tokio::test]
    async fn notifier_failure_never_fails_a_committed_transition() {
        let harness = Harness::new().await;
        let engine = ApprovalWorkflow::new(
            harness.approvals.clone(),
            harness.quotations.clone(),
            harness.timeline.clone(),
            harness.directory.clone(),
            Arc::new(RecordingNotifier::failing()),
            AuthorityPolicy::default(),
            WorkflowSettings::default(),
        );

        let approval = engine
            .request(discount_request("Q-1", "u-rep", percent(10)))
            .await
            .expect("request succeeds despite notifier");
        let approved = engine
            .approve(&approval.id, &UserId("u-mgr".to_string()), None)
            .await
            .expect("approve succeeds despite notifier");
        assert_eq!(approved.status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn pending_queue_filters_and_pages() {
        let harness = Harness::new().await;
        let engine = harness.engine();

        engine.request(discount_request("Q-1", "u-rep", percent(10))).await.expect("a");
        engine.request(discount_request("Q-2", "u-admin", percent(18))).await.expect("b");
        let c = engine
            .request(discount_request("Q-3", "u-rep", percent(20)))
            .await
            .expect("c");
        engine.approve(&c.id, &UserId("u-admin".to_string()), None).await.expect("decide c");

        let open = engine
            .get_pending(&PendingFilter::default(), Page::default())
            .await
            .expect("open");
        assert_eq!(open.total, 2);

        let by_requester = engine
            .get_pending(
                &PendingFilter {
                    requested_by: Some(UserId("u-rep".to_string())),
                    ..PendingFilter::default()
                },
                Page::default(),
            )
            .await
            .expect("filtered");
        assert_eq!(by_requester.total, 1);

        let paged = engine
            .get_pending(&PendingFilter::default(), Page { offset: 1, limit: 1 })
            .await
            .expect("paged");
        assert_eq!(paged.total, 2);
        assert_eq!(paged.items.len(), 1);
    }

    #[tokio::test]
    async fn end_to_end_admin_tier_scenario() {
        let harness = Harness::new().await;
        let engine = harness.engine();

        let approval = engine
            .request(discount_request("Q-1", "u-rep", percent(18)))
            .await
            .expect("request");
        assert_eq!(approval.required_tier, Tier::Admin);

        let denied = engine
            .approve(&approval.id, &UserId("u-mgr".to_string()), None)
            .await
            .expect_err("manager denied");
        assert!(matches!(denied, WorkflowError::Unauthorized { .. }));

        engine
            .approve(&approval.id, &UserId("u-admin".to_string()), None)
            .await
            .expect("admin approves");

        let quotation = harness
            .quotations
            .find_quotation(&QuotationId("Q-1".to_string()))
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(quotation.locked_by, None);

        let events: Vec<_> = engine
            .get_timeline(&TimelineQuery::Quotation(QuotationId("Q-1".to_string())))
            .await
            .expect("timeline")
            .iter()
            .map(|entry| entry.event)
            .collect();
        assert_eq!(events, vec![TimelineEvent::Requested, TimelineEvent::Approved]);

        let sent = harness.notifier.sent().await;
        assert_eq!(sent.len(), 2);
    }
}
