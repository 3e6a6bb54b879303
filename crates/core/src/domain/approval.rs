use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::quotation::QuotationId;
use crate::domain::roles::Tier;
use crate::domain::user::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalId(pub String);

impl ApprovalId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for ApprovalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of discretionary adjustment the approval covers. The workflow
/// is identical across kinds; only the policy thresholds differ.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    Discount,
    Refund,
    PriceAdjustment,
}

impl ApprovalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalKind::Discount => "discount",
            ApprovalKind::Refund => "refund",
            ApprovalKind::PriceAdjustment => "price_adjustment",
        }
    }

    pub fn parse(raw: &str) -> Option<ApprovalKind> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "discount" => Some(ApprovalKind::Discount),
            "refund" => Some(ApprovalKind::Refund),
            "price_adjustment" => Some(ApprovalKind::PriceAdjustment),
            _ => None,
        }
    }
}

/// Caller-supplied size of the adjustment. The engine never computes these
/// values; it only compares them against policy thresholds of the same unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "unit", content = "value", rename_all = "snake_case")]
pub enum Magnitude {
    Percent(Decimal),
    Amount(Decimal),
}

impl Magnitude {
    pub fn value(&self) -> Decimal {
        match self {
            Magnitude::Percent(v) | Magnitude::Amount(v) => *v,
        }
    }
}

impl std::fmt::Display for Magnitude {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Magnitude::Percent(v) => write!(f, "{v}%"),
            Magnitude::Amount(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Escalated,
}

impl ApprovalStatus {
    /// Terminal statuses never change again; history lives on through
    /// resubmission rows, not through mutation.
    pub fn is_terminal(self) -> bool {
        matches!(self, ApprovalStatus::Approved | ApprovalStatus::Rejected)
    }

    /// An open approval is what holds the quotation lock.
    pub fn is_open(self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Escalated => "escalated",
        }
    }

    pub fn parse(raw: &str) -> Option<ApprovalStatus> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(ApprovalStatus::Pending),
            "approved" => Some(ApprovalStatus::Approved),
            "rejected" => Some(ApprovalStatus::Rejected),
            "escalated" => Some(ApprovalStatus::Escalated),
            _ => None,
        }
    }
}

/// One approval request on one quotation. Created only by request or
/// resubmit, mutated only through the workflow engine's conditioned
/// transitions, never deleted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: ApprovalId,
    pub quotation_id: QuotationId,
    pub kind: ApprovalKind,
    pub magnitude: Magnitude,
    pub status: ApprovalStatus,
    pub required_tier: Tier,
    pub requested_by: UserId,
    pub requested_at: DateTime<Utc>,
    pub note: Option<String>,
    pub approver: Option<UserId>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decision_reason: Option<String>,
    pub escalated_from_tier: Option<Tier>,
    pub escalated_at: Option<DateTime<Utc>>,
    pub escalation_reason: Option<String>,
    /// Back-reference to the rejected request this one supersedes. Set only
    /// at creation against a terminal parent, so chains are forward-only and
    /// cycles are impossible by construction.
    pub parent_approval_id: Option<ApprovalId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn open(
        quotation_id: QuotationId,
        kind: ApprovalKind,
        magnitude: Magnitude,
        required_tier: Tier,
        requested_by: UserId,
        note: Option<String>,
        parent_approval_id: Option<ApprovalId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ApprovalId::generate(),
            quotation_id,
            kind,
            magnitude,
            status: ApprovalStatus::Pending,
            required_tier,
            requested_by,
            requested_at: now,
            note,
            approver: None,
            decided_at: None,
            decision_reason: None,
            escalated_from_tier: None,
            escalated_at: None,
            escalation_reason: None,
            parent_approval_id,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }
}
