use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::approval::ApprovalId;
use crate::domain::quotation::QuotationId;
use crate::domain::user::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEvent {
    Requested,
    Approved,
    Rejected,
    Escalated,
    Resubmitted,
    BulkApproved,
}

impl TimelineEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimelineEvent::Requested => "requested",
            TimelineEvent::Approved => "approved",
            TimelineEvent::Rejected => "rejected",
            TimelineEvent::Escalated => "escalated",
            TimelineEvent::Resubmitted => "resubmitted",
            TimelineEvent::BulkApproved => "bulk_approved",
        }
    }

    pub fn parse(raw: &str) -> Option<TimelineEvent> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "requested" => Some(TimelineEvent::Requested),
            "approved" => Some(TimelineEvent::Approved),
            "rejected" => Some(TimelineEvent::Rejected),
            "escalated" => Some(TimelineEvent::Escalated),
            "resubmitted" => Some(TimelineEvent::Resubmitted),
            "bulk_approved" => Some(TimelineEvent::BulkApproved),
            _ => None,
        }
    }
}

/// One durable audit record. Entries are append-only; nothing in the system
/// updates or deletes them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub entry_id: String,
    pub approval_id: ApprovalId,
    pub quotation_id: QuotationId,
    pub event: TimelineEvent,
    pub actor: UserId,
    pub detail: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl TimelineEntry {
    pub fn record(
        approval_id: ApprovalId,
        quotation_id: QuotationId,
        event: TimelineEvent,
        actor: UserId,
        detail: Option<String>,
    ) -> Self {
        Self {
            entry_id: Uuid::new_v4().to_string(),
            approval_id,
            quotation_id,
            event,
            actor,
            detail,
            occurred_at: Utc::now(),
        }
    }
}
