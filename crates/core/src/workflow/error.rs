use thiserror::Error;

use crate::domain::approval::{ApprovalId, ApprovalStatus};
use crate::domain::quotation::QuotationId;
use crate::domain::roles::Tier;

/// Failure surfaced by a collaborator port (persistence, directory,
/// notifier transport). Carried through the engine unchanged so the calling
/// layer never mistakes an infrastructure fault for a domain outcome.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("decode error: {0}")]
    Decode(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("approval `{0}` not found")]
    NotFound(ApprovalId),
    #[error("quotation `{0}` not found")]
    UnknownQuotation(QuotationId),
    #[error("approval `{approval_id}` does not permit this transition from {status:?}")]
    InvalidStatus { approval_id: ApprovalId, status: ApprovalStatus },
    #[error("quotation `{quotation_id}` already has an open approval")]
    QuotationLocked { quotation_id: QuotationId },
    #[error("actor tier {held:?} is insufficient (requires at least {required:?})")]
    Unauthorized { required: Tier, held: Option<Tier> },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WorkflowError {
    /// Short machine-readable label, used in bulk outcomes and log fields.
    pub fn code(&self) -> &'static str {
        match self {
            WorkflowError::NotFound(_) => "not_found",
            WorkflowError::UnknownQuotation(_) => "unknown_quotation",
            WorkflowError::InvalidStatus { .. } => "invalid_status",
            WorkflowError::QuotationLocked { .. } => "quotation_locked",
            WorkflowError::Unauthorized { .. } => "unauthorized",
            WorkflowError::Validation(_) => "validation",
            WorkflowError::Store(_) => "store",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{StoreError, WorkflowError};
    use crate::domain::approval::ApprovalId;

    #[test]
    fn store_errors_pass_through_transparently() {
        let err = WorkflowError::from(StoreError::Backend("disk full".to_string()));
        assert_eq!(err.to_string(), "backend error: disk full");
        assert_eq!(err.code(), "store");
    }

    #[test]
    fn codes_are_stable_labels() {
        assert_eq!(WorkflowError::NotFound(ApprovalId("a".into())).code(), "not_found");
        assert_eq!(WorkflowError::Validation("x".into()).code(), "validation");
    }
}
