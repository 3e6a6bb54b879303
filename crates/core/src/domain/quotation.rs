use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::approval::ApprovalId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuotationId(pub String);

impl std::fmt::Display for QuotationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The external record an approval locks. The engine reads and toggles
/// `locked_by` through the locker port; it never touches the monetary
/// fields — applying an approved discount is the caller's separate step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quotation {
    pub id: QuotationId,
    pub account_name: String,
    pub total: Decimal,
    pub currency: String,
    pub locked_by: Option<ApprovalId>,
    pub created_at: DateTime<Utc>,
}

impl Quotation {
    pub fn is_locked(&self) -> bool {
        self.locked_by.is_some()
    }
}
