pub mod engine;
pub mod error;
pub mod memory;
pub mod ports;

pub use engine::{
    ApprovalWorkflow, BulkFailure, BulkOutcome, RequestInput, ResubmitInput, TimelineQuery,
    WorkflowSettings,
};
pub use error::{StoreError, WorkflowError};
pub use ports::{
    ApprovalStore, LockAcquire, Notifier, Page, PageOf, PendingFilter, QuotationLocker,
    TimelineStore, UserDirectory,
};
