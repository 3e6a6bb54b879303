pub mod config;
pub mod domain;
pub mod policy;
pub mod workflow;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
pub use domain::approval::{
    ApprovalId, ApprovalKind, ApprovalRequest, ApprovalStatus, Magnitude,
};
pub use domain::quotation::{Quotation, QuotationId};
pub use domain::roles::{Role, Tier};
pub use domain::timeline::{TimelineEntry, TimelineEvent};
pub use domain::user::{UserId, UserProfile};
pub use policy::{AuthorityPolicy, TierSchedule};
pub use workflow::{
    ApprovalStore, ApprovalWorkflow, BulkFailure, BulkOutcome, LockAcquire, Notifier, Page,
    PageOf, PendingFilter, QuotationLocker, RequestInput, ResubmitInput, StoreError,
    TimelineQuery, TimelineStore, UserDirectory, WorkflowError, WorkflowSettings,
};
