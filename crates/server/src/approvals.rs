//! REST surface for the approval workflow.
//!
//! Thin layer by intent: handlers translate HTTP into engine calls and map
//! `WorkflowError` onto status codes. All authority, state, and concurrency
//! rules live in `greenlight_core`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use greenlight_core::domain::approval::{
    ApprovalId, ApprovalKind, ApprovalRequest, ApprovalStatus, Magnitude,
};
use greenlight_core::domain::quotation::QuotationId;
use greenlight_core::domain::timeline::TimelineEntry;
use greenlight_core::domain::user::UserId;
use greenlight_core::workflow::{
    ApprovalWorkflow, BulkOutcome, Page, PageOf, PendingFilter, RequestInput, ResubmitInput,
    TimelineQuery, WorkflowError,
};

#[derive(Clone)]
pub struct ApiState {
    pub workflow: ApprovalWorkflow,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub error: String,
}

type HandlerError = (StatusCode, Json<ApiError>);

pub fn router(workflow: ApprovalWorkflow) -> Router {
    Router::new()
        .route("/api/v1/approvals", post(create_approval).get(list_pending))
        .route("/api/v1/approvals/bulk-approve", post(bulk_approve))
        .route("/api/v1/approvals/{approval_id}", get(get_approval))
        .route("/api/v1/approvals/{approval_id}/approve", post(approve))
        .route("/api/v1/approvals/{approval_id}/reject", post(reject))
        .route("/api/v1/approvals/{approval_id}/escalate", post(escalate))
        .route("/api/v1/approvals/{approval_id}/resubmit", post(resubmit))
        .route("/api/v1/quotations/{quotation_id}/approvals", get(quotation_approvals))
        .route("/api/v1/timeline", get(timeline))
        .with_state(ApiState { workflow })
}

fn map_workflow_error(error: WorkflowError) -> HandlerError {
    let status = match &error {
        WorkflowError::NotFound(_) | WorkflowError::UnknownQuotation(_) => StatusCode::NOT_FOUND,
        WorkflowError::InvalidStatus { .. } | WorkflowError::QuotationLocked { .. } => {
            StatusCode::CONFLICT
        }
        WorkflowError::Unauthorized { .. } => StatusCode::FORBIDDEN,
        WorkflowError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        WorkflowError::Store(inner) => {
            error!(error = %inner, "workflow store error");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
        "an internal storage error occurred".to_string()
    } else {
        error.to_string()
    };

    (status, Json(ApiError { code: error.code().to_string(), error: message }))
}

#[derive(Debug, Deserialize)]
pub struct CreateApprovalRequest {
    pub quotation_id: String,
    pub requested_by: String,
    pub kind: ApprovalKind,
    pub magnitude: Magnitude,
    #[serde(default)]
    pub note: Option<String>,
}

async fn create_approval(
    State(state): State<ApiState>,
    Json(body): Json<CreateApprovalRequest>,
) -> Result<(StatusCode, Json<ApprovalRequest>), HandlerError> {
    let approval = state
        .workflow
        .request(RequestInput {
            quotation_id: QuotationId(body.quotation_id),
            requested_by: UserId(body.requested_by),
            kind: body.kind,
            magnitude: body.magnitude,
            note: body.note,
        })
        .await
        .map_err(map_workflow_error)?;

    info!(
        event_name = "api.approval.requested",
        approval_id = %approval.id.0,
        quotation_id = %approval.quotation_id.0,
        required_tier = %approval.required_tier.as_str(),
        "approval request created"
    );
    Ok((StatusCode::CREATED, Json(approval)))
}

#[derive(Debug, Default, Deserialize)]
pub struct PendingQuery {
    pub status: Option<String>,
    pub requested_by: Option<String>,
    pub approver: Option<String>,
    pub min_magnitude: Option<Decimal>,
    pub max_magnitude: Option<Decimal>,
    pub requested_after: Option<DateTime<Utc>>,
    pub requested_before: Option<DateTime<Utc>>,
    pub offset: Option<u32>,
    pub limit: Option<u32>,
}

async fn list_pending(
    State(state): State<ApiState>,
    Query(query): Query<PendingQuery>,
) -> Result<Json<PageOf<ApprovalRequest>>, HandlerError> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(ApprovalStatus::parse(raw).ok_or_else(|| {
            map_workflow_error(WorkflowError::Validation(format!(
                "unknown status filter `{raw}`"
            )))
        })?),
        None => None,
    };

    let filter = PendingFilter {
        status,
        requested_by: query.requested_by.map(UserId),
        approver: query.approver.map(UserId),
        min_magnitude: query.min_magnitude,
        max_magnitude: query.max_magnitude,
        requested_after: query.requested_after,
        requested_before: query.requested_before,
    };
    let default_page = Page::default();
    let page = Page {
        offset: query.offset.unwrap_or(default_page.offset),
        limit: query.limit.unwrap_or(default_page.limit),
    };

    let result =
        state.workflow.get_pending(&filter, page).await.map_err(map_workflow_error)?;
    Ok(Json(result))
}

async fn get_approval(
    State(state): State<ApiState>,
    Path(approval_id): Path<String>,
) -> Result<Json<ApprovalRequest>, HandlerError> {
    let approval = state
        .workflow
        .get_by_id(&ApprovalId(approval_id))
        .await
        .map_err(map_workflow_error)?;
    Ok(Json(approval))
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub decided_by: String,
    #[serde(default)]
    pub note: Option<String>,
}

async fn approve(
    State(state): State<ApiState>,
    Path(approval_id): Path<String>,
    Json(body): Json<ApproveRequest>,
) -> Result<Json<ApprovalRequest>, HandlerError> {
    let approval = state
        .workflow
        .approve(&ApprovalId(approval_id), &UserId(body.decided_by), body.note)
        .await
        .map_err(map_workflow_error)?;
    info!(
        event_name = "api.approval.approved",
        approval_id = %approval.id.0,
        quotation_id = %approval.quotation_id.0,
        "approval granted"
    );
    Ok(Json(approval))
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub decided_by: String,
    pub reason: String,
}

async fn reject(
    State(state): State<ApiState>,
    Path(approval_id): Path<String>,
    Json(body): Json<RejectRequest>,
) -> Result<Json<ApprovalRequest>, HandlerError> {
    let approval = state
        .workflow
        .reject(&ApprovalId(approval_id), &UserId(body.decided_by), body.reason)
        .await
        .map_err(map_workflow_error)?;
    info!(
        event_name = "api.approval.rejected",
        approval_id = %approval.id.0,
        quotation_id = %approval.quotation_id.0,
        "approval rejected"
    );
    Ok(Json(approval))
}

#[derive(Debug, Deserialize)]
pub struct EscalateRequest {
    pub escalated_by: String,
    #[serde(default)]
    pub reason: Option<String>,
}

async fn escalate(
    State(state): State<ApiState>,
    Path(approval_id): Path<String>,
    Json(body): Json<EscalateRequest>,
) -> Result<Json<ApprovalRequest>, HandlerError> {
    let approval = state
        .workflow
        .escalate(&ApprovalId(approval_id), &UserId(body.escalated_by), body.reason)
        .await
        .map_err(map_workflow_error)?;
    info!(
        event_name = "api.approval.escalated",
        approval_id = %approval.id.0,
        quotation_id = %approval.quotation_id.0,
        required_tier = %approval.required_tier.as_str(),
        "approval escalated"
    );
    Ok(Json(approval))
}

#[derive(Debug, Deserialize)]
pub struct ResubmitRequest {
    pub resubmitted_by: String,
    pub magnitude: Magnitude,
    #[serde(default)]
    pub note: Option<String>,
}

async fn resubmit(
    State(state): State<ApiState>,
    Path(approval_id): Path<String>,
    Json(body): Json<ResubmitRequest>,
) -> Result<(StatusCode, Json<ApprovalRequest>), HandlerError> {
    let approval = state
        .workflow
        .resubmit(ResubmitInput {
            parent_approval_id: ApprovalId(approval_id),
            resubmitted_by: UserId(body.resubmitted_by),
            magnitude: body.magnitude,
            note: body.note,
        })
        .await
        .map_err(map_workflow_error)?;
    info!(
        event_name = "api.approval.resubmitted",
        approval_id = %approval.id.0,
        quotation_id = %approval.quotation_id.0,
        "approval resubmitted"
    );
    Ok((StatusCode::CREATED, Json(approval)))
}

#[derive(Debug, Deserialize)]
pub struct BulkApproveRequest {
    pub approval_ids: Vec<String>,
    pub decided_by: String,
}

async fn bulk_approve(
    State(state): State<ApiState>,
    Json(body): Json<BulkApproveRequest>,
) -> Result<Json<BulkOutcome>, HandlerError> {
    if body.approval_ids.is_empty() {
        return Err(map_workflow_error(WorkflowError::Validation(
            "approval_ids must not be empty".to_string(),
        )));
    }

    let ids: Vec<ApprovalId> = body.approval_ids.into_iter().map(ApprovalId).collect();
    let outcome = state.workflow.bulk_approve(&ids, &UserId(body.decided_by)).await;
    info!(
        event_name = "api.approval.bulk_approved",
        approved = outcome.approved.len(),
        failed = outcome.failed.len(),
        "bulk approval completed"
    );
    Ok(Json(outcome))
}

async fn quotation_approvals(
    State(state): State<ApiState>,
    Path(quotation_id): Path<String>,
) -> Result<Json<Vec<ApprovalRequest>>, HandlerError> {
    let approvals = state
        .workflow
        .get_by_quotation(&QuotationId(quotation_id))
        .await
        .map_err(map_workflow_error)?;
    Ok(Json(approvals))
}

#[derive(Debug, Default, Deserialize)]
pub struct TimelineParams {
    pub approval_id: Option<String>,
    pub quotation_id: Option<String>,
}

async fn timeline(
    State(state): State<ApiState>,
    Query(params): Query<TimelineParams>,
) -> Result<Json<Vec<TimelineEntry>>, HandlerError> {
    let query = match (params.approval_id, params.quotation_id) {
        (Some(approval_id), None) => TimelineQuery::Approval(ApprovalId(approval_id)),
        (None, Some(quotation_id)) => TimelineQuery::Quotation(QuotationId(quotation_id)),
        _ => {
            return Err(map_workflow_error(WorkflowError::Validation(
                "exactly one of approval_id or quotation_id is required".to_string(),
            )))
        }
    };

    let entries = state.workflow.get_timeline(&query).await.map_err(map_workflow_error)?;
    Ok(Json(entries))
}
