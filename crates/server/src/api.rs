//! JSON API over the expense workflow.
//!
//! Every route except `/health` requires the `x-expensa-employee` header naming the acting
//! employee; the directory lookup turns it into the principal passed to the workflow.
//!
//! - `GET    /api/v1/expenses`                       own expenses with status counts
//! - `POST   /api/v1/expenses`                       create a draft
//! - `GET    /api/v1/expenses/{expense_id}`          expense with its approval chain
//! - `PUT    /api/v1/expenses/{expense_id}`          edit a draft
//! - `POST   /api/v1/expenses/{expense_id}/receipt`  attach a receipt reference
//! - `POST   /api/v1/expenses/{expense_id}/submit`   route to approvers
//! - `POST   /api/v1/expenses/{expense_id}/decision` approve or reject
//! - `GET    /api/v1/approvals/pending`              actionable approval queue
//! - `GET    /api/v1/approvals/history`              decisions already taken
//! - `GET    /api/v1/rules`                          organization rules (admin)
//! - `PUT    /api/v1/rules`                          create or replace a rule (admin)
//! - `GET    /api/v1/rules/employee/{employee_id}`   rule for one employee (admin)
//! - `DELETE /api/v1/rules/{rule_id}`                delete a rule (admin)
//! - `GET    /api/v1/admin/summary`                  organization counts (admin)

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use expensa_core::approvals::RuleDraft;
use expensa_core::domain::employee::{EmployeeId, Principal};
use expensa_core::domain::expense::{Expense, ExpenseDraft, ExpenseId};
use expensa_core::domain::rule::{ApprovalRule, ApprovalRuleId};
use expensa_core::errors::{ApplicationError, InterfaceError};
use expensa_db::{
    ApprovalQueueItem, Decision, ExpenseDashboard, ExpenseDetail, ExpenseWorkflow,
    OrganizationSummary, ReceiptUpload,
};
use serde::Serialize;
use tracing::{error, warn};
use uuid::Uuid;

pub const PRINCIPAL_HEADER: &str = "x-expensa-employee";
pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct ApiState {
    workflow: Arc<ExpenseWorkflow>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    pub correlation_id: String,
}

/// Interface error rendered as a JSON response.
#[derive(Debug)]
pub struct ApiError(pub InterfaceError);

impl ApiError {
    fn from_application(error: ApplicationError, correlation_id: &str) -> Self {
        Self(error.into_interface(correlation_id))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let interface = self.0;
        let status = match &interface {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::Forbidden { .. } => StatusCode::FORBIDDEN,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if status.is_server_error() {
            error!(
                event_name = "api.request.failed",
                correlation_id = %interface.correlation_id(),
                error = %interface,
                "request failed"
            );
            interface.user_message().to_string()
        } else {
            warn!(
                event_name = "api.request.rejected",
                correlation_id = %interface.correlation_id(),
                code = interface.code(),
                error = %interface,
                "request rejected"
            );
            interface.message().to_string()
        };

        let body = ErrorBody {
            error: interface.code(),
            message,
            correlation_id: interface.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn router(workflow: Arc<ExpenseWorkflow>) -> Router {
    Router::new()
        .route("/api/v1/expenses", get(list_expenses).post(create_expense))
        .route("/api/v1/expenses/{expense_id}", get(expense_detail).put(update_expense))
        .route("/api/v1/expenses/{expense_id}/receipt", post(attach_receipt))
        .route("/api/v1/expenses/{expense_id}/submit", post(submit_expense))
        .route("/api/v1/expenses/{expense_id}/decision", post(decide_expense))
        .route("/api/v1/approvals/pending", get(pending_approvals))
        .route("/api/v1/approvals/history", get(approval_history))
        .route("/api/v1/rules", get(list_rules).put(save_rule))
        .route("/api/v1/rules/employee/{employee_id}", get(rule_for_employee))
        .route("/api/v1/rules/{rule_id}", delete(delete_rule))
        .route("/api/v1/admin/summary", get(organization_summary))
        .with_state(ApiState { workflow })
}

/// Request context: the correlation id and the resolved principal.
struct Caller {
    correlation_id: String,
    principal: Principal,
}

impl Caller {
    async fn resolve(state: &ApiState, headers: &HeaderMap) -> Result<Self, ApiError> {
        let correlation_id = headers
            .get(CORRELATION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let employee_id = headers
            .get(PRINCIPAL_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                ApiError(InterfaceError::Forbidden {
                    message: format!("missing `{PRINCIPAL_HEADER}` header"),
                    correlation_id: correlation_id.clone(),
                })
            })?;

        let principal = state
            .workflow
            .principal(&EmployeeId(employee_id.to_string()))
            .await
            .map_err(|error| ApiError::from_application(error, &correlation_id))?;

        Ok(Self { correlation_id, principal })
    }

    fn fail(&self, error: ApplicationError) -> ApiError {
        ApiError::from_application(error, &self.correlation_id)
    }
}

async fn list_expenses(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<ExpenseDashboard> {
    let caller = Caller::resolve(&state, &headers).await?;
    let dashboard =
        state.workflow.list_expenses(&caller.principal).await.map_err(|e| caller.fail(e))?;
    Ok(Json(dashboard))
}

async fn create_expense(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(draft): Json<ExpenseDraft>,
) -> Result<(StatusCode, Json<Expense>), ApiError> {
    let caller = Caller::resolve(&state, &headers).await?;
    let expense =
        state.workflow.create_expense(&caller.principal, draft).await.map_err(|e| caller.fail(e))?;
    Ok((StatusCode::CREATED, Json(expense)))
}

async fn expense_detail(
    State(state): State<ApiState>,
    Path(expense_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<ExpenseDetail> {
    let caller = Caller::resolve(&state, &headers).await?;
    let detail = state
        .workflow
        .expense_detail(&caller.principal, &ExpenseId(expense_id))
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(Json(detail))
}

async fn update_expense(
    State(state): State<ApiState>,
    Path(expense_id): Path<String>,
    headers: HeaderMap,
    Json(draft): Json<ExpenseDraft>,
) -> ApiResult<Expense> {
    let caller = Caller::resolve(&state, &headers).await?;
    let expense = state
        .workflow
        .update_draft(&caller.principal, &ExpenseId(expense_id), draft)
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(Json(expense))
}

async fn attach_receipt(
    State(state): State<ApiState>,
    Path(expense_id): Path<String>,
    headers: HeaderMap,
    Json(upload): Json<ReceiptUpload>,
) -> ApiResult<Expense> {
    let caller = Caller::resolve(&state, &headers).await?;
    let expense = state
        .workflow
        .attach_receipt(&caller.principal, &ExpenseId(expense_id), upload)
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(Json(expense))
}

async fn submit_expense(
    State(state): State<ApiState>,
    Path(expense_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<ExpenseDetail> {
    let caller = Caller::resolve(&state, &headers).await?;
    let detail = state
        .workflow
        .submit(&caller.principal, &ExpenseId(expense_id))
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(Json(detail))
}

async fn decide_expense(
    State(state): State<ApiState>,
    Path(expense_id): Path<String>,
    headers: HeaderMap,
    Json(decision): Json<Decision>,
) -> ApiResult<ExpenseDetail> {
    let caller = Caller::resolve(&state, &headers).await?;
    let detail = state
        .workflow
        .decide(&caller.principal, &ExpenseId(expense_id), decision)
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(Json(detail))
}

async fn pending_approvals(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Vec<ApprovalQueueItem>> {
    let caller = Caller::resolve(&state, &headers).await?;
    let queue =
        state.workflow.pending_approvals(&caller.principal).await.map_err(|e| caller.fail(e))?;
    Ok(Json(queue))
}

async fn approval_history(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Vec<ApprovalQueueItem>> {
    let caller = Caller::resolve(&state, &headers).await?;
    let history =
        state.workflow.approval_history(&caller.principal).await.map_err(|e| caller.fail(e))?;
    Ok(Json(history))
}

async fn list_rules(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Vec<ApprovalRule>> {
    let caller = Caller::resolve(&state, &headers).await?;
    let rules = state.workflow.list_rules(&caller.principal).await.map_err(|e| caller.fail(e))?;
    Ok(Json(rules))
}

async fn save_rule(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(draft): Json<RuleDraft>,
) -> ApiResult<ApprovalRule> {
    let caller = Caller::resolve(&state, &headers).await?;
    let rule =
        state.workflow.save_rule(&caller.principal, draft).await.map_err(|e| caller.fail(e))?;
    Ok(Json(rule))
}

async fn rule_for_employee(
    State(state): State<ApiState>,
    Path(employee_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<ApprovalRule> {
    let caller = Caller::resolve(&state, &headers).await?;
    let rule = state
        .workflow
        .rule_for(&caller.principal, &EmployeeId(employee_id.clone()))
        .await
        .map_err(|e| caller.fail(e))?
        .ok_or_else(|| {
            caller.fail(ApplicationError::not_found("approval rule for employee", employee_id))
        })?;
    Ok(Json(rule))
}

async fn delete_rule(
    State(state): State<ApiState>,
    Path(rule_id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let caller = Caller::resolve(&state, &headers).await?;
    state
        .workflow
        .delete_rule(&caller.principal, &ApprovalRuleId(rule_id))
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn organization_summary(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<OrganizationSummary> {
    let caller = Caller::resolve(&state, &headers).await?;
    let summary =
        state.workflow.organization_summary(&caller.principal).await.map_err(|e| caller.fail(e))?;
    Ok(Json(summary))
}
