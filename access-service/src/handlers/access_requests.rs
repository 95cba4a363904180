use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use service_core::{error::AppError, response::ApiResponse};
use uuid::Uuid;

use crate::{
    dtos::access_requests::{CreateAccessRequest, DecisionRequest},
    middleware::AuthPrincipal,
    models::AccessRequestView,
    services::{Actor, NewAccessRequest},
    utils::ValidatedJson,
    AppState,
};

fn listing(views: Vec<AccessRequestView>) -> ApiResponse<Vec<AccessRequestView>> {
    if views.is_empty() {
        ApiResponse::ok(views, "No requests found.")
    } else {
        ApiResponse::ok(views, "Requests retrieved")
    }
}

pub async fn create(
    State(state): State<AppState>,
    principal: AuthPrincipal,
    ValidatedJson(req): ValidatedJson<CreateAccessRequest>,
) -> Result<impl IntoResponse, AppError> {
    let view = state
        .ledger
        .create(
            principal.id,
            NewAccessRequest {
                owner_email: req.owner_email,
                resource_name: req.resource_name,
                purpose: req.purpose,
                duration_hours: req.duration_hours.unwrap_or(0),
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        ApiResponse::ok(view, "Access request submitted"),
    ))
}

pub async fn list_sent(
    State(state): State<AppState>,
    principal: AuthPrincipal,
) -> Result<impl IntoResponse, AppError> {
    let views = state.ledger.list_by_requester(principal.id).await?;
    Ok(listing(views))
}

pub async fn list_received(
    State(state): State<AppState>,
    principal: AuthPrincipal,
) -> Result<impl IntoResponse, AppError> {
    let views = state.ledger.list_by_owner(&principal.email).await?;
    Ok(listing(views))
}

pub async fn decide(
    State(state): State<AppState>,
    principal: AuthPrincipal,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<DecisionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let view = state
        .ledger
        .decide(
            Actor::Owner {
                email: principal.email,
            },
            id,
            &req.decision,
        )
        .await?;
    let message = format!("Request {}", view.status.as_str());
    Ok(ApiResponse::ok(view, message))
}

pub async fn admin_decide(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<DecisionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let view = state
        .ledger
        .decide(Actor::Administrator, id, &req.decision)
        .await?;
    tracing::info!(request_id = %id, "Access request decided by administrator");
    let message = format!("Request {}", view.status.as_str());
    Ok(ApiResponse::ok(view, message))
}

pub async fn grant(
    State(state): State<AppState>,
    principal: AuthPrincipal,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let grant = state.ledger.resolve_grant(principal.id, id).await?;
    Ok(ApiResponse::ok(grant, "Access granted"))
}
