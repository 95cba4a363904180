use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, StatusCode},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::PrincipalKind;
use crate::services::{AccessTokenClaims, TokenRejection};
use crate::AppState;

fn invalid_token() -> AppError {
    AppError::domain(
        StatusCode::UNAUTHORIZED,
        "invalid_or_expired_token",
        "Invalid or expired token",
    )
}

async fn require_principal(
    state: AppState,
    kind: PrincipalKind,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(invalid_token)?;

    let claims = state
        .jwt
        .validate_access_token_for(token, kind)
        .map_err(|rejection| match rejection {
            TokenRejection::Invalid(e) => {
                tracing::debug!(error = %e, "Rejected access token");
                invalid_token()
            }
            TokenRejection::WrongKind(actual) => {
                tracing::warn!(expected = %kind, actual = %actual, "Token used on the wrong principal kind");
                AppError::domain(
                    StatusCode::FORBIDDEN,
                    "forbidden",
                    format!("This endpoint requires an {} account", kind),
                )
            }
        })?;

    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

/// Routes only an individual's token may reach.
pub async fn individual_auth_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    require_principal(state, PrincipalKind::Individual, req, next).await
}

/// Routes only an organization's token may reach.
pub async fn organization_auth_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    require_principal(state, PrincipalKind::Organization, req, next).await
}

/// The authenticated caller, read from claims the middleware stored.
#[derive(Debug, Clone)]
pub struct AuthPrincipal {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub kind: PrincipalKind,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthPrincipal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let claims = parts.extensions.get::<AccessTokenClaims>().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "Auth claims missing from request extensions"
            ))
        })?;

        let id = Uuid::parse_str(&claims.sub).map_err(|_| invalid_token())?;

        Ok(AuthPrincipal {
            id,
            email: claims.email.clone(),
            name: claims.name.clone(),
            kind: claims.kind,
        })
    }
}
