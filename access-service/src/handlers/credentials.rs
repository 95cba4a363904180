//! Credential endpoints. One handler set serves both principal kinds; the
//! router supplies the kind as an `Extension`.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Extension};
use service_core::{error::AppError, response::ApiResponse};

use crate::{
    dtos::credentials::{
        EmailRequest, ExternalSignInRequest, LoginRequest, RefreshTokenRequest,
        RegisterIndividualRequest, RegisterOrganizationRequest, RegisterResponse,
        ResetPasswordRequest, VerifyEmailRequest,
    },
    models::{PrincipalKind, Profile},
    services::Registration,
    utils::{Password, ValidatedJson},
    AppState,
};

async fn register(state: &AppState, registration: Registration) -> Result<impl IntoResponse, AppError> {
    let principal_id = state.credentials.register(registration).await?;

    Ok((
        StatusCode::CREATED,
        ApiResponse::ok(
            RegisterResponse { principal_id },
            "Registration successful. Check your email for the verification code.",
        ),
    ))
}

pub async fn register_individual(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RegisterIndividualRequest>,
) -> Result<impl IntoResponse, AppError> {
    register(
        &state,
        Registration {
            email: req.email,
            password: Password::new(req.password),
            confirm_password: Password::new(req.confirm_password),
            profile: Profile::Individual {
                full_name: req.full_name,
            },
        },
    )
    .await
}

pub async fn register_organization(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RegisterOrganizationRequest>,
) -> Result<impl IntoResponse, AppError> {
    register(
        &state,
        Registration {
            email: req.email,
            password: Password::new(req.password),
            confirm_password: Password::new(req.confirm_password),
            profile: Profile::Organization {
                company_name: req.company_name,
                contact_name: req.contact_name,
            },
        },
    )
    .await
}

pub async fn verify_email(
    State(state): State<AppState>,
    Extension(kind): Extension<PrincipalKind>,
    ValidatedJson(req): ValidatedJson<VerifyEmailRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .credentials
        .verify_email(kind, &req.email, &req.code)
        .await?;
    Ok(ApiResponse::message("Email verified successfully"))
}

pub async fn resend_code(
    State(state): State<AppState>,
    Extension(kind): Extension<PrincipalKind>,
    ValidatedJson(req): ValidatedJson<EmailRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .credentials
        .resend_verification_code(kind, &req.email)
        .await?;
    Ok(ApiResponse::message("A new verification code has been sent"))
}

pub async fn login(
    State(state): State<AppState>,
    Extension(kind): Extension<PrincipalKind>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tokens = state
        .credentials
        .login(kind, &req.email, &Password::new(req.password))
        .await?;
    Ok(ApiResponse::ok(tokens, "Login successful"))
}

pub async fn forgot_password(
    State(state): State<AppState>,
    Extension(kind): Extension<PrincipalKind>,
    ValidatedJson(req): ValidatedJson<EmailRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.credentials.forgot_password(kind, &req.email).await?;
    Ok(ApiResponse::message(
        "If an account exists for that email, a reset code has been sent",
    ))
}

pub async fn reset_password(
    State(state): State<AppState>,
    Extension(kind): Extension<PrincipalKind>,
    ValidatedJson(req): ValidatedJson<ResetPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .credentials
        .reset_password(kind, &req.email, &req.code, &Password::new(req.new_password))
        .await?;
    Ok(ApiResponse::message("Password has been reset"))
}

pub async fn refresh_token(
    State(state): State<AppState>,
    Extension(kind): Extension<PrincipalKind>,
    ValidatedJson(req): ValidatedJson<RefreshTokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tokens = state
        .credentials
        .refresh_token(kind, &req.email, &req.refresh_token)
        .await?;
    Ok(ApiResponse::ok(tokens, "Token refreshed"))
}

pub async fn google_sign_in(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ExternalSignInRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tokens = state.credentials.sign_in_external(&req.id_token).await?;
    Ok(ApiResponse::ok(tokens, "Login successful"))
}
