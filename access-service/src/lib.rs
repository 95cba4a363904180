pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post, MethodRouter},
    Extension, Router,
};
use service_core::middleware::{
    metrics::metrics_middleware,
    rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware, IpRateLimiter},
    security_headers::security_headers_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use sqlx::PgPool;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::config::AccessConfig;
use crate::models::PrincipalKind;
use crate::services::{
    AccessLedger, AccessRequestStore, CredentialService, IdentityVerifier, JwtService,
    NotificationSink, Notifier, PrincipalStore, ResourceLocator,
};
use crate::utils::{Clock, CodeGenerator};

/// Collaborators the core runs against. Production wires Postgres, SMTP and
/// Google; tests wire the in-memory versions.
pub struct Backends {
    pub principals: Arc<dyn PrincipalStore>,
    pub requests: Arc<dyn AccessRequestStore>,
    pub locator: Arc<dyn ResourceLocator>,
    pub notifications: Arc<dyn NotificationSink>,
    pub identity: Arc<dyn IdentityVerifier>,
    pub codes: Arc<dyn CodeGenerator>,
    pub clock: Arc<dyn Clock>,
    pub db: Option<PgPool>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AccessConfig>,
    pub db: Option<PgPool>,
    pub jwt: JwtService,
    pub credentials: CredentialService,
    pub ledger: AccessLedger,
    pub login_rate_limiter: IpRateLimiter,
    pub register_rate_limiter: IpRateLimiter,
    pub password_reset_rate_limiter: IpRateLimiter,
}

impl AppState {
    pub fn new(config: AccessConfig, backends: Backends) -> Self {
        let jwt = JwtService::new(config.jwt.clone());
        let notifier = Notifier::new(
            backends.notifications,
            Duration::from_secs(config.ledger.notify_timeout_seconds),
        );

        let credentials = CredentialService::new(
            backends.principals.clone(),
            jwt.clone(),
            backends.codes,
            backends.clock.clone(),
            notifier.clone(),
            backends.identity,
            config.codes.clone(),
        );

        let ledger = AccessLedger::new(
            backends.requests,
            backends.principals,
            backends.locator,
            backends.clock,
            notifier,
            config.ledger.default_access_duration_hours,
        );

        let limits = &config.rate_limit;
        let login_rate_limiter =
            create_ip_rate_limiter(limits.login_attempts, limits.login_window_seconds);
        let register_rate_limiter =
            create_ip_rate_limiter(limits.register_attempts, limits.register_window_seconds);
        let password_reset_rate_limiter = create_ip_rate_limiter(
            limits.password_reset_attempts,
            limits.password_reset_window_seconds,
        );

        Self {
            config: Arc::new(config),
            db: backends.db,
            jwt,
            credentials,
            ledger,
            login_rate_limiter,
            register_rate_limiter,
            password_reset_rate_limiter,
        }
    }
}

/// The credential endpoints for one principal kind, mounted under its prefix.
fn credential_routes(state: &AppState, register: MethodRouter<AppState>) -> Router<AppState> {
    let login_route = Router::new()
        .route("/login", post(handlers::credentials::login))
        .layer(from_fn_with_state(
            state.login_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let register_route = Router::new()
        .route("/register", register)
        .layer(from_fn_with_state(
            state.register_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let forgot_route = Router::new()
        .route("/forgot-password", post(handlers::credentials::forgot_password))
        .layer(from_fn_with_state(
            state.password_reset_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    Router::new()
        .route("/verify-email", post(handlers::credentials::verify_email))
        .route("/resend-code", post(handlers::credentials::resend_code))
        .route("/reset-password", post(handlers::credentials::reset_password))
        .route("/refresh-token", post(handlers::credentials::refresh_token))
        .merge(login_route)
        .merge(register_route)
        .merge(forgot_route)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins.iter().filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(origin = %o, error = %e, "Ignoring invalid CORS origin");
                None
            }
        }))
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(middleware::admin::ADMIN_API_KEY_HEADER),
            HeaderName::from_static(REQUEST_ID_HEADER),
        ])
}

pub fn build_router(state: AppState) -> Router {
    let individuals = credential_routes(
        &state,
        post(handlers::credentials::register_individual),
    )
    .route("/google", post(handlers::credentials::google_sign_in))
    .layer(Extension(PrincipalKind::Individual));

    let organizations = credential_routes(
        &state,
        post(handlers::credentials::register_organization),
    )
    .layer(Extension(PrincipalKind::Organization));

    let organization_routes = Router::new()
        .route("/access-requests", post(handlers::access_requests::create))
        .route("/access-requests/sent", get(handlers::access_requests::list_sent))
        .route("/access-requests/:id/grant", get(handlers::access_requests::grant))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::organization_auth_middleware,
        ));

    let individual_routes = Router::new()
        .route(
            "/access-requests/received",
            get(handlers::access_requests::list_received),
        )
        .route(
            "/access-requests/:id/decision",
            post(handlers::access_requests::decide),
        )
        .layer(from_fn_with_state(
            state.clone(),
            middleware::individual_auth_middleware,
        ));

    let admin_routes = Router::new()
        .route(
            "/admin/access-requests/:id/decision",
            post(handlers::access_requests::admin_decide),
        )
        .layer(from_fn_with_state(
            state.clone(),
            middleware::admin_auth_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .nest("/individuals", individuals)
        .nest("/organizations", organizations)
        .merge(organization_routes)
        .merge(individual_routes)
        .merge(admin_routes)
        .with_state(state.clone())
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors_layer(&state.config.security.allowed_origins))
}
