#![allow(dead_code)]
//! Shared harness for access-service integration tests.
//!
//! The router runs against the in-memory stores, a manual clock and a
//! recording notifier, so no PostgreSQL or SMTP server is needed.

use std::sync::Arc;

use access_service::{
    build_router,
    config::{
        AccessConfig, CodeConfig, DatabaseConfig, Environment, GoogleConfig, JwtConfig,
        LedgerConfig, RateLimitConfig, SecurityConfig, SmtpConfig,
    },
    models::PrincipalKind,
    services::{
        metrics::init_metrics, InMemoryAccessRequestStore, InMemoryPrincipalStore,
        InMemoryResourceLocator, PrincipalStore, RecordingNotifier, StaticIdentityVerifier,
    },
    utils::{ManualClock, SeededCodeGenerator},
    AppState, Backends,
};
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_ADMIN_API_KEY: &str = "test-admin-key";
pub const TEST_PASSWORD: &str = "correct-horse-battery";

pub fn test_config() -> AccessConfig {
    AccessConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "access-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            max_connections: 1,
            min_connections: 1,
        },
        jwt: JwtConfig {
            secret: "integration-test-secret-with-32-bytes!!".to_string(),
            issuer: "access-service".to_string(),
            audience: "access-service-clients".to_string(),
            access_token_expiry_minutes: 60,
            refresh_token_expiry_days: 7,
        },
        codes: CodeConfig {
            verification_window_minutes: 15,
            password_reset_window_minutes: 15,
        },
        ledger: LedgerConfig {
            default_access_duration_hours: 24,
            notify_timeout_seconds: 2,
        },
        smtp: SmtpConfig {
            host: "localhost".to_string(),
            port: 2525,
            user: String::new(),
            password: String::new(),
            from: "no-reply@localhost".to_string(),
        },
        google: GoogleConfig {
            client_id: String::new(),
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            admin_api_key: TEST_ADMIN_API_KEY.to_string(),
        },
        rate_limit: RateLimitConfig {
            login_attempts: 100,
            login_window_seconds: 60,
            register_attempts: 100,
            register_window_seconds: 60,
            password_reset_attempts: 100,
            password_reset_window_seconds: 60,
        },
    }
}

/// Tokens returned by a successful login.
#[derive(Debug, Clone)]
pub struct Session {
    pub principal_id: Uuid,
    pub email: String,
    pub access_token: String,
    pub refresh_token: String,
}

impl Session {
    fn from_body(email: &str, body: &Value) -> Self {
        let data = &body["data"];
        Self {
            principal_id: data["principal_id"]
                .as_str()
                .and_then(|s| s.parse().ok())
                .expect("principal_id in token response"),
            email: email.to_string(),
            access_token: data["access_token"]
                .as_str()
                .expect("access_token in token response")
                .to_string(),
            refresh_token: data["refresh_token"]
                .as_str()
                .expect("refresh_token in token response")
                .to_string(),
        }
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub principals: Arc<InMemoryPrincipalStore>,
    pub requests: Arc<InMemoryAccessRequestStore>,
    pub resources: Arc<InMemoryResourceLocator>,
    pub notifications: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::build(StaticIdentityVerifier::new(), RecordingNotifier::new())
    }

    pub fn with_identity(identity: StaticIdentityVerifier) -> Self {
        Self::build(identity, RecordingNotifier::new())
    }

    /// Every notification delivery fails.
    pub fn with_failing_notifications() -> Self {
        Self::build(StaticIdentityVerifier::new(), RecordingNotifier::failing())
    }

    fn build(identity: StaticIdentityVerifier, notifications: RecordingNotifier) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("warn")
            .with_test_writer()
            .try_init();
        init_metrics();

        let principals = Arc::new(InMemoryPrincipalStore::new());
        let requests = Arc::new(InMemoryAccessRequestStore::new());
        let resources = Arc::new(InMemoryResourceLocator::new());
        let notifications = Arc::new(notifications);
        let clock = Arc::new(ManualClock::default());

        let state = AppState::new(
            test_config(),
            Backends {
                principals: principals.clone(),
                requests: requests.clone(),
                locator: resources.clone(),
                notifications: notifications.clone(),
                identity: Arc::new(identity),
                codes: Arc::new(SeededCodeGenerator::new(7)),
                clock: clock.clone(),
                db: None,
            },
        );

        Self {
            router: build_router(state.clone()),
            state,
            principals,
            requests,
            resources,
            notifications,
            clock,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    /// Send a JSON request and decode the JSON reply.
    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("valid request");

        let response = self.send(request).await;
        read_json(response).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, None, Some(body)).await
    }

    pub async fn post_auth(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, Some(token), Some(body)).await
    }

    pub async fn get_auth(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.call(Method::GET, uri, Some(token), None).await
    }

    pub async fn verification_code(&self, kind: PrincipalKind, email: &str) -> String {
        self.principals
            .find_by_email(kind, email)
            .await
            .expect("store read")
            .and_then(|p| p.verification)
            .expect("verification code issued")
            .code
    }

    pub async fn reset_code(&self, kind: PrincipalKind, email: &str) -> String {
        self.principals
            .find_by_email(kind, email)
            .await
            .expect("store read")
            .and_then(|p| p.password_reset)
            .expect("reset code issued")
            .code
    }

    pub async fn register_individual(&self, email: &str, full_name: &str) -> (StatusCode, Value) {
        self.post(
            "/individuals/register",
            json!({
                "email": email,
                "password": TEST_PASSWORD,
                "confirm_password": TEST_PASSWORD,
                "full_name": full_name,
            }),
        )
        .await
    }

    pub async fn register_organization(&self, email: &str, company: &str) -> (StatusCode, Value) {
        self.post(
            "/organizations/register",
            json!({
                "email": email,
                "password": TEST_PASSWORD,
                "confirm_password": TEST_PASSWORD,
                "company_name": company,
                "contact_name": "Contact Person",
            }),
        )
        .await
    }

    pub async fn verify(&self, kind: PrincipalKind, email: &str) -> (StatusCode, Value) {
        let code = self.verification_code(kind, email).await;
        self.post(
            &format!("{}/verify-email", prefix(kind)),
            json!({ "email": email, "code": code }),
        )
        .await
    }

    pub async fn login(&self, kind: PrincipalKind, email: &str, password: &str) -> (StatusCode, Value) {
        self.post(
            &format!("{}/login", prefix(kind)),
            json!({ "email": email, "password": password }),
        )
        .await
    }

    pub async fn individual_session(&self, email: &str, full_name: &str) -> Session {
        let (status, _) = self.register_individual(email, full_name).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = self.verify(PrincipalKind::Individual, email).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = self.login(PrincipalKind::Individual, email, TEST_PASSWORD).await;
        assert_eq!(status, StatusCode::OK, "login failed: {}", body);
        Session::from_body(email, &body)
    }

    pub async fn organization_session(&self, email: &str, company: &str) -> Session {
        let (status, _) = self.register_organization(email, company).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = self.verify(PrincipalKind::Organization, email).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = self
            .login(PrincipalKind::Organization, email, TEST_PASSWORD)
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {}", body);
        Session::from_body(email, &body)
    }

    /// Organization `org` asks `owner` for `resource`; returns the request id.
    pub async fn request_access(
        &self,
        org: &Session,
        owner_email: &str,
        resource: &str,
        duration_hours: i64,
    ) -> Uuid {
        let (status, body) = self
            .post_auth(
                "/access-requests",
                &org.access_token,
                json!({
                    "owner_email": owner_email,
                    "resource_name": resource,
                    "purpose": "KYC",
                    "duration_hours": duration_hours,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create failed: {}", body);
        body["data"]["id"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .expect("request id")
    }

    pub async fn decide(&self, owner: &Session, id: Uuid, decision: &str) -> (StatusCode, Value) {
        self.post_auth(
            &format!("/access-requests/{}/decision", id),
            &owner.access_token,
            json!({ "decision": decision }),
        )
        .await
    }
}

pub fn prefix(kind: PrincipalKind) -> &'static str {
    match kind {
        PrincipalKind::Individual => "/individuals",
        PrincipalKind::Organization => "/organizations",
    }
}

pub fn session_from(email: &str, body: &Value) -> Session {
    Session::from_body(email, body)
}

pub async fn read_json(response: Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("readable body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, body)
}
