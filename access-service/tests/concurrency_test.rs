//! Racing writers on the same request, code or account.

mod common;

use access_service::{models::PrincipalKind, services::Actor, utils::Password};
use axum::http::StatusCode;
use common::TestApp;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_decisions_commit_exactly_once() {
    let app = TestApp::new();
    let owner = app.individual_session("alice@x.com", "Alice").await;
    let org = app.organization_session("ops@acme.com", "Acme").await;
    app.resources
        .put(owner.principal_id, "passport.pdf", "https://files.example.com/p");
    let id = app.request_access(&org, "alice@x.com", "passport.pdf", 24).await;

    let mut handles = Vec::new();
    for i in 0..10 {
        let ledger = app.state.ledger.clone();
        let decision = if i % 2 == 0 { "Approved" } else { "Declined" };
        let actor = if i % 3 == 0 {
            Actor::Administrator
        } else {
            Actor::Owner {
                email: "alice@x.com".to_string(),
            }
        };
        handles.push(tokio::spawn(async move {
            ledger.decide(actor, id, decision).await
        }));
    }

    let mut committed = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(view) => committed.push(view),
            Err(e) => assert_eq!(e.kind(), "already_processed"),
        }
    }
    assert_eq!(committed.len(), 1);

    // The stored outcome is the one the winner reported.
    let (status, body) = app
        .get_auth("/access-requests/received", &owner.access_token)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["status"], committed[0].status.as_str());

    // Only the winning decision reaches the organization.
    let decided_mail = app
        .notifications
        .sent_to("ops@acme.com")
        .into_iter()
        .filter(|n| n.subject.starts_with("Your request for"))
        .count();
    assert_eq!(decided_mail, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_registrations_of_one_email_create_one_account() {
    let app = TestApp::new();

    let mut handles = Vec::new();
    for _ in 0..6 {
        let router = app.router.clone();
        handles.push(tokio::spawn(async move {
            use tower::ServiceExt;
            let request = axum::http::Request::builder()
                .method("POST")
                .uri("/individuals/register")
                .header("content-type", "application/json")
                .body(axum::body::Body::from(
                    serde_json::json!({
                        "email": "race@x.com",
                        "password": common::TEST_PASSWORD,
                        "confirm_password": common::TEST_PASSWORD,
                        "full_name": "Racer",
                    })
                    .to_string(),
                ))
                .unwrap();
            router.oneshot(request).await.unwrap().status()
        }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            StatusCode::CREATED => created += 1,
            status => assert_eq!(status, StatusCode::CONFLICT),
        }
    }
    assert_eq!(created, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_reset_code_changes_the_password_once() {
    let app = TestApp::new();
    app.individual_session("kate@x.com", "Kate").await;
    app.post(
        "/individuals/forgot-password",
        serde_json::json!({ "email": "kate@x.com" }),
    )
    .await;
    let code = app.reset_code(PrincipalKind::Individual, "kate@x.com").await;

    let mut handles = Vec::new();
    for i in 0..4 {
        let credentials = app.state.credentials.clone();
        let code = code.clone();
        let password = format!("replacement-password-{}", i);
        handles.push(tokio::spawn(async move {
            let outcome = credentials
                .reset_password(
                    PrincipalKind::Individual,
                    "kate@x.com",
                    &code,
                    &Password::new(password.clone()),
                )
                .await;
            (password, outcome)
        }));
    }

    let mut winners = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            (password, Ok(())) => winners.push(password),
            (_, Err(e)) => assert_eq!(e.kind(), "invalid_or_expired_token"),
        }
    }
    assert_eq!(winners.len(), 1);

    // The stored password is the winner's.
    let (status, _) = app
        .login(PrincipalKind::Individual, "kate@x.com", &winners[0])
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_verification_code_is_accepted_once() {
    let app = TestApp::new();
    app.register_individual("liam@x.com", "Liam").await;
    let code = app
        .verification_code(PrincipalKind::Individual, "liam@x.com")
        .await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let credentials = app.state.credentials.clone();
        let code = code.clone();
        handles.push(tokio::spawn(async move {
            credentials
                .verify_email(PrincipalKind::Individual, "liam@x.com", &code)
                .await
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => accepted += 1,
            Err(e) => assert!(
                matches!(e.kind(), "invalid_code" | "already_verified"),
                "unexpected error: {}",
                e.kind()
            ),
        }
    }
    assert_eq!(accepted, 1);
}
