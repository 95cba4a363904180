//! Access request lifecycle: create, list, decide, resolve the grant.

mod common;

use axum::http::StatusCode;
use chrono::Duration;
use common::{Session, TestApp, TEST_ADMIN_API_KEY};
use serde_json::json;

struct Parties {
    app: TestApp,
    owner: Session,
    org: Session,
}

async fn parties() -> Parties {
    let app = TestApp::new();
    let owner = app.individual_session("alice@x.com", "Alice Doe").await;
    let org = app.organization_session("ops@acme.com", "Acme Corp").await;
    app.resources.put(
        owner.principal_id,
        "passport.pdf",
        "https://files.example.com/alice/passport.pdf",
    );
    Parties { app, owner, org }
}

#[tokio::test]
async fn approved_request_exposes_the_location_until_it_expires() {
    let Parties { app, owner, org } = parties().await;

    let id = app.request_access(&org, "alice@x.com", "passport.pdf", 48).await;

    let owner_mail = app.notifications.sent_to("alice@x.com");
    let last = owner_mail.last().expect("owner notified");
    assert!(last.plain_body.contains("Acme Corp"));
    assert!(last.plain_body.contains("passport.pdf"));

    let (status, body) = app.decide(&owner, id, "Approved").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Request approved");
    assert_eq!(body["data"]["status"], "approved");
    assert_eq!(body["data"]["grant_active"], true);
    assert!(body["data"]["expires_at"].is_string());

    let org_mail = app.notifications.sent_to("ops@acme.com");
    assert!(org_mail
        .last()
        .is_some_and(|n| n.subject.contains("approved")));

    let (status, body) = app
        .get_auth(&format!("/access-requests/{}/grant", id), &org.access_token)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["data"]["resource_location"],
        "https://files.example.com/alice/passport.pdf"
    );

    let (_, body) = app
        .get_auth("/access-requests/sent", &org.access_token)
        .await;
    assert_eq!(
        body["data"][0]["resource_location"],
        "https://files.example.com/alice/passport.pdf"
    );

    app.clock.advance(Duration::hours(48) + Duration::seconds(1));

    let (status, body) = app
        .get_auth(&format!("/access-requests/{}/grant", id), &org.access_token)
        .await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["error"], "grant_expired");

    let (_, body) = app
        .get_auth("/access-requests/sent", &org.access_token)
        .await;
    assert_eq!(body["data"][0]["status"], "approved");
    assert_eq!(body["data"][0]["grant_active"], false);
    assert!(body["data"][0].get("resource_location").is_none());
}

#[tokio::test]
async fn declined_request_never_exposes_a_location() {
    let Parties { app, owner, org } = parties().await;
    let id = app.request_access(&org, "alice@x.com", "passport.pdf", 24).await;

    let (status, body) = app.decide(&owner, id, "declined").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Request declined");
    assert!(body["data"].get("resource_location").is_none());
    assert!(body["data"].get("expires_at").is_none());

    let (status, body) = app
        .get_auth(&format!("/access-requests/{}/grant", id), &org.access_token)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");
}

#[tokio::test]
async fn pending_request_grant_is_forbidden() {
    let Parties { app, org, .. } = parties().await;
    let id = app.request_access(&org, "alice@x.com", "passport.pdf", 24).await;

    let (_, body) = app
        .get_auth("/access-requests/sent", &org.access_token)
        .await;
    assert_eq!(body["data"][0]["status"], "pending");
    assert_eq!(body["data"][0]["requester_name"], "Acme Corp");

    let (status, _) = app
        .get_auth(&format!("/access-requests/{}/grant", id), &org.access_token)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn a_decided_request_cannot_be_decided_again() {
    let Parties { app, owner, org } = parties().await;
    let id = app.request_access(&org, "alice@x.com", "passport.pdf", 24).await;

    let (status, _) = app.decide(&owner, id, "Declined").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.decide(&owner, id, "Approved").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "already_processed");

    // Status is checked before the decision literal.
    let (status, body) = app.decide(&owner, id, "maybe").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "already_processed");
}

#[tokio::test]
async fn invalid_decision_leaves_the_request_pending() {
    let Parties { app, owner, org } = parties().await;
    let id = app.request_access(&org, "alice@x.com", "passport.pdf", 24).await;

    let (status, body) = app.decide(&owner, id, "maybe").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_input");

    let (_, body) = app
        .get_auth("/access-requests/received", &owner.access_token)
        .await;
    assert_eq!(body["data"][0]["status"], "pending");
}

#[tokio::test]
async fn another_individual_cannot_decide_the_request() {
    let Parties { app, org, .. } = parties().await;
    let intruder = app.individual_session("mallory@x.com", "Mallory").await;
    let id = app.request_access(&org, "alice@x.com", "passport.pdf", 24).await;

    let (status, body) = app.decide(&intruder, id, "Approved").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn create_validates_owner_then_resource() {
    let Parties { app, org, .. } = parties().await;

    let (status, body) = app
        .post_auth(
            "/access-requests",
            &org.access_token,
            json!({ "owner_email": "ghost@x.com", "resource_name": "passport.pdf" }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, body) = app
        .post_auth(
            "/access-requests",
            &org.access_token,
            json!({ "owner_email": "alice@x.com", "resource_name": "" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_input");

    let (status, body) = app
        .post_auth(
            "/access-requests",
            &org.access_token,
            json!({ "owner_email": "alice@x.com", "resource_name": "tax-return.pdf" }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "resource_not_found");
}

#[tokio::test]
async fn missing_duration_uses_the_default() {
    let Parties { app, org, .. } = parties().await;

    let (status, body) = app
        .post_auth(
            "/access-requests",
            &org.access_token,
            json!({ "owner_email": "alice@x.com", "resource_name": "passport.pdf" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["duration_hours"], 24);
    assert_eq!(body["data"]["status"], "pending");
}

#[tokio::test]
async fn non_positive_duration_falls_back_to_the_default() {
    let Parties { app, org, .. } = parties().await;

    for duration in [0, -5] {
        let (status, body) = app
            .post_auth(
                "/access-requests",
                &org.access_token,
                json!({
                    "owner_email": "alice@x.com",
                    "resource_name": "passport.pdf",
                    "duration_hours": duration,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "duration {}: {}", duration, body);
        assert_eq!(body["data"]["duration_hours"], 24);
    }
}

#[tokio::test]
async fn oversized_duration_is_rejected_and_nothing_is_stored() {
    let Parties { app, owner, org } = parties().await;

    let (status, body) = app
        .post_auth(
            "/access-requests",
            &org.access_token,
            json!({
                "owner_email": "alice@x.com",
                "resource_name": "passport.pdf",
                "duration_hours": 10_000_000_000_i64,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_input");

    let (_, body) = app
        .get_auth("/access-requests/received", &owner.access_token)
        .await;
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn a_year_long_grant_can_be_approved() {
    let Parties { app, owner, org } = parties().await;
    let id = app
        .request_access(&org, "alice@x.com", "passport.pdf", 24 * 365)
        .await;

    let (status, body) = app.decide(&owner, id, "Approved").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["grant_active"], true);
}

#[tokio::test]
async fn approval_fails_when_the_resource_was_removed() {
    let Parties { app, owner, org } = parties().await;
    let id = app.request_access(&org, "alice@x.com", "passport.pdf", 24).await;

    app.resources.remove(owner.principal_id, "passport.pdf");

    let (status, body) = app.decide(&owner, id, "Approved").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "resource_not_found");

    // Declining needs no resource.
    let (status, _) = app.decide(&owner, id, "Declined").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn listings_are_newest_first_and_scoped_to_the_caller() {
    let Parties { app, owner, org } = parties().await;
    let other_org = app.organization_session("hr@globex.com", "Globex").await;
    app.resources
        .put(owner.principal_id, "payslip.pdf", "https://files.example.com/payslip");

    let first = app.request_access(&org, "alice@x.com", "passport.pdf", 24).await;
    app.clock.advance(Duration::minutes(1));
    let second = app
        .request_access(&other_org, "alice@x.com", "payslip.pdf", 24)
        .await;

    let (status, body) = app
        .get_auth("/access-requests/received", &owner.access_token)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Requests retrieved");
    let received = body["data"].as_array().unwrap();
    assert_eq!(received.len(), 2);
    assert_eq!(received[0]["id"], second.to_string());
    assert_eq!(received[0]["requester_name"], "Globex");
    assert_eq!(received[1]["id"], first.to_string());

    let (_, body) = app
        .get_auth("/access-requests/sent", &org.access_token)
        .await;
    let sent = body["data"].as_array().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["id"], first.to_string());
}

#[tokio::test]
async fn empty_listing_is_a_success_with_a_message() {
    let Parties { app, owner, org } = parties().await;

    let (status, body) = app
        .get_auth("/access-requests/received", &owner.access_token)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "No requests found.");
    assert_eq!(body["data"], json!([]));

    let (status, body) = app
        .get_auth("/access-requests/sent", &org.access_token)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "No requests found.");
}

#[tokio::test]
async fn administrator_can_decide_with_the_api_key() {
    let Parties { app, org, .. } = parties().await;
    let id = app.request_access(&org, "alice@x.com", "passport.pdf", 24).await;
    let uri = format!("/admin/access-requests/{}/decision", id);

    let request = axum::http::Request::builder()
        .method("POST")
        .uri(&uri)
        .header("content-type", "application/json")
        .header("x-admin-api-key", "wrong-key")
        .body(axum::body::Body::from(json!({ "decision": "Approved" }).to_string()))
        .unwrap();
    let (status, body) = common::read_json(app.send(request).await).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let request = axum::http::Request::builder()
        .method("POST")
        .uri(&uri)
        .header("content-type", "application/json")
        .header("x-admin-api-key", TEST_ADMIN_API_KEY)
        .body(axum::body::Body::from(json!({ "decision": "Approved" }).to_string()))
        .unwrap();
    let (status, body) = common::read_json(app.send(request).await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "approved");
}

#[tokio::test]
async fn another_organization_cannot_resolve_the_grant() {
    let Parties { app, owner, org } = parties().await;
    let other_org = app.organization_session("hr@globex.com", "Globex").await;
    let id = app.request_access(&org, "alice@x.com", "passport.pdf", 24).await;
    app.decide(&owner, id, "Approved").await;

    let (status, body) = app
        .get_auth(
            &format!("/access-requests/{}/grant", id),
            &other_org.access_token,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}
