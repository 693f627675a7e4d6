// tests/api_test.rs — Integration test: REST routes, bearer auth and error mapping

mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{harness, Harness, PASSWORD};
use counseldesk::api::build_router;

async fn send(app: &Router, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let req = match body {
        Some(body) => req
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn login(app: &Router, email: &str, password: &str) -> String {
    let (status, body) = send(
        app,
        Method::POST,
        "/api/v1/auth/login",
        None,
        Some(json!({"email": email, "password": password})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["access_token"].as_str().unwrap().to_string()
}

async fn setup() -> (Harness, Router) {
    let h = harness().await;
    let app = build_router(h.ctx.clone());
    (h, app)
}

#[tokio::test]
async fn test_health_is_public() {
    let (_h, app) = setup().await;
    let (status, body) = send(&app, Method::GET, "/api/v1/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_missing_or_bad_token_is_401() {
    let (_h, app) = setup().await;
    let (status, body) = send(&app, Method::GET, "/api/v1/auth/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = send(&app, Method::GET, "/api/v1/sessions", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/v1/auth/login",
        None,
        Some(json!({"email": "counselor@test.local", "password": "Wrong-pass-1"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login_me_and_refresh() {
    let (h, app) = setup().await;
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/auth/login",
        None,
        Some(json!({"email": "counselor@test.local", "password": PASSWORD})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_type"], "bearer");
    assert_eq!(body["user"]["role"], "counselor");
    assert!(body["user"].get("password_hash").is_none());
    let access = body["access_token"].as_str().unwrap().to_string();
    let refresh = body["refresh_token"].as_str().unwrap().to_string();

    let (status, me) = send(&app, Method::GET, "/api/v1/auth/me", Some(&access), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["id"], h.counselor.user_id.as_str());
    assert_eq!(me["email"], "counselor@test.local");

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/auth/refresh",
        None,
        Some(json!({"refresh_token": refresh})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["access_token"].is_string());

    // an access token is not a refresh token
    let (status, _) = send(
        &app,
        Method::POST,
        "/api/v1/auth/refresh",
        None,
        Some(json!({"refresh_token": access})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_password_reset_flow() {
    let (_h, app) = setup().await;
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/auth/password-reset-request",
        None,
        Some(json!({"email": "colleague@test.local"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let token = body["reset_token"].as_str().unwrap().to_string();

    // unknown addresses look the same, minus the token
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/auth/password-reset-request",
        None,
        Some(json!({"email": "nobody@test.local"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body.get("reset_token").is_none());

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/v1/auth/password-reset-confirm",
        None,
        Some(json!({"token": token, "new_password": "weak"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/v1/auth/password-reset-confirm",
        None,
        Some(json!({"token": token, "new_password": "Fresh-pass-456"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    login(&app, "colleague@test.local", "Fresh-pass-456").await;

    // single use
    let (status, _) = send(
        &app,
        Method::POST,
        "/api/v1/auth/password-reset-confirm",
        None,
        Some(json!({"token": token, "new_password": "Other-pass-789"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_change_password_and_logout() {
    let (_h, app) = setup().await;
    let token = login(&app, "counselor@test.local", PASSWORD).await;

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/v1/auth/change-password",
        Some(&token),
        Some(json!({"current_password": "Wrong-pass-1", "new_password": "Changed-pass-2"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/v1/auth/change-password",
        Some(&token),
        Some(json!({"current_password": PASSWORD, "new_password": "alllowercase1"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/v1/auth/change-password",
        Some(&token),
        Some(json!({"current_password": PASSWORD, "new_password": "Changed-pass-2"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    login(&app, "counselor@test.local", "Changed-pass-2").await;

    let (status, body) = send(&app, Method::POST, "/api/v1/auth/logout", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn test_role_checks_are_403() {
    let (h, app) = setup().await;
    let counselor = login(&app, "counselor@test.local", PASSWORD).await;
    let manager = login(&app, "manager@test.local", PASSWORD).await;
    let admin = login(&app, "admin@test.local", PASSWORD).await;

    let (status, _) = send(&app, Method::GET, "/api/v1/dashboard/operations", Some(&counselor), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(&app, Method::GET, "/api/v1/dashboard/operations", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/v1/clinics",
        Some(&manager),
        Some(json!({"name": "新宿院"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, clinic) = send(
        &app,
        Method::POST,
        "/api/v1/clinics",
        Some(&admin),
        Some(json!({"name": "新宿院"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(clinic["name"], "新宿院");

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/v1/auth/register",
        Some(&counselor),
        Some(json!({
            "email": "new@test.local",
            "name": "New",
            "password": PASSWORD,
            "role": "counselor",
            "clinic_id": h.clinic_id,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, user) = send(
        &app,
        Method::POST,
        "/api/v1/auth/register",
        Some(&manager),
        Some(json!({
            "email": "new@test.local",
            "name": "New",
            "password": PASSWORD,
            "role": "counselor",
            "clinic_id": h.clinic_id,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(user["role"], "counselor");

    let uri = format!("/api/v1/dashboard/counselor/{}", h.colleague.user_id);
    let (status, _) = send(&app, Method::GET, &uri, Some(&counselor), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, board) = send(&app, Method::GET, &uri, Some(&manager), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(board["total_sessions"], 0);
}

#[tokio::test]
async fn test_validation_and_not_found() {
    let (h, app) = setup().await;
    let counselor = login(&app, "counselor@test.local", PASSWORD).await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/recordings",
        Some(&counselor),
        Some(json!({"customer_id": h.customer_id, "content_type": "video/mp4"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("video/mp4"));

    let (status, _) = send(&app, Method::GET, "/api/v1/sessions/does-not-exist", Some(&counselor), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, Method::GET, "/api/v1/analyses/does-not-exist", Some(&counselor), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upload_then_start_transcription_is_202() {
    let (h, app) = setup().await;
    let counselor = login(&app, "counselor@test.local", PASSWORD).await;

    let (status, slot) = send(
        &app,
        Method::POST,
        "/api/v1/recordings",
        Some(&counselor),
        Some(json!({
            "customer_id": h.customer_id,
            "content_type": "audio/webm",
            "file_size": 12,
            "duration_secs": 600.0,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(slot["method"], "PUT");
    let recording_id = slot["recording_id"].as_str().unwrap().to_string();
    h.storage.put(slot["file_path"].as_str().unwrap(), b"webm payload");

    let (status, done) = send(
        &app,
        Method::POST,
        &format!("/api/v1/recordings/{recording_id}/complete"),
        Some(&counselor),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["recording"]["upload_status"], "completed");
    assert_eq!(done["session"]["status"], "recorded");

    let (status, accepted) = send(
        &app,
        Method::POST,
        "/api/v1/transcriptions",
        Some(&counselor),
        Some(json!({"recording_id": recording_id, "language": "ja"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let task_id = accepted["task_id"].as_str().unwrap().to_string();
    assert!(accepted["estimated_completion_at"].is_string());

    let task = common::wait_transcription(&h.ctx, &task_id).await;
    assert_eq!(task.status, counseldesk::domain::TranscriptionStatus::Completed);

    let (status, result) = send(
        &app,
        Method::GET,
        &format!("/api/v1/transcriptions/{task_id}/result"),
        Some(&counselor),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["segments"].as_array().map(Vec::len), Some(2));

    let (status, page) = send(&app, Method::GET, "/api/v1/sessions", Some(&counselor), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 1);
    assert_eq!(page["items"][0]["status"], "transcribed");

    // retrying a completed task is a conflict, for a manager too
    let manager = login(&app, "manager@test.local", PASSWORD).await;
    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/v1/transcriptions/{task_id}/retry"),
        Some(&manager),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_improvement_routes() {
    let (h, app) = setup().await;
    let counselor = login(&app, "counselor@test.local", PASSWORD).await;
    let manager = login(&app, "manager@test.local", PASSWORD).await;

    let (status, _) = send(
        &app,
        Method::GET,
        "/api/v1/analyses/does-not-exist/suggestions",
        Some(&counselor),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &app,
        Method::GET,
        "/api/v1/improvement/success-patterns?days=90",
        Some(&counselor),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_patterns"], 0);
    assert_eq!(body["period_days"], 90);
    let (status, _) = send(
        &app,
        Method::GET,
        "/api/v1/improvement/success-patterns?clinic_id=another-clinic",
        Some(&manager),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(
        &app,
        Method::GET,
        "/api/v1/improvement/success-patterns?days=1000",
        Some(&manager),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let uri = format!("/api/v1/improvement/performance-trends/{}", h.counselor.user_id);
    let (status, trend) = send(&app, Method::GET, &uri, Some(&manager), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(trend["direction"], "stable");
    assert_eq!(trend["total_sessions"], 0);
    let uri = format!("/api/v1/improvement/performance-trends/{}", h.colleague.user_id);
    let (status, _) = send(&app, Method::GET, &uri, Some(&counselor), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
