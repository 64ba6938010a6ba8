//! Route-level tests driven through the axum router directly (no live
//! socket), the way the teacher indexer's own integration style favors
//! exercising handlers over a real request/response cycle rather than
//! calling handler functions in isolation.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;
use voteserver::{routes, AppState, Config};

fn app() -> axum::Router {
    routes::router(AppState::new(Config::default()))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn question(title: &str, a: &str, b: &str) -> Value {
    json!({
        "title": title,
        "kind": "single",
        "candidates": [
            { "display_name": a },
            { "display_name": b },
        ],
    })
}

async fn post(app: &axum::Router, uri: &str, body: Value) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn patch(app: &axum::Router, uri: &str, body: Value) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn get(app: &axum::Router, uri: &str) -> axum::response::Response {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

#[tokio::test]
async fn healthz_reports_ok() {
    let response = get(&app(), "/healthz").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "status": "ok" }));
}

#[tokio::test]
async fn create_election_then_fetch_it() {
    let app = app();

    let create = post(
        &app,
        "/api/elections",
        json!({
            "title": "board vote",
            "threshold": 2,
            "total_trustees": 3,
            "questions": [question("approve budget?", "yes", "no")],
        }),
    )
    .await;
    assert_eq!(create.status(), StatusCode::OK);
    let created = body_json(create).await;
    let election_id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["status"], "setup");
    assert_eq!(created["questions"].as_array().unwrap().len(), 1);

    let fetch = get(&app, &format!("/api/elections/{election_id}")).await;
    assert_eq!(fetch.status(), StatusCode::OK);
    let fetched = body_json(fetch).await;
    assert_eq!(fetched["title"], "board vote");
}

#[tokio::test]
async fn fetching_unknown_election_is_404() {
    let response = get(&app(), &format!("/api/elections/{}", uuid::Uuid::new_v4())).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn illegal_status_transition_is_rejected() {
    let app = app();
    let create = post(
        &app,
        "/api/elections",
        json!({
            "title": "t",
            "threshold": 1,
            "total_trustees": 1,
            "questions": [question("q", "yes", "no")],
        }),
    )
    .await;
    let election_id = body_json(create).await["id"].as_str().unwrap().to_string();

    let response = patch(
        &app,
        &format!("/api/elections/{election_id}/status"),
        json!({ "status": "voting" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn vote_submission_rejects_malformed_nullifier() {
    let app = app();

    let create = post(
        &app,
        "/api/elections",
        json!({
            "title": "t",
            "threshold": 1,
            "total_trustees": 1,
            "questions": [question("yes or no", "yes", "no")],
        }),
    )
    .await;
    let created = body_json(create).await;
    let election_id = created["id"].as_str().unwrap().to_string();
    let question_id = created["questions"][0]["id"].as_str().unwrap().to_string();

    let submit = post(
        &app,
        "/api/vote",
        json!({
            "election_id": election_id,
            "question_id": question_id,
            "credential": {
                "election_id": election_id,
                "nullifier": "not-hex",
                "payload": "p",
                "signature": "s",
            },
            "encrypted_payload": "aGVsbG8=",
            "commitment": "00".repeat(32),
            "zk_proof": "aGVsbG8=",
        }),
    )
    .await;
    assert_eq!(submit.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn vote_submission_rejects_when_election_not_voting() {
    let app = app();

    let create = post(
        &app,
        "/api/elections",
        json!({
            "title": "t",
            "threshold": 1,
            "total_trustees": 1,
            "questions": [question("yes or no", "yes", "no")],
        }),
    )
    .await;
    let created = body_json(create).await;
    let election_id = created["id"].as_str().unwrap().to_string();
    let question_id = created["questions"][0]["id"].as_str().unwrap().to_string();

    let submit = post(
        &app,
        "/api/vote",
        json!({
            "election_id": election_id,
            "question_id": question_id,
            "credential": {
                "election_id": election_id,
                "nullifier": "11".repeat(32),
                "payload": "p",
                "signature": "s",
            },
            "encrypted_payload": "aGVsbG8=",
            "commitment": "00".repeat(32),
            "zk_proof": "aGVsbG8=",
        }),
    )
    .await;
    assert_eq!(submit.status(), StatusCode::BAD_REQUEST);
}
