//! End-to-end tests driving the HTTP surface against a live server with
//! in-memory storage, stubbed GitHub/LLM clients, and httpmock standing in
//! for the students' external systems.

use classforge::api::ApiState;
use classforge::build_worker::BuildPipeline;
use classforge::checks::StubCheckRunner;
use classforge::config::LlmConfig;
use classforge::eval_worker::EvalPipeline;
use classforge::github::GithubClient;
use classforge::llm::QualityReviewer;
use classforge::notify::NotifySender;
use classforge::storage::Storage;
use classforge::types::{InstructorConfig, SubmissionStatus};
use classforge::{build_router, Submission};
use httpmock::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const SECRET: &str = "s3cret";

struct TestApp {
    base_url: String,
    storage: Arc<Storage>,
    client: reqwest::Client,
}

/// Spin up the full router on an ephemeral port with fast retry backoff.
async fn spawn_app() -> TestApp {
    let storage = Arc::new(Storage::in_memory().unwrap());
    storage
        .upsert_instructor_config(&InstructorConfig {
            shared_secret: SECRET.into(),
            github_token: None,
            evaluation_base_url: "http://inst.example/api/evaluate".into(),
            max_rounds: 2,
        })
        .unwrap();

    let notifier = NotifySender::with_policy(3, Duration::from_millis(10));
    let github = GithubClient::new(None);
    let reviewer = QualityReviewer::new(LlmConfig::default());
    let build = BuildPipeline::new(storage.clone(), github.clone(), notifier.clone());
    let eval = EvalPipeline::new(
        storage.clone(),
        github,
        reviewer,
        Arc::new(StubCheckRunner),
    );
    let state = Arc::new(ApiState {
        storage: storage.clone(),
        notifier,
        build,
        eval,
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_router(state)).await.unwrap();
    });

    TestApp {
        base_url: format!("http://{addr}"),
        storage,
        client: reqwest::Client::new(),
    }
}

fn build_request_body(evaluation_url: &str, round: u32, nonce: &str) -> Value {
    json!({
        "email": "jane@uni.edu",
        "secret": SECRET,
        "task": "todo-app",
        "round": round,
        "nonce": nonce,
        "brief": "Build a todo list web app with persistent items.",
        "checks": ["App loads", "Items persist", "Items can be deleted"],
        "evaluation_url": evaluation_url,
        "attachments": []
    })
}

/// Poll until the submission reaches a terminal status.
async fn wait_for_terminal(storage: &Storage, id: &str) -> Submission {
    for _ in 0..200 {
        if let Some(sub) = storage.get_submission(id).unwrap() {
            if sub.status.is_terminal() {
                return sub;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("submission {id} never reached a terminal status");
}

#[tokio::test]
async fn test_build_and_evaluate_flow() {
    let app = spawn_app().await;
    let student = MockServer::start();
    let eval_hook = student.mock(|when, then| {
        when.method(POST)
            .path("/callback")
            .json_body_partial(r#"{"email": "jane@uni.edu", "task": "todo-app", "round": 1}"#);
        then.status(200).json_body(json!({"success": true}));
    });

    // Student system posts a build request.
    let resp = app
        .client
        .post(format!("{}/api/build", app.base_url))
        .json(&build_request_body(&student.url("/callback"), 1, "n-123"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], json!(true));
    let submission_id = body["submissionId"].as_str().unwrap().to_string();

    // Pipeline runs detached: received -> ... -> completed, then notifies.
    let sub = wait_for_terminal(&app.storage, &submission_id).await;
    assert_eq!(sub.status, SubmissionStatus::Completed);
    let repo_url = sub.repo_url.clone().unwrap();
    let pages_url = sub.pages_url.clone().unwrap();
    assert!(sub.commit_sha.is_some());
    eval_hook.assert_hits(1);

    // Student system reports the deployment for evaluation.
    let resp = app
        .client
        .post(format!("{}/api/evaluate", app.base_url))
        .json(&json!({
            "email": "jane@uni.edu",
            "secret": SECRET,
            "task": "todo-app",
            "round": 1,
            "nonce": "n-123",
            "repo_url": repo_url,
            "commit_sha": sub.commit_sha.unwrap(),
            "pages_url": pages_url,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Evaluation lands in storage with a bounded score and feedback.
    let mut evaluations = vec![];
    for _ in 0..200 {
        evaluations = app.storage.evaluations_for_submission(&submission_id).unwrap();
        if !evaluations.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(evaluations.len(), 1);
    let eval = &evaluations[0];
    assert!(eval.overall_score <= 100);
    assert_eq!(eval.check_results.len(), 3);
    assert!(eval.feedback.contains("Evaluation Feedback"));

    // Round 1 evaluation generates the round-2 task template.
    let templates = app.storage.active_templates().unwrap();
    assert_eq!(templates.len(), 1);
    assert_eq!(templates[0].name, "todo-app-round2");

    // And the dashboard shows it all.
    let resp = app
        .client
        .get(format!("{}/api/evaluations?task=todo-app", app.base_url))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["total"], json!(1));
}

#[tokio::test]
async fn test_invalid_secret_rejected_on_both_endpoints() {
    let app = spawn_app().await;

    let mut body = build_request_body("http://127.0.0.1:9/cb", 1, "n-1");
    body["secret"] = json!("wrong");
    let resp = app
        .client
        .post(format!("{}/api/build", app.base_url))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], json!("Invalid secret"));

    let resp = app
        .client
        .post(format!("{}/api/evaluate", app.base_url))
        .json(&json!({
            "email": "jane@uni.edu",
            "secret": "wrong",
            "task": "todo-app",
            "round": 1,
            "nonce": "n-1",
            "repo_url": "https://github.com/a/r",
            "commit_sha": "abc",
            "pages_url": "https://a.github.io/r",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_round_monotonicity_enforced() {
    let app = spawn_app().await;
    let student = MockServer::start();
    student.mock(|when, then| {
        when.method(POST).path("/cb");
        then.status(200);
    });

    let resp = app
        .client
        .post(format!("{}/api/build", app.base_url))
        .json(&build_request_body(&student.url("/cb"), 1, "n-1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // A second round-1 request for the same (email, task) must not regress.
    let resp = app
        .client
        .post(format!("{}/api/build", app.base_url))
        .json(&build_request_body(&student.url("/cb"), 1, "n-2"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("already submitted"));

    // Round 0 and rounds beyond the course limit are rejected outright.
    let resp = app
        .client
        .post(format!("{}/api/build", app.base_url))
        .json(&build_request_body(&student.url("/cb"), 0, "n-3"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = app
        .client
        .post(format!("{}/api/build", app.base_url))
        .json(&build_request_body(&student.url("/cb"), 3, "n-4"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_evaluate_unknown_submission_rejected() {
    let app = spawn_app().await;
    let resp = app
        .client
        .post(format!("{}/api/evaluate", app.base_url))
        .json(&json!({
            "email": "nobody@uni.edu",
            "secret": SECRET,
            "task": "ghost-task",
            "round": 1,
            "nonce": "n-0",
            "repo_url": "https://github.com/a/r",
            "commit_sha": "abc",
            "pages_url": "https://a.github.io/r",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], json!("Submission not found"));
}

#[tokio::test]
async fn test_notification_retries_then_fails_submission() {
    let app = spawn_app().await;
    let student = MockServer::start();
    let eval_hook = student.mock(|when, then| {
        when.method(POST).path("/cb");
        then.status(500);
    });

    let resp = app
        .client
        .post(format!("{}/api/build", app.base_url))
        .json(&build_request_body(&student.url("/cb"), 1, "n-1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let submission_id = body["submissionId"].as_str().unwrap().to_string();

    let sub = wait_for_terminal(&app.storage, &submission_id).await;
    assert_eq!(sub.status, SubmissionStatus::Failed);
    assert!(sub
        .error_message
        .unwrap()
        .contains("after 3 attempts"));
    eval_hook.assert_hits(3);
}

#[tokio::test]
async fn test_template_crud_and_dispatch() {
    let app = spawn_app().await;

    // Create a template.
    let resp = app
        .client
        .post(format!("{}/api/templates", app.base_url))
        .json(&json!({
            "name": "weather-app",
            "brief": "Build a weather dashboard",
            "checks": ["Shows current weather"],
            "functional_tests": "await page.goto(url);"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let template_id = body["template_id"].as_str().unwrap().to_string();

    let resp = app
        .client
        .get(format!("{}/api/templates", app.base_url))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["total"], json!(1));

    // Dispatch it to one student endpoint.
    let student = MockServer::start();
    let build_hook = student.mock(|when, then| {
        when.method(POST)
            .path("/build")
            .json_body_partial(r#"{"task": "weather-app", "round": 1, "secret": "s3cret"}"#);
        then.status(200);
    });

    let resp = app
        .client
        .post(format!(
            "{}/api/templates/{}/dispatch",
            app.base_url, template_id
        ))
        .json(&json!({
            "students": [{"email": "jane@uni.edu", "endpoint": student.url("/build")}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["tasks_sent"], json!(1));

    for _ in 0..100 {
        if build_hook.hits() >= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    build_hook.assert_hits(1);

    // Deactivate, then the listing is empty and a repeat delete 404s.
    let resp = app
        .client
        .delete(format!("{}/api/templates/{}", app.base_url, template_id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let resp = app
        .client
        .get(format!("{}/api/templates", app.base_url))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["total"], json!(0));

    let resp = app
        .client
        .post(format!(
            "{}/api/templates/{}/dispatch",
            app.base_url, "unknown-id"
        ))
        .json(&json!({
            "students": [{"email": "jane@uni.edu", "endpoint": student.url("/build")}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_config_endpoints_and_health() {
    let app = spawn_app().await;

    let resp = app
        .client
        .get(format!("{}/health", app.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");

    let resp = app
        .client
        .get(format!("{}/api/config", app.base_url))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["max_rounds"], json!(2));

    // Rotate the secret and raise the round limit.
    let resp = app
        .client
        .put(format!("{}/api/config", app.base_url))
        .json(&json!({
            "shared_secret": "rotated",
            "github_token": null,
            "evaluation_base_url": "http://inst.example/api/evaluate",
            "max_rounds": 3
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let config = app.storage.instructor_config().unwrap().unwrap();
    assert_eq!(config.shared_secret, "rotated");
    assert_eq!(config.max_rounds, 3);

    // An empty secret is rejected.
    let resp = app
        .client
        .put(format!("{}/api/config", app.base_url))
        .json(&json!({
            "shared_secret": "",
            "github_token": null,
            "evaluation_base_url": "",
            "max_rounds": 2
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}
