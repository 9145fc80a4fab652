use quiz_engine::routes::build_router;
use quiz_engine::state::{AppState, StaticRoster, StudentProfile};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

fn profile(id: &str, name: &str, email: &str) -> StudentProfile {
    StudentProfile {
        id: id.into(),
        name: name.into(),
        email: email.into(),
    }
}

async fn spawn_server() -> (String, reqwest::Client) {
    let mut courses = HashMap::new();
    courses.insert(
        7,
        vec![
            profile("s1", "Ana García", "ana@school.test"),
            profile("s2", "Bruno Díaz", "bruno@school.test"),
        ],
    );
    let state = AppState::new(Arc::new(StaticRoster::with_courses(courses)), None);
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), reqwest::Client::new())
}

fn identity(user_id: &str) -> HeaderMap {
    let mut h = HeaderMap::new();
    h.insert("x-user-id", HeaderValue::from_str(user_id).unwrap());
    h
}

fn basics_quiz_payload() -> serde_json::Value {
    json!({
        "title": "Basics",
        "questions": [
            {
                "text": "2+2?",
                "options": ["3", "4", "5", "6"],
                "correctOptionIndex": 1
            }
        ]
    })
}

async fn create_quiz(base: &str, client: &reqwest::Client, teacher: &str) -> i64 {
    let resp = client
        .post(format!("{}/api/v1/quizzes", base))
        .headers(identity(teacher))
        .json(&basics_quiz_payload())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    resp.json::<serde_json::Value>().await.unwrap()["quiz_id"]
        .as_i64()
        .unwrap()
}

async fn assign(base: &str, client: &reqwest::Client, teacher: &str, quiz_id: i64, scope: serde_json::Value) -> i64 {
    let resp = client
        .post(format!("{}/api/v1/assignments", base))
        .headers(identity(teacher))
        .json(&json!({"quizId": quiz_id, "scope": scope}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    resp.json::<serde_json::Value>().await.unwrap()["assignmentId"]
        .as_i64()
        .unwrap()
}

#[tokio::test]
async fn author_assign_submit_report_flow() {
    let (base, client) = spawn_server().await;
    let quiz_id = create_quiz(&base, &client, "t1").await;
    let assignment_id = assign(&base, &client, "t1", quiz_id, json!({"studentIds": ["s1", "s2"]})).await;

    // The student sees the assignment, with the answer key withheld.
    let listing = client
        .get(format!("{}/api/v1/assignments", base))
        .headers(identity("s1"))
        .send()
        .await
        .unwrap();
    assert_eq!(listing.status(), 200);
    let listing = listing.json::<serde_json::Value>().await.unwrap();
    assert_eq!(listing["total"], 1);
    assert_eq!(listing["items"][0]["quizTitle"], "Basics");

    let view = client
        .get(format!("{}/api/v1/assignments/{}", base, assignment_id))
        .headers(identity("s1"))
        .send()
        .await
        .unwrap();
    assert_eq!(view.status(), 200);
    let body = view.text().await.unwrap();
    assert!(body.contains("\"2+2?\""));
    assert!(!body.contains("correctOptionIndex"));

    let submit = client
        .post(format!("{}/api/v1/assignments/{}/submissions", base, assignment_id))
        .headers(identity("s1"))
        .json(&json!({"answers": [1]}))
        .send()
        .await
        .unwrap();
    assert_eq!(submit.status(), 201);
    let result = submit.json::<serde_json::Value>().await.unwrap();
    assert_eq!(result["score"], 1);
    assert_eq!(result["total"], 1);
    assert_eq!(result["percentage"], 100);

    // Resubmission is rejected, not overwritten.
    let again = client
        .post(format!("{}/api/v1/assignments/{}/submissions", base, assignment_id))
        .headers(identity("s1"))
        .json(&json!({"answers": [0]}))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 409);
    assert_eq!(
        again.json::<serde_json::Value>().await.unwrap()["error"]["code"],
        "ALREADY_SUBMITTED"
    );

    let mine = client
        .get(format!("{}/api/v1/assignments/{}/submissions/mine", base, assignment_id))
        .headers(identity("s1"))
        .send()
        .await
        .unwrap();
    assert_eq!(mine.status(), 200);
    assert_eq!(mine.json::<serde_json::Value>().await.unwrap()["percentage"], 100);

    let summary = client
        .get(format!("{}/api/v1/assignments/{}/summary", base, assignment_id))
        .headers(identity("t1"))
        .send()
        .await
        .unwrap();
    assert_eq!(summary.status(), 200);
    let summary = summary.json::<serde_json::Value>().await.unwrap();
    assert_eq!(summary["total"], 2);
    let items = summary["items"].as_array().unwrap();
    // Ordered by display name: Ana before Bruno.
    assert_eq!(items[0]["studentId"], "s1");
    assert_eq!(items[0]["status"], "attempted");
    assert_eq!(items[0]["score"], 1);
    assert_eq!(items[0]["percentage"], 100);
    assert_eq!(items[1]["studentId"], "s2");
    assert_eq!(items[1]["status"], "notAttempted");
    assert!(items[1].get("score").is_none());

    let filtered = client
        .get(format!("{}/api/v1/assignments/{}/summary?q=bruno", base, assignment_id))
        .headers(identity("t1"))
        .send()
        .await
        .unwrap();
    let filtered = filtered.json::<serde_json::Value>().await.unwrap();
    assert_eq!(filtered["total"], 1);
    assert_eq!(filtered["items"][0]["studentId"], "s2");
}

#[tokio::test]
async fn course_scope_resolves_enrollment() {
    let (base, client) = spawn_server().await;
    let quiz_id = create_quiz(&base, &client, "t1").await;
    let assignment_id = assign(&base, &client, "t1", quiz_id, json!({"courseId": 7})).await;

    let listing = client
        .get(format!("{}/api/v1/assignments", base))
        .headers(identity("s2"))
        .send()
        .await
        .unwrap();
    let listing = listing.json::<serde_json::Value>().await.unwrap();
    assert_eq!(listing["total"], 1);
    assert_eq!(listing["items"][0]["id"].as_i64().unwrap(), assignment_id);

    // A student outside the course is turned away from the assignment view.
    let outsider = client
        .get(format!("{}/api/v1/assignments/{}", base, assignment_id))
        .headers(identity("s9"))
        .send()
        .await
        .unwrap();
    assert_eq!(outsider.status(), 403);

    let summary = client
        .get(format!("{}/api/v1/assignments/{}/summary", base, assignment_id))
        .headers(identity("t1"))
        .send()
        .await
        .unwrap();
    assert_eq!(summary.json::<serde_json::Value>().await.unwrap()["total"], 2);
}

#[tokio::test]
async fn validation_errors_name_the_offending_field() {
    let (base, client) = spawn_server().await;

    let dry_run = client
        .post(format!("{}/api/v1/quizzes/validate", base))
        .headers(identity("t1"))
        .json(&basics_quiz_payload())
        .send()
        .await
        .unwrap();
    assert_eq!(dry_run.status(), 200);
    assert_eq!(dry_run.json::<serde_json::Value>().await.unwrap()["valid"], true);

    let resp = client
        .post(format!("{}/api/v1/quizzes", base))
        .headers(identity("t1"))
        .json(&json!({"title": "   ", "questions": [{"text": "q", "options": ["a", "b"], "correctOptionIndex": 0}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body = resp.json::<serde_json::Value>().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(body["error"]["details"][0]["field"], "title");

    // An unconfirmed correct option is an authoring state, not a valid quiz.
    let resp = client
        .post(format!("{}/api/v1/quizzes", base))
        .headers(identity("t1"))
        .json(&json!({"title": "Basics", "questions": [{"text": "q", "options": ["a", "b"]}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body = resp.json::<serde_json::Value>().await.unwrap();
    assert_eq!(
        body["error"]["details"][0]["field"],
        "questions[0].correctOptionIndex"
    );
}

#[tokio::test]
async fn update_rules_forbidden_then_locked() {
    let (base, client) = spawn_server().await;
    let quiz_id = create_quiz(&base, &client, "t1").await;

    let resp = client
        .put(format!("{}/api/v1/quizzes/{}", base, quiz_id))
        .headers(identity("t2"))
        .json(&basics_quiz_payload())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let assignment_id = assign(&base, &client, "t1", quiz_id, json!({"studentIds": ["s1"]})).await;
    client
        .post(format!("{}/api/v1/assignments/{}/submissions", base, assignment_id))
        .headers(identity("s1"))
        .json(&json!({"answers": [null]}))
        .send()
        .await
        .unwrap();

    let resp = client
        .put(format!("{}/api/v1/quizzes/{}", base, quiz_id))
        .headers(identity("t1"))
        .json(&basics_quiz_payload())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    assert_eq!(
        resp.json::<serde_json::Value>().await.unwrap()["error"]["code"],
        "QUIZ_LOCKED"
    );
}

#[tokio::test]
async fn deleting_a_quiz_cascades() {
    let (base, client) = spawn_server().await;
    let quiz_id = create_quiz(&base, &client, "t1").await;
    let assignment_id = assign(&base, &client, "t1", quiz_id, json!({"studentIds": ["s1"]})).await;
    client
        .post(format!("{}/api/v1/assignments/{}/submissions", base, assignment_id))
        .headers(identity("s1"))
        .json(&json!({"answers": [1]}))
        .send()
        .await
        .unwrap();

    let deleted = client
        .delete(format!("{}/api/v1/quizzes/{}", base, quiz_id))
        .headers(identity("t1"))
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), 204);

    let quiz = client
        .get(format!("{}/api/v1/quizzes/{}", base, quiz_id))
        .headers(identity("t1"))
        .send()
        .await
        .unwrap();
    assert_eq!(quiz.status(), 404);

    let assignment = client
        .get(format!("{}/api/v1/assignments/{}", base, assignment_id))
        .headers(identity("s1"))
        .send()
        .await
        .unwrap();
    assert_eq!(assignment.status(), 404);

    let result = client
        .get(format!("{}/api/v1/assignments/{}/submissions/mine", base, assignment_id))
        .headers(identity("s1"))
        .send()
        .await
        .unwrap();
    assert_eq!(result.status(), 404);
}

#[tokio::test]
async fn requests_without_identity_are_rejected() {
    let (base, client) = spawn_server().await;
    let resp = client
        .post(format!("{}/api/v1/quizzes", base))
        .json(&basics_quiz_payload())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    assert_eq!(
        resp.json::<serde_json::Value>().await.unwrap()["error"]["code"],
        "UNAUTHORIZED"
    );
}
