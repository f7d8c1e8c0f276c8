//! HTTP handlers for the course engine.
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Path, State},
    http::request::Parts,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::error::{LearnError, LearnResult};
use super::store::LearningStore;
use super::types::{PartIntent, QuizSubmission, UserId};
use crate::shared::state::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const MASTER_PASSWORD_HEADER: &str = "x-master-password";

/// Learner id forwarded by the upstream session layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LearnerId(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for LearnerId
where
    S: Send + Sync,
{
    type Rejection = LearnError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| LearnError::Unauthorized("Missing learner session".to_string()))?;

        raw.trim()
            .parse::<UserId>()
            .map(LearnerId)
            .map_err(|_| LearnError::Unauthorized("Invalid learner session".to_string()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct MasterPassword(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for MasterPassword
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(
            parts
                .headers
                .get(MASTER_PASSWORD_HEADER)
                .and_then(|h| h.to_str().ok())
                .map(str::to_string),
        ))
    }
}

fn parse_id(raw: &str, name: &str) -> LearnResult<i32> {
    raw.trim()
        .parse::<i32>()
        .map_err(|_| LearnError::InvalidInput(format!("Invalid {}: {}", name, raw)))
}

fn success<T: serde::Serialize>(data: T) -> Json<Value> {
    Json(serde_json::json!({
        "success": true,
        "data": data
    }))
}

/// Form values arrive as strings or numbers; anything else is treated as blank.
fn field_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

/// List courses with the learner's status in each
pub async fn list_courses<S: LearningStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    LearnerId(user): LearnerId,
) -> Result<impl IntoResponse, LearnError> {
    let statuses = state.engine.course_statuses(user).await?;
    Ok(success(statuses))
}

/// Course landing page data
pub async fn get_course_overview<S: LearningStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    LearnerId(user): LearnerId,
    Path(course): Path<String>,
) -> Result<impl IntoResponse, LearnError> {
    let overview = state.engine.course_overview(user, &course).await?;
    Ok(success(overview))
}

/// Resume a course where the learner left off
pub async fn resume_course<S: LearningStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    LearnerId(user): LearnerId,
    Path(course): Path<String>,
) -> Result<impl IntoResponse, LearnError> {
    let navigation = state.engine.resume(user, &course).await?;
    Ok(success(navigation))
}

/// Open a specific part as content (`1`) or quiz (`0`)
pub async fn open_part<S: LearningStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    LearnerId(user): LearnerId,
    Path((course, part_id, part_or_quiz)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, LearnError> {
    let part_id = parse_id(&part_id, "part id")?;
    let intent = PartIntent::from_flag(parse_id(&part_or_quiz, "part_or_quiz flag")?)?;
    let navigation = state
        .engine
        .open_part(user, &course, part_id, intent)
        .await?;
    Ok(success(navigation))
}

/// Mark a part's content as read
pub async fn mark_part_viewed<S: LearningStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    LearnerId(user): LearnerId,
    Path((course, part_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, LearnError> {
    let part_id = parse_id(&part_id, "part id")?;
    state.engine.mark_part_viewed(user, &course, part_id).await?;
    Ok(success(serde_json::json!({ "part_id": part_id, "viewed": true })))
}

/// Submit quiz answers as `question_<id>` fields
pub async fn submit_quiz<S: LearningStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    LearnerId(user): LearnerId,
    Path((course, part_id)): Path<(String, String)>,
    Json(fields): Json<HashMap<String, Value>>,
) -> Result<impl IntoResponse, LearnError> {
    let part_id = parse_id(&part_id, "part id")?;
    let values: Vec<(String, String)> = fields
        .iter()
        .map(|(key, value)| (key.clone(), field_value(value)))
        .collect();
    let submission =
        QuizSubmission::from_fields(values.iter().map(|(k, v)| (k.as_str(), v.as_str())))?;

    let outcome = state
        .engine
        .submit_quiz(user, &course, part_id, submission)
        .await?;
    Ok(success(outcome))
}

/// Complete a whole course for the learner (master password required)
pub async fn autocomplete_course<S: LearningStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    LearnerId(user): LearnerId,
    MasterPassword(password): MasterPassword,
    Path(course): Path<String>,
) -> Result<impl IntoResponse, LearnError> {
    let summary = state
        .engine
        .autocomplete(user, &course, password.as_deref())
        .await?;
    Ok(success(summary))
}

/// Reset one learner's progress in a course
pub async fn reset_user_course<S: LearningStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    MasterPassword(password): MasterPassword,
    Path((course, user_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, LearnError> {
    state.engine.authorize(password.as_deref())?;
    let user = parse_id(&user_id, "user id")?;
    state.engine.reset_user_course(user, &course).await?;
    Ok(success(serde_json::json!({ "course": course, "user_id": user })))
}

/// Reset every learner's progress in a course
pub async fn reset_course<S: LearningStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    MasterPassword(password): MasterPassword,
    Path(course): Path<String>,
) -> Result<impl IntoResponse, LearnError> {
    state.engine.authorize(password.as_deref())?;
    state.engine.reset_course_for_all_users(&course).await?;
    Ok(success(serde_json::json!({ "course": course })))
}

/// Verify certificate
pub async fn verify_certificate<S: LearningStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, LearnError> {
    let verification = state.engine.verify_certificate(&code).await?;
    Ok(success(verification))
}

/// Configure all Learn module routes
pub fn configure_learn_routes<S: LearningStore + 'static>() -> Router<Arc<AppState<S>>> {
    Router::new()
        // Course routes
        .route("/api/learn/courses", get(list_courses::<S>))
        .route("/api/learn/courses/:course", get(get_course_overview::<S>))
        .route("/api/learn/courses/:course/resume", get(resume_course::<S>))
        // Part routes
        .route(
            "/api/learn/courses/:course/parts/:part_id/:part_or_quiz",
            get(open_part::<S>),
        )
        .route(
            "/api/learn/courses/:course/parts/:part_id/view",
            post(mark_part_viewed::<S>),
        )
        .route(
            "/api/learn/courses/:course/parts/:part_id/quiz",
            post(submit_quiz::<S>),
        )
        // Privileged routes
        .route(
            "/api/learn/courses/:course/autocomplete",
            post(autocomplete_course::<S>),
        )
        .route(
            "/api/learn/admin/courses/:course/users/:user_id/reset",
            post(reset_user_course::<S>),
        )
        .route(
            "/api/learn/admin/courses/:course/reset",
            post(reset_course::<S>),
        )
        // Certificate routes
        .route(
            "/api/learn/certificates/:code/verify",
            get(verify_certificate::<S>),
        )
}

/// Simplified configure function for module registration
pub fn configure<S: LearningStore + 'static>(
    router: Router<Arc<AppState<S>>>,
) -> Router<Arc<AppState<S>>> {
    router.merge(configure_learn_routes::<S>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LearnConfig;
    use crate::learn::engine::CourseEngine;
    use crate::learn::store::InMemoryLearningStore;
    use crate::learn::types::{Chapter, Course, Part};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn app() -> Router {
        let store = InMemoryLearningStore::new();
        store
            .insert_course(Course {
                id: 1,
                title: "UK".into(),
                chapters: vec![Chapter {
                    id: 1,
                    course_id: 1,
                    title: "Chapter 1".into(),
                    index: 1,
                    parts: vec![Part {
                        id: 1,
                        chapter_id: 1,
                        title: "Introduction".into(),
                        description: String::new(),
                        index: 1,
                        quizzes: Vec::new(),
                    }],
                }],
            })
            .await;
        let state = Arc::new(AppState::new(CourseEngine::new(
            store,
            LearnConfig::default().with_master_password("secret"),
        )));
        configure_learn_routes().with_state(state)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_missing_learner_header_is_unauthorized() {
        let response = app()
            .await
            .oneshot(
                Request::builder()
                    .uri("/api/learn/courses/UK/resume")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_resume_returns_introduction() {
        let response = app()
            .await
            .oneshot(
                Request::builder()
                    .uri("/api/learn/courses/UK/resume")
                    .header(USER_ID_HEADER, "5")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["part_id"], 1);
        assert_eq!(body["data"]["mode"], "content");
    }

    #[tokio::test]
    async fn test_bad_flag_and_bad_password() {
        let response = app()
            .await
            .oneshot(
                Request::builder()
                    .uri("/api/learn/courses/UK/parts/1/9")
                    .header(USER_ID_HEADER, "5")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app()
            .await
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/learn/admin/courses/UK/reset")
                    .header(MASTER_PASSWORD_HEADER, "wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_submit_quiz_on_part_without_quiz() {
        let response = app()
            .await
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/learn/courses/UK/parts/1/quiz")
                    .header(USER_ID_HEADER, "5")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"question_1": "3"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
