use std::path::PathBuf;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_http::services::ServeDir;
use uuid::Uuid;

use crate::error::{CatalogError, CatalogResult};
use crate::identity::Identity;
use crate::models::*;
use crate::state::AppState;

pub fn router(state: AppState, media_dir: Option<PathBuf>) -> Router {
    let api = Router::new()
        // catalog
        .route("/api/categories", get(list_categories))
        .route("/api/courses", get(list_courses).post(create_course))
        .route(
            "/api/courses/:id",
            get(get_course).patch(update_course).delete(delete_course),
        )
        .route("/api/me/courses", get(list_my_courses))
        .route("/api/courses/:id/publish", post(publish_course))
        .route("/api/courses/:id/unpublish", post(unpublish_course))
        // lessons
        .route(
            "/api/courses/:id/lessons",
            get(get_lessons).put(set_lessons).post(add_lesson),
        )
        .route("/api/lessons/:id", get(get_lesson).delete(remove_lesson))
        .route("/api/lessons/:id/reorder", post(reorder_lesson))
        // progression
        .route("/api/lessons/:id/complete", post(mark_lesson_complete))
        .route("/api/lessons/:id/navigation", get(get_navigation))
        .route("/api/courses/:id/progress", get(get_progress))
        // quiz
        .route("/api/courses/:id/quiz", get(get_quiz).put(set_quiz))
        .route("/api/courses/:id/quiz/submit", post(submit_quiz))
        // media
        .route("/api/uploads", post(upload_media))
        .with_state(state);

    match media_dir {
        // serves files written by the local blob store
        Some(dir) => api.nest_service("/media", ServeDir::new(dir)),
        None => api,
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct CourseListQuery {
    pub search: Option<String>,
    pub category: Option<String>,
}

async fn list_categories(State(st): State<AppState>) -> CatalogResult<Json<Vec<Category>>> {
    Ok(Json(st.catalog.list_categories().await?))
}

async fn list_courses(
    State(st): State<AppState>,
    Query(q): Query<CourseListQuery>,
) -> CatalogResult<Json<Vec<CourseView>>> {
    let courses = match (q.category.as_deref(), q.search.as_deref()) {
        (Some(cat), _) if !cat.trim().is_empty() => st.catalog.by_category(cat).await?,
        (_, Some(text)) => st.catalog.search(text).await?,
        _ => st.catalog.list_published().await?,
    };
    Ok(Json(courses))
}

async fn list_my_courses(
    State(st): State<AppState>,
    author: Identity,
) -> CatalogResult<Json<Vec<OwnedCourse>>> {
    Ok(Json(st.catalog.list_owned(&author).await?))
}

async fn get_course(
    State(st): State<AppState>,
    viewer: Option<Identity>,
    Path(id): Path<Uuid>,
) -> CatalogResult<Json<CourseView>> {
    st.catalog
        .get_by_id(id, viewer.as_ref())
        .await?
        .map(Json)
        .ok_or_else(|| CatalogError::not_found("course", id))
}

async fn create_course(
    State(st): State<AppState>,
    owner: Identity,
    Json(req): Json<CreateCourseReq>,
) -> CatalogResult<(StatusCode, Json<CreatedCourse>)> {
    let created = st.authoring.create_course(req, &owner).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_course(
    State(st): State<AppState>,
    actor: Identity,
    Path(id): Path<Uuid>,
    Json(patch): Json<UpdateCourseReq>,
) -> CatalogResult<Json<CourseView>> {
    Ok(Json(st.authoring.update_course(id, patch, &actor).await?))
}

async fn delete_course(
    State(st): State<AppState>,
    actor: Identity,
    Path(id): Path<Uuid>,
) -> CatalogResult<StatusCode> {
    st.authoring.delete_course(id, &actor).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn publish_course(
    State(st): State<AppState>,
    actor: Identity,
    Path(id): Path<Uuid>,
) -> CatalogResult<Json<CourseView>> {
    Ok(Json(st.authoring.publish(id, &actor).await?))
}

async fn unpublish_course(
    State(st): State<AppState>,
    actor: Identity,
    Path(id): Path<Uuid>,
) -> CatalogResult<Json<CourseView>> {
    Ok(Json(st.authoring.unpublish(id, &actor).await?))
}

async fn get_lessons(
    State(st): State<AppState>,
    viewer: Option<Identity>,
    Path(course_id): Path<Uuid>,
) -> CatalogResult<Json<Vec<Lesson>>> {
    st.catalog
        .lessons(course_id, viewer.as_ref())
        .await?
        .map(Json)
        .ok_or_else(|| CatalogError::not_found("course", course_id))
}

async fn get_lesson(
    State(st): State<AppState>,
    viewer: Option<Identity>,
    Path(id): Path<Uuid>,
) -> CatalogResult<Json<Lesson>> {
    st.catalog
        .lesson(id, viewer.as_ref())
        .await?
        .map(Json)
        .ok_or_else(|| CatalogError::not_found("lesson", id))
}

async fn set_lessons(
    State(st): State<AppState>,
    actor: Identity,
    Path(course_id): Path<Uuid>,
    Json(req): Json<SetLessonsReq>,
) -> CatalogResult<Json<Vec<Lesson>>> {
    let lessons = st
        .authoring
        .set_lessons(course_id, req.lessons, req.expected_version, &actor)
        .await?;
    Ok(Json(lessons))
}

async fn add_lesson(
    State(st): State<AppState>,
    actor: Identity,
    Path(course_id): Path<Uuid>,
    Json(draft): Json<LessonDraft>,
) -> CatalogResult<(StatusCode, Json<Vec<Lesson>>)> {
    let lessons = st.authoring.add_lesson(course_id, draft, &actor).await?;
    Ok((StatusCode::CREATED, Json(lessons)))
}

async fn remove_lesson(
    State(st): State<AppState>,
    actor: Identity,
    Path(id): Path<Uuid>,
) -> CatalogResult<Json<Vec<Lesson>>> {
    Ok(Json(st.authoring.remove_lesson(id, &actor).await?))
}

async fn reorder_lesson(
    State(st): State<AppState>,
    actor: Identity,
    Path(id): Path<Uuid>,
    Json(req): Json<ReorderLessonReq>,
) -> CatalogResult<Json<Vec<Lesson>>> {
    Ok(Json(
        st.authoring.reorder_lesson(id, req.position, &actor).await?,
    ))
}

async fn mark_lesson_complete(
    State(st): State<AppState>,
    learner: Identity,
    Path(id): Path<Uuid>,
) -> CatalogResult<Json<ProgressReport>> {
    Ok(Json(st.progression.mark_lesson_complete(&learner, id).await?))
}

async fn get_navigation(
    State(st): State<AppState>,
    viewer: Option<Identity>,
    Path(id): Path<Uuid>,
) -> CatalogResult<Json<Navigation>> {
    Ok(Json(
        st.progression.compute_navigation(id, viewer.as_ref()).await?,
    ))
}

async fn get_progress(
    State(st): State<AppState>,
    learner: Identity,
    Path(course_id): Path<Uuid>,
) -> CatalogResult<Json<ProgressReport>> {
    Ok(Json(st.progression.report(&learner, course_id).await?))
}

async fn get_quiz(
    State(st): State<AppState>,
    viewer: Option<Identity>,
    Path(course_id): Path<Uuid>,
) -> CatalogResult<Json<PublicQuiz>> {
    st.quiz
        .public_quiz(course_id, viewer.as_ref())
        .await?
        .map(Json)
        .ok_or_else(|| CatalogError::not_found("quiz", course_id))
}

async fn set_quiz(
    State(st): State<AppState>,
    actor: Identity,
    Path(course_id): Path<Uuid>,
    Json(req): Json<QuizDefinitionReq>,
) -> CatalogResult<Json<PublicQuiz>> {
    let def = st.quiz.define(course_id, req, &actor).await?;
    Ok(Json(PublicQuiz::from(&def)))
}

async fn submit_quiz(
    State(st): State<AppState>,
    learner: Identity,
    Path(course_id): Path<Uuid>,
    Json(sub): Json<QuizSubmission>,
) -> CatalogResult<Json<QuizOutcome>> {
    Ok(Json(
        st.quiz.submit(course_id, &learner, &sub.answers).await?,
    ))
}

async fn upload_media(
    State(st): State<AppState>,
    _uploader: Identity,
    mut mp: Multipart,
) -> CatalogResult<Json<serde_json::Value>> {
    let mut file: Option<(Vec<u8>, String)> = None;

    while let Some(field) = mp.next_field().await.map_err(e400)? {
        if field.name() == Some("file") {
            let content_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let bytes = field.bytes().await.map_err(e400)?.to_vec();
            file = Some((bytes, content_type));
        }
    }

    let (bytes, content_type) =
        file.ok_or_else(|| CatalogError::validation("file", "file is required"))?;
    if bytes.is_empty() {
        return Err(CatalogError::validation("file", "file is empty"));
    }
    let size = bytes.len();
    let url = st
        .blobs
        .upload(bytes, &content_type)
        .await
        .map_err(|e| CatalogError::StoreUnavailable(format!("blob upload: {e:#}")))?;
    tracing::info!(%url, size, content_type = %content_type, "media uploaded");
    Ok(Json(serde_json::json!({ "url": url })))
}

// --- helpers ---
fn e400<E: std::fmt::Display>(e: E) -> CatalogError {
    CatalogError::validation("file", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::LocalBlobStore;
    use crate::notify::Notifier;
    use crate::quiz::QuizDefaults;
    use crate::store::MemoryStore;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(media: &std::path::Path) -> Router {
        let state = AppState::new(
            Arc::new(MemoryStore::new()),
            Notifier::disabled(),
            Arc::new(LocalBlobStore::new(media.to_path_buf(), "http://test")),
            QuizDefaults::default(),
        );
        router(state, None)
    }

    fn req(method: &str, uri: &str, user: Option<Uuid>, body: Option<Value>) -> Request<Body> {
        let mut b = Request::builder().method(method).uri(uri);
        if let Some(u) = user {
            b = b.header("x-user-id", u.to_string());
        }
        match body {
            Some(v) => b
                .header("content-type", "application/json")
                .body(Body::from(v.to_string()))
                .unwrap(),
            None => b.body(Body::empty()).unwrap(),
        }
    }

    async fn call(app: &Router, r: Request<Body>) -> (StatusCode, Value) {
        let res = app.clone().oneshot(r).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn course_body(publish: bool, lessons: usize) -> Value {
        let lessons: Vec<Value> = (1..=lessons)
            .map(|i| json!({ "title": format!("Leçon {i}"), "content": "contenu" }))
            .collect();
        json!({
            "title": "Rust pour le web",
            "description": "Apprendre axum",
            "level": "débutant",
            "price": 0,
            "category": "Développement Web",
            "publish": publish,
            "lessons": lessons,
        })
    }

    #[tokio::test]
    async fn create_then_browse_published_course() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        let owner = Uuid::new_v4();

        let (status, created) = call(
            &app,
            req("POST", "/api/courses", Some(owner), Some(course_body(true, 2))),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["course"]["is_published"], true);
        assert_eq!(created["course"]["category"]["name"], "Développement");
        let id = created["course"]["id"].as_str().unwrap().to_string();

        let (status, list) = call(&app, req("GET", "/api/courses?search=dev", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 1);

        let (_, list) = call(&app, req("GET", "/api/courses?search=xyzzynotfound", None, None)).await;
        assert_eq!(list, json!([]));

        let (status, lessons) =
            call(&app, req("GET", &format!("/api/courses/{id}/lessons"), None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(lessons[1]["order_index"], 2);
    }

    #[tokio::test]
    async fn drafts_are_hidden_from_strangers() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        let owner = Uuid::new_v4();
        let (_, created) = call(
            &app,
            req("POST", "/api/courses", Some(owner), Some(course_body(false, 1))),
        )
        .await;
        let uri = format!("/api/courses/{}", created["course"]["id"].as_str().unwrap());

        let (status, _) = call(&app, req("GET", &uri, None, None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, body) = call(&app, req("GET", &uri, Some(owner), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_published"], false);
    }

    #[tokio::test]
    async fn publish_without_lessons_is_a_field_error() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        let owner = Uuid::new_v4();
        let (status, created) = call(
            &app,
            req("POST", "/api/courses", Some(owner), Some(course_body(true, 0))),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["course"]["is_published"], false);
        assert_eq!(created["publish_rejected"]["field"], "lessons");

        let id = created["course"]["id"].as_str().unwrap();
        let (status, err) = call(
            &app,
            req("POST", &format!("/api/courses/{id}/publish"), Some(owner), None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["error"]["field"], "lessons");
    }

    #[tokio::test]
    async fn mutations_need_an_owner() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        let (_, created) = call(
            &app,
            req("POST", "/api/courses", Some(Uuid::new_v4()), Some(course_body(true, 1))),
        )
        .await;
        let id = created["course"]["id"].as_str().unwrap();

        let (status, _) = call(&app, req("POST", "/api/courses", None, Some(course_body(true, 1)))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(
            &app,
            req("POST", &format!("/api/courses/{id}/unpublish"), Some(Uuid::new_v4()), None),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn learner_walks_lessons_then_takes_quiz() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        let owner = Uuid::new_v4();
        let learner = Uuid::new_v4();
        let (_, created) = call(
            &app,
            req("POST", "/api/courses", Some(owner), Some(course_body(true, 2))),
        )
        .await;
        let id = created["course"]["id"].as_str().unwrap().to_string();
        let lesson_ids: Vec<String> = created["lessons"]
            .as_array()
            .unwrap()
            .iter()
            .map(|l| l["id"].as_str().unwrap().to_string())
            .collect();

        let quiz = json!({
            "questions": [
                { "id": "q1", "text": "?", "options": ["a", "b"], "correct_option_index": 0, "points": 30 },
                { "id": "q2", "text": "?", "options": ["a", "b"], "correct_option_index": 1, "points": 30 }
            ]
        });
        let (status, public) = call(
            &app,
            req("PUT", &format!("/api/courses/{id}/quiz"), Some(owner), Some(quiz)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(public["questions"][0].get("correct_option_index").is_none());

        let submit = format!("/api/courses/{id}/quiz/submit");
        let answers = json!({ "answers": { "q1": 0, "q2": 1 } });
        let (status, err) = call(&app, req("POST", &submit, Some(learner), Some(answers.clone()))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["error"]["field"], "lessons");

        let (_, nav) = call(
            &app,
            req("GET", &format!("/api/lessons/{}/navigation", lesson_ids[1]), None, None),
        )
        .await;
        assert_eq!(nav["previous"]["id"], lesson_ids[0]);
        assert_eq!(nav["quiz"], true);

        let (_, report) = call(
            &app,
            req("POST", &format!("/api/lessons/{}/complete", lesson_ids[0]), Some(learner), None),
        )
        .await;
        assert_eq!(report["progress_percent"], 50.0);
        call(
            &app,
            req("POST", &format!("/api/lessons/{}/complete", lesson_ids[1]), Some(learner), None),
        )
        .await;

        let (status, outcome) = call(&app, req("POST", &submit, Some(learner), Some(answers))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["result"]["score"], 60);
        assert_eq!(outcome["certificate_eligible"], true);
        assert_eq!(outcome["course_complete"], true);
    }

    #[tokio::test]
    async fn owner_deletes_course() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        let owner = Uuid::new_v4();
        let (_, created) = call(
            &app,
            req("POST", "/api/courses", Some(owner), Some(course_body(true, 1))),
        )
        .await;
        let uri = format!("/api/courses/{}", created["course"]["id"].as_str().unwrap());

        let (status, _) = call(&app, req("DELETE", &uri, Some(owner), None)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, body) = call(&app, req("GET", &uri, Some(owner), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn upload_stores_file_and_returns_url() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        let boundary = "XBOUNDARY";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"cover.png\"\r\n\
             Content-Type: image/png\r\n\r\n\
             PNGDATA\r\n\
             --{boundary}--\r\n"
        );
        let r = Request::builder()
            .method("POST")
            .uri("/api/uploads")
            .header("x-user-id", Uuid::new_v4().to_string())
            .header("content-type", format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(body))
            .unwrap();
        let (status, out) = call(&app, r).await;
        assert_eq!(status, StatusCode::OK);
        let url = out["url"].as_str().unwrap();
        assert!(url.starts_with("http://test/media/"));
        assert!(url.ends_with(".png"));
        let name = url.rsplit('/').next().unwrap();
        let stored = std::fs::read(dir.path().join("media").join(name)).unwrap();
        assert_eq!(stored, b"PNGDATA");
    }

    #[tokio::test]
    async fn author_dashboard_lists_drafts_with_student_counts() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        let owner = Uuid::new_v4();
        let (_, draft) = call(
            &app,
            req("POST", "/api/courses", Some(owner), Some(course_body(false, 1))),
        )
        .await;
        let (_, live) = call(
            &app,
            req("POST", "/api/courses", Some(owner), Some(course_body(true, 1))),
        )
        .await;
        call(
            &app,
            req("POST", "/api/courses", Some(Uuid::new_v4()), Some(course_body(true, 1))),
        )
        .await;
        let lesson = live["lessons"][0]["id"].as_str().unwrap();
        call(
            &app,
            req("POST", &format!("/api/lessons/{lesson}/complete"), Some(Uuid::new_v4()), None),
        )
        .await;

        let (status, mine) = call(&app, req("GET", "/api/me/courses", Some(owner), None)).await;
        assert_eq!(status, StatusCode::OK);
        let mine = mine.as_array().unwrap();
        assert_eq!(mine.len(), 2);
        let row = |id: &Value| {
            mine.iter()
                .find(|c| c["id"] == id["course"]["id"])
                .unwrap()
                .clone()
        };
        assert_eq!(row(&draft)["is_published"], false);
        assert_eq!(row(&draft)["student_count"], 0);
        assert_eq!(row(&live)["student_count"], 1);

        let (status, _) = call(&app, req("GET", "/api/me/courses", None, None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn categories_are_listed() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        call(
            &app,
            req("POST", "/api/courses", Some(Uuid::new_v4()), Some(course_body(true, 1))),
        )
        .await;
        let (status, cats) = call(&app, req("GET", "/api/categories", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cats[0]["name"], "Développement");
    }
}
