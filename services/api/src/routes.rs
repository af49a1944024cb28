use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use mindflow_core::{
    AudioClip, DocumentContext, Notice, PipelineError, SpeechError, StudyPipeline, StudySession,
    StudyState, TextSource,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::sessions::{SessionHandle, SessionRegistry};

const INDEX_HTML: &str = include_str!("../static/index.html");

/// Shared handles every request handler needs.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<StudyPipeline>,
    pub text_source: Arc<dyn TextSource>,
    pub sessions: SessionRegistry,
}

/// Builds the HTTP router for the browser UI and its JSON API.
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    // Permissive CORS so the page can also be served from a separate dev server.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/api/documents", post(upload_document))
        .route("/api/sessions/{id}", get(session_status))
        .route("/api/sessions/{id}/question", post(ask_question))
        .route("/api/sessions/{id}/answer", post(answer_with_voice))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(cors)
        .with_state(state)
}

/// Snapshot of a session as the page sees it.
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub session_id: Uuid,
    pub state: StudyState,
    pub pending_question: Option<String>,
    pub last_feedback: Option<String>,
    pub context_chars: usize,
    pub pages: usize,
}

impl SessionView {
    fn new(id: Uuid, session: &StudySession) -> Self {
        let (context_chars, pages) = session
            .document()
            .map(|d| (d.char_count(), d.page_count()))
            .unwrap_or((0, 0));
        Self {
            session_id: id,
            state: session.state(),
            pending_question: session.pending_question().map(str::to_owned),
            last_feedback: session.last_feedback().map(str::to_owned),
            context_chars,
            pages,
        }
    }
}

/// Body returned by every user action.
#[derive(Debug, Serialize)]
pub struct ActionResponse {
    #[serde(flatten)]
    pub session: SessionView,
    pub question: Option<String>,
    pub transcript: Option<String>,
    pub feedback: Option<String>,
    /// Spoken question or feedback as a `data:` URI.
    pub audio: Option<String>,
    pub notices: Vec<Notice>,
}

impl ActionResponse {
    fn new(id: Uuid, session: &StudySession) -> Self {
        Self {
            session: SessionView::new(id, session),
            question: None,
            transcript: None,
            feedback: None,
            audio: None,
            notices: Vec::new(),
        }
    }

    fn attach_speech(&mut self, speech: Result<AudioClip, SpeechError>) {
        match speech {
            Ok(clip) => self.audio = Some(clip.to_data_uri()),
            Err(SpeechError::EmptyText) => {}
            Err(e) => self.notices.push(Notice::error(format!("TTS Error: {e}"))),
        }
    }
}

/// Request-level failure, rendered as a notice so the page can show it.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    notice: Notice,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            notice: Notice::error(message),
        }
    }

    fn session_not_found(id: Uuid) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            notice: Notice::error(format!("Session {id} not found. Upload a PDF to start.")),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            notice: Notice::error(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "notices": [self.notice] });
        (self.status, Json(body)).into_response()
    }
}

fn status_for(err: &PipelineError) -> StatusCode {
    match err {
        PipelineError::NoDocument | PipelineError::NoPendingQuestion => StatusCode::CONFLICT,
        PipelineError::CaptureMiss(_) => StatusCode::OK,
        PipelineError::Completion(_) => StatusCode::BAD_GATEWAY,
    }
}

#[derive(Debug, Deserialize)]
pub struct UploadParams {
    /// Replace the document of an existing session instead of starting a new one.
    pub session_id: Option<Uuid>,
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn lookup(state: &AppState, id: Uuid) -> Result<SessionHandle, ApiError> {
    state
        .sessions
        .get(&id)
        .await
        .ok_or_else(|| ApiError::session_not_found(id))
}

async fn upload_document(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    mut multipart: Multipart,
) -> Result<Json<ActionResponse>, ApiError> {
    let mut pdf: Option<Bytes> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid upload: {e}")))?
    {
        let name = field.name().map(str::to_owned);
        if name.as_deref() == Some("file") {
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(format!("Invalid upload: {e}")))?;
            pdf = Some(data);
        }
    }
    let pdf = pdf.ok_or_else(|| ApiError::bad_request("No PDF file was attached."))?;
    tracing::info!("Received upload of {} bytes", pdf.len());

    // Resolve the session before extracting so a bad id fails fast.
    let (id, handle) = match params.session_id {
        Some(id) => (id, lookup(&state, id).await?),
        None => state.sessions.create().await,
    };

    let text_source = state.text_source.clone();
    let context =
        tokio::task::spawn_blocking(move || DocumentContext::load(text_source.as_ref(), &pdf))
            .await
            .map_err(|e| ApiError::internal(format!("PDF extraction task failed: {e}")))?;

    let mut session = handle.lock().await;
    state.pipeline.load_document(&mut session, context);

    let mut response = ActionResponse::new(id, &session);
    response.notices.push(Notice::success("PDF Analyzed!"));
    Ok(Json(response))
}

async fn session_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ApiError> {
    let handle = lookup(&state, id).await?;
    let session = handle.lock().await;
    Ok(Json(SessionView::new(id, &session)))
}

async fn ask_question(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let handle = lookup(&state, id).await?;
    // Held for the whole action: one action per session at a time.
    let mut session = handle.lock().await;

    let result = state.pipeline.ask_question(&mut session).await;

    let mut response = ActionResponse::new(id, &session);
    let status = match result {
        Ok(outcome) => {
            response.question = Some(outcome.question);
            response.attach_speech(outcome.speech);
            StatusCode::OK
        }
        Err(e) => {
            tracing::warn!("Ask question failed for session {}: {}", id, e);
            response.notices.push(e.notice());
            status_for(&e)
        }
    };
    Ok((status, Json(response)).into_response())
}

async fn answer_with_voice(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let handle = lookup(&state, id).await?;
    let mut session = handle.lock().await;

    let result = state.pipeline.answer_with_voice(&mut session).await;

    let mut response = ActionResponse::new(id, &session);
    let status = match result {
        Ok(outcome) => {
            response
                .notices
                .push(Notice::info(format!("You said: {}", outcome.transcript)));
            response.transcript = Some(outcome.transcript);
            response.feedback = Some(outcome.feedback);
            response.attach_speech(outcome.speech);
            StatusCode::OK
        }
        Err(e) => {
            tracing::warn!("Voice answer failed for session {}: {}", id, e);
            response.notices.push(e.notice());
            status_for(&e)
        }
    };
    Ok((status, Json(response)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use mindflow_core::{CaptureError, CompletionClient, CompletionError, SpeechInput, SpeechOutput};
    use mindflow_core::prompts::QUESTION_SYSTEM_PROMPT;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;
    use tower::ServiceExt;

    const BOUNDARY: &str = "mindflow-test-boundary";

    struct FixedPages(Vec<&'static str>);

    impl TextSource for FixedPages {
        fn extract(&self, _bytes: &[u8]) -> Vec<String> {
            self.0.iter().map(|p| p.to_string()).collect()
        }
    }

    /// Answers the question prompt and the feedback prompt with fixed text.
    struct ScriptedTeacher;

    #[async_trait]
    impl CompletionClient for ScriptedTeacher {
        async fn complete(&self, system: &str, _user: &str) -> Result<String, CompletionError> {
            if system == QUESTION_SYSTEM_PROMPT {
                Ok("What is the capital of France?".to_string())
            } else {
                Ok("Correct!".to_string())
            }
        }
    }

    struct BrokenTeacher;

    #[async_trait]
    impl CompletionClient for BrokenTeacher {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String, CompletionError> {
            Err(CompletionError::Api {
                status: 401,
                message: "No auth credentials found".to_string(),
            })
        }
    }

    /// Holds every completion until released, counting how many overlap.
    #[derive(Clone, Default)]
    struct GatedTeacher {
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl CompletionClient for GatedTeacher {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String, CompletionError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.entered.notify_one();
            self.release.notified().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok("Why is the sky blue?".to_string())
        }
    }

    struct Ear(Option<&'static str>);

    #[async_trait]
    impl SpeechInput for Ear {
        async fn listen(&self) -> Result<String, CaptureError> {
            self.0.map(str::to_owned).ok_or(CaptureError::NoSpeech)
        }
    }

    struct Voice {
        fail: bool,
    }

    #[async_trait]
    impl SpeechOutput for Voice {
        async fn synthesize(&self, _text: &str) -> Result<AudioClip, SpeechError> {
            if self.fail {
                Err(SpeechError::Status {
                    status: 503,
                    chunk: 0,
                })
            } else {
                Ok(AudioClip::mp3(vec![0xff, 0xf3]))
            }
        }
    }

    fn app_with(
        completion: impl CompletionClient + 'static,
        heard: Option<&'static str>,
        voice_fails: bool,
        pages: Vec<&'static str>,
    ) -> Router {
        let pipeline = StudyPipeline::new(
            Arc::new(completion),
            Arc::new(Ear(heard)),
            Arc::new(Voice { fail: voice_fails }),
        );
        let state = AppState {
            pipeline: Arc::new(pipeline),
            text_source: Arc::new(FixedPages(pages)),
            sessions: SessionRegistry::new(),
        };
        router(state, 1024 * 1024)
    }

    fn app() -> Router {
        app_with(
            ScriptedTeacher,
            Some("Paris"),
            false,
            vec!["Paris is the capital of France."],
        )
    }

    fn upload_request(uri: &str) -> Request<Body> {
        let body = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"notes.pdf\"\r\n\
             Content-Type: application/pdf\r\n\r\n\
             %PDF-1.4 not really a pdf\r\n\
             --{BOUNDARY}--\r\n"
        );
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn post(uri: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn upload(app: &Router) -> String {
        let (status, body) = send(app, upload_request("/api/documents")).await;
        assert_eq!(status, StatusCode::OK);
        body["session_id"].as_str().unwrap().to_string()
    }

    fn spawn_post(app: &Router, uri: String) -> tokio::task::JoinHandle<StatusCode> {
        let app = app.clone();
        tokio::spawn(async move { app.oneshot(post(uri)).await.unwrap().status() })
    }

    fn notice_levels(body: &Value) -> Vec<String> {
        body["notices"]
            .as_array()
            .unwrap()
            .iter()
            .map(|n| n["level"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn index_serves_the_page() {
        let response = app()
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let page = String::from_utf8_lossy(&bytes);
        assert!(page.contains("MindFlow: The PDF Teacher"));
        // Snow keeps falling and successes get balloons.
        assert!(page.contains("setInterval(() => snow("));
        assert!(page.contains("celebrate();"));
    }

    #[tokio::test]
    async fn upload_creates_ready_session() {
        let app = app();
        let (status, body) = send(&app, upload_request("/api/documents")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "ready");
        assert_eq!(body["context_chars"], 31);
        assert_eq!(body["pages"], 1);
        assert_eq!(body["notices"][0]["message"], "PDF Analyzed!");
    }

    #[tokio::test]
    async fn upload_without_text_still_becomes_ready() {
        let app = app_with(ScriptedTeacher, None, false, vec!["", ""]);
        let (status, body) = send(&app, upload_request("/api/documents")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "ready");
        assert_eq!(body["context_chars"], 0);
        assert_eq!(notice_levels(&body), vec!["success"]);
    }

    #[tokio::test]
    async fn upload_without_file_is_rejected() {
        let app = app();
        let body = format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"other\"\r\n\r\nx\r\n--{BOUNDARY}--\r\n");
        let request = Request::builder()
            .method("POST")
            .uri("/api/documents")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();

        let (status, body) = send(&app, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(notice_levels(&body), vec!["error"]);
    }

    #[tokio::test]
    async fn ask_then_answer_flow() {
        let app = app();
        let id = upload(&app).await;

        let (status, body) = send(&app, post(format!("/api/sessions/{id}/question"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "asked");
        assert_eq!(body["question"], "What is the capital of France?");
        assert_eq!(body["pending_question"], "What is the capital of France?");
        assert_eq!(body["audio"], "data:audio/mpeg;base64,//M=");

        let (status, body) = send(&app, post(format!("/api/sessions/{id}/answer"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "answered");
        assert_eq!(body["transcript"], "Paris");
        assert_eq!(body["feedback"], "Correct!");
        assert_eq!(body["notices"][0]["message"], "You said: Paris");
    }

    #[tokio::test]
    async fn answer_before_question_is_a_warning() {
        let app = app();
        let id = upload(&app).await;

        let (status, body) = send(&app, post(format!("/api/sessions/{id}/answer"))).await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["state"], "ready");
        assert_eq!(body["notices"][0]["level"], "warning");
        assert_eq!(body["notices"][0]["message"], "Click 'Ask Question' first!");
    }

    #[tokio::test]
    async fn unheard_answer_keeps_question_pending() {
        let app = app_with(
            ScriptedTeacher,
            None,
            false,
            vec!["Paris is the capital of France."],
        );
        let id = upload(&app).await;
        send(&app, post(format!("/api/sessions/{id}/question"))).await;

        let (status, body) = send(&app, post(format!("/api/sessions/{id}/answer"))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "asked");
        assert!(body["feedback"].is_null());
        assert_eq!(body["notices"][0]["message"], "Couldn't hear you. Try again!");
    }

    #[tokio::test]
    async fn completion_failure_is_reported_as_error() {
        let app = app_with(BrokenTeacher, Some("Paris"), false, vec!["text"]);
        let id = upload(&app).await;

        let (status, body) = send(&app, post(format!("/api/sessions/{id}/question"))).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["state"], "ready");
        assert!(body["question"].is_null());
        assert_eq!(body["notices"][0]["level"], "error");
        assert!(
            body["notices"][0]["message"]
                .as_str()
                .unwrap()
                .contains("No auth credentials found")
        );
    }

    #[tokio::test]
    async fn speech_failure_still_shows_question() {
        let app = app_with(ScriptedTeacher, Some("Paris"), true, vec!["text"]);
        let id = upload(&app).await;

        let (status, body) = send(&app, post(format!("/api/sessions/{id}/question"))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "asked");
        assert_eq!(body["question"], "What is the capital of France?");
        assert!(body["audio"].is_null());
        assert!(
            body["notices"][0]["message"]
                .as_str()
                .unwrap()
                .starts_with("TTS Error:")
        );
    }

    #[tokio::test]
    async fn reupload_into_session_resets_it() {
        let app = app();
        let id = upload(&app).await;
        send(&app, post(format!("/api/sessions/{id}/question"))).await;

        let (status, body) = send(
            &app,
            upload_request(&format!("/api/documents?session_id={id}")),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["session_id"], id.as_str());
        assert_eq!(body["state"], "ready");
        assert!(body["pending_question"].is_null());
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let app = app();
        let id = Uuid::new_v4();

        let (status, body) = send(&app, post(format!("/api/sessions/{id}/question"))).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["notices"][0]["level"], "error");
    }

    #[tokio::test]
    async fn status_reports_session_snapshot() {
        let app = app();
        let id = upload(&app).await;

        let request = Request::get(format!("/api/sessions/{id}"))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "ready");
        assert!(body["pending_question"].is_null());
    }

    #[tokio::test]
    async fn actions_on_one_session_run_one_at_a_time() {
        // Arrange
        let teacher = GatedTeacher::default();
        let app = app_with(teacher.clone(), None, false, vec!["text"]);
        let id = upload(&app).await;

        // Act
        let first = spawn_post(&app, format!("/api/sessions/{id}/question"));
        teacher.entered.notified().await;
        let second = spawn_post(&app, format!("/api/sessions/{id}/question"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Assert
        assert_eq!(teacher.in_flight.load(Ordering::SeqCst), 1);
        teacher.release.notify_one();
        assert_eq!(first.await.unwrap(), StatusCode::OK);

        teacher.entered.notified().await;
        teacher.release.notify_one();
        assert_eq!(second.await.unwrap(), StatusCode::OK);
        assert_eq!(teacher.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_sessions_do_not_wait_on_each_other() {
        // Arrange
        let teacher = GatedTeacher::default();
        let app = app_with(teacher.clone(), None, false, vec!["text"]);
        let busy = upload(&app).await;
        let other = upload(&app).await;

        // Act
        let first = spawn_post(&app, format!("/api/sessions/{busy}/question"));
        teacher.entered.notified().await;
        let second = spawn_post(&app, format!("/api/sessions/{other}/question"));
        let reached = tokio::time::timeout(Duration::from_secs(1), teacher.entered.notified()).await;

        // Assert
        assert!(reached.is_ok(), "second session was blocked by the first");
        assert_eq!(teacher.in_flight.load(Ordering::SeqCst), 2);
        teacher.release.notify_waiters();
        assert_eq!(first.await.unwrap(), StatusCode::OK);
        assert_eq!(second.await.unwrap(), StatusCode::OK);
        assert_eq!(teacher.peak.load(Ordering::SeqCst), 2);
    }
}
