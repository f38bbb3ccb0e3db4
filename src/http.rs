//! HTTP API for the readability study
//!
//! ## Participant API
//! - `GET  /api/health` - Health check with row counts
//! - `POST /api/participant` - Register a participant
//! - `POST /api/session` - Open a study session
//! - `POST /api/calibration`, `/api/accuracy`, `/api/quiz-response`,
//!   `/api/gaze-point`, `/api/reading-event` - Append telemetry
//! - `GET  /api/study-text?version=X` - Active content bundle
//! - `GET  /api/quiz-questions?study_text_id=Y` - Questions for a version
//!
//! ## Admin API (unauthenticated)
//! - `/api/admin/study-text` - `GET` list or `?id=`, `POST`, `PUT ?id=`
//! - `/api/admin/passage` - `GET` list, `?id=` or `?study_text_id=`,
//!   `POST`, `PUT ?id=`, `DELETE ?id=`
//! - `/api/admin/quiz-question` - same modes as passage
//!
//! ## Example Usage
//!
//! ```bash
//! curl -X POST -d '{"source":"prolific"}' http://localhost:8080/api/participant
//! curl -X POST -d '{"participant_id":1}' http://localhost:8080/api/session
//! curl http://localhost:8080/api/study-text
//! ```

use crate::db::telemetry::TelemetryKind;
use crate::db::{
    CreateParticipantInput, CreatePassageInput, CreateQuizQuestionInput, CreateSessionInput,
    CreateStudyTextInput, DbStats, PassagePatch, QuizQuestionPatch, StudyTextPatch,
};
use crate::error::StorageError;
use crate::services::content_service::PublicQuestionList;
use crate::services::response::{
    created, error_response, from_create_result, from_delete_bool_result, from_result,
    method_not_allowed, not_found, ok, preflight_response, with_cors,
};
use crate::services::Services;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::http::request::Parts;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Method, Request, Response};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Paths the router knows, used to tell 405 from 404
const KNOWN_PATHS: &[&str] = &[
    "/api/health",
    "/api/participant",
    "/api/session",
    "/api/calibration",
    "/api/accuracy",
    "/api/quiz-response",
    "/api/gaze-point",
    "/api/reading-event",
    "/api/study-text",
    "/api/quiz-questions",
    "/api/admin/study-text",
    "/api/admin/passage",
    "/api/admin/quiz-question",
];

/// Lookup parameters shared by the GET/PUT/DELETE routes
#[derive(Debug, Default, Deserialize)]
struct LookupQuery {
    id: Option<i64>,
    study_text_id: Option<i64>,
    version: Option<String>,
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    #[serde(flatten)]
    stats: DbStats,
}

/// HTTP server state
pub struct HttpServer {
    services: Arc<Services>,
    bind_addr: SocketAddr,
    allowed_origins: Vec<String>,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(services: Arc<Services>, bind_addr: SocketAddr) -> Self {
        Self {
            services,
            bind_addr,
            allowed_origins: Vec::new(),
        }
    }

    /// Origins allowed to read responses cross-site
    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = origins;
        self
    }

    /// Run the HTTP server
    pub async fn run(self: Arc<Self>) -> Result<(), StorageError> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "HTTP server listening");

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { server.handle_request(req).await }
                });

                if let Err(err) = http1::Builder::new()
                    .serve_connection(io, service)
                    .await
                {
                    warn!(addr = %remote_addr, error = %err, "Connection error");
                }
            });
        }
    }

    /// Route a request and attach CORS headers
    pub async fn handle_request<B>(&self, req: Request<B>) -> Result<Response<Full<Bytes>>, Infallible>
    where
        B: Body,
        B::Error: Display,
    {
        let (parts, body) = req.into_parts();
        let origin = parts
            .headers
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        debug!(method = %parts.method, path = %parts.uri.path(), "Incoming request");

        let response = self.route(&parts, body).await;

        if response.status().is_server_error() {
            error!(method = %parts.method, path = %parts.uri.path(), status = %response.status(), "Request failed");
        }

        Ok(with_cors(response, origin.as_deref(), &self.allowed_origins))
    }

    async fn route<B>(&self, parts: &Parts, body: B) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Display,
    {
        let path = parts.uri.path();

        match (&parts.method, path) {
            (&Method::OPTIONS, _) => preflight_response(),

            (&Method::GET, "/api/health") => self.handle_health(),

            // Session registry
            (&Method::POST, "/api/participant") => match read_json(body).await {
                Ok(input) => self.handle_create_participant(input),
                Err(e) => error_response(e),
            },
            (&Method::POST, "/api/session") => match read_json(body).await {
                Ok(input) => self.handle_create_session(input),
                Err(e) => error_response(e),
            },

            // Telemetry ledger
            (&Method::POST, "/api/calibration") => self.handle_telemetry(TelemetryKind::Calibration, body).await,
            (&Method::POST, "/api/accuracy") => self.handle_telemetry(TelemetryKind::Accuracy, body).await,
            (&Method::POST, "/api/quiz-response") => self.handle_telemetry(TelemetryKind::QuizResponse, body).await,
            (&Method::POST, "/api/gaze-point") => self.handle_telemetry(TelemetryKind::GazePoint, body).await,
            (&Method::POST, "/api/reading-event") => self.handle_telemetry(TelemetryKind::ReadingEvent, body).await,

            // Participant-facing content
            (&Method::GET, "/api/study-text") => match parse_query(parts) {
                Ok(query) => from_result(self.services.content.get_active_version(query.version.as_deref())),
                Err(e) => error_response(e),
            },
            (&Method::GET, "/api/quiz-questions") => match parse_query(parts) {
                Ok(query) => from_result(
                    self.services
                        .content
                        .list_questions_for_version(query.study_text_id)
                        .map(PublicQuestionList::from),
                ),
                Err(e) => error_response(e),
            },

            // Admin: study text versions
            (&Method::GET, "/api/admin/study-text") => match parse_query(parts).map(|q| q.id) {
                Ok(Some(id)) => from_result(self.services.content.get_version(id)),
                Ok(None) => from_result(self.services.content.list_versions()),
                Err(e) => error_response(e),
            },
            (&Method::POST, "/api/admin/study-text") => {
                match read_json::<CreateStudyTextInput, _>(body).await {
                    Ok(input) => match self.services.content.create_version(input) {
                        Ok(outcome) if outcome.created => created(&outcome),
                        Ok(outcome) => ok(&outcome),
                        Err(e) => error_response(e),
                    },
                    Err(e) => error_response(e),
                }
            }
            (&Method::PUT, "/api/admin/study-text") => match (require_id(parts), read_json::<StudyTextPatch, _>(body).await) {
                (Ok(id), Ok(patch)) => from_result(self.services.content.update_version(id, patch)),
                (Err(e), _) | (_, Err(e)) => error_response(e),
            },

            // Admin: passages
            (&Method::GET, "/api/admin/passage") => match parse_query(parts).map(|q| (q.id, q.study_text_id)) {
                Ok((Some(id), _)) => from_result(self.services.content.get_passage(id)),
                Ok((None, Some(study_text_id))) => from_result(self.services.content.list_passages(study_text_id)),
                Ok((None, None)) => from_result(self.services.content.list_all_passages()),
                Err(e) => error_response(e),
            },
            (&Method::POST, "/api/admin/passage") => match read_json::<CreatePassageInput, _>(body).await {
                Ok(input) => from_create_result(self.services.content.create_passage(input)),
                Err(e) => error_response(e),
            },
            (&Method::PUT, "/api/admin/passage") => match (require_id(parts), read_json::<PassagePatch, _>(body).await) {
                (Ok(id), Ok(patch)) => from_result(self.services.content.update_passage(id, patch)),
                (Err(e), _) | (_, Err(e)) => error_response(e),
            },
            (&Method::DELETE, "/api/admin/passage") => match require_id(parts) {
                Ok(id) => from_delete_bool_result(
                    self.services.content.delete_passage(id),
                    &format!("passage {} not found", id),
                ),
                Err(e) => error_response(e),
            },

            // Admin: quiz questions
            (&Method::GET, "/api/admin/quiz-question") => match parse_query(parts).map(|q| (q.id, q.study_text_id)) {
                Ok((Some(id), _)) => from_result(self.services.content.get_question(id)),
                Ok((None, Some(study_text_id))) => {
                    from_result(self.services.content.list_questions_for_version(Some(study_text_id)))
                }
                Ok((None, None)) => from_result(self.services.content.list_all_questions()),
                Err(e) => error_response(e),
            },
            (&Method::POST, "/api/admin/quiz-question") => match read_json::<CreateQuizQuestionInput, _>(body).await {
                Ok(input) => from_create_result(self.services.content.create_question(input)),
                Err(e) => error_response(e),
            },
            (&Method::PUT, "/api/admin/quiz-question") => match (require_id(parts), read_json::<QuizQuestionPatch, _>(body).await) {
                (Ok(id), Ok(patch)) => from_result(self.services.content.update_question(id, patch)),
                (Err(e), _) | (_, Err(e)) => error_response(e),
            },
            (&Method::DELETE, "/api/admin/quiz-question") => match require_id(parts) {
                Ok(id) => from_delete_bool_result(
                    self.services.content.delete_question(id),
                    &format!("quiz question {} not found", id),
                ),
                Err(e) => error_response(e),
            },

            // Study texts are never deleted, so DELETE lands here too
            (_, p) if KNOWN_PATHS.contains(&p) => method_not_allowed(),

            (_, p) => not_found(&format!("no route for {}", p)),
        }
    }

    /// Health check endpoint
    fn handle_health(&self) -> Response<Full<Bytes>> {
        match self.services.content.stats() {
            Ok(stats) => ok(&HealthBody { status: "ok", stats }),
            Err(e) => error_response(e),
        }
    }

    fn handle_create_participant(&self, input: CreateParticipantInput) -> Response<Full<Bytes>> {
        match self.services.sessions.create_participant(input) {
            Ok(row) => created(&serde_json::json!({
                "success": true,
                "id": row.id,
                "source": row.source,
            })),
            Err(e) => error_response(e),
        }
    }

    fn handle_create_session(&self, input: CreateSessionInput) -> Response<Full<Bytes>> {
        match self.services.sessions.create_session(input) {
            Ok(row) => created(&serde_json::json!({
                "success": true,
                "id": row.id,
                "session_id": row.session_id,
            })),
            Err(e) => error_response(e),
        }
    }

    async fn handle_telemetry<B>(&self, kind: TelemetryKind, body: B) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Display,
    {
        let bytes = match read_body(body).await {
            Ok(bytes) => bytes,
            Err(e) => return error_response(e),
        };

        let telemetry = &self.services.telemetry;
        let result = match kind {
            TelemetryKind::Calibration => parse_json(&bytes).and_then(|i| telemetry.record_calibration(i)),
            TelemetryKind::Accuracy => parse_json(&bytes).and_then(|i| telemetry.record_accuracy(i)),
            TelemetryKind::QuizResponse => parse_json(&bytes).and_then(|i| telemetry.record_quiz_response(i)),
            TelemetryKind::GazePoint => parse_json(&bytes).and_then(|i| telemetry.record_gaze_point(i)),
            TelemetryKind::ReadingEvent => parse_json(&bytes).and_then(|i| telemetry.record_reading_event(i)),
        };

        match result {
            Ok(id) => created(&serde_json::json!({ "success": true, "id": id })),
            Err(e) => error_response(e),
        }
    }
}

fn parse_query(parts: &Parts) -> Result<LookupQuery, StorageError> {
    match parts.uri.query() {
        Some(q) => serde_urlencoded::from_str(q)
            .map_err(|e| StorageError::InvalidInput(format!("Invalid query string: {}", e))),
        None => Ok(LookupQuery::default()),
    }
}

fn require_id(parts: &Parts) -> Result<i64, StorageError> {
    parse_query(parts)?
        .id
        .ok_or_else(|| StorageError::InvalidInput("id query parameter is required".into()))
}

async fn read_body<B>(body: B) -> Result<Bytes, StorageError>
where
    B: Body,
    B::Error: Display,
{
    let collected = body
        .collect()
        .await
        .map_err(|e| StorageError::InvalidInput(format!("Failed to read body: {}", e)))?;
    Ok(collected.to_bytes())
}

fn parse_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    serde_json::from_slice(bytes).map_err(|e| StorageError::InvalidInput(format!("Invalid JSON: {}", e)))
}

async fn read_json<T, B>(body: B) -> Result<T, StorageError>
where
    T: DeserializeOwned,
    B: Body,
    B::Error: Display,
{
    let bytes = read_body(body).await?;
    parse_json(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::StudyDb;
    use crate::seed::seed_initial_data;
    use hyper::StatusCode;

    fn server() -> HttpServer {
        let db = Arc::new(StudyDb::open_in_memory().unwrap());
        seed_initial_data(&db).unwrap();
        let services = Arc::new(Services::new(db));
        HttpServer::new(services, "127.0.0.1:0".parse().unwrap())
            .with_allowed_origins(vec!["http://localhost:5173".to_string()])
    }

    fn request(method: Method, uri: &str, body: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::ORIGIN, "http://localhost:5173")
            .body(Full::new(Bytes::from(body.to_string())))
            .unwrap()
    }

    async fn send(server: &HttpServer, method: Method, uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
        let resp = server.handle_request(request(method, uri, body)).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_health_reports_counts() {
        let server = server();
        let (status, body) = send(&server, Method::GET, "/api/health", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["passages"], 6);
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let server = server();
        let (status, body) = send(&server, Method::POST, "/api/participant", "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("Invalid JSON"));

        let (status, _) = send(&server, Method::POST, "/api/session", r#"{"session_id":"x"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_method_and_path_errors() {
        let server = server();
        let (status, _) = send(&server, Method::DELETE, "/api/admin/study-text?id=1", "").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

        let (status, _) = send(&server, Method::GET, "/api/participant", "").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

        let (status, _) = send(&server, Method::GET, "/api/nope", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&server, Method::GET, "/api/admin/passage?id=abc", "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_query_ignored_on_routes_without_lookup() {
        let server = server();
        let (status, body) = send(&server, Method::POST, "/api/participant?id=abc", "{}").await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["success"], true);

        let (status, _) = send(&server, Method::GET, "/api/health?id=abc", "").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_switching_off_active_version_is_409() {
        let server = server();
        let (_, active) = send(&server, Method::GET, "/api/study-text", "").await;
        let uri = format!("/api/admin/study-text?id={}", active["id"]);

        let (status, _) = send(&server, Method::PUT, &uri, r#"{"active":false}"#).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, still) = send(&server, Method::GET, "/api/study-text", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(still["id"], active["id"]);
    }

    #[tokio::test]
    async fn test_preflight_and_cors_headers() {
        let server = server();
        let resp = server
            .handle_request(request(Method::OPTIONS, "/api/session", ""))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "http://localhost:5173"
        );
        assert!(resp.headers().contains_key("Access-Control-Allow-Methods"));
    }

    #[tokio::test]
    async fn test_study_text_create_is_idempotent_over_http() {
        let server = server();
        let (status, first) = send(&server, Method::POST, "/api/admin/study-text", r#"{"version":"v2"}"#).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(first["created"], true);
        assert_eq!(first["font_left"], "serif");

        let (status, second) = send(&server, Method::POST, "/api/admin/study-text", r#"{"version":"v2"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["created"], false);
        assert_eq!(second["id"], first["id"]);
    }

    #[tokio::test]
    async fn test_rename_conflict_is_409() {
        let server = server();
        let (_, v2) = send(&server, Method::POST, "/api/admin/study-text", r#"{"version":"v2"}"#).await;
        let uri = format!("/api/admin/study-text?id={}", v2["id"]);
        let (status, _) = send(&server, Method::PUT, &uri, r#"{"version":"default"}"#).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(&server, Method::PUT, "/api/admin/study-text", r#"{"active":true}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_passage_admin_lifecycle() {
        let server = server();
        let (_, active) = send(&server, Method::GET, "/api/study-text", "").await;
        let study_text_id = active["id"].as_i64().unwrap();

        let body = format!(r#"{{"study_text_id":{},"content":"Extra passage"}}"#, study_text_id);
        let (status, passage) = send(&server, Method::POST, "/api/admin/passage", &body).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(passage["order"], 6);

        let uri = format!("/api/admin/passage?id={}", passage["id"]);
        let (status, updated) = send(&server, Method::PUT, &uri, r#"{"title":"Bonus"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["title"], "Bonus");

        let (status, _) = send(&server, Method::DELETE, &uri, "").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&server, Method::DELETE, &uri, "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let uri = format!("/api/admin/passage?study_text_id={}", study_text_id);
        let (_, listed) = send(&server, Method::GET, &uri, "").await;
        assert_eq!(listed.as_array().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_telemetry_requires_known_session() {
        let server = server();
        let (status, _) = send(
            &server,
            Method::POST,
            "/api/gaze-point",
            r#"{"session_id":99,"x":1.5,"y":2.5}"#,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
