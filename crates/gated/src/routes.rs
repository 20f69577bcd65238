use crate::error::{panic_response, RequestError};
use crate::handler::{ImageUpload, RecognitionHandler, RecognitionResponse};
use crate::supervisor::BrokerLink;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

const IMAGE_FIELD: &str = "image";

/// Shared state for HTTP handlers.
pub struct AppState {
    pub handler: RecognitionHandler,
    pub broker: Arc<dyn BrokerLink>,
    pub controller_url: String,
    pub gallery_size: usize,
}

pub fn router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/face-recognition", post(face_recognition))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// POST /face-recognition, multipart field `image`.
async fn face_recognition(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<RecognitionResponse>, RequestError> {
    let upload = match multipart {
        Ok(multipart) => read_image_field(multipart).await?,
        Err(rejection) => {
            tracing::debug!(%rejection, "request is not multipart");
            None
        }
    };
    state.handler.handle(upload).await.map(Json)
}

/// First field named `image`; other fields are ignored.
async fn read_image_field(mut multipart: Multipart) -> Result<Option<ImageUpload>, RequestError> {
    while let Some(field) = multipart.next_field().await.map_err(upload_error)? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let file_name = field.file_name().map(str::to_owned);
        let data = field.bytes().await.map_err(upload_error)?;
        return Ok(Some(ImageUpload { file_name, data }));
    }
    Ok(None)
}

fn upload_error(e: MultipartError) -> RequestError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        RequestError::PayloadTooLarge
    } else {
        RequestError::MalformedUpload(e.body_text())
    }
}

/// GET /health
async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "broker": state.broker.state().as_str(),
        "controller": state.controller_url,
        "gallery_size": state.gallery_size,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::ActuationDispatcher;
    use crate::config::ControllerSettings;
    use crate::engine::spawn_engine;
    use crate::supervisor::ConnectionState;
    use crate::testutil::{
        multipart_body, png_bytes, stub_controller, ControllerBehavior, ControllerStub,
        RecordingBroker, ScriptedClassifier, BOUNDARY,
    };
    use axum::body::Body;
    use axum::http::{header, Request};
    use gate_core::{ClassifyError, IdentityOutcome};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tower::ServiceExt;

    struct Harness {
        app: Router,
        calls: Arc<AtomicUsize>,
        broker: Arc<RecordingBroker>,
        controller: ControllerStub,
    }

    async fn harness(
        answer: Result<IdentityOutcome, ClassifyError>,
        broker_state: ConnectionState,
    ) -> Harness {
        let (classifier, calls) = ScriptedClassifier::new(answer);
        harness_with(classifier, calls, broker_state).await
    }

    async fn harness_with(
        classifier: ScriptedClassifier,
        calls: Arc<AtomicUsize>,
        broker_state: ConnectionState,
    ) -> Harness {
        let engine = spawn_engine(move || Ok(classifier)).await.unwrap();
        let broker = RecordingBroker::new(broker_state);
        let controller = stub_controller(ControllerBehavior::Ok).await;
        let settings = ControllerSettings {
            url: controller.url.clone(),
            timeout_secs: 5,
        };
        let dispatcher = ActuationDispatcher::new(broker.clone(), "esp32/door", &settings).unwrap();

        let state = Arc::new(AppState {
            handler: RecognitionHandler::new(engine, Arc::new(dispatcher)),
            broker: broker.clone(),
            controller_url: controller.url.clone(),
            gallery_size: 3,
        });

        Harness {
            app: router(state, 1024 * 1024),
            calls,
            broker,
            controller,
        }
    }

    fn upload_request(body: Vec<u8>) -> Request<Body> {
        Request::post("/face-recognition")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_recognized_face_opens_door_on_both_channels() {
        let h = harness(Ok(IdentityOutcome::Matched("alice".into())), ConnectionState::Connected).await;

        let (status, body) = send(
            h.app,
            upload_request(multipart_body("image", "alice.png", &png_bytes())),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            serde_json::json!({"status": "success", "match": "alice", "message": "Visage reconnu"})
        );
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.broker.published(), vec![("esp32/door".to_string(), b"OPEN".to_vec())]);
        let requests = h.controller.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].body["name"], "alice");
        assert_eq!(requests[0].body["status"], "success");
    }

    #[tokio::test]
    async fn test_no_face_makes_no_outbound_calls() {
        let h = harness(Ok(IdentityOutcome::NoFaceFound), ConnectionState::Connected).await;

        let (status, body) = send(
            h.app,
            upload_request(multipart_body("image", "empty-room.png", &png_bytes())),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            serde_json::json!({
                "status": "success",
                "match": "no_persons_found",
                "message": "Visage non reconnu"
            })
        );
        assert!(h.broker.published().is_empty());
        assert!(h.controller.requests().is_empty());
    }

    #[tokio::test]
    async fn test_broker_down_still_succeeds_over_http() {
        let h = harness(Ok(IdentityOutcome::Matched("alice".into())), ConnectionState::Disconnected).await;

        let (status, body) = send(
            h.app,
            upload_request(multipart_body("image", "alice.png", &png_bytes())),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert!(h.broker.published().is_empty());
        assert_eq!(h.controller.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_image_field_is_bad_request() {
        let h = harness(Ok(IdentityOutcome::Matched("alice".into())), ConnectionState::Connected).await;

        let (status, body) = send(
            h.app,
            upload_request(multipart_body("photo", "alice.png", &png_bytes())),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, serde_json::json!({"status": "error", "message": "Aucune image fournie"}));
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_image_part_without_filename_is_missing_image() {
        let h = harness(Ok(IdentityOutcome::Matched("alice".into())), ConnectionState::Connected).await;

        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(&png_bytes());
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        let (status, body) = send(h.app, upload_request(body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, serde_json::json!({"status": "error", "message": "Aucune image fournie"}));
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
        assert!(h.controller.requests().is_empty());
    }

    #[tokio::test]
    async fn test_non_multipart_is_bad_request() {
        let h = harness(Ok(IdentityOutcome::Matched("alice".into())), ConnectionState::Connected).await;

        let request = Request::post("/face-recognition")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let (status, body) = send(h.app, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_and_undecodable_images_are_bad_requests() {
        let h = harness(Ok(IdentityOutcome::Matched("alice".into())), ConnectionState::Connected).await;

        let (status, body) = send(
            h.app.clone(),
            upload_request(multipart_body("image", "empty.png", b"")),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Image vide");

        let (status, body) = send(
            h.app,
            upload_request(multipart_body("image", "garbage.png", b"\x00\x01\x02 not a picture")),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Impossible de décoder l'image");
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
        assert!(h.controller.requests().is_empty());
    }

    #[tokio::test]
    async fn test_classification_error_is_server_error() {
        let h = harness(
            Err(ClassifyError::Embedder("service down".into())),
            ConnectionState::Connected,
        )
        .await;

        let (status, body) = send(
            h.app,
            upload_request(multipart_body("image", "alice.png", &png_bytes())),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], "error");
        assert_eq!(body["match"], "error");
        assert!(h.broker.published().is_empty());
        assert!(h.controller.requests().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_upload_is_rejected() {
        let h = harness(Ok(IdentityOutcome::Matched("alice".into())), ConnectionState::Connected).await;

        let huge = vec![0u8; 2 * 1024 * 1024];
        let (status, body) = send(
            h.app,
            upload_request(multipart_body("image", "huge.png", &huge)),
        )
        .await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["status"], "error");
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_client_hangup_does_not_cancel_actuation() {
        let (classifier, calls) =
            ScriptedClassifier::new(Ok(IdentityOutcome::Matched("alice".into())));
        let h = harness_with(
            classifier.with_delay(Duration::from_millis(800)),
            calls,
            ConnectionState::Connected,
        )
        .await;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = h.app;
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let body = multipart_body("image", "alice.png", &png_bytes());
        let head = format!(
            "POST /face-recognition HTTP/1.1\r\n\
             Host: {addr}\r\n\
             Content-Type: multipart/form-data; boundary={BOUNDARY}\r\n\
             Content-Length: {}\r\n\r\n",
            body.len()
        );
        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
        client.write_all(head.as_bytes()).await.unwrap();
        client.write_all(&body).await.unwrap();

        // Hang up while the classifier is still busy.
        tokio::time::sleep(Duration::from_millis(200)).await;
        drop(client);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.broker.published().len(), 1);
        assert_eq!(h.controller.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_health_reports_broker_state() {
        let h = harness(Ok(IdentityOutcome::NoFaceFound), ConnectionState::Disconnected).await;

        let request = Request::get("/health").body(Body::empty()).unwrap();
        let (status, body) = send(h.app, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["broker"], "disconnected");
        assert_eq!(body["gallery_size"], 3);
        assert_eq!(body["controller"], h.controller.url.as_str());
    }
}
