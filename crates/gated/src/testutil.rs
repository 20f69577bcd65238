//! Test doubles shared by the daemon's unit tests.

use crate::supervisor::{BrokerError, BrokerLink, ConnectionState};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use gate_core::{ClassifyError, IdentityClassifier, IdentityOutcome};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Classifier that always answers the same way and counts its calls.
pub struct ScriptedClassifier {
    answer: Result<IdentityOutcome, String>,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl ScriptedClassifier {
    pub fn new(answer: Result<IdentityOutcome, ClassifyError>) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let classifier = Self {
            answer: answer.map_err(|e| e.to_string()),
            delay: Duration::ZERO,
            calls: calls.clone(),
        };
        (classifier, calls)
    }

    /// Blocks the classifier thread this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl IdentityClassifier for ScriptedClassifier {
    fn classify(&mut self, _image: &DynamicImage) -> Result<IdentityOutcome, ClassifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.answer.clone().map_err(ClassifyError::Embedder)
    }
}

/// Broker link that records publishes instead of sending them.
pub struct RecordingBroker {
    state: ConnectionState,
    reject: bool,
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingBroker {
    pub fn new(state: ConnectionState) -> Arc<Self> {
        Arc::new(Self {
            state,
            reject: false,
            published: Mutex::new(Vec::new()),
        })
    }

    /// Reports `Connected` but rejects every publish.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            state: ConnectionState::Connected,
            reject: true,
            published: Mutex::new(Vec::new()),
        })
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().unwrap().clone()
    }
}

impl BrokerLink for RecordingBroker {
    fn state(&self) -> ConnectionState {
        self.state
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        if self.state != ConnectionState::Connected {
            return Err(BrokerError::Unavailable(self.state));
        }
        if self.reject {
            return Err(BrokerError::Unavailable(ConnectionState::Connecting));
        }
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.to_vec()));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ControllerBehavior {
    Ok,
    Status(u16),
    Hang(Duration),
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub content_type: Option<String>,
    pub accept_charset: Option<String>,
    pub body: serde_json::Value,
}

/// Door controller stand-in listening on loopback.
pub struct ControllerStub {
    pub url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl ControllerStub {
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

type StubState = (Arc<Mutex<Vec<RecordedRequest>>>, ControllerBehavior);

async fn controller_endpoint(
    State((requests, behavior)): State<StubState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let header_text = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    };
    requests.lock().unwrap().push(RecordedRequest {
        content_type: header_text(header::CONTENT_TYPE),
        accept_charset: header_text(header::ACCEPT_CHARSET),
        body: serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null),
    });

    match behavior {
        ControllerBehavior::Ok => (StatusCode::OK, "OK"),
        ControllerBehavior::Status(code) => (
            StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            "controller busy",
        ),
        ControllerBehavior::Hang(delay) => {
            tokio::time::sleep(delay).await;
            (StatusCode::OK, "late")
        }
    }
}

pub async fn stub_controller(behavior: ControllerBehavior) -> ControllerStub {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/face_recognition", post(controller_endpoint))
        .with_state((requests.clone(), behavior));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    ControllerStub {
        url: format!("http://{addr}/face_recognition"),
        requests,
    }
}

/// A small valid PNG.
pub fn png_bytes() -> Vec<u8> {
    let img = RgbImage::from_pixel(8, 8, Rgb([200, 150, 120]));
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
    out
}

pub const BOUNDARY: &str = "gate-test-boundary";

/// Multipart body with one file field.
pub fn multipart_body(field: &str, file_name: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}
