//! Integration test: start a mock family-health backend on a loopback port and drive
//! `HttpBackend` (and a full session) against it over real HTTP.

use axum::{
    extract::{Multipart, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parivar::api::{Attachment, AttachmentEndpoint, ChatEndpoint, HttpBackend, MemoryStore};
use parivar::message::{ConversationContext, Message, MessageLog, Sender};
use parivar::request::Outcome;
use parivar::session::{ChatSettings, Endpoints, SessionController, SessionUpdate};
use parivar::store::FileCache;
use parivar::sync::{LoadSource, Persistence};
use parivar::viewport::ViewportHost;
use parivar::TransportError;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TOKEN: &str = "secret";

#[derive(Clone, Default)]
struct Backend {
    writes: Arc<Mutex<Vec<Value>>>,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {}", TOKEN))
        .unwrap_or(false)
}

async fn chat(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let message = body.get("message").and_then(Value::as_str).unwrap_or("");
    let member = body.get("member").and_then(Value::as_str).unwrap_or("");
    match message {
        "boom" => (StatusCode::INTERNAL_SERVER_ERROR, "db down").into_response(),
        "plain" => "plain answer".into_response(),
        _ => Json(json!({ "reply": format!("{} asked: {}", member, message) })).into_response(),
    }
}

async fn memory_get(headers: HeaderMap, Query(q): Query<HashMap<String, String>>) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match q.get("member").map(String::as_str) {
        Some("Mom") => Json(json!({
            "messages": [
                { "sender": "user", "text": "bp reading?", "ts": 1 },
                { "sender": "ai", "text": "120/80 is normal", "ts": 2 }
            ]
        }))
        .into_response(),
        Some("Nobody") => StatusCode::NOT_FOUND.into_response(),
        _ => Json(json!({ "messages": [] })).into_response(),
    }
}

async fn memory_put(
    State(state): State<Backend>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    state.writes.lock().unwrap().push(body);
    Json(json!({ "ok": true })).into_response()
}

async fn upload(headers: HeaderMap, mut form: Multipart) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let mut size = 0;
    let mut file_name = String::new();
    let mut member = String::new();
    while let Ok(Some(field)) = form.next_field().await {
        match field.name() {
            Some("file") => {
                file_name = field.file_name().unwrap_or_default().to_string();
                size = field.bytes().await.map(|b| b.len()).unwrap_or(0);
            }
            Some("member") => member = field.text().await.unwrap_or_default(),
            _ => {}
        }
    }
    if member == "Quiet" {
        return Json(json!({})).into_response();
    }
    Json(json!({ "reply": format!("{} ({} bytes) for {}", file_name, size, member) }))
        .into_response()
}

async fn start_backend() -> (String, Backend) {
    let state = Backend::default();
    let app = Router::new()
        .route("/api/ai", post(chat))
        .route("/api/ai/memory", get(memory_get).post(memory_put))
        .route("/api/ai/attachments", post(upload))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind loopback");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{}", addr), state)
}

fn client(base_url: &str, token: Option<&str>) -> HttpBackend {
    HttpBackend::new(
        Some(base_url.to_string()),
        token.map(str::to_string),
        Duration::from_secs(5),
    )
    .expect("build client")
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

#[tokio::test]
async fn chat_replies_and_status_classification() {
    let (url, _) = start_backend().await;
    let backend = client(&url, Some(TOKEN));
    let mom = ConversationContext::from("Mom");

    let ok = Outcome::classify(backend.post(&mom, "fever?").await);
    assert_eq!(ok, Outcome::Delivered("Mom asked: fever?".to_string()));

    let raw = Outcome::classify(backend.post(&mom, "plain").await);
    assert_eq!(raw, Outcome::Delivered("plain answer".to_string()));

    let err = Outcome::classify(backend.post(&mom, "boom").await);
    assert_eq!(
        err,
        Outcome::ServerError {
            code: 500,
            body: "db down".to_string()
        }
    );

    let anonymous = client(&url, None);
    assert_eq!(
        anonymous.post(&mom, "hi").await,
        Err(TransportError::Unauthorized)
    );
}

#[tokio::test]
async fn memory_read_and_write() {
    let (url, state) = start_backend().await;
    let backend = client(&url, Some(TOKEN));

    let log = backend.get(&"Mom".into()).await.unwrap().expect("stored messages");
    assert_eq!(log.len(), 2);
    assert_eq!(log.messages()[1].sender, Sender::Assistant);

    assert_eq!(backend.get(&"Self".into()).await, Ok(None));
    assert!(matches!(
        backend.get(&"Nobody".into()).await,
        Err(TransportError::Status { code: 404, .. })
    ));
    assert_eq!(
        client(&url, None).get(&"Mom".into()).await,
        Err(TransportError::Unauthorized)
    );

    let log: MessageLog = vec![Message::user("hello")].into();
    backend.put(&"Dad".into(), &log).await.unwrap();
    let writes = state.writes.lock().unwrap().clone();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0]["member"], "Dad");
    assert_eq!(writes[0]["messages"][0]["sender"], "user");
    assert_eq!(writes[0]["messages"][0]["text"], "hello");
}

#[tokio::test]
async fn attachment_upload() {
    let (url, _) = start_backend().await;
    let backend = client(&url, Some(TOKEN));
    let attachment = Attachment {
        file_name: "rash.jpg".to_string(),
        bytes: vec![1, 2, 3, 4],
        preview_ref: "file:///tmp/rash.jpg".to_string(),
    };
    assert_eq!(
        backend.upload(&"Mom".into(), &attachment).await,
        Ok(Some("rash.jpg (4 bytes) for Mom".to_string()))
    );
    assert_eq!(backend.upload(&"Quiet".into(), &attachment).await, Ok(None));
    assert_eq!(
        client(&url, None).upload(&"Mom".into(), &attachment).await,
        Err(TransportError::Unauthorized)
    );
}

#[tokio::test]
async fn unreachable_backend_is_network_error() {
    let url = format!("http://127.0.0.1:{}", free_port());
    let backend = client(&url, Some(TOKEN));
    match backend.post(&"Self".into(), "hi").await {
        Err(TransportError::Network(_)) => {}
        other => panic!("expected network error, got {:?}", other),
    }
}

struct NullHost;

impl ViewportHost for NullHost {
    fn distance_from_bottom(&self) -> f32 {
        0.0
    }

    fn scroll_to_bottom(&mut self) {}
}

#[tokio::test]
async fn session_over_http_loads_remote_history_and_replies() {
    let (url, _) = start_backend().await;
    let backend = client(&url, Some(TOKEN));
    let cache_dir =
        std::env::temp_dir().join(format!("parivar-http-test-{}", uuid::Uuid::new_v4()));
    let persistence = Persistence::new(
        Arc::new(backend.clone()),
        Arc::new(FileCache::new(&cache_dir)),
    );
    let settings = ChatSettings {
        debounce: Duration::from_millis(20),
        initial_context: "Mom".into(),
        ..ChatSettings::default()
    };
    let mut session = SessionController::new(
        Endpoints::http(backend),
        persistence,
        settings,
        Box::new(NullHost),
    );

    assert_eq!(
        session.next_update().await,
        SessionUpdate::Loaded(LoadSource::Remote)
    );
    assert_eq!(session.log().len(), 2);

    session.send("dizzy");
    assert_eq!(session.next_update().await, SessionUpdate::Appended(3));
    assert_eq!(session.log().last().unwrap().text, "Mom asked: dizzy");

    session.flush().await;
    let cached = std::fs::read_to_string(FileCache::new(&cache_dir).path_for(&"Mom".into()))
        .expect("local mirror written");
    assert!(cached.contains("Mom asked: dizzy"));
    let _ = std::fs::remove_dir_all(cache_dir);
}
