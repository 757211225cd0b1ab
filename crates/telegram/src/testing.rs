//! A fake Bot API server for tests.
//!
//! Every call is recorded with its body, JSON or multipart form fields alike.
//! `getUpdates` drains the queue
//! filled by [`MockTelegramApi::queue_update`].

use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};

use {
    axum::{
        Json, Router,
        extract::{FromRequest, Multipart, Request, State},
        http::header,
        routing::post,
    },
    serde_json::{Value, json},
    teloxide::Bot,
    tokio::{sync::oneshot, task::JoinHandle},
};

pub const MOCK_BOT_USERNAME: &str = "tobym_test_bot";

/// One recorded Bot API call.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    /// Method as it appears in the path, e.g. `SendMessage`.
    pub method: String,
    pub body: Value,
}

#[derive(Clone, Default)]
struct MockState {
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    updates: Arc<Mutex<VecDeque<Value>>>,
    next_message_id: Arc<AtomicI64>,
}

pub struct MockTelegramApi {
    addr: SocketAddr,
    state: MockState,
    shutdown: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<()>>,
}

impl MockTelegramApi {
    pub async fn start() -> Self {
        let state = MockState::default();
        state.next_message_id.store(1, Ordering::SeqCst);
        let app = Router::new()
            .route("/{*path}", post(telegram_api_handler))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap_or_else(|e| panic!("bind mock telegram api: {e}"));
        let addr = listener
            .local_addr()
            .unwrap_or_else(|e| panic!("mock telegram api addr: {e}"));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        Self {
            addr,
            state,
            shutdown: Some(shutdown_tx),
            server: Some(server),
        }
    }

    pub fn api_url(&self) -> url::Url {
        url::Url::parse(&format!("http://{}/", self.addr))
            .unwrap_or_else(|e| panic!("mock telegram api url: {e}"))
    }

    /// A bot client talking to this server.
    pub fn bot(&self) -> Bot {
        Bot::new("test-token").set_api_url(self.api_url())
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.state
            .requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Bodies of every call to `method`.
    pub fn calls(&self, method: &str) -> Vec<Value> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method)
            .map(|r| r.body)
            .collect()
    }

    /// Make `update` available to the next `getUpdates` call.
    pub fn queue_update(&self, update: Value) {
        self.state
            .updates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(update);
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(server) = self.server.take() {
            let _ = server.await;
        }
    }
}

impl Drop for MockTelegramApi {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

fn ok(result: Value) -> Json<Value> {
    Json(json!({ "ok": true, "result": result }))
}

/// The request body as JSON. Multipart forms become an object of their
/// fields, each parsed as JSON when it is JSON and kept as a string otherwise.
async fn request_body(request: Request) -> Value {
    let multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));
    if !multipart {
        return match axum::body::to_bytes(request.into_body(), usize::MAX).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or(Value::Null),
            Err(_) => Value::Null,
        };
    }

    let Ok(mut form) = Multipart::from_request(request, &()).await else {
        return Value::Null;
    };
    let mut fields = serde_json::Map::new();
    while let Ok(Some(field)) = form.next_field().await {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        let Ok(text) = field.text().await else {
            continue;
        };
        let value = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
        fields.insert(name, value);
    }
    Value::Object(fields)
}

async fn telegram_api_handler(State(state): State<MockState>, request: Request) -> Json<Value> {
    let method = request
        .uri()
        .path()
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string();
    let body = request_body(request).await;

    state
        .requests
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push(CapturedRequest {
            method: method.clone(),
            body: body.clone(),
        });

    match method.as_str() {
        "GetMe" => ok(json!({
            "id": 1,
            "is_bot": true,
            "first_name": "tobym",
            "username": MOCK_BOT_USERNAME,
            "can_join_groups": true,
            "can_read_all_group_messages": false,
            "supports_inline_queries": false,
            "can_connect_to_business": false,
            "has_main_web_app": false
        })),
        "SendMessage" | "EditMessageReplyMarkup" => {
            let chat_id = body["chat_id"].as_i64().unwrap_or_default();
            let message_id = match body["message_id"].as_i64() {
                Some(id) => id,
                None => state.next_message_id.fetch_add(1, Ordering::SeqCst),
            };
            ok(json!({
                "message_id": message_id,
                "date": 0,
                "chat": { "id": chat_id, "type": "private", "first_name": "peer" },
                "text": body["text"].as_str().unwrap_or("ok")
            }))
        },
        "GetUpdates" => {
            let drained: Vec<Value> = state
                .updates
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .drain(..)
                .collect();
            if drained.is_empty() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            ok(Value::Array(drained))
        },
        "GetWebhookInfo" => ok(json!({
            "url": "",
            "has_custom_certificate": false,
            "pending_update_count": 0
        })),
        _ => ok(Value::Bool(true)),
    }
}
