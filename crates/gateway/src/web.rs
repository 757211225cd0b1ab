use std::sync::Arc;

use {
    axum::{
        Json, Router,
        body::Bytes,
        extract::{Path, State},
        http::{StatusCode, header},
        response::IntoResponse,
        routing::{get, post},
    },
    tobym_channels::{Error as ChannelError, UpdateTransport},
    tobym_telegram::WEBHOOK_PATH_PREFIX,
    tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer},
    tracing::{debug, warn},
};

use crate::lifecycle::Lifecycle;

const ROBOTS_TXT: &str = "User-agent: *\nDisallow: /\n";

#[derive(Clone)]
pub struct WebState {
    pub transport: Arc<dyn UpdateTransport>,
    pub lifecycle: Arc<Lifecycle>,
    pub version: Arc<str>,
}

/// Build the bot's HTTP router.
///
/// The webhook endpoint exists only for push transports. Plugin routers are
/// nested at their mount paths.
pub fn router(state: WebState, plugin_routes: Vec<(String, Router)>) -> Router {
    let mut router = Router::new()
        .route("/robots.txt", get(robots_handler))
        .route("/health", get(health_handler));
    if state.transport.push_secret().is_some() {
        router = router.route(
            &format!("{WEBHOOK_PATH_PREFIX}{{secret}}"),
            post(webhook_handler),
        );
    }

    let mut router = router.with_state(state);
    for (mount_path, routes) in plugin_routes {
        debug!(mount_path = %mount_path, "mounting plugin routes");
        router = router.nest(&mount_path, routes);
    }

    router
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}

async fn robots_handler() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], ROBOTS_TXT)
}

async fn health_handler(State(state): State<WebState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": state.version.as_ref(),
        "state": state.lifecycle.get().as_str(),
    }))
}

async fn webhook_handler(
    State(state): State<WebState>,
    Path(secret): Path<String>,
    body: Bytes,
) -> StatusCode {
    if state.transport.push_secret() != Some(secret.as_str()) {
        return StatusCode::NOT_FOUND;
    }
    match state.transport.accept_push(&body).await {
        Ok(()) => StatusCode::OK,
        Err(ChannelError::InvalidInput { message }) => {
            debug!(error = %message, "rejected pushed update");
            StatusCode::BAD_REQUEST
        },
        Err(e) => {
            warn!(error = %e, "failed to accept pushed update");
            StatusCode::SERVICE_UNAVAILABLE
        },
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        tobym_channels::{
            Chat, ChatId, ChatKind, Message, MessageId, Update, UpdateKind, testing::ManualTransport,
            update_channel,
        },
    };

    async fn serve(transport: Arc<ManualTransport>) -> std::net::SocketAddr {
        let app = router(
            WebState {
                transport,
                lifecycle: Arc::new(Lifecycle::new()),
                version: Arc::from("9.9.9"),
            },
            vec![(
                "/extra".to_string(),
                Router::new().route("/", get(|| async { "extra" })),
            )],
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn update() -> Update {
        Update {
            id: 3,
            kind: UpdateKind::Message(Message {
                id: MessageId(1),
                chat: Chat {
                    id: ChatId(1),
                    kind: ChatKind::Private,
                    title: None,
                },
                from: None,
                date: 0,
                text: Some("hi".into()),
                reply_to: None,
                forwarded_from_chat: false,
                has_photo: false,
            }),
        }
    }

    #[tokio::test]
    async fn static_routes() {
        let addr = serve(Arc::new(ManualTransport::new())).await;

        let robots = reqwest::get(format!("http://{addr}/robots.txt"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(robots, ROBOTS_TXT);

        let health: serde_json::Value = reqwest::get(format!("http://{addr}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");
        assert_eq!(health["version"], "9.9.9");
        assert_eq!(health["state"], "constructed");

        let extra = reqwest::get(format!("http://{addr}/extra"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(extra, "extra");
    }

    #[tokio::test]
    async fn webhook_not_mounted_for_pull_transports() {
        let addr = serve(Arc::new(ManualTransport::new())).await;
        let response = reqwest::Client::new()
            .post(format!("http://{addr}/_webhook/anything"))
            .body("{}")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn webhook_checks_secret_and_body() {
        let transport = Arc::new(ManualTransport::with_push_secret("s3cret"));
        let (sink, mut stream) = update_channel(4);
        transport.start(sink).await.unwrap();
        let addr = serve(Arc::clone(&transport)).await;
        let client = reqwest::Client::new();

        let wrong = client
            .post(format!("http://{addr}/_webhook/nope"))
            .body(serde_json::to_vec(&update()).unwrap())
            .send()
            .await
            .unwrap();
        assert_eq!(wrong.status(), 404);

        let bad = client
            .post(format!("http://{addr}/_webhook/s3cret"))
            .body("not json")
            .send()
            .await
            .unwrap();
        assert_eq!(bad.status(), 400);

        let ok = client
            .post(format!("http://{addr}/_webhook/s3cret"))
            .body(serde_json::to_vec(&update()).unwrap())
            .send()
            .await
            .unwrap();
        assert_eq!(ok.status(), 200);
        assert_eq!(stream.next().await.unwrap().id, 3);
    }
}
