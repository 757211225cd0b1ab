//! Per-chat bearer tokens that let external scripts post into a chat.
//!
//! `/notify_token` mints a token; `GET|POST /notify[/{format}]` with
//! `Authorization: Bearer <token>` delivers the text to the token's chat.

use std::sync::Arc;

use {
    async_trait::async_trait,
    axum::{
        Json, Router,
        body::Body,
        extract::{Path, Query, State},
        http::{HeaderMap, Method, StatusCode, header},
        response::{IntoResponse, Response},
        routing::any,
    },
    base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD},
    serde::{Deserialize, Serialize},
    serde_json::json,
    thiserror::Error,
    tobym_channels::{ChatId, Message, Outbound, OutgoingMessage, ParseMode, Update},
    tobym_store::{Record, Store},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    bundled::addressed_command,
    plugin::{CommandDescription, DescribeCommands, Outcome, Plugin, WebRoutes},
};

const COMMAND: &str = "notify_token";
const MOUNT_PATH: &str = "/notify";

/// Largest accepted notification body.
pub const MAX_BODY_BYTES: usize = 4096;

/// A token authorizing posts into one chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatToken {
    pub token: String,
    pub chat_id: ChatId,
}

impl Record for ChatToken {
    const BUCKET: &'static str = "notifier";

    fn key(&self) -> String {
        self.token.clone()
    }

    fn index(&self) -> Option<String> {
        Some(self.chat_id.to_string())
    }
}

/// 8 little-endian bytes of the chat id followed by a random UUID, base64url.
pub fn generate_token(chat_id: ChatId) -> String {
    let mut raw = Vec::with_capacity(24);
    raw.extend_from_slice(&chat_id.0.to_le_bytes());
    raw.extend_from_slice(uuid::Uuid::new_v4().as_bytes());
    URL_SAFE_NO_PAD.encode(raw)
}

#[derive(Clone)]
struct NotifyState {
    outbound: Arc<dyn Outbound>,
    store: Arc<Store>,
}

pub struct NotifierPlugin {
    state: NotifyState,
    app_url: String,
}

impl NotifierPlugin {
    pub fn new(outbound: Arc<dyn Outbound>, store: Arc<Store>, app_url: impl Into<String>) -> Self {
        Self {
            state: NotifyState { outbound, store },
            app_url: app_url.into(),
        }
    }

    async fn create(&self, msg: &Message) -> anyhow::Result<()> {
        let token = ChatToken {
            token: generate_token(msg.chat.id),
            chat_id: msg.chat.id,
        };
        self.state.store.save(&token).await?;
        info!(chat_id = %msg.chat.id, "notify token created");

        let app_url = self.app_url.trim_end_matches('/');
        let text = format!(
            "token: `{token}` created.\nExample usage `echo -n \"Hello 界\" | curl --data-binary @- -H \"Content-Type: text/plain; charset=utf-8\" -H \"Authorization: Bearer {token}\" \"{app_url}{MOUNT_PATH}\"`",
            token = token.token,
        );
        self.state
            .outbound
            .send(OutgoingMessage::text(msg.chat.id, text).parse_mode(ParseMode::Markdown))
            .await?;
        Ok(())
    }

    /// Revoke one token of this chat, or all of them when `token` is `None`.
    async fn revoke(&self, chat_id: ChatId, token: Option<&str>) -> anyhow::Result<&'static str> {
        let store = &self.state.store;
        match token {
            Some(token) => {
                let owned = store
                    .get::<ChatToken>(token)
                    .await?
                    .is_some_and(|t| t.chat_id == chat_id);
                if !owned {
                    return Ok("Not found");
                }
                store.delete::<ChatToken>(token).await?;
                Ok("Ok, token revoked")
            },
            None => {
                let removed = store
                    .delete_by_index::<ChatToken>(&chat_id.to_string())
                    .await?;
                debug!(chat_id = %chat_id, removed, "notify tokens revoked");
                Ok("Ok, all tokens revoked")
            },
        }
    }
}

#[async_trait]
impl Plugin for NotifierPlugin {
    fn name(&self) -> &str {
        "notifier"
    }

    async fn handle_update(
        &self,
        _cancel: &CancellationToken,
        update: &Update,
    ) -> anyhow::Result<Outcome> {
        let Some(msg) = update.message() else {
            return Ok(Outcome::Continue);
        };
        let args = match addressed_command(self.state.outbound.as_ref(), msg).await? {
            Some(cmd) if cmd.name == COMMAND => cmd.args,
            _ => return Ok(Outcome::Continue),
        };

        let mut words = args.split_whitespace();
        match (words.next(), words.next(), words.next()) {
            (None, ..) => self.create(msg).await?,
            (Some("revoke"), token, None) => match self.revoke(msg.chat.id, token).await {
                Ok(reply) => {
                    self.state
                        .outbound
                        .send(OutgoingMessage::text(msg.chat.id, reply))
                        .await?;
                },
                Err(e) => {
                    self.state
                        .outbound
                        .send(OutgoingMessage::text(msg.chat.id, "Can't revoke token"))
                        .await?;
                    return Err(e);
                },
            },
            _ => return Ok(Outcome::Continue),
        }
        Ok(Outcome::Claimed)
    }

    fn web_routes(&self) -> Option<&dyn WebRoutes> {
        Some(self)
    }

    fn command_descriptions(&self) -> Option<&dyn DescribeCommands> {
        Some(self)
    }
}

impl WebRoutes for NotifierPlugin {
    fn mount_path(&self) -> &str {
        MOUNT_PATH
    }

    fn routes(&self) -> Router {
        Router::new()
            .route("/", any(notify))
            .route("/{format}", any(notify_formatted))
            .with_state(self.state.clone())
    }
}

impl DescribeCommands for NotifierPlugin {
    fn commands(&self) -> Vec<CommandDescription> {
        vec![CommandDescription::new(
            COMMAND,
            "Create a token for posting into this chat over HTTP",
            "`/notify_token revoke [token]` revokes one or all tokens",
        )]
    }
}

#[derive(Debug, Error)]
enum NotifyError {
    #[error("authorization token isn't provided")]
    MissingToken,

    #[error("unknown token")]
    UnknownToken,

    #[error("{0}")]
    BadRequest(&'static str),

    #[error("method not supported")]
    MethodNotSupported,

    #[error("unknown format")]
    UnknownFormat,

    #[error("can't send message")]
    Send(String),

    #[error("internal error")]
    Internal,
}

impl IntoResponse for NotifyError {
    fn into_response(self) -> Response {
        let status = match &self {
            NotifyError::MissingToken => StatusCode::UNAUTHORIZED,
            NotifyError::UnknownToken => StatusCode::FORBIDDEN,
            NotifyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            NotifyError::MethodNotSupported => StatusCode::NOT_IMPLEMENTED,
            NotifyError::UnknownFormat => StatusCode::NOT_FOUND,
            NotifyError::Send(verbose) => {
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({ "error": self.to_string(), "verbose": verbose })),
                )
                    .into_response();
            },
            NotifyError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
struct NotifyQuery {
    #[serde(default)]
    text: Option<String>,
}

async fn notify(
    State(state): State<NotifyState>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<NotifyQuery>,
    body: Body,
) -> Result<Json<serde_json::Value>, NotifyError> {
    deliver(state, "", method, headers, query, body).await
}

async fn notify_formatted(
    State(state): State<NotifyState>,
    Path(format): Path<String>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<NotifyQuery>,
    body: Body,
) -> Result<Json<serde_json::Value>, NotifyError> {
    deliver(state, &format, method, headers, query, body).await
}

/// The `Authorization` token. The `Bearer ` scheme is optional; a bare value
/// is taken as the token itself.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();
    (!token.is_empty()).then_some(token)
}

fn parse_format(format: &str) -> Option<ParseMode> {
    match format {
        "" => Some(ParseMode::Plain),
        "html" => Some(ParseMode::Html),
        "md" => Some(ParseMode::MarkdownV2),
        _ => None,
    }
}

async fn deliver(
    state: NotifyState,
    format: &str,
    method: Method,
    headers: HeaderMap,
    query: NotifyQuery,
    body: Body,
) -> Result<Json<serde_json::Value>, NotifyError> {
    let token = bearer_token(&headers).ok_or(NotifyError::MissingToken)?;
    let chat_token = state
        .store
        .get::<ChatToken>(token)
        .await
        .map_err(|e| {
            warn!(error = %e, "notify token lookup failed");
            NotifyError::Internal
        })?
        .ok_or(NotifyError::UnknownToken)?;

    let text = match method {
        Method::GET => query.text.unwrap_or_default(),
        Method::POST => {
            let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
                .await
                .map_err(|_| NotifyError::BadRequest("can't read body"))?;
            String::from_utf8(bytes.to_vec())
                .map_err(|_| NotifyError::BadRequest("text must be encoded in UTF-8"))?
        },
        _ => return Err(NotifyError::MethodNotSupported),
    };
    if text.is_empty() {
        return Err(NotifyError::BadRequest("text isn't provided"));
    }
    let parse_mode = parse_format(format).ok_or(NotifyError::UnknownFormat)?;

    let message_id = state
        .outbound
        .send(OutgoingMessage::text(chat_token.chat_id, text).parse_mode(parse_mode))
        .await
        .map_err(|e| {
            warn!(chat_id = %chat_token.chat_id, error = %e, "notification delivery failed");
            NotifyError::Send(e.to_string())
        })?;
    debug!(chat_id = %chat_token.chat_id, message_id = %message_id, "notification delivered");
    Ok(Json(json!({ "message_id": message_id })))
}
