//! In-memory doubles for the outbound and transport traits.

use std::sync::{
    Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;

use crate::{
    Error, Result,
    outbound::{InlineButton, Outbound, OutgoingMessage},
    transport::{UpdateSink, UpdateTransport},
    update::{ChatId, MessageId, Update},
};

/// A button-row edit captured by [`RecordingOutbound`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditedButtons {
    pub chat: ChatId,
    pub message: MessageId,
    pub buttons: Vec<InlineButton>,
}

/// A callback answer captured by [`RecordingOutbound`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackAnswer {
    pub callback_id: String,
    pub text: Option<String>,
}

/// Records everything sent through it.
#[derive(Debug, Default)]
pub struct RecordingOutbound {
    username: Option<String>,
    fail_sends: AtomicBool,
    next_id: AtomicUsize,
    sent: Mutex<Vec<OutgoingMessage>>,
    edits: Mutex<Vec<EditedButtons>>,
    answers: Mutex<Vec<CallbackAnswer>>,
}

impl RecordingOutbound {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            ..Default::default()
        }
    }

    /// Make subsequent `send` calls fail.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn edits(&self) -> Vec<EditedButtons> {
        self.edits.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn answers(&self) -> Vec<CallbackAnswer> {
        self.answers.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Outbound for RecordingOutbound {
    async fn send(&self, message: OutgoingMessage) -> Result<MessageId> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::unavailable("sends disabled"));
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1000;
        Ok(MessageId(i32::try_from(id).unwrap_or(i32::MAX)))
    }

    async fn edit_buttons(
        &self,
        chat: ChatId,
        message: MessageId,
        buttons: Vec<InlineButton>,
    ) -> Result<()> {
        self.edits
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(EditedButtons {
                chat,
                message,
                buttons,
            });
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        self.answers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(CallbackAnswer {
                callback_id: callback_id.to_string(),
                text: text.map(str::to_string),
            });
        Ok(())
    }

    async fn bot_username(&self) -> Result<Option<String>> {
        Ok(self.username.clone())
    }
}

/// Transport fed by hand. Pushed payloads are JSON-encoded [`Update`]s.
#[derive(Debug, Default)]
pub struct ManualTransport {
    secret: Option<String>,
    sink: Mutex<Option<UpdateSink>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl ManualTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behave like a push transport listening on `/_webhook/{secret}`.
    pub fn with_push_secret(secret: impl Into<String>) -> Self {
        Self {
            secret: Some(secret.into()),
            ..Default::default()
        }
    }

    /// Deliver an update as if it arrived from the platform.
    pub async fn inject(&self, update: Update) -> Result<()> {
        let sink = self
            .sink
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| Error::unavailable("transport not started"))?;
        sink.push(update).await
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpdateTransport for ManualTransport {
    fn name(&self) -> &str {
        "manual"
    }

    fn push_secret(&self) -> Option<&str> {
        self.secret.as_deref()
    }

    async fn accept_push(&self, body: &[u8]) -> Result<()> {
        let update: Update = serde_json::from_slice(body).map_err(Error::invalid_input)?;
        self.inject(update).await
    }

    async fn start(&self, sink: UpdateSink) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.sink.lock().unwrap_or_else(|e| e.into_inner()) = Some(sink);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.sink.lock().unwrap_or_else(|e| e.into_inner()).take();
        Ok(())
    }
}
