use {async_trait::async_trait, tokio::sync::mpsc, tracing::debug};

use crate::{Error, Result, update::Update};

/// Buffered updates between a transport and the dispatch loop.
pub const UPDATE_QUEUE_CAPACITY: usize = 100;

/// Create a connected sink/stream pair.
pub fn update_channel(capacity: usize) -> (UpdateSink, UpdateStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (UpdateSink { tx }, UpdateStream { rx })
}

/// Producer half handed to transports.
#[derive(Debug, Clone)]
pub struct UpdateSink {
    tx: mpsc::Sender<Update>,
}

impl UpdateSink {
    /// Queue an update, waiting for space when the queue is full.
    pub async fn push(&self, update: Update) -> Result<()> {
        let id = update.id;
        self.tx.send(update).await.map_err(|_| Error::Closed)?;
        debug!(update_id = id, "update queued");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half owned by the dispatch loop.
#[derive(Debug)]
pub struct UpdateStream {
    rx: mpsc::Receiver<Update>,
}

impl UpdateStream {
    /// Next update, or `None` once every sink is dropped.
    pub async fn next(&mut self) -> Option<Update> {
        self.rx.recv().await
    }

    /// Stop accepting new updates; queued ones can still be drained.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// Delivers inbound updates into an [`UpdateSink`].
///
/// Pull transports (long polling) run their own task between `start` and
/// `stop`. Push transports receive payloads through the HTTP surface via
/// [`UpdateTransport::accept_push`].
#[async_trait]
pub trait UpdateTransport: Send + Sync {
    fn name(&self) -> &str;

    /// Path secret for push delivery. `None` for pull transports.
    fn push_secret(&self) -> Option<&str> {
        None
    }

    /// Feed one raw pushed payload. Invalid payloads are `InvalidInput`.
    async fn accept_push(&self, _body: &[u8]) -> Result<()> {
        Err(Error::unavailable(format!(
            "{} transport does not accept pushed updates",
            self.name()
        )))
    }

    /// Begin delivering updates into `sink`.
    async fn start(&self, sink: UpdateSink) -> Result<()>;

    /// Stop delivery. Must be safe to call more than once.
    async fn stop(&self) -> Result<()>;
}
