//! Fire-and-forget click event writer
//!
//! Redirect handlers hand click events to a background actor over a bounded
//! mpsc channel and never wait for the write. The actor persists each event
//! with a timeout; failures are logged and the event is dropped, so a broken
//! database never changes the response a visitor gets.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::models::ClickEvent;
use crate::storage::{Storage, StorageResult};

/// Destination for click events
#[async_trait]
pub trait ClickSink: Send + Sync {
    async fn insert_click(&self, click: &ClickEvent) -> StorageResult<()>;
}

#[async_trait]
impl ClickSink for Arc<dyn Storage> {
    async fn insert_click(&self, click: &ClickEvent) -> StorageResult<()> {
        self.as_ref().insert_click(click).await
    }
}

enum LoggerMessage {
    Record(ClickEvent),
    /// Ack once every event queued before this message has been handled
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

struct ClickWriter<S> {
    receiver: mpsc::Receiver<LoggerMessage>,
    sink: S,
    write_timeout: Duration,
}

impl<S: ClickSink> ClickWriter<S> {
    async fn run(mut self) {
        while let Some(msg) = self.receiver.recv().await {
            match msg {
                LoggerMessage::Record(click) => self.write(click).await,
                LoggerMessage::Flush(ack) => {
                    let _ = ack.send(());
                }
                LoggerMessage::Shutdown(ack) => {
                    self.receiver.close();
                    // Drain whatever was queued before the channel closed
                    while let Some(msg) = self.receiver.recv().await {
                        match msg {
                            LoggerMessage::Record(click) => self.write(click).await,
                            LoggerMessage::Flush(ack) | LoggerMessage::Shutdown(ack) => {
                                let _ = ack.send(());
                            }
                        }
                    }
                    info!("Click logger drained, shutting down");
                    let _ = ack.send(());
                    return;
                }
            }
        }
        debug!("Click logger channel closed");
    }

    async fn write(&self, click: ClickEvent) {
        match tokio::time::timeout(self.write_timeout, self.sink.insert_click(&click)).await {
            Ok(Ok(())) => {
                debug!(click_id = %click.click_id, tour = %click.tour_slug, "click recorded");
            }
            Ok(Err(e)) => {
                warn!(click_id = %click.click_id, error = %e, "failed to record click, dropping it");
            }
            Err(_) => {
                warn!(
                    click_id = %click.click_id,
                    timeout_ms = self.write_timeout.as_millis() as u64,
                    "click write timed out, dropping it"
                );
            }
        }
    }
}

/// Handle to the background click writer. Cheap to clone.
#[derive(Clone)]
pub struct ClickLogger {
    sender: mpsc::Sender<LoggerMessage>,
}

impl ClickLogger {
    /// Start the writer task on the current runtime
    pub fn spawn<S>(sink: S, buffer_size: usize, write_timeout: Duration) -> Self
    where
        S: ClickSink + 'static,
    {
        let (sender, receiver) = mpsc::channel(buffer_size.max(1));
        let writer = ClickWriter {
            receiver,
            sink,
            write_timeout,
        };
        tokio::spawn(writer.run());

        Self { sender }
    }

    /// Queue a click without waiting. Returns false when the event was dropped.
    pub fn submit(&self, click: ClickEvent) -> bool {
        match self.sender.try_send(LoggerMessage::Record(click)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(LoggerMessage::Record(click))) => {
                warn!(click_id = %click.click_id, "click queue full, dropping event");
                false
            }
            Err(_) => {
                warn!("click logger is not running, dropping event");
                false
            }
        }
    }

    /// Wait until everything submitted so far has been written or dropped
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.sender.send(LoggerMessage::Flush(ack)).await.is_ok() {
            let _ = done.await;
        }
    }

    /// Drain the queue and stop the writer
    pub async fn shutdown(&self) {
        let (ack, done) = oneshot::channel();
        if self.sender.send(LoggerMessage::Shutdown(ack)).await.is_ok() {
            let _ = done.await;
        }
    }
}
