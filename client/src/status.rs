//! Status reporting for long-running operations

use std::fmt;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::errors::{ClientError, ClientResult};

/// One step of an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Message(String),
    Warning(String),
    /// Terminal failure; the stream ends after it
    Error(String),
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Message(m) => write!(f, "{m}"),
            Status::Warning(m) => write!(f, "warning: {m}"),
            Status::Error(m) => write!(f, "error: {m}"),
        }
    }
}

/// Receiving end of an operation's status; closes when the operation ends
#[derive(Debug)]
pub struct StatusStream {
    rx: mpsc::Receiver<Status>,
}

impl StatusStream {
    pub async fn next(&mut self) -> Option<Status> {
        self.rx.recv().await
    }

    /// Drain the stream, failing if the operation reported an error
    pub async fn wait(mut self) -> ClientResult<Vec<Status>> {
        let mut seen = Vec::new();
        while let Some(status) = self.rx.recv().await {
            if let Status::Error(msg) = &status {
                return Err(ClientError::Failed(msg.clone()));
            }
            seen.push(status);
        }
        Ok(seen)
    }
}

/// Sending end, held by the task running the operation
#[derive(Debug, Clone)]
pub struct StatusSender {
    op: &'static str,
    tx: mpsc::Sender<Status>,
}

impl StatusSender {
    pub fn channel(op: &'static str, buffer: usize) -> (Self, StatusStream) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { op, tx }, StatusStream { rx })
    }

    async fn send(&self, status: Status) {
        // the caller may have dropped the stream
        let _ = self.tx.send(status).await;
    }

    pub async fn message(&self, msg: impl Into<String>) {
        let msg = msg.into();
        info!(op = self.op, "{msg}");
        self.send(Status::Message(msg)).await;
    }

    pub async fn warning(&self, msg: impl Into<String>) {
        let msg = msg.into();
        warn!(op = self.op, "{msg}");
        self.send(Status::Warning(msg)).await;
    }

    pub async fn error(&self, msg: impl Into<String>) {
        let msg = msg.into();
        error!(op = self.op, "{msg}");
        self.send(Status::Error(msg)).await;
    }
}
