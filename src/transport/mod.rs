//! Contract with the backend process host, plus the socket client that implements it.
//!
//! Nothing here blocks the caller. Requests resolve later through a [`Pending`], and
//! stream events arrive on the channel behind an [`EventSink`].

mod host;
mod policy;
pub mod protocol;

pub use host::HostTransport;
pub use policy::{RetryPolicy, RetrySettings, SessionKind};

use std::sync::mpsc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::store::SessionId;

/// Request for a new PTY in `cwd`. Geometry is optional; the host picks a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSession {
    pub cwd: String,
    #[serde(default)]
    pub cols: Option<u16>,
    #[serde(default)]
    pub rows: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResizeRequest {
    pub session_id: SessionId,
    pub cols: u16,
    pub rows: u16,
}

/// Push events of one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Connected,
    Reconnecting { attempt: u32, max_attempts: u32 },
    Data(Vec<u8>),
    Exit {
        exit_code: Option<i32>,
        signal: Option<String>,
    },
    /// Non-fatal errors leave the stream running; fatal ones mean the transport gave up.
    Error { message: String, fatal: bool },
}

/// A stream event tagged with the session and the stream it belongs to.
///
/// `stream` tells apart two subscriptions to the same session, so output still queued
/// from a closed subscription is never mistaken for output of its replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub session_id: SessionId,
    pub stream: u64,
    pub event: StreamEvent,
}

/// Where a transport delivers the events of one stream.
#[derive(Debug, Clone)]
pub struct EventSink {
    session_id: SessionId,
    stream: u64,
    tx: mpsc::Sender<SessionEvent>,
}

impl EventSink {
    pub fn new(session_id: SessionId, stream: u64, tx: mpsc::Sender<SessionEvent>) -> Self {
        Self {
            session_id,
            stream,
            tx,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Returns false once nobody is listening any more.
    pub fn emit(&self, event: StreamEvent) -> bool {
        self.tx
            .send(SessionEvent {
                session_id: self.session_id.clone(),
                stream: self.stream,
                event,
            })
            .is_ok()
    }
}

/// Handle to a live stream. Closing must be idempotent.
pub trait StreamHandle {
    fn close(&mut self);
}

/// A result that is produced later, typically on another thread.
pub struct Pending<T> {
    rx: mpsc::Receiver<Result<T>>,
}

/// Producer side of a [`Pending`].
pub struct Completer<T> {
    tx: mpsc::Sender<Result<T>>,
}

impl<T> Pending<T> {
    pub fn channel() -> (Completer<T>, Pending<T>) {
        let (tx, rx) = mpsc::channel();
        (Completer { tx }, Pending { rx })
    }

    pub fn ready(result: Result<T>) -> Self {
        let (completer, pending) = Self::channel();
        completer.complete(result);
        pending
    }

    /// `None` while still outstanding. A dropped completer resolves to an error.
    pub fn try_take(&self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => {
                Some(Err(anyhow!("request abandoned by transport")))
            }
        }
    }

    /// Block for at most `timeout`.
    pub fn wait(&self, timeout: Duration) -> Option<Result<T>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(mpsc::RecvTimeoutError::Timeout) => None,
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Some(Err(anyhow!("request abandoned by transport")))
            }
        }
    }
}

impl<T> Completer<T> {
    pub fn complete(self, result: Result<T>) {
        // The requester may have gone away; nothing to do then.
        let _ = self.tx.send(result);
    }
}

/// Client for the backend process host.
pub trait Transport {
    fn create_session(&self, request: CreateSession) -> Pending<SessionId>;

    /// Open the event stream for `session_id`. Events go to `sink` until the returned
    /// handle is closed or the transport reports `exit` or a fatal error.
    fn connect(
        &self,
        session_id: &str,
        policy: RetryPolicy,
        sink: EventSink,
    ) -> Result<Box<dyn StreamHandle>>;

    /// Requests to one transport are applied by the host in the order they were made.
    fn send_input(&self, session_id: &str, data: &[u8]) -> Pending<()>;

    fn resize(&self, request: &ResizeRequest) -> Pending<()>;

    fn close(&self, session_id: &str) -> Pending<()>;
}
