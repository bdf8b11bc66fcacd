use std::io::{self, ErrorKind};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};

use super::protocol::{ClientMessage, HostMessage, read_host_message, write_client_message};
use super::{
    Completer, CreateSession, EventSink, Pending, ResizeRequest, RetryPolicy, StreamEvent,
    StreamHandle, Transport,
};
use crate::store::SessionId;

/// Granularity of interruptible sleeps in the stream thread.
const POLL_SLEEP: Duration = Duration::from_millis(16);

/// Bound on request/reply round trips over the control connection.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// A connection that stays up this long no longer counts against the retry budget.
const STABLE_CONNECTION: Duration = Duration::from_secs(10);

/// Transport backed by a session host listening on a Unix socket.
///
/// Input, resize and close go through one request thread that owns a lazily opened
/// control connection, so the host sees them in order. Every stream gets its own
/// connection and reader thread.
pub struct HostTransport {
    socket_path: PathBuf,
    request_timeout: Duration,
    requests: Mutex<Option<mpsc::Sender<Job>>>,
}

/// A request queued for the request thread.
struct Job {
    msg: ClientMessage,
    what: &'static str,
    completer: Completer<()>,
}

impl HostTransport {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            request_timeout: REQUEST_TIMEOUT,
            requests: Mutex::new(None),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Queue `msg` for the request thread, starting it on first use.
    fn submit(&self, msg: ClientMessage, what: &'static str) -> Pending<()> {
        let (completer, pending) = Pending::channel();
        let Ok(mut requests) = self.requests.lock() else {
            completer.complete(Err(anyhow!("request queue lock poisoned")));
            return pending;
        };

        if requests.is_none() {
            let (tx, rx) = mpsc::channel();
            let control = Control {
                socket_path: self.socket_path.clone(),
                timeout: self.request_timeout,
                stream: None,
            };
            let spawned = thread::Builder::new()
                .name("host-requests".into())
                .spawn(move || control.serve(rx));
            if let Err(e) = spawned {
                completer.complete(Err(anyhow!("failed to spawn request thread: {e}")));
                return pending;
            }
            *requests = Some(tx);
        }

        let job = Job {
            msg,
            what,
            completer,
        };
        let sent = match requests.as_ref() {
            Some(tx) => tx.send(job),
            None => Err(mpsc::SendError(job)),
        };
        if let Err(mpsc::SendError(job)) = sent {
            *requests = None;
            job.completer.complete(Err(anyhow!("request thread is gone")));
        }
        pending
    }
}

impl Transport for HostTransport {
    fn create_session(&self, request: CreateSession) -> Pending<SessionId> {
        let (completer, pending) = Pending::channel();
        let socket_path = self.socket_path.clone();
        let timeout = self.request_timeout;
        thread::spawn(move || {
            let result = create_on_host(&socket_path, timeout, request);
            completer.complete(result);
        });
        pending
    }

    fn connect(
        &self,
        session_id: &str,
        policy: RetryPolicy,
        sink: EventSink,
    ) -> Result<Box<dyn StreamHandle>> {
        let shared = Arc::new(StreamShared {
            stopped: AtomicBool::new(false),
            current: Mutex::new(None),
        });
        let worker = StreamWorker {
            socket_path: self.socket_path.clone(),
            session_id: session_id.to_string(),
            policy,
            sink,
            shared: Arc::clone(&shared),
        };
        thread::Builder::new()
            .name(format!("stream-{session_id}"))
            .spawn(move || worker.run())
            .context("failed to spawn stream thread")?;
        Ok(Box::new(HostStream { shared }))
    }

    fn send_input(&self, session_id: &str, data: &[u8]) -> Pending<()> {
        self.submit(
            ClientMessage::Input {
                session_id: session_id.to_string(),
                data: data.to_vec(),
            },
            "session host rejected input",
        )
    }

    fn resize(&self, request: &ResizeRequest) -> Pending<()> {
        self.submit(
            ClientMessage::Resize {
                session_id: request.session_id.clone(),
                cols: request.cols,
                rows: request.rows,
            },
            "session host rejected resize",
        )
    }

    fn close(&self, session_id: &str) -> Pending<()> {
        self.submit(
            ClientMessage::Close {
                session_id: session_id.to_string(),
            },
            "session host failed to close session",
        )
    }
}

/// The request thread's side of the control connection.
struct Control {
    socket_path: PathBuf,
    timeout: Duration,
    stream: Option<UnixStream>,
}

impl Control {
    /// Runs until the transport is dropped.
    fn serve(mut self, jobs: mpsc::Receiver<Job>) {
        for job in jobs {
            let result = self.expect_ack(&job.msg).context(job.what);
            job.completer.complete(result);
        }
    }

    fn expect_ack(&mut self, msg: &ClientMessage) -> Result<()> {
        match self.request(msg)? {
            HostMessage::Ack => Ok(()),
            HostMessage::Error(message) => bail!("{message}"),
            other => bail!("unexpected reply from session host: {other:?}"),
        }
    }

    /// Send a request and wait for its reply.
    ///
    /// A request is only sent again when writing it to a reused connection failed, which
    /// means the host closed that connection and never saw the request. Once written, a
    /// failure is returned as is and the connection is dropped, since a late reply would
    /// otherwise be read as the answer to the next request.
    fn request(&mut self, msg: &ClientMessage) -> Result<HostMessage> {
        let mut stream = match self.stream.take() {
            Some(mut stream) => {
                if let Err(e) = write_client_message(&mut stream, msg) {
                    tracing::debug!("control connection went away, reopening: {e:#}");
                    stream = open_control(&self.socket_path, self.timeout)?;
                    write_client_message(&mut stream, msg)?;
                }
                stream
            }
            None => {
                let mut stream = open_control(&self.socket_path, self.timeout)?;
                write_client_message(&mut stream, msg)?;
                stream
            }
        };

        let reply = read_host_message(&mut stream).map_err(|e| {
            if is_timeout(&e) {
                anyhow!(
                    "no reply from session host within {}ms",
                    self.timeout.as_millis()
                )
            } else {
                e
            }
        })?;
        self.stream = Some(stream);
        Ok(reply)
    }
}

fn open_control(socket_path: &Path, timeout: Duration) -> Result<UnixStream> {
    let stream = UnixStream::connect(socket_path).with_context(|| {
        format!(
            "failed to connect to session host at {}",
            socket_path.display()
        )
    })?;
    stream
        .set_read_timeout(Some(timeout))
        .context("failed to set control read timeout")?;
    Ok(stream)
}

fn round_trip(stream: &mut UnixStream, msg: &ClientMessage) -> Result<HostMessage> {
    write_client_message(stream, msg)?;
    read_host_message(stream)
}

fn create_on_host(
    socket_path: &Path,
    timeout: Duration,
    request: CreateSession,
) -> Result<SessionId> {
    let mut stream = open_control(socket_path, timeout)?;
    match round_trip(&mut stream, &ClientMessage::Create(request))? {
        HostMessage::Created(id) => Ok(id),
        HostMessage::Error(message) => bail!("{message}"),
        other => bail!("unexpected reply to create: {other:?}"),
    }
}

// -- Streams ----------------------------------------------------------------

struct StreamShared {
    stopped: AtomicBool,
    /// Connection currently being read, so `close()` can unblock the reader.
    current: Mutex<Option<UnixStream>>,
}

impl StreamShared {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn set_current(&self, stream: Option<UnixStream>) {
        if let Ok(mut current) = self.current.lock() {
            *current = stream;
        }
    }
}

struct HostStream {
    shared: Arc<StreamShared>,
}

impl StreamHandle for HostStream {
    fn close(&mut self) {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut current) = self.shared.current.lock()
            && let Some(stream) = current.take()
        {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for HostStream {
    fn drop(&mut self) {
        self.close();
    }
}

enum AttachOutcome {
    Attached(UnixStream),
    /// The host refused the session outright; retrying cannot help.
    Rejected(String),
}

/// Why a connected stream stopped delivering frames.
enum StreamEnd {
    Exited,
    Stopped,
    /// `stable` when the connection carried live output or stayed up for
    /// [`STABLE_CONNECTION`] before it dropped.
    Lost { error: anyhow::Error, stable: bool },
}

struct StreamWorker {
    socket_path: PathBuf,
    session_id: SessionId,
    policy: RetryPolicy,
    sink: EventSink,
    shared: Arc<StreamShared>,
}

impl StreamWorker {
    fn run(self) {
        let max_attempts = self.policy.retry.max_retries;
        let mut attempt = 0;

        loop {
            if self.shared.is_stopped() {
                return;
            }

            let failure = match self.attach() {
                Ok(AttachOutcome::Attached(stream)) => {
                    if !self.sink.emit(StreamEvent::Connected) {
                        return;
                    }
                    match self.read_frames(stream) {
                        StreamEnd::Exited | StreamEnd::Stopped => return,
                        StreamEnd::Lost { error, stable } => {
                            if stable {
                                attempt = 0;
                            }
                            error
                        }
                    }
                }
                Ok(AttachOutcome::Rejected(message)) => {
                    self.sink.emit(StreamEvent::Error {
                        message,
                        fatal: true,
                    });
                    return;
                }
                Err(e) => e,
            };

            if self.shared.is_stopped() {
                return;
            }
            if attempt >= max_attempts {
                tracing::warn!(
                    "stream for {} gave up after {attempt} retries: {failure:#}",
                    self.session_id
                );
                self.sink.emit(StreamEvent::Error {
                    message: format!("Connection lost: {failure:#}"),
                    fatal: true,
                });
                return;
            }

            attempt += 1;
            tracing::info!(
                "stream for {} lost ({failure:#}), retry {attempt}/{max_attempts}",
                self.session_id
            );
            if !self.sink.emit(StreamEvent::Reconnecting {
                attempt,
                max_attempts,
            }) {
                return;
            }
            self.sleep(self.policy.retry.delay_for_attempt(attempt));
        }
    }

    /// Connect and wait (bounded by the connection timeout) for the host to accept.
    fn attach(&self) -> Result<AttachOutcome> {
        let mut stream = UnixStream::connect(&self.socket_path).with_context(|| {
            format!(
                "failed to connect to session host at {}",
                self.socket_path.display()
            )
        })?;
        stream
            .set_read_timeout(Some(self.policy.connection_timeout))
            .context("failed to set connection timeout")?;
        write_client_message(
            &mut stream,
            &ClientMessage::Attach {
                session_id: self.session_id.clone(),
            },
        )?;

        let reply = read_host_message(&mut stream).map_err(|e| {
            if is_timeout(&e) {
                anyhow!(
                    "timed out after {}ms waiting for session host",
                    self.policy.connection_timeout.as_millis()
                )
            } else {
                e
            }
        })?;
        match reply {
            HostMessage::Attached => {
                stream
                    .set_read_timeout(None)
                    .context("failed to clear read timeout")?;
                Ok(AttachOutcome::Attached(stream))
            }
            HostMessage::Error(message) => Ok(AttachOutcome::Rejected(message)),
            other => bail!("unexpected reply to attach: {other:?}"),
        }
    }

    fn read_frames(&self, mut stream: UnixStream) -> StreamEnd {
        match stream.try_clone() {
            Ok(clone) => self.shared.set_current(Some(clone)),
            Err(e) => {
                return StreamEnd::Lost {
                    error: e.into(),
                    stable: false,
                };
            }
        }
        // close() may have raced with the clone being published.
        if self.shared.is_stopped() {
            let _ = stream.shutdown(Shutdown::Both);
            return StreamEnd::Stopped;
        }

        let attached_at = Instant::now();
        let mut live_output = false;
        let end = loop {
            let msg = match read_host_message(&mut stream) {
                Ok(msg) => msg,
                Err(_) if self.shared.is_stopped() => break StreamEnd::Stopped,
                Err(error) => {
                    break StreamEnd::Lost {
                        error,
                        stable: live_output || attached_at.elapsed() >= STABLE_CONNECTION,
                    };
                }
            };
            let delivered = match msg {
                HostMessage::Snapshot(bytes) => self.sink.emit(StreamEvent::Data(bytes)),
                HostMessage::Output(bytes) => {
                    live_output = true;
                    self.sink.emit(StreamEvent::Data(bytes))
                }
                HostMessage::Exited(status) => {
                    self.sink.emit(StreamEvent::Exit {
                        exit_code: status.exit_code,
                        signal: status.signal,
                    });
                    break StreamEnd::Exited;
                }
                HostMessage::Error(message) => self.sink.emit(StreamEvent::Error {
                    message,
                    fatal: false,
                }),
                other => {
                    tracing::debug!("ignoring {other:?} on stream {}", self.session_id);
                    true
                }
            };
            if !delivered {
                break StreamEnd::Stopped;
            }
        };

        self.shared.set_current(None);
        end
    }

    fn sleep(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.shared.is_stopped() {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            thread::sleep(POLL_SLEEP.min(deadline - now));
        }
    }
}

fn is_timeout(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<io::Error>())
        .any(|e| matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut))
}
