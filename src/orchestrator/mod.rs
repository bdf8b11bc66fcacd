//! Binds the visible terminal to a backend session.
//!
//! The orchestrator is synchronous and tick driven: the UI thread calls the setters and
//! input operations as things happen and [`Orchestrator::pump`] once per tick. No transport
//! call blocks: work that completes elsewhere (session creation, requests, stream events)
//! is picked up in `pump`.
//!
//! Every stream event carries the session and stream it came from and is dropped unless
//! it matches the live stream, so a stale stream can never write into the wrong tab.

mod input;
mod resolve;
mod state;

pub use input::{Modifier, NamedKey, compose, named_key_sequence};
pub use resolve::active_tab;
pub use state::TabPhase;

use std::collections::{HashMap, HashSet};
use std::sync::mpsc;
use std::time::Duration;

use crate::store::{DirectoryState, SessionId, Tab, TabId, TabStore};
use crate::transport::{
    CreateSession, EventSink, Pending, ResizeRequest, RetryPolicy, SessionEvent, SessionKind,
    StreamEvent, StreamHandle, Transport,
};

pub const NO_CONTEXT_MESSAGE: &str = "No active project. Select one to open a terminal.";
pub const NO_DIRECTORY_MESSAGE: &str = "No working directory selected.";
pub const SESSION_ENDED_MESSAGE: &str = "Terminal session ended";

/// Sent once to a reattached session that has nothing on screen, so the shell redraws
/// its prompt.
const NUDGE: &[u8] = b"\r";

/// How long shutdown waits for each outstanding creation or close before leaving it behind.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// The surface output is rendered into.
pub trait Viewport {
    fn write(&mut self, bytes: &[u8]);
    fn clear(&mut self);
    fn focus(&mut self);
    /// Re-measure the available area. `None` when it cannot be measured yet.
    fn fit(&mut self) -> Option<Geometry>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub cols: u16,
    pub rows: u16,
}

/// Which working directory the terminal is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// No project selected at all.
    NoContext,
    /// A project is selected but it has no working directory.
    NoDirectory,
    Directory(String),
}

/// User-facing connection state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Status {
    pub connection_error: Option<String>,
    pub is_fatal_error: bool,
}

impl Status {
    fn transient(message: impl Into<String>) -> Self {
        Self {
            connection_error: Some(message.into()),
            is_fatal_error: false,
        }
    }

    fn fatal(message: impl Into<String>) -> Self {
        Self {
            connection_error: Some(message.into()),
            is_fatal_error: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TabKey {
    pub directory: String,
    pub tab_id: TabId,
}

impl TabKey {
    fn new(directory: &str, tab_id: &str) -> Self {
        Self {
            directory: directory.to_string(),
            tab_id: tab_id.to_string(),
        }
    }
}

/// The resolved tab, copied out of the store so the store can be mutated afterwards.
struct Resolved {
    key: TabKey,
    session_id: Option<SessionId>,
    buffer_empty: bool,
}

/// An outstanding create-session request.
struct Acquisition {
    key: TabKey,
    pending: Pending<SessionId>,
    /// The tab stopped being current. The result is closed when it arrives.
    cancelled: bool,
}

/// What an outstanding transport request was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Input,
    Nudge,
    Resize,
    Close,
}

struct Request {
    kind: RequestKind,
    session_id: SessionId,
    pending: Pending<()>,
}

struct ActiveStream {
    key: TabKey,
    session_id: SessionId,
    stream: u64,
    handle: Option<Box<dyn StreamHandle>>,
}

pub struct Orchestrator<S, T, V> {
    store: S,
    transport: T,
    viewport: V,
    /// Sessions that existed before this process started.
    hydrated_sessions: HashSet<SessionId>,

    location: Location,
    tabs_enabled: bool,
    /// Latched the first time the terminal is shown.
    opened: bool,
    visible: bool,
    status: Status,

    phases: HashMap<TabKey, TabPhase>,
    acquisitions: Vec<Acquisition>,
    requests: Vec<Request>,
    active: Option<ActiveStream>,
    next_stream: u64,
    pending_nudge: Option<SessionId>,
    nudged: HashSet<SessionId>,
    modifier: Option<Modifier>,

    last_size: Option<Geometry>,
    pending_resize: Option<Geometry>,
    /// Tab whose scrollback is on the viewport.
    displayed: Option<TabKey>,

    events_tx: mpsc::Sender<SessionEvent>,
    events_rx: mpsc::Receiver<SessionEvent>,
}

impl<S: TabStore, T: Transport, V: Viewport> Orchestrator<S, T, V> {
    pub fn new(store: S, transport: T, viewport: V, hydrated_sessions: HashSet<SessionId>) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            store,
            transport,
            viewport,
            hydrated_sessions,
            location: Location::NoContext,
            tabs_enabled: true,
            opened: false,
            visible: false,
            status: Status::default(),
            phases: HashMap::new(),
            acquisitions: Vec::new(),
            requests: Vec::new(),
            active: None,
            next_stream: 0,
            pending_nudge: None,
            nudged: HashSet::new(),
            modifier: None,
            last_size: None,
            pending_resize: None,
            displayed: None,
            events_tx,
            events_rx,
        }
    }

    /// Geometry used for session creation until the viewport reports its own.
    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.last_size = Some(geometry);
        self
    }

    // -- Accessors --------------------------------------------------------

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn viewport(&self) -> &V {
        &self.viewport
    }

    pub fn viewport_mut(&mut self) -> &mut V {
        &mut self.viewport
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn modifier(&self) -> Option<Modifier> {
        self.modifier
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn directory_state(&self) -> Option<&DirectoryState> {
        self.store.directory_state(self.directory()?)
    }

    pub fn current_tab(&self) -> Option<&Tab> {
        active_tab(self.directory_state()?, self.tabs_enabled)
    }

    pub fn current_phase(&self) -> TabPhase {
        self.resolve()
            .map(|tab| self.phase(&tab.key))
            .unwrap_or_default()
    }

    // -- Inputs -----------------------------------------------------------

    pub fn set_location(&mut self, location: Location) {
        if location == self.location {
            return;
        }
        tracing::debug!("location changed to {location:?}");
        self.location = location;
        self.status = Status::default();
        self.disconnect();
        self.reconcile();
    }

    pub fn set_tabs_enabled(&mut self, enabled: bool) {
        if enabled == self.tabs_enabled {
            return;
        }
        self.tabs_enabled = enabled;
        self.reconcile();
    }

    pub fn set_visible(&mut self, visible: bool) {
        if visible == self.visible {
            return;
        }
        self.visible = visible;
        if visible {
            self.opened = true;
            if let Some(geometry) = self.viewport.fit() {
                self.resize(geometry.cols, geometry.rows);
            }
            self.viewport.focus();
        } else {
            self.pending_resize = None;
        }
        self.reconcile();
    }

    /// Record the viewport geometry. Forwarded to the session on the next pump, and only
    /// while visible; the latest value wins.
    pub fn resize(&mut self, cols: u16, rows: u16) {
        let geometry = Geometry { cols, rows };
        self.last_size = Some(geometry);
        if self.visible {
            self.pending_resize = Some(geometry);
        }
    }

    /// Typed input. A latched modifier applies to this keystroke and is then released.
    pub fn on_input(&mut self, input: &[u8]) {
        let modifier = self.modifier.take();
        let data = compose(input, modifier);
        if modifier.is_some() {
            self.viewport.focus();
        }
        self.write_input(&data);
    }

    pub fn send_key(&mut self, key: NamedKey) {
        let modifier = self.modifier.take();
        let data = named_key_sequence(key, modifier);
        if modifier.is_some() {
            self.viewport.focus();
        }
        self.write_input(data);
    }

    /// Latch `modifier` for the next keystroke. Arming it again releases it.
    pub fn arm_modifier(&mut self, modifier: Modifier) {
        self.modifier = if self.modifier == Some(modifier) {
            None
        } else {
            Some(modifier)
        };
    }

    // -- Tab operations ---------------------------------------------------

    pub fn create_tab(&mut self) -> Option<TabId> {
        let directory = self.directory()?.to_string();
        self.status = Status::default();
        self.disconnect();
        let created = self
            .store
            .ensure_directory(&directory)
            .and_then(|()| self.store.create_tab(&directory));
        let tab_id = match created {
            Ok(tab_id) => {
                tracing::info!("created tab {tab_id} in {directory}");
                Some(tab_id)
            }
            Err(e) => {
                self.report_store_error("create tab", &e);
                None
            }
        };
        self.reconcile();
        tab_id
    }

    /// Make `tab_id` the active tab. Also re-arms a tab whose session ended or failed.
    pub fn select_tab(&mut self, tab_id: &str) {
        let Some(directory) = self.directory().map(str::to_string) else {
            return;
        };
        self.status = Status::default();
        self.disconnect();
        self.phases.remove(&TabKey::new(&directory, tab_id));
        if let Err(e) = self.store.set_active_tab(&directory, tab_id) {
            self.report_store_error("select tab", &e);
        }
        self.reconcile();
    }

    /// Select the tab `offset` places away from the current one, wrapping around.
    pub fn select_adjacent(&mut self, offset: isize) {
        let Some(state) = self.directory_state() else {
            return;
        };
        let count = state.tabs.len();
        if count < 2 {
            return;
        }
        let current = self
            .current_tab()
            .and_then(|tab| state.tabs.iter().position(|t| t.id == tab.id))
            .unwrap_or(0);
        let target = (current as isize + offset).rem_euclid(count as isize) as usize;
        let tab_id = state.tabs[target].id.clone();
        self.select_tab(&tab_id);
    }

    /// Remove a tab and terminate the session it was bound to.
    pub fn close_tab(&mut self, tab_id: &str) {
        let Some(directory) = self.directory().map(str::to_string) else {
            return;
        };
        self.status = Status::default();
        self.disconnect();
        match self.store.close_tab(&directory, tab_id) {
            Ok(Some(session_id)) => {
                tracing::info!("closing session {session_id} of tab {tab_id}");
                let pending = self.transport.close(&session_id);
                self.track(RequestKind::Close, session_id, pending);
            }
            Ok(None) => {}
            Err(e) => self.report_store_error("close tab", &e),
        }
        self.phases.remove(&TabKey::new(&directory, tab_id));
        self.reconcile();
    }

    /// Throw away the current tab's session and start over with a fresh one.
    pub fn restart(&mut self) {
        let Some(resolved) = self.resolve() else {
            return;
        };
        self.close_tab(&resolved.key.tab_id);
        let empty = self
            .store
            .directory_state(&resolved.key.directory)
            .is_none_or(|state| state.tabs.is_empty());
        if empty {
            self.create_tab();
        }
    }

    /// Recovery from a fatal error. Same as [`Self::restart`].
    pub fn hard_restart(&mut self) {
        self.restart();
    }

    // -- Tick -------------------------------------------------------------

    /// Apply everything that completed since the last call, then re-evaluate.
    pub fn pump(&mut self) {
        self.poll_acquisitions();
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
        }
        self.poll_requests();
        self.flush_resize();
        self.reconcile();
    }

    /// Tear down: stop streaming, close sessions whose creation is still outstanding and
    /// give pending closes a chance to reach the host.
    pub fn shutdown(&mut self) {
        self.disconnect();
        for acquisition in std::mem::take(&mut self.acquisitions) {
            match acquisition.pending.wait(SHUTDOWN_GRACE) {
                Some(Ok(session_id)) => self.close_orphan(session_id),
                Some(Err(_)) => {}
                None => tracing::warn!(
                    "abandoning session creation for tab {}",
                    acquisition.key.tab_id
                ),
            }
        }
        for request in std::mem::take(&mut self.requests) {
            if request.kind != RequestKind::Close {
                continue;
            }
            match request.pending.wait(SHUTDOWN_GRACE) {
                Some(Ok(())) => {}
                Some(Err(e)) => self.request_failed(&request, &e),
                None => tracing::warn!("session {} may be left running", request.session_id),
            }
        }
    }

    // -- Internals --------------------------------------------------------

    fn directory(&self) -> Option<&str> {
        match &self.location {
            Location::Directory(directory) => Some(directory),
            _ => None,
        }
    }

    fn resolve(&self) -> Option<Resolved> {
        let directory = self.directory()?;
        let tab = active_tab(self.store.directory_state(directory)?, self.tabs_enabled)?;
        Some(Resolved {
            key: TabKey::new(directory, &tab.id),
            session_id: tab.session_id.clone(),
            buffer_empty: tab.buffer_is_empty(),
        })
    }

    fn phase(&self, key: &TabKey) -> TabPhase {
        self.phases.get(key).cloned().unwrap_or_default()
    }

    fn set_phase(&mut self, key: &TabKey, phase: TabPhase) {
        if phase == TabPhase::Idle {
            self.phases.remove(key);
        } else {
            self.phases.insert(key.clone(), phase);
        }
    }

    fn reconcile(&mut self) {
        if !self.store.has_hydrated() || !self.opened {
            return;
        }
        let context_error = match self.location {
            Location::NoContext => Some(NO_CONTEXT_MESSAGE),
            Location::NoDirectory => Some(NO_DIRECTORY_MESSAGE),
            Location::Directory(_) => None,
        };
        if let Some(message) = context_error {
            self.show_context_error(message);
            return;
        }

        let resolved = self.resolve();
        let current = resolved.as_ref().map(|r| &r.key);
        if self.active.as_ref().is_some_and(|a| Some(&a.key) != current) {
            self.disconnect();
        }
        for acquisition in &mut self.acquisitions {
            if Some(&acquisition.key) != current {
                acquisition.cancelled = true;
            }
        }
        self.show(current.cloned());

        let Some(tab) = resolved else {
            return;
        };
        if self.phase(&tab.key).is_held() {
            return;
        }
        match tab.session_id {
            Some(session_id) => self.attach(tab.key, session_id, tab.buffer_empty),
            None => self.begin_acquisition(tab.key),
        }
    }

    fn show_context_error(&mut self, message: &str) {
        self.disconnect();
        for acquisition in &mut self.acquisitions {
            acquisition.cancelled = true;
        }
        self.show(None);
        self.status = Status::transient(message);
    }

    /// Put `key`'s scrollback on the viewport if another tab is showing.
    fn show(&mut self, key: Option<TabKey>) {
        if self.displayed == key {
            return;
        }
        self.viewport.clear();
        if let Some(key) = &key
            && let Some(tab) = self
                .store
                .directory_state(&key.directory)
                .and_then(|state| state.tab(&key.tab_id))
        {
            for chunk in &tab.buffer_chunks {
                self.viewport.write(chunk);
            }
        }
        self.displayed = key;
    }

    fn begin_acquisition(&mut self, key: TabKey) {
        // A cancelled request for this tab still counts: its result must be closed
        // before another session is asked for.
        if self.acquisitions.iter().any(|a| a.key == key) {
            return;
        }
        let request = CreateSession {
            cwd: key.directory.clone(),
            cols: self.last_size.map(|g| g.cols),
            rows: self.last_size.map(|g| g.rows),
        };
        tracing::info!("creating session for tab {} in {}", key.tab_id, key.directory);
        self.store.set_connecting(&key.directory, &key.tab_id, true);
        self.set_phase(&key, TabPhase::Acquiring);
        let pending = self.transport.create_session(request);
        self.acquisitions.push(Acquisition {
            key,
            pending,
            cancelled: false,
        });
    }

    fn poll_acquisitions(&mut self) {
        let mut index = 0;
        while index < self.acquisitions.len() {
            match self.acquisitions[index].pending.try_take() {
                Some(result) => {
                    let acquisition = self.acquisitions.remove(index);
                    self.finish_acquisition(acquisition, result);
                }
                None => index += 1,
            }
        }
    }

    fn finish_acquisition(&mut self, acquisition: Acquisition, result: anyhow::Result<SessionId>) {
        let key = acquisition.key;
        let relevant = !acquisition.cancelled
            && self.resolve().is_some_and(|current| current.key == key);

        if !relevant {
            if self.phase(&key) == TabPhase::Acquiring {
                self.set_phase(&key, TabPhase::Idle);
            }
            self.store.set_connecting(&key.directory, &key.tab_id, false);
            match result {
                Ok(session_id) => self.close_orphan(session_id),
                Err(e) => tracing::debug!("discarding failed creation for tab {}: {e:#}", key.tab_id),
            }
            return;
        }

        match result {
            Ok(session_id) => {
                tracing::info!("session {session_id} created for tab {}", key.tab_id);
                if let Err(e) =
                    self.store
                        .set_tab_session_id(&key.directory, &key.tab_id, Some(&session_id))
                {
                    tracing::error!("failed to save session {session_id}: {e:#}");
                    self.close_orphan(session_id);
                    self.store.set_connecting(&key.directory, &key.tab_id, false);
                    self.fail(&key, format!("Failed to save terminal session: {e:#}"));
                    return;
                }
                // The tab's scrollback was reset along with its session.
                self.viewport.clear();
                self.set_phase(&key, TabPhase::Idle);
                self.attach(key, session_id, true);
            }
            Err(e) => {
                tracing::error!("session creation failed for tab {}: {e:#}", key.tab_id);
                self.store.set_connecting(&key.directory, &key.tab_id, false);
                self.fail(&key, format!("Failed to start terminal: {e:#}"));
            }
        }
    }

    fn close_orphan(&mut self, session_id: SessionId) {
        tracing::info!("closing orphaned session {session_id}");
        let pending = self.transport.close(&session_id);
        self.track(RequestKind::Close, session_id, pending);
    }

    fn track(&mut self, kind: RequestKind, session_id: SessionId, pending: Pending<()>) {
        self.requests.push(Request {
            kind,
            session_id,
            pending,
        });
    }

    fn poll_requests(&mut self) {
        let mut index = 0;
        while index < self.requests.len() {
            match self.requests[index].pending.try_take() {
                Some(result) => {
                    let request = self.requests.remove(index);
                    if let Err(e) = result {
                        self.request_failed(&request, &e);
                    }
                }
                None => index += 1,
            }
        }
    }

    fn request_failed(&mut self, request: &Request, e: &anyhow::Error) {
        let session_id = request.session_id.as_str();
        match request.kind {
            RequestKind::Input => {
                tracing::warn!("failed to send input to {session_id}: {e:#}");
                let current = self.resolve().and_then(|tab| tab.session_id);
                if current.as_deref() == Some(session_id) && !self.status.is_fatal_error {
                    self.status = Status::transient(format!("Failed to send input: {e:#}"));
                }
            }
            RequestKind::Nudge => tracing::debug!("nudge to {session_id} failed: {e:#}"),
            RequestKind::Resize => tracing::warn!("failed to resize {session_id}: {e:#}"),
            RequestKind::Close => tracing::warn!("failed to close session {session_id}: {e:#}"),
        }
    }

    fn attach(&mut self, key: TabKey, session_id: SessionId, buffer_empty: bool) {
        if self
            .active
            .as_ref()
            .is_some_and(|a| a.session_id == session_id)
        {
            return;
        }
        let kind = if self.hydrated_sessions.contains(&session_id) {
            SessionKind::Rehydrated
        } else {
            SessionKind::Fresh
        };
        if kind == SessionKind::Rehydrated && buffer_empty && !self.nudged.contains(&session_id) {
            self.pending_nudge = Some(session_id.clone());
        }
        self.start_stream(key, session_id, kind.policy());
    }

    /// Subscribe to `session_id`'s events. A no-op when that session is already live.
    fn start_stream(&mut self, key: TabKey, session_id: SessionId, policy: RetryPolicy) {
        if self
            .active
            .as_ref()
            .is_some_and(|a| a.session_id == session_id)
        {
            tracing::debug!("stream for {session_id} already live");
            return;
        }
        self.disconnect();

        let stream = self.next_stream;
        self.next_stream += 1;
        tracing::debug!("connecting stream {stream} to {session_id}");
        self.store.set_connecting(&key.directory, &key.tab_id, true);
        self.set_phase(
            &key,
            TabPhase::Streaming {
                session_id: session_id.clone(),
                connected: false,
            },
        );
        // Registered before connecting so events emitted during `connect` are accepted.
        self.active = Some(ActiveStream {
            key,
            session_id: session_id.clone(),
            stream,
            handle: None,
        });

        let sink = EventSink::new(session_id.clone(), stream, self.events_tx.clone());
        match self.transport.connect(&session_id, policy, sink) {
            Ok(handle) => {
                if let Some(active) = self.active.as_mut() {
                    active.handle = Some(handle);
                }
            }
            Err(e) => {
                tracing::warn!("failed to connect to {session_id}: {e:#}");
                self.handle_event(SessionEvent {
                    session_id,
                    stream,
                    event: StreamEvent::Error {
                        message: format!("Failed to connect: {e:#}"),
                        fatal: true,
                    },
                });
            }
        }
    }

    /// Stop the live stream, if any. Events it still delivers are discarded.
    fn disconnect(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        tracing::debug!("disconnecting stream {} from {}", active.stream, active.session_id);
        if let Some(mut handle) = active.handle {
            handle.close();
        }
        if self.phase(&active.key).session_id() == Some(active.session_id.as_str()) {
            self.set_phase(&active.key, TabPhase::Idle);
        }
        self.store
            .set_connecting(&active.key.directory, &active.key.tab_id, false);
        if self.pending_nudge.as_deref() == Some(active.session_id.as_str()) {
            self.pending_nudge = None;
        }
    }

    fn handle_event(&mut self, event: SessionEvent) {
        let Some(active) = self
            .active
            .as_ref()
            .filter(|a| a.session_id == event.session_id && a.stream == event.stream)
        else {
            tracing::trace!("dropping event for stale stream {}", event.session_id);
            return;
        };
        let key = active.key.clone();
        let next = self.phase(&key).on_event(&event.event);

        match event.event {
            StreamEvent::Connected => {
                tracing::info!("stream connected to {}", event.session_id);
                self.status = Status::default();
                self.store.set_connecting(&key.directory, &key.tab_id, false);
                self.set_phase(&key, next);
                self.viewport.focus();
                self.send_nudge(&event.session_id);
            }
            StreamEvent::Reconnecting {
                attempt,
                max_attempts,
            } => {
                self.status =
                    Status::transient(format!("Reconnecting ({attempt}/{max_attempts})…"));
                self.set_phase(&key, next);
            }
            StreamEvent::Data(bytes) => {
                self.viewport.write(&bytes);
                self.store.append_to_buffer(&key.directory, &key.tab_id, bytes);
            }
            StreamEvent::Exit { exit_code, signal } => {
                tracing::info!(
                    "session {} exited (code {exit_code:?}, signal {signal:?})",
                    event.session_id
                );
                let banner = exit_banner(exit_code, signal.as_deref());
                self.viewport.write(banner.as_bytes());
                self.store
                    .append_to_buffer(&key.directory, &key.tab_id, banner.into_bytes());
                self.clear_session(&key);
                self.status = Status::transient(SESSION_ENDED_MESSAGE);
                self.disconnect();
                self.set_phase(&key, next);
            }
            StreamEvent::Error {
                message,
                fatal: false,
            } => {
                tracing::warn!("stream error for {}: {message}", event.session_id);
                self.status = Status::transient(message);
            }
            StreamEvent::Error {
                message,
                fatal: true,
            } => {
                tracing::error!("stream for {} failed: {message}", event.session_id);
                self.clear_session(&key);
                self.status = Status::fatal(message);
                self.disconnect();
                self.set_phase(&key, next);
            }
        }
    }

    fn send_nudge(&mut self, session_id: &str) {
        if self.pending_nudge.as_deref() != Some(session_id) {
            return;
        }
        self.pending_nudge = None;
        self.nudged.insert(session_id.to_string());
        tracing::debug!("nudging reattached session {session_id}");
        let pending = self.transport.send_input(session_id, NUDGE);
        self.track(RequestKind::Nudge, session_id.to_string(), pending);
    }

    fn clear_session(&mut self, key: &TabKey) {
        if let Err(e) = self
            .store
            .set_tab_session_id(&key.directory, &key.tab_id, None)
        {
            tracing::error!("failed to clear session of tab {}: {e:#}", key.tab_id);
        }
    }

    fn write_input(&mut self, data: &[u8]) {
        let Some(session_id) = self.resolve().and_then(|tab| tab.session_id) else {
            tracing::debug!("dropping input: no session");
            return;
        };
        let pending = self.transport.send_input(&session_id, data);
        self.track(RequestKind::Input, session_id, pending);
    }

    fn flush_resize(&mut self) {
        let Some(geometry) = self.pending_resize.take() else {
            return;
        };
        if !self.visible {
            return;
        }
        let Some(session_id) = self.resolve().and_then(|tab| tab.session_id) else {
            return;
        };
        let request = ResizeRequest {
            session_id,
            cols: geometry.cols,
            rows: geometry.rows,
        };
        let pending = self.transport.resize(&request);
        self.track(RequestKind::Resize, request.session_id, pending);
    }

    fn fail(&mut self, key: &TabKey, message: String) {
        self.status = Status::fatal(message.clone());
        self.set_phase(key, TabPhase::Fatal { message });
    }

    fn report_store_error(&mut self, action: &str, e: &anyhow::Error) {
        tracing::error!("failed to {action}: {e:#}");
        self.status = Status::transient(format!("Failed to {action}: {e:#}"));
    }
}

fn exit_banner(exit_code: Option<i32>, signal: Option<&str>) -> String {
    let detail = match (exit_code, signal) {
        (_, Some(signal)) => format!("terminated by signal {signal}"),
        (Some(code), None) => format!("exited with code {code}"),
        (None, None) => "exited".to_string(),
    };
    format!("\r\n\x1b[2m[process {detail}]\x1b[0m\r\n")
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use anyhow::{Result, anyhow, bail};

    use super::*;
    use crate::store::Store;
    use crate::transport::Completer;

    struct FakeHandle {
        live: Rc<Cell<usize>>,
        open: bool,
    }

    impl StreamHandle for FakeHandle {
        fn close(&mut self) {
            if self.open {
                self.open = false;
                self.live.set(self.live.get() - 1);
            }
        }
    }

    #[derive(Default)]
    struct FakeTransport {
        creates: RefCell<Vec<CreateSession>>,
        completers: RefCell<Vec<Option<Completer<SessionId>>>>,
        connects: RefCell<Vec<(SessionId, RetryPolicy)>>,
        sinks: RefCell<Vec<EventSink>>,
        live: Rc<Cell<usize>>,
        inputs: RefCell<Vec<(SessionId, Vec<u8>)>>,
        resizes: RefCell<Vec<ResizeRequest>>,
        closed: RefCell<Vec<SessionId>>,
        fail_input: Cell<bool>,
        fail_connect: Cell<bool>,
        /// Leave requests outstanding until `complete_deferred`.
        defer_requests: Cell<bool>,
        deferred: RefCell<Vec<Completer<()>>>,
    }

    impl FakeTransport {
        fn resolve(&self, index: usize, result: Result<SessionId>) {
            self.completers.borrow_mut()[index]
                .take()
                .expect("creation already resolved")
                .complete(result);
        }

        fn emit(&self, index: usize, event: StreamEvent) {
            self.sinks.borrow()[index].emit(event);
        }

        fn create_count(&self) -> usize {
            self.creates.borrow().len()
        }

        fn inputs(&self) -> Vec<(SessionId, Vec<u8>)> {
            self.inputs.borrow().clone()
        }

        fn closed(&self) -> Vec<SessionId> {
            self.closed.borrow().clone()
        }

        fn reply(&self, result: Result<()>) -> Pending<()> {
            if !self.defer_requests.get() {
                return Pending::ready(result);
            }
            let (completer, pending) = Pending::channel();
            self.deferred.borrow_mut().push(completer);
            pending
        }

        fn complete_deferred(&self, result: impl Fn() -> Result<()>) {
            for completer in self.deferred.borrow_mut().drain(..) {
                completer.complete(result());
            }
        }
    }

    impl Transport for FakeTransport {
        fn create_session(&self, request: CreateSession) -> Pending<SessionId> {
            let (completer, pending) = Pending::channel();
            self.creates.borrow_mut().push(request);
            self.completers.borrow_mut().push(Some(completer));
            pending
        }

        fn connect(
            &self,
            session_id: &str,
            policy: RetryPolicy,
            sink: EventSink,
        ) -> Result<Box<dyn StreamHandle>> {
            if self.fail_connect.get() {
                bail!("host unreachable");
            }
            self.connects
                .borrow_mut()
                .push((session_id.to_string(), policy));
            self.sinks.borrow_mut().push(sink);
            self.live.set(self.live.get() + 1);
            Ok(Box::new(FakeHandle {
                live: Rc::clone(&self.live),
                open: true,
            }))
        }

        fn send_input(&self, session_id: &str, data: &[u8]) -> Pending<()> {
            if self.fail_input.get() {
                return self.reply(Err(anyhow!("broken pipe")));
            }
            self.inputs
                .borrow_mut()
                .push((session_id.to_string(), data.to_vec()));
            self.reply(Ok(()))
        }

        fn resize(&self, request: &ResizeRequest) -> Pending<()> {
            self.resizes.borrow_mut().push(request.clone());
            self.reply(Ok(()))
        }

        fn close(&self, session_id: &str) -> Pending<()> {
            self.closed.borrow_mut().push(session_id.to_string());
            self.reply(Ok(()))
        }
    }

    #[derive(Default)]
    struct FakeViewport {
        screen: Vec<u8>,
        focused: usize,
        fit: Option<Geometry>,
    }

    impl Viewport for FakeViewport {
        fn write(&mut self, bytes: &[u8]) {
            self.screen.extend_from_slice(bytes);
        }

        fn clear(&mut self) {
            self.screen.clear();
        }

        fn focus(&mut self) {
            self.focused += 1;
        }

        fn fit(&mut self) -> Option<Geometry> {
            self.fit
        }
    }

    type TestOrchestrator = Orchestrator<Store, FakeTransport, FakeViewport>;

    fn store_with_tabs(directory: &str, count: usize) -> (Store, Vec<TabId>) {
        let mut store = Store::open_in_memory().unwrap();
        store.hydrate().unwrap();
        store.ensure_directory(directory).unwrap();
        let ids = (0..count)
            .map(|_| store.create_tab(directory).unwrap())
            .collect();
        (store, ids)
    }

    fn orchestrator(store: Store, hydrated: &[&str]) -> TestOrchestrator {
        Orchestrator::new(
            store,
            FakeTransport::default(),
            FakeViewport::default(),
            hydrated.iter().map(|s| (*s).to_string()).collect(),
        )
    }

    fn open(o: &mut TestOrchestrator, directory: &str) {
        o.set_location(Location::Directory(directory.to_string()));
        o.set_visible(true);
    }

    /// One tab in `/repo` already bound to `session`.
    fn bound(session: &str, hydrated: &[&str]) -> (TestOrchestrator, TabId) {
        let (mut store, ids) = store_with_tabs("/repo", 1);
        store
            .set_tab_session_id("/repo", &ids[0], Some(session))
            .unwrap();
        (orchestrator(store, hydrated), ids[0].clone())
    }

    fn session_of(o: &TestOrchestrator, directory: &str, tab_id: &str) -> Option<SessionId> {
        o.store()
            .directory_state(directory)
            .and_then(|s| s.tab(tab_id))
            .and_then(|t| t.session_id.clone())
    }

    #[test]
    fn directory_without_tabs_does_nothing() {
        let (store, _) = store_with_tabs("/repo", 0);
        let mut o = orchestrator(store, &[]);
        open(&mut o, "/repo");
        o.pump();

        assert_eq!(o.transport().create_count(), 0);
        assert!(o.transport().connects.borrow().is_empty());
        assert_eq!(o.status(), &Status::default());
    }

    #[test]
    fn fresh_tab_creates_then_streams() {
        let (store, ids) = store_with_tabs("/repo", 1);
        let mut o = orchestrator(store, &[]).with_geometry(Geometry { cols: 120, rows: 40 });
        open(&mut o, "/repo");

        assert_eq!(
            o.transport().creates.borrow().as_slice(),
            [CreateSession {
                cwd: "/repo".into(),
                cols: Some(120),
                rows: Some(40),
            }]
        );
        assert!(o.current_tab().unwrap().is_connecting);
        assert_eq!(o.current_phase(), TabPhase::Acquiring);

        o.transport().resolve(0, Ok("s1".into()));
        o.pump();
        assert_eq!(session_of(&o, "/repo", &ids[0]).as_deref(), Some("s1"));
        assert_eq!(
            o.transport().connects.borrow().as_slice(),
            [("s1".to_string(), RetryPolicy::FRESH)]
        );

        let focused = o.viewport().focused;
        o.transport().emit(0, StreamEvent::Connected);
        o.pump();
        assert_eq!(o.status(), &Status::default());
        assert!(!o.current_tab().unwrap().is_connecting);
        assert_eq!(o.viewport().focused, focused + 1);
        assert_eq!(
            o.current_phase(),
            TabPhase::Streaming {
                session_id: "s1".into(),
                connected: true
            }
        );
        // Fresh sessions are never nudged.
        assert!(o.transport().inputs().is_empty());
    }

    #[test]
    fn rehydrated_session_is_nudged_exactly_once() {
        let (mut store, ids) = store_with_tabs("/repo", 2);
        store
            .set_tab_session_id("/repo", &ids[0], Some("s1"))
            .unwrap();
        store.set_active_tab("/repo", &ids[0]).unwrap();
        let mut o = orchestrator(store, &["s1"]);
        open(&mut o, "/repo");

        assert_eq!(o.transport().create_count(), 0);
        assert_eq!(
            o.transport().connects.borrow().as_slice(),
            [("s1".to_string(), RetryPolicy::REHYDRATED)]
        );

        o.transport().emit(0, StreamEvent::Connected);
        o.pump();
        assert_eq!(o.transport().inputs(), [("s1".to_string(), b"\r".to_vec())]);

        o.transport().emit(
            0,
            StreamEvent::Reconnecting {
                attempt: 1,
                max_attempts: 0,
            },
        );
        o.transport().emit(0, StreamEvent::Connected);
        o.pump();
        assert_eq!(o.transport().inputs().len(), 1);

        // Away and back again: a new subscription, still no second nudge.
        o.select_tab(&ids[1]);
        o.select_tab(&ids[0]);
        assert_eq!(o.transport().connects.borrow().len(), 2);
        o.transport().emit(1, StreamEvent::Connected);
        o.pump();
        assert_eq!(o.transport().inputs().len(), 1);
    }

    #[test]
    fn rehydrated_session_with_scrollback_is_not_nudged() {
        let (mut o, tab) = bound("s1", &["s1"]);
        o.store_mut()
            .append_to_buffer("/repo", &tab, b"$ ".to_vec());
        open(&mut o, "/repo");
        o.transport().emit(0, StreamEvent::Connected);
        o.pump();
        assert!(o.transport().inputs().is_empty());
    }

    #[test]
    fn result_for_abandoned_directory_is_closed() {
        let (mut store, a) = store_with_tabs("/a", 1);
        store.ensure_directory("/b").unwrap();
        store.create_tab("/b").unwrap();
        let mut o = orchestrator(store, &[]);
        open(&mut o, "/a");
        o.set_location(Location::Directory("/b".into()));
        assert_eq!(o.transport().create_count(), 2);

        o.transport().resolve(0, Ok("orphan".into()));
        o.pump();
        assert_eq!(o.transport().closed(), ["orphan"]);
        assert_eq!(session_of(&o, "/a", &a[0]), None);
        assert!(o.transport().connects.borrow().is_empty());
    }

    #[test]
    fn returning_to_a_tab_waits_for_its_cancelled_creation() {
        let (store, ids) = store_with_tabs("/repo", 2);
        let mut o = orchestrator(store, &[]);
        open(&mut o, "/repo");
        assert_eq!(o.current_tab().unwrap().id, ids[1]);

        o.select_tab(&ids[0]);
        o.select_tab(&ids[1]);
        o.pump();
        assert_eq!(o.transport().create_count(), 2);

        o.transport().resolve(0, Ok("late".into()));
        o.pump();
        assert_eq!(o.transport().closed(), ["late"]);
        assert_eq!(o.transport().create_count(), 3);

        o.transport().resolve(2, Ok("s3".into()));
        o.pump();
        assert_eq!(session_of(&o, "/repo", &ids[1]).as_deref(), Some("s3"));
    }

    #[test]
    fn at_most_one_creation_in_flight() {
        let (store, _) = store_with_tabs("/repo", 1);
        let mut o = orchestrator(store, &[]);
        open(&mut o, "/repo");
        o.pump();
        o.pump();
        o.set_visible(false);
        o.set_visible(true);
        o.set_tabs_enabled(false);
        o.set_tabs_enabled(true);
        o.pump();
        assert_eq!(o.transport().create_count(), 1);
    }

    #[test]
    fn starting_same_stream_twice_keeps_one_subscription() {
        let (mut o, tab) = bound("s1", &[]);
        open(&mut o, "/repo");
        assert_eq!(o.transport().live.get(), 1);

        o.start_stream(TabKey::new("/repo", &tab), "s1".into(), RetryPolicy::FRESH);
        o.pump();
        assert_eq!(o.transport().connects.borrow().len(), 1);
        assert_eq!(o.transport().live.get(), 1);
    }

    #[test]
    fn events_after_disconnect_are_discarded() {
        let (mut o, tab) = bound("s1", &[]);
        open(&mut o, "/repo");
        o.transport().emit(0, StreamEvent::Connected);
        o.transport().emit(0, StreamEvent::Data(b"a".to_vec()));
        o.pump();

        o.set_location(Location::NoDirectory);
        assert_eq!(o.transport().live.get(), 0);
        o.transport().emit(0, StreamEvent::Data(b"b".to_vec()));
        o.transport().emit(
            0,
            StreamEvent::Exit {
                exit_code: Some(0),
                signal: None,
            },
        );
        o.pump();

        let state = o.store().directory_state("/repo").unwrap();
        let t = state.tab(&tab).unwrap();
        assert_eq!(t.buffer_chunks, [b"a".to_vec()]);
        assert_eq!(t.session_id.as_deref(), Some("s1"));
        assert_eq!(
            o.status().connection_error.as_deref(),
            Some(NO_DIRECTORY_MESSAGE)
        );
    }

    #[test]
    fn queued_events_of_replaced_stream_are_discarded() {
        let (store, ids) = store_with_tabs("/repo", 2);
        let mut o = orchestrator(store, &[]);
        o.store_mut()
            .set_tab_session_id("/repo", &ids[1], Some("s1"))
            .unwrap();
        open(&mut o, "/repo");
        // Queued by the first subscription, then the same session is reopened.
        o.transport().emit(0, StreamEvent::Data(b"old".to_vec()));
        o.select_tab(&ids[0]);
        o.select_tab(&ids[1]);
        o.pump();
        o.pump();

        let state = o.store().directory_state("/repo").unwrap();
        assert!(state.tab(&ids[1]).unwrap().buffer_is_empty());
    }

    #[test]
    fn exit_clears_session_and_reselect_allocates_fresh() {
        let (mut o, tab) = bound("s1", &[]);
        open(&mut o, "/repo");
        o.transport().emit(0, StreamEvent::Connected);
        o.transport().emit(
            0,
            StreamEvent::Exit {
                exit_code: Some(0),
                signal: None,
            },
        );
        o.pump();

        assert_eq!(session_of(&o, "/repo", &tab), None);
        assert_eq!(
            o.status(),
            &Status {
                connection_error: Some(SESSION_ENDED_MESSAGE.into()),
                is_fatal_error: false
            }
        );
        assert_eq!(o.transport().live.get(), 0);
        assert_eq!(o.current_phase(), TabPhase::Ended);
        let screen = String::from_utf8_lossy(&o.viewport().screen).to_string();
        assert!(screen.contains("[process exited with code 0]"));

        o.pump();
        assert_eq!(o.transport().create_count(), 0);

        o.select_tab(&tab);
        assert_eq!(o.transport().create_count(), 1);
    }

    #[test]
    fn signal_exit_names_the_signal() {
        assert!(exit_banner(None, Some("SIGKILL")).contains("terminated by signal SIGKILL"));
        assert!(exit_banner(Some(2), None).contains("exited with code 2"));
    }

    #[test]
    fn resize_forwarded_only_while_visible_latest_wins() {
        let (mut o, _) = bound("s1", &[]);
        o.set_location(Location::Directory("/repo".into()));
        o.resize(100, 30);
        o.pump();
        assert!(o.transport().resizes.borrow().is_empty());

        o.set_visible(true);
        o.resize(90, 20);
        o.resize(91, 21);
        o.resize(92, 22);
        o.pump();
        assert_eq!(
            o.transport().resizes.borrow().as_slice(),
            [ResizeRequest {
                session_id: "s1".into(),
                cols: 92,
                rows: 22
            }]
        );

        o.set_visible(false);
        o.resize(50, 10);
        o.pump();
        assert_eq!(o.transport().resizes.borrow().len(), 1);
    }

    #[test]
    fn showing_fits_viewport_and_forwards_geometry() {
        let (mut o, _) = bound("s1", &[]);
        o.viewport.fit = Some(Geometry { cols: 70, rows: 18 });
        open(&mut o, "/repo");
        o.pump();
        assert_eq!(
            o.transport().resizes.borrow().as_slice(),
            [ResizeRequest {
                session_id: "s1".into(),
                cols: 70,
                rows: 18
            }]
        );
    }

    #[test]
    fn hidden_resize_sizes_the_next_creation() {
        let (store, _) = store_with_tabs("/repo", 1);
        let mut o = orchestrator(store, &[]);
        o.resize(132, 40);
        open(&mut o, "/repo");
        let creates = o.transport().creates.borrow();
        assert_eq!(creates[0].cols, Some(132));
        assert_eq!(creates[0].rows, Some(40));
    }

    #[test]
    fn nothing_happens_before_hydration_or_first_show() {
        let mut store = Store::open_in_memory().unwrap();
        store.ensure_directory("/repo").unwrap();
        store.create_tab("/repo").unwrap();
        let mut o = orchestrator(store, &[]);

        o.set_location(Location::Directory("/repo".into()));
        o.pump();
        assert_eq!(o.transport().create_count(), 0);

        o.set_visible(true);
        o.pump();
        assert_eq!(o.transport().create_count(), 0);

        o.store_mut().hydrate().unwrap();
        o.pump();
        assert_eq!(o.transport().create_count(), 1);
    }

    #[test]
    fn opened_latch_survives_hiding() {
        let (store, ids) = store_with_tabs("/repo", 1);
        let mut o = orchestrator(store, &[]);
        open(&mut o, "/repo");
        o.set_visible(false);
        o.transport().resolve(0, Ok("s1".into()));
        o.pump();
        assert_eq!(session_of(&o, "/repo", &ids[0]).as_deref(), Some("s1"));
        assert_eq!(o.transport().connects.borrow().len(), 1);
    }

    #[test]
    fn creation_failure_is_fatal_without_retry() {
        let (store, _) = store_with_tabs("/repo", 1);
        let mut o = orchestrator(store, &[]);
        open(&mut o, "/repo");
        o.transport()
            .resolve(0, Err(anyhow!("no such directory: /repo")));
        o.pump();

        assert!(o.status().is_fatal_error);
        assert!(
            o.status()
                .connection_error
                .as_deref()
                .unwrap()
                .contains("no such directory")
        );
        assert!(!o.current_tab().unwrap().is_connecting);
        o.pump();
        o.pump();
        assert_eq!(o.transport().create_count(), 1);

        o.hard_restart();
        assert_eq!(o.transport().create_count(), 2);
        assert_eq!(o.status(), &Status::default());
        assert_eq!(o.directory_state().unwrap().tabs.len(), 1);
    }

    #[test]
    fn transient_stream_error_keeps_session() {
        let (mut o, tab) = bound("s1", &[]);
        open(&mut o, "/repo");
        o.transport().emit(
            0,
            StreamEvent::Error {
                message: "hiccup".into(),
                fatal: false,
            },
        );
        o.pump();
        assert_eq!(o.status(), &Status::transient("hiccup"));
        assert_eq!(o.transport().live.get(), 1);
        assert_eq!(session_of(&o, "/repo", &tab).as_deref(), Some("s1"));
    }

    #[test]
    fn fatal_stream_error_clears_session_and_holds() {
        let (mut o, tab) = bound("s1", &[]);
        open(&mut o, "/repo");
        o.transport().emit(
            0,
            StreamEvent::Error {
                message: "Connection lost".into(),
                fatal: true,
            },
        );
        o.pump();
        assert_eq!(o.status(), &Status::fatal("Connection lost"));
        assert_eq!(o.transport().live.get(), 0);
        assert_eq!(session_of(&o, "/repo", &tab), None);
        o.pump();
        assert_eq!(o.transport().create_count(), 0);
    }

    #[test]
    fn connect_failure_is_fatal() {
        let (mut o, tab) = bound("s1", &[]);
        o.transport().fail_connect.set(true);
        open(&mut o, "/repo");
        assert!(o.status().is_fatal_error);
        assert_eq!(session_of(&o, "/repo", &tab), None);
    }

    #[test]
    fn reconnecting_shows_attempts() {
        let (mut o, _) = bound("s1", &[]);
        open(&mut o, "/repo");
        o.transport().emit(
            0,
            StreamEvent::Reconnecting {
                attempt: 2,
                max_attempts: 3,
            },
        );
        o.pump();
        assert_eq!(
            o.status().connection_error.as_deref(),
            Some("Reconnecting (2/3)…")
        );
        o.transport().emit(0, StreamEvent::Connected);
        o.pump();
        assert_eq!(o.status(), &Status::default());
    }

    #[test]
    fn modifier_applies_to_one_keystroke() {
        let (mut o, _) = bound("s1", &[]);
        open(&mut o, "/repo");

        o.arm_modifier(Modifier::Ctrl);
        o.on_input(b"c");
        o.on_input(b"c");
        o.arm_modifier(Modifier::Ctrl);
        o.on_input(b"1");
        assert_eq!(o.modifier(), None);
        o.arm_modifier(Modifier::Ctrl);
        o.send_key(NamedKey::Up);
        o.send_key(NamedKey::Up);

        let sent: Vec<Vec<u8>> = o.transport().inputs().into_iter().map(|(_, d)| d).collect();
        assert_eq!(
            sent,
            [
                vec![0x03],
                b"c".to_vec(),
                b"1".to_vec(),
                b"\x1b[1;5A".to_vec(),
                b"\x1b[A".to_vec(),
            ]
        );

        o.arm_modifier(Modifier::Cmd);
        o.arm_modifier(Modifier::Cmd);
        assert_eq!(o.modifier(), None);
    }

    #[test]
    fn input_failure_is_transient() {
        let (mut o, _) = bound("s1", &[]);
        open(&mut o, "/repo");
        o.transport().fail_input.set(true);
        o.on_input(b"x");
        o.pump();
        assert!(!o.status().is_fatal_error);
        assert!(
            o.status()
                .connection_error
                .as_deref()
                .unwrap()
                .starts_with("Failed to send input")
        );
        assert_eq!(o.transport().live.get(), 1);
    }

    #[test]
    fn slow_input_is_reported_on_a_later_tick() {
        let (mut o, _) = bound("s1", &[]);
        open(&mut o, "/repo");
        o.transport().defer_requests.set(true);

        o.on_input(b"ls\r");
        o.on_input(b"pwd\r");
        o.pump();
        assert_eq!(o.status(), &Status::default());
        assert_eq!(o.transport().inputs().len(), 2);

        o.transport().complete_deferred(|| Err(anyhow!("no reply from session host")));
        o.pump();
        assert!(!o.status().is_fatal_error);
        assert!(
            o.status()
                .connection_error
                .as_deref()
                .unwrap()
                .contains("no reply from session host")
        );
    }

    #[test]
    fn input_failure_for_a_replaced_session_is_not_shown() {
        let (mut o, tab) = bound("s1", &[]);
        open(&mut o, "/repo");
        o.transport().defer_requests.set(true);
        o.on_input(b"x");

        o.close_tab(&tab);
        o.transport().complete_deferred(|| Err(anyhow!("broken pipe")));
        o.pump();
        assert_eq!(o.status(), &Status::default());
    }

    #[test]
    fn shutdown_waits_for_pending_closes() {
        let (mut o, tab) = bound("s1", &[]);
        open(&mut o, "/repo");
        o.transport().defer_requests.set(true);
        o.close_tab(&tab);
        assert_eq!(o.transport().closed(), ["s1"]);

        o.transport().complete_deferred(|| Ok(()));
        o.shutdown();
        assert!(o.requests.is_empty());
    }

    /// Delegates to a real store, failing the operations that are switched on.
    struct FlakyStore {
        inner: Store,
        fail_create: bool,
        fail_select: bool,
    }

    impl TabStore for FlakyStore {
        fn has_hydrated(&self) -> bool {
            self.inner.has_hydrated()
        }

        fn ensure_directory(&mut self, directory: &str) -> Result<()> {
            self.inner.ensure_directory(directory)
        }

        fn create_tab(&mut self, directory: &str) -> Result<TabId> {
            if self.fail_create {
                bail!("disk I/O error");
            }
            self.inner.create_tab(directory)
        }

        fn set_active_tab(&mut self, directory: &str, tab_id: &str) -> Result<()> {
            if self.fail_select {
                bail!("database is locked");
            }
            self.inner.set_active_tab(directory, tab_id)
        }

        fn close_tab(&mut self, directory: &str, tab_id: &str) -> Result<Option<SessionId>> {
            self.inner.close_tab(directory, tab_id)
        }

        fn set_tab_session_id(
            &mut self,
            directory: &str,
            tab_id: &str,
            session_id: Option<&str>,
        ) -> Result<()> {
            self.inner.set_tab_session_id(directory, tab_id, session_id)
        }

        fn set_connecting(&mut self, directory: &str, tab_id: &str, connecting: bool) {
            self.inner.set_connecting(directory, tab_id, connecting);
        }

        fn append_to_buffer(&mut self, directory: &str, tab_id: &str, chunk: Vec<u8>) {
            self.inner.append_to_buffer(directory, tab_id, chunk);
        }

        fn directory_state(&self, directory: &str) -> Option<&DirectoryState> {
            self.inner.directory_state(directory)
        }
    }

    type FlakyOrchestrator = Orchestrator<FlakyStore, FakeTransport, FakeViewport>;

    fn flaky(fail_create: bool, fail_select: bool) -> (FlakyOrchestrator, Vec<TabId>) {
        let (inner, ids) = store_with_tabs("/repo", 2);
        let store = FlakyStore {
            inner,
            fail_create,
            fail_select,
        };
        let mut o = Orchestrator::new(
            store,
            FakeTransport::default(),
            FakeViewport::default(),
            HashSet::new(),
        );
        o.set_location(Location::Directory("/repo".into()));
        o.set_visible(true);
        (o, ids)
    }

    #[test]
    fn store_failure_on_select_is_not_fatal() {
        let (mut o, ids) = flaky(false, true);
        let before = o.current_tab().unwrap().id.clone();

        o.select_tab(&ids[0]);
        let status = o.status();
        assert!(!status.is_fatal_error);
        assert_eq!(
            status.connection_error.as_deref(),
            Some("Failed to select tab: database is locked")
        );
        assert_eq!(o.current_tab().unwrap().id, before);
    }

    #[test]
    fn store_failure_on_create_is_not_fatal() {
        let (mut o, _) = flaky(true, false);

        assert_eq!(o.create_tab(), None);
        let status = o.status();
        assert!(!status.is_fatal_error);
        assert_eq!(
            status.connection_error.as_deref(),
            Some("Failed to create tab: disk I/O error")
        );
        assert_eq!(o.directory_state().unwrap().tabs.len(), 2);
    }

    #[test]
    fn disabled_tabs_use_first_tab() {
        let (store, ids) = store_with_tabs("/repo", 2);
        let mut o = orchestrator(store, &[]);
        o.set_tabs_enabled(false);
        open(&mut o, "/repo");
        assert_eq!(o.current_tab().unwrap().id, ids[0]);
        assert_eq!(o.transport().create_count(), 1);
    }

    #[test]
    fn missing_context_is_reported() {
        let (store, _) = store_with_tabs("/repo", 1);
        let mut o = orchestrator(store, &[]);
        o.set_visible(true);
        assert_eq!(
            o.status().connection_error.as_deref(),
            Some(NO_CONTEXT_MESSAGE)
        );
        o.set_location(Location::NoDirectory);
        assert_eq!(
            o.status().connection_error.as_deref(),
            Some(NO_DIRECTORY_MESSAGE)
        );
        assert!(!o.status().is_fatal_error);
        assert_eq!(o.transport().create_count(), 0);
    }

    #[test]
    fn restart_closes_session_and_starts_over() {
        let (mut o, tab) = bound("s1", &[]);
        open(&mut o, "/repo");
        o.restart();

        assert_eq!(o.transport().closed(), ["s1"]);
        let state = o.directory_state().unwrap();
        assert_eq!(state.tabs.len(), 1);
        assert_ne!(state.tabs[0].id, tab);
        assert_eq!(o.transport().create_count(), 1);
        assert_eq!(o.transport().live.get(), 0);
    }

    #[test]
    fn close_tab_moves_to_neighbour() {
        let (mut store, ids) = store_with_tabs("/repo", 2);
        store
            .set_tab_session_id("/repo", &ids[0], Some("s0"))
            .unwrap();
        store
            .set_tab_session_id("/repo", &ids[1], Some("s1"))
            .unwrap();
        let mut o = orchestrator(store, &[]);
        open(&mut o, "/repo");
        o.close_tab(&ids[1]);

        assert_eq!(o.transport().closed(), ["s1"]);
        assert_eq!(o.current_tab().unwrap().id, ids[0]);
        let connects = o.transport().connects.borrow();
        assert_eq!(connects.last().unwrap().0, "s0");
    }

    #[test]
    fn switching_tabs_replays_scrollback() {
        let (store, ids) = store_with_tabs("/repo", 2);
        let mut o = orchestrator(store, &[]);
        o.store_mut()
            .set_tab_session_id("/repo", &ids[0], Some("s0"))
            .unwrap();
        o.store_mut()
            .set_tab_session_id("/repo", &ids[1], Some("s1"))
            .unwrap();
        open(&mut o, "/repo");
        o.transport().emit(0, StreamEvent::Data(b"hello".to_vec()));
        o.pump();

        o.select_tab(&ids[0]);
        assert!(o.viewport().screen.is_empty());
        o.select_tab(&ids[1]);
        assert_eq!(o.viewport().screen, b"hello");
    }

    #[test]
    fn select_adjacent_wraps() {
        let (store, ids) = store_with_tabs("/repo", 3);
        let mut o = orchestrator(store, &[]);
        open(&mut o, "/repo");
        o.select_adjacent(1);
        assert_eq!(o.current_tab().unwrap().id, ids[0]);
        o.select_adjacent(-1);
        assert_eq!(o.current_tab().unwrap().id, ids[2]);
    }

    #[test]
    fn shutdown_closes_outstanding_creations() {
        let (store, _) = store_with_tabs("/repo", 1);
        let mut o = orchestrator(store, &[]);
        open(&mut o, "/repo");
        o.transport().resolve(0, Ok("s9".into()));
        o.shutdown();
        assert_eq!(o.transport().closed(), ["s9"]);
    }
}
