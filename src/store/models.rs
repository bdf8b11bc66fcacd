use serde::{Deserialize, Serialize};

/// Backend-assigned identifier of a PTY session.
pub type SessionId = String;

pub type TabId = String;

/// A named terminal within a working directory.
///
/// `session_id` and the tab metadata persist across restarts; the scrollback
/// (`buffer_chunks`/`buffer_length`) and `is_connecting` live only as long as the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tab {
    pub id: TabId,
    pub label: String,
    pub session_id: Option<SessionId>,
    pub position: i64,
    pub created_at: String,
    #[serde(skip)]
    pub buffer_chunks: Vec<Vec<u8>>,
    #[serde(skip)]
    pub buffer_length: usize,
    #[serde(skip)]
    pub is_connecting: bool,
}

impl Tab {
    pub fn buffer_is_empty(&self) -> bool {
        self.buffer_chunks.is_empty() && self.buffer_length == 0
    }

    pub(crate) fn append(&mut self, chunk: Vec<u8>) {
        self.buffer_length += chunk.len();
        self.buffer_chunks.push(chunk);
    }

    pub(crate) fn reset_buffer(&mut self) {
        self.buffer_chunks.clear();
        self.buffer_length = 0;
    }
}

/// Tabs of one working directory, ordered by position.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryState {
    pub tabs: Vec<Tab>,
    pub active_tab_id: Option<TabId>,
}

impl DirectoryState {
    pub fn tab(&self, tab_id: &str) -> Option<&Tab> {
        self.tabs.iter().find(|t| t.id == tab_id)
    }

    pub(crate) fn tab_mut(&mut self, tab_id: &str) -> Option<&mut Tab> {
        self.tabs.iter_mut().find(|t| t.id == tab_id)
    }

    /// Position for the next tab: one past the highest in use.
    pub(crate) fn next_position(&self) -> i64 {
        self.tabs.iter().map(|t| t.position + 1).max().unwrap_or(0)
    }
}
