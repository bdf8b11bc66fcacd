mod models;
mod queries;

pub use models::*;

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;
use uuid::Uuid;

use crate::config;

/// Persisted mapping of working directory to its tabs, as consumed by the orchestrator.
///
/// Metadata writes (`ensure_directory`, `create_tab`, `set_active_tab`, `close_tab`,
/// `set_tab_session_id`) are durable and may fail; runtime-only state (connecting flag,
/// scrollback) cannot.
pub trait TabStore {
    /// True once persisted state has been loaded.
    fn has_hydrated(&self) -> bool;
    fn ensure_directory(&mut self, directory: &str) -> Result<()>;
    /// Create a tab and make it the active one.
    fn create_tab(&mut self, directory: &str) -> Result<TabId>;
    fn set_active_tab(&mut self, directory: &str, tab_id: &str) -> Result<()>;
    /// Remove a tab, returning the session it was bound to.
    fn close_tab(&mut self, directory: &str, tab_id: &str) -> Result<Option<SessionId>>;
    fn set_tab_session_id(
        &mut self,
        directory: &str,
        tab_id: &str,
        session_id: Option<&str>,
    ) -> Result<()>;
    fn set_connecting(&mut self, directory: &str, tab_id: &str, connecting: bool);
    fn append_to_buffer(&mut self, directory: &str, tab_id: &str, chunk: Vec<u8>);
    fn directory_state(&self, directory: &str) -> Option<&DirectoryState>;
}

/// `SQLite`-backed tab store with a write-through in-memory view.
pub struct Store {
    pub conn: Connection,
    directories: HashMap<String, DirectoryState>,
    hydrated: bool,
}

impl Store {
    pub fn open() -> Result<Self> {
        Self::open_at(&config::db_path()?)
    }

    pub fn open_at(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open database at {}", db_path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let store = Store {
            conn,
            directories: HashMap::new(),
            hydrated: false,
        };
        store.migrate()?;
        Ok(store)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let store = Store {
            conn,
            directories: HashMap::new(),
            hydrated: false,
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS directories (
                path TEXT PRIMARY KEY,
                active_tab_id TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS tabs (
                id TEXT PRIMARY KEY,
                directory TEXT NOT NULL REFERENCES directories(path),
                label TEXT NOT NULL,
                session_id TEXT,
                position INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            ",
        )?;
        Ok(())
    }

    /// Load persisted directories and tabs. Completes the hydration signal.
    pub fn hydrate(&mut self) -> Result<()> {
        self.directories = self
            .load_directories()
            .context("failed to load persisted tabs")?;
        self.hydrated = true;
        tracing::debug!(
            "hydrated {} directories, {} sessions",
            self.directories.len(),
            self.hydrated_session_ids().len()
        );
        Ok(())
    }

    /// Every session id currently bound to a tab. Taken once after hydration, this is the
    /// set of sessions that existed before the current process started.
    pub fn hydrated_session_ids(&self) -> HashSet<SessionId> {
        self.directories
            .values()
            .flat_map(|d| d.tabs.iter())
            .filter_map(|t| t.session_id.clone())
            .collect()
    }

    pub fn directories(&self) -> impl Iterator<Item = (&String, &DirectoryState)> {
        self.directories.iter()
    }

    fn state_mut(&mut self, directory: &str) -> Result<&mut DirectoryState> {
        self.directories
            .get_mut(directory)
            .with_context(|| format!("unknown directory '{directory}'"))
    }
}

impl TabStore for Store {
    fn has_hydrated(&self) -> bool {
        self.hydrated
    }

    fn ensure_directory(&mut self, directory: &str) -> Result<()> {
        if self.directories.contains_key(directory) {
            return Ok(());
        }
        self.insert_directory(directory)?;
        self.directories
            .insert(directory.to_string(), DirectoryState::default());
        Ok(())
    }

    fn create_tab(&mut self, directory: &str) -> Result<TabId> {
        self.ensure_directory(directory)?;
        let position = self.state_mut(directory)?.next_position();
        let tab = Tab {
            id: Uuid::new_v4().to_string(),
            label: format!("Terminal {}", position + 1),
            session_id: None,
            position,
            created_at: chrono::Utc::now().to_rfc3339(),
            buffer_chunks: Vec::new(),
            buffer_length: 0,
            is_connecting: false,
        };
        self.insert_tab(directory, &tab)?;
        self.update_active_tab(directory, Some(&tab.id))?;

        let id = tab.id.clone();
        let state = self.state_mut(directory)?;
        state.tabs.push(tab);
        state.active_tab_id = Some(id.clone());
        Ok(id)
    }

    fn set_active_tab(&mut self, directory: &str, tab_id: &str) -> Result<()> {
        if self.state_mut(directory)?.tab(tab_id).is_none() {
            anyhow::bail!("tab '{tab_id}' not found in '{directory}'");
        }
        self.update_active_tab(directory, Some(tab_id))?;
        self.state_mut(directory)?.active_tab_id = Some(tab_id.to_string());
        Ok(())
    }

    fn close_tab(&mut self, directory: &str, tab_id: &str) -> Result<Option<SessionId>> {
        let state = self.state_mut(directory)?;
        let Some(index) = state.tabs.iter().position(|t| t.id == tab_id) else {
            return Ok(None);
        };

        // Keep the active id pointing at a tab that still exists.
        let next_active = if state.active_tab_id.as_deref() == Some(tab_id) {
            let neighbour = state
                .tabs
                .get(index + 1)
                .or_else(|| index.checked_sub(1).and_then(|i| state.tabs.get(i)));
            neighbour.map(|t| t.id.clone())
        } else {
            state.active_tab_id.clone()
        };

        let session_id = self.delete_tab(tab_id)?;
        self.update_active_tab(directory, next_active.as_deref())?;

        let state = self.state_mut(directory)?;
        state.tabs.remove(index);
        state.active_tab_id = next_active;
        Ok(session_id)
    }

    fn set_tab_session_id(
        &mut self,
        directory: &str,
        tab_id: &str,
        session_id: Option<&str>,
    ) -> Result<()> {
        self.update_tab_session(tab_id, session_id)?;
        if let Some(tab) = self.state_mut(directory)?.tab_mut(tab_id) {
            // A different session means different output; never show the old one's.
            if tab.session_id.as_deref() != session_id && session_id.is_some() {
                tab.reset_buffer();
            }
            tab.session_id = session_id.map(str::to_string);
        }
        Ok(())
    }

    fn set_connecting(&mut self, directory: &str, tab_id: &str, connecting: bool) {
        if let Some(tab) = self
            .directories
            .get_mut(directory)
            .and_then(|d| d.tab_mut(tab_id))
        {
            tab.is_connecting = connecting;
        }
    }

    fn append_to_buffer(&mut self, directory: &str, tab_id: &str, chunk: Vec<u8>) {
        if let Some(tab) = self
            .directories
            .get_mut(directory)
            .and_then(|d| d.tab_mut(tab_id))
        {
            tab.append(chunk);
        }
    }

    fn directory_state(&self, directory: &str) -> Option<&DirectoryState> {
        self.directories.get(directory)
    }
}
