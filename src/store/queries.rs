use std::collections::HashMap;

use anyhow::Result;
use rusqlite::{OptionalExtension, params};

use super::Store;
use super::models::{DirectoryState, Tab};

impl Store {
    // ── Directories ──

    pub(super) fn insert_directory(&self, path: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO directories (path) VALUES (?1)",
            params![path],
        )?;
        Ok(())
    }

    pub(super) fn update_active_tab(&self, path: &str, tab_id: Option<&str>) -> Result<()> {
        self.conn.execute(
            "UPDATE directories SET active_tab_id = ?1 WHERE path = ?2",
            params![tab_id, path],
        )?;
        Ok(())
    }

    // ── Tabs ──

    pub(super) fn insert_tab(&self, directory: &str, tab: &Tab) -> Result<()> {
        self.conn.execute(
            "INSERT INTO tabs (id, directory, label, session_id, position, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                tab.id,
                directory,
                tab.label,
                tab.session_id,
                tab.position,
                tab.created_at
            ],
        )?;
        Ok(())
    }

    pub(super) fn update_tab_session(&self, tab_id: &str, session_id: Option<&str>) -> Result<()> {
        self.conn.execute(
            "UPDATE tabs SET session_id = ?1 WHERE id = ?2",
            params![session_id, tab_id],
        )?;
        Ok(())
    }

    pub(super) fn delete_tab(&self, tab_id: &str) -> Result<Option<String>> {
        let session_id: Option<String> = self
            .conn
            .query_row(
                "SELECT session_id FROM tabs WHERE id = ?1",
                params![tab_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        self.conn
            .execute("DELETE FROM tabs WHERE id = ?1", params![tab_id])?;
        Ok(session_id)
    }

    /// Read every directory with its tabs. Runtime-only tab fields start empty.
    pub(super) fn load_directories(&self) -> Result<HashMap<String, DirectoryState>> {
        let mut directories: HashMap<String, DirectoryState> = HashMap::new();

        let mut stmt = self
            .conn
            .prepare("SELECT path, active_tab_id FROM directories")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for (path, active_tab_id) in rows {
            directories.insert(
                path,
                DirectoryState {
                    tabs: Vec::new(),
                    active_tab_id,
                },
            );
        }

        let mut stmt = self.conn.prepare(
            "SELECT id, directory, label, session_id, position, created_at
             FROM tabs ORDER BY directory, position",
        )?;
        let tabs = stmt
            .query_map([], |row| {
                let directory: String = row.get(1)?;
                Ok((
                    directory,
                    Tab {
                        id: row.get(0)?,
                        label: row.get(2)?,
                        session_id: row.get(3)?,
                        position: row.get(4)?,
                        created_at: row.get(5)?,
                        buffer_chunks: Vec::new(),
                        buffer_length: 0,
                        is_connecting: false,
                    },
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for (directory, tab) in tabs {
            directories.entry(directory).or_default().tabs.push(tab);
        }

        Ok(directories)
    }
}
