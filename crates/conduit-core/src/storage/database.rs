//! Thin `rusqlite` connection wrapper with schema creation on open.
//!
//! The teacher's `storage::database::Database` (its body was not retrieved into the example
//! pack, only its call sites) is inferred here: a cheap-to-construct wrapper around one
//! connection, opened fresh per `Database::new` call the way `storage/sessions.rs` and
//! `agent/orchestrator.rs`'s DB helper functions do (`Database::new(db_path)` right before each
//! operation), with schema creation idempotent via `CREATE TABLE IF NOT EXISTS`.

use std::path::{Path, PathBuf};

use rusqlite::Connection;

use crate::error::StorageError;

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let db = Self { conn, path };
        db.migrate()?;
        Ok(db)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn migrate(&self) -> Result<(), StorageError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL DEFAULT '',
                system_prompt TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT,
                user_id TEXT,
                working_dir TEXT,
                token_count INTEGER
            );

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL REFERENCES sessions(id),
                sequence INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                tool_call_id TEXT,
                name TEXT,
                tool_calls TEXT,
                created_at TEXT NOT NULL,
                UNIQUE(session_id, sequence)
            );
            CREATE INDEX IF NOT EXISTS idx_messages_session_sequence
                ON messages(session_id, sequence);

            CREATE TABLE IF NOT EXISTS agent_contexts (
                session_id TEXT PRIMARY KEY REFERENCES sessions(id),
                current_agent TEXT NOT NULL,
                switch_count INTEGER NOT NULL DEFAULT 0,
                task_description TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS agent_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL REFERENCES sessions(id),
                from_agent TEXT,
                to_agent TEXT NOT NULL,
                reason TEXT NOT NULL,
                confidence REAL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_agent_history_session
                ON agent_history(session_id);

            CREATE TABLE IF NOT EXISTS pending_approvals (
                request_id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL REFERENCES sessions(id),
                request_type TEXT NOT NULL,
                subject TEXT NOT NULL,
                arguments TEXT NOT NULL,
                reason TEXT,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                decided_at TEXT,
                feedback TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_pending_approvals_session_status
                ON pending_approvals(session_id, status);
            CREATE INDEX IF NOT EXISTS idx_pending_approvals_expires_at
                ON pending_approvals(expires_at);

            CREATE TABLE IF NOT EXISTS plans (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL UNIQUE REFERENCES sessions(id),
                title TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS subtasks (
                id TEXT PRIMARY KEY,
                plan_id TEXT NOT NULL REFERENCES plans(id),
                description TEXT NOT NULL,
                agent TEXT NOT NULL,
                status TEXT NOT NULL,
                depends_on TEXT NOT NULL DEFAULT '[]',
                sequence INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_subtasks_plan ON subtasks(plan_id);
            "#,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        Database::new(&path).unwrap();
        Database::new(&path).unwrap();
    }
}
