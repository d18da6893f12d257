//! Session CRUD — grounded on the teacher's `storage::sessions::SessionManager`.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::error::StorageError;

use super::database::Database;
use super::types::Session;

pub struct SessionRepo<'a> {
    db: &'a Database,
}

impl<'a> SessionRepo<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn create(
        &self,
        session_id: &str,
        system_prompt: Option<&str>,
        working_dir: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Session, StorageError> {
        if self.get(session_id)?.is_some() {
            return Err(StorageError::AlreadyExists(session_id.to_string()));
        }
        let now = Utc::now();
        let now_str = now.to_rfc3339();
        self.db.conn().execute(
            "INSERT INTO sessions (id, title, system_prompt, created_at, updated_at, working_dir, user_id)
             VALUES (?1, '', ?2, ?3, ?3, ?4, ?5)",
            params![session_id, system_prompt, now_str, working_dir, user_id],
        )?;
        Ok(Session {
            id: session_id.to_string(),
            title: String::new(),
            system_prompt: system_prompt.map(ToString::to_string),
            created_at: now,
            updated_at: now,
            deleted_at: None,
            user_id: user_id.map(ToString::to_string),
            working_dir: working_dir.map(ToString::to_string),
            token_count: None,
        })
    }

    /// Returns `None` for soft-deleted rows, matching the `get()` contract in SPEC_FULL.md §4.2.
    pub fn get(&self, session_id: &str) -> Result<Option<Session>, StorageError> {
        let row = self
            .db
            .conn()
            .query_row(
                "SELECT id, title, system_prompt, created_at, updated_at, deleted_at, user_id, working_dir, token_count
                 FROM sessions WHERE id = ?1 AND deleted_at IS NULL",
                params![session_id],
                Self::row_to_session,
            )
            .optional()?;
        Ok(row)
    }

    pub fn list(
        &self,
        active_only: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Session>, StorageError> {
        let sql = if active_only {
            "SELECT id, title, system_prompt, created_at, updated_at, deleted_at, user_id, working_dir, token_count
             FROM sessions WHERE deleted_at IS NULL ORDER BY updated_at DESC LIMIT ?1 OFFSET ?2"
        } else {
            "SELECT id, title, system_prompt, created_at, updated_at, deleted_at, user_id, working_dir, token_count
             FROM sessions ORDER BY updated_at DESC LIMIT ?1 OFFSET ?2"
        };
        let mut stmt = self.db.conn().prepare(sql)?;
        let rows = stmt
            .query_map(params![limit, offset], Self::row_to_session)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn soft_delete(&self, session_id: &str) -> Result<(), StorageError> {
        let now = Utc::now().to_rfc3339();
        let changed = self.db.conn().execute(
            "UPDATE sessions SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            params![now, session_id],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(session_id.to_string()));
        }
        Ok(())
    }

    pub fn update_title(&self, session_id: &str, title: &str) -> Result<(), StorageError> {
        self.db.conn().execute(
            "UPDATE sessions SET title = ?1, updated_at = ?2 WHERE id = ?3",
            params![title, Utc::now().to_rfc3339(), session_id],
        )?;
        Ok(())
    }

    pub fn update_token_count(&self, session_id: &str, token_count: usize) -> Result<(), StorageError> {
        self.db.conn().execute(
            "UPDATE sessions SET token_count = ?1, updated_at = ?2 WHERE id = ?3",
            params![token_count as i64, Utc::now().to_rfc3339(), session_id],
        )?;
        Ok(())
    }

    pub fn touch(&self, session_id: &str) -> Result<(), StorageError> {
        self.db.conn().execute(
            "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), session_id],
        )?;
        Ok(())
    }

    /// Physically purges a session soft-deleted longer than `older_than` ago, cascading to every
    /// dependent table. See DESIGN.md's retention decision: one TTL, applied uniformly.
    pub fn cleanup(&self, older_than: chrono::Duration) -> Result<usize, StorageError> {
        let cutoff = (Utc::now() - older_than).to_rfc3339();
        let mut stmt = self
            .db
            .conn()
            .prepare("SELECT id FROM sessions WHERE deleted_at IS NOT NULL AND deleted_at < ?1")?;
        let ids: Vec<String> = stmt
            .query_map(params![cutoff], |row| row.get(0))?
            .collect::<Result<_, _>>()?;

        for id in &ids {
            self.db.conn().execute(
                "DELETE FROM subtasks WHERE plan_id IN (SELECT id FROM plans WHERE session_id = ?1)",
                params![id],
            )?;
            self.db.conn().execute("DELETE FROM plans WHERE session_id = ?1", params![id])?;
            self.db
                .conn()
                .execute("DELETE FROM pending_approvals WHERE session_id = ?1", params![id])?;
            self.db
                .conn()
                .execute("DELETE FROM agent_history WHERE session_id = ?1", params![id])?;
            self.db
                .conn()
                .execute("DELETE FROM agent_contexts WHERE session_id = ?1", params![id])?;
            self.db.conn().execute("DELETE FROM messages WHERE session_id = ?1", params![id])?;
            self.db.conn().execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        }
        Ok(ids.len())
    }

    fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
        let created_at: String = row.get(3)?;
        let updated_at: String = row.get(4)?;
        let deleted_at: Option<String> = row.get(5)?;
        let token_count: Option<i64> = row.get(8)?;
        Ok(Session {
            id: row.get(0)?,
            title: row.get(1)?,
            system_prompt: row.get(2)?,
            created_at: parse_dt(&created_at),
            updated_at: parse_dt(&updated_at),
            deleted_at: deleted_at.as_deref().map(parse_dt),
            user_id: row.get(6)?,
            working_dir: row.get(7)?,
            token_count: token_count.map(|n| n as usize),
        })
    }
}

pub(super) fn parse_dt(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn create_then_get_round_trips() {
        let (_dir, db) = db();
        let repo = SessionRepo::new(&db);
        repo.create("s1", Some("be helpful"), Some("/work"), None).unwrap();
        let got = repo.get("s1").unwrap().unwrap();
        assert_eq!(got.id, "s1");
        assert_eq!(got.system_prompt.as_deref(), Some("be helpful"));
    }

    #[test]
    fn create_twice_fails_already_exists() {
        let (_dir, db) = db();
        let repo = SessionRepo::new(&db);
        repo.create("s1", None, None, None).unwrap();
        let err = repo.create("s1", None, None, None).unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));
    }

    #[test]
    fn soft_delete_hides_from_active_only_list() {
        let (_dir, db) = db();
        let repo = SessionRepo::new(&db);
        repo.create("s1", None, None, None).unwrap();
        repo.soft_delete("s1").unwrap();

        assert!(repo.get("s1").unwrap().is_none());
        assert!(repo.list(true, 100, 0).unwrap().is_empty());
        assert_eq!(repo.list(false, 100, 0).unwrap().len(), 1);
    }
}
