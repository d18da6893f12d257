//! Per-session routing state. Mutated only through `switch_agent`, called exclusively by the
//! event bus's context subscriber (SPEC_FULL.md §4.1.1) — never directly by the orchestrator.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde_json::{json, Value};

use crate::error::StorageError;

use super::database::Database;
use super::sessions::parse_dt;
use super::types::{AgentContext, AgentHistoryEntry, AGENT_HISTORY_RING_SIZE};

pub struct AgentContextRepo<'a> {
    db: &'a Database,
}

impl<'a> AgentContextRepo<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Creates the 1:1 row for a new session, defaulting to the orchestrator agent.
    pub fn ensure(&self, session_id: &str, default_agent: &str) -> Result<(), StorageError> {
        self.db.conn().execute(
            "INSERT OR IGNORE INTO agent_contexts (session_id, current_agent, switch_count, metadata, updated_at)
             VALUES (?1, ?2, 0, '{}', ?3)",
            params![session_id, default_agent, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get(&self, session_id: &str) -> Result<Option<AgentContext>, StorageError> {
        let row: Option<(String, i64, Option<String>, String)> = self
            .db
            .conn()
            .query_row(
                "SELECT current_agent, switch_count, task_description, metadata
                 FROM agent_contexts WHERE session_id = ?1",
                params![session_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;
        let Some((current_agent, switch_count, task_description, metadata_json)) = row else {
            return Ok(None);
        };

        let mut stmt = self.db.conn().prepare(
            "SELECT from_agent, to_agent, reason, confidence, created_at
             FROM agent_history WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let mut history: Vec<AgentHistoryEntry> = stmt
            .query_map(params![session_id, AGENT_HISTORY_RING_SIZE as i64], |row| {
                let created_at: String = row.get(4)?;
                Ok(AgentHistoryEntry {
                    from: row.get(0)?,
                    to: row.get(1)?,
                    reason: row.get(2)?,
                    confidence: row.get(3)?,
                    timestamp: parse_dt(&created_at),
                })
            })?
            .collect::<Result<_, _>>()?;
        history.reverse();

        Ok(Some(AgentContext {
            session_id: session_id.to_string(),
            current_agent,
            agent_history: history,
            switch_count: switch_count as u64,
            task_description,
            metadata: serde_json::from_str(&metadata_json).unwrap_or_else(|_| json!({})),
        }))
    }

    /// Atomic: updates `current_agent`, appends one history record, increments `switch_count`.
    pub fn switch_agent(
        &self,
        session_id: &str,
        from: Option<&str>,
        to: &str,
        reason: &str,
        confidence: Option<f64>,
    ) -> Result<AgentHistoryEntry, StorageError> {
        let now = Utc::now();
        self.db.conn().execute(
            "UPDATE agent_contexts SET current_agent = ?1, switch_count = switch_count + 1, updated_at = ?2
             WHERE session_id = ?3",
            params![to, now.to_rfc3339(), session_id],
        )?;
        self.db.conn().execute(
            "INSERT INTO agent_history (session_id, from_agent, to_agent, reason, confidence, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![session_id, from, to, reason, confidence, now.to_rfc3339()],
        )?;
        Ok(AgentHistoryEntry {
            from: from.map(ToString::to_string),
            to: to.to_string(),
            reason: reason.to_string(),
            confidence,
            timestamp: now,
        })
    }

    pub fn set_task_description(&self, session_id: &str, task_description: &str) -> Result<(), StorageError> {
        self.db.conn().execute(
            "UPDATE agent_contexts SET task_description = ?1, updated_at = ?2 WHERE session_id = ?3",
            params![task_description, Utc::now().to_rfc3339(), session_id],
        )?;
        Ok(())
    }

    pub fn set_metadata(&self, session_id: &str, metadata: &Value) -> Result<(), StorageError> {
        self.db.conn().execute(
            "UPDATE agent_contexts SET metadata = ?1, updated_at = ?2 WHERE session_id = ?3",
            params![metadata.to_string(), Utc::now().to_rfc3339(), session_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::sessions::SessionRepo;

    fn db_with_session() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("test.db")).unwrap();
        SessionRepo::new(&db).create("s1", None, None, None).unwrap();
        AgentContextRepo::new(&db).ensure("s1", "orchestrator").unwrap();
        (dir, db)
    }

    #[test]
    fn switch_agent_updates_current_and_appends_history() {
        let (_dir, db) = db_with_session();
        let repo = AgentContextRepo::new(&db);
        repo.switch_agent("s1", Some("orchestrator"), "coder", "refactor request", Some(0.9))
            .unwrap();

        let ctx = repo.get("s1").unwrap().unwrap();
        assert_eq!(ctx.current_agent, "coder");
        assert_eq!(ctx.switch_count, 1);
        assert_eq!(ctx.agent_history.len(), 1);
        assert_eq!(ctx.agent_history[0].to, "coder");
    }
}
