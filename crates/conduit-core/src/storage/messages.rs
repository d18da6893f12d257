//! Append-only message log, grounded on `storage::messages` — in particular its durability
//! invariant: an assistant message carrying `tool_calls` must be persisted before any `tool`
//! reply referencing it is processed (SPEC_FULL.md §7, §9 "hot-path persistence bug").

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use crate::error::StorageError;

use super::database::Database;
use super::sessions::parse_dt;
use super::types::{Message, MessageRole, NewMessage, ToolCallRef};

pub struct MessageRepo<'a> {
    db: &'a Database,
}

impl<'a> MessageRepo<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Appends atomically, assigning the next dense sequence number. Fails with `NotFound` if
    /// the session row is absent (soft-deleted sessions count as absent).
    pub fn append(&self, session_id: &str, message: NewMessage) -> Result<Message, StorageError> {
        let exists: Option<String> = self
            .db
            .conn()
            .query_row(
                "SELECT id FROM sessions WHERE id = ?1 AND deleted_at IS NULL",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StorageError::NotFound(session_id.to_string()));
        }

        let next_sequence: i64 = self.db.conn().query_row(
            "SELECT COALESCE(MAX(sequence), -1) + 1 FROM messages WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;

        let now = Utc::now();
        let content_json = serde_json::to_string(&message.content)?;
        let tool_calls_json = message
            .tool_calls
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.db.conn().execute(
            "INSERT INTO messages (session_id, sequence, role, content, tool_call_id, name, tool_calls, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                session_id,
                next_sequence,
                message.role.as_str(),
                content_json,
                message.tool_call_id,
                message.name,
                tool_calls_json,
                now.to_rfc3339(),
            ],
        )?;
        let id = self.db.conn().last_insert_rowid();

        Ok(Message {
            id,
            session_id: session_id.to_string(),
            sequence: next_sequence,
            role: message.role,
            content: message.content,
            tool_call_id: message.tool_call_id,
            tool_calls: message.tool_calls,
            name: message.name,
            created_at: now,
        })
    }

    /// Idempotent patch used only to attach `tool_calls` to the most recent assistant message —
    /// the single controlled mutation path for an otherwise append-only log (SPEC_FULL.md §3).
    pub fn update_last_assistant_tool_calls(
        &self,
        session_id: &str,
        tool_calls: &[ToolCallRef],
    ) -> Result<(), StorageError> {
        let last_id: Option<i64> = self
            .db
            .conn()
            .query_row(
                "SELECT id FROM messages WHERE session_id = ?1 AND role = 'assistant'
                 ORDER BY sequence DESC LIMIT 1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(id) = last_id else {
            return Err(StorageError::NotFound(format!(
                "no assistant message in session {session_id}"
            )));
        };
        let json = serde_json::to_string(tool_calls)?;
        self.set_tool_calls_column(id, &json)?;
        Ok(())
    }

    pub fn list(&self, session_id: &str) -> Result<Vec<Message>, StorageError> {
        let mut stmt = self.db.conn().prepare(
            "SELECT id, session_id, sequence, role, content, tool_call_id, tool_calls, name, created_at
             FROM messages WHERE session_id = ?1 ORDER BY sequence ASC",
        )?;
        let rows = stmt
            .query_map(params![session_id], Self::row_to_message)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn set_tool_calls_column(&self, message_id: i64, tool_calls_json: &str) -> Result<(), StorageError> {
        self.db.conn().execute(
            "UPDATE messages SET tool_calls = ?1 WHERE id = ?2",
            params![tool_calls_json, message_id],
        )?;
        Ok(())
    }

    fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
        let role: String = row.get(3)?;
        let content_json: String = row.get(4)?;
        let tool_calls_json: Option<String> = row.get(6)?;
        let created_at: String = row.get(8)?;
        let content: Value = serde_json::from_str(&content_json).unwrap_or(Value::Null);
        let tool_calls = tool_calls_json
            .as_deref()
            .and_then(|s| serde_json::from_str::<Vec<ToolCallRef>>(s).ok());
        Ok(Message {
            id: row.get(0)?,
            session_id: row.get(1)?,
            sequence: row.get(2)?,
            role: MessageRole::parse(&role).unwrap_or(MessageRole::User),
            content,
            tool_call_id: row.get(5)?,
            tool_calls,
            name: row.get(7)?,
            created_at: parse_dt(&created_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::sessions::SessionRepo;
    use serde_json::json;

    fn db_with_session() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("test.db")).unwrap();
        SessionRepo::new(&db).create("s1", None, None, None).unwrap();
        (dir, db)
    }

    #[test]
    fn sequence_numbers_are_dense_and_increasing() {
        let (_dir, db) = db_with_session();
        let repo = MessageRepo::new(&db);
        for i in 0..5 {
            let m = repo
                .append("s1", NewMessage::user(json!(format!("msg {i}"))))
                .unwrap();
            assert_eq!(m.sequence, i);
        }
    }

    #[test]
    fn append_to_missing_session_fails_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("test.db")).unwrap();
        let repo = MessageRepo::new(&db);
        let err = repo
            .append("missing", NewMessage::user(json!("hi")))
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[test]
    fn update_last_assistant_tool_calls_attaches_to_most_recent_assistant() {
        let (_dir, db) = db_with_session();
        let repo = MessageRepo::new(&db);
        repo.append("s1", NewMessage::user(json!("hi"))).unwrap();
        repo.append("s1", NewMessage::assistant(json!(""), None)).unwrap();

        let calls = vec![ToolCallRef {
            id: "call_1".to_string(),
            name: "read_file".to_string(),
            arguments: json!({"path": "a.rs"}),
        }];
        repo.update_last_assistant_tool_calls("s1", &calls).unwrap();

        let messages = repo.list("s1").unwrap();
        let assistant = messages.iter().find(|m| m.role == MessageRole::Assistant).unwrap();
        assert_eq!(assistant.tool_calls.as_ref().unwrap()[0].id, "call_1");
    }
}
