//! Plan/Subtask storage, grounded on `storage::plans` (1:1 session-plan via the `UNIQUE`
//! constraint) but extended to a DAG of subtasks rather than the teacher's flat task list, per
//! SPEC_FULL.md §3's Plan/Subtask data model.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::error::StorageError;

use super::database::Database;
use super::sessions::parse_dt;
use super::types::{Plan, PlanStatus, Subtask, SubtaskStatus};

pub struct PlanRepo<'a> {
    db: &'a Database,
}

impl<'a> PlanRepo<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn create(&self, plan_id: &str, session_id: &str, title: &str) -> Result<Plan, StorageError> {
        let now = Utc::now();
        self.db.conn().execute(
            "INSERT INTO plans (id, session_id, title, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'active', ?4, ?4)",
            params![plan_id, session_id, title, now.to_rfc3339()],
        )?;
        Ok(Plan {
            id: plan_id.to_string(),
            session_id: session_id.to_string(),
            title: title.to_string(),
            status: PlanStatus::Active,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn add_subtask(
        &self,
        subtask_id: &str,
        plan_id: &str,
        description: &str,
        agent: &str,
        depends_on: &[String],
        sequence: i64,
    ) -> Result<Subtask, StorageError> {
        let now = Utc::now();
        let status = if depends_on.is_empty() {
            SubtaskStatus::Ready
        } else {
            SubtaskStatus::Pending
        };
        self.db.conn().execute(
            "INSERT INTO subtasks (id, plan_id, description, agent, status, depends_on, sequence, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                subtask_id,
                plan_id,
                description,
                agent,
                status_str(status),
                serde_json::to_string(depends_on)?,
                sequence,
                now.to_rfc3339(),
            ],
        )?;
        Ok(Subtask {
            id: subtask_id.to_string(),
            plan_id: plan_id.to_string(),
            description: description.to_string(),
            agent: agent.to_string(),
            status,
            depends_on: depends_on.to_vec(),
            sequence,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get_for_session(&self, session_id: &str) -> Result<Option<Plan>, StorageError> {
        self.db
            .conn()
            .query_row(
                "SELECT id, session_id, title, status, created_at, updated_at FROM plans WHERE session_id = ?1",
                params![session_id],
                Self::row_to_plan,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn list_subtasks(&self, plan_id: &str) -> Result<Vec<Subtask>, StorageError> {
        let mut stmt = self.db.conn().prepare(
            "SELECT id, plan_id, description, agent, status, depends_on, sequence, created_at, updated_at
             FROM subtasks WHERE plan_id = ?1 ORDER BY sequence ASC",
        )?;
        let rows = stmt
            .query_map(params![plan_id], Self::row_to_subtask)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn set_subtask_status(&self, subtask_id: &str, status: SubtaskStatus) -> Result<(), StorageError> {
        self.db.conn().execute(
            "UPDATE subtasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status_str(status), Utc::now().to_rfc3339(), subtask_id],
        )?;
        Ok(())
    }

    pub fn set_plan_status(&self, plan_id: &str, status: PlanStatus) -> Result<(), StorageError> {
        self.db.conn().execute(
            "UPDATE plans SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![plan_status_str(status), Utc::now().to_rfc3339(), plan_id],
        )?;
        Ok(())
    }

    fn row_to_plan(row: &rusqlite::Row) -> rusqlite::Result<Plan> {
        let status: String = row.get(3)?;
        let created_at: String = row.get(4)?;
        let updated_at: String = row.get(5)?;
        Ok(Plan {
            id: row.get(0)?,
            session_id: row.get(1)?,
            title: row.get(2)?,
            status: parse_plan_status(&status),
            created_at: parse_dt(&created_at),
            updated_at: parse_dt(&updated_at),
        })
    }

    fn row_to_subtask(row: &rusqlite::Row) -> rusqlite::Result<Subtask> {
        let status: String = row.get(4)?;
        let depends_on_json: String = row.get(5)?;
        let created_at: String = row.get(7)?;
        let updated_at: String = row.get(8)?;
        Ok(Subtask {
            id: row.get(0)?,
            plan_id: row.get(1)?,
            description: row.get(2)?,
            agent: row.get(3)?,
            status: parse_subtask_status(&status),
            depends_on: serde_json::from_str(&depends_on_json).unwrap_or_default(),
            sequence: row.get(6)?,
            created_at: parse_dt(&created_at),
            updated_at: parse_dt(&updated_at),
        })
    }
}

fn status_str(status: SubtaskStatus) -> &'static str {
    match status {
        SubtaskStatus::Pending => "pending",
        SubtaskStatus::Ready => "ready",
        SubtaskStatus::Running => "running",
        SubtaskStatus::Cancelling => "cancelling",
        SubtaskStatus::Completed => "completed",
        SubtaskStatus::Failed => "failed",
        SubtaskStatus::Skipped => "skipped",
    }
}

fn parse_subtask_status(s: &str) -> SubtaskStatus {
    match s {
        "ready" => SubtaskStatus::Ready,
        "running" => SubtaskStatus::Running,
        "cancelling" => SubtaskStatus::Cancelling,
        "completed" => SubtaskStatus::Completed,
        "failed" => SubtaskStatus::Failed,
        "skipped" => SubtaskStatus::Skipped,
        _ => SubtaskStatus::Pending,
    }
}

fn plan_status_str(status: PlanStatus) -> &'static str {
    match status {
        PlanStatus::Active => "active",
        PlanStatus::Completed => "completed",
        PlanStatus::Cancelling => "cancelling",
        PlanStatus::Cancelled => "cancelled",
    }
}

fn parse_plan_status(s: &str) -> PlanStatus {
    match s {
        "completed" => PlanStatus::Completed,
        "cancelling" => PlanStatus::Cancelling,
        "cancelled" => PlanStatus::Cancelled,
        _ => PlanStatus::Active,
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
        (dir, db)
    }

    #[test]
    fn subtask_with_dependency_starts_pending_not_ready() {
        let (_dir, db) = db_with_session();
        let repo = PlanRepo::new(&db);
        repo.create("p1", "s1", "Refactor module").unwrap();
        let first = repo.add_subtask("t1", "p1", "write tests", "coder", &[], 0).unwrap();
        let second = repo
            .add_subtask("t2", "p1", "refactor", "coder", &["t1".to_string()], 1)
            .unwrap();

        assert_eq!(first.status, SubtaskStatus::Ready);
        assert_eq!(second.status, SubtaskStatus::Pending);
    }
}
