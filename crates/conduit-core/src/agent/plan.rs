//! Plan/Subtask ExecutionEngine (SPEC_FULL.md §4.6.2).
//!
//! Grounded in the teacher's `agent::plan_handler` (plan detection → persisted subtask rows) and
//! `plan::manager::PlanManager`, generalized from "detect a plan, save it" into "drive ready
//! subtasks to completion, with an idempotent cancel."

use std::collections::HashSet;

use crate::error::StorageError;
use crate::storage::{Plan, PlanStatus, SessionStore, Subtask, SubtaskStatus};

pub struct PlanExecutionEngine {
    store: SessionStore,
}

impl PlanExecutionEngine {
    pub fn new(store: SessionStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Subtasks whose `depends_on` are all `completed` and which haven't started yet. `add_subtask`
    /// eagerly assigns `Ready` to DAG roots (empty `depends_on`) and `Pending` to everything else,
    /// so both statuses are candidates here — the dependency check is vacuously true for a `Ready`
    /// root and does the real filtering for a `Pending` subtask with dependencies.
    pub async fn ready_subtasks(&self, plan_id: &str) -> Result<Vec<Subtask>, StorageError> {
        let subtasks = self.store.list_subtasks(plan_id).await?;
        let completed: HashSet<String> = subtasks
            .iter()
            .filter(|s| s.status == SubtaskStatus::Completed)
            .map(|s| s.id.clone())
            .collect();
        Ok(subtasks
            .into_iter()
            .filter(|s| {
                matches!(s.status, SubtaskStatus::Pending | SubtaskStatus::Ready)
                    && s.depends_on.iter().all(|d| completed.contains(d.as_str()))
            })
            .collect())
    }

    pub async fn mark_running(&self, subtask_id: &str) -> Result<(), StorageError> {
        self.store.set_subtask_status(subtask_id, SubtaskStatus::Running).await
    }

    pub async fn mark_completed(&self, subtask_id: &str) -> Result<(), StorageError> {
        self.store.set_subtask_status(subtask_id, SubtaskStatus::Completed).await
    }

    pub async fn mark_failed(&self, subtask_id: &str) -> Result<(), StorageError> {
        self.store.set_subtask_status(subtask_id, SubtaskStatus::Failed).await
    }

    pub async fn plan_for_session(&self, session_id: &str) -> Result<Option<Plan>, StorageError> {
        self.store.get_plan_for_session(session_id).await
    }

    /// Idempotent cancel (SPEC_FULL.md §4.6.2, resolving §9's open question). A second call on a
    /// plan already `cancelling`/`cancelled` is a no-op that returns the current status.
    pub async fn cancel(&self, session_id: &str) -> Result<PlanStatus, StorageError> {
        let plan = self
            .store
            .get_plan_for_session(session_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("no plan for session {session_id}")))?;

        if matches!(plan.status, PlanStatus::Cancelling | PlanStatus::Cancelled) {
            return Ok(plan.status);
        }

        let subtasks = self.store.list_subtasks(&plan.id).await?;
        let mut marked_one_cancelling = false;
        for subtask in subtasks {
            match subtask.status {
                SubtaskStatus::Pending | SubtaskStatus::Ready => {
                    self.store.set_subtask_status(&subtask.id, SubtaskStatus::Skipped).await?;
                }
                SubtaskStatus::Running if !marked_one_cancelling => {
                    self.store.set_subtask_status(&subtask.id, SubtaskStatus::Cancelling).await?;
                    marked_one_cancelling = true;
                }
                _ => {}
            }
        }

        let new_status = if marked_one_cancelling {
            PlanStatus::Cancelling
        } else {
            PlanStatus::Cancelled
        };
        self.store.set_plan_status(&plan.id, new_status).await?;
        Ok(new_status)
    }

    /// Call once a `cancelling` subtask's cooperatively-cancelled turn actually returns. Settles
    /// it into its terminal `failed` state and, if nothing else is active, settles the plan too.
    pub async fn observe_cancelled_subtask_settled(&self, plan_id: &str, subtask_id: &str) -> Result<(), StorageError> {
        self.store.set_subtask_status(subtask_id, SubtaskStatus::Failed).await?;
        let subtasks = self.store.list_subtasks(plan_id).await?;
        let still_active = subtasks
            .iter()
            .any(|s| matches!(s.status, SubtaskStatus::Running | SubtaskStatus::Cancelling));
        if !still_active {
            self.store.set_plan_status(plan_id, PlanStatus::Cancelled).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::storage::PersistenceMode;

    async fn engine_with_plan() -> (tempfile::TempDir, PlanExecutionEngine, String) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("test.db"), EventBus::new(), PersistenceMode::Immediate).unwrap();
        store.create("s1", None, None, None).await.unwrap();
        let plan = store.create_plan("p1", "s1", "Ship the feature").await.unwrap();
        store.add_subtask("t1", &plan.id, "write code", "coder", &[], 0).await.unwrap();
        store
            .add_subtask("t2", &plan.id, "write docs", "architect", &["t1".to_string()], 1)
            .await
            .unwrap();
        let engine = PlanExecutionEngine::new(store);
        (dir, engine, plan.id)
    }

    #[tokio::test]
    async fn only_subtasks_with_satisfied_dependencies_are_ready() {
        let (_dir, engine, plan_id) = engine_with_plan().await;
        let ready = engine.ready_subtasks(&plan_id).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, "t1");

        engine.mark_running("t1").await.unwrap();
        engine.mark_completed("t1").await.unwrap();
        let ready = engine.ready_subtasks(&plan_id).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, "t2");
    }

    #[tokio::test]
    async fn cancel_skips_pending_subtasks_and_is_idempotent() {
        let (_dir, engine, _plan_id) = engine_with_plan().await;
        let status = engine.cancel("s1").await.unwrap();
        assert_eq!(status, PlanStatus::Cancelled);

        // Second call is a no-op returning the same terminal status.
        let status_again = engine.cancel("s1").await.unwrap();
        assert_eq!(status_again, PlanStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_marks_a_running_subtask_cancelling_not_skipped() {
        let (_dir, engine, plan_id) = engine_with_plan().await;
        engine.mark_running("t1").await.unwrap();
        let status = engine.cancel("s1").await.unwrap();
        assert_eq!(status, PlanStatus::Cancelling);

        let subtasks = engine.store().list_subtasks(&plan_id).await.unwrap();
        let t1 = subtasks.iter().find(|s| s.id == "t1").unwrap();
        assert_eq!(t1.status, SubtaskStatus::Cancelling);

        engine.observe_cancelled_subtask_settled(&plan_id, "t1").await.unwrap();
        let plan = engine.plan_for_session("s1").await.unwrap().unwrap();
        assert_eq!(plan.status, PlanStatus::Cancelled);
    }
}
