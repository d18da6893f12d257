//! Persistence for `PendingApproval` rows. The policy/state-machine logic lives in
//! [`crate::approval`]; this module is the Session Store's "pending_approvals slice"
//! (SPEC_FULL.md §5, "the Approval Manager writes through the Session Store").

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use crate::error::StorageError;

use super::database::Database;
use super::sessions::parse_dt;
use super::types::{ApprovalStatus, PendingApproval, RequestType};

pub struct ApprovalRepo<'a> {
    db: &'a Database,
}

impl<'a> ApprovalRepo<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn insert(
        &self,
        request_id: &str,
        session_id: &str,
        request_type: RequestType,
        subject: &str,
        arguments: &Value,
        reason: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<PendingApproval, StorageError> {
        let now = Utc::now();
        self.db.conn().execute(
            "INSERT INTO pending_approvals
                (request_id, session_id, request_type, subject, arguments, reason, status, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?8)",
            params![
                request_id,
                session_id,
                request_type.as_str(),
                subject,
                arguments.to_string(),
                reason,
                now.to_rfc3339(),
                expires_at.to_rfc3339(),
            ],
        )?;
        Ok(PendingApproval {
            request_id: request_id.to_string(),
            session_id: session_id.to_string(),
            request_type,
            subject: subject.to_string(),
            arguments: arguments.clone(),
            reason: reason.map(ToString::to_string),
            status: ApprovalStatus::Pending,
            created_at: now,
            expires_at,
            decided_at: None,
            feedback: None,
        })
    }

    pub fn get(&self, request_id: &str) -> Result<Option<PendingApproval>, StorageError> {
        self.db
            .conn()
            .query_row(
                "SELECT request_id, session_id, request_type, subject, arguments, reason, status,
                        created_at, expires_at, decided_at, feedback
                 FROM pending_approvals WHERE request_id = ?1",
                params![request_id],
                Self::row_to_approval,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn list_for_session(&self, session_id: &str) -> Result<Vec<PendingApproval>, StorageError> {
        let mut stmt = self.db.conn().prepare(
            "SELECT request_id, session_id, request_type, subject, arguments, reason, status,
                    created_at, expires_at, decided_at, feedback
             FROM pending_approvals WHERE session_id = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map(params![session_id], Self::row_to_approval)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_pending_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<PendingApproval>, StorageError> {
        let mut stmt = self.db.conn().prepare(
            "SELECT request_id, session_id, request_type, subject, arguments, reason, status,
                    created_at, expires_at, decided_at, feedback
             FROM pending_approvals WHERE status = 'pending' AND expires_at < ?1",
        )?;
        let rows = stmt
            .query_map(params![cutoff.to_rfc3339()], Self::row_to_approval)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_pending_unexpired(&self, now: DateTime<Utc>) -> Result<Vec<PendingApproval>, StorageError> {
        let mut stmt = self.db.conn().prepare(
            "SELECT request_id, session_id, request_type, subject, arguments, reason, status,
                    created_at, expires_at, decided_at, feedback
             FROM pending_approvals WHERE status = 'pending' AND expires_at >= ?1",
        )?;
        let rows = stmt
            .query_map(params![now.to_rfc3339()], Self::row_to_approval)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Transitions status and records the decision. Returns `false` if the row was not in
    /// `pending` (the caller treats this as a no-op, matching the idempotence law in SPEC_FULL.md
    /// §8).
    pub fn transition(
        &self,
        request_id: &str,
        new_status: ApprovalStatus,
        feedback: Option<&str>,
        arguments_override: Option<&Value>,
    ) -> Result<bool, StorageError> {
        let sql = if let Some(args) = arguments_override {
            self.db.conn().execute(
                "UPDATE pending_approvals SET status = ?1, decided_at = ?2, feedback = ?3, arguments = ?4
                 WHERE request_id = ?5 AND status = 'pending'",
                params![
                    new_status.as_str(),
                    Utc::now().to_rfc3339(),
                    feedback,
                    args.to_string(),
                    request_id
                ],
            )
        } else {
            self.db.conn().execute(
                "UPDATE pending_approvals SET status = ?1, decided_at = ?2, feedback = ?3
                 WHERE request_id = ?4 AND status = 'pending'",
                params![new_status.as_str(), Utc::now().to_rfc3339(), feedback, request_id],
            )
        };
        Ok(sql? > 0)
    }

    pub fn delete(&self, request_id: &str) -> Result<(), StorageError> {
        self.db
            .conn()
            .execute("DELETE FROM pending_approvals WHERE request_id = ?1", params![request_id])?;
        Ok(())
    }

    fn row_to_approval(row: &rusqlite::Row) -> rusqlite::Result<PendingApproval> {
        let request_type: String = row.get(2)?;
        let arguments_json: String = row.get(4)?;
        let status: String = row.get(6)?;
        let created_at: String = row.get(7)?;
        let expires_at: String = row.get(8)?;
        let decided_at: Option<String> = row.get(9)?;
        Ok(PendingApproval {
            request_id: row.get(0)?,
            session_id: row.get(1)?,
            request_type: RequestType::parse(&request_type).unwrap_or(RequestType::Tool),
            subject: row.get(3)?,
            arguments: serde_json::from_str(&arguments_json).unwrap_or(Value::Null),
            reason: row.get(5)?,
            status: ApprovalStatus::parse(&status).unwrap_or(ApprovalStatus::Pending),
            created_at: parse_dt(&created_at),
            expires_at: parse_dt(&expires_at),
            decided_at: decided_at.as_deref().map(parse_dt),
            feedback: row.get(10)?,
        })
    }
}
