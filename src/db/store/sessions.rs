// src/db/store/sessions.rs

use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde::Deserialize;

use super::{page_offset, push_scope, status_col, where_sql, Store};
use crate::authz::Scope;
use crate::domain::{now_ts, Lifecycle, Session, SessionStatus};
use crate::infra::errors::DeskError;

pub(crate) const SESSION_COLS: &str = "s.id, s.customer_id, s.counselor_id, s.clinic_id, \
     s.session_date, s.duration_minutes, s.status, s.recording_id, s.transcription_text, \
     s.overall_score, s.notes, s.created_at, s.updated_at";

pub(crate) fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        counselor_id: row.get(2)?,
        clinic_id: row.get(3)?,
        session_date: row.get(4)?,
        duration_minutes: row.get(5)?,
        status: status_col(row, 6)?,
        recording_id: row.get(7)?,
        transcription_text: row.get(8)?,
        overall_score: row.get(9)?,
        notes: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub scope: Option<Scope>,
    pub status: Option<SessionStatus>,
    pub customer_id: Option<String>,
    pub counselor_id: Option<String>,
    /// Inclusive lower bound on `session_date` (RFC 3339 or date prefix).
    pub date_from: Option<String>,
    /// Exclusive upper bound on `session_date`.
    pub date_to: Option<String>,
    pub page: u32,
    pub per_page: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionPatch {
    pub session_date: Option<String>,
    pub duration_minutes: Option<i64>,
    pub notes: Option<String>,
    pub status: Option<SessionStatus>,
}

impl Store {
    pub fn insert_session(&self, s: &Session) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT INTO sessions (id, customer_id, counselor_id, clinic_id, session_date,
             duration_minutes, status, recording_id, transcription_text, overall_score, notes,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                s.id,
                s.customer_id,
                s.counselor_id,
                s.clinic_id,
                s.session_date,
                s.duration_minutes,
                s.status.as_str(),
                s.recording_id,
                s.transcription_text,
                s.overall_score,
                s.notes,
                s.created_at,
                s.updated_at
            ],
        )?;
        Ok(())
    }

    pub fn get_session(&self, id: &str) -> anyhow::Result<Option<Session>> {
        let session = self
            .conn
            .query_row(
                &format!("SELECT {SESSION_COLS} FROM sessions s WHERE s.id = ?1 AND s.is_deleted = 0"),
                params![id],
                session_from_row,
            )
            .optional()?;
        Ok(session)
    }

    /// One page of sessions plus the total row count for the filter.
    pub fn list_sessions(&self, filter: &SessionFilter) -> anyhow::Result<(Vec<Session>, i64)> {
        let mut clauses = vec!["s.is_deleted = 0".to_string()];
        let mut values: Vec<String> = Vec::new();
        if let Some(scope) = &filter.scope {
            push_scope(scope, "s.clinic_id", Some("s.counselor_id"), &mut clauses, &mut values);
        }
        if let Some(status) = filter.status {
            values.push(status.as_str().to_string());
            clauses.push(format!("s.status = ?{}", values.len()));
        }
        if let Some(customer) = &filter.customer_id {
            values.push(customer.clone());
            clauses.push(format!("s.customer_id = ?{}", values.len()));
        }
        if let Some(counselor) = &filter.counselor_id {
            values.push(counselor.clone());
            clauses.push(format!("s.counselor_id = ?{}", values.len()));
        }
        if let Some(from) = &filter.date_from {
            values.push(from.clone());
            clauses.push(format!("s.session_date >= ?{}", values.len()));
        }
        if let Some(to) = &filter.date_to {
            values.push(to.clone());
            clauses.push(format!("s.session_date < ?{}", values.len()));
        }
        let where_clause = where_sql(&clauses);

        let total: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM sessions s {where_clause}"),
            params_from_iter(values.iter()),
            |r| r.get(0),
        )?;

        let per_page = filter.per_page.max(1);
        let offset = page_offset(filter.page, per_page);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SESSION_COLS} FROM sessions s {where_clause}
             ORDER BY s.session_date DESC, s.created_at DESC LIMIT {per_page} OFFSET {offset}"
        ))?;
        let rows = stmt.query_map(params_from_iter(values.iter()), session_from_row)?;
        Ok((rows.collect::<Result<Vec<_>, _>>()?, total))
    }

    /// Apply a patch. A status change is validated against the state machine.
    pub fn update_session(&self, id: &str, patch: &SessionPatch) -> anyhow::Result<Session> {
        let current = self
            .get_session(id)?
            .ok_or_else(|| DeskError::not_found("session", id))?;
        if let Some(next) = patch.status {
            if next != current.status {
                current.status.ensure_transition(next)?;
            }
        }
        self.conn.execute(
            "UPDATE sessions SET session_date = COALESCE(?1, session_date),
             duration_minutes = COALESCE(?2, duration_minutes), notes = COALESCE(?3, notes),
             status = COALESCE(?4, status), updated_at = ?5 WHERE id = ?6",
            params![
                patch.session_date,
                patch.duration_minutes,
                patch.notes,
                patch.status.map(|s| s.as_str()),
                now_ts(),
                id
            ],
        )?;
        self.get_session(id)?
            .ok_or_else(|| DeskError::not_found("session", id).into())
    }

    /// Move a session forward. Advancing to a stage the session already sits
    /// at or past is a no-op so that re-runs never regress it.
    /// Returns the status after the call.
    pub fn advance_session_status(
        &self,
        id: &str,
        next: SessionStatus,
    ) -> anyhow::Result<SessionStatus> {
        let current: String = self
            .conn
            .query_row(
                "SELECT status FROM sessions WHERE id = ?1",
                params![id],
                |r| r.get(0),
            )
            .optional()?
            .ok_or_else(|| DeskError::not_found("session", id))?;
        let current = SessionStatus::parse(&current)
            .ok_or_else(|| anyhow::anyhow!("unknown session status '{current}'"))?;

        if current == next || current.is_at_or_past(next) {
            return Ok(current);
        }
        current.ensure_transition(next)?;
        self.conn.execute(
            "UPDATE sessions SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![next.as_str(), now_ts(), id],
        )?;
        Ok(next)
    }

    pub(crate) fn set_session_transcript(&self, id: &str, text: &str) -> anyhow::Result<()> {
        self.conn.execute(
            "UPDATE sessions SET transcription_text = ?1, updated_at = ?2 WHERE id = ?3",
            params![text, now_ts(), id],
        )?;
        Ok(())
    }

    pub(crate) fn set_session_score(&self, id: &str, score: f64) -> anyhow::Result<()> {
        self.conn.execute(
            "UPDATE sessions SET overall_score = ?1, updated_at = ?2 WHERE id = ?3",
            params![score, now_ts(), id],
        )?;
        Ok(())
    }

    pub fn soft_delete_session(&self, id: &str) -> anyhow::Result<bool> {
        let changed = self.conn.execute(
            "UPDATE sessions SET is_deleted = 1, updated_at = ?1 WHERE id = ?2 AND is_deleted = 0",
            params![now_ts(), id],
        )?;
        Ok(changed > 0)
    }
}
