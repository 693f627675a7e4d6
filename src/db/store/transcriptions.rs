// src/db/store/transcriptions.rs

use std::collections::BTreeMap;

use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde::Serialize;

use super::{page_offset, push_scope, status_col, where_sql, Claim, Store};
use crate::authz::Scope;
use crate::domain::{
    new_id, now_ts, Lifecycle, Segment, SessionStatus, TranscriptionStatus, TranscriptionTask,
};
use crate::infra::errors::DeskError;

const TASK_COLS: &str = "t.id, t.recording_id, t.session_id, t.status, t.progress, t.language, \
     t.temperature, t.text, t.confidence, t.detected_language, t.duration_secs, \
     t.error_message, t.error_code, t.retry_count, t.created_by, t.started_at, \
     t.completed_at, t.estimated_completion_at, t.processing_secs, t.created_at, t.updated_at";

const SCOPED_FROM: &str = "transcription_tasks t
     JOIN recordings r ON r.id = t.recording_id
     LEFT JOIN sessions s ON s.id = t.session_id";

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<TranscriptionTask> {
    Ok(TranscriptionTask {
        id: row.get(0)?,
        recording_id: row.get(1)?,
        session_id: row.get(2)?,
        status: status_col(row, 3)?,
        progress: row.get(4)?,
        language: row.get(5)?,
        temperature: row.get(6)?,
        text: row.get(7)?,
        confidence: row.get(8)?,
        detected_language: row.get(9)?,
        duration_secs: row.get(10)?,
        error_message: row.get(11)?,
        error_code: row.get(12)?,
        retry_count: row.get(13)?,
        created_by: row.get(14)?,
        started_at: row.get(15)?,
        completed_at: row.get(16)?,
        estimated_completion_at: row.get(17)?,
        processing_secs: row.get(18)?,
        created_at: row.get(19)?,
        updated_at: row.get(20)?,
    })
}

#[derive(Debug, Clone)]
pub struct NewTranscription {
    pub recording_id: String,
    pub session_id: Option<String>,
    pub language: String,
    pub temperature: f32,
    pub created_by: String,
    pub estimated_completion_at: Option<String>,
}

/// Everything a successful job writes back.
#[derive(Debug, Clone)]
pub struct TranscriptionOutcome {
    pub text: String,
    pub confidence: f64,
    pub detected_language: Option<String>,
    pub duration_secs: Option<f64>,
    pub segments: Vec<Segment>,
    pub processing_secs: f64,
}

#[derive(Debug, Clone, Default)]
pub struct TranscriptionFilter {
    pub scope: Option<Scope>,
    pub recording_id: Option<String>,
    pub status: Option<TranscriptionStatus>,
    pub page: u32,
    pub per_page: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TranscriptionStats {
    pub total: i64,
    pub by_status: BTreeMap<String, i64>,
    pub average_processing_secs: Option<f64>,
    /// completed / (completed + failed); 0 when nothing finished yet.
    pub success_rate: f64,
}

impl Store {
    /// Create a pending task unless one is already in flight for the recording.
    /// The session (if any) moves to transcribing in the same transaction.
    pub fn claim_transcription(
        &self,
        new: &NewTranscription,
    ) -> anyhow::Result<Claim<TranscriptionTask>> {
        let tx = self.conn.unchecked_transaction()?;
        if let Some(existing) = self.active_transcription_for(&new.recording_id)? {
            return Ok(Claim::InFlight(existing));
        }

        let now = now_ts();
        let id = new_id();
        self.conn.execute(
            "INSERT INTO transcription_tasks (id, recording_id, session_id, status, progress,
             language, temperature, created_by, estimated_completion_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'pending', 0, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                id,
                new.recording_id,
                new.session_id,
                new.language,
                new.temperature,
                new.created_by,
                new.estimated_completion_at,
                now
            ],
        )?;
        if let Some(session_id) = &new.session_id {
            self.advance_session_status(session_id, SessionStatus::Transcribing)?;
        }
        tx.commit()?;

        let task = self
            .get_transcription(&id)?
            .ok_or_else(|| DeskError::not_found("transcription task", &id))?;
        Ok(Claim::Created(task))
    }

    /// Every task still pending, processing or retrying.
    pub(crate) fn active_transcription_ids(&self) -> anyhow::Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT id FROM transcription_tasks WHERE status IN ('pending', 'processing', 'retrying')",
        )?;
        let ids = stmt.query_map([], |r| r.get(0))?;
        Ok(ids.collect::<Result<Vec<String>, _>>()?)
    }

    fn active_transcription_for(&self, recording_id: &str) -> anyhow::Result<Option<String>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM transcription_tasks
                 WHERE recording_id = ?1 AND status IN ('pending', 'processing', 'retrying')",
                params![recording_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(id)
    }

    pub fn get_transcription(&self, id: &str) -> anyhow::Result<Option<TranscriptionTask>> {
        let task = self
            .conn
            .query_row(
                &format!("SELECT {TASK_COLS} FROM transcription_tasks t WHERE t.id = ?1"),
                params![id],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    pub fn transcription_segments(&self, task_id: &str) -> anyhow::Result<Vec<Segment>> {
        let mut stmt = self.conn.prepare(
            "SELECT idx, start_secs, end_secs, text, confidence FROM transcription_segments
             WHERE task_id = ?1 ORDER BY idx",
        )?;
        let rows = stmt.query_map(params![task_id], |row| {
            Ok(Segment {
                id: row.get(0)?,
                start: row.get(1)?,
                end: row.get(2)?,
                text: row.get(3)?,
                confidence: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Most recent task for a session, whatever its status.
    pub fn latest_transcription_for_session(
        &self,
        session_id: &str,
    ) -> anyhow::Result<Option<TranscriptionTask>> {
        let task = self
            .conn
            .query_row(
                &format!(
                    "SELECT {TASK_COLS} FROM transcription_tasks t WHERE t.session_id = ?1
                     ORDER BY t.created_at DESC LIMIT 1"
                ),
                params![session_id],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    pub fn list_transcriptions(
        &self,
        filter: &TranscriptionFilter,
    ) -> anyhow::Result<(Vec<TranscriptionTask>, i64)> {
        let mut clauses = Vec::new();
        let mut values: Vec<String> = Vec::new();
        if let Some(scope) = &filter.scope {
            push_scope(scope, "r.clinic_id", Some("s.counselor_id"), &mut clauses, &mut values);
        }
        if let Some(recording) = &filter.recording_id {
            values.push(recording.clone());
            clauses.push(format!("t.recording_id = ?{}", values.len()));
        }
        if let Some(status) = filter.status {
            values.push(status.as_str().to_string());
            clauses.push(format!("t.status = ?{}", values.len()));
        }
        let where_clause = where_sql(&clauses);
        let total: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {SCOPED_FROM} {where_clause}"),
            params_from_iter(values.iter()),
            |r| r.get(0),
        )?;
        let per_page = filter.per_page.max(1);
        let offset = page_offset(filter.page, per_page);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TASK_COLS} FROM {SCOPED_FROM} {where_clause}
             ORDER BY t.created_at DESC LIMIT {per_page} OFFSET {offset}"
        ))?;
        let rows = stmt.query_map(params_from_iter(values.iter()), task_from_row)?;
        Ok((rows.collect::<Result<Vec<_>, _>>()?, total))
    }

    /// Validated status change. Entering `processing` stamps `started_at` once.
    pub fn set_transcription_status(
        &self,
        id: &str,
        next: TranscriptionStatus,
        progress: Option<u8>,
    ) -> anyhow::Result<()> {
        let task = self
            .get_transcription(id)?
            .ok_or_else(|| DeskError::not_found("transcription task", id))?;
        task.status.ensure_transition(next)?;
        let now = now_ts();
        let started = (next == TranscriptionStatus::Processing).then(|| now.clone());
        self.conn.execute(
            "UPDATE transcription_tasks SET status = ?1, progress = COALESCE(?2, progress),
             started_at = COALESCE(started_at, ?3), updated_at = ?4 WHERE id = ?5",
            params![next.as_str(), progress, started, now, id],
        )?;
        Ok(())
    }

    pub fn set_transcription_progress(&self, id: &str, progress: u8) -> anyhow::Result<()> {
        self.conn.execute(
            "UPDATE transcription_tasks SET progress = ?1, updated_at = ?2 WHERE id = ?3",
            params![progress.min(100), now_ts(), id],
        )?;
        Ok(())
    }

    /// Persist a successful result, its segments and the session transcript.
    pub fn complete_transcription(
        &self,
        id: &str,
        outcome: &TranscriptionOutcome,
    ) -> anyhow::Result<TranscriptionTask> {
        if outcome.text.trim().is_empty() {
            return Err(DeskError::Validation("completed transcription has no text".into()).into());
        }
        if !(0.0..=1.0).contains(&outcome.confidence) {
            return Err(DeskError::Validation(format!(
                "confidence {} outside [0, 1]",
                outcome.confidence
            ))
            .into());
        }

        let tx = self.conn.unchecked_transaction()?;
        let task = self
            .get_transcription(id)?
            .ok_or_else(|| DeskError::not_found("transcription task", id))?;
        task.status.ensure_transition(TranscriptionStatus::Completed)?;

        let now = now_ts();
        self.conn.execute(
            "UPDATE transcription_tasks SET status = 'completed', progress = 100, text = ?1,
             confidence = ?2, detected_language = ?3, duration_secs = ?4, processing_secs = ?5,
             error_message = NULL, error_code = NULL, completed_at = ?6, updated_at = ?6
             WHERE id = ?7",
            params![
                outcome.text,
                outcome.confidence,
                outcome.detected_language,
                outcome.duration_secs,
                outcome.processing_secs,
                now,
                id
            ],
        )?;
        self.conn.execute(
            "DELETE FROM transcription_segments WHERE task_id = ?1",
            params![id],
        )?;
        {
            let mut insert = self.conn.prepare(
                "INSERT INTO transcription_segments (task_id, idx, start_secs, end_secs, text, confidence)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for seg in &outcome.segments {
                insert.execute(params![id, seg.id, seg.start, seg.end, seg.text, seg.confidence])?;
            }
        }
        if let Some(session_id) = &task.session_id {
            self.set_session_transcript(session_id, &outcome.text)?;
            self.advance_session_status(session_id, SessionStatus::Transcribed)?;
        }
        tx.commit()?;

        self.get_transcription(id)?
            .ok_or_else(|| DeskError::not_found("transcription task", id).into())
    }

    /// Mark the task failed and, where the state machine allows, its session.
    pub fn fail_transcription(&self, id: &str, code: &str, message: &str) -> anyhow::Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        let task = self
            .get_transcription(id)?
            .ok_or_else(|| DeskError::not_found("transcription task", id))?;
        task.status.ensure_transition(TranscriptionStatus::Failed)?;
        let now = now_ts();
        self.conn.execute(
            "UPDATE transcription_tasks SET status = 'failed', error_code = ?1, error_message = ?2,
             completed_at = ?3, updated_at = ?3 WHERE id = ?4",
            params![code, message, now, id],
        )?;
        if let Some(session_id) = &task.session_id {
            self.fail_session_if_allowed(session_id)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// User-initiated retry: failed -> pending, retry_count + 1. At the cap the
    /// task stays failed and a conflict is returned.
    pub fn retry_transcription(
        &self,
        id: &str,
        max_retries: u32,
    ) -> anyhow::Result<TranscriptionTask> {
        let tx = self.conn.unchecked_transaction()?;
        let task = self
            .get_transcription(id)?
            .ok_or_else(|| DeskError::not_found("transcription task", id))?;
        if task.status != TranscriptionStatus::Failed {
            return Err(DeskError::Conflict(format!(
                "only failed tasks can be retried (status is {})",
                task.status
            ))
            .into());
        }
        if task.retry_count >= max_retries {
            return Err(DeskError::Conflict(format!(
                "retry limit of {max_retries} reached for task '{id}'"
            ))
            .into());
        }
        if let Some(other) = self.active_transcription_for(&task.recording_id)? {
            return Err(DeskError::Conflict(format!(
                "transcription '{other}' is already in progress for this recording"
            ))
            .into());
        }
        task.status.ensure_transition(TranscriptionStatus::Pending)?;

        self.conn.execute(
            "UPDATE transcription_tasks SET status = 'pending', progress = 0,
             retry_count = retry_count + 1, error_code = NULL, error_message = NULL,
             started_at = NULL, completed_at = NULL, updated_at = ?1 WHERE id = ?2",
            params![now_ts(), id],
        )?;
        if let Some(session_id) = &task.session_id {
            self.advance_session_status(session_id, SessionStatus::Transcribing)?;
        }
        tx.commit()?;

        self.get_transcription(id)?
            .ok_or_else(|| DeskError::not_found("transcription task", id).into())
    }

    pub fn transcription_stats(&self, scope: &Scope) -> anyhow::Result<TranscriptionStats> {
        let mut clauses = Vec::new();
        let mut values: Vec<String> = Vec::new();
        push_scope(scope, "r.clinic_id", Some("s.counselor_id"), &mut clauses, &mut values);
        let where_clause = where_sql(&clauses);

        let mut stats = TranscriptionStats::default();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT t.status, COUNT(*) FROM {SCOPED_FROM} {where_clause} GROUP BY t.status"
        ))?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row?;
            stats.total += count;
            stats.by_status.insert(status, count);
        }

        stats.average_processing_secs = self.conn.query_row(
            &format!(
                "SELECT AVG(t.processing_secs) FROM {SCOPED_FROM} {}",
                where_sql(&[clauses.clone(), vec!["t.status = 'completed'".to_string()]].concat())
            ),
            params_from_iter(values.iter()),
            |r| r.get(0),
        )?;

        let completed = stats.by_status.get("completed").copied().unwrap_or(0);
        let failed = stats.by_status.get("failed").copied().unwrap_or(0);
        if completed + failed > 0 {
            stats.success_rate = completed as f64 / (completed + failed) as f64;
        }
        Ok(stats)
    }

    /// Move a session to failed unless it already finished.
    pub(crate) fn fail_session_if_allowed(&self, session_id: &str) -> anyhow::Result<()> {
        if let Some(session) = self.get_session(session_id)? {
            if session.status.can_transition_to(SessionStatus::Failed) {
                self.conn.execute(
                    "UPDATE sessions SET status = 'failed', updated_at = ?1 WHERE id = ?2",
                    params![now_ts(), session_id],
                )?;
            }
        }
        Ok(())
    }
}
