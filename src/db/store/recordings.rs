// src/db/store/recordings.rs

use rusqlite::{params, params_from_iter, OptionalExtension, Row};

use super::{json_col, page_offset, push_scope, status_col, where_sql, Store};
use crate::authz::Scope;
use crate::domain::{
    new_id, now_ts, Lifecycle, Recording, Session, SessionStatus, UploadStatus,
};
use crate::infra::errors::DeskError;

const RECORDING_COLS: &str = "r.id, r.customer_id, r.clinic_id, r.session_id, r.file_path, \
     r.original_filename, r.content_type, r.file_size, r.duration_secs, r.upload_status, \
     r.session_date, r.created_by, r.metadata, r.uploaded_at, r.created_at, r.updated_at";

fn recording_from_row(row: &Row<'_>) -> rusqlite::Result<Recording> {
    Ok(Recording {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        clinic_id: row.get(2)?,
        session_id: row.get(3)?,
        file_path: row.get(4)?,
        original_filename: row.get(5)?,
        content_type: row.get(6)?,
        file_size: row.get(7)?,
        duration_secs: row.get(8)?,
        upload_status: status_col(row, 9)?,
        session_date: row.get(10)?,
        created_by: row.get(11)?,
        metadata: json_col(row, 12)?,
        uploaded_at: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

#[derive(Debug, Clone, Default)]
pub struct RecordingFilter {
    pub scope: Option<Scope>,
    pub customer_id: Option<String>,
    pub upload_status: Option<UploadStatus>,
    pub page: u32,
    pub per_page: u32,
}

/// Result of flipping a recording to completed.
#[derive(Debug, Clone)]
pub struct CompletedUpload {
    pub recording: Recording,
    pub session: Session,
    /// The recording was already completed; nothing changed.
    pub already_completed: bool,
}

impl Store {
    pub fn insert_recording(&self, r: &Recording) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT INTO recordings (id, customer_id, clinic_id, session_id, file_path,
             original_filename, content_type, file_size, duration_secs, upload_status,
             session_date, created_by, metadata, uploaded_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                r.id,
                r.customer_id,
                r.clinic_id,
                r.session_id,
                r.file_path,
                r.original_filename,
                r.content_type,
                r.file_size,
                r.duration_secs,
                r.upload_status.as_str(),
                r.session_date,
                r.created_by,
                r.metadata.to_string(),
                r.uploaded_at,
                r.created_at,
                r.updated_at
            ],
        )?;
        Ok(())
    }

    pub fn get_recording(&self, id: &str) -> anyhow::Result<Option<Recording>> {
        let rec = self
            .conn
            .query_row(
                &format!(
                    "SELECT {RECORDING_COLS} FROM recordings r WHERE r.id = ?1 AND r.is_deleted = 0"
                ),
                params![id],
                recording_from_row,
            )
            .optional()?;
        Ok(rec)
    }

    pub fn list_recordings(
        &self,
        filter: &RecordingFilter,
    ) -> anyhow::Result<(Vec<Recording>, i64)> {
        let mut clauses = vec!["r.is_deleted = 0".to_string()];
        let mut values: Vec<String> = Vec::new();
        if let Some(scope) = &filter.scope {
            push_scope(scope, "r.clinic_id", Some("r.created_by"), &mut clauses, &mut values);
        }
        if let Some(customer) = &filter.customer_id {
            values.push(customer.clone());
            clauses.push(format!("r.customer_id = ?{}", values.len()));
        }
        if let Some(status) = filter.upload_status {
            values.push(status.as_str().to_string());
            clauses.push(format!("r.upload_status = ?{}", values.len()));
        }
        let where_clause = where_sql(&clauses);
        let total: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM recordings r {where_clause}"),
            params_from_iter(values.iter()),
            |r| r.get(0),
        )?;
        let per_page = filter.per_page.max(1);
        let offset = page_offset(filter.page, per_page);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORDING_COLS} FROM recordings r {where_clause}
             ORDER BY r.created_at DESC LIMIT {per_page} OFFSET {offset}"
        ))?;
        let rows = stmt.query_map(params_from_iter(values.iter()), recording_from_row)?;
        Ok((rows.collect::<Result<Vec<_>, _>>()?, total))
    }

    /// Flip a recording to completed and create its session in one transaction.
    /// Completing an already-completed recording returns the existing session.
    pub fn complete_recording(
        &self,
        id: &str,
        actual_size: Option<i64>,
        counselor_id: &str,
    ) -> anyhow::Result<CompletedUpload> {
        let tx = self.conn.unchecked_transaction()?;
        let recording = self
            .get_recording(id)?
            .ok_or_else(|| DeskError::not_found("recording", id))?;

        if recording.upload_status == UploadStatus::Completed {
            if let Some(session_id) = &recording.session_id {
                if let Some(session) = self.get_session(session_id)? {
                    return Ok(CompletedUpload {
                        recording,
                        session,
                        already_completed: true,
                    });
                }
            }
        }
        if recording.upload_status == UploadStatus::Failed {
            return Err(DeskError::Conflict(format!("recording '{id}' upload failed")).into());
        }
        recording
            .upload_status
            .ensure_transition(UploadStatus::Completed)?;

        let now = now_ts();
        let session = Session {
            id: new_id(),
            customer_id: recording.customer_id.clone(),
            counselor_id: counselor_id.to_string(),
            clinic_id: recording.clinic_id.clone(),
            session_date: recording.session_date.clone(),
            duration_minutes: recording
                .duration_secs
                .map(|secs| (secs / 60.0).round() as i64),
            status: SessionStatus::Recorded,
            recording_id: Some(recording.id.clone()),
            transcription_text: None,
            overall_score: None,
            notes: None,
            created_at: now.clone(),
            updated_at: now.clone(),
        };
        self.insert_session(&session)?;
        self.conn.execute(
            "UPDATE recordings SET upload_status = ?1, file_size = COALESCE(?2, file_size),
             uploaded_at = ?3, session_id = ?4, updated_at = ?3 WHERE id = ?5",
            params![
                UploadStatus::Completed.as_str(),
                actual_size,
                now,
                session.id,
                id
            ],
        )?;
        tx.commit()?;

        let recording = self
            .get_recording(id)?
            .ok_or_else(|| DeskError::not_found("recording", id))?;
        Ok(CompletedUpload {
            recording,
            session,
            already_completed: false,
        })
    }

    pub fn fail_recording(&self, id: &str) -> anyhow::Result<()> {
        let recording = self
            .get_recording(id)?
            .ok_or_else(|| DeskError::not_found("recording", id))?;
        recording.upload_status.ensure_transition(UploadStatus::Failed)?;
        self.conn.execute(
            "UPDATE recordings SET upload_status = ?1, updated_at = ?2 WHERE id = ?3",
            params![UploadStatus::Failed.as_str(), now_ts(), id],
        )?;
        Ok(())
    }

    pub fn soft_delete_recording(&self, id: &str) -> anyhow::Result<bool> {
        let changed = self.conn.execute(
            "UPDATE recordings SET is_deleted = 1, updated_at = ?1 WHERE id = ?2 AND is_deleted = 0",
            params![now_ts(), id],
        )?;
        Ok(changed > 0)
    }

    /// Pending recordings created before `before` (orphans whose upload was
    /// never completed). Scoped to a clinic when given.
    pub fn stale_pending_recordings(
        &self,
        before: &str,
        clinic_id: Option<&str>,
    ) -> anyhow::Result<Vec<Recording>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORDING_COLS} FROM recordings r
             WHERE r.is_deleted = 0 AND r.upload_status = 'pending' AND r.created_at < ?1
               AND (?2 IS NULL OR r.clinic_id = ?2)
             ORDER BY r.created_at"
        ))?;
        let rows = stmt.query_map(params![before, clinic_id], recording_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
