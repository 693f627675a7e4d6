// src/db/store/analyses.rs

use std::collections::{BTreeMap, BTreeSet};

use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde::Serialize;

use super::{json_col, opt_json_col, page_offset, push_scope, status_col, where_sql, Claim, Store};
use crate::analysis::types::{expected_overall, AnalysisResult, AnalysisType, Category};
use crate::authz::Scope;
use crate::domain::{new_id, now_ts, AnalysisStatus, AnalysisTask, Lifecycle, SessionStatus};
use crate::infra::errors::DeskError;

const TASK_COLS: &str = "a.id, a.transcription_id, a.session_id, a.analysis_type, a.status, \
     a.progress, a.focus_areas, a.custom_prompts, a.overall_score, a.result, a.tokens_used, \
     a.cost, a.error_message, a.error_code, a.retry_count, a.created_by, a.started_at, \
     a.completed_at, a.estimated_completion_at, a.created_at, a.updated_at";

const SCOPED_FROM: &str = "analysis_tasks a
     JOIN transcription_tasks t ON t.id = a.transcription_id
     JOIN recordings r ON r.id = t.recording_id
     LEFT JOIN sessions s ON s.id = a.session_id";

const ACTIVE: &str = "('pending', 'preprocessing', 'analyzing', 'generating_suggestions')";

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<AnalysisTask> {
    let kind: String = row.get(3)?;
    let analysis_type: AnalysisType = kind.parse().map_err(|e: DeskError| {
        rusqlite::Error::FromSqlConversionFailure(3, Type::Text, e.to_string().into())
    })?;
    Ok(AnalysisTask {
        id: row.get(0)?,
        transcription_id: row.get(1)?,
        session_id: row.get(2)?,
        analysis_type,
        status: status_col(row, 4)?,
        progress: row.get(5)?,
        focus_areas: json_col(row, 6)?,
        custom_prompts: json_col(row, 7)?,
        overall_score: row.get(8)?,
        result: opt_json_col(row, 9)?,
        tokens_used: row.get(10)?,
        cost: row.get(11)?,
        error_message: row.get(12)?,
        error_code: row.get(13)?,
        retry_count: row.get(14)?,
        created_by: row.get(15)?,
        started_at: row.get(16)?,
        completed_at: row.get(17)?,
        estimated_completion_at: row.get(18)?,
        created_at: row.get(19)?,
        updated_at: row.get(20)?,
    })
}

#[derive(Debug, Clone)]
pub struct NewAnalysis {
    pub transcription_id: String,
    pub session_id: Option<String>,
    pub analysis_type: AnalysisType,
    pub focus_areas: Vec<Category>,
    pub custom_prompts: BTreeMap<String, String>,
    pub created_by: String,
    pub estimated_completion_at: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AnalysisFilter {
    pub scope: Option<Scope>,
    pub transcription_id: Option<String>,
    pub status: Option<AnalysisStatus>,
    pub analysis_type: Option<AnalysisType>,
    pub page: u32,
    pub per_page: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisStats {
    pub total: i64,
    pub by_status: BTreeMap<String, i64>,
    pub average_score: Option<f64>,
    pub total_tokens: i64,
    pub total_cost: f64,
}

impl Store {
    /// Create a pending analysis unless one is in flight for the transcription.
    pub fn claim_analysis(&self, new: &NewAnalysis) -> anyhow::Result<Claim<AnalysisTask>> {
        let tx = self.conn.unchecked_transaction()?;
        let id = match self.insert_analysis(new)? {
            Claim::Created(id) => id,
            Claim::InFlight(existing) => return Ok(Claim::InFlight(existing)),
        };
        tx.commit()?;
        Ok(Claim::Created(self.require_analysis(&id)?))
    }

    /// Claim every transcription of a batch in one transaction. Any conflict
    /// or failed session transition rolls the whole batch back.
    pub fn claim_analyses(&self, news: &[NewAnalysis]) -> anyhow::Result<Claim<Vec<AnalysisTask>>> {
        let tx = self.conn.unchecked_transaction()?;
        let mut ids = Vec::with_capacity(news.len());
        for new in news {
            match self.insert_analysis(new)? {
                Claim::Created(id) => ids.push(id),
                Claim::InFlight(existing) => return Ok(Claim::InFlight(existing)),
            }
        }
        tx.commit()?;
        let tasks = ids
            .iter()
            .map(|id| self.require_analysis(id))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Claim::Created(tasks))
    }

    /// Insert without a transaction of its own; callers wrap it.
    fn insert_analysis(&self, new: &NewAnalysis) -> anyhow::Result<Claim<String>> {
        if let Some(existing) = self.active_analysis_for(&new.transcription_id)? {
            return Ok(Claim::InFlight(existing));
        }
        let now = now_ts();
        let id = new_id();
        let focus_areas = serde_json::to_string(&new.focus_areas)?;
        let custom_prompts = serde_json::to_string(&new.custom_prompts)?;
        self.conn.execute(
            "INSERT INTO analysis_tasks (id, transcription_id, session_id, analysis_type, status,
             progress, focus_areas, custom_prompts, created_by, estimated_completion_at,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                id,
                new.transcription_id,
                new.session_id,
                new.analysis_type.as_str(),
                focus_areas,
                custom_prompts,
                new.created_by,
                new.estimated_completion_at,
                now
            ],
        )?;
        if let Some(session_id) = &new.session_id {
            self.advance_session_status(session_id, SessionStatus::Analyzing)?;
        }
        Ok(Claim::Created(id))
    }

    fn require_analysis(&self, id: &str) -> anyhow::Result<AnalysisTask> {
        Ok(self
            .get_analysis(id)?
            .ok_or_else(|| DeskError::not_found("analysis task", id))?)
    }

    pub(crate) fn active_analysis_ids(&self) -> anyhow::Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT id FROM analysis_tasks WHERE status IN {ACTIVE}"))?;
        let ids = stmt.query_map([], |r| r.get(0))?;
        Ok(ids.collect::<Result<Vec<String>, _>>()?)
    }

    fn active_analysis_for(&self, transcription_id: &str) -> anyhow::Result<Option<String>> {
        let id = self
            .conn
            .query_row(
                &format!(
                    "SELECT id FROM analysis_tasks WHERE transcription_id = ?1 AND status IN {ACTIVE}"
                ),
                params![transcription_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Transcriptions (of the given set) with an analysis currently in flight.
    pub fn transcriptions_with_active_analysis(
        &self,
        transcription_ids: &[String],
    ) -> anyhow::Result<BTreeSet<String>> {
        let mut busy = BTreeSet::new();
        for id in transcription_ids {
            if self.active_analysis_for(id)?.is_some() {
                busy.insert(id.clone());
            }
        }
        Ok(busy)
    }

    pub fn get_analysis(&self, id: &str) -> anyhow::Result<Option<AnalysisTask>> {
        let task = self
            .conn
            .query_row(
                &format!("SELECT {TASK_COLS} FROM analysis_tasks a WHERE a.id = ?1"),
                params![id],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    pub fn latest_analysis_for_session(
        &self,
        session_id: &str,
    ) -> anyhow::Result<Option<AnalysisTask>> {
        let task = self
            .conn
            .query_row(
                &format!(
                    "SELECT {TASK_COLS} FROM analysis_tasks a WHERE a.session_id = ?1
                     ORDER BY a.created_at DESC LIMIT 1"
                ),
                params![session_id],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    pub fn list_analyses(
        &self,
        filter: &AnalysisFilter,
    ) -> anyhow::Result<(Vec<AnalysisTask>, i64)> {
        let mut clauses = Vec::new();
        let mut values: Vec<String> = Vec::new();
        if let Some(scope) = &filter.scope {
            push_scope(scope, "r.clinic_id", Some("s.counselor_id"), &mut clauses, &mut values);
        }
        if let Some(tid) = &filter.transcription_id {
            values.push(tid.clone());
            clauses.push(format!("a.transcription_id = ?{}", values.len()));
        }
        if let Some(status) = filter.status {
            values.push(status.as_str().to_string());
            clauses.push(format!("a.status = ?{}", values.len()));
        }
        if let Some(kind) = filter.analysis_type {
            values.push(kind.as_str().to_string());
            clauses.push(format!("a.analysis_type = ?{}", values.len()));
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
             ORDER BY a.created_at DESC LIMIT {per_page} OFFSET {offset}"
        ))?;
        let rows = stmt.query_map(params_from_iter(values.iter()), task_from_row)?;
        Ok((rows.collect::<Result<Vec<_>, _>>()?, total))
    }

    /// Validated stage change; progress follows the stage milestone.
    pub fn set_analysis_status(&self, id: &str, next: AnalysisStatus) -> anyhow::Result<()> {
        let task = self
            .get_analysis(id)?
            .ok_or_else(|| DeskError::not_found("analysis task", id))?;
        task.status.ensure_transition(next)?;
        let now = now_ts();
        let started = (next == AnalysisStatus::Preprocessing).then(|| now.clone());
        self.conn.execute(
            "UPDATE analysis_tasks SET status = ?1, progress = ?2,
             started_at = COALESCE(started_at, ?3), updated_at = ?4 WHERE id = ?5",
            params![next.as_str(), next.progress(), started, now, id],
        )?;
        Ok(())
    }

    /// Persist a finished analysis after checking its score invariants.
    pub fn complete_analysis(
        &self,
        id: &str,
        result: &AnalysisResult,
        tokens_used: u32,
        cost: f64,
    ) -> anyhow::Result<AnalysisTask> {
        let tx = self.conn.unchecked_transaction()?;
        let task = self
            .get_analysis(id)?
            .ok_or_else(|| DeskError::not_found("analysis task", id))?;

        if !(0.0..=10.0).contains(&result.overall_score) {
            return Err(DeskError::Validation(format!(
                "overall score {} outside [0, 10]",
                result.overall_score
            ))
            .into());
        }
        let expected = expected_overall(result, task.analysis_type);
        if (expected - result.overall_score).abs() > 0.011 {
            return Err(DeskError::Validation(format!(
                "overall score {} does not match weighted sub-scores ({expected})",
                result.overall_score
            ))
            .into());
        }
        task.status.ensure_transition(AnalysisStatus::Completed)?;

        let now = now_ts();
        let result_json = serde_json::to_string(result)?;
        self.conn.execute(
            "UPDATE analysis_tasks SET status = 'completed', progress = 100, overall_score = ?1,
             result = ?2, tokens_used = ?3, cost = ?4, error_code = NULL, error_message = NULL,
             completed_at = ?5, updated_at = ?5 WHERE id = ?6",
            params![
                result.overall_score,
                result_json,
                tokens_used,
                cost,
                now,
                id
            ],
        )?;
        if let Some(session_id) = &task.session_id {
            self.set_session_score(session_id, result.overall_score)?;
            self.advance_session_status(session_id, SessionStatus::Analyzed)?;
        }
        tx.commit()?;

        self.get_analysis(id)?
            .ok_or_else(|| DeskError::not_found("analysis task", id).into())
    }

    pub fn fail_analysis(&self, id: &str, code: &str, message: &str) -> anyhow::Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        let task = self
            .get_analysis(id)?
            .ok_or_else(|| DeskError::not_found("analysis task", id))?;
        task.status.ensure_transition(AnalysisStatus::Failed)?;
        let now = now_ts();
        self.conn.execute(
            "UPDATE analysis_tasks SET status = 'failed', error_code = ?1, error_message = ?2,
             completed_at = ?3, updated_at = ?3 WHERE id = ?4",
            params![code, message, now, id],
        )?;
        if let Some(session_id) = &task.session_id {
            self.fail_session_if_allowed(session_id)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn retry_analysis(&self, id: &str, max_retries: u32) -> anyhow::Result<AnalysisTask> {
        let tx = self.conn.unchecked_transaction()?;
        let task = self
            .get_analysis(id)?
            .ok_or_else(|| DeskError::not_found("analysis task", id))?;
        if task.status != AnalysisStatus::Failed {
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
        if let Some(other) = self.active_analysis_for(&task.transcription_id)? {
            return Err(DeskError::Conflict(format!(
                "analysis '{other}' is already in progress for this transcription"
            ))
            .into());
        }
        task.status.ensure_transition(AnalysisStatus::Pending)?;
        self.conn.execute(
            "UPDATE analysis_tasks SET status = 'pending', progress = 0,
             retry_count = retry_count + 1, error_code = NULL, error_message = NULL,
             started_at = NULL, completed_at = NULL, updated_at = ?1 WHERE id = ?2",
            params![now_ts(), id],
        )?;
        if let Some(session_id) = &task.session_id {
            self.advance_session_status(session_id, SessionStatus::Analyzing)?;
        }
        tx.commit()?;

        self.get_analysis(id)?
            .ok_or_else(|| DeskError::not_found("analysis task", id).into())
    }

    pub fn analysis_stats(&self, scope: &Scope) -> anyhow::Result<AnalysisStats> {
        let mut clauses = Vec::new();
        let mut values: Vec<String> = Vec::new();
        push_scope(scope, "r.clinic_id", Some("s.counselor_id"), &mut clauses, &mut values);
        let where_clause = where_sql(&clauses);

        let mut stats = AnalysisStats::default();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT a.status, COUNT(*) FROM {SCOPED_FROM} {where_clause} GROUP BY a.status"
        ))?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row?;
            stats.total += count;
            stats.by_status.insert(status, count);
        }

        let (avg, tokens, cost): (Option<f64>, Option<i64>, Option<f64>) = self.conn.query_row(
            &format!(
                "SELECT AVG(a.overall_score), SUM(a.tokens_used), SUM(a.cost) FROM {SCOPED_FROM} {}",
                where_sql(&[clauses.clone(), vec!["a.status = 'completed'".to_string()]].concat())
            ),
            params_from_iter(values.iter()),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )?;
        stats.average_score = avg.map(crate::analysis::types::round2);
        stats.total_tokens = tokens.unwrap_or(0);
        stats.total_cost = cost.unwrap_or(0.0);
        Ok(stats)
    }
}
