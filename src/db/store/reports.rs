// src/db/store/reports.rs — Read-only aggregates behind the dashboards

use std::collections::BTreeMap;

use rusqlite::params;
use serde::Serialize;

use super::sessions::{session_from_row, SESSION_COLS};
use super::{opt_json_col, Store};
use crate::analysis::types::AnalysisResult;
use crate::domain::Session;

/// Score at or above which a session counts as high-scoring.
pub const HIGH_SCORE: f64 = 8.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KpiSummary {
    pub total_sessions: i64,
    /// Sessions whose analysis finished (analyzed or completed).
    pub completed_sessions: i64,
    pub average_score: Option<f64>,
    /// Share of scored sessions with score >= 8.0.
    pub high_score_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyPoint {
    /// `YYYY-MM-DD`
    pub date: String,
    pub sessions: i64,
    pub average_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounselorScore {
    pub counselor_id: String,
    pub name: String,
    pub sessions: i64,
    pub average_score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineCounts {
    pub sessions_by_status: BTreeMap<String, i64>,
    pub transcriptions_queued: i64,
    pub transcriptions_processing: i64,
    pub analyses_queued: i64,
    pub analyses_processing: i64,
}

/// One session on a counselor's timeline.
#[derive(Debug, Clone)]
pub struct SessionScores {
    pub session_date: String,
    pub overall_score: Option<f64>,
    pub result: Option<AnalysisResult>,
}

impl Store {
    /// Session KPIs since `since`, optionally limited to one clinic.
    pub fn kpi_summary(&self, clinic_id: Option<&str>, since: &str) -> anyhow::Result<KpiSummary> {
        let summary = self.conn.query_row(
            "SELECT COUNT(*),
                    SUM(CASE WHEN status IN ('analyzed', 'completed') THEN 1 ELSE 0 END),
                    AVG(overall_score),
                    SUM(CASE WHEN overall_score IS NOT NULL THEN 1 ELSE 0 END),
                    SUM(CASE WHEN overall_score >= ?3 THEN 1 ELSE 0 END)
             FROM sessions
             WHERE is_deleted = 0 AND session_date >= ?1 AND (?2 IS NULL OR clinic_id = ?2)",
            params![since, clinic_id, HIGH_SCORE],
            |r| {
                let total: i64 = r.get(0)?;
                let completed: Option<i64> = r.get(1)?;
                let avg: Option<f64> = r.get(2)?;
                let scored: Option<i64> = r.get(3)?;
                let high: Option<i64> = r.get(4)?;
                let scored = scored.unwrap_or(0);
                Ok(KpiSummary {
                    total_sessions: total,
                    completed_sessions: completed.unwrap_or(0),
                    average_score: avg.map(crate::analysis::types::round2),
                    high_score_rate: if scored > 0 {
                        high.unwrap_or(0) as f64 / scored as f64
                    } else {
                        0.0
                    },
                })
            },
        )?;
        Ok(summary)
    }

    /// Sessions and average score per day, oldest first.
    pub fn daily_trend(&self, clinic_id: Option<&str>, since: &str) -> anyhow::Result<Vec<DailyPoint>> {
        let mut stmt = self.conn.prepare(
            "SELECT substr(session_date, 1, 10) AS day, COUNT(*), AVG(overall_score)
             FROM sessions
             WHERE is_deleted = 0 AND session_date >= ?1 AND (?2 IS NULL OR clinic_id = ?2)
             GROUP BY day ORDER BY day",
        )?;
        let rows = stmt.query_map(params![since, clinic_id], |r| {
            let avg: Option<f64> = r.get(2)?;
            Ok(DailyPoint {
                date: r.get(0)?,
                sessions: r.get(1)?,
                average_score: avg.map(crate::analysis::types::round2),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn top_counselors(
        &self,
        clinic_id: Option<&str>,
        since: &str,
        limit: u32,
    ) -> anyhow::Result<Vec<CounselorScore>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT s.counselor_id, u.name, COUNT(*), AVG(s.overall_score) AS avg_score
             FROM sessions s JOIN users u ON u.id = s.counselor_id
             WHERE s.is_deleted = 0 AND s.overall_score IS NOT NULL AND s.session_date >= ?1
               AND (?2 IS NULL OR s.clinic_id = ?2)
             GROUP BY s.counselor_id, u.name
             ORDER BY avg_score DESC, u.name LIMIT {limit}"
        ))?;
        let rows = stmt.query_map(params![since, clinic_id], |r| {
            let avg: f64 = r.get(3)?;
            Ok(CounselorScore {
                counselor_id: r.get(0)?,
                name: r.get(1)?,
                sessions: r.get(2)?,
                average_score: crate::analysis::types::round2(avg),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// (total sessions, scored sessions, average score) for one counselor.
    pub fn counselor_totals(&self, counselor_id: &str) -> anyhow::Result<(i64, i64, Option<f64>)> {
        let totals = self.conn.query_row(
            "SELECT COUNT(*), COUNT(overall_score), AVG(overall_score)
             FROM sessions WHERE is_deleted = 0 AND counselor_id = ?1",
            params![counselor_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )?;
        Ok(totals)
    }

    /// Most recent scored sessions of a counselor.
    pub fn recent_scored_sessions(&self, counselor_id: &str, limit: u32) -> anyhow::Result<Vec<Session>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SESSION_COLS} FROM sessions s
             WHERE s.is_deleted = 0 AND s.counselor_id = ?1 AND s.overall_score IS NOT NULL
             ORDER BY s.session_date DESC LIMIT {limit}"
        ))?;
        let rows = stmt.query_map(params![counselor_id], session_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Completed analysis results for a counselor's sessions.
    pub fn counselor_analysis_results(&self, counselor_id: &str) -> anyhow::Result<Vec<AnalysisResult>> {
        let mut stmt = self.conn.prepare(
            "SELECT a.result FROM analysis_tasks a JOIN sessions s ON s.id = a.session_id
             WHERE s.is_deleted = 0 AND s.counselor_id = ?1 AND a.status = 'completed'
               AND a.result IS NOT NULL
             ORDER BY a.completed_at DESC",
        )?;
        let rows = stmt.query_map(params![counselor_id], |r| opt_json_col::<AnalysisResult>(r, 0))?;
        let mut results = Vec::new();
        for row in rows {
            if let Some(result) = row? {
                results.push(result);
            }
        }
        Ok(results)
    }

    /// Completed results scoring at least [`HIGH_SCORE`] overall, for sessions
    /// dated on or after `since`.
    pub fn high_score_results(
        &self,
        clinic_id: Option<&str>,
        counselor_id: Option<&str>,
        since: &str,
    ) -> anyhow::Result<Vec<AnalysisResult>> {
        let mut stmt = self.conn.prepare(
            "SELECT a.result FROM analysis_tasks a JOIN sessions s ON s.id = a.session_id
             WHERE s.is_deleted = 0 AND a.status = 'completed' AND a.result IS NOT NULL
               AND a.overall_score >= ?1 AND s.session_date >= ?2
               AND (?3 IS NULL OR s.clinic_id = ?3)
               AND (?4 IS NULL OR s.counselor_id = ?4)
             ORDER BY a.completed_at DESC",
        )?;
        let rows = stmt.query_map(params![HIGH_SCORE, since, clinic_id, counselor_id], |r| {
            opt_json_col::<AnalysisResult>(r, 0)
        })?;
        let mut results = Vec::new();
        for row in rows {
            if let Some(result) = row? {
                results.push(result);
            }
        }
        Ok(results)
    }

    /// A counselor's sessions since `since`, oldest first, each with the
    /// result of its latest completed analysis.
    pub fn counselor_session_scores(
        &self,
        counselor_id: &str,
        since: &str,
    ) -> anyhow::Result<Vec<SessionScores>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.session_date, s.overall_score,
                    (SELECT a.result FROM analysis_tasks a
                     WHERE a.session_id = s.id AND a.status = 'completed' AND a.result IS NOT NULL
                     ORDER BY a.completed_at DESC LIMIT 1)
             FROM sessions s
             WHERE s.is_deleted = 0 AND s.counselor_id = ?1 AND s.session_date >= ?2
             ORDER BY s.session_date, s.created_at",
        )?;
        let rows = stmt.query_map(params![counselor_id, since], |r| {
            Ok(SessionScores {
                session_date: r.get(0)?,
                overall_score: r.get(1)?,
                result: opt_json_col(r, 2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn pipeline_counts(&self) -> anyhow::Result<PipelineCounts> {
        let mut counts = PipelineCounts::default();
        let mut stmt = self.conn.prepare(
            "SELECT status, COUNT(*) FROM sessions WHERE is_deleted = 0 GROUP BY status",
        )?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
        for row in rows {
            let (status, n) = row?;
            counts.sessions_by_status.insert(status, n);
        }

        (counts.transcriptions_queued, counts.transcriptions_processing) = self.conn.query_row(
            "SELECT SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN status IN ('processing', 'retrying') THEN 1 ELSE 0 END)
             FROM transcription_tasks",
            [],
            |r| {
                Ok((
                    r.get::<_, Option<i64>>(0)?.unwrap_or(0),
                    r.get::<_, Option<i64>>(1)?.unwrap_or(0),
                ))
            },
        )?;
        (counts.analyses_queued, counts.analyses_processing) = self.conn.query_row(
            "SELECT SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN status IN ('preprocessing', 'analyzing', 'generating_suggestions')
                        THEN 1 ELSE 0 END)
             FROM analysis_tasks",
            [],
            |r| {
                Ok((
                    r.get::<_, Option<i64>>(0)?.unwrap_or(0),
                    r.get::<_, Option<i64>>(1)?.unwrap_or(0),
                ))
            },
        )?;
        Ok(counts)
    }

    /// failed / finished over both task tables since `since`.
    pub fn task_error_rate(&self, since: &str) -> anyhow::Result<f64> {
        let (failed, finished): (Option<i64>, Option<i64>) = self.conn.query_row(
            "SELECT SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN status IN ('failed', 'completed') THEN 1 ELSE 0 END)
             FROM (SELECT status, created_at FROM transcription_tasks
                   UNION ALL
                   SELECT status, created_at FROM analysis_tasks)
             WHERE created_at >= ?1",
            params![since],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        let finished = finished.unwrap_or(0);
        if finished == 0 {
            return Ok(0.0);
        }
        Ok(failed.unwrap_or(0) as f64 / finished as f64)
    }
}
