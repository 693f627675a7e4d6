// src/db/store.rs — SQLite operations
//
// `Store` is synchronous and owned by a single task (see store_server.rs).
// Entity-specific methods live in the submodules; each is an `impl Store`.

mod analyses;
mod clinics;
mod customers;
mod recordings;
mod reports;
mod sessions;
mod transcriptions;
mod users;

pub use analyses::{AnalysisFilter, AnalysisStats, NewAnalysis};
pub use customers::{CustomerFilter, CustomerPatch};
pub use recordings::{CompletedUpload, RecordingFilter};
pub use reports::{CounselorScore, DailyPoint, KpiSummary, PipelineCounts, SessionScores, HIGH_SCORE};
pub use sessions::{SessionFilter, SessionPatch};
pub use transcriptions::{NewTranscription, TranscriptionFilter, TranscriptionOutcome, TranscriptionStats};

use rusqlite::types::Type;
use rusqlite::{Connection, Row};

use crate::authz::Scope;
use crate::domain::Lifecycle;

/// Low-level SQLite operations for all data types.
pub struct Store {
    conn: Connection,
}

/// Outcome of a single-flight claim.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim<T> {
    Created(T),
    /// An in-flight task already exists for the key; carries its id.
    InFlight(String),
}

/// Error code for tasks cut off by a process restart.
pub const INTERRUPTED: &str = "INTERRUPTED";

impl Store {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Raw connection access (used by tests and the migrate command).
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Fail every task a previous process left in flight. No job will ever
    /// pick them up, and a failed task can go through the user retry path.
    /// Returns the number of (transcription, analysis) tasks failed.
    pub fn fail_interrupted_tasks(&self) -> anyhow::Result<(usize, usize)> {
        let message = "interrupted by a service restart; retry the task";
        let transcriptions = self.active_transcription_ids()?;
        for id in &transcriptions {
            self.fail_transcription(id, INTERRUPTED, message)?;
        }
        let analyses = self.active_analysis_ids()?;
        for id in &analyses {
            self.fail_analysis(id, INTERRUPTED, message)?;
        }
        Ok((transcriptions.len(), analyses.len()))
    }
}

/// Read a status column into its enum, surfacing bad values as conversion errors.
pub(crate) fn status_col<T: Lifecycle>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    T::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown {} status '{}'", T::ENTITY, raw).into(),
        )
    })
}

/// Read a TEXT column holding JSON.
pub(crate) fn json_col<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn opt_json_col<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| {
        serde_json::from_str(&r)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

/// Append a scope predicate for tables carrying `clinic_id` and a counselor
/// column. `params` receives the bound value, placeholders are numbered.
pub(crate) fn push_scope(
    scope: &Scope,
    clinic_col: &str,
    owner_col: Option<&str>,
    clauses: &mut Vec<String>,
    params: &mut Vec<String>,
) {
    match scope {
        Scope::All => {}
        Scope::Nothing => clauses.push("0".into()),
        Scope::Clinic(clinic) => {
            params.push(clinic.clone());
            clauses.push(format!("{clinic_col} = ?{}", params.len()));
        }
        Scope::Own(user) => match owner_col {
            Some(col) => {
                params.push(user.clone());
                clauses.push(format!("{col} = ?{}", params.len()));
            }
            None => clauses.push("0".into()),
        },
    }
}

pub(crate) fn where_sql(clauses: &[String]) -> String {
    if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    }
}

/// Clamp client paging input: page >= 1, 1 <= per_page <= 100.
pub fn paging(page: Option<u32>, per_page: Option<u32>) -> (u32, u32) {
    let page = page.unwrap_or(1).max(1);
    let per_page = per_page.unwrap_or(20).clamp(1, 100);
    (page, per_page)
}

/// Row offset for a 1-based page, widened so large pages cannot overflow.
pub fn page_offset(page: u32, per_page: u32) -> u64 {
    u64::from(page.saturating_sub(1)) * u64::from(per_page)
}
