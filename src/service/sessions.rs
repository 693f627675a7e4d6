// src/service/sessions.rs — Per-session view joining recording, transcription and analysis state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{load_session, Page};
use crate::app::AppContext;
use crate::authz::{authorize, Action, Principal, Resource};
use crate::db::store::{paging, SessionFilter, SessionPatch, Store};
use crate::domain::{
    new_id, now_ts, parse_ts, ts, AnalysisStatus, Role, Session, SessionStatus, TranscriptionStatus,
    UploadStatus,
};
use crate::infra::errors::DeskError;

#[derive(Debug, Clone, Serialize)]
pub struct RecordingSummary {
    pub id: String,
    pub upload_status: UploadStatus,
    pub content_type: String,
    pub file_size: Option<i64>,
    pub duration_secs: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionSummary {
    pub id: String,
    pub status: TranscriptionStatus,
    pub progress: u8,
    pub confidence: Option<f64>,
    pub error_code: Option<String>,
    pub retry_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSummary {
    pub id: String,
    pub status: AnalysisStatus,
    pub progress: u8,
    pub overall_score: Option<f64>,
    pub session_summary: Option<String>,
    pub error_code: Option<String>,
    pub retry_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    #[serde(flatten)]
    pub session: Session,
    pub customer_name: Option<String>,
    pub counselor_name: Option<String>,
    pub recording: Option<RecordingSummary>,
    pub transcription: Option<TranscriptionSummary>,
    pub analysis: Option<AnalysisSummary>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionQuery {
    pub status: Option<SessionStatus>,
    pub customer_id: Option<String>,
    pub counselor_id: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSession {
    pub customer_id: String,
    pub session_date: DateTime<Utc>,
    #[serde(default)]
    pub duration_minutes: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Managers may book for another counselor; defaults to the caller.
    #[serde(default)]
    pub counselor_id: Option<String>,
}

fn build_view(s: &Store, session: Session) -> anyhow::Result<SessionView> {
    let customer_name = s.get_customer(&session.customer_id)?.map(|c| c.name);
    let counselor_name = s.get_user(&session.counselor_id)?.map(|u| u.name);
    let recording = match &session.recording_id {
        Some(id) => s.get_recording(id)?.map(|r| RecordingSummary {
            id: r.id,
            upload_status: r.upload_status,
            content_type: r.content_type,
            file_size: r.file_size,
            duration_secs: r.duration_secs,
        }),
        None => None,
    };
    let transcription = s
        .latest_transcription_for_session(&session.id)?
        .map(|t| TranscriptionSummary {
            id: t.id,
            status: t.status,
            progress: t.progress,
            confidence: t.confidence,
            error_code: t.error_code,
            retry_count: t.retry_count,
        });
    let analysis = s.latest_analysis_for_session(&session.id)?.map(|a| AnalysisSummary {
        id: a.id,
        status: a.status,
        progress: a.progress,
        overall_score: a.overall_score,
        session_summary: a.result.map(|r| r.session_summary),
        error_code: a.error_code,
        retry_count: a.retry_count,
    });
    Ok(SessionView {
        session,
        customer_name,
        counselor_name,
        recording,
        transcription,
        analysis,
    })
}

fn check_date(field: &str, value: &Option<String>) -> Result<(), DeskError> {
    if let Some(v) = value {
        let is_day = v.len() == 10 && chrono::NaiveDate::parse_from_str(v, "%Y-%m-%d").is_ok();
        if !is_day && parse_ts(v).is_none() {
            return Err(DeskError::Validation(format!(
                "{field} '{v}' is neither YYYY-MM-DD nor RFC 3339"
            )));
        }
    }
    Ok(())
}

pub async fn list(ctx: &AppContext, caller: &Principal, query: SessionQuery) -> Result<Page<SessionView>, DeskError> {
    check_date("date_from", &query.date_from)?;
    check_date("date_to", &query.date_to)?;
    let (page, per_page) = paging(query.page, query.per_page);
    let filter = SessionFilter {
        scope: Some(caller.scope()),
        status: query.status,
        customer_id: query.customer_id,
        counselor_id: query.counselor_id,
        date_from: query.date_from,
        date_to: query.date_to,
        page,
        per_page,
    };
    let (items, total) = ctx
        .store
        .call(move |s| {
            let (sessions, total) = s.list_sessions(&filter)?;
            let views = sessions
                .into_iter()
                .map(|session| build_view(s, session))
                .collect::<anyhow::Result<Vec<_>>>()?;
            Ok((views, total))
        })
        .await?;
    Ok(Page {
        items,
        total,
        page,
        per_page,
    })
}

pub async fn get(ctx: &AppContext, caller: &Principal, id: &str) -> Result<SessionView, DeskError> {
    let session = load_session(ctx, id).await?;
    authorize(
        caller,
        Action::ViewSession,
        &Resource::owned(&session.clinic_id, &session.counselor_id),
    )?;
    ctx.store.call(move |s| build_view(s, session)).await
}

/// Book a session without a recording (e.g. entered after the fact).
pub async fn create(ctx: &AppContext, caller: &Principal, new: NewSession) -> Result<SessionView, DeskError> {
    let counselor_id = new.counselor_id.clone().unwrap_or_else(|| caller.user_id.clone());
    if caller.role == Role::Counselor && counselor_id != caller.user_id {
        return Err(DeskError::Forbidden("counselors book sessions for themselves only".into()));
    }
    if matches!(new.duration_minutes, Some(m) if m < 0) {
        return Err(DeskError::Validation("duration_minutes must not be negative".into()));
    }

    let customer_id = new.customer_id.clone();
    let lookup_counselor = counselor_id.clone();
    let (customer, counselor) = ctx
        .store
        .call(move |s| {
            let customer = s
                .get_customer(&customer_id)?
                .ok_or_else(|| DeskError::not_found("customer", &customer_id))?;
            let counselor = s
                .get_user(&lookup_counselor)?
                .ok_or_else(|| DeskError::not_found("user", &lookup_counselor))?;
            Ok((customer, counselor))
        })
        .await?;
    authorize(
        caller,
        Action::EditSession,
        &Resource::owned(&customer.clinic_id, &counselor_id),
    )?;
    if counselor.clinic_id.as_deref() != Some(customer.clinic_id.as_str()) {
        return Err(DeskError::Validation(format!(
            "counselor '{}' does not work at the customer's clinic",
            counselor.id
        )));
    }

    let now = now_ts();
    let session = Session {
        id: new_id(),
        customer_id: customer.id,
        counselor_id,
        clinic_id: customer.clinic_id,
        session_date: ts(new.session_date),
        duration_minutes: new.duration_minutes,
        status: SessionStatus::Recorded,
        recording_id: None,
        transcription_text: None,
        overall_score: None,
        notes: new.notes,
        created_at: now.clone(),
        updated_at: now,
    };
    let id = session.id.clone();
    let view = ctx
        .store
        .call(move |s| {
            s.insert_session(&session)?;
            build_view(s, session)
        })
        .await?;
    tracing::info!(session_id = %id, "Session created");
    Ok(view)
}

/// Edit notes, date or duration. A status change must be a legal transition.
pub async fn update(
    ctx: &AppContext,
    caller: &Principal,
    id: &str,
    patch: SessionPatch,
) -> Result<SessionView, DeskError> {
    let session = load_session(ctx, id).await?;
    authorize(
        caller,
        Action::EditSession,
        &Resource::owned(&session.clinic_id, &session.counselor_id),
    )?;
    if matches!(patch.duration_minutes, Some(m) if m < 0) {
        return Err(DeskError::Validation("duration_minutes must not be negative".into()));
    }
    let patch = SessionPatch {
        session_date: match patch.session_date {
            Some(raw) => Some(ts(parse_ts(&raw).ok_or_else(|| {
                DeskError::Validation(format!("session_date '{raw}' is not RFC 3339"))
            })?)),
            None => None,
        },
        ..patch
    };
    let sid = id.to_string();
    let view = ctx
        .store
        .call(move |s| {
            let session = s.update_session(&sid, &patch)?;
            build_view(s, session)
        })
        .await?;
    tracing::info!(session_id = id, status = %view.session.status, "Session updated");
    Ok(view)
}

pub async fn delete(ctx: &AppContext, caller: &Principal, id: &str) -> Result<(), DeskError> {
    let session = load_session(ctx, id).await?;
    authorize(caller, Action::DeleteSession, &Resource::clinic(&session.clinic_id))?;
    let sid = id.to_string();
    let removed = ctx.store.call(move |s| s.soft_delete_session(&sid)).await?;
    if !removed {
        return Err(DeskError::not_found("session", id));
    }
    tracing::info!(session_id = id, "Session deleted");
    Ok(())
}
