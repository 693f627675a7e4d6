// src/service/transcriptions.rs — Start, poll and retry transcription tasks

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{load_recording, recording_owner, Page, TaskAccepted};
use crate::app::AppContext;
use crate::authz::{authorize, Action, Principal, Resource, Scope};
use crate::db::store::{paging, Claim, NewTranscription, TranscriptionFilter, TranscriptionStats};
use crate::domain::{ts, Role, Segment, TranscriptionStatus, TranscriptionTask, UploadStatus};
use crate::infra::errors::DeskError;

const UNKNOWN_DURATION_ESTIMATE_SECS: f64 = 60.0;

/// Whisper language codes we accept as a hint.
const LANGUAGES: &[&str] = &["ja", "en", "zh", "ko"];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartTranscription {
    pub recording_id: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionResult {
    pub task_id: String,
    pub recording_id: String,
    pub text: String,
    pub language: Option<String>,
    pub duration_secs: Option<f64>,
    pub confidence: f64,
    pub segments: Vec<Segment>,
    pub processing_secs: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptionQuery {
    pub recording_id: Option<String>,
    pub status: Option<TranscriptionStatus>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// Seconds until a transcription of `duration` is expected to finish.
pub fn estimated_secs(duration: Option<f64>) -> f64 {
    match duration {
        Some(d) if d.is_finite() && d > 0.0 => (d * 0.5).clamp(10.0, 300.0),
        _ => UNKNOWN_DURATION_ESTIMATE_SECS,
    }
}

/// Load a task and check the caller may see it. Ownership follows the
/// recording's session.
async fn load_visible(
    ctx: &AppContext,
    caller: &Principal,
    id: &str,
    action: Action,
) -> Result<TranscriptionTask, DeskError> {
    let tid = id.to_string();
    let task = ctx
        .store
        .call(move |s| {
            s.get_transcription(&tid)?
                .ok_or_else(|| DeskError::not_found("transcription task", &tid).into())
        })
        .await?;
    let rec = load_recording(ctx, &task.recording_id).await?;
    let owner = recording_owner(ctx, &rec).await?;
    authorize(caller, action, &Resource::owned(&rec.clinic_id, &owner))?;
    Ok(task)
}

pub async fn start(
    ctx: &AppContext,
    caller: &Principal,
    req: StartTranscription,
) -> Result<TaskAccepted, DeskError> {
    let rec = load_recording(ctx, &req.recording_id).await?;
    let owner = recording_owner(ctx, &rec).await?;
    authorize(caller, Action::StartTranscription, &Resource::owned(&rec.clinic_id, &owner))?;
    if rec.upload_status != UploadStatus::Completed {
        return Err(DeskError::Conflict(format!(
            "recording '{}' upload is {}",
            rec.id, rec.upload_status
        )));
    }

    let cfg = &ctx.config.transcription;
    let language = req.language.unwrap_or_else(|| cfg.language.clone());
    if !LANGUAGES.contains(&language.as_str()) {
        return Err(DeskError::Validation(format!("unsupported language '{language}'")));
    }
    let temperature = req.temperature.unwrap_or(cfg.temperature);
    if !(0.0..=1.0).contains(&temperature) {
        return Err(DeskError::Validation(format!(
            "temperature {temperature} outside [0, 1]"
        )));
    }

    let eta = Utc::now() + Duration::milliseconds((estimated_secs(rec.duration_secs) * 1000.0) as i64);
    let new = NewTranscription {
        recording_id: rec.id.clone(),
        session_id: rec.session_id.clone(),
        language,
        temperature,
        created_by: caller.user_id.clone(),
        estimated_completion_at: Some(ts(eta)),
    };
    let task = match ctx.store.call(move |s| s.claim_transcription(&new)).await? {
        Claim::Created(task) => task,
        Claim::InFlight(existing) => {
            return Err(DeskError::Conflict(format!(
                "transcription '{existing}' is already in progress for recording '{}'",
                rec.id
            )))
        }
    };
    tracing::info!(task_id = %task.id, recording_id = %rec.id, "Transcription queued");
    ctx.pipeline.submit_transcription(task.id.clone());
    Ok(TaskAccepted {
        task_id: task.id,
        status: task.status.to_string(),
        estimated_completion_at: task.estimated_completion_at,
    })
}

pub async fn status(ctx: &AppContext, caller: &Principal, id: &str) -> Result<TranscriptionTask, DeskError> {
    load_visible(ctx, caller, id, Action::ViewRecording).await
}

pub async fn result(ctx: &AppContext, caller: &Principal, id: &str) -> Result<TranscriptionResult, DeskError> {
    let task = load_visible(ctx, caller, id, Action::ViewRecording).await?;
    let text = match (task.status, task.text) {
        (TranscriptionStatus::Completed, Some(text)) => text,
        (status, _) => {
            return Err(DeskError::Conflict(format!(
                "transcription '{id}' is {status}, no result yet"
            )))
        }
    };
    let tid = task.id.clone();
    let segments = ctx.store.call(move |s| s.transcription_segments(&tid)).await?;
    Ok(TranscriptionResult {
        task_id: task.id,
        recording_id: task.recording_id,
        text,
        language: task.detected_language,
        duration_secs: task.duration_secs,
        confidence: task.confidence.unwrap_or_default(),
        segments,
        processing_secs: task.processing_secs,
    })
}

pub async fn retry(ctx: &AppContext, caller: &Principal, id: &str) -> Result<TaskAccepted, DeskError> {
    load_visible(ctx, caller, id, Action::RetryTranscription).await?;
    let tid = id.to_string();
    let max = ctx.config.jobs.max_user_retries;
    let task = ctx
        .store
        .call(move |s| s.retry_transcription(&tid, max))
        .await?;
    tracing::info!(task_id = id, retry_count = task.retry_count, "Transcription retry queued");
    ctx.pipeline.submit_transcription(task.id.clone());
    Ok(TaskAccepted {
        task_id: task.id,
        status: task.status.to_string(),
        estimated_completion_at: task.estimated_completion_at,
    })
}

pub async fn list(
    ctx: &AppContext,
    caller: &Principal,
    query: TranscriptionQuery,
) -> Result<Page<TranscriptionTask>, DeskError> {
    let (page, per_page) = paging(query.page, query.per_page);
    let filter = TranscriptionFilter {
        scope: Some(caller.scope()),
        recording_id: query.recording_id,
        status: query.status,
        page,
        per_page,
    };
    let (items, total) = ctx.store.call(move |s| s.list_transcriptions(&filter)).await?;
    Ok(Page {
        items,
        total,
        page,
        per_page,
    })
}

/// Managers get their own clinic; admins everything.
pub(crate) fn stats_scope(caller: &Principal) -> Result<Scope, DeskError> {
    match caller.role {
        Role::Admin => Ok(Scope::All),
        _ => {
            let clinic = caller.clinic_id.as_deref().unwrap_or_default();
            authorize(caller, Action::ViewTaskStats, &Resource::clinic(clinic))?;
            Ok(caller.clinic_scope())
        }
    }
}

pub async fn stats(ctx: &AppContext, caller: &Principal) -> Result<TranscriptionStats, DeskError> {
    let scope = stats_scope(caller)?;
    ctx.store.call(move |s| s.transcription_stats(&scope)).await
}
