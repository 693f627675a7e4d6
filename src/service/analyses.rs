// src/service/analyses.rs — Start, poll, retry and batch analysis tasks

use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use super::transcriptions::stats_scope;
use super::{load_recording, recording_owner, Page, TaskAccepted};
use crate::analysis::{AnalysisRequest, AnalysisResult, AnalysisType, Category};
use crate::app::AppContext;
use crate::authz::{authorize, Action, Principal, Resource};
use crate::db::store::{paging, AnalysisFilter, AnalysisStats, Claim, NewAnalysis};
use crate::domain::{ts, AnalysisStatus, AnalysisTask, TranscriptionStatus, TranscriptionTask};
use crate::infra::errors::DeskError;

const MAX_BATCH: usize = 50;
const MAX_CUSTOM_PROMPT_CHARS: usize = 8000;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartAnalysis {
    pub transcription_id: String,
    #[serde(default)]
    pub analysis_type: AnalysisType,
    #[serde(default)]
    pub focus_areas: Vec<Category>,
    #[serde(default)]
    pub custom_prompts: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchAnalysis {
    pub transcription_ids: Vec<String>,
    #[serde(default)]
    pub analysis_type: AnalysisType,
    #[serde(default)]
    pub focus_areas: Vec<Category>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchAccepted {
    pub tasks: Vec<TaskAccepted>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutcome {
    pub task_id: String,
    pub transcription_id: String,
    pub analysis_type: AnalysisType,
    pub result: AnalysisResult,
    pub tokens_used: u32,
    pub cost: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalysisQuery {
    pub transcription_id: Option<String>,
    pub status: Option<AnalysisStatus>,
    pub analysis_type: Option<AnalysisType>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// Canonicalise custom prompt keys to category names and reject unknown ones.
fn normalize_prompts(raw: BTreeMap<String, String>) -> Result<BTreeMap<String, String>, DeskError> {
    let mut out = BTreeMap::new();
    for (key, prompt) in raw {
        let category: Category = key.parse()?;
        if prompt.trim().is_empty() {
            return Err(DeskError::Validation(format!("custom prompt for '{key}' is empty")));
        }
        if prompt.chars().count() > MAX_CUSTOM_PROMPT_CHARS {
            return Err(DeskError::Validation(format!(
                "custom prompt for '{key}' exceeds {MAX_CUSTOM_PROMPT_CHARS} characters"
            )));
        }
        out.insert(category.as_str().to_string(), prompt);
    }
    Ok(out)
}

async fn load_transcription(ctx: &AppContext, id: &str) -> Result<TranscriptionTask, DeskError> {
    let tid = id.to_string();
    ctx.store
        .call(move |s| {
            s.get_transcription(&tid)?
                .ok_or_else(|| DeskError::not_found("transcription task", &tid).into())
        })
        .await
}

/// Authorize `action` against the recording behind a transcription.
async fn check_transcription(
    ctx: &AppContext,
    caller: &Principal,
    transcription: &TranscriptionTask,
    action: Action,
) -> Result<(), DeskError> {
    let rec = load_recording(ctx, &transcription.recording_id).await?;
    let owner = recording_owner(ctx, &rec).await?;
    authorize(caller, action, &Resource::owned(&rec.clinic_id, &owner))
}

fn require_completed(t: &TranscriptionTask) -> Result<(), DeskError> {
    match (&t.status, t.text.as_deref()) {
        (TranscriptionStatus::Completed, Some(text)) if !text.trim().is_empty() => Ok(()),
        (status, _) => Err(DeskError::Conflict(format!(
            "transcription '{}' is {status}; analysis needs a completed transcription",
            t.id
        ))),
    }
}

async fn load_visible(
    ctx: &AppContext,
    caller: &Principal,
    id: &str,
    action: Action,
) -> Result<AnalysisTask, DeskError> {
    let aid = id.to_string();
    let task = ctx
        .store
        .call(move |s| {
            s.get_analysis(&aid)?
                .ok_or_else(|| DeskError::not_found("analysis task", &aid).into())
        })
        .await?;
    let transcription = load_transcription(ctx, &task.transcription_id).await?;
    check_transcription(ctx, caller, &transcription, action).await?;
    Ok(task)
}

fn accepted(task: &AnalysisTask) -> TaskAccepted {
    TaskAccepted {
        task_id: task.id.clone(),
        status: task.status.to_string(),
        estimated_completion_at: task.estimated_completion_at.clone(),
    }
}

fn eta(kind: AnalysisType) -> String {
    ts(Utc::now() + Duration::seconds(kind.estimated_secs()))
}

pub async fn start(ctx: &AppContext, caller: &Principal, req: StartAnalysis) -> Result<TaskAccepted, DeskError> {
    let transcription = load_transcription(ctx, &req.transcription_id).await?;
    check_transcription(ctx, caller, &transcription, Action::StartAnalysis).await?;
    require_completed(&transcription)?;

    let custom_prompts = normalize_prompts(req.custom_prompts)?;
    let request = AnalysisRequest {
        analysis_type: req.analysis_type,
        focus_areas: req.focus_areas,
        custom_prompts,
    };
    // surfaces an empty focus list for specific analyses before a row exists
    request.categories()?;

    let new = NewAnalysis {
        transcription_id: transcription.id.clone(),
        session_id: transcription.session_id.clone(),
        analysis_type: request.analysis_type,
        focus_areas: request.focus_areas,
        custom_prompts: request.custom_prompts,
        created_by: caller.user_id.clone(),
        estimated_completion_at: Some(eta(request.analysis_type)),
    };
    let task = match ctx.store.call(move |s| s.claim_analysis(&new)).await? {
        Claim::Created(task) => task,
        Claim::InFlight(existing) => {
            return Err(DeskError::Conflict(format!(
                "analysis '{existing}' is already in progress for transcription '{}'",
                transcription.id
            )))
        }
    };
    tracing::info!(
        task_id = %task.id,
        transcription_id = %transcription.id,
        analysis_type = task.analysis_type.as_str(),
        "Analysis queued"
    );
    ctx.pipeline.submit_analysis(task.id.clone());
    Ok(accepted(&task))
}

/// Queue one analysis per transcription. Every transcription is validated
/// first; if any is missing, unfinished, foreign or busy nothing is queued.
pub async fn batch(ctx: &AppContext, caller: &Principal, req: BatchAnalysis) -> Result<BatchAccepted, DeskError> {
    if req.transcription_ids.is_empty() {
        return Err(DeskError::Validation("transcription_ids must not be empty".into()));
    }
    if req.transcription_ids.len() > MAX_BATCH {
        return Err(DeskError::Validation(format!(
            "at most {MAX_BATCH} transcriptions per batch"
        )));
    }
    let mut ids = req.transcription_ids.clone();
    ids.sort();
    ids.dedup();
    if ids.len() != req.transcription_ids.len() {
        return Err(DeskError::Validation("transcription_ids contains duplicates".into()));
    }
    AnalysisRequest {
        analysis_type: req.analysis_type,
        focus_areas: req.focus_areas.clone(),
        custom_prompts: BTreeMap::new(),
    }
    .categories()?;

    let mut transcriptions = Vec::with_capacity(ids.len());
    for id in &req.transcription_ids {
        let t = load_transcription(ctx, id).await?;
        check_transcription(ctx, caller, &t, Action::BatchAnalysis).await?;
        require_completed(&t)?;
        transcriptions.push(t);
    }

    let estimated = eta(req.analysis_type);
    let news: Vec<NewAnalysis> = transcriptions
        .iter()
        .map(|t| NewAnalysis {
            transcription_id: t.id.clone(),
            session_id: t.session_id.clone(),
            analysis_type: req.analysis_type,
            focus_areas: req.focus_areas.clone(),
            custom_prompts: BTreeMap::new(),
            created_by: caller.user_id.clone(),
            estimated_completion_at: Some(estimated.clone()),
        })
        .collect();

    // check and claim inside one store call so no other request slips in between
    let tasks = ctx
        .store
        .call(move |s| {
            let busy = s.transcriptions_with_active_analysis(&ids)?;
            if !busy.is_empty() {
                let list: Vec<&str> = busy.iter().map(String::as_str).collect();
                return Err(DeskError::Conflict(format!(
                    "analysis already in progress for: {}",
                    list.join(", ")
                ))
                .into());
            }
            match s.claim_analyses(&news)? {
                Claim::Created(tasks) => Ok(tasks),
                Claim::InFlight(existing) => Err(DeskError::Conflict(format!(
                    "analysis '{existing}' is already in progress"
                ))
                .into()),
            }
        })
        .await?;

    tracing::info!(count = tasks.len(), "Batch analysis queued");
    for task in &tasks {
        ctx.pipeline.submit_analysis(task.id.clone());
    }
    Ok(BatchAccepted {
        tasks: tasks.iter().map(accepted).collect(),
    })
}

pub async fn status(ctx: &AppContext, caller: &Principal, id: &str) -> Result<AnalysisTask, DeskError> {
    load_visible(ctx, caller, id, Action::ViewSession).await
}

pub async fn result(ctx: &AppContext, caller: &Principal, id: &str) -> Result<AnalysisOutcome, DeskError> {
    let task = load_visible(ctx, caller, id, Action::ViewSession).await?;
    match (task.status, task.result) {
        (AnalysisStatus::Completed, Some(result)) => Ok(AnalysisOutcome {
            task_id: task.id,
            transcription_id: task.transcription_id,
            analysis_type: task.analysis_type,
            result,
            tokens_used: task.tokens_used,
            cost: task.cost,
        }),
        (status, _) => Err(DeskError::Conflict(format!(
            "analysis '{id}' is {status}, no result yet"
        ))),
    }
}

pub async fn retry(ctx: &AppContext, caller: &Principal, id: &str) -> Result<TaskAccepted, DeskError> {
    load_visible(ctx, caller, id, Action::RetryAnalysis).await?;
    let aid = id.to_string();
    let max = ctx.config.jobs.max_user_retries;
    let task = ctx.store.call(move |s| s.retry_analysis(&aid, max)).await?;
    tracing::info!(task_id = id, retry_count = task.retry_count, "Analysis retry queued");
    ctx.pipeline.submit_analysis(task.id.clone());
    Ok(accepted(&task))
}

pub async fn list(
    ctx: &AppContext,
    caller: &Principal,
    query: AnalysisQuery,
) -> Result<Page<AnalysisTask>, DeskError> {
    let (page, per_page) = paging(query.page, query.per_page);
    let filter = AnalysisFilter {
        scope: Some(caller.scope()),
        transcription_id: query.transcription_id,
        status: query.status,
        analysis_type: query.analysis_type,
        page,
        per_page,
    };
    let (items, total) = ctx.store.call(move |s| s.list_analyses(&filter)).await?;
    Ok(Page {
        items,
        total,
        page,
        per_page,
    })
}

pub async fn stats(ctx: &AppContext, caller: &Principal) -> Result<AnalysisStats, DeskError> {
    let scope = stats_scope(caller)?;
    ctx.store.call(move |s| s.analysis_stats(&scope)).await
}
