// src/service/recordings.rs — Upload slots, completion and recording lookup

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{load_recording, Page};
use crate::app::AppContext;
use crate::authz::{authorize, Action, Principal, Resource};
use crate::db::store::{paging, RecordingFilter};
use crate::domain::{new_id, now_ts, ts, Recording, Session, UploadStatus};
use crate::infra::errors::DeskError;
use crate::storage::keys::{object_key, validate_upload};
use crate::storage::PresignedRequest;

#[derive(Debug, Clone, Deserialize)]
pub struct UploadRequest {
    pub customer_id: String,
    pub content_type: String,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub original_filename: Option<String>,
    #[serde(default)]
    pub duration_secs: Option<f64>,
    /// Defaults to now.
    #[serde(default)]
    pub session_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadSlot {
    pub recording_id: String,
    pub file_path: String,
    pub upload_url: String,
    pub method: String,
    pub headers: std::collections::BTreeMap<String, String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletedRecording {
    pub recording: Recording,
    pub session: Session,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordingQuery {
    pub customer_id: Option<String>,
    pub upload_status: Option<UploadStatus>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

fn check_view(caller: &Principal, rec: &Recording) -> Result<(), DeskError> {
    authorize(
        caller,
        Action::ViewRecording,
        &Resource::owned(&rec.clinic_id, &rec.created_by),
    )
}

/// Issue a presigned PUT for a new recording and register it as pending.
pub async fn create_upload(
    ctx: &AppContext,
    caller: &Principal,
    req: UploadRequest,
) -> Result<UploadSlot, DeskError> {
    let customer_id = req.customer_id.clone();
    let customer = ctx
        .store
        .call(move |s| {
            s.get_customer(&customer_id)?
                .ok_or_else(|| DeskError::not_found("customer", &customer_id).into())
        })
        .await?;
    authorize(caller, Action::CreateRecording, &Resource::clinic(&customer.clinic_id))?;

    let ext = validate_upload(&ctx.config.storage, &req.content_type, req.file_size)?;
    if let Some(d) = req.duration_secs {
        if !d.is_finite() || d < 0.0 {
            return Err(DeskError::Validation(format!("duration {d} is not a valid length")));
        }
    }

    let id = new_id();
    let session_date = req.session_date.unwrap_or_else(Utc::now);
    let key = object_key(&customer.clinic_id, &customer.id, session_date, &id, ext);
    let signed: PresignedRequest = ctx.storage.presign_upload(&key, &req.content_type)?;

    let now = now_ts();
    let recording = Recording {
        id: id.clone(),
        customer_id: customer.id.clone(),
        clinic_id: customer.clinic_id.clone(),
        session_id: None,
        file_path: key.clone(),
        original_filename: req.original_filename,
        content_type: req.content_type,
        file_size: req.file_size.map(|s| s as i64),
        duration_secs: req.duration_secs,
        upload_status: UploadStatus::Pending,
        session_date: ts(session_date),
        created_by: caller.user_id.clone(),
        metadata: serde_json::json!({
            "created_by": caller.user_id,
            "clinic_id": customer.clinic_id,
        }),
        uploaded_at: None,
        created_at: now.clone(),
        updated_at: now,
    };
    ctx.store
        .call(move |s| s.insert_recording(&recording))
        .await?;
    tracing::info!(recording_id = %id, customer_id = %customer.id, "Upload slot issued");

    Ok(UploadSlot {
        recording_id: id,
        file_path: key,
        upload_url: signed.url,
        method: signed.method,
        headers: signed.headers,
        expires_at: signed.expires_at,
    })
}

/// Confirm the client's PUT landed and open the session for the recording.
pub async fn complete_upload(
    ctx: &AppContext,
    caller: &Principal,
    id: &str,
) -> Result<CompletedRecording, DeskError> {
    let rec = load_recording(ctx, id).await?;
    check_view(caller, &rec)?;

    if rec.upload_status == UploadStatus::Failed {
        return Err(DeskError::Conflict(format!("upload for recording '{id}' has failed")));
    }
    let mut actual_size = None;
    if rec.upload_status != UploadStatus::Completed {
        let meta = ctx.storage.head(&rec.file_path).await?.ok_or_else(|| {
            DeskError::Validation(format!("no object uploaded for recording '{id}' yet"))
        })?;
        let limit = ctx.config.storage.max_upload_bytes;
        if meta.size > limit {
            let rid = id.to_string();
            ctx.store.call(move |s| s.fail_recording(&rid)).await?;
            if let Err(e) = ctx.storage.delete(&rec.file_path).await {
                tracing::warn!(recording_id = id, error = %e, "Could not remove oversize upload");
            }
            tracing::warn!(recording_id = id, size = meta.size, limit, "Uploaded object is over the limit");
            return Err(DeskError::FileTooLarge { size: meta.size, limit });
        }
        actual_size = Some(meta.size as i64);
    }

    let rid = id.to_string();
    let counselor = caller.user_id.clone();
    let done = ctx
        .store
        .call(move |s| s.complete_recording(&rid, actual_size, &counselor))
        .await?;
    if done.already_completed {
        tracing::debug!(recording_id = id, "Upload already completed");
    } else {
        tracing::info!(
            recording_id = id,
            session_id = %done.session.id,
            size = actual_size.unwrap_or_default(),
            "Upload completed"
        );
    }
    Ok(CompletedRecording {
        recording: done.recording,
        session: done.session,
    })
}

pub async fn get(ctx: &AppContext, caller: &Principal, id: &str) -> Result<Recording, DeskError> {
    let rec = load_recording(ctx, id).await?;
    check_view(caller, &rec)?;
    Ok(rec)
}

/// Presigned GET for playback. Only completed uploads have an object.
pub async fn download_url(
    ctx: &AppContext,
    caller: &Principal,
    id: &str,
) -> Result<PresignedRequest, DeskError> {
    let rec = get(ctx, caller, id).await?;
    if rec.upload_status != UploadStatus::Completed {
        return Err(DeskError::Conflict(format!(
            "recording '{id}' is {}, not completed",
            rec.upload_status
        )));
    }
    ctx.storage.presign_download(&rec.file_path)
}

pub async fn list(
    ctx: &AppContext,
    caller: &Principal,
    query: RecordingQuery,
) -> Result<Page<Recording>, DeskError> {
    let (page, per_page) = paging(query.page, query.per_page);
    let filter = RecordingFilter {
        scope: Some(caller.scope()),
        customer_id: query.customer_id,
        upload_status: query.upload_status,
        page,
        per_page,
    };
    let (items, total) = ctx.store.call(move |s| s.list_recordings(&filter)).await?;
    Ok(Page {
        items,
        total,
        page,
        per_page,
    })
}

/// Soft-delete the row, then remove the object. A storage failure is logged
/// and does not undo the delete.
pub async fn delete(ctx: &AppContext, caller: &Principal, id: &str) -> Result<(), DeskError> {
    let rec = load_recording(ctx, id).await?;
    authorize(caller, Action::DeleteRecording, &Resource::clinic(&rec.clinic_id))?;
    let rid = id.to_string();
    ctx.store
        .call(move |s| s.soft_delete_recording(&rid))
        .await?;
    if let Err(e) = ctx.storage.delete(&rec.file_path).await {
        tracing::warn!(recording_id = id, key = %rec.file_path, "Object delete failed: {e}");
    }
    tracing::info!(recording_id = id, "Recording deleted");
    Ok(())
}
