// src/service/mod.rs — Use-case layer between the API and the store
//
// Each function takes the caller, asks `authz` whether the call is allowed,
// and talks to the store through the `StoreHandle`.

pub mod analyses;
pub mod clinics;
pub mod customers;
pub mod dashboard;
pub mod improvement;
pub mod recordings;
pub mod sessions;
pub mod transcriptions;

use serde::{Deserialize, Serialize};

use crate::app::AppContext;
use crate::domain::{Recording, Session};
use crate::infra::errors::DeskError;

/// One page of a list endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}

/// Reply to a start or retry request; clients poll the status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAccepted {
    pub task_id: String,
    pub status: String,
    pub estimated_completion_at: Option<String>,
}

pub(crate) async fn load_recording(ctx: &AppContext, id: &str) -> Result<Recording, DeskError> {
    let id = id.to_string();
    ctx.store
        .call(move |s| {
            s.get_recording(&id)?
                .ok_or_else(|| DeskError::not_found("recording", &id).into())
        })
        .await
}

pub(crate) async fn load_session(ctx: &AppContext, id: &str) -> Result<Session, DeskError> {
    let id = id.to_string();
    ctx.store
        .call(move |s| {
            s.get_session(&id)?
                .ok_or_else(|| DeskError::not_found("session", &id).into())
        })
        .await
}

/// The counselor a recording's work belongs to: the session's counselor once
/// a session exists, otherwise whoever created the upload.
pub(crate) async fn recording_owner(ctx: &AppContext, rec: &Recording) -> Result<String, DeskError> {
    match &rec.session_id {
        Some(session_id) => Ok(load_session(ctx, session_id).await?.counselor_id),
        None => Ok(rec.created_by.clone()),
    }
}
