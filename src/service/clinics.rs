// src/service/clinics.rs — Clinic administration

use serde::Deserialize;

use crate::app::AppContext;
use crate::authz::{authorize, Action, Principal, Resource};
use crate::domain::{new_id, now_ts, Clinic};
use crate::infra::errors::DeskError;

#[derive(Debug, Clone, Deserialize)]
pub struct NewClinic {
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClinicPatch {
    pub name: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
}

/// Admins see every clinic, everyone else only their own.
pub async fn list(ctx: &AppContext, caller: &Principal) -> Result<Vec<Clinic>, DeskError> {
    let clinics = ctx.store.call(|s| s.list_clinics()).await?;
    if caller.is_admin() {
        return Ok(clinics);
    }
    Ok(clinics
        .into_iter()
        .filter(|c| caller.clinic_id.as_deref() == Some(c.id.as_str()))
        .collect())
}

pub async fn get(ctx: &AppContext, caller: &Principal, id: &str) -> Result<Clinic, DeskError> {
    if !caller.is_admin() && caller.clinic_id.as_deref() != Some(id) {
        return Err(DeskError::Forbidden(format!("clinic '{id}' is not yours")));
    }
    let cid = id.to_string();
    ctx.store
        .call(move |s| {
            s.get_clinic(&cid)?
                .ok_or_else(|| DeskError::not_found("clinic", &cid).into())
        })
        .await
}

pub async fn create(ctx: &AppContext, caller: &Principal, new: NewClinic) -> Result<Clinic, DeskError> {
    authorize(caller, Action::ManageClinics, &Resource::none())?;
    create_unchecked(ctx, new).await
}

/// Insert a clinic without a caller check. Used by the seed command.
pub async fn create_unchecked(ctx: &AppContext, new: NewClinic) -> Result<Clinic, DeskError> {
    if new.name.trim().is_empty() {
        return Err(DeskError::Validation("clinic name must not be empty".into()));
    }
    let now = now_ts();
    let clinic = Clinic {
        id: new_id(),
        name: new.name.trim().to_string(),
        address: new.address,
        phone: new.phone,
        created_at: now.clone(),
        updated_at: now,
    };
    let row = clinic.clone();
    ctx.store.call(move |s| s.insert_clinic(&row)).await?;
    tracing::info!(clinic_id = %clinic.id, "Clinic created");
    Ok(clinic)
}

pub async fn update(
    ctx: &AppContext,
    caller: &Principal,
    id: &str,
    patch: ClinicPatch,
) -> Result<Clinic, DeskError> {
    authorize(caller, Action::ManageClinics, &Resource::none())?;
    if matches!(patch.name.as_deref(), Some(n) if n.trim().is_empty()) {
        return Err(DeskError::Validation("clinic name must not be empty".into()));
    }
    let cid = id.to_string();
    ctx.store
        .call(move |s| {
            let found = s.update_clinic(
                &cid,
                patch.name.as_deref(),
                patch.address.as_deref(),
                patch.phone.as_deref(),
            )?;
            if !found {
                return Err(DeskError::not_found("clinic", &cid).into());
            }
            s.get_clinic(&cid)?
                .ok_or_else(|| DeskError::not_found("clinic", &cid).into())
        })
        .await
}
