// src/service/customers.rs — Clinic customers

use serde::Deserialize;

use crate::app::AppContext;
use crate::authz::{authorize, Action, Principal, Resource};
use crate::db::store::{page_offset, paging, CustomerFilter, CustomerPatch};
use crate::domain::{new_id, now_ts, Customer};
use crate::infra::errors::DeskError;

#[derive(Debug, Clone, Deserialize)]
pub struct NewCustomer {
    /// Required for admins; everyone else creates in their own clinic.
    #[serde(default)]
    pub clinic_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomerQuery {
    pub search: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

fn check_fields(name: Option<&str>, email: Option<&str>) -> Result<(), DeskError> {
    if matches!(name, Some(n) if n.trim().is_empty()) {
        return Err(DeskError::Validation("customer name must not be empty".into()));
    }
    if matches!(email, Some(e) if !e.contains('@')) {
        return Err(DeskError::Validation("customer e-mail is not an address".into()));
    }
    Ok(())
}

async fn load(ctx: &AppContext, id: &str) -> Result<Customer, DeskError> {
    let cid = id.to_string();
    ctx.store
        .call(move |s| {
            s.get_customer(&cid)?
                .ok_or_else(|| DeskError::not_found("customer", &cid).into())
        })
        .await
}

pub async fn list(ctx: &AppContext, caller: &Principal, query: CustomerQuery) -> Result<Vec<Customer>, DeskError> {
    let (page, per_page) = paging(query.page, query.per_page);
    let filter = CustomerFilter {
        scope: Some(caller.clinic_scope()),
        search: query.search.filter(|s| !s.trim().is_empty()),
        limit: per_page,
        offset: page_offset(page, per_page),
    };
    ctx.store.call(move |s| s.list_customers(&filter)).await
}

pub async fn create(ctx: &AppContext, caller: &Principal, new: NewCustomer) -> Result<Customer, DeskError> {
    let clinic_id = new
        .clinic_id
        .or_else(|| caller.clinic_id.clone())
        .ok_or_else(|| DeskError::Validation("clinic_id is required".into()))?;
    authorize(caller, Action::ManageCustomer, &Resource::clinic(&clinic_id))?;
    check_fields(Some(&new.name), new.email.as_deref())?;

    let now = now_ts();
    let customer = Customer {
        id: new_id(),
        clinic_id,
        name: new.name.trim().to_string(),
        phone: new.phone,
        email: new.email,
        notes: new.notes,
        created_at: now.clone(),
        updated_at: now,
    };
    let row = customer.clone();
    ctx.store
        .call(move |s| {
            if s.get_clinic(&row.clinic_id)?.is_none() {
                return Err(DeskError::not_found("clinic", &row.clinic_id).into());
            }
            s.insert_customer(&row)
        })
        .await?;
    tracing::info!(customer_id = %customer.id, clinic_id = %customer.clinic_id, "Customer created");
    Ok(customer)
}

pub async fn get(ctx: &AppContext, caller: &Principal, id: &str) -> Result<Customer, DeskError> {
    let customer = load(ctx, id).await?;
    authorize(caller, Action::ViewCustomer, &Resource::clinic(&customer.clinic_id))?;
    Ok(customer)
}

pub async fn update(
    ctx: &AppContext,
    caller: &Principal,
    id: &str,
    patch: CustomerPatch,
) -> Result<Customer, DeskError> {
    let customer = load(ctx, id).await?;
    authorize(caller, Action::ManageCustomer, &Resource::clinic(&customer.clinic_id))?;
    check_fields(patch.name.as_deref(), patch.email.as_deref())?;
    let cid = id.to_string();
    ctx.store
        .call(move |s| {
            s.update_customer(&cid, &patch)?;
            s.get_customer(&cid)?
                .ok_or_else(|| DeskError::not_found("customer", &cid).into())
        })
        .await
}
