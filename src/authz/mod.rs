// src/authz/mod.rs — Centralized authorization policy
//
// Every role rule lives in `authorize` and `Principal::scope`. Handlers and
// services describe what they want to do and to which resource; they never
// compare roles themselves.
//
// Precedence: admin outranks manager everywhere. A manager acts only inside
// their own clinic, and a manager with no clinic can see nothing.

use serde::{Deserialize, Serialize};

use crate::domain::Role;
use crate::infra::errors::DeskError;

/// The authenticated caller, built from a verified access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: String,
    pub role: Role,
    pub clinic_id: Option<String>,
}

/// Row filter applied to list queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Only rows whose counselor is this user.
    Own(String),
    /// Only rows belonging to this clinic.
    Clinic(String),
    All,
    /// Matches nothing (e.g. a manager without a clinic).
    Nothing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ViewSession,
    EditSession,
    DeleteSession,
    CreateRecording,
    ViewRecording,
    DeleteRecording,
    StartTranscription,
    RetryTranscription,
    StartAnalysis,
    RetryAnalysis,
    BatchAnalysis,
    ViewCustomer,
    ManageCustomer,
    ManageClinics,
    RegisterUser,
    ViewExecutiveDashboard,
    ViewCounselorDashboard,
    ViewSuccessPatterns,
    ViewOperationsDashboard,
    ViewTaskStats,
}

/// What the action touches. `owner_id` is the counselor of a session (or the
/// counselor whose dashboard is requested); `clinic_id` is the owning clinic.
#[derive(Debug, Clone, Copy, Default)]
pub struct Resource<'a> {
    pub clinic_id: Option<&'a str>,
    pub owner_id: Option<&'a str>,
}

impl<'a> Resource<'a> {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn clinic(clinic_id: &'a str) -> Self {
        Self {
            clinic_id: Some(clinic_id),
            owner_id: None,
        }
    }

    pub fn owned(clinic_id: &'a str, owner_id: &'a str) -> Self {
        Self {
            clinic_id: Some(clinic_id),
            owner_id: Some(owner_id),
        }
    }
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Session-visibility scope: counselor → own, manager → clinic, admin → all.
    pub fn scope(&self) -> Scope {
        match self.role {
            Role::Admin => Scope::All,
            Role::Manager => match &self.clinic_id {
                Some(c) => Scope::Clinic(c.clone()),
                None => Scope::Nothing,
            },
            Role::Counselor => Scope::Own(self.user_id.clone()),
        }
    }

    /// Scope for clinic-level records (customers, recordings).
    pub fn clinic_scope(&self) -> Scope {
        match self.role {
            Role::Admin => Scope::All,
            _ => match &self.clinic_id {
                Some(c) => Scope::Clinic(c.clone()),
                None => Scope::Nothing,
            },
        }
    }

    fn same_clinic(&self, clinic_id: Option<&str>) -> bool {
        matches!((self.clinic_id.as_deref(), clinic_id), (Some(a), Some(b)) if a == b)
    }

    fn owns(&self, owner_id: Option<&str>) -> bool {
        owner_id == Some(self.user_id.as_str())
    }
}

/// The single authorization decision point.
pub fn authorize(p: &Principal, action: Action, res: &Resource<'_>) -> Result<(), DeskError> {
    if p.is_admin() {
        return Ok(());
    }

    let manager_in_clinic = p.role == Role::Manager && p.same_clinic(res.clinic_id);

    let allowed = match action {
        // session-level work: the owning counselor or a manager of the clinic
        Action::ViewSession
        | Action::EditSession
        | Action::ViewRecording
        | Action::StartTranscription
        | Action::StartAnalysis => match p.role {
            Role::Counselor => p.owns(res.owner_id) && p.same_clinic(res.clinic_id),
            _ => manager_in_clinic,
        },

        // clinic-level work any staff member of the clinic may do
        Action::CreateRecording
        | Action::ViewCustomer
        | Action::ManageCustomer
        | Action::ViewSuccessPatterns => p.same_clinic(res.clinic_id),

        Action::RetryTranscription
        | Action::RetryAnalysis
        | Action::BatchAnalysis
        | Action::DeleteRecording
        | Action::RegisterUser
        | Action::ViewExecutiveDashboard
        | Action::ViewTaskStats => {
            // executive/stats requests without a clinic fall back to the
            // manager's own clinic in the service layer
            manager_in_clinic
        }

        Action::ViewCounselorDashboard => match p.role {
            Role::Counselor => p.owns(res.owner_id),
            _ => manager_in_clinic,
        },

        Action::DeleteSession | Action::ManageClinics | Action::ViewOperationsDashboard => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(DeskError::Forbidden(format!(
            "{} may not perform {:?}",
            p.role, action
        )))
    }
}

/// Admins may register anyone; a manager may register counselors into their
/// own clinic only.
pub fn authorize_registration(
    p: &Principal,
    new_role: Role,
    clinic_id: Option<&str>,
) -> Result<(), DeskError> {
    if p.is_admin() {
        return Ok(());
    }
    if new_role != Role::Counselor {
        return Err(DeskError::Forbidden(format!(
            "{} may not register a {new_role}",
            p.role
        )));
    }
    let res = Resource {
        clinic_id,
        owner_id: None,
    };
    authorize(p, Action::RegisterUser, &res)
}
