// src/cli/admin.rs — Operator commands: create-admin and seed

use crate::app::AppContext;
use crate::auth::{create_user, NewUser};
use crate::db;
use crate::domain::{new_id, now_ts, Customer, Role};
use crate::infra::config::Config;
use crate::infra::errors::DeskError;
use crate::service::clinics::{create_unchecked, NewClinic};

/// Password given to every seeded account.
pub const DEMO_PASSWORD: &str = "Demo-pass-2024";

async fn open_context(config: Config) -> anyhow::Result<AppContext> {
    let store = db::open(&config.database.resolved_path())?;
    let (handle, _store_task) = db::spawn_store_server(store);
    Ok(AppContext::from_config(handle, config)?)
}

pub async fn run_create_admin(config: Config, email: &str, name: &str, password: &str) -> anyhow::Result<()> {
    let ctx = open_context(config).await?;
    let user = create_user(
        &ctx,
        NewUser {
            email: email.to_string(),
            name: name.to_string(),
            password: password.to_string(),
            role: Role::Admin,
            clinic_id: None,
        },
    )
    .await?;
    println!("Created admin {} ({})", user.email, user.id);
    Ok(())
}

/// Summary of what `seed` inserted.
#[derive(Debug)]
pub struct SeedReport {
    pub clinic_id: String,
    pub users: Vec<String>,
    pub customers: usize,
}

/// Insert a demo clinic, one manager, two counselors and three customers.
/// Refuses to run against a database that already has users.
pub async fn seed(ctx: &AppContext) -> Result<SeedReport, DeskError> {
    let existing = ctx.store.call(|s| s.count_users()).await?;
    if existing > 0 {
        return Err(DeskError::Conflict(format!(
            "database already has {existing} users; seed only runs on an empty database"
        )));
    }

    let clinic = create_unchecked(
        ctx,
        NewClinic {
            name: "デモクリニック 渋谷院".into(),
            address: Some("東京都渋谷区".into()),
            phone: Some("03-0000-0000".into()),
        },
    )
    .await?;

    let staff = [
        ("manager@demo.local", "デモ マネージャー", Role::Manager),
        ("counselor1@demo.local", "デモ カウンセラー1", Role::Counselor),
        ("counselor2@demo.local", "デモ カウンセラー2", Role::Counselor),
    ];
    let mut users = Vec::new();
    for (email, name, role) in staff {
        let user = create_user(
            ctx,
            NewUser {
                email: email.into(),
                name: name.into(),
                password: DEMO_PASSWORD.into(),
                role,
                clinic_id: Some(clinic.id.clone()),
            },
        )
        .await?;
        users.push(user.email);
    }

    let now = now_ts();
    let customers: Vec<Customer> = ["山田 花子", "佐藤 美咲", "鈴木 結衣"]
        .into_iter()
        .map(|name| Customer {
            id: new_id(),
            clinic_id: clinic.id.clone(),
            name: name.into(),
            phone: None,
            email: None,
            notes: None,
            created_at: now.clone(),
            updated_at: now.clone(),
        })
        .collect();
    let count = customers.len();
    ctx.store
        .call(move |s| {
            for c in &customers {
                s.insert_customer(c)?;
            }
            Ok(())
        })
        .await?;

    tracing::info!(clinic_id = %clinic.id, users = users.len(), customers = count, "Demo data seeded");
    Ok(SeedReport {
        clinic_id: clinic.id,
        users,
        customers: count,
    })
}

pub async fn run_seed(config: Config) -> anyhow::Result<()> {
    let ctx = open_context(config).await?;
    let report = seed(&ctx).await?;
    println!("Seeded clinic {}", report.clinic_id);
    for email in &report.users {
        println!("  {email} / {DEMO_PASSWORD}");
    }
    println!("  {} customers", report.customers);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_seed_only_runs_once() {
        let mut config = Config::default();
        config.auth.jwt_secret = "seed-test-secret-0123456789".into();
        config.auth.password_iterations = 1_000;
        let (handle, _task) = db::spawn_store_server(db::open_in_memory().unwrap());
        let ctx = AppContext::from_config(handle, config).unwrap();

        let report = seed(&ctx).await.unwrap();
        assert_eq!(report.users.len(), 3);
        assert_eq!(report.customers, 3);
        let (_, user) = crate::auth::login(&ctx, "manager@demo.local", DEMO_PASSWORD)
            .await
            .unwrap();
        assert_eq!(user.role, Role::Manager);
        assert_eq!(user.clinic_id.as_deref(), Some(report.clinic_id.as_str()));

        assert!(matches!(seed(&ctx).await, Err(DeskError::Conflict(_))));
    }
}
