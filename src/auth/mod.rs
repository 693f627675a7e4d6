// src/auth/mod.rs — Login, token refresh, registration and password management
//
// Tokens are stateless: logout is acknowledged but nothing is revoked, and an
// access token stays valid until it expires. Refresh re-reads the user so a
// deactivated account cannot mint new tokens.

pub mod jwt;
pub mod password;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::app::AppContext;
use crate::authz::{authorize_registration, Principal};
use crate::domain::{new_id, now_ts, Role, User};
use crate::infra::errors::DeskError;
use jwt::{Claims, TokenType};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access-token lifetime in seconds.
    pub expires_in: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password: String,
    pub role: Role,
    #[serde(default)]
    pub clinic_id: Option<String>,
}

fn invalid_credentials() -> DeskError {
    DeskError::Unauthorized("invalid email or password".into())
}

async fn hash_blocking(password: String, iterations: u32) -> Result<String, DeskError> {
    tokio::task::spawn_blocking(move || password::hash_password(&password, iterations))
        .await
        .map_err(|e| DeskError::Other(e.into()))?
        .map_err(DeskError::Other)
}

async fn verify_blocking(password: String, encoded: String) -> Result<bool, DeskError> {
    tokio::task::spawn_blocking(move || password::verify_password(&password, &encoded))
        .await
        .map_err(|e| DeskError::Other(e.into()))
}

fn sign(ctx: &AppContext, user: &User, kind: TokenType, ttl: Duration, fp: Option<String>) -> Result<String, DeskError> {
    let now = Utc::now();
    let claims = Claims {
        sub: user.id.clone(),
        role: user.role,
        clinic_id: user.clinic_id.clone(),
        kind,
        iat: now.timestamp(),
        exp: (now + ttl).timestamp(),
        fp,
    };
    ctx.signer.sign(&claims).map_err(DeskError::Other)
}

pub fn issue_tokens(ctx: &AppContext, user: &User) -> Result<TokenPair, DeskError> {
    let auth = &ctx.config.auth;
    let access_ttl = Duration::minutes(auth.access_token_minutes);
    Ok(TokenPair {
        access_token: sign(ctx, user, TokenType::Access, access_ttl, None)?,
        refresh_token: sign(ctx, user, TokenType::Refresh, Duration::days(auth.refresh_token_days), None)?,
        token_type: "bearer".into(),
        expires_in: access_ttl.num_seconds(),
    })
}

/// Resolve a bearer access token into the caller.
pub fn authenticate(ctx: &AppContext, token: &str) -> Result<Principal, DeskError> {
    let claims = ctx.signer.verify(token, TokenType::Access)?;
    Ok(Principal {
        user_id: claims.sub,
        role: claims.role,
        clinic_id: claims.clinic_id,
    })
}

async fn load_user(ctx: &AppContext, id: &str) -> Result<User, DeskError> {
    let id = id.to_string();
    ctx.store
        .call(move |s| {
            s.get_user(&id)?
                .ok_or_else(|| DeskError::not_found("user", &id).into())
        })
        .await
}

pub async fn login(ctx: &AppContext, email: &str, password: &str) -> Result<(TokenPair, User), DeskError> {
    let lookup = email.to_string();
    let user = ctx
        .store
        .call(move |s| s.get_user_by_email(&lookup))
        .await?
        .ok_or_else(invalid_credentials)?;
    if !verify_blocking(password.to_string(), user.password_hash.clone()).await? {
        tracing::info!(user_id = %user.id, "Login rejected: bad password");
        return Err(invalid_credentials());
    }
    if !user.is_active {
        return Err(DeskError::Unauthorized("account is disabled".into()));
    }
    tracing::info!(user_id = %user.id, role = %user.role, "User logged in");
    Ok((issue_tokens(ctx, &user)?, user))
}

pub async fn refresh(ctx: &AppContext, refresh_token: &str) -> Result<TokenPair, DeskError> {
    let claims = ctx.signer.verify(refresh_token, TokenType::Refresh)?;
    let user = load_user(ctx, &claims.sub)
        .await
        .map_err(|_| DeskError::Unauthorized("unknown user".into()))?;
    if !user.is_active {
        return Err(DeskError::Unauthorized("account is disabled".into()));
    }
    issue_tokens(ctx, &user)
}

/// Create a user without a caller check. Used by registration and the
/// operator commands.
pub async fn create_user(ctx: &AppContext, new: NewUser) -> Result<User, DeskError> {
    let email = new.email.trim().to_lowercase();
    if !email.contains('@') || email.len() < 3 {
        return Err(DeskError::Validation(format!("'{}' is not an e-mail address", new.email)));
    }
    if new.name.trim().is_empty() {
        return Err(DeskError::Validation("name must not be empty".into()));
    }
    if new.role != Role::Admin && new.clinic_id.is_none() {
        return Err(DeskError::Validation(format!("a {} needs a clinic", new.role)));
    }
    password::check_strength(&new.password)?;
    let hash = hash_blocking(new.password, ctx.config.auth.password_iterations).await?;

    let now = now_ts();
    let user = User {
        id: new_id(),
        email,
        name: new.name.trim().to_string(),
        role: new.role,
        clinic_id: new.clinic_id,
        password_hash: hash,
        is_active: true,
        created_at: now.clone(),
        updated_at: now,
    };
    let row = user.clone();
    ctx.store
        .call(move |s| {
            if let Some(clinic_id) = &row.clinic_id {
                if s.get_clinic(clinic_id)?.is_none() {
                    return Err(DeskError::not_found("clinic", clinic_id).into());
                }
            }
            if s.get_user_by_email(&row.email)?.is_some() {
                return Err(DeskError::Conflict(format!("e-mail '{}' is already registered", row.email)).into());
            }
            s.insert_user(&row)
        })
        .await?;
    tracing::info!(user_id = %user.id, role = %user.role, "User created");
    Ok(user)
}

pub async fn register(ctx: &AppContext, caller: &Principal, new: NewUser) -> Result<User, DeskError> {
    authorize_registration(caller, new.role, new.clinic_id.as_deref())?;
    create_user(ctx, new).await
}

pub async fn me(ctx: &AppContext, caller: &Principal) -> Result<User, DeskError> {
    load_user(ctx, &caller.user_id).await
}

pub async fn change_password(
    ctx: &AppContext,
    caller: &Principal,
    current: &str,
    new_password: &str,
) -> Result<(), DeskError> {
    let user = load_user(ctx, &caller.user_id).await?;
    if !verify_blocking(current.to_string(), user.password_hash.clone()).await? {
        return Err(DeskError::Unauthorized("current password is wrong".into()));
    }
    password::check_strength(new_password)?;
    let hash = hash_blocking(new_password.to_string(), ctx.config.auth.password_iterations).await?;
    let id = user.id.clone();
    ctx.store
        .call(move |s| s.update_password_hash(&id, &hash))
        .await?;
    tracing::info!(user_id = %user.id, "Password changed");
    Ok(())
}

/// Always succeeds so callers cannot enumerate accounts. The token is only
/// returned when `auth.expose_reset_token` is set.
pub async fn request_password_reset(ctx: &AppContext, email: &str) -> Result<Option<String>, DeskError> {
    let lookup = email.to_string();
    let Some(user) = ctx.store.call(move |s| s.get_user_by_email(&lookup)).await? else {
        return Ok(None);
    };
    if !user.is_active {
        return Ok(None);
    }
    let ttl = Duration::minutes(ctx.config.auth.reset_token_minutes);
    let token = sign(
        ctx,
        &user,
        TokenType::Reset,
        ttl,
        Some(password::fingerprint(&user.password_hash)),
    )?;
    tracing::info!(user_id = %user.id, "Password reset requested");
    Ok(ctx.config.auth.expose_reset_token.then_some(token))
}

pub async fn confirm_password_reset(ctx: &AppContext, token: &str, new_password: &str) -> Result<(), DeskError> {
    let claims = ctx.signer.verify(token, TokenType::Reset)?;
    password::check_strength(new_password)?;
    let user = load_user(ctx, &claims.sub)
        .await
        .map_err(|_| DeskError::Unauthorized("invalid reset token".into()))?;
    if claims.fp.as_deref() != Some(password::fingerprint(&user.password_hash).as_str()) {
        return Err(DeskError::Unauthorized("reset token already used".into()));
    }
    let hash = hash_blocking(new_password.to_string(), ctx.config.auth.password_iterations).await?;
    let id = user.id.clone();
    ctx.store
        .call(move |s| s.update_password_hash(&id, &hash))
        .await?;
    tracing::info!(user_id = %user.id, "Password reset completed");
    Ok(())
}
