// src/db/store/users.rs

use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};

use super::Store;
use crate::domain::{now_ts, Role, User};

const USER_COLS: &str =
    "id, email, name, role, clinic_id, password_hash, is_active, created_at, updated_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let role: String = row.get(3)?;
    let role: Role = role.parse().map_err(|e: crate::infra::errors::DeskError| {
        rusqlite::Error::FromSqlConversionFailure(3, Type::Text, e.to_string().into())
    })?;
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        role,
        clinic_id: row.get(4)?,
        password_hash: row.get(5)?,
        is_active: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

impl Store {
    pub fn insert_user(&self, user: &User) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT INTO users (id, email, name, role, clinic_id, password_hash, is_active,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                user.id,
                user.email.to_lowercase(),
                user.name,
                user.role.as_str(),
                user.clinic_id,
                user.password_hash,
                user.is_active,
                user.created_at,
                user.updated_at
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, id: &str) -> anyhow::Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                &format!("SELECT {USER_COLS} FROM users WHERE id = ?1"),
                params![id],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn get_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                &format!("SELECT {USER_COLS} FROM users WHERE email = ?1"),
                params![email.trim().to_lowercase()],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    /// Users of one clinic, or all users when `clinic_id` is None.
    pub fn list_users(&self, clinic_id: Option<&str>) -> anyhow::Result<Vec<User>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {USER_COLS} FROM users
             WHERE (?1 IS NULL OR clinic_id = ?1)
             ORDER BY name"
        ))?;
        let rows = stmt.query_map(params![clinic_id], user_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn update_password_hash(&self, id: &str, hash: &str) -> anyhow::Result<()> {
        self.conn.execute(
            "UPDATE users SET password_hash = ?1, updated_at = ?2 WHERE id = ?3",
            params![hash, now_ts(), id],
        )?;
        Ok(())
    }

    pub fn set_user_active(&self, id: &str, active: bool) -> anyhow::Result<()> {
        self.conn.execute(
            "UPDATE users SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
            params![active, now_ts(), id],
        )?;
        Ok(())
    }

    pub fn count_users(&self) -> anyhow::Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;
        Ok(count)
    }
}
