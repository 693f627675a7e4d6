// src/db/store/clinics.rs

use rusqlite::{params, OptionalExtension, Row};

use super::Store;
use crate::domain::{now_ts, Clinic};

const CLINIC_COLS: &str = "id, name, address, phone, created_at, updated_at";

fn clinic_from_row(row: &Row<'_>) -> rusqlite::Result<Clinic> {
    Ok(Clinic {
        id: row.get(0)?,
        name: row.get(1)?,
        address: row.get(2)?,
        phone: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

impl Store {
    pub fn insert_clinic(&self, clinic: &Clinic) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT INTO clinics (id, name, address, phone, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                clinic.id,
                clinic.name,
                clinic.address,
                clinic.phone,
                clinic.created_at,
                clinic.updated_at
            ],
        )?;
        Ok(())
    }

    pub fn get_clinic(&self, id: &str) -> anyhow::Result<Option<Clinic>> {
        let clinic = self
            .conn
            .query_row(
                &format!("SELECT {CLINIC_COLS} FROM clinics WHERE id = ?1"),
                params![id],
                clinic_from_row,
            )
            .optional()?;
        Ok(clinic)
    }

    pub fn list_clinics(&self) -> anyhow::Result<Vec<Clinic>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {CLINIC_COLS} FROM clinics ORDER BY name"))?;
        let rows = stmt.query_map([], clinic_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Update provided fields only. Returns false when the clinic is unknown.
    pub fn update_clinic(
        &self,
        id: &str,
        name: Option<&str>,
        address: Option<&str>,
        phone: Option<&str>,
    ) -> anyhow::Result<bool> {
        let changed = self.conn.execute(
            "UPDATE clinics SET name = COALESCE(?1, name), address = COALESCE(?2, address),
             phone = COALESCE(?3, phone), updated_at = ?4 WHERE id = ?5",
            params![name, address, phone, now_ts(), id],
        )?;
        Ok(changed > 0)
    }
}
