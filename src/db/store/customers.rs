// src/db/store/customers.rs

use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde::Deserialize;

use super::{push_scope, where_sql, Store};
use crate::authz::Scope;
use crate::domain::{now_ts, Customer};

const CUSTOMER_COLS: &str =
    "id, clinic_id, name, phone, email, notes, created_at, updated_at";

fn customer_from_row(row: &Row<'_>) -> rusqlite::Result<Customer> {
    Ok(Customer {
        id: row.get(0)?,
        clinic_id: row.get(1)?,
        name: row.get(2)?,
        phone: row.get(3)?,
        email: row.get(4)?,
        notes: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

#[derive(Debug, Clone, Default)]
pub struct CustomerFilter {
    pub scope: Option<Scope>,
    /// Case-insensitive substring match on name.
    pub search: Option<String>,
    pub limit: u32,
    pub offset: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomerPatch {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub notes: Option<String>,
}

impl Store {
    pub fn insert_customer(&self, c: &Customer) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT INTO customers (id, clinic_id, name, phone, email, notes, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                c.id,
                c.clinic_id,
                c.name,
                c.phone,
                c.email,
                c.notes,
                c.created_at,
                c.updated_at
            ],
        )?;
        Ok(())
    }

    pub fn get_customer(&self, id: &str) -> anyhow::Result<Option<Customer>> {
        let customer = self
            .conn
            .query_row(
                &format!(
                    "SELECT {CUSTOMER_COLS} FROM customers WHERE id = ?1 AND is_deleted = 0"
                ),
                params![id],
                customer_from_row,
            )
            .optional()?;
        Ok(customer)
    }

    pub fn list_customers(&self, filter: &CustomerFilter) -> anyhow::Result<Vec<Customer>> {
        let mut clauses = vec!["is_deleted = 0".to_string()];
        let mut values: Vec<String> = Vec::new();
        if let Some(scope) = &filter.scope {
            push_scope(scope, "clinic_id", None, &mut clauses, &mut values);
        }
        if let Some(search) = &filter.search {
            values.push(format!("%{}%", search.to_lowercase()));
            clauses.push(format!("LOWER(name) LIKE ?{}", values.len()));
        }
        let sql = format!(
            "SELECT {CUSTOMER_COLS} FROM customers {} ORDER BY name LIMIT {} OFFSET {}",
            where_sql(&clauses),
            filter.limit.max(1),
            filter.offset
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), customer_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn update_customer(&self, id: &str, patch: &CustomerPatch) -> anyhow::Result<bool> {
        let changed = self.conn.execute(
            "UPDATE customers SET name = COALESCE(?1, name), phone = COALESCE(?2, phone),
             email = COALESCE(?3, email), notes = COALESCE(?4, notes), updated_at = ?5
             WHERE id = ?6 AND is_deleted = 0",
            params![patch.name, patch.phone, patch.email, patch.notes, now_ts(), id],
        )?;
        Ok(changed > 0)
    }
}
