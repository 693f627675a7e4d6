// src/cli/migrate.rs — Database migration command
//
// Shows migration status or runs pending migrations manually.
// `serve` migrates on startup; this command is for inspection and rollback.

use std::path::Path;

use crate::db::schema;

/// Show migration status, roll back the newest migration, or migrate.
pub fn run_migrate(db_path: &Path, status_only: bool, rollback: bool) -> anyhow::Result<()> {
    if !db_path.exists() && (status_only || rollback) {
        println!("No database found at: {}", db_path.display());
        println!("Run `counseldesk migrate` to create it.");
        return Ok(());
    }

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = rusqlite::Connection::open(db_path)?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;

    if status_only {
        return show_migration_status(&conn, db_path);
    }

    if rollback {
        match schema::rollback_last(&conn)? {
            Some(version) => {
                tracing::warn!(version, "Rolled back migration");
                println!("Rolled back migration v{version}.");
            }
            None => println!("No migrations to roll back."),
        }
        return show_migration_status(&conn, db_path);
    }

    println!("Running database migrations...");
    schema::run_migrations(&conn)?;
    println!("Migrations complete.");
    show_migration_status(&conn, db_path)
}

fn show_migration_status(conn: &rusqlite::Connection, db_path: &Path) -> anyhow::Result<()> {
    let applied = schema::applied_migrations(conn)?;
    println!("Database: {}", db_path.display());
    println!("Current schema version: {}", schema::current_version(conn)?);
    println!();

    if applied.is_empty() {
        println!("No migrations have been run yet.");
        return Ok(());
    }
    println!("Applied migrations:");
    for (version, name, applied_at) in applied {
        println!("  v{version}: {name} (applied {applied_at})");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_then_rollback() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("desk.db");

        // status on a missing database is a no-op
        run_migrate(&db, true, false).unwrap();
        assert!(!db.exists());

        run_migrate(&db, false, false).unwrap();
        let conn = rusqlite::Connection::open(&db).unwrap();
        let version = schema::current_version(&conn).unwrap();
        assert!(version >= 1);
        drop(conn);

        run_migrate(&db, false, true).unwrap();
        let conn = rusqlite::Connection::open(&db).unwrap();
        assert_eq!(schema::current_version(&conn).unwrap(), version - 1);
    }
}
