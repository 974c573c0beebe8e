//! Schema migrations.
//!
//! Migrations are the named entries of [`schema::MIGRATIONS`]. Applied names
//! are recorded in `_migrations`, so running the runner twice is a no-op.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use thiserror::Error;

use super::schema::{self, Migration};

/// Errors that can occur during migration operations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Database query failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration script failed to execute.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

/// Whether one known migration has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    /// Migration name.
    pub name: &'static str,
    /// When it was applied, `None` while pending.
    pub applied_at: Option<DateTime<Utc>>,
}

impl MigrationStatus {
    /// Whether the migration still has to run.
    pub fn is_pending(&self) -> bool {
        self.applied_at.is_none()
    }
}

/// Pairs every known migration with its `_migrations` record, in apply order.
/// Records of migrations this build does not know are ignored.
fn plan(
    migrations: &'static [Migration],
    applied: &HashMap<String, DateTime<Utc>>,
) -> Vec<(&'static Migration, MigrationStatus)> {
    migrations
        .iter()
        .map(|migration| {
            let status = MigrationStatus {
                name: migration.name,
                applied_at: applied.get(migration.name).copied(),
            };
            (migration, status)
        })
        .collect()
}

/// Migration runner for applying schema changes.
pub struct MigrationRunner {
    pool: PgPool,
}

impl MigrationRunner {
    /// Creates a new migration runner.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs all pending migrations. Returns the names of newly applied ones.
    pub async fn run_migrations(&self) -> Result<Vec<String>, MigrationError> {
        let applied = self.applied().await?;

        let mut newly_applied = Vec::new();
        for (migration, status) in plan(schema::MIGRATIONS, &applied) {
            if status.is_pending() {
                self.apply_migration(migration).await?;
                newly_applied.push(migration.name.to_string());
            }
        }

        Ok(newly_applied)
    }

    /// Status of every known migration, in apply order.
    pub async fn status(&self) -> Result<Vec<MigrationStatus>, MigrationError> {
        let applied = self.applied().await?;
        Ok(plan(schema::MIGRATIONS, &applied)
            .into_iter()
            .map(|(_, status)| status)
            .collect())
    }

    async fn applied(&self) -> Result<HashMap<String, DateTime<Utc>>, MigrationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                id SERIAL PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let rows: Vec<(String, DateTime<Utc>)> =
            sqlx::query_as("SELECT name, applied_at FROM _migrations")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().collect())
    }

    async fn apply_migration(&self, migration: &Migration) -> Result<(), MigrationError> {
        let mut tx = self.pool.begin().await?;

        for statement in migration
            .sql
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| MigrationError::MigrationFailed(format!("{}: {}", migration.name, e)))?;
        }

        sqlx::query("INSERT INTO _migrations (name) VALUES ($1)")
            .bind(migration.name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_error_display() {
        let err = MigrationError::MigrationFailed("001_create_scenarios: syntax".to_string());
        assert!(err.to_string().contains("001_create_scenarios"));
    }

    #[test]
    fn test_plan_marks_pending_in_apply_order() {
        let applied_at = Utc::now();
        let applied: HashMap<String, DateTime<Utc>> = [
            ("001_create_scenarios".to_string(), applied_at),
            ("000_retired".to_string(), applied_at),
        ]
        .into_iter()
        .collect();

        let statuses: Vec<MigrationStatus> = plan(schema::MIGRATIONS, &applied)
            .into_iter()
            .map(|(_, status)| status)
            .collect();

        assert_eq!(statuses.len(), schema::MIGRATIONS.len());
        assert_eq!(statuses[0].name, "001_create_scenarios");
        assert_eq!(statuses[0].applied_at, Some(applied_at));
        assert!(statuses[1..].iter().all(MigrationStatus::is_pending));
    }

    #[test]
    fn test_plan_nothing_pending_when_all_applied() {
        let applied: HashMap<String, DateTime<Utc>> = schema::MIGRATIONS
            .iter()
            .map(|m| (m.name.to_string(), Utc::now()))
            .collect();
        assert!(plan(schema::MIGRATIONS, &applied)
            .iter()
            .all(|(_, status)| !status.is_pending()));
    }
}
