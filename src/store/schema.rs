//! Database schema constants.
//!
//! Root scenario rows use `network_id = ''` and `investment_path = ''` so
//! that `(id, network_id, investment_path)` can be the primary key for both
//! root and fan-out rows. Several investment paths may share a network.

/// SQL schema for creating the scenarios table.
pub const CREATE_SCENARIOS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS scenarios (
    id BIGINT NOT NULL,
    network_id VARCHAR(255) NOT NULL DEFAULT '',
    uuid UUID NOT NULL,
    calculation_state VARCHAR(100) NOT NULL,
    bucket_folder VARCHAR(1024) NOT NULL,
    scenario_year INTEGER,
    investment_path VARCHAR(255) NOT NULL DEFAULT '',
    artifacts JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (id, network_id, investment_path)
)
"#;

/// SQL schema for creating the scenario_outbox table.
pub const CREATE_OUTBOX_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS scenario_outbox (
    id BIGSERIAL PRIMARY KEY,
    queue VARCHAR(255) NOT NULL,
    body TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    sent_at TIMESTAMPTZ
)
"#;

/// SQL for creating all required indexes.
pub const CREATE_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_scenarios_state ON scenarios(calculation_state, id);
CREATE INDEX IF NOT EXISTS idx_scenario_outbox_pending ON scenario_outbox(id) WHERE sent_at IS NULL
"#;

/// One named schema change, applied at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
    /// Name recorded in `_migrations`.
    pub name: &'static str,
    /// Statements, `;`-separated.
    pub sql: &'static str,
}

/// Every migration, in apply order. Append only.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "001_create_scenarios",
        sql: CREATE_SCENARIOS_TABLE,
    },
    Migration {
        name: "002_create_scenario_outbox",
        sql: CREATE_OUTBOX_TABLE,
    },
    Migration {
        name: "003_create_indexes",
        sql: CREATE_INDEXES,
    },
];

/// Table names in the schema.
pub mod tables {
    /// Scenarios table name.
    pub const SCENARIOS: &str = "scenarios";
    /// Outbox table name.
    pub const OUTBOX: &str = "scenario_outbox";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_in_apply_order() {
        assert_eq!(MIGRATIONS.len(), 3);
        assert!(MIGRATIONS[0].sql.contains(tables::SCENARIOS));
        assert!(MIGRATIONS[1].sql.contains(tables::OUTBOX));
        // Indexes should be last
        assert!(MIGRATIONS[2].sql.contains("CREATE INDEX"));

        let mut names: Vec<&str> = MIGRATIONS.iter().map(|m| m.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), MIGRATIONS.len());
    }

    #[test]
    fn test_scenarios_keyed_by_id_network_and_path() {
        assert!(
            CREATE_SCENARIOS_TABLE.contains("PRIMARY KEY (id, network_id, investment_path)")
        );
    }
}
