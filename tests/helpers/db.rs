use policy_adapter::{settings, storage, Adapter, RuleRow};
use sea_orm::{Condition, DatabaseConnection};
use tempfile::NamedTempFile;

use super::builders::PolicyBuilder;

pub const POOL_SIZE: u32 = 10;

/// Test database with automatic cleanup
pub struct TestDb {
    connection: DatabaseConnection,
    _temp_file: NamedTempFile,
}

impl TestDb {
    /// Create a new test database with migrations applied
    pub async fn new() -> Self {
        // Create temporary SQLite database file
        let temp_file = NamedTempFile::new().expect("Failed to create temp file");
        let db_path = temp_file.path().to_str().expect("Invalid temp file path");
        let db_url = format!("sqlite://{}?mode=rwc", db_path);

        // Connect and run migrations, with a pool wide enough for several
        // open transaction contexts
        let connection = storage::init(&settings::Database {
            url: db_url,
            auto_migrate: true,
            max_connections: POOL_SIZE,
        })
        .await
        .expect("Failed to set up test database");

        Self {
            connection,
            _temp_file: temp_file,
        }
    }

    /// Get database connection
    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }

    /// Adapter over a clone of the test connection
    pub fn adapter(&self) -> Adapter {
        Adapter::new(self.connection.clone())
    }

    /// Adapter that starts filtered, so a new enforcer skips the initial load
    pub fn filtered_adapter(&self) -> Adapter {
        Adapter::new_filtered(self.connection.clone())
    }
}

/// Seed the usual RBAC example policy:
/// alice may read data1, bob may write data2, data2_admin may read and write
/// data2, and alice is a data2_admin.
pub async fn seed_rbac_policy(db: &DatabaseConnection) {
    PolicyBuilder::new()
        .policy(["alice", "data1", "read"])
        .policy(["bob", "data2", "write"])
        .policy(["data2_admin", "data2", "read"])
        .policy(["data2_admin", "data2", "write"])
        .grouping(["alice", "data2_admin"])
        .create(db)
        .await;
}

/// Every stored rule as `[ptype, values..]`, in row order
pub async fn stored_rules(db: &DatabaseConnection) -> Vec<Vec<String>> {
    storage::find_rules(db, Condition::all())
        .await
        .expect("Failed to read rules")
        .iter()
        .map(RuleRow::decode)
        .collect()
}
