use policy_adapter::{storage, RuleRow};
use sea_orm::DatabaseConnection;

/// Owned rule from string slices
pub fn rule(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

/// Builder for seeding rule rows directly into storage
#[derive(Default)]
pub struct PolicyBuilder {
    rows: Vec<RuleRow>,
}

impl PolicyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named<const N: usize>(mut self, ptype: &str, values: [&str; N]) -> Self {
        self.rows
            .push(RuleRow::encode(ptype, &values).expect("Failed to encode test rule"));
        self
    }

    pub fn policy<const N: usize>(self, values: [&str; N]) -> Self {
        self.named("p", values)
    }

    pub fn grouping<const N: usize>(self, values: [&str; N]) -> Self {
        self.named("g", values)
    }

    pub async fn create(self, db: &DatabaseConnection) {
        storage::insert_rules(db, self.rows, 100)
            .await
            .expect("Failed to seed rules");
    }
}
