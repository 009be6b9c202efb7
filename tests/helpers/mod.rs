// Each test binary uses its own subset of these.
#![allow(dead_code, unused_imports)]

pub mod builders;
pub mod db;

pub use builders::{rule, PolicyBuilder};
pub use db::{seed_rbac_policy, stored_rules, TestDb};
