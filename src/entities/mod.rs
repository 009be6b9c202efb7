pub mod casbin_rule;

pub use casbin_rule::Entity as CasbinRule;
