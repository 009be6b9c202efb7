//! Policy adapter - SQL persistence for access-control policy rules
//!
//! Stores policy rules as fixed-width rows through SeaORM, loads them (fully
//! or filtered) into an in-memory policy model, and mediates transactional
//! writes, either serialized with savepoint nesting (`Adapter::transaction`)
//! or through independent concurrent contexts (`Adapter::begin_transaction`).

pub mod adapter;
pub mod codec;
pub mod context;
pub mod context_adapter;
pub mod enforcer;
pub mod entities;
pub mod errors;
pub mod filter;
pub mod model;
pub mod settings;
pub mod storage;
pub mod sync;
pub mod transaction;
pub mod tx_context;

pub use adapter::{Adapter, PolicyAdapter};
pub use codec::{RuleRow, MAX_FIELDS};
pub use context::{CancelHandle, Context};
pub use context_adapter::ContextAdapter;
pub use enforcer::Enforcer;
pub use errors::AdapterError;
pub use filter::{conditions_to_query, BatchFilter, CombineType, Filter};
pub use model::PolicyModel;
pub use settings::Settings;
pub use transaction::TxFuture;
pub use tx_context::{TransactionContext, TxAdapter};
