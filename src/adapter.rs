use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DatabaseConnection, TransactionTrait};
use tokio::sync::Mutex;
use tracing::debug;

use crate::errors::AdapterError;
use crate::filter::BatchFilter;
use crate::model::PolicyModel;
use crate::settings::Settings;
use crate::{storage, sync};

/// Persistence interface the enforcer drives.
///
/// `sec` names the model section (`p` or `g`) and `ptype` the rule family
/// within it. Storage only keys rows by `ptype`; `sec` is carried for
/// implementations that need it.
#[async_trait]
pub trait PolicyAdapter: Send + Sync + 'static {
    /// Load every stored rule into `model`.
    async fn load_policy(&self, model: &mut PolicyModel) -> Result<(), AdapterError>;

    /// Load the rules selected by `filter` and mark the adapter filtered.
    async fn load_filtered_policy(
        &self,
        model: &mut PolicyModel,
        filter: &BatchFilter,
    ) -> Result<(), AdapterError>;

    /// True after a filtered load, until the next full load.
    fn is_filtered(&self) -> bool;

    /// Replace the stored rules with the contents of `model`.
    async fn save_policy(&self, model: &PolicyModel) -> Result<(), AdapterError>;

    async fn add_policy(&self, sec: &str, ptype: &str, rule: &[String])
        -> Result<bool, AdapterError>;

    async fn add_policies(
        &self,
        sec: &str,
        ptype: &str,
        rules: &[Vec<String>],
    ) -> Result<bool, AdapterError>;

    async fn remove_policy(
        &self,
        sec: &str,
        ptype: &str,
        rule: &[String],
    ) -> Result<bool, AdapterError>;

    async fn remove_policies(
        &self,
        sec: &str,
        ptype: &str,
        rules: &[Vec<String>],
    ) -> Result<bool, AdapterError>;

    /// Remove the rules whose values from `field_index` on match the non-empty
    /// `field_values`. All-empty values are rejected.
    async fn remove_filtered_policy(
        &self,
        sec: &str,
        ptype: &str,
        field_index: usize,
        field_values: &[String],
    ) -> Result<bool, AdapterError>;

    async fn update_policy(
        &self,
        sec: &str,
        ptype: &str,
        old_rule: &[String],
        new_rule: &[String],
    ) -> Result<bool, AdapterError>;

    async fn update_policies(
        &self,
        sec: &str,
        ptype: &str,
        old_rules: &[Vec<String>],
        new_rules: &[Vec<String>],
    ) -> Result<bool, AdapterError>;

    /// Swap the rules matching the field pattern for `new_rules`. Returns the
    /// rules that were replaced.
    async fn update_filtered_policies(
        &self,
        sec: &str,
        ptype: &str,
        new_rules: &[Vec<String>],
        field_index: usize,
        field_values: &[String],
    ) -> Result<Vec<Vec<String>>, AdapterError>;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;

    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// SQL adapter over a SeaORM connection.
///
/// `C` is a pooled `DatabaseConnection` for the adapter callers construct,
/// and a `DatabaseTransaction` for the scoped adapter handed to
/// `Adapter::transaction` closures. Clones share the transaction lock.
pub struct Adapter<C = DatabaseConnection> {
    pub(crate) conn: C,
    pub(crate) batch_size: usize,
    filtered: AtomicBool,
    pub(crate) tx_lock: Arc<Mutex<()>>,
}

pub(crate) const DEFAULT_BATCH_SIZE: usize = 1000;

impl<C: Clone> Clone for Adapter<C> {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            batch_size: self.batch_size,
            filtered: AtomicBool::new(self.is_filtered_flag()),
            tx_lock: Arc::clone(&self.tx_lock),
        }
    }
}

impl<C> std::fmt::Debug for Adapter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("batch_size", &self.batch_size)
            .field("filtered", &self.is_filtered_flag())
            .finish_non_exhaustive()
    }
}

impl<C> Adapter<C> {
    pub fn new(conn: C) -> Self {
        Self {
            conn,
            batch_size: DEFAULT_BATCH_SIZE,
            filtered: AtomicBool::new(false),
            tx_lock: Arc::new(Mutex::new(())),
        }
    }

    /// An adapter that starts out filtered, so `Enforcer::new` does not load
    /// the whole policy.
    pub fn new_filtered(conn: C) -> Self {
        let adapter = Self::new(conn);
        adapter.set_filtered(true);
        adapter
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }

    /// Adapter over `conn` that shares this adapter's transaction lock.
    pub(crate) fn scoped<T>(&self, conn: T) -> Adapter<T> {
        Adapter {
            conn,
            batch_size: self.batch_size,
            filtered: AtomicBool::new(false),
            tx_lock: Arc::clone(&self.tx_lock),
        }
    }

    pub(crate) fn into_connection(self) -> C {
        self.conn
    }

    fn is_filtered_flag(&self) -> bool {
        self.filtered.load(Ordering::Acquire)
    }

    fn set_filtered(&self, filtered: bool) {
        self.filtered.store(filtered, Ordering::Release);
    }
}

impl Adapter<DatabaseConnection> {
    /// Connect, create the schema when `auto_migrate` is set, and apply the
    /// adapter settings.
    pub async fn from_settings(settings: &Settings) -> Result<Self, AdapterError> {
        let conn = storage::init(&settings.database).await?;
        let adapter = Self::new(conn).with_batch_size(settings.adapter.batch_size);
        adapter.set_filtered(settings.adapter.filtered);
        Ok(adapter)
    }

    /// Close the connection pool. Clones of this adapter lose their
    /// connection as well.
    pub async fn close(self) -> Result<(), AdapterError> {
        self.conn.close().await?;
        debug!("closed adapter connection");
        Ok(())
    }
}

#[async_trait]
impl<C> PolicyAdapter for Adapter<C>
where
    C: ConnectionTrait + TransactionTrait + Send + Sync + 'static,
{
    async fn load_policy(&self, model: &mut PolicyModel) -> Result<(), AdapterError> {
        sync::load_policy(&self.conn, model).await?;
        self.set_filtered(false);
        Ok(())
    }

    async fn load_filtered_policy(
        &self,
        model: &mut PolicyModel,
        filter: &BatchFilter,
    ) -> Result<(), AdapterError> {
        sync::load_filtered_policy(&self.conn, model, filter).await?;
        self.set_filtered(true);
        Ok(())
    }

    fn is_filtered(&self) -> bool {
        self.is_filtered_flag()
    }

    async fn save_policy(&self, model: &PolicyModel) -> Result<(), AdapterError> {
        sync::save_policy(&self.conn, model, self.batch_size).await?;
        Ok(())
    }

    async fn add_policy(
        &self,
        _sec: &str,
        ptype: &str,
        rule: &[String],
    ) -> Result<bool, AdapterError> {
        storage::add_rules(&self.conn, ptype, &[rule.to_vec()], self.batch_size).await
    }

    async fn add_policies(
        &self,
        _sec: &str,
        ptype: &str,
        rules: &[Vec<String>],
    ) -> Result<bool, AdapterError> {
        storage::add_rules(&self.conn, ptype, rules, self.batch_size).await
    }

    async fn remove_policy(
        &self,
        _sec: &str,
        ptype: &str,
        rule: &[String],
    ) -> Result<bool, AdapterError> {
        storage::remove_rules(&self.conn, ptype, &[rule.to_vec()]).await
    }

    async fn remove_policies(
        &self,
        _sec: &str,
        ptype: &str,
        rules: &[Vec<String>],
    ) -> Result<bool, AdapterError> {
        storage::remove_rules(&self.conn, ptype, rules).await
    }

    async fn remove_filtered_policy(
        &self,
        _sec: &str,
        ptype: &str,
        field_index: usize,
        field_values: &[String],
    ) -> Result<bool, AdapterError> {
        storage::remove_filtered_rules(&self.conn, ptype, field_index, field_values).await
    }

    async fn update_policy(
        &self,
        _sec: &str,
        ptype: &str,
        old_rule: &[String],
        new_rule: &[String],
    ) -> Result<bool, AdapterError> {
        storage::update_rules(&self.conn, ptype, &[old_rule.to_vec()], &[new_rule.to_vec()]).await
    }

    async fn update_policies(
        &self,
        _sec: &str,
        ptype: &str,
        old_rules: &[Vec<String>],
        new_rules: &[Vec<String>],
    ) -> Result<bool, AdapterError> {
        storage::update_rules(&self.conn, ptype, old_rules, new_rules).await
    }

    async fn update_filtered_policies(
        &self,
        _sec: &str,
        ptype: &str,
        new_rules: &[Vec<String>],
        field_index: usize,
        field_values: &[String],
    ) -> Result<Vec<Vec<String>>, AdapterError> {
        storage::update_filtered_rules(
            &self.conn,
            ptype,
            new_rules,
            field_index,
            field_values,
            self.batch_size,
        )
        .await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}
