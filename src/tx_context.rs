use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DatabaseTransaction, TransactionTrait};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::adapter::{Adapter, PolicyAdapter};
use crate::context::Context;
use crate::errors::AdapterError;
use crate::filter::BatchFilter;
use crate::model::PolicyModel;
use crate::{storage, sync};

enum TxState {
    Active(DatabaseTransaction),
    Committed,
    RolledBack,
}

impl TxState {
    fn txn(&self) -> Result<&DatabaseTransaction, AdapterError> {
        match self {
            TxState::Active(txn) => Ok(txn),
            _ => Err(AdapterError::TransactionFinished),
        }
    }
}

struct TxInner {
    state: Mutex<TxState>,
    ctx: Context,
    batch_size: usize,
}

impl Drop for TxInner {
    fn drop(&mut self) {
        // The transaction handle rolls itself back when dropped.
        if matches!(self.state.get_mut(), TxState::Active(_)) {
            warn!("transaction context dropped while active; rolling back");
        }
    }
}

/// One independent unit of work with its own database transaction.
///
/// Nothing is shared with other contexts of the same adapter, so any number
/// of them can be open at once; isolation is left to the database. The
/// context finishes exactly once, by `commit` or `rollback`.
pub struct TransactionContext {
    inner: Arc<TxInner>,
}

/// `PolicyAdapter` whose writes go into a `TransactionContext`.
#[derive(Clone)]
pub struct TxAdapter {
    inner: Arc<TxInner>,
}

impl<C> Adapter<C>
where
    C: ConnectionTrait + TransactionTrait + Send + Sync + 'static,
{
    /// Open a transaction bound to `ctx`. Every later operation on it fails
    /// once `ctx` is cancelled or past its deadline.
    pub async fn begin_transaction(&self, ctx: Context) -> Result<TransactionContext, AdapterError> {
        let txn = ctx
            .run(async { self.conn.begin().await.map_err(AdapterError::from) })
            .await?;
        debug!("began transaction context");

        Ok(TransactionContext {
            inner: Arc::new(TxInner {
                state: Mutex::new(TxState::Active(txn)),
                ctx,
                batch_size: self.batch_size,
            }),
        })
    }
}

impl TransactionContext {
    pub fn adapter(&self) -> TxAdapter {
        TxAdapter {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn context(&self) -> &Context {
        &self.inner.ctx
    }

    pub async fn is_active(&self) -> bool {
        matches!(*self.inner.state.lock().await, TxState::Active(_))
    }

    /// Commit the transaction.
    ///
    /// A cancelled context leaves the transaction open so the caller can
    /// still roll back. Once the commit is attempted the handle is spent: if
    /// it fails, or the context ends before it completes, the transaction is
    /// rolled back.
    pub async fn commit(&self) -> Result<(), AdapterError> {
        let mut state = self.inner.state.lock().await;
        if !matches!(*state, TxState::Active(_)) {
            return Err(AdapterError::TransactionFinished);
        }
        self.inner.ctx.err()?;

        let TxState::Active(txn) = std::mem::replace(&mut *state, TxState::RolledBack) else {
            return Err(AdapterError::TransactionFinished);
        };
        self.inner
            .ctx
            .run(async move { txn.commit().await.map_err(AdapterError::from) })
            .await?;

        *state = TxState::Committed;
        debug!("transaction context committed");
        Ok(())
    }

    /// Roll back the transaction. This always undoes the work, but still
    /// reports a context that ended in the meantime.
    pub async fn rollback(&self) -> Result<(), AdapterError> {
        let mut state = self.inner.state.lock().await;
        if !matches!(*state, TxState::Active(_)) {
            return Err(AdapterError::TransactionFinished);
        }
        let TxState::Active(txn) = std::mem::replace(&mut *state, TxState::RolledBack) else {
            return Err(AdapterError::TransactionFinished);
        };

        txn.rollback().await?;
        debug!("transaction context rolled back");
        self.inner.ctx.err()
    }
}

impl TxAdapter {
    /// The transaction state, provided it is still open and its context live.
    async fn active(&self) -> Result<MutexGuard<'_, TxState>, AdapterError> {
        let state = self.inner.state.lock().await;
        state.txn()?;
        self.inner.ctx.err()?;
        Ok(state)
    }
}

#[async_trait]
impl PolicyAdapter for TxAdapter {
    async fn load_policy(&self, model: &mut PolicyModel) -> Result<(), AdapterError> {
        let state = self.active().await?;
        let txn = state.txn()?;
        self.inner
            .ctx
            .run(sync::load_policy(txn, model))
            .await?;
        Ok(())
    }

    async fn load_filtered_policy(
        &self,
        model: &mut PolicyModel,
        filter: &BatchFilter,
    ) -> Result<(), AdapterError> {
        let state = self.active().await?;
        let txn = state.txn()?;
        self.inner
            .ctx
            .run(sync::load_filtered_policy(txn, model, filter))
            .await?;
        Ok(())
    }

    fn is_filtered(&self) -> bool {
        false
    }

    async fn save_policy(&self, model: &PolicyModel) -> Result<(), AdapterError> {
        let state = self.active().await?;
        let txn = state.txn()?;
        self.inner
            .ctx
            .run(sync::save_policy(txn, model, self.inner.batch_size))
            .await?;
        Ok(())
    }

    async fn add_policy(
        &self,
        _sec: &str,
        ptype: &str,
        rule: &[String],
    ) -> Result<bool, AdapterError> {
        let state = self.active().await?;
        let txn = state.txn()?;
        let rules = [rule.to_vec()];
        self.inner
            .ctx
            .run(storage::add_rules(txn, ptype, &rules, self.inner.batch_size))
            .await
    }

    async fn add_policies(
        &self,
        _sec: &str,
        ptype: &str,
        rules: &[Vec<String>],
    ) -> Result<bool, AdapterError> {
        let state = self.active().await?;
        let txn = state.txn()?;
        self.inner
            .ctx
            .run(storage::add_rules(txn, ptype, rules, self.inner.batch_size))
            .await
    }

    async fn remove_policy(
        &self,
        _sec: &str,
        ptype: &str,
        rule: &[String],
    ) -> Result<bool, AdapterError> {
        let state = self.active().await?;
        let txn = state.txn()?;
        let rules = [rule.to_vec()];
        self.inner
            .ctx
            .run(storage::remove_rules(txn, ptype, &rules))
            .await
    }

    async fn remove_policies(
        &self,
        _sec: &str,
        ptype: &str,
        rules: &[Vec<String>],
    ) -> Result<bool, AdapterError> {
        let state = self.active().await?;
        let txn = state.txn()?;
        self.inner
            .ctx
            .run(storage::remove_rules(txn, ptype, rules))
            .await
    }

    async fn remove_filtered_policy(
        &self,
        _sec: &str,
        ptype: &str,
        field_index: usize,
        field_values: &[String],
    ) -> Result<bool, AdapterError> {
        let state = self.active().await?;
        let txn = state.txn()?;
        self.inner
            .ctx
            .run(storage::remove_filtered_rules(txn, ptype, field_index, field_values))
            .await
    }

    async fn update_policy(
        &self,
        _sec: &str,
        ptype: &str,
        old_rule: &[String],
        new_rule: &[String],
    ) -> Result<bool, AdapterError> {
        let state = self.active().await?;
        let txn = state.txn()?;
        let (old, new) = ([old_rule.to_vec()], [new_rule.to_vec()]);
        self.inner
            .ctx
            .run(storage::update_rules(txn, ptype, &old, &new))
            .await
    }

    async fn update_policies(
        &self,
        _sec: &str,
        ptype: &str,
        old_rules: &[Vec<String>],
        new_rules: &[Vec<String>],
    ) -> Result<bool, AdapterError> {
        let state = self.active().await?;
        let txn = state.txn()?;
        self.inner
            .ctx
            .run(storage::update_rules(txn, ptype, old_rules, new_rules))
            .await
    }

    async fn update_filtered_policies(
        &self,
        _sec: &str,
        ptype: &str,
        new_rules: &[Vec<String>],
        field_index: usize,
        field_values: &[String],
    ) -> Result<Vec<Vec<String>>, AdapterError> {
        let state = self.active().await?;
        let txn = state.txn()?;
        self.inner
            .ctx
            .run(storage::update_filtered_rules(
                txn,
                ptype,
                new_rules,
                field_index,
                field_values,
                self.inner.batch_size,
            ))
            .await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}
