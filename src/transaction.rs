use std::future::Future;
use std::pin::Pin;

use sea_orm::{ConnectionTrait, DatabaseTransaction, TransactionTrait};
use tracing::{debug, warn};

use crate::adapter::Adapter;
use crate::enforcer::Enforcer;
use crate::errors::AdapterError;
use crate::model::PolicyModel;

/// Future returned by a `transaction` closure, borrowing the scoped enforcer.
pub type TxFuture<'e> = Pin<Box<dyn Future<Output = Result<(), AdapterError>> + Send + 'e>>;

enum Scope<'a> {
    /// Outermost call: holds the adapter's lock and opens a real transaction.
    TopLevel,
    /// Called with the scoped enforcer of an enclosing `transaction` call:
    /// runs in a savepoint of that call's transaction.
    Nested(&'a Adapter<DatabaseTransaction>),
}

impl<C> Adapter<C>
where
    C: ConnectionTrait + TransactionTrait + Send + Sync + 'static,
{
    /// Run `f` against an enforcer whose adapter writes into a transaction.
    ///
    /// Top-level calls are serialized on a lock shared by every clone of this
    /// adapter and held until the call returns. A call made from inside `f`
    /// with the scoped enforcer runs in a savepoint of the enclosing
    /// transaction instead, so its failure only undoes its own writes. The
    /// transaction commits when `f` returns `Ok` and rolls back otherwise.
    /// Either way `enforcer` is reloaded from storage before returning.
    ///
    /// `enforcer` must be backed by an `Adapter` over the same kind of
    /// connection, or by the scoped adapter of an enclosing call. Any other
    /// adapter type is `UnexpectedAdapter` and nothing is written. The lock
    /// taken is this adapter's, not the enforcer's.
    pub async fn transaction<F>(&self, enforcer: &mut Enforcer, f: F) -> Result<(), AdapterError>
    where
        F: for<'e> FnOnce(&'e mut Enforcer) -> TxFuture<'e> + Send,
    {
        let scope = self.scope_of(enforcer)?;

        let (_guard, txn) = match scope {
            Scope::TopLevel => {
                let guard = self.tx_lock.lock().await;
                debug!("acquired transaction lock");
                (Some(guard), self.conn.begin().await?)
            }
            Scope::Nested(outer) => (None, outer.conn.begin().await?),
        };

        let outcome = self.run_scoped(enforcer.model().clone(), txn, f).await;
        let reload = enforcer.load_policy().await;
        outcome?;
        reload
    }

    fn scope_of<'a>(&self, enforcer: &'a Enforcer) -> Result<Scope<'a>, AdapterError> {
        let Some(adapter) = enforcer.adapter() else {
            return Err(AdapterError::UnexpectedAdapter("no adapter".to_string()));
        };

        if let Some(outer) = adapter.as_any().downcast_ref::<Adapter<DatabaseTransaction>>() {
            return Ok(Scope::Nested(outer));
        }
        if adapter.as_any().is::<Adapter<C>>() {
            return Ok(Scope::TopLevel);
        }

        Err(AdapterError::UnexpectedAdapter(adapter.type_name().to_string()))
    }

    async fn run_scoped<F>(
        &self,
        model: PolicyModel,
        txn: DatabaseTransaction,
        f: F,
    ) -> Result<(), AdapterError>
    where
        F: for<'e> FnOnce(&'e mut Enforcer) -> TxFuture<'e> + Send,
    {
        let mut scoped = Enforcer::from_parts(model, Box::new(self.scoped(txn)));
        let result = f(&mut scoped).await;

        let Some(adapter) = scoped.take_adapter() else {
            return result.and(Err(AdapterError::UnexpectedAdapter("no adapter".to_string())));
        };
        let name = adapter.type_name();
        let txn = match adapter.into_any().downcast::<Adapter<DatabaseTransaction>>() {
            Ok(adapter) => adapter.into_connection(),
            // The closure swapped the adapter out; the original transaction
            // was dropped with it and rolls back.
            Err(_) => return result.and(Err(AdapterError::UnexpectedAdapter(name.to_string()))),
        };

        match result {
            Ok(()) => {
                txn.commit().await?;
                debug!("transaction committed");
                Ok(())
            }
            Err(err) => {
                if let Err(rollback_err) = txn.rollback().await {
                    warn!(error = %rollback_err, "transaction rollback failed");
                }
                debug!(error = %err, "transaction rolled back");
                Err(err)
            }
        }
    }
}
