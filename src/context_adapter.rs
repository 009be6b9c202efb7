use std::any::Any;

use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DatabaseConnection, TransactionTrait};

use crate::adapter::{Adapter, PolicyAdapter};
use crate::context::Context;
use crate::errors::AdapterError;
use crate::filter::BatchFilter;
use crate::model::PolicyModel;

/// An `Adapter` whose every operation runs under a `Context`.
///
/// Operations fail with `Cancelled` or `DeadlineExceeded` once the context
/// ends, and an operation still in flight at that point is abandoned.
#[derive(Debug)]
pub struct ContextAdapter<C = DatabaseConnection> {
    inner: Adapter<C>,
    ctx: Context,
}

impl<C> ContextAdapter<C> {
    pub fn new(inner: Adapter<C>, ctx: Context) -> Self {
        Self { inner, ctx }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Same adapter under a different context.
    pub fn with_context(self, ctx: Context) -> Self {
        Self { ctx, ..self }
    }

    pub fn inner(&self) -> &Adapter<C> {
        &self.inner
    }

    pub fn into_inner(self) -> Adapter<C> {
        self.inner
    }
}

#[async_trait]
impl<C> PolicyAdapter for ContextAdapter<C>
where
    C: ConnectionTrait + TransactionTrait + Send + Sync + 'static,
{
    async fn load_policy(&self, model: &mut PolicyModel) -> Result<(), AdapterError> {
        self.ctx.run(self.inner.load_policy(model)).await
    }

    async fn load_filtered_policy(
        &self,
        model: &mut PolicyModel,
        filter: &BatchFilter,
    ) -> Result<(), AdapterError> {
        self.ctx
            .run(self.inner.load_filtered_policy(model, filter))
            .await
    }

    fn is_filtered(&self) -> bool {
        self.inner.is_filtered()
    }

    async fn save_policy(&self, model: &PolicyModel) -> Result<(), AdapterError> {
        self.ctx.run(self.inner.save_policy(model)).await
    }

    async fn add_policy(
        &self,
        sec: &str,
        ptype: &str,
        rule: &[String],
    ) -> Result<bool, AdapterError> {
        self.ctx.run(self.inner.add_policy(sec, ptype, rule)).await
    }

    async fn add_policies(
        &self,
        sec: &str,
        ptype: &str,
        rules: &[Vec<String>],
    ) -> Result<bool, AdapterError> {
        self.ctx.run(self.inner.add_policies(sec, ptype, rules)).await
    }

    async fn remove_policy(
        &self,
        sec: &str,
        ptype: &str,
        rule: &[String],
    ) -> Result<bool, AdapterError> {
        self.ctx.run(self.inner.remove_policy(sec, ptype, rule)).await
    }

    async fn remove_policies(
        &self,
        sec: &str,
        ptype: &str,
        rules: &[Vec<String>],
    ) -> Result<bool, AdapterError> {
        self.ctx
            .run(self.inner.remove_policies(sec, ptype, rules))
            .await
    }

    async fn remove_filtered_policy(
        &self,
        sec: &str,
        ptype: &str,
        field_index: usize,
        field_values: &[String],
    ) -> Result<bool, AdapterError> {
        self.ctx
            .run(
                self.inner
                    .remove_filtered_policy(sec, ptype, field_index, field_values),
            )
            .await
    }

    async fn update_policy(
        &self,
        sec: &str,
        ptype: &str,
        old_rule: &[String],
        new_rule: &[String],
    ) -> Result<bool, AdapterError> {
        self.ctx
            .run(self.inner.update_policy(sec, ptype, old_rule, new_rule))
            .await
    }

    async fn update_policies(
        &self,
        sec: &str,
        ptype: &str,
        old_rules: &[Vec<String>],
        new_rules: &[Vec<String>],
    ) -> Result<bool, AdapterError> {
        self.ctx
            .run(self.inner.update_policies(sec, ptype, old_rules, new_rules))
            .await
    }

    async fn update_filtered_policies(
        &self,
        sec: &str,
        ptype: &str,
        new_rules: &[Vec<String>],
        field_index: usize,
        field_values: &[String],
    ) -> Result<Vec<Vec<String>>, AdapterError> {
        self.ctx
            .run(self.inner.update_filtered_policies(
                sec,
                ptype,
                new_rules,
                field_index,
                field_values,
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
