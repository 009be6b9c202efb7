use tracing::debug;

use crate::adapter::PolicyAdapter;
use crate::errors::AdapterError;
use crate::filter::BatchFilter;
use crate::model::PolicyModel;

/// Holds a policy model and keeps it in step with an adapter.
///
/// Mutations are skipped when the model already agrees; otherwise they go to
/// the adapter first and reach the model only once storage accepted them.
/// Request evaluation is left to the caller.
pub struct Enforcer {
    model: PolicyModel,
    adapter: Option<Box<dyn PolicyAdapter>>,
}

fn to_rule<I, S>(rule: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    rule.into_iter().map(Into::into).collect()
}

fn to_rules<R, I, S>(rules: R) -> Vec<Vec<String>>
where
    R: IntoIterator<Item = I>,
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    rules.into_iter().map(to_rule).collect()
}

impl Enforcer {
    /// Build an enforcer and load the stored policy, unless the adapter is
    /// filtered.
    pub async fn new<A: PolicyAdapter>(model: PolicyModel, adapter: A) -> Result<Self, AdapterError> {
        let mut enforcer = Self::from_parts(model, Box::new(adapter));
        if !enforcer.is_filtered() {
            enforcer.load_policy().await?;
        }
        Ok(enforcer)
    }

    pub fn without_adapter(model: PolicyModel) -> Self {
        Self {
            model,
            adapter: None,
        }
    }

    /// Pair a model and adapter as they are, without loading.
    pub(crate) fn from_parts(model: PolicyModel, adapter: Box<dyn PolicyAdapter>) -> Self {
        Self {
            model,
            adapter: Some(adapter),
        }
    }

    pub fn model(&self) -> &PolicyModel {
        &self.model
    }

    pub fn adapter(&self) -> Option<&dyn PolicyAdapter> {
        self.adapter.as_deref()
    }

    pub fn set_adapter<A: PolicyAdapter>(&mut self, adapter: A) {
        self.adapter = Some(Box::new(adapter));
    }

    pub(crate) fn take_adapter(&mut self) -> Option<Box<dyn PolicyAdapter>> {
        self.adapter.take()
    }

    pub fn is_filtered(&self) -> bool {
        self.adapter.as_ref().is_some_and(|a| a.is_filtered())
    }

    /// Reload from the adapter. The current model is replaced only when the
    /// load succeeds.
    pub async fn load_policy(&mut self) -> Result<(), AdapterError> {
        let Some(adapter) = &self.adapter else {
            return Ok(());
        };
        let mut fresh = self.model.clone();
        fresh.clear_policy();
        adapter.load_policy(&mut fresh).await?;
        self.model = fresh;
        Ok(())
    }

    pub async fn load_filtered_policy(
        &mut self,
        filter: impl Into<BatchFilter>,
    ) -> Result<(), AdapterError> {
        let Some(adapter) = &self.adapter else {
            return Ok(());
        };
        let filter = filter.into();
        let mut fresh = self.model.clone();
        fresh.clear_policy();
        adapter.load_filtered_policy(&mut fresh, &filter).await?;
        self.model = fresh;
        Ok(())
    }

    pub async fn save_policy(&self) -> Result<(), AdapterError> {
        if self.is_filtered() {
            return Err(AdapterError::FilteredSave);
        }
        if let Some(adapter) = &self.adapter {
            adapter.save_policy(&self.model).await?;
        }
        Ok(())
    }

    /// Drop every rule from the model. Storage is untouched until the next
    /// save.
    pub fn clear_policy(&mut self) {
        self.model.clear_policy();
    }

    // ============================================================================
    // Queries
    // ============================================================================

    pub fn get_policy(&self) -> &[Vec<String>] {
        self.get_named_policy("p")
    }

    pub fn get_named_policy(&self, ptype: &str) -> &[Vec<String>] {
        self.model.get_policy("p", ptype).unwrap_or_default()
    }

    pub fn get_grouping_policy(&self) -> &[Vec<String>] {
        self.get_named_grouping_policy("g")
    }

    pub fn get_named_grouping_policy(&self, ptype: &str) -> &[Vec<String>] {
        self.model.get_policy("g", ptype).unwrap_or_default()
    }

    pub fn has_policy<I, S>(&self, rule: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.has_named_policy("p", rule)
    }

    pub fn has_named_policy<I, S>(&self, ptype: &str, rule: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.model
            .has_policy("p", ptype, &to_rule(rule))
            .unwrap_or(false)
    }

    pub fn has_grouping_policy<I, S>(&self, rule: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.has_named_grouping_policy("g", rule)
    }

    pub fn has_named_grouping_policy<I, S>(&self, ptype: &str, rule: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.model
            .has_policy("g", ptype, &to_rule(rule))
            .unwrap_or(false)
    }

    // ============================================================================
    // Mutations
    // ============================================================================

    pub async fn add_policy<I, S>(&mut self, rule: I) -> Result<bool, AdapterError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_rules("p", "p", vec![to_rule(rule)]).await
    }

    pub async fn add_named_policy<I, S>(&mut self, ptype: &str, rule: I) -> Result<bool, AdapterError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_rules("p", ptype, vec![to_rule(rule)]).await
    }

    pub async fn add_policies<R, I, S>(&mut self, rules: R) -> Result<bool, AdapterError>
    where
        R: IntoIterator<Item = I>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_rules("p", "p", to_rules(rules)).await
    }

    pub async fn add_grouping_policy<I, S>(&mut self, rule: I) -> Result<bool, AdapterError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_rules("g", "g", vec![to_rule(rule)]).await
    }

    pub async fn add_named_grouping_policy<I, S>(
        &mut self,
        ptype: &str,
        rule: I,
    ) -> Result<bool, AdapterError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_rules("g", ptype, vec![to_rule(rule)]).await
    }

    pub async fn remove_policy<I, S>(&mut self, rule: I) -> Result<bool, AdapterError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.remove_rules("p", "p", vec![to_rule(rule)]).await
    }

    pub async fn remove_named_policy<I, S>(
        &mut self,
        ptype: &str,
        rule: I,
    ) -> Result<bool, AdapterError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.remove_rules("p", ptype, vec![to_rule(rule)]).await
    }

    pub async fn remove_policies<R, I, S>(&mut self, rules: R) -> Result<bool, AdapterError>
    where
        R: IntoIterator<Item = I>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.remove_rules("p", "p", to_rules(rules)).await
    }

    pub async fn remove_grouping_policy<I, S>(&mut self, rule: I) -> Result<bool, AdapterError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.remove_rules("g", "g", vec![to_rule(rule)]).await
    }

    pub async fn remove_filtered_policy<I, S>(
        &mut self,
        field_index: usize,
        field_values: I,
    ) -> Result<bool, AdapterError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.remove_filtered_rules("p", "p", field_index, to_rule(field_values))
            .await
    }

    pub async fn remove_filtered_named_policy<I, S>(
        &mut self,
        ptype: &str,
        field_index: usize,
        field_values: I,
    ) -> Result<bool, AdapterError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.remove_filtered_rules("p", ptype, field_index, to_rule(field_values))
            .await
    }

    pub async fn remove_filtered_grouping_policy<I, S>(
        &mut self,
        field_index: usize,
        field_values: I,
    ) -> Result<bool, AdapterError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.remove_filtered_rules("g", "g", field_index, to_rule(field_values))
            .await
    }

    pub async fn update_policy<I, J, S, T>(&mut self, old: I, new: J) -> Result<bool, AdapterError>
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        self.update_rules("p", "p", vec![to_rule(old)], vec![to_rule(new)])
            .await
    }

    pub async fn update_grouping_policy<I, J, S, T>(
        &mut self,
        old: I,
        new: J,
    ) -> Result<bool, AdapterError>
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        self.update_rules("g", "g", vec![to_rule(old)], vec![to_rule(new)])
            .await
    }

    pub async fn update_policies<R, Q, I, J, S, T>(
        &mut self,
        old: R,
        new: Q,
    ) -> Result<bool, AdapterError>
    where
        R: IntoIterator<Item = I>,
        Q: IntoIterator<Item = J>,
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        self.update_rules("p", "p", to_rules(old), to_rules(new))
            .await
    }

    /// Replace the `p` rules matching the field pattern with `new_rules`.
    /// Returns the rules that were replaced.
    pub async fn update_filtered_policies<R, I, S, F, V>(
        &mut self,
        new_rules: R,
        field_index: usize,
        field_values: F,
    ) -> Result<Vec<Vec<String>>, AdapterError>
    where
        R: IntoIterator<Item = I>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let new_rules = to_rules(new_rules);
        let field_values = to_rule(field_values);

        let old_rules = match &self.adapter {
            Some(adapter) => {
                adapter
                    .update_filtered_policies("p", "p", &new_rules, field_index, &field_values)
                    .await?
            }
            None => Vec::new(),
        };

        let removed = self
            .model
            .remove_filtered_policy("p", "p", field_index, &field_values)?;
        for rule in new_rules {
            self.model.add_policy("p", "p", rule)?;
        }

        Ok(if self.adapter.is_some() { old_rules } else { removed })
    }

    async fn add_rules(
        &mut self,
        sec: &str,
        ptype: &str,
        rules: Vec<Vec<String>>,
    ) -> Result<bool, AdapterError> {
        for rule in &rules {
            if self.model.has_policy(sec, ptype, rule)? {
                return Ok(false);
            }
        }

        if let Some(adapter) = &self.adapter {
            match rules.as_slice() {
                [rule] => adapter.add_policy(sec, ptype, rule).await?,
                _ => adapter.add_policies(sec, ptype, &rules).await?,
            };
        }

        debug!(sec, ptype, count = rules.len(), "added rules");
        self.model.add_policies(sec, ptype, rules)
    }

    async fn remove_rules(
        &mut self,
        sec: &str,
        ptype: &str,
        rules: Vec<Vec<String>>,
    ) -> Result<bool, AdapterError> {
        for rule in &rules {
            if !self.model.has_policy(sec, ptype, rule)? {
                return Ok(false);
            }
        }

        if let Some(adapter) = &self.adapter {
            match rules.as_slice() {
                [rule] => adapter.remove_policy(sec, ptype, rule).await?,
                _ => adapter.remove_policies(sec, ptype, &rules).await?,
            };
        }

        debug!(sec, ptype, count = rules.len(), "removed rules");
        self.model.remove_policies(sec, ptype, &rules)
    }

    async fn remove_filtered_rules(
        &mut self,
        sec: &str,
        ptype: &str,
        field_index: usize,
        field_values: Vec<String>,
    ) -> Result<bool, AdapterError> {
        if let Some(adapter) = &self.adapter {
            adapter
                .remove_filtered_policy(sec, ptype, field_index, &field_values)
                .await?;
        }

        let removed = self
            .model
            .remove_filtered_policy(sec, ptype, field_index, &field_values)?;
        Ok(!removed.is_empty())
    }

    async fn update_rules(
        &mut self,
        sec: &str,
        ptype: &str,
        old: Vec<Vec<String>>,
        new: Vec<Vec<String>>,
    ) -> Result<bool, AdapterError> {
        if old.len() != new.len() {
            return Err(AdapterError::MismatchedUpdate {
                old: old.len(),
                new: new.len(),
            });
        }
        for (old_rule, new_rule) in old.iter().zip(&new) {
            if !self.model.has_policy(sec, ptype, old_rule)?
                || self.model.has_policy(sec, ptype, new_rule)?
            {
                return Ok(false);
            }
        }

        if let Some(adapter) = &self.adapter {
            match (old.as_slice(), new.as_slice()) {
                ([old_rule], [new_rule]) => {
                    adapter.update_policy(sec, ptype, old_rule, new_rule).await?
                }
                _ => adapter.update_policies(sec, ptype, &old, &new).await?,
            };
        }

        for (old_rule, new_rule) in old.iter().zip(new) {
            self.model.update_policy(sec, ptype, old_rule, new_rule)?;
        }
        Ok(true)
    }
}
