use sea_orm::{
    ActiveValue::{NotSet, Set},
    ColumnTrait, Condition,
};

use crate::entities::casbin_rule::{self, Column, VALUE_COLUMNS};
use crate::errors::AdapterError;

/// Number of value slots in a rule row.
pub const MAX_FIELDS: usize = VALUE_COLUMNS.len();

/// Fixed-width encoding of a policy rule: a ptype plus `MAX_FIELDS` value
/// slots, where the empty string marks an unused slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RuleRow {
    pub ptype: String,
    pub values: [String; MAX_FIELDS],
}

impl RuleRow {
    /// Place `rule[i]` into slot `i`. Values are taken as-is, including empty
    /// ones; only the number of values is checked.
    pub fn encode<S: AsRef<str>>(ptype: &str, rule: &[S]) -> Result<Self, AdapterError> {
        if rule.len() > MAX_FIELDS {
            return Err(AdapterError::RuleTooLong {
                ptype: ptype.to_string(),
                len: rule.len(),
                max: MAX_FIELDS,
            });
        }

        let mut values: [String; MAX_FIELDS] = Default::default();
        for (slot, value) in values.iter_mut().zip(rule) {
            *slot = value.as_ref().to_string();
        }

        Ok(Self {
            ptype: ptype.to_string(),
            values,
        })
    }

    /// Encode a partial rule whose first value sits at `field_index`, as used
    /// by the filtered remove/update operations.
    pub fn encode_at<S: AsRef<str>>(
        ptype: &str,
        field_index: usize,
        field_values: &[S],
    ) -> Result<Self, AdapterError> {
        let in_range = field_index
            .checked_add(field_values.len())
            .is_some_and(|end| end <= MAX_FIELDS);
        if !in_range {
            return Err(AdapterError::FieldOutOfRange {
                field_index,
                len: field_values.len(),
                max: MAX_FIELDS - 1,
            });
        }

        let mut row = Self {
            ptype: ptype.to_string(),
            ..Default::default()
        };
        for (offset, value) in field_values.iter().enumerate() {
            row.values[field_index + offset] = value.as_ref().to_string();
        }
        Ok(row)
    }

    /// The value slots up to and including the last non-empty one. Empty
    /// slots before that point are kept as positional placeholders.
    pub fn rule(&self) -> &[String] {
        let len = self
            .values
            .iter()
            .rposition(|v| !v.is_empty())
            .map_or(0, |last| last + 1);
        &self.values[..len]
    }

    /// `[ptype, v0, .., vm]` with the trailing run of unused slots dropped.
    pub fn decode(&self) -> Vec<String> {
        let rule = self.rule();
        let mut line = Vec::with_capacity(rule.len() + 1);
        line.push(self.ptype.clone());
        line.extend(rule.iter().cloned());
        line
    }

    /// Matches exactly this row, unused slots included.
    pub fn exact_condition(&self) -> Condition {
        VALUE_COLUMNS.iter().zip(&self.values).fold(
            Condition::all().add(Column::Ptype.eq(self.ptype.as_str())),
            |cond, (column, value)| cond.add(column.eq(value.as_str())),
        )
    }

    /// Matches the ptype and every non-empty slot; empty slots match anything.
    pub fn pattern_condition(&self) -> Condition {
        VALUE_COLUMNS
            .iter()
            .zip(&self.values)
            .filter(|(_, value)| !value.is_empty())
            .fold(
                Condition::all().add(Column::Ptype.eq(self.ptype.as_str())),
                |cond, (column, value)| cond.add(column.eq(value.as_str())),
            )
    }

    pub(crate) fn into_active_model(self) -> casbin_rule::ActiveModel {
        let [v0, v1, v2, v3, v4, v5] = self.values;
        casbin_rule::ActiveModel {
            id: NotSet,
            ptype: Set(self.ptype),
            v0: Set(v0),
            v1: Set(v1),
            v2: Set(v2),
            v3: Set(v3),
            v4: Set(v4),
            v5: Set(v5),
        }
    }
}

impl From<casbin_rule::Model> for RuleRow {
    fn from(model: casbin_rule::Model) -> Self {
        Self {
            ptype: model.ptype,
            values: [model.v0, model.v1, model.v2, model.v3, model.v4, model.v5],
        }
    }
}
