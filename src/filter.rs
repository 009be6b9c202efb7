use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, Condition, QueryFilter};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entities::casbin_rule::Column;
use crate::errors::AdapterError;

/// Per-column sets of acceptable values. An empty set leaves its column
/// unconstrained; the non-empty ones are combined with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Filter {
    pub ptype: Vec<String>,
    pub v0: Vec<String>,
    pub v1: Vec<String>,
    pub v2: Vec<String>,
    pub v3: Vec<String>,
    pub v4: Vec<String>,
    pub v5: Vec<String>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ptype<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ptype = values.into_iter().map(Into::into).collect();
        self
    }

    /// Constrain value slot `index` (`0` is `v0`). An index past the last
    /// slot is `UnsupportedFilter`.
    pub fn with_field<I, S>(mut self, index: usize, values: I) -> Result<Self, AdapterError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let slot = match index {
            0 => &mut self.v0,
            1 => &mut self.v1,
            2 => &mut self.v2,
            3 => &mut self.v3,
            4 => &mut self.v4,
            5 => &mut self.v5,
            _ => return Err(AdapterError::UnsupportedFilter(format!("field v{index}"))),
        };
        *slot = values.into_iter().map(Into::into).collect();
        Ok(self)
    }

    fn columns(&self) -> [(Column, &[String]); 7] {
        [
            (Column::Ptype, self.ptype.as_slice()),
            (Column::V0, self.v0.as_slice()),
            (Column::V1, self.v1.as_slice()),
            (Column::V2, self.v2.as_slice()),
            (Column::V3, self.v3.as_slice()),
            (Column::V4, self.v4.as_slice()),
            (Column::V5, self.v5.as_slice()),
        ]
    }

    /// True when no column is constrained.
    pub fn is_empty(&self) -> bool {
        self.columns().iter().all(|(_, values)| values.is_empty())
    }

    /// `column IN (...)` for every constrained column, joined with AND.
    pub fn condition(&self) -> Condition {
        self.columns()
            .into_iter()
            .filter(|(_, values)| !values.is_empty())
            .fold(Condition::all(), |cond, (column, values)| {
                cond.add(column.is_in(values.iter().map(String::as_str)))
            })
    }
}

/// Ordered list of filters. Each filter runs as its own query and the
/// results are concatenated in list order; a row matched by several filters
/// is returned once per match unless `distinct` is requested.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchFilter {
    filters: Vec<Filter>,
    distinct: bool,
}

impl BatchFilter {
    pub fn new(filters: Vec<Filter>) -> Self {
        Self {
            filters,
            distinct: false,
        }
    }

    /// Drop rows an earlier filter in the batch already returned.
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn push(&mut self, filter: Filter) {
        self.filters.push(filter);
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl From<Filter> for BatchFilter {
    fn from(filter: Filter) -> Self {
        Self::new(vec![filter])
    }
}

impl From<&Filter> for BatchFilter {
    fn from(filter: &Filter) -> Self {
        Self::new(vec![filter.clone()])
    }
}

impl From<Vec<Filter>> for BatchFilter {
    fn from(filters: Vec<Filter>) -> Self {
        Self::new(filters)
    }
}

impl FromIterator<Filter> for BatchFilter {
    fn from_iter<T: IntoIterator<Item = Filter>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl BatchFilter {
    /// Parse the JSON text form accepted by `TryFrom<Value>`.
    pub fn from_json(raw: &str) -> Result<Self, AdapterError> {
        let value: Value = serde_json::from_str(raw)?;
        Self::try_from(value)
    }
}

/// Accepts a single filter object or an array of filter objects.
impl TryFrom<Value> for BatchFilter {
    type Error = AdapterError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(_) => Ok(serde_json::from_value::<Filter>(value)
                .map_err(|e| AdapterError::UnsupportedFilter(e.to_string()))?
                .into()),
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(_) => serde_json::from_value::<Filter>(item)
                        .map_err(|e| AdapterError::UnsupportedFilter(e.to_string())),
                    other => Err(AdapterError::UnsupportedFilter(json_kind(&other).into())),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(BatchFilter::new),
            other => Err(AdapterError::UnsupportedFilter(json_kind(&other).into())),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// How `conditions_to_query` joins its conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CombineType {
    #[default]
    Or,
    And,
}

/// Fold raw SQL boolean conditions into `query`, joined with OR or AND.
///
/// The conditions are opaque here: they are spliced into the WHERE clause
/// verbatim, so they must come from a trusted source such as the policy
/// engine's allowed-object conditions. An empty list leaves the query as is.
pub fn conditions_to_query<Q, S>(query: Q, conditions: &[S], combine: CombineType) -> Q
where
    Q: QueryFilter,
    S: AsRef<str>,
{
    if conditions.is_empty() {
        return query;
    }

    let base = match combine {
        CombineType::Or => Condition::any(),
        CombineType::And => Condition::all(),
    };
    let condition = conditions
        .iter()
        .fold(base, |cond, raw| cond.add(Expr::cust(raw.as_ref().to_string())));

    query.filter(condition)
}
