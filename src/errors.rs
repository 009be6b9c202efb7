use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AdapterError {
    #[error("Config error: {0}")]
    #[diagnostic(code(policy_adapter::config))]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(policy_adapter::serde))]
    Serde(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    #[diagnostic(code(policy_adapter::db))]
    Db(#[from] sea_orm::DbErr),

    #[error("rule for `{ptype}` has {len} values but only {max} slots are available")]
    #[diagnostic(
        code(policy_adapter::rule_too_long),
        help("The rule table stores a fixed number of value slots per rule")
    )]
    RuleTooLong {
        ptype: String,
        len: usize,
        max: usize,
    },

    #[error("field index {field_index} with {len} values runs past slot {max}")]
    #[diagnostic(code(policy_adapter::field_out_of_range))]
    FieldOutOfRange {
        field_index: usize,
        len: usize,
        max: usize,
    },

    #[error("unsupported filter type: {0}")]
    #[diagnostic(
        code(policy_adapter::unsupported_filter),
        help("A filter is a JSON object of column -> [values], or an array of such objects")
    )]
    UnsupportedFilter(String),

    #[error("the query field cannot all be empty string (\"\"), please check")]
    #[diagnostic(
        code(policy_adapter::empty_field_values),
        help("Supply at least one non-empty field value to remove a filtered set of rules")
    )]
    EmptyFieldValues,

    #[error("expected adapter of type Adapter, got {0}")]
    #[diagnostic(code(policy_adapter::unexpected_adapter))]
    UnexpectedAdapter(String),

    #[error("transaction already finished")]
    #[diagnostic(code(policy_adapter::transaction_finished))]
    TransactionFinished,

    #[error("context canceled")]
    #[diagnostic(code(policy_adapter::cancelled))]
    Cancelled,

    #[error("context deadline exceeded")]
    #[diagnostic(code(policy_adapter::deadline_exceeded))]
    DeadlineExceeded,

    #[error("unknown policy type `{ptype}` in section `{sec}`")]
    #[diagnostic(
        code(policy_adapter::unknown_policy_type),
        help("Register the policy type on the model before loading or adding rules for it")
    )]
    UnknownPolicyType { sec: String, ptype: String },

    #[error("invalid policy line: {0}")]
    #[diagnostic(code(policy_adapter::invalid_policy_line))]
    InvalidPolicyLine(String),

    #[error("update needs as many new rules as old ones ({old} old, {new} new)")]
    #[diagnostic(code(policy_adapter::mismatched_update))]
    MismatchedUpdate { old: usize, new: usize },

    #[error("cannot save a filtered policy")]
    #[diagnostic(
        code(policy_adapter::filtered_save),
        help("Load the full policy before saving, or mutate rules individually")
    )]
    FilteredSave,

    #[error("{0}")]
    #[diagnostic(code(policy_adapter::other))]
    Other(String),
}

impl AdapterError {
    /// True for the two ways a `Context` can end an operation early.
    pub fn is_context_error(&self) -> bool {
        matches!(self, AdapterError::Cancelled | AdapterError::DeadlineExceeded)
    }
}
