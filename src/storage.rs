use std::collections::HashSet;

use crate::codec::RuleRow;
use crate::entities::casbin_rule::{self, Column, Entity, UNIQUE_COLUMNS, VALUE_COLUMNS};
use crate::errors::AdapterError;
use crate::filter::BatchFilter;
use crate::settings::Database as DbCfg;
use migration::MigratorTrait;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    Condition, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    TransactionTrait,
};
use tracing::debug;

/// Connect to `cfg.url` with a pool of `cfg.max_connections`.
///
/// With `auto_migrate` the schema is migrated over a single connection first
/// and the full pool is opened afterwards, so every pooled connection sees
/// the unique index.
pub async fn init(cfg: &DbCfg) -> Result<DatabaseConnection, AdapterError> {
    let max_connections = cfg.max_connections.max(1);
    if !cfg.auto_migrate {
        return Ok(Database::connect(connect_options(&cfg.url, max_connections)).await?);
    }

    let db = Database::connect(connect_options(&cfg.url, 1)).await?;
    migrate(&db).await?;
    if max_connections == 1 {
        return Ok(db);
    }
    db.close().await?;

    debug!(max_connections, "reopening pool after migration");
    Ok(Database::connect(connect_options(&cfg.url, max_connections)).await?)
}

pub fn connect_options(url: &str, max_connections: u32) -> ConnectOptions {
    let mut opts = ConnectOptions::new(url);
    opts.max_connections(max_connections);
    opts
}

pub async fn migrate(db: &DatabaseConnection) -> Result<(), AdapterError> {
    migration::Migrator::up(db, None).await?;
    Ok(())
}

// ============================================================================
// Row primitives
// ============================================================================

/// Insert rows in chunks of `batch_size`, silently skipping rows that already
/// exist. Returns how many rows were actually written.
pub async fn insert_rules<C: ConnectionTrait>(
    db: &C,
    rows: Vec<RuleRow>,
    batch_size: usize,
) -> Result<u64, AdapterError> {
    if rows.is_empty() {
        return Ok(0);
    }

    let mut inserted = 0;
    let mut rows = rows.into_iter().peekable();
    while rows.peek().is_some() {
        let chunk: Vec<casbin_rule::ActiveModel> = rows
            .by_ref()
            .take(batch_size.max(1))
            .map(RuleRow::into_active_model)
            .collect();

        inserted += Entity::insert_many(chunk)
            .on_conflict(OnConflict::columns(UNIQUE_COLUMNS).do_nothing().to_owned())
            .exec_without_returning(db)
            .await?;
    }

    debug!(inserted, "inserted rule rows");
    Ok(inserted)
}

/// Rows matching `condition`, ordered by row identity.
pub async fn find_rules<C: ConnectionTrait>(
    db: &C,
    condition: Condition,
) -> Result<Vec<RuleRow>, AdapterError> {
    Ok(find_models(db, condition)
        .await?
        .into_iter()
        .map(RuleRow::from)
        .collect())
}

async fn find_models<C: ConnectionTrait>(
    db: &C,
    condition: Condition,
) -> Result<Vec<casbin_rule::Model>, AdapterError> {
    let models = Entity::find()
        .filter(condition)
        .order_by_asc(Column::Id)
        .all(db)
        .await?;
    Ok(models)
}

/// Run every filter of the batch in order and concatenate the results. A row
/// matched by several filters comes back once per match unless the batch is
/// marked distinct.
pub async fn find_filtered_rules<C: ConnectionTrait>(
    db: &C,
    batch: &BatchFilter,
) -> Result<Vec<RuleRow>, AdapterError> {
    let mut seen = HashSet::new();
    let mut rows = Vec::new();

    for filter in batch.filters() {
        for model in find_models(db, filter.condition()).await? {
            if batch.is_distinct() && !seen.insert(model.id) {
                continue;
            }
            rows.push(RuleRow::from(model));
        }
    }

    debug!(filters = batch.len(), rows = rows.len(), "filtered rule lookup");
    Ok(rows)
}

pub async fn delete_rules<C: ConnectionTrait>(
    db: &C,
    condition: Condition,
) -> Result<u64, AdapterError> {
    let result = Entity::delete_many().filter(condition).exec(db).await?;
    Ok(result.rows_affected)
}

pub async fn clear_rules<C: ConnectionTrait>(db: &C) -> Result<u64, AdapterError> {
    let result = Entity::delete_many().exec(db).await?;
    debug!(deleted = result.rows_affected, "cleared rule table");
    Ok(result.rows_affected)
}

/// Overwrite every column of the row exactly matching `old`, empty slots
/// included.
pub async fn update_rule<C: ConnectionTrait>(
    db: &C,
    old: &RuleRow,
    new: &RuleRow,
) -> Result<u64, AdapterError> {
    let update = VALUE_COLUMNS.iter().zip(&new.values).fold(
        Entity::update_many().col_expr(Column::Ptype, Expr::value(new.ptype.clone())),
        |update, (column, value)| update.col_expr(*column, Expr::value(value.clone())),
    );

    let result = update.filter(old.exact_condition()).exec(db).await?;
    Ok(result.rows_affected)
}

// ============================================================================
// Rule operations
// ============================================================================

fn encode_all(ptype: &str, rules: &[Vec<String>]) -> Result<Vec<RuleRow>, AdapterError> {
    rules.iter().map(|rule| RuleRow::encode(ptype, rule)).collect()
}

/// Insert `rules` as one unit of work. Returns true when at least one row
/// was new.
pub async fn add_rules<C>(
    db: &C,
    ptype: &str,
    rules: &[Vec<String>],
    batch_size: usize,
) -> Result<bool, AdapterError>
where
    C: ConnectionTrait + TransactionTrait,
{
    let rows = encode_all(ptype, rules)?;
    let txn = db.begin().await?;
    let inserted = insert_rules(&txn, rows, batch_size).await?;
    txn.commit().await?;
    Ok(inserted > 0)
}

/// Delete the rows exactly matching `rules` as one unit of work.
pub async fn remove_rules<C>(db: &C, ptype: &str, rules: &[Vec<String>]) -> Result<bool, AdapterError>
where
    C: ConnectionTrait + TransactionTrait,
{
    let rows = encode_all(ptype, rules)?;
    let txn = db.begin().await?;
    let mut deleted = 0;
    for row in &rows {
        deleted += delete_rules(&txn, row.exact_condition()).await?;
    }
    txn.commit().await?;
    Ok(deleted > 0)
}

/// Fails with `EmptyFieldValues` when no value is non-empty, since the
/// pattern would then match every row of the ptype.
fn filtered_pattern(
    ptype: &str,
    field_index: usize,
    field_values: &[String],
) -> Result<RuleRow, AdapterError> {
    if field_values.iter().all(|value| value.is_empty()) {
        return Err(AdapterError::EmptyFieldValues);
    }
    RuleRow::encode_at(ptype, field_index, field_values)
}

pub async fn remove_filtered_rules<C: ConnectionTrait>(
    db: &C,
    ptype: &str,
    field_index: usize,
    field_values: &[String],
) -> Result<bool, AdapterError> {
    let pattern = filtered_pattern(ptype, field_index, field_values)?;
    let deleted = delete_rules(db, pattern.pattern_condition()).await?;
    debug!(ptype, field_index, deleted, "removed filtered rules");
    Ok(deleted > 0)
}

/// Replace each `old[i]` with `new[i]` as one unit of work.
pub async fn update_rules<C>(
    db: &C,
    ptype: &str,
    old: &[Vec<String>],
    new: &[Vec<String>],
) -> Result<bool, AdapterError>
where
    C: ConnectionTrait + TransactionTrait,
{
    if old.len() != new.len() {
        return Err(AdapterError::MismatchedUpdate {
            old: old.len(),
            new: new.len(),
        });
    }

    let old_rows = encode_all(ptype, old)?;
    let new_rows = encode_all(ptype, new)?;

    let txn = db.begin().await?;
    let mut updated = 0;
    for (old_row, new_row) in old_rows.iter().zip(&new_rows) {
        updated += update_rule(&txn, old_row, new_row).await?;
    }
    txn.commit().await?;
    Ok(updated > 0)
}

/// Delete every rule matching the field pattern and insert `new_rules` in its
/// place, as one unit of work. Returns the deleted rules' value slots.
pub async fn update_filtered_rules<C>(
    db: &C,
    ptype: &str,
    new_rules: &[Vec<String>],
    field_index: usize,
    field_values: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<String>>, AdapterError>
where
    C: ConnectionTrait + TransactionTrait,
{
    let pattern = filtered_pattern(ptype, field_index, field_values)?;
    let new_rows = encode_all(ptype, new_rules)?;

    let txn = db.begin().await?;
    let old_rows = find_rules(&txn, pattern.pattern_condition()).await?;
    delete_rules(&txn, pattern.pattern_condition()).await?;
    insert_rules(&txn, new_rows, batch_size).await?;
    txn.commit().await?;

    Ok(old_rows.iter().map(|row| row.rule().to_vec()).collect())
}
