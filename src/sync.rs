use sea_orm::{Condition, ConnectionTrait, TransactionTrait};
use tracing::info;

use crate::codec::RuleRow;
use crate::errors::AdapterError;
use crate::filter::BatchFilter;
use crate::model::PolicyModel;
use crate::storage;

/// Sections written by `save_policy`, in write order.
const SAVED_SECTIONS: [&str; 2] = ["p", "g"];

/// Load every stored rule into `model`. Returns how many rules were new to it.
pub async fn load_policy<C: ConnectionTrait>(
    db: &C,
    model: &mut PolicyModel,
) -> Result<usize, AdapterError> {
    let rows = storage::find_rules(db, Condition::all()).await?;
    let lines: Vec<Vec<String>> = rows.iter().map(RuleRow::decode).collect();
    let added = model.load_policy_lines(&lines)?;

    info!(rows = rows.len(), added, "loaded policy");
    Ok(added)
}

/// Load only the rules selected by `filter`.
pub async fn load_filtered_policy<C: ConnectionTrait>(
    db: &C,
    model: &mut PolicyModel,
    filter: &BatchFilter,
) -> Result<usize, AdapterError> {
    let rows = storage::find_filtered_rules(db, filter).await?;
    let lines: Vec<Vec<String>> = rows.iter().map(RuleRow::decode).collect();
    let added = model.load_policy_lines(&lines)?;

    info!(
        filters = filter.len(),
        rows = rows.len(),
        added,
        "loaded filtered policy"
    );
    Ok(added)
}

/// Replace the stored rules with the `p` and `g` sections of `model`, as one
/// unit of work.
pub async fn save_policy<C>(
    db: &C,
    model: &PolicyModel,
    batch_size: usize,
) -> Result<u64, AdapterError>
where
    C: ConnectionTrait + TransactionTrait,
{
    let mut rows = Vec::with_capacity(model.policy_count());
    for sec in SAVED_SECTIONS {
        for (ptype, rules) in model.section(sec) {
            for rule in rules {
                rows.push(RuleRow::encode(ptype, rule)?);
            }
        }
    }

    let txn = db.begin().await?;
    storage::clear_rules(&txn).await?;
    let inserted = storage::insert_rules(&txn, rows, batch_size).await?;
    txn.commit().await?;

    info!(inserted, "saved policy");
    Ok(inserted)
}
