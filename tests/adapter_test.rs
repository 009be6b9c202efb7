mod helpers;

use helpers::{rule, seed_rbac_policy, stored_rules, PolicyBuilder, TestDb};
use policy_adapter::{
    conditions_to_query, AdapterError, BatchFilter, CombineType, Context, ContextAdapter,
    Enforcer, Filter, PolicyAdapter, PolicyModel,
};
use sea_orm::{EntityTrait, QueryTrait};
use serde_json::json;
use std::time::Duration;

// ============================================================================
// Load / Save
// ============================================================================

#[tokio::test]
async fn test_enforcer_loads_stored_policy() {
    let test_db = TestDb::new().await;
    seed_rbac_policy(test_db.connection()).await;

    let e = Enforcer::new(PolicyModel::rbac(), test_db.adapter())
        .await
        .expect("Failed to create enforcer");

    assert_eq!(e.get_policy().len(), 4);
    assert!(e.has_policy(["alice", "data1", "read"]));
    assert!(e.has_grouping_policy(["alice", "data2_admin"]));
    assert!(!e.is_filtered());
}

#[tokio::test]
async fn test_save_policy_replaces_table() {
    let test_db = TestDb::new().await;
    seed_rbac_policy(test_db.connection()).await;

    let mut e = Enforcer::without_adapter(PolicyModel::rbac());
    e.add_policy(["carol", "data3", "read"]).await.unwrap();
    e.add_grouping_policy(["carol", "admin"]).await.unwrap();
    e.set_adapter(test_db.adapter());
    e.save_policy().await.expect("Failed to save policy");

    assert_eq!(
        stored_rules(test_db.connection()).await,
        vec![
            rule(&["p", "carol", "data3", "read"]),
            rule(&["g", "carol", "admin"]),
        ]
    );
}

#[tokio::test]
async fn test_save_policy_in_small_batches() {
    let test_db = TestDb::new().await;
    let adapter = test_db.adapter().with_batch_size(2);

    let mut model = PolicyModel::rbac();
    for i in 0..5 {
        model
            .add_policy("p", "p", rule(&[&format!("user{i}"), "data", "read"]))
            .unwrap();
    }
    adapter.save_policy(&model).await.expect("Failed to save policy");

    let mut loaded = PolicyModel::rbac();
    adapter.load_policy(&mut loaded).await.unwrap();
    assert_eq!(loaded.get_policy("p", "p").unwrap(), model.get_policy("p", "p").unwrap());
}

#[tokio::test]
async fn test_interior_empty_value_round_trips() {
    let test_db = TestDb::new().await;
    let adapter = test_db.adapter();

    adapter
        .add_policy("p", "p", &rule(&["alice", "", "read"]))
        .await
        .unwrap();

    let mut model = PolicyModel::rbac();
    adapter.load_policy(&mut model).await.unwrap();
    assert_eq!(
        model.get_policy("p", "p").unwrap(),
        &[rule(&["alice", "", "read"])]
    );
}

#[tokio::test]
async fn test_load_rejects_unknown_ptype_without_partial_load() {
    let test_db = TestDb::new().await;
    PolicyBuilder::new()
        .policy(["alice", "data1", "read"])
        .named("p9", ["bob", "data2", "write"])
        .create(test_db.connection())
        .await;

    let adapter = test_db.adapter();
    let mut model = PolicyModel::rbac();
    let err = adapter.load_policy(&mut model).await.unwrap_err();

    assert!(matches!(err, AdapterError::UnknownPolicyType { .. }));
    assert_eq!(model.policy_count(), 0);
}

// ============================================================================
// Filtered Load
// ============================================================================

#[tokio::test]
async fn test_filter_conjunction() {
    let test_db = TestDb::new().await;
    PolicyBuilder::new()
        .policy(["alice", "data1", "read"])
        .policy(["bob", "data2", "write"])
        .create(test_db.connection())
        .await;

    let mut e = Enforcer::new(PolicyModel::rbac(), test_db.filtered_adapter())
        .await
        .unwrap();
    assert_eq!(e.get_policy().len(), 0);

    e.load_filtered_policy(Filter::new().with_field(0, ["alice"]).unwrap())
        .await
        .unwrap();

    assert!(e.is_filtered());
    assert_eq!(e.get_policy(), &[rule(&["alice", "data1", "read"])]);
}

#[tokio::test]
async fn test_batch_filter_returns_union_with_duplicates() {
    let test_db = TestDb::new().await;
    seed_rbac_policy(test_db.connection()).await;
    let adapter = test_db.adapter();

    let batch = BatchFilter::new(vec![
        Filter::new().with_field(0, ["alice"]).unwrap().with_ptype(["p"]),
        Filter::new().with_field(1, ["data2"]).unwrap(),
    ]);
    let rows = policy_adapter::storage::find_filtered_rules(adapter.connection(), &batch)
        .await
        .unwrap();
    assert_eq!(rows.len(), 4);

    let mut model = PolicyModel::rbac();
    adapter.load_filtered_policy(&mut model, &batch).await.unwrap();
    assert_eq!(model.get_policy("p", "p").unwrap().len(), 4);
    assert!(adapter.is_filtered());

    // A row matched by both filters comes back twice
    let overlapping = BatchFilter::new(vec![
        Filter::new().with_field(0, ["bob"]).unwrap(),
        Filter::new().with_field(1, ["data2"]).unwrap(),
    ]);
    let rows = policy_adapter::storage::find_filtered_rules(adapter.connection(), &overlapping)
        .await
        .unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0], rows[1]);

    let rows = policy_adapter::storage::find_filtered_rules(
        adapter.connection(),
        &overlapping.distinct(),
    )
    .await
    .unwrap();
    assert_eq!(rows.len(), 3);
}

#[tokio::test]
async fn test_batch_filter_from_json() {
    let test_db = TestDb::new().await;
    seed_rbac_policy(test_db.connection()).await;

    let batch = BatchFilter::try_from(json!([{"ptype": ["g"]}, {"v0": ["bob"]}])).unwrap();
    let mut e = Enforcer::new(PolicyModel::rbac(), test_db.filtered_adapter())
        .await
        .unwrap();
    e.load_filtered_policy(batch).await.unwrap();

    assert_eq!(e.get_grouping_policy().len(), 1);
    assert_eq!(e.get_policy(), &[rule(&["bob", "data2", "write"])]);
}

#[tokio::test]
async fn test_filtered_policy_cannot_be_saved() {
    let test_db = TestDb::new().await;
    seed_rbac_policy(test_db.connection()).await;

    let mut e = Enforcer::new(PolicyModel::rbac(), test_db.adapter())
        .await
        .unwrap();
    e.load_filtered_policy(Filter::new().with_ptype(["g"]))
        .await
        .unwrap();

    let err = e.save_policy().await.unwrap_err();
    assert!(matches!(err, AdapterError::FilteredSave));

    // A full reload clears the filtered state
    e.load_policy().await.unwrap();
    assert!(!e.is_filtered());
    e.save_policy().await.expect("Full policy should save");
    assert_eq!(stored_rules(test_db.connection()).await.len(), 5);
}

#[test]
fn test_conditions_to_query_on_rule_entity() {
    let query = conditions_to_query(
        policy_adapter::entities::CasbinRule::find(),
        &["v0 = 'alice'", "v0 = 'bob'"],
        CombineType::Or,
    );
    let sql = query.build(sea_orm::DbBackend::Sqlite).to_string();
    assert!(sql.contains("v0 = 'alice'"));
    assert!(sql.contains("v0 = 'bob'"));
}

// ============================================================================
// Mutations
// ============================================================================

#[tokio::test]
async fn test_add_and_remove_policy() {
    let test_db = TestDb::new().await;
    let mut e = Enforcer::new(PolicyModel::rbac(), test_db.adapter())
        .await
        .unwrap();

    assert!(e.add_policy(["alice", "data1", "read"]).await.unwrap());
    assert!(!e.add_policy(["alice", "data1", "read"]).await.unwrap());
    assert_eq!(stored_rules(test_db.connection()).await.len(), 1);

    assert!(e.remove_policy(["alice", "data1", "read"]).await.unwrap());
    assert!(stored_rules(test_db.connection()).await.is_empty());
}

#[tokio::test]
async fn test_add_policies_skips_rows_already_stored() {
    let test_db = TestDb::new().await;
    PolicyBuilder::new()
        .policy(["alice", "data1", "read"])
        .create(test_db.connection())
        .await;

    // The adapter was never loaded, so the model does not know the row
    let adapter = test_db.adapter();
    let added = adapter
        .add_policies(
            "p",
            "p",
            &[rule(&["alice", "data1", "read"]), rule(&["bob", "data2", "write"])],
        )
        .await
        .expect("Duplicate rows should be ignored");

    assert!(added);
    assert_eq!(stored_rules(test_db.connection()).await.len(), 2);
}

#[tokio::test]
async fn test_remove_policies() {
    let test_db = TestDb::new().await;
    seed_rbac_policy(test_db.connection()).await;
    let mut e = Enforcer::new(PolicyModel::rbac(), test_db.adapter())
        .await
        .unwrap();

    let removed = e
        .remove_policies([["data2_admin", "data2", "read"], ["data2_admin", "data2", "write"]])
        .await
        .unwrap();

    assert!(removed);
    assert_eq!(stored_rules(test_db.connection()).await.len(), 3);
    assert_eq!(e.get_policy().len(), 2);
}

#[tokio::test]
async fn test_remove_filtered_policy() {
    let test_db = TestDb::new().await;
    seed_rbac_policy(test_db.connection()).await;
    let mut e = Enforcer::new(PolicyModel::rbac(), test_db.adapter())
        .await
        .unwrap();

    assert!(e.remove_filtered_policy(1, ["data2"]).await.unwrap());

    assert_eq!(e.get_policy(), &[rule(&["alice", "data1", "read"])]);
    assert_eq!(
        stored_rules(test_db.connection()).await,
        vec![
            rule(&["p", "alice", "data1", "read"]),
            rule(&["g", "alice", "data2_admin"]),
        ]
    );
}

#[tokio::test]
async fn test_remove_filtered_policy_with_wildcard_slot() {
    let test_db = TestDb::new().await;
    seed_rbac_policy(test_db.connection()).await;
    let mut e = Enforcer::new(PolicyModel::rbac(), test_db.adapter())
        .await
        .unwrap();

    assert!(e
        .remove_filtered_policy(0, ["data2_admin", "", "write"])
        .await
        .unwrap());

    assert_eq!(e.get_policy().len(), 3);
    assert!(!e.has_policy(["data2_admin", "data2", "write"]));
    assert_eq!(stored_rules(test_db.connection()).await.len(), 4);
}

#[tokio::test]
async fn test_remove_filtered_policy_rejects_all_empty_values() {
    let test_db = TestDb::new().await;
    seed_rbac_policy(test_db.connection()).await;
    let mut e = Enforcer::new(PolicyModel::rbac(), test_db.adapter())
        .await
        .unwrap();

    let err = e.remove_filtered_policy(0, [""]).await.unwrap_err();

    assert!(matches!(err, AdapterError::EmptyFieldValues));
    assert_eq!(e.get_policy().len(), 4);
    assert_eq!(stored_rules(test_db.connection()).await.len(), 5);
}

#[tokio::test]
async fn test_remove_filtered_policy_out_of_range() {
    let test_db = TestDb::new().await;
    let adapter = test_db.adapter();

    let err = adapter
        .remove_filtered_policy("p", "p", 5, &rule(&["a", "b"]))
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::FieldOutOfRange { .. }));

    let err = adapter
        .remove_filtered_policy("p", "p", usize::MAX, &rule(&["a"]))
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::FieldOutOfRange { .. }));

    let err = adapter
        .update_filtered_policies("p", "p", &[rule(&["a", "b"])], usize::MAX, &rule(&["a"]))
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::FieldOutOfRange { .. }));
}

#[tokio::test]
async fn test_rule_too_long() {
    let test_db = TestDb::new().await;
    let adapter = test_db.adapter();

    let err = adapter
        .add_policy("p", "p", &rule(&["a", "b", "c", "d", "e", "f", "g"]))
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::RuleTooLong { .. }));
    assert!(stored_rules(test_db.connection()).await.is_empty());
}

#[tokio::test]
async fn test_update_policy() {
    let test_db = TestDb::new().await;
    seed_rbac_policy(test_db.connection()).await;
    let mut e = Enforcer::new(PolicyModel::rbac(), test_db.adapter())
        .await
        .unwrap();

    assert!(e
        .update_policy(["alice", "data1", "read"], ["alice", "data1", "write"])
        .await
        .unwrap());

    let rules = stored_rules(test_db.connection()).await;
    assert!(rules.contains(&rule(&["p", "alice", "data1", "write"])));
    assert!(!rules.contains(&rule(&["p", "alice", "data1", "read"])));
}

#[tokio::test]
async fn test_update_policy_to_shorter_rule_clears_slots() {
    let test_db = TestDb::new().await;
    seed_rbac_policy(test_db.connection()).await;
    let adapter = test_db.adapter();

    adapter
        .update_policy(
            "p",
            "p",
            &rule(&["alice", "data1", "read"]),
            &rule(&["alice", "data1"]),
        )
        .await
        .unwrap();

    assert!(stored_rules(test_db.connection())
        .await
        .contains(&rule(&["p", "alice", "data1"])));
}

#[tokio::test]
async fn test_update_policies() {
    let test_db = TestDb::new().await;
    seed_rbac_policy(test_db.connection()).await;
    let mut e = Enforcer::new(PolicyModel::rbac(), test_db.adapter())
        .await
        .unwrap();

    assert!(e
        .update_policies(
            [["alice", "data1", "read"], ["bob", "data2", "write"]],
            [["alice", "data1", "write"], ["bob", "data2", "read"]],
        )
        .await
        .unwrap());

    let rules = stored_rules(test_db.connection()).await;
    assert!(rules.contains(&rule(&["p", "alice", "data1", "write"])));
    assert!(rules.contains(&rule(&["p", "bob", "data2", "read"])));
    assert_eq!(rules.len(), 5);
}

#[tokio::test]
async fn test_update_filtered_policies() {
    let test_db = TestDb::new().await;
    seed_rbac_policy(test_db.connection()).await;
    let mut e = Enforcer::new(PolicyModel::rbac(), test_db.adapter())
        .await
        .unwrap();

    let old = e
        .update_filtered_policies(
            [["data3_admin", "data3", "read"], ["data3_admin", "data3", "write"]],
            0,
            ["data2_admin"],
        )
        .await
        .unwrap();

    assert_eq!(
        old,
        vec![
            rule(&["data2_admin", "data2", "read"]),
            rule(&["data2_admin", "data2", "write"]),
        ]
    );
    assert!(e.has_policy(["data3_admin", "data3", "write"]));
    assert!(!e.has_policy(["data2_admin", "data2", "read"]));

    let rules = stored_rules(test_db.connection()).await;
    assert!(rules.contains(&rule(&["p", "data3_admin", "data3", "read"])));
    assert!(!rules.contains(&rule(&["p", "data2_admin", "data2", "read"])));
}

// ============================================================================
// Context-bound Adapter
// ============================================================================

#[tokio::test]
async fn test_context_adapter_with_live_context() {
    let test_db = TestDb::new().await;
    let adapter = ContextAdapter::new(
        test_db.adapter(),
        Context::with_timeout(Duration::from_secs(30)),
    );

    assert!(adapter
        .add_policy("p", "p", &rule(&["alice", "data1", "read"]))
        .await
        .unwrap());

    let mut model = PolicyModel::rbac();
    adapter.load_policy(&mut model).await.unwrap();
    assert_eq!(model.policy_count(), 1);
}

#[tokio::test]
async fn test_context_adapter_after_cancel() {
    let test_db = TestDb::new().await;
    let (ctx, cancel) = Context::with_cancel();
    let adapter = ContextAdapter::new(test_db.adapter(), ctx);

    cancel.cancel();
    let err = adapter
        .add_policy("p", "p", &rule(&["alice", "data1", "read"]))
        .await
        .unwrap_err();

    assert!(matches!(err, AdapterError::Cancelled));
    assert!(stored_rules(test_db.connection()).await.is_empty());
}

#[tokio::test]
async fn test_context_adapter_after_deadline() {
    let test_db = TestDb::new().await;
    let adapter = ContextAdapter::new(
        test_db.adapter(),
        Context::with_timeout(Duration::from_millis(10)),
    );

    tokio::time::sleep(Duration::from_millis(30)).await;
    let mut model = PolicyModel::rbac();
    let err = adapter.load_policy(&mut model).await.unwrap_err();

    assert!(matches!(err, AdapterError::DeadlineExceeded));
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_from_settings_and_close() {
    let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
    let mut settings = policy_adapter::Settings::default();
    settings.database.url = format!(
        "sqlite://{}?mode=rwc",
        temp_dir.path().join("policy.db").display()
    );
    settings.adapter.filtered = true;
    settings.adapter.batch_size = 50;

    let adapter = policy_adapter::Adapter::from_settings(&settings)
        .await
        .expect("Failed to create adapter");
    assert!(adapter.is_filtered());
    assert_eq!(adapter.batch_size(), 50);

    adapter
        .add_policy("p", "p", &rule(&["alice", "data1", "read"]))
        .await
        .expect("Schema should have been created");

    adapter.close().await.expect("Failed to close adapter");
}
