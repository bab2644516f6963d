//! End-to-end seeding against the in-memory store.
//!
//! These tests exercise the full run (resolve, apply, deferred references,
//! validation) with the warehouse catalog and the built-in example data.

use serde_json::json;
use time::macros::datetime;
use warehouse_seed::prelude::*;

fn builtin_loader() -> (SeedLoader<MemoryStore>, SeedSet) {
    let catalog = warehouse();
    let seeds = SeedSet::builtin(&catalog, ConflictPolicy::Skip).expect("builtin seed parses");
    let loader = SeedLoader::new(MemoryStore::new(catalog.clone()), catalog);
    (loader, seeds)
}

fn seeds_from(value: serde_json::Value, policy: ConflictPolicy) -> SeedSet {
    SeedSet::from_json_str(&value.to_string(), &warehouse(), policy).expect("seed parses")
}

#[tokio::test]
async fn test_example_data_loads_once_and_reruns_idempotently() {
    let (mut loader, seeds) = builtin_loader();

    let first = loader.run(&seeds).await.unwrap();
    assert_eq!(first.inserted(), 14);
    assert_eq!(first.skipped(), 0);
    assert!(first.is_clean(), "{:?}", first.validation);

    let second = loader.run(&seeds).await.unwrap();
    assert_eq!(second.inserted(), 0);
    assert_eq!(second.skipped(), 14);
    assert!(second.is_clean());

    let store = loader.store();
    assert_eq!(store.row_count("affiliate.users"), 3);
    assert_eq!(store.row_count("public.users"), 6);
    assert_eq!(store.row_count("cart.user_linked_affiliates"), 5);
    assert_eq!(store.total_rows(), 14);
}

#[tokio::test]
async fn test_parents_are_loaded_before_links() {
    let (mut loader, seeds) = builtin_loader();
    let report = loader.run(&seeds).await.unwrap();

    let position = |name: &str| {
        report
            .batches
            .iter()
            .position(|b| b.entity == name)
            .unwrap_or_else(|| panic!("{name} not applied"))
    };
    assert!(position("affiliate.users") < position("cart.user_linked_affiliates"));
    assert!(position("public.users") < position("cart.user_linked_affiliates"));
}

#[tokio::test]
async fn test_missing_platform_user_fails_loudly() {
    let (mut loader, mut seeds) = builtin_loader();
    seeds.insert(
        SeedBatch::new("cart.user_linked_affiliates", ConflictPolicy::Skip).with_row([
            ("user_id", Value::Text("usr_99".into())),
            ("affiliate_code", Value::Text("MAYA10".into())),
        ]),
    );

    let err = loader.run(&seeds).await.unwrap_err();
    match err {
        LoadError::ReferentialIntegrity { entity, row, .. } => {
            assert_eq!(entity, "cart.user_linked_affiliates");
            assert_eq!(row, "user_id=usr_99");
        }
        other => panic!("expected referential integrity error, got {other:?}"),
    }

    // The whole run shares one transaction.
    assert_eq!(loader.store().total_rows(), 0);
    assert!(!loader.store().in_transaction());
}

#[tokio::test]
async fn test_batch_scope_keeps_committed_batches() {
    let (loader, mut seeds) = builtin_loader();
    let mut loader = loader.with_transaction_scope(TransactionScope::Batch);
    let valid = seeds.clone();
    seeds.insert(
        SeedBatch::new("cart.user_linked_affiliates", ConflictPolicy::Skip).with_row([
            ("user_id", Value::Text("usr_06".into())),
            ("affiliate_code", Value::Text("NO_SUCH_CODE".into())),
        ]),
    );

    assert!(matches!(
        loader.run(&seeds).await,
        Err(LoadError::ReferentialIntegrity { .. })
    ));
    assert_eq!(loader.store().row_count("affiliate.users"), 3);
    assert_eq!(loader.store().row_count("public.users"), 6);
    assert_eq!(loader.store().row_count("cart.user_linked_affiliates"), 0);

    // Re-running from scratch completes the load.
    let report = loader.run(&valid).await.unwrap();
    assert_eq!(report.inserted(), 5);
    assert_eq!(report.skipped(), 9);
    assert_eq!(loader.store().total_rows(), 14);
}

#[tokio::test]
async fn test_required_cycle_aborts_before_any_write() {
    let catalog: Catalog = [
        EntityDescriptor::new("public.a")
            .with_column("id", ColumnType::Text)
            .with_column("b_id", ColumnType::Text)
            .with_primary_key(&["id"])
            .with_foreign_key(&["b_id"], "public.b", &["id"], OnDelete::NoAction),
        EntityDescriptor::new("public.b")
            .with_column("id", ColumnType::Text)
            .with_column("a_id", ColumnType::Text)
            .with_primary_key(&["id"])
            .with_foreign_key(&["a_id"], "public.a", &["id"], OnDelete::NoAction),
    ]
    .into_iter()
    .collect();
    let seeds = SeedSet::new().with(
        SeedBatch::new("public.a", ConflictPolicy::Skip).with_row([
            ("id", Value::Text("a1".into())),
            ("b_id", Value::Text("b1".into())),
        ]),
    );
    let mut loader = SeedLoader::new(MemoryStore::new(catalog.clone()), catalog);

    let err = loader.run(&seeds).await.unwrap_err();
    assert!(
        matches!(&err, LoadError::CyclicDependency { entities } if entities == &["public.a", "public.b"]),
        "{err}"
    );
    assert_eq!(loader.store().writes(), 0);
}

#[tokio::test]
async fn test_upsert_rerun_updates_values_and_keeps_creation_time() {
    let catalog = warehouse();
    let mut loader = SeedLoader::new(MemoryStore::new(catalog.clone()), catalog);

    let user = |name: &str| {
        seeds_from(
            json!({
                "users": [{
                    "id": "usr_10",
                    "name": name,
                    "email": "kim@example.com",
                    "role": "user",
                    "is_partner": false,
                    "email_verified": true
                }]
            }),
            ConflictPolicy::Upsert,
        )
    };

    let first_run = datetime!(2025-03-01 10:00 UTC);
    let second_run = datetime!(2025-03-02 10:00 UTC);

    let report = loader.run_at(&user("Kim"), first_run).await.unwrap();
    assert_eq!(report.inserted(), 1);
    let report = loader.run_at(&user("Kim Lee"), second_run).await.unwrap();
    assert_eq!(report.updated(), 1);

    let rows = loader.store().rows("public.users");
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.get("id"), Some(&Value::Text("usr_10".into())));
    assert_eq!(row.get("name"), Some(&Value::Text("Kim Lee".into())));
    assert_eq!(row.get("created_at"), Some(&Value::Timestamp(first_run)));
    assert_eq!(row.get("updated_at"), Some(&Value::Timestamp(second_run)));
}

#[tokio::test]
async fn test_fail_policy_surfaces_duplicate() {
    let (mut loader, seeds) = builtin_loader();
    loader.run(&seeds).await.unwrap();

    let strict = seeds_from(
        json!({
            "affiliate_users": {
                "policy": "fail",
                "rows": [{
                    "id": "aff_01",
                    "name": "Maya Ortiz",
                    "email": "maya.ortiz@partners.example.com",
                    "username": "MAYA10",
                    "role": "affiliate",
                    "is_partner": true,
                    "email_verified": true
                }]
            }
        }),
        ConflictPolicy::Skip,
    );

    let err = loader.run(&strict).await.unwrap_err();
    assert!(
        matches!(&err, LoadError::Conflict { entity, key, .. } if entity == "affiliate.users" && key == "id=aff_01"),
        "{err}"
    );
    assert_eq!(loader.store().total_rows(), 14);
}

#[tokio::test]
async fn test_nullable_references_are_deferred_and_patched() {
    let catalog = warehouse();
    let mut loader = SeedLoader::new(MemoryStore::new(catalog.clone()), catalog);
    let seeds = seeds_from(
        json!({
            "operators": [{"id": "op_1", "name": "Northwind", "active": true}],
            "airnodes": [
                {
                    "id": "an_child",
                    "type": "cell",
                    "parent_id": "an_root",
                    "operator_id": "op_1",
                    "initial_puchase_status": "reserved",
                    "initial_purchase_status": "paid"
                },
                {"id": "an_root", "type": "tower"}
            ]
        }),
        ConflictPolicy::Skip,
    );

    let report = loader.run(&seeds).await.unwrap();
    assert!(report.is_clean(), "{:?}", report.validation);
    assert_eq!(report.deferred_patches, 1);

    let child = loader
        .store()
        .rows("public.airnodes")
        .iter()
        .find(|r| r.get("id") == Some(&Value::Text("an_child".into())))
        .cloned()
        .unwrap();
    assert_eq!(child.get("parent_id"), Some(&Value::Text("an_root".into())));
    assert_eq!(child.get("operator_id"), Some(&Value::Text("op_1".into())));
    // Both spellings are stored as independent columns.
    assert_eq!(
        child.get("initial_puchase_status"),
        Some(&Value::Text("reserved".into()))
    );
    assert_eq!(
        child.get("initial_purchase_status"),
        Some(&Value::Text("paid".into()))
    );

    let rerun = loader.run(&seeds).await.unwrap();
    assert_eq!(rerun.skipped(), 3);
    // Skipped rows only fill NULLs, so nothing changes.
    assert_eq!(rerun.deferred_patches, 1);
    assert!(loader.store().rows("public.airnodes").contains(&child));
}

#[tokio::test]
async fn test_fact_hub_loads_with_optional_references() {
    let (mut loader, mut seeds) = builtin_loader();
    for batch in seeds_from(
        json!({
            "fact_marketplace": [
                {"id": "fm-1", "user_id": "usr_01", "affiliate_user_id": "aff_01"},
                {"id": "fm-2"}
            ]
        }),
        ConflictPolicy::Skip,
    )
    .iter()
    {
        seeds.insert(batch.clone());
    }

    let report = loader.run(&seeds).await.unwrap();
    assert!(report.is_clean(), "{:?}", report.validation);
    assert_eq!(loader.store().row_count("public.fact_marketplace"), 2);
}

#[tokio::test]
async fn test_findings_are_reported_not_raised() {
    let (mut loader, seeds) = builtin_loader();
    let links = loader
        .catalog()
        .get("cart.user_linked_affiliates")
        .cloned()
        .unwrap();

    // A row restored outside the loader, bypassing constraints.
    loader.store_mut().insert_unchecked(
        &links,
        [
            ("user_id".to_string(), Value::Text("usr_ghost".into())),
            ("affiliate_code".to_string(), Value::Text("MAYA10".into())),
        ]
        .into_iter()
        .collect(),
    );

    let report = loader.run(&seeds).await.unwrap();
    assert_eq!(report.inserted(), 14);
    assert_eq!(report.validation.len(), 1);

    let finding = &report.validation.findings[0];
    assert_eq!(finding.entity, "cart.user_linked_affiliates");
    assert_eq!(finding.row, "user_id=usr_ghost");
    assert!(finding.constraint.contains("public.users"));
}

fn airnode(id: &str, parent: Option<&str>) -> serde_json::Value {
    json!({"id": id, "type": "cell", "parent_id": parent})
}

fn parent_of(loader: &SeedLoader<MemoryStore>, id: &str) -> Option<Value> {
    loader
        .store()
        .rows("public.airnodes")
        .iter()
        .find(|r| r.get("id") == Some(&Value::Text(id.into())))
        .and_then(|r| r.get("parent_id").cloned())
}

#[tokio::test]
async fn test_batch_scope_rerun_completes_references_of_committed_rows() {
    let (loader, builtin) = builtin_loader();
    let mut loader = loader.with_transaction_scope(TransactionScope::Batch);
    let order = resolve(loader.catalog()).unwrap();
    assert!(order.loads_before("public.airnodes", "cart.user_linked_affiliates"));

    let mut valid = builtin.clone();
    for batch in seeds_from(
        json!({"airnodes": [airnode("an_child", Some("an_root")), airnode("an_root", None)]}),
        ConflictPolicy::Skip,
    )
    .iter()
    {
        valid.insert(batch.clone());
    }
    let mut broken = valid.clone();
    broken.insert(
        SeedBatch::new("cart.user_linked_affiliates", ConflictPolicy::Skip).with_row([
            ("user_id", Value::Text("usr_06".into())),
            ("affiliate_code", Value::Text("NO_SUCH_CODE".into())),
        ]),
    );

    // Airnodes commit, then the link batch fails before the deferred pass.
    assert!(loader.run(&broken).await.is_err());
    assert_eq!(loader.store().row_count("public.airnodes"), 2);
    assert_eq!(parent_of(&loader, "an_child"), None);

    let report = loader.run(&valid).await.unwrap();
    assert_eq!(report.deferred_patches, 1);
    assert!(report.is_clean(), "{:?}", report.validation);
    assert_eq!(parent_of(&loader, "an_child"), Some(Value::Text("an_root".into())));
    assert!(!loader.store().in_transaction());
}

#[tokio::test]
async fn test_batch_scope_rolls_back_failed_deferred_pass() {
    let catalog = warehouse();
    let mut loader = SeedLoader::new(MemoryStore::new(catalog.clone()), catalog)
        .with_transaction_scope(TransactionScope::Batch);
    let seeds = seeds_from(
        json!({"airnodes": [
            airnode("an_a", Some("an_root")),
            airnode("an_b", Some("an_ghost")),
            airnode("an_root", None)
        ]}),
        ConflictPolicy::Skip,
    );

    let err = loader.run(&seeds).await.unwrap_err();
    assert!(
        matches!(&err, LoadError::ReferentialIntegrity { row, .. } if row == "id=an_b"),
        "{err}"
    );

    // The batch stays committed; the whole deferred pass is undone.
    assert_eq!(loader.store().row_count("public.airnodes"), 3);
    assert_eq!(parent_of(&loader, "an_a"), None);
    assert_eq!(parent_of(&loader, "an_b"), None);
    assert!(!loader.store().in_transaction());
}

#[tokio::test]
async fn test_upsert_rewrites_deferred_references() {
    let catalog = warehouse();
    let mut loader = SeedLoader::new(MemoryStore::new(catalog.clone()), catalog);
    let nodes = |parent: Option<&str>| {
        seeds_from(
            json!({"airnodes": [
                airnode("an_child", parent),
                airnode("an_root", None),
                airnode("an_spare", None)
            ]}),
            ConflictPolicy::Upsert,
        )
    };

    loader.run(&nodes(Some("an_root"))).await.unwrap();
    assert_eq!(parent_of(&loader, "an_child"), Some(Value::Text("an_root".into())));

    let report = loader.run(&nodes(Some("an_spare"))).await.unwrap();
    assert_eq!(report.updated(), 3);
    assert_eq!(parent_of(&loader, "an_child"), Some(Value::Text("an_spare".into())));

    let report = loader.run(&nodes(None)).await.unwrap();
    assert_eq!(report.deferred_patches, 0);
    assert_eq!(parent_of(&loader, "an_child"), Some(Value::Null));
    assert!(report.is_clean(), "{:?}", report.validation);
}

#[tokio::test]
async fn test_reused_email_under_new_id_is_a_conflict() {
    let (mut loader, seeds) = builtin_loader();
    loader.run(&seeds).await.unwrap();

    let clash = seeds_from(
        json!({
            "users": [{
                "id": "usr_77",
                "name": "Alex Again",
                "email": "alex.chen@example.com",
                "role": "user",
                "is_partner": false,
                "email_verified": true
            }]
        }),
        ConflictPolicy::Skip,
    );

    let err = loader.run(&clash).await.unwrap_err();
    assert!(
        matches!(&err, LoadError::Conflict { entity, constraint, .. }
            if entity == "public.users" && constraint == "users_email_key"),
        "{err}"
    );
    assert_eq!(loader.store().row_count("public.users"), 6);
}
