use chrono::{TimeZone, Utc};
use sqlx::sqlite::SqlitePoolOptions;

use crate::db;
use crate::models::{
    Asset, AssetKind, CardinalityRecord, ColumnMeta, ColumnVector, GrainResult, GrainStatus,
    PhaseLog, PhaseStatus, Relationship, ValueFrequency,
};
use crate::services::CatalogStore;

async fn test_store() -> CatalogStore {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    db::init_schema(&pool).await.expect("schema init");
    CatalogStore::new(pool)
}

fn orders_asset() -> Asset {
    let mut asset = Asset::stub(AssetKind::Table, "dbo", "Orders");
    asset.columns = vec![
        ColumnMeta { name: "OrderID".into(), data_type: "int".into(), ordinal: 1 },
        ColumnMeta { name: "CustomerID".into(), data_type: "int".into(), ordinal: 2 },
        ColumnMeta { name: "Amount".into(), data_type: "decimal(10,2)".into(), ordinal: 3 },
        ColumnMeta { name: "Status".into(), data_type: "varchar(20)".into(), ordinal: 4 },
    ];
    asset.row_count = Some(5000);
    asset
}

fn edge(parent: &str, referenced: &str, mappings: &[(&str, &str)]) -> Relationship {
    Relationship {
        id: uuid::Uuid::new_v4().to_string(),
        parent_asset: parent.to_string(),
        referenced_asset: referenced.to_string(),
        column_mappings: mappings
            .iter()
            .map(|(p, r)| (p.to_string(), r.to_string()))
            .collect(),
        cardinality: None,
        pattern_name: "same_name".to_string(),
        confidence: 0.9,
        match_pct: 99.5,
        orphan_pct: 0.5,
        sample_pct: 0.3,
        validated: true,
        discovered_at: Utc::now(),
        last_validated_at: Some(Utc::now()),
    }
}

#[tokio::test]
async fn asset_upsert_is_idempotent_by_qualified_name() {
    let store = test_store().await;
    let asset = orders_asset();

    store.upsert_asset(&asset).await.unwrap();
    // Second upsert with a different id but the same qualified name
    let mut again = orders_asset();
    again.row_count = Some(6000);
    store.upsert_asset(&again).await.unwrap();

    let all = store.find_all_assets().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].row_count, Some(6000));
    assert_eq!(all[0].columns.len(), 4);
}

#[tokio::test]
async fn seeding_preserves_discovered_grain() {
    let store = test_store().await;
    store.seed_assets(&[orders_asset()]).await.unwrap();

    let mut grain = GrainResult::confirmed("dbo.Orders", vec!["OrderID".into()], "pattern");
    grain.confidence = 1.0;
    store.update_grain(&grain).await.unwrap();

    // Re-seeding (same natural key) must not reset the grain fields
    store.seed_assets(&[orders_asset()]).await.unwrap();

    let asset = store.find_asset("dbo.Orders").await.unwrap().unwrap();
    assert_eq!(asset.grain_status, GrainStatus::Confirmed);
    assert_eq!(asset.primary_key, Some(vec!["OrderID".to_string()]));
    assert_eq!(asset.pk_method, Some("pattern".to_string()));
}

#[tokio::test]
async fn grain_update_persists_fd_metadata() {
    let store = test_store().await;
    store.seed_assets(&[orders_asset()]).await.unwrap();

    let mut grain = GrainResult::confirmed(
        "dbo.Orders",
        vec!["PostPeriod".into(), "ExtractDTS".into(), "OrderID".into()],
        "varying-column-chase",
    );
    grain.pk_minimal = Some(vec!["PostPeriod".into(), "OrderID".into()]);
    grain.fd_removed = Some(vec!["ExtractDTS".into()]);
    store.update_grain(&grain).await.unwrap();

    let asset = store.find_asset("dbo.Orders").await.unwrap().unwrap();
    assert_eq!(
        asset.pk_minimal,
        Some(vec!["PostPeriod".to_string(), "OrderID".to_string()])
    );
    assert_eq!(asset.fd_removed, Some(vec!["ExtractDTS".to_string()]));
    assert_eq!(asset.pk_method, Some("varying-column-chase".to_string()));
}

#[tokio::test]
async fn assets_list_in_stable_qualified_name_order() {
    let store = test_store().await;
    let b = Asset::stub(AssetKind::Table, "dbo", "Zeta");
    let a = Asset::stub(AssetKind::Table, "dbo", "Alpha");
    let other_schema = Asset::stub(AssetKind::Table, "sales", "Alpha");
    store.seed_assets(&[b, a, other_schema]).await.unwrap();

    let assets = store.find_assets_by_schema("dbo").await.unwrap();
    let names: Vec<&str> = assets.iter().map(|a| a.qualified_name.as_str()).collect();
    assert_eq!(names, vec!["dbo.Alpha", "dbo.Zeta"]);
}

#[tokio::test]
async fn relationship_dedup_by_parent_referenced_and_mapping() {
    let store = test_store().await;

    let first = edge("dbo.Orders", "dbo.Customers", &[("CustomerID", "CustomerID")]);
    store.upsert_relationship(&first).await.unwrap();

    // Re-validation of the same edge updates in place
    let mut revalidated =
        edge("dbo.Orders", "dbo.Customers", &[("CustomerID", "CustomerID")]);
    revalidated.match_pct = 99.9;
    revalidated.sample_pct = 100.0;
    store.upsert_relationship(&revalidated).await.unwrap();

    // A different mapping is a different edge
    let other = edge("dbo.Orders", "dbo.Customers", &[("BillToID", "CustomerID")]);
    store.upsert_relationship(&other).await.unwrap();

    let edges = store.relationships_for_parent("dbo.Orders").await.unwrap();
    assert_eq!(edges.len(), 2);
    let same = edges
        .iter()
        .find(|e| e.column_mappings[0].0 == "CustomerID")
        .unwrap();
    assert_eq!(same.match_pct, 99.9);
    assert_eq!(same.sample_pct, 100.0);
}

#[tokio::test]
async fn cardinality_records_replace_per_level() {
    let store = test_store().await;

    let first = CardinalityRecord::new("dbo.Orders", "CustomerID", 1.0, 40, 50);
    store.record_cardinality(std::slice::from_ref(&first)).await.unwrap();

    let second = CardinalityRecord::new("dbo.Orders", "CustomerID", 1.0, 45, 50);
    let ten_pct = CardinalityRecord::new("dbo.Orders", "CustomerID", 10.0, 420, 500);
    store.record_cardinality(&[second, ten_pct]).await.unwrap();

    let records = store.cardinality_for_asset("dbo.Orders").await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].sample_pct, 1.0);
    assert_eq!(records[0].distinct_count, 45);
    assert_eq!(records[1].sample_pct, 10.0);
    assert_eq!(records[1].selectivity, 0.84);
}

#[tokio::test]
async fn frequency_rows_replace_and_keep_sentinels() {
    let store = test_store().await;

    let rows = vec![
        ValueFrequency::new("dbo.Orders", "Status", 1, Some("open".into()), 30, 50, 10.0),
        ValueFrequency::new("dbo.Orders", "Status", 2, Some("closed".into()), 20, 50, 10.0),
        ValueFrequency::sentinel("dbo.Orders", "LegacyFlag", 10.0),
    ];
    store.record_frequencies("dbo.Orders", &rows).await.unwrap();

    let status = store.frequencies_for_column("dbo.Orders", "Status").await.unwrap();
    assert_eq!(status.len(), 2);
    assert_eq!(status[0].rank, 1);
    assert_eq!(status[0].value.as_deref(), Some("open"));
    assert_eq!(status[0].relative_frequency, Some(0.6));

    let sentinel = store.frequencies_for_column("dbo.Orders", "LegacyFlag").await.unwrap();
    assert_eq!(sentinel.len(), 1);
    assert_eq!(sentinel[0].rank, 0);
    assert_eq!(sentinel[0].frequency, 0);

    // A rescan replaces the asset's rows wholesale
    let rescan =
        vec![ValueFrequency::new("dbo.Orders", "Status", 1, Some("open".into()), 31, 50, 10.0)];
    store.record_frequencies("dbo.Orders", &rescan).await.unwrap();
    let status = store.frequencies_for_column("dbo.Orders", "Status").await.unwrap();
    assert_eq!(status.len(), 1);
    let sentinel = store.frequencies_for_column("dbo.Orders", "LegacyFlag").await.unwrap();
    assert!(sentinel.is_empty());
}

#[tokio::test]
async fn phase_log_reader_takes_latest_success() {
    let store = test_store().await;

    let t = |secs: i64| Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();
    let mut started = PhaseLog::started("run-1", "dbo", "pk_discovery");
    started.started_at = t(0);
    store.log_phase(&started).await.unwrap();

    let mut old_success = PhaseLog::started("run-1", "dbo", "pk_discovery");
    old_success.status = PhaseStatus::Success;
    old_success.started_at = t(10);
    old_success.items_processed = 5;
    store.log_phase(&old_success).await.unwrap();

    let mut error = PhaseLog::started("run-2", "dbo", "pk_discovery");
    error.status = PhaseStatus::Error;
    error.started_at = t(20);
    store.log_phase(&error).await.unwrap();

    let mut new_success = PhaseLog::started("run-3", "dbo", "pk_discovery");
    new_success.status = PhaseStatus::Success;
    new_success.started_at = t(30);
    new_success.items_processed = 9;
    store.log_phase(&new_success).await.unwrap();

    let latest = store.latest_success("dbo", "pk_discovery").await.unwrap().unwrap();
    assert_eq!(latest.run_id, "run-3");
    assert_eq!(latest.items_processed, 9);

    // Other scopes are untouched
    assert!(store.latest_success("sales", "pk_discovery").await.unwrap().is_none());
}

#[tokio::test]
async fn column_vector_round_trip_and_upsert() {
    let store = test_store().await;

    let vector = ColumnVector {
        id: uuid::Uuid::new_v4().to_string(),
        qualified_name: "dbo.Orders".to_string(),
        column_name: "Status".to_string(),
        vector_type: "value_centroid".to_string(),
        vector: vec![0.25, -0.5, 0.125],
        num_values: 42,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    store.upsert_column_vector(&vector).await.unwrap();

    let mut updated = vector.clone();
    updated.id = uuid::Uuid::new_v4().to_string();
    updated.vector = vec![0.5, 0.5, 0.5];
    updated.num_values = 50;
    store.upsert_column_vector(&updated).await.unwrap();

    let loaded = store
        .find_column_vector("dbo.Orders", "Status", "value_centroid")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.vector, vec![0.5, 0.5, 0.5]);
    assert_eq!(loaded.num_values, 50);
}

#[tokio::test]
async fn grain_report_counts_statuses() {
    let store = test_store().await;
    let mut confirmed = Asset::stub(AssetKind::Table, "dbo", "Orders");
    confirmed.grain_status = GrainStatus::Confirmed;
    let mut no_pk = Asset::stub(AssetKind::Table, "dbo", "AuditTrail");
    no_pk.grain_status = GrainStatus::NoNaturalPk;
    let unknown = Asset::stub(AssetKind::Table, "dbo", "Staging");

    store.upsert_asset(&confirmed).await.unwrap();
    store.upsert_asset(&no_pk).await.unwrap();
    store.upsert_asset(&unknown).await.unwrap();

    let report = store.grain_report("dbo").await.unwrap();
    assert_eq!(report.total, 3);
    assert_eq!(report.confirmed, 1);
    assert_eq!(report.no_natural_pk, 1);
    assert_eq!(report.unknown, 1);
    assert!((report.coverage_pct - 66.7).abs() < 0.1);
}
