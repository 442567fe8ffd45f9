use lineage_core::config::ConfigHandle;
use lineage_core::engine::TraceabilityEngine;
use lineage_core::risk::HazardAssessment;
use lineage_core::store::SqliteLineageStore;
use lineage_core::types::TraceDirection;
use lineage_test::LineageFixture;
use tokio_util::sync::CancellationToken;

async fn assert_parity(fixture: &LineageFixture, roots: &[&str]) {
    let dir = tempfile::tempdir().unwrap();
    let memory = fixture.engine();
    let sqlite = TraceabilityEngine::over_store(fixture.sqlite_store(&dir), ConfigHandle::default());
    let cancel = CancellationToken::new();

    for &number in roots {
        let root = fixture.id(number);
        for direction in [TraceDirection::Forward, TraceDirection::Backward, TraceDirection::Full] {
            let a = memory.resolve_trace(root, direction, Some(6), &cancel).await.unwrap();
            let b = sqlite.resolve_trace(root, direction, Some(6), &cancel).await.unwrap();
            assert_eq!(a, b, "Trace of {number} ({direction}) differs between stores");
        }
        let hazard = Some(HazardAssessment::new(3, 4).unwrap());
        let a = memory.compute_recall_impact(root, None, hazard, &cancel).await.unwrap();
        let b = sqlite.compute_recall_impact(root, None, hazard, &cancel).await.unwrap();
        assert_eq!(a, b, "Recall impact of {number} differs between stores");
    }
}

#[tokio::test]
async fn chain_matches_across_stores() {
    assert_parity(&LineageFixture::chain(), &["R", "B1", "B2"]).await;
}

#[tokio::test]
async fn diamond_matches_across_stores() {
    assert_parity(&LineageFixture::diamond(), &["A", "D"]).await;
}

#[tokio::test]
async fn cycle_matches_across_stores() {
    assert_parity(&LineageFixture::cycle(), &["A", "B"]).await;
}

#[tokio::test]
async fn mixed_units_match_across_stores() {
    assert_parity(&LineageFixture::mixed_units(), &["M", "T"]).await;
}

#[tokio::test]
async fn recorded_links_survive_reopen() {
    let fixture = LineageFixture::chain();
    let dir = tempfile::tempdir().unwrap();
    let store = fixture.sqlite_store(&dir);
    let path = store.db_path().unwrap().to_path_buf();
    let engine = TraceabilityEngine::over_store(store, ConfigHandle::default());

    let recorded = engine
        .record_link(&lineage_core::types::NewLink {
            source_batch_id: fixture.id("R"),
            target_batch_id: fixture.id("B2"),
            link_type: lineage_core::types::LinkType::Ingredient,
            quantity_used: 5.0,
            process_step: "top-up".into(),
            process_date: lineage_test::date(4),
        })
        .await
        .unwrap();
    assert!(recorded.warnings.is_empty(), "{:?}", recorded.warnings);
    drop(engine);

    let reopened = SqliteLineageStore::open(&path).unwrap();
    assert_eq!(reopened.link_count().unwrap(), 3);
    let engine = TraceabilityEngine::over_store(std::sync::Arc::new(reopened), ConfigHandle::default());
    let report = engine
        .compute_recall_impact(fixture.id("R"), None, None, &CancellationToken::new())
        .await
        .unwrap();
    let b2 = report.affected_batch(fixture.id("B2")).unwrap();
    assert_eq!(b2.path_count, 2);
}
