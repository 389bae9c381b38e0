use std::sync::Arc;
use std::time::Duration;

use bulk_optimizer::import::{BulkImporter, ParallelImporter};
use bulk_optimizer::store::memory::write_charge;
use bulk_optimizer::store::StoreHandle;
use bulk_optimizer::test_support::{ScriptedStore, memory_store, records};
use bulk_optimizer::{FailureKind, ImportMode};

#[tokio::test]
async fn unique_records_are_all_written_within_the_parallelism_bound() {
    let inner = memory_store();
    let store = Arc::new(ScriptedStore::new(inner.clone()).with_item_delay(Duration::from_millis(1)));
    let mut importer = ParallelImporter::new(20);
    importer.initialize(store.clone()).await.expect("init");
    let input = records(3000);

    let result = importer.import(&input, ImportMode::Create).await.expect("import");

    assert_eq!(result.failed_items, 0);
    assert_eq!(result.succeeded_items, 3000);
    assert!(result.errors.is_empty());
    let expected: f64 = input.iter().map(|r| write_charge(r.serialized_len())).sum();
    assert!((result.request_units - expected).abs() < 1e-6);
    assert_eq!(inner.item_count(), 3000);
    assert!(store.max_in_flight() <= 20, "saw {} writes in flight", store.max_in_flight());
    assert!(store.max_in_flight() > 1);
}

#[tokio::test]
async fn existing_keys_fail_individually_on_create() {
    let store = memory_store();
    let input = records(100);
    for record in input.iter().step_by(4) {
        store.upsert(record).await.expect("seed");
    }
    let mut importer = ParallelImporter::new(8);
    importer.initialize(store.clone()).await.expect("init");

    let result = importer.import(&input, ImportMode::Create).await.expect("import");

    assert_eq!(result.failed_items, 25);
    assert_eq!(result.succeeded_items, 75);
    assert_eq!(result.errors.len(), 25);
    assert!(result.errors.iter().all(|e| e.kind == FailureKind::Conflict));
    assert!(result.errors.iter().all(|e| e.record_id.is_some()));
    assert_eq!(store.item_count(), 100);
}

#[tokio::test]
async fn parallelism_of_one_writes_sequentially() {
    let store = Arc::new(ScriptedStore::new(memory_store()).with_item_delay(Duration::from_millis(1)));
    let mut importer = ParallelImporter::new(1);
    importer.initialize(store.clone()).await.expect("init");

    let result = importer.import(&records(10), ImportMode::Upsert).await.expect("import");

    assert_eq!(result.succeeded_items, 10);
    assert_eq!(store.max_in_flight(), 1);
}
