use std::sync::Arc;
use std::time::Duration;

use bulk_optimizer::import::{BulkImporter, BulkOperationsImporter};
use bulk_optimizer::store::StoreHandle;
use bulk_optimizer::test_support::{ScriptedStore, memory_store, records};
use bulk_optimizer::{FailureKind, ImportError, ImportMode, StoreError};

#[tokio::test]
async fn records_are_submitted_in_fixed_size_batches() {
    let store = Arc::new(ScriptedStore::new(memory_store()));
    let mut importer = BulkOperationsImporter::new(100);
    importer.initialize(store.clone()).await.expect("init");

    let result = importer.import(&records(250), ImportMode::Create).await.expect("import");

    assert_eq!(store.batch_sizes(), vec![100, 100, 50]);
    assert_eq!(result.succeeded_items, 250);
    assert_eq!(result.failed_items, 0);
    assert_eq!(store.inner().item_count(), 250);
}

#[tokio::test]
async fn conflicting_operations_fail_without_failing_the_batch() {
    let store = memory_store();
    let input = records(20);
    for record in &input[..5] {
        store.create(record).await.expect("seed");
    }
    let mut importer = BulkOperationsImporter::new(10);
    importer.initialize(store.clone()).await.expect("init");

    let result = importer.import(&input, ImportMode::Create).await.expect("import");

    assert_eq!(result.failed_items, 5);
    assert_eq!(result.succeeded_items, 15);
    assert!(result.errors.iter().all(|e| e.kind == FailureKind::Conflict && e.status_code == Some(409)));
}

#[tokio::test]
async fn rejected_batches_count_every_operation_as_failed() {
    let store = Arc::new(
        ScriptedStore::new(memory_store())
            .with_batch_error(StoreError::Throttled { retry_after: Duration::from_millis(10) }),
    );
    let mut importer = BulkOperationsImporter::new(10);
    importer.initialize(store.clone()).await.expect("init");

    let result = importer.import(&records(25), ImportMode::Upsert).await.expect("import");

    assert_eq!(store.batch_sizes(), vec![10, 10, 5]);
    assert_eq!(result.failed_items, 25);
    assert_eq!(result.errors.len(), 3);
    assert!(result.errors.iter().all(|e| e.kind == FailureKind::Throttled));
}

#[tokio::test]
async fn batch_timeout_aborts_the_import() {
    let store = Arc::new(
        ScriptedStore::new(memory_store())
            .with_batch_error(StoreError::Timeout { elapsed: Duration::from_secs(5) }),
    );
    let mut importer = BulkOperationsImporter::new(10);
    importer.initialize(store.clone()).await.expect("init");

    let err = importer
        .import(&records(30), ImportMode::Create)
        .await
        .expect_err("timeout is fatal");

    assert!(matches!(err, ImportError::Timeout { processed: 0, .. }));
    assert_eq!(store.batch_sizes(), vec![10]);
}
