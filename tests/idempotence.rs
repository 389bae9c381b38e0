use bulk_optimizer::config::ImporterConfig;
use bulk_optimizer::import::build_importer;
use bulk_optimizer::store::memory::{CONFLICT_CHARGE, PROCEDURE_BASE_CHARGE};
use bulk_optimizer::test_support::{memory_store, records};
use bulk_optimizer::{ImportMode, StrategyKind};

#[tokio::test]
async fn upserting_twice_never_fails() {
    for kind in StrategyKind::ALL {
        let store = memory_store();
        let mut importer = build_importer(kind, &ImporterConfig::new());
        importer.initialize(store.clone()).await.expect("init");
        let input = records(120);

        let first = importer.import(&input, ImportMode::Upsert).await.expect("first");
        let second = importer.import(&input, ImportMode::Upsert).await.expect("second");

        assert_eq!(first.failed_items, 0, "{kind}");
        assert_eq!(second.failed_items, 0, "{kind}");
        assert_eq!(store.item_count(), 120, "{kind}");
    }
}

#[tokio::test]
async fn creating_twice_fails_every_item_the_second_time() {
    for kind in StrategyKind::ALL {
        let store = memory_store();
        let mut importer = build_importer(kind, &ImporterConfig::new());
        importer.initialize(store.clone()).await.expect("init");
        let input = records(120);

        let first = importer.import(&input, ImportMode::Create).await.expect("first");
        let second = importer.import(&input, ImportMode::Create).await.expect("second");

        assert_eq!(first.failed_items, 0, "{kind}");
        assert_eq!(second.failed_items, input.len(), "{kind}");
        assert_eq!(second.succeeded_items, 0, "{kind}");
        assert_eq!(store.item_count(), 120, "{kind}");
    }
}

#[tokio::test]
async fn empty_input_writes_nothing() {
    for kind in StrategyKind::ALL {
        let store = memory_store();
        let mut importer = build_importer(kind, &ImporterConfig::new());
        importer.initialize(store.clone()).await.expect("init");

        let result = importer.import(&[], ImportMode::Create).await.expect("import");

        assert_eq!(result.total_items(), 0, "{kind}");
        assert_eq!(store.metrics().item_writes + store.metrics().procedure_executions, 0);
    }
}

#[tokio::test]
async fn rejected_creates_are_still_billed() {
    for kind in StrategyKind::ALL {
        let store = memory_store();
        let mut importer = build_importer(kind, &ImporterConfig::new());
        importer.initialize(store.clone()).await.expect("init");
        let input = records(10);
        importer.import(&input, ImportMode::Create).await.expect("first");

        let second = importer.import(&input, ImportMode::Create).await.expect("second");

        assert_eq!(second.failed_items, 10, "{kind}");
        let expected = match kind {
            // One execution, rejected on its first item.
            StrategyKind::StoredProcedure => PROCEDURE_BASE_CHARGE + CONFLICT_CHARGE,
            _ => CONFLICT_CHARGE * 10.0,
        };
        assert!(
            (second.request_units - expected).abs() < 1e-9,
            "{kind}: {} RU",
            second.request_units
        );
    }
}
