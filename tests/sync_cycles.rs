//! End-to-end sync cycle behavior against a mock daemon and an in-memory
//! store.

mod common;

use std::time::Duration;

use common::{
    chain_timestamp, empty_block, init_logger, now, payment_block, prev_input,
    previous_transaction, seed_empty_blocks, stored_block, stored_transaction, WATCHED,
};
use fluxrevenue::{
    storage::{stores::InMemory, Storage},
    CycleOutcome, FluxRevenueError, RevenueIndexerBuilder, SyncTuning,
};

fn completed(outcome: CycleOutcome) -> fluxrevenue::CycleMetrics {
    match outcome {
        CycleOutcome::Completed(metrics) => metrics,
        CycleOutcome::AlreadyRunning => panic!("cycle was unexpectedly already running"),
    }
}

#[tokio::test]
async fn fresh_index_syncs_one_day_behind_tip() {
    init_logger();
    let (indexer, client) = RevenueIndexerBuilder::new(
        vec![WATCHED.to_string()],
        InMemory::new(),
    )
    .tuning(SyncTuning {
        blocks_per_day: 720,
        retention_days: 30,
        max_blocks_per_sync: 500,
        batch_size: 50,
        max_concurrent: 4,
        ..SyncTuning::default()
    })
    .build_with_mock_daemon()
    .await;
    seed_empty_blocks(&client, 280..=779, 1000);

    let metrics = completed(indexer.trigger_sync().await.unwrap());

    assert_eq!(metrics.planned, 500);
    assert_eq!(metrics.blocks_inserted, 500);
    assert_eq!(metrics.failed, 0);

    let status = indexer.sync_status();
    assert_eq!(status.current_height, 1000);
    assert_eq!(status.highest_synced, Some(779));
    assert_eq!(status.lowest_synced, Some(280));
    assert_eq!(status.total_blocks_synced, 500);
    assert!(status.is_online);
    assert!(!status.is_first_run);
}

#[tokio::test]
async fn payments_are_extracted_and_senders_resolved() {
    init_logger();
    let (indexer, client) = RevenueIndexerBuilder::new(
        vec!["tADDR1".to_string()],
        InMemory::new(),
    )
    .tuning(SyncTuning {
        blocks_per_day: 720,
        retention_days: 30,
        max_blocks_per_sync: 2000,
        batch_size: 100,
        max_concurrent: 8,
        ..SyncTuning::default()
    })
    .build_with_mock_daemon()
    .await;

    let tip = 1500;
    seed_empty_blocks(&client, 780..=tip, tip);
    let mut block = payment_block(
        1500,
        1_700_000_000,
        "abc123",
        1.25,
        "tADDR1",
        prev_input("A", 2),
    );
    // A second output to someone else must not produce a record.
    block.tx[0].vout.push(common::output(0.0, "tOTHER"));
    client.add_block(block);
    client.add_transaction(previous_transaction("A", 2, "tSENDER"));

    let metrics = completed(indexer.trigger_sync().await.unwrap());
    assert_eq!(metrics.payments_inserted, 1);

    let page = indexer.transactions(None, 1, 10, None).await.unwrap();
    assert_eq!(page.pagination.total, 1);
    let record = &page.transactions[0];
    assert_eq!(record.block_height, 1500);
    assert_eq!(record.address, "tADDR1");
    assert_eq!(record.vout_index, 0);
    assert_eq!(record.from_address, "tSENDER");
    assert!((record.value - 1.25).abs() < f64::EPSILON);
    assert_eq!(record.timestamp, 1_700_000_000);
}

#[tokio::test]
async fn hybrid_cycle_splits_budget_between_directions() {
    init_logger();

    // Seed a store that is mid-backfill: heights 500..=1990 present.
    let mut store = InMemory::new();
    let seeded: Vec<_> = (500..=1990)
        .map(|height| stored_block(height, chain_timestamp(2000, height)))
        .collect();
    store.batch_insert(seeded, Vec::new()).unwrap();

    let (indexer, client) = RevenueIndexerBuilder::new(vec![WATCHED.to_string()], store)
        .tuning(SyncTuning {
            blocks_per_day: 600,
            retention_days: 3,
            max_blocks_per_sync: 100,
            batch_size: 25,
            max_concurrent: 4,
            ..SyncTuning::default()
        })
        .build_with_mock_daemon()
        .await;
    seed_empty_blocks(&client, 1991..=2000, 2000);
    seed_empty_blocks(&client, 410..=499, 2000);

    let metrics = completed(indexer.trigger_sync().await.unwrap());
    assert_eq!(metrics.planned, 100);
    assert_eq!(metrics.blocks_inserted, 100);

    let status = indexer.sync_status();
    assert_eq!(status.highest_synced, Some(2000));
    assert_eq!(status.lowest_synced, Some(410));
    assert_eq!(status.new_blocks_remaining, 0);
    // 410 down to the retention floor at 200 is still unsynced.
    assert_eq!(status.historical_blocks_remaining, 210);
}

#[tokio::test]
async fn resync_with_no_upstream_changes_inserts_nothing() {
    init_logger();
    let (indexer, client) = RevenueIndexerBuilder::new(
        vec![WATCHED.to_string()],
        InMemory::new(),
    )
    .tuning(SyncTuning {
        blocks_per_day: 720,
        retention_days: 1,
        max_blocks_per_sync: 2000,
        batch_size: 100,
        max_concurrent: 8,
        ..SyncTuning::default()
    })
    .build_with_mock_daemon()
    .await;
    seed_empty_blocks(&client, 280..=1000, 1000);

    let first = completed(indexer.trigger_sync().await.unwrap());
    assert_eq!(first.blocks_inserted, 721);
    let highest_after_first = indexer.sync_status().highest_synced;

    let second = completed(indexer.trigger_sync().await.unwrap());
    assert_eq!(second.blocks_inserted, 0);
    assert_eq!(second.planned, 0);
    assert!(second.complete);

    let status = indexer.sync_status();
    assert_eq!(status.highest_synced, highest_after_first);
    assert_eq!(status.total_blocks_synced, 721);
    assert!(status.is_complete);
    assert!(status
        .last_sync_message
        .to_lowercase()
        .contains("no new blocks"));
}

#[tokio::test]
async fn zero_budget_cycle_writes_nothing() {
    init_logger();
    let (indexer, client) = RevenueIndexerBuilder::new(
        vec![WATCHED.to_string()],
        InMemory::new(),
    )
    .tuning(SyncTuning {
        max_blocks_per_sync: 0,
        ..SyncTuning::default()
    })
    .build_with_mock_daemon()
    .await;
    seed_empty_blocks(&client, 900..=1000, 1000);

    let metrics = completed(indexer.trigger_sync().await.unwrap());
    assert_eq!(metrics.planned, 0);
    assert_eq!(metrics.processed, 0);
    assert_eq!(metrics.blocks_inserted, 0);

    let status = indexer.sync_status();
    assert_eq!(status.total_blocks_synced, 0);
    assert!(status.is_first_run);
}

#[tokio::test]
async fn near_completion_gap_fill_restores_missing_heights() {
    init_logger();

    // Retention window 7840..=10000, fully synced except two heights.
    let mut store = InMemory::new();
    let seeded: Vec<_> = (7840..=10000)
        .filter(|height| *height != 9500 && *height != 9501)
        .map(|height| stored_block(height, chain_timestamp(10_000, height)))
        .collect();
    store.batch_insert(seeded, Vec::new()).unwrap();

    let (indexer, client) = RevenueIndexerBuilder::new(vec![WATCHED.to_string()], store)
        .tuning(SyncTuning {
            blocks_per_day: 240,
            retention_days: 9,
            max_blocks_per_sync: 2000,
            batch_size: 50,
            max_concurrent: 4,
            ..SyncTuning::default()
        })
        .build_with_mock_daemon()
        .await;
    // Only the two gap heights exist upstream; fetching anything else fails
    // the test via failed-batch counters.
    client.add_block(empty_block(9500, chain_timestamp(10_000, 9500)));
    client.add_block(empty_block(9501, chain_timestamp(10_000, 9501)));
    client.set_tip(10_000);

    let metrics = completed(indexer.trigger_sync().await.unwrap());
    assert_eq!(metrics.gaps_filled, 2);
    assert_eq!(metrics.failed, 0);
    assert!(metrics.complete);

    let status = indexer.sync_status();
    assert_eq!(status.total_blocks_synced, 2161);
    assert!(status.is_complete);
    assert_eq!(status.new_blocks_remaining, 0);
}

#[tokio::test]
async fn failed_fetches_are_skipped_not_fatal() {
    init_logger();
    let (indexer, client) = RevenueIndexerBuilder::new(
        vec![WATCHED.to_string()],
        InMemory::new(),
    )
    .tuning(SyncTuning {
        blocks_per_day: 240,
        retention_days: 30,
        max_blocks_per_sync: 2000,
        batch_size: 50,
        max_concurrent: 4,
        ..SyncTuning::default()
    })
    .build_with_mock_daemon()
    .await;
    seed_empty_blocks(&client, 60..=300, 300);
    for height in 100..=110 {
        client.remove_block(height);
    }
    client.set_tip(300);

    let metrics = completed(indexer.trigger_sync().await.unwrap());
    assert_eq!(metrics.planned, 241);
    assert_eq!(metrics.processed, 241);
    assert_eq!(metrics.failed, 11);
    assert_eq!(metrics.blocks_inserted, 230);

    let status = indexer.sync_status();
    assert_eq!(status.highest_synced, Some(300));
}

#[tokio::test]
async fn offline_daemon_aborts_cycle_with_error() {
    init_logger();
    let (indexer, _client) = RevenueIndexerBuilder::new(
        vec![WATCHED.to_string()],
        InMemory::new(),
    )
    .build_with_mock_daemon()
    .await;
    // Mock chain has no tip at all.

    let result = indexer.trigger_sync().await;
    assert!(matches!(result, Err(FluxRevenueError::Sync(_))));

    let status = indexer.sync_status();
    assert!(!status.is_online);
}

#[tokio::test]
async fn sender_backfill_updates_null_senders() {
    init_logger();

    let mut store = InMemory::new();
    let timestamp = now();
    store
        .batch_insert(
            vec![stored_block(500, timestamp)],
            vec![stored_transaction(
                500, timestamp, "B", 0, WATCHED, 3.5, None,
            )],
        )
        .unwrap();

    let (indexer, client) = RevenueIndexerBuilder::new(vec![WATCHED.to_string()], store)
        .build_with_mock_daemon()
        .await;
    client.add_block(payment_block(
        500,
        timestamp,
        "B",
        3.5,
        WATCHED,
        prev_input("P", 1),
    ));
    client.add_transaction(previous_transaction("P", 1, "tSENDER2"));

    let updated = indexer.trigger_backfill(10).await.unwrap();
    assert_eq!(updated, 1);

    let page = indexer.transactions(Some(WATCHED), 1, 10, None).await.unwrap();
    assert_eq!(page.transactions[0].from_address, "tSENDER2");

    // A second pass has nothing left to do.
    assert_eq!(indexer.trigger_backfill(10).await.unwrap(), 0);
}

#[tokio::test]
async fn run_loop_guards_reentry_and_stops_cleanly() {
    init_logger();
    let (indexer, client) = RevenueIndexerBuilder::new(
        vec![WATCHED.to_string()],
        InMemory::new(),
    )
    .sync_interval(Duration::from_secs(60))
    .tuning(SyncTuning {
        blocks_per_day: 60,
        retention_days: 2,
        max_blocks_per_sync: 2000,
        batch_size: 50,
        max_concurrent: 4,
        ..SyncTuning::default()
    })
    .build_with_mock_daemon()
    .await;
    seed_empty_blocks(&client, 1..=100, 100);

    let mut subscriber = indexer.subscribe();
    indexer.run().await.unwrap();
    assert!(matches!(
        indexer.run().await,
        Err(FluxRevenueError::AlreadyRunning)
    ));

    // The loop's first cycle fires immediately; wait for it to publish.
    let update = subscriber
        .recv_timeout(Duration::from_secs(30))
        .await
        .expect("timeout waiting for status update")
        .expect("status channel closed");
    assert!(update.is_online);

    indexer.stop().await.unwrap();
    assert!(matches!(
        indexer.status().await,
        fluxrevenue::IndexerStatus::NotRunning
    ));

    // The loop can be started again after a clean stop.
    indexer.run().await.unwrap();
    indexer.stop().await.unwrap();
}
