//! Aggregation queries over a synced store: calendar-day revenue, block
//! windows, pagination, retention, and stats snapshots.

mod common;

use common::{
    chain_timestamp, init_logger, inline_input, now, payment_block, seed_empty_blocks,
    stored_block, stored_transaction, WATCHED, WATCHED_2,
};
use fluxrevenue::{
    stats::NodeTierCounts,
    storage::{stores::InMemory, Storage},
    RevenueIndexerBuilder, SyncTuning,
};
use serde_json::json;

/// Build an indexer over a mock chain with three payments spread across
/// three days: 1.5 and 1.0 to the first address, 2.5 to the second.
async fn synced_indexer() -> (
    fluxrevenue::RevenueIndexer<InMemory, fluxrevenue::daemon_client::MockClient>,
    fluxrevenue::daemon_client::MockClient,
) {
    let (indexer, client) = RevenueIndexerBuilder::new(
        vec![WATCHED.to_string(), WATCHED_2.to_string()],
        InMemory::new(),
    )
    .tuning(SyncTuning {
        blocks_per_day: 720,
        retention_days: 30,
        max_blocks_per_sync: 1000,
        batch_size: 100,
        max_concurrent: 8,
        ..SyncTuning::default()
    })
    .build_with_mock_daemon()
    .await;

    let tip = 3000;
    seed_empty_blocks(&client, 2280..=tip, tip);
    client.add_block(payment_block(
        2990,
        chain_timestamp(tip, 2990),
        "tx-today",
        1.5,
        WATCHED,
        inline_input("tS1"),
    ));
    client.add_block(payment_block(
        2500,
        chain_timestamp(tip, 2500),
        "tx-yesterday",
        2.5,
        WATCHED_2,
        inline_input("tS2"),
    ));
    client.add_block(payment_block(
        2300,
        chain_timestamp(tip, 2300),
        "tx-older",
        1.0,
        WATCHED,
        inline_input("tS3"),
    ));

    let outcome = indexer.trigger_sync().await.unwrap();
    assert!(matches!(outcome, fluxrevenue::CycleOutcome::Completed(_)));
    (indexer, client)
}

#[tokio::test]
async fn revenue_totals_and_breakdown() {
    init_logger();
    let (indexer, _client) = synced_indexer().await;

    let summary = indexer.revenue(30, &[], true).await.unwrap();
    assert!((summary.total - 5.0).abs() < 1e-9);
    assert_eq!(summary.count, 3);

    let breakdown = summary.breakdown.expect("breakdown was requested");
    let first = &breakdown[WATCHED];
    assert!((first.total.total - 2.5).abs() < 1e-9);
    assert_eq!(first.total.count, 2);
    let second = &breakdown[WATCHED_2];
    assert!((second.total.total - 2.5).abs() < 1e-9);
    assert_eq!(second.total.count, 1);

    // The combined series is sorted and sums to the reported total.
    let daily_sum: f64 = summary.daily.iter().map(|day| day.total).sum();
    assert!((daily_sum - summary.total).abs() < 1e-9);
    assert!(summary
        .daily
        .windows(2)
        .all(|pair| pair[0].date < pair[1].date));
}

#[tokio::test]
async fn daily_series_sums_match_totals_per_address() {
    init_logger();
    let (indexer, _client) = synced_indexer().await;

    for address in [WATCHED, WATCHED_2] {
        let summary = indexer
            .revenue(30, &[address.to_string()], true)
            .await
            .unwrap();
        let breakdown = summary.breakdown.unwrap();
        let address_revenue = &breakdown[address];
        let daily_sum: f64 = address_revenue.daily.iter().map(|day| day.total).sum();
        assert!(
            (daily_sum - address_revenue.total.total).abs() < 1e-9,
            "daily series of {address} must sum to its total"
        );
    }
}

#[tokio::test]
async fn block_window_revenue() {
    init_logger();
    let (indexer, _client) = synced_indexer().await;

    // A full day of blocks covers all three payments.
    let day = indexer.revenue_by_blocks(720, None).await.unwrap();
    assert_eq!(day.period, "day");
    assert_eq!(day.start_height, 2280);
    assert_eq!(day.end_height, 3000);
    assert!((day.total - 5.0).abs() < 1e-9);
    assert_eq!(day.count, 3);

    // A narrow window only covers the newest payment.
    let narrow = indexer.revenue_by_blocks(100, None).await.unwrap();
    assert_eq!(narrow.period, "100 blocks");
    assert!((narrow.total - 1.5).abs() < 1e-9);

    // Restricting to one address filters the window.
    let filtered = indexer
        .revenue_by_blocks(720, Some(WATCHED))
        .await
        .unwrap();
    assert!((filtered.total - 2.5).abs() < 1e-9);
    assert_eq!(filtered.count, 2);
    assert_eq!(filtered.addresses.len(), 1);
}

#[tokio::test]
async fn transaction_listing_paginates_and_searches() {
    init_logger();
    let (indexer, _client) = synced_indexer().await;

    let first_page = indexer.transactions(None, 1, 2, None).await.unwrap();
    assert_eq!(first_page.transactions.len(), 2);
    assert_eq!(first_page.pagination.total, 3);
    assert_eq!(first_page.pagination.pages, 2);
    // Newest first.
    assert_eq!(first_page.transactions[0].tx_hash, "tx-today");

    let second_page = indexer.transactions(None, 2, 2, None).await.unwrap();
    assert_eq!(second_page.transactions.len(), 1);
    assert_eq!(second_page.transactions[0].tx_hash, "tx-older");

    // Search by sender.
    let by_sender = indexer.transactions(None, 1, 10, Some("tS2")).await.unwrap();
    assert_eq!(by_sender.pagination.total, 1);
    assert_eq!(by_sender.transactions[0].tx_hash, "tx-yesterday");

    // Search by stringified value.
    let by_value = indexer.transactions(None, 1, 10, Some("2.5")).await.unwrap();
    assert_eq!(by_value.pagination.total, 1);

    // Search by transaction hash substring.
    let by_hash = indexer
        .transactions(None, 1, 10, Some("today"))
        .await
        .unwrap();
    assert_eq!(by_hash.pagination.total, 1);

    // Filter by address.
    let by_address = indexer
        .transactions(Some(WATCHED_2), 1, 10, None)
        .await
        .unwrap();
    assert_eq!(by_address.pagination.total, 1);
    assert_eq!(by_address.transactions[0].address, WATCHED_2);
}

#[tokio::test]
async fn address_breakdown_covers_all_watched_addresses() {
    init_logger();
    let (indexer, _client) = synced_indexer().await;

    let breakdown = indexer.address_breakdown().await.unwrap();
    assert_eq!(breakdown.len(), 2);
    assert!((breakdown[WATCHED].total.total - 2.5).abs() < 1e-9);
    assert!(breakdown[WATCHED].total.first_timestamp.is_some());
}

#[tokio::test]
async fn retention_sweep_removes_expired_rows_transactions_first() {
    init_logger();

    // Seed one block (and a payment in it) far older than the retention
    // window.
    let mut store = InMemory::new();
    let old_timestamp = now() - 10 * 86_400;
    store
        .batch_insert(
            vec![stored_block(100, old_timestamp)],
            vec![stored_transaction(
                100,
                old_timestamp,
                "tx-ancient",
                0,
                WATCHED,
                9.0,
                Some("tS9"),
            )],
        )
        .unwrap();

    let (indexer, client) = RevenueIndexerBuilder::new(vec![WATCHED.to_string()], store)
        .tuning(SyncTuning {
            // A 900-block window: the retention floor sits exactly at the
            // seeded height, so the cycle is purely forward.
            blocks_per_day: 450,
            retention_days: 2,
            max_blocks_per_sync: 2000,
            batch_size: 100,
            max_concurrent: 8,
            ..SyncTuning::default()
        })
        .build_with_mock_daemon()
        .await;
    seed_empty_blocks(&client, 101..=1000, 1000);

    let outcome = indexer.trigger_sync().await.unwrap();
    let metrics = match outcome {
        fluxrevenue::CycleOutcome::Completed(metrics) => metrics,
        fluxrevenue::CycleOutcome::AlreadyRunning => unreachable!(),
    };
    assert_eq!(metrics.transactions_pruned, 1);
    assert_eq!(metrics.blocks_pruned, 1);

    let status = indexer.sync_status();
    assert_eq!(status.lowest_synced, Some(101));
    let page = indexer.transactions(None, 1, 10, None).await.unwrap();
    assert_eq!(page.pagination.total, 0);
}

#[tokio::test]
async fn balance_is_served_from_the_daemon() {
    init_logger();
    let (indexer, client) = RevenueIndexerBuilder::new(
        vec![WATCHED.to_string()],
        InMemory::new(),
    )
    .build_with_mock_daemon()
    .await;
    client.set_balance(WATCHED, 123.45);

    let balance = indexer.balance(WATCHED).await.unwrap();
    assert!((balance - 123.45).abs() < 1e-9);
}

#[tokio::test]
async fn network_stats_snapshots_are_recorded_once_per_hour() {
    init_logger();
    let (indexer, client) = RevenueIndexerBuilder::new(
        vec![WATCHED.to_string()],
        InMemory::new(),
    )
    .build_with_mock_daemon()
    .await;
    client.set_node_counts(NodeTierCounts {
        total: 10,
        cumulus: 6,
        nimbus: 3,
        stratus: 1,
    });
    client.set_flux_info("flux", json!([{"flux": {"arcaneVersion": "1.0.0"}}]));
    client.set_flux_info(
        "benchmark",
        json!([{"benchmark": {"bench": {"cores": 8, "ram": 16.0, "ssd": 500.0}}}]),
    );
    client.set_flux_info(
        "apps",
        json!([{"apps": {"runningapps": [{"cpu": 1.0, "ram": 2000.0, "hdd": 20.0}]}}]),
    );

    let (nodes, utilization) = indexer.collect_network_stats().await.unwrap();
    assert_eq!(nodes.total, 10);
    assert_eq!(utilization.running_apps, 1);

    // A second collection within the hour is deduplicated.
    indexer.collect_network_stats().await.unwrap();
    assert_eq!(indexer.node_stats_since(0).await.unwrap().len(), 1);
    assert_eq!(indexer.utilization_stats_since(0).await.unwrap().len(), 1);
}
