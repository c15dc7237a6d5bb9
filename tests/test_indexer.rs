//! Integration tests for the session supervisor
//!
//! Tests cover:
//! - Backfill from the start block in chunks, then live polling
//! - Reconnection after connect failures and dropped sessions
//! - Re-backfill on reconnect without double counting
//! - Log filter recreation with gap-fill, without reconnecting
//! - Reorged-out logs are ignored
//!
//! All tests run on a paused clock; retry delays elapse instantly.

mod common;

use common::*;
use memo_indexer::error::IndexerError;
use memo_indexer::{Indexer, IndexerState, IndexerStatus, Ledger};
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Runs the indexer until `done` holds, with a generous virtual-time cap.
async fn run_until<C, F, Fut>(indexer: &Indexer<C>, done: F)
where
    C: memo_indexer::connector::Connector,
    F: Fn(Arc<IndexerStatus>) -> Fut,
    Fut: Future<Output = bool>,
{
    let status = indexer.status();
    let shutdown = async {
        loop {
            if done(status.clone()).await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(3600), indexer.run(shutdown))
        .await
        .expect("indexer did not reach the expected state");
}

#[tokio::test(start_paused = true)]
async fn test_backfill_then_live_poll() {
    let p = pipeline();
    let chain = MockChain::new(25);
    chain.add_history(memo_log(&p.abi, 1, sender(0x01), 3), ONE_ETH);
    chain.add_history(memo_log(&p.abi, 2, sender(0x02), 24), 2 * ONE_ETH);
    let live = memo_log(&p.abi, 3, sender(0x01), 26);
    chain.set_tx_value(tx_hash(3), ONE_ETH);
    chain.script_poll(Ok(vec![]));
    chain.script_poll(Ok(vec![live]));

    let indexer = Indexer::new(
        MockConnector::new(chain.clone()),
        p.processor.clone(),
        p.log_bus.clone(),
        options(&p.abi, 0, 10),
    );
    let ledger = p.ledger.clone();
    run_until(&indexer, |_| {
        let ledger = ledger.clone();
        async move { ledger.count().await.unwrap() == 3 }
    })
    .await;

    assert_eq!(chain.log_ranges(), vec![(0, 9), (10, 19), (20, 25)]);
    assert_eq!(p.stats.total().await.unwrap(), Decimal::from(4));
    let status = indexer.status();
    assert_eq!(status.sessions_established(), 1);
    assert_eq!(status.connection_attempts(), 1);
    assert_eq!(status.state(), IndexerState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_start_block_limits_backfill() {
    let p = pipeline();
    let chain = MockChain::new(50);
    chain.add_history(memo_log(&p.abi, 1, sender(0x01), 5), ONE_ETH);
    chain.add_history(memo_log(&p.abi, 2, sender(0x01), 45), ONE_ETH);

    let indexer = Indexer::new(
        MockConnector::new(chain.clone()),
        p.processor.clone(),
        p.log_bus.clone(),
        options(&p.abi, 40, 100),
    );
    run_until(&indexer, |status| async move {
        status.state() == IndexerState::Polling
    })
    .await;

    assert_eq!(chain.log_ranges(), vec![(40, 50)]);
    assert!(p.ledger.get(1).await.unwrap().is_none());
    assert!(p.ledger.get(2).await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_after_connect_failures() {
    let p = pipeline();
    let chain = MockChain::new(10);
    chain.add_history(memo_log(&p.abi, 1, sender(0x01), 5), ONE_ETH);

    let connector = MockConnector::new(chain.clone()).fail_next(vec![
        IndexerError::Connectivity("connection refused".into()),
        IndexerError::Connectivity("connection refused".into()),
    ]);
    let indexer = Indexer::new(
        connector,
        p.processor.clone(),
        p.log_bus.clone(),
        options(&p.abi, 0, 100),
    );
    let started = tokio::time::Instant::now();
    run_until(&indexer, |status| async move {
        status.state() == IndexerState::Polling
    })
    .await;

    let status = indexer.status();
    assert_eq!(status.connection_attempts(), 3);
    assert_eq!(status.sessions_established(), 1);
    // two fixed 5s delays before the successful attempt
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(p.ledger.count().await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_session_rebackfills_without_double_counting() {
    let p = pipeline();
    let chain = MockChain::new(30);
    chain.add_history(memo_log(&p.abi, 1, sender(0x01), 5), ONE_ETH);
    chain.add_history(memo_log(&p.abi, 2, sender(0x02), 15), 3 * ONE_ETH);
    chain.script_poll(Err(IndexerError::Connectivity("websocket closed".into())));

    let indexer = Indexer::new(
        MockConnector::new(chain.clone()),
        p.processor.clone(),
        p.log_bus.clone(),
        options(&p.abi, 0, 100),
    );
    run_until(&indexer, |status| async move {
        status.sessions_established() == 2 && status.state() == IndexerState::Polling
    })
    .await;

    // both sessions backfilled the full range
    assert_eq!(chain.log_ranges(), vec![(0, 30), (0, 30)]);
    assert_eq!(chain.filters_installed(), 2);
    assert_eq!(p.ledger.count().await.unwrap(), 2);
    assert_eq!(p.stats.total().await.unwrap(), Decimal::from(4));
}

#[tokio::test(start_paused = true)]
async fn test_lost_filter_resubscribes_and_gap_fills() {
    let p = pipeline();
    let chain = MockChain::new(10);
    chain.add_history(memo_log(&p.abi, 1, sender(0x01), 5), ONE_ETH);
    // emitted while the filter was gone, only reachable through eth_getLogs
    chain.add_history(memo_log(&p.abi, 2, sender(0x02), 12), 2 * ONE_ETH);
    chain.script_poll(Ok(vec![]));
    chain.script_poll_at_head(15, Err(IndexerError::Subscription("filter not found".into())));

    let indexer = Indexer::new(
        MockConnector::new(chain.clone()),
        p.processor.clone(),
        p.log_bus.clone(),
        options(&p.abi, 0, 100),
    );
    let ledger = p.ledger.clone();
    run_until(&indexer, |status| {
        let ledger = ledger.clone();
        async move { status.resubscriptions() == 1 && ledger.count().await.unwrap() == 2 }
    })
    .await;

    let status = indexer.status();
    assert_eq!(status.sessions_established(), 1);
    assert_eq!(status.connection_attempts(), 1);
    assert_eq!(chain.filters_installed(), 2);
    // initial backfill, then gap-fill from the checkpoint (subscription head)
    assert_eq!(chain.log_ranges(), vec![(0, 10), (10, 15)]);
    assert_eq!(p.stats.total().await.unwrap(), Decimal::from(3));
}

#[tokio::test(start_paused = true)]
async fn test_removed_logs_are_skipped() {
    let p = pipeline();
    let chain = MockChain::new(10);
    let mut reorged = memo_log(&p.abi, 1, sender(0x01), 11);
    reorged.removed = Some(true);
    chain.set_tx_value(tx_hash(1), ONE_ETH);
    let kept = memo_log(&p.abi, 2, sender(0x01), 11);
    chain.set_tx_value(tx_hash(2), ONE_ETH);
    chain.script_poll(Ok(vec![reorged, kept]));

    let indexer = Indexer::new(
        MockConnector::new(chain.clone()),
        p.processor.clone(),
        p.log_bus.clone(),
        options(&p.abi, 0, 100),
    );
    let ledger = p.ledger.clone();
    let chain_for_check = chain.clone();
    run_until(&indexer, |_| {
        let ledger = ledger.clone();
        let chain = chain_for_check.clone();
        async move { chain.pending_steps() == 0 && ledger.count().await.unwrap() == 1 }
    })
    .await;

    assert!(p.ledger.get(1).await.unwrap().is_none());
    assert!(p.ledger.get(2).await.unwrap().is_some());
    assert_eq!(p.stats.total().await.unwrap(), Decimal::ONE);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_while_disconnected() {
    let p = pipeline();
    let chain = MockChain::new(0);
    let connector = MockConnector::new(chain).fail_next(
        (0..100)
            .map(|_| IndexerError::Connectivity("no route to host".into()))
            .collect(),
    );
    let indexer = Indexer::new(
        connector,
        p.processor.clone(),
        p.log_bus.clone(),
        options(&p.abi, 0, 100),
    );
    run_until(&indexer, |status| async move { status.connection_attempts() >= 4 }).await;

    let status = indexer.status();
    assert_eq!(status.sessions_established(), 0);
    assert_eq!(status.state(), IndexerState::Disconnected);
}
