use super::drain;
use crate::downloader::test_helpers::{
    ScriptedTransfer, Step, audio_items, create_test_downloader, item_url,
};
use crate::types::{Event, ItemState};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[tokio::test]
async fn retry_round_recovers_exhausted_item() {
    let transfer = Arc::new(ScriptedTransfer::new(Duration::ZERO));
    // Three 503s exhaust the first pass; the retry round then succeeds
    transfer.script(&item_url(2), vec![Step::Status(503); 3]);
    let (downloader, _temp_dir) = create_test_downloader(2, transfer.clone()).await;
    let mut events = downloader.subscribe();

    let mut summary = downloader.run(&audio_items(3), false).await;
    assert_eq!(summary.failed, 1);

    let retried = downloader.retry(2).await;
    summary.merge_retry(&retried);

    assert_eq!(retried.downloaded, 1);
    assert_eq!(summary.downloaded, 3);
    assert_eq!(summary.failed, 0);
    assert!(summary.failed_items.is_empty());
    assert!(downloader.failed_items().await.is_empty());

    let rounds = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, Event::RetryRound { .. }))
        .count();
    assert_eq!(rounds, 1, "stops once the failed set is empty");
}

#[tokio::test]
async fn retry_without_failures_does_nothing() {
    let transfer = Arc::new(ScriptedTransfer::new(Duration::ZERO));
    let (downloader, _temp_dir) = create_test_downloader(2, transfer.clone()).await;
    downloader.run(&audio_items(2), false).await;
    let mut events = downloader.subscribe();

    let retried = downloader.retry(3).await;

    assert_eq!(retried.total(), 0);
    assert_eq!(retried.failed, 0);
    assert!(drain(&mut events).is_empty());
    assert_eq!(transfer.calls().len(), 2);
}

#[tokio::test]
async fn persistent_failure_uses_every_round_with_growing_backoff() {
    let transfer = Arc::new(ScriptedTransfer::new(Duration::ZERO));
    transfer.script(&item_url(1), vec![Step::Status(404); 10]);
    let (downloader, _temp_dir) = create_test_downloader(1, transfer.clone()).await;
    let mut events = downloader.subscribe();

    downloader.run(&audio_items(1), false).await;
    let started = Instant::now();
    let retried = downloader.retry(2).await;
    let elapsed = started.elapsed();

    assert_eq!(retried.failed, 1);
    assert_eq!(retried.failed_items, vec!["00001lesson.mp3"]);
    assert_eq!(transfer.calls().len(), 3, "one pass plus two rounds");
    // round_backoff is 10ms: rounds wait 10ms then 20ms
    assert!(elapsed >= Duration::from_millis(30), "elapsed {elapsed:?}");

    let events = drain(&mut events);
    let delays: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            Event::RetryRound { delay_ms, .. } => Some(*delay_ms),
            _ => None,
        })
        .collect();
    assert_eq!(delays, vec![10, 20]);
    assert!(events.iter().any(|e| matches!(
        e,
        Event::ItemState {
            state: ItemState::BackoffWait,
            ..
        }
    )));
}

#[tokio::test]
async fn zero_rounds_keeps_failed_set() {
    let transfer = Arc::new(ScriptedTransfer::new(Duration::ZERO));
    transfer.script(&item_url(1), [Step::Status(410)]);
    let (downloader, _temp_dir) = create_test_downloader(1, transfer.clone()).await;
    let mut summary = downloader.run(&audio_items(2), false).await;

    let retried = downloader.retry(0).await;
    summary.merge_retry(&retried);

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failed_items, vec!["00001lesson.mp3"]);
    assert_eq!(transfer.calls().len(), 2);
}

#[tokio::test]
async fn cancelled_batch_skips_retry_rounds() {
    let transfer = Arc::new(ScriptedTransfer::new(Duration::ZERO));
    transfer.script(&item_url(1), [Step::Status(404)]);
    let (downloader, _temp_dir) = create_test_downloader(1, transfer.clone()).await;
    downloader.run(&audio_items(1), false).await;

    downloader.cancel();
    let retried = downloader.retry(3).await;

    assert!(retried.cancelled);
    assert_eq!(retried.failed, 1);
    assert_eq!(transfer.calls().len(), 1);
}
