//! Poller and evaluation actors wired together the way `notifier watch` runs

use std::sync::Arc;
use std::time::Duration;

use enviro_notify::{
    MetricType,
    actors::{evaluation::EvaluationHandle, messages::EvaluationStats, poller::PollerHandle},
    config::PollConfig,
    dispatcher::DispatchConfig,
    evaluator::Evaluator,
    storage::{MemoryBackend, SubscriptionStore},
};
use tokio::sync::mpsc;

use crate::helpers::*;

async fn wait_for_completed(handle: &EvaluationHandle, completed: u64) -> EvaluationStats {
    for _ in 0..500 {
        let stats = handle.get_stats().await.unwrap();
        if stats.evaluations_completed >= completed {
            return stats;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("evaluations did not complete in time");
}

#[tokio::test]
async fn test_new_readings_are_polled_and_evaluated() {
    let backend = Arc::new(MemoryBackend::new());
    add_reachable_recipients(&backend, 2).await;
    backend.insert_sensor(create_test_sensor(1)).await;
    let mut inactive = create_test_sensor(2);
    inactive.is_active = false;
    backend.insert_sensor(inactive).await;

    backend
        .upsert_personal_threshold(threshold(1, MetricType::Uv, 5.0))
        .await
        .unwrap();

    // Backlog that the watcher must not replay
    backend
        .insert_reading(create_test_reading(1, Some(10.0), None))
        .await;

    let gateway = Arc::new(MockGateway::new());
    let evaluator = Arc::new(Evaluator::new(
        backend.clone(),
        backend.clone(),
        gateway.clone(),
        DispatchConfig::default(),
    ));

    let (reading_tx, reading_rx) = mpsc::channel(16);
    let (evaluation, evaluation_task) = EvaluationHandle::spawn(evaluator, reading_rx);
    let poller = PollerHandle::spawn(
        backend.clone(),
        &PollConfig {
            interval_secs: 3600,
            batch_limit: 10,
        },
        1,
        reading_tx,
    );

    backend
        .insert_reading(create_test_reading(1, Some(6.0), None))
        .await;
    backend
        .insert_reading(create_test_reading(2, Some(11.0), None))
        .await;
    backend
        .insert_reading(create_test_reading(1, Some(2.0), None))
        .await;
    poller.poll_now().await.unwrap();

    let stats = wait_for_completed(&evaluation, 2).await;
    assert_eq!(stats.readings_received, 2);
    assert_eq!(stats.messages_delivered, 1);
    assert_eq!(stats.metric_errors, 0);

    poller.shutdown().await.unwrap();
    evaluation.shutdown().await.unwrap();
    evaluation_task.await.unwrap();

    let sent = gateway.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, push_token(1));
    assert!(sent[0].body.contains("is 6.0"));
}

#[tokio::test]
async fn test_backlog_larger_than_channel_is_fully_evaluated() {
    const BACKLOG: u64 = 300;

    let backend = Arc::new(MemoryBackend::new());
    add_reachable_recipients(&backend, 1).await;
    backend.insert_sensor(create_test_sensor(1)).await;
    backend
        .upsert_personal_threshold(threshold(1, MetricType::Uv, 5.0))
        .await
        .unwrap();
    for _ in 0..BACKLOG {
        backend
            .insert_reading(create_test_reading(1, Some(6.0), None))
            .await;
    }

    let gateway = Arc::new(MockGateway::new());
    let evaluator = Arc::new(Evaluator::new(
        backend.clone(),
        backend.clone(),
        gateway.clone(),
        DispatchConfig::default(),
    ));

    // Far smaller than the backlog so the poller has to wait for the actor
    let (reading_tx, reading_rx) = mpsc::channel(8);
    let (evaluation, evaluation_task) = EvaluationHandle::spawn(evaluator, reading_rx);
    let poller = PollerHandle::spawn(
        backend.clone(),
        &PollConfig {
            interval_secs: 3600,
            batch_limit: 50,
        },
        0,
        reading_tx,
    );
    poller.poll_now().await.unwrap();

    let stats = wait_for_completed(&evaluation, BACKLOG).await;
    assert_eq!(stats.readings_skipped, 0);
    assert_eq!(stats.readings_received, BACKLOG);
    assert_eq!(stats.messages_delivered, BACKLOG);

    poller.shutdown().await.unwrap();
    evaluation.shutdown().await.unwrap();
    let stats = evaluation_task.await.unwrap();
    assert_eq!(stats.evaluations_completed, BACKLOG);
    assert_eq!(gateway.sent_to(&push_token(1)).len(), BACKLOG as usize);
}
