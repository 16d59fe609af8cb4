//! Batching and failure isolation of the dispatcher
//!
//! Scenarios:
//! - A large fan-out is split into gateway-sized batches
//! - One failing batch does not stop the others
//! - A batch that never answers times out
//! - Malformed and unreachable recipients never reach the gateway
//! - Personal deliveries with several batches in flight

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use enviro_notify::{
    dispatcher::{AddressedNotification, DeliveryOutcome, DispatchConfig, Dispatcher, DropReason},
    composer::Notification,
    storage::{MemoryBackend, Recipient},
};
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::helpers::*;

fn notification() -> Notification {
    Notification {
        title: "🌞 Global UV Alert".to_string(),
        body: "Extreme UV radiation level (11.4) at Plaza 9 de Julio.".to_string(),
        data: json!({"type": "UV_GLOBAL", "value": 11.4, "level": "Extreme", "sensorId": 1}),
    }
}

fn config(max_batch_size: usize) -> DispatchConfig {
    DispatchConfig {
        max_batch_size,
        ..DispatchConfig::default()
    }
}

#[tokio::test]
async fn test_fan_out_to_250_recipients_in_batches_of_100() {
    let backend = Arc::new(MemoryBackend::new());
    add_reachable_recipients(&backend, 250).await;

    let gateway = Arc::new(MockGateway::new().failing_call(2));
    let dispatcher = Dispatcher::new(backend, gateway.clone(), config(100));

    let report = dispatcher.fan_out(notification()).await;

    assert_eq!(gateway.batch_sizes(), vec![100, 100, 50]);
    assert_eq!(report.attempted, 250);
    assert_eq!(report.delivered, 150);
    assert_eq!(report.failed, 100);
    assert_eq!(report.batches_submitted, 3);
    assert_eq!(report.batches_failed, 1);
    assert!(!report.truncated);

    // Users 101..=200 were in the failed batch
    assert_eq!(report.outcomes.len(), 100);
    assert!(
        report
            .outcomes
            .iter()
            .all(|o| (101..=200).contains(&o.user_id))
    );
    assert_matches!(
        report.outcomes_for(150).next(),
        Some(DeliveryOutcome::BatchFailed { error }) if error.contains("503")
    );
}

#[tokio::test]
async fn test_hanging_batch_times_out() {
    let backend = Arc::new(MemoryBackend::new());
    add_reachable_recipients(&backend, 4).await;

    let gateway = Arc::new(MockGateway::new().hanging_call(1));
    let dispatcher = Dispatcher::new(
        backend,
        gateway.clone(),
        DispatchConfig {
            max_batch_size: 2,
            gateway_timeout: Duration::from_millis(100),
            ..DispatchConfig::default()
        },
    );

    let report = tokio::time::timeout(Duration::from_secs(5), dispatcher.fan_out(notification()))
        .await
        .expect("fan-out should not wait for the hanging batch");

    assert_eq!(report.delivered, 2);
    assert_eq!(report.failed, 2);
    assert_eq!(report.batches_failed, 1);
    assert_matches!(
        report.outcomes_for(1).next(),
        Some(DeliveryOutcome::BatchFailed { error }) if error.contains("did not answer")
    );
}

#[tokio::test]
async fn test_unusable_recipients_never_reach_the_gateway() {
    let backend = Arc::new(MemoryBackend::new());
    add_reachable_recipients(&backend, 3).await;
    backend
        .upsert_recipient(Recipient {
            user_id: 4,
            push_token: Some("not a token".to_string()),
            enabled: true,
        })
        .await;
    backend
        .upsert_recipient(Recipient {
            user_id: 5,
            push_token: Some(push_token(5)),
            enabled: false,
        })
        .await;

    let gateway = Arc::new(MockGateway::new());
    let dispatcher = Dispatcher::new(backend, gateway.clone(), config(100));

    let report = dispatcher.fan_out(notification()).await;

    assert_eq!(report.delivered, 3);
    assert_eq!(report.dropped, 1);
    assert_eq!(
        report.outcomes_for(4).collect::<Vec<_>>(),
        vec![&DeliveryOutcome::Dropped {
            reason: DropReason::MalformedAddress
        }]
    );
    assert!(gateway.sent().iter().all(|m| m.to != "not a token"));
    assert!(gateway.sent_to(&push_token(5)).is_empty());
}

#[tokio::test]
async fn test_rejected_tickets_fail_only_their_message() {
    let backend = Arc::new(MemoryBackend::new());
    add_reachable_recipients(&backend, 3).await;

    let gateway = Arc::new(MockGateway::new().rejecting(push_token(2)));
    let dispatcher = Dispatcher::new(backend, gateway, config(100));

    let report = dispatcher.fan_out(notification()).await;

    assert_eq!(report.delivered, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.batches_failed, 0);
    assert_matches!(
        report.outcomes_for(2).next(),
        Some(DeliveryOutcome::Rejected { reason }) if reason.contains("not a registered")
    );
}

#[tokio::test]
async fn test_deliver_with_several_batches_in_flight() {
    let backend = Arc::new(MemoryBackend::new());
    add_reachable_recipients(&backend, 10).await;

    let gateway = Arc::new(MockGateway::new());
    let dispatcher = Dispatcher::new(
        backend,
        gateway.clone(),
        DispatchConfig {
            max_batch_size: 3,
            max_in_flight_batches: 4,
            ..DispatchConfig::default()
        },
    );

    let messages = (1..=10)
        .map(|user_id| AddressedNotification {
            user_id,
            notification: notification(),
        })
        .collect();
    let report = dispatcher.deliver(messages).await;

    assert_eq!(report.delivered, 10);
    assert_eq!(report.batches_submitted, 4);

    let mut sizes = gateway.batch_sizes();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![1, 3, 3, 3]);

    let mut recipients: Vec<_> = gateway.sent().into_iter().map(|m| m.to).collect();
    recipients.sort();
    recipients.dedup();
    assert_eq!(recipients.len(), 10);
}
