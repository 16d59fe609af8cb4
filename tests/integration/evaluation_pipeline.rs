//! End-to-end evaluation of readings against the in-memory stores

use std::sync::Arc;

use assert_matches::assert_matches;
use enviro_notify::{
    MetricType,
    dispatcher::{DeliveryOutcome, DispatchConfig, DropReason},
    evaluator::{EvaluationError, Evaluator},
    storage::{MemoryBackend, Recipient, StorageError, SubscriptionStore},
};
use pretty_assertions::assert_eq;

use crate::helpers::*;

struct Fixture {
    backend: Arc<MemoryBackend>,
    gateway: Arc<MockGateway>,
    evaluator: Evaluator,
}

async fn fixture() -> Fixture {
    let backend = Arc::new(MemoryBackend::new());
    add_reachable_recipients(&backend, 3).await;

    let gateway = Arc::new(MockGateway::new());
    let evaluator = Evaluator::new(
        backend.clone(),
        backend.clone(),
        gateway.clone(),
        DispatchConfig::default(),
    );

    Fixture {
        backend,
        gateway,
        evaluator,
    }
}

#[tokio::test]
async fn test_uv_reading_triggers_personal_and_global_alerts() {
    let Fixture {
        backend,
        gateway,
        evaluator,
    } = fixture().await;

    // userA = 1
    backend
        .upsert_personal_threshold(threshold(1, MetricType::Uv, 6.0))
        .await
        .unwrap();
    backend
        .upsert_global_band(band(MetricType::Uv, "Very High", 8.0, None))
        .await
        .unwrap();

    let sensor = create_test_sensor(1);
    let reading = create_test_reading(1, Some(8.2), None);
    let summary = evaluator.evaluate(&reading, &sensor).await;

    let uv = summary.metric(MetricType::Uv).unwrap();
    let dispatch = uv.outcome.as_ref().unwrap();
    assert_eq!(dispatch.personal_matches, 1);
    assert_eq!(dispatch.personal.delivered, 1);
    assert!(dispatch.escalated);
    let fan_out = dispatch.fan_out.as_ref().unwrap();
    assert_eq!(fan_out.delivered, 3);

    // Personal delivery and fan-out run concurrently, so order is not fixed
    let to_user_a = gateway.sent_to(&push_token(1));
    assert_eq!(to_user_a.len(), 2);
    let personal = to_user_a
        .iter()
        .find(|m| m.title == "⚠️ UV Alert")
        .unwrap();
    assert_eq!(
        personal.body,
        "The UV index at Plaza 9 de Julio is 8.2, reaching your threshold of 6"
    );
    let global = to_user_a
        .iter()
        .find(|m| m.title == "🌞 Global UV Alert")
        .unwrap();
    assert_eq!(global.data["level"], "Very High");

    assert_eq!(gateway.sent_to(&push_token(2)).len(), 1);
}

#[tokio::test]
async fn test_good_aqi_produces_nothing() {
    let Fixture {
        backend,
        gateway,
        evaluator,
    } = fixture().await;

    backend
        .upsert_global_band(band(MetricType::Aqi, "Good", 0.0, Some(50.0)))
        .await
        .unwrap();

    let summary = evaluator
        .evaluate(
            &create_test_reading(1, None, Some(40.0)),
            &create_test_sensor(1),
        )
        .await;

    let aqi = summary.metric(MetricType::Aqi).unwrap();
    assert_eq!(aqi.classification.level, "Good");
    let dispatch = aqi.outcome.as_ref().unwrap();
    assert_eq!(dispatch.personal_matches, 0);
    assert!(!dispatch.escalated);
    assert!(gateway.sent().is_empty());
}

#[tokio::test]
async fn test_moderate_aqi_is_below_escalation_cutoff() {
    let Fixture {
        backend,
        gateway,
        evaluator,
    } = fixture().await;

    for (level, min, max) in [
        ("Good", 0.0, Some(50.0)),
        ("Moderate", 50.0, Some(100.0)),
        ("Unhealthy", 100.0, None),
    ] {
        backend
            .upsert_global_band(band(MetricType::Aqi, level, min, max))
            .await
            .unwrap();
    }
    backend
        .upsert_personal_threshold(threshold(2, MetricType::Aqi, 70.0))
        .await
        .unwrap();

    let summary = evaluator
        .evaluate(
            &create_test_reading(1, None, Some(75.0)),
            &create_test_sensor(1),
        )
        .await;

    let dispatch = summary
        .metric(MetricType::Aqi)
        .unwrap()
        .outcome
        .as_ref()
        .unwrap();
    assert_eq!(
        dispatch.band.as_ref().map(|b| b.level.as_str()),
        Some("Moderate")
    );
    assert!(dispatch.fan_out.is_none());

    // Only user 2's personal alert goes out
    let sent = gateway.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, push_token(2));
    assert_eq!(sent[0].title, "⚠️ Air Quality Alert");
}

#[tokio::test]
async fn test_metrics_are_evaluated_independently() {
    let backend = Arc::new(MemoryBackend::new());
    add_reachable_recipients(&backend, 2).await;
    backend
        .upsert_personal_threshold(threshold(1, MetricType::Uv, 3.0))
        .await
        .unwrap();
    backend
        .upsert_personal_threshold(threshold(2, MetricType::Aqi, 100.0))
        .await
        .unwrap();

    let gateway = Arc::new(MockGateway::new());
    let subscriptions = Arc::new(FailingForMetric {
        inner: backend.clone(),
        failing: MetricType::Uv,
    });
    let evaluator = Evaluator::new(
        subscriptions,
        backend.clone(),
        gateway.clone(),
        DispatchConfig::default(),
    );

    let summary = evaluator
        .evaluate(
            &create_test_reading(1, Some(9.0), Some(160.0)),
            &create_test_sensor(1),
        )
        .await;

    assert_eq!(summary.errors(), 1);
    assert_matches!(
        summary.metric(MetricType::Uv).unwrap().outcome,
        Err(EvaluationError::Storage(StorageError::ConnectionFailed(_)))
    );
    let aqi = summary.metric(MetricType::Aqi).unwrap();
    assert_eq!(aqi.outcome.as_ref().unwrap().personal.delivered, 1);

    let sent = gateway.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, push_token(2));
}

#[tokio::test]
async fn test_disabled_and_tokenless_owners_are_dropped() {
    let Fixture {
        backend,
        gateway,
        evaluator,
    } = fixture().await;

    backend
        .upsert_recipient(Recipient {
            user_id: 4,
            push_token: Some(push_token(4)),
            enabled: false,
        })
        .await;
    backend
        .upsert_recipient(Recipient {
            user_id: 5,
            push_token: None,
            enabled: true,
        })
        .await;
    for user_id in [1, 4, 5] {
        backend
            .upsert_personal_threshold(threshold(user_id, MetricType::Uv, 5.0))
            .await
            .unwrap();
    }

    let summary = evaluator
        .evaluate(
            &create_test_reading(1, Some(6.0), None),
            &create_test_sensor(1),
        )
        .await;

    let personal = &summary
        .metric(MetricType::Uv)
        .unwrap()
        .outcome
        .as_ref()
        .unwrap()
        .personal;
    assert_eq!(personal.delivered, 1);
    assert_eq!(personal.dropped, 2);
    for user_id in [4, 5] {
        assert_eq!(
            personal.outcomes_for(user_id).collect::<Vec<_>>(),
            vec![&DeliveryOutcome::Dropped {
                reason: DropReason::Unreachable
            }]
        );
    }
    assert_eq!(gateway.sent().len(), 1);
}

#[tokio::test]
async fn test_subscriptions_are_read_fresh_per_evaluation() {
    let Fixture {
        backend,
        gateway,
        evaluator,
    } = fixture().await;
    let sensor = create_test_sensor(1);
    let reading = create_test_reading(1, Some(6.5), None);

    let stored = backend
        .upsert_personal_threshold(threshold(1, MetricType::Uv, 6.0))
        .await
        .unwrap();
    evaluator.evaluate(&reading, &sensor).await;
    assert_eq!(gateway.sent().len(), 1);

    backend
        .upsert_personal_threshold(threshold(1, MetricType::Uv, 7.0))
        .await
        .unwrap();
    evaluator.evaluate(&reading, &sensor).await;
    assert_eq!(gateway.sent().len(), 1);

    backend.delete_personal_threshold(1, stored.id).await.unwrap();
    backend
        .upsert_recipient(Recipient {
            user_id: 1,
            push_token: None,
            enabled: true,
        })
        .await;
    backend
        .upsert_personal_threshold(threshold(1, MetricType::Uv, 1.0))
        .await
        .unwrap();
    let summary = evaluator.evaluate(&reading, &sensor).await;
    assert_eq!(summary.report().dropped, 1);
    assert_eq!(gateway.sent().len(), 1);
}
