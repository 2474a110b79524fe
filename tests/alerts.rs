mod common;

use hostpulse::AlertThresholds;
use hostpulse::alerts::AlertEvaluator;
use hostpulse::store::AlertKind;

use common::temp_store;

#[tokio::test(flavor = "multi_thread")]
async fn every_breaching_check_persists_a_row() {
    let (_dir, store) = temp_store().await;
    let evaluator = AlertEvaluator::new(
        AlertThresholds {
            cpu: 70.0,
            memory: 80.0,
        },
        Some(store.clone()),
    );

    assert_eq!(evaluator.check(75.0, 60.0).await.len(), 1);
    assert!(evaluator.check(70.0, 80.0).await.is_empty());
    assert_eq!(evaluator.check(75.0, 85.0).await.len(), 2);

    let rows = store.alerts(0, false).await.unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|a| !a.acknowledged));

    let memory = rows.iter().find(|a| a.kind == AlertKind::Memory).unwrap();
    assert_eq!(memory.threshold, 80.0);
    assert_eq!(memory.current_value, 85.0);
    assert_eq!(
        memory.message,
        "Memory threshold exceeded: 85.00% (threshold: 80.00%)"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn disabling_a_dimension_stops_its_alerts() {
    let (_dir, store) = temp_store().await;
    let evaluator = AlertEvaluator::new(AlertThresholds::default(), Some(store.clone()));

    evaluator
        .set_thresholds(AlertThresholds {
            cpu: 0.0,
            memory: 50.0,
        })
        .await;
    evaluator.check(100.0, 100.0).await;

    let rows = store.alerts(0, false).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].kind, AlertKind::Memory);
}

#[test]
fn alert_serializes_type_field() {
    let alert = hostpulse::store::Alert {
        id: 3,
        created_at: "2024-05-01 10:00:00".into(),
        kind: AlertKind::Cpu,
        threshold: 70.5,
        current_value: 75.25,
        message: "CPU threshold exceeded: 75.25% (threshold: 70.50%)".into(),
        acknowledged: false,
    };
    insta::assert_json_snapshot!(alert, @r#"
    {
      "id": 3,
      "createdAt": "2024-05-01 10:00:00",
      "type": "cpu",
      "threshold": 70.5,
      "currentValue": 75.25,
      "message": "CPU threshold exceeded: 75.25% (threshold: 70.50%)",
      "acknowledged": false
    }
    "#);
}
