use std::sync::Arc;
use std::time::Duration;

use ampsense_monitor::power::PowerDistribution;
use ampsense_monitor::sensors::{AVERAGE_TO_RMS, SensorRegistry};
use ampsense_monitor::transport::{SimulatedTransport, Transport};

mod common;
use common::fixtures::{add_current_device, test_sensor_info, wait_until};

fn amps_for_raw(raw: f32) -> f32 {
    raw * AVERAGE_TO_RMS * 100.0 / 1000.0
}

#[tokio::test(start_paused = true)]
async fn test_total_sums_member_readings() {
    let simulated = Arc::new(SimulatedTransport::new());
    let feed_a = add_current_device(&simulated, "sim:a", "Feeder A").await;
    let feed_b = add_current_device(&simulated, "sim:b", "Feeder B").await;

    let registry = Arc::new(SensorRegistry::new());
    registry
        .register(test_sensor_info("Feeder A", "sim:a"))
        .await
        .unwrap();
    registry
        .register(test_sensor_info("Feeder B", "sim:b"))
        .await
        .unwrap();

    let transport: Arc<dyn Transport> = simulated.clone();
    let distribution =
        PowerDistribution::with_capacity(registry.clone(), transport, 30.0, None).await;

    // Background binds and the connection debounce need clock time.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(distribution.member_count().await, 2);

    feed_a.set_coefficient(100, 1000);
    feed_b.set_coefficient(100, 1000);
    tokio::time::sleep(Duration::from_millis(100)).await;

    feed_a.push_current(900);
    feed_b.push_current(900);

    let expected = 2.0 * amps_for_raw(900.0);
    assert!(
        wait_until(
            || (distribution.total_current() - expected).abs() < 0.01,
            Duration::from_secs(5),
        )
        .await,
        "expected about {expected} A, got {}",
        distribution.total_current()
    );

    distribution.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn test_late_registration_joins_distribution() {
    let simulated = Arc::new(SimulatedTransport::new());
    let feed_a = add_current_device(&simulated, "sim:a", "Feeder A").await;

    let registry = Arc::new(SensorRegistry::new());
    registry
        .register(test_sensor_info("Feeder A", "sim:a"))
        .await
        .unwrap();

    let transport: Arc<dyn Transport> = simulated.clone();
    let distribution =
        PowerDistribution::with_capacity(registry.clone(), transport, 30.0, None).await;

    tokio::time::sleep(Duration::from_secs(2)).await;
    feed_a.set_coefficient(100, 1000);
    tokio::time::sleep(Duration::from_millis(100)).await;
    feed_a.push_current(900);

    let single = amps_for_raw(900.0);
    assert!(
        wait_until(
            || (distribution.total_current() - single).abs() < 0.01,
            Duration::from_secs(5),
        )
        .await
    );

    // A sensor registered after startup joins through the event stream.
    let feed_b = add_current_device(&simulated, "sim:b", "Feeder B").await;
    registry
        .register(test_sensor_info("Feeder B", "sim:b"))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(distribution.member_count().await, 2);

    feed_b.set_coefficient(100, 1000);
    tokio::time::sleep(Duration::from_millis(100)).await;
    feed_b.push_current(900);

    let doubled = 2.0 * single;
    assert!(
        wait_until(
            || (distribution.total_current() - doubled).abs() < 0.01,
            Duration::from_secs(5),
        )
        .await,
        "expected about {doubled} A, got {}",
        distribution.total_current()
    );

    distribution.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn test_unregister_drops_contribution() {
    let simulated = Arc::new(SimulatedTransport::new());
    let feed_a = add_current_device(&simulated, "sim:a", "Feeder A").await;
    let feed_b = add_current_device(&simulated, "sim:b", "Feeder B").await;

    let registry = Arc::new(SensorRegistry::new());
    let info_a = test_sensor_info("Feeder A", "sim:a");
    let info_b = test_sensor_info("Feeder B", "sim:b");
    registry.register(info_a.clone()).await.unwrap();
    registry.register(info_b.clone()).await.unwrap();

    let transport: Arc<dyn Transport> = simulated.clone();
    let distribution =
        PowerDistribution::with_capacity(registry.clone(), transport, 30.0, None).await;

    tokio::time::sleep(Duration::from_secs(2)).await;
    feed_a.set_coefficient(100, 1000);
    feed_b.set_coefficient(100, 1000);
    tokio::time::sleep(Duration::from_millis(100)).await;
    feed_a.push_current(900);
    feed_b.push_current(900);

    let both = 2.0 * amps_for_raw(900.0);
    assert!(
        wait_until(
            || (distribution.total_current() - both).abs() < 0.01,
            Duration::from_secs(5),
        )
        .await
    );

    registry.unregister(info_b.id).await.unwrap();

    let single = amps_for_raw(900.0);
    assert!(
        wait_until(
            || (distribution.total_current() - single).abs() < 0.01,
            Duration::from_secs(5),
        )
        .await,
        "removed sensor should stop contributing, got {}",
        distribution.total_current()
    );
    assert_eq!(distribution.member_count().await, 1);

    distribution.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn test_thresholds_follow_limits() {
    let simulated = Arc::new(SimulatedTransport::new());
    let feed = add_current_device(&simulated, "sim:a", "Feeder A").await;

    let registry = Arc::new(SensorRegistry::new());
    registry
        .register(test_sensor_info("Feeder A", "sim:a"))
        .await
        .unwrap();

    let transport: Arc<dyn Transport> = simulated.clone();
    let distribution =
        PowerDistribution::with_capacity(registry.clone(), transport, 30.0, None).await;

    tokio::time::sleep(Duration::from_secs(2)).await;
    feed.set_coefficient(100, 1000);
    tokio::time::sleep(Duration::from_millis(100)).await;
    feed.push_current(900);

    // About 100 A against a 30 A panel: both limits exceeded.
    assert!(
        wait_until(
            || distribution.is_warning() && distribution.is_critical(),
            Duration::from_secs(5),
        )
        .await,
        "both alerts should fire at {} A",
        distribution.total_current()
    );

    distribution.set_capacity(1000.0);
    assert!(
        wait_until(|| !distribution.is_critical(), Duration::from_secs(2)).await,
        "raising capacity should clear the critical flag"
    );
    assert!(
        distribution.is_warning(),
        "warning limit is independent of capacity"
    );

    distribution.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn test_empty_distribution_is_quiet() {
    let simulated = Arc::new(SimulatedTransport::new());
    let registry = Arc::new(SensorRegistry::new());

    let transport: Arc<dyn Transport> = simulated;
    let distribution =
        PowerDistribution::with_capacity(registry, transport, 30.0, None).await;

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(distribution.total_current(), 0.0);
    assert!(!distribution.is_warning());
    assert!(!distribution.is_critical());
    assert_eq!(distribution.member_count().await, 0);

    distribution.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn test_unbindable_member_contributes_nothing() {
    let simulated = Arc::new(SimulatedTransport::new());
    let feed = add_current_device(&simulated, "sim:a", "Feeder A").await;

    let registry = Arc::new(SensorRegistry::new());
    registry
        .register(test_sensor_info("Feeder A", "sim:a"))
        .await
        .unwrap();
    // No peripheral behind this one; its bind fails in the background.
    registry
        .register(test_sensor_info("Ghost", "sim:ghost"))
        .await
        .unwrap();

    let transport: Arc<dyn Transport> = simulated.clone();
    let distribution =
        PowerDistribution::with_capacity(registry.clone(), transport, 30.0, None).await;

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(distribution.member_count().await, 2);

    feed.set_coefficient(100, 1000);
    tokio::time::sleep(Duration::from_millis(100)).await;
    feed.push_current(900);

    let expected = amps_for_raw(900.0);
    assert!(
        wait_until(
            || (distribution.total_current() - expected).abs() < 0.01,
            Duration::from_secs(5),
        )
        .await,
        "total should cover only sensors with readings, got {}",
        distribution.total_current()
    );

    distribution.dispose().await;
}

#[tokio::test]
async fn test_warning_limit_override() {
    let simulated = Arc::new(SimulatedTransport::new());
    let registry = Arc::new(SensorRegistry::new());

    let transport: Arc<dyn Transport> = simulated;
    let distribution =
        PowerDistribution::with_capacity(registry, transport, 30.0, Some(5.0)).await;

    assert_eq!(distribution.capacity(), 30.0);
    assert_eq!(distribution.warning_alert_current(), 5.0);

    distribution.dispose().await;
}
