//! End-to-end tests for the entity registry over Zenoh.
//!
//! Note: Zenoh requires a multi-thread tokio runtime.
//! Each test uses a unique key prefix to avoid interference.

use std::sync::Arc;
use std::time::Duration;

use gpioha_common::{DeviceInfo, Entity, EntityRegistry, Error, SensorMeta};

/// Generate a unique test prefix to avoid test interference.
fn unique_prefix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("test_gpioha_{}", nanos)
}

fn device() -> DeviceInfo {
    DeviceInfo {
        name: "Test device".to_string(),
        id: "test-device".to_string(),
    }
}

async fn open_session() -> Arc<zenoh::Session> {
    let config = zenoh::Config::default();
    Arc::new(
        zenoh::open(config)
            .await
            .expect("Failed to open Zenoh session"),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_duplicate_identity_rejected() {
    let session = open_session().await;
    let mut registry = EntityRegistry::new(session.clone(), unique_prefix(), device());

    registry.register(Entity::switch("RELAY1", "RELAY1")).unwrap();
    let err = registry
        .register(Entity::switch("RELAY1", "RELAY1 again"))
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateEntity(id) if id == "RELAY1"));

    session.close().await.expect("Failed to close session");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_announce_publishes_discovery_metadata() {
    let prefix = unique_prefix();
    let session = open_session().await;

    let subscriber = session
        .declare_subscriber(format!("{}/@/discovery/*", prefix))
        .await
        .expect("Failed to create subscriber");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut registry = EntityRegistry::new(session.clone(), prefix.clone(), device());
    registry.register(Entity::switch("RELAY1", "RELAY1")).unwrap();
    registry
        .register(Entity::sensor(
            "ups",
            "UPS Voltage",
            SensorMeta::measurement("%", "battery", "measurement"),
        ))
        .unwrap();

    registry.announce_all().await.expect("Announce failed");

    // Two announcements, in registration order.
    let first = tokio::time::timeout(Duration::from_secs(5), subscriber.recv_async())
        .await
        .expect("Timeout waiting for announcement")
        .expect("Failed to receive announcement");
    let payload = first.payload().to_bytes();
    let ann: serde_json::Value = serde_json::from_slice(&payload).unwrap();
    assert_eq!(ann["identity"], "RELAY1");
    assert_eq!(ann["kind"], "switch");
    assert_eq!(ann["command_key"], format!("{}/RELAY1/set", prefix));

    let second = tokio::time::timeout(Duration::from_secs(5), subscriber.recv_async())
        .await
        .expect("Timeout waiting for announcement")
        .expect("Failed to receive announcement");
    let payload = second.payload().to_bytes();
    let ann: serde_json::Value = serde_json::from_slice(&payload).unwrap();
    assert_eq!(ann["identity"], "ups");
    assert_eq!(ann["unit_of_measurement"], "%");
    assert!(ann.get("command_key").is_none());

    registry.close().await;
    session.close().await.expect("Failed to close session");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_publish_state_and_last_state() {
    let prefix = unique_prefix();
    let session = open_session().await;

    let subscriber = session
        .declare_subscriber(format!("{}/ups/state", prefix))
        .await
        .expect("Failed to create subscriber");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut registry = EntityRegistry::new(session.clone(), prefix.clone(), device());
    registry
        .register(Entity::sensor(
            "ups",
            "UPS Voltage",
            SensorMeta::measurement("%", "battery", "measurement"),
        ))
        .unwrap();
    registry.announce_all().await.expect("Announce failed");

    registry.publish_state("ups", "75").await.expect("Publish failed");
    assert_eq!(registry.last_state("ups").await.as_deref(), Some("75"));

    let sample = tokio::time::timeout(Duration::from_secs(5), subscriber.recv_async())
        .await
        .expect("Timeout waiting for state")
        .expect("Failed to receive state");
    assert_eq!(sample.payload().to_bytes().as_ref(), b"75");

    // Unknown identity is an error, not a publish.
    let err = registry.publish_state("nope", "1").await.unwrap_err();
    assert!(matches!(err, Error::UnknownEntity(id) if id == "nope"));

    registry.close().await;
    session.close().await.expect("Failed to close session");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_is_idempotent() {
    let prefix = unique_prefix();
    let session = open_session().await;

    let mut registry = EntityRegistry::new(session.clone(), prefix, device());
    registry.register(Entity::switch("RELAY1", "RELAY1")).unwrap();
    registry.announce_all().await.expect("Announce failed");

    registry.close().await;
    // Second close is a no-op, not an error.
    registry.close().await;

    session.close().await.expect("Failed to close session");
}
