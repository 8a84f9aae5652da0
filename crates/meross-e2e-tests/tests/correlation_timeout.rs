//! S5 — timeout: a `publishMessage`-style call rejects with
//! `CommandTimeout` when no reply arrives by its deadline, and a late
//! reply for the same `messageId` is silently dropped.

use std::sync::Arc;
use std::time::Duration;

use meross_manager::CorrelationRegistry;
use meross_protocol::error::{CommandDescriptor, MerossError};

#[tokio::test(start_paused = true)]
async fn late_reply_after_timeout_is_dropped() {
    let registry = Arc::new(CorrelationRegistry::new());
    let descriptor = CommandDescriptor {
        namespace: "Appliance.System.All".into(),
        method: "GET".into(),
    };

    let reg = registry.clone();
    let handle = tokio::spawn(async move {
        reg.register(
            "msg-1".into(),
            "u1".into(),
            descriptor,
            Duration::from_millis(100),
        )
        .await
    });

    tokio::time::advance(Duration::from_millis(101)).await;
    let result = handle.await.unwrap();
    assert!(matches!(result, Err(MerossError::CommandTimeout { deadline_ms: 100, .. })));

    // A reply arriving at t≈200ms with the same messageId must be a
    // silent no-op: no pending entry exists to resolve or reject.
    tokio::time::advance(Duration::from_millis(100)).await;
    registry.complete("msg-1", serde_json::json!({"late": true})).await;
    assert_eq!(registry.pending_count().await, 0);
}
