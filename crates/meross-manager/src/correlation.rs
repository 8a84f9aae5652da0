//! Correlation registry (C4): maps a `messageId` to a pending future,
//! completing it on a matching reply or timing it out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use meross_protocol::error::{CommandDescriptor, MerossError};
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};

struct PendingCall {
    sender: oneshot::Sender<Result<Value, MerossError>>,
}

/// Every pending call is removed exactly once: on reply, on timeout,
/// or when the caller cancels before either happens.
#[derive(Default)]
pub struct CorrelationRegistry {
    pending: Mutex<HashMap<String, PendingCall>>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending call for `message_id` and return a future
    /// that resolves when `complete`/`fail` is invoked, or rejects
    /// with `CommandTimeout` after `deadline` elapses.
    pub async fn register(
        self: &Arc<Self>,
        message_id: String,
        device_uuid: String,
        descriptor: CommandDescriptor,
        deadline: Duration,
    ) -> Result<Value, MerossError> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .await
            .insert(message_id.clone(), PendingCall { sender: tx });

        let result = tokio::time::timeout(deadline, rx).await;

        match result {
            Ok(Ok(payload_result)) => payload_result,
            Ok(Err(_)) => {
                // Sender dropped without completing — treat as a
                // cancellation, matching the oneshot contract.
                self.pending.lock().await.remove(&message_id);
                Err(MerossError::Cancelled)
            }
            Err(_) => {
                self.pending.lock().await.remove(&message_id);
                Err(MerossError::CommandTimeout {
                    device_uuid,
                    deadline_ms: deadline.as_millis() as u64,
                    descriptor,
                })
            }
        }
    }

    /// Complete a pending call with a successful payload. A no-op if
    /// `message_id` is unknown (late or duplicate reply).
    pub async fn complete(&self, message_id: &str, payload: Value) {
        if let Some(call) = self.pending.lock().await.remove(message_id) {
            let _ = call.sender.send(Ok(payload));
        }
    }

    /// Fail a pending call. A no-op if `message_id` is unknown.
    pub async fn fail(&self, message_id: &str, err: MerossError) {
        if let Some(call) = self.pending.lock().await.remove(message_id) {
            let _ = call.sender.send(Err(err));
        }
    }

    /// Cancel a registered call without resolving it — used when the
    /// caller abandons the future before a reply or timeout.
    pub async fn cancel(&self, message_id: &str) {
        self.pending.lock().await.remove(message_id);
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> CommandDescriptor {
        CommandDescriptor {
            namespace: "Appliance.System.All".into(),
            method: "GET".into(),
        }
    }

    #[tokio::test]
    async fn complete_resolves_the_registered_future() {
        let registry = Arc::new(CorrelationRegistry::new());
        let reg = registry.clone();
        let handle = tokio::spawn(async move {
            reg.register(
                "m1".into(),
                "u1".into(),
                descriptor(),
                Duration::from_secs(5),
            )
            .await
        });

        tokio::task::yield_now().await;
        registry
            .complete("m1", serde_json::json!({"ok": true}))
            .await;

        let result = handle.await.unwrap();
        assert_eq!(result.unwrap(), serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn fail_rejects_the_registered_future() {
        let registry = Arc::new(CorrelationRegistry::new());
        let reg = registry.clone();
        let handle = tokio::spawn(async move {
            reg.register(
                "m1".into(),
                "u1".into(),
                descriptor(),
                Duration::from_secs(5),
            )
            .await
        });

        tokio::task::yield_now().await;
        registry.fail("m1", MerossError::Unconnected("u1".into())).await;

        assert!(matches!(
            handle.await.unwrap(),
            Err(MerossError::Unconnected(_))
        ));
    }

    #[tokio::test]
    async fn complete_on_unknown_id_is_a_no_op() {
        let registry = CorrelationRegistry::new();
        registry.complete("does-not-exist", serde_json::json!(null)).await;
        assert_eq!(registry.pending_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_removes_the_pending_entry_and_drops_late_replies() {
        let registry = Arc::new(CorrelationRegistry::new());
        let reg = registry.clone();
        let handle = tokio::spawn(async move {
            reg.register(
                "m1".into(),
                "u1".into(),
                descriptor(),
                Duration::from_millis(100),
            )
            .await
        });

        tokio::time::advance(Duration::from_millis(101)).await;
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(MerossError::CommandTimeout { .. })));
        assert_eq!(registry.pending_count().await, 0);

        // A late reply with the same id must be a silent no-op.
        registry.complete("m1", serde_json::json!({"late": true})).await;
    }
}
