//! S7 — device-list diff: polling twice with a changed device set
//! reports the right added/removed/changed uuids.

mod helpers;

use meross_manager::{HttpApiClient, SubscriptionConfig, SubscriptionEngine};

#[tokio::test]
async fn second_poll_reports_added_removed_and_changed() {
    let engine = SubscriptionEngine::new(SubscriptionConfig::default());
    let mut rx = engine.subscribe_device_list();

    let (mock, _manager) = helpers::manager_with_devices(vec![
        helpers::device("a", None),
        helpers::device("b", None),
    ]);

    engine.poll_device_list(mock.as_ref() as &dyn HttpApiClient).await.unwrap();
    let first = rx.recv().await.unwrap();
    assert_eq!(first.added.len(), 2);
    assert!(first.removed.is_empty());
    assert!(first.changed.is_empty());

    {
        let mut devices = mock.devices.lock().await;
        devices.retain(|d| d.uuid != "b");
        let mut c = helpers::device("c", None);
        c.dev_name = "X".into();
        devices.push(c);
        devices[0].dev_name = "renamed-a".into();
    }

    engine.poll_device_list(mock.as_ref() as &dyn HttpApiClient).await.unwrap();
    let second = rx.recv().await.unwrap();

    assert_eq!(second.added, vec!["c".to_string()]);
    assert_eq!(second.removed, vec!["b".to_string()]);
    assert_eq!(second.changed, vec!["a".to_string()]);
}
