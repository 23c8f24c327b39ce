#![allow(clippy::unwrap_used, clippy::panic)] // Integration tests use unwrap for brevity

//! End-to-end tests of partition actors: registration, timer-fired
//! delivery, serialization, eviction and restart recovery.

mod common;

use std::time::Duration;

use pushtimer_core::config::FailurePolicy;
use pushtimer_server::partition::{
    PartitionError, PartitionKey, RouterSettings, StorageLocation,
};
use pushtimer_server::storage::{ArmOutcome, PartitionDb, list_partitions};

use common::{
    StubTransport, delivery_settings, eventually, memory_router, record, router_with,
};

fn key(name: &str) -> PartitionKey {
    PartitionKey::new(name).unwrap()
}

// =========================================================================
// Delivery outcomes
// =========================================================================

#[tokio::test]
async fn accepted_push_clears_partition() {
    let transport = StubTransport::answering(201);
    let router = memory_router(transport.clone(), Duration::from_millis(50));
    let k = key("subscriber");

    let registered = router
        .register(&k, record("https://push.example/a"))
        .await
        .unwrap();
    assert!(matches!(registered.alarm, ArmOutcome::Armed(_)));

    eventually("delivery", || async { transport.calls() == 1 }).await;
    eventually("cleared state", || async {
        let status = router.status(&k).await.unwrap();
        !status.subscribed && status.alarm_at_ms.is_none()
    })
    .await;
    assert_eq!(transport.sent(), vec!["https://push.example/a".to_string()]);
}

#[tokio::test]
async fn rejected_push_keeps_record_without_rearming() {
    let transport = StubTransport::answering(410);
    let router = memory_router(transport.clone(), Duration::from_millis(50));
    let k = key("subscriber");

    router
        .register(&k, record("https://push.example/a"))
        .await
        .unwrap();

    eventually("delivery attempt", || async { transport.calls() == 1 }).await;
    eventually("alarm consumed", || async {
        router.status(&k).await.unwrap().alarm_at_ms.is_none()
    })
    .await;

    let status = router.status(&k).await.unwrap();
    assert!(status.subscribed, "record stays after a failed delivery");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(transport.calls(), 1, "no retry under the stall policy");
}

#[tokio::test]
async fn classify_policy_retries_transient_failures() {
    let transport = StubTransport::answering(201);
    transport.script(&[503]);
    let router = router_with(
        transport.clone(),
        RouterSettings::new(StorageLocation::Memory, Duration::from_millis(50)),
        delivery_settings(FailurePolicy::Classify),
    );
    let k = key("subscriber");

    router
        .register(&k, record("https://push.example/a"))
        .await
        .unwrap();

    eventually("retry after 503", || async { transport.calls() == 2 }).await;
    eventually("cleared state", || async {
        let status = router.status(&k).await.unwrap();
        !status.subscribed && status.alarm_at_ms.is_none()
    })
    .await;
}

#[tokio::test]
async fn classify_policy_drops_gone_subscription() {
    let transport = StubTransport::answering(404);
    let router = router_with(
        transport.clone(),
        RouterSettings::new(StorageLocation::Memory, Duration::from_millis(50)),
        delivery_settings(FailurePolicy::Classify),
    );
    let k = key("subscriber");

    router
        .register(&k, record("https://push.example/a"))
        .await
        .unwrap();

    eventually("record removed", || async {
        !router.status(&k).await.unwrap().subscribed
    })
    .await;
    assert_eq!(transport.calls(), 1);
    assert_eq!(router.status(&k).await.unwrap().alarm_at_ms, None);
}

#[tokio::test]
async fn missing_vapid_keys_keep_durable_alarm_for_next_activation() {
    let dir = tempfile::tempdir().unwrap();
    let storage = || StorageLocation::Disk(dir.path().to_path_buf());
    let k = key("subscriber");

    let transport = StubTransport::answering(201);
    let mut delivery = delivery_settings(FailurePolicy::Stall);
    delivery.vapid = None;
    let router = router_with(
        transport.clone(),
        RouterSettings::new(storage(), Duration::from_millis(50)),
        delivery,
    );

    let registered = router
        .register(&k, record("https://push.example/a"))
        .await
        .unwrap();
    eventually("failed firing", || async {
        router.status(&k).await.unwrap().alarm_at_ms.is_none()
    })
    .await;
    assert_eq!(transport.calls(), 0);
    router.shutdown().await;

    let db = PartitionDb::open(dir.path(), &k).await.unwrap();
    assert_eq!(
        db.alarm_at().await.unwrap(),
        Some(registered.alarm.wake_at_ms())
    );
    assert!(db.get_subscription().await.unwrap().is_some());
    db.close().await;

    // Once keys are configured the kept alarm fires on recovery.
    let fixed = StubTransport::answering(201);
    let router = router_with(
        fixed.clone(),
        RouterSettings::new(storage(), Duration::from_millis(50)),
        delivery_settings(FailurePolicy::Stall),
    );
    assert_eq!(router.recover().await.unwrap(), 1);
    eventually("delivery after recovery", || async { fixed.calls() == 1 }).await;
}

// =========================================================================
// Registration semantics
// =========================================================================

#[tokio::test]
async fn second_registration_replaces_record_but_keeps_alarm() {
    let transport = StubTransport::answering(201);
    let router = memory_router(transport.clone(), Duration::from_millis(300));
    let k = key("subscriber");

    let first = router
        .register(&k, record("https://push.example/old"))
        .await
        .unwrap();
    let second = router
        .register(&k, record("https://push.example/new"))
        .await
        .unwrap();

    let ArmOutcome::Armed(at) = first.alarm else {
        panic!("first registration should arm, got {:?}", first.alarm);
    };
    assert_eq!(second.alarm, ArmOutcome::AlreadyPending(at));

    eventually("delivery", || async { transport.calls() == 1 }).await;
    assert_eq!(transport.sent(), vec!["https://push.example/new".to_string()]);
}

#[tokio::test]
async fn concurrent_registrations_are_serialized() {
    let transport = StubTransport::answering(201);
    let router = memory_router(transport.clone(), Duration::from_secs(60));
    let k = key("subscriber");

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let router = router.clone();
            let k = k.clone();
            tokio::spawn(async move {
                router
                    .register(&k, record(&format!("https://push.example/{i}")))
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap().alarm);
    }

    let armed: Vec<_> = outcomes
        .iter()
        .filter(|o| matches!(o, ArmOutcome::Armed(_)))
        .collect();
    assert_eq!(armed.len(), 1, "exactly one registration arms the alarm");
    let at = armed[0].wake_at_ms();
    assert!(outcomes.iter().all(|o| o.wake_at_ms() == at));

    let status = router.status(&k).await.unwrap();
    assert!(status.subscribed);
    assert_eq!(status.alarm_at_ms, Some(at));
    assert_eq!(router.active_partitions().await, 1);
}

#[tokio::test]
async fn registration_waits_for_in_flight_delivery() {
    let transport = StubTransport::gated(201);
    let router = memory_router(transport.clone(), Duration::from_millis(50));
    let k = key("subscriber");

    router
        .register(&k, record("https://push.example/a"))
        .await
        .unwrap();
    transport.started().await;

    let pending = {
        let router = router.clone();
        let k = k.clone();
        tokio::spawn(async move {
            router
                .register(&k, record("https://push.example/b"))
                .await
                .unwrap()
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!pending.is_finished(), "actor is busy delivering");

    transport.release();
    let registered = pending.await.unwrap();

    // The delivery cleared the old alarm before the new record arrived.
    assert!(matches!(registered.alarm, ArmOutcome::Armed(_)));
    let status = router.status(&k).await.unwrap();
    assert!(status.subscribed);
    assert_eq!(status.alarm_at_ms, Some(registered.alarm.wake_at_ms()));

    router.shutdown().await;
}

#[tokio::test]
async fn partitions_are_independent() {
    let transport = StubTransport::answering(201);
    let router = memory_router(transport.clone(), Duration::from_secs(60));

    router
        .register(&key("a"), record("https://push.example/a"))
        .await
        .unwrap();

    let other = router.status(&key("b")).await.unwrap();
    assert!(!other.subscribed);
    assert_eq!(other.alarm_at_ms, None);
    assert_eq!(router.greet(&key("b"), "b").await.unwrap(), "Hello, b!");
    assert_eq!(router.active_partitions().await, 2);
}

// =========================================================================
// Actor lifecycle
// =========================================================================

#[tokio::test]
async fn idle_partitions_are_evicted_and_reactivated() {
    let dir = tempfile::tempdir().unwrap();
    let transport = StubTransport::answering(201);
    let mut settings = RouterSettings::new(
        StorageLocation::Disk(dir.path().to_path_buf()),
        Duration::from_secs(60),
    );
    settings.idle_timeout = Some(Duration::from_millis(50));
    let router = router_with(
        transport,
        settings,
        delivery_settings(FailurePolicy::Stall),
    );

    assert_eq!(router.greet(&key("idle"), "idle").await.unwrap(), "Hello, idle!");
    eventually("eviction", || async { router.active_partitions().await == 0 }).await;

    assert_eq!(router.greet(&key("idle"), "again").await.unwrap(), "Hello, again!");
    assert_eq!(router.active_partitions().await, 1);

    // A pending alarm keeps the actor resident.
    router
        .register(&key("armed"), record("https://push.example/a"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(router.active_partitions().await, 1);
    let status = router.status(&key("armed")).await.unwrap();
    assert!(status.alarm_at_ms.is_some());
}

#[tokio::test]
async fn evicted_partition_keeps_durable_state() {
    let dir = tempfile::tempdir().unwrap();
    let transport = StubTransport::answering(201);
    let mut settings = RouterSettings::new(
        StorageLocation::Disk(dir.path().to_path_buf()),
        Duration::from_secs(60),
    );
    settings.idle_timeout = Some(Duration::from_millis(50));
    let router = router_with(
        transport,
        settings,
        delivery_settings(FailurePolicy::Stall),
    );
    let k = key("durable");

    // Seed a record without an alarm so the actor is free to retire.
    {
        let db = PartitionDb::open(dir.path(), &k).await.unwrap();
        db.ensure_schema().await.unwrap();
        db.replace_subscription(&record("https://push.example/a"))
            .await
            .unwrap();
        db.close().await;
    }

    assert!(router.status(&k).await.unwrap().subscribed);
    eventually("eviction", || async { router.active_partitions().await == 0 }).await;
    assert!(router.status(&k).await.unwrap().subscribed);
}

#[tokio::test]
async fn pending_alarm_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let k = key("restart");

    let first = StubTransport::answering(201);
    let router = router_with(
        first.clone(),
        RouterSettings::new(
            StorageLocation::Disk(dir.path().to_path_buf()),
            Duration::from_millis(300),
        ),
        delivery_settings(FailurePolicy::Stall),
    );
    router
        .register(&k, record("https://push.example/a"))
        .await
        .unwrap();
    router.shutdown().await;
    assert_eq!(first.calls(), 0);

    let second = StubTransport::answering(201);
    let router = router_with(
        second.clone(),
        RouterSettings::new(
            StorageLocation::Disk(dir.path().to_path_buf()),
            Duration::from_millis(300),
        ),
        delivery_settings(FailurePolicy::Stall),
    );
    assert_eq!(router.recover().await.unwrap(), 1);

    eventually("delivery after restart", || async { second.calls() == 1 }).await;
    eventually("cleared state", || async {
        let status = router.status(&k).await.unwrap();
        !status.subscribed && status.alarm_at_ms.is_none()
    })
    .await;
    assert_eq!(first.calls(), 0);
}

#[tokio::test]
async fn delivered_partitions_leave_no_files() {
    let dir = tempfile::tempdir().unwrap();
    let storage = || StorageLocation::Disk(dir.path().to_path_buf());
    let transport = StubTransport::answering(201);
    let router = router_with(
        transport.clone(),
        RouterSettings::new(storage(), Duration::from_millis(50)),
        delivery_settings(FailurePolicy::Stall),
    );

    for i in 0..5 {
        router
            .register(&key(&format!("sub-{i}")), record(&format!("https://push.example/{i}")))
            .await
            .unwrap();
    }
    // Still subscribed, so this partition must survive.
    let kept = key("kept");
    {
        let db = PartitionDb::open(dir.path(), &kept).await.unwrap();
        db.ensure_schema().await.unwrap();
        db.replace_subscription(&record("https://push.example/kept"))
            .await
            .unwrap();
        db.close().await;
    }
    router.status(&kept).await.unwrap();

    eventually("all deliveries", || async { transport.calls() == 5 }).await;
    eventually("all partitions emptied", || async {
        for i in 0..5 {
            if router.status(&key(&format!("sub-{i}"))).await.unwrap().subscribed {
                return false;
            }
        }
        true
    })
    .await;
    router.shutdown().await;

    assert_eq!(list_partitions(dir.path()).unwrap(), vec![kept]);

    let router = router_with(
        StubTransport::answering(201),
        RouterSettings::new(storage(), Duration::from_millis(50)),
        delivery_settings(FailurePolicy::Stall),
    );
    assert_eq!(router.recover().await.unwrap(), 0);
    assert_eq!(router.active_partitions().await, 1);
}

#[tokio::test]
async fn recover_without_partitions_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let router = router_with(
        StubTransport::answering(201),
        RouterSettings::new(
            StorageLocation::Disk(dir.path().to_path_buf()),
            Duration::from_secs(5),
        ),
        delivery_settings(FailurePolicy::Stall),
    );
    assert_eq!(router.recover().await.unwrap(), 0);
    assert_eq!(router.active_partitions().await, 0);
}

#[tokio::test]
async fn activation_failure_is_reported_to_caller() {
    let dir = tempfile::tempdir().unwrap();
    // A file where the partitions directory should be makes every open fail.
    std::fs::write(dir.path().join("partitions"), b"not a directory").unwrap();
    let router = router_with(
        StubTransport::answering(201),
        RouterSettings::new(
            StorageLocation::Disk(dir.path().to_path_buf()),
            Duration::from_secs(5),
        ),
        delivery_settings(FailurePolicy::Stall),
    );

    let err = router
        .register(&key("broken"), record("https://push.example/a"))
        .await
        .unwrap_err();
    assert!(matches!(err, PartitionError::Activation(_)), "got {err:?}");
    eventually("failed actor retired", || async {
        router.active_partitions().await == 0
    })
    .await;
}

#[tokio::test]
async fn calls_after_shutdown_are_rejected() {
    let router = memory_router(StubTransport::answering(201), Duration::from_secs(5));
    router.greet(&key("a"), "a").await.unwrap();
    router.shutdown().await;

    assert_eq!(router.active_partitions().await, 0);
    assert!(matches!(
        router.status(&key("a")).await,
        Err(PartitionError::ShutDown)
    ));
}
