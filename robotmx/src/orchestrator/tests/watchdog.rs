use std::time::Duration;

use shared_types::{OperationHandle, ProbeRequest};
use tokio::time::sleep;

use super::support::{port, Harness, HANDLE};

const TIMEOUT: Duration = Duration::from_secs(120);

#[tokio::test(start_paused = true)]
async fn test_prepare_without_follow_up_sends_robot_home() {
    let h = Harness::with_prepare_timeout(TIMEOUT);

    let outcome = h.orchestrator.prepare_for_mount(HANDLE).await;
    assert_eq!(outcome.error, None);
    assert!(h.orchestrator.watchdog().is_armed());

    let prepared = h.orchestrator.snapshot().prepared;
    assert!(prepared.prepared);
    assert!(prepared.deadline.is_some());

    sleep(Duration::from_secs(119)).await;
    assert!(!h.robot.called("go_to_home"));

    sleep(Duration::from_secs(2)).await;
    assert_eq!(h.robot.count("go_to_home"), 1);
    assert!(!h.orchestrator.watchdog().is_armed());
    assert!(!h.orchestrator.snapshot().prepared.prepared);
}

#[tokio::test(start_paused = true)]
async fn test_mount_aborts_pending_watchdog() {
    let h = Harness::with_prepare_timeout(TIMEOUT);

    h.orchestrator.prepare_for_mount(HANDLE).await;
    let outcome = h
        .orchestrator
        .mount(OperationHandle(102), port("L A 1"))
        .await;
    assert_eq!(outcome.error, None);
    assert!(!h.orchestrator.watchdog().is_armed());

    sleep(TIMEOUT * 2).await;
    assert!(!h.robot.called("go_to_home"));
}

#[tokio::test(start_paused = true)]
async fn test_dismount_with_nothing_mounted_still_aborts_watchdog() {
    let h = Harness::with_prepare_timeout(TIMEOUT);

    h.orchestrator.prepare_for_mount(HANDLE).await;
    h.orchestrator.dismount(OperationHandle(102), None).await;

    sleep(TIMEOUT * 2).await;
    assert!(!h.robot.called("go_to_home"));
}

#[tokio::test(start_paused = true)]
async fn test_second_prepare_replaces_deadline() {
    let h = Harness::with_prepare_timeout(TIMEOUT);

    h.orchestrator.prepare_for_mount(HANDLE).await;
    sleep(Duration::from_secs(100)).await;
    h.orchestrator.prepare_for_mount(OperationHandle(102)).await;

    // Past the first deadline, before the second.
    sleep(Duration::from_secs(30)).await;
    assert!(!h.robot.called("go_to_home"));

    sleep(Duration::from_secs(100)).await;
    assert_eq!(h.robot.count("go_to_home"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_prepare_does_not_arm() {
    let h = Harness::with_prepare_timeout(TIMEOUT);
    h.robot.fail("prepare_for_mount", "not at home");

    let outcome = h.orchestrator.prepare_for_mount(HANDLE).await;

    assert_eq!(outcome.error.as_deref(), Some("not at home"));
    assert!(!h.orchestrator.watchdog().is_armed());
}

#[tokio::test(start_paused = true)]
async fn test_expiry_while_robot_busy_does_not_send_home() {
    let h = Harness::with_prepare_timeout(TIMEOUT);
    h.orchestrator.prepare_for_mount(HANDLE).await;

    let gate = h.robot.gate("probe");
    let orchestrator = h.orchestrator.clone();
    let probe = tokio::spawn(async move {
        orchestrator
            .probe(OperationHandle(102), ProbeRequest::default())
            .await
    });
    gate.wait_entered().await;

    sleep(TIMEOUT + Duration::from_secs(1)).await;
    assert!(!h.robot.called("go_to_home"));
    assert!(!h.orchestrator.watchdog().is_armed());

    gate.release();
    assert_eq!(probe.await.unwrap().error, None);
}

#[tokio::test]
async fn test_abort_when_idle_is_a_no_op() {
    let h = Harness::new();
    h.orchestrator.watchdog().abort();
    assert!(!h.orchestrator.watchdog().is_armed());
    assert_eq!(h.orchestrator.watchdog().timeout(), Duration::from_secs(120));
}
