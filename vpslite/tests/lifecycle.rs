//! End-to-end lifecycle tests against the mock backend.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use vpslite::provisioner::{FailureMode, MockProvisioner};
use vpslite::{
    BackendKind, DeleteOutcome, InstanceId, InstanceState, VpsliteError, VpsliteOptions,
    VpsliteRuntime,
};

fn options(pool_size: u16) -> VpsliteOptions {
    VpsliteOptions {
        port_pool_size: pool_size,
        ..Default::default()
    }
}

fn runtime_with_mock(options: VpsliteOptions) -> (VpsliteRuntime, Arc<MockProvisioner>) {
    let mock = Arc::new(MockProvisioner::new());
    let runtime = VpsliteRuntime::with_provisioner(options, mock.clone()).unwrap();
    (runtime, mock)
}

#[tokio::test]
async fn test_create_scenario() {
    let (runtime, mock) = runtime_with_mock(options(1000));

    let info = runtime
        .create_vps("alice", "ubuntu:22.04", Some("512m"), Some("5g"))
        .await
        .unwrap();

    assert!(InstanceId::is_valid(info.id.as_str()));
    assert_eq!(info.host, "127.0.0.1");
    assert!((22001..=23000).contains(&info.port));
    assert_eq!(info.username, "root");
    assert_eq!(info.password.len(), 12);
    assert_eq!(info.backend_kind, BackendKind::Mock);
    assert_eq!(mock.live_count(), 1);

    let listed = runtime.list_vps(None);
    assert!(listed.iter().any(|v| v.id == info.id));

    let view = runtime.get_vps_info(&info.id).unwrap();
    assert_eq!(view.state, InstanceState::Running);
    assert_eq!(view.host, info.host);
    assert_eq!(view.port, info.port);
    assert_eq!(view.username, info.username);
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let (runtime, mock) = runtime_with_mock(options(10));
    let info = runtime
        .create_vps("alice", "ubuntu:22.04", None, None)
        .await
        .unwrap();

    assert_eq!(
        runtime.delete_vps(&info.id).await.unwrap(),
        DeleteOutcome { deleted: true }
    );
    assert_eq!(mock.live_count(), 0);

    // Second delete: successful no-op, never an error.
    assert_eq!(
        runtime.delete_vps(&info.id).await.unwrap(),
        DeleteOutcome { deleted: false }
    );
}

#[tokio::test]
async fn test_deleted_tombstone_then_purge() {
    let (runtime, _mock) = runtime_with_mock(VpsliteOptions {
        port_pool_size: 10,
        retention_secs: 0,
        ..Default::default()
    });
    let info = runtime
        .create_vps("alice", "ubuntu:22.04", None, None)
        .await
        .unwrap();
    runtime.delete_vps(&info.id).await.unwrap();

    // Within the retention window the tombstone is visible, hidden from
    // the default list, and redacted.
    let view = runtime.get_vps_info(&info.id).unwrap();
    assert_eq!(view.state, InstanceState::Deleted);
    assert!(runtime.list_vps(None).is_empty());
    assert!(runtime.list_all(None).iter().any(|v| v.id == info.id));

    // Retention of zero purges immediately.
    assert_eq!(runtime.purge_expired().unwrap(), 1);
    assert!(matches!(
        runtime.get_vps_info(&info.id),
        Err(VpsliteError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_invalid_arguments() {
    let (runtime, mock) = runtime_with_mock(options(10));

    for (owner, image, ram) in [
        ("", "ubuntu:22.04", None),
        ("  ", "ubuntu:22.04", None),
        ("alice", "", None),
        ("alice", "ubuntu:22.04", Some("12q")),
    ] {
        let result = runtime.create_vps(owner, image, ram, None).await;
        assert!(matches!(result, Err(VpsliteError::InvalidArgument(_))));
    }
    // No side effects: nothing reserved, nothing provisioned.
    assert!(runtime.list_all(None).is_empty());
    assert_eq!(mock.provision_calls(), 0);
}

#[tokio::test]
async fn test_delete_unknown_id() {
    let (runtime, _mock) = runtime_with_mock(options(10));
    let result = runtime
        .delete_vps(&InstanceId::parse("0000aaaa").unwrap())
        .await;
    assert!(matches!(result, Err(VpsliteError::NotFound(_))));
}

#[tokio::test]
async fn test_concurrent_creates_get_disjoint_ports() {
    let (runtime, _mock) = runtime_with_mock(options(64));

    let mut handles = Vec::new();
    for i in 0..32 {
        let runtime = runtime.clone();
        handles.push(tokio::spawn(async move {
            runtime
                .create_vps(&format!("owner-{}", i), "ubuntu:22.04", None, None)
                .await
        }));
    }

    let mut ports = Vec::new();
    for handle in handles {
        let info = handle.await.unwrap().unwrap();
        assert!((22001..=22064).contains(&info.port));
        ports.push(info.port);
    }
    ports.sort_unstable();
    ports.dedup();
    assert_eq!(ports.len(), 32, "every instance must own a distinct port");
}

#[tokio::test]
async fn test_pool_of_one_never_double_allocates() {
    let (runtime, _mock) = runtime_with_mock(options(1));

    let a = {
        let runtime = runtime.clone();
        tokio::spawn(async move { runtime.create_vps("alice", "ubuntu:22.04", None, None).await })
    };
    let b = {
        let runtime = runtime.clone();
        tokio::spawn(async move { runtime.create_vps("bob", "ubuntu:22.04", None, None).await })
    };

    let results = [a.await.unwrap(), b.await.unwrap()];
    let successes = results.iter().filter(|r| r.is_ok()).count();
    let exhausted = results
        .iter()
        .filter(|r| matches!(r, Err(VpsliteError::PoolExhausted(_))))
        .count();
    assert_eq!(successes, 1, "exactly one create may win the single port");
    assert_eq!(successes + exhausted, 2, "the loser must see PoolExhausted");
}

#[tokio::test]
async fn test_port_reused_only_after_delete() {
    let (runtime, _mock) = runtime_with_mock(options(1));

    let first = runtime
        .create_vps("alice", "ubuntu:22.04", None, None)
        .await
        .unwrap();

    // Port is held while the instance is live.
    let blocked = runtime.create_vps("bob", "ubuntu:22.04", None, None).await;
    assert!(matches!(blocked, Err(VpsliteError::PoolExhausted(_))));

    runtime.delete_vps(&first.id).await.unwrap();

    let second = runtime
        .create_vps("bob", "ubuntu:22.04", None, None)
        .await
        .unwrap();
    assert_eq!(second.port, first.port);
    assert_ne!(second.id, first.id, "ids are never reused");
}

#[tokio::test]
async fn test_failed_provision_leaves_audit_record_and_frees_port() {
    let (runtime, mock) = runtime_with_mock(options(1));
    mock.fail_next(FailureMode::Permanent);

    let result = runtime
        .create_vps("alice", "ubuntu:22.04", None, None)
        .await;
    assert!(matches!(
        result,
        Err(VpsliteError::Provision { transient: false, .. })
    ));

    // The reservation is retained as a Failed tombstone, not dropped.
    let all = runtime.list_all(None);
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].state, InstanceState::Failed);

    // Terminal state frees the single port for the next create.
    runtime
        .create_vps("alice", "ubuntu:22.04", None, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let (runtime, mock) = runtime_with_mock(options(10));
    mock.fail_next(FailureMode::Transient);

    let info = runtime
        .create_vps("alice", "ubuntu:22.04", None, None)
        .await
        .unwrap();
    assert_eq!(mock.provision_calls(), 2, "one failure, one retry");
    assert_eq!(
        runtime.get_vps_info(&info.id).unwrap().state,
        InstanceState::Running
    );
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let (runtime, mock) = runtime_with_mock(options(10));
    mock.fail_next(FailureMode::Permanent);

    let _ = runtime
        .create_vps("alice", "ubuntu:22.04", None, None)
        .await;
    assert_eq!(mock.provision_calls(), 1);
}

#[tokio::test]
async fn test_best_effort_warnings_do_not_fail_create() {
    let (runtime, mock) = runtime_with_mock(options(10));
    mock.warn_next("image pull failed: registry unreachable");

    let info = runtime
        .create_vps("alice", "ubuntu:22.04", None, None)
        .await
        .unwrap();

    // A best-effort step failing degrades to a warning, never an error.
    assert_eq!(
        runtime.get_vps_info(&info.id).unwrap().state,
        InstanceState::Running
    );
    assert_eq!(mock.provision_calls(), 1, "warnings must not trigger retries");
    assert_eq!(mock.live_count(), 1);
}

#[tokio::test]
async fn test_delete_during_provision_leaves_no_backend_resource() {
    let (runtime, mock) = runtime_with_mock(options(10));
    mock.set_provision_delay(Duration::from_millis(1000));

    let create = {
        let runtime = runtime.clone();
        tokio::spawn(async move { runtime.create_vps("alice", "ubuntu:22.04", None, None).await })
    };

    // The reservation appears before the backend call finishes; delete it
    // while provisioning is still sleeping.
    let id = loop {
        if let Some(view) = runtime.list_all(None).into_iter().next() {
            break view.id;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };
    assert_eq!(
        runtime.delete_vps(&id).await.unwrap(),
        DeleteOutcome { deleted: true }
    );

    // The losing creator reports the race and tears down the resource it
    // just provisioned.
    let result = create.await.unwrap();
    assert!(matches!(result, Err(VpsliteError::Conflict(_))));
    assert_eq!(mock.live_count(), 0);
    assert_eq!(
        runtime.get_vps_info(&id).unwrap().state,
        InstanceState::Deleted
    );
}

#[tokio::test]
async fn test_provision_timeout_is_transient() {
    let (runtime, mock) = runtime_with_mock(VpsliteOptions {
        port_pool_size: 10,
        provision_timeout: Duration::from_millis(20),
        max_provision_attempts: 1,
        ..Default::default()
    });
    mock.set_provision_delay(Duration::from_millis(200));

    let result = runtime
        .create_vps("alice", "ubuntu:22.04", None, None)
        .await;
    match result {
        Err(e) => assert!(e.is_transient(), "timeout must classify as transient"),
        Ok(_) => panic!("provision should have timed out"),
    }
}

#[tokio::test]
async fn test_stuck_delete_surfaces_and_reconciles() {
    let (runtime, mock) = runtime_with_mock(VpsliteOptions {
        port_pool_size: 1,
        max_provision_attempts: 1,
        ..Default::default()
    });
    let info = runtime
        .create_vps("alice", "ubuntu:22.04", None, None)
        .await
        .unwrap();

    mock.fail_next(FailureMode::Deprovision);
    let result = runtime.delete_vps(&info.id).await;
    assert!(matches!(result, Err(VpsliteError::Deprovision(_))));

    // The record stays in Deleting (still holding its port) rather than
    // silently disappearing while the backend resource may exist.
    let view = runtime.get_vps_info(&info.id).unwrap();
    assert_eq!(view.state, InstanceState::Deleting);
    let blocked = runtime.create_vps("bob", "ubuntu:22.04", None, None).await;
    assert!(matches!(blocked, Err(VpsliteError::PoolExhausted(_))));

    // A second delete is refused while one is in flight.
    let conflict = runtime.delete_vps(&info.id).await;
    assert!(matches!(conflict, Err(VpsliteError::Conflict(_))));

    // Reconciliation finishes the teardown.
    assert_eq!(runtime.reconcile().await, 1);
    assert_eq!(
        runtime.get_vps_info(&info.id).unwrap().state,
        InstanceState::Deleted
    );
    assert_eq!(mock.live_count(), 0);
}

#[tokio::test]
async fn test_reconcile_flags_dead_backend() {
    let (runtime, mock) = runtime_with_mock(options(10));
    let info = runtime
        .create_vps("alice", "ubuntu:22.04", None, None)
        .await
        .unwrap();

    let backend_ref = runtime
        .registry()
        .get(&info.id)
        .unwrap()
        .backend_ref
        .unwrap();
    mock.kill(&backend_ref);

    assert_eq!(runtime.reconcile().await, 1);
    assert_eq!(
        runtime.get_vps_info(&info.id).unwrap().state,
        InstanceState::Failed
    );
}

#[tokio::test]
async fn test_delete_cleans_up_failed_instance() {
    let (runtime, mock) = runtime_with_mock(options(10));
    mock.fail_next(FailureMode::Permanent);
    let _ = runtime
        .create_vps("alice", "ubuntu:22.04", None, None)
        .await;

    let id = runtime.list_all(None)[0].id.clone();
    // Cleanup of a Failed instance is permitted.
    assert_eq!(
        runtime.delete_vps(&id).await.unwrap(),
        DeleteOutcome { deleted: true }
    );
    assert_eq!(
        runtime.get_vps_info(&id).unwrap().state,
        InstanceState::Deleted
    );
}

#[tokio::test]
async fn test_list_filters_by_owner() {
    let (runtime, _mock) = runtime_with_mock(options(10));
    runtime
        .create_vps("alice", "ubuntu:22.04", None, None)
        .await
        .unwrap();
    runtime
        .create_vps("bob", "debian:12", None, None)
        .await
        .unwrap();

    assert_eq!(runtime.list_vps(None).len(), 2);
    assert_eq!(runtime.list_vps(Some("alice")).len(), 1);
    assert_eq!(runtime.list_vps(Some("carol")).len(), 0);
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let state_file = dir.path().join("state.json");
    let opts = VpsliteOptions {
        port_pool_size: 10,
        state_file: Some(state_file),
        ..Default::default()
    };

    let id = {
        let (runtime, _mock) = runtime_with_mock(opts.clone());
        runtime
            .create_vps("alice", "ubuntu:22.04", None, None)
            .await
            .unwrap()
            .id
    };

    let (runtime, _mock) = runtime_with_mock(opts);
    let view = runtime.get_vps_info(&id).unwrap();
    assert_eq!(view.state, InstanceState::Running);
    assert_eq!(view.owner_id, "alice");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Any number of concurrent creates against any pool either wins a
    /// distinct port or reports exhaustion; two instances never share.
    #[test]
    fn prop_concurrent_creates_never_share_a_port(
        creates in 1usize..24,
        pool in 1u16..24,
    ) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let (runtime, _mock) = runtime_with_mock(options(pool));
            let mut handles = Vec::new();
            for i in 0..creates {
                let runtime = runtime.clone();
                handles.push(tokio::spawn(async move {
                    runtime
                        .create_vps(&format!("owner-{}", i), "ubuntu:22.04", None, None)
                        .await
                }));
            }

            let mut ports = Vec::new();
            for handle in handles {
                match handle.await.unwrap() {
                    Ok(info) => ports.push(info.port),
                    Err(VpsliteError::PoolExhausted(_)) => {}
                    Err(e) => panic!("unexpected error: {}", e),
                }
            }
            let total = ports.len();
            ports.sort_unstable();
            ports.dedup();
            assert_eq!(ports.len(), total, "duplicate port handed out");
            assert!(total <= pool as usize);
        });
    }
}
