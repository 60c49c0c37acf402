//! Tunnel manager tests
//!
//! Uses a recording executor and a fixed-answer probe instead of `ssh` and
//! `lsof`.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use common::{FixedProbe, RecordingExecutor};
use tunn_core::{PortState, TunnelSpec};
use tunn_daemon::{ShutdownToken, StatusStore, StopCause, TunnelError, TunnelManager};

fn manager_with(
    executor: Arc<RecordingExecutor>,
    probe: FixedProbe,
) -> (TunnelManager, Arc<StatusStore>) {
    let store = Arc::new(StatusStore::new());
    let manager = TunnelManager::new(executor, Arc::new(probe), store.reporter());
    (manager, store)
}

fn tunnels(entries: &[(&str, &[&str])]) -> BTreeMap<String, TunnelSpec> {
    entries
        .iter()
        .map(|(name, ports)| (name.to_string(), TunnelSpec::new("server1", ports)))
        .collect()
}

fn cancel_after(token: &ShutdownToken, delay: Duration) {
    let token = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        token.cancel();
    });
}

#[tokio::test]
async fn test_conflict_fails_fast() {
    let executor = Arc::new(RecordingExecutor::default());
    let (manager, store) = manager_with(
        Arc::clone(&executor),
        FixedProbe::with_listener(3000, "node", 3342),
    );
    let spec = TunnelSpec::new("server1", &["3000:3000"]);

    let err = manager
        .run_tunnel(&ShutdownToken::new(), "web", &spec)
        .await
        .unwrap_err();

    assert!(err
        .to_string()
        .contains("port 3000 is being used by \"node\" (pid: 3342)"));
    assert!(executor.calls().is_empty());
    assert_eq!(
        store.get("web", "3000:3000"),
        Some(PortState::error(
            "port 3000 is being used by \"node\" (pid: 3342)"
        ))
    );
}

#[tokio::test]
async fn test_conflict_marks_every_port() {
    let executor = Arc::new(RecordingExecutor::default());
    let (manager, store) = manager_with(
        Arc::clone(&executor),
        FixedProbe::with_listener(4000, "python3", 77),
    );
    let spec = TunnelSpec::new("server1", &["3000:3000", "4000", "127.0.0.1:5000:80"]);

    let err = manager
        .run_tunnel(&ShutdownToken::new(), "api", &spec)
        .await
        .unwrap_err();
    assert!(matches!(err, TunnelError::PortConflict { port: 4000, pid: 77, .. }));
    assert!(executor.calls().is_empty());

    let expected = PortState::error("port 4000 is being used by \"python3\" (pid: 77)");
    for port in &spec.ports {
        assert_eq!(store.get("api", port), Some(expected.clone()), "port {}", port);
    }
}

#[tokio::test]
async fn test_mappings_are_aggregated_into_one_call() {
    let executor = Arc::new(RecordingExecutor::default());
    let (manager, _store) = manager_with(Arc::clone(&executor), FixedProbe::default());
    let token = ShutdownToken::new();
    cancel_after(&token, Duration::from_millis(50));

    let result = timeout(
        Duration::from_secs(2),
        manager.run_tunnels(&token, tunnels(&[("api", &["3000:3000", "4000:4000"])])),
    )
    .await
    .expect("run_tunnels did not return after cancellation");
    assert_eq!(result.unwrap(), Some(StopCause::Cancelled));

    let calls = executor.calls();
    assert_eq!(calls.len(), 1);
    let (name, args) = &calls[0];
    assert_eq!(name, "api");
    let forwards: Vec<_> = args
        .windows(2)
        .filter(|pair| pair[0] == "-L")
        .map(|pair| pair[1].as_str())
        .collect();
    assert_eq!(forwards, vec!["3000:localhost:3000", "4000:localhost:4000"]);
    assert_eq!(args.last().map(String::as_str), Some("server1"));
}

#[tokio::test]
async fn test_cancellation_stops_all_tunnels() {
    let executor = Arc::new(RecordingExecutor::default());
    let (manager, store) = manager_with(Arc::clone(&executor), FixedProbe::default());
    let token = ShutdownToken::new();
    cancel_after(&token, Duration::from_millis(50));

    let result = timeout(
        Duration::from_secs(2),
        manager.run_tunnels(
            &token,
            tunnels(&[("api", &["3000"]), ("db", &["5432"]), ("cache", &["6379"])]),
        ),
    )
    .await
    .expect("run_tunnels did not return after cancellation");

    assert_eq!(result.unwrap(), Some(StopCause::Cancelled));
    assert_eq!(executor.calls().len(), 3);
    for tunnel in store.snapshot() {
        assert!(tunnel.ports.values().all(|s| *s == PortState::Stopping));
    }
}

#[tokio::test]
async fn test_deadline_ends_run() {
    let executor = Arc::new(RecordingExecutor::default());
    let (manager, _store) = manager_with(Arc::clone(&executor), FixedProbe::default());
    let token = ShutdownToken::new().with_deadline(Duration::from_millis(200));

    let result = timeout(
        Duration::from_secs(2),
        manager.run_tunnels(&token, tunnels(&[("db", &["5432"])])),
    )
    .await
    .expect("run_tunnels did not honor the deadline");

    assert_eq!(result.unwrap(), Some(StopCause::DeadlineExceeded));
}

#[tokio::test]
async fn test_failing_tunnel_does_not_cancel_siblings() {
    let executor = Arc::new(RecordingExecutor::failing(&["broken"]));
    let (manager, store) = manager_with(
        Arc::clone(&executor),
        FixedProbe::with_listener(8080, "nginx", 12),
    );
    let token = ShutdownToken::new();
    let run = {
        let token = token.clone();
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .run_tunnels(
                    &token,
                    tunnels(&[
                        ("broken", &["7000"]),
                        ("conflicted", &["8080"]),
                        ("healthy", &["9000"]),
                    ]),
                )
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!token.is_cancelled());
    assert!(!run.is_finished());
    assert_eq!(store.get("healthy", "9000"), Some(PortState::Active));
    assert!(store.get("broken", "7000").unwrap().is_error());
    assert!(store.get("conflicted", "8080").unwrap().is_error());

    token.cancel();
    let result = timeout(Duration::from_secs(2), run)
        .await
        .expect("run_tunnels did not return")
        .unwrap();

    let err = result.unwrap_err();
    assert!(matches!(
        err,
        TunnelError::Executor { .. } | TunnelError::PortConflict { .. }
    ));
    assert_eq!(store.get("healthy", "9000"), Some(PortState::Stopping));
    let called: Vec<_> = executor.calls().into_iter().map(|(name, _)| name).collect();
    assert!(called.contains(&"healthy".to_string()));
    assert!(called.contains(&"broken".to_string()));
    assert!(!called.contains(&"conflicted".to_string()));
}

#[tokio::test]
async fn test_all_tunnels_failing_returns_without_cancellation() {
    let executor = Arc::new(RecordingExecutor::failing(&["a", "b"]));
    let (manager, _store) = manager_with(Arc::clone(&executor), FixedProbe::default());
    let token = ShutdownToken::new();

    let result = timeout(
        Duration::from_secs(2),
        manager.run_tunnels(&token, tunnels(&[("a", &["1000"]), ("b", &["2000"])])),
    )
    .await
    .expect("run_tunnels hung with no live tunnels");

    assert!(matches!(result, Err(TunnelError::Executor { .. })));
    assert!(!token.is_cancelled());
}

#[tokio::test]
async fn test_invalid_mapping_fails_tunnel() {
    let executor = Arc::new(RecordingExecutor::default());
    let (manager, store) = manager_with(Arc::clone(&executor), FixedProbe::default());
    let spec = TunnelSpec::new("server1", &["3000", "http"]);

    let err = manager
        .run_tunnel(&ShutdownToken::new(), "web", &spec)
        .await
        .unwrap_err();

    assert!(matches!(err, TunnelError::InvalidMapping { ref mapping, .. } if mapping == "http"));
    assert!(executor.calls().is_empty());
    assert!(store.get("web", "3000").unwrap().is_error());
    assert!(store.get("web", "http").unwrap().is_error());
}

#[tokio::test]
async fn test_probe_failure_is_the_tunnel_error() {
    let executor = Arc::new(RecordingExecutor::default());
    let probe = FixedProbe {
        fail: true,
        ..FixedProbe::default()
    };
    let (manager, store) = manager_with(Arc::clone(&executor), probe);
    let spec = TunnelSpec::new("server1", &["3000"]);

    let err = manager
        .run_tunnel(&ShutdownToken::new(), "web", &spec)
        .await
        .unwrap_err();

    assert!(matches!(err, TunnelError::Probe { .. }));
    assert!(err.to_string().contains("permission denied"));
    assert!(executor.calls().is_empty());
    assert!(store.get("web", "3000").unwrap().is_error());
}
