//! Fan-out coordinator integration tests over a mock SSH transport
//!
//! Host names select mock behavior: `ok*` exits 0, `fail*` exits 1,
//! `unreachable*` refuses connections, `sleepy*` runs for 10 seconds
//! (subject to the per-host timeout).

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use fleetcmd_core::{CoreError, FanOutCoordinator, FanOutOptions, HostSelector};
use fleetcmd_exec::ExecError;
use fleetcmd_exec::pool::{ConnectionPool, PoolConfig};
use fleetcmd_exec::result::{ConnectionInfo, ExitStatus, RunOutput};
use fleetcmd_exec::traits::{Connector, RemoteExecutor};
use fleetcmd_store::{Host, HostRegistry, StoreError};

struct MockSession {
    run_for: Duration,
    exit_code: i32,
    stdout: String,
}

#[async_trait]
impl RemoteExecutor for MockSession {
    async fn run(&mut self, _cmd: &str, timeout: Duration) -> RunOutput {
        let started_at = Utc::now();
        let start = Instant::now();
        if tokio::time::timeout(timeout, tokio::time::sleep(self.run_for))
            .await
            .is_err()
        {
            return RunOutput::sentinel(
                ExitStatus::TimedOut,
                Vec::new(),
                Vec::new(),
                started_at,
                start.elapsed(),
            );
        }
        RunOutput::sentinel(
            ExitStatus::Exited(self.exit_code),
            self.stdout.clone().into_bytes(),
            Vec::new(),
            started_at,
            start.elapsed(),
        )
    }

    fn is_broken(&self) -> bool {
        false
    }

    async fn close(&mut self) {}

    fn executor_type(&self) -> &'static str {
        "mock"
    }
}

struct MockConnector;

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, info: &ConnectionInfo) -> Result<Box<dyn RemoteExecutor>, ExecError> {
        if info.name.starts_with("unreachable") {
            return Err(ExecError::ConnectionFailed {
                host: info.name.clone(),
                reason: "no route to host".to_string(),
            });
        }
        let (run_for, exit_code, stdout) = if info.name.starts_with("sleepy") {
            (Duration::from_secs(10), 0, String::new())
        } else if info.name.starts_with("fail") {
            (Duration::from_millis(10), 1, String::new())
        } else {
            (
                Duration::from_millis(10),
                0,
                " 10:02:11 up 5 days, load average: 0.04".to_string(),
            )
        };
        Ok(Box::new(MockSession {
            run_for,
            exit_code,
            stdout,
        }))
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    registry: Arc<HostRegistry>,
    coordinator: FanOutCoordinator,
}

async fn fixture(hosts: &[&str]) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(
        HostRegistry::load_or_create(dir.path().join("hosts.json"))
            .await
            .unwrap(),
    );
    for (i, name) in hosts.iter().enumerate() {
        let mut host = Host::new(*name, format!("10.0.0.{}", i + 1), "root");
        if name.starts_with("tagged") {
            host = host.with_tags(vec!["web".to_string()]);
        }
        registry.add(host).await.unwrap();
    }
    let pool = Arc::new(ConnectionPool::new(
        Arc::new(MockConnector),
        PoolConfig::default(),
    ));
    let coordinator = FanOutCoordinator::new(registry.clone(), pool);
    Fixture {
        _dir: dir,
        registry,
        coordinator,
    }
}

fn names(names: &[&str]) -> HostSelector {
    HostSelector::Names(names.iter().map(ToString::to_string).collect())
}

#[tokio::test]
async fn aggregate_has_one_entry_per_deduplicated_target() {
    let fx = fixture(&["ok1", "fail1", "unreachable1"]).await;

    let report = fx
        .coordinator
        .execute(
            "uptime",
            &names(&["ok1", "fail1", "unreachable1", "ok1"]),
            &FanOutOptions::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    // Duplicates collapse; nothing is silently dropped
    assert_eq!(report.results.len(), 3);
    assert_eq!(
        report
            .results
            .iter()
            .map(|r| r.host.as_str())
            .collect::<Vec<_>>(),
        vec!["ok1", "fail1", "unreachable1"]
    );
    assert_eq!(report.get("ok1").unwrap().exit, ExitStatus::Exited(0));
    assert_eq!(report.get("fail1").unwrap().exit, ExitStatus::Exited(1));
    assert_eq!(
        report.get("unreachable1").unwrap().exit,
        ExitStatus::ConnectionError
    );
    assert!(!report.all_succeeded());

    let summary = report.summary();
    assert_eq!(summary.targets, 3);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 2);
}

#[tokio::test]
async fn mixed_outcome_updates_stats_per_host() {
    let fx = fixture(&["server1", "unreachable2"]).await;

    let report = fx
        .coordinator
        .execute(
            "uptime",
            &names(&["server1", "unreachable2"]),
            &FanOutOptions::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let server1 = report.get("server1").unwrap();
    assert_eq!(server1.exit, ExitStatus::Exited(0));
    assert!(server1.stdout.contains("up"));
    assert_eq!(
        report.get("unreachable2").unwrap().exit,
        ExitStatus::ConnectionError
    );

    assert_eq!(
        fx.registry.get("server1").await.unwrap().stats.success_count,
        1
    );
    assert_eq!(
        fx.registry
            .get("unreachable2")
            .await
            .unwrap()
            .stats
            .failure_count,
        1
    );
}

#[tokio::test]
async fn timed_out_host_does_not_delay_the_others() {
    let fx = fixture(&["ok1", "sleepy1"]).await;
    let opts = FanOutOptions {
        command_timeout: Duration::from_millis(300),
        overall_deadline: None,
    };

    let start = Instant::now();
    let report = fx
        .coordinator
        .execute(
            "sleep 10",
            &names(&["ok1", "sleepy1"]),
            &opts,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    // Bounded slack: well under the mock's 10s run time
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(report.get("ok1").unwrap().exit, ExitStatus::Exited(0));
    assert_eq!(report.get("sleepy1").unwrap().exit, ExitStatus::TimedOut);

    // Timeout counts as failure
    assert_eq!(
        fx.registry.get("sleepy1").await.unwrap().stats.failure_count,
        1
    );
}

#[tokio::test]
async fn empty_selection_is_a_usage_error() {
    let fx = fixture(&["ok1"]).await;

    let err = fx
        .coordinator
        .execute(
            "uptime",
            &HostSelector::Tag("no-such-tag".to_string()),
            &FanOutOptions::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::EmptySelection));

    let err = fx
        .coordinator
        .execute(
            "uptime",
            &HostSelector::Names(Vec::new()),
            &FanOutOptions::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::EmptySelection));
}

#[tokio::test]
async fn unknown_explicit_name_is_not_found() {
    let fx = fixture(&["ok1"]).await;

    let err = fx
        .coordinator
        .execute(
            "uptime",
            &names(&["ok1", "ghost"]),
            &FanOutOptions::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Store(StoreError::NotFound(_))));
}

#[tokio::test]
async fn tag_selector_resolves_via_registry() {
    let fx = fixture(&["tagged1", "tagged2", "ok3"]).await;

    let report = fx
        .coordinator
        .execute(
            "uptime",
            &HostSelector::Tag("web".to_string()),
            &FanOutOptions::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let mut hosts: Vec<&str> = report.results.iter().map(|r| r.host.as_str()).collect();
    hosts.sort_unstable();
    assert_eq!(hosts, vec!["tagged1", "tagged2"]);
}

#[tokio::test]
async fn cancellation_marks_incomplete_hosts_without_counting_stats() {
    let fx = fixture(&["ok1", "ok2", "sleepy1", "sleepy2", "sleepy3"]).await;
    let opts = FanOutOptions {
        command_timeout: Duration::from_secs(10),
        overall_deadline: None,
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            cancel.cancel();
        });
    }

    let report = fx
        .coordinator
        .execute(
            "sleep 10",
            &names(&["ok1", "ok2", "sleepy1", "sleepy2", "sleepy3"]),
            &opts,
            cancel,
        )
        .await
        .unwrap();

    assert_eq!(report.results.len(), 5);
    let concrete: Vec<&str> = report
        .results
        .iter()
        .filter(|r| r.exit == ExitStatus::Exited(0))
        .map(|r| r.host.as_str())
        .collect();
    let cancelled: Vec<&str> = report
        .results
        .iter()
        .filter(|r| r.exit == ExitStatus::Cancelled)
        .map(|r| r.host.as_str())
        .collect();
    assert_eq!(concrete, vec!["ok1", "ok2"]);
    assert_eq!(cancelled, vec!["sleepy1", "sleepy2", "sleepy3"]);

    // Stats reflect only the completed hosts
    for name in ["ok1", "ok2"] {
        assert_eq!(fx.registry.get(name).await.unwrap().stats.success_count, 1);
    }
    for name in ["sleepy1", "sleepy2", "sleepy3"] {
        let stats = fx.registry.get(name).await.unwrap().stats;
        assert_eq!(stats.success_count + stats.failure_count, 0);
    }
}

#[tokio::test]
async fn overall_deadline_cancels_stragglers() {
    let fx = fixture(&["ok1", "sleepy1"]).await;
    let opts = FanOutOptions {
        command_timeout: Duration::from_secs(10),
        overall_deadline: Some(Duration::from_millis(400)),
    };

    let start = Instant::now();
    let report = fx
        .coordinator
        .execute(
            "sleep 10",
            &names(&["ok1", "sleepy1"]),
            &opts,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(report.get("ok1").unwrap().exit, ExitStatus::Exited(0));
    assert_eq!(report.get("sleepy1").unwrap().exit, ExitStatus::Cancelled);
}

#[tokio::test]
async fn concurrent_fanouts_against_one_host_count_every_outcome() {
    let fx = fixture(&["ok1"]).await;
    let coordinator = Arc::new(fx.coordinator);

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let coordinator = coordinator.clone();
        tasks.push(tokio::spawn(async move {
            coordinator
                .execute(
                    "uptime",
                    &HostSelector::Names(vec!["ok1".to_string()]),
                    &FanOutOptions::default(),
                    CancellationToken::new(),
                )
                .await
                .unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let stats = fx.registry.get("ok1").await.unwrap().stats;
    assert_eq!(stats.success_count + stats.failure_count, 4);
    assert_eq!(stats.success_count, 4);
}
