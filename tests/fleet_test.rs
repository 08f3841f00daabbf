//! Fleet orchestration tests: independent failure isolation and
//! guaranteed teardown.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use fleetcheck::config::HarnessConfig;
use fleetcheck::fleet::{FailureKind, FleetMember, FleetOrchestrator};
use fleetcheck::instance::{InstanceController, InstanceSpec, VmControl};
use fleetcheck::loopback::{build_loopback_fleet, LoopbackVm};
use fleetcheck::mmds::InMemoryMmds;
use fleetcheck::transport::{spawn_echo_dialer, EchoServer, Endpoint};

fn small_config(instances: usize, rounds: usize) -> HarnessConfig {
    HarnessConfig {
        instances,
        rounds,
        blob_size: 8 * 1024,
        connect_timeout: Duration::from_millis(500),
        io_timeout: Duration::from_secs(5),
        ..HarnessConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn healthy_fleet_passes_every_round() {
    let scratch = tempfile::tempdir().unwrap();
    let cfg = small_config(4, 2);
    let cancel = CancellationToken::new();
    let mut fixture = build_loopback_fleet(&cfg, scratch.path(), &cancel).unwrap();
    let members = std::mem::take(&mut fixture.members);
    let controllers: Vec<_> = members.iter().map(|m| Arc::clone(&m.controller)).collect();

    let orchestrator =
        FleetOrchestrator::new(cfg, members, scratch.path().to_path_buf(), cancel.clone());
    let report = orchestrator.run().await;

    assert!(report.is_success(), "report: {}", report.summary());
    assert_eq!(report.passed, 4 * 2);
    for controller in &controllers {
        assert!(controller.is_torn_down());
        assert!(
            !controller.retained_logs().is_empty(),
            "logs must be retrieved at teardown"
        );
    }

    fixture.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn broken_echo_channel_fails_only_its_own_instance() {
    let scratch = tempfile::tempdir().unwrap();
    let cfg = small_config(20, 2);
    let cancel = CancellationToken::new();
    let mut fixture = build_loopback_fleet(&cfg, scratch.path(), &cancel).unwrap();
    let mut members = std::mem::take(&mut fixture.members);

    // Point one instance's echo channel at a dead rendezvous path.
    let broken = 7usize;
    let dead_dir = scratch.path().join("dead");
    std::fs::create_dir_all(&dead_dir).unwrap();
    members[broken].endpoint = Endpoint::new(dead_dir.join("v.sock"), 5252);

    let controllers: Vec<_> = members.iter().map(|m| Arc::clone(&m.controller)).collect();
    let orchestrator =
        FleetOrchestrator::new(cfg, members, scratch.path().to_path_buf(), cancel.clone());
    let report = orchestrator.run().await;

    assert_eq!(report.failures.len(), 2, "report: {}", report.summary());
    for failure in &report.failures {
        assert_eq!(failure.instance, broken);
        assert_eq!(failure.kind, FailureKind::Connection);
    }
    assert_eq!(report.passed, 19 * 2);

    for controller in &controllers {
        assert!(controller.is_torn_down(), "every instance must be torn down");
        assert!(!controller.retained_logs().is_empty());
    }

    fixture.shutdown().await;
}

struct FailingVm;

#[async_trait]
impl VmControl for FailingVm {
    async fn configure(&self, _: u8, _: u32, _: bool) -> Result<(), String> {
        Ok(())
    }
    async fn setup_network(&self, _: &str) -> Result<(), String> {
        Ok(())
    }
    async fn attach_vsock(&self, _: u32, _: &Path) -> Result<(), String> {
        Ok(())
    }
    async fn configure_metadata(&self, _: &[String]) -> Result<(), String> {
        Ok(())
    }
    async fn seed_metadata(&self, _: &Value) -> Result<(), String> {
        Ok(())
    }
    async fn attach_drive(&self, drive_id: &str) -> Result<(), String> {
        Err(format!("no backing file for {drive_id}"))
    }
    async fn start(&self) -> Result<(), String> {
        Ok(())
    }
    async fn kill(&self) -> Result<(), String> {
        Ok(())
    }
    async fn fetch_logs(&self) -> Result<Vec<String>, String> {
        Ok(vec!["boot aborted".to_string()])
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn configuration_failure_is_fatal_only_to_that_instance() {
    let scratch = tempfile::tempdir().unwrap();
    let cfg = small_config(2, 1);
    let cancel = CancellationToken::new();

    // Instance 0 fails drive attach; instance 1 is a full loopback member.
    let spec0 = InstanceSpec::for_index(0, scratch.path());
    let member0 = FleetMember {
        controller: Arc::new(InstanceController::new(spec0, Arc::new(FailingVm))),
        metadata: Arc::new(InMemoryMmds::new(cfg.mmds_size_limit)),
        endpoint: Endpoint::new(scratch.path().join("unused.sock"), cfg.echo_port),
    };

    let spec1 = InstanceSpec::for_index(1, scratch.path());
    std::fs::create_dir_all(spec1.uds_path.parent().unwrap()).unwrap();
    let endpoint1 = spec1.endpoint(cfg.echo_port);
    let server = EchoServer::spawn(
        endpoint1.uds_path().to_path_buf(),
        true,
        cancel.child_token(),
    )
    .unwrap();
    let dialer = spawn_echo_dialer(endpoint1.host_port_path(), cancel.child_token());
    let mmds1 = Arc::new(InMemoryMmds::new(cfg.mmds_size_limit));
    let member1 = FleetMember {
        controller: Arc::new(InstanceController::new(
            spec1,
            Arc::new(LoopbackVm::new(Arc::clone(&mmds1))),
        )),
        metadata: mmds1,
        endpoint: endpoint1,
    };

    let controllers = [
        Arc::clone(&member0.controller),
        Arc::clone(&member1.controller),
    ];
    let orchestrator = FleetOrchestrator::new(
        cfg,
        vec![member0, member1],
        scratch.path().to_path_buf(),
        cancel.clone(),
    );
    let report = orchestrator.run().await;

    assert_eq!(report.failures.len(), 1, "report: {}", report.summary());
    assert_eq!(report.failures[0].instance, 0);
    assert_eq!(report.failures[0].kind, FailureKind::Configuration);
    assert_eq!(report.passed, 1, "instance 1 must still run its round");

    for controller in &controllers {
        assert!(controller.is_torn_down());
    }

    cancel.cancel();
    server.stop().await;
    let _ = dialer.await;
}

#[tokio::test]
async fn teardown_is_idempotent() {
    let scratch = tempfile::tempdir().unwrap();
    let spec = InstanceSpec::for_index(0, scratch.path());
    let mmds = Arc::new(InMemoryMmds::new(51_200));
    let controller = InstanceController::new(spec, Arc::new(LoopbackVm::new(mmds)));

    controller.configure_and_start().await.unwrap();
    controller.teardown().await.unwrap();
    let logs_after_first = controller.retained_logs();

    controller.teardown().await.unwrap();
    assert_eq!(
        controller.retained_logs(),
        logs_after_first,
        "second teardown must be a no-op"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_still_runs_cleanup() {
    let scratch = tempfile::tempdir().unwrap();
    let cfg = small_config(3, 50);
    let cancel = CancellationToken::new();
    let mut fixture = build_loopback_fleet(&cfg, scratch.path(), &cancel).unwrap();
    let members = std::mem::take(&mut fixture.members);
    let controllers: Vec<_> = members.iter().map(|m| Arc::clone(&m.controller)).collect();

    cancel.cancel();

    let orchestrator =
        FleetOrchestrator::new(cfg, members, scratch.path().to_path_buf(), cancel.clone());
    let report = orchestrator.run().await;

    assert_eq!(report.passed, 0, "no round may run after cancellation");
    for controller in &controllers {
        assert!(
            controller.is_torn_down(),
            "cleanup must run for every started instance"
        );
    }

    fixture.shutdown().await;
}
