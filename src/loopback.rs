//! Loopback fixture: a full fleet wired to in-process collaborators.
//!
//! Stands in for the virtualization control plane when none is attached.
//! Each loopback instance gets an in-memory metadata service and real
//! unix-socket echo workers, so the harness exercises its actual protocol
//! paths end to end.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::HarnessConfig;
use crate::fleet::FleetMember;
use crate::instance::{InstanceController, InstanceSpec, VmControl};
use crate::mmds::{InMemoryMmds, MmdsError};
use crate::transport::{spawn_echo_dialer, EchoServer};

/// In-process stand-in for one instance's control surface.
///
/// Configuration calls are recorded as log lines so teardown-time log
/// retention has something real to drain.
pub struct LoopbackVm {
    mmds: Arc<InMemoryMmds>,
    log: Mutex<Vec<String>>,
}

impl LoopbackVm {
    pub fn new(mmds: Arc<InMemoryMmds>) -> Self {
        Self {
            mmds,
            log: Mutex::new(Vec::new()),
        }
    }

    fn note(&self, line: String) {
        self.log.lock().push(line);
    }
}

#[async_trait]
impl VmControl for LoopbackVm {
    async fn configure(&self, vcpus: u8, mem_mib: u32, smt: bool) -> Result<(), String> {
        self.note(format!("configured vcpus={vcpus} mem_mib={mem_mib} smt={smt}"));
        Ok(())
    }

    async fn setup_network(&self, iface_id: &str) -> Result<(), String> {
        self.note(format!("network iface {iface_id} up"));
        Ok(())
    }

    async fn attach_vsock(&self, guest_cid: u32, uds_path: &Path) -> Result<(), String> {
        self.note(format!("vsock cid={guest_cid} uds={}", uds_path.display()));
        Ok(())
    }

    async fn configure_metadata(&self, iface_ids: &[String]) -> Result<(), String> {
        self.note(format!("metadata service on ifaces {iface_ids:?}"));
        Ok(())
    }

    async fn seed_metadata(&self, snapshot: &Value) -> Result<(), String> {
        self.mmds
            .seed(snapshot.clone())
            .await
            .map_err(|e: MmdsError| e.to_string())?;
        self.note("metadata store seeded".to_string());
        Ok(())
    }

    async fn attach_drive(&self, drive_id: &str) -> Result<(), String> {
        self.note(format!("drive {drive_id} attached"));
        Ok(())
    }

    async fn start(&self) -> Result<(), String> {
        self.note("instance started".to_string());
        Ok(())
    }

    async fn kill(&self) -> Result<(), String> {
        self.note("instance killed".to_string());
        Ok(())
    }

    async fn fetch_logs(&self) -> Result<Vec<String>, String> {
        Ok(self.log.lock().clone())
    }
}

/// A built loopback fleet plus the echo workers backing it.
pub struct LoopbackFleet {
    pub members: Vec<FleetMember>,
    echo_servers: Vec<EchoServer>,
    dialer_cancel: CancellationToken,
    dialers: Vec<tokio::task::JoinHandle<()>>,
}

impl LoopbackFleet {
    /// Stop all echo workers.
    pub async fn shutdown(self) {
        self.dialer_cancel.cancel();
        for server in self.echo_servers {
            server.stop().await;
        }
        for dialer in self.dialers {
            let _ = dialer.await;
        }
    }
}

/// Build a fleet of `config.instances` loopback instances under `root`.
///
/// For every instance this spawns an echo responder on its base socket
/// (serving host-initiated dials, preamble included) and an echo dialer
/// against its per-port socket (the guest side of guest-initiated rounds).
pub fn build_loopback_fleet(
    config: &HarnessConfig,
    root: &Path,
    cancel: &CancellationToken,
) -> std::io::Result<LoopbackFleet> {
    let dialer_cancel = cancel.child_token();
    let mut members = Vec::with_capacity(config.instances);
    let mut echo_servers = Vec::with_capacity(config.instances);
    let mut dialers = Vec::with_capacity(config.instances);

    for index in 0..config.instances {
        let spec = InstanceSpec::for_index(index, root);
        std::fs::create_dir_all(spec.uds_path.parent().unwrap_or(root))?;
        let endpoint = spec.endpoint(config.echo_port);

        let server = EchoServer::spawn(
            endpoint.uds_path().to_path_buf(),
            true,
            cancel.child_token(),
        )
        .map_err(|e| std::io::Error::other(e.to_string()))?;
        echo_servers.push(server);

        dialers.push(spawn_echo_dialer(
            endpoint.host_port_path(),
            dialer_cancel.clone(),
        ));

        let mmds = Arc::new(InMemoryMmds::new(config.mmds_size_limit));
        let vm = Arc::new(LoopbackVm::new(Arc::clone(&mmds)));
        let controller = Arc::new(InstanceController::new(spec, vm));

        members.push(FleetMember {
            controller,
            metadata: mmds,
            endpoint,
        });
    }

    Ok(LoopbackFleet {
        members,
        echo_servers,
        dialer_cancel,
        dialers,
    })
}
