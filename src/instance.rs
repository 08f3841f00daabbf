//! Single-instance lifecycle: configure, start, tear down, retain logs.
//!
//! The actual control surface (configure CPU/memory, attach storage and
//! the rendezvous channel, start, stop, fetch logs) belongs to the
//! virtualization layer and is consumed through [`VmControl`] as opaque
//! calls with success/failure outcomes.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use thiserror::Error;

use crate::transport::{Endpoint, DEFAULT_UDS_NAME};

#[derive(Error, Debug)]
pub enum InstanceError {
    #[error("instance {index} configuration failed at {stage}: {reason}")]
    Configuration {
        index: usize,
        stage: &'static str,
        reason: String,
    },

    #[error("instance {index} teardown failed: {reason}")]
    Teardown { index: usize, reason: String },
}

/// External instance control surface.
#[async_trait]
pub trait VmControl: Send + Sync {
    async fn configure(&self, vcpus: u8, mem_mib: u32, smt: bool) -> Result<(), String>;
    async fn setup_network(&self, iface_id: &str) -> Result<(), String>;
    async fn attach_vsock(&self, guest_cid: u32, uds_path: &Path) -> Result<(), String>;
    async fn configure_metadata(&self, iface_ids: &[String]) -> Result<(), String>;
    async fn seed_metadata(&self, snapshot: &Value) -> Result<(), String>;
    async fn attach_drive(&self, drive_id: &str) -> Result<(), String>;
    async fn start(&self) -> Result<(), String>;
    async fn kill(&self) -> Result<(), String>;
    async fn fetch_logs(&self) -> Result<Vec<String>, String>;
}

/// Static description of one instance under test.
#[derive(Debug, Clone)]
pub struct InstanceSpec {
    pub index: usize,
    pub iface_id: String,
    pub guest_cid: u32,
    pub uds_path: PathBuf,
    pub drive_ids: Vec<String>,
    pub vcpus: u8,
    pub mem_mib: u32,
    pub smt: bool,
}

impl InstanceSpec {
    /// Spec with the stock sizing: 2 vCPUs, 2630 MiB, smt, guest cid 3,
    /// five scratch drives, rendezvous socket under `root`.
    pub fn for_index(index: usize, root: &Path) -> Self {
        Self {
            index,
            iface_id: index.to_string(),
            guest_cid: 3,
            uds_path: root.join(format!("fc{index}")).join(DEFAULT_UDS_NAME),
            drive_ids: (0..5).map(|i| format!("scratch{i}")).collect(),
            vcpus: 2,
            mem_mib: 2630,
            smt: true,
        }
    }

    pub fn endpoint(&self, port: u32) -> Endpoint {
        Endpoint::new(self.uds_path.clone(), port)
    }
}

/// Initial data store snapshot applied before boot.
pub fn seed_snapshot() -> Value {
    json!({"latest": {"meta-data": {"ami-id": "dummy"}}})
}

/// Owns one instance from configuration through teardown.
pub struct InstanceController {
    spec: InstanceSpec,
    vm: std::sync::Arc<dyn VmControl>,
    started: AtomicBool,
    torn_down: AtomicBool,
    logs: Mutex<Vec<String>>,
}

impl InstanceController {
    pub fn new(spec: InstanceSpec, vm: std::sync::Arc<dyn VmControl>) -> Self {
        Self {
            spec,
            vm,
            started: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
            logs: Mutex::new(Vec::new()),
        }
    }

    pub fn spec(&self) -> &InstanceSpec {
        &self.spec
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    /// Bring the instance from configured to running with both protocol
    /// endpoints reachable. The first failing step aborts this instance;
    /// there is no partial recovery.
    pub async fn configure_and_start(&self) -> Result<(), InstanceError> {
        let spec = &self.spec;
        self.step("configure", self.vm.configure(spec.vcpus, spec.mem_mib, spec.smt))
            .await?;
        self.step("network", self.vm.setup_network(&spec.iface_id)).await?;
        self.step("vsock", self.vm.attach_vsock(spec.guest_cid, &spec.uds_path))
            .await?;
        self.step(
            "metadata",
            self.vm.configure_metadata(std::slice::from_ref(&spec.iface_id)),
        )
        .await?;
        self.step("seed", self.vm.seed_metadata(&seed_snapshot())).await?;
        for drive_id in &spec.drive_ids {
            self.step("drive", self.vm.attach_drive(drive_id)).await?;
        }
        self.step("start", self.vm.start()).await?;

        self.started.store(true, Ordering::SeqCst);
        tracing::info!(instance = spec.index, "instance configured and running");
        Ok(())
    }

    /// Retrieve accumulated logs, then stop the instance. Idempotent: the
    /// second and later calls are no-ops.
    pub async fn teardown(&self) -> Result<(), InstanceError> {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        match self.vm.fetch_logs().await {
            Ok(lines) => {
                let stamp = chrono::Utc::now().to_rfc3339();
                let mut logs = self.logs.lock();
                logs.extend(lines.into_iter().map(|l| format!("[{stamp}] {l}")));
            }
            Err(reason) => {
                tracing::warn!(instance = self.spec.index, %reason, "log retrieval failed");
            }
        }

        self.vm.kill().await.map_err(|reason| InstanceError::Teardown {
            index: self.spec.index,
            reason,
        })
    }

    /// Logs captured at teardown time.
    pub fn retained_logs(&self) -> Vec<String> {
        self.logs.lock().clone()
    }

    async fn step(
        &self,
        stage: &'static str,
        op: impl std::future::Future<Output = Result<(), String>>,
    ) -> Result<(), InstanceError> {
        op.await.map_err(|reason| InstanceError::Configuration {
            index: self.spec.index,
            stage,
            reason,
        })
    }
}
