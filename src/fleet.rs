//! Fleet orchestration: fan the per-instance checks out across the fleet,
//! aggregate failures, and guarantee teardown.
//!
//! Each round runs echo verification in both directions and then a
//! near-limit metadata PATCH against every instance. Instances are
//! evaluated independently: one instance's failure degrades its own round
//! result and nothing else. After the rounds (or on cancellation), the
//! cleanup phase always drains every instance's retained logs and tears
//! every instance down exactly once.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::blob;
use crate::config::HarnessConfig;
use crate::echo::{self, EchoError};
use crate::instance::{InstanceController, InstanceError};
use crate::mmds::{MetadataService, MmdsClient, MmdsError};
use crate::telemetry;
use crate::transport::{Direction, Endpoint};

/// Classified failure kind for reporting, matching the error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    InvalidTtl,
    TokenExpired,
    PayloadTooLarge,
    NotFound,
    Connection,
    Integrity,
    Configuration,
    Teardown,
    Panic,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InvalidTtl => "invalid_ttl",
            FailureKind::TokenExpired => "token_expired",
            FailureKind::PayloadTooLarge => "payload_too_large",
            FailureKind::NotFound => "not_found",
            FailureKind::Connection => "connection",
            FailureKind::Integrity => "integrity",
            FailureKind::Configuration => "configuration",
            FailureKind::Teardown => "teardown",
            FailureKind::Panic => "panic",
        }
    }
}

impl From<&MmdsError> for FailureKind {
    fn from(e: &MmdsError) -> Self {
        match e {
            MmdsError::InvalidTtl { .. } => FailureKind::InvalidTtl,
            MmdsError::TokenExpired => FailureKind::TokenExpired,
            MmdsError::PayloadTooLarge { .. } => FailureKind::PayloadTooLarge,
            MmdsError::NotFound { .. } => FailureKind::NotFound,
            MmdsError::Transport(_) => FailureKind::Connection,
        }
    }
}

impl From<&EchoError> for FailureKind {
    fn from(e: &EchoError) -> Self {
        match e {
            EchoError::Channel(_) => FailureKind::Connection,
            EchoError::Integrity { .. } => FailureKind::Integrity,
        }
    }
}

/// One recorded failure with full context.
#[derive(Debug, Clone)]
pub struct RoundFailure {
    pub instance: usize,
    pub round: usize,
    pub kind: FailureKind,
    pub message: String,
}

/// Aggregated fleet outcome.
#[derive(Debug)]
pub struct FleetReport {
    pub instances: usize,
    pub rounds: usize,
    pub passed: usize,
    pub failures: Vec<RoundFailure>,
}

impl FleetReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn summary(&self) -> String {
        let mut out = format!(
            "fleet: {} instances x {} rounds, {} checks passed, {} failures",
            self.instances,
            self.rounds,
            self.passed,
            self.failures.len()
        );
        for f in &self.failures {
            out.push_str(&format!(
                "\n  instance {} round {}: [{}] {}",
                f.instance,
                f.round,
                f.kind.as_str(),
                f.message
            ));
        }
        out
    }
}

/// One instance's wiring: its controller plus the two protocol endpoints.
pub struct FleetMember {
    pub controller: Arc<InstanceController>,
    pub metadata: Arc<dyn MetadataService>,
    pub endpoint: Endpoint,
}

#[derive(Default)]
struct RoundLog {
    passed: usize,
    failures: Vec<RoundFailure>,
}

impl RoundLog {
    fn record_pass(&mut self) {
        self.passed += 1;
        telemetry::record_round_pass();
    }

    fn record_failure(&mut self, failure: RoundFailure) {
        tracing::error!(
            instance = failure.instance,
            round = failure.round,
            kind = failure.kind.as_str(),
            message = %failure.message,
            "check failed"
        );
        telemetry::record_round_failure(failure.kind.as_str());
        self.failures.push(failure);
    }
}

/// Runs R rounds of checks across N instances and guarantees cleanup.
pub struct FleetOrchestrator {
    config: HarnessConfig,
    members: Vec<Arc<FleetMember>>,
    blob_root: PathBuf,
    cancel: CancellationToken,
    log: Mutex<RoundLog>,
}

impl FleetOrchestrator {
    /// `members` must be ordered by instance index: `members[i]` carries
    /// the controller whose spec index is `i`.
    pub fn new(
        config: HarnessConfig,
        members: Vec<FleetMember>,
        blob_root: PathBuf,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            members: members.into_iter().map(Arc::new).collect(),
            blob_root,
            cancel,
            log: Mutex::new(RoundLog::default()),
        }
    }

    /// Run the full scenario. Never panics outward; always ends in the
    /// cleanup phase, even when cancelled mid-round.
    pub async fn run(&self) -> FleetReport {
        let fatal = self.start_all().await;
        self.run_rounds(&fatal).await;
        self.cleanup().await;

        let log = self.log.lock();
        FleetReport {
            instances: self.members.len(),
            rounds: self.config.rounds,
            passed: log.passed,
            failures: log.failures.clone(),
        }
    }

    /// Configure and start every instance concurrently. Returns the set of
    /// instances whose configuration failed; those are fatal for the rest
    /// of the run but must not block anyone else.
    async fn start_all(&self) -> Vec<bool> {
        let mut fatal = vec![false; self.members.len()];
        let mut tasks: JoinSet<(usize, Result<(), InstanceError>)> = JoinSet::new();

        for (pos, member) in self.members.iter().enumerate() {
            let member = Arc::clone(member);
            tasks.spawn(async move { (pos, member.controller.configure_and_start().await) });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((index, Err(e))) => {
                    fatal[index] = true;
                    self.log.lock().record_failure(RoundFailure {
                        instance: index,
                        round: 0,
                        kind: FailureKind::Configuration,
                        message: e.to_string(),
                    });
                }
                Err(join_err) => {
                    // A panicking startup task cannot name its instance;
                    // record it at fleet scope.
                    self.log.lock().record_failure(RoundFailure {
                        instance: usize::MAX,
                        round: 0,
                        kind: FailureKind::Panic,
                        message: join_err.to_string(),
                    });
                }
            }
        }
        fatal
    }

    async fn run_rounds(&self, fatal: &[bool]) {
        for round in 0..self.config.rounds {
            if self.cancel.is_cancelled() {
                tracing::warn!(round, "cancelled before round start");
                break;
            }
            tracing::info!(round, "round start");

            let mut tasks: JoinSet<(usize, Result<(), RoundFailure>)> = JoinSet::new();
            for (index, member) in self.members.iter().enumerate() {
                if fatal[index] {
                    continue;
                }
                let member = Arc::clone(member);
                let config = self.config.clone();
                let blob_root = self.blob_root.clone();
                tasks.spawn(async move {
                    let result =
                        run_instance_round(&member, round, &config, &blob_root).await;
                    (index, result)
                });
            }

            loop {
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => {
                        tracing::warn!(round, "cancelled mid-round, aborting remaining checks");
                        tasks.shutdown().await;
                        return;
                    }
                    joined = tasks.join_next() => {
                        let Some(joined) = joined else { break };
                        match joined {
                            Ok((_, Ok(()))) => self.log.lock().record_pass(),
                            Ok((_, Err(failure))) => {
                                self.log.lock().record_failure(failure);
                            }
                            Err(join_err) => {
                                self.log.lock().record_failure(RoundFailure {
                                    instance: usize::MAX,
                                    round,
                                    kind: FailureKind::Panic,
                                    message: join_err.to_string(),
                                });
                            }
                        }
                    }
                }
            }
        }
    }

    /// Guaranteed-cleanup phase: drain and log every instance's captured
    /// logs, then tear every instance down. Teardown errors are logged and
    /// recorded, never raised, so no instance can block another's cleanup.
    async fn cleanup(&self) {
        for member in &self.members {
            let index = member.controller.spec().index;

            if let Err(e) = member.controller.teardown().await {
                telemetry::record_teardown_failure();
                self.log.lock().record_failure(RoundFailure {
                    instance: index,
                    round: self.config.rounds,
                    kind: FailureKind::Teardown,
                    message: e.to_string(),
                });
            }

            for line in member.controller.retained_logs() {
                tracing::info!(instance = index, log = %line, "instance log");
            }
        }
    }
}

/// One instance's work for one round: echo verification in both
/// directions, then a near-limit metadata PATCH. The echo check must have
/// completed (or definitively failed) before the patch begins.
async fn run_instance_round(
    member: &FleetMember,
    round: usize,
    config: &HarnessConfig,
    blob_root: &std::path::Path,
) -> Result<(), RoundFailure> {
    let index = member.controller.spec().index;

    run_echo_checks(member, round, config, blob_root)
        .await
        .map_err(|e| RoundFailure {
            instance: index,
            round,
            kind: FailureKind::from(&e),
            message: e.to_string(),
        })?;

    run_metadata_patch(member, round, config)
        .await
        .map_err(|e| RoundFailure {
            instance: index,
            round,
            kind: FailureKind::from(&e),
            message: e.to_string(),
        })?;

    tracing::debug!(instance = index, round, "round checks passed");
    Ok(())
}

async fn run_echo_checks(
    member: &FleetMember,
    round: usize,
    config: &HarnessConfig,
    blob_root: &std::path::Path,
) -> Result<(), EchoError> {
    let index = member.controller.spec().index;
    let blob = blob::generate(blob_root, config.blob_size)
        .map_err(|e| crate::transport::ChannelError::Connection(e.to_string()))?;

    for direction in [Direction::GuestInitiated, Direction::HostInitiated] {
        tracing::debug!(instance = index, round, %direction, "echo check");
        echo::verify(
            &member.endpoint,
            direction,
            &blob,
            config.connect_timeout,
            config.io_timeout,
        )
        .await?;
        telemetry::record_echo_bytes(blob.len() as u64);
    }

    let _ = std::fs::remove_file(blob.path());
    Ok(())
}

/// Near-limit PATCH payload, sized to press against the store boundary.
pub fn near_limit_patch() -> serde_json::Value {
    let filler = "a".repeat(1000);
    json!({"latest": {"meta-data": {"ami-id": "smth", "secret_key": filler}}})
}

async fn run_metadata_patch(
    member: &FleetMember,
    round: usize,
    config: &HarnessConfig,
) -> Result<(), MmdsError> {
    let index = member.controller.spec().index;
    let mut client = MmdsClient::new(Arc::clone(&member.metadata));
    client.request_token(config.token_ttl_secs).await?;

    let start = tokio::time::Instant::now();
    client.patch(near_limit_patch()).await?;
    telemetry::record_patch_latency(index, round, start.elapsed());
    Ok(())
}
