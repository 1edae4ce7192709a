//! Run orchestration.
//!
//! A [`TaskManager`] owns one scan run: it snapshots the inventory, builds
//! jobs, feeds them to a [`WorkerPool`], routes every result into the report,
//! and exports the per-role tables when the pool is done.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use camscan_core::{AppConfig, DeviceRole, OidSet};
use camscan_inventory::{Inventory, InventorySnapshot};

use crate::builder::{JobBuilder, Probes};
use crate::error::ScanError;
use crate::export::{write_tables, ResultTable};
use crate::job::{Job, JobResult, JobType, JobValue, Reachability};
use crate::pool::{PoolHandle, PoolStats, WorkerPool};

/// Lifecycle of a run. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Idle,
    Built,
    Loaded,
    Running,
    Draining,
    Done,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Built => "built",
            Self::Loaded => "loaded",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

/// Subnet sweep tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckSummary {
    pub checked: usize,
    pub alive: usize,
    pub access_points: usize,
    pub subscriber_modules: usize,
}

impl CheckSummary {
    fn record(&mut self, reachability: Reachability) {
        self.checked += 1;
        if reachability.alive {
            self.alive += 1;
        }
        match reachability.role {
            Some(DeviceRole::AccessPoint) => self.access_points += 1,
            Some(DeviceRole::SubscriberModule) => self.subscriber_modules += 1,
            None => {}
        }
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub jobs_built: usize,
    pub access_points: ResultTable,
    pub subscriber_modules: ResultTable,
    pub checks: CheckSummary,
    pub failed_jobs: usize,
    pub skipped_subnets: usize,
    pub pool: PoolStatsReport,
    pub cancelled: bool,
    pub exported: Vec<String>,
    pub export_error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PoolStatsReport {
    pub executed: usize,
    pub failed: usize,
}

impl From<PoolStats> for PoolStatsReport {
    fn from(stats: PoolStats) -> Self {
        Self {
            executed: stats.executed,
            failed: stats.failed,
        }
    }
}

impl ScanReport {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            finished_at: None,
            jobs_built: 0,
            access_points: ResultTable::new(DeviceRole::AccessPoint, &OidSet::default()),
            subscriber_modules: ResultTable::new(DeviceRole::SubscriberModule, &OidSet::default()),
            checks: CheckSummary::default(),
            failed_jobs: 0,
            skipped_subnets: 0,
            pool: PoolStatsReport::default(),
            cancelled: false,
            exported: Vec::new(),
            export_error: None,
        }
    }

    pub fn table(&self, role: DeviceRole) -> &ResultTable {
        match role {
            DeviceRole::AccessPoint => &self.access_points,
            DeviceRole::SubscriberModule => &self.subscriber_modules,
        }
    }

    fn table_mut(&mut self, role: DeviceRole) -> &mut ResultTable {
        match role {
            DeviceRole::AccessPoint => &mut self.access_points,
            DeviceRole::SubscriberModule => &mut self.subscriber_modules,
        }
    }

    /// Results received, whatever their outcome.
    pub fn results_received(&self) -> usize {
        self.access_points.len() + self.subscriber_modules.len() + self.checks.checked
            + self.failed_jobs
    }
}

/// Drives one scan run through build, load, start and monitor.
pub struct TaskManager {
    state: TaskState,
    config: Arc<AppConfig>,
    inventory: Arc<dyn Inventory>,
    builder: JobBuilder,
    jobs: Vec<Job>,
    pool: Option<WorkerPool>,
    producer: Option<JoinHandle<usize>>,
    handle: Option<PoolHandle>,
    report: ScanReport,
}

impl TaskManager {
    pub fn new(config: Arc<AppConfig>, inventory: Arc<dyn Inventory>, probes: Probes) -> Self {
        let builder = JobBuilder::new(Arc::clone(&config), Arc::clone(&inventory), &probes);
        Self {
            state: TaskState::Idle,
            config,
            inventory,
            builder,
            jobs: Vec::new(),
            pool: None,
            producer: None,
            handle: None,
            report: ScanReport::new(Uuid::new_v4()),
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn run_id(&self) -> Uuid {
        self.report.run_id
    }

    pub fn report(&self) -> &ScanReport {
        &self.report
    }

    fn expect_state(&self, expected: TaskState) -> Result<(), ScanError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ScanError::State {
                expected: expected.as_str(),
                actual: self.state.as_str(),
            })
        }
    }

    fn transition(&mut self, next: TaskState) {
        tracing::info!(
            run_id = %self.report.run_id,
            from = self.state.as_str(),
            to = next.as_str(),
            "Task state changed"
        );
        self.state = next;
    }

    /// Snapshot the inventory and build every job of the run: access points,
    /// then subscriber modules, then (with discovery on) the subnet sweep.
    /// Returns the number of jobs built.
    pub async fn build(&mut self) -> Result<usize, ScanError> {
        self.expect_state(TaskState::Idle)?;

        let snapshot = match InventorySnapshot::load(self.inventory.as_ref()).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!(run_id = %self.report.run_id, error = %e, "Inventory sync failed");
                self.transition(TaskState::Failed);
                return Err(ScanError::Bootstrap(format!("inventory sync failed: {e}")));
            }
        };

        let mut jobs = Vec::new();
        for role in DeviceRole::ALL {
            let oids = Arc::new(OidSet::from_maps(snapshot.oid_maps(role)));
            if oids.is_empty() {
                tracing::warn!(role = %role, "No OID map for role, attributes will be empty");
            }
            *self.report.table_mut(role) = ResultTable::new(role, &oids);
            jobs.extend(
                self.builder
                    .build_device_scan_jobs(role, snapshot.devices(role), oids),
            );
        }

        if self.config.discover {
            let sweep = self.builder.build_device_check_jobs(&snapshot.subnets);
            self.report.skipped_subnets = sweep.skipped.len();
            jobs.extend(sweep.jobs);
        }

        let built = jobs.len();
        self.report.jobs_built = built;
        self.jobs = jobs;
        tracing::info!(run_id = %self.report.run_id, jobs = built, "Jobs built");
        self.transition(TaskState::Built);
        Ok(built)
    }

    /// Create the pool and start feeding it the built jobs.
    pub fn load(&mut self) -> Result<(), ScanError> {
        self.expect_state(TaskState::Built)?;

        let pool = WorkerPool::new(self.config.worker_count());
        let jobs = std::mem::take(&mut self.jobs);
        tracing::debug!(workers = pool.worker_count(), jobs = jobs.len(), "Loading jobs");
        self.producer = Some(pool.generate_from(jobs));
        self.pool = Some(pool);
        self.transition(TaskState::Loaded);
        Ok(())
    }

    /// Start the workers.
    pub fn start(&mut self, cancel: &CancellationToken) -> Result<(), ScanError> {
        self.expect_state(TaskState::Loaded)?;
        let pool = self
            .pool
            .take()
            .ok_or_else(|| ScanError::Pool("pool already started".to_string()))?;
        self.handle = Some(pool.run(cancel.clone()));
        self.transition(TaskState::Running);
        Ok(())
    }

    /// Consume results until the pool reports done.
    ///
    /// Cancellation is noted but draining continues: jobs already running
    /// still deliver their results before the pool finishes.
    pub async fn monitor(&mut self, cancel: &CancellationToken) -> Result<(), ScanError> {
        self.expect_state(TaskState::Running)?;
        let Some(mut handle) = self.handle.take() else {
            return Err(ScanError::Pool("pool not started".to_string()));
        };
        self.transition(TaskState::Draining);

        let mut results_open = true;
        let stats = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled(), if !self.report.cancelled => {
                    tracing::warn!(run_id = %self.report.run_id, "Run cancelled, draining in-flight jobs");
                    self.report.cancelled = true;
                }
                result = handle.results.recv(), if results_open => match result {
                    Some(result) => self.record(result),
                    None => results_open = false,
                },
                done = &mut handle.done, if !results_open => {
                    break done.unwrap_or_else(|_| {
                        tracing::error!("Worker pool exited without reporting");
                        PoolStats::default()
                    });
                }
            }
        };

        if let Some(producer) = self.producer.take() {
            match producer.await {
                Ok(queued) => tracing::debug!(queued, "Producer finished"),
                Err(e) => tracing::warn!(error = %e, "Producer task failed"),
            }
        }

        self.report.pool = stats.into();
        self.report.finished_at = Some(Utc::now());
        self.transition(TaskState::Done);
        Ok(())
    }

    fn record(&mut self, result: JobResult) {
        let descriptor = &result.descriptor;
        let address = descriptor.payload.address();

        let value = match result.outcome {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(
                    job_id = %descriptor.id,
                    job_type = %descriptor.job_type,
                    ip = %address,
                    error = %e,
                    "Job failed"
                );
                self.report.failed_jobs += 1;
                return;
            }
        };

        match (descriptor.job_type, value) {
            (JobType::AccessPoint, JobValue::Attributes(attributes)) => {
                self.report
                    .access_points
                    .push(descriptor.id, address, &attributes);
            }
            (JobType::SubscriberModule, JobValue::Attributes(attributes)) => {
                self.report
                    .subscriber_modules
                    .push(descriptor.id, address, &attributes);
            }
            (JobType::DeviceCheck, JobValue::Reachability(reachability)) => {
                self.report.checks.record(reachability);
            }
            (job_type, value) => {
                tracing::warn!(
                    job_id = %descriptor.id,
                    job_type = %job_type,
                    value = ?value,
                    "Result does not match job type"
                );
                self.report.failed_jobs += 1;
            }
        }

        tracing::trace!(job_id = %descriptor.id, ip = %address, "Result recorded");
    }

    /// Write the per-role tables to `dir`.
    pub fn export(&mut self, dir: &Path) -> Result<(), ScanError> {
        let tables = [&self.report.access_points, &self.report.subscriber_modules];
        let written = write_tables(dir, &tables)?;
        self.report.exported = written
            .into_iter()
            .map(|p| p.display().to_string())
            .collect();
        Ok(())
    }

    /// Run to completion: build, load, start, monitor, export.
    ///
    /// An optional run deadline cancels `cancel`. Export is skipped on dry
    /// runs; an export failure is logged and kept in `export_error`.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<ScanReport, ScanError> {
        tracing::info!(
            run_id = %self.report.run_id,
            workers = self.config.worker_count(),
            discover = self.config.discover,
            dry_run = self.config.dry_run,
            "Starting scan run"
        );

        let deadline = self.config.run_timeout().map(|limit| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                tracing::warn!(limit_secs = limit.as_secs(), "Run deadline reached");
                cancel.cancel();
            })
        });

        let outcome = self.drive(&cancel).await;
        if let Some(deadline) = deadline {
            deadline.abort();
        }
        outcome?;

        if self.config.dry_run {
            tracing::info!("Dry run, skipping export");
        } else {
            let dir = self.config.export_dir.clone();
            if let Err(e) = self.export(Path::new(&dir)) {
                tracing::error!(dir = %dir, error = %e, "Export failed");
                self.report.export_error = Some(e.to_string());
            }
        }

        let report = &self.report;
        tracing::info!(
            run_id = %report.run_id,
            jobs = report.jobs_built,
            access_points = report.access_points.len(),
            subscriber_modules = report.subscriber_modules.len(),
            checked = report.checks.checked,
            alive = report.checks.alive,
            failed = report.failed_jobs,
            cancelled = report.cancelled,
            "Scan run finished"
        );
        Ok(self.report)
    }

    async fn drive(&mut self, cancel: &CancellationToken) -> Result<(), ScanError> {
        self.build().await?;
        self.load()?;
        self.start(cancel)?;
        self.monitor(cancel).await
    }
}
