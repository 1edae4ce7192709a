//! Job and result model shared by the builder, the pool, and the orchestrator.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use camscan_core::{AppConfig, Device, DeviceRole, HostAddress, NetworkDevice, OidSet};
use camscan_inventory::Inventory;

use crate::error::ScanError;
use crate::snmp::DeviceAttributes;

/// Run-unique job identifier, assigned in build order starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which probe a job runs. Used to route results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobType {
    AccessPoint,
    SubscriberModule,
    DeviceCheck,
}

impl JobType {
    pub fn for_role(role: DeviceRole) -> Self {
        match role {
            DeviceRole::AccessPoint => Self::AccessPoint,
            DeviceRole::SubscriberModule => Self::SubscriberModule,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessPoint => "ap",
            Self::SubscriberModule => "sm",
            Self::DeviceCheck => "icmp",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The record a job operates on.
#[derive(Debug, Clone)]
pub enum JobPayload {
    /// SNMP attribute collection for a known device.
    DeviceScan {
        role: DeviceRole,
        record: Device,
        oids: Arc<OidSet>,
    },
    /// ICMP reachability plus classification for a swept host.
    DeviceCheck { record: NetworkDevice },
}

impl JobPayload {
    pub fn job_type(&self) -> JobType {
        match self {
            Self::DeviceScan { role, .. } => JobType::for_role(*role),
            Self::DeviceCheck { .. } => JobType::DeviceCheck,
        }
    }

    pub fn address(&self) -> HostAddress {
        match self {
            Self::DeviceScan { record, .. } => record.address,
            Self::DeviceCheck { record } => record.address,
        }
    }
}

/// Everything a job needs to run. Echoed back inside its [`JobResult`].
#[derive(Clone)]
pub struct JobDescriptor {
    pub id: JobId,
    pub job_type: JobType,
    pub config: Arc<AppConfig>,
    pub payload: JobPayload,
    pub inventory: Arc<dyn Inventory>,
}

impl fmt::Debug for JobDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDescriptor")
            .field("id", &self.id)
            .field("job_type", &self.job_type)
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}

/// Outcome of an ICMP device check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Reachability {
    pub alive: bool,
    /// Role inferred from the system description, if the host answered SNMP.
    pub role: Option<DeviceRole>,
}

/// Successful job output.
#[derive(Debug, Clone, PartialEq)]
pub enum JobValue {
    Attributes(DeviceAttributes),
    Reachability(Reachability),
}

/// Produced exactly once per executed job.
#[derive(Debug)]
pub struct JobResult {
    pub outcome: Result<JobValue, ScanError>,
    pub descriptor: JobDescriptor,
}

impl JobResult {
    pub fn id(&self) -> JobId {
        self.descriptor.id
    }

    pub fn error(&self) -> Option<&ScanError> {
        self.outcome.as_ref().err()
    }
}

/// Runs one kind of job.
///
/// Executors never panic on probe failures; anything that should reach the
/// orchestrator as a failure is returned as `Err`.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(
        &self,
        descriptor: &JobDescriptor,
        cancel: &CancellationToken,
    ) -> Result<JobValue, ScanError>;
}

/// A descriptor bound to the executor that runs it.
pub struct Job {
    descriptor: JobDescriptor,
    executor: Arc<dyn JobExecutor>,
}

impl Job {
    pub fn new(descriptor: JobDescriptor, executor: Arc<dyn JobExecutor>) -> Self {
        Self {
            descriptor,
            executor,
        }
    }

    pub fn descriptor(&self) -> &JobDescriptor {
        &self.descriptor
    }

    /// Run the executor and pair its outcome with the descriptor.
    pub async fn execute(self, cancel: &CancellationToken) -> JobResult {
        let outcome = self.executor.execute(&self.descriptor, cancel).await;
        JobResult {
            outcome,
            descriptor: self.descriptor,
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}
