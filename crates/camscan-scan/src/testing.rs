//! In-process fakes for the network probes and inventory.

use std::collections::{HashMap, HashSet};
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use camscan_core::{AppConfig, Device, DeviceRole, DeviceStatus, HostAddress, NetworkDevice};
use camscan_core::{OidMap, OidSet, Subnet};
use camscan_inventory::{Inventory, InventoryError, MemoryInventory, Table};

use crate::error::ScanError;
use crate::icmp::{IcmpError, Pinger};
use crate::job::{Job, JobDescriptor, JobExecutor, JobId, JobPayload, JobType, JobValue};
use crate::snmp::{SnmpConnector, SnmpError, SnmpSession, SnmpTarget, Varbind};

fn ip(s: &str) -> HostAddress {
    s.parse().unwrap()
}

pub fn scan_descriptor(
    id: u64,
    role: DeviceRole,
    address: &str,
    oids: Arc<OidSet>,
    config: Arc<AppConfig>,
) -> JobDescriptor {
    JobDescriptor {
        id: JobId(id),
        job_type: JobType::for_role(role),
        config,
        payload: JobPayload::DeviceScan {
            role,
            record: Device::reclassified(1, ip(address)),
            oids,
        },
        inventory: Arc::new(MemoryInventory::new()),
    }
}

pub fn check_descriptor(id: u64, address: &str, config: Arc<AppConfig>) -> JobDescriptor {
    check_descriptor_with(id, address, config, Arc::new(MemoryInventory::new()))
}

pub fn check_descriptor_with(
    id: u64,
    address: &str,
    config: Arc<AppConfig>,
    inventory: Arc<dyn Inventory>,
) -> JobDescriptor {
    JobDescriptor {
        id: JobId(id),
        job_type: JobType::DeviceCheck,
        config,
        payload: JobPayload::DeviceCheck {
            record: NetworkDevice {
                network_id: 1,
                subnet_id: 1,
                address: ip(address),
                status: DeviceStatus::UNKNOWN,
            },
        },
        inventory,
    }
}

/// Scan jobs for ids in `ids`, all bound to `executor`.
pub fn stub_jobs(ids: RangeInclusive<u64>, executor: Arc<StubExecutor>) -> Vec<Job> {
    let config = Arc::new(AppConfig::default());
    ids.map(|id| {
        let address = HostAddress::from_u32(0x0A00_0000 + id as u32).to_string();
        let descriptor = scan_descriptor(
            id,
            DeviceRole::AccessPoint,
            &address,
            Arc::default(),
            Arc::clone(&config),
        );
        Job::new(descriptor, executor.clone() as Arc<dyn JobExecutor>)
    })
    .collect()
}

/// Executor with scripted failures, panics and delays.
#[derive(Default)]
pub struct StubExecutor {
    fail: HashSet<u64>,
    panic: HashSet<u64>,
    delay: Option<Duration>,
}

impl StubExecutor {
    pub fn failing(ids: impl IntoIterator<Item = u64>) -> Self {
        Self {
            fail: ids.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn panicking(ids: impl IntoIterator<Item = u64>) -> Self {
        Self {
            panic: ids.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }
}

#[async_trait]
impl JobExecutor for StubExecutor {
    async fn execute(
        &self,
        descriptor: &JobDescriptor,
        _cancel: &CancellationToken,
    ) -> Result<JobValue, ScanError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let id = descriptor.id.0;
        if self.panic.contains(&id) {
            panic!("stub executor panic for job {id}");
        }
        if self.fail.contains(&id) {
            return Err(ScanError::Pool(format!("stub failure for job {id}")));
        }
        Ok(JobValue::Attributes(Default::default()))
    }
}

/// How a fake agent answers.
#[derive(Clone)]
pub enum FakeAgent {
    FailGet,
    Respond(Vec<Varbind>),
}

/// SNMP connector over a table of fake agents. Unknown addresses refuse
/// the connection.
#[derive(Default)]
pub struct FakeConnector {
    agents: HashMap<HostAddress, FakeAgent>,
    targets: Mutex<Vec<SnmpTarget>>,
    pub opened: AtomicUsize,
    pub closed: Arc<AtomicUsize>,
}

impl FakeConnector {
    pub fn with(mut self, address: &str, agent: FakeAgent) -> Self {
        self.agents.insert(ip(address), agent);
        self
    }

    /// Communities of every connection attempt, in order.
    pub fn communities(&self) -> Vec<String> {
        self.targets
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.community.clone())
            .collect()
    }
}

#[async_trait]
impl SnmpConnector for FakeConnector {
    async fn connect(&self, target: &SnmpTarget) -> Result<Box<dyn SnmpSession>, SnmpError> {
        self.targets.lock().unwrap().push(target.clone());
        let Some(agent) = self.agents.get(&target.address) else {
            return Err(SnmpError::Connect {
                target: target.socket_addr(),
                reason: "connection refused".to_string(),
            });
        };

        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            agent: agent.clone(),
            target: target.socket_addr(),
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct FakeSession {
    agent: FakeAgent,
    target: String,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl SnmpSession for FakeSession {
    async fn get(&mut self, oids: &[&str]) -> Result<Vec<Varbind>, SnmpError> {
        match &self.agent {
            FakeAgent::FailGet => Err(SnmpError::Request {
                target: self.target.clone(),
                reason: "request timed out".to_string(),
            }),
            FakeAgent::Respond(varbinds) => Ok(varbinds
                .iter()
                .filter(|vb| oids.iter().any(|o| *o == vb.oid.trim_start_matches('.')))
                .cloned()
                .collect()),
        }
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Pinger that answers for a fixed set of hosts and times out otherwise.
#[derive(Default)]
pub struct FakePinger {
    alive: HashSet<HostAddress>,
    broken: HashSet<HostAddress>,
}

impl FakePinger {
    pub fn alive(mut self, address: &str) -> Self {
        self.alive.insert(ip(address));
        self
    }

    pub fn broken(mut self, address: &str) -> Self {
        self.broken.insert(ip(address));
        self
    }
}

#[async_trait]
impl Pinger for FakePinger {
    async fn echo(&self, address: HostAddress, _timeout: Duration) -> Result<Duration, IcmpError> {
        if self.alive.contains(&address) {
            Ok(Duration::from_millis(1))
        } else if self.broken.contains(&address) {
            Err(IcmpError::Transport {
                address,
                reason: "socket unavailable".to_string(),
            })
        } else {
            Err(IcmpError::Timeout { address })
        }
    }
}

/// Inventory whose every call fails.
pub struct BrokenInventory;

impl BrokenInventory {
    fn error() -> InventoryError {
        InventoryError::Connection("inventory offline".to_string())
    }
}

#[async_trait]
impl Inventory for BrokenInventory {
    async fn subnets(&self) -> Result<Vec<Subnet>, InventoryError> {
        Err(Self::error())
    }

    async fn devices(&self, _role: DeviceRole) -> Result<Vec<Device>, InventoryError> {
        Err(Self::error())
    }

    async fn oid_maps(&self, _role: DeviceRole) -> Result<Vec<OidMap>, InventoryError> {
        Err(Self::error())
    }

    async fn upsert_device(
        &self,
        _role: DeviceRole,
        _device: &Device,
    ) -> Result<Device, InventoryError> {
        Err(Self::error())
    }

    async fn upsert_subnet(&self, _subnet: &Subnet) -> Result<Subnet, InventoryError> {
        Err(Self::error())
    }

    async fn has_record_by_field(
        &self,
        _table: Table,
        _field: &str,
        _value: &str,
    ) -> Result<bool, InventoryError> {
        Err(Self::error())
    }
}

/// In-memory inventory that counts lookups and device upserts.
#[derive(Default)]
pub struct CountingInventory {
    inner: MemoryInventory,
    pub lookups: AtomicUsize,
    pub upserts: AtomicUsize,
}

#[async_trait]
impl Inventory for CountingInventory {
    async fn subnets(&self) -> Result<Vec<Subnet>, InventoryError> {
        self.inner.subnets().await
    }

    async fn devices(&self, role: DeviceRole) -> Result<Vec<Device>, InventoryError> {
        self.inner.devices(role).await
    }

    async fn oid_maps(&self, role: DeviceRole) -> Result<Vec<OidMap>, InventoryError> {
        self.inner.oid_maps(role).await
    }

    async fn upsert_device(
        &self,
        role: DeviceRole,
        device: &Device,
    ) -> Result<Device, InventoryError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert_device(role, device).await
    }

    async fn upsert_subnet(&self, subnet: &Subnet) -> Result<Subnet, InventoryError> {
        self.inner.upsert_subnet(subnet).await
    }

    async fn has_record_by_field(
        &self,
        table: Table,
        field: &str,
        value: &str,
    ) -> Result<bool, InventoryError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.has_record_by_field(table, field, value).await
    }
}
