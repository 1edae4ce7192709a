//! Turns inventory records into jobs.

use std::ops::RangeInclusive;
use std::sync::Arc;

use ipnet::Ipv4Net;

use camscan_core::{
    AppConfig, Device, DeviceRole, DeviceStatus, HostAddress, NetworkDevice, OidSet, Subnet,
};
use camscan_inventory::Inventory;

use crate::error::ScanError;
use crate::icmp::{DeviceChecker, Pinger, SurgePinger};
use crate::job::{Job, JobDescriptor, JobExecutor, JobId, JobPayload};
use crate::snmp::{AsyncSnmpConnector, DeviceScanner, SnmpConnector};

/// Network probes shared by every job of a run.
#[derive(Clone)]
pub struct Probes {
    pub snmp: Arc<dyn SnmpConnector>,
    pub icmp: Arc<dyn Pinger>,
}

impl Probes {
    /// Real SNMP and ICMP on the local host.
    pub fn system() -> Self {
        Self {
            snmp: Arc::new(AsyncSnmpConnector),
            icmp: Arc::new(SurgePinger::new()),
        }
    }
}

/// Jobs for a subnet sweep, plus the subnets that could not be expanded.
#[derive(Debug, Default)]
pub struct SweepJobs {
    pub jobs: Vec<Job>,
    pub skipped: Vec<ScanError>,
}

/// Assigns run-unique, increasing job ids across every build call.
pub struct JobBuilder {
    next_id: u64,
    config: Arc<AppConfig>,
    inventory: Arc<dyn Inventory>,
    scanner: Arc<dyn JobExecutor>,
    checker: Arc<dyn JobExecutor>,
}

impl JobBuilder {
    pub fn new(config: Arc<AppConfig>, inventory: Arc<dyn Inventory>, probes: &Probes) -> Self {
        Self {
            next_id: 1,
            config,
            inventory,
            scanner: Arc::new(DeviceScanner::new(probes.snmp.clone())),
            checker: Arc::new(DeviceChecker::new(probes.icmp.clone(), probes.snmp.clone())),
        }
    }

    /// The id the next job will get.
    pub fn next_id(&self) -> JobId {
        JobId(self.next_id)
    }

    fn job(&mut self, payload: JobPayload) -> Job {
        let job_type = payload.job_type();
        let executor = match &payload {
            JobPayload::DeviceScan { .. } => Arc::clone(&self.scanner),
            JobPayload::DeviceCheck { .. } => Arc::clone(&self.checker),
        };
        let descriptor = JobDescriptor {
            id: JobId(self.next_id),
            job_type,
            config: Arc::clone(&self.config),
            payload,
            inventory: Arc::clone(&self.inventory),
        };
        self.next_id += 1;

        tracing::trace!(
            job_id = %descriptor.id,
            job_type = %job_type,
            ip = %descriptor.payload.address(),
            "Queueing job"
        );
        Job::new(descriptor, executor)
    }

    /// One SNMP scan job per device with a non-zero status, in input order.
    pub fn build_device_scan_jobs(
        &mut self,
        role: DeviceRole,
        devices: &[Device],
        oids: Arc<OidSet>,
    ) -> Vec<Job> {
        let mut jobs = Vec::with_capacity(devices.len());
        for device in devices {
            if !device.status.is_active() {
                tracing::debug!(role = %role, ip = %device.address, "Device disabled, skipping");
                continue;
            }
            jobs.push(self.job(JobPayload::DeviceScan {
                role,
                record: device.clone(),
                oids: Arc::clone(&oids),
            }));
        }

        tracing::debug!(role = %role, devices = devices.len(), jobs = jobs.len(), "Device jobs built");
        jobs
    }

    /// One ICMP check job per usable address of every enabled subnet.
    ///
    /// Subnets whose CIDR does not parse are logged and returned in
    /// `skipped`; the rest of the sweep is still built.
    pub fn build_device_check_jobs(&mut self, subnets: &[Subnet]) -> SweepJobs {
        let mut sweep = SweepJobs::default();

        for subnet in subnets {
            if !subnet.is_enabled() {
                tracing::debug!(subnet_id = subnet.id, cidr = %subnet.cidr, "Subnet disabled, skipping");
                continue;
            }

            let block = match subnet.block() {
                Ok(block) => block,
                Err(e) => {
                    tracing::error!(
                        subnet_id = subnet.id,
                        cidr = %subnet.cidr,
                        error = %e,
                        "Failed to parse subnet"
                    );
                    sweep.skipped.push(ScanError::Subnet {
                        subnet_id: subnet.id,
                        cidr: subnet.cidr.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let hosts = usable_host_range(&block);
            let before = sweep.jobs.len();
            for raw in hosts {
                let record = NetworkDevice {
                    network_id: subnet.network_id,
                    subnet_id: subnet.id,
                    address: HostAddress::from_u32(raw),
                    status: DeviceStatus::UNKNOWN,
                };
                sweep.jobs.push(self.job(JobPayload::DeviceCheck { record }));
            }

            tracing::debug!(
                subnet_id = subnet.id,
                cidr = %block,
                jobs = sweep.jobs.len() - before,
                "Subnet expanded"
            );
        }

        sweep
    }
}

/// Addresses worth probing in `block`, as integers.
///
/// The network and broadcast addresses are excluded, except for /31 and /32
/// blocks where every address is a host.
pub fn usable_host_range(block: &Ipv4Net) -> RangeInclusive<u32> {
    let network = u32::from(block.network());
    let broadcast = u32::from(block.broadcast());
    if block.prefix_len() >= 31 {
        network..=broadcast
    } else {
        (network + 1)..=(broadcast - 1)
    }
}
