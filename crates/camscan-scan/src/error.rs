//! Error types for the camscan-scan crate.

use camscan_core::CoreError;
use camscan_inventory::InventoryError;
use thiserror::Error;

use crate::icmp::IcmpError;
use crate::snmp::SnmpError;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    #[error("SNMP error: {0}")]
    Snmp(#[from] SnmpError),

    #[error("ICMP error: {0}")]
    Icmp(#[from] IcmpError),

    #[error("Invalid subnet {subnet_id} ({cidr}): {reason}")]
    Subnet {
        subnet_id: i64,
        cidr: String,
        reason: String,
    },

    #[error("Job {job_id} carries a payload its executor cannot run (expected {expected})")]
    PayloadMismatch { job_id: u64, expected: &'static str },

    #[error("Worker pool error: {0}")]
    Pool(String),

    #[error("Bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("Task manager is {actual}, expected {expected}")]
    State {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Export error: {0}")]
    Export(#[from] csv::Error),

    #[error("Config error: {0}")]
    Config(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ScanError>;
