//! camscan-core: Shared types, configuration, and error handling for camscan.
//!
//! This crate provides the foundational types used by every camscan component:
//! - Inventory records (access points, subscriber modules, subnets)
//! - SNMP OID map declarations per device role
//! - Run configuration loading and normalization
//! - Common error types

pub mod config;
pub mod error;
pub mod types;

pub use crate::config::{AppConfig, DatabaseConfig, Overrides};
pub use error::CoreError;
pub use types::{
    Device, DeviceRole, DeviceStatus, HostAddress, NetworkDevice, OidMap, OidSet, Subnet,
};
