//! camscan-scan: concurrent SNMP/ICMP scanning engine.
//!
//! Builds one job per inventoried device (and, when discovery is enabled,
//! one per usable address in every active subnet), runs them on a fixed-size
//! worker pool, and collects per-role attribute tables for export.

pub mod builder;
pub mod error;
pub mod export;
pub mod icmp;
pub mod job;
pub mod pool;
pub mod snmp;
pub mod tasks;

#[cfg(test)]
pub(crate) mod testing;
