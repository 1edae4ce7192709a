//! camscan-inventory: storage for the device inventory.
//!
//! Every read and write of access points, subscriber modules, subnets, and
//! OID maps flows through the [`Inventory`] trait. Two backends exist: the
//! Neo4j-backed [`InventoryClient`] used in production and the in-process
//! [`MemoryInventory`] used for snapshot-driven runs and tests.

pub mod client;
pub mod memory;
pub mod mutations;
pub mod queries;
pub mod store;

pub use client::{InventoryClient, InventoryError};
pub use memory::MemoryInventory;
pub use store::{Inventory, InventorySnapshot, Table};
