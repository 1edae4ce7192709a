//! The storage contract consumed by the scanner.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use camscan_core::{Device, DeviceRole, OidMap, Subnet};

use crate::client::{InventoryClient, InventoryError};

/// Inventory tables that can be probed with [`Inventory::has_record_by_field`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    AccessPoint,
    SubscriberModule,
    Subnet,
}

/// How a queryable field is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Int,
}

impl Table {
    pub fn for_role(role: DeviceRole) -> Self {
        match role {
            DeviceRole::AccessPoint => Self::AccessPoint,
            DeviceRole::SubscriberModule => Self::SubscriberModule,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::AccessPoint => "AccessPoint",
            Self::SubscriberModule => "SubscriberModule",
            Self::Subnet => "Subnet",
        }
    }

    /// Fields that may be used in lookups. Field names are interpolated into
    /// queries, so anything outside this list is rejected.
    pub fn field_kind(&self, field: &str) -> Result<FieldKind, InventoryError> {
        let kind = match (self, field) {
            (Self::Subnet, "cidr" | "ipv4_network_address") => Some(FieldKind::Text),
            (Self::Subnet, "network_id" | "ipv4_network_address_int" | "ipv4_network_mask") => {
                Some(FieldKind::Int)
            }
            (Self::Subnet, _) => None,
            (_, "mac_address" | "ipv4_address") => Some(FieldKind::Text),
            (_, "network_id" | "ipv4_address_int" | "status") => Some(FieldKind::Int),
            _ => None,
        };

        kind.ok_or_else(|| InventoryError::InvalidField {
            table: self.label().to_string(),
            field: field.to_string(),
        })
    }
}

/// Parse an integer lookup value.
pub(crate) fn int_value(field: &str, value: &str) -> Result<i64, InventoryError> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| InventoryError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
        })
}

/// Persistence operations used by the job builder and probe executors.
///
/// Implementations must be safe to share across concurrently running jobs.
/// Each upsert is self-contained and keyed by its natural key
/// (`network_id` + IPv4 for devices, `network_id` + CIDR for subnets);
/// concurrent writes to the same key resolve last-write-wins.
#[async_trait]
pub trait Inventory: Send + Sync {
    /// All registered subnets, ordered by id.
    async fn subnets(&self) -> Result<Vec<Subnet>, InventoryError>;

    /// All devices of a role, ordered by id.
    async fn devices(&self, role: DeviceRole) -> Result<Vec<Device>, InventoryError>;

    /// OID declarations for a role, ordered by `order` then key name.
    async fn oid_maps(&self, role: DeviceRole) -> Result<Vec<OidMap>, InventoryError>;

    /// Insert or update a device; returns the stored record.
    async fn upsert_device(&self, role: DeviceRole, device: &Device)
        -> Result<Device, InventoryError>;

    /// Insert or update a subnet; returns the stored record.
    async fn upsert_subnet(&self, subnet: &Subnet) -> Result<Subnet, InventoryError>;

    /// Whether any record in `table` has `field` equal to `value`.
    async fn has_record_by_field(
        &self,
        table: Table,
        field: &str,
        value: &str,
    ) -> Result<bool, InventoryError>;
}

#[async_trait]
impl Inventory for InventoryClient {
    async fn subnets(&self) -> Result<Vec<Subnet>, InventoryError> {
        self.subnet_nodes().await
    }

    async fn devices(&self, role: DeviceRole) -> Result<Vec<Device>, InventoryError> {
        self.device_nodes(role).await
    }

    async fn oid_maps(&self, role: DeviceRole) -> Result<Vec<OidMap>, InventoryError> {
        self.oid_map_nodes(role).await
    }

    async fn upsert_device(
        &self,
        role: DeviceRole,
        device: &Device,
    ) -> Result<Device, InventoryError> {
        self.upsert_device_node(role, device).await
    }

    async fn upsert_subnet(&self, subnet: &Subnet) -> Result<Subnet, InventoryError> {
        self.upsert_subnet_node(subnet).await
    }

    async fn has_record_by_field(
        &self,
        table: Table,
        field: &str,
        value: &str,
    ) -> Result<bool, InventoryError> {
        self.node_exists_by_field(table, field, value).await
    }
}

/// A point-in-time copy of everything a scan run needs.
///
/// Also the on-disk format of `--inventory` snapshot files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventorySnapshot {
    #[serde(default)]
    pub subnets: Vec<Subnet>,
    #[serde(default)]
    pub access_points: Vec<Device>,
    #[serde(default)]
    pub subscriber_modules: Vec<Device>,
    #[serde(default)]
    pub oid_maps: Vec<OidMap>,
}

impl InventorySnapshot {
    /// Fetch a fresh snapshot. Any failed read fails the whole snapshot.
    pub async fn load(inventory: &dyn Inventory) -> Result<Self, InventoryError> {
        let subnets = inventory.subnets().await?;
        let access_points = inventory.devices(DeviceRole::AccessPoint).await?;
        let subscriber_modules = inventory.devices(DeviceRole::SubscriberModule).await?;

        let mut oid_maps = inventory.oid_maps(DeviceRole::AccessPoint).await?;
        oid_maps.extend(inventory.oid_maps(DeviceRole::SubscriberModule).await?);

        tracing::debug!(
            subnets = subnets.len(),
            access_points = access_points.len(),
            subscriber_modules = subscriber_modules.len(),
            oid_maps = oid_maps.len(),
            "Inventory snapshot loaded"
        );

        Ok(Self {
            subnets,
            access_points,
            subscriber_modules,
            oid_maps,
        })
    }

    pub fn devices(&self, role: DeviceRole) -> &[Device] {
        match role {
            DeviceRole::AccessPoint => &self.access_points,
            DeviceRole::SubscriberModule => &self.subscriber_modules,
        }
    }

    pub fn oid_maps(&self, role: DeviceRole) -> Vec<OidMap> {
        self.oid_maps
            .iter()
            .filter(|m| m.role == role)
            .cloned()
            .collect()
    }
}
