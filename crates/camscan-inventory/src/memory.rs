//! In-process inventory backend.
//!
//! Holds a snapshot in memory and applies upserts with the same natural-key
//! semantics as the Neo4j backend. Used for `--inventory` snapshot runs and
//! for tests.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use tokio::sync::RwLock;

use camscan_core::{Device, DeviceRole, OidMap, Subnet};

use crate::client::InventoryError;
use crate::store::{int_value, FieldKind, Inventory, InventorySnapshot, Table};

#[derive(Debug, Default)]
struct State {
    subnets: Vec<Subnet>,
    devices: BTreeMap<DeviceRole, Vec<Device>>,
    oid_maps: Vec<OidMap>,
    next_id: i64,
}

impl State {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Inventory kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryInventory {
    state: RwLock<State>,
}

impl MemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from a snapshot. Records without an id get one assigned.
    pub fn from_snapshot(snapshot: InventorySnapshot) -> Self {
        let mut state = State::default();
        state.next_id = snapshot
            .subnets
            .iter()
            .map(|s| s.id)
            .chain(snapshot.access_points.iter().map(|d| d.id))
            .chain(snapshot.subscriber_modules.iter().map(|d| d.id))
            .chain(snapshot.oid_maps.iter().map(|m| m.id))
            .max()
            .unwrap_or(0)
            .max(0);

        for mut subnet in snapshot.subnets {
            if subnet.id == 0 {
                subnet.id = state.allocate_id();
            }
            state.subnets.push(subnet);
        }

        for (role, devices) in [
            (DeviceRole::AccessPoint, snapshot.access_points),
            (DeviceRole::SubscriberModule, snapshot.subscriber_modules),
        ] {
            for mut device in devices {
                if device.id == 0 {
                    device.id = state.allocate_id();
                }
                state.devices.entry(role).or_default().push(device);
            }
        }

        for mut map in snapshot.oid_maps {
            if map.id == 0 {
                map.id = state.allocate_id();
            }
            state.oid_maps.push(map);
        }

        Self {
            state: RwLock::new(state),
        }
    }

    /// Load a JSON snapshot file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, InventoryError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| InventoryError::Snapshot(format!("{}: {e}", path.display())))?;
        let snapshot: InventorySnapshot = serde_json::from_str(&raw)
            .map_err(|e| InventoryError::Snapshot(format!("{}: {e}", path.display())))?;

        tracing::info!(
            path = %path.display(),
            subnets = snapshot.subnets.len(),
            access_points = snapshot.access_points.len(),
            subscriber_modules = snapshot.subscriber_modules.len(),
            "Loaded inventory snapshot file"
        );
        Ok(Self::from_snapshot(snapshot))
    }
}

fn sorted_by_id<T: Clone>(records: &[T], id: impl Fn(&T) -> i64) -> Vec<T> {
    let mut out = records.to_vec();
    out.sort_by_key(|r| id(r));
    out
}

#[async_trait]
impl Inventory for MemoryInventory {
    async fn subnets(&self) -> Result<Vec<Subnet>, InventoryError> {
        let state = self.state.read().await;
        Ok(sorted_by_id(&state.subnets, |s| s.id))
    }

    async fn devices(&self, role: DeviceRole) -> Result<Vec<Device>, InventoryError> {
        let state = self.state.read().await;
        let devices = state.devices.get(&role).map(Vec::as_slice).unwrap_or_default();
        Ok(sorted_by_id(devices, |d| d.id))
    }

    async fn oid_maps(&self, role: DeviceRole) -> Result<Vec<OidMap>, InventoryError> {
        let state = self.state.read().await;
        let mut maps: Vec<OidMap> = state
            .oid_maps
            .iter()
            .filter(|m| m.role == role)
            .cloned()
            .collect();
        maps.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.key_name.cmp(&b.key_name)));
        Ok(maps)
    }

    async fn upsert_device(
        &self,
        role: DeviceRole,
        device: &Device,
    ) -> Result<Device, InventoryError> {
        let mut state = self.state.write().await;

        let existing = state.devices.get(&role).and_then(|devices| {
            devices
                .iter()
                .position(|d| d.network_id == device.network_id && d.address == device.address)
        });

        let stored = match existing {
            Some(idx) => {
                let slot = &mut state.devices.entry(role).or_default()[idx];
                *slot = Device {
                    id: slot.id,
                    ..device.clone()
                };
                slot.clone()
            }
            None => {
                let stored = Device {
                    id: state.allocate_id(),
                    ..device.clone()
                };
                state.devices.entry(role).or_default().push(stored.clone());
                stored
            }
        };

        tracing::trace!(
            table = role.label(),
            id = stored.id,
            network_id = stored.network_id,
            ip = %stored.address,
            status = stored.status.0,
            "Device record upserted"
        );
        Ok(stored)
    }

    async fn upsert_subnet(&self, subnet: &Subnet) -> Result<Subnet, InventoryError> {
        subnet.block()?;
        let mut state = self.state.write().await;

        let existing = state
            .subnets
            .iter()
            .position(|s| s.network_id == subnet.network_id && s.cidr == subnet.cidr);

        let stored = match existing {
            Some(idx) => {
                let slot = &mut state.subnets[idx];
                *slot = Subnet {
                    id: slot.id,
                    ..subnet.clone()
                };
                slot.clone()
            }
            None => {
                let stored = Subnet {
                    id: state.allocate_id(),
                    ..subnet.clone()
                };
                state.subnets.push(stored.clone());
                stored
            }
        };
        Ok(stored)
    }

    async fn has_record_by_field(
        &self,
        table: Table,
        field: &str,
        value: &str,
    ) -> Result<bool, InventoryError> {
        let kind = table.field_kind(field)?;
        let wanted_int = match kind {
            FieldKind::Int => Some(int_value(field, value)?),
            FieldKind::Text => None,
        };
        let state = self.state.read().await;

        let found = match table {
            Table::Subnet => state.subnets.iter().any(|s| match field {
                "cidr" => s.cidr == value,
                "ipv4_network_address" => s
                    .network_address()
                    .is_ok_and(|a| a.to_string() == value),
                "network_id" => Some(s.network_id) == wanted_int,
                "ipv4_network_address_int" => s
                    .network_address()
                    .is_ok_and(|a| Some(a.as_u32() as i64) == wanted_int),
                "ipv4_network_mask" => s
                    .prefix_len()
                    .is_ok_and(|len| Some(len as i64) == wanted_int),
                _ => false,
            }),
            Table::AccessPoint | Table::SubscriberModule => {
                let role = match table {
                    Table::AccessPoint => DeviceRole::AccessPoint,
                    _ => DeviceRole::SubscriberModule,
                };
                state
                    .devices
                    .get(&role)
                    .map(|devices| {
                        devices.iter().any(|d| match field {
                            "mac_address" => d.mac_address == value,
                            "ipv4_address" => d.address.to_string() == value,
                            "network_id" => Some(d.network_id) == wanted_int,
                            "ipv4_address_int" => Some(d.address.as_u32() as i64) == wanted_int,
                            "status" => Some(d.status.0) == wanted_int,
                            _ => false,
                        })
                    })
                    .unwrap_or(false)
            }
        };

        Ok(found)
    }
}
