//! Read operations for the inventory.

use neo4rs::query;

use camscan_core::{Device, DeviceRole, DeviceStatus, HostAddress, OidMap, Subnet};

use crate::client::{column, InventoryClient, InventoryError};
use crate::store::{int_value, FieldKind, Table};

impl InventoryClient {
    /// All devices of a role, ordered by id.
    pub async fn device_nodes(&self, role: DeviceRole) -> Result<Vec<Device>, InventoryError> {
        let cypher = format!(
            "MATCH (n:{label})
             RETURN id(n) AS id, n.network_id AS network_id,
                    coalesce(n.mac_address, '') AS mac_address,
                    n.ipv4_address_int AS ipv4_address_int,
                    coalesce(n.status, 0) AS status
             ORDER BY id",
            label = role.label()
        );

        let rows = self.query_rows(query(&cypher)).await.inspect_err(|e| {
            tracing::error!(table = role.label(), error = %e, "Failed to load device records");
        })?;

        let mut devices = Vec::with_capacity(rows.len());
        for row in rows {
            let ip_int: i64 = column(&row, "ipv4_address_int")?;
            let device = Device {
                id: column(&row, "id")?,
                network_id: column(&row, "network_id")?,
                mac_address: column(&row, "mac_address")?,
                address: HostAddress::from_u32(ip_int as u32),
                status: DeviceStatus(column(&row, "status")?),
            };

            tracing::trace!(
                table = role.label(),
                id = device.id,
                network_id = device.network_id,
                mac = %device.mac_address,
                ip = %device.address,
                status = device.status.0,
                "Device record loaded"
            );
            devices.push(device);
        }

        Ok(devices)
    }

    /// All subnets, ordered by id.
    pub async fn subnet_nodes(&self) -> Result<Vec<Subnet>, InventoryError> {
        let q = query(
            "MATCH (n:Subnet)
             RETURN id(n) AS id, n.network_id AS network_id, n.cidr AS cidr,
                    coalesce(n.status, 0) AS status
             ORDER BY id",
        );

        let rows = self.query_rows(q).await.inspect_err(|e| {
            tracing::error!(table = "Subnet", error = %e, "Failed to load subnet records");
        })?;

        let mut subnets = Vec::with_capacity(rows.len());
        for row in rows {
            subnets.push(Subnet {
                id: column(&row, "id")?,
                network_id: column(&row, "network_id")?,
                cidr: column(&row, "cidr")?,
                status: column(&row, "status")?,
            });
        }

        Ok(subnets)
    }

    /// OID declarations for a role, ordered by `order` then key name.
    pub async fn oid_map_nodes(&self, role: DeviceRole) -> Result<Vec<OidMap>, InventoryError> {
        let q = query(
            "MATCH (n:OidMap {device_type: $device_type})
             RETURN id(n) AS id, n.key_name AS key_name, n.oid AS oid,
                    coalesce(n.order, 0) AS ord
             ORDER BY ord, key_name",
        )
        .param("device_type", role.type_code());

        let rows = self.query_rows(q).await.inspect_err(|e| {
            tracing::error!(table = "OidMap", role = %role, error = %e, "Failed to load OID maps");
        })?;

        rows.iter()
            .map(|row| {
                Ok(OidMap {
                    id: column(row, "id")?,
                    role,
                    key_name: column(row, "key_name")?,
                    oid: column(row, "oid")?,
                    order: column(row, "ord")?,
                })
            })
            .collect()
    }

    /// Whether a node in `table` has `field` equal to `value`.
    pub async fn node_exists_by_field(
        &self,
        table: Table,
        field: &str,
        value: &str,
    ) -> Result<bool, InventoryError> {
        let kind = table.field_kind(field)?;
        let cypher = format!(
            "MATCH (n:{label}) WHERE n.{field} = $value RETURN count(n) AS matches",
            label = table.label()
        );

        let q = match kind {
            FieldKind::Text => query(&cypher).param("value", value.to_string()),
            FieldKind::Int => query(&cypher).param("value", int_value(field, value)?),
        };

        match self.query_one(q).await? {
            Some(row) => Ok(column::<i64>(&row, "matches")? > 0),
            None => Ok(false),
        }
    }
}
