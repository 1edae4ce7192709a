//! Write operations for the inventory.
//!
//! All mutations use MERGE (upsert) semantics keyed by natural key, one
//! self-contained statement per record. Concurrent upserts of the same key
//! resolve last-write-wins.

use chrono::Utc;
use neo4rs::query;

use camscan_core::{Device, DeviceRole, HostAddress, OidMap, Subnet};

use crate::client::{column, InventoryClient, InventoryError};

impl InventoryClient {
    /// Upsert an access point or subscriber module, keyed by
    /// `(network_id, ipv4_address_int)`. Returns the record with its id.
    pub async fn upsert_device_node(
        &self,
        role: DeviceRole,
        device: &Device,
    ) -> Result<Device, InventoryError> {
        let label = role.label();
        let cypher = format!(
            "MERGE (n:{label} {{network_id: $network_id, ipv4_address_int: $ipv4_address_int}})
             ON CREATE SET n.first_seen = $now
             SET n.mac_address = $mac_address, n.ipv4_address = $ipv4_address,
                 n.status = $status, n.last_seen = $now
             RETURN id(n) AS id"
        );

        let q = query(&cypher)
            .param("network_id", device.network_id)
            .param("ipv4_address_int", device.address.as_u32() as i64)
            .param("ipv4_address", device.address.to_string())
            .param("mac_address", device.mac_address.clone())
            .param("status", device.status.0)
            .param("now", Utc::now().to_rfc3339());

        let row = self.query_one(q).await.inspect_err(|e| {
            tracing::error!(
                table = label,
                network_id = device.network_id,
                ip = %device.address,
                mac = %device.mac_address,
                status = device.status.0,
                error = %e,
                "Failed to upsert device record"
            );
        })?;

        let row = row.ok_or_else(|| InventoryError::NotFound {
            label: label.to_string(),
            key: format!("{}:{}", device.network_id, device.address),
        })?;

        Ok(Device {
            id: column(&row, "id")?,
            ..device.clone()
        })
    }

    /// Upsert a subnet, keyed by `(network_id, cidr)`. The address columns
    /// are written from the parsed block, so a malformed CIDR is rejected.
    pub async fn upsert_subnet_node(&self, subnet: &Subnet) -> Result<Subnet, InventoryError> {
        let block = subnet.block()?;
        let network_address = HostAddress::new(block.network());
        let q = query(
            "MERGE (n:Subnet {network_id: $network_id, cidr: $cidr})
             SET n.ipv4_network_address = $address,
                 n.ipv4_network_address_int = $address_int,
                 n.ipv4_network_mask = $mask,
                 n.status = $status,
                 n.updated_at = $now
             RETURN id(n) AS id",
        )
        .param("network_id", subnet.network_id)
        .param("cidr", subnet.cidr.clone())
        .param("address", network_address.to_string())
        .param("address_int", network_address.as_u32() as i64)
        .param("mask", block.prefix_len() as i64)
        .param("status", subnet.status)
        .param("now", Utc::now().to_rfc3339());

        let row = self.query_one(q).await.inspect_err(|e| {
            tracing::error!(
                table = "Subnet",
                network_id = subnet.network_id,
                cidr = %subnet.cidr,
                error = %e,
                "Failed to upsert subnet record"
            );
        })?;

        let row = row.ok_or_else(|| InventoryError::NotFound {
            label: "Subnet".to_string(),
            key: format!("{}:{}", subnet.network_id, subnet.cidr),
        })?;

        Ok(Subnet {
            id: column(&row, "id")?,
            ..subnet.clone()
        })
    }

    /// Upsert an OID map declaration, keyed by `(device_type, key_name)`.
    pub async fn upsert_oid_map(&self, map: &OidMap) -> Result<(), InventoryError> {
        let q = query(
            "MERGE (n:OidMap {device_type: $device_type, key_name: $key_name})
             SET n.oid = $oid, n.order = $order",
        )
        .param("device_type", map.role.type_code())
        .param("key_name", map.key_name.clone())
        .param("oid", map.oid.clone())
        .param("order", map.order);

        self.run(q).await
    }
}
