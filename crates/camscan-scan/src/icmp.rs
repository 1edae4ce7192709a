//! ICMP reachability and device classification for subnet sweeps.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use surge_ping::{Client, Config, PingIdentifier, PingSequence, SurgeError};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use camscan_core::{Device, DeviceRole, HostAddress};

use crate::error::ScanError;
use crate::job::{JobDescriptor, JobExecutor, JobPayload, JobValue, Reachability};
use crate::snmp::{query_system_description, SnmpConnector, SnmpTarget};

/// Echo request payload size in bytes.
pub const ECHO_PAYLOAD_SIZE: usize = 24;

#[derive(Debug, thiserror::Error)]
pub enum IcmpError {
    #[error("Echo to {address} timed out")]
    Timeout { address: HostAddress },

    #[error("ICMP transport failure for {address}: {reason}")]
    Transport { address: HostAddress, reason: String },
}

/// Sends a single echo request.
#[async_trait]
pub trait Pinger: Send + Sync {
    /// Round-trip time of one echo, or why there was none.
    async fn echo(&self, address: HostAddress, timeout: Duration) -> Result<Duration, IcmpError>;
}

/// Pinger backed by one shared `surge-ping` client. Needs CAP_NET_RAW or an
/// unprivileged ICMP socket permission on the host.
///
/// The socket is opened on first use, inside the runtime.
pub struct SurgePinger {
    client: OnceCell<Client>,
    next_ident: AtomicU16,
    payload: Vec<u8>,
}

impl SurgePinger {
    pub fn new() -> Self {
        Self {
            client: OnceCell::new(),
            next_ident: AtomicU16::new(1),
            payload: vec![0; ECHO_PAYLOAD_SIZE],
        }
    }

    async fn client(&self, address: HostAddress) -> Result<&Client, IcmpError> {
        self.client
            .get_or_try_init(|| async { Client::new(&Config::default()) })
            .await
            .map_err(|e| IcmpError::Transport {
                address,
                reason: format!("cannot open ICMP socket: {e}"),
            })
    }
}

impl Default for SurgePinger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Pinger for SurgePinger {
    async fn echo(&self, address: HostAddress, timeout: Duration) -> Result<Duration, IcmpError> {
        let client = self.client(address).await?;
        let ident = PingIdentifier(self.next_ident.fetch_add(1, Ordering::Relaxed));
        let mut pinger = client.pinger(IpAddr::V4(address.addr()), ident).await;
        pinger.timeout(timeout);

        match pinger.ping(PingSequence(0), &self.payload).await {
            Ok((_packet, rtt)) => Ok(rtt),
            Err(e) => Err(echo_error(address, e)),
        }
    }
}

/// A missing reply is a timeout; anything else is a transport failure.
fn echo_error(address: HostAddress, error: SurgeError) -> IcmpError {
    match error {
        SurgeError::Timeout { .. } => IcmpError::Timeout { address },
        other => IcmpError::Transport {
            address,
            reason: other.to_string(),
        },
    }
}

/// One echo; any failure counts as unreachable.
pub async fn is_alive(pinger: &dyn Pinger, address: HostAddress, timeout: Duration) -> bool {
    match pinger.echo(address, timeout).await {
        Ok(rtt) => {
            tracing::trace!(ip = %address, rtt_ms = rtt.as_secs_f64() * 1000.0, "Host alive");
            true
        }
        Err(IcmpError::Timeout { .. }) => {
            tracing::trace!(ip = %address, "Host dead");
            false
        }
        Err(e) => {
            tracing::warn!(ip = %address, error = %e, "Ping failed");
            false
        }
    }
}

/// Role advertised by a system description's trailing marker.
pub fn classify(description: &str) -> Option<DeviceRole> {
    let description = description.trim_end();
    if description.ends_with(" AP") {
        Some(DeviceRole::AccessPoint)
    } else if description.ends_with(" SM") {
        Some(DeviceRole::SubscriberModule)
    } else {
        None
    }
}

/// Pings a swept host and, if it answers, classifies and records it.
///
/// Classification reads sysDescr.0 with the subscriber-module community and
/// timeout. A classified host is upserted into its role's table with a
/// placeholder MAC; an inventory write failure fails the job.
pub struct DeviceChecker {
    pinger: Arc<dyn Pinger>,
    connector: Arc<dyn SnmpConnector>,
}

impl DeviceChecker {
    pub fn new(pinger: Arc<dyn Pinger>, connector: Arc<dyn SnmpConnector>) -> Self {
        Self { pinger, connector }
    }
}

#[async_trait]
impl JobExecutor for DeviceChecker {
    async fn execute(
        &self,
        descriptor: &JobDescriptor,
        cancel: &CancellationToken,
    ) -> Result<JobValue, ScanError> {
        let JobPayload::DeviceCheck { record } = &descriptor.payload else {
            return Err(ScanError::PayloadMismatch {
                job_id: descriptor.id.0,
                expected: "device check",
            });
        };
        let config = &descriptor.config;
        let address = record.address;

        if !is_alive(self.pinger.as_ref(), address, config.icmp_timeout()).await {
            return Ok(JobValue::Reachability(Reachability::default()));
        }

        if cancel.is_cancelled() {
            tracing::debug!(ip = %address, "Run cancelled, skipping classification");
            return Ok(JobValue::Reachability(Reachability {
                alive: true,
                role: None,
            }));
        }

        let target = SnmpTarget::v2c(
            address,
            config.community(DeviceRole::SubscriberModule),
            config.snmp_timeout(DeviceRole::SubscriberModule),
        );
        let role = match query_system_description(self.connector.as_ref(), &target).await {
            Some(description) => {
                let role = classify(&description);
                tracing::debug!(
                    ip = %address,
                    description = %description,
                    role = ?role,
                    "Host classified"
                );
                role
            }
            None => {
                tracing::warn!(ip = %address, "SNMP query failed");
                None
            }
        };

        if let Some(role) = role {
            record_device(descriptor, role, address, record.network_id).await?;
        }

        Ok(JobValue::Reachability(Reachability { alive: true, role }))
    }
}

async fn record_device(
    descriptor: &JobDescriptor,
    role: DeviceRole,
    address: HostAddress,
    network_id: i64,
) -> Result<(), ScanError> {
    if descriptor.config.dry_run {
        tracing::info!(ip = %address, role = %role, "Dry run, not recording device");
        return Ok(());
    }

    let stored = descriptor
        .inventory
        .upsert_device(role, &Device::reclassified(network_id, address))
        .await
        .inspect_err(|e| {
            tracing::error!(ip = %address, role = %role, error = %e, "Failed to record device");
        })?;

    tracing::info!(
        ip = %address,
        role = %role,
        id = stored.id,
        "Device recorded"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use camscan_core::{AppConfig, DeviceStatus};
    use camscan_inventory::{Inventory, MemoryInventory};

    use super::*;
    use crate::snmp::{SnmpValue, Varbind, SYS_DESCR_OID};
    use crate::testing::{self, FakeAgent, FakeConnector, FakePinger};

    fn describing(ip: &str, text: &str) -> FakeConnector {
        FakeConnector::default().with(
            ip,
            FakeAgent::Respond(vec![Varbind {
                oid: SYS_DESCR_OID.to_string(),
                value: SnmpValue::OctetString(text.as_bytes().to_vec()),
            }]),
        )
    }

    #[test]
    fn test_classify_markers() {
        assert_eq!(classify("Cambium PMP 450 AP"), Some(DeviceRole::AccessPoint));
        assert_eq!(classify("Cambium PMP 450 SM "), Some(DeviceRole::SubscriberModule));
        assert_eq!(classify("Linux router 5.10"), None);
        assert_eq!(classify("SNAP"), None);
        assert_eq!(classify(""), None);
    }

    #[test]
    fn test_missing_reply_is_a_timeout() {
        let address: HostAddress = "10.0.0.1".parse().unwrap();
        let timeout = echo_error(address, SurgeError::Timeout { seq: PingSequence(0) });
        assert!(matches!(timeout, IcmpError::Timeout { .. }));

        let refused = echo_error(
            address,
            SurgeError::IOError(std::io::Error::from(std::io::ErrorKind::PermissionDenied)),
        );
        assert!(matches!(refused, IcmpError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_transport_error_counts_as_dead() {
        let pinger = FakePinger::default().broken("10.0.0.1");
        let alive = is_alive(&pinger, "10.0.0.1".parse().unwrap(), Duration::from_millis(10)).await;
        assert!(!alive);
    }

    #[tokio::test]
    async fn test_access_point_marker_upserts_access_point() {
        let inventory = Arc::new(MemoryInventory::new());
        let checker = DeviceChecker::new(
            Arc::new(FakePinger::default().alive("10.1.0.7")),
            Arc::new(describing("10.1.0.7", "PMP 450i AP")),
        );
        let descriptor = testing::check_descriptor_with(
            1,
            "10.1.0.7",
            Arc::new(AppConfig::default()),
            inventory.clone(),
        );

        let value = checker
            .execute(&descriptor, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            value,
            JobValue::Reachability(Reachability {
                alive: true,
                role: Some(DeviceRole::AccessPoint),
            })
        );

        let aps = inventory.devices(DeviceRole::AccessPoint).await.unwrap();
        assert_eq!(aps.len(), 1);
        assert_eq!(aps[0].status, DeviceStatus::RECLASSIFIED);
        assert_eq!(aps[0].mac_address, "000000000000");
        assert!(inventory
            .devices(DeviceRole::SubscriberModule)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_classified_host_is_written_with_one_upsert() {
        let inventory = Arc::new(testing::CountingInventory::default());
        let checker = DeviceChecker::new(
            Arc::new(FakePinger::default().alive("10.1.0.12")),
            Arc::new(describing("10.1.0.12", "PMP 450 SM")),
        );
        let descriptor = testing::check_descriptor_with(
            1,
            "10.1.0.12",
            Arc::new(AppConfig::default()),
            inventory.clone(),
        );

        checker
            .execute(&descriptor, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(inventory.upserts.load(Ordering::SeqCst), 1);
        assert_eq!(inventory.lookups.load(Ordering::SeqCst), 0);
        assert_eq!(
            inventory
                .devices(DeviceRole::SubscriberModule)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_dead_host_is_not_recorded() {
        let inventory = Arc::new(MemoryInventory::new());
        let connector = Arc::new(describing("10.1.0.8", "PMP 450 SM"));
        let checker = DeviceChecker::new(Arc::new(FakePinger::default()), connector.clone());
        let descriptor = testing::check_descriptor_with(
            1,
            "10.1.0.8",
            Arc::new(AppConfig::default()),
            inventory.clone(),
        );

        let value = checker
            .execute(&descriptor, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(value, JobValue::Reachability(Reachability::default()));
        assert!(connector.communities().is_empty());
        assert!(inventory
            .devices(DeviceRole::SubscriberModule)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_unmarked_host_is_alive_but_unclassified() {
        let inventory = Arc::new(MemoryInventory::new());
        let checker = DeviceChecker::new(
            Arc::new(FakePinger::default().alive("10.1.0.9")),
            Arc::new(describing("10.1.0.9", "RouterOS CCR2004")),
        );
        let descriptor = testing::check_descriptor_with(
            1,
            "10.1.0.9",
            Arc::new(AppConfig::default()),
            inventory.clone(),
        );

        let value = checker
            .execute(&descriptor, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            value,
            JobValue::Reachability(Reachability {
                alive: true,
                role: None
            })
        );
        for role in DeviceRole::ALL {
            assert!(inventory.devices(role).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_classification_uses_subscriber_community() {
        let connector = Arc::new(describing("10.1.0.10", "PMP 450 SM"));
        let checker = DeviceChecker::new(
            Arc::new(FakePinger::default().alive("10.1.0.10")),
            connector.clone(),
        );
        let config = AppConfig {
            ap_community: "ap-only".to_string(),
            sm_community: "sm-only".to_string(),
            dry_run: true,
            ..Default::default()
        };
        let inventory = Arc::new(MemoryInventory::new());
        let descriptor =
            testing::check_descriptor_with(1, "10.1.0.10", Arc::new(config), inventory.clone());

        checker
            .execute(&descriptor, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(connector.communities(), vec!["sm-only".to_string()]);
        // Dry runs leave the inventory alone.
        assert!(inventory
            .devices(DeviceRole::SubscriberModule)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_inventory_failure_fails_the_job() {
        let checker = DeviceChecker::new(
            Arc::new(FakePinger::default().alive("10.1.0.11")),
            Arc::new(describing("10.1.0.11", "PMP 450 SM")),
        );
        let descriptor = testing::check_descriptor_with(
            4,
            "10.1.0.11",
            Arc::new(AppConfig::default()),
            Arc::new(testing::BrokenInventory),
        );

        let err = checker
            .execute(&descriptor, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Inventory(_)));
    }
}
