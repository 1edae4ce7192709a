//! SNMP v2c probing: session abstraction, varbind decoding, and the
//! per-device attribute collector.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use camscan_core::types::normalize_oid;
use camscan_core::{HostAddress, OidSet};

use crate::error::ScanError;
use crate::job::{JobDescriptor, JobExecutor, JobPayload, JobValue};

pub const SNMP_PORT: u16 = 161;

/// sysDescr.0, used to classify swept hosts.
pub const SYS_DESCR_OID: &str = "1.3.6.1.2.1.1.1.0";

#[derive(Debug, thiserror::Error)]
pub enum SnmpError {
    #[error("Failed to open SNMP session to {target}: {reason}")]
    Connect { target: String, reason: String },

    #[error("SNMP request to {target} failed: {reason}")]
    Request { target: String, reason: String },

    #[error("Invalid OID: {0}")]
    InvalidOid(String),
}

/// A decoded varbind value as returned by an agent.
#[derive(Debug, Clone, PartialEq)]
pub enum SnmpValue {
    OctetString(Vec<u8>),
    Integer(i64),
    Counter32(u32),
    Counter64(u64),
    Gauge32(u32),
    TimeTicks(u32),
    Null,
    /// Any other SMI type, kept only for diagnostics.
    Other(String),
}

impl SnmpValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::OctetString(_) => "OctetString",
            Self::Integer(_) => "Integer",
            Self::Counter32(_) => "Counter32",
            Self::Counter64(_) => "Counter64",
            Self::Gauge32(_) => "Gauge32",
            Self::TimeTicks(_) => "TimeTicks",
            Self::Null => "Null",
            Self::Other(_) => "Other",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Varbind {
    pub oid: String,
    pub value: SnmpValue,
}

/// A collected attribute. Strings are whitespace-trimmed; counters keep
/// their native width.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Text(String),
    Counter32(u32),
    Counter64(u64),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Counter32(v) => write!(f, "{v}"),
            Self::Counter64(v) => write!(f, "{v}"),
        }
    }
}

/// Attributes of one device keyed by OID map key name.
pub type DeviceAttributes = BTreeMap<String, AttributeValue>;

/// Where and how to open an SNMP session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnmpTarget {
    pub address: HostAddress,
    pub port: u16,
    pub community: String,
    pub timeout: Duration,
}

impl SnmpTarget {
    pub fn v2c(address: HostAddress, community: &str, timeout: Duration) -> Self {
        Self {
            address,
            port: SNMP_PORT,
            community: community.to_string(),
            timeout,
        }
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Opens SNMP sessions.
#[async_trait]
pub trait SnmpConnector: Send + Sync {
    async fn connect(&self, target: &SnmpTarget) -> Result<Box<dyn SnmpSession>, SnmpError>;
}

/// An open SNMP session. Dropping it closes the underlying socket.
#[async_trait]
pub trait SnmpSession: Send {
    /// A single GET for all `oids`.
    async fn get(&mut self, oids: &[&str]) -> Result<Vec<Varbind>, SnmpError>;
}

/// Map varbinds onto OID map keys.
///
/// Strings are trimmed and counters kept; nulls are skipped quietly. Any
/// other type is logged at error level and omitted, as are OIDs that do not
/// belong to `oids`.
pub fn decode_varbinds(
    address: HostAddress,
    varbinds: Vec<Varbind>,
    oids: &OidSet,
) -> DeviceAttributes {
    let mut attributes = DeviceAttributes::new();

    for varbind in varbinds {
        let oid = normalize_oid(&varbind.oid);
        let Some(key) = oids.key_for(oid) else {
            tracing::warn!(ip = %address, oid, "Failed to find OID in key map");
            continue;
        };

        let value = match varbind.value {
            SnmpValue::OctetString(bytes) => {
                AttributeValue::Text(String::from_utf8_lossy(&bytes).trim().to_string())
            }
            SnmpValue::Counter32(v) => AttributeValue::Counter32(v),
            SnmpValue::Counter64(v) => AttributeValue::Counter64(v),
            SnmpValue::Null => {
                tracing::trace!(ip = %address, oid, key, "SNMP value is null");
                continue;
            }
            other => {
                tracing::error!(
                    ip = %address,
                    oid,
                    key,
                    snmp_type = other.type_name(),
                    value = ?other,
                    "Unexpected SNMP value type"
                );
                continue;
            }
        };

        tracing::trace!(ip = %address, key, value = %value, "SNMP value");
        attributes.insert(key.to_string(), value);
    }

    attributes
}

/// GET every OID in `oids` from `target`.
///
/// Connection and request failures are logged and yield an empty map; the
/// device is reported with blank attributes rather than as a failed job.
pub async fn fetch_attributes(
    connector: &dyn SnmpConnector,
    target: &SnmpTarget,
    oids: &OidSet,
) -> DeviceAttributes {
    if oids.is_empty() {
        tracing::debug!(ip = %target.address, "No OIDs mapped, skipping SNMP query");
        return DeviceAttributes::new();
    }

    let mut session = match connector.connect(target).await {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(ip = %target.address, error = %e, "Failed to open SNMP connection");
            return DeviceAttributes::new();
        }
    };

    let requested: Vec<&str> = oids.oids().collect();
    tracing::trace!(ip = %target.address, oids = requested.len(), "Querying SNMP service");

    match session.get(&requested).await {
        Ok(varbinds) => decode_varbinds(target.address, varbinds, oids),
        Err(e) => {
            tracing::warn!(ip = %target.address, error = %e, "Failed to query SNMP service");
            DeviceAttributes::new()
        }
    }
}

/// Read sysDescr.0 as trimmed text. `None` if the host does not answer or
/// answers with something other than a string.
pub async fn query_system_description(
    connector: &dyn SnmpConnector,
    target: &SnmpTarget,
) -> Option<String> {
    let mut session = match connector.connect(target).await {
        Ok(session) => session,
        Err(e) => {
            tracing::debug!(ip = %target.address, error = %e, "Failed to open SNMP connection");
            return None;
        }
    };

    let varbinds = match session.get(&[SYS_DESCR_OID]).await {
        Ok(varbinds) => varbinds,
        Err(e) => {
            tracing::debug!(ip = %target.address, error = %e, "System description query failed");
            return None;
        }
    };

    varbinds
        .into_iter()
        .find(|vb| normalize_oid(&vb.oid) == SYS_DESCR_OID)
        .and_then(|vb| match vb.value {
            SnmpValue::OctetString(bytes) => {
                Some(String::from_utf8_lossy(&bytes).trim().to_string())
            }
            other => {
                tracing::error!(
                    ip = %target.address,
                    snmp_type = other.type_name(),
                    "Unexpected SNMP value type for system description"
                );
                None
            }
        })
}

/// Collects SNMP attributes for access points and subscriber modules.
pub struct DeviceScanner {
    connector: Arc<dyn SnmpConnector>,
}

impl DeviceScanner {
    pub fn new(connector: Arc<dyn SnmpConnector>) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl JobExecutor for DeviceScanner {
    async fn execute(
        &self,
        descriptor: &JobDescriptor,
        _cancel: &CancellationToken,
    ) -> Result<JobValue, ScanError> {
        let JobPayload::DeviceScan { role, record, oids } = &descriptor.payload else {
            return Err(ScanError::PayloadMismatch {
                job_id: descriptor.id.0,
                expected: "device scan",
            });
        };

        let config = &descriptor.config;
        let target = SnmpTarget::v2c(
            record.address,
            config.community(*role),
            config.snmp_timeout(*role),
        );

        tracing::trace!(
            job_id = %descriptor.id,
            role = %role,
            ip = %record.address,
            "Opening SNMP connection"
        );
        let attributes = fetch_attributes(self.connector.as_ref(), &target, oids).await;
        Ok(JobValue::Attributes(attributes))
    }
}

/// Production connector backed by `async-snmp`.
#[derive(Debug, Default, Clone, Copy)]
pub struct AsyncSnmpConnector;

#[async_trait]
impl SnmpConnector for AsyncSnmpConnector {
    async fn connect(&self, target: &SnmpTarget) -> Result<Box<dyn SnmpSession>, SnmpError> {
        let addr = target.socket_addr();
        let client = async_snmp::Client::builder(
            addr.clone(),
            async_snmp::Auth::v2c(target.community.as_str()),
        )
        .request_timeout(target.timeout)
        .retry(async_snmp::Retry::none())
        .connect()
        .await
        .map_err(|e| SnmpError::Connect {
            target: addr.clone(),
            reason: e.to_string(),
        })?;

        Ok(Box::new(AsyncSnmpSession {
            target: addr,
            client,
        }))
    }
}

struct AsyncSnmpSession {
    target: String,
    client: async_snmp::UdpClient,
}

#[async_trait]
impl SnmpSession for AsyncSnmpSession {
    async fn get(&mut self, oids: &[&str]) -> Result<Vec<Varbind>, SnmpError> {
        let parsed = parse_oids(oids)?;

        let response = self
            .client
            .get_many(&parsed)
            .await
            .map_err(|e| SnmpError::Request {
                target: self.target.clone(),
                reason: e.to_string(),
            })?;
        if !response.anomalies.is_empty() {
            tracing::debug!(
                target = %self.target,
                anomalies = ?response.anomalies,
                "Response shape did not match request"
            );
        }

        Ok(response
            .varbinds
            .into_iter()
            .map(|vb| Varbind {
                oid: vb.oid.to_string(),
                value: convert_value(vb.value),
            })
            .collect())
    }
}

fn parse_oids(oids: &[&str]) -> Result<Vec<async_snmp::Oid>, SnmpError> {
    oids.iter()
        .map(|oid| {
            oid.parse::<async_snmp::Oid>()
                .map_err(|_| SnmpError::InvalidOid(oid.to_string()))
        })
        .collect()
}

fn convert_value(value: async_snmp::Value) -> SnmpValue {
    use async_snmp::Value;

    match value {
        Value::OctetString(bytes) => SnmpValue::OctetString(bytes.to_vec()),
        Value::Integer(v) => SnmpValue::Integer(i64::from(v)),
        Value::Counter32(v) => SnmpValue::Counter32(v),
        Value::Counter64(v) => SnmpValue::Counter64(v),
        Value::Gauge32(v) => SnmpValue::Gauge32(v),
        Value::TimeTicks(v) => SnmpValue::TimeTicks(v),
        Value::Null => SnmpValue::Null,
        other => SnmpValue::Other(format!("{other:?}")),
    }
}
