//! Run configuration for camscan.
//!
//! Configuration is loaded from (in priority order):
//! 1. Command-line overrides ([`Overrides`])
//! 2. Environment variables (`CAMS_` prefix, `__` for nested keys)
//! 3. Config file (`camscan.toml`)
//! 4. Defaults
//!
//! The loaded values are normalized once (minimum worker count, timeout
//! floors) and then shared read-only by every job of a run.

use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;
use crate::types::DeviceRole;

pub const DEFAULT_WORKERS: i64 = 10;
pub const DEFAULT_SNMP_TIMEOUT_SECS: f64 = 3.0;
pub const DEFAULT_ICMP_TIMEOUT_SECS: f64 = 1.0;
pub const MIN_TIMEOUT_SECS: f64 = 0.1;

/// Effective configuration of a scan run.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Number of concurrent probe workers. Signed so that a negative value
    /// from the environment or file is normalized instead of rejected.
    #[serde(default = "default_workers")]
    pub workers: i64,

    /// SNMP v2c community for access points.
    #[serde(default = "default_community")]
    pub ap_community: String,

    /// SNMP v2c community for subscriber modules and unclassified hosts.
    #[serde(default = "default_community")]
    pub sm_community: String,

    /// SNMP timeout for access points, in seconds.
    #[serde(default = "default_snmp_timeout")]
    pub snmp_timeout_ap: f64,

    /// SNMP timeout for subscriber modules, in seconds.
    #[serde(default = "default_snmp_timeout")]
    pub snmp_timeout_sm: f64,

    /// ICMP echo timeout, in seconds.
    #[serde(default = "default_icmp_timeout")]
    pub icmp_timeout: f64,

    #[serde(default)]
    pub debug: bool,

    /// Skip inventory writes and export files.
    #[serde(default)]
    pub dry_run: bool,

    /// Sweep registered subnets with ICMP and classify responding hosts.
    #[serde(default)]
    pub discover: bool,

    /// Directory receiving `ap.csv` and `sm.csv`.
    #[serde(default = "default_export_dir")]
    pub export_dir: String,

    /// Overall run deadline in seconds. Unset means no deadline.
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,

    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Connection settings for the inventory database.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_uri")]
    pub uri: String,

    #[serde(default = "default_db_user")]
    pub user: String,

    #[serde(default = "default_db_password")]
    pub password: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Attempts made before the run is declared failed to start.
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,

    /// Seconds to wait between connection attempts.
    #[serde(default = "default_connect_retry_delay")]
    pub connect_retry_delay: u64,
}

/// Values supplied on the command line. They win over every other source.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub workers: Option<i64>,
    pub debug: bool,
    pub dry_run: bool,
    pub discover: bool,
    pub export_dir: Option<String>,
}

fn default_workers() -> i64 {
    DEFAULT_WORKERS
}

fn default_community() -> String {
    "public".to_string()
}

fn default_snmp_timeout() -> f64 {
    DEFAULT_SNMP_TIMEOUT_SECS
}

fn default_icmp_timeout() -> f64 {
    DEFAULT_ICMP_TIMEOUT_SECS
}

fn default_export_dir() -> String {
    "/tmp".to_string()
}

fn default_db_uri() -> String {
    "bolt://localhost:7687".to_string()
}

fn default_db_user() -> String {
    "neo4j".to_string()
}

fn default_db_password() -> String {
    "camscan".to_string()
}

fn default_max_connections() -> u32 {
    16
}

fn default_connect_retries() -> u32 {
    3
}

fn default_connect_retry_delay() -> u64 {
    5
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            ap_community: default_community(),
            sm_community: default_community(),
            snmp_timeout_ap: default_snmp_timeout(),
            snmp_timeout_sm: default_snmp_timeout(),
            icmp_timeout: default_icmp_timeout(),
            debug: false,
            dry_run: false,
            discover: false,
            export_dir: default_export_dir(),
            run_timeout_secs: None,
            database: DatabaseConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            uri: default_db_uri(),
            user: default_db_user(),
            password: default_db_password(),
            max_connections: default_max_connections(),
            connect_retries: default_connect_retries(),
            connect_retry_delay: default_connect_retry_delay(),
        }
    }
}

impl AppConfig {
    /// Load from `<file_prefix>.toml` (optional) and `CAMS_*` environment
    /// variables, apply command-line overrides, and normalize.
    pub fn load(file_prefix: &str, overrides: &Overrides) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("CAMS")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: AppConfig = cfg.try_deserialize()?;
        Ok(loaded.with_overrides(overrides).normalized())
    }

    /// Apply command-line values. A worker count below one is ignored so the
    /// environment or default value stays in effect.
    pub fn with_overrides(mut self, overrides: &Overrides) -> Self {
        if let Some(workers) = overrides.workers.filter(|w| *w >= 1) {
            self.workers = workers;
        }
        self.debug |= overrides.debug;
        self.dry_run |= overrides.dry_run;
        self.discover |= overrides.discover;
        if let Some(dir) = &overrides.export_dir {
            self.export_dir = dir.clone();
        }
        self
    }

    /// Enforce the worker minimum and timeout floors.
    pub fn normalized(mut self) -> Self {
        if self.workers < 1 {
            tracing::warn!(
                from = self.workers,
                to = DEFAULT_WORKERS,
                "Worker count below minimum, using default"
            );
            self.workers = DEFAULT_WORKERS;
        }
        self.snmp_timeout_ap =
            clamp_timeout("snmp_timeout_ap", self.snmp_timeout_ap, DEFAULT_SNMP_TIMEOUT_SECS);
        self.snmp_timeout_sm =
            clamp_timeout("snmp_timeout_sm", self.snmp_timeout_sm, DEFAULT_SNMP_TIMEOUT_SECS);
        self.icmp_timeout =
            clamp_timeout("icmp_timeout", self.icmp_timeout, DEFAULT_ICMP_TIMEOUT_SECS);
        self
    }

    /// Worker count for the pool. Never below one.
    pub fn worker_count(&self) -> usize {
        usize::try_from(self.workers.max(1)).unwrap_or(1)
    }

    pub fn community(&self, role: DeviceRole) -> &str {
        match role {
            DeviceRole::AccessPoint => &self.ap_community,
            DeviceRole::SubscriberModule => &self.sm_community,
        }
    }

    pub fn snmp_timeout(&self, role: DeviceRole) -> Duration {
        let secs = match role {
            DeviceRole::AccessPoint => self.snmp_timeout_ap,
            DeviceRole::SubscriberModule => self.snmp_timeout_sm,
        };
        Duration::from_secs_f64(secs.max(MIN_TIMEOUT_SECS))
    }

    pub fn icmp_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.icmp_timeout.max(MIN_TIMEOUT_SECS))
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}

/// Zero (or negative) means unset; positive values get the 0.1s floor.
fn clamp_timeout(name: &str, value: f64, default: f64) -> f64 {
    if !value.is_finite() || value <= 0.0 {
        default
    } else if value < MIN_TIMEOUT_SECS {
        tracing::warn!(setting = name, from = value, to = MIN_TIMEOUT_SECS, "Timeout below floor");
        MIN_TIMEOUT_SECS
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.workers, 10);
        assert_eq!(config.ap_community, "public");
        assert_eq!(config.sm_community, "public");
        assert_eq!(config.snmp_timeout(DeviceRole::AccessPoint), Duration::from_secs(3));
        assert_eq!(config.icmp_timeout(), Duration::from_secs(1));
        assert_eq!(config.export_dir, "/tmp");
        assert!(config.run_timeout().is_none());
        assert_eq!(config.database.connect_retries, 3);
    }

    #[test]
    fn test_zero_workers_coerced_to_default() {
        let config = AppConfig {
            workers: 0,
            ..AppConfig::default()
        }
        .normalized();
        assert_eq!(config.workers, DEFAULT_WORKERS);
    }

    #[test]
    fn test_timeout_floor_and_default() {
        let config = AppConfig {
            snmp_timeout_ap: 0.01,
            snmp_timeout_sm: 0.0,
            icmp_timeout: 2.5,
            ..AppConfig::default()
        }
        .normalized();
        assert_eq!(config.snmp_timeout_ap, MIN_TIMEOUT_SECS);
        assert_eq!(config.snmp_timeout_sm, DEFAULT_SNMP_TIMEOUT_SECS);
        assert_eq!(config.icmp_timeout(), Duration::from_millis(2500));
    }

    #[test]
    fn test_flag_beats_loaded_value() {
        let base = AppConfig {
            workers: 4,
            ..AppConfig::default()
        };
        let overrides = Overrides {
            workers: Some(32),
            dry_run: true,
            ..Overrides::default()
        };
        let config = base.with_overrides(&overrides).normalized();
        assert_eq!(config.workers, 32);
        assert!(config.dry_run);
        assert!(!config.discover);
    }

    #[test]
    fn test_non_positive_flag_keeps_loaded_value() {
        let base = AppConfig {
            workers: 4,
            ..AppConfig::default()
        };
        let overrides = Overrides {
            workers: Some(0),
            ..Overrides::default()
        };
        assert_eq!(base.with_overrides(&overrides).workers, 4);
    }

    #[test]
    fn test_community_per_role() {
        let config = AppConfig {
            ap_community: "ap-secret".to_string(),
            sm_community: "sm-secret".to_string(),
            ..AppConfig::default()
        };
        assert_eq!(config.community(DeviceRole::AccessPoint), "ap-secret");
        assert_eq!(config.community(DeviceRole::SubscriberModule), "sm-secret");
    }

    #[test]
    fn test_negative_workers_coerced_to_default() {
        let config = AppConfig {
            workers: -5,
            ..AppConfig::default()
        }
        .normalized();
        assert_eq!(config.workers, DEFAULT_WORKERS);
        assert_eq!(config.worker_count(), 10);
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_coercion_is_logged_above_info() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            AppConfig {
                workers: -5,
                snmp_timeout_ap: 0.01,
                ..AppConfig::default()
            }
            .normalized()
        });

        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("Worker count below minimum"));
        assert!(logs.contains("Timeout below floor"));
    }

    #[test]
    fn test_load_negative_workers_from_environment() {
        // Only this test sets CAMS_WORKERS.
        std::env::set_var("CAMS_WORKERS", "-5");
        let loaded = AppConfig::load("camscan-test-missing-file", &Overrides::default());
        std::env::remove_var("CAMS_WORKERS");

        let config = loaded.unwrap();
        assert_eq!(config.workers, DEFAULT_WORKERS);
        assert_eq!(config.worker_count(), 10);
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = AppConfig::load("camscan-test-missing-file", &Overrides::default()).unwrap();
        assert!(config.workers >= 1);
        assert!(config.snmp_timeout_ap >= MIN_TIMEOUT_SECS);
    }
}
