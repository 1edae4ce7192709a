//! Per-role result tables and their CSV export.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use camscan_core::{DeviceRole, HostAddress, OidSet};

use crate::error::ScanError;
use crate::job::JobId;
use crate::snmp::DeviceAttributes;

/// One row per scanned device; columns follow the role's OID map order.
#[derive(Debug, Clone, Serialize)]
pub struct ResultTable {
    pub role: DeviceRole,
    pub header: Vec<String>,
    rows: Vec<ResultRow>,
}

#[derive(Debug, Clone, Serialize)]
struct ResultRow {
    job_id: u64,
    address: HostAddress,
    cells: Vec<String>,
}

impl ResultTable {
    pub fn new(role: DeviceRole, oids: &OidSet) -> Self {
        Self {
            role,
            header: oids.keys().map(str::to_string).collect(),
            rows: Vec::new(),
        }
    }

    /// Add a device's attributes. Keys without a value become empty cells.
    pub fn push(&mut self, job_id: JobId, address: HostAddress, attributes: &DeviceAttributes) {
        let cells = self
            .header
            .iter()
            .map(|key| {
                attributes
                    .get(key)
                    .map(ToString::to_string)
                    .unwrap_or_default()
            })
            .collect();
        self.rows.push(ResultRow {
            job_id: job_id.0,
            address,
            cells,
        });
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows in job order, independent of completion order.
    pub fn rows(&self) -> Vec<&[String]> {
        let mut rows: Vec<&ResultRow> = self.rows.iter().collect();
        rows.sort_by_key(|r| r.job_id);
        rows.into_iter().map(|r| r.cells.as_slice()).collect()
    }

    pub fn file_name(&self) -> String {
        format!("{}.csv", self.role.short_name())
    }

    pub fn write_csv<W: io::Write>(&self, writer: W) -> Result<(), ScanError> {
        let mut csv = csv::Writer::from_writer(writer);
        if !self.header.is_empty() {
            csv.write_record(&self.header)?;
            for row in self.rows() {
                csv.write_record(row)?;
            }
        }
        csv.flush()?;
        Ok(())
    }
}

/// Write each table to `<dir>/<role>.csv`, creating `dir` if needed.
pub fn write_tables(dir: &Path, tables: &[&ResultTable]) -> Result<Vec<PathBuf>, ScanError> {
    std::fs::create_dir_all(dir)?;

    let mut written = Vec::with_capacity(tables.len());
    for table in tables {
        let path = dir.join(table.file_name());
        let file = File::create(&path)?;
        table.write_csv(file).inspect_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Failed to write results");
        })?;

        tracing::info!(
            role = %table.role,
            path = %path.display(),
            rows = table.len(),
            "Results exported"
        );
        written.push(path);
    }

    Ok(written)
}
