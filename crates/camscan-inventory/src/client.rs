//! Neo4j connection management and shared inventory client.

use std::time::Duration;

use camscan_core::config::DatabaseConfig;
use camscan_core::CoreError;
use neo4rs::{ConfigBuilder, Graph, Query};

/// Errors from inventory operations.
#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("Neo4j connection error: {0}")]
    Connection(String),

    #[error("Neo4j query error: {0}")]
    Query(#[from] neo4rs::Error),

    #[error("Record not returned by upsert: {label} {key}")]
    NotFound { label: String, key: String },

    #[error("Field {field} cannot be queried on {table}")]
    InvalidField { table: String, field: String },

    #[error("Invalid value {value} for field {field}")]
    InvalidValue { field: String, value: String },

    #[error("Malformed record: {0}")]
    Record(#[from] CoreError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),
}

/// Thread-safe Neo4j inventory client with connection pooling.
///
/// Clone is cheap (inner Arc).
#[derive(Clone)]
pub struct InventoryClient {
    graph: Graph,
}

impl InventoryClient {
    /// Connect to Neo4j with the given configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, InventoryError> {
        let neo_config = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.user)
            .password(&config.password)
            .max_connections(config.max_connections as usize)
            .build()
            .map_err(|e| InventoryError::Connection(e.to_string()))?;

        let graph = Graph::connect(neo_config)
            .await
            .map_err(|e| InventoryError::Connection(e.to_string()))?;

        // Graph::connect is lazy; force a round trip so retries mean something.
        graph
            .run(neo4rs::query("RETURN 1"))
            .await
            .map_err(|e| InventoryError::Connection(e.to_string()))?;

        tracing::info!(uri = %config.uri, "Connected to Neo4j");
        Ok(Self { graph })
    }

    /// Connect, retrying up to `connect_retries` attempts with
    /// `connect_retry_delay` seconds between them.
    pub async fn connect_with_retry(config: &DatabaseConfig) -> Result<Self, InventoryError> {
        let attempts = config.connect_retries.max(1);
        let delay = Duration::from_secs(config.connect_retry_delay);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match Self::connect(config).await {
                Ok(client) => return Ok(client),
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        uri = %config.uri,
                        attempt,
                        attempts,
                        delay_secs = config.connect_retry_delay,
                        error = %e,
                        "Inventory connection failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(
                        uri = %config.uri,
                        attempts,
                        error = %e,
                        "Inventory connection attempts exhausted"
                    );
                    return Err(e);
                }
            }
        }
    }

    /// Execute a write-only query (MERGE, SET, DELETE).
    pub async fn run(&self, query: Query) -> Result<(), InventoryError> {
        self.graph.run(query).await?;
        Ok(())
    }

    /// Execute a read query and collect all rows.
    pub async fn query_rows(&self, query: Query) -> Result<Vec<neo4rs::Row>, InventoryError> {
        let mut stream = self.graph.execute(query).await?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Execute a read query and return the first row, if any.
    pub async fn query_one(&self, query: Query) -> Result<Option<neo4rs::Row>, InventoryError> {
        let mut stream = self.graph.execute(query).await?;
        Ok(stream.next().await?)
    }
}

/// Read a typed column from a result row.
pub(crate) fn column<T>(row: &neo4rs::Row, name: &str) -> Result<T, InventoryError>
where
    T: serde::de::DeserializeOwned,
{
    row.get::<T>(name)
        .map_err(|e| InventoryError::Serialization(format!("column {name}: {e}")))
}
