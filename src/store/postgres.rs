use super::{ReadingStore, StoreConnector};
use crate::error::StoreError;
use crate::reading::{Reading, StoredReading};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::future::Future;
use std::time::Duration;

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS equipment_data (
        id BIGSERIAL PRIMARY KEY,
        equipment_id TEXT NOT NULL,
        temperature DOUBLE PRECISION,
        vibration DOUBLE PRECISION,
        throughput INTEGER,
        recorded_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
"#;

const CREATE_INDEX: &str = r#"
    CREATE INDEX IF NOT EXISTS equipment_data_recorded_at_idx
        ON equipment_data (recorded_at DESC)
"#;

/// Opens one dedicated Postgres session per call.
#[derive(Clone)]
pub struct PgConnector {
    options: PgConnectOptions,
    connect_timeout: Duration,
    operation_timeout: Duration,
}

impl PgConnector {
    pub fn new(
        options: PgConnectOptions,
        connect_timeout: Duration,
        operation_timeout: Duration,
    ) -> Self {
        // Server-side cap too, so a cancelled client wait does not leave the query running.
        let statement_timeout = operation_timeout.as_millis().to_string();
        Self {
            options: options.options([("statement_timeout", statement_timeout.as_str())]),
            connect_timeout,
            operation_timeout,
        }
    }
}

impl StoreConnector for PgConnector {
    type Store = PgReadingStore;

    async fn connect(&self) -> Result<PgReadingStore, StoreError> {
        let connecting = PgPoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .acquire_timeout(self.connect_timeout)
            .connect_with(self.options.clone());

        let pool = match tokio::time::timeout(self.connect_timeout, connecting).await {
            Ok(Ok(pool)) => pool,
            Ok(Err(err)) => return Err(StoreError::connection(err)),
            Err(_) => {
                return Err(StoreError::Connection(format!(
                    "no session after {:?}",
                    self.connect_timeout
                )))
            }
        };

        tracing::debug!("store session opened");
        Ok(PgReadingStore {
            pool,
            operation_timeout: self.operation_timeout,
        })
    }
}

/// One actor's session. The pool holds a single connection and is never shared.
#[derive(Debug)]
pub struct PgReadingStore {
    pool: PgPool,
    operation_timeout: Duration,
}

impl PgReadingStore {
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        bounded("create table", self.operation_timeout, async {
            let mut tx = self.pool.begin().await?;
            sqlx::query(CREATE_TABLE).execute(&mut *tx).await?;
            sqlx::query(CREATE_INDEX).execute(&mut *tx).await?;
            tx.commit().await
        })
        .await
    }
}

impl ReadingStore for PgReadingStore {
    async fn insert(&self, reading: &Reading) -> Result<(), StoreError> {
        bounded(
            "insert",
            self.operation_timeout,
            sqlx::query(
                r#"
                INSERT INTO equipment_data (equipment_id, temperature, vibration, throughput, recorded_at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(&reading.equipment_id)
            .bind(reading.temperature)
            .bind(reading.vibration)
            .bind(reading.throughput)
            .bind(reading.recorded_at)
            .execute(&self.pool),
        )
        .await
        .map(|_| ())
    }

    async fn query_latest(&self, limit: usize) -> Result<Vec<StoredReading>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        bounded(
            "query_latest",
            self.operation_timeout,
            sqlx::query_as::<_, StoredReading>(
                r#"
                SELECT equipment_id, temperature, vibration, throughput, recorded_at
                FROM equipment_data
                ORDER BY recorded_at DESC, id DESC
                LIMIT $1
                "#,
            )
            .bind(limit)
            .fetch_all(&self.pool),
        )
        .await
    }

    async fn close(self) {
        self.pool.close().await;
        tracing::debug!("store session closed");
    }
}

async fn bounded<T, F>(operation: &'static str, after: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(StoreError::operation(operation, err)),
        Err(_) => Err(StoreError::Timeout { operation, after }),
    }
}
