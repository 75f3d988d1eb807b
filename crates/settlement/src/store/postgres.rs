//! PostgreSQL settlement store implementation
//!
//! One table per environment (`settlements_prod`, `settlements_virtual`,
//! `settlements_static`). Conditional writes rely on the primary key for
//! inserts and on `WHERE version = $expected` for updates; every write runs
//! in its own transaction.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::codec::EncryptedPayload;
use crate::error::SettlementError;
use crate::store::traits::{SettlementStore, StoreResult};
use crate::types::{Environment, ListFilter, SettlementId, SettlementInstruction, SettlementStatus};

const COLUMNS: &str = "id, buyer, seller, instrument, amount, currency, requested_at, status, \
     payload, content_hash, version, submitted_by, reverses, reason, created_at, updated_at";

/// PostgreSQL-backed settlement store
#[derive(Debug, Clone)]
pub struct PostgresSettlementStore {
    pool: PgPool,
    environment: Environment,
}

impl PostgresSettlementStore {
    /// Connect a pool and build the store
    ///
    /// Connection failures surface as [`SettlementError::PersistenceUnavailable`].
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
        environment: Environment,
    ) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await
            .map_err(|e| {
                SettlementError::PersistenceUnavailable(format!("Failed to connect to database: {}", e))
            })?;

        info!(
            environment = %environment,
            table = environment.table_name(),
            "Connected to PostgreSQL"
        );

        Ok(Self { pool, environment })
    }

    /// Create from an existing connection pool
    pub fn from_pool(pool: PgPool, environment: Environment) -> Self {
        Self { pool, environment }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn table(&self) -> &'static str {
        self.environment.table_name()
    }

    fn schema_sql(&self) -> String {
        let table = self.table();
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id            TEXT PRIMARY KEY,
                buyer         TEXT NOT NULL,
                seller        TEXT NOT NULL,
                instrument    TEXT NOT NULL,
                amount        NUMERIC NOT NULL,
                currency      TEXT NOT NULL,
                requested_at  TIMESTAMPTZ NOT NULL,
                status        TEXT NOT NULL,
                payload       BYTEA NOT NULL,
                content_hash  TEXT NOT NULL,
                version       BIGINT NOT NULL,
                submitted_by  TEXT NOT NULL,
                reverses      TEXT NULL REFERENCES {table} (id),
                reason        TEXT NULL,
                created_at    TIMESTAMPTZ NOT NULL,
                updated_at    TIMESTAMPTZ NOT NULL
            );
            CREATE INDEX IF NOT EXISTS {table}_status_idx ON {table} (status);
            CREATE INDEX IF NOT EXISTS {table}_currency_idx ON {table} (currency);
            CREATE UNIQUE INDEX IF NOT EXISTS {table}_reverses_idx ON {table} (reverses)
                WHERE reverses IS NOT NULL;
            "#
        )
    }

    fn row_to_instruction(row: &PgRow) -> StoreResult<SettlementInstruction> {
        let status: String = row.try_get("status").map_err(decode_error)?;
        let payload: Vec<u8> = row.try_get("payload").map_err(decode_error)?;
        let reverses: Option<String> = row.try_get("reverses").map_err(decode_error)?;

        Ok(SettlementInstruction {
            id: SettlementId::from_stored(row.try_get("id").map_err(decode_error)?),
            buyer: row.try_get("buyer").map_err(decode_error)?,
            seller: row.try_get("seller").map_err(decode_error)?,
            instrument: row.try_get("instrument").map_err(decode_error)?,
            amount: row.try_get("amount").map_err(decode_error)?,
            currency: row.try_get("currency").map_err(decode_error)?,
            requested_at: row.try_get("requested_at").map_err(decode_error)?,
            status: SettlementStatus::from_str(&status)
                .map_err(|_| SettlementError::Storage(format!("unknown stored status '{}'", status)))?,
            payload: EncryptedPayload::from_bytes(&payload)?,
            content_hash: row.try_get("content_hash").map_err(decode_error)?,
            version: row.try_get("version").map_err(decode_error)?,
            submitted_by: row.try_get("submitted_by").map_err(decode_error)?,
            reverses: reverses.map(SettlementId::from_stored),
            reason: row.try_get("reason").map_err(decode_error)?,
            created_at: row.try_get("created_at").map_err(decode_error)?,
            updated_at: row.try_get("updated_at").map_err(decode_error)?,
        })
    }

    /// Insert inside an open transaction, returning false if the id exists
    async fn insert_in(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        instruction: &SettlementInstruction,
    ) -> StoreResult<bool> {
        let result = sqlx::query(&format!(
            r#"
            INSERT INTO {} ({COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (id) DO NOTHING
            "#,
            self.table()
        ))
        .bind(instruction.id.as_str())
        .bind(&instruction.buyer)
        .bind(&instruction.seller)
        .bind(&instruction.instrument)
        .bind(instruction.amount)
        .bind(&instruction.currency)
        .bind(instruction.requested_at)
        .bind(instruction.status.as_str())
        .bind(instruction.payload.to_bytes())
        .bind(&instruction.content_hash)
        .bind(instruction.version)
        .bind(&instruction.submitted_by)
        .bind(instruction.reverses.as_ref().map(|id| id.as_str().to_string()))
        .bind(&instruction.reason)
        .bind(instruction.created_at)
        .bind(instruction.updated_at)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn decode_error(err: sqlx::Error) -> SettlementError {
    SettlementError::Storage(format!("failed to decode settlement row: {}", err))
}

#[async_trait]
impl SettlementStore for PostgresSettlementStore {
    #[instrument(skip(self), fields(table = self.table()))]
    async fn init_schema(&self) -> StoreResult<()> {
        let sql = self.schema_sql();
        let mut tx = self.pool.begin().await?;
        sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(&sql)).await?;
        tx.commit().await?;
        info!("Settlement schema ready");
        Ok(())
    }

    #[instrument(skip(self, instruction), fields(settlement_id = %instruction.id))]
    async fn insert(&self, instruction: SettlementInstruction) -> StoreResult<SettlementInstruction> {
        let mut tx = self.pool.begin().await?;
        if !self.insert_in(&mut tx, &instruction).await? {
            tx.rollback().await?;
            return Err(SettlementError::Conflict {
                id: instruction.id.to_string(),
                expected: 0,
            });
        }
        tx.commit().await?;
        debug!("Settlement inserted");
        Ok(instruction)
    }

    #[instrument(skip(self, instruction), fields(settlement_id = %instruction.id, to = %instruction.status))]
    async fn update(
        &self,
        instruction: &SettlementInstruction,
        expected_version: i64,
    ) -> StoreResult<SettlementInstruction> {
        let predecessors: Vec<&str> = instruction
            .status
            .predecessors()
            .into_iter()
            .map(|s| s.as_str())
            .collect();

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(&format!(
            r#"
            UPDATE {} SET
                status = $1,
                reason = $2,
                payload = $3,
                version = $4,
                updated_at = $5
            WHERE id = $6 AND version = $7 AND status = ANY($8)
            "#,
            self.table()
        ))
        .bind(instruction.status.as_str())
        .bind(&instruction.reason)
        .bind(instruction.payload.to_bytes())
        .bind(instruction.version)
        .bind(instruction.updated_at)
        .bind(instruction.id.as_str())
        .bind(expected_version)
        .bind(&predecessors)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 1 {
            tx.commit().await?;
            return Ok(instruction.clone());
        }

        let current = sqlx::query(&format!(
            "SELECT version, status FROM {} WHERE id = $1",
            self.table()
        ))
        .bind(instruction.id.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        tx.rollback().await?;

        match current {
            None => Err(SettlementError::NotFound(instruction.id.to_string())),
            Some(row) => {
                let version: i64 = row.try_get("version").map_err(decode_error)?;
                if version != expected_version {
                    return Err(SettlementError::Conflict {
                        id: instruction.id.to_string(),
                        expected: expected_version,
                    });
                }
                let status: String = row.try_get("status").map_err(decode_error)?;
                Err(SettlementError::InvalidTransition {
                    id: instruction.id.to_string(),
                    from: SettlementStatus::from_str(&status)?,
                    to: instruction.status,
                })
            }
        }
    }

    #[instrument(skip(self, reversal), fields(settlement_id = %reversal.id))]
    async fn insert_linked(&self, reversal: SettlementInstruction) -> StoreResult<SettlementInstruction> {
        let original_id = reversal
            .reverses
            .clone()
            .ok_or_else(|| SettlementError::Internal("reversal record without link".into()))?;

        let mut tx = self.pool.begin().await?;

        let original = sqlx::query(&format!(
            "SELECT status FROM {} WHERE id = $1 FOR UPDATE",
            self.table()
        ))
        .bind(original_id.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let status = match original {
            None => {
                tx.rollback().await?;
                return Err(SettlementError::NotFound(original_id.to_string()));
            }
            Some(row) => {
                let raw: String = row.try_get("status").map_err(decode_error)?;
                SettlementStatus::from_str(&raw)?
            }
        };
        if status != SettlementStatus::Settled {
            tx.rollback().await?;
            return Err(SettlementError::NotSettled {
                id: original_id.to_string(),
                status,
            });
        }

        if !self.insert_in(&mut tx, &reversal).await? {
            tx.rollback().await?;
            return Err(SettlementError::Conflict {
                id: reversal.id.to_string(),
                expected: 0,
            });
        }

        tx.commit().await?;
        Ok(reversal)
    }

    async fn get(&self, id: &SettlementId) -> StoreResult<Option<SettlementInstruction>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM {} WHERE id = $1",
            self.table()
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_instruction).transpose()
    }

    async fn list(&self, filter: &ListFilter) -> StoreResult<Vec<SettlementInstruction>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {COLUMNS} FROM {}
            WHERE ($1::TEXT IS NULL OR status = $1)
              AND ($2::TEXT IS NULL OR UPPER(currency) = UPPER($2))
              AND ($3::TEXT IS NULL OR buyer = $3 OR seller = $3)
            ORDER BY created_at DESC, id ASC
            LIMIT $4 OFFSET $5
            "#,
            self.table()
        ))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.currency.as_deref())
        .bind(filter.party.as_deref())
        .bind(i64::from(filter.limit))
        .bind(i64::from(filter.offset))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_instruction).collect()
    }

    async fn list_in_flight(&self) -> StoreResult<Vec<SettlementInstruction>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM {} WHERE status IN ('pending', 'validated') ORDER BY created_at ASC",
            self.table()
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_instruction).collect()
    }

    async fn list_by_status(
        &self,
        statuses: &[SettlementStatus],
        currency: &str,
    ) -> StoreResult<Vec<SettlementInstruction>> {
        let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();

        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM {} WHERE status = ANY($1) AND UPPER(currency) = UPPER($2)",
            self.table()
        ))
        .bind(&statuses)
        .bind(currency)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_instruction).collect()
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
