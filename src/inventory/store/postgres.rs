//! PostgreSQL record store
//!
//! Backed by `inventory_tb` (one row per product/store, enforced by a unique
//! constraint) and the append-only `transfer_log_tb`.
//!
//! The conditional decrement is one statement:
//! `UPDATE .. SET qty = qty - $n WHERE .. AND qty >= $n RETURNING qty`.
//! Row-level locking inside PostgreSQL makes it atomic per row; no
//! read-then-write happens in application code.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgRow;
use tracing::{debug, error};

use super::{AtomicTransferOutcome, CreateOutcome, DecrementOutcome, InventoryStore};
use crate::db::SafeRow;
use crate::inventory::error::StoreError;
use crate::inventory::types::{InventoryRecord, ProductId, StoreId, TransferLogEntry};

const CREATE_INVENTORY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS inventory_tb (
    id          BIGSERIAL PRIMARY KEY,
    product_id  VARCHAR(64) NOT NULL,
    store_id    VARCHAR(64) NOT NULL,
    qty         BIGINT NOT NULL DEFAULT 0,
    min_qty     BIGINT NOT NULL DEFAULT 0,
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT inventory_product_store_uq UNIQUE (product_id, store_id)
)
"#;

const CREATE_TRANSFER_LOG_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transfer_log_tb (
    id             BIGSERIAL PRIMARY KEY,
    transfer_id    VARCHAR(26) NOT NULL,
    product_id     VARCHAR(64) NOT NULL,
    from_store_id  VARCHAR(64) NOT NULL,
    to_store_id    VARCHAR(64) NOT NULL,
    quantity       BIGINT NOT NULL,
    requested_by   TEXT NOT NULL,
    status         VARCHAR(32) NOT NULL,
    created_at     TIMESTAMPTZ NOT NULL
)
"#;

const SELECT_COLUMNS: &str = "product_id, store_id, qty, min_qty, updated_at";

/// `InventoryStore` over a `PgPool`
pub struct PgInventoryStore {
    pool: PgPool,
}

impl PgInventoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the ledger tables if missing
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_INVENTORY_TABLE)
            .execute(&self.pool)
            .await?;
        sqlx::query(CREATE_TRANSFER_LOG_TABLE)
            .execute(&self.pool)
            .await?;
        debug!("Inventory schema ready");
        Ok(())
    }

    /// Typed record from a raw row; malformed identifiers are rejected here
    fn row_to_record(row: &PgRow) -> Result<InventoryRecord, StoreError> {
        let malformed = |column: &str| StoreError::Database(format!("malformed column {column}"));

        let product_raw: String = row
            .try_get_log("product_id")
            .ok_or_else(|| malformed("product_id"))?;
        let store_raw: String = row
            .try_get_log("store_id")
            .ok_or_else(|| malformed("store_id"))?;
        let qty: i64 = row.try_get_log("qty").ok_or_else(|| malformed("qty"))?;
        let min_qty: i64 = row
            .try_get_log("min_qty")
            .ok_or_else(|| malformed("min_qty"))?;
        let updated_at: DateTime<Utc> = row
            .try_get_log("updated_at")
            .ok_or_else(|| malformed("updated_at"))?;

        let product_id = ProductId::new(&product_raw).map_err(|e| {
            error!(product_id = %product_raw, error = %e, "Rejecting inventory row with bad product_id");
            StoreError::Database(e.to_string())
        })?;
        let store_id = StoreId::new(&store_raw).map_err(|e| {
            error!(store_id = %store_raw, error = %e, "Rejecting inventory row with bad store_id");
            StoreError::Database(e.to_string())
        })?;

        Ok(InventoryRecord {
            product_id,
            store_id,
            qty,
            min_qty,
            updated_at,
        })
    }

    fn rows_to_records(rows: &[PgRow]) -> Result<Vec<InventoryRecord>, StoreError> {
        rows.iter().map(Self::row_to_record).collect()
    }
}

#[async_trait]
impl InventoryStore for PgInventoryStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn get(
        &self,
        product_id: &ProductId,
        store_id: &StoreId,
    ) -> Result<Option<InventoryRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM inventory_tb WHERE product_id = $1 AND store_id = $2"
        ))
        .bind(product_id.as_str())
        .bind(store_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn conditional_decrement(
        &self,
        product_id: &ProductId,
        store_id: &StoreId,
        amount: i64,
    ) -> Result<DecrementOutcome, StoreError> {
        let updated: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE inventory_tb
            SET qty = qty - $3, updated_at = NOW()
            WHERE product_id = $1 AND store_id = $2 AND qty >= $3
            RETURNING qty
            "#,
        )
        .bind(product_id.as_str())
        .bind(store_id.as_str())
        .bind(amount)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(current_qty) = updated {
            return Ok(DecrementOutcome {
                applied: true,
                current_qty,
            });
        }

        // Zero rows affected: report what blocked the write
        let current: Option<i64> = sqlx::query_scalar(
            "SELECT qty FROM inventory_tb WHERE product_id = $1 AND store_id = $2",
        )
        .bind(product_id.as_str())
        .bind(store_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match current {
            Some(current_qty) => Ok(DecrementOutcome {
                applied: false,
                current_qty,
            }),
            None => Err(StoreError::Constraint(format!(
                "no row for ({product_id}, {store_id})"
            ))),
        }
    }

    async fn increment(
        &self,
        product_id: &ProductId,
        store_id: &StoreId,
        amount: i64,
    ) -> Result<InventoryRecord, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE inventory_tb
            SET qty = qty + $3, updated_at = NOW()
            WHERE product_id = $1 AND store_id = $2
            RETURNING {SELECT_COLUMNS}
            "#
        ))
        .bind(product_id.as_str())
        .bind(store_id.as_str())
        .bind(amount)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_record(&row),
            None => Err(StoreError::Constraint(format!(
                "no row for ({product_id}, {store_id})"
            ))),
        }
    }

    async fn create_if_absent(
        &self,
        product_id: &ProductId,
        store_id: &StoreId,
        initial_qty: i64,
        min_qty: i64,
    ) -> Result<CreateOutcome, StoreError> {
        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO inventory_tb (product_id, store_id, qty, min_qty, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (product_id, store_id) DO NOTHING
            RETURNING {SELECT_COLUMNS}
            "#
        ))
        .bind(product_id.as_str())
        .bind(store_id.as_str())
        .bind(initial_qty)
        .bind(min_qty)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok(CreateOutcome {
                record: Self::row_to_record(&row)?,
                created: true,
            });
        }

        match self.get(product_id, store_id).await? {
            Some(record) => Ok(CreateOutcome {
                record,
                created: false,
            }),
            None => Err(StoreError::Database(format!(
                "row ({product_id}, {store_id}) vanished after insert conflict"
            ))),
        }
    }

    async fn append_transfer_log(&self, entry: &TransferLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO transfer_log_tb
                (transfer_id, product_id, from_store_id, to_store_id, quantity, requested_by, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.transfer_id.to_string())
        .bind(entry.product_id.as_str())
        .bind(entry.from_store_id.as_str())
        .bind(entry.to_store_id.as_str())
        .bind(entry.quantity)
        .bind(&entry.requested_by)
        .bind(entry.status.as_str())
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_for_product(
        &self,
        product_id: &ProductId,
    ) -> Result<Vec<InventoryRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM inventory_tb WHERE product_id = $1 ORDER BY store_id"
        ))
        .bind(product_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        Self::rows_to_records(&rows)
    }

    async fn list_all(&self) -> Result<Vec<InventoryRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM inventory_tb ORDER BY product_id, store_id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Self::rows_to_records(&rows)
    }

    async fn set_quantity(
        &self,
        product_id: &ProductId,
        store_id: &StoreId,
        qty: i64,
        min_qty: Option<i64>,
    ) -> Result<InventoryRecord, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO inventory_tb (product_id, store_id, qty, min_qty, updated_at)
            VALUES ($1, $2, $3, COALESCE($4, 0), NOW())
            ON CONFLICT (product_id, store_id)
            DO UPDATE SET qty = EXCLUDED.qty,
                          min_qty = COALESCE($4, inventory_tb.min_qty),
                          updated_at = NOW()
            RETURNING {SELECT_COLUMNS}
            "#
        ))
        .bind(product_id.as_str())
        .bind(store_id.as_str())
        .bind(qty)
        .bind(min_qty)
        .fetch_one(&self.pool)
        .await?;
        Self::row_to_record(&row)
    }

    async fn reset_if_negative(
        &self,
        product_id: &ProductId,
        store_id: &StoreId,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE inventory_tb
            SET qty = 0, updated_at = NOW()
            WHERE product_id = $1 AND store_id = $2 AND qty < 0
            "#,
        )
        .bind(product_id.as_str())
        .bind(store_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    fn supports_atomic_transfer(&self) -> bool {
        true
    }

    async fn transfer_atomic(
        &self,
        product_id: &ProductId,
        from: &StoreId,
        to: &StoreId,
        amount: i64,
    ) -> Result<AtomicTransferOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let debited: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE inventory_tb
            SET qty = qty - $3, updated_at = NOW()
            WHERE product_id = $1 AND store_id = $2 AND qty >= $3
            RETURNING qty
            "#,
        )
        .bind(product_id.as_str())
        .bind(from.as_str())
        .bind(amount)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(source_after) = debited else {
            let current_qty: Option<i64> = sqlx::query_scalar(
                "SELECT qty FROM inventory_tb WHERE product_id = $1 AND store_id = $2",
            )
            .bind(product_id.as_str())
            .bind(from.as_str())
            .fetch_optional(&mut *tx)
            .await?;
            tx.rollback().await?;

            return match current_qty {
                Some(current_qty) => Ok(AtomicTransferOutcome::Insufficient { current_qty }),
                None => Err(StoreError::Constraint(format!(
                    "no row for ({product_id}, {from})"
                ))),
            };
        };

        let credited: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE inventory_tb
            SET qty = qty + $3, updated_at = NOW()
            WHERE product_id = $1 AND store_id = $2
            RETURNING qty
            "#,
        )
        .bind(product_id.as_str())
        .bind(to.as_str())
        .bind(amount)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(dest_after) = credited else {
            tx.rollback().await?;
            return Err(StoreError::Constraint(format!(
                "no row for ({product_id}, {to})"
            )));
        };

        tx.commit()
            .await
            .map_err(|e| StoreError::CommitUncertain(e.to_string()))?;
        Ok(AtomicTransferOutcome::Applied {
            source_after,
            dest_after,
        })
    }
}
