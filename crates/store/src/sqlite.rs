//! SQLite order store.
//!
//! One `orders` table keyed by the public order id, with secondary indexes
//! for the columns support staff filter on. Customer search is a
//! case-insensitive `LIKE` over name and email.

use async_trait::async_trait;
use orderdesk_core::error::StoreError;
use orderdesk_core::order::{Order, OrderStore};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous};
use sqlx::{Row, Sqlite, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// Rows written per transaction when seeding.
const SEED_BATCH: usize = 20;

const ORDER_COLUMNS: &str = "order_public_id, platform_public_id, customer_name, customer_email, \
    destination_country_code, destination_country, order_status, created_at, paid_at, shipped_at, \
    info_received_at, in_transit_at, out_for_delivery_at, delivered_at, failed_attempt_at, \
    exception_at, shipping_service, track_number_masked, last_mile_carrier, last_mile_tracking_masked";

pub struct SqliteOrderStore {
    pool: SqlitePool,
}

impl SqliteOrderStore {
    /// Open (or create) the database at `url` and run migrations.
    ///
    /// `sqlite::memory:` gives an ephemeral database for tests.
    pub async fn new(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Unavailable(format!("Invalid SQLite url: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite order store ready at {url}");
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                order_public_id            TEXT PRIMARY KEY NOT NULL,
                platform_public_id         TEXT NOT NULL,
                customer_name              TEXT NOT NULL,
                customer_email             TEXT NOT NULL,
                destination_country_code   TEXT NOT NULL,
                destination_country        TEXT NOT NULL,
                order_status               INTEGER NOT NULL,
                created_at                 TEXT NOT NULL,
                paid_at                    TEXT,
                shipped_at                 TEXT,
                info_received_at           TEXT,
                in_transit_at              TEXT,
                out_for_delivery_at        TEXT,
                delivered_at               TEXT,
                failed_attempt_at          TEXT,
                exception_at               TEXT,
                shipping_service           TEXT,
                track_number_masked        TEXT,
                last_mile_carrier          TEXT,
                last_mile_tracking_masked  TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("orders table: {e}")))?;

        for (name, column) in [
            ("idx_orders_customer_email", "customer_email"),
            ("idx_orders_order_status", "order_status"),
            ("idx_orders_created_at", "created_at"),
            ("idx_orders_destination_country_code", "destination_country_code"),
            ("idx_orders_platform_public_id", "platform_public_id"),
        ] {
            sqlx::query(&format!("CREATE INDEX IF NOT EXISTS {name} ON orders({column})"))
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::MigrationFailed(format!("{name}: {e}")))?;
        }

        debug!("SQLite migrations complete");
        Ok(())
    }

    /// Insert or replace orders, keyed by public id. Returns rows written.
    pub async fn upsert_many(&self, orders: &[Order]) -> Result<usize, StoreError> {
        let sql = format!(
            "INSERT OR REPLACE INTO orders ({ORDER_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)"
        );

        let mut written = 0;
        for batch in orders.chunks(SEED_BATCH) {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| StoreError::Unavailable(format!("BEGIN failed: {e}")))?;
            for o in batch {
                sqlx::query(&sql)
                    .bind(&o.order_public_id)
                    .bind(&o.platform_public_id)
                    .bind(&o.customer_name)
                    .bind(&o.customer_email)
                    .bind(&o.destination_country_code)
                    .bind(&o.destination_country)
                    .bind(o.order_status)
                    .bind(&o.created_at)
                    .bind(&o.paid_at)
                    .bind(&o.shipped_at)
                    .bind(&o.info_received_at)
                    .bind(&o.in_transit_at)
                    .bind(&o.out_for_delivery_at)
                    .bind(&o.delivered_at)
                    .bind(&o.failed_attempt_at)
                    .bind(&o.exception_at)
                    .bind(&o.shipping_service)
                    .bind(&o.track_number_masked)
                    .bind(&o.last_mile_carrier)
                    .bind(&o.last_mile_tracking_masked)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| StoreError::QueryFailed(format!("INSERT {}: {e}", o.order_public_id)))?;
                written += 1;
            }
            tx.commit()
                .await
                .map_err(|e| StoreError::Unavailable(format!("COMMIT failed: {e}")))?;
            debug!(rows = batch.len(), "Seed batch committed");
        }
        Ok(written)
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM orders")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("COUNT: {e}")))?;
        column(&row, "n")
    }
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name)
        .map_err(|e| StoreError::QueryFailed(format!("{name} column: {e}")))
}

fn row_to_order(row: &SqliteRow) -> Result<Order, StoreError> {
    Ok(Order {
        order_public_id: column(row, "order_public_id")?,
        platform_public_id: column(row, "platform_public_id")?,
        customer_name: column(row, "customer_name")?,
        customer_email: column(row, "customer_email")?,
        destination_country_code: column(row, "destination_country_code")?,
        destination_country: column(row, "destination_country")?,
        order_status: column(row, "order_status")?,
        created_at: column(row, "created_at")?,
        paid_at: column(row, "paid_at")?,
        shipped_at: column(row, "shipped_at")?,
        info_received_at: column(row, "info_received_at")?,
        in_transit_at: column(row, "in_transit_at")?,
        out_for_delivery_at: column(row, "out_for_delivery_at")?,
        delivered_at: column(row, "delivered_at")?,
        failed_attempt_at: column(row, "failed_attempt_at")?,
        exception_at: column(row, "exception_at")?,
        shipping_service: column(row, "shipping_service")?,
        track_number_masked: column(row, "track_number_masked")?,
        last_mile_carrier: column(row, "last_mile_carrier")?,
        last_mile_tracking_masked: column(row, "last_mile_tracking_masked")?,
    })
}

/// Escape LIKE wildcards so user input matches literally.
fn like_pattern(search: &str) -> String {
    let escaped = search
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

#[async_trait]
impl OrderStore for SqliteOrderStore {
    async fn find_by_public_id(&self, order_id: &str) -> Result<Option<Order>, StoreError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_public_id = ?1");
        let row = sqlx::query(&sql)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("find_by_public_id: {e}")))?;
        row.as_ref().map(row_to_order).transpose()
    }

    async fn search_customers(&self, search: &str) -> Result<Vec<Order>, StoreError> {
        let sql = format!(
            "SELECT DISTINCT {ORDER_COLUMNS} FROM orders \
             WHERE customer_email LIKE ?1 ESCAPE '\\' OR customer_name LIKE ?1 ESCAPE '\\' \
             ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(like_pattern(search))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("search_customers: {e}")))?;
        rows.iter().map(row_to_order).collect()
    }
}
