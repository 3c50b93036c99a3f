//! Postgres-backed stock store.
//!
//! Products live in `stock_products` (one row per product, stock levels as
//! JSONB), movements in the insert-only `stock_movements` table.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Code / Constraint | StoreError |
//! |------------|------------------------------|------------|
//! | unique violation | `23505` on `stock_products_account_barcode_key` | `DuplicateBarcode` (carries the barcode) |
//! | unique violation | `23505` on any other key | `DuplicateId` |
//! | check violation | `23514` | `Corrupt` |
//! | anything else | - | `Backend` |
//!
//! Version mismatches are detected under a `SELECT ... FOR UPDATE` row lock and
//! reported as `Concurrency`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};

use stockledger_core::{AccountId, AggregateId, DomainError, ExpectedVersion};
use stockledger_inventory::{
    CurrencyCode, Direction, Movement, MovementId, Product, ProductId, ProductSnapshot,
    StockLevels, UnitPrice,
};

use super::r#trait::{StockStore, StoreError, ensure_version};

const BARCODE_CONSTRAINT: &str = "stock_products_account_barcode_key";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS stock_products (
        account_id UUID NOT NULL,
        product_id UUID NOT NULL,
        name TEXT NOT NULL,
        barcode TEXT NOT NULL,
        purchase_price NUMERIC NOT NULL CHECK (purchase_price > 0),
        sale_price NUMERIC NOT NULL CHECK (sale_price > 0),
        currency TEXT NOT NULL,
        image TEXT,
        stock JSONB NOT NULL,
        baseline JSONB NOT NULL,
        baseline_version BIGINT NOT NULL CHECK (baseline_version > 0),
        version BIGINT NOT NULL CHECK (version >= baseline_version),
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (account_id, product_id),
        CONSTRAINT stock_products_account_barcode_key UNIQUE (account_id, barcode)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS stock_movements (
        movement_id UUID PRIMARY KEY,
        account_id UUID NOT NULL,
        product_id UUID NOT NULL,
        direction TEXT NOT NULL CHECK (direction IN ('inbound', 'outbound')),
        quantity BIGINT NOT NULL CHECK (quantity > 0),
        variant_label TEXT,
        note TEXT,
        product_version BIGINT NOT NULL,
        occurred_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS stock_movements_account_product_idx
        ON stock_movements (account_id, product_id, occurred_at DESC)
    "#,
];

const PRODUCT_COLUMNS: &str = "account_id, product_id, name, barcode, purchase_price, sale_price, \
     currency, image, stock, baseline, baseline_version, version, created_at, updated_at";

const MOVEMENT_COLUMNS: &str = "movement_id, account_id, product_id, direction, quantity, \
     variant_label, note, product_version, occurred_at";

/// Postgres-backed stock store.
///
/// Every query filters on `account_id`. Writes that replace a product run in a
/// transaction that first locks the row and compares its version, so a stale
/// writer gets `StoreError::Concurrency` and changes nothing.
#[derive(Debug, Clone)]
pub struct PostgresStockStore {
    pool: Arc<PgPool>,
}

impl PostgresStockStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    async fn fetch_one_product(
        &self,
        operation: &str,
        sql: &str,
        account_id: AccountId,
        key: ProductLookup<'_>,
    ) -> Result<Option<Product>, StoreError> {
        let query = sqlx::query(sql).bind(*account_id.as_uuid());
        let query = match key {
            ProductLookup::Id(product_id) => query.bind(*product_id.0.as_uuid()),
            ProductLookup::Barcode(barcode) => query.bind(barcode),
        };

        let row = query
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        row.map(|row| {
            ProductRow::from_row(&row)
                .map_err(|e| StoreError::Corrupt(format!("failed to read product row: {e}")))?
                .into_product()
        })
        .transpose()
    }
}

enum ProductLookup<'a> {
    Id(ProductId),
    Barcode(&'a str),
}

#[async_trait]
impl StockStore for PostgresStockStore {
    #[instrument(skip(self), fields(account_id = %account_id, product_id = %product_id), err)]
    async fn get_product(
        &self,
        account_id: AccountId,
        product_id: ProductId,
    ) -> Result<Option<Product>, StoreError> {
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM stock_products WHERE account_id = $1 AND product_id = $2"
        );
        self.fetch_one_product("get_product", &sql, account_id, ProductLookup::Id(product_id))
            .await
    }

    #[instrument(skip(self), fields(account_id = %account_id), err)]
    async fn find_product_by_barcode(
        &self,
        account_id: AccountId,
        barcode: &str,
    ) -> Result<Option<Product>, StoreError> {
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM stock_products WHERE account_id = $1 AND barcode = $2"
        );
        self.fetch_one_product(
            "find_product_by_barcode",
            &sql,
            account_id,
            ProductLookup::Barcode(barcode),
        )
        .await
    }

    #[instrument(skip(self), fields(account_id = %account_id, product_count = tracing::field::Empty), err)]
    async fn list_products(&self, account_id: AccountId) -> Result<Vec<Product>, StoreError> {
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM stock_products WHERE account_id = $1 \
             ORDER BY created_at ASC, product_id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(account_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_products", e))?;

        let mut products = Vec::with_capacity(rows.len());
        for row in rows {
            let row = ProductRow::from_row(&row)
                .map_err(|e| StoreError::Corrupt(format!("failed to read product row: {e}")))?;
            products.push(row.into_product()?);
        }

        Span::current().record("product_count", products.len());
        Ok(products)
    }

    #[instrument(skip(self, product), fields(account_id = %account_id, product_id = %product.id_typed()), err)]
    async fn insert_product(
        &self,
        account_id: AccountId,
        product: &Product,
    ) -> Result<(), StoreError> {
        let row = ProductRow::from_product(account_id, product)?;
        let sql = format!(
            "INSERT INTO stock_products ({PRODUCT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
        );

        row.bind_all(sqlx::query(&sql))
            .execute(&*self.pool)
            .await
            .map_err(|e| map_product_write_error("insert_product", &row.barcode, e))?;
        Ok(())
    }

    #[instrument(
        skip(self, product),
        fields(
            account_id = %account_id,
            product_id = %product.id_typed(),
            expected_version = ?expected_version
        ),
        err
    )]
    async fn put_product(
        &self,
        account_id: AccountId,
        product: &Product,
        expected_version: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let row = ProductRow::from_product(account_id, product)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        check_version(&mut tx, account_id, product.id_typed(), expected_version).await?;
        update_product(&mut tx, &row).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(account_id = %account_id, product_id = %product_id), err)]
    async fn delete_product(
        &self,
        account_id: AccountId,
        product_id: ProductId,
    ) -> Result<bool, StoreError> {
        let result =
            sqlx::query("DELETE FROM stock_products WHERE account_id = $1 AND product_id = $2")
                .bind(account_id.as_uuid())
                .bind(product_id.0.as_uuid())
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("delete_product", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, movement), fields(movement_id = %movement.movement_id), err)]
    async fn append_movement(&self, movement: &Movement) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        insert_movement(&mut tx, movement).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    #[instrument(
        skip(self, product, movement),
        fields(
            account_id = %account_id,
            product_id = %product.id_typed(),
            movement_id = %movement.movement_id,
            expected_version = ?expected_version
        ),
        err
    )]
    async fn commit_movement(
        &self,
        account_id: AccountId,
        product: &Product,
        expected_version: ExpectedVersion,
        movement: &Movement,
    ) -> Result<(), StoreError> {
        if movement.account_id != account_id || movement.product_id != product.id_typed() {
            return Err(StoreError::Corrupt(
                "movement does not belong to the committed product".to_string(),
            ));
        }
        let row = ProductRow::from_product(account_id, product)?;

        // Dropping `tx` on an early return rolls everything back.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        check_version(&mut tx, account_id, product.id_typed(), expected_version).await?;
        update_product(&mut tx, &row).await?;
        insert_movement(&mut tx, movement).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(account_id = %account_id, movement_count = tracing::field::Empty), err)]
    async fn list_movements(
        &self,
        account_id: AccountId,
        product_id: Option<ProductId>,
    ) -> Result<Vec<Movement>, StoreError> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
             WHERE account_id = $1 AND ($2::uuid IS NULL OR product_id = $2) \
             ORDER BY occurred_at DESC, product_version DESC, movement_id DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(account_id.as_uuid())
            .bind(product_id.map(|id| *id.0.as_uuid()))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_movements", e))?;

        let mut movements = Vec::with_capacity(rows.len());
        for row in rows {
            let row = MovementRow::from_row(&row)
                .map_err(|e| StoreError::Corrupt(format!("failed to read movement row: {e}")))?;
            movements.push(row.into_movement()?);
        }

        Span::current().record("movement_count", movements.len());
        Ok(movements)
    }
}

/// Lock the product row and compare its version with `expected_version`.
async fn check_version(
    tx: &mut Transaction<'_, Postgres>,
    account_id: AccountId,
    product_id: ProductId,
    expected_version: ExpectedVersion,
) -> Result<(), StoreError> {
    let row = sqlx::query(
        "SELECT version FROM stock_products WHERE account_id = $1 AND product_id = $2 FOR UPDATE",
    )
    .bind(account_id.as_uuid())
    .bind(product_id.0.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("check_version", e))?;

    let Some(row) = row else {
        return Err(StoreError::NotFound(product_id));
    };
    let current: i64 = row
        .try_get("version")
        .map_err(|e| map_sqlx_error("check_version", e))?;
    let current = from_i64(current, "version")?;

    ensure_version(expected_version, current)
}

async fn update_product(
    tx: &mut Transaction<'_, Postgres>,
    row: &ProductRow,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        UPDATE stock_products SET
            name = $3,
            barcode = $4,
            purchase_price = $5,
            sale_price = $6,
            currency = $7,
            image = $8,
            stock = $9,
            baseline = $10,
            baseline_version = $11,
            version = $12,
            created_at = $13,
            updated_at = $14
        WHERE account_id = $1 AND product_id = $2
        "#,
    )
    .bind(row.account_id)
    .bind(row.product_id)
    .bind(&row.name)
    .bind(&row.barcode)
    .bind(row.purchase_price)
    .bind(row.sale_price)
    .bind(&row.currency)
    .bind(&row.image)
    .bind(&row.stock)
    .bind(&row.baseline)
    .bind(row.baseline_version)
    .bind(row.version)
    .bind(row.created_at)
    .bind(row.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_product_write_error("update_product", &row.barcode, e))?;
    Ok(())
}

async fn insert_movement(
    tx: &mut Transaction<'_, Postgres>,
    movement: &Movement,
) -> Result<(), StoreError> {
    let sql = format!(
        "INSERT INTO stock_movements ({MOVEMENT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
    );
    sqlx::query(&sql)
        .bind(movement.movement_id.as_uuid())
        .bind(movement.account_id.as_uuid())
        .bind(movement.product_id.0.as_uuid())
        .bind(movement.direction.as_str())
        .bind(to_i64(movement.quantity, "quantity")?)
        .bind(&movement.variant_label)
        .bind(&movement.note)
        .bind(to_i64(movement.product_version, "product_version")?)
        .bind(movement.occurred_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::duplicate_movement(movement.movement_id)
            } else {
                map_sqlx_error("insert_movement", e)
            }
        })?;
    Ok(())
}

fn to_i64(value: u64, field: &str) -> Result<i64, StoreError> {
    i64::try_from(value)
        .map_err(|_| StoreError::Corrupt(format!("{field} {value} does not fit a BIGINT column")))
}

fn from_i64(value: i64, field: &str) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative {field}: {value}")))
}

/// Map SQLx errors to `StoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::DuplicateId(msg),
                Some("23514") => StoreError::Corrupt(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}

/// Like `map_sqlx_error`, but a clash on the barcode key reports the barcode.
fn map_product_write_error(operation: &str, barcode: &str, err: sqlx::Error) -> StoreError {
    if is_unique_violation(&err) && violated_constraint(&err) == Some(BARCODE_CONSTRAINT) {
        return StoreError::DuplicateBarcode(barcode.to_string());
    }
    map_sqlx_error(operation, err)
}

fn violated_constraint(err: &sqlx::Error) -> Option<&str> {
    match err {
        sqlx::Error::Database(db_err) => db_err.constraint(),
        _ => None,
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

// SQLx row types

#[derive(Debug)]
struct ProductRow {
    account_id: uuid::Uuid,
    product_id: uuid::Uuid,
    name: String,
    barcode: String,
    purchase_price: Decimal,
    sale_price: Decimal,
    currency: String,
    image: Option<String>,
    stock: Json<StockLevels>,
    baseline: Json<StockLevels>,
    baseline_version: i64,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for ProductRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            account_id: row.try_get("account_id")?,
            product_id: row.try_get("product_id")?,
            name: row.try_get("name")?,
            barcode: row.try_get("barcode")?,
            purchase_price: row.try_get("purchase_price")?,
            sale_price: row.try_get("sale_price")?,
            currency: row.try_get("currency")?,
            image: row.try_get("image")?,
            stock: row.try_get("stock")?,
            baseline: row.try_get("baseline")?,
            baseline_version: row.try_get("baseline_version")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl ProductRow {
    fn from_product(account_id: AccountId, product: &Product) -> Result<Self, StoreError> {
        let snapshot = product
            .snapshot()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        if snapshot.account_id != account_id {
            return Err(StoreError::NotFound(snapshot.product_id));
        }

        Ok(Self {
            account_id: *snapshot.account_id.as_uuid(),
            product_id: *snapshot.product_id.0.as_uuid(),
            name: snapshot.name,
            barcode: snapshot.barcode,
            purchase_price: snapshot.purchase_price.amount(),
            sale_price: snapshot.sale_price.amount(),
            currency: snapshot.currency.as_str().to_string(),
            image: snapshot.image,
            stock: Json(snapshot.stock),
            baseline: Json(snapshot.baseline),
            baseline_version: to_i64(snapshot.baseline_version, "baseline_version")?,
            version: to_i64(snapshot.version, "version")?,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
        })
    }

    fn bind_all<'q>(
        &'q self,
        query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
    ) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
        query
            .bind(self.account_id)
            .bind(self.product_id)
            .bind(&self.name)
            .bind(&self.barcode)
            .bind(self.purchase_price)
            .bind(self.sale_price)
            .bind(&self.currency)
            .bind(&self.image)
            .bind(&self.stock)
            .bind(&self.baseline)
            .bind(self.baseline_version)
            .bind(self.version)
            .bind(self.created_at)
            .bind(self.updated_at)
    }

    fn into_product(self) -> Result<Product, StoreError> {
        let product_id = self.product_id;
        let corrupt = |e: DomainError| StoreError::Corrupt(format!("product {product_id}: {e}"));

        let snapshot = ProductSnapshot {
            product_id: ProductId::new(AggregateId::from_uuid(self.product_id)),
            account_id: AccountId::from_uuid(self.account_id),
            name: self.name,
            barcode: self.barcode,
            purchase_price: UnitPrice::new(self.purchase_price).map_err(corrupt)?,
            sale_price: UnitPrice::new(self.sale_price).map_err(corrupt)?,
            currency: CurrencyCode::new(&self.currency).map_err(corrupt)?,
            image: self.image,
            stock: self.stock.0,
            baseline: self.baseline.0,
            baseline_version: from_i64(self.baseline_version, "baseline_version")?,
            version: from_i64(self.version, "version")?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        };

        Product::restore(snapshot).map_err(corrupt)
    }
}

#[derive(Debug)]
struct MovementRow {
    movement_id: uuid::Uuid,
    account_id: uuid::Uuid,
    product_id: uuid::Uuid,
    direction: String,
    quantity: i64,
    variant_label: Option<String>,
    note: Option<String>,
    product_version: i64,
    occurred_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for MovementRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            movement_id: row.try_get("movement_id")?,
            account_id: row.try_get("account_id")?,
            product_id: row.try_get("product_id")?,
            direction: row.try_get("direction")?,
            quantity: row.try_get("quantity")?,
            variant_label: row.try_get("variant_label")?,
            note: row.try_get("note")?,
            product_version: row.try_get("product_version")?,
            occurred_at: row.try_get("occurred_at")?,
        })
    }
}

impl MovementRow {
    fn into_movement(self) -> Result<Movement, StoreError> {
        let direction: Direction = self.direction.parse().map_err(|e| {
            StoreError::Corrupt(format!("movement {}: {e}", self.movement_id))
        })?;

        Ok(Movement {
            movement_id: MovementId::from_uuid(self.movement_id),
            account_id: AccountId::from_uuid(self.account_id),
            product_id: ProductId::new(AggregateId::from_uuid(self.product_id)),
            direction,
            quantity: from_i64(self.quantity, "quantity")?,
            variant_label: self.variant_label,
            note: self.note,
            product_version: from_i64(self.product_version, "product_version")?,
            occurred_at: self.occurred_at,
        })
    }
}
