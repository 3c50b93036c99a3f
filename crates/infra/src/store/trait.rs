use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use stockledger_core::{AccountId, DomainError, ExpectedVersion};
use stockledger_inventory::{Movement, MovementId, Product, ProductId};

/// Stock store operation error.
///
/// These are **storage errors** (constraint violations, stale versions,
/// backend failures) as opposed to domain errors (validation, stock rules).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The product does not exist for this account.
    #[error("product {0} not found")]
    NotFound(ProductId),

    /// Another product of the same account already uses this barcode.
    #[error("barcode '{0}' is already used by another product")]
    DuplicateBarcode(String),

    /// Insert-only record already exists.
    #[error("duplicate identifier: {0}")]
    DuplicateId(String),

    /// Optimistic concurrency check failed.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    /// A stored record could not be turned back into a valid domain value.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// Backend failure (connection, query, lock poisoning).
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Account-scoped store for products and movements.
///
/// ## Contract
///
/// - Every read and write is scoped by `AccountId`; a product of another
///   account is indistinguishable from a missing one.
/// - `(account, barcode)` is unique across the account's products.
/// - Movements are insert-only. Nothing in this trait edits or deletes one.
/// - `commit_movement` is the ledger's write path: the product replace and
///   the movement insert happen together or not at all, and only if the
///   stored product is still at `expected_version`.
///
/// Stores take no locks on behalf of callers. Serializability per product
/// comes from the version check in `put_product`/`commit_movement`.
#[async_trait]
pub trait StockStore: Send + Sync {
    async fn get_product(
        &self,
        account_id: AccountId,
        product_id: ProductId,
    ) -> Result<Option<Product>, StoreError>;

    async fn find_product_by_barcode(
        &self,
        account_id: AccountId,
        barcode: &str,
    ) -> Result<Option<Product>, StoreError>;

    /// All products of an account, oldest first.
    async fn list_products(&self, account_id: AccountId) -> Result<Vec<Product>, StoreError>;

    /// Insert a newly defined product.
    async fn insert_product(&self, account_id: AccountId, product: &Product)
    -> Result<(), StoreError>;

    /// Replace a stored product if it is still at `expected_version`.
    async fn put_product(
        &self,
        account_id: AccountId,
        product: &Product,
        expected_version: ExpectedVersion,
    ) -> Result<(), StoreError>;

    /// Remove a product record; its movements stay in the log.
    async fn delete_product(
        &self,
        account_id: AccountId,
        product_id: ProductId,
    ) -> Result<bool, StoreError>;

    /// Insert a movement on its own (insert-only).
    async fn append_movement(&self, movement: &Movement) -> Result<(), StoreError>;

    /// Atomically replace the product and append the movement that produced it.
    async fn commit_movement(
        &self,
        account_id: AccountId,
        product: &Product,
        expected_version: ExpectedVersion,
        movement: &Movement,
    ) -> Result<(), StoreError>;

    /// Movements of an account (optionally one product), newest first.
    async fn list_movements(
        &self,
        account_id: AccountId,
        product_id: Option<ProductId>,
    ) -> Result<Vec<Movement>, StoreError>;
}

/// Type-erased store handle used by the service bootstrap.
pub type SharedStore = Arc<dyn StockStore>;

#[async_trait]
impl<S> StockStore for Arc<S>
where
    S: StockStore + ?Sized,
{
    async fn get_product(
        &self,
        account_id: AccountId,
        product_id: ProductId,
    ) -> Result<Option<Product>, StoreError> {
        (**self).get_product(account_id, product_id).await
    }

    async fn find_product_by_barcode(
        &self,
        account_id: AccountId,
        barcode: &str,
    ) -> Result<Option<Product>, StoreError> {
        (**self).find_product_by_barcode(account_id, barcode).await
    }

    async fn list_products(&self, account_id: AccountId) -> Result<Vec<Product>, StoreError> {
        (**self).list_products(account_id).await
    }

    async fn insert_product(
        &self,
        account_id: AccountId,
        product: &Product,
    ) -> Result<(), StoreError> {
        (**self).insert_product(account_id, product).await
    }

    async fn put_product(
        &self,
        account_id: AccountId,
        product: &Product,
        expected_version: ExpectedVersion,
    ) -> Result<(), StoreError> {
        (**self)
            .put_product(account_id, product, expected_version)
            .await
    }

    async fn delete_product(
        &self,
        account_id: AccountId,
        product_id: ProductId,
    ) -> Result<bool, StoreError> {
        (**self).delete_product(account_id, product_id).await
    }

    async fn append_movement(&self, movement: &Movement) -> Result<(), StoreError> {
        (**self).append_movement(movement).await
    }

    async fn commit_movement(
        &self,
        account_id: AccountId,
        product: &Product,
        expected_version: ExpectedVersion,
        movement: &Movement,
    ) -> Result<(), StoreError> {
        (**self)
            .commit_movement(account_id, product, expected_version, movement)
            .await
    }

    async fn list_movements(
        &self,
        account_id: AccountId,
        product_id: Option<ProductId>,
    ) -> Result<Vec<Movement>, StoreError> {
        (**self).list_movements(account_id, product_id).await
    }
}

impl StoreError {
    pub(crate) fn duplicate_movement(id: MovementId) -> Self {
        StoreError::DuplicateId(format!("movement {id} already exists"))
    }
}

/// Compare the stored version with the writer's expectation.
pub(crate) fn ensure_version(
    expected_version: ExpectedVersion,
    actual: u64,
) -> Result<(), StoreError> {
    expected_version.check(actual).map_err(|e| match e {
        DomainError::Conflict(msg) => StoreError::Concurrency(msg),
        other => StoreError::Concurrency(other.to_string()),
    })
}

/// Order movements newest first; ties resolve by the version they produced.
pub(crate) fn sort_newest_first(movements: &mut [Movement]) {
    movements.sort_by(|a, b| {
        b.occurred_at
            .cmp(&a.occurred_at)
            .then_with(|| b.product_version.cmp(&a.product_version))
            .then_with(|| b.movement_id.cmp(&a.movement_id))
    });
}
