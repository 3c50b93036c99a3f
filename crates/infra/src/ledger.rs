//! Ledger engine (application-level orchestration).
//!
//! Every write follows the same pipeline:
//!
//! ```text
//! Request
//!   ↓
//! 1. Validate caller input (ProductDraft -> ProductDefinition)
//!   ↓
//! 2. Load the product (account-scoped)
//!   ↓
//! 3. Handle command (pure decision, produces events)
//!   ↓
//! 4. Apply events to a copy (version + 1 per event)
//!   ↓
//! 5. Commit with ExpectedVersion::Exact(loaded version)
//! ```
//!
//! A `Conflict` at step 5 means another writer committed first; the engine
//! reloads and repeats steps 2-5, up to `RetryPolicy::max_attempts` in total.
//! Every other error is returned as-is and nothing has been written.

use thiserror::Error;
use tracing::{debug, instrument, warn};

use stockledger_core::{
    AccountId, Aggregate, AggregateId, AggregateRoot, Clock, DomainError, ExpectedVersion,
    SystemClock,
};
use stockledger_inventory::{
    CurrencyCode, DefineProduct, MoveStock, Movement, MovementId, MovementIntent, Product,
    ProductCommand, ProductDefinition, ProductDraft, ProductEvent, ProductId, Reconciliation,
    ReviseProduct, reconcile,
};

use crate::reports::{StockSummary, SummaryOptions, summarize};
use crate::store::{StockStore, StoreError};

/// Public error of the ledger engine.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("product not found")]
    NotFound,

    #[error("barcode '{0}' is already used by another product")]
    DuplicateBarcode(String),

    #[error("invalid price: {0}")]
    InvalidPrice(String),

    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("unknown variant '{0}'")]
    UnknownVariant(String),

    #[error("product tracks variants; a variant label is required")]
    VariantRequired,

    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: u64, available: u64 },

    #[error("validation failed: {0}")]
    Validation(String),

    /// Concurrent writers kept winning until the retry budget ran out.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Store(StoreError),
}

impl LedgerError {
    /// Stable machine-readable code.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::NotFound => "not_found",
            LedgerError::DuplicateBarcode(_) => "duplicate_barcode",
            LedgerError::InvalidPrice(_) => "invalid_price",
            LedgerError::InvalidQuantity(_) => "invalid_quantity",
            LedgerError::UnknownVariant(_) => "unknown_variant",
            LedgerError::VariantRequired => "variant_required",
            LedgerError::InsufficientStock { .. } => "insufficient_stock",
            LedgerError::Validation(_) => "validation",
            LedgerError::Conflict(_) => "conflict",
            LedgerError::Store(_) => "store",
        }
    }
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => LedgerError::Validation(msg),
            DomainError::InvalidPrice(msg) => LedgerError::InvalidPrice(msg),
            DomainError::InvalidQuantity(msg) => LedgerError::InvalidQuantity(msg),
            DomainError::UnknownVariant(label) => LedgerError::UnknownVariant(label),
            DomainError::VariantRequired => LedgerError::VariantRequired,
            DomainError::InsufficientStock {
                requested,
                available,
            } => LedgerError::InsufficientStock {
                requested,
                available,
            },
            DomainError::InvariantViolation(msg) => {
                LedgerError::Validation(format!("invariant violated: {msg}"))
            }
            DomainError::InvalidId(msg) => LedgerError::Validation(msg),
            DomainError::NotFound => LedgerError::NotFound,
            DomainError::Conflict(msg) => LedgerError::Conflict(msg),
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(_) => LedgerError::NotFound,
            StoreError::DuplicateBarcode(barcode) => LedgerError::DuplicateBarcode(barcode),
            StoreError::Concurrency(msg) => LedgerError::Conflict(msg),
            other => LedgerError::Store(other),
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Bounded retry budget for version conflicts.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total commit attempts, including the first one.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

/// The ledger engine.
///
/// Holds no state of its own beyond configuration; all state lives in the
/// store, so one engine can be shared across tasks behind an `Arc`.
#[derive(Debug)]
pub struct LedgerEngine<S, C = SystemClock> {
    store: S,
    clock: C,
    retry: RetryPolicy,
    default_currency: CurrencyCode,
    summary_options: SummaryOptions,
}

impl<S> LedgerEngine<S, SystemClock> {
    pub fn new(store: S) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<S, C> LedgerEngine<S, C> {
    pub fn with_clock(store: S, clock: C) -> Self {
        Self {
            store,
            clock,
            retry: RetryPolicy::default(),
            default_currency: CurrencyCode::default(),
            summary_options: SummaryOptions::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_default_currency(mut self, currency: CurrencyCode) -> Self {
        self.default_currency = currency;
        self
    }

    pub fn with_summary_options(mut self, options: SummaryOptions) -> Self {
        self.summary_options = options;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }
}

impl<S, C> LedgerEngine<S, C>
where
    S: StockStore,
    C: Clock,
{
    /// Create a product from a caller draft.
    #[instrument(skip(self, draft), fields(account_id = %account_id, barcode = %draft.barcode), err)]
    pub async fn define_product(
        &self,
        account_id: AccountId,
        draft: ProductDraft,
    ) -> LedgerResult<Product> {
        let definition = draft.validate(&self.default_currency)?;
        let product_id = ProductId::new(AggregateId::new());

        let mut product = Product::empty(product_id);
        let events = product.handle(&ProductCommand::DefineProduct(DefineProduct {
            account_id,
            product_id,
            definition,
            occurred_at: self.clock.now(),
        }))?;
        for event in &events {
            product.apply(event);
        }

        self.store.insert_product(account_id, &product).await?;
        debug!(product_id = %product_id, stock = product.aggregate_stock(), "product defined");
        Ok(product)
    }

    /// Replace a product's definition. Stock is reset to the new variant list
    /// and no movement is recorded.
    #[instrument(skip(self, draft), fields(account_id = %account_id, product_id = %product_id), err)]
    pub async fn revise_product(
        &self,
        account_id: AccountId,
        product_id: ProductId,
        draft: ProductDraft,
    ) -> LedgerResult<Product> {
        let definition = draft.validate(&self.default_currency)?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_revise(account_id, product_id, &definition).await {
                Err(LedgerError::Conflict(reason)) if attempt < self.retry.max_attempts => {
                    warn!(attempt, %reason, "version conflict on revise; retrying");
                }
                result => return result,
            }
        }
    }

    /// Record one stock movement and update the product's levels with it.
    #[instrument(
        skip(self, intent),
        fields(
            account_id = %account_id,
            product_id = %intent.product_id,
            direction = %intent.direction,
            quantity = intent.quantity
        ),
        err
    )]
    pub async fn apply_movement(
        &self,
        account_id: AccountId,
        intent: MovementIntent,
    ) -> LedgerResult<Movement> {
        let movement_id = MovementId::new();

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_move(account_id, movement_id, &intent).await {
                Err(LedgerError::Conflict(reason)) if attempt < self.retry.max_attempts => {
                    warn!(attempt, %reason, "version conflict on movement; retrying");
                }
                result => return result,
            }
        }
    }

    pub async fn get_product(
        &self,
        account_id: AccountId,
        product_id: ProductId,
    ) -> LedgerResult<Product> {
        self.load(account_id, product_id).await
    }

    pub async fn list_products(&self, account_id: AccountId) -> LedgerResult<Vec<Product>> {
        Ok(self.store.list_products(account_id).await?)
    }

    pub async fn find_product_by_barcode(
        &self,
        account_id: AccountId,
        barcode: &str,
    ) -> LedgerResult<Option<Product>> {
        Ok(self
            .store
            .find_product_by_barcode(account_id, barcode.trim())
            .await?)
    }

    /// Remove a product. Its movements stay in the log.
    #[instrument(skip(self), fields(account_id = %account_id, product_id = %product_id), err)]
    pub async fn delete_product(
        &self,
        account_id: AccountId,
        product_id: ProductId,
    ) -> LedgerResult<()> {
        if self.store.delete_product(account_id, product_id).await? {
            Ok(())
        } else {
            Err(LedgerError::NotFound)
        }
    }

    /// Movements of an account (or of one product), newest first.
    pub async fn list_movements(
        &self,
        account_id: AccountId,
        product_id: Option<ProductId>,
    ) -> LedgerResult<Vec<Movement>> {
        Ok(self.store.list_movements(account_id, product_id).await?)
    }

    #[instrument(skip(self), fields(account_id = %account_id), err)]
    pub async fn summary(&self, account_id: AccountId) -> LedgerResult<StockSummary> {
        let products = self.store.list_products(account_id).await?;
        let movements = self.store.list_movements(account_id, None).await?;
        Ok(summarize(&products, &movements, &self.summary_options)?)
    }

    /// Replay a product's log onto its baseline and compare with the stored levels.
    #[instrument(skip(self), fields(account_id = %account_id, product_id = %product_id), err)]
    pub async fn reconcile(
        &self,
        account_id: AccountId,
        product_id: ProductId,
    ) -> LedgerResult<Reconciliation> {
        let product = self.load(account_id, product_id).await?;
        let movements = self
            .store
            .list_movements(account_id, Some(product_id))
            .await?;

        let report = reconcile(&product, &movements);
        if !report.is_consistent() {
            warn!(
                missing_versions = ?report.missing_versions,
                "stored stock does not match the movement log"
            );
        }
        Ok(report)
    }

    async fn load(&self, account_id: AccountId, product_id: ProductId) -> LedgerResult<Product> {
        self.store
            .get_product(account_id, product_id)
            .await?
            .ok_or(LedgerError::NotFound)
    }

    async fn try_revise(
        &self,
        account_id: AccountId,
        product_id: ProductId,
        definition: &ProductDefinition,
    ) -> LedgerResult<Product> {
        let current = self.load(account_id, product_id).await?;
        let expected = ExpectedVersion::Exact(current.version());

        let events = current.handle(&ProductCommand::ReviseProduct(ReviseProduct {
            account_id,
            product_id,
            definition: definition.clone(),
            occurred_at: self.clock.now(),
        }))?;
        let mut next = current;
        for event in &events {
            next.apply(event);
        }

        self.store.put_product(account_id, &next, expected).await?;
        debug!(version = next.version(), stock = next.aggregate_stock(), "product revised");
        Ok(next)
    }

    async fn try_move(
        &self,
        account_id: AccountId,
        movement_id: MovementId,
        intent: &MovementIntent,
    ) -> LedgerResult<Movement> {
        let current = self.load(account_id, intent.product_id).await?;
        let expected = ExpectedVersion::Exact(current.version());

        let events = current.handle(&ProductCommand::MoveStock(MoveStock {
            account_id,
            product_id: intent.product_id,
            movement_id,
            direction: intent.direction,
            quantity: intent.quantity,
            variant_label: intent.variant_label.clone(),
            note: intent.note.clone(),
            occurred_at: self.clock.now(),
        }))?;

        let mut next = current;
        let mut movement = None;
        for event in &events {
            next.apply(event);
            if let ProductEvent::StockMoved(moved) = event {
                movement = Some(Movement::from_event(moved, next.version()));
            }
        }
        let movement = movement
            .ok_or_else(|| DomainError::invariant("stock command produced no movement"))?;

        self.store
            .commit_movement(account_id, &next, expected, &movement)
            .await?;
        debug!(
            movement_id = %movement.movement_id,
            version = movement.product_version,
            stock = next.aggregate_stock(),
            "movement committed"
        );
        Ok(movement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;
    use stockledger_core::FixedClock;
    use stockledger_inventory::Direction;

    use crate::store::InMemoryStockStore;

    fn engine() -> LedgerEngine<InMemoryStockStore, FixedClock> {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        LedgerEngine::with_clock(
            InMemoryStockStore::new(),
            FixedClock::with_step(start, Duration::seconds(1)),
        )
    }

    fn draft(barcode: &str) -> ProductDraft {
        ProductDraft::new("Bag", barcode, Decimal::new(100, 0), Decimal::new(150, 0))
    }

    #[tokio::test]
    async fn define_assigns_id_and_sums_variants() {
        let engine = engine();
        let account = AccountId::new();

        let product = engine
            .define_product(
                account,
                draft("B-1").with_variant("red", 5).with_variant("blue", 2),
            )
            .await
            .unwrap();

        assert_eq!(product.aggregate_stock(), 7);
        assert_eq!(product.version(), 1);
        assert_eq!(
            product.definition().unwrap().currency,
            CurrencyCode::new("MZN").unwrap()
        );
        let loaded = engine.get_product(account, product.id_typed()).await.unwrap();
        assert_eq!(loaded, product);
    }

    #[tokio::test]
    async fn define_rejects_bad_prices_without_writing() {
        let engine = engine();
        let account = AccountId::new();

        let err = engine
            .define_product(
                account,
                ProductDraft::new("Bag", "B-1", Decimal::ZERO, Decimal::ONE),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "invalid_price");
        assert!(engine.list_products(account).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn barcode_is_unique_within_an_account_only() {
        let engine = engine();
        let account = AccountId::new();
        engine.define_product(account, draft("X1")).await.unwrap();

        let err = engine.define_product(account, draft("X1")).await.unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateBarcode(_)));

        engine
            .define_product(AccountId::new(), draft("X1"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn variant_outbound_updates_variant_and_aggregate() {
        let engine = engine();
        let account = AccountId::new();
        let product = engine
            .define_product(
                account,
                draft("B-1").with_variant("red", 5).with_variant("blue", 2),
            )
            .await
            .unwrap();
        let id = product.id_typed();

        let movement = engine
            .apply_movement(account, MovementIntent::outbound(id, 5).for_variant("red"))
            .await
            .unwrap();
        assert_eq!(movement.product_version, 2);
        assert_eq!(movement.direction, Direction::Outbound);

        let after = engine.get_product(account, id).await.unwrap();
        assert_eq!(after.aggregate_stock(), 2);
        assert_eq!(after.stock().variant("red").unwrap().quantity(), 0);
        assert_eq!(after.stock().variant("blue").unwrap().quantity(), 2);

        let err = engine
            .apply_movement(account, MovementIntent::outbound(id, 1).for_variant("red"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientStock {
                requested: 1,
                available: 0
            }
        ));
        assert_eq!(engine.get_product(account, id).await.unwrap(), after);
        assert_eq!(engine.list_movements(account, Some(id)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejected_movements_change_nothing() {
        let engine = engine();
        let account = AccountId::new();
        let plain = engine.define_product(account, draft("P")).await.unwrap();
        let colored = engine
            .define_product(account, draft("C").with_variant("red", 3))
            .await
            .unwrap();

        let attempts = [
            (MovementIntent::outbound(plain.id_typed(), 1), "insufficient_stock"),
            (MovementIntent::inbound(plain.id_typed(), 0), "invalid_quantity"),
            (MovementIntent::inbound(plain.id_typed(), u64::MAX), "invalid_quantity"),
            (MovementIntent::inbound(colored.id_typed(), 1), "variant_required"),
            (
                MovementIntent::inbound(colored.id_typed(), 1).for_variant("green"),
                "unknown_variant",
            ),
            (
                MovementIntent::inbound(ProductId::new(AggregateId::new()), 1),
                "not_found",
            ),
        ];
        for (intent, kind) in attempts {
            let err = engine.apply_movement(account, intent).await.unwrap_err();
            assert_eq!(err.kind(), kind);
        }

        assert_eq!(engine.get_product(account, plain.id_typed()).await.unwrap(), plain);
        assert_eq!(engine.get_product(account, colored.id_typed()).await.unwrap(), colored);
        assert!(engine.list_movements(account, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn products_of_other_accounts_are_not_found() {
        let engine = engine();
        let owner = AccountId::new();
        let product = engine.define_product(owner, draft("B-1")).await.unwrap();
        let stranger = AccountId::new();

        let id = product.id_typed();
        assert_eq!(engine.get_product(stranger, id).await.unwrap_err().kind(), "not_found");
        assert_eq!(
            engine
                .apply_movement(stranger, MovementIntent::inbound(id, 1))
                .await
                .unwrap_err()
                .kind(),
            "not_found"
        );
        assert_eq!(
            engine
                .revise_product(stranger, id, draft("B-2"))
                .await
                .unwrap_err()
                .kind(),
            "not_found"
        );
        assert_eq!(engine.delete_product(stranger, id).await.unwrap_err().kind(), "not_found");
        assert!(engine.find_product_by_barcode(stranger, "B-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn revise_resets_stock_without_a_movement() {
        let engine = engine();
        let account = AccountId::new();
        let product = engine
            .define_product(account, draft("B-1").with_variant("a", 3).with_variant("b", 2))
            .await
            .unwrap();
        assert_eq!(product.aggregate_stock(), 5);

        let revised = engine
            .revise_product(account, product.id_typed(), draft("B-1").with_variant("a", 0))
            .await
            .unwrap();

        assert_eq!(revised.aggregate_stock(), 0);
        assert_eq!(revised.variants().len(), 1);
        assert_eq!(revised.version(), 2);
        assert!(engine.list_movements(account, None).await.unwrap().is_empty());
        assert!(engine.reconcile(account, product.id_typed()).await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn revise_cannot_take_another_products_barcode() {
        let engine = engine();
        let account = AccountId::new();
        engine.define_product(account, draft("TAKEN")).await.unwrap();
        let product = engine.define_product(account, draft("MINE")).await.unwrap();

        let err = engine
            .revise_product(account, product.id_typed(), draft("TAKEN"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "duplicate_barcode");

        let kept = engine
            .revise_product(account, product.id_typed(), draft("MINE"))
            .await
            .unwrap();
        assert_eq!(kept.barcode(), "MINE");
    }

    #[tokio::test]
    async fn delete_keeps_movement_history() {
        let engine = engine();
        let account = AccountId::new();
        let product = engine.define_product(account, draft("B-1")).await.unwrap();
        let id = product.id_typed();
        engine
            .apply_movement(account, MovementIntent::inbound(id, 4).with_note("restock"))
            .await
            .unwrap();

        engine.delete_product(account, id).await.unwrap();

        assert_eq!(engine.get_product(account, id).await.unwrap_err().kind(), "not_found");
        assert_eq!(engine.delete_product(account, id).await.unwrap_err().kind(), "not_found");
        let log = engine.list_movements(account, Some(id)).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].note.as_deref(), Some("restock"));
    }

    #[tokio::test]
    async fn movements_are_listed_newest_first() {
        let engine = engine();
        let account = AccountId::new();
        let id = engine
            .define_product(account, draft("B-1"))
            .await
            .unwrap()
            .id_typed();

        for qty in 1..=3 {
            engine
                .apply_movement(account, MovementIntent::inbound(id, qty))
                .await
                .unwrap();
        }

        let quantities: Vec<u64> = engine
            .list_movements(account, None)
            .await
            .unwrap()
            .iter()
            .map(|m| m.quantity)
            .collect();
        assert_eq!(quantities, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn find_by_barcode_trims_input() {
        let engine = engine();
        let account = AccountId::new();
        let product = engine.define_product(account, draft("B-1")).await.unwrap();

        let found = engine.find_product_by_barcode(account, "  B-1 ").await.unwrap();
        assert_eq!(found.map(|p| p.id_typed()), Some(product.id_typed()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_outbounds_never_oversell() {
        let engine = Arc::new(LedgerEngine::new(InMemoryStockStore::new()));
        let account = AccountId::new();
        let id = engine
            .define_product(account, draft("B-1"))
            .await
            .unwrap()
            .id_typed();
        engine
            .apply_movement(account, MovementIntent::inbound(id, 10))
            .await
            .unwrap();

        let barrier = Arc::new(tokio::sync::Barrier::new(2));
        let mut handles = Vec::new();
        for _ in 0..2 {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                engine
                    .apply_movement(account, MovementIntent::outbound(id, 6))
                    .await
            }));
        }

        let mut ok = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(e) => assert!(
                    matches!(e.kind(), "insufficient_stock" | "conflict"),
                    "unexpected error: {e}"
                ),
            }
        }

        assert_eq!(ok, 1);
        assert_eq!(engine.get_product(account, id).await.unwrap().aggregate_stock(), 4);
        let outbound = engine
            .list_movements(account, Some(id))
            .await
            .unwrap()
            .into_iter()
            .filter(|m| m.direction == Direction::Outbound)
            .count();
        assert_eq!(outbound, 1);
        assert!(engine.reconcile(account, id).await.unwrap().is_consistent());
    }

    /// Delegates to an in-memory store but fails every commit with a
    /// version conflict.
    struct AlwaysStale {
        inner: InMemoryStockStore,
        commits: AtomicU32,
    }

    #[async_trait]
    impl StockStore for AlwaysStale {
        async fn get_product(
            &self,
            account_id: AccountId,
            product_id: ProductId,
        ) -> Result<Option<Product>, StoreError> {
            self.inner.get_product(account_id, product_id).await
        }

        async fn find_product_by_barcode(
            &self,
            account_id: AccountId,
            barcode: &str,
        ) -> Result<Option<Product>, StoreError> {
            self.inner.find_product_by_barcode(account_id, barcode).await
        }

        async fn list_products(&self, account_id: AccountId) -> Result<Vec<Product>, StoreError> {
            self.inner.list_products(account_id).await
        }

        async fn insert_product(
            &self,
            account_id: AccountId,
            product: &Product,
        ) -> Result<(), StoreError> {
            self.inner.insert_product(account_id, product).await
        }

        async fn put_product(
            &self,
            _account_id: AccountId,
            _product: &Product,
            _expected_version: ExpectedVersion,
        ) -> Result<(), StoreError> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Concurrency("stale".to_string()))
        }

        async fn delete_product(
            &self,
            account_id: AccountId,
            product_id: ProductId,
        ) -> Result<bool, StoreError> {
            self.inner.delete_product(account_id, product_id).await
        }

        async fn append_movement(&self, movement: &Movement) -> Result<(), StoreError> {
            self.inner.append_movement(movement).await
        }

        async fn commit_movement(
            &self,
            _account_id: AccountId,
            _product: &Product,
            _expected_version: ExpectedVersion,
            _movement: &Movement,
        ) -> Result<(), StoreError> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Concurrency("stale".to_string()))
        }

        async fn list_movements(
            &self,
            account_id: AccountId,
            product_id: Option<ProductId>,
        ) -> Result<Vec<Movement>, StoreError> {
            self.inner.list_movements(account_id, product_id).await
        }
    }

    #[tokio::test]
    async fn conflicts_surface_after_the_retry_budget() {
        let store = Arc::new(AlwaysStale {
            inner: InMemoryStockStore::new(),
            commits: AtomicU32::new(0),
        });
        let engine = LedgerEngine::new(Arc::clone(&store)).with_retry(RetryPolicy { max_attempts: 4 });
        let account = AccountId::new();
        let id = engine
            .define_product(account, draft("B-1"))
            .await
            .unwrap()
            .id_typed();

        let err = engine
            .apply_movement(account, MovementIntent::inbound(id, 1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");
        assert_eq!(store.commits.load(Ordering::SeqCst), 4);

        let err = engine
            .revise_product(account, id, draft("B-1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");
        assert_eq!(store.commits.load(Ordering::SeqCst), 8);
        assert!(engine.list_movements(account, None).await.unwrap().is_empty());
    }

    #[test]
    fn domain_errors_keep_their_kind() {
        let cases = [
            (DomainError::invalid_price("0"), "invalid_price"),
            (DomainError::invalid_quantity("0"), "invalid_quantity"),
            (DomainError::unknown_variant("x"), "unknown_variant"),
            (DomainError::VariantRequired, "variant_required"),
            (DomainError::insufficient_stock(2, 1), "insufficient_stock"),
            (DomainError::not_found(), "not_found"),
            (DomainError::conflict("stale"), "conflict"),
            (DomainError::validation("empty"), "validation"),
        ];
        for (domain, kind) in cases {
            assert_eq!(LedgerError::from(domain).kind(), kind);
        }

        assert_eq!(
            LedgerError::from(StoreError::Backend("down".into())).kind(),
            "store"
        );
        assert_eq!(
            LedgerError::from(StoreError::Concurrency("stale".into())).kind(),
            "conflict"
        );
    }
}
