use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use stockledger_core::{AccountId, AggregateRoot, ExpectedVersion};
use stockledger_inventory::{Movement, MovementId, Product, ProductId};

use super::r#trait::{StockStore, StoreError, ensure_version, sort_newest_first};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct ProductKey {
    account_id: AccountId,
    product_id: ProductId,
}

#[derive(Debug, Default)]
struct State {
    products: HashMap<ProductKey, Product>,
    /// Insertion order, for stable `list_products`.
    order: Vec<ProductKey>,
    movements: Vec<Movement>,
    movement_ids: HashMap<MovementId, usize>,
}

impl State {
    fn barcode_taken(&self, account_id: AccountId, barcode: &str, except: ProductId) -> bool {
        self.products.iter().any(|(key, p)| {
            key.account_id == account_id && key.product_id != except && p.barcode() == barcode
        })
    }

    fn check_replace(
        &self,
        key: ProductKey,
        product: &Product,
        expected_version: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let current = self
            .products
            .get(&key)
            .ok_or(StoreError::NotFound(key.product_id))?;

        ensure_version(expected_version, current.version())?;

        if self.barcode_taken(key.account_id, product.barcode(), key.product_id) {
            return Err(StoreError::DuplicateBarcode(product.barcode().to_string()));
        }

        Ok(())
    }

    fn push_movement(&mut self, movement: &Movement) {
        self.movement_ids
            .insert(movement.movement_id, self.movements.len());
        self.movements.push(movement.clone());
    }
}

/// In-memory stock store.
///
/// Intended for tests/dev. A single `RwLock` guards products and movements, so
/// every check-then-write below runs under one write guard.
#[derive(Debug, Default)]
pub struct InMemoryStockStore {
    state: RwLock<State>,
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn ensure_owned(account_id: AccountId, product: &Product) -> Result<ProductKey, StoreError> {
        if product.account_id() != Some(account_id) {
            return Err(StoreError::NotFound(product.id_typed()));
        }
        Ok(ProductKey {
            account_id,
            product_id: product.id_typed(),
        })
    }
}

#[async_trait]
impl StockStore for InMemoryStockStore {
    async fn get_product(
        &self,
        account_id: AccountId,
        product_id: ProductId,
    ) -> Result<Option<Product>, StoreError> {
        let state = self.read()?;
        Ok(state
            .products
            .get(&ProductKey {
                account_id,
                product_id,
            })
            .cloned())
    }

    async fn find_product_by_barcode(
        &self,
        account_id: AccountId,
        barcode: &str,
    ) -> Result<Option<Product>, StoreError> {
        let state = self.read()?;
        Ok(state
            .products
            .iter()
            .find(|(key, p)| key.account_id == account_id && p.barcode() == barcode)
            .map(|(_, p)| p.clone()))
    }

    async fn list_products(&self, account_id: AccountId) -> Result<Vec<Product>, StoreError> {
        let state = self.read()?;
        Ok(state
            .order
            .iter()
            .filter(|key| key.account_id == account_id)
            .filter_map(|key| state.products.get(key).cloned())
            .collect())
    }

    async fn insert_product(
        &self,
        account_id: AccountId,
        product: &Product,
    ) -> Result<(), StoreError> {
        if !product.is_defined() {
            return Err(StoreError::Corrupt("cannot store an undefined product".to_string()));
        }
        let key = Self::ensure_owned(account_id, product)?;

        let mut state = self.write()?;
        if state.products.contains_key(&key) {
            return Err(StoreError::DuplicateId(format!(
                "product {} already exists",
                key.product_id
            )));
        }
        if state.barcode_taken(account_id, product.barcode(), key.product_id) {
            return Err(StoreError::DuplicateBarcode(product.barcode().to_string()));
        }

        state.products.insert(key, product.clone());
        state.order.push(key);
        Ok(())
    }

    async fn put_product(
        &self,
        account_id: AccountId,
        product: &Product,
        expected_version: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let key = Self::ensure_owned(account_id, product)?;

        let mut state = self.write()?;
        state.check_replace(key, product, expected_version)?;
        state.products.insert(key, product.clone());
        Ok(())
    }

    async fn delete_product(
        &self,
        account_id: AccountId,
        product_id: ProductId,
    ) -> Result<bool, StoreError> {
        let key = ProductKey {
            account_id,
            product_id,
        };

        let mut state = self.write()?;
        let removed = state.products.remove(&key).is_some();
        if removed {
            state.order.retain(|k| *k != key);
        }
        Ok(removed)
    }

    async fn append_movement(&self, movement: &Movement) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if state.movement_ids.contains_key(&movement.movement_id) {
            return Err(StoreError::duplicate_movement(movement.movement_id));
        }
        state.push_movement(movement);
        Ok(())
    }

    async fn commit_movement(
        &self,
        account_id: AccountId,
        product: &Product,
        expected_version: ExpectedVersion,
        movement: &Movement,
    ) -> Result<(), StoreError> {
        let key = Self::ensure_owned(account_id, product)?;
        if movement.account_id != account_id || movement.product_id != key.product_id {
            return Err(StoreError::Corrupt(
                "movement does not belong to the committed product".to_string(),
            ));
        }

        // Validate everything first; mutate only once nothing can fail.
        let mut state = self.write()?;
        state.check_replace(key, product, expected_version)?;
        if state.movement_ids.contains_key(&movement.movement_id) {
            return Err(StoreError::duplicate_movement(movement.movement_id));
        }

        state.products.insert(key, product.clone());
        state.push_movement(movement);
        Ok(())
    }

    async fn list_movements(
        &self,
        account_id: AccountId,
        product_id: Option<ProductId>,
    ) -> Result<Vec<Movement>, StoreError> {
        let state = self.read()?;
        let mut movements: Vec<Movement> = state
            .movements
            .iter()
            .filter(|m| m.account_id == account_id)
            .filter(|m| product_id.is_none_or(|id| m.product_id == id))
            .cloned()
            .collect();
        sort_newest_first(&mut movements);
        Ok(movements)
    }
}
