//! Integration tests for the full ledger pipeline.
//!
//! Tests: Config → bootstrap → LedgerEngine → StockStore → reports/reconcile
//!
//! Verifies:
//! - The movement log always explains the stored stock
//! - Account isolation holds through the type-erased store
//! - Summary figures follow the committed movements

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rust_decimal::Decimal;

    use stockledger_core::AccountId;
    use stockledger_inventory::{CurrencyCode, Direction, MovementIntent, ProductDraft};

    use crate::bootstrap::build_engine;
    use crate::config::LedgerConfig;
    use crate::ledger::LedgerEngine;
    use crate::store::SharedStore;

    async fn setup() -> LedgerEngine<SharedStore> {
        build_engine(&LedgerConfig::default())
            .await
            .expect("in-memory engine")
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("tokio runtime")
    }

    fn bag(barcode: &str) -> ProductDraft {
        ProductDraft::new("Bag", barcode, Decimal::new(120, 0), Decimal::new(200, 0))
            .with_variant("red", 5)
            .with_variant("blue", 2)
    }

    #[tokio::test]
    async fn stock_life_cycle_is_fully_audited() {
        let engine = setup().await;
        let account = AccountId::new();
        let id = engine.define_product(account, bag("B-1")).await.unwrap().id_typed();

        engine
            .apply_movement(account, MovementIntent::outbound(id, 5).for_variant("red"))
            .await
            .unwrap();
        engine
            .apply_movement(account, MovementIntent::inbound(id, 4).for_variant("blue"))
            .await
            .unwrap();

        let report = engine.reconcile(account, id).await.unwrap();
        assert!(report.is_consistent());
        assert_eq!(report.movements_replayed, 2);
        assert_eq!(report.recorded.aggregate(), 6);

        // A revise starts a new baseline; earlier movements stop counting.
        engine
            .revise_product(account, id, bag("B-1").with_variant("green", 1))
            .await
            .unwrap();
        engine
            .apply_movement(account, MovementIntent::outbound(id, 1).for_variant("green"))
            .await
            .unwrap();

        let report = engine.reconcile(account, id).await.unwrap();
        assert!(report.is_consistent());
        assert_eq!(report.movements_replayed, 1);
        assert_eq!(report.recorded.aggregate(), 7);
        assert_eq!(engine.list_movements(account, Some(id)).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn accounts_never_see_each_other() {
        let engine = setup().await;
        let alice = AccountId::new();
        let bob = AccountId::new();

        let a = engine.define_product(alice, bag("SAME")).await.unwrap();
        let b = engine.define_product(bob, bag("SAME")).await.unwrap();
        engine
            .apply_movement(alice, MovementIntent::inbound(a.id_typed(), 3).for_variant("red"))
            .await
            .unwrap();

        let a_now = engine.get_product(alice, a.id_typed()).await.unwrap();
        assert_eq!(engine.list_products(alice).await.unwrap(), vec![a_now]);
        assert_eq!(engine.list_products(bob).await.unwrap(), vec![b]);
        assert!(engine.list_movements(bob, None).await.unwrap().is_empty());
        assert_eq!(engine.summary(bob).await.unwrap().inbound_movements, 0);
    }

    #[tokio::test]
    async fn summary_tracks_committed_movements() {
        let engine = setup().await;
        let account = AccountId::new();
        let bag_id = engine.define_product(account, bag("B-1")).await.unwrap().id_typed();
        engine
            .define_product(
                account,
                ProductDraft::new("Cap", "C-1", Decimal::new(50, 0), Decimal::new(80, 0))
                    .with_currency("usd")
                    .with_variant("one", 30),
            )
            .await
            .unwrap();

        engine
            .apply_movement(account, MovementIntent::inbound(bag_id, 10).for_variant("red"))
            .await
            .unwrap();
        engine
            .apply_movement(account, MovementIntent::outbound(bag_id, 1).for_variant("blue"))
            .await
            .unwrap();

        let summary = engine.summary(account).await.unwrap();
        assert_eq!(summary.products_count, 2);
        assert_eq!(summary.inbound_movements, 1);
        assert_eq!(summary.outbound_movements, 1);
        assert_eq!(summary.low_stock_count, 0);

        let mzn = &summary.valuation[&CurrencyCode::default()];
        assert_eq!(mzn.stock_value, Decimal::new(16 * 120, 0));
        assert_eq!(mzn.potential_revenue, Decimal::new(16 * 200, 0));
        let usd = &summary.valuation[&CurrencyCode::new("USD").unwrap()];
        assert_eq!(usd.stock_value, Decimal::new(30 * 50, 0));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn log_replay_always_matches_stored_stock(
            steps in prop::collection::vec((any::<bool>(), 1u64..8, prop::option::of(0usize..3)), 0..30)
        ) {
            let rt = runtime();
            rt.block_on(async {
                let engine = setup().await;
                let account = AccountId::new();
                let id = engine.define_product(account, bag("P")).await.unwrap().id_typed();
                let labels = ["red", "blue", "ghost"];

                let mut committed = 0usize;
                for (inbound, qty, label) in steps {
                    let direction = if inbound { Direction::Inbound } else { Direction::Outbound };
                    let mut intent = MovementIntent::new(id, direction, qty);
                    if let Some(idx) = label {
                        intent = intent.for_variant(labels[idx]);
                    }
                    if engine.apply_movement(account, intent).await.is_ok() {
                        committed += 1;
                    }
                }

                let report = engine.reconcile(account, id).await.unwrap();
                prop_assert!(report.is_consistent(), "{report:?}");
                prop_assert_eq!(report.movements_replayed, committed);

                let product = engine.get_product(account, id).await.unwrap();
                let variant_sum: u64 = product.variants().iter().map(|v| v.quantity()).sum();
                prop_assert_eq!(product.aggregate_stock(), variant_sum);
                Ok(())
            })?;
        }
    }
}
