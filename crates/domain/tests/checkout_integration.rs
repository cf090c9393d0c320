//! Integration tests for cart, checkout and order persistence.
//!
//! These tests exercise the public API against the in-memory backends,
//! including concurrent checkouts competing for the same stock.

use std::sync::Arc;

use domain::{
    AuthenticatedUser, CartService, Currency, DomainError, Money, OrderError, OrderFactory,
    OrderRepository, OrderStatus, PaymentStatus, ShippingInfo, StockReleaser, UserId,
};
use storage::{InMemoryDocumentStore, InMemoryStockLedger, ProductRecord, StockLedger};

struct Shop {
    carts: CartService<InMemoryDocumentStore, InMemoryStockLedger>,
    orders: OrderRepository<InMemoryDocumentStore>,
    factory: OrderFactory<InMemoryDocumentStore, InMemoryStockLedger>,
    ledger: InMemoryStockLedger,
}

async fn shop(products: &[(&str, &str, i64, u32)]) -> Shop {
    let store = InMemoryDocumentStore::new();
    let ledger = InMemoryStockLedger::new();
    for (id, name, price, available) in products {
        ledger
            .upsert_product(ProductRecord::new(*id, *name, *price, *available))
            .await
            .unwrap();
    }

    let carts = CartService::new(store.clone(), ledger.clone());
    let orders = OrderRepository::new(store);
    let factory = OrderFactory::new(carts.clone(), orders.clone(), Currency::default());
    Shop {
        carts,
        orders,
        factory,
        ledger,
    }
}

fn shipping() -> ShippingInfo {
    ShippingInfo {
        full_name: "Grace Hopper".to_string(),
        address: "1 Compiler Way".to_string(),
        city: "Arlington".to_string(),
        state: "VA".to_string(),
        zip_code: "22201".to_string(),
        country: "US".to_string(),
    }
}

async fn available(ledger: &InMemoryStockLedger, product: &str) -> u32 {
    ledger
        .product(&product.into())
        .await
        .unwrap()
        .unwrap()
        .available
}

mod checkout {
    use super::*;

    #[tokio::test]
    async fn test_two_widgets_and_a_gadget_total_25_dollars() {
        let shop = shop(&[("A", "Widget", 1000, 10), ("B", "Gadget", 500, 10)]).await;
        let user = AuthenticatedUser::new(UserId::new()).with_email("grace@example.com");

        shop.carts.add_item(user.user_id, "A".into(), 2).await.unwrap();
        shop.carts.add_item(user.user_id, "B".into(), 1).await.unwrap();
        let order = shop.factory.checkout(&user, shipping()).await.unwrap();

        assert_eq!(order.total(), Money::from_cents(2500));
        assert_eq!(order.total().to_string(), "$25.00");
        assert_eq!(available(&shop.ledger, "A").await, 8);
        assert_eq!(available(&shop.ledger, "B").await, 9);

        let subtotal_sum: i64 = order
            .items()
            .iter()
            .map(|i| i.subtotal().unwrap().cents())
            .sum();
        assert_eq!(order.total().cents(), subtotal_sum);
    }

    #[tokio::test]
    async fn test_order_items_are_frozen_at_checkout() {
        let shop = shop(&[("A", "Widget", 1000, 10)]).await;
        let user = AuthenticatedUser::new(UserId::new());
        shop.carts.add_item(user.user_id, "A".into(), 1).await.unwrap();
        let order = shop.factory.checkout(&user, shipping()).await.unwrap();

        // Reprice the product after checkout
        shop.ledger
            .upsert_product(ProductRecord::new("A", "Widget", 9999, 9))
            .await
            .unwrap();

        let stored = shop.orders.get(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.items()[0].unit_price, Money::from_cents(1000));
        assert_eq!(stored.total(), Money::from_cents(1000));
    }

    #[tokio::test]
    async fn test_second_checkout_of_same_cart_is_empty() {
        let shop = shop(&[("A", "Widget", 1000, 10)]).await;
        let user = AuthenticatedUser::new(UserId::new());
        shop.carts.add_item(user.user_id, "A".into(), 1).await.unwrap();

        shop.factory.checkout(&user, shipping()).await.unwrap();
        let second = shop.factory.checkout(&user, shipping()).await;

        assert!(matches!(
            second,
            Err(DomainError::Order(OrderError::EmptyCart))
        ));
        assert_eq!(available(&shop.ledger, "A").await, 9);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_checkouts_never_oversell() {
        const BUYERS: u32 = 10;
        let shop = Arc::new(shop(&[("A", "Widget", 1000, BUYERS)]).await);

        // Each buyer adds 1 unit while stock is still BUYERS
        let mut users = Vec::new();
        for _ in 0..BUYERS {
            let user = AuthenticatedUser::new(UserId::new());
            shop.carts.add_item(user.user_id, "A".into(), 1).await.unwrap();
            users.push(user);
        }
        // Stock drops to BUYERS - 1 before anyone checks out
        shop.ledger.try_decrement(&"A".into(), 1).await.unwrap();

        let mut handles = Vec::new();
        for user in users {
            let shop = Arc::clone(&shop);
            handles.push(tokio::spawn(async move {
                shop.factory.checkout(&user, shipping()).await
            }));
        }

        let mut succeeded = 0;
        let mut insufficient = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(DomainError::Order(OrderError::InsufficientStock { .. })) => insufficient += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(succeeded, BUYERS - 1);
        assert_eq!(insufficient, 1);
        assert_eq!(available(&shop.ledger, "A").await, 0);
    }
}

mod orders {
    use super::*;

    #[tokio::test]
    async fn test_users_only_see_their_own_orders() {
        let shop = shop(&[("A", "Widget", 1000, 10)]).await;
        let alice = AuthenticatedUser::new(UserId::new());
        let bob = AuthenticatedUser::new(UserId::new());

        for _ in 0..3 {
            shop.carts.add_item(alice.user_id, "A".into(), 1).await.unwrap();
            shop.factory.checkout(&alice, shipping()).await.unwrap();
        }
        shop.carts.add_item(bob.user_id, "A".into(), 1).await.unwrap();
        let bobs = shop.factory.checkout(&bob, shipping()).await.unwrap();

        let alices = shop.orders.list_for_user(alice.user_id, 0, 10).await.unwrap();
        assert_eq!(alices.len(), 3);
        assert!(alices.windows(2).all(|w| w[0].created_at() >= w[1].created_at()));

        assert!(matches!(
            shop.orders.get_for_user(alice.user_id, bobs.id()).await,
            Err(DomainError::Order(OrderError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_cancelled_order_returns_stock_once() {
        let shop = shop(&[("A", "Widget", 1000, 5)]).await;
        let user = AuthenticatedUser::new(UserId::new());
        shop.carts.add_item(user.user_id, "A".into(), 2).await.unwrap();
        let order = shop.factory.checkout(&user, shipping()).await.unwrap();
        assert_eq!(available(&shop.ledger, "A").await, 3);

        shop.orders
            .update(order.id(), |o| o.expire_reservation("reservation expired"))
            .await
            .unwrap();
        let releaser = StockReleaser::new(shop.orders.clone(), shop.ledger.clone());
        releaser.release(order.id()).await.unwrap();
        releaser.release(order.id()).await.unwrap();

        assert_eq!(available(&shop.ledger, "A").await, 5);
        let stored = shop.orders.get(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), OrderStatus::Cancelled);
        assert_eq!(stored.payment_status(), PaymentStatus::Failed);
    }
}

mod shared_carts {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use domain::CHECKOUT_ABANDONED;
    use storage::{Document, DocumentQuery, DocumentStore, PutOptions, StorageError, Version};

    use super::*;

    type Carts = CartService<InMemoryDocumentStore, InMemoryStockLedger>;

    /// Store seen by one server instance while another instance writes the
    /// same carts through its own `CartService`, with its own locks.
    #[derive(Clone)]
    struct SharedStore {
        inner: InMemoryDocumentStore,
        other_instance: Arc<Carts>,
        user_id: UserId,
        /// Add a Gizmo from the other instance right after the next order insert.
        add_after_order: Arc<AtomicBool>,
        /// Fail every cart write with a version conflict.
        cart_always_stale: Arc<AtomicBool>,
    }

    #[async_trait]
    impl DocumentStore for SharedStore {
        async fn put(&self, document: Document, options: PutOptions) -> storage::Result<Version> {
            if document.collection == "carts" && self.cart_always_stale.load(Ordering::SeqCst) {
                return Err(StorageError::ConcurrencyConflict {
                    collection: document.collection,
                    key: document.key,
                    expected: options.expected_version.unwrap_or(Version::initial()),
                    actual: Version::new(i64::MAX),
                });
            }

            let is_order = document.collection == "orders";
            let version = self.inner.put(document, options).await?;
            if is_order && self.add_after_order.swap(false, Ordering::SeqCst) {
                self.other_instance
                    .add_item(self.user_id, "C".into(), 1)
                    .await
                    .unwrap();
            }
            Ok(version)
        }

        async fn get(&self, collection: &str, key: &str) -> storage::Result<Option<Document>> {
            self.inner.get(collection, key).await
        }

        async fn query(&self, query: DocumentQuery) -> storage::Result<Vec<Document>> {
            self.inner.query(query).await
        }
    }

    struct Instance {
        store: SharedStore,
        carts: CartService<SharedStore, InMemoryStockLedger>,
        orders: OrderRepository<SharedStore>,
        factory: OrderFactory<SharedStore, InMemoryStockLedger>,
        ledger: InMemoryStockLedger,
        user: AuthenticatedUser,
    }

    async fn instance() -> Instance {
        let inner = InMemoryDocumentStore::new();
        let ledger = InMemoryStockLedger::new();
        for (id, name, price) in [("A", "Widget", 1000), ("B", "Gadget", 500), ("C", "Gizmo", 2499)] {
            ledger
                .upsert_product(ProductRecord::new(id, name, price, 10))
                .await
                .unwrap();
        }

        let user = AuthenticatedUser::new(UserId::new());
        let store = SharedStore {
            inner: inner.clone(),
            other_instance: Arc::new(CartService::new(inner, ledger.clone())),
            user_id: user.user_id,
            add_after_order: Arc::new(AtomicBool::new(false)),
            cart_always_stale: Arc::new(AtomicBool::new(false)),
        };
        let carts = CartService::new(store.clone(), ledger.clone());
        let orders = OrderRepository::new(store.clone());
        let factory = OrderFactory::new(carts.clone(), orders.clone(), Currency::default());

        carts.add_item(user.user_id, "A".into(), 2).await.unwrap();
        carts.add_item(user.user_id, "B".into(), 1).await.unwrap();

        Instance {
            store,
            carts,
            orders,
            factory,
            ledger,
            user,
        }
    }

    #[tokio::test]
    async fn test_cart_written_elsewhere_during_checkout_keeps_only_new_lines() {
        let shop = instance().await;
        shop.store.add_after_order.store(true, Ordering::SeqCst);

        let order = shop.factory.checkout(&shop.user, shipping()).await.unwrap();

        assert_eq!(order.total(), Money::from_cents(2500));
        let cart = shop.carts.get_cart(shop.user.user_id).await.unwrap();
        let lines: Vec<_> = cart
            .items()
            .map(|i| (i.product_id.as_str().to_string(), i.quantity))
            .collect();
        assert_eq!(lines, vec![("C".to_string(), 1)]);

        // Checking out again orders the new line only
        let second = shop.factory.checkout(&shop.user, shipping()).await.unwrap();
        assert_eq!(second.items().len(), 1);
        assert_eq!(second.total(), Money::from_cents(2499));
        assert_eq!(available(&shop.ledger, "A").await, 8);
        assert_eq!(available(&shop.ledger, "B").await, 9);
        assert_eq!(available(&shop.ledger, "C").await, 9);
    }

    #[tokio::test]
    async fn test_cart_that_cannot_be_cleared_abandons_the_order() {
        let shop = instance().await;
        shop.store.cart_always_stale.store(true, Ordering::SeqCst);

        let result = shop.factory.checkout(&shop.user, shipping()).await;

        assert!(matches!(
            result,
            Err(DomainError::ConflictRetriesExhausted { .. })
        ));
        assert_eq!(available(&shop.ledger, "A").await, 10);
        assert_eq!(available(&shop.ledger, "B").await, 10);

        let orders = shop.orders.list_for_user(shop.user.user_id, 0, 10).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status(), OrderStatus::Cancelled);
        assert_eq!(orders[0].payment_status(), PaymentStatus::Failed);
        assert_eq!(orders[0].cancellation_reason(), Some(CHECKOUT_ABANDONED));
        assert!(orders[0].stock_released());

        let cart = shop.carts.get_cart(shop.user.user_id).await.unwrap();
        assert_eq!(cart.item_count(), 2);
    }
}
