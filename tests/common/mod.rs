#![allow(dead_code)]

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use uuid::Uuid;
use vaultmart_core::adapters::MemoryStore;
use vaultmart_core::crypto::SecretCipher;
use vaultmart_core::domain::{ManualClock, Product, ProductStatus, SecretType, Shop, Wallet};
use vaultmart_core::services::{CartLine, CreateOrderRequest, CreatedOrder, FeePolicy, Services};
use vaultmart_core::domain::PaymentMethod;

pub struct Market {
    pub store: MemoryStore,
    pub services: Services,
    pub clock: Arc<ManualClock>,
    pub platform_user: Uuid,
}

pub struct Listing {
    pub seller_id: Uuid,
    pub shop_id: Uuid,
    pub product: Product,
}

impl Market {
    pub fn new() -> Self {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap(),
        ));
        let platform_user = Uuid::new_v4();
        let services = Services::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(SecretCipher::generate()),
            clock.clone(),
            FeePolicy::new(500, Some(platform_user)),
        );
        Self {
            store,
            services,
            clock,
            platform_user,
        }
    }

    /// Approved product with `units` secrets in stock.
    pub async fn listing(&self, price: i64, units: usize) -> Listing {
        let seller_id = Uuid::new_v4();
        let shop = Shop {
            id: Uuid::new_v4(),
            owner_id: seller_id,
            name: format!("shop-{}", &seller_id.to_string()[..8]),
            total_sales: 0,
        };
        self.listing_in(shop, seller_id, price, units).await
    }

    /// Second product in the same shop but on another platform.
    pub async fn sibling(&self, listing: &Listing, price: i64, units: usize) -> Listing {
        let shop = Shop {
            id: listing.shop_id,
            owner_id: listing.seller_id,
            name: "sibling".to_string(),
            total_sales: 0,
        };
        self.listing_in(shop, listing.seller_id, price, units).await
    }

    async fn listing_in(&self, shop: Shop, seller_id: Uuid, price: i64, units: usize) -> Listing {
        let product = Product {
            id: Uuid::new_v4(),
            shop_id: shop.id,
            platform_id: Uuid::new_v4(),
            seller_id,
            name: "Premium account, 1 month".to_string(),
            price,
            status: ProductStatus::Approved,
            secret_type: SecretType::Account,
            deleted_at: None,
        };
        let shop_id = shop.id;
        self.store.insert_shop(shop).await;
        self.store.insert_product(product.clone()).await;
        for n in 0..units {
            self.services
                .inventory
                .add(seller_id, product.id, &format!("user{}@mail.test:pass{}", n, n))
                .await
                .unwrap();
        }
        Listing {
            seller_id,
            shop_id,
            product,
        }
    }

    pub async fn fund(&self, user_id: Uuid, amount: i64) -> Wallet {
        let wallet = self
            .services
            .ledger
            .get_or_create_wallet(user_id)
            .await
            .unwrap();
        self.services
            .ledger
            .top_up(wallet.id, amount, format!("seed:{}", Uuid::new_v4()), None)
            .await
            .unwrap()
            .wallet
    }

    pub async fn wallet(&self, user_id: Uuid) -> Option<Wallet> {
        self.store.snapshot().await.wallet_of(user_id).cloned()
    }

    pub async fn buy(
        &self,
        buyer_id: Uuid,
        lines: &[(Uuid, i64)],
        method: PaymentMethod,
    ) -> Result<CreatedOrder, vaultmart_core::error::AppError> {
        self.services
            .orders
            .create_order(CreateOrderRequest {
                buyer_id,
                items: lines
                    .iter()
                    .map(|(product_id, quantity)| CartLine {
                        product_id: *product_id,
                        quantity: *quantity,
                    })
                    .collect(),
                payment_method: method,
                idempotency_key: None,
            })
            .await
    }

    pub async fn available(&self, listing: &Listing) -> i64 {
        self.services
            .inventory
            .available_count(listing.product.id)
            .await
            .unwrap()
    }
}
