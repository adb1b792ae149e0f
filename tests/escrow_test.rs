mod common;

use chrono::Duration;
use common::Market;
use uuid::Uuid;
use vaultmart_core::domain::{
    CancelActor, HoldStatus, InventoryStatus, ItemStatus, OrderStatus, PaymentMethod,
    WalletTxKind,
};
use vaultmart_core::error::{AppError, ErrorKind};

#[tokio::test]
async fn test_confirm_requires_delivered_item() {
    let market = Market::new();
    let listing = market.listing(40_000, 1).await;
    let buyer = Uuid::new_v4();
    let created = market
        .buy(buyer, &[(listing.product.id, 1)], PaymentMethod::Zalopay)
        .await
        .unwrap();
    let item_id = created.items[0].id;

    let err = market
        .services
        .escrow
        .confirm_delivery(item_id, buyer)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    let state = market.store.snapshot().await;
    let item = &state.order_items[&item_id];
    assert_eq!(item.item_status, ItemStatus::WaitingDelivery);
    assert_eq!(item.hold_status, HoldStatus::Holding);
}

#[tokio::test]
async fn test_confirm_pays_seller_minus_fee() {
    let market = Market::new();
    let listing = market.listing(40_000, 1).await;
    let buyer = Uuid::new_v4();
    market.fund(buyer, 100_000).await;
    let created = market
        .buy(buyer, &[(listing.product.id, 1)], PaymentMethod::Wallet)
        .await
        .unwrap();

    // Only the buyer may confirm
    let err = market
        .services
        .escrow
        .confirm_delivery(created.items[0].id, listing.seller_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let item = market
        .services
        .escrow
        .confirm_delivery(created.items[0].id, buyer)
        .await
        .unwrap();
    assert_eq!(item.item_status, ItemStatus::Completed);
    assert_eq!(item.hold_status, HoldStatus::Released);
    assert!(item.completed_at.is_some());

    let buyer_wallet = market.wallet(buyer).await.unwrap();
    assert_eq!(buyer_wallet.balance, 60_000);
    assert_eq!(buyer_wallet.hold_balance, 0);
    assert_eq!(market.wallet(listing.seller_id).await.unwrap().balance, 38_000);
    assert_eq!(market.wallet(market.platform_user).await.unwrap().balance, 2_000);

    let state = market.store.snapshot().await;
    assert_eq!(state.orders[&created.order.id].status, OrderStatus::Completed);
    let releases = state
        .txs_of(buyer_wallet.id)
        .into_iter()
        .filter(|tx| tx.kind == WalletTxKind::Release)
        .count();
    assert_eq!(releases, 1);

    // Released funds cannot be released twice
    let err = market
        .services
        .escrow
        .confirm_delivery(created.items[0].id, buyer)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
}

#[tokio::test]
async fn test_escrow_status_projection() {
    let market = Market::new();
    let listing = market.listing(20_000, 2).await;
    let buyer = Uuid::new_v4();
    market.fund(buyer, 40_000).await;
    let created = market
        .buy(buyer, &[(listing.product.id, 2)], PaymentMethod::Wallet)
        .await
        .unwrap();
    market
        .services
        .escrow
        .confirm_delivery(created.items[0].id, buyer)
        .await
        .unwrap();
    market.clock.advance(Duration::hours(10));

    let status = market
        .services
        .escrow
        .get_escrow_status(created.order.id, buyer)
        .await
        .unwrap();
    assert_eq!(status.order_status, OrderStatus::Paid);
    assert_eq!(status.summary.holding, 20_000);
    assert_eq!(status.summary.released, 20_000);
    assert_eq!(status.summary.refunded, 0);

    let open = status
        .items
        .iter()
        .find(|item| item.hold_status == HoldStatus::Holding)
        .unwrap();
    assert_eq!(open.escrow_ends_at - open.hold_at, Duration::hours(72));
    assert_eq!(open.time_remaining_secs, 62 * 3600);
    assert!(open.can_complaint);

    let closed = status
        .items
        .iter()
        .find(|item| item.hold_status == HoldStatus::Released)
        .unwrap();
    assert_eq!(closed.time_remaining_secs, 0);
    assert!(!closed.can_complaint);

    // Sellers on the order can see it too, strangers cannot
    market
        .services
        .escrow
        .get_escrow_status(created.order.id, listing.seller_id)
        .await
        .unwrap();
    let err = market
        .services
        .escrow
        .get_escrow_status(created.order.id, Uuid::new_v4())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
}

#[tokio::test]
async fn test_dispute_refund_and_release() {
    let market = Market::new();
    let listing = market.listing(30_000, 2).await;
    let buyer = Uuid::new_v4();
    market.fund(buyer, 60_000).await;
    let created = market
        .buy(buyer, &[(listing.product.id, 2)], PaymentMethod::Wallet)
        .await
        .unwrap();
    let first = created.items[0].id;
    let second = created.items[1].id;

    let disputed = market
        .services
        .escrow
        .open_dispute(first, buyer)
        .await
        .unwrap();
    assert_eq!(disputed.item_status, ItemStatus::Disputed);
    let state = market.store.snapshot().await;
    assert_eq!(state.orders[&created.order.id].status, OrderStatus::Disputed);

    // No open dispute on the second item
    let err = market
        .services
        .escrow
        .resolve_dispute_refund(second)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    let refunded = market
        .services
        .escrow
        .resolve_dispute_refund(first)
        .await
        .unwrap();
    assert_eq!(refunded.item_status, ItemStatus::Refunded);
    assert_eq!(refunded.hold_status, HoldStatus::Refunded);

    let wallet = market.wallet(buyer).await.unwrap();
    assert_eq!(wallet.balance, 30_000);
    assert_eq!(wallet.hold_balance, 30_000);

    let state = market.store.snapshot().await;
    assert_eq!(
        state.inventory[&refunded.inventory_item_id].status,
        InventoryStatus::Revoked
    );
    assert_eq!(state.orders[&created.order.id].status, OrderStatus::Paid);

    // Second item goes through a dispute settled for the seller
    market
        .services
        .escrow
        .open_dispute(second, buyer)
        .await
        .unwrap();
    let released = market
        .services
        .escrow
        .resolve_dispute_release(second)
        .await
        .unwrap();
    assert_eq!(released.item_status, ItemStatus::Completed);
    assert_eq!(market.wallet(listing.seller_id).await.unwrap().balance, 28_500);
    assert_eq!(market.wallet(market.platform_user).await.unwrap().balance, 1_500);

    let wallet = market.wallet(buyer).await.unwrap();
    assert_eq!(wallet.balance, 30_000);
    assert_eq!(wallet.hold_balance, 0);
    let state = market.store.snapshot().await;
    assert_eq!(state.orders[&created.order.id].status, OrderStatus::Completed);
}

#[tokio::test]
async fn test_dispute_closes_with_warranty() {
    let market = Market::new();
    let listing = market.listing(10_000, 1).await;
    let buyer = Uuid::new_v4();
    market.fund(buyer, 10_000).await;
    let created = market
        .buy(buyer, &[(listing.product.id, 1)], PaymentMethod::Wallet)
        .await
        .unwrap();

    market.clock.advance(Duration::days(7));
    let err = market
        .services
        .escrow
        .open_dispute(created.items[0].id, buyer)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
}

#[tokio::test]
async fn test_expired_holds_are_released() {
    let market = Market::new();
    let listing = market.listing(40_000, 2).await;
    let buyer = Uuid::new_v4();
    market.fund(buyer, 80_000).await;
    let created = market
        .buy(buyer, &[(listing.product.id, 2)], PaymentMethod::Wallet)
        .await
        .unwrap();
    market
        .services
        .escrow
        .open_dispute(created.items[1].id, buyer)
        .await
        .unwrap();

    let escrow = &market.services.escrow;
    let released = escrow
        .release_expired_holds(escrow.now() + Duration::days(6))
        .await
        .unwrap();
    assert_eq!(released, 0);

    market.clock.advance(Duration::days(7));
    let released = escrow.release_expired_holds(escrow.now()).await.unwrap();
    assert_eq!(released, 1);
    assert_eq!(market.wallet(listing.seller_id).await.unwrap().balance, 38_000);

    // Disputed item stays held; nothing more to do
    let released = escrow.release_expired_holds(escrow.now()).await.unwrap();
    assert_eq!(released, 0);

    let state = market.store.snapshot().await;
    assert_eq!(
        state.order_items[&created.items[1].id].hold_status,
        HoldStatus::Holding
    );
    assert_eq!(state.orders[&created.order.id].status, OrderStatus::Disputed);
    assert_eq!(market.wallet(buyer).await.unwrap().hold_balance, 40_000);
}

#[tokio::test]
async fn test_released_fees_match_order_fee() {
    let market = Market::new();
    let listing = market.listing(10, 3).await;
    let buyer = Uuid::new_v4();
    market.fund(buyer, 100).await;
    let created = market
        .buy(buyer, &[(listing.product.id, 3)], PaymentMethod::Wallet)
        .await
        .unwrap();
    // 5% of 30 rounds to 2, while 5% of each 10 would round to 1
    assert_eq!(created.order.fee_amount, 2);

    for item in &created.items {
        market
            .services
            .escrow
            .confirm_delivery(item.id, buyer)
            .await
            .unwrap();
    }

    let platform = market.wallet(market.platform_user).await.unwrap();
    assert_eq!(platform.balance, created.order.fee_amount);
    assert_eq!(market.wallet(listing.seller_id).await.unwrap().balance, 28);
    let state = market.store.snapshot().await;
    assert_eq!(state.orders[&created.order.id].status, OrderStatus::Completed);
}

#[tokio::test]
async fn test_unpaid_orders_expire() {
    let market = Market::new();
    let listing = market.listing(40_000, 1).await;
    let buyer = Uuid::new_v4();
    let created = market
        .buy(buyer, &[(listing.product.id, 1)], PaymentMethod::Momo)
        .await
        .unwrap();
    assert_eq!(market.available(&listing).await, 0);

    let escrow = &market.services.escrow;
    let ttl = Duration::minutes(30);
    market.clock.advance(Duration::minutes(20));
    assert_eq!(escrow.expire_pending_orders(escrow.now(), ttl).await.unwrap(), 0);

    market.clock.advance(Duration::minutes(11));
    assert_eq!(escrow.expire_pending_orders(escrow.now(), ttl).await.unwrap(), 1);

    let state = market.store.snapshot().await;
    let order = &state.orders[&created.order.id];
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(order.cancelled_by, Some(CancelActor::System));
    assert_eq!(market.available(&listing).await, 1);

    // A late callback for the expired order still lands in the buyer's wallet
    let late = market
        .services
        .payments
        .settle_order_payment(&created.order.code, "momo", "MOMO-LATE", 40_000)
        .await
        .unwrap();
    assert!(late.credited_to_wallet);
    assert!(!late.duplicate);
    assert_eq!(late.order.status, OrderStatus::Cancelled);
    let wallet = market.wallet(buyer).await.unwrap();
    assert_eq!(wallet.balance, 40_000);
    assert_eq!(wallet.hold_balance, 0);
    assert_eq!(market.available(&listing).await, 1);

    let retried = market
        .services
        .payments
        .settle_order_payment(&created.order.code, "momo", "MOMO-LATE", 40_000)
        .await
        .unwrap();
    assert!(retried.duplicate);
    assert_eq!(market.wallet(buyer).await.unwrap().balance, 40_000);
}

#[tokio::test]
async fn test_reveal_secrets_stamps_first_reveal() {
    let market = Market::new();
    let listing = market.listing(12_000, 1).await;
    let buyer = Uuid::new_v4();
    market.fund(buyer, 12_000).await;
    let created = market
        .buy(buyer, &[(listing.product.id, 1)], PaymentMethod::Wallet)
        .await
        .unwrap();

    let err = market
        .services
        .escrow
        .reveal_secrets(created.order.id, Uuid::new_v4())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let secrets = market
        .services
        .escrow
        .reveal_secrets(created.order.id, buyer)
        .await
        .unwrap();
    assert_eq!(secrets.len(), 1);
    assert_eq!(secrets[0].secret, "user0@mail.test:pass0");
    assert_eq!(secrets[0].order_item_id, Some(created.items[0].id));

    let first_reveal = market.store.snapshot().await.order_items[&created.items[0].id]
        .revealed_at
        .unwrap();

    market.clock.advance(Duration::hours(1));
    market
        .services
        .escrow
        .reveal_secrets(created.order.id, buyer)
        .await
        .unwrap();
    let state = market.store.snapshot().await;
    assert_eq!(
        state.order_items[&created.items[0].id].revealed_at,
        Some(first_reveal)
    );
}
