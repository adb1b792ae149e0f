//! Escrow resolution: delivery confirmation, disputes, sweeps and secret
//! reveal. Every money movement goes through the ledger primitives.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::inventory::{self, InventoryAllocator};
use super::ledger::{self, FeePolicy, Payout};
use super::orders::{compensate, lock_order};
use crate::domain::escrow::{fee_share, settled_order_status};
use crate::domain::{
    CancelActor, Clock, EscrowStatus, HoldStatus, ItemStatus, LedgerRef, Order, OrderItem,
    OrderStatus, RevealedSecret, Wallet,
};
use crate::error::AppError;
use crate::ports::{within_transaction, Store, UnitOfWork};

/// Rows picked up per sweep pass.
pub const SWEEP_BATCH_SIZE: i64 = 100;

const EXPIRED_PAYMENT_REASON: &str = "payment window expired";

async fn lock_item(uow: &mut dyn UnitOfWork, order_item_id: Uuid) -> Result<OrderItem, AppError> {
    uow.lock_order_item(order_item_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order item {}", order_item_id)))
}

async fn buyer_wallet(uow: &mut dyn UnitOfWork, order: &Order) -> Result<Wallet, AppError> {
    uow.find_wallet_by_user(order.buyer_id)
        .await?
        .ok_or_else(|| {
            AppError::InvariantViolation(format!("order {} holds funds without a buyer wallet", order.id))
        })
}

/// Re-derives the order status from its items after one of them settled.
async fn settle_order(
    uow: &mut dyn UnitOfWork,
    mut order: Order,
    now: DateTime<Utc>,
) -> Result<Order, AppError> {
    let items = uow.list_order_items(order.id).await?;
    let next = settled_order_status(&items).or_else(|| {
        let still_disputed = items
            .iter()
            .any(|item| item.item_status == ItemStatus::Disputed);
        (order.status == OrderStatus::Disputed && !still_disputed).then_some(OrderStatus::Paid)
    });

    match next {
        Some(status) if status != order.status && order.status.can_transition_to(status) => {
            order.status = status;
            order.updated_at = now;
            Ok(uow.update_order(&order).await?)
        }
        _ => Ok(order),
    }
}

/// Completes a held item and pays its seller.
async fn release_item(
    uow: &mut dyn UnitOfWork,
    order: Order,
    mut item: OrderItem,
    policy: FeePolicy,
    now: DateTime<Utc>,
) -> Result<OrderItem, AppError> {
    let wallet = buyer_wallet(uow, &order).await?;
    let siblings = uow.list_order_items(order.id).await?;
    let payout = Payout {
        seller_user_id: item.seller_id,
        amount: item.hold_amount,
        fee: fee_share(order.fee_amount, &siblings, item.id),
    };
    ledger::release(
        uow,
        wallet.id,
        payout,
        policy,
        &LedgerRef::order_item(item.id),
        now,
    )
    .await?;
    item.mark_completed(now);
    let item = uow.update_order_item(&item).await?;
    settle_order(uow, order, now).await?;
    Ok(item)
}

#[derive(Clone)]
pub struct EscrowService {
    store: Arc<dyn Store>,
    allocator: InventoryAllocator,
    clock: Arc<dyn Clock>,
    policy: FeePolicy,
}

impl EscrowService {
    pub fn new(
        store: Arc<dyn Store>,
        allocator: InventoryAllocator,
        clock: Arc<dyn Clock>,
        policy: FeePolicy,
    ) -> Self {
        Self {
            store,
            allocator,
            clock,
            policy,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Buyer accepts a delivered item; its escrow goes to the seller.
    pub async fn confirm_delivery(
        &self,
        order_item_id: Uuid,
        buyer_id: Uuid,
    ) -> Result<OrderItem, AppError> {
        let now = self.clock.now();
        let policy = self.policy;

        let item = within_transaction(self.store.as_ref(), move |uow| {
            Box::pin(async move {
                let item = lock_item(uow, order_item_id).await?;
                let order = lock_order(uow, item.order_id).await?;
                if order.buyer_id != buyer_id {
                    return Err(AppError::Forbidden(format!(
                        "order item {} belongs to another buyer",
                        order_item_id
                    )));
                }
                if item.item_status != ItemStatus::Delivered || !item.is_holding() {
                    return Err(AppError::InvalidState(format!(
                        "order item {} is {:?} and cannot be confirmed",
                        order_item_id, item.item_status
                    )));
                }
                release_item(uow, order, item, policy, now).await
            })
        })
        .await?;

        tracing::info!(%order_item_id, order_id = %item.order_id, "delivery confirmed");
        Ok(item)
    }

    /// Escrow view of an order for its buyer or any of its sellers.
    pub async fn get_escrow_status(
        &self,
        order_id: Uuid,
        caller_id: Uuid,
    ) -> Result<EscrowStatus, AppError> {
        let now = self.clock.now();
        within_transaction(self.store.as_ref(), move |uow| {
            Box::pin(async move {
                let order = uow
                    .find_order(order_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("order {}", order_id)))?;
                let items = uow.list_order_items(order.id).await?;
                let visible = order.buyer_id == caller_id
                    || items.iter().any(|item| item.seller_id == caller_id);
                if !visible {
                    return Err(AppError::Forbidden(format!(
                        "order {} is not visible to this user",
                        order_id
                    )));
                }
                Ok(EscrowStatus::project(order.id, order.status, &items, now))
            })
        })
        .await
    }

    /// Buyer complaint on a delivered item still inside its warranty window.
    pub async fn open_dispute(
        &self,
        order_item_id: Uuid,
        buyer_id: Uuid,
    ) -> Result<OrderItem, AppError> {
        let now = self.clock.now();
        let item = within_transaction(self.store.as_ref(), move |uow| {
            Box::pin(async move {
                let mut item = lock_item(uow, order_item_id).await?;
                let mut order = lock_order(uow, item.order_id).await?;
                if order.buyer_id != buyer_id {
                    return Err(AppError::Forbidden(format!(
                        "order item {} belongs to another buyer",
                        order_item_id
                    )));
                }
                let eligible = item.is_holding()
                    && item.item_status == ItemStatus::Delivered
                    && now < item.safe_until;
                if !eligible {
                    return Err(AppError::InvalidState(format!(
                        "order item {} is not open for complaints",
                        order_item_id
                    )));
                }

                item.item_status = ItemStatus::Disputed;
                item.updated_at = now;
                let item = uow.update_order_item(&item).await?;
                if order.status.can_transition_to(OrderStatus::Disputed) {
                    order.status = OrderStatus::Disputed;
                    order.updated_at = now;
                    uow.update_order(&order).await?;
                }
                Ok(item)
            })
        })
        .await?;

        tracing::info!(%order_item_id, order_id = %item.order_id, "dispute opened");
        Ok(item)
    }

    /// Dispute closed in the seller's favour.
    pub async fn resolve_dispute_release(&self, order_item_id: Uuid) -> Result<OrderItem, AppError> {
        let now = self.clock.now();
        let policy = self.policy;
        let item = within_transaction(self.store.as_ref(), move |uow| {
            Box::pin(async move {
                let item = lock_item(uow, order_item_id).await?;
                ensure_disputed(&item)?;
                let order = lock_order(uow, item.order_id).await?;
                release_item(uow, order, item, policy, now).await
            })
        })
        .await?;

        tracing::info!(%order_item_id, "dispute resolved, escrow released");
        Ok(item)
    }

    /// Dispute closed in the buyer's favour. The exposed unit is revoked.
    pub async fn resolve_dispute_refund(&self, order_item_id: Uuid) -> Result<OrderItem, AppError> {
        let now = self.clock.now();
        let item = within_transaction(self.store.as_ref(), move |uow| {
            Box::pin(async move {
                let mut item = lock_item(uow, order_item_id).await?;
                ensure_disputed(&item)?;
                let order = lock_order(uow, item.order_id).await?;
                let wallet = buyer_wallet(uow, &order).await?;
                ledger::refund(
                    uow,
                    wallet.id,
                    item.hold_amount,
                    &LedgerRef::order_item(item.id),
                    now,
                )
                .await?;
                item.mark_refunded(now);
                let item = uow.update_order_item(&item).await?;
                inventory::revoke(uow, &[item.inventory_item_id], now).await?;
                settle_order(uow, order, now).await?;
                Ok(item)
            })
        })
        .await?;

        tracing::info!(%order_item_id, "dispute resolved, escrow refunded");
        Ok(item)
    }

    /// Pays out every delivered item whose warranty window ended by `now`.
    /// Each item settles in its own transaction; failures are logged and
    /// left for the next pass.
    pub async fn release_expired_holds(&self, now: DateTime<Utc>) -> Result<usize, AppError> {
        let due = within_transaction(self.store.as_ref(), move |uow| {
            Box::pin(async move { Ok(uow.list_expired_holds(now, SWEEP_BATCH_SIZE).await?) })
        })
        .await?;

        let mut released = 0;
        for candidate in due {
            let order_item_id = candidate.id;
            let policy = self.policy;
            let result = within_transaction(self.store.as_ref(), move |uow| {
                Box::pin(async move {
                    let item = lock_item(uow, order_item_id).await?;
                    let still_due = item.hold_status == HoldStatus::Holding
                        && item.item_status == ItemStatus::Delivered
                        && item.safe_until <= now;
                    if !still_due {
                        return Ok(false);
                    }
                    let order = lock_order(uow, item.order_id).await?;
                    release_item(uow, order, item, policy, now).await?;
                    Ok(true)
                })
            })
            .await;

            match result {
                Ok(true) => released += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(%order_item_id, error = %e, "failed to auto-release escrow");
                }
            }
        }

        if released > 0 {
            tracing::info!(released, "expired escrow holds released");
        }
        Ok(released)
    }

    /// Cancels gateway orders left unpaid for longer than `ttl`.
    pub async fn expire_pending_orders(
        &self,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<usize, AppError> {
        let cutoff = now - ttl;
        let stale = within_transaction(self.store.as_ref(), move |uow| {
            Box::pin(async move {
                Ok(uow
                    .list_orders_created_before(OrderStatus::PendingPayment, cutoff, SWEEP_BATCH_SIZE)
                    .await?)
            })
        })
        .await?;

        let mut expired = 0;
        for candidate in stale {
            let order_id = candidate.id;
            let result = within_transaction(self.store.as_ref(), move |uow| {
                Box::pin(async move {
                    let order = lock_order(uow, order_id).await?;
                    if order.status != OrderStatus::PendingPayment || order.created_at >= cutoff {
                        return Ok(false);
                    }
                    let items = uow.list_order_items(order.id).await?;
                    compensate(
                        uow,
                        order,
                        items,
                        CancelActor::System,
                        EXPIRED_PAYMENT_REASON.to_string(),
                        now,
                    )
                    .await?;
                    Ok(true)
                })
            })
            .await;

            match result {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(e) => tracing::error!(%order_id, error = %e, "failed to expire pending order"),
            }
        }

        if expired > 0 {
            tracing::info!(expired, "unpaid orders expired");
        }
        Ok(expired)
    }

    /// Decrypted secrets of the buyer's delivered items. The first reveal of
    /// each item is stamped.
    pub async fn reveal_secrets(
        &self,
        order_id: Uuid,
        buyer_id: Uuid,
    ) -> Result<Vec<RevealedSecret>, AppError> {
        let now = self.clock.now();
        let allocator = self.allocator.clone();

        let secrets = within_transaction(self.store.as_ref(), move |uow| {
            Box::pin(async move {
                let order = lock_order(uow, order_id).await?;
                if order.buyer_id != buyer_id {
                    return Err(AppError::Forbidden(format!(
                        "order {} belongs to another buyer",
                        order_id
                    )));
                }

                let items: Vec<OrderItem> = uow
                    .list_order_items(order.id)
                    .await?
                    .into_iter()
                    .filter(|item| {
                        matches!(
                            item.item_status,
                            ItemStatus::Delivered | ItemStatus::Completed | ItemStatus::Disputed
                        )
                    })
                    .collect();
                let unit_ids: Vec<Uuid> = items.iter().map(|item| item.inventory_item_id).collect();
                let units = uow.find_inventory(&unit_ids).await?;

                let mut secrets = Vec::with_capacity(items.len());
                for mut item in items {
                    let unit = units
                        .iter()
                        .find(|unit| unit.id == item.inventory_item_id)
                        .ok_or_else(|| {
                            AppError::Internal(format!(
                                "inventory unit {} of order item {} is missing",
                                item.inventory_item_id, item.id
                            ))
                        })?;
                    secrets.push(RevealedSecret {
                        inventory_item_id: unit.id,
                        order_item_id: Some(item.id),
                        secret_type: unit.secret_type,
                        status: unit.status,
                        secret: allocator.reveal(unit)?,
                    });
                    if item.revealed_at.is_none() {
                        item.revealed_at = Some(now);
                        item.updated_at = now;
                        uow.update_order_item(&item).await?;
                    }
                }
                Ok(secrets)
            })
        })
        .await?;

        tracing::info!(%order_id, count = secrets.len(), "secrets revealed");
        Ok(secrets)
    }
}

fn ensure_disputed(item: &OrderItem) -> Result<(), AppError> {
    if item.item_status != ItemStatus::Disputed || !item.is_holding() {
        return Err(AppError::InvalidState(format!(
            "order item {} has no open dispute",
            item.id
        )));
    }
    Ok(())
}
