//! Gateway payment settlement. The gateway protocol itself lives outside
//! this crate; verified callbacks land here.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::inventory::InventoryAllocator;
use super::ledger::{self, TopUpOutcome};
use super::orders::record_sales;
use crate::domain::{Clock, InventoryStatus, LedgerRef, Order, OrderItem, OrderStatus};
use crate::error::AppError;
use crate::ports::{within_transaction, SalesCounter, Store, UnitOfWork};
use crate::validation::{validate_positive_amount, validate_reference, PAYMENT_REF_MAX_LEN};

/// Verified gateway notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentCallback {
    /// Payment for a pending gateway order.
    OrderPayment {
        order_code: String,
        provider: String,
        external_txn_id: String,
        amount: i64,
    },
    /// Plain wallet top-up.
    WalletTopup {
        user_id: Uuid,
        provider: String,
        external_txn_id: String,
        amount: i64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettledOrder {
    pub order: Order,
    pub items: Vec<OrderItem>,
    /// The same gateway transaction was settled before.
    pub duplicate: bool,
    /// The order could not take the payment; the money went to the buyer's
    /// wallet instead and nothing was held or delivered.
    pub credited_to_wallet: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallbackOutcome {
    OrderPayment(SettledOrder),
    WalletTopup(TopUpOutcome),
}

fn payment_ref(provider: &str, external_txn_id: &str) -> String {
    format!("{}:{}", provider.to_lowercase(), external_txn_id)
}

struct Settlement {
    order_code: String,
    provider: String,
    external_txn_id: String,
    amount: i64,
    now: DateTime<Utc>,
}

/// Keeps a captured payment the order cannot absorb as spendable wallet
/// balance for the buyer.
async fn credit_buyer(
    uow: &mut dyn UnitOfWork,
    order: Order,
    settlement: &Settlement,
    reason: String,
) -> Result<SettledOrder, AppError> {
    let wallet = uow.get_or_create_wallet(order.buyer_id, settlement.now).await?;
    let credited = ledger::top_up(
        uow,
        wallet.id,
        settlement.amount,
        &payment_ref(&settlement.provider, &settlement.external_txn_id),
        Some(format!("unapplied payment for order {}", order.code)),
        settlement.now,
    )
    .await?;
    if !credited.duplicate {
        tracing::warn!(
            order_id = %order.id,
            amount = settlement.amount,
            reason = %reason,
            "payment credited to buyer wallet"
        );
    }

    let items = uow.list_order_items(order.id).await?;
    Ok(SettledOrder {
        order,
        items,
        duplicate: credited.duplicate,
        credited_to_wallet: true,
    })
}

async fn settle(
    uow: &mut dyn UnitOfWork,
    allocator: InventoryAllocator,
    settlement: Settlement,
) -> Result<SettledOrder, AppError> {
    let mut order = uow
        .lock_order_by_code(&settlement.order_code)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {}", settlement.order_code)))?;

    if order.status != OrderStatus::PendingPayment {
        if order.external_txn_id.as_deref() == Some(settlement.external_txn_id.as_str()) {
            let items = uow.list_order_items(order.id).await?;
            return Ok(SettledOrder {
                order,
                items,
                duplicate: true,
                credited_to_wallet: false,
            });
        }
        let reason = format!("order is {:?}, not awaiting payment", order.status);
        return credit_buyer(uow, order, &settlement, reason).await;
    }
    if !order
        .payment_method
        .as_str()
        .eq_ignore_ascii_case(&settlement.provider)
    {
        let reason = format!("order expects a {} payment", order.payment_method.as_str());
        return credit_buyer(uow, order, &settlement, reason).await;
    }
    if settlement.amount != order.payable_amount {
        let reason = format!(
            "paid amount {} does not match payable amount {}",
            settlement.amount, order.payable_amount
        );
        return credit_buyer(uow, order, &settlement, reason).await;
    }

    let Settlement {
        provider,
        external_txn_id,
        amount,
        now,
        ..
    } = settlement;
    let wallet = uow.get_or_create_wallet(order.buyer_id, now).await?;
    let credited = ledger::top_up(
        uow,
        wallet.id,
        amount,
        &payment_ref(&provider, &external_txn_id),
        Some(format!("payment for order {}", order.code)),
        now,
    )
    .await?;
    if credited.duplicate {
        // Already sitting in the wallet from an earlier unapplied callback
        let items = uow.list_order_items(order.id).await?;
        return Ok(SettledOrder {
            order,
            items,
            duplicate: true,
            credited_to_wallet: true,
        });
    }
    ledger::hold(uow, wallet.id, amount, &LedgerRef::order(order.id), now).await?;

    let pending = uow.list_order_items(order.id).await?;
    let unit_ids: Vec<Uuid> = pending.iter().map(|item| item.inventory_item_id).collect();
    let units = uow.find_inventory(&unit_ids).await?;
    uow.set_inventory_status(&unit_ids, InventoryStatus::Delivered, now)
        .await?;

    let mut items = Vec::with_capacity(pending.len());
    for mut item in pending {
        let masked = match units.iter().find(|unit| unit.id == item.inventory_item_id) {
            Some(unit) => Some(allocator.masked(unit)?),
            None => None,
        };
        item.mark_delivered(masked, now);
        items.push(uow.update_order_item(&item).await?);
    }

    order.status = OrderStatus::Paid;
    order.paid_at = Some(now);
    order.payment_provider = Some(provider.to_lowercase());
    order.external_txn_id = Some(external_txn_id);
    order.updated_at = now;
    let order = uow.update_order(&order).await?;

    Ok(SettledOrder {
        order,
        items,
        duplicate: false,
        credited_to_wallet: false,
    })
}

#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn Store>,
    sales: Arc<dyn SalesCounter>,
    allocator: InventoryAllocator,
    clock: Arc<dyn Clock>,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn Store>,
        sales: Arc<dyn SalesCounter>,
        allocator: InventoryAllocator,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            sales,
            allocator,
            clock,
        }
    }

    pub async fn handle_callback(&self, callback: PaymentCallback) -> Result<CallbackOutcome, AppError> {
        match callback {
            PaymentCallback::OrderPayment {
                order_code,
                provider,
                external_txn_id,
                amount,
            } => self
                .settle_order_payment(&order_code, &provider, &external_txn_id, amount)
                .await
                .map(CallbackOutcome::OrderPayment),
            PaymentCallback::WalletTopup {
                user_id,
                provider,
                external_txn_id,
                amount,
            } => self
                .top_up(user_id, &provider, &external_txn_id, amount)
                .await
                .map(CallbackOutcome::WalletTopup),
        }
    }

    /// Credits the buyer with the gateway payment and moves it straight into
    /// escrow, delivering the reserved units. A payment the order cannot take
    /// (no longer pending, wrong provider or amount) stays in the buyer's
    /// wallet.
    pub async fn settle_order_payment(
        &self,
        order_code: &str,
        provider: &str,
        external_txn_id: &str,
        amount: i64,
    ) -> Result<SettledOrder, AppError> {
        validate_positive_amount(amount)?;
        let settlement = Settlement {
            order_code: validate_reference("order_code", order_code, PAYMENT_REF_MAX_LEN)?,
            provider: validate_reference("provider", provider, PAYMENT_REF_MAX_LEN)?,
            external_txn_id: validate_reference("external_txn_id", external_txn_id, PAYMENT_REF_MAX_LEN)?,
            amount,
            now: self.clock.now(),
        };
        let allocator = self.allocator.clone();

        let settled = within_transaction(self.store.as_ref(), move |uow| {
            Box::pin(settle(uow, allocator, settlement))
        })
        .await?;

        if settled.duplicate {
            tracing::info!(order_id = %settled.order.id, "duplicate payment callback ignored");
            return Ok(settled);
        }
        if settled.credited_to_wallet {
            return Ok(settled);
        }

        tracing::info!(
            order_id = %settled.order.id,
            amount,
            provider = %provider,
            "order payment settled"
        );
        record_sales(self.sales.as_ref(), settled.order.id, &settled.items).await;
        Ok(settled)
    }

    /// Wallet top-up from a gateway. Repeated notifications credit once.
    pub async fn top_up(
        &self,
        user_id: Uuid,
        provider: &str,
        external_txn_id: &str,
        amount: i64,
    ) -> Result<TopUpOutcome, AppError> {
        let provider = validate_reference("provider", provider, PAYMENT_REF_MAX_LEN)?;
        let external_txn_id =
            validate_reference("external_txn_id", external_txn_id, PAYMENT_REF_MAX_LEN)?;
        let reference = payment_ref(&provider, &external_txn_id);
        let note = Some(format!("{} top-up", provider.to_lowercase()));
        let now = self.clock.now();

        let outcome = within_transaction(self.store.as_ref(), move |uow| {
            Box::pin(async move {
                let wallet = uow.get_or_create_wallet(user_id, now).await?;
                ledger::top_up(uow, wallet.id, amount, &reference, note, now).await
            })
        })
        .await?;

        tracing::info!(
            %user_id,
            wallet_id = %outcome.wallet.id,
            amount,
            duplicate = outcome.duplicate,
            "gateway top-up processed"
        );
        Ok(outcome)
    }
}
