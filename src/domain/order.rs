//! Order aggregate root.
//! One order per checkout; its items carry the per-unit escrow state.

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const ORDER_CODE_PREFIX: &str = "ORD";
const ORDER_CODE_RANDOM_LEN: usize = 6;
const BASIS_POINTS: i64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    PendingPayment,
    Paid,
    Completed,
    Cancelled,
    Disputed,
    Refunded,
}

impl OrderStatus {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::Refunded
        )
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (PendingPayment, Paid)
                | (PendingPayment, Cancelled)
                | (Paid, Completed)
                | (Paid, Cancelled)
                | (Paid, Disputed)
                | (Paid, Refunded)
                | (Disputed, Completed)
                | (Disputed, Refunded)
                | (Disputed, Paid)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_method", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Wallet,
    Momo,
    Vnpay,
    Zalopay,
}

impl PaymentMethod {
    /// Wallet payments settle inside the order transaction.
    pub fn is_immediate(self) -> bool {
        matches!(self, PaymentMethod::Wallet)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Wallet => "wallet",
            PaymentMethod::Momo => "momo",
            PaymentMethod::Vnpay => "vnpay",
            PaymentMethod::Zalopay => "zalopay",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "cancel_actor", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CancelActor {
    Buyer,
    Seller,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
    pub id: Uuid,
    pub code: String,
    pub buyer_id: Uuid,
    pub total_amount: i64,
    pub fee_amount: i64,
    pub payable_amount: i64,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub payment_provider: Option<String>,
    pub external_txn_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<CancelActor>,
    pub cancel_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds a new order. Wallet orders are born paid; gateway orders wait
    /// for the payment callback.
    pub fn new(
        code: String,
        buyer_id: Uuid,
        total_amount: i64,
        fee_amount: i64,
        payment_method: PaymentMethod,
        idempotency_key: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let immediate = payment_method.is_immediate();
        Self {
            id: Uuid::new_v4(),
            code,
            buyer_id,
            total_amount,
            fee_amount,
            payable_amount: total_amount,
            status: if immediate {
                OrderStatus::Paid
            } else {
                OrderStatus::PendingPayment
            },
            payment_method,
            payment_provider: Some(payment_method.as_str().to_string()),
            external_txn_id: None,
            paid_at: immediate.then_some(now),
            cancelled_by: None,
            cancel_reason: None,
            cancelled_at: None,
            idempotency_key,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Percentage of `amount` expressed in basis points, rounded half up.
pub fn fee_for(amount: i64, fee_bps: u32) -> i64 {
    (amount * i64::from(fee_bps) + BASIS_POINTS / 2) / BASIS_POINTS
}

/// `ORD` + `yyMMddHHmmss` + six random uppercase alphanumerics.
pub fn generate_order_code(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ORDER_CODE_RANDOM_LEN)
        .map(|b| (b as char).to_ascii_uppercase())
        .collect();
    format!("{}{}{}", ORDER_CODE_PREFIX, now.format("%y%m%d%H%M%S"), suffix)
}
