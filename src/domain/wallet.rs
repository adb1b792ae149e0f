//! Wallet balances and their append-only transaction log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_CURRENCY: &str = "VND";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Wallet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub balance: i64,
    pub hold_balance: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            balance: 0,
            hold_balance: 0,
            currency: DEFAULT_CURRENCY.to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "wallet_tx_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WalletTxKind {
    Topup,
    Purchase,
    Hold,
    Release,
    Refund,
    Adjustment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "wallet_tx_direction", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "wallet_ref_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RefType {
    Order,
    OrderItem,
    Payment,
    Ticket,
}

/// What a ledger entry points back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRef {
    pub ref_type: RefType,
    pub ref_id: String,
}

impl LedgerRef {
    pub fn order(id: Uuid) -> Self {
        Self {
            ref_type: RefType::Order,
            ref_id: id.to_string(),
        }
    }

    pub fn order_item(id: Uuid) -> Self {
        Self {
            ref_type: RefType::OrderItem,
            ref_id: id.to_string(),
        }
    }

    pub fn payment(reference: impl Into<String>) -> Self {
        Self {
            ref_type: RefType::Payment,
            ref_id: reference.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub kind: WalletTxKind,
    pub ref_type: RefType,
    pub ref_id: String,
    pub direction: Direction,
    pub amount: i64,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WalletTransaction {
    pub fn new(
        wallet_id: Uuid,
        kind: WalletTxKind,
        direction: Direction,
        amount: i64,
        reference: &LedgerRef,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            wallet_id,
            kind,
            ref_type: reference.ref_type,
            ref_id: reference.ref_id.clone(),
            direction,
            amount,
            note,
            created_at: now,
        }
    }

    /// Effect of this entry on the spendable balance.
    pub fn balance_effect(&self) -> i64 {
        match (self.kind, self.direction) {
            (WalletTxKind::Release, Direction::Out) => 0,
            (_, Direction::In) => self.amount,
            (_, Direction::Out) => -self.amount,
        }
    }

    /// Effect of this entry on the escrow hold balance.
    pub fn hold_effect(&self) -> i64 {
        match (self.kind, self.direction) {
            (WalletTxKind::Hold, Direction::Out) => self.amount,
            (WalletTxKind::Release, Direction::Out) => -self.amount,
            (WalletTxKind::Refund, Direction::In) => -self.amount,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: WalletTxKind, direction: Direction, amount: i64) -> WalletTransaction {
        WalletTransaction::new(
            Uuid::new_v4(),
            kind,
            direction,
            amount,
            &LedgerRef::order(Uuid::new_v4()),
            None,
            Utc::now(),
        )
    }

    #[test]
    fn hold_then_refund_nets_to_zero() {
        let hold = entry(WalletTxKind::Hold, Direction::Out, 80_000);
        let refund = entry(WalletTxKind::Refund, Direction::In, 80_000);
        assert_eq!(hold.balance_effect() + refund.balance_effect(), 0);
        assert_eq!(hold.hold_effect() + refund.hold_effect(), 0);
    }

    #[test]
    fn release_only_touches_hold() {
        let release = entry(WalletTxKind::Release, Direction::Out, 40_000);
        assert_eq!(release.balance_effect(), 0);
        assert_eq!(release.hold_effect(), -40_000);
    }

    #[test]
    fn new_wallet_is_empty() {
        let wallet = Wallet::new(Uuid::new_v4(), Utc::now());
        assert_eq!(wallet.balance, 0);
        assert_eq!(wallet.hold_balance, 0);
        assert_eq!(wallet.currency, DEFAULT_CURRENCY);
    }
}
