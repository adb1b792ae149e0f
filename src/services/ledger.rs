//! Wallet ledger: balance/hold movements and their append-only log.
//!
//! The free functions run inside a caller's unit of work so the order
//! orchestrator can combine them with inventory and order writes. The
//! [`WalletLedger`] methods wrap them in their own transaction.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::order::fee_for;
use crate::domain::{Clock, Direction, LedgerRef, Wallet, WalletTransaction, WalletTxKind};
use crate::error::AppError;
use crate::ports::{within_transaction, Store, UnitOfWork};
use crate::validation::{validate_positive_amount, validate_reference, NOTE_MAX_LEN, PAYMENT_REF_MAX_LEN};

pub const DEFAULT_HISTORY_LIMIT: i64 = 50;
pub const MAX_HISTORY_LIMIT: i64 = 200;

/// Platform fee settings applied when escrow is released to a seller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeePolicy {
    pub fee_bps: u32,
    pub platform_user_id: Option<Uuid>,
}

impl FeePolicy {
    pub fn new(fee_bps: u32, platform_user_id: Option<Uuid>) -> Self {
        Self {
            fee_bps,
            platform_user_id,
        }
    }

    /// Fee recorded on the order. Releasing every item withholds exactly
    /// this much when a platform wallet is configured.
    pub fn order_fee(&self, total: i64) -> i64 {
        fee_for(total, self.fee_bps)
    }

    /// Nothing is withheld when no platform wallet exists to receive it.
    pub fn withheld(&self, fee: i64) -> i64 {
        match self.platform_user_id {
            Some(_) => fee,
            None => 0,
        }
    }
}

/// One escrow payout: the held amount and the part of it kept as fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payout {
    pub seller_user_id: Uuid,
    pub amount: i64,
    pub fee: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseOutcome {
    pub buyer_wallet: Wallet,
    pub seller_wallet: Wallet,
    pub seller_credit: i64,
    pub fee: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopUpOutcome {
    pub wallet: Wallet,
    /// The payment reference was already credited; nothing moved.
    pub duplicate: bool,
}

async fn apply_delta(
    uow: &mut dyn UnitOfWork,
    wallet_id: Uuid,
    balance_delta: i64,
    hold_delta: i64,
    op: &'static str,
    now: DateTime<Utc>,
) -> Result<Wallet, AppError> {
    match uow
        .apply_wallet_delta(wallet_id, balance_delta, hold_delta, now)
        .await?
    {
        Some(wallet) => Ok(wallet),
        None => {
            tracing::error!(
                target: "ledger_invariant",
                %wallet_id,
                balance_delta,
                hold_delta,
                op,
                "wallet mutation would drive a balance negative"
            );
            Err(AppError::InvariantViolation(format!(
                "{} would drive wallet {} negative",
                op, wallet_id
            )))
        }
    }
}

async fn record(
    uow: &mut dyn UnitOfWork,
    wallet_id: Uuid,
    kind: WalletTxKind,
    direction: Direction,
    amount: i64,
    reference: &LedgerRef,
    note: Option<String>,
    now: DateTime<Utc>,
) -> Result<WalletTransaction, AppError> {
    let entry = WalletTransaction::new(wallet_id, kind, direction, amount, reference, note, now);
    Ok(uow.append_wallet_tx(&entry).await?)
}

/// Moves `amount` from the spendable balance into escrow.
pub async fn hold(
    uow: &mut dyn UnitOfWork,
    wallet_id: Uuid,
    amount: i64,
    reference: &LedgerRef,
    now: DateTime<Utc>,
) -> Result<Wallet, AppError> {
    validate_positive_amount(amount)?;
    let wallet = apply_delta(uow, wallet_id, -amount, amount, "hold", now).await?;
    record(uow, wallet_id, WalletTxKind::Hold, Direction::Out, amount, reference, None, now).await?;
    tracing::debug!(%wallet_id, amount, ref_id = %reference.ref_id, "funds held");
    Ok(wallet)
}

/// Returns held funds to the same wallet's spendable balance.
pub async fn refund(
    uow: &mut dyn UnitOfWork,
    wallet_id: Uuid,
    amount: i64,
    reference: &LedgerRef,
    now: DateTime<Utc>,
) -> Result<Wallet, AppError> {
    validate_positive_amount(amount)?;
    let wallet = apply_delta(uow, wallet_id, amount, -amount, "refund", now).await?;
    record(uow, wallet_id, WalletTxKind::Refund, Direction::In, amount, reference, None, now).await?;
    tracing::debug!(%wallet_id, amount, ref_id = %reference.ref_id, "hold refunded");
    Ok(wallet)
}

/// Pays held funds out to the seller, less the platform fee.
pub async fn release(
    uow: &mut dyn UnitOfWork,
    buyer_wallet_id: Uuid,
    payout: Payout,
    policy: FeePolicy,
    reference: &LedgerRef,
    now: DateTime<Utc>,
) -> Result<ReleaseOutcome, AppError> {
    let Payout {
        seller_user_id,
        amount,
        fee,
    } = payout;
    validate_positive_amount(amount)?;
    let fee = policy.withheld(fee);
    if !(0..=amount).contains(&fee) {
        return Err(AppError::InvalidInput(format!(
            "fee {} must be between 0 and the released amount {}",
            fee, amount
        )));
    }
    let seller_credit = amount - fee;

    let buyer_wallet = apply_delta(uow, buyer_wallet_id, 0, -amount, "release", now).await?;
    record(
        uow,
        buyer_wallet_id,
        WalletTxKind::Release,
        Direction::Out,
        amount,
        reference,
        None,
        now,
    )
    .await?;

    let seller = uow.get_or_create_wallet(seller_user_id, now).await?;
    let mut seller_wallet = seller.clone();
    if seller_credit > 0 {
        seller_wallet = apply_delta(uow, seller.id, seller_credit, 0, "release", now).await?;
        record(
            uow,
            seller.id,
            WalletTxKind::Release,
            Direction::In,
            seller_credit,
            reference,
            None,
            now,
        )
        .await?;
    }

    if let Some(platform_user_id) = policy.platform_user_id.filter(|_| fee > 0) {
        let platform = uow.get_or_create_wallet(platform_user_id, now).await?;
        apply_delta(uow, platform.id, fee, 0, "platform fee", now).await?;
        record(
            uow,
            platform.id,
            WalletTxKind::Adjustment,
            Direction::In,
            fee,
            reference,
            Some("platform fee".to_string()),
            now,
        )
        .await?;
        if platform.id == seller.id {
            seller_wallet = uow
                .find_wallet(seller.id)
                .await?
                .unwrap_or(seller_wallet);
        }
    }

    tracing::info!(
        %buyer_wallet_id,
        seller_wallet_id = %seller.id,
        amount,
        fee,
        ref_id = %reference.ref_id,
        "escrow released"
    );

    Ok(ReleaseOutcome {
        buyer_wallet,
        seller_wallet,
        seller_credit,
        fee,
    })
}

/// Credits an external payment. A payment reference is credited at most once.
pub async fn top_up(
    uow: &mut dyn UnitOfWork,
    wallet_id: Uuid,
    amount: i64,
    payment_ref: &str,
    note: Option<String>,
    now: DateTime<Utc>,
) -> Result<TopUpOutcome, AppError> {
    validate_positive_amount(amount)?;
    let payment_ref = validate_reference("payment_ref", payment_ref, PAYMENT_REF_MAX_LEN)?;
    let note = note.map(|n| n.chars().take(NOTE_MAX_LEN).collect::<String>());

    if let Some(existing) = uow.find_topup_by_ref(&payment_ref).await? {
        if existing.wallet_id != wallet_id || existing.amount != amount {
            return Err(AppError::InvalidState(format!(
                "payment {} was already credited with different details",
                payment_ref
            )));
        }
        let wallet = uow
            .find_wallet(wallet_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("wallet {}", wallet_id)))?;
        return Ok(TopUpOutcome {
            wallet,
            duplicate: true,
        });
    }

    let wallet = apply_delta(uow, wallet_id, amount, 0, "top-up", now).await?;
    record(
        uow,
        wallet_id,
        WalletTxKind::Topup,
        Direction::In,
        amount,
        &LedgerRef::payment(payment_ref.clone()),
        note,
        now,
    )
    .await?;
    tracing::info!(%wallet_id, amount, payment_ref = %payment_ref, "wallet topped up");

    Ok(TopUpOutcome {
        wallet,
        duplicate: false,
    })
}

/// Standalone ledger entry points, one transaction each.
#[derive(Clone)]
pub struct WalletLedger {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    policy: FeePolicy,
}

impl WalletLedger {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, policy: FeePolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    pub async fn get_or_create_wallet(&self, user_id: Uuid) -> Result<Wallet, AppError> {
        let now = self.clock.now();
        within_transaction(self.store.as_ref(), move |uow| {
            Box::pin(async move { Ok(uow.get_or_create_wallet(user_id, now).await?) })
        })
        .await
    }

    pub async fn hold(
        &self,
        wallet_id: Uuid,
        amount: i64,
        reference: LedgerRef,
    ) -> Result<Wallet, AppError> {
        let now = self.clock.now();
        within_transaction(self.store.as_ref(), move |uow| {
            Box::pin(async move { hold(uow, wallet_id, amount, &reference, now).await })
        })
        .await
    }

    pub async fn refund(
        &self,
        wallet_id: Uuid,
        amount: i64,
        reference: LedgerRef,
    ) -> Result<Wallet, AppError> {
        let now = self.clock.now();
        within_transaction(self.store.as_ref(), move |uow| {
            Box::pin(async move { refund(uow, wallet_id, amount, &reference, now).await })
        })
        .await
    }

    pub async fn release(
        &self,
        buyer_wallet_id: Uuid,
        payout: Payout,
        reference: LedgerRef,
    ) -> Result<ReleaseOutcome, AppError> {
        let now = self.clock.now();
        let policy = self.policy;
        within_transaction(self.store.as_ref(), move |uow| {
            Box::pin(async move { release(uow, buyer_wallet_id, payout, policy, &reference, now).await })
        })
        .await
    }

    pub async fn top_up(
        &self,
        wallet_id: Uuid,
        amount: i64,
        payment_ref: String,
        note: Option<String>,
    ) -> Result<TopUpOutcome, AppError> {
        let now = self.clock.now();
        within_transaction(self.store.as_ref(), move |uow| {
            Box::pin(async move { top_up(uow, wallet_id, amount, &payment_ref, note, now).await })
        })
        .await
    }

    /// Newest entries first.
    pub async fn history(
        &self,
        wallet_id: Uuid,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<WalletTransaction>, AppError> {
        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        let offset = offset.unwrap_or(0).max(0);
        within_transaction(self.store.as_ref(), move |uow| {
            Box::pin(async move {
                if uow.find_wallet(wallet_id).await?.is_none() {
                    return Err(AppError::NotFound(format!("wallet {}", wallet_id)));
                }
                Ok(uow.list_wallet_txs(wallet_id, limit, offset).await?)
            })
        })
        .await
    }
}
