//! Escrow windows and the read-only escrow projection of an order.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::order::OrderStatus;
use super::order_item::{HoldStatus, ItemStatus, OrderItem};

/// Funds stay in escrow this long after the hold is placed.
pub const ESCROW_PERIOD_HOURS: i64 = 72;
/// Sellers may cancel a paid order for this long after creation.
pub const SELLER_CANCEL_WINDOW_HOURS: i64 = 24;

pub fn escrow_period() -> Duration {
    Duration::hours(ESCROW_PERIOD_HOURS)
}

/// Slice of the order fee carried by one item. Slices are cut from running
/// subtotals in `(created_at, id)` order, so releasing every item withholds
/// exactly `order_fee`.
pub fn fee_share(order_fee: i64, items: &[OrderItem], item_id: Uuid) -> i64 {
    let mut ordered: Vec<&OrderItem> = items.iter().collect();
    ordered.sort_by_key(|item| (item.created_at, item.id));
    let total: i128 = ordered.iter().map(|item| i128::from(item.subtotal)).sum();
    if order_fee <= 0 || total <= 0 {
        return 0;
    }

    let fee = i128::from(order_fee);
    let mut running = 0_i128;
    for item in ordered {
        let before = fee * running / total;
        running += i128::from(item.subtotal);
        if item.id == item_id {
            return i64::try_from(fee * running / total - before).unwrap_or(0);
        }
    }
    0
}

pub fn seller_cancel_window() -> Duration {
    Duration::hours(SELLER_CANCEL_WINDOW_HOURS)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemEscrowStatus {
    pub order_item_id: Uuid,
    pub product_id: Uuid,
    pub shop_id: Uuid,
    pub hold_amount: i64,
    pub hold_status: HoldStatus,
    pub item_status: ItemStatus,
    pub hold_at: DateTime<Utc>,
    pub release_at: Option<DateTime<Utc>>,
    pub escrow_ends_at: DateTime<Utc>,
    pub time_remaining_secs: i64,
    pub complaint_deadline: DateTime<Utc>,
    pub can_complaint: bool,
}

impl ItemEscrowStatus {
    pub fn project(item: &OrderItem, now: DateTime<Utc>) -> Self {
        let escrow_ends_at = item.hold_at + escrow_period();
        let time_remaining_secs = if item.is_holding() {
            (escrow_ends_at - now).num_seconds().max(0)
        } else {
            0
        };
        let complaint_deadline = item.safe_until;
        let can_complaint = item.is_holding()
            && item.item_status == ItemStatus::Delivered
            && now < complaint_deadline;

        Self {
            order_item_id: item.id,
            product_id: item.product_id,
            shop_id: item.shop_id,
            hold_amount: item.hold_amount,
            hold_status: item.hold_status,
            item_status: item.item_status,
            hold_at: item.hold_at,
            release_at: item.release_at,
            escrow_ends_at,
            time_remaining_secs,
            complaint_deadline,
            can_complaint,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EscrowSummary {
    pub holding: i64,
    pub released: i64,
    pub refunded: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EscrowStatus {
    pub order_id: Uuid,
    pub order_status: OrderStatus,
    pub items: Vec<ItemEscrowStatus>,
    pub summary: EscrowSummary,
}

impl EscrowStatus {
    pub fn project(
        order_id: Uuid,
        order_status: OrderStatus,
        items: &[OrderItem],
        now: DateTime<Utc>,
    ) -> Self {
        let mut summary = EscrowSummary::default();
        for item in items {
            match item.hold_status {
                HoldStatus::Holding => summary.holding += item.hold_amount,
                HoldStatus::Released => summary.released += item.hold_amount,
                HoldStatus::Refunded => summary.refunded += item.hold_amount,
            }
        }

        Self {
            order_id,
            order_status,
            items: items
                .iter()
                .map(|item| ItemEscrowStatus::project(item, now))
                .collect(),
            summary,
        }
    }
}

/// Order status once every item has settled, or `None` while any is open.
pub fn settled_order_status(items: &[OrderItem]) -> Option<OrderStatus> {
    if items.is_empty() || items.iter().any(|item| item.is_holding()) {
        return None;
    }
    if items
        .iter()
        .any(|item| item.item_status == ItemStatus::Completed)
    {
        Some(OrderStatus::Completed)
    } else {
        Some(OrderStatus::Refunded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::inventory::SecretType;
    use crate::domain::order_item::NewOrderItem;

    fn item(now: DateTime<Utc>) -> OrderItem {
        OrderItem::new(
            NewOrderItem {
                order_id: Uuid::new_v4(),
                shop_id: Uuid::new_v4(),
                product_id: Uuid::new_v4(),
                inventory_item_id: Uuid::new_v4(),
                seller_id: Uuid::new_v4(),
                unit_price: 10_000,
                delivery_method: SecretType::Code,
                masked_secret: None,
                delivered: true,
            },
            now,
        )
    }

    fn priced(unit_price: i64, now: DateTime<Utc>) -> OrderItem {
        let mut line = item(now);
        line.unit_price = unit_price;
        line.subtotal = unit_price;
        line.hold_amount = unit_price;
        line
    }

    #[test]
    fn fee_shares_add_up_to_order_fee() {
        let now = Utc::now();
        let items: Vec<OrderItem> = (0..3).map(|_| priced(10, now)).collect();
        let shares: Vec<i64> = items.iter().map(|i| fee_share(2, &items, i.id)).collect();
        assert_eq!(shares.iter().sum::<i64>(), 2);
        assert!(shares.iter().all(|share| (0..=1).contains(share)));

        let items = vec![priced(30_000, now), priced(30_000, now)];
        for line in &items {
            assert_eq!(fee_share(3_000, &items, line.id), 1_500);
        }

        let items = vec![priced(7_000, now), priced(12_999, now), priced(1, now)];
        let total: i64 = items.iter().map(|i| fee_share(1_000, &items, i.id)).sum();
        assert_eq!(total, 1_000);
    }

    #[test]
    fn fee_share_is_zero_without_fee_or_item() {
        let now = Utc::now();
        let items = vec![priced(10_000, now)];
        assert_eq!(fee_share(0, &items, items[0].id), 0);
        assert_eq!(fee_share(500, &items, Uuid::new_v4()), 0);
        assert_eq!(fee_share(500, &items, items[0].id), 500);
    }

    #[test]
    fn remaining_time_counts_down_from_hold() {
        let hold_at = Utc::now();
        let item = item(hold_at);
        let status = ItemEscrowStatus::project(&item, hold_at + Duration::hours(70));
        assert_eq!(status.time_remaining_secs, 2 * 3600);
        assert!(status.can_complaint);

        let late = ItemEscrowStatus::project(&item, hold_at + Duration::hours(100));
        assert_eq!(late.time_remaining_secs, 0);
        assert!(late.can_complaint);

        let expired = ItemEscrowStatus::project(&item, hold_at + Duration::days(8));
        assert!(!expired.can_complaint);
    }

    #[test]
    fn summary_buckets_by_hold_status() {
        let now = Utc::now();
        let holding = item(now);
        let mut released = item(now);
        released.mark_completed(now);
        let mut refunded = item(now);
        refunded.mark_refunded(now);

        let status = EscrowStatus::project(
            Uuid::new_v4(),
            OrderStatus::Paid,
            &[holding, released, refunded],
            now,
        );
        assert_eq!(
            status.summary,
            EscrowSummary {
                holding: 10_000,
                released: 10_000,
                refunded: 10_000,
            }
        );
        assert!(!status.items[1].can_complaint);
    }

    #[test]
    fn order_settles_once_nothing_is_held() {
        let now = Utc::now();
        let mut a = item(now);
        let mut b = item(now);
        assert_eq!(settled_order_status(&[a.clone(), b.clone()]), None);

        a.mark_completed(now);
        b.mark_refunded(now);
        assert_eq!(
            settled_order_status(&[a.clone(), b.clone()]),
            Some(OrderStatus::Completed)
        );

        a.mark_refunded(now);
        assert_eq!(settled_order_status(&[a, b]), Some(OrderStatus::Refunded));
    }
}
