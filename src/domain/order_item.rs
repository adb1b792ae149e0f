//! One row per unit sold, bound 1:1 to the inventory item delivered.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::inventory::SecretType;

/// Warranty window during which a delivered unit may be disputed.
pub const SAFE_PERIOD_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "item_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    WaitingDelivery,
    Delivered,
    Completed,
    Disputed,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "hold_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum HoldStatus {
    Holding,
    Released,
    Refunded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub shop_id: Uuid,
    pub product_id: Uuid,
    pub inventory_item_id: Uuid,
    pub seller_id: Uuid,
    pub unit_price: i64,
    pub quantity: i32,
    pub subtotal: i64,
    pub item_status: ItemStatus,
    pub hold_amount: i64,
    pub hold_status: HoldStatus,
    pub hold_at: DateTime<Utc>,
    pub release_at: Option<DateTime<Utc>>,
    pub safe_until: DateTime<Utc>,
    pub delivery_method: SecretType,
    pub masked_secret: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub revealed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything needed to bind one claimed unit to an order.
#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub order_id: Uuid,
    pub shop_id: Uuid,
    pub product_id: Uuid,
    pub inventory_item_id: Uuid,
    pub seller_id: Uuid,
    pub unit_price: i64,
    pub delivery_method: SecretType,
    pub masked_secret: Option<String>,
    pub delivered: bool,
}

impl OrderItem {
    pub fn new(input: NewOrderItem, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id: input.order_id,
            shop_id: input.shop_id,
            product_id: input.product_id,
            inventory_item_id: input.inventory_item_id,
            seller_id: input.seller_id,
            unit_price: input.unit_price,
            quantity: 1,
            subtotal: input.unit_price,
            item_status: if input.delivered {
                ItemStatus::Delivered
            } else {
                ItemStatus::WaitingDelivery
            },
            hold_amount: input.unit_price,
            hold_status: HoldStatus::Holding,
            hold_at: now,
            release_at: None,
            safe_until: now + Duration::days(SAFE_PERIOD_DAYS),
            delivery_method: input.delivery_method,
            masked_secret: input.masked_secret,
            delivered_at: input.delivered.then_some(now),
            revealed_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Item and hold status must move together.
    pub fn is_consistent(&self) -> bool {
        let pair_ok = match self.hold_status {
            HoldStatus::Holding => matches!(
                self.item_status,
                ItemStatus::WaitingDelivery | ItemStatus::Delivered | ItemStatus::Disputed
            ),
            HoldStatus::Released => self.item_status == ItemStatus::Completed,
            HoldStatus::Refunded => self.item_status == ItemStatus::Refunded,
        };
        pair_ok && self.hold_amount == self.unit_price && self.subtotal == self.unit_price
    }

    pub fn is_holding(&self) -> bool {
        self.hold_status == HoldStatus::Holding
    }

    /// Delivered and the buyer has already seen the secret.
    pub fn is_consumed(&self) -> bool {
        self.item_status == ItemStatus::Completed
            || (self.item_status == ItemStatus::Delivered && self.revealed_at.is_some())
    }

    pub fn mark_refunded(&mut self, now: DateTime<Utc>) {
        self.item_status = ItemStatus::Refunded;
        self.hold_status = HoldStatus::Refunded;
        self.release_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.item_status = ItemStatus::Completed;
        self.hold_status = HoldStatus::Released;
        self.release_at = Some(now);
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_delivered(&mut self, masked_secret: Option<String>, now: DateTime<Utc>) {
        self.item_status = ItemStatus::Delivered;
        self.masked_secret = masked_secret;
        self.delivered_at = Some(now);
        self.safe_until = now + Duration::days(SAFE_PERIOD_DAYS);
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(delivered: bool) -> OrderItem {
        OrderItem::new(
            NewOrderItem {
                order_id: Uuid::new_v4(),
                shop_id: Uuid::new_v4(),
                product_id: Uuid::new_v4(),
                inventory_item_id: Uuid::new_v4(),
                seller_id: Uuid::new_v4(),
                unit_price: 40_000,
                delivery_method: SecretType::Account,
                masked_secret: Some("us****rd".into()),
                delivered,
            },
            Utc::now(),
        )
    }

    #[test]
    fn new_item_holds_its_price() {
        let item = item(true);
        assert_eq!(item.hold_amount, 40_000);
        assert_eq!(item.subtotal, 40_000);
        assert_eq!(item.quantity, 1);
        assert_eq!(item.hold_status, HoldStatus::Holding);
        assert_eq!(item.item_status, ItemStatus::Delivered);
        assert_eq!(item.safe_until - item.hold_at, Duration::days(7));
        assert!(item.is_consistent());
    }

    #[test]
    fn undelivered_item_waits() {
        let item = item(false);
        assert_eq!(item.item_status, ItemStatus::WaitingDelivery);
        assert!(item.delivered_at.is_none());
    }

    #[test]
    fn transitions_stay_consistent() {
        let now = Utc::now();
        let mut refunded = item(true);
        refunded.mark_refunded(now);
        assert!(refunded.is_consistent());

        let mut completed = item(true);
        completed.mark_completed(now);
        assert!(completed.is_consistent());

        let mut broken = item(true);
        broken.hold_status = HoldStatus::Refunded;
        assert!(!broken.is_consistent());
    }

    #[test]
    fn revealed_delivery_counts_as_consumed() {
        let mut item = item(true);
        assert!(!item.is_consumed());
        item.revealed_at = Some(Utc::now());
        assert!(item.is_consumed());
    }
}
