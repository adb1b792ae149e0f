//! Marketplace domain entities.
//! Framework-agnostic apart from the sqlx row/enum derives.

pub mod clock;
pub mod escrow;
pub mod inventory;
pub mod order;
pub mod order_item;
pub mod product;
pub mod wallet;

pub use clock::{Clock, ManualClock, SystemClock};
pub use escrow::{EscrowStatus, EscrowSummary, ItemEscrowStatus};
pub use inventory::{InventoryItem, InventoryStatus, PoolKey, RevealedSecret, SecretType};
pub use order::{CancelActor, Order, OrderStatus, PaymentMethod};
pub use order_item::{HoldStatus, ItemStatus, NewOrderItem, OrderItem};
pub use product::{Product, ProductStatus, Shop};
pub use wallet::{Direction, LedgerRef, RefType, Wallet, WalletTransaction, WalletTxKind};
