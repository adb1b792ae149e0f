pub mod escrow;
pub mod inventory;
pub mod ledger;
pub mod orders;
pub mod payments;
pub mod sweeper;

use std::sync::Arc;

use crate::crypto::SecretCipher;
use crate::domain::Clock;
use crate::ports::{SalesCounter, Store};

pub use escrow::EscrowService;
pub use inventory::InventoryAllocator;
pub use ledger::{FeePolicy, Payout, WalletLedger};
pub use orders::{CancelOutcome, CartLine, CreateOrderRequest, CreatedOrder, OrderService};
pub use payments::{PaymentCallback, PaymentService};
pub use sweeper::{run_sweeper, sweep_once, SweepReport};

/// Every service, wired against one store.
#[derive(Clone)]
pub struct Services {
    pub orders: OrderService,
    pub escrow: EscrowService,
    pub ledger: WalletLedger,
    pub inventory: InventoryAllocator,
    pub payments: PaymentService,
}

impl Services {
    pub fn new(
        store: Arc<dyn Store>,
        sales: Arc<dyn SalesCounter>,
        cipher: Arc<SecretCipher>,
        clock: Arc<dyn Clock>,
        policy: FeePolicy,
    ) -> Self {
        let inventory = InventoryAllocator::new(store.clone(), cipher, clock.clone());
        Self {
            orders: OrderService::new(
                store.clone(),
                sales.clone(),
                inventory.clone(),
                clock.clone(),
                policy,
            ),
            escrow: EscrowService::new(store.clone(), inventory.clone(), clock.clone(), policy),
            ledger: WalletLedger::new(store.clone(), clock.clone(), policy),
            payments: PaymentService::new(store, sales, inventory.clone(), clock),
            inventory,
        }
    }
}
