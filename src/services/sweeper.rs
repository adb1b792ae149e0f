use chrono::Duration as ChronoDuration;
use serde::Serialize;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info};

use super::escrow::EscrowService;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub released_holds: usize,
    pub expired_orders: usize,
}

/// Runs the escrow sweeper loop: releases holds whose warranty window has
/// passed and cancels gateway orders that were never paid. Row claims are
/// re-checked per item, so several sweepers may run side by side.
pub async fn run_sweeper(escrow: EscrowService, interval: Duration, pending_ttl: ChronoDuration) {
    info!(
        interval_secs = interval.as_secs(),
        pending_ttl_minutes = pending_ttl.num_minutes(),
        "escrow sweeper started"
    );

    loop {
        if let Err(e) = sweep_once(&escrow, pending_ttl).await {
            error!("Escrow sweep error: {}", e);
        }

        sleep(interval).await;
    }
}

pub async fn sweep_once(
    escrow: &EscrowService,
    pending_ttl: ChronoDuration,
) -> Result<SweepReport, AppError> {
    let now = escrow.now();
    let report = SweepReport {
        released_holds: escrow.release_expired_holds(now).await?,
        expired_orders: escrow.expire_pending_orders(now, pending_ttl).await?,
    };
    debug!(
        released = report.released_holds,
        expired = report.expired_orders,
        "escrow sweep finished"
    );
    Ok(report)
}
