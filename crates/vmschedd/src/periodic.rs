//! Background maintenance loops.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};
use vmsched_core::RequestContext;
use vmsched_scheduler::SchedulerManager;

/// Intervals for the maintenance loop.
#[derive(Debug, Clone, Copy)]
pub struct PeriodicIntervals {
    pub periodic_tasks: Duration,
    pub reservation_expiry: Duration,
}

/// Run driver periodic tasks and reservation expiry until shutdown.
///
/// Manager calls touch the store, so each tick runs on the blocking pool.
pub async fn run(
    manager: Arc<SchedulerManager>,
    intervals: PeriodicIntervals,
    mut shutdown: watch::Receiver<bool>,
) {
    let ctx = RequestContext::new("vmschedd", "").elevated();
    let mut periodic = tokio::time::interval(intervals.periodic_tasks);
    let mut expiry = tokio::time::interval(intervals.reservation_expiry);

    loop {
        tokio::select! {
            _ = periodic.tick() => {
                let manager = manager.clone();
                let ctx = ctx.clone();
                if let Err(e) = tokio::task::spawn_blocking(move || manager.run_periodic_tasks(&ctx)).await {
                    warn!(error = %e, "periodic tasks panicked");
                }
            }
            _ = expiry.tick() => {
                let manager = manager.clone();
                let ctx = ctx.clone();
                match tokio::task::spawn_blocking(move || manager.expire_reservations(&ctx)).await {
                    Ok(Ok(expired)) => debug!(expired, "reservation expiry pass"),
                    Ok(Err(e)) => warn!(error = %e, "reservation expiry failed"),
                    Err(e) => warn!(error = %e, "reservation expiry panicked"),
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    debug!("maintenance loop stopped");
}
