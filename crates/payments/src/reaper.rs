//! Expiring stale reservations held by unpaid orders.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::OrderId;
use domain::{DomainError, OrderError, OrderRepository, StockReleaser};
use futures_util::{StreamExt, stream};
use storage::{DocumentStore, ProcessedEventStore, StockLedger};
use tokio::time::MissedTickBehavior;

use crate::error::Result;

/// Reason recorded on orders cancelled by the reaper.
pub const RESERVATION_EXPIRED: &str = "reservation expired";

/// Maximum number of orders expired concurrently within one sweep.
const SWEEP_CONCURRENCY: usize = 8;

/// Counts from one reaper sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Pending orders cancelled because their reservation timed out.
    pub expired: usize,
    /// Units returned to stock, including resumed releases.
    pub released_units: u64,
    /// Stale orders that changed state before they could be expired.
    pub skipped: usize,
    /// Earlier cancellations whose stock release was finished by this sweep.
    pub resumed: usize,
    /// Orders that could not be processed; they are retried next sweep.
    pub failed: usize,
    /// Expired deduplication records removed.
    pub purged_events: u64,
}

impl SweepReport {
    /// Returns true if the sweep changed nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

enum Expiry {
    Expired(u64),
    Skipped,
}

/// Periodically cancels Pending orders older than the reservation timeout
/// and returns their stock.
///
/// With no timeout configured, reservations never expire; the reaper then
/// only finishes interrupted releases and purges old deduplication records.
pub struct ReservationReaper<S, L, P>
where
    S: DocumentStore,
    L: StockLedger,
    P: ProcessedEventStore,
{
    orders: OrderRepository<S>,
    releaser: StockReleaser<S, L>,
    processed: P,
    timeout: Option<Duration>,
}

impl<S, L, P> ReservationReaper<S, L, P>
where
    S: DocumentStore,
    L: StockLedger,
    P: ProcessedEventStore,
{
    pub fn new(
        orders: OrderRepository<S>,
        releaser: StockReleaser<S, L>,
        processed: P,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            orders,
            releaser,
            processed,
            timeout,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Runs one sweep as of `now`.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        if let Some(cutoff) = self.cutoff(now) {
            let stale: Vec<OrderId> = self
                .orders
                .pending_created_before(cutoff)
                .await?
                .iter()
                .map(|order| order.id())
                .collect();

            let results: Vec<_> = stream::iter(stale)
                .map(|order_id| async move { (order_id, self.expire(order_id).await) })
                .buffer_unordered(SWEEP_CONCURRENCY)
                .collect()
                .await;

            for (order_id, result) in results {
                match result {
                    Ok(Expiry::Expired(units)) => {
                        report.expired += 1;
                        report.released_units += units;
                    }
                    Ok(Expiry::Skipped) => report.skipped += 1,
                    Err(e) => {
                        tracing::warn!(order_id = %order_id, error = %e, "Failed to expire reservation");
                        report.failed += 1;
                    }
                }
            }
            metrics::counter!("reservations_expired_total").increment(report.expired as u64);
        }

        for order in self.orders.awaiting_stock_release().await? {
            match self.releaser.release(order.id()).await {
                Ok(units) if units > 0 => {
                    report.resumed += 1;
                    report.released_units += units;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(order_id = %order.id(), error = %e, "Failed to resume stock release");
                    report.failed += 1;
                }
            }
        }

        report.purged_events = self.processed.purge_expired(now).await?;
        Ok(report)
    }

    /// Sweeps every `interval` until `shutdown` completes.
    pub async fn run(&self, interval: Duration, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(?interval, timeout = ?self.timeout, "Reservation reaper started");
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("Reservation reaper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    match self.sweep(Utc::now()).await {
                        Ok(report) if report.is_empty() => tracing::debug!("Reaper sweep found nothing to do"),
                        Ok(report) => tracing::info!(?report, "Reaper sweep finished"),
                        Err(e) => tracing::error!(error = %e, "Reaper sweep failed"),
                    }
                }
            }
        }
    }

    fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let timeout = chrono::Duration::from_std(self.timeout?).ok()?;
        now.checked_sub_signed(timeout)
    }

    async fn expire(&self, order_id: OrderId) -> std::result::Result<Expiry, DomainError> {
        match self
            .orders
            .update(order_id, |o| o.expire_reservation(RESERVATION_EXPIRED))
            .await
        {
            Ok((_, transition)) if transition.is_applied() => {
                tracing::info!(order_id = %order_id, "Reservation expired");
            }
            Ok(_) => return Ok(Expiry::Skipped),
            // Paid or cancelled since the query ran
            Err(DomainError::Order(
                OrderError::InvalidTransition { .. } | OrderError::NotFound(_),
            )) => return Ok(Expiry::Skipped),
            Err(e) => return Err(e),
        }

        let units = self.releaser.release(order_id).await?;
        Ok(Expiry::Expired(units))
    }
}
