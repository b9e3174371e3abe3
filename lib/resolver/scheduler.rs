//! Periodic resolution of markets past their close time.

use std::{sync::Arc, time::Duration};

use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};

use crate::{resolver::Resolver, state::error::Error, types::now_secs};

pub const DEFAULT_PERIOD: Duration = Duration::from_secs(60);

/// Sweeps due markets on a fixed tick. Ticks never overlap: each sweep
/// runs to completion before the next is considered, and a shutdown
/// signal is observed between ticks, so an in-flight sweep drains
/// before the task exits.
pub struct ResolutionScheduler {
    resolver: Arc<Resolver>,
    period: Duration,
}

impl ResolutionScheduler {
    pub fn new(resolver: Arc<Resolver>, period: Duration) -> Self {
        Self { resolver, period }
    }

    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(self.period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(period = ?self.period, "resolution scheduler started");
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticks.tick() => {
                        if let Err(err) = self.sweep().await {
                            tracing::error!(
                                error = %err,
                                "resolution sweep failed"
                            );
                        }
                    }
                }
            }
            tracing::info!("resolution scheduler stopped");
        })
    }

    /// One tick: resolve every due market. Per-market failures are
    /// logged, never surfaced; a market whose resolution fails is
    /// closed so it stops being retried (a human can still resolve it
    /// manually).
    pub async fn sweep(&self) -> Result<(), Error> {
        let now = now_secs();
        let due = self.resolver.list_due(now)?;
        if due.is_empty() {
            return Ok(());
        }
        tracing::debug!(count = due.len(), "resolving due markets");
        for market in due {
            match self.resolver.resolve(market.id, None, None).await {
                Ok(report) => {
                    tracing::info!(
                        market = %market.id,
                        outcome = %report.outcome,
                        "auto-resolved market"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        market = %market.id,
                        error = %err,
                        "resolution failed, closing market"
                    );
                    if let Err(close_err) = self.resolver.close(market.id) {
                        tracing::error!(
                            market = %market.id,
                            error = %close_err,
                            "failed to close market"
                        );
                    }
                }
            }
        }
        Ok(())
    }
}
