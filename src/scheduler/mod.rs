/// Auto-close sweep.
/// Periodically discovers active auctions flagged for auto-close whose end
/// time has passed and closes each one independently. One auction failing
/// never aborts the batch; the summary carries per-item outcomes for
/// alerting. The next run re-selects anything still eligible, so there is
/// no in-run retry.
// region:    --- Imports
use crate::ads::AdDirectory;
use crate::clock::Clock;
use crate::closing::commands::handle_close_auction;
use crate::error::EngineError;
use crate::store::AuctionStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info};

// endregion: --- Imports

// region:    --- Sweep Report

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SweepOutcome {
    Closed {
        auction_id: i64,
        winner_id: Option<i64>,
        reserve_met: bool,
    },
    WouldClose {
        auction_id: i64,
    },
    Failed {
        auction_id: i64,
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepSummary {
    pub dry_run: bool,
    pub closed_count: usize,
    pub failed_count: usize,
    pub outcomes: Vec<SweepOutcome>,
}

impl SweepSummary {
    pub fn has_failures(&self) -> bool {
        self.failed_count > 0
    }
}

// endregion: --- Sweep Report

// region:    --- Auto-Close Scheduler

pub struct AutoCloseScheduler {
    store: Arc<dyn AuctionStore>,
    ads: Arc<dyn AdDirectory>,
    clock: Arc<dyn Clock>,
    period: Duration,
}

impl AutoCloseScheduler {
    pub fn new(
        store: Arc<dyn AuctionStore>,
        ads: Arc<dyn AdDirectory>,
        clock: Arc<dyn Clock>,
        period: Duration,
    ) -> Self {
        Self {
            store,
            ads,
            clock,
            period,
        }
    }

    /// Start the periodic sweep loop.
    pub async fn start(&self) {
        let store = Arc::clone(&self.store);
        let ads = Arc::clone(&self.ads);
        let clock = Arc::clone(&self.clock);
        let period = self.period;
        tokio::spawn(async move {
            let mut interval = interval(period);
            loop {
                interval.tick().await;
                match Self::run_once(store.as_ref(), ads.as_ref(), clock.as_ref(), false).await {
                    Ok(summary) if summary.has_failures() => {
                        error!(
                            "{:<12} --> sweep finished with failures: {} closed, {} failed",
                            "Scheduler", summary.closed_count, summary.failed_count
                        );
                    }
                    Ok(summary) => {
                        debug!(
                            "{:<12} --> sweep finished: {} closed",
                            "Scheduler", summary.closed_count
                        );
                    }
                    Err(e) => {
                        error!("{:<12} --> sweep selection failed: {:?}", "Scheduler", e);
                    }
                }
            }
        });
    }

    /// One sweep over all due auctions. Selection errors fail the run;
    /// per-auction closing errors are recorded and the batch continues.
    pub async fn run_once(
        store: &dyn AuctionStore,
        ads: &dyn AdDirectory,
        clock: &dyn Clock,
        dry_run: bool,
    ) -> Result<SweepSummary, EngineError> {
        let now = clock.now();
        let due = store.due_for_auto_close(now).await?;
        info!(
            "{:<12} --> sweep over {} due auction(s), dry_run: {}",
            "Scheduler",
            due.len(),
            dry_run
        );

        let mut summary = SweepSummary {
            dry_run,
            closed_count: 0,
            failed_count: 0,
            outcomes: Vec::with_capacity(due.len()),
        };

        for auction_id in due {
            if dry_run {
                summary.closed_count += 1;
                summary.outcomes.push(SweepOutcome::WouldClose { auction_id });
                continue;
            }
            // system close: privileged, only selects auctions already past
            // their end time
            match handle_close_auction(store, ads, clock, auction_id, 0, true).await {
                Ok(result) => {
                    summary.closed_count += 1;
                    summary.outcomes.push(SweepOutcome::Closed {
                        auction_id,
                        winner_id: result.winner_id,
                        reserve_met: result.reserve_met,
                    });
                }
                Err(e) => {
                    error!(
                        "{:<12} --> failed to close auction {}: {}",
                        "Scheduler", auction_id, e
                    );
                    summary.failed_count += 1;
                    summary.outcomes.push(SweepOutcome::Failed {
                        auction_id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(summary)
    }
}

// endregion: --- Auto-Close Scheduler

// region:    --- Tests


// endregion: --- Tests
