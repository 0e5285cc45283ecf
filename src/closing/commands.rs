/// Auction lifecycle commands.
/// 1. close (winner determination)
/// 2. cancel
// region:    --- Imports
use crate::ads::{AdDirectory, AdStatus};
use crate::auction::events::{self, AuctionEvent};
use crate::auction::model::{Auction, AuctionStatus, Bid};
use crate::clock::Clock;
use crate::error::EngineError;
use crate::store::AuctionStore;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// endregion: --- Imports

// region:    --- Commands

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClosingResult {
    pub winner_id: Option<i64>,
    pub winning_bid: Option<Bid>,
    pub reserve_met: bool,
    pub message: String,
}

const MAX_RETRIES: u32 = 100;

/// 1. close
///
/// The owner may close once the end time has passed; a privileged caller
/// may close early. Winner selection takes the raw maximum-price bid and
/// awards it only when the reserve is met. The status flip, the winner
/// fields and the ad write-back happen once, never half-applied.
pub async fn handle_close_auction(
    store: &dyn AuctionStore,
    ads: &dyn AdDirectory,
    clock: &dyn Clock,
    auction_id: i64,
    requester_id: i64,
    privileged: bool,
) -> Result<ClosingResult, EngineError> {
    info!(
        "{:<12} --> close auction {} (privileged: {})",
        "Command", auction_id, privileged
    );
    let mut retries = 0;

    while retries < MAX_RETRIES {
        let auction = store.get_auction(auction_id).await?;
        let ad = ads.get_ad(auction.ad_id).await?;

        if auction.is_terminal() {
            return Err(EngineError::AlreadyTerminal(auction.status));
        }
        let now = clock.now();
        if !privileged {
            if requester_id != ad.owner_id {
                return Err(EngineError::NotYourAuction);
            }
            if now < auction.end_time {
                return Err(EngineError::CloseBeforeEnd);
            }
        }

        let highest = store.highest_bid(auction_id).await?;
        let mut updated = auction.clone();
        updated.status = AuctionStatus::Closed;

        let result = match &highest {
            None => ClosingResult {
                winner_id: None,
                winning_bid: None,
                reserve_met: false,
                message: "closed with no bids".into(),
            },
            Some(bid) => {
                let reserve_met = match auction.reserve_price {
                    None => true,
                    Some(reserve) => auction.last_price.unwrap_or(bid.price) >= reserve,
                };
                if reserve_met {
                    updated.winner_user_id = Some(bid.user_id);
                    ClosingResult {
                        winner_id: Some(bid.user_id),
                        winning_bid: highest.clone(),
                        reserve_met: true,
                        message: format!("closed, won by user {} at {}", bid.user_id, bid.price),
                    }
                } else {
                    ClosingResult {
                        winner_id: None,
                        winning_bid: highest.clone(),
                        reserve_met: false,
                        message: "reserve not met".into(),
                    }
                }
            }
        };

        match store.commit_auction(updated).await {
            Ok(closed) => {
                ads.set_ad_status(closed.ad_id, AdStatus::Expired, now).await?;
                events::publish(&AuctionEvent::AuctionClosed {
                    auction_id: closed.id,
                    winner_user_id: closed.winner_user_id,
                    winning_price: result.winning_bid.as_ref().map(|b| b.price),
                    reserve_met: result.reserve_met,
                    timestamp: now,
                });
                return Ok(result);
            }
            Err(EngineError::Conflict) => {
                warn!("{:<12} --> version conflict on close, retrying", "Command");
                retries += 1;
                continue;
            }
            Err(e) => return Err(e),
        }
    }

    Err(EngineError::Conflict)
}

/// 2. cancel
///
/// Once bids exist the auction is a commitment to the bidders; only a
/// privileged caller may still cancel it. No winner is ever assigned.
pub async fn handle_cancel_auction(
    store: &dyn AuctionStore,
    ads: &dyn AdDirectory,
    clock: &dyn Clock,
    auction_id: i64,
    privileged: bool,
) -> Result<Auction, EngineError> {
    info!(
        "{:<12} --> cancel auction {} (privileged: {})",
        "Command", auction_id, privileged
    );
    let mut retries = 0;

    while retries < MAX_RETRIES {
        let auction = store.get_auction(auction_id).await?;

        if auction.is_terminal() {
            return Err(EngineError::AlreadyTerminal(auction.status));
        }
        if !privileged && auction.bid_count > 0 {
            return Err(EngineError::CancelWithBids);
        }

        let mut updated = auction;
        updated.status = AuctionStatus::Cancelled;

        match store.commit_auction(updated).await {
            Ok(cancelled) => {
                let now = clock.now();
                ads.set_ad_status(cancelled.ad_id, AdStatus::Removed, now).await?;
                events::publish(&AuctionEvent::AuctionCancelled {
                    auction_id: cancelled.id,
                    timestamp: now,
                });
                return Ok(cancelled);
            }
            Err(EngineError::Conflict) => {
                warn!("{:<12} --> version conflict on cancel, retrying", "Command");
                retries += 1;
                continue;
            }
            Err(e) => return Err(e),
        }
    }

    Err(EngineError::Conflict)
}

// endregion: --- Commands

// region:    --- Tests


// endregion: --- Tests
