/// Bid commands.
/// 1. place a bid
/// 2. withdraw a bid
// region:    --- Imports
use crate::ads::{AdDirectory, AdStatus};
use crate::auction::events::{self, AuctionEvent};
use crate::auction::model::{AuctionStatus, Bid, BidStatus, MAX_COMMENT_CHARS};
use crate::clock::Clock;
use crate::error::EngineError;
use crate::store::AuctionStore;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// endregion: --- Imports

// region:    --- Commands

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PlaceBidCommand {
    pub auction_id: i64,
    pub bidder_id: i64,
    pub price: i64,
    pub comment: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WithdrawBidCommand {
    pub auction_id: i64,
    pub bid_id: i64,
    pub requester_id: i64,
}

/// Whether the accepted bid fell in the anti-snipe window, and the end
/// time it pushed the auction to.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AntiSnipe {
    pub triggered: bool,
    pub new_end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PlacedBid {
    pub bid: Bid,
    pub anti_snipe: AntiSnipe,
}

// bounded optimistic retries before surfacing the conflict
const MAX_RETRIES: u32 = 100;

/// 1. place a bid
///
/// Preconditions run in order, first failure wins; nothing is persisted on
/// failure. The bid append, the price/count update and any anti-snipe
/// extension commit as one versioned write.
pub async fn handle_place_bid(
    cmd: PlaceBidCommand,
    store: &dyn AuctionStore,
    ads: &dyn AdDirectory,
    clock: &dyn Clock,
) -> Result<PlacedBid, EngineError> {
    info!("{:<12} --> place bid: {:?}", "Command", cmd);
    let mut retries = 0;

    while retries < MAX_RETRIES {
        let auction = store.get_auction(cmd.auction_id).await?;
        let ad = ads.get_ad(auction.ad_id).await?;

        if ad.status != AdStatus::Published {
            return Err(EngineError::NotOpenForBids);
        }
        if cmd.bidder_id == ad.owner_id {
            return Err(EngineError::SelfBid);
        }

        let now = clock.now();
        if auction.status != AuctionStatus::Active {
            return Err(EngineError::AlreadyTerminal(auction.status));
        }
        if now < auction.start_time {
            return Err(EngineError::NotStarted);
        }
        if now >= auction.end_time {
            return Err(EngineError::Ended);
        }
        if auction.winner_user_id.is_some() {
            // lost the race against a concurrent close
            return Err(EngineError::AlreadyAwarded);
        }

        if let Some(comment) = &cmd.comment {
            if comment.chars().count() > MAX_COMMENT_CHARS {
                return Err(EngineError::CommentTooLong {
                    limit: MAX_COMMENT_CHARS,
                });
            }
        }
        let minimum = auction.minimum_next_bid();
        if cmd.price < minimum {
            return Err(EngineError::BidTooLow {
                minimum,
                current: auction.last_price,
                increment: auction.minimum_bid_increment,
            });
        }

        let mut updated = auction.clone();
        updated.last_price = Some(cmd.price);
        updated.bid_count += 1;

        let mut anti_snipe = AntiSnipe {
            triggered: false,
            new_end_time: None,
        };
        if auction.in_anti_snipe_window(now) {
            updated.end_time += Duration::seconds(auction.anti_snip_extension_seconds);
            anti_snipe = AntiSnipe {
                triggered: true,
                new_end_time: Some(updated.end_time),
            };
        }

        let bid = Bid::new(
            cmd.auction_id,
            cmd.bidder_id,
            cmd.price,
            cmd.comment.clone(),
            now,
        );
        match store.commit_bid(updated.clone(), bid).await {
            Ok(placed) => {
                events::publish(&AuctionEvent::BidPlaced {
                    auction_id: placed.auction_id,
                    bid_id: placed.id,
                    bidder_id: placed.user_id,
                    price: placed.price,
                    timestamp: now,
                });
                if anti_snipe.triggered {
                    events::publish(&AuctionEvent::EndTimeExtended {
                        auction_id: placed.auction_id,
                        new_end_time: updated.end_time,
                        timestamp: now,
                    });
                }
                return Ok(PlacedBid {
                    bid: placed,
                    anti_snipe,
                });
            }
            Err(EngineError::Conflict) => {
                warn!("{:<12} --> version conflict on bid, retrying", "Command");
                retries += 1;
                continue;
            }
            Err(e) => return Err(e),
        }
    }

    Err(EngineError::Conflict)
}

/// 2. withdraw a bid
///
/// Only the bidder may withdraw, never the bid holding the current highest
/// price. The auction's `last_price` and `bid_count` stay untouched.
pub async fn handle_withdraw_bid(
    cmd: WithdrawBidCommand,
    store: &dyn AuctionStore,
    clock: &dyn Clock,
) -> Result<Bid, EngineError> {
    info!("{:<12} --> withdraw bid: {:?}", "Command", cmd);
    let mut retries = 0;

    while retries < MAX_RETRIES {
        let auction = store.get_auction(cmd.auction_id).await?;
        let bid = store.get_bid(cmd.auction_id, cmd.bid_id).await?;

        if cmd.requester_id != bid.user_id {
            return Err(EngineError::NotYourBid);
        }
        if bid.status == BidStatus::Withdrawn {
            return Err(EngineError::AlreadyWithdrawn);
        }
        if auction.status != AuctionStatus::Active {
            return Err(EngineError::AlreadyTerminal(auction.status));
        }
        let now = clock.now();
        if now >= auction.end_time {
            return Err(EngineError::WithdrawAfterEnd);
        }
        // the bid that set the current last_price is the highest; prices
        // are strictly increasing so the comparison identifies it
        if auction.last_price == Some(bid.price) {
            return Err(EngineError::HighestBid);
        }

        let mut withdrawn = bid;
        withdrawn.status = BidStatus::Withdrawn;
        withdrawn.withdrawn_at = Some(now);

        match store.commit_withdrawal(auction, withdrawn).await {
            Ok(bid) => {
                events::publish(&AuctionEvent::BidWithdrawn {
                    auction_id: bid.auction_id,
                    bid_id: bid.id,
                    timestamp: now,
                });
                return Ok(bid);
            }
            Err(EngineError::Conflict) => {
                warn!(
                    "{:<12} --> version conflict on withdrawal, retrying",
                    "Command"
                );
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ads::MemoryAdDirectory;
    use crate::auction::model::{Auction, NewAuction};
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    const OWNER: i64 = 1;
    const BIDDER: i64 = 2;
    const OTHER: i64 = 3;

    struct Fixture {
        store: Arc<MemoryStore>,
        ads: Arc<MemoryAdDirectory>,
        clock: Arc<ManualClock>,
        auction: Auction,
    }

    async fn fixture_with(ad_status: AdStatus) -> Fixture {
        let t0 = Utc::now();
        let store = Arc::new(MemoryStore::new());
        let ads = Arc::new(MemoryAdDirectory::new());
        let clock = Arc::new(ManualClock::new(t0));

        let ad = ads.register(OWNER, ad_status).await;
        let auction = store
            .create_auction(
                Auction::new(
                    NewAuction {
                        ad_id: ad.id,
                        start_price: 10_000,
                        reserve_price: None,
                        minimum_bid_increment: None,
                        start_time: t0,
                        end_time: t0 + Duration::hours(2),
                        anti_snip_window_seconds: None,
                        anti_snip_extension_seconds: None,
                        auto_close: false,
                    },
                    t0,
                )
                .unwrap(),
            )
            .await
            .unwrap();

        Fixture {
            store,
            ads,
            clock,
            auction,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(AdStatus::Published).await
    }

    fn bid_cmd(f: &Fixture, bidder: i64, price: i64) -> PlaceBidCommand {
        PlaceBidCommand {
            auction_id: f.auction.id,
            bidder_id: bidder,
            price,
            comment: None,
        }
    }

    async fn place(f: &Fixture, bidder: i64, price: i64) -> Result<PlacedBid, EngineError> {
        handle_place_bid(
            bid_cmd(f, bidder, price),
            f.store.as_ref(),
            f.ads.as_ref(),
            f.clock.as_ref(),
        )
        .await
    }

    async fn withdraw(f: &Fixture, bid_id: i64, requester: i64) -> Result<Bid, EngineError> {
        handle_withdraw_bid(
            WithdrawBidCommand {
                auction_id: f.auction.id,
                bid_id,
                requester_id: requester,
            },
            f.store.as_ref(),
            f.clock.as_ref(),
        )
        .await
    }

    #[tokio::test]
    async fn first_bid_needs_only_the_start_price() {
        let f = fixture().await;
        // increment applies only after the first bid
        let placed = place(&f, BIDDER, 10_050).await.unwrap();
        assert_eq!(placed.bid.price, 10_050);
        assert!(!placed.anti_snipe.triggered);

        let auction = f.store.get_auction(f.auction.id).await.unwrap();
        assert_eq!(auction.last_price, Some(10_050));
        assert_eq!(auction.bid_count, 1);
    }

    #[tokio::test]
    async fn second_bid_must_clear_the_increment() {
        let f = fixture().await;
        place(&f, BIDDER, 10_050).await.unwrap();

        let err = place(&f, OTHER, 10_100).await.unwrap_err();
        assert_eq!(
            err,
            EngineError::BidTooLow {
                minimum: 10_150,
                current: Some(10_050),
                increment: 100
            }
        );
    }

    #[tokio::test]
    async fn exact_minimum_accepted_one_below_rejected() {
        let f = fixture().await;
        place(&f, BIDDER, 10_000).await.unwrap();

        assert!(matches!(
            place(&f, OTHER, 10_099).await,
            Err(EngineError::BidTooLow {
                minimum: 10_100,
                ..
            })
        ));
        assert!(place(&f, OTHER, 10_100).await.is_ok());
    }

    #[tokio::test]
    async fn owner_cannot_bid_on_their_own_auction() {
        let f = fixture().await;
        assert_eq!(
            place(&f, OWNER, 10_000).await.unwrap_err(),
            EngineError::SelfBid
        );
    }

    #[tokio::test]
    async fn unpublished_ad_is_not_open_for_bids() {
        let f = fixture_with(AdStatus::Pending).await;
        assert_eq!(
            place(&f, BIDDER, 10_000).await.unwrap_err(),
            EngineError::NotOpenForBids
        );
    }

    #[tokio::test]
    async fn bidding_outside_the_window_is_rejected() {
        let f = fixture().await;

        f.clock.set(f.auction.start_time - Duration::seconds(1));
        assert_eq!(
            place(&f, BIDDER, 10_000).await.unwrap_err(),
            EngineError::NotStarted
        );

        // the exact end instant is already over
        f.clock.set(f.auction.end_time);
        assert_eq!(
            place(&f, BIDDER, 10_000).await.unwrap_err(),
            EngineError::Ended
        );
    }

    #[tokio::test]
    async fn awarded_auction_rejects_late_bids() {
        let f = fixture().await;
        let mut raced = f.store.get_auction(f.auction.id).await.unwrap();
        raced.winner_user_id = Some(OTHER);
        f.store.commit_auction(raced).await.unwrap();

        assert_eq!(
            place(&f, BIDDER, 10_000).await.unwrap_err(),
            EngineError::AlreadyAwarded
        );
    }

    #[tokio::test]
    async fn oversized_comment_rejected() {
        let f = fixture().await;
        let cmd = PlaceBidCommand {
            comment: Some("x".repeat(MAX_COMMENT_CHARS + 1)),
            ..bid_cmd(&f, BIDDER, 10_000)
        };
        let err = handle_place_bid(cmd, f.store.as_ref(), f.ads.as_ref(), f.clock.as_ref())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::CommentTooLong {
                limit: MAX_COMMENT_CHARS
            }
        );
    }

    #[tokio::test]
    async fn accepted_bids_keep_last_price_monotone() {
        let f = fixture().await;
        let mut last = 0;
        for price in [10_000i64, 10_100, 10_300, 11_000] {
            let minimum_before = f
                .store
                .get_auction(f.auction.id)
                .await
                .unwrap()
                .minimum_next_bid();
            assert!(price >= minimum_before);
            place(&f, BIDDER + (price % 3), price).await.unwrap();

            let auction = f.store.get_auction(f.auction.id).await.unwrap();
            assert!(auction.last_price.unwrap() > last);
            last = auction.last_price.unwrap();
        }
        let auction = f.store.get_auction(f.auction.id).await.unwrap();
        assert_eq!(auction.bid_count, 4);
    }

    #[tokio::test]
    async fn bid_inside_window_extends_by_exactly_the_extension() {
        let f = fixture().await;
        f.clock.set(f.auction.end_time - Duration::minutes(4));

        let placed = place(&f, BIDDER, 10_000).await.unwrap();
        assert!(placed.anti_snipe.triggered);

        let expected = f.auction.end_time + Duration::seconds(300);
        assert_eq!(placed.anti_snipe.new_end_time, Some(expected));
        let auction = f.store.get_auction(f.auction.id).await.unwrap();
        assert_eq!(auction.end_time, expected);
    }

    #[tokio::test]
    async fn bid_outside_window_never_moves_the_end_time() {
        let f = fixture().await;
        f.clock.set(f.auction.end_time - Duration::seconds(301));

        let placed = place(&f, BIDDER, 10_000).await.unwrap();
        assert!(!placed.anti_snipe.triggered);
        let auction = f.store.get_auction(f.auction.id).await.unwrap();
        assert_eq!(auction.end_time, f.auction.end_time);
    }

    #[tokio::test]
    async fn extension_can_trigger_repeatedly() {
        let f = fixture().await;

        f.clock.set(f.auction.end_time - Duration::seconds(60));
        let first = place(&f, BIDDER, 10_000).await.unwrap();
        let end_after_first = first.anti_snipe.new_end_time.unwrap();

        f.clock.set(end_after_first - Duration::seconds(60));
        let second = place(&f, OTHER, 10_100).await.unwrap();
        assert_eq!(
            second.anti_snipe.new_end_time,
            Some(end_after_first + Duration::seconds(300))
        );
    }

    #[tokio::test]
    async fn concurrent_bids_serialize_per_auction() {
        let f = fixture().await;

        let mut handles = Vec::new();
        for i in 0..20i64 {
            let store = Arc::clone(&f.store);
            let ads = Arc::clone(&f.ads);
            let clock = Arc::clone(&f.clock);
            let cmd = bid_cmd(&f, BIDDER + i, 10_000 + i * 200);
            handles.push(tokio::spawn(async move {
                handle_place_bid(cmd, store.as_ref(), ads.as_ref(), clock.as_ref()).await
            }));
        }

        let mut accepted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(EngineError::BidTooLow { .. }) => {}
                Err(e) => panic!("unexpected error: {e:?}"),
            }
        }
        assert!(accepted >= 1);

        let auction = f.store.get_auction(f.auction.id).await.unwrap();
        assert_eq!(auction.bid_count, accepted);

        // accepted prices clear the increment in creation order
        let mut bids = f.store.bids_for_auction(f.auction.id).await.unwrap();
        bids.reverse();
        assert_eq!(bids.len() as i64, accepted);
        for pair in bids.windows(2) {
            assert!(pair[1].price >= pair[0].price + auction.minimum_bid_increment);
        }
        assert_eq!(auction.last_price, bids.last().map(|b| b.price));
    }

    #[tokio::test]
    async fn non_highest_bid_can_be_withdrawn() {
        let f = fixture().await;
        let first = place(&f, BIDDER, 10_100).await.unwrap().bid;
        place(&f, OTHER, 10_200).await.unwrap();

        let withdrawn = withdraw(&f, first.id, BIDDER).await.unwrap();
        assert_eq!(withdrawn.status, BidStatus::Withdrawn);
        assert!(withdrawn.withdrawn_at.is_some());

        // summary fields are not recomputed
        let auction = f.store.get_auction(f.auction.id).await.unwrap();
        assert_eq!(auction.last_price, Some(10_200));
        assert_eq!(auction.bid_count, 2);
    }

    #[tokio::test]
    async fn highest_bid_cannot_be_withdrawn() {
        let f = fixture().await;
        place(&f, BIDDER, 10_100).await.unwrap();
        let top = place(&f, OTHER, 10_200).await.unwrap().bid;

        assert_eq!(
            withdraw(&f, top.id, OTHER).await.unwrap_err(),
            EngineError::HighestBid
        );
    }

    #[tokio::test]
    async fn only_the_bidder_may_withdraw() {
        let f = fixture().await;
        let first = place(&f, BIDDER, 10_100).await.unwrap().bid;
        place(&f, OTHER, 10_200).await.unwrap();

        assert_eq!(
            withdraw(&f, first.id, OTHER).await.unwrap_err(),
            EngineError::NotYourBid
        );
    }

    #[tokio::test]
    async fn double_withdrawal_rejected() {
        let f = fixture().await;
        let first = place(&f, BIDDER, 10_100).await.unwrap().bid;
        place(&f, OTHER, 10_200).await.unwrap();

        withdraw(&f, first.id, BIDDER).await.unwrap();
        assert_eq!(
            withdraw(&f, first.id, BIDDER).await.unwrap_err(),
            EngineError::AlreadyWithdrawn
        );
    }

    #[tokio::test]
    async fn withdrawal_after_end_rejected() {
        let f = fixture().await;
        let first = place(&f, BIDDER, 10_100).await.unwrap().bid;
        place(&f, OTHER, 10_200).await.unwrap();

        f.clock.set(f.auction.end_time);
        assert_eq!(
            withdraw(&f, first.id, BIDDER).await.unwrap_err(),
            EngineError::WithdrawAfterEnd
        );
    }
}

// endregion: --- Tests
