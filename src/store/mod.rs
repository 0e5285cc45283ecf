/// Versioned auction store.
///
/// An auction and its bids are one aggregate: every mutation goes through a
/// compare-and-swap on the auction's version counter, so two writers racing
/// on the same auction cannot both commit against a stale snapshot. Engines
/// read a snapshot, apply the change to a copy, and commit with the
/// snapshot's version; a mismatch surfaces as `Conflict` and the engine
/// retries. Different auctions never contend.
// region:    --- Imports
use crate::auction::model::{Auction, AuctionStatus, Bid};
use crate::error::EngineError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

// endregion: --- Imports

// region:    --- Store Trait

#[async_trait]
pub trait AuctionStore: Send + Sync {
    /// Insert a new auction, assigning its id. Fails if the ad already
    /// has one.
    async fn create_auction(&self, auction: Auction) -> Result<Auction, EngineError>;

    async fn get_auction(&self, auction_id: i64) -> Result<Auction, EngineError>;

    /// All auctions, newest first.
    async fn list_auctions(&self) -> Result<Vec<Auction>, EngineError>;

    async fn get_bid(&self, auction_id: i64, bid_id: i64) -> Result<Bid, EngineError>;

    /// Bids for one auction, newest first.
    async fn bids_for_auction(&self, auction_id: i64) -> Result<Vec<Bid>, EngineError>;

    /// Raw maximum-price bid across all bids of the auction, withdrawn
    /// included. Winner selection at close reads this.
    async fn highest_bid(&self, auction_id: i64) -> Result<Option<Bid>, EngineError>;

    /// Active auctions flagged for auto-close whose end time has passed.
    async fn due_for_auto_close(&self, now: DateTime<Utc>) -> Result<Vec<i64>, EngineError>;

    /// Append a bid and store the mutated auction in one step. `auction`
    /// carries the snapshot version the caller read; the commit fails with
    /// `Conflict` if the stored version moved. Returns the bid with its
    /// assigned id.
    async fn commit_bid(&self, auction: Auction, bid: Bid) -> Result<Bid, EngineError>;

    /// Store a withdrawn bid under the same version check, serializing
    /// withdrawal with bid placement on the auction.
    async fn commit_withdrawal(&self, auction: Auction, bid: Bid) -> Result<Bid, EngineError>;

    /// Store a mutated auction (closing, cancellation) under the version
    /// check.
    async fn commit_auction(&self, auction: Auction) -> Result<Auction, EngineError>;
}

// endregion: --- Store Trait

// region:    --- Memory Store

struct Aggregate {
    auction: Auction,
    bids: Vec<Bid>,
}

#[derive(Default)]
struct Inner {
    auctions: HashMap<i64, Aggregate>,
    by_ad: HashMap<i64, i64>,
    next_auction_id: i64,
}

impl Inner {
    fn aggregate(&self, auction_id: i64) -> Result<&Aggregate, EngineError> {
        self.auctions
            .get(&auction_id)
            .ok_or(EngineError::AuctionNotFound(auction_id))
    }

    /// Fetch the aggregate and enforce the version check in one place.
    fn aggregate_for_commit(
        &mut self,
        snapshot: &Auction,
    ) -> Result<&mut Aggregate, EngineError> {
        let agg = self
            .auctions
            .get_mut(&snapshot.id)
            .ok_or(EngineError::AuctionNotFound(snapshot.id))?;
        if agg.auction.version != snapshot.version {
            return Err(EngineError::Conflict);
        }
        Ok(agg)
    }
}

/// In-memory implementation. Production would back this with a database
/// row version or a `SELECT ... FOR UPDATE`; the contract is the same.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuctionStore for MemoryStore {
    async fn create_auction(&self, mut auction: Auction) -> Result<Auction, EngineError> {
        let mut inner = self.inner.write().await;
        if inner.by_ad.contains_key(&auction.ad_id) {
            return Err(EngineError::AdAlreadyAuctioned(auction.ad_id));
        }
        inner.next_auction_id += 1;
        auction.id = inner.next_auction_id;
        auction.version = 1;
        inner.by_ad.insert(auction.ad_id, auction.id);
        inner.auctions.insert(
            auction.id,
            Aggregate {
                auction: auction.clone(),
                bids: Vec::new(),
            },
        );
        Ok(auction)
    }

    async fn get_auction(&self, auction_id: i64) -> Result<Auction, EngineError> {
        let inner = self.inner.read().await;
        Ok(inner.aggregate(auction_id)?.auction.clone())
    }

    async fn list_auctions(&self) -> Result<Vec<Auction>, EngineError> {
        let inner = self.inner.read().await;
        let mut auctions: Vec<Auction> = inner
            .auctions
            .values()
            .map(|agg| agg.auction.clone())
            .collect();
        auctions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(auctions)
    }

    async fn get_bid(&self, auction_id: i64, bid_id: i64) -> Result<Bid, EngineError> {
        let inner = self.inner.read().await;
        inner
            .aggregate(auction_id)?
            .bids
            .iter()
            .find(|b| b.id == bid_id)
            .cloned()
            .ok_or(EngineError::BidNotFound(bid_id))
    }

    async fn bids_for_auction(&self, auction_id: i64) -> Result<Vec<Bid>, EngineError> {
        let inner = self.inner.read().await;
        let mut bids = inner.aggregate(auction_id)?.bids.clone();
        bids.reverse();
        Ok(bids)
    }

    async fn highest_bid(&self, auction_id: i64) -> Result<Option<Bid>, EngineError> {
        let inner = self.inner.read().await;
        Ok(inner
            .aggregate(auction_id)?
            .bids
            .iter()
            .max_by_key(|b| b.price)
            .cloned())
    }

    async fn due_for_auto_close(&self, now: DateTime<Utc>) -> Result<Vec<i64>, EngineError> {
        let inner = self.inner.read().await;
        let mut due: Vec<i64> = inner
            .auctions
            .values()
            .filter(|agg| {
                agg.auction.status == AuctionStatus::Active
                    && agg.auction.auto_close
                    && agg.auction.end_time <= now
            })
            .map(|agg| agg.auction.id)
            .collect();
        due.sort_unstable();
        Ok(due)
    }

    async fn commit_bid(&self, auction: Auction, mut bid: Bid) -> Result<Bid, EngineError> {
        let mut inner = self.inner.write().await;
        let agg = inner.aggregate_for_commit(&auction)?;
        let mut stored = auction;
        stored.version += 1;
        bid.id = agg.bids.len() as i64 + 1;
        agg.bids.push(bid.clone());
        agg.auction = stored;
        Ok(bid)
    }

    async fn commit_withdrawal(&self, auction: Auction, bid: Bid) -> Result<Bid, EngineError> {
        let mut inner = self.inner.write().await;
        let agg = inner.aggregate_for_commit(&auction)?;
        let slot = agg
            .bids
            .iter_mut()
            .find(|b| b.id == bid.id)
            .ok_or(EngineError::BidNotFound(bid.id))?;
        *slot = bid.clone();
        let mut stored = auction;
        stored.version += 1;
        agg.auction = stored;
        Ok(bid)
    }

    async fn commit_auction(&self, auction: Auction) -> Result<Auction, EngineError> {
        let mut inner = self.inner.write().await;
        let agg = inner.aggregate_for_commit(&auction)?;
        let mut stored = auction;
        stored.version += 1;
        agg.auction = stored.clone();
        Ok(stored)
    }
}

// endregion: --- Memory Store
