use crate::error::EngineError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default minimum step a new bid must clear over the current highest.
pub const DEFAULT_MINIMUM_BID_INCREMENT: i64 = 100;
/// Default trailing window in which an accepted bid extends the auction.
pub const DEFAULT_ANTI_SNIP_WINDOW_SECS: i64 = 300;
/// Default length of one anti-snipe extension.
pub const DEFAULT_ANTI_SNIP_EXTENSION_SECS: i64 = 300;
/// Auction duration bounds at creation.
pub const MIN_DURATION_SECS: i64 = 60 * 60;
pub const MAX_DURATION_SECS: i64 = 30 * 24 * 60 * 60;
/// Bid comments are free text but bounded.
pub const MAX_COMMENT_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuctionStatus {
    Active,
    Closed,
    Cancelled,
}

impl std::fmt::Display for AuctionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuctionStatus::Active => write!(f, "active"),
            AuctionStatus::Closed => write!(f, "closed"),
            AuctionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BidStatus {
    Active,
    Withdrawn,
}

/// The auction aggregate. One row per auctioned ad; every accepted bid,
/// withdrawal, closing and cancellation mutates it under the per-auction
/// version check (see the store).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Auction {
    pub id: i64,
    pub ad_id: i64,
    pub start_price: i64,
    /// Price of the current highest active bid; `None` until the first bid.
    pub last_price: Option<i64>,
    pub reserve_price: Option<i64>,
    pub minimum_bid_increment: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub anti_snip_window_seconds: i64,
    pub anti_snip_extension_seconds: i64,
    pub winner_user_id: Option<i64>,
    pub status: AuctionStatus,
    /// Count of bids ever placed. Withdrawal does not decrement it.
    pub bid_count: i64,
    pub auto_close: bool,
    /// Change counter backing the per-auction compare-and-swap.
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

/// Creation parameters, as supplied when an auction ad is published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAuction {
    pub ad_id: i64,
    pub start_price: i64,
    pub reserve_price: Option<i64>,
    pub minimum_bid_increment: Option<i64>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub anti_snip_window_seconds: Option<i64>,
    pub anti_snip_extension_seconds: Option<i64>,
    #[serde(default)]
    pub auto_close: bool,
}

impl Auction {
    /// Validate creation parameters and build the aggregate. The id is
    /// assigned by the store on insert.
    pub fn new(params: NewAuction, now: DateTime<Utc>) -> Result<Self, EngineError> {
        if params.start_price < 0 {
            return Err(EngineError::InvalidAuction(
                "start_price must not be negative".into(),
            ));
        }
        let increment = params
            .minimum_bid_increment
            .unwrap_or(DEFAULT_MINIMUM_BID_INCREMENT);
        if increment <= 0 {
            return Err(EngineError::InvalidAuction(
                "minimum_bid_increment must be positive".into(),
            ));
        }
        if let Some(reserve) = params.reserve_price {
            if reserve < params.start_price {
                return Err(EngineError::InvalidAuction(
                    "reserve_price must not be below start_price".into(),
                ));
            }
        }
        if params.end_time <= params.start_time {
            return Err(EngineError::InvalidAuction(
                "end_time must be after start_time".into(),
            ));
        }
        let duration = (params.end_time - params.start_time).num_seconds();
        if duration < MIN_DURATION_SECS {
            return Err(EngineError::InvalidAuction(
                "auction must run for at least one hour".into(),
            ));
        }
        if duration > MAX_DURATION_SECS {
            return Err(EngineError::InvalidAuction(
                "auction must not run for more than thirty days".into(),
            ));
        }
        let window = params
            .anti_snip_window_seconds
            .unwrap_or(DEFAULT_ANTI_SNIP_WINDOW_SECS);
        let extension = params
            .anti_snip_extension_seconds
            .unwrap_or(DEFAULT_ANTI_SNIP_EXTENSION_SECS);
        if window < 0 || extension < 0 {
            return Err(EngineError::InvalidAuction(
                "anti-snipe parameters must not be negative".into(),
            ));
        }

        Ok(Auction {
            id: 0,
            ad_id: params.ad_id,
            start_price: params.start_price,
            last_price: None,
            reserve_price: params.reserve_price,
            minimum_bid_increment: increment,
            start_time: params.start_time,
            end_time: params.end_time,
            anti_snip_window_seconds: window,
            anti_snip_extension_seconds: extension,
            winner_user_id: None,
            status: AuctionStatus::Active,
            bid_count: 0,
            auto_close: params.auto_close,
            version: 0,
            created_at: now,
        })
    }

    /// Smallest price the next bid must reach: current highest plus the
    /// increment, or `max(start_price, increment)` before the first bid.
    pub fn minimum_next_bid(&self) -> i64 {
        match self.last_price {
            Some(last) => last + self.minimum_bid_increment,
            None => self.start_price.max(self.minimum_bid_increment),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != AuctionStatus::Active
    }

    /// True when `now` falls inside the trailing anti-snipe window.
    /// Callers have already established `now < end_time`.
    pub fn in_anti_snipe_window(&self, now: DateTime<Utc>) -> bool {
        self.end_time - now <= Duration::seconds(self.anti_snip_window_seconds)
    }
}

/// One bid. Immutable once created except for the withdrawal flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bid {
    /// Creation order within the auction, assigned by the store.
    pub id: i64,
    pub auction_id: i64,
    pub user_id: i64,
    pub price: i64,
    pub comment: Option<String>,
    pub status: BidStatus,
    pub withdrawn_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Bid {
    pub fn new(
        auction_id: i64,
        user_id: i64,
        price: i64,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Bid {
            id: 0,
            auction_id,
            user_id,
            price,
            comment,
            status: BidStatus::Active,
            withdrawn_at: None,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> NewAuction {
        let start = Utc::now();
        NewAuction {
            ad_id: 1,
            start_price: 10_000,
            reserve_price: None,
            minimum_bid_increment: None,
            start_time: start,
            end_time: start + Duration::hours(2),
            anti_snip_window_seconds: None,
            anti_snip_extension_seconds: None,
            auto_close: false,
        }
    }

    #[test]
    fn defaults_applied_on_creation() {
        let auction = Auction::new(params(), Utc::now()).unwrap();
        assert_eq!(auction.minimum_bid_increment, 100);
        assert_eq!(auction.anti_snip_window_seconds, 300);
        assert_eq!(auction.anti_snip_extension_seconds, 300);
        assert_eq!(auction.status, AuctionStatus::Active);
        assert_eq!(auction.bid_count, 0);
        assert!(auction.last_price.is_none());
    }

    #[test]
    fn minimum_next_bid_before_and_after_first_bid() {
        let mut auction = Auction::new(params(), Utc::now()).unwrap();
        // no bids yet: floor is max(start_price, increment)
        assert_eq!(auction.minimum_next_bid(), 10_000);

        auction.last_price = Some(10_050);
        assert_eq!(auction.minimum_next_bid(), 10_150);
    }

    #[test]
    fn minimum_next_bid_uses_increment_floor_for_free_auctions() {
        let mut p = params();
        p.start_price = 0;
        let auction = Auction::new(p, Utc::now()).unwrap();
        assert_eq!(auction.minimum_next_bid(), 100);
    }

    #[test]
    fn reserve_below_start_price_rejected() {
        let mut p = params();
        p.reserve_price = Some(9_000);
        assert!(matches!(
            Auction::new(p, Utc::now()),
            Err(EngineError::InvalidAuction(_))
        ));
    }

    #[test]
    fn duration_bounds_enforced() {
        let mut short = params();
        short.end_time = short.start_time + Duration::minutes(59);
        assert!(Auction::new(short, Utc::now()).is_err());

        let mut long = params();
        long.end_time = long.start_time + Duration::days(31);
        assert!(Auction::new(long, Utc::now()).is_err());

        let mut exact = params();
        exact.end_time = exact.start_time + Duration::hours(1);
        assert!(Auction::new(exact, Utc::now()).is_ok());
    }

    #[test]
    fn non_positive_increment_rejected() {
        let mut p = params();
        p.minimum_bid_increment = Some(0);
        assert!(Auction::new(p, Utc::now()).is_err());
    }

    #[test]
    fn anti_snipe_window_boundary() {
        let auction = Auction::new(params(), Utc::now()).unwrap();
        let exactly_at_window = auction.end_time - Duration::seconds(300);
        let just_outside = auction.end_time - Duration::seconds(301);
        assert!(auction.in_anti_snipe_window(exactly_at_window));
        assert!(!auction.in_anti_snipe_window(just_outside));
    }
}
