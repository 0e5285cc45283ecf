use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Domain events emitted after a committed mutation. Delivery to bidders
/// (push, mail) is a separate layer; here they are structured log records
/// a collector can ship.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum AuctionEvent {
    AuctionCreated {
        auction_id: i64,
        ad_id: i64,
        timestamp: DateTime<Utc>,
    },
    BidPlaced {
        auction_id: i64,
        bid_id: i64,
        bidder_id: i64,
        price: i64,
        timestamp: DateTime<Utc>,
    },
    EndTimeExtended {
        auction_id: i64,
        new_end_time: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
    BidWithdrawn {
        auction_id: i64,
        bid_id: i64,
        timestamp: DateTime<Utc>,
    },
    AuctionClosed {
        auction_id: i64,
        winner_user_id: Option<i64>,
        winning_price: Option<i64>,
        reserve_met: bool,
        timestamp: DateTime<Utc>,
    },
    AuctionCancelled {
        auction_id: i64,
        timestamp: DateTime<Utc>,
    },
}

/// Emit an event on the structured log stream.
pub fn publish(event: &AuctionEvent) {
    match serde_json::to_string(event) {
        Ok(payload) => info!("{:<12} --> {}", "Event", payload),
        Err(e) => info!("{:<12} --> unserializable event: {:?} ({})", "Event", event, e),
    }
}
