use crate::auction::model::AuctionStatus;

/// The taxonomy bucket an error belongs to. The HTTP layer maps buckets to
/// status codes; the engines only ever speak in `EngineError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Unauthorized,
    InvalidState,
    ValidationFailed,
    Conflict,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("auction {0} not found")]
    AuctionNotFound(i64),

    #[error("bid {0} not found")]
    BidNotFound(i64),

    #[error("ad {0} not found")]
    AdNotFound(i64),

    #[error("ad {0} already has an auction")]
    AdAlreadyAuctioned(i64),

    #[error("the ad is not open for bids")]
    NotOpenForBids,

    #[error("the ad owner cannot bid on their own auction")]
    SelfBid,

    #[error("the auction has not started yet")]
    NotStarted,

    #[error("the auction has already ended")]
    Ended,

    #[error("the auction is already {0}")]
    AlreadyTerminal(AuctionStatus),

    #[error("the auction has already been awarded")]
    AlreadyAwarded,

    #[error("bid must be at least {minimum}")]
    BidTooLow {
        minimum: i64,
        current: Option<i64>,
        increment: i64,
    },

    #[error("comment must not exceed {limit} characters")]
    CommentTooLong { limit: usize },

    #[error("only the bidder may withdraw this bid")]
    NotYourBid,

    #[error("the bid has already been withdrawn")]
    AlreadyWithdrawn,

    #[error("bids can no longer be withdrawn, the auction has ended")]
    WithdrawAfterEnd,

    #[error("the current highest bid cannot be withdrawn")]
    HighestBid,

    #[error("only the auction owner may do this")]
    NotYourAuction,

    #[error("the auction cannot be closed before its end time")]
    CloseBeforeEnd,

    #[error("an auction with bids can only be cancelled by an administrator")]
    CancelWithBids,

    #[error("invalid auction: {0}")]
    InvalidAuction(String),

    #[error("the auction was modified concurrently, please retry")]
    Conflict,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        use EngineError::*;
        match self {
            AuctionNotFound(_) | BidNotFound(_) | AdNotFound(_) => ErrorKind::NotFound,
            NotOpenForBids | SelfBid | NotYourBid | WithdrawAfterEnd | HighestBid
            | NotYourAuction | CloseBeforeEnd => ErrorKind::Unauthorized,
            AdAlreadyAuctioned(_) | NotStarted | Ended | AlreadyTerminal(_) | AlreadyAwarded
            | AlreadyWithdrawn | CancelWithBids => ErrorKind::InvalidState,
            BidTooLow { .. } | CommentTooLong { .. } | InvalidAuction(_) => {
                ErrorKind::ValidationFailed
            }
            Conflict => ErrorKind::Conflict,
        }
    }

    /// Stable machine-readable code carried in error bodies.
    pub fn code(&self) -> &'static str {
        use EngineError::*;
        match self {
            AuctionNotFound(_) => "AUCTION_NOT_FOUND",
            BidNotFound(_) => "BID_NOT_FOUND",
            AdNotFound(_) => "AD_NOT_FOUND",
            AdAlreadyAuctioned(_) => "AD_ALREADY_AUCTIONED",
            NotOpenForBids => "NOT_OPEN_FOR_BIDS",
            SelfBid => "SELF_BID",
            NotStarted => "NOT_STARTED",
            Ended => "ALREADY_ENDED",
            AlreadyTerminal(_) => "ALREADY_TERMINAL",
            AlreadyAwarded => "ALREADY_AWARDED",
            BidTooLow { .. } => "LOW_BID",
            CommentTooLong { .. } => "COMMENT_TOO_LONG",
            NotYourBid => "NOT_YOUR_BID",
            AlreadyWithdrawn => "ALREADY_WITHDRAWN",
            WithdrawAfterEnd => "WITHDRAW_AFTER_END",
            HighestBid => "HIGHEST_BID",
            NotYourAuction => "NOT_YOUR_AUCTION",
            CloseBeforeEnd => "CLOSE_BEFORE_END",
            CancelWithBids => "CANCEL_WITH_BIDS",
            InvalidAuction(_) => "INVALID_AUCTION",
            Conflict => "VERSION_CONFLICT",
        }
    }
}
