// region:    --- Imports
use crate::ads::{AdDirectory, AdStatus, MemoryAdDirectory};
use crate::auction::events::{self, AuctionEvent};
use crate::auction::model::{Auction, NewAuction};
use crate::bidding::commands::{handle_place_bid, handle_withdraw_bid, PlaceBidCommand, WithdrawBidCommand};
use crate::clock::Clock;
use crate::closing::commands::{handle_cancel_auction, handle_close_auction};
use crate::error::{EngineError, ErrorKind};
use crate::scheduler::AutoCloseScheduler;
use crate::store::AuctionStore;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

// endregion: --- Imports

// region:    --- App State & Router

/// Shared handler state. The store and clock are trait objects; the ad
/// directory is the in-process stand-in for the ad-management service.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn AuctionStore>,
    pub ads: Arc<MemoryAdDirectory>,
    pub clock: Arc<dyn Clock>,
}

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ads", post(handle_create_ad))
        .route("/auctions", post(handle_create_auction).get(handle_get_auctions))
        .route("/auctions/:id", get(handle_get_auction_state))
        .route(
            "/auctions/:id/bids",
            post(handle_bid).get(handle_get_bid_history),
        )
        .route("/auctions/:id/highest-bid", get(handle_get_highest_bid))
        .route("/auctions/:id/bids/:bid_id", delete(handle_withdraw))
        .route("/auctions/:id/actions/close", post(handle_close))
        .route("/auctions/:id/actions/cancel", post(handle_cancel))
        .route("/auctions/actions/auto-close", post(handle_auto_close))
        .layer(cors)
        .layer(DefaultBodyLimit::max(1024 * 1024 * 20))
        .with_state(state)
}

// endregion: --- App State & Router

// region:    --- Identity & Error Mapping

/// Identity is resolved upstream (gateway); handlers trust these headers.
fn caller_id(headers: &HeaderMap) -> Result<i64, Response> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "missing or invalid x-user-id header"})),
            )
                .into_response()
        })
}

fn is_privileged(headers: &HeaderMap) -> bool {
    headers
        .get("x-privileged")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "true")
        .unwrap_or(false)
}

fn error_response(err: EngineError) -> Response {
    let status = match err.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
        ErrorKind::InvalidState | ErrorKind::ValidationFailed => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Conflict => StatusCode::CONFLICT,
    };
    let mut body = json!({
        "error": err.to_string(),
        "code": err.code(),
    });
    // enough detail for the caller to render an actionable message
    if let EngineError::BidTooLow {
        minimum,
        current,
        increment,
    } = &err
    {
        body["minimum_next_bid"] = json!(minimum);
        body["current_price"] = json!(current);
        body["increment"] = json!(increment);
    }
    (status, Json(body)).into_response()
}

// endregion: --- Identity & Error Mapping

// region:    --- Command Handlers

/// Register an ad in the in-process directory. Demo/test support: in
/// deployment ads come from the ad-management service.
#[derive(Debug, Deserialize)]
pub struct CreateAdRequest {
    pub owner_id: i64,
}

pub async fn handle_create_ad(
    State(state): State<AppState>,
    Json(req): Json<CreateAdRequest>,
) -> impl IntoResponse {
    let ad = state.ads.register(req.owner_id, AdStatus::Published).await;
    (StatusCode::CREATED, Json(ad))
}

/// Create the auction for a published ad.
pub async fn handle_create_auction(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(params): Json<NewAuction>,
) -> Response {
    info!("{:<12} --> create auction for ad {}", "Command", params.ad_id);
    let user_id = match caller_id(&headers) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let ad = match state.ads.get_ad(params.ad_id).await {
        Ok(ad) => ad,
        Err(e) => return error_response(e),
    };
    if user_id != ad.owner_id && !is_privileged(&headers) {
        return error_response(EngineError::NotYourAuction);
    }

    let now = state.clock.now();
    let auction = match Auction::new(params, now) {
        Ok(auction) => auction,
        Err(e) => return error_response(e),
    };
    match state.store.create_auction(auction).await {
        Ok(created) => {
            events::publish(&AuctionEvent::AuctionCreated {
                auction_id: created.id,
                ad_id: created.ad_id,
                timestamp: now,
            });
            (StatusCode::CREATED, Json(created)).into_response()
        }
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct BidRequest {
    pub price: i64,
    pub comment: Option<String>,
}

/// Place a bid.
pub async fn handle_bid(
    State(state): State<AppState>,
    Path(auction_id): Path<i64>,
    headers: HeaderMap,
    Json(req): Json<BidRequest>,
) -> Response {
    let bidder_id = match caller_id(&headers) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let cmd = PlaceBidCommand {
        auction_id,
        bidder_id,
        price: req.price,
        comment: req.comment,
    };
    match handle_place_bid(cmd, state.store.as_ref(), state.ads.as_ref(), state.clock.as_ref()).await
    {
        Ok(placed) => (StatusCode::CREATED, Json(placed)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Withdraw a bid.
pub async fn handle_withdraw(
    State(state): State<AppState>,
    Path((auction_id, bid_id)): Path<(i64, i64)>,
    headers: HeaderMap,
) -> Response {
    let requester_id = match caller_id(&headers) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let cmd = WithdrawBidCommand {
        auction_id,
        bid_id,
        requester_id,
    };
    match handle_withdraw_bid(cmd, state.store.as_ref(), state.clock.as_ref()).await {
        Ok(bid) => Json(bid).into_response(),
        Err(e) => error_response(e),
    }
}

/// Close an auction: owner after end time, privileged caller any time.
pub async fn handle_close(
    State(state): State<AppState>,
    Path(auction_id): Path<i64>,
    headers: HeaderMap,
) -> Response {
    let requester_id = match caller_id(&headers) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match handle_close_auction(
        state.store.as_ref(),
        state.ads.as_ref(),
        state.clock.as_ref(),
        auction_id,
        requester_id,
        is_privileged(&headers),
    )
    .await
    {
        Ok(result) => Json(json!({ "result": result })).into_response(),
        Err(e) => error_response(e),
    }
}

/// Cancel an auction. Owner or privileged caller only; bids lock out the
/// owner.
pub async fn handle_cancel(
    State(state): State<AppState>,
    Path(auction_id): Path<i64>,
    headers: HeaderMap,
) -> Response {
    let requester_id = match caller_id(&headers) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let privileged = is_privileged(&headers);

    let auction = match state.store.get_auction(auction_id).await {
        Ok(auction) => auction,
        Err(e) => return error_response(e),
    };
    let ad = match state.ads.get_ad(auction.ad_id).await {
        Ok(ad) => ad,
        Err(e) => return error_response(e),
    };
    if requester_id != ad.owner_id && !privileged {
        return error_response(EngineError::NotYourAuction);
    }

    match handle_cancel_auction(
        state.store.as_ref(),
        state.ads.as_ref(),
        state.clock.as_ref(),
        auction_id,
        privileged,
    )
    .await
    {
        Ok(auction) => Json(json!({"status": "cancelled", "auction": auction})).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct SweepParams {
    #[serde(default)]
    pub dry_run: bool,
}

/// Trigger one auto-close batch. The interval loop and the CLI both end
/// up here.
pub async fn handle_auto_close(
    State(state): State<AppState>,
    Query(params): Query<SweepParams>,
) -> Response {
    match AutoCloseScheduler::run_once(
        state.store.as_ref(),
        state.ads.as_ref(),
        state.clock.as_ref(),
        params.dry_run,
    )
    .await
    {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => error_response(e),
    }
}

// endregion: --- Command Handlers

// region:    --- Query Handlers

/// All auctions, newest first.
pub async fn handle_get_auctions(State(state): State<AppState>) -> Response {
    info!("{:<12} --> list auctions", "Query");
    match state.store.list_auctions().await {
        Ok(auctions) => Json(auctions).into_response(),
        Err(e) => error_response(e),
    }
}

/// One auction's current state.
pub async fn handle_get_auction_state(
    State(state): State<AppState>,
    Path(auction_id): Path<i64>,
) -> Response {
    info!("{:<12} --> auction state id: {}", "Query", auction_id);
    match state.store.get_auction(auction_id).await {
        Ok(auction) => Json(auction).into_response(),
        Err(e) => error_response(e),
    }
}

/// Bid history, newest first.
pub async fn handle_get_bid_history(
    State(state): State<AppState>,
    Path(auction_id): Path<i64>,
) -> Response {
    info!("{:<12} --> bid history id: {}", "Query", auction_id);
    match state.store.bids_for_auction(auction_id).await {
        Ok(bids) => Json(bids).into_response(),
        Err(e) => error_response(e),
    }
}

/// Raw highest bid (withdrawn included), as winner selection sees it.
pub async fn handle_get_highest_bid(
    State(state): State<AppState>,
    Path(auction_id): Path<i64>,
) -> Response {
    info!("{:<12} --> highest bid id: {}", "Query", auction_id);
    match state.store.highest_bid(auction_id).await {
        Ok(bid) => Json(bid).into_response(),
        Err(e) => error_response(e),
    }
}

// endregion: --- Query Handlers
