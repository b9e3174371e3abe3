//! Read-only projections over committed state.

use serde::{Deserialize, Serialize};
use sneed::RoTxn;
use std::collections::HashSet;

use crate::{
    math::lmsr,
    state::{
        State,
        error::Error,
        history::{PricePoint, TradeRecord},
        markets::Market,
    },
    types::{MarketId, Side, UserId},
};

/// Market row enriched with spot prices, traded volume, and history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MarketView {
    pub market: Market,
    pub yes_price: f64,
    pub no_price: f64,
    pub volume: f64,
    pub price_history: Vec<PricePoint>,
}

/// One position enriched with current pricing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PositionView {
    pub market: MarketId,
    pub side: Side,
    pub shares: f64,
    pub avg_price: f64,
    pub current_price: f64,
    pub current_value: f64,
    pub cost_basis: f64,
    pub pnl: f64,
    pub potential_payout: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Portfolio {
    pub user: UserId,
    pub balance: f64,
    pub positions: Vec<PositionView>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct MarketStats {
    pub market: MarketId,
    pub trader_count: u64,
    pub volume: f64,
    pub transaction_count: u64,
    pub holder_count: u64,
}

pub fn market_view(
    state: &State,
    rotxn: &RoTxn,
    market_id: &MarketId,
) -> Result<MarketView, Error> {
    let market = state.markets().require(rotxn, market_id)?;
    let (yes_price, no_price) = lmsr::spot_prices(&market.inventory());
    let trades = state.history().trades_for_market(rotxn, market_id)?;
    let volume = trades.iter().map(|trade| trade.total_cash).sum();
    let price_history = state.history().price_history(rotxn, market_id)?;
    Ok(MarketView {
        market,
        yes_price,
        no_price,
        volume,
        price_history,
    })
}

/// Balance plus every position, valued at spot for open markets. On a
/// resolved market the winning side is worth 1.0 per share and the
/// losing side nothing; losing rows remain as historical records.
pub fn portfolio(
    state: &State,
    rotxn: &RoTxn,
    user_id: &UserId,
) -> Result<Portfolio, Error> {
    let user = state.users().require(rotxn, user_id)?;
    let positions = state.positions().by_user(rotxn, user_id)?;
    let mut views = Vec::with_capacity(positions.len());
    for position in positions {
        let market = state.markets().require(rotxn, &position.market)?;
        let current_price = match market.outcome {
            Some(outcome) => {
                if position.side == outcome.winning_side() {
                    1.0
                } else {
                    0.0
                }
            }
            None => lmsr::spot_price(&market.inventory(), position.side),
        };
        let current_value = position.shares * current_price;
        let cost_basis = position.shares * position.avg_price;
        views.push(PositionView {
            market: position.market,
            side: position.side,
            shares: position.shares,
            avg_price: position.avg_price,
            current_price,
            current_value,
            cost_basis,
            pnl: current_value - cost_basis,
            potential_payout: position.shares,
        });
    }
    Ok(Portfolio {
        user: *user_id,
        balance: user.balance,
        positions: views,
    })
}

pub fn market_stats(
    state: &State,
    rotxn: &RoTxn,
    market_id: &MarketId,
) -> Result<MarketStats, Error> {
    state.markets().require(rotxn, market_id)?;
    let trades = state.history().trades_for_market(rotxn, market_id)?;
    let traders: HashSet<UserId> =
        trades.iter().map(|trade| trade.user).collect();
    let volume = trades.iter().map(|trade| trade.total_cash).sum();
    let holder_count = state.positions().holder_count(rotxn, market_id)?;
    Ok(MarketStats {
        market: *market_id,
        trader_count: traders.len() as u64,
        volume,
        transaction_count: trades.len() as u64,
        holder_count,
    })
}

pub fn recent_trades(
    state: &State,
    rotxn: &RoTxn,
    market_id: &MarketId,
    limit: usize,
) -> Result<Vec<TradeRecord>, Error> {
    state.markets().require(rotxn, market_id)?;
    state.history().recent_trades(rotxn, market_id, limit)
}

pub fn price_history(
    state: &State,
    rotxn: &RoTxn,
    market_id: &MarketId,
) -> Result<Vec<PricePoint>, Error> {
    state.markets().require(rotxn, market_id)?;
    state.history().price_history(rotxn, market_id)
}
