//! RPC API

use jsonrpsee::{core::RpcResult, proc_macros::rpc};
use serde::{Deserialize, Serialize};
use veridex::{
    engine::{TradeExecution, TradeQuote},
    queries::{MarketStats, MarketView, Portfolio},
    resolver::ResolutionReport,
    state::{
        Market, MarketStatus, PricePoint, Resolution, TradeRecord, User,
    },
    types::{MarketId, Outcome, ResolutionCriteria, Side, Timestamp, UserId},
};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CreateMarketRequest {
    pub title: String,
    #[serde(default)]
    pub category: Option<String>,
    /// `"manual"` or a URL understood by the data fetcher. Defaults to
    /// manual resolution.
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub criteria: Option<ResolutionCriteria>,
    pub closes_at: Timestamp,
    pub creator: UserId,
    /// LMSR liquidity parameter; defaults to 100.
    #[serde(default)]
    pub liquidity: Option<f64>,
    /// Opening YES probability; defaults to 0.5.
    #[serde(default)]
    pub initial_probability: Option<f64>,
}

#[rpc(client, server)]
pub trait Rpc {
    /// Register a user account with a starting balance
    #[method(name = "create_user")]
    async fn create_user(
        &self,
        name: String,
        initial_balance: f64,
    ) -> RpcResult<User>;

    /// Get a user account
    #[method(name = "get_user")]
    async fn get_user(&self, user: UserId) -> RpcResult<User>;

    /// Create a market
    #[method(name = "create_market")]
    async fn create_market(
        &self,
        request: CreateMarketRequest,
    ) -> RpcResult<Market>;

    /// List markets, optionally filtered by status
    #[method(name = "list_markets")]
    async fn list_markets(
        &self,
        status: Option<MarketStatus>,
    ) -> RpcResult<Vec<Market>>;

    /// Market detail with spot prices, volume, and price history
    #[method(name = "market_view")]
    async fn market_view(&self, market: MarketId) -> RpcResult<MarketView>;

    /// Price a buy without executing it
    #[method(name = "quote_buy")]
    async fn quote_buy(
        &self,
        market: MarketId,
        side: Side,
        amount: f64,
    ) -> RpcResult<TradeQuote>;

    /// Price a sell without executing it
    #[method(name = "quote_sell")]
    async fn quote_sell(
        &self,
        market: MarketId,
        side: Side,
        shares: f64,
    ) -> RpcResult<TradeQuote>;

    /// Spend cash on shares of one side of a market
    #[method(name = "buy")]
    async fn buy(
        &self,
        user: UserId,
        market: MarketId,
        side: Side,
        amount: f64,
    ) -> RpcResult<TradeExecution>;

    /// Sell shares back to the market maker
    #[method(name = "sell")]
    async fn sell(
        &self,
        user: UserId,
        market: MarketId,
        side: Side,
        shares: f64,
    ) -> RpcResult<TradeExecution>;

    /// Resolve a market. With an outcome this is a manual override and
    /// `resolved_by` must name a human resolver; without one the
    /// market's configured source decides.
    #[method(name = "resolve_market")]
    async fn resolve_market(
        &self,
        market: MarketId,
        outcome: Option<Outcome>,
        resolved_by: Option<String>,
    ) -> RpcResult<ResolutionReport>;

    /// The resolution proof for a resolved market
    #[method(name = "get_resolution")]
    async fn get_resolution(&self, market: MarketId)
    -> RpcResult<Resolution>;

    /// Balance and enriched positions for a user
    #[method(name = "portfolio")]
    async fn portfolio(&self, user: UserId) -> RpcResult<Portfolio>;

    /// Aggregate trading statistics for a market
    #[method(name = "market_stats")]
    async fn market_stats(&self, market: MarketId) -> RpcResult<MarketStats>;

    /// Post-trade price snapshots for a market, oldest first
    #[method(name = "price_history")]
    async fn price_history(
        &self,
        market: MarketId,
    ) -> RpcResult<Vec<PricePoint>>;

    /// Latest trades for a market, newest first
    #[method(name = "recent_trades")]
    async fn recent_trades(
        &self,
        market: MarketId,
        limit: Option<usize>,
    ) -> RpcResult<Vec<TradeRecord>>;
}
