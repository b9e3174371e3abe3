use std::{
    net::SocketAddr,
    sync::atomic::{AtomicU64, Ordering},
};

use jsonrpsee::{
    core::{RpcResult, async_trait},
    server::{RpcServiceBuilder, Server, ServerHandle},
    types::ErrorObject,
};
use tower_http::{
    request_id::{
        MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
    },
    trace::{DefaultOnFailure, DefaultOnResponse, TraceLayer},
};
use veridex::{
    engine::{self, TradeExecution, TradeQuote},
    queries,
    state::{
        Market, MarketBuilder, MarketStatus, PricePoint, Resolution,
        TradeRecord, User,
    },
    types::{MarketId, Outcome, Side, UserId},
};
use veridex_app_rpc_api::{CreateMarketRequest, RpcServer};

use crate::app::App;

fn custom_err_msg(err_msg: impl Into<String>) -> ErrorObject<'static> {
    ErrorObject::owned(-1, err_msg.into(), Option::<()>::None)
}

fn custom_err<Error>(error: Error) -> ErrorObject<'static>
where
    anyhow::Error: From<Error>,
{
    let error = anyhow::Error::from(error);
    custom_err_msg(format!("{error:#}"))
}

pub struct RpcServerImpl {
    app: App,
}

#[async_trait]
impl RpcServer for RpcServerImpl {
    async fn create_user(
        &self,
        name: String,
        initial_balance: f64,
    ) -> RpcResult<User> {
        engine::create_user(
            &self.app.env,
            &self.app.state,
            &name,
            initial_balance,
        )
        .map_err(custom_err)
    }

    async fn get_user(&self, user: UserId) -> RpcResult<User> {
        let rotxn = self.app.env.read_txn().map_err(custom_err)?;
        self.app
            .state
            .users()
            .require(&rotxn, &user)
            .map_err(custom_err)
    }

    async fn create_market(
        &self,
        request: CreateMarketRequest,
    ) -> RpcResult<Market> {
        let mut builder = MarketBuilder::new(
            request.title,
            request.creator,
            request.closes_at,
        );
        if let Some(category) = request.category {
            builder = builder.with_category(category);
        }
        match (request.source, request.criteria) {
            (Some(source), Some(criteria))
                if source != veridex::state::MANUAL_SOURCE =>
            {
                builder = builder.with_oracle(source, criteria);
            }
            (Some(source), None)
                if source != veridex::state::MANUAL_SOURCE =>
            {
                return Err(custom_err_msg(format!(
                    "oracle source {source:?} needs resolution criteria"
                )));
            }
            _ => {}
        }
        if let Some(liquidity) = request.liquidity {
            builder = builder.with_liquidity(liquidity);
        }
        if let Some(p) = request.initial_probability {
            builder = builder.with_initial_probability(p);
        }
        engine::create_market(&self.app.env, &self.app.state, builder)
            .map_err(custom_err)
    }

    async fn list_markets(
        &self,
        status: Option<MarketStatus>,
    ) -> RpcResult<Vec<Market>> {
        let rotxn = self.app.env.read_txn().map_err(custom_err)?;
        match status {
            Some(status) => self
                .app
                .state
                .markets()
                .by_status(&rotxn, status)
                .map_err(custom_err),
            None => self.app.state.markets().all(&rotxn).map_err(custom_err),
        }
    }

    async fn market_view(
        &self,
        market: MarketId,
    ) -> RpcResult<queries::MarketView> {
        let rotxn = self.app.env.read_txn().map_err(custom_err)?;
        queries::market_view(&self.app.state, &rotxn, &market)
            .map_err(custom_err)
    }

    async fn quote_buy(
        &self,
        market: MarketId,
        side: Side,
        amount: f64,
    ) -> RpcResult<TradeQuote> {
        self.app
            .engine
            .quote_buy(&market, side, amount)
            .map_err(custom_err)
    }

    async fn quote_sell(
        &self,
        market: MarketId,
        side: Side,
        shares: f64,
    ) -> RpcResult<TradeQuote> {
        self.app
            .engine
            .quote_sell(&market, side, shares)
            .map_err(custom_err)
    }

    async fn buy(
        &self,
        user: UserId,
        market: MarketId,
        side: Side,
        amount: f64,
    ) -> RpcResult<TradeExecution> {
        self.app
            .engine
            .execute_buy(&user, &market, side, amount)
            .map_err(custom_err)
    }

    async fn sell(
        &self,
        user: UserId,
        market: MarketId,
        side: Side,
        shares: f64,
    ) -> RpcResult<TradeExecution> {
        self.app
            .engine
            .execute_sell(&user, &market, side, shares)
            .map_err(custom_err)
    }

    async fn resolve_market(
        &self,
        market: MarketId,
        outcome: Option<Outcome>,
        resolved_by: Option<String>,
    ) -> RpcResult<veridex::resolver::ResolutionReport> {
        self.app
            .resolver
            .resolve(market, outcome, resolved_by.as_deref())
            .await
            .map_err(custom_err)
    }

    async fn get_resolution(&self, market: MarketId) -> RpcResult<Resolution> {
        let rotxn = self.app.env.read_txn().map_err(custom_err)?;
        self.app
            .state
            .resolutions()
            .require(&rotxn, &market)
            .map_err(custom_err)
    }

    async fn portfolio(&self, user: UserId) -> RpcResult<queries::Portfolio> {
        let rotxn = self.app.env.read_txn().map_err(custom_err)?;
        queries::portfolio(&self.app.state, &rotxn, &user).map_err(custom_err)
    }

    async fn market_stats(
        &self,
        market: MarketId,
    ) -> RpcResult<queries::MarketStats> {
        let rotxn = self.app.env.read_txn().map_err(custom_err)?;
        queries::market_stats(&self.app.state, &rotxn, &market)
            .map_err(custom_err)
    }

    async fn price_history(
        &self,
        market: MarketId,
    ) -> RpcResult<Vec<PricePoint>> {
        let rotxn = self.app.env.read_txn().map_err(custom_err)?;
        queries::price_history(&self.app.state, &rotxn, &market)
            .map_err(custom_err)
    }

    async fn recent_trades(
        &self,
        market: MarketId,
        limit: Option<usize>,
    ) -> RpcResult<Vec<TradeRecord>> {
        let rotxn = self.app.env.read_txn().map_err(custom_err)?;
        queries::recent_trades(
            &self.app.state,
            &rotxn,
            &market,
            limit.unwrap_or(50),
        )
        .map_err(custom_err)
    }
}

#[derive(Clone, Debug, Default)]
struct RequestIdMaker;

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(0);

impl MakeRequestId for RequestIdMaker {
    fn make_request_id<B>(
        &mut self,
        _request: &http::Request<B>,
    ) -> Option<RequestId> {
        let id = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        http::HeaderValue::from_str(&id.to_string())
            .ok()
            .map(RequestId::new)
    }
}

pub async fn run_server(
    app: App,
    rpc_addr: SocketAddr,
) -> anyhow::Result<(SocketAddr, ServerHandle)> {
    const REQUEST_ID_HEADER: &str = "x-request-id";

    // Ordering matters: set the request id before tracing, propagate it
    // after. See the tower-http request_id docs.
    let tracer = tower::ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(
            http::HeaderName::from_static(REQUEST_ID_HEADER),
            RequestIdMaker,
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(move |request: &http::Request<_>| {
                    let request_id = request
                        .headers()
                        .get(http::HeaderName::from_static(REQUEST_ID_HEADER))
                        .and_then(|h| h.to_str().ok())
                        .filter(|s| !s.is_empty());

                    tracing::span!(
                        tracing::Level::DEBUG,
                        "request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id,
                    )
                })
                .on_request(())
                .on_eos(())
                .on_response(
                    DefaultOnResponse::new().level(tracing::Level::INFO),
                )
                .on_failure(
                    DefaultOnFailure::new().level(tracing::Level::ERROR),
                ),
        )
        .layer(PropagateRequestIdLayer::new(http::HeaderName::from_static(
            REQUEST_ID_HEADER,
        )))
        .into_inner();

    let http_middleware = tower::ServiceBuilder::new().layer(tracer);
    let rpc_middleware = RpcServiceBuilder::new().rpc_logger(1024);

    let server = Server::builder()
        .set_http_middleware(http_middleware)
        .set_rpc_middleware(rpc_middleware)
        .build(rpc_addr)
        .await?;

    let addr = server.local_addr()?;
    let handle = server.start(RpcServerImpl { app }.into_rpc());
    Ok((addr, handle))
}
