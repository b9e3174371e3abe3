//! End-to-end tests for the trading engine and resolver against a real
//! LMDB environment.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tempfile::TempDir;
use veridex::{
    engine::{self, TradingEngine},
    math::lmsr,
    queries,
    resolver::{
        Resolver,
        fetch::{DataFetcher, FetchError},
        scheduler::ResolutionScheduler,
    },
    state::{
        MarketBuilder, MarketStatus, State,
        error::{Error, Resolve, Trade},
    },
    types::{
        MarketId, Operator, Outcome, ResolutionCriteria, Scalar, Side,
        UserId,
    },
};

struct TestExchange {
    _temp_dir: TempDir,
    env: sneed::Env,
    state: State,
    engine: TradingEngine,
}

impl TestExchange {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let env = {
            let mut env_open_opts = heed::EnvOpenOptions::new();
            env_open_opts
                .map_size(100 * 1024 * 1024)
                .max_dbs(State::NUM_DBS);
            unsafe { sneed::Env::open(&env_open_opts, temp_dir.path()) }
                .unwrap()
        };
        let state = State::new(&env).unwrap();
        let engine = TradingEngine::new(env.clone(), state.clone());
        Self {
            _temp_dir: temp_dir,
            env,
            state,
            engine,
        }
    }

    fn resolver(&self, fetcher: Arc<dyn DataFetcher>) -> Resolver {
        Resolver::new(self.env.clone(), self.state.clone(), fetcher)
    }

    fn create_user(&self, name: &str, balance: f64) -> UserId {
        engine::create_user(&self.env, &self.state, name, balance)
            .unwrap()
            .id
    }

    fn create_manual_market(&self, title: &str, closes_at: u64) -> MarketId {
        let creator = UserId::derive("creator", 0);
        engine::create_market(
            &self.env,
            &self.state,
            MarketBuilder::new(title, creator, closes_at),
        )
        .unwrap()
        .id
    }

    fn create_oracle_market(
        &self,
        title: &str,
        initial_probability: f64,
    ) -> MarketId {
        let creator = UserId::derive("creator", 0);
        let builder = MarketBuilder::new(title, creator, u64::MAX)
            .with_oracle(
                "https://example.com/price",
                ResolutionCriteria {
                    path: "data.value".into(),
                    operator: Operator::GreaterOrEqual,
                    value: Scalar::Number(40.0),
                },
            )
            .with_initial_probability(initial_probability);
        engine::create_market(&self.env, &self.state, builder)
            .unwrap()
            .id
    }

    fn balance(&self, user: &UserId) -> f64 {
        let rotxn = self.env.read_txn().unwrap();
        self.state.users().require(&rotxn, user).unwrap().balance
    }

    fn market_status(&self, market: &MarketId) -> MarketStatus {
        let rotxn = self.env.read_txn().unwrap();
        self.state.markets().require(&rotxn, market).unwrap().status
    }
}

struct StubFetcher(Value);

#[async_trait]
impl DataFetcher for StubFetcher {
    async fn fetch(&self, _source: &str) -> Result<Value, FetchError> {
        Ok(self.0.clone())
    }
}

struct FailingFetcher;

#[async_trait]
impl DataFetcher for FailingFetcher {
    async fn fetch(&self, _source: &str) -> Result<Value, FetchError> {
        Err(FetchError::Failed("HTTP 503 Service Unavailable".into()))
    }
}

/// Fetcher for tests that must not fetch at all.
struct PanicFetcher;

#[async_trait]
impl DataFetcher for PanicFetcher {
    async fn fetch(&self, source: &str) -> Result<Value, FetchError> {
        panic!("unexpected fetch of {source}");
    }
}

#[test]
fn test_buy_updates_every_table_atomically() {
    let exchange = TestExchange::new();
    let alice = exchange.create_user("alice", 1000.0);
    let market = exchange.create_manual_market("Will it rain?", u64::MAX);

    let execution = exchange
        .engine
        .execute_buy(&alice, &market, Side::Yes, 10.0)
        .unwrap();
    assert!((execution.shares - 19.0903).abs() < 1e-3);
    assert!((execution.price_per_share - 0.5238).abs() < 1e-3);
    assert_eq!(execution.total_cash, 10.0);
    assert_eq!(execution.new_balance, 990.0);
    assert!((execution.yes_price - 0.5476).abs() < 1e-3);

    assert_eq!(exchange.balance(&alice), 990.0);
    let rotxn = exchange.env.read_txn().unwrap();
    let row = exchange.state.markets().require(&rotxn, &market).unwrap();
    assert!((row.q_yes - execution.shares).abs() < 1e-12);
    assert_eq!(row.q_no, 0.0);
    let position = exchange
        .state
        .positions()
        .try_get(&rotxn, &alice, &market, Side::Yes)
        .unwrap()
        .unwrap();
    assert!((position.shares - execution.shares).abs() < 1e-12);
    assert!((position.avg_price - execution.price_per_share).abs() < 1e-12);
    let trades = exchange
        .state
        .history()
        .trades_for_market(&rotxn, &market)
        .unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].seq, execution.transaction_id);
    let history = exchange
        .state
        .history()
        .price_history(&rotxn, &market)
        .unwrap();
    assert_eq!(history.len(), 1);
    assert!((history[0].yes_price - execution.yes_price).abs() < 1e-12);
}

#[test]
fn test_insufficient_funds_leaves_state_unchanged() {
    let exchange = TestExchange::new();
    let bob = exchange.create_user("bob", 5.0);
    let market = exchange.create_manual_market("Will it rain?", u64::MAX);

    let result = exchange.engine.execute_buy(&bob, &market, Side::Yes, 10.0);
    assert!(matches!(
        result,
        Err(Error::Trade(Trade::InsufficientFunds { .. }))
    ));

    assert_eq!(exchange.balance(&bob), 5.0);
    let rotxn = exchange.env.read_txn().unwrap();
    let row = exchange.state.markets().require(&rotxn, &market).unwrap();
    assert_eq!(row.q_yes, 0.0);
    assert!(
        exchange
            .state
            .positions()
            .try_get(&rotxn, &bob, &market, Side::Yes)
            .unwrap()
            .is_none()
    );
    assert!(
        exchange
            .state
            .history()
            .trades_for_market(&rotxn, &market)
            .unwrap()
            .is_empty()
    );
    assert!(
        exchange
            .state
            .history()
            .price_history(&rotxn, &market)
            .unwrap()
            .is_empty()
    );
}

#[test]
fn test_sell_unwind_round_trip() {
    let exchange = TestExchange::new();
    let alice = exchange.create_user("alice", 1000.0);
    let market = exchange.create_manual_market("Will it rain?", u64::MAX);

    let buy = exchange
        .engine
        .execute_buy(&alice, &market, Side::Yes, 10.0)
        .unwrap();
    let sell = exchange
        .engine
        .execute_sell(&alice, &market, Side::Yes, buy.shares)
        .unwrap();

    // the maker never pays more to unwind than it received; the gap is
    // bounded by the bisection tolerance
    assert!(sell.total_cash <= 10.0);
    assert!(10.0 - sell.total_cash <= lmsr::COST_TOLERANCE + 1e-9);
    let expected = 1000.0 - (10.0 - sell.total_cash);
    assert!((exchange.balance(&alice) - expected).abs() < 1e-9);
    assert!(sell.new_position.is_none());

    let rotxn = exchange.env.read_txn().unwrap();
    assert!(
        exchange
            .state
            .positions()
            .try_get(&rotxn, &alice, &market, Side::Yes)
            .unwrap()
            .is_none()
    );
    let row = exchange.state.markets().require(&rotxn, &market).unwrap();
    assert!(row.q_yes.abs() < 1e-9);
    let trades = exchange
        .state
        .history()
        .trades_for_market(&rotxn, &market)
        .unwrap();
    assert_eq!(trades.len(), 2);
    let history = exchange
        .state
        .history()
        .price_history(&rotxn, &market)
        .unwrap();
    assert_eq!(history.len(), 2);
}

#[test]
fn test_selling_more_than_held_fails() {
    let exchange = TestExchange::new();
    let alice = exchange.create_user("alice", 1000.0);
    let market = exchange.create_manual_market("Will it rain?", u64::MAX);

    // a position the user never held sells as InsufficientShares
    let result = exchange.engine.execute_sell(&alice, &market, Side::No, 1.0);
    assert!(matches!(
        result,
        Err(Error::Trade(Trade::InsufficientShares { .. }))
    ));

    let buy = exchange
        .engine
        .execute_buy(&alice, &market, Side::Yes, 10.0)
        .unwrap();
    let result = exchange.engine.execute_sell(
        &alice,
        &market,
        Side::Yes,
        buy.shares * 2.0,
    );
    assert!(matches!(
        result,
        Err(Error::Trade(Trade::InsufficientShares { .. }))
    ));
}

#[test]
fn test_trading_against_closed_market_fails() {
    let exchange = TestExchange::new();
    let alice = exchange.create_user("alice", 1000.0);
    let market = exchange.create_manual_market("Will it rain?", u64::MAX);

    let mut rwtxn = exchange.env.write_txn().unwrap();
    exchange
        .state
        .markets()
        .set_status(&mut rwtxn, &market, MarketStatus::Closed)
        .unwrap();
    rwtxn.commit().unwrap();

    assert!(matches!(
        exchange.engine.execute_buy(&alice, &market, Side::Yes, 10.0),
        Err(Error::Trade(Trade::MarketNotOpen { .. }))
    ));
    assert!(matches!(
        exchange.engine.quote_buy(&market, Side::Yes, 10.0),
        Err(Error::Trade(Trade::MarketNotOpen { .. }))
    ));
}

#[test]
fn test_quote_does_not_mutate() {
    let exchange = TestExchange::new();
    let market = exchange.create_manual_market("Will it rain?", u64::MAX);

    let quote = exchange.engine.quote_buy(&market, Side::Yes, 10.0).unwrap();
    assert!((quote.shares - 19.0903).abs() < 1e-3);

    let rotxn = exchange.env.read_txn().unwrap();
    let row = exchange.state.markets().require(&rotxn, &market).unwrap();
    assert_eq!(row.q_yes, 0.0);
    assert!(
        exchange
            .state
            .history()
            .trades_for_market(&rotxn, &market)
            .unwrap()
            .is_empty()
    );
}

#[test]
fn test_validation_rejects_bad_trade_inputs() {
    let exchange = TestExchange::new();
    let alice = exchange.create_user("alice", 1000.0);
    let market = exchange.create_manual_market("Will it rain?", u64::MAX);

    assert!(matches!(
        exchange.engine.execute_buy(&alice, &market, Side::Yes, 0.0),
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        exchange.engine.execute_buy(&alice, &market, Side::Yes, -3.0),
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        exchange
            .engine
            .execute_sell(&alice, &market, Side::Yes, f64::NAN),
        Err(Error::Validation(_))
    ));

    let ghost_market = MarketId::new([9; 6]);
    assert!(matches!(
        exchange
            .engine
            .execute_buy(&alice, &ghost_market, Side::Yes, 1.0),
        Err(Error::UnknownMarket { .. })
    ));
    let ghost_user = UserId::derive("nobody", 0);
    assert!(matches!(
        exchange
            .engine
            .execute_buy(&ghost_user, &market, Side::Yes, 1.0),
        Err(Error::UnknownUser { .. })
    ));
}

#[tokio::test]
async fn test_resolution_pays_winners_and_ignores_losers() {
    let exchange = TestExchange::new();
    let alice = exchange.create_user("alice", 100.0);
    let bob = exchange.create_user("bob", 100.0);
    let market = exchange.create_manual_market("Will it rain?", u64::MAX);

    // A holds 30 YES @ 0.45, B holds 20 NO @ 0.55
    let mut rwtxn = exchange.env.write_txn().unwrap();
    exchange
        .state
        .positions()
        .record_buy(&mut rwtxn, &alice, &market, Side::Yes, 30.0, 13.5, 1)
        .unwrap();
    exchange
        .state
        .positions()
        .record_buy(&mut rwtxn, &bob, &market, Side::No, 20.0, 11.0, 1)
        .unwrap();
    rwtxn.commit().unwrap();

    let resolver = exchange.resolver(Arc::new(PanicFetcher));
    let report = resolver
        .resolve(market, Some(Outcome::Yes), Some("admin"))
        .await
        .unwrap();

    assert_eq!(report.outcome, Outcome::Yes);
    assert_eq!(report.payouts.len(), 1);
    assert_eq!(report.payouts[0].user, alice);
    assert!((report.payouts[0].amount - 30.0).abs() < 1e-12);
    assert!((exchange.balance(&alice) - 130.0).abs() < 1e-12);
    assert_eq!(exchange.balance(&bob), 100.0);
    assert_eq!(exchange.market_status(&market), MarketStatus::Resolved);

    let rotxn = exchange.env.read_txn().unwrap();
    let resolution = exchange
        .state
        .resolutions()
        .require(&rotxn, &market)
        .unwrap();
    assert_eq!(resolution.outcome, Outcome::Yes);
    assert_eq!(resolution.resolved_by, "admin");
    // the losing position survives as a historical record
    let losing = exchange
        .state
        .positions()
        .try_get(&rotxn, &bob, &market, Side::No)
        .unwrap()
        .unwrap();
    assert_eq!(losing.shares, 20.0);
}

#[tokio::test]
async fn test_resolution_is_idempotent() {
    let exchange = TestExchange::new();
    let alice = exchange.create_user("alice", 100.0);
    let market = exchange.create_manual_market("Will it rain?", u64::MAX);

    let mut rwtxn = exchange.env.write_txn().unwrap();
    exchange
        .state
        .positions()
        .record_buy(&mut rwtxn, &alice, &market, Side::Yes, 10.0, 5.0, 1)
        .unwrap();
    rwtxn.commit().unwrap();

    let resolver = exchange.resolver(Arc::new(PanicFetcher));
    resolver
        .resolve(market, Some(Outcome::Yes), Some("admin"))
        .await
        .unwrap();
    assert!((exchange.balance(&alice) - 110.0).abs() < 1e-12);

    // never double-pays
    let again = resolver
        .resolve(market, Some(Outcome::Yes), Some("admin"))
        .await;
    assert!(matches!(
        again,
        Err(Error::Resolve(Resolve::AlreadyResolved { .. }))
    ));
    assert!((exchange.balance(&alice) - 110.0).abs() < 1e-12);
}

#[tokio::test]
async fn test_manual_override_must_name_a_resolver() {
    let exchange = TestExchange::new();
    let market = exchange.create_manual_market("Will it rain?", u64::MAX);

    let resolver = exchange.resolver(Arc::new(PanicFetcher));
    let result = resolver
        .resolve(market, Some(Outcome::No), Some("auto"))
        .await;
    assert!(matches!(
        result,
        Err(Error::Resolve(Resolve::ManualClaimsAuto { .. }))
    ));
    assert_eq!(exchange.market_status(&market), MarketStatus::Open);

    // default attribution for overrides is "manual"
    let report = resolver.resolve(market, Some(Outcome::No), None).await.unwrap();
    assert_eq!(report.resolution.resolved_by, "manual");
}

#[tokio::test]
async fn test_oracle_resolution_records_proof() {
    let exchange = TestExchange::new();
    let market = exchange.create_oracle_market("BTC above 40?", 0.5);

    let fetcher = StubFetcher(json!({"data": {"value": 42}}));
    let resolver = exchange.resolver(Arc::new(fetcher));
    let report = resolver.resolve(market, None, None).await.unwrap();

    assert_eq!(report.outcome, Outcome::Yes);
    let resolution = &report.resolution;
    assert_eq!(resolution.resolved_by, "auto");
    assert_eq!(resolution.steps.len(), 4);
    assert_eq!(resolution.final_value, Some(Scalar::Number(42.0)));
    assert!(resolution.source_response.contains("42"));
}

#[tokio::test]
async fn test_oracle_condition_false_resolves_no() {
    let exchange = TestExchange::new();
    let market = exchange.create_oracle_market("BTC above 40?", 0.9);

    let fetcher = StubFetcher(json!({"data": {"value": 12}}));
    let resolver = exchange.resolver(Arc::new(fetcher));
    let report = resolver.resolve(market, None, None).await.unwrap();
    // the oracle outranks the market's own 0.9 probability
    assert_eq!(report.outcome, Outcome::No);
}

#[tokio::test]
async fn test_fetch_failure_falls_back_to_probability() {
    let exchange = TestExchange::new();
    let market = exchange.create_oracle_market("BTC above 40?", 0.65);

    let resolver = exchange.resolver(Arc::new(FailingFetcher));
    let report = resolver.resolve(market, None, None).await.unwrap();

    // p_yes = 0.65 > 0.5
    assert_eq!(report.outcome, Outcome::Yes);
    let resolution = &report.resolution;
    assert!(resolution.source_response.contains("\"fallback\":true"));
    assert!(
        resolution
            .source_response
            .contains("HTTP 503 Service Unavailable")
    );
    assert_eq!(resolution.resolved_by, "auto");
}

#[tokio::test]
async fn test_missing_path_falls_back_to_probability() {
    let exchange = TestExchange::new();
    let market = exchange.create_oracle_market("BTC above 40?", 0.2);

    let fetcher = StubFetcher(json!({"data": {"other": 1}}));
    let resolver = exchange.resolver(Arc::new(fetcher));
    let report = resolver.resolve(market, None, None).await.unwrap();

    // p_yes = 0.2 <= 0.5
    assert_eq!(report.outcome, Outcome::No);
    assert!(report.resolution.source_response.contains("\"fallback\":true"));
}

#[tokio::test]
async fn test_scheduler_sweep_resolves_due_markets() {
    let exchange = TestExchange::new();
    let due = exchange.create_manual_market("Closed yesterday", 1);
    let open = exchange.create_manual_market("Closes far out", u64::MAX);

    let resolver = Arc::new(exchange.resolver(Arc::new(PanicFetcher)));
    let scheduler = ResolutionScheduler::new(
        Arc::clone(&resolver),
        std::time::Duration::from_secs(60),
    );
    scheduler.sweep().await.unwrap();

    assert_eq!(exchange.market_status(&due), MarketStatus::Resolved);
    assert_eq!(exchange.market_status(&open), MarketStatus::Open);

    // even inventory resolves NO: p_yes is not above 0.5
    let rotxn = exchange.env.read_txn().unwrap();
    let resolution =
        exchange.state.resolutions().require(&rotxn, &due).unwrap();
    assert_eq!(resolution.outcome, Outcome::No);
    assert_eq!(resolution.resolved_by, "auto");
}

#[tokio::test]
async fn test_cash_is_conserved_within_maker_bound() {
    let exchange = TestExchange::new();
    let alice = exchange.create_user("alice", 500.0);
    let bob = exchange.create_user("bob", 500.0);
    let market = exchange.create_manual_market("Will it rain?", u64::MAX);
    let b = 100.0;

    exchange
        .engine
        .execute_buy(&alice, &market, Side::Yes, 120.0)
        .unwrap();
    exchange
        .engine
        .execute_buy(&bob, &market, Side::No, 80.0)
        .unwrap();
    exchange
        .engine
        .execute_buy(&alice, &market, Side::Yes, 40.0)
        .unwrap();

    let resolver = exchange.resolver(Arc::new(PanicFetcher));
    resolver
        .resolve(market, Some(Outcome::Yes), Some("admin"))
        .await
        .unwrap();

    let total = exchange.balance(&alice) + exchange.balance(&bob);
    // the maker's worst-case subsidy is b * ln 2
    assert!(total <= 1000.0 + b * 2.0_f64.ln() + 1e-6);
    assert!(exchange.balance(&alice) >= 0.0);
    assert!(exchange.balance(&bob) >= 0.0);
}

#[test]
fn test_portfolio_and_stats_projections() {
    let exchange = TestExchange::new();
    let alice = exchange.create_user("alice", 1000.0);
    let bob = exchange.create_user("bob", 1000.0);
    let market = exchange.create_manual_market("Will it rain?", u64::MAX);

    let buy = exchange
        .engine
        .execute_buy(&alice, &market, Side::Yes, 50.0)
        .unwrap();
    exchange
        .engine
        .execute_buy(&bob, &market, Side::No, 25.0)
        .unwrap();

    let rotxn = exchange.env.read_txn().unwrap();
    let portfolio =
        queries::portfolio(&exchange.state, &rotxn, &alice).unwrap();
    assert_eq!(portfolio.balance, 950.0);
    assert_eq!(portfolio.positions.len(), 1);
    let position = &portfolio.positions[0];
    assert!((position.shares - buy.shares).abs() < 1e-12);
    assert!((position.cost_basis - 50.0).abs() < 1e-9);
    assert!((position.potential_payout - buy.shares).abs() < 1e-12);
    assert!(
        (position.current_value
            - position.shares * position.current_price)
            .abs()
            < 1e-12
    );

    let stats =
        queries::market_stats(&exchange.state, &rotxn, &market).unwrap();
    assert_eq!(stats.trader_count, 2);
    assert_eq!(stats.transaction_count, 2);
    assert_eq!(stats.holder_count, 2);
    assert!((stats.volume - 75.0).abs() < 1e-9);

    let view = queries::market_view(&exchange.state, &rotxn, &market).unwrap();
    assert!((view.volume - 75.0).abs() < 1e-9);
    assert_eq!(view.price_history.len(), 2);
    assert!((view.yes_price + view.no_price - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_resolved_portfolio_values_losers_at_zero() {
    let exchange = TestExchange::new();
    let alice = exchange.create_user("alice", 1000.0);
    let market = exchange.create_manual_market("Will it rain?", u64::MAX);

    exchange
        .engine
        .execute_buy(&alice, &market, Side::No, 20.0)
        .unwrap();
    let resolver = exchange.resolver(Arc::new(PanicFetcher));
    resolver
        .resolve(market, Some(Outcome::Yes), Some("admin"))
        .await
        .unwrap();

    let rotxn = exchange.env.read_txn().unwrap();
    let portfolio =
        queries::portfolio(&exchange.state, &rotxn, &alice).unwrap();
    let position = &portfolio.positions[0];
    assert_eq!(position.current_price, 0.0);
    assert_eq!(position.current_value, 0.0);
    assert!(position.pnl < 0.0);
}

#[test]
fn test_weighted_average_cost_basis_across_buys() {
    let exchange = TestExchange::new();
    let alice = exchange.create_user("alice", 1000.0);
    let market = exchange.create_manual_market("Will it rain?", u64::MAX);

    let first = exchange
        .engine
        .execute_buy(&alice, &market, Side::Yes, 10.0)
        .unwrap();
    let second = exchange
        .engine
        .execute_buy(&alice, &market, Side::Yes, 10.0)
        .unwrap();

    let position = second.new_position.unwrap();
    let total_shares = first.shares + second.shares;
    assert!((position.shares - total_shares).abs() < 1e-9);
    // 20 dollars spread over every share bought
    assert!((position.avg_price - 20.0 / total_shares).abs() < 1e-9);
    // the second buy pays more per share, so the basis sits between
    assert!(position.avg_price > first.price_per_share);
    assert!(position.avg_price < second.price_per_share);
}
