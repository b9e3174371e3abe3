//! Trade execution against the market maker.
//!
//! Every execute call runs inside a single write transaction: balance,
//! inventory, position, trade record, and price point commit together
//! or not at all. Quotes never mutate state.

use serde::{Deserialize, Serialize};
use sneed::Env;

use crate::{
    math::lmsr,
    state::{
        State,
        error::{Error, Trade},
        history::{PricePoint, TradeKind},
        markets::Market,
        positions::Position,
    },
    types::{MarketId, Side, UserId, now_secs},
};

#[derive(Clone)]
pub struct TradingEngine {
    env: Env,
    state: State,
}

/// A priced but unexecuted trade.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TradeQuote {
    pub market: MarketId,
    pub side: Side,
    pub kind: TradeKind,
    pub shares: f64,
    pub avg_price: f64,
    /// Cash paid (buy) or received (sell).
    pub total_cash: f64,
    pub price_impact: f64,
    pub yes_price: f64,
    pub no_price: f64,
    pub new_yes_price: f64,
    pub new_no_price: f64,
}

/// A committed trade.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TradeExecution {
    pub transaction_id: u64,
    pub market: MarketId,
    pub side: Side,
    pub kind: TradeKind,
    pub shares: f64,
    pub price_per_share: f64,
    /// Cash debited (buy) or credited (sell).
    pub total_cash: f64,
    pub new_balance: f64,
    /// The surviving position; `None` when a sell emptied it.
    pub new_position: Option<Position>,
    pub yes_price: f64,
    pub no_price: f64,
}

impl TradingEngine {
    pub fn new(env: Env, state: State) -> Self {
        Self { env, state }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// Price a buy without mutating anything.
    pub fn quote_buy(
        &self,
        market_id: &MarketId,
        side: Side,
        amount: f64,
    ) -> Result<TradeQuote, Error> {
        validate_amount(amount)?;
        let rotxn = self.env.read_txn()?;
        let market = self.state.markets().require(&rotxn, market_id)?;
        ensure_open(&market)?;
        let quote = lmsr::quote_buy(&market.inventory(), side, amount)?;
        if quote.shares <= 0.0 {
            return Err(Trade::Degenerate.into());
        }
        let (yes_price, no_price) = lmsr::spot_prices(&market.inventory());
        Ok(TradeQuote {
            market: *market_id,
            side,
            kind: TradeKind::Buy,
            shares: quote.shares,
            avg_price: quote.avg_price,
            total_cash: amount,
            price_impact: quote.price_impact,
            yes_price,
            no_price,
            new_yes_price: quote.new_yes_price,
            new_no_price: quote.new_no_price,
        })
    }

    /// Price a sell without mutating anything.
    pub fn quote_sell(
        &self,
        market_id: &MarketId,
        side: Side,
        shares: f64,
    ) -> Result<TradeQuote, Error> {
        validate_shares(shares)?;
        let rotxn = self.env.read_txn()?;
        let market = self.state.markets().require(&rotxn, market_id)?;
        ensure_open(&market)?;
        let quote = lmsr::quote_sell(&market.inventory(), side, shares)?;
        if quote.proceeds <= 0.0 {
            return Err(Trade::Degenerate.into());
        }
        let (yes_price, no_price) = lmsr::spot_prices(&market.inventory());
        Ok(TradeQuote {
            market: *market_id,
            side,
            kind: TradeKind::Sell,
            shares,
            avg_price: quote.avg_price,
            total_cash: quote.proceeds,
            price_impact: quote.price_impact,
            yes_price,
            no_price,
            new_yes_price: quote.new_yes_price,
            new_no_price: quote.new_no_price,
        })
    }

    /// Spend `amount` of the user's cash on `side` shares.
    pub fn execute_buy(
        &self,
        user_id: &UserId,
        market_id: &MarketId,
        side: Side,
        amount: f64,
    ) -> Result<TradeExecution, Error> {
        validate_amount(amount)?;
        let now = now_secs();
        let mut rwtxn = self.env.write_txn()?;

        let market = self.state.markets().require(&rwtxn, market_id)?;
        ensure_open(&market)?;
        let user = self.state.users().require(&rwtxn, user_id)?;
        if user.balance < amount {
            return Err(Trade::InsufficientFunds {
                balance: user.balance,
                required: amount,
            }
            .into());
        }
        let quote = lmsr::quote_buy(&market.inventory(), side, amount)?;
        if quote.shares <= 0.0 {
            return Err(Trade::Degenerate.into());
        }

        let user = self.state.users().debit(&mut rwtxn, user_id, amount)?;
        let (q_yes, q_no) = match side {
            Side::Yes => (market.q_yes + quote.shares, market.q_no),
            Side::No => (market.q_yes, market.q_no + quote.shares),
        };
        self.state
            .markets()
            .update_inventory(&mut rwtxn, market_id, q_yes, q_no)?;
        let position = self.state.positions().record_buy(
            &mut rwtxn,
            user_id,
            market_id,
            side,
            quote.shares,
            amount,
            now,
        )?;
        let record = self.state.history().append_trade(
            &mut rwtxn,
            user_id,
            market_id,
            side,
            TradeKind::Buy,
            quote.shares,
            quote.avg_price,
            amount,
            now,
        )?;
        self.state.history().append_price_point(
            &mut rwtxn,
            market_id,
            PricePoint {
                yes_price: quote.new_yes_price,
                no_price: quote.new_no_price,
                timestamp: now,
            },
        )?;
        rwtxn.commit()?;

        tracing::info!(
            user = %user_id,
            market = %market_id,
            side = %side,
            shares = quote.shares,
            amount,
            "buy executed"
        );
        Ok(TradeExecution {
            transaction_id: record.seq,
            market: *market_id,
            side,
            kind: TradeKind::Buy,
            shares: quote.shares,
            price_per_share: quote.avg_price,
            total_cash: amount,
            new_balance: user.balance,
            new_position: Some(position),
            yes_price: quote.new_yes_price,
            no_price: quote.new_no_price,
        })
    }

    /// Sell `shares_to_sell` of the user's position back to the maker.
    pub fn execute_sell(
        &self,
        user_id: &UserId,
        market_id: &MarketId,
        side: Side,
        shares_to_sell: f64,
    ) -> Result<TradeExecution, Error> {
        validate_shares(shares_to_sell)?;
        let now = now_secs();
        let mut rwtxn = self.env.write_txn()?;

        let market = self.state.markets().require(&rwtxn, market_id)?;
        ensure_open(&market)?;
        // unknown users cannot hold a position, so this also covers them
        let held = self
            .state
            .positions()
            .try_get(&rwtxn, user_id, market_id, side)?
            .map(|position| position.shares)
            .unwrap_or(0.0);
        if held < shares_to_sell {
            return Err(Trade::InsufficientShares {
                held,
                requested: shares_to_sell,
            }
            .into());
        }
        let quote =
            lmsr::quote_sell(&market.inventory(), side, shares_to_sell)?;
        if quote.proceeds <= 0.0 {
            return Err(Trade::Degenerate.into());
        }

        let user =
            self.state
                .users()
                .credit(&mut rwtxn, user_id, quote.proceeds)?;
        let (q_yes, q_no) = match side {
            Side::Yes => (market.q_yes - shares_to_sell, market.q_no),
            Side::No => (market.q_yes, market.q_no - shares_to_sell),
        };
        self.state
            .markets()
            .update_inventory(&mut rwtxn, market_id, q_yes, q_no)?;
        let position = self.state.positions().record_sell(
            &mut rwtxn,
            user_id,
            market_id,
            side,
            shares_to_sell,
            now,
        )?;
        let record = self.state.history().append_trade(
            &mut rwtxn,
            user_id,
            market_id,
            side,
            TradeKind::Sell,
            shares_to_sell,
            quote.avg_price,
            quote.proceeds,
            now,
        )?;
        self.state.history().append_price_point(
            &mut rwtxn,
            market_id,
            PricePoint {
                yes_price: quote.new_yes_price,
                no_price: quote.new_no_price,
                timestamp: now,
            },
        )?;
        rwtxn.commit()?;

        tracing::info!(
            user = %user_id,
            market = %market_id,
            side = %side,
            shares = shares_to_sell,
            proceeds = quote.proceeds,
            "sell executed"
        );
        Ok(TradeExecution {
            transaction_id: record.seq,
            market: *market_id,
            side,
            kind: TradeKind::Sell,
            shares: shares_to_sell,
            price_per_share: quote.avg_price,
            total_cash: quote.proceeds,
            new_balance: user.balance,
            new_position: position,
            yes_price: quote.new_yes_price,
            no_price: quote.new_no_price,
        })
    }
}

fn ensure_open(market: &Market) -> Result<(), Error> {
    if market.is_open() {
        Ok(())
    } else {
        Err(Trade::MarketNotOpen { market: market.id }.into())
    }
}

fn validate_amount(amount: f64) -> Result<(), Error> {
    if amount.is_finite() && amount > 0.0 {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "amount must be a positive number, got {amount}"
        )))
    }
}

fn validate_shares(shares: f64) -> Result<(), Error> {
    if shares.is_finite() && shares > 0.0 {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "share quantity must be a positive number, got {shares}"
        )))
    }
}

/// Register a market created by `builder`, stamping it with the current
/// time.
pub fn create_market(
    env: &Env,
    state: &State,
    builder: crate::state::MarketBuilder,
) -> Result<Market, Error> {
    let now = now_secs();
    let market = builder.build(now)?;
    let mut rwtxn = env.write_txn()?;
    state.markets().add(&mut rwtxn, &market)?;
    rwtxn.commit()?;
    Ok(market)
}

/// Register a user account with a starting balance.
pub fn create_user(
    env: &Env,
    state: &State,
    name: &str,
    initial_balance: f64,
) -> Result<crate::state::User, Error> {
    let now = now_secs();
    let mut rwtxn = env.write_txn()?;
    let user = state.users().create(&mut rwtxn, name, initial_balance, now)?;
    rwtxn.commit()?;
    Ok(user)
}
