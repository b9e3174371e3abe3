//! LMSR (Logarithmic Market Scoring Rule) pricing for binary markets.
//!
//! The maker quotes against an inventory `(q_yes, q_no)` with liquidity
//! parameter `b > 0`. The cost function is
//! `C(q) = b * ln(exp(q_yes / b) + exp(q_no / b))`, evaluated with the
//! log-sum-exp trick for numerical stability. Prices stay in (0, 1) and
//! the maker's worst-case loss is bounded by `b * ln 2`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Side;

/// Absolute tolerance on the cost function when inverting it by
/// bisection.
pub const COST_TOLERANCE: f64 = 1e-4;
const MAX_BISECTION_ITERATIONS: u32 = 100;
const MAX_HI_EXPANSIONS: u32 = 64;
pub const MIN_PROBABILITY: f64 = 0.01;
pub const MAX_PROBABILITY: f64 = 0.99;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum LmsrError {
    #[error("liquidity parameter must be positive and finite, got {b}")]
    InvalidLiquidity { b: f64 },
    #[error("trade amount must be positive and finite, got {amount}")]
    InvalidAmount { amount: f64 },
    #[error("share quantity must be positive and finite, got {shares}")]
    InvalidShares { shares: f64 },
    #[error("probability must be finite, got {p}")]
    InvalidProbability { p: f64 },
    #[error("failed to bracket the target cost")]
    NoConvergence,
}

/// Maker inventory for one market. `q_yes` and `q_no` are unbounded
/// reals; only `b > 0` is required for a live market.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    pub q_yes: f64,
    pub q_no: f64,
    pub b: f64,
}

impl Inventory {
    pub fn new(q_yes: f64, q_no: f64, b: f64) -> Result<Self, LmsrError> {
        validate_liquidity(b)?;
        Ok(Self { q_yes, q_no, b })
    }

    /// Seed inventory so the opening YES price equals `p`, clamped to
    /// [0.01, 0.99]: with `q_no = 0`, `q_yes = b * ln(p / (1 - p))`.
    pub fn for_probability(p: f64, b: f64) -> Result<Self, LmsrError> {
        validate_liquidity(b)?;
        if !p.is_finite() {
            return Err(LmsrError::InvalidProbability { p });
        }
        let p = p.clamp(MIN_PROBABILITY, MAX_PROBABILITY);
        Ok(Self {
            q_yes: b * (p / (1.0 - p)).ln(),
            q_no: 0.0,
            b,
        })
    }

    pub fn quantity(&self, side: Side) -> f64 {
        match side {
            Side::Yes => self.q_yes,
            Side::No => self.q_no,
        }
    }

    pub(crate) fn with_added(&self, side: Side, shares: f64) -> Self {
        match side {
            Side::Yes => Self {
                q_yes: self.q_yes + shares,
                ..*self
            },
            Side::No => Self {
                q_no: self.q_no + shares,
                ..*self
            },
        }
    }
}

fn validate_liquidity(b: f64) -> Result<(), LmsrError> {
    if b.is_finite() && b > 0.0 {
        Ok(())
    } else {
        Err(LmsrError::InvalidLiquidity { b })
    }
}

/// `C(q) = b * (m + ln(exp(q_yes/b - m) + exp(q_no/b - m)))` where
/// `m = max(q_yes/b, q_no/b)`.
pub fn cost(inventory: &Inventory) -> f64 {
    if inventory.b <= 0.0 {
        return 0.0;
    }
    let y = inventory.q_yes / inventory.b;
    let n = inventory.q_no / inventory.b;
    let m = y.max(n);
    inventory.b * (m + ((y - m).exp() + (n - m).exp()).ln())
}

/// Spot prices `(p_yes, p_no)`. Both lie in (0, 1) and sum to 1. The
/// degenerate `b = 0` inventory quotes even odds.
pub fn spot_prices(inventory: &Inventory) -> (f64, f64) {
    if inventory.b <= 0.0 {
        return (0.5, 0.5);
    }
    let y = inventory.q_yes / inventory.b;
    let n = inventory.q_no / inventory.b;
    let m = y.max(n);
    let exp_yes = (y - m).exp();
    let exp_no = (n - m).exp();
    let p_yes = exp_yes / (exp_yes + exp_no);
    (p_yes, 1.0 - p_yes)
}

/// Spot price of a single side.
pub fn spot_price(inventory: &Inventory, side: Side) -> f64 {
    let (p_yes, p_no) = spot_prices(inventory);
    match side {
        Side::Yes => p_yes,
        Side::No => p_no,
    }
}

/// Result of inverting the cost function for a cash amount.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BuyQuote {
    /// Shares received for the cash amount.
    pub shares: f64,
    /// Exact cost increment at `shares`; never exceeds the cash paid.
    pub cost: f64,
    /// Cash paid divided by shares received.
    pub avg_price: f64,
    /// Relative move of the average price against the prior spot.
    pub price_impact: f64,
    pub spot_before: f64,
    pub new_yes_price: f64,
    pub new_no_price: f64,
}

/// Result of pricing a share sale.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SellQuote {
    pub shares: f64,
    /// Cash returned to the seller: `C(q) - C(q - s)`, floored at zero.
    pub proceeds: f64,
    pub avg_price: f64,
    pub price_impact: f64,
    pub spot_before: f64,
    pub new_yes_price: f64,
    pub new_no_price: f64,
}

/// How many shares `amount` buys: the `s >= 0` with
/// `C(q + s * e_side) - C(q) = amount`, found by bisection.
///
/// The search keeps the lower bracket, so the executed cost increment is
/// within [`COST_TOLERANCE`] below `amount` and never above it. The
/// initial upper bound is `amount * 10` (one share pays at most 1.0 on
/// a win, so the maker hands out at most ~10x shares per unit of cash
/// outside the extreme tails); the bound doubles until it brackets the
/// target.
pub fn quote_buy(
    inventory: &Inventory,
    side: Side,
    amount: f64,
) -> Result<BuyQuote, LmsrError> {
    validate_liquidity(inventory.b)?;
    if !amount.is_finite() || amount <= 0.0 {
        return Err(LmsrError::InvalidAmount { amount });
    }

    let base_cost = cost(inventory);
    let target = base_cost + amount;

    let mut lo = 0.0f64;
    let mut hi = amount * 10.0;
    let mut expansions = 0;
    while cost(&inventory.with_added(side, hi)) < target {
        hi *= 2.0;
        expansions += 1;
        if expansions > MAX_HI_EXPANSIONS || !hi.is_finite() {
            return Err(LmsrError::NoConvergence);
        }
    }

    for _ in 0..MAX_BISECTION_ITERATIONS {
        let mid = 0.5 * (lo + hi);
        let mid_cost = cost(&inventory.with_added(side, mid));
        if mid_cost <= target {
            lo = mid;
            if target - mid_cost <= COST_TOLERANCE {
                break;
            }
        } else {
            hi = mid;
        }
    }

    let shares = lo;
    let executed_cost = cost(&inventory.with_added(side, shares)) - base_cost;
    let spot_before = spot_price(inventory, side);
    let after = inventory.with_added(side, shares);
    let (new_yes_price, new_no_price) = spot_prices(&after);
    let avg_price = if shares > 0.0 { amount / shares } else { 0.0 };
    Ok(BuyQuote {
        shares,
        cost: executed_cost,
        avg_price,
        price_impact: (avg_price - spot_before) / spot_before,
        spot_before,
        new_yes_price,
        new_no_price,
    })
}

/// Proceeds for selling `shares` of `side`: the direct cost decrement
/// `C(q) - C(q - s * e_side)`, floored at zero.
pub fn quote_sell(
    inventory: &Inventory,
    side: Side,
    shares: f64,
) -> Result<SellQuote, LmsrError> {
    validate_liquidity(inventory.b)?;
    if !shares.is_finite() || shares <= 0.0 {
        return Err(LmsrError::InvalidShares { shares });
    }

    let after = inventory.with_added(side, -shares);
    let proceeds = (cost(inventory) - cost(&after)).max(0.0);
    let spot_before = spot_price(inventory, side);
    let (new_yes_price, new_no_price) = spot_prices(&after);
    let avg_price = proceeds / shares;
    Ok(SellQuote {
        shares,
        proceeds,
        avg_price,
        price_impact: (spot_before - avg_price) / spot_before,
        spot_before,
        new_yes_price,
        new_no_price,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const B: f64 = 100.0;

    fn even_inventory() -> Inventory {
        Inventory::new(0.0, 0.0, B).unwrap()
    }

    #[test]
    fn test_even_inventory_quotes_even_odds() {
        let (p_yes, p_no) = spot_prices(&even_inventory());
        assert!((p_yes - 0.5).abs() < 1e-12);
        assert!((p_no - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_prices_sum_to_one() {
        let inventories = [
            (0.0, 0.0, 1.0),
            (10.0, 5.0, 7.0),
            (1000.0, 999.0, 14400.0),
            (-250.0, 40.0, 100.0),
            (1e6, -1e6, 50.0),
        ];
        for (q_yes, q_no, b) in inventories {
            let inventory = Inventory::new(q_yes, q_no, b).unwrap();
            let (p_yes, p_no) = spot_prices(&inventory);
            assert!(
                (p_yes + p_no - 1.0).abs() < 1e-9,
                "prices must sum to 1 for {inventory:?}"
            );
            assert!(p_yes > 0.0 && p_yes < 1.0);
        }
    }

    #[test]
    fn test_degenerate_liquidity_quotes_half() {
        let inventory = Inventory {
            q_yes: 3.0,
            q_no: -2.0,
            b: 0.0,
        };
        assert_eq!(spot_prices(&inventory), (0.5, 0.5));
        assert!(quote_buy(&inventory, Side::Yes, 1.0).is_err());
    }

    // A $10 YES buy at b=100 from even inventory solves
    // 100 * ln((e^{s/100} + 1) / 2) = 10, i.e. s = 100 * ln(2e^{0.1} - 1).
    #[test]
    fn test_buy_from_even_inventory() {
        let quote = quote_buy(&even_inventory(), Side::Yes, 10.0).unwrap();
        assert!((quote.shares - 19.0903).abs() < 1e-3);
        assert!((quote.avg_price - 0.52383).abs() < 1e-3);
        assert!((quote.new_yes_price - 0.54758).abs() < 1e-3);
        assert!(quote.cost <= 10.0);
        assert!(10.0 - quote.cost <= COST_TOLERANCE);
        assert!(quote.price_impact > 0.0);
    }

    #[test]
    fn test_seed_inventory_for_probability() {
        let inventory = Inventory::for_probability(0.65, B).unwrap();
        assert!((inventory.q_yes - 61.9039).abs() < 1e-3);
        assert_eq!(inventory.q_no, 0.0);
        let (p_yes, _) = spot_prices(&inventory);
        assert!((p_yes - 0.65).abs() < 1e-6);
    }

    #[test]
    fn test_probability_is_clamped() {
        let inventory = Inventory::for_probability(0.999, B).unwrap();
        let (p_yes, _) = spot_prices(&inventory);
        assert!((p_yes - MAX_PROBABILITY).abs() < 1e-9);
    }

    #[test]
    fn test_buying_yes_never_lowers_yes_price() {
        let mut inventory = Inventory::new(-30.0, 45.0, B).unwrap();
        let mut last = spot_price(&inventory, Side::Yes);
        for _ in 0..20 {
            let quote = quote_buy(&inventory, Side::Yes, 5.0).unwrap();
            inventory = inventory.with_added(Side::Yes, quote.shares);
            let p_yes = spot_price(&inventory, Side::Yes);
            assert!(p_yes >= last);
            last = p_yes;
        }
    }

    #[test]
    fn test_buying_no_never_raises_yes_price() {
        let mut inventory = even_inventory();
        let mut last = spot_price(&inventory, Side::Yes);
        for _ in 0..20 {
            let quote = quote_buy(&inventory, Side::No, 5.0).unwrap();
            inventory = inventory.with_added(Side::No, quote.shares);
            let p_yes = spot_price(&inventory, Side::Yes);
            assert!(p_yes <= last);
            last = p_yes;
        }
    }

    // Unwinding a buy never pays out more than the maker took in.
    #[test]
    fn test_round_trip_never_profits() {
        let cases = [
            (0.0, 0.0, 100.0, 10.0),
            (61.9039, 0.0, 100.0, 250.0),
            (-40.0, 80.0, 25.0, 3.5),
            (5.0, 5.0, 1.0, 0.01),
        ];
        for (q_yes, q_no, b, amount) in cases {
            let before = Inventory::new(q_yes, q_no, b).unwrap();
            let buy = quote_buy(&before, Side::Yes, amount).unwrap();
            let after = before.with_added(Side::Yes, buy.shares);
            let sell = quote_sell(&after, Side::Yes, buy.shares).unwrap();
            assert!(
                sell.proceeds <= amount,
                "round trip profited: {} > {amount}",
                sell.proceeds
            );
        }
    }

    #[test]
    fn test_full_unwind_returns_executed_cost() {
        let before = even_inventory();
        let buy = quote_buy(&before, Side::No, 42.0).unwrap();
        let after = before.with_added(Side::No, buy.shares);
        let sell = quote_sell(&after, Side::No, buy.shares).unwrap();
        assert!((sell.proceeds - buy.cost).abs() < 1e-9);
    }

    #[test]
    fn test_hi_expansion_brackets_extreme_tails() {
        // Deep in the NO tail a dollar buys far more than 10 YES shares.
        let inventory = Inventory::new(-2000.0, 0.0, B).unwrap();
        let quote = quote_buy(&inventory, Side::Yes, 1.0).unwrap();
        assert!(quote.shares > 10.0);
        assert!(quote.cost <= 1.0);
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let inventory = even_inventory();
        assert!(matches!(
            quote_buy(&inventory, Side::Yes, 0.0),
            Err(LmsrError::InvalidAmount { .. })
        ));
        assert!(matches!(
            quote_buy(&inventory, Side::Yes, f64::NAN),
            Err(LmsrError::InvalidAmount { .. })
        ));
        assert!(matches!(
            quote_sell(&inventory, Side::No, -1.0),
            Err(LmsrError::InvalidShares { .. })
        ));
        assert!(matches!(
            Inventory::new(0.0, 0.0, -5.0),
            Err(LmsrError::InvalidLiquidity { .. })
        ));
    }
}
