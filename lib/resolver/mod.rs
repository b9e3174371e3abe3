//! Market resolution: outcome determination, winner payouts, and proof
//! records.
//!
//! The resolver may suspend exactly once, at the data fetch. Every
//! store mutation happens afterwards in a single write transaction, so
//! the resolution row, the status flip, and the payouts commit
//! together.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use sneed::Env;

use crate::{
    math::lmsr,
    state::{
        State,
        error::{Error, Resolve},
        markets::{Market, MarketStatus},
        resolutions::{Resolution, ResolutionStep},
    },
    types::{MarketId, Outcome, Scalar, UserId, now_secs},
};

pub mod fetch;
pub mod scheduler;

use fetch::DataFetcher;

/// `resolved_by` recorded for oracle and fallback resolutions.
pub const AUTO_RESOLVER: &str = "auto";
/// Default `resolved_by` for manual outcome overrides.
pub const MANUAL_RESOLVER: &str = "manual";

/// Cash credited to one winning holder.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Payout {
    pub user: UserId,
    pub shares: f64,
    pub amount: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResolutionReport {
    pub market: MarketId,
    pub outcome: Outcome,
    pub resolution: Resolution,
    pub payouts: Vec<Payout>,
}

/// How the outcome was reached, before anything is persisted.
struct Verdict {
    outcome: Outcome,
    source_response: String,
    steps: Vec<ResolutionStep>,
    final_value: Option<Scalar>,
}

#[derive(Clone)]
pub struct Resolver {
    env: Env,
    state: State,
    fetcher: Arc<dyn DataFetcher>,
}

impl Resolver {
    pub fn new(env: Env, state: State, fetcher: Arc<dyn DataFetcher>) -> Self {
        Self {
            env,
            state,
            fetcher,
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// Resolve a market and pay the winning side.
    ///
    /// With `manual_outcome` set, the supplied outcome wins regardless
    /// of the configured source; `resolved_by` must then name a human
    /// resolver (defaults to `"manual"`). Without it, manual markets
    /// resolve from their current probability and oracle markets from
    /// the fetched source, falling back to the probability when the
    /// fetch or extraction fails.
    pub async fn resolve(
        &self,
        market_id: MarketId,
        manual_outcome: Option<Outcome>,
        resolved_by: Option<&str>,
    ) -> Result<ResolutionReport, Error> {
        let market = {
            let rotxn = self.env.read_txn()?;
            self.state.markets().require(&rotxn, &market_id)?
        };
        if market.is_resolved() {
            return Err(Resolve::AlreadyResolved { market: market_id }.into());
        }

        let resolved_by = match (manual_outcome, resolved_by) {
            (Some(_), Some(AUTO_RESOLVER)) => {
                return Err(
                    Resolve::ManualClaimsAuto { market: market_id }.into()
                );
            }
            (Some(_), Some(name)) => name.to_owned(),
            (Some(_), None) => MANUAL_RESOLVER.to_owned(),
            (None, name) => name.unwrap_or(AUTO_RESOLVER).to_owned(),
        };

        let verdict = match manual_outcome {
            Some(outcome) => manual_verdict(outcome),
            None if market.is_manual() => probability_verdict(&market, None),
            None => match self.fetcher.fetch(&market.source).await {
                Ok(payload) => oracle_verdict(&market, &payload),
                Err(err) => {
                    tracing::warn!(
                        market = %market_id,
                        error = %err,
                        "data fetch failed, falling back to probability"
                    );
                    probability_verdict(&market, Some(err.to_string()))
                }
            },
        };

        let now = now_secs();
        let resolution = Resolution {
            market: market_id,
            outcome: verdict.outcome,
            source: market.source.clone(),
            source_response: verdict.source_response,
            steps: verdict.steps,
            final_value: verdict.final_value,
            resolved_by,
            resolved_at: now,
        };

        let mut rwtxn = self.env.write_txn()?;
        // the market may have been resolved between the probe above and
        // taking the write lock; re-check under it
        let market = self.state.markets().require(&rwtxn, &market_id)?;
        if market.is_resolved() {
            return Err(Resolve::AlreadyResolved { market: market_id }.into());
        }
        self.state.resolutions().insert(&mut rwtxn, &resolution)?;
        self.state.markets().mark_resolved(
            &mut rwtxn,
            &market_id,
            verdict.outcome,
            now,
        )?;
        let winners = self.state.positions().holders(
            &rwtxn,
            &market_id,
            verdict.outcome.winning_side(),
        )?;
        let mut payouts = Vec::with_capacity(winners.len());
        for position in winners {
            let amount = position.shares;
            self.state
                .users()
                .credit(&mut rwtxn, &position.user, amount)?;
            payouts.push(Payout {
                user: position.user,
                shares: position.shares,
                amount,
            });
        }
        rwtxn.commit()?;

        tracing::info!(
            market = %market_id,
            outcome = %verdict.outcome,
            winners = payouts.len(),
            "market resolved"
        );
        Ok(ResolutionReport {
            market: market_id,
            outcome: verdict.outcome,
            resolution,
            payouts,
        })
    }

    /// Open markets whose close time has passed.
    pub fn list_due(&self, now: u64) -> Result<Vec<Market>, Error> {
        let rotxn = self.env.read_txn()?;
        self.state.markets().due(&rotxn, now)
    }

    /// Take a market out of trading without resolving it. Used by the
    /// scheduler when resolution keeps failing.
    pub fn close(&self, market_id: MarketId) -> Result<(), Error> {
        let mut rwtxn = self.env.write_txn()?;
        self.state
            .markets()
            .set_status(&mut rwtxn, &market_id, MarketStatus::Closed)?;
        rwtxn.commit()?;
        Ok(())
    }
}

fn manual_verdict(outcome: Outcome) -> Verdict {
    Verdict {
        outcome,
        source_response: json!({
            "manual": true,
            "outcome": outcome,
        })
        .to_string(),
        steps: vec![
            ResolutionStep::new(1, "Market resolved manually")
                .with_value(outcome.to_string()),
        ],
        final_value: None,
    }
}

/// Resolve from the market's own probability: YES iff `p_yes > 0.5`.
/// Used for manual markets resolved automatically and as the fallback
/// when the oracle is unreachable.
fn probability_verdict(market: &Market, fetch_error: Option<String>) -> Verdict {
    let (p_yes, _) = lmsr::spot_prices(&market.inventory());
    let outcome = if p_yes > 0.5 { Outcome::Yes } else { Outcome::No };
    let mut steps = Vec::new();
    let mut step = 1;
    if let Some(error) = &fetch_error {
        steps.push(
            ResolutionStep::new(step, "Data fetch failed")
                .with_value(error.clone()),
        );
        step += 1;
        steps.push(ResolutionStep::new(
            step,
            "Falling back to market probability",
        ));
        step += 1;
    }
    steps.push(
        ResolutionStep::new(step, "Read market probability")
            .with_value(format!("p_yes = {p_yes:.6}")),
    );
    step += 1;
    steps.push(
        ResolutionStep::new(
            step,
            format!("Concluded {outcome}: p_yes > 0.5 is {}", p_yes > 0.5),
        )
        .with_value(outcome.to_string()),
    );
    let source_response = match fetch_error {
        Some(error) => json!({
            "fallback": true,
            "error": error,
            "probability": p_yes,
        })
        .to_string(),
        None => json!({
            "manual": true,
            "probability": p_yes,
        })
        .to_string(),
    };
    Verdict {
        outcome,
        source_response,
        steps,
        final_value: Some(Scalar::Number(p_yes)),
    }
}

/// Evaluate the market's criteria against a fetched payload. Missing
/// paths fall back to the probability verdict, with the failure noted.
fn oracle_verdict(market: &Market, payload: &serde_json::Value) -> Verdict {
    let Some(criteria) = &market.criteria else {
        return probability_verdict(
            market,
            Some("no resolution criteria configured".to_owned()),
        );
    };
    let Some(actual) = fetch::extract(payload, &criteria.path) else {
        return probability_verdict(
            market,
            Some(format!("no value at path {:?}", criteria.path)),
        );
    };
    let matched = fetch::evaluate(actual, criteria.operator, &criteria.value);
    let outcome = if matched { Outcome::Yes } else { Outcome::No };
    let steps = vec![
        ResolutionStep::new(
            1,
            format!("Fetched data from {}", market.source),
        ),
        ResolutionStep::new(
            2,
            format!("Extracted value at path {:?}", criteria.path),
        )
        .with_value(fetch::coerce_string(actual)),
        ResolutionStep::new(
            3,
            format!(
                "Evaluated {} {} {}",
                fetch::coerce_string(actual),
                criteria.operator,
                criteria.value
            ),
        )
        .with_value(matched.to_string()),
        ResolutionStep::new(4, format!("Concluded {outcome}"))
            .with_value(outcome.to_string()),
    ];
    Verdict {
        outcome,
        source_response: payload.to_string(),
        steps,
        final_value: Some(fetch::to_scalar(actual)),
    }
}
