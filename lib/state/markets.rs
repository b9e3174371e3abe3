//! Binary prediction markets and their maker inventory.

use fallible_iterator::FallibleIterator;
use heed::types::SerdeBincode;
use serde::{Deserialize, Serialize};
use sneed::{DatabaseUnique, Env, RoTxn, RwTxn};

use crate::{
    math::lmsr::Inventory,
    state::error::{Error, Resolve},
    types::{
        MarketId, Outcome, ResolutionCriteria, Timestamp, UserId,
    },
};

/// Source string marking a market as human-resolved.
pub const MANUAL_SOURCE: &str = "manual";

/// Market lifecycle. Transitions are monotone:
/// `Open -> Closed -> Resolved`, where the `Closed` step may be skipped.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
pub enum MarketStatus {
    Open = 1,
    Closed = 2,
    Resolved = 3,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Market {
    pub id: MarketId,
    pub title: String,
    pub category: String,
    /// `"manual"` or a URL understood by the data fetcher.
    pub source: String,
    /// How to turn the fetched payload into an outcome. Required for
    /// oracle sources, absent for manual markets.
    pub criteria: Option<ResolutionCriteria>,
    pub closes_at: Timestamp,
    pub creator: UserId,
    /// Net outstanding YES shares; unbounded real.
    pub q_yes: f64,
    /// Net outstanding NO shares; unbounded real.
    pub q_no: f64,
    /// LMSR liquidity parameter; constant for the market's lifetime.
    pub b: f64,
    pub status: MarketStatus,
    pub outcome: Option<Outcome>,
    pub resolved_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl Market {
    pub fn inventory(&self) -> Inventory {
        Inventory {
            q_yes: self.q_yes,
            q_no: self.q_no,
            b: self.b,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == MarketStatus::Open
    }

    pub fn is_resolved(&self) -> bool {
        self.status == MarketStatus::Resolved
    }

    pub fn is_manual(&self) -> bool {
        self.source == MANUAL_SOURCE
    }
}

pub struct MarketBuilder {
    title: String,
    category: String,
    source: String,
    criteria: Option<ResolutionCriteria>,
    creator: UserId,
    closes_at: Timestamp,
    b: f64,
    initial_probability: f64,
}

impl MarketBuilder {
    pub fn new(
        title: impl Into<String>,
        creator: UserId,
        closes_at: Timestamp,
    ) -> Self {
        Self {
            title: title.into(),
            category: String::new(),
            source: MANUAL_SOURCE.to_owned(),
            criteria: None,
            creator,
            closes_at,
            b: 100.0,
            initial_probability: 0.5,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Resolve from an oracle source instead of manually.
    pub fn with_oracle(
        mut self,
        source: impl Into<String>,
        criteria: ResolutionCriteria,
    ) -> Self {
        self.source = source.into();
        self.criteria = Some(criteria);
        self
    }

    pub fn with_liquidity(mut self, b: f64) -> Self {
        self.b = b;
        self
    }

    pub fn with_initial_probability(mut self, p: f64) -> Self {
        self.initial_probability = p;
        self
    }

    pub fn build(self, now: Timestamp) -> Result<Market, Error> {
        let title = self.title.trim().to_owned();
        if title.is_empty() {
            return Err(Error::Validation(
                "market title must not be empty".into(),
            ));
        }
        if self.source != MANUAL_SOURCE && self.criteria.is_none() {
            return Err(Error::Validation(format!(
                "market with oracle source {:?} needs resolution criteria",
                self.source
            )));
        }
        let inventory =
            Inventory::for_probability(self.initial_probability, self.b)?;
        let id = MarketId::derive(&title, &self.creator, now);
        Ok(Market {
            id,
            title,
            category: self.category,
            source: self.source,
            criteria: self.criteria,
            closes_at: self.closes_at,
            creator: self.creator,
            q_yes: inventory.q_yes,
            q_no: inventory.q_no,
            b: inventory.b,
            status: MarketStatus::Open,
            outcome: None,
            resolved_at: None,
            created_at: now,
        })
    }
}

#[derive(Clone)]
pub struct Dbs {
    /// Primary market storage by id
    markets: DatabaseUnique<SerdeBincode<[u8; 6]>, SerdeBincode<Market>>,
    /// Secondary index: MarketStatus -> Vec<MarketId>
    status_index:
        DatabaseUnique<SerdeBincode<MarketStatus>, SerdeBincode<Vec<MarketId>>>,
    /// Secondary index: close time -> Vec<MarketId>, used by the due
    /// scan. Entries persist after resolution; readers re-check status.
    close_index:
        DatabaseUnique<SerdeBincode<Timestamp>, SerdeBincode<Vec<MarketId>>>,
}

impl Dbs {
    pub const NUM_DBS: u32 = 3;

    pub fn new(env: &Env, rwtxn: &mut RwTxn) -> Result<Self, Error> {
        Ok(Self {
            markets: DatabaseUnique::create(env, rwtxn, "markets")?,
            status_index: DatabaseUnique::create(
                env,
                rwtxn,
                "markets_by_status",
            )?,
            close_index: DatabaseUnique::create(
                env,
                rwtxn,
                "markets_by_close",
            )?,
        })
    }

    pub fn add(&self, rwtxn: &mut RwTxn, market: &Market) -> Result<(), Error> {
        if self.markets.try_get(rwtxn, market.id.as_bytes())?.is_some() {
            return Err(Error::Validation(format!(
                "market {} already exists",
                market.id
            )));
        }
        self.markets.put(rwtxn, market.id.as_bytes(), market)?;
        self.update_status_index(rwtxn, &market.id, None, market.status)?;
        let mut due_ids = self
            .close_index
            .try_get(rwtxn, &market.closes_at)?
            .unwrap_or_default();
        due_ids.push(market.id);
        self.close_index.put(rwtxn, &market.closes_at, &due_ids)?;
        tracing::debug!(market = %market.id, title = %market.title, "market created");
        Ok(())
    }

    pub fn try_get(
        &self,
        rotxn: &RoTxn,
        id: &MarketId,
    ) -> Result<Option<Market>, Error> {
        Ok(self.markets.try_get(rotxn, id.as_bytes())?)
    }

    pub fn require(
        &self,
        rotxn: &RoTxn,
        id: &MarketId,
    ) -> Result<Market, Error> {
        self.try_get(rotxn, id)?
            .ok_or(Error::UnknownMarket { market: *id })
    }

    pub fn all(&self, rotxn: &RoTxn) -> Result<Vec<Market>, Error> {
        let markets = self
            .markets
            .iter(rotxn)?
            .map(|(_, market)| Ok(market))
            .collect()?;
        Ok(markets)
    }

    pub fn by_status(
        &self,
        rotxn: &RoTxn,
        status: MarketStatus,
    ) -> Result<Vec<Market>, Error> {
        let ids = self
            .status_index
            .try_get(rotxn, &status)?
            .unwrap_or_default();
        let mut markets = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(market) = self.try_get(rotxn, &id)? {
                markets.push(market);
            }
        }
        Ok(markets)
    }

    /// Open markets whose close time has passed.
    pub fn due(
        &self,
        rotxn: &RoTxn,
        now: Timestamp,
    ) -> Result<Vec<Market>, Error> {
        let entries: Vec<(Timestamp, Vec<MarketId>)> = self
            .close_index
            .iter(rotxn)?
            .map(|(closes_at, ids)| Ok((closes_at, ids)))
            .collect()?;
        let mut due = Vec::new();
        for (closes_at, ids) in entries {
            if closes_at > now {
                continue;
            }
            for id in ids {
                if let Some(market) = self.try_get(rotxn, &id)? {
                    if market.is_open() {
                        due.push(market);
                    }
                }
            }
        }
        Ok(due)
    }

    /// Replace the maker inventory after a trade.
    pub fn update_inventory(
        &self,
        rwtxn: &mut RwTxn,
        id: &MarketId,
        q_yes: f64,
        q_no: f64,
    ) -> Result<Market, Error> {
        let mut market = self.require(rwtxn, id)?;
        market.q_yes = q_yes;
        market.q_no = q_no;
        self.markets.put(rwtxn, id.as_bytes(), &market)?;
        Ok(market)
    }

    /// Move a market along the `Open -> Closed -> Resolved` lifecycle.
    pub fn set_status(
        &self,
        rwtxn: &mut RwTxn,
        id: &MarketId,
        status: MarketStatus,
    ) -> Result<Market, Error> {
        let mut market = self.require(rwtxn, id)?;
        if market.status == status {
            return Ok(market);
        }
        if status < market.status || market.is_resolved() {
            return Err(Resolve::InvalidTransition {
                market: *id,
                from: market.status,
                to: status,
            }
            .into());
        }
        let old_status = market.status;
        market.status = status;
        self.markets.put(rwtxn, id.as_bytes(), &market)?;
        self.update_status_index(rwtxn, id, Some(old_status), status)?;
        Ok(market)
    }

    pub fn mark_resolved(
        &self,
        rwtxn: &mut RwTxn,
        id: &MarketId,
        outcome: Outcome,
        resolved_at: Timestamp,
    ) -> Result<Market, Error> {
        let mut market = self.require(rwtxn, id)?;
        if market.is_resolved() {
            return Err(Resolve::AlreadyResolved { market: *id }.into());
        }
        let old_status = market.status;
        market.status = MarketStatus::Resolved;
        market.outcome = Some(outcome);
        market.resolved_at = Some(resolved_at);
        self.markets.put(rwtxn, id.as_bytes(), &market)?;
        self.update_status_index(
            rwtxn,
            id,
            Some(old_status),
            MarketStatus::Resolved,
        )?;
        Ok(market)
    }

    fn update_status_index(
        &self,
        rwtxn: &mut RwTxn,
        id: &MarketId,
        old_status: Option<MarketStatus>,
        new_status: MarketStatus,
    ) -> Result<(), Error> {
        if let Some(old) = old_status {
            let mut ids =
                self.status_index.try_get(rwtxn, &old)?.unwrap_or_default();
            ids.retain(|existing| existing != id);
            if ids.is_empty() {
                self.status_index.delete(rwtxn, &old)?;
            } else {
                self.status_index.put(rwtxn, &old, &ids)?;
            }
        }
        let mut ids = self
            .status_index
            .try_get(rwtxn, &new_status)?
            .unwrap_or_default();
        if !ids.contains(id) {
            ids.push(*id);
            self.status_index.put(rwtxn, &new_status, &ids)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Operator, Scalar};

    fn creator() -> UserId {
        UserId::derive("creator", 1)
    }

    #[test]
    fn test_builder_defaults_to_even_manual_market() {
        let market = MarketBuilder::new("Will it rain?", creator(), 2000)
            .build(1000)
            .unwrap();
        assert!(market.is_manual());
        assert!(market.is_open());
        assert_eq!(market.q_yes, 0.0);
        assert_eq!(market.q_no, 0.0);
        assert_eq!(market.b, 100.0);
        assert!(market.criteria.is_none());
    }

    #[test]
    fn test_builder_rejects_blank_title() {
        assert!(matches!(
            MarketBuilder::new("   ", creator(), 2000).build(1000),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_builder_rejects_oracle_without_criteria() {
        let mut builder =
            MarketBuilder::new("BTC above 100k?", creator(), 2000);
        builder.source = "https://example.com/price".to_owned();
        assert!(matches!(builder.build(1000), Err(Error::Validation(_))));
    }

    #[test]
    fn test_builder_seeds_initial_probability() {
        let market = MarketBuilder::new("BTC above 100k?", creator(), 2000)
            .with_oracle(
                "https://example.com/price",
                ResolutionCriteria {
                    path: "price".into(),
                    operator: Operator::GreaterOrEqual,
                    value: Scalar::Number(100_000.0),
                },
            )
            .with_initial_probability(0.65)
            .build(1000)
            .unwrap();
        assert!((market.q_yes - 61.9039).abs() < 1e-3);
        assert_eq!(market.q_no, 0.0);
    }

    #[test]
    fn test_builder_rejects_non_positive_liquidity() {
        let result = MarketBuilder::new("Will it rain?", creator(), 2000)
            .with_liquidity(0.0)
            .build(1000);
        assert!(matches!(result, Err(Error::Pricing(_))));
    }
}
