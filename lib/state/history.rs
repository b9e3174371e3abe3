//! Append-only trade and price history.

use fallible_iterator::FallibleIterator;
use heed::types::SerdeBincode;
use serde::{Deserialize, Serialize};
use sneed::{DatabaseUnique, Env, RoTxn, RwTxn, UnitKey};

use crate::{
    state::error::Error,
    types::{MarketId, Side, Timestamp, UserId},
};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeKind {
    Buy,
    Sell,
}

/// One executed BUY or SELL. Immutable once appended.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Globally unique, monotonically increasing id.
    pub seq: u64,
    pub user: UserId,
    pub market: MarketId,
    pub side: Side,
    pub kind: TradeKind,
    pub shares: f64,
    pub price_per_share: f64,
    pub total_cash: f64,
    pub timestamp: Timestamp,
}

/// Post-trade price snapshot. Immutable once appended.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub yes_price: f64,
    pub no_price: f64,
    pub timestamp: Timestamp,
}

#[derive(Clone)]
pub struct Dbs {
    trades: DatabaseUnique<SerdeBincode<u64>, SerdeBincode<TradeRecord>>,
    /// Compound-key index (market, seq) -> () for per-market scans
    trades_by_market:
        DatabaseUnique<SerdeBincode<(MarketId, u64)>, SerdeBincode<()>>,
    next_trade_seq: DatabaseUnique<UnitKey, SerdeBincode<u64>>,
    /// Price points keyed (market, per-market seq)
    price_points:
        DatabaseUnique<SerdeBincode<(MarketId, u64)>, SerdeBincode<PricePoint>>,
    next_price_seq: DatabaseUnique<SerdeBincode<MarketId>, SerdeBincode<u64>>,
}

impl Dbs {
    pub const NUM_DBS: u32 = 5;

    pub fn new(env: &Env, rwtxn: &mut RwTxn) -> Result<Self, Error> {
        Ok(Self {
            trades: DatabaseUnique::create(env, rwtxn, "trades")?,
            trades_by_market: DatabaseUnique::create(
                env,
                rwtxn,
                "trades_by_market",
            )?,
            next_trade_seq: DatabaseUnique::create(
                env,
                rwtxn,
                "next_trade_seq",
            )?,
            price_points: DatabaseUnique::create(env, rwtxn, "price_points")?,
            next_price_seq: DatabaseUnique::create(
                env,
                rwtxn,
                "next_price_seq",
            )?,
        })
    }

    /// Append a trade, assigning its sequence number.
    #[allow(clippy::too_many_arguments)]
    pub fn append_trade(
        &self,
        rwtxn: &mut RwTxn,
        user: &UserId,
        market: &MarketId,
        side: Side,
        kind: TradeKind,
        shares: f64,
        price_per_share: f64,
        total_cash: f64,
        timestamp: Timestamp,
    ) -> Result<TradeRecord, Error> {
        let seq = self.next_trade_seq.try_get(rwtxn, &())?.unwrap_or(0);
        self.next_trade_seq.put(rwtxn, &(), &(seq + 1))?;
        let record = TradeRecord {
            seq,
            user: *user,
            market: *market,
            side,
            kind,
            shares,
            price_per_share,
            total_cash,
            timestamp,
        };
        self.trades.put(rwtxn, &seq, &record)?;
        self.trades_by_market.put(rwtxn, &(*market, seq), &())?;
        Ok(record)
    }

    /// Append a post-trade price snapshot for `market`.
    pub fn append_price_point(
        &self,
        rwtxn: &mut RwTxn,
        market: &MarketId,
        point: PricePoint,
    ) -> Result<(), Error> {
        let seq = self.next_price_seq.try_get(rwtxn, market)?.unwrap_or(0);
        self.next_price_seq.put(rwtxn, market, &(seq + 1))?;
        self.price_points.put(rwtxn, &(*market, seq), &point)?;
        Ok(())
    }

    pub fn try_get_trade(
        &self,
        rotxn: &RoTxn,
        seq: u64,
    ) -> Result<Option<TradeRecord>, Error> {
        Ok(self.trades.try_get(rotxn, &seq)?)
    }

    /// All trades for a market, oldest first.
    pub fn trades_for_market(
        &self,
        rotxn: &RoTxn,
        market: &MarketId,
    ) -> Result<Vec<TradeRecord>, Error> {
        let seqs: Vec<u64> = self
            .trades_by_market
            .iter(rotxn)?
            .filter_map(|((key_market, seq), ())| {
                Ok((key_market == *market).then_some(seq))
            })
            .collect()?;
        let mut records = Vec::with_capacity(seqs.len());
        for seq in seqs {
            if let Some(record) = self.try_get_trade(rotxn, seq)? {
                records.push(record);
            }
        }
        records.sort_by_key(|record| record.seq);
        Ok(records)
    }

    /// The latest `limit` trades for a market, newest first.
    pub fn recent_trades(
        &self,
        rotxn: &RoTxn,
        market: &MarketId,
        limit: usize,
    ) -> Result<Vec<TradeRecord>, Error> {
        let mut records = self.trades_for_market(rotxn, market)?;
        records.reverse();
        records.truncate(limit);
        Ok(records)
    }

    /// Full price history for a market, oldest first.
    pub fn price_history(
        &self,
        rotxn: &RoTxn,
        market: &MarketId,
    ) -> Result<Vec<PricePoint>, Error> {
        let mut points: Vec<(u64, PricePoint)> = self
            .price_points
            .iter(rotxn)?
            .filter_map(|((key_market, seq), point)| {
                Ok((key_market == *market).then_some((seq, point)))
            })
            .collect()?;
        points.sort_by_key(|(seq, _)| *seq);
        Ok(points.into_iter().map(|(_, point)| point).collect())
    }
}
