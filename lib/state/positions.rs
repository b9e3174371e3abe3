//! Share positions, keyed by `(user, market, side)`.

use fallible_iterator::FallibleIterator;
use heed::types::SerdeBincode;
use serde::{Deserialize, Serialize};
use sneed::{DatabaseUnique, Env, RoTxn, RwTxn};

use crate::{
    state::error::{Error, Trade},
    types::{MarketId, Side, Timestamp, UserId},
};

/// Holdings below this are rounding residue and are deleted rather than
/// left as permanent phantom positions.
pub const DUST_SHARES: f64 = 1e-4;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub struct PositionKey {
    pub user: UserId,
    pub market: MarketId,
    pub side: Side,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Position {
    pub user: UserId,
    pub market: MarketId,
    pub side: Side,
    pub shares: f64,
    /// Weighted-average cost basis in [0, 1]. Retained unchanged on
    /// partial sells; used only for PnL reporting.
    pub avg_price: f64,
    pub updated_at: Timestamp,
}

impl Position {
    pub fn key(&self) -> PositionKey {
        PositionKey {
            user: self.user,
            market: self.market,
            side: self.side,
        }
    }
}

#[derive(Clone)]
pub struct Dbs {
    positions:
        DatabaseUnique<SerdeBincode<PositionKey>, SerdeBincode<Position>>,
    /// Compound-key index (market, side, user) -> () for payout scans
    by_market: DatabaseUnique<
        SerdeBincode<(MarketId, Side, UserId)>,
        SerdeBincode<()>,
    >,
}

impl Dbs {
    pub const NUM_DBS: u32 = 2;

    pub fn new(env: &Env, rwtxn: &mut RwTxn) -> Result<Self, Error> {
        Ok(Self {
            positions: DatabaseUnique::create(env, rwtxn, "positions")?,
            by_market: DatabaseUnique::create(
                env,
                rwtxn,
                "positions_by_market",
            )?,
        })
    }

    pub fn try_get(
        &self,
        rotxn: &RoTxn,
        user: &UserId,
        market: &MarketId,
        side: Side,
    ) -> Result<Option<Position>, Error> {
        let key = PositionKey {
            user: *user,
            market: *market,
            side,
        };
        Ok(self.positions.try_get(rotxn, &key)?)
    }

    /// Fold a buy into the position: the cost basis becomes the
    /// cash-weighted average of the old basis and this purchase.
    pub fn record_buy(
        &self,
        rwtxn: &mut RwTxn,
        user: &UserId,
        market: &MarketId,
        side: Side,
        shares: f64,
        cash_spent: f64,
        now: Timestamp,
    ) -> Result<Position, Error> {
        let mut position =
            self.try_get(rwtxn, user, market, side)?.unwrap_or(Position {
                user: *user,
                market: *market,
                side,
                shares: 0.0,
                avg_price: 0.0,
                updated_at: now,
            });
        let new_shares = position.shares + shares;
        position.avg_price =
            (position.shares * position.avg_price + cash_spent) / new_shares;
        position.shares = new_shares;
        position.updated_at = now;
        self.put(rwtxn, &position)?;
        Ok(position)
    }

    /// Remove sold shares. The remaining position keeps its historical
    /// cost basis; a dust remainder deletes the row. Returns the
    /// surviving position, if any.
    pub fn record_sell(
        &self,
        rwtxn: &mut RwTxn,
        user: &UserId,
        market: &MarketId,
        side: Side,
        shares_sold: f64,
        now: Timestamp,
    ) -> Result<Option<Position>, Error> {
        let Some(mut position) = self.try_get(rwtxn, user, market, side)?
        else {
            return Err(Trade::InsufficientShares {
                held: 0.0,
                requested: shares_sold,
            }
            .into());
        };
        if position.shares < shares_sold {
            return Err(Trade::InsufficientShares {
                held: position.shares,
                requested: shares_sold,
            }
            .into());
        }
        position.shares -= shares_sold;
        position.updated_at = now;
        if position.shares <= DUST_SHARES {
            self.delete(rwtxn, &position.key())?;
            Ok(None)
        } else {
            self.put(rwtxn, &position)?;
            Ok(Some(position))
        }
    }

    /// Every position on `side` of `market`; the payout scan.
    pub fn holders(
        &self,
        rotxn: &RoTxn,
        market: &MarketId,
        side: Side,
    ) -> Result<Vec<Position>, Error> {
        let keys: Vec<(MarketId, Side, UserId)> = self
            .by_market
            .iter(rotxn)?
            .map(|(key, ())| Ok(key))
            .collect()?;
        let mut positions = Vec::new();
        for (key_market, key_side, user) in keys {
            if key_market != *market || key_side != side {
                continue;
            }
            if let Some(position) =
                self.try_get(rotxn, &user, &key_market, key_side)?
            {
                positions.push(position);
            }
        }
        Ok(positions)
    }

    /// Number of distinct users holding either side of `market`.
    pub fn holder_count(
        &self,
        rotxn: &RoTxn,
        market: &MarketId,
    ) -> Result<u64, Error> {
        let keys: Vec<(MarketId, Side, UserId)> = self
            .by_market
            .iter(rotxn)?
            .map(|(key, ())| Ok(key))
            .collect()?;
        let holders: std::collections::HashSet<UserId> = keys
            .into_iter()
            .filter(|(key_market, _, _)| key_market == market)
            .map(|(_, _, user)| user)
            .collect();
        Ok(holders.len() as u64)
    }

    pub fn by_user(
        &self,
        rotxn: &RoTxn,
        user: &UserId,
    ) -> Result<Vec<Position>, Error> {
        let positions = self
            .positions
            .iter(rotxn)?
            .filter_map(|(key, position)| {
                Ok((key.user == *user).then_some(position))
            })
            .collect()?;
        Ok(positions)
    }

    fn put(&self, rwtxn: &mut RwTxn, position: &Position) -> Result<(), Error> {
        self.positions.put(rwtxn, &position.key(), position)?;
        self.by_market.put(
            rwtxn,
            &(position.market, position.side, position.user),
            &(),
        )?;
        Ok(())
    }

    fn delete(
        &self,
        rwtxn: &mut RwTxn,
        key: &PositionKey,
    ) -> Result<(), Error> {
        self.positions.delete(rwtxn, key)?;
        self.by_market
            .delete(rwtxn, &(key.market, key.side, key.user))?;
        Ok(())
    }
}
