//! Transactional persistent state.
//!
//! Every table lives in one LMDB environment. Mutations take a `RwTxn`
//! and commit atomically or roll back when the transaction is dropped;
//! reads take a `RoTxn` snapshot and never observe partial state. LMDB
//! serializes writers, which is the single-writer discipline the
//! trading engine and resolver rely on.

use heed::types::SerdeBincode;
use sneed::{DatabaseUnique, Env, UnitKey};

pub mod error;
pub mod history;
pub mod markets;
pub mod positions;
pub mod resolutions;
pub mod users;

pub use error::Error;
pub use history::{PricePoint, TradeKind, TradeRecord};
pub use markets::{
    MANUAL_SOURCE, Market, MarketBuilder, MarketStatus,
};
pub use positions::{DUST_SHARES, Position, PositionKey};
pub use resolutions::{Resolution, ResolutionStep};
pub use users::User;

#[derive(Clone)]
pub struct State {
    users: users::Dbs,
    markets: markets::Dbs,
    positions: positions::Dbs,
    history: history::Dbs,
    resolutions: resolutions::Dbs,
    _version: DatabaseUnique<UnitKey, SerdeBincode<String>>,
}

impl State {
    pub const NUM_DBS: u32 = users::Dbs::NUM_DBS
        + markets::Dbs::NUM_DBS
        + positions::Dbs::NUM_DBS
        + history::Dbs::NUM_DBS
        + resolutions::Dbs::NUM_DBS
        + 1;

    pub fn new(env: &Env) -> Result<Self, Error> {
        let mut rwtxn = env.write_txn()?;
        let users = users::Dbs::new(env, &mut rwtxn)?;
        let markets = markets::Dbs::new(env, &mut rwtxn)?;
        let positions = positions::Dbs::new(env, &mut rwtxn)?;
        let history = history::Dbs::new(env, &mut rwtxn)?;
        let resolutions = resolutions::Dbs::new(env, &mut rwtxn)?;
        let version = DatabaseUnique::create(env, &mut rwtxn, "state_version")?;
        if version.try_get(&rwtxn, &())?.is_none() {
            version.put(&mut rwtxn, &(), &crate::VERSION.to_owned())?;
        }
        rwtxn.commit()?;
        Ok(Self {
            users,
            markets,
            positions,
            history,
            resolutions,
            _version: version,
        })
    }

    pub fn users(&self) -> &users::Dbs {
        &self.users
    }

    pub fn markets(&self) -> &markets::Dbs {
        &self.markets
    }

    pub fn positions(&self) -> &positions::Dbs {
        &self.positions
    }

    pub fn history(&self) -> &history::Dbs {
        &self.history
    }

    pub fn resolutions(&self) -> &resolutions::Dbs {
        &self.resolutions
    }
}
