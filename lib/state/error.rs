//! State errors

use sneed::{db::error as db, env::error as env, rwtxn::error as rwtxn};
use thiserror::Error;
use transitive::Transitive;

use crate::{
    math::lmsr::LmsrError,
    types::{MarketId, UserId},
};

/// Errors raised while executing a trade
#[derive(Debug, Error)]
pub enum Trade {
    #[error("market {market} is not open for trading")]
    MarketNotOpen { market: MarketId },
    #[error("insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds { balance: f64, required: f64 },
    #[error(
        "insufficient shares: holding {held}, requested {requested}"
    )]
    InsufficientShares { held: f64, requested: f64 },
    #[error("trade is degenerate: no shares or no proceeds")]
    Degenerate,
}

/// Errors raised while resolving a market
#[derive(Debug, Error)]
pub enum Resolve {
    #[error("market {market} is already resolved")]
    AlreadyResolved { market: MarketId },
    #[error(
        "manual outcome for market {market} must name a resolver other \
         than \"auto\""
    )]
    ManualClaimsAuto { market: MarketId },
    #[error(
        "market {market} cannot move from {from:?} to {to:?}"
    )]
    InvalidTransition {
        market: MarketId,
        from: super::markets::MarketStatus,
        to: super::markets::MarketStatus,
    },
}

#[allow(clippy::duplicated_attributes)]
#[derive(Debug, Error, Transitive)]
#[transitive(from(db::Delete, db::Error))]
#[transitive(from(db::Error, sneed::Error))]
#[transitive(from(db::IterInit, db::Error))]
#[transitive(from(db::IterItem, db::Error))]
#[transitive(from(db::Last, db::Error))]
#[transitive(from(db::Put, db::Error))]
#[transitive(from(db::TryGet, db::Error))]
#[transitive(from(env::CreateDb, env::Error))]
#[transitive(from(env::Error, sneed::Error))]
#[transitive(from(env::ReadTxn, env::Error))]
#[transitive(from(env::WriteTxn, env::Error))]
#[transitive(from(rwtxn::Commit, rwtxn::Error))]
#[transitive(from(rwtxn::Error, sneed::Error))]
pub enum Error {
    #[error(transparent)]
    Db(#[from] sneed::Error),
    #[error(transparent)]
    Pricing(#[from] LmsrError),
    #[error(transparent)]
    Trade(#[from] Trade),
    #[error(transparent)]
    Resolve(#[from] Resolve),
    #[error("unknown user {user}")]
    UnknownUser { user: UserId },
    #[error("unknown market {market}")]
    UnknownMarket { market: MarketId },
    #[error("no resolution recorded for market {market}")]
    UnknownResolution { market: MarketId },
    #[error("user name {name:?} is already registered")]
    NameTaken { name: String },
    #[error("{0}")]
    Validation(String),
}
