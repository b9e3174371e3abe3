//! Resolution proof records: how each resolved market reached its
//! outcome.

use heed::types::SerdeBincode;
use serde::{Deserialize, Serialize};
use sneed::{DatabaseUnique, Env, RoTxn, RwTxn};

use crate::{
    state::error::{Error, Resolve},
    types::{MarketId, Outcome, Scalar, Timestamp},
};

/// One step of the resolution calculation, in order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResolutionStep {
    pub step: u32,
    pub description: String,
    pub value: Option<String>,
}

impl ResolutionStep {
    pub fn new(step: u32, description: impl Into<String>) -> Self {
        Self {
            step,
            description: description.into(),
            value: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

/// Immutable proof of how a market was resolved.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Resolution {
    pub market: MarketId,
    pub outcome: Outcome,
    pub source: String,
    /// Raw response from the data source, rendered as JSON.
    pub source_response: String,
    pub steps: Vec<ResolutionStep>,
    pub final_value: Option<Scalar>,
    pub resolved_by: String,
    pub resolved_at: Timestamp,
}

#[derive(Clone)]
pub struct Dbs {
    resolutions:
        DatabaseUnique<SerdeBincode<[u8; 6]>, SerdeBincode<Resolution>>,
}

impl Dbs {
    pub const NUM_DBS: u32 = 1;

    pub fn new(env: &Env, rwtxn: &mut RwTxn) -> Result<Self, Error> {
        Ok(Self {
            resolutions: DatabaseUnique::create(env, rwtxn, "resolutions")?,
        })
    }

    /// Record a resolution. Exactly one per market, ever.
    pub fn insert(
        &self,
        rwtxn: &mut RwTxn,
        resolution: &Resolution,
    ) -> Result<(), Error> {
        if self
            .resolutions
            .try_get(rwtxn, resolution.market.as_bytes())?
            .is_some()
        {
            return Err(Resolve::AlreadyResolved {
                market: resolution.market,
            }
            .into());
        }
        self.resolutions
            .put(rwtxn, resolution.market.as_bytes(), resolution)?;
        Ok(())
    }

    pub fn try_get(
        &self,
        rotxn: &RoTxn,
        market: &MarketId,
    ) -> Result<Option<Resolution>, Error> {
        Ok(self.resolutions.try_get(rotxn, market.as_bytes())?)
    }

    pub fn require(
        &self,
        rotxn: &RoTxn,
        market: &MarketId,
    ) -> Result<Resolution, Error> {
        self.try_get(rotxn, market)?
            .ok_or(Error::UnknownResolution { market: *market })
    }
}
