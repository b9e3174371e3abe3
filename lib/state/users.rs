//! User accounts and cash balances.
//!
//! Balances are mutated only by the trading engine (debit on buy,
//! credit on sell) and the resolver (credit on win), always inside the
//! caller's transaction.

use heed::types::SerdeBincode;
use serde::{Deserialize, Serialize};
use sneed::{DatabaseUnique, Env, RoTxn, RwTxn};

use crate::{
    state::error::{Error, Trade},
    types::{Timestamp, UserId},
};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub balance: f64,
    pub created_at: Timestamp,
}

#[derive(Clone)]
pub struct Dbs {
    users: DatabaseUnique<SerdeBincode<UserId>, SerdeBincode<User>>,
    /// Secondary index enforcing unique display names
    by_name: DatabaseUnique<SerdeBincode<String>, SerdeBincode<UserId>>,
}

impl Dbs {
    pub const NUM_DBS: u32 = 2;

    pub fn new(env: &Env, rwtxn: &mut RwTxn) -> Result<Self, Error> {
        Ok(Self {
            users: DatabaseUnique::create(env, rwtxn, "users")?,
            by_name: DatabaseUnique::create(env, rwtxn, "users_by_name")?,
        })
    }

    pub fn create(
        &self,
        rwtxn: &mut RwTxn,
        name: &str,
        initial_balance: f64,
        now: Timestamp,
    ) -> Result<User, Error> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Validation(
                "user name must not be empty".into(),
            ));
        }
        if !initial_balance.is_finite() || initial_balance < 0.0 {
            return Err(Error::Validation(format!(
                "initial balance must be a non-negative number, got \
                 {initial_balance}"
            )));
        }
        if self.by_name.try_get(rwtxn, &name.to_owned())?.is_some() {
            return Err(Error::NameTaken {
                name: name.to_owned(),
            });
        }
        let user = User {
            id: UserId::derive(name, now),
            name: name.to_owned(),
            balance: initial_balance,
            created_at: now,
        };
        self.users.put(rwtxn, &user.id, &user)?;
        self.by_name.put(rwtxn, &user.name, &user.id)?;
        tracing::debug!(user = %user.id, name = %user.name, "user created");
        Ok(user)
    }

    pub fn try_get(
        &self,
        rotxn: &RoTxn,
        id: &UserId,
    ) -> Result<Option<User>, Error> {
        Ok(self.users.try_get(rotxn, id)?)
    }

    pub fn require(&self, rotxn: &RoTxn, id: &UserId) -> Result<User, Error> {
        self.try_get(rotxn, id)?
            .ok_or(Error::UnknownUser { user: *id })
    }

    pub fn try_get_by_name(
        &self,
        rotxn: &RoTxn,
        name: &str,
    ) -> Result<Option<User>, Error> {
        match self.by_name.try_get(rotxn, &name.to_owned())? {
            Some(id) => self.try_get(rotxn, &id),
            None => Ok(None),
        }
    }

    /// Deduct `amount` from the user's balance. Fails with
    /// `InsufficientFunds` when the balance cannot cover it.
    pub fn debit(
        &self,
        rwtxn: &mut RwTxn,
        id: &UserId,
        amount: f64,
    ) -> Result<User, Error> {
        let mut user = self.require(rwtxn, id)?;
        if user.balance < amount {
            return Err(Trade::InsufficientFunds {
                balance: user.balance,
                required: amount,
            }
            .into());
        }
        user.balance -= amount;
        self.users.put(rwtxn, id, &user)?;
        Ok(user)
    }

    pub fn credit(
        &self,
        rwtxn: &mut RwTxn,
        id: &UserId,
        amount: f64,
    ) -> Result<User, Error> {
        let mut user = self.require(rwtxn, id)?;
        user.balance += amount;
        self.users.put(rwtxn, id, &user)?;
        Ok(user)
    }
}
