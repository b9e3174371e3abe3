//! Core identifiers and shared primitive types.

use std::{
    fmt,
    str::FromStr,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Seconds since the Unix epoch.
pub type Timestamp = u64;

/// Current wall-clock time as a Unix timestamp.
pub fn now_secs() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

#[derive(Debug, Error)]
pub enum ParseIdError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
}

/// Unique identifier for a user account (16 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UserId([u8; 16]);

impl UserId {
    pub fn new(data: [u8; 16]) -> Self {
        Self(data)
    }

    /// Derive an id from the registered name and registration time.
    pub fn derive(name: &str, created_at: Timestamp) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(name.as_bytes());
        hasher.update(&created_at.to_le_bytes());
        let digest = hasher.finalize();
        let mut data = [0u8; 16];
        data.copy_from_slice(&digest.as_bytes()[..16]);
        Self(data)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for UserId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        let data: [u8; 16] =
            bytes.try_into().map_err(|bytes: Vec<u8>| {
                ParseIdError::Length {
                    expected: 16,
                    actual: bytes.len(),
                }
            })?;
        Ok(Self(data))
    }
}

impl Serialize for UserId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Unique identifier for a market (6 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MarketId([u8; 6]);

impl MarketId {
    pub fn new(data: [u8; 6]) -> Self {
        Self(data)
    }

    /// Derive an id from the market title, creator, and creation time.
    pub fn derive(
        title: &str,
        creator: &UserId,
        created_at: Timestamp,
    ) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(title.as_bytes());
        hasher.update(creator.as_bytes());
        hasher.update(&created_at.to_le_bytes());
        let digest = hasher.finalize();
        let mut data = [0u8; 6];
        data.copy_from_slice(&digest.as_bytes()[..6]);
        Self(data)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for MarketId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        let data: [u8; 6] =
            bytes.try_into().map_err(|bytes: Vec<u8>| {
                ParseIdError::Length {
                    expected: 6,
                    actual: bytes.len(),
                }
            })?;
        Ok(Self(data))
    }
}

impl Serialize for MarketId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MarketId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Error)]
#[error("expected YES or NO, got {0:?}")]
pub struct ParseSideError(String);

/// One side of a binary market.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Self::Yes => Self::No,
            Self::No => Self::Yes,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yes => write!(f, "YES"),
            Self::No => write!(f, "NO"),
        }
    }
}

impl FromStr for Side {
    type Err = ParseSideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "YES" => Ok(Self::Yes),
            "NO" => Ok(Self::No),
            _ => Err(ParseSideError(s.to_owned())),
        }
    }
}

/// The resolved outcome of a market.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Yes,
    No,
}

impl Outcome {
    /// The side that pays 1.0 per share under this outcome.
    pub fn winning_side(self) -> Side {
        match self {
            Self::Yes => Side::Yes,
            Self::No => Side::No,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yes => write!(f, "YES"),
            Self::No => write!(f, "NO"),
        }
    }
}

impl FromStr for Outcome {
    type Err = ParseSideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "YES" => Ok(Self::Yes),
            "NO" => Ok(Self::No),
            _ => Err(ParseSideError(s.to_owned())),
        }
    }
}

/// A scalar extracted from an oracle payload or configured as a
/// comparison target. Resolution criteria carry loosely typed values;
/// this is their typed form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scalar {
    String(String),
    Number(f64),
    Bool(bool),
}

impl Scalar {
    /// Decimal coercion for numeric comparisons.
    pub fn coerce_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::String(s) => s.trim().parse().ok(),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        }
    }

    /// String coercion for equality and substring comparisons.
    pub fn coerce_string(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Number(n) => n.to_string(),
            Self::Bool(b) => b.to_string(),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.coerce_string())
    }
}

#[derive(Debug, Error)]
#[error("unknown operator {0:?}")]
pub struct ParseOperatorError(String);

/// Comparison operator applied to the value extracted from an oracle
/// payload.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum Operator {
    #[serde(rename = "equals")]
    Equals,
    #[serde(rename = "not_equals")]
    NotEquals,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = "contains")]
    Contains,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::GreaterThan => ">",
            Self::GreaterOrEqual => ">=",
            Self::LessThan => "<",
            Self::LessOrEqual => "<=",
            Self::Contains => "contains",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Operator {
    type Err = ParseOperatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "equals" => Ok(Self::Equals),
            "not_equals" => Ok(Self::NotEquals),
            ">" => Ok(Self::GreaterThan),
            ">=" => Ok(Self::GreaterOrEqual),
            "<" => Ok(Self::LessThan),
            "<=" => Ok(Self::LessOrEqual),
            "contains" => Ok(Self::Contains),
            _ => Err(ParseOperatorError(s.to_owned())),
        }
    }
}

/// How an oracle-resolved market decides its outcome: extract the value
/// at `path` from the fetched payload and compare it against `value`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolutionCriteria {
    pub path: String,
    pub operator: Operator,
    pub value: Scalar,
}
