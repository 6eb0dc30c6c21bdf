use core::fmt;
use std::{
    fmt::{Display, Formatter},
    ops::Deref,
    str::FromStr,
};

use diesel::{
    backend::Backend,
    deserialize::{self, FromSql, FromSqlRow},
    expression::AsExpression,
    serialize::{self, Output, ToSql},
    sql_types::{BigInt, Text},
};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use secrecy::{ExposeSecret, SecretString};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use strum_macros::{EnumString, IntoStaticStr};

/// A plaintext password. Only ever held in memory long enough to be hashed
/// and validated.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct Password(pub SecretString);

impl Password {
    /// Length in characters, not bytes.
    pub fn len(&self) -> usize {
        self.0.expose_secret().chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }
}

impl Deref for Password {
    type Target = SecretString;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<String> for Password {
    fn from(value: String) -> Self {
        Self(SecretString::new(value))
    }
}

impl From<&str> for Password {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

/// Opaque bearer credential identifying a session.
#[derive(Debug, Default, Clone, Serialize, Deserialize, Hash, Eq, PartialEq)]
#[serde(transparent)]
pub struct SessionToken(pub String);

impl SessionToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<String> for SessionToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Display for SessionToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A monetary amount measured in mills (thousandths of a currency unit).
///
/// Stored as an integer; parsed, printed and serialized as a decimal string.
#[derive(
    Debug, Default, Clone, Copy, FromSqlRow, AsExpression, Hash, Eq, PartialEq, Ord, PartialOrd,
)]
#[diesel(sql_type = BigInt)]
pub struct Mills(pub i64);

impl Mills {
    pub const ZERO: Mills = Mills(0);
    pub const SCALE: u32 = 3;

    pub fn checked_add(self, rhs: Mills) -> Option<Mills> {
        self.0.checked_add(rhs.0).map(Mills)
    }

    pub fn checked_sub(self, rhs: Mills) -> Option<Mills> {
        self.0.checked_sub(rhs.0).map(Mills)
    }

    pub fn checked_mul(self, factor: i64) -> Option<Mills> {
        self.0.checked_mul(factor).map(Mills)
    }

    pub fn to_decimal(self) -> Decimal {
        Decimal::new(self.0, Self::SCALE)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseMillsError {
    #[error("invalid amount: {0}")]
    Decimal(#[from] rust_decimal::Error),
    #[error("amount {0} has more than three fractional digits")]
    TooPrecise(Decimal),
    #[error("amount {0} is out of range")]
    OutOfRange(Decimal),
}

impl TryFrom<Decimal> for Mills {
    type Error = ParseMillsError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        if value.normalize().scale() > Self::SCALE {
            return Err(ParseMillsError::TooPrecise(value));
        }
        value
            .checked_mul(Decimal::from(10_i64.pow(Self::SCALE)))
            .and_then(|scaled| scaled.to_i64())
            .map(Mills)
            .ok_or(ParseMillsError::OutOfRange(value))
    }
}

impl FromStr for Mills {
    type Err = ParseMillsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mills::try_from(Decimal::from_str(s.trim())?)
    }
}

impl Display for Mills {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.to_decimal(), f)
    }
}

impl Serialize for Mills {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        Serialize::serialize(&self.to_decimal(), serializer)
    }
}

impl<'de> Deserialize<'de> for Mills {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = <Decimal as Deserialize>::deserialize(deserializer)?;
        Mills::try_from(value).map_err(de::Error::custom)
    }
}

impl<B: Backend> FromSql<BigInt, B> for Mills
where
    i64: FromSql<BigInt, B>,
{
    fn from_sql(bytes: <B as Backend>::RawValue<'_>) -> deserialize::Result<Self> {
        i64::from_sql(bytes).map(Self)
    }
}

impl<B: Backend> ToSql<BigInt, B> for Mills
where
    i64: ToSql<BigInt, B>,
{
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, B>) -> serialize::Result {
        i64::to_sql(&self.0, out)
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    Deserialize,
    Serialize,
    FromSqlRow,
    AsExpression,
    EnumString,
    IntoStaticStr,
    strum_macros::Display,
    Hash,
    Eq,
    PartialEq,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[diesel(sql_type = Text)]
pub enum OrderType {
    Buy,
    Sell,
}

impl OrderType {
    /// Direction of the change to the share count: buys add shares, sells remove them.
    pub fn share_sign(self) -> i64 {
        match self {
            OrderType::Buy => 1,
            OrderType::Sell => -1,
        }
    }
}

impl<B: Backend> FromSql<Text, B> for OrderType
where
    String: FromSql<Text, B>,
{
    fn from_sql(bytes: <B as Backend>::RawValue<'_>) -> deserialize::Result<Self> {
        String::from_sql(bytes)
            .and_then(|v| Self::from_str(&v).map_err(|e| format!("invalid order type: {e}").into()))
    }
}

impl<B: Backend> ToSql<Text, B> for OrderType
where
    str: ToSql<Text, B>,
{
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, B>) -> serialize::Result {
        str::to_sql(self.into(), out)
    }
}
