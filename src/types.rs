//! Shared value types: timestamps, decimal amounts, identifiers and actors
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use rust_decimal::Decimal;

use crate::error::{BidError, ValidationError};
use crate::utils;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    /// # Panics
    /// On a calendar value that does not exist, e.g. February 30th.
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .expect("calendar date and time must exist")
            .into()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    /// `secs` later. Fails when the result falls outside the range a record
    /// can store, which is i64 nanoseconds since the epoch.
    pub fn plus_secs(&self, secs: u64) -> Result<Self, ValidationError> {
        let out_of_range = || ValidationError::TimeOutOfRange { secs };
        let delta = i64::try_from(secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .ok_or_else(out_of_range)?;
        let later = self.0.checked_add_signed(delta).ok_or_else(out_of_range)?;
        later.timestamp_nanos_opt().ok_or_else(out_of_range)?;
        Ok(Self(later))
    }
}

impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl fmt::Display for TimeStamp<Utc> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// Exact decimal used for every price, quantity and total. Never a float.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(Decimal);

impl Amount {
    pub const ZERO: Amount = Amount(Decimal::ZERO);

    pub fn new(value: Decimal) -> Self {
        Self(value)
    }
    /// `units` scaled down by `10^scale`, so `Amount::with_scale(22050, 2)` is 220.50.
    pub fn with_scale(units: i64, scale: u32) -> Self {
        Self(Decimal::new(units, scale))
    }
    pub fn value(&self) -> Decimal {
        self.0
    }
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }
    pub fn checked_mul(&self, rhs: &Amount) -> Option<Amount> {
        self.0.checked_mul(rhs.0).map(Amount)
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Self(Decimal::from(value))
    }
}

impl FromStr for Amount {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s).map(Amount)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

// stored as rust_decimal's fixed 16 byte serialisation to keep scale intact
impl<C> minicbor::Encode<C> for Amount {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.bytes(&self.0.serialize())?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for Amount {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let raw: [u8; 16] = d
            .bytes()?
            .try_into()
            .map_err(|_| minicbor::decode::Error::message("amount must be 16 bytes"))?;

        Ok(Amount(Decimal::deserialize(raw)))
    }
}

macro_rules! bech32_id {
    ($(#[$meta:meta])* $name:ident, $hrp:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            pub const HRP: &'static str = $hrp;

            pub fn generate() -> Result<Self, BidError> {
                utils::new_uuid_to_bech32(Self::HRP).map(Self)
            }
            pub fn parse(raw: &str) -> Result<Self, ValidationError> {
                utils::check_bech32_id(Self::HRP, raw).map(Self)
            }
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl<C> minicbor::Encode<C> for $name {
            fn encode<W: minicbor::encode::Write>(
                &self,
                e: &mut minicbor::Encoder<W>,
                _: &mut C,
            ) -> Result<(), minicbor::encode::Error<W::Error>> {
                e.str(&self.0)?.ok()
            }
        }

        impl<'b, C> minicbor::Decode<'b, C> for $name {
            fn decode(
                d: &mut minicbor::Decoder<'b>,
                _: &mut C,
            ) -> Result<Self, minicbor::decode::Error> {
                Ok(Self(d.str()?.to_owned()))
            }
        }
    };
}

bech32_id!(
    /// Identifier of one negotiation thread, e.g. `bid1...`.
    BidId,
    "bid"
);
bech32_id!(ProductId, "prod");
bech32_id!(UserId, "user");
bech32_id!(OrderId, "ord");

/// The side of the marketplace a user acts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, minicbor::Encode, minicbor::Decode)]
pub enum Role {
    #[n(0)]
    Buyer,
    #[n(1)]
    Farmer,
}

impl Role {
    pub fn other(self) -> Role {
        match self {
            Role::Buyer => Role::Farmer,
            Role::Farmer => Role::Buyer,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Buyer => "buyer",
            Role::Farmer => "farmer",
        })
    }
}

/// Authenticated caller handed in by the identity layer. Trusted as given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn buyer(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Buyer,
        }
    }
    pub fn farmer(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Farmer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_encoding() {
        let original = TimeStamp::new();

        let encoding = minicbor::to_vec(original.clone()).unwrap();
        let decode: TimeStamp<Utc> = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn timestamps_order_by_instant() {
        let earlier = TimeStamp::new_with(2026, 1, 1, 0, 0, 0);
        let later = earlier.plus_secs(1).unwrap();

        assert!(later > earlier);
        assert_eq!(earlier.cmp(&later), Ordering::Less);
        assert_eq!(earlier.max(later.clone()), later);
    }

    #[test]
    fn plus_secs_refuses_unstorable_instants() {
        let now = TimeStamp::new_with(2026, 1, 1, 0, 0, 0);

        assert_eq!(
            now.plus_secs(u64::MAX),
            Err(ValidationError::TimeOutOfRange { secs: u64::MAX })
        );
        // past 2262, beyond i64 nanoseconds
        assert!(now.plus_secs(10_000_000_000).is_err());
        assert!(now.plus_secs(100 * 365 * 24 * 60 * 60).is_ok());
    }

    #[test]
    fn amount_keeps_scale_through_encoding() {
        let original = Amount::with_scale(220050, 2);

        let encoding = minicbor::to_vec(original).unwrap();
        let decode: Amount = minicbor::decode(&encoding).unwrap();

        assert_eq!(decode.value().scale(), 2);
        assert_eq!(decode.to_string(), "2200.5");
    }

    #[test]
    fn id_encoding() {
        let original = BidId::generate().unwrap();

        let encoding = minicbor::to_vec(&original).unwrap();
        let decode: BidId = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn ids_are_typed_by_prefix() {
        let product = ProductId::generate().unwrap();
        assert!(BidId::parse(product.as_str()).is_err());
        assert_eq!(ProductId::parse(product.as_str()).unwrap(), product);
    }
}
