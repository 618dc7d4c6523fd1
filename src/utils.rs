//! Identifier and order-number helpers

use bech32::Bech32m;
use chrono::Utc;
use uuid7::uuid7;

use crate::error::{BidError, ValidationError};
use crate::types::{BidId, TimeStamp};

// construct a unique id from a fresh uuid7 then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> Result<String, BidError> {
    let hrp = bech32::Hrp::parse(hrp).map_err(|e| BidError::Codec(e.to_string()))?;
    bech32::encode::<Bech32m>(hrp, uuid7().as_bytes()).map_err(|e| BidError::Codec(e.to_string()))
}

/// Checks that `raw` is a bech32 string with the expected prefix wrapping a
/// 16 byte uuid, returning its canonical lowercase form.
pub fn check_bech32_id(kind: &'static str, raw: &str) -> Result<String, ValidationError> {
    let malformed = || ValidationError::MalformedId {
        kind,
        raw: raw.to_owned(),
    };

    let (hrp, data) = bech32::decode(raw).map_err(|_| malformed())?;
    if hrp.to_lowercase() != kind || data.len() != 16 {
        return Err(malformed());
    }

    Ok(raw.to_ascii_lowercase())
}

/// Human readable order number: `{prefix}-{yyyymmddHHMMSS}-{last six chars of the bid id}`.
pub fn order_number(prefix: &str, at: &TimeStamp<Utc>, bid_id: &BidId) -> String {
    let raw = bid_id.as_str();
    let suffix = &raw[raw.len().saturating_sub(6)..];

    format!(
        "{}-{}-{}",
        prefix,
        at.to_datetime_utc().format("%Y%m%d%H%M%S"),
        suffix.to_ascii_uppercase()
    )
}
