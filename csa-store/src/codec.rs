//! The infinity-safe JSON codec (spec.md §4.1, §6 "JSON infinity encoding").
//!
//! `serde_json::Value` cannot hold a non-finite `f64` — `Number::from_f64`
//! simply refuses one, and the stock serializer would otherwise silently
//! write `null` for both `+∞` and `NaN`, losing the distinction the spec
//! requires. Rather than hand-roll a recursive `Value`-tree walker (the
//! approach the original Python `InfinityEncoder` takes, where Python
//! floats genuinely can be infinite), this pushes the encoding down to the
//! one leaf type that can carry a true numeric infinity: `InfinityFloat`.
//! Its own `Serialize`/`Deserialize` impls apply the `"Infinity"` /
//! `"-Infinity"` / `null` wire rule, and serde's derive macros propagate
//! that through any struct or collection it's nested in — `CSATerms`'s
//! `Threshold` field never needs this at all, since a threshold is typed
//! as `Threshold::Infinite` rather than a raw float (see SPEC_FULL.md §3).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde::de::{self, Visitor};
use serde_json::Value;
use std::fmt;

use crate::error::StoreResult;

/// A float that round-trips `+∞`/`−∞`/`NaN` through JSON without loss.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InfinityFloat(pub f64);

impl Serialize for InfinityFloat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0 == f64::INFINITY {
            serializer.serialize_str("Infinity")
        } else if self.0 == f64::NEG_INFINITY {
            serializer.serialize_str("-Infinity")
        } else if self.0.is_nan() {
            serializer.serialize_none()
        } else {
            serializer.serialize_f64(self.0)
        }
    }
}

struct InfinityFloatVisitor;

impl<'de> Visitor<'de> for InfinityFloatVisitor {
    type Value = InfinityFloat;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a finite number, \"Infinity\", \"-Infinity\", or null")
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        Ok(InfinityFloat(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(InfinityFloat(v as f64))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(InfinityFloat(v as f64))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        match v {
            "Infinity" => Ok(InfinityFloat(f64::INFINITY)),
            "-Infinity" => Ok(InfinityFloat(f64::NEG_INFINITY)),
            other => other
                .parse::<f64>()
                .map(InfinityFloat)
                .map_err(|_| E::custom(format!("not a recognized infinity-safe float: {other}"))),
        }
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(InfinityFloat(f64::NAN))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(InfinityFloat(f64::NAN))
    }
}

impl<'de> Deserialize<'de> for InfinityFloat {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(InfinityFloatVisitor)
    }
}

/// Encode a payload to its on-disk JSON form. A thin wrapper today, but the
/// one seam every `ArtifactStore::save` call goes through, so a future
/// store-wide transform (compression, checksumming) has a single home.
pub fn to_stored_value<T: Serialize>(value: &T) -> StoreResult<Value> {
    Ok(serde_json::to_value(value)?)
}

pub fn from_stored_value<T: for<'de> Deserialize<'de>>(value: Value) -> StoreResult<T> {
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Wrapper {
        value: InfinityFloat,
    }

    #[test]
    fn positive_infinity_round_trips_as_string() {
        let w = Wrapper { value: InfinityFloat(f64::INFINITY) };
        let json = serde_json::to_value(&w).unwrap();
        assert_eq!(json["value"], serde_json::json!("Infinity"));
        let back: Wrapper = serde_json::from_value(json).unwrap();
        assert_eq!(back.value.0, f64::INFINITY);
    }

    #[test]
    fn negative_infinity_round_trips_as_string() {
        let w = Wrapper { value: InfinityFloat(f64::NEG_INFINITY) };
        let json = serde_json::to_value(&w).unwrap();
        assert_eq!(json["value"], serde_json::json!("-Infinity"));
        let back: Wrapper = serde_json::from_value(json).unwrap();
        assert_eq!(back.value.0, f64::NEG_INFINITY);
    }

    #[test]
    fn nan_encodes_to_null() {
        let w = Wrapper { value: InfinityFloat(f64::NAN) };
        let json = serde_json::to_value(&w).unwrap();
        assert_eq!(json["value"], Value::Null);
    }

    #[test]
    fn finite_values_round_trip_as_plain_numbers() {
        let w = Wrapper { value: InfinityFloat(42.5) };
        let json = serde_json::to_value(&w).unwrap();
        assert_eq!(json["value"], serde_json::json!(42.5));
        let back: Wrapper = serde_json::from_value(json).unwrap();
        assert_eq!(back.value.0, 42.5);
    }

    #[test]
    fn arbitrary_payload_round_trips_through_the_store_codec() {
        let w = Wrapper { value: InfinityFloat(f64::INFINITY) };
        let stored = to_stored_value(&w).unwrap();
        let back: Wrapper = from_stored_value(stored).unwrap();
        assert_eq!(back, w);
    }
}
