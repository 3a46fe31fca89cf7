//! Data structures for the photon-stream binary format

use crate::error::{PhsError, Result};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Magic/version tag every photon-stream file starts with
pub const PHS_VERSION_HEADER: &[u8; 3] = &[0xFA, 0xC7, 0x01];

/// Default extension of transcoded files
pub const PHS_EXTENSION: &str = ".phs.bin";

/// Widest value a 16-bit length prefix can hold
pub const MAX_U16_LEN: usize = u16::MAX as usize;

/// Fixed-width part of an event: 4 x i32 + 3 x f64
pub const EVENT_FIXED_SIZE: usize = 4 * 4 + 3 * 8;

// ============================================================================
// EVENTS
// ============================================================================

/// One event as produced by an event source.
///
/// Every field is optional so that an absent key surfaces as
/// [`PhsError::MissingField`] instead of a parse failure. Integer and array
/// values are kept wide until [`EventRecord::validate`] narrows them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "Night", default, skip_serializing_if = "Option::is_none")]
    pub night: Option<i64>,
    #[serde(rename = "Run", default, skip_serializing_if = "Option::is_none")]
    pub run: Option<i64>,
    #[serde(rename = "Event", default, skip_serializing_if = "Option::is_none")]
    pub event: Option<i64>,
    #[serde(rename = "Trigger", default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<i64>,
    #[serde(rename = "Az_deg", default, skip_serializing_if = "Option::is_none")]
    pub az_deg: Option<f64>,
    #[serde(rename = "Zd_deg", default, skip_serializing_if = "Option::is_none")]
    pub zd_deg: Option<f64>,
    /// (seconds, microseconds)
    #[serde(rename = "UnixTime_s_us", default, skip_serializing_if = "Option::is_none")]
    pub unix_time_s_us: Option<[f64; 2]>,
    #[serde(
        rename = "PhotonArrivals_500ps",
        default,
        deserialize_with = "wide_nested",
        skip_serializing_if = "Option::is_none"
    )]
    pub photon_arrivals: Option<Vec<Vec<i128>>>,
    #[serde(
        rename = "SaturatedPixels",
        default,
        deserialize_with = "wide_flat",
        skip_serializing_if = "Option::is_none"
    )]
    pub saturated_pixels: Option<Vec<i128>>,
}

/// Any JSON integer, whatever its sign or magnitude.
///
/// Integers too large for 64 bits reach the visitor as floats; those
/// saturate at the `i128` bounds, which is still out of every on-disk width.
struct WideInt(i128);

impl<'de> Deserialize<'de> for WideInt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct WideIntVisitor;

        impl Visitor<'_> for WideIntVisitor {
            type Value = WideInt;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an integer")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<WideInt, E> {
                Ok(WideInt(v.into()))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<WideInt, E> {
                Ok(WideInt(v.into()))
            }

            fn visit_i128<E: de::Error>(self, v: i128) -> std::result::Result<WideInt, E> {
                Ok(WideInt(v))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<WideInt, E> {
                if v.is_finite() && v.fract() == 0.0 {
                    Ok(WideInt(v as i128))
                } else {
                    Err(E::invalid_value(de::Unexpected::Float(v), &self))
                }
            }
        }

        deserializer.deserialize_any(WideIntVisitor)
    }
}

fn wide_nested<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<Vec<Vec<i128>>>, D::Error> {
    let raw = Option::<Vec<Vec<WideInt>>>::deserialize(deserializer)?;
    Ok(raw.map(|pixels| {
        pixels
            .into_iter()
            .map(|pixel| pixel.into_iter().map(|w| w.0).collect())
            .collect()
    }))
}

fn wide_flat<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<Vec<i128>>, D::Error> {
    let raw = Option::<Vec<WideInt>>::deserialize(deserializer)?;
    Ok(raw.map(|values| values.into_iter().map(|w| w.0).collect()))
}

/// A validated event, narrowed to its on-disk widths
#[derive(Debug, Clone, PartialEq)]
pub struct PhotonEvent {
    pub night: i32,
    pub run: i32,
    pub event: i32,
    pub trigger: i32,
    pub az_deg: f64,
    pub zd_deg: f64,
    /// Seconds since the Unix epoch
    pub unix_time: f64,
    /// Per-pixel arrival slices (units of 500 ps)
    pub photon_arrivals: Vec<Vec<u8>>,
    pub saturated_pixels: Vec<u16>,
}

impl PhotonEvent {
    /// Integer fields in their on-disk order
    pub fn integer_fields(&self) -> [i32; 4] {
        [self.night, self.run, self.event, self.trigger]
    }

    /// Number of photons over all pixels
    pub fn num_photons(&self) -> usize {
        self.photon_arrivals.iter().map(Vec::len).sum()
    }

    /// Exact size of this event once encoded
    pub fn encoded_len(&self) -> usize {
        EVENT_FIXED_SIZE
            + 4
            + self.num_photons()
            + 2 * self.photon_arrivals.len()
            + 2
            + 2 * self.saturated_pixels.len()
    }
}

fn require<T>(value: Option<T>, field: &'static str) -> Result<T> {
    value.ok_or(PhsError::MissingField(field))
}

fn narrow_i32(value: i64, field: &'static str) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| PhsError::range(field, value, i32::MIN as i128, i32::MAX as i128))
}

impl EventRecord {
    /// Check presence and widths of every field and build the typed event.
    /// Nothing is truncated: any value outside its width is a `RangeOverflow`.
    pub fn validate(&self) -> Result<PhotonEvent> {
        let night = require(self.night, "Night")?;
        let run = require(self.run, "Run")?;
        let event = require(self.event, "Event")?;
        let trigger = require(self.trigger, "Trigger")?;
        let az_deg = require(self.az_deg, "Az_deg")?;
        let zd_deg = require(self.zd_deg, "Zd_deg")?;
        let [seconds, micros] = require(self.unix_time_s_us, "UnixTime_s_us")?;
        let arrivals = require(self.photon_arrivals.as_ref(), "PhotonArrivals_500ps")?;
        let saturated = require(self.saturated_pixels.as_ref(), "SaturatedPixels")?;

        if arrivals.len() > MAX_U16_LEN {
            return Err(PhsError::range(
                "PhotonArrivals_500ps",
                arrivals.len() as i128,
                0,
                MAX_U16_LEN as i128,
            ));
        }
        let mut photon_arrivals = Vec::with_capacity(arrivals.len());
        for pixel in arrivals {
            if pixel.len() > MAX_U16_LEN {
                return Err(PhsError::range(
                    "PhotonArrivals_500ps",
                    pixel.len() as i128,
                    0,
                    MAX_U16_LEN as i128,
                ));
            }
            let slices = pixel
                .iter()
                .map(|&t| {
                    u8::try_from(t).map_err(|_| {
                        PhsError::range("PhotonArrivals_500ps", t, 0, u8::MAX as i128)
                    })
                })
                .collect::<Result<Vec<u8>>>()?;
            photon_arrivals.push(slices);
        }

        if saturated.len() > MAX_U16_LEN {
            return Err(PhsError::range(
                "SaturatedPixels",
                saturated.len() as i128,
                0,
                MAX_U16_LEN as i128,
            ));
        }
        let saturated_pixels = saturated
            .iter()
            .map(|&p| {
                u16::try_from(p)
                    .map_err(|_| PhsError::range("SaturatedPixels", p, 0, u16::MAX as i128))
            })
            .collect::<Result<Vec<u16>>>()?;

        Ok(PhotonEvent {
            night: narrow_i32(night, "Night")?,
            run: narrow_i32(run, "Run")?,
            event: narrow_i32(event, "Event")?,
            trigger: narrow_i32(trigger, "Trigger")?,
            az_deg,
            zd_deg,
            unix_time: seconds + micros / 1e6,
            photon_arrivals,
            saturated_pixels,
        })
    }
}
