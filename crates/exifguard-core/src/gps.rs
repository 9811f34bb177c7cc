// crates/exifguard-core/src/gps.rs

//! Converts GPS sub-IFD entries into signed decimal degrees.

use serde::Serialize;

use crate::tags;
use crate::tiff::{Ifd, Rational, TagValue};

/// A resolved position. South and West are negative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// One degrees/minutes/seconds angle plus its hemisphere reference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsCoordinate {
    pub degrees: Rational,
    pub minutes: Rational,
    pub seconds: Rational,
    pub hemisphere: Option<char>,
}

impl GpsCoordinate {
    /// Reads the DMS triplet at `value_tag` and the reference at `ref_tag`.
    pub fn from_ifd(gps: &Ifd, value_tag: u16, ref_tag: u16) -> Option<Self> {
        let dms = gps.get(value_tag)?.rationals()?;
        let [degrees, minutes, seconds, ..] = *dms else {
            return None;
        };
        let hemisphere = gps
            .get(ref_tag)
            .and_then(TagValue::as_str)
            .and_then(|r| r.trim().chars().next());
        Some(Self {
            degrees,
            minutes,
            seconds,
            hemisphere,
        })
    }

    /// `degrees + minutes/60 + seconds/3600`, negated for an `S`/`W` reference.
    ///
    /// `None` when any component has a zero denominator.
    pub fn to_decimal(&self) -> Option<f64> {
        let value = self.degrees.to_f64()?
            + self.minutes.to_f64()? / 60.0
            + self.seconds.to_f64()? / 3600.0;
        if !value.is_finite() {
            return None;
        }
        match self.hemisphere.map(|c| c.to_ascii_uppercase()) {
            Some('S') | Some('W') => Some(-value),
            _ => Some(value),
        }
    }
}

/// Latitude and longitude, or nothing. Never a half coordinate.
pub fn resolve(gps: &Ifd) -> Option<GpsPoint> {
    let latitude = GpsCoordinate::from_ifd(gps, tags::GPS_LATITUDE, tags::GPS_LATITUDE_REF)?
        .to_decimal()?;
    let longitude = GpsCoordinate::from_ifd(gps, tags::GPS_LONGITUDE, tags::GPS_LONGITUDE_REF)?
        .to_decimal()?;
    Some(GpsPoint {
        latitude,
        longitude,
    })
}

/// Altitude in metres; negative when GPSAltitudeRef says below sea level.
pub fn altitude(gps: &Ifd) -> Option<f64> {
    let metres = gps.get(tags::GPS_ALTITUDE)?.rationals()?.first()?.to_f64()?;
    match gps.get(tags::GPS_ALTITUDE_REF).and_then(TagValue::first_uint) {
        Some(1) => Some(-metres),
        _ => Some(metres),
    }
}

/// UTC fix time as `YYYY:MM:DD HH:MM:SS`, or just the time if no date stamp.
pub fn timestamp(gps: &Ifd) -> Option<String> {
    let hms = gps.get(tags::GPS_TIME_STAMP)?.rationals()?;
    let [h, m, s, ..] = *hms else {
        return None;
    };
    let time = format!(
        "{:02}:{:02}:{:02}",
        h.to_f64()? as u32,
        m.to_f64()? as u32,
        s.to_f64()? as u32
    );
    match gps.get(tags::GPS_DATE_STAMP).and_then(TagValue::as_str) {
        Some(date) if !date.is_empty() => Some(format!("{date} {time}")),
        _ => Some(time),
    }
}
