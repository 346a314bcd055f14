//! Parsing and validation of raw trip records.
//!
//! A record is one comma-separated line:
//! `id,fare_amount,pickup_datetime,pickup_lon,pickup_lat,dropoff_lon,dropoff_lat[,...]`.
//! Anything that does not pass the [`Profile`] is rejected; the caller
//! decides whether to count the [`Rejection`] or drop it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum number of comma-separated fields in a trip record.
pub const MIN_FIELDS: usize = 7;

/// A longitude/latitude pair.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    pub lon: f64,
    pub lat: f64,
}

impl Coord {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    /// Zero in either component means the reading is missing.
    fn is_present(&self) -> bool {
        self.lon != 0.0 && self.lat != 0.0
    }
}

/// A validated trip. Fields the profile does not use are never read and
/// stay `None`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TripObservation {
    pub month: u8,
    pub hour: Option<u8>,
    pub pickup: Option<Coord>,
    pub dropoff: Coord,
    pub fare: Option<f64>,
}

/// Which trip endpoints an analysis reads. Only these are checked for
/// missing readings and bounding-box membership.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endpoints {
    Both,
    Dropoff,
}

/// An inclusive range of hours that may wrap past midnight (`20..=2`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourWindow {
    pub start: u8,
    pub end: u8,
}

impl HourWindow {
    /// 20:00 through 02:59.
    pub const NIGHTLIFE: HourWindow = HourWindow { start: 20, end: 2 };

    pub fn contains(&self, hour: u8) -> bool {
        if self.start <= self.end {
            (self.start..=self.end).contains(&hour)
        } else {
            hour >= self.start || hour <= self.end
        }
    }
}

/// An inclusive longitude/latitude rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Loose rectangle around New York City.
    pub const NYC: BoundingBox = BoundingBox {
        min_lon: -75.0,
        max_lon: -72.0,
        min_lat: 39.0,
        max_lat: 42.0,
    };

    pub fn contains(&self, c: &Coord) -> bool {
        (self.min_lon..=self.max_lon).contains(&c.lon)
            && (self.min_lat..=self.max_lat).contains(&c.lat)
    }
}

/// Everything the validator needs to accept or reject a record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Compared literally against the first four characters of the datetime.
    pub target_year: String,
    /// A first field equal to this (ignoring case) marks a header row.
    pub header_sentinel: String,
    pub endpoints: Endpoints,
    pub hours: Option<HourWindow>,
    pub bbox: Option<BoundingBox>,
    /// Read the fare even without a fare ceiling.
    pub reads_fare: bool,
    /// Fares must satisfy `0 < fare <= max_fare` when set.
    pub max_fare: Option<f64>,
}

impl Profile {
    fn needs_fare(&self) -> bool {
        self.reads_fare || self.max_fare.is_some()
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            target_year: "2013".to_string(),
            header_sentinel: "key".to_string(),
            endpoints: Endpoints::Both,
            hours: None,
            bbox: None,
            reads_fare: false,
            max_fare: None,
        }
    }
}

/// Why a record was dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Error)]
pub enum Rejection {
    #[error("header row")]
    Header,
    #[error("fewer than {} fields", MIN_FIELDS)]
    FieldCount,
    #[error("non-numeric fare or coordinate")]
    Number,
    #[error("pickup year is not the target year")]
    Year,
    #[error("unreadable pickup month")]
    Month,
    #[error("unreadable pickup hour")]
    Hour,
    #[error("pickup hour outside the window")]
    HourWindow,
    #[error("zero coordinate")]
    ZeroCoordinate,
    #[error("coordinate outside the bounding box")]
    BoundingBox,
    #[error("fare out of range")]
    Fare,
}

fn number(field: &str) -> Result<f64, Rejection> {
    match field.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(Rejection::Number),
    }
}

/// Parse two characters at `range` of the datetime as an integer in `bounds`.
fn datetime_part(
    datetime: &str,
    range: std::ops::Range<usize>,
    bounds: std::ops::RangeInclusive<u8>,
    rejection: Rejection,
) -> Result<u8, Rejection> {
    datetime
        .get(range)
        .and_then(|s| s.parse::<u8>().ok())
        .filter(|v| bounds.contains(v))
        .ok_or(rejection)
}

/// Parse one raw line under `profile`.
pub fn parse(line: &str, profile: &Profile) -> Result<TripObservation, Rejection> {
    let fields: Vec<&str> = line.split(',').collect();

    if fields[0].eq_ignore_ascii_case(&profile.header_sentinel) {
        return Err(Rejection::Header);
    }
    if fields.len() < MIN_FIELDS {
        return Err(Rejection::FieldCount);
    }

    let fare = if profile.needs_fare() {
        Some(number(fields[1])?)
    } else {
        None
    };
    let pickup = match profile.endpoints {
        Endpoints::Both => Some(Coord::new(number(fields[3])?, number(fields[4])?)),
        Endpoints::Dropoff => None,
    };
    let dropoff = Coord::new(number(fields[5])?, number(fields[6])?);

    let datetime = fields[2];
    if datetime.get(0..4) != Some(profile.target_year.as_str()) {
        return Err(Rejection::Year);
    }
    let month = datetime_part(datetime, 5..7, 1..=12, Rejection::Month)?;
    let hour = match profile.hours {
        Some(window) => {
            let hour = datetime_part(datetime, 11..13, 0..=23, Rejection::Hour)?;
            if !window.contains(hour) {
                return Err(Rejection::HourWindow);
            }
            Some(hour)
        }
        None => None,
    };

    let used: Vec<Coord> = pickup.into_iter().chain([dropoff]).collect();
    if !used.iter().all(Coord::is_present) {
        return Err(Rejection::ZeroCoordinate);
    }
    if let Some(bbox) = &profile.bbox {
        if !used.iter().all(|c| bbox.contains(c)) {
            return Err(Rejection::BoundingBox);
        }
    }

    if let (Some(max_fare), Some(fare)) = (profile.max_fare, fare) {
        if !(fare > 0.0 && fare <= max_fare) {
            return Err(Rejection::Fare);
        }
    }

    Ok(TripObservation {
        month,
        hour,
        pickup,
        dropoff,
        fare,
    })
}

/// Like [`parse`], discarding the reason.
pub fn validate(line: &str, profile: &Profile) -> Option<TripObservation> {
    parse(line, profile).ok()
}
