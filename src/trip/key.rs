//! Grouping keys derived from validated trips.
//!
//! A [`GroupKey`] renders as `MM__<identity>`, where the identity is a
//! comma-joined list of coordinates rounded to a fixed number of decimals,
//! optionally prefixed by a `CATEGORY__` tag. The textual form is the
//! canonical equality: two trips group together iff their rendered keys are
//! identical.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};

use super::record::{Coord, TripObservation};

/// Joins key components. Cannot occur in a formatted coordinate.
pub const SEPARATOR: &str = "__";

/// Which end of the trip a tagged location came from.
///
/// Declaration order matches the text order of the tags, so sorting by
/// either gives the same result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    Dropoff,
    Pickup,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Dropoff => "DROPOFF",
            Category::Pickup => "PICKUP",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "DROPOFF" => Ok(Category::Dropoff),
            "PICKUP" => Ok(Category::Pickup),
            _ => bail!("unknown category `{}`", s),
        }
    }
}

/// The identity dimension of a key: what makes two trips "the same route"
/// or "the same place".
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey {
    pub category: Option<Category>,
    /// Rounded, comma-joined coordinates.
    pub coords: String,
}

impl IdentityKey {
    pub fn new(category: Option<Category>, coords: String) -> Self {
        Self { category, coords }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.category {
            Some(category) => write!(f, "{}{}{}", category, SEPARATOR, self.coords),
            None => f.write_str(&self.coords),
        }
    }
}

impl FromStr for IdentityKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let key = match s.split_once(SEPARATOR) {
            Some((tag, coords)) => IdentityKey::new(Some(tag.parse()?), coords.to_string()),
            None => IdentityKey::new(None, s.to_string()),
        };
        if key.coords.is_empty() || key.coords.contains(SEPARATOR) {
            bail!("malformed identity key `{}`", s);
        }
        Ok(key)
    }
}

/// Coarse (month) and identity dimensions together.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub month: u8,
    pub identity: IdentityKey,
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}{}{}", self.month, SEPARATOR, self.identity)
    }
}

impl FromStr for GroupKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (month, identity) = s
            .split_once(SEPARATOR)
            .ok_or_else(|| anyhow!("missing month in key `{}`", s))?;
        Ok(GroupKey {
            month: month.parse()?,
            identity: identity.parse()?,
        })
    }
}

/// Which coordinates make up the identity, and at what precision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Projection {
    /// Pickup and dropoff together.
    Route { decimals: usize },
    /// The dropoff alone.
    Dropoff { decimals: usize },
    /// Pickup and dropoff as two separately tagged locations.
    TaggedLocations { decimals: usize },
}

impl Projection {
    /// Whether identities from this projection carry a [`Category`].
    pub fn has_subgroups(&self) -> bool {
        matches!(self, Projection::TaggedLocations { .. })
    }
}

/// Round half away from zero to `decimals` places and render fixed-width.
pub fn format_rounded(value: f64, decimals: usize) -> String {
    let scale = 10f64.powi(decimals as i32);
    let rounded = (value * scale).round() / scale;
    // -0.0 and 0.0 must render identically.
    let rounded = if rounded == 0.0 { 0.0 } else { rounded };
    format!("{:.*}", decimals, rounded)
}

fn coords(points: &[Coord], decimals: usize) -> String {
    points
        .iter()
        .flat_map(|c| [c.lon, c.lat])
        .map(|v| format_rounded(v, decimals))
        .collect::<Vec<_>>()
        .join(",")
}

/// Every key a trip contributes to under `projection`. Projections that
/// need the pickup yield nothing for a trip whose pickup was not read.
pub fn derive_keys(obs: &TripObservation, projection: Projection) -> Vec<GroupKey> {
    let keyed = |identity| GroupKey {
        month: obs.month,
        identity,
    };
    match (projection, obs.pickup) {
        (Projection::Route { decimals }, Some(pickup)) => vec![keyed(IdentityKey::new(
            None,
            coords(&[pickup, obs.dropoff], decimals),
        ))],
        (Projection::Dropoff { decimals }, _) => {
            vec![keyed(IdentityKey::new(None, coords(&[obs.dropoff], decimals)))]
        }
        (Projection::TaggedLocations { decimals }, Some(pickup)) => vec![
            keyed(IdentityKey::new(
                Some(Category::Pickup),
                coords(&[pickup], decimals),
            )),
            keyed(IdentityKey::new(
                Some(Category::Dropoff),
                coords(&[obs.dropoff], decimals),
            )),
        ],
        (Projection::Route { .. } | Projection::TaggedLocations { .. }, None) => Vec::new(),
    }
}
