//! Trip records and the analyses run over them.
//!

use serde::{Deserialize, Serialize};

use crate::aggregate::AggregateKind;

pub mod key;
pub mod record;

use key::Projection;
use record::{BoundingBox, Endpoints, HourWindow, Profile};

/// The four supported analyses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Analysis {
    /// Most frequent pickup/dropoff routes.
    PopularRoutes,
    /// Routes with the highest single fare.
    ExpensiveRoutes,
    /// Most frequent pickup and dropoff locations, ranked separately.
    PopularLocations,
    /// Most frequent dropoff locations between 20:00 and 02:59.
    NightlifeSpots,
}

impl Analysis {
    pub fn name(&self) -> &'static str {
        match self {
            Analysis::PopularRoutes => "popular-routes",
            Analysis::ExpensiveRoutes => "expensive-routes",
            Analysis::PopularLocations => "popular-locations",
            Analysis::NightlifeSpots => "nightlife-spots",
        }
    }

    /// The default validation profile.
    pub fn profile(&self) -> Profile {
        let base = Profile::default();
        match self {
            Analysis::PopularRoutes | Analysis::PopularLocations => base,
            Analysis::ExpensiveRoutes => Profile {
                reads_fare: true,
                max_fare: Some(2000.0),
                ..base
            },
            Analysis::NightlifeSpots => Profile {
                endpoints: Endpoints::Dropoff,
                hours: Some(HourWindow::NIGHTLIFE),
                bbox: Some(BoundingBox::NYC),
                ..base
            },
        }
    }

    pub fn projection(&self) -> Projection {
        match self {
            Analysis::PopularRoutes | Analysis::ExpensiveRoutes => {
                Projection::Route { decimals: 5 }
            }
            Analysis::PopularLocations => Projection::TaggedLocations { decimals: 4 },
            Analysis::NightlifeSpots => Projection::Dropoff { decimals: 4 },
        }
    }

    pub fn kind(&self) -> AggregateKind {
        match self {
            Analysis::ExpensiveRoutes => AggregateKind::MaxFare,
            _ => AggregateKind::Count,
        }
    }
}
