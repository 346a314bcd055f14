//! Combinable statistics.
//!
//! Both kinds are commutative monoids, so partial aggregates may be combined
//! in any order and grouping: per map task, per shard, and across months.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::trip::record::TripObservation;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateKind {
    /// Number of trips; sum, identity 0.
    Count,
    /// Highest fare; max, identity negative infinity.
    MaxFare,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Aggregate {
    Count(i64),
    MaxFare(f64),
}

#[derive(Debug, Error, PartialEq)]
pub enum AggregateError {
    #[error("cannot combine {0:?} with {1:?}")]
    KindMismatch(AggregateKind, AggregateKind),
    #[error("`{text}` is not a valid {kind:?} value")]
    Parse { kind: AggregateKind, text: String },
    #[error("count overflow")]
    Overflow,
}

impl AggregateKind {
    pub fn identity(&self) -> Aggregate {
        match self {
            AggregateKind::Count => Aggregate::Count(0),
            AggregateKind::MaxFare => Aggregate::MaxFare(f64::NEG_INFINITY),
        }
    }

    /// The contribution of a single trip. A trip whose fare was not read
    /// contributes the identity.
    pub fn observe(&self, obs: &TripObservation) -> Aggregate {
        match self {
            AggregateKind::Count => Aggregate::Count(1),
            AggregateKind::MaxFare => obs.fare.map_or(self.identity(), Aggregate::MaxFare),
        }
    }

    pub fn parse(&self, text: &str) -> Result<Aggregate, AggregateError> {
        let err = || AggregateError::Parse {
            kind: *self,
            text: text.to_string(),
        };
        match self {
            AggregateKind::Count => text.parse().map(Aggregate::Count).map_err(|_| err()),
            AggregateKind::MaxFare => match text.parse::<f64>() {
                Ok(v) if !v.is_nan() => Ok(Aggregate::MaxFare(v)),
                _ => Err(err()),
            },
        }
    }

    /// Fold any number of values into one, starting from the identity.
    pub fn fold(
        &self,
        values: impl IntoIterator<Item = Aggregate>,
    ) -> Result<Aggregate, AggregateError> {
        values.into_iter().try_fold(self.identity(), Aggregate::combine)
    }
}

impl Aggregate {
    pub fn kind(&self) -> AggregateKind {
        match self {
            Aggregate::Count(_) => AggregateKind::Count,
            Aggregate::MaxFare(_) => AggregateKind::MaxFare,
        }
    }

    pub fn combine(self, other: Aggregate) -> Result<Aggregate, AggregateError> {
        match (self, other) {
            (Aggregate::Count(a), Aggregate::Count(b)) => a
                .checked_add(b)
                .map(Aggregate::Count)
                .ok_or(AggregateError::Overflow),
            (Aggregate::MaxFare(a), Aggregate::MaxFare(b)) => Ok(Aggregate::MaxFare(a.max(b))),
            (a, b) => Err(AggregateError::KindMismatch(a.kind(), b.kind())),
        }
    }

    /// Total order on values of the same kind. Counts sort before fares so
    /// the order stays total even across kinds.
    pub fn total_cmp(&self, other: &Aggregate) -> Ordering {
        match (self, other) {
            (Aggregate::Count(a), Aggregate::Count(b)) => a.cmp(b),
            (Aggregate::MaxFare(a), Aggregate::MaxFare(b)) => a.total_cmp(b),
            (Aggregate::Count(_), Aggregate::MaxFare(_)) => Ordering::Less,
            (Aggregate::MaxFare(_), Aggregate::Count(_)) => Ordering::Greater,
        }
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregate::Count(n) => write!(f, "{}", n),
            // Always carries a decimal point, e.g. `52.0`.
            Aggregate::MaxFare(v) => write!(f, "{:?}", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_sum_and_fares_max() {
        let counts = [1, 4, 2].map(Aggregate::Count);
        assert_eq!(AggregateKind::Count.fold(counts), Ok(Aggregate::Count(7)));
        assert_eq!(AggregateKind::Count.fold(std::iter::empty()), Ok(Aggregate::Count(0)));

        let fares = [12.5, 52.0, 7.25].map(Aggregate::MaxFare);
        assert_eq!(
            AggregateKind::MaxFare.fold(fares),
            Ok(Aggregate::MaxFare(52.0))
        );
    }

    #[test]
    fn combination_is_order_independent() {
        let fares = [3.5, 99.0, 12.0, 45.25];
        let forward = AggregateKind::MaxFare.fold(fares.map(Aggregate::MaxFare));
        let backward =
            AggregateKind::MaxFare.fold(fares.iter().rev().map(|v| Aggregate::MaxFare(*v)));
        assert_eq!(forward, backward);
        assert_eq!(forward, Ok(Aggregate::MaxFare(99.0)));
    }

    #[test]
    fn refuses_mixed_kinds_and_bad_text() {
        assert_eq!(
            Aggregate::Count(1).combine(Aggregate::MaxFare(1.0)),
            Err(AggregateError::KindMismatch(
                AggregateKind::Count,
                AggregateKind::MaxFare
            ))
        );
        assert!(AggregateKind::Count.parse("1.5").is_err());
        assert!(AggregateKind::MaxFare.parse("NaN").is_err());
        assert_eq!(
            Aggregate::Count(i64::MAX).combine(Aggregate::Count(1)),
            Err(AggregateError::Overflow)
        );
    }

    #[test]
    fn renders_values_so_they_parse_back() {
        assert_eq!(Aggregate::Count(42).to_string(), "42");
        assert_eq!(Aggregate::MaxFare(52.0).to_string(), "52.0");
        assert_eq!(Aggregate::MaxFare(7.25).to_string(), "7.25");
        assert_eq!(
            AggregateKind::MaxFare.parse(&Aggregate::MaxFare(12.5).to_string()),
            Ok(Aggregate::MaxFare(12.5))
        );
    }
}
