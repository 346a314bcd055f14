//! Converts stage names to actual application code.
//!
//! # Example
//!
//! To get the first aggregation stage of a counting analysis:
//! ```
//! # use anyhow::Result;
//! use mrtopk::aggregate::AggregateKind;
//! use mrtopk::workload;
//! # fn main() -> Result<()> {
//! let by_month = workload::named("by-month", AggregateKind::Count)?;
//! # Ok(())
//! # }
//! ```

use anyhow::{bail, Result};
use bytes::Bytes;

use crate::aggregate::{Aggregate, AggregateKind};
use crate::partition;
use crate::utils::{emit_line, str_from_slice};
use crate::{CombineFn, ReduceFn, Workload};

pub mod across_months;
pub mod by_month;
pub mod rank_encoded;

/// Gets the [`Workload`] for stage `name` aggregating values of `kind`.
///
/// Returns [`None`] if no stage with the given name was found.
pub fn try_named(name: &str, kind: AggregateKind) -> Option<Workload> {
    let (combine_fn, reduce_fn) = monoid(kind);
    match name {
        "by-month" => Some(Workload {
            map_fn: by_month::map,
            combine_fn: Some(combine_fn),
            partition_fn: partition::by_month,
            reduce_fn,
        }),
        "across-months" => Some(Workload {
            map_fn: across_months::map,
            combine_fn: Some(combine_fn),
            partition_fn: partition::by_hash,
            reduce_fn,
        }),
        "rank-encoded" => Some(Workload {
            map_fn: rank_encoded::map,
            combine_fn: None,
            partition_fn: partition::single,
            reduce_fn: rank_encoded::reduce,
        }),
        _ => None,
    }
}

/// Gets the [`Workload`] for stage `name` aggregating values of `kind`.
///
/// Returns an [`anyhow::Error`] if no stage with the given name was found.
pub fn named(name: &str, kind: AggregateKind) -> Result<Workload> {
    match try_named(name, kind) {
        Some(app) => Ok(app),
        None => bail!("No stage named `{}` found.", name),
    }
}

fn monoid(kind: AggregateKind) -> (CombineFn, ReduceFn) {
    match kind {
        AggregateKind::Count => (sum_counts, reduce_counts),
        AggregateKind::MaxFare => (max_fares, reduce_max_fares),
    }
}

fn fold_values(kind: AggregateKind, values: Box<dyn Iterator<Item = Bytes> + '_>) -> Result<Aggregate> {
    let parsed = values
        .map(|value| -> Result<Aggregate> { Ok(kind.parse(str_from_slice(&value)?)?) })
        .collect::<Result<Vec<_>>>()?;
    Ok(kind.fold(parsed)?)
}

pub fn sum_counts(_key: &[u8], values: Box<dyn Iterator<Item = Bytes> + '_>) -> Result<Bytes> {
    let total = fold_values(AggregateKind::Count, values)?;
    Ok(Bytes::from(total.to_string()))
}

pub fn max_fares(_key: &[u8], values: Box<dyn Iterator<Item = Bytes> + '_>) -> Result<Bytes> {
    let max = fold_values(AggregateKind::MaxFare, values)?;
    Ok(Bytes::from(max.to_string()))
}

pub fn reduce_counts(
    key: Bytes,
    values: Box<dyn Iterator<Item = Bytes> + '_>,
    _aux: Bytes,
) -> Result<Bytes> {
    let total = fold_values(AggregateKind::Count, values)?;
    Ok(emit_line(str_from_slice(&key)?, total))
}

pub fn reduce_max_fares(
    key: Bytes,
    values: Box<dyn Iterator<Item = Bytes> + '_>,
    _aux: Bytes,
) -> Result<Bytes> {
    let max = fold_values(AggregateKind::MaxFare, values)?;
    Ok(emit_line(str_from_slice(&key)?, max))
}
