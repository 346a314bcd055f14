//! Rank stage over byte-sorted keys.
//!
//! Each cross-month `identity value` line becomes one pair keyed by
//! [`rank::encoded_key`], so that a single shard's ascending key order is
//! the ranking order. The reducer writes the keys back out in that order;
//! top-K selection happens on the sorted shard.

use anyhow::Result;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::aggregate::AggregateKind;
use crate::rank::{self, Candidate};
use crate::utils::{emit_line, str_from_slice};
use crate::*;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Args {
    pub kind: AggregateKind,
}

impl Args {
    pub fn to_aux(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

/// Fails on the first value the encoding cannot hold.
pub fn map(kv: KeyValue, aux: Bytes) -> MapOutput {
    let args: Args = serde_json::from_slice(&aux)?;
    let s = String::from_utf8_lossy(kv.value.as_ref());
    let map_output = rank::parse_candidates(&s, args.kind)
        .iter()
        .map(|candidate| -> Result<KeyValue> {
            let key = rank::encoded_key(candidate)?;
            Ok(KeyValue::new(
                Bytes::from(key),
                Bytes::from(candidate.value.to_string()),
            ))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Box::new(map_output.into_iter().map(Ok)))
}

pub fn reduce(
    key: Bytes,
    values: Box<dyn Iterator<Item = Bytes> + '_>,
    _aux: Bytes,
) -> Result<Bytes> {
    let key = str_from_slice(&key)?;
    let mut out = Vec::new();
    for value in values {
        out.extend_from_slice(&emit_line(key, str_from_slice(&value)?));
    }
    Ok(Bytes::from(out))
}

/// Decode the sorted reducer output back into candidates, in order.
pub fn decode_sorted(data: &str) -> Result<Vec<Candidate>> {
    data.lines()
        .filter_map(split_key)
        .map(|key| -> Result<Candidate> { Ok(rank::decode_key(key)?) })
        .collect()
}

fn split_key(line: &str) -> Option<&str> {
    line.split_whitespace().next()
}
