//! Stage one, continued: drop the month and re-key by identity alone.
//!
//! The input is the by-month stage's output, `MM__identity<TAB>value` per
//! line. Lines whose key or value does not parse are skipped and counted.

use anyhow::Result;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::aggregate::AggregateKind;
use crate::trip::key::GroupKey;
use crate::utils::split_record;
use crate::*;

/// Auxiliary arguments of the across-months stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Args {
    pub kind: AggregateKind,
}

impl Args {
    pub fn to_aux(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

pub fn map(kv: KeyValue, aux: Bytes) -> MapOutput {
    let args: Args = serde_json::from_slice(&aux)?;
    let s = String::from_utf8_lossy(kv.value.as_ref());
    let mut skipped = 0usize;
    let mut map_output = Vec::new();

    for line in s.lines().filter(|l| !l.trim().is_empty()) {
        let parsed = split_record(line).and_then(|(key, value)| {
            let key = key.parse::<GroupKey>().ok()?;
            let value = args.kind.parse(value).ok()?;
            Some((key, value))
        });
        let Some((key, value)) = parsed else {
            skipped += 1;
            continue;
        };
        map_output.push(KeyValue::new(
            Bytes::from(key.identity.to_string()),
            Bytes::from(value.to_string()),
        ));
    }

    if skipped > 0 {
        warn!(split = %String::from_utf8_lossy(&kv.key), skipped, "skipped malformed by-month lines");
    }

    Ok(Box::new(map_output.into_iter().map(Ok)))
}
