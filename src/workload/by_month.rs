//! Stage one: validate raw trips and key them by month and identity.
//!

use anyhow::Result;
use bytes::Bytes;
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::trip::key::derive_keys;
use crate::trip::record::{self, Profile};
use crate::trip::Analysis;
use crate::*;

/// Auxiliary arguments of the by-month stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Args {
    pub analysis: Analysis,
    pub profile: Profile,
}

impl Args {
    pub fn to_aux(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

/// Emits one `(MM__identity, statistic)` pair per key of every valid trip
/// in the input split. Invalid records are dropped; their reasons are only
/// tallied for the log.
pub fn map(kv: KeyValue, aux: Bytes) -> MapOutput {
    let args: Args = serde_json::from_slice(&aux)?;
    let projection = args.analysis.projection();
    let kind = args.analysis.kind();

    let s = String::from_utf8_lossy(kv.value.as_ref());
    let mut rejected: FnvHashMap<record::Rejection, u64> = FnvHashMap::default();
    let mut map_output = Vec::new();

    for line in s.lines() {
        let obs = match record::parse(line, &args.profile) {
            Ok(obs) => obs,
            Err(reason) => {
                *rejected.entry(reason).or_default() += 1;
                continue;
            }
        };
        let value = Bytes::from(kind.observe(&obs).to_string());
        for key in derive_keys(&obs, projection) {
            map_output.push(KeyValue::new(Bytes::from(key.to_string()), value.clone()));
        }
    }

    if !rejected.is_empty() {
        let mut tally: Vec<_> = rejected.into_iter().collect();
        tally.sort();
        debug!(split = %String::from_utf8_lossy(&kv.key), ?tally, "rejected records");
    }

    Ok(Box::new(map_output.into_iter().map(Ok)))
}
