//! Exact top-K selection over the cross-month aggregate.
//!
//! Candidates are ordered by subgroup, then value descending, then identity
//! text ascending; the last rule is the tie-break for equal values. The
//! ordered stream is folded into at most `k` [`RankedEntry`]s per subgroup.
//!
//! Two ways to obtain the ordered stream produce the same entries:
//!
//! * [`RankOrder::Native`] sorts each shard with [`rank_order`], keeps its
//!   local top-K, and k-way merges the runs.
//! * [`RankOrder::Encoded`] turns each candidate into a byte-sortable key
//!   (see [`encoded_key`]) and lets a single engine shard sort them.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::aggregate::{Aggregate, AggregateKind};
use crate::trip::key::{Category, IdentityKey};
use crate::utils::split_record;

/// Encoded keys store `ENCODING_OFFSET - value`.
pub const ENCODING_OFFSET: i64 = 1_000_000_000;
/// Digits in an encoded value; `ENCODING_OFFSET` itself needs all of them.
pub const ENCODING_WIDTH: usize = 10;

const ENCODED_DELIMITER: char = '|';

#[derive(Debug, Error, PartialEq)]
pub enum RankError {
    #[error("k must be at least 1")]
    ZeroK,
    #[error("{0} is outside the encodable window 0..=1000000000")]
    OutOfWindow(i64),
    #[error("{0:?} values cannot be ranked with the encoded ordering")]
    NotEncodable(AggregateKind),
    #[error("malformed ordering key `{0}`")]
    MalformedKey(String),
}

/// How the rank stage obtains its total order.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum RankOrder {
    #[default]
    Native,
    Encoded,
}

/// One identity and its cross-month value.
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    pub identity: IdentityKey,
    pub value: Aggregate,
}

impl Candidate {
    pub fn subgroup(&self) -> Option<Category> {
        self.identity.category
    }

    /// Parse an `identity value` line.
    pub fn parse(line: &str, kind: AggregateKind) -> anyhow::Result<Candidate> {
        let (identity, value) =
            split_record(line).ok_or_else(|| anyhow::anyhow!("malformed line `{}`", line))?;
        Ok(Candidate {
            identity: identity.parse()?,
            value: kind.parse(value)?,
        })
    }
}

/// A selected identity and its 1-based rank within its subgroup.
#[derive(Clone, Debug, PartialEq)]
pub struct RankedEntry {
    pub subgroup: Option<Category>,
    pub identity: IdentityKey,
    pub value: Aggregate,
    pub rank: usize,
}

/// `identity<TAB>value`; grouped identities are written `SUBGROUP:coords`.
impl fmt::Display for RankedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.subgroup {
            Some(subgroup) => write!(f, "{}:{}\t{}", subgroup, self.identity.coords, self.value),
            None => write!(f, "{}\t{}", self.identity, self.value),
        }
    }
}

/// Subgroup ascending, value descending, identity ascending.
pub fn rank_order(a: &Candidate, b: &Candidate) -> Ordering {
    a.subgroup()
        .cmp(&b.subgroup())
        .then_with(|| b.value.total_cmp(&a.value))
        .then_with(|| a.identity.cmp(&b.identity))
}

/// Per-subgroup counters and the entries accepted so far.
struct Selection {
    k: usize,
    taken: BTreeMap<Option<Category>, usize>,
    entries: Vec<RankedEntry>,
}

impl Selection {
    fn new(k: usize) -> Self {
        Self {
            k,
            taken: BTreeMap::new(),
            entries: Vec::new(),
        }
    }

    /// Accept `candidate` if its subgroup still has room; drop it otherwise.
    fn offer(mut self, candidate: Candidate) -> Self {
        let taken = self.taken.entry(candidate.subgroup()).or_insert(0);
        if *taken < self.k {
            *taken += 1;
            self.entries.push(RankedEntry {
                subgroup: candidate.subgroup(),
                rank: *taken,
                identity: candidate.identity,
                value: candidate.value,
            });
        }
        self
    }
}

/// Take the first `k` candidates of each subgroup from a stream already in
/// [`rank_order`].
pub fn select(
    ordered: impl IntoIterator<Item = Candidate>,
    k: usize,
) -> Result<Vec<RankedEntry>, RankError> {
    if k == 0 {
        return Err(RankError::ZeroK);
    }
    Ok(ordered
        .into_iter()
        .fold(Selection::new(k), Selection::offer)
        .entries)
}

/// Sort one shard's candidates and keep at most `k` per subgroup.
///
/// Anything dropped here is beaten by `k` candidates of its own subgroup
/// and so cannot reach the global top K.
pub fn local_top_k(mut run: Vec<Candidate>, k: usize) -> Vec<Candidate> {
    run.sort_by(rank_order);
    let groups = run.into_iter().chunk_by(Candidate::subgroup);
    groups
        .into_iter()
        .flat_map(|(_, group)| group.take(k))
        .collect()
}

/// Global top K over candidates spread across shards.
pub fn top_k(runs: Vec<Vec<Candidate>>, k: usize) -> Result<Vec<RankedEntry>, RankError> {
    if k == 0 {
        return Err(RankError::ZeroK);
    }
    let runs = runs.into_iter().map(|run| local_top_k(run, k));
    let merged = runs.kmerge_by(|a, b| rank_order(a, b) == Ordering::Less);
    select(merged, k)
}

/// Parse every `identity value` line of a shard. Malformed lines are logged
/// and skipped.
pub fn parse_candidates(data: &str, kind: AggregateKind) -> Vec<Candidate> {
    data.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match Candidate::parse(line, kind) {
            Ok(candidate) => Some(candidate),
            Err(e) => {
                warn!(line, error = %e, "skipping malformed aggregate line");
                None
            }
        })
        .collect()
}

/////////////////////////////////////////////////////////////////////////////
// Byte-sortable descending keys
/////////////////////////////////////////////////////////////////////////////

/// Fixed-width text whose ascending byte order is descending `value` order.
///
/// Fails for values outside `0..=ENCODING_OFFSET` instead of wrapping.
pub fn encode_descending(value: i64) -> Result<String, RankError> {
    if !(0..=ENCODING_OFFSET).contains(&value) {
        return Err(RankError::OutOfWindow(value));
    }
    Ok(format!(
        "{:0width$}",
        ENCODING_OFFSET - value,
        width = ENCODING_WIDTH
    ))
}

pub fn decode_descending(text: &str) -> Result<i64, RankError> {
    let malformed = || RankError::MalformedKey(text.to_string());
    if text.len() != ENCODING_WIDTH || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    let stored: i64 = text.parse().map_err(|_| malformed())?;
    if stored > ENCODING_OFFSET {
        return Err(malformed());
    }
    Ok(ENCODING_OFFSET - stored)
}

/// `[SUBGROUP|]NNNNNNNNNN|identity`, sorting bytewise like [`rank_order`].
pub fn encoded_key(candidate: &Candidate) -> Result<String, RankError> {
    let value = match candidate.value {
        Aggregate::Count(n) => encode_descending(n)?,
        other => return Err(RankError::NotEncodable(other.kind())),
    };
    Ok(match candidate.subgroup() {
        Some(subgroup) => format!(
            "{subgroup}{d}{value}{d}{}",
            candidate.identity,
            d = ENCODED_DELIMITER
        ),
        None => format!("{value}{d}{}", candidate.identity, d = ENCODED_DELIMITER),
    })
}

/// Inverse of [`encoded_key`].
pub fn decode_key(key: &str) -> Result<Candidate, RankError> {
    let malformed = || RankError::MalformedKey(key.to_string());
    let parts: Vec<&str> = key.split(ENCODED_DELIMITER).collect();
    let (value, identity) = match parts.as_slice() {
        [_, value, identity] | [value, identity] => (*value, *identity),
        _ => return Err(malformed()),
    };
    Ok(Candidate {
        identity: identity.parse().map_err(|_| malformed())?,
        value: Aggregate::Count(decode_descending(value)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(identity: &str, n: i64) -> Candidate {
        Candidate {
            identity: identity.parse().unwrap(),
            value: Aggregate::Count(n),
        }
    }

    fn identities(entries: &[RankedEntry]) -> Vec<String> {
        entries.iter().map(|e| e.identity.to_string()).collect()
    }

    #[test]
    fn keeps_exactly_k_in_descending_order() {
        let run = vec![
            count("1.0,1.0", 4),
            count("2.0,2.0", 9),
            count("3.0,3.0", 1),
            count("4.0,4.0", 7),
            count("5.0,5.0", 3),
        ];
        let entries = top_k(vec![run], 3).unwrap();
        assert_eq!(identities(&entries), ["2.0,2.0", "4.0,4.0", "1.0,1.0"]);
        assert_eq!(
            entries.iter().map(|e| e.rank).collect::<Vec<_>>(),
            [1, 2, 3]
        );
    }

    #[test]
    fn breaks_ties_by_identity_text() {
        let run = vec![
            count("9.0,9.0", 5),
            count("1.0,1.0", 5),
            count("5.0,5.0", 5),
        ];
        let entries = top_k(vec![run], 2).unwrap();
        assert_eq!(identities(&entries), ["1.0,1.0", "5.0,5.0"]);
    }

    #[test]
    fn returns_everything_when_k_is_large() {
        let entries = top_k(vec![vec![count("1.0,1.0", 1)], vec![]], 10).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(top_k(vec![], 10).unwrap().is_empty());
    }

    #[test]
    fn counts_each_subgroup_separately() {
        let mut run = Vec::new();
        for i in 0..5 {
            run.push(count(&format!("PICKUP__{}.0,1.0", i), 1000 + i));
            run.push(count(&format!("DROPOFF__{}.0,1.0", i), i));
        }
        let entries = top_k(vec![run], 3).unwrap();
        let pickups = entries
            .iter()
            .filter(|e| e.subgroup == Some(Category::Pickup))
            .count();
        let dropoffs = entries
            .iter()
            .filter(|e| e.subgroup == Some(Category::Dropoff))
            .count();
        assert_eq!((pickups, dropoffs), (3, 3));
        assert_eq!(entries[0].subgroup, Some(Category::Dropoff));
        assert_eq!(entries[0].value, Aggregate::Count(4));
        assert_eq!(entries[3].value, Aggregate::Count(1004));
        assert_eq!(entries[3].rank, 1);
    }

    #[test]
    fn sharding_does_not_change_the_result() {
        let all: Vec<Candidate> = (0..40)
            .map(|i| count(&format!("{}.0,0.0", i), (i * 7) % 11))
            .collect();
        let whole = top_k(vec![all.clone()], 6).unwrap();
        let split = top_k(
            all.chunks(7).map(<[Candidate]>::to_vec).collect(),
            6,
        )
        .unwrap();
        assert_eq!(whole, split);
    }

    #[test]
    fn omitted_values_never_beat_the_last_kept() {
        let all: Vec<Candidate> = (0..25)
            .map(|i| count(&format!("{}.0,0.0", i), (i * 13) % 17))
            .collect();
        let entries = top_k(vec![all.clone()], 5).unwrap();
        let last = entries.last().unwrap().value;
        for c in &all {
            if !entries.iter().any(|e| e.identity == c.identity) {
                assert_ne!(c.value.total_cmp(&last), Ordering::Greater);
            }
        }
    }

    #[test]
    fn rejects_zero_k() {
        assert_eq!(top_k(vec![], 0), Err(RankError::ZeroK));
    }

    #[test]
    fn descending_encoding_sorts_bytewise() {
        assert_eq!(encode_descending(0).unwrap(), "1000000000");
        assert_eq!(encode_descending(ENCODING_OFFSET).unwrap(), "0000000000");
        assert!(encode_descending(1425).unwrap() < encode_descending(12).unwrap());
        assert_eq!(decode_descending("0999998575").unwrap(), 1425);
    }

    #[test]
    fn encoding_fails_outside_its_window() {
        assert_eq!(
            encode_descending(ENCODING_OFFSET + 1),
            Err(RankError::OutOfWindow(ENCODING_OFFSET + 1))
        );
        assert_eq!(encode_descending(-1), Err(RankError::OutOfWindow(-1)));
        let fare = Candidate {
            identity: "1.0,1.0".parse().unwrap(),
            value: Aggregate::MaxFare(12.5),
        };
        assert_eq!(
            encoded_key(&fare),
            Err(RankError::NotEncodable(AggregateKind::MaxFare))
        );
    }

    #[test]
    fn encoded_keys_follow_the_native_order() {
        let mut candidates = vec![
            count("PICKUP__-73.9770,40.7450", 3),
            count("DROPOFF__-73.9810,40.7430", 3),
            count("PICKUP__-73.9000,40.7000", 12),
            count("PICKUP__-73.8000,40.7000", 3),
        ];
        let mut keys: Vec<String> = candidates.iter().map(|c| encoded_key(c).unwrap()).collect();
        keys.sort();
        candidates.sort_by(rank_order);

        let decoded: Vec<Candidate> = keys.iter().map(|k| decode_key(k).unwrap()).collect();
        assert_eq!(decoded, candidates);
        assert_eq!(keys[0], "DROPOFF|0999999997|DROPOFF__-73.9810,40.7430");
    }
}
