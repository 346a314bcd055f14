//! Partition functions for the shuffle.
//!

use anyhow::{anyhow, ensure, Context, Result};

use crate::ihash;
use crate::trip::key::SEPARATOR;
use crate::utils::str_from_slice;

/// Route a `MM__...` key by month alone: `(month - 1) % num_shards`.
///
/// Every key of one month lands on the same shard, whatever its identity.
/// With fewer than twelve shards several months share a shard.
pub fn by_month(key: &[u8], num_shards: u32) -> Result<u32> {
    ensure!(num_shards > 0, "no shards to partition into");
    let key = str_from_slice(key)?;
    let month = key
        .split_once(SEPARATOR)
        .map(|(month, _)| month)
        .ok_or_else(|| anyhow!("key `{}` has no month prefix", key))?;
    let month: u32 = month
        .parse()
        .with_context(|| format!("bad month in key `{}`", key))?;
    ensure!((1..=12).contains(&month), "month {} out of range", month);
    Ok((month - 1) % num_shards)
}

/// Route by FNV hash of the whole key.
pub fn by_hash(key: &[u8], num_shards: u32) -> Result<u32> {
    ensure!(num_shards > 0, "no shards to partition into");
    Ok(ihash(key) % num_shards)
}

/// Route everything to shard 0, giving that shard a total order over the
/// stage's keys.
pub fn single(_key: &[u8], _num_shards: u32) -> Result<u32> {
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn months_map_to_fixed_shards() {
        assert_eq!(by_month(b"01__-73.9770,40.7450", 12).unwrap(), 0);
        assert_eq!(by_month(b"12__-73.9770,40.7450", 12).unwrap(), 11);
        assert_eq!(by_month(b"03__PICKUP__-73.9770,40.7450", 12).unwrap(), 2);
    }

    #[test]
    fn months_collide_when_shards_are_few() {
        assert_eq!(by_month(b"01__x", 5).unwrap(), 0);
        assert_eq!(by_month(b"06__x", 5).unwrap(), 0);
        assert_eq!(by_month(b"11__x", 5).unwrap(), 0);
        assert_eq!(by_month(b"07__x", 1).unwrap(), 0);
    }

    #[test]
    fn identity_never_affects_the_shard() {
        let a = by_month(b"04__-73.9770,40.7450", 7).unwrap();
        let b = by_month(b"04__-10.0000,10.0000", 7).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn malformed_keys_fail() {
        assert!(by_month(b"-73.9770,40.7450", 12).is_err());
        assert!(by_month(b"xx__-73.9770", 12).is_err());
        assert!(by_month(b"00__-73.9770", 12).is_err());
        assert!(by_month(b"01__x", 0).is_err());
    }

    #[test]
    fn hashing_stays_in_range() {
        for key in [&b"a"[..], b"-73.9770,40.7450", b"PICKUP__-73.9770,40.7450"] {
            assert!(by_hash(key, 3).unwrap() < 3);
            assert_eq!(by_hash(key, 3).unwrap(), by_hash(key, 3).unwrap());
        }
    }
}
