use anyhow::{bail, ensure, Context, Result};
use bytes::{BufMut, Bytes, BytesMut};
use dashmap::DashMap;
use glob::glob;
use itertools::Itertools;
use rayon::prelude::*;
use std::{
    fs::{self, File},
    io::{Read, Write},
    path::Path,
};
use tracing::{debug, info};

use crate::*;

// types related to this engine
type ShardIndex = u32;
type Buckets = DashMap<ShardIndex, Vec<KeyValue>>;

/// One reduce shard's output, sorted by key.
#[derive(Clone, Debug, PartialEq)]
pub struct Shard {
    pub index: ShardIndex,
    pub data: Bytes,
}

impl Shard {
    pub fn file_name(&self) -> String {
        format!("part-r-{:05}", self.index)
    }
}

/// Read every input file matched by `input` into `<filename, contents>`
/// pairs. A directory stands for all of its files; names starting with `_`
/// or `.` are skipped.
pub fn read_inputs(input: &str) -> Result<Vec<KeyValue>> {
    let pattern = if Path::new(input).is_dir() {
        format!("{}/*", input.trim_end_matches('/'))
    } else {
        input.to_string()
    };

    let mut inputs = Vec::new();
    for pathspec in glob(&pattern)?.flatten() {
        let hidden = pathspec
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(true, |n| n.starts_with('_') || n.starts_with('.'));
        if hidden || !pathspec.is_file() {
            continue;
        }
        let mut buf = Vec::new();
        {
            // a scope so that the file is closed right after reading
            let mut file = File::open(&pathspec)
                .with_context(|| format!("opening {}", pathspec.display()))?;
            file.read_to_end(&mut buf)?;
        }
        let filename = pathspec.to_str().unwrap_or("unknown").to_string();
        inputs.push(KeyValue::new(Bytes::from(filename), Bytes::from(buf)));
    }
    ensure!(!inputs.is_empty(), "no input files match `{}`", input);
    Ok(inputs)
}

/// Turn one stage's shards into the next stage's input splits.
pub fn shards_to_inputs(shards: &[Shard]) -> Vec<KeyValue> {
    shards
        .iter()
        .map(|shard| KeyValue::new(Bytes::from(shard.file_name()), shard.data.clone()))
        .collect()
}

/// Write each shard to `<dir>/part-r-NNNNN`. Shard files of an earlier run
/// that this run does not produce are removed.
pub fn write_shards(dir: &Path, shards: &[Shard]) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let names: Vec<String> = shards.iter().map(Shard::file_name).collect();
    for entry in fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
        let path = entry?.path();
        let stale = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("part-r-") && !names.iter().any(|name| name == n));
        if stale {
            debug!(path = %path.display(), "removing stale shard");
            fs::remove_file(&path).with_context(|| format!("removing {}", path.display()))?;
        }
    }
    for shard in shards {
        let out_pathspec = dir.join(shard.file_name());
        let mut out_file = File::create(&out_pathspec)
            .with_context(|| format!("creating {}", out_pathspec.display()))?;
        out_file.write_all(&shard.data)?;
    }
    Ok(())
}

/// Sort a map task's output and fold each key's values into one.
fn combine_locally(
    mut output: Vec<KeyValue>,
    combine_fn: CombineFn,
) -> Result<Vec<KeyValue>> {
    output.sort_unstable_by_key(KeyValue::key);
    let mut combined = Vec::new();
    for (key, value_group) in &output.into_iter().chunk_by(KeyValue::key) {
        let value = combine_fn(&key, Box::new(value_group.map(KeyValue::into_value)))?;
        combined.push(KeyValue::new(key, value));
    }
    Ok(combined)
}

/// Run the map function over every input split in parallel, pre-combine
/// each split's output, and route the pairs to shards.
pub fn perform_map(
    inputs: Vec<KeyValue>,
    engine: &Workload,
    serialized_args: &Bytes,
    num_shards: u32,
) -> Result<Buckets> {
    ensure!(num_shards > 0, "a stage needs at least one shard");
    let buckets: Buckets = Buckets::new();

    inputs.into_par_iter().try_for_each(|input_kv| -> Result<()> {
        let split = String::from_utf8_lossy(&input_kv.key).into_owned();
        let output = (engine.map_fn)(input_kv, serialized_args.clone())?
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("mapping {}", split))?;
        let emitted = output.len();
        let output = match engine.combine_fn {
            Some(combine_fn) => combine_locally(output, combine_fn)?,
            None => output,
        };
        debug!(split = %split, emitted, combined = output.len(), "map task done");

        for kv in output {
            let shard = (engine.partition_fn)(&kv.key, num_shards)?;
            if shard >= num_shards {
                bail!("partition function chose shard {} of {}", shard, num_shards);
            }
            #[allow(clippy::unwrap_or_default)]
            buckets
                .entry(shard)
                .or_insert(Vec::new())
                .push(kv);
        }
        Ok(())
    })?;

    Ok(buckets)
}

/// Sort every bucket by key. Each shard in `0..num_shards` appears once,
/// empty if nothing was routed to it.
pub fn perform_sort(buckets: Buckets, num_shards: u32) -> Vec<(ShardIndex, Vec<KeyValue>)> {
    let mut sorted: Vec<(ShardIndex, Vec<KeyValue>)> = buckets
        .into_par_iter()
        .map(|(index, mut bkt)| {
            bkt.sort_by_key(KeyValue::key);
            (index, bkt)
        })
        .collect();
    for index in 0..num_shards {
        if !sorted.iter().any(|(i, _)| *i == index) {
            sorted.push((index, Vec::new()));
        }
    }
    sorted.sort_unstable_by_key(|(index, _)| *index);
    sorted
}

/// Group each sorted shard by key and apply the reduce function to every
/// group, in key order.
pub fn perform_reduce(
    engine: &Workload,
    serialized_args: &Bytes,
    buckets: Buckets,
    num_shards: u32,
) -> Result<Vec<Shard>> {
    let reduce_func = engine.reduce_fn;
    perform_sort(buckets, num_shards)
        .into_par_iter()
        .map(|(index, bkt)| -> Result<Shard> {
            let mut writer = BytesMut::new();
            for (key, value_group) in &bkt.into_iter().chunk_by(KeyValue::key) {
                let iter = value_group.map(KeyValue::into_value);
                let out = reduce_func(key, Box::new(iter), serialized_args.clone())?;
                writer.put(out);
            }
            Ok(Shard {
                index,
                data: writer.freeze(),
            })
        })
        .collect()
}

/// Map, shuffle, and reduce one stage.
pub fn run_stage(
    name: &str,
    inputs: Vec<KeyValue>,
    engine: &Workload,
    serialized_args: &Bytes,
    num_shards: u32,
) -> Result<Vec<Shard>> {
    let splits = inputs.len();
    let buckets = perform_map(inputs, engine, serialized_args, num_shards)
        .with_context(|| format!("{} map phase", name))?;
    let shards = perform_reduce(engine, serialized_args, buckets, num_shards)
        .with_context(|| format!("{} reduce phase", name))?;
    let bytes: usize = shards.iter().map(|s| s.data.len()).sum();
    info!(stage = name, splits, shards = num_shards, bytes, "stage complete");
    Ok(shards)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregateKind;
    use crate::workload::{self, across_months};

    fn across(kind: AggregateKind) -> (Workload, Bytes) {
        let engine = workload::named("across-months", kind).unwrap();
        (engine, across_months::Args { kind }.to_aux().unwrap())
    }

    fn split(name: &'static str, data: &'static str) -> KeyValue {
        KeyValue::new(Bytes::from_static(name.as_bytes()), Bytes::from_static(data.as_bytes()))
    }

    #[test]
    fn every_shard_is_sorted_and_present() {
        let (engine, aux) = across(AggregateKind::Count);
        let inputs = vec![
            split("a", "01__b,b\t1\n02__a,a\t2\n"),
            split("b", "03__c,c\t4\n04__a,a\t1\n"),
        ];
        let shards = run_stage("test", inputs, &engine, &aux, 5).unwrap();
        assert_eq!(shards.len(), 5);
        assert_eq!(
            shards.iter().map(|s| s.index).collect::<Vec<_>>(),
            [0, 1, 2, 3, 4]
        );

        let mut all = Vec::new();
        for shard in &shards {
            let lines: Vec<&str> = std::str::from_utf8(&shard.data).unwrap().lines().collect();
            let mut sorted = lines.clone();
            sorted.sort();
            assert_eq!(lines, sorted);
            all.extend(lines.into_iter().map(str::to_string));
        }
        all.sort();
        assert_eq!(all, ["a,a\t3", "b,b\t1", "c,c\t4"]);
    }

    #[test]
    fn a_single_shard_sees_every_key_in_order() {
        let (engine, aux) = across(AggregateKind::MaxFare);
        let inputs = vec![
            split("a", "05__z\t3.5\n05__m\t70\n"),
            split("b", "06__a\t1\n07__m\t12\n"),
        ];
        let shards = run_stage("test", inputs, &engine, &aux, 1).unwrap();
        assert_eq!(shards[0].data.as_ref(), b"a\t1.0\nm\t70.0\nz\t3.5\n");
    }

    #[test]
    fn out_of_range_partitions_fail_the_stage() {
        fn rogue(_key: &[u8], num_shards: u32) -> Result<u32> {
            Ok(num_shards)
        }
        let (mut engine, aux) = across(AggregateKind::Count);
        engine.partition_fn = rogue;
        let inputs = vec![split("a", "01__x\t1\n")];
        assert!(run_stage("test", inputs, &engine, &aux, 2).is_err());
    }

    #[test]
    fn rewriting_with_fewer_shards_drops_the_extra_files() {
        let dir = tempfile::tempdir().unwrap();
        let shards = |n: u32| -> Vec<Shard> {
            (0..n)
                .map(|index| Shard {
                    index,
                    data: Bytes::from(format!("x\t{}\n", index)),
                })
                .collect()
        };
        write_shards(dir.path(), &shards(12)).unwrap();
        fs::write(dir.path().join("_SUCCESS"), "").unwrap();
        write_shards(dir.path(), &shards(2)).unwrap();

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, ["_SUCCESS", "part-r-00000", "part-r-00001"]);
        let inputs = read_inputs(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(inputs.len(), 2);
    }

    #[test]
    fn reads_directories_and_skips_markers() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("part-r-00000"), "x\t1\n").unwrap();
        fs::write(dir.path().join("_SUCCESS"), "").unwrap();
        let inputs = read_inputs(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].value.as_ref(), b"x\t1\n");

        let empty = tempfile::tempdir().unwrap();
        assert!(read_inputs(empty.path().to_str().unwrap()).is_err());
    }
}
