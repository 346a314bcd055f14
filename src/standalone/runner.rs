//! Stage wiring: by-month aggregation, cross-month aggregation, ranking.
//!
//! Each stage consumes the previous stage's complete output, so a failed
//! stage stops the job before anything downstream runs.

use std::path::Path;

use anyhow::{Context, Result};
use bytes::Bytes;
use rayon::prelude::*;
use tracing::info;

use super::engine::{self, Shard};
use super::{Job, Mode};
use crate::rank::{self, RankOrder, RankedEntry};
use crate::workload::{self, across_months, by_month, rank_encoded};
use crate::KeyValue;

/// Validate, key, and aggregate raw trips per month.
pub fn aggregate_by_month(job: &Job, inputs: Vec<KeyValue>) -> Result<Vec<Shard>> {
    let engine = workload::named("by-month", job.analysis.kind())?;
    let aux = by_month::Args {
        analysis: job.analysis,
        profile: job.profile.clone(),
    }
    .to_aux()?;
    engine::run_stage("by-month", inputs, &engine, &aux, job.num_shards)
}

/// Re-aggregate by-month output by identity alone.
pub fn aggregate_across_months(job: &Job, inputs: Vec<KeyValue>) -> Result<Vec<Shard>> {
    let kind = job.analysis.kind();
    let engine = workload::named("across-months", kind)?;
    let aux = across_months::Args { kind }.to_aux()?;
    engine::run_stage("across-months", inputs, &engine, &aux, job.num_shards)
}

/// Pick the top `job.k` entries from the cross-month shards.
pub fn select_top_k(job: &Job, shards: &[Shard]) -> Result<Vec<RankedEntry>> {
    let kind = job.analysis.kind();
    let entries = match job.order {
        RankOrder::Native => {
            let runs = shards
                .par_iter()
                .map(|shard| {
                    let data = String::from_utf8_lossy(&shard.data);
                    rank::local_top_k(rank::parse_candidates(&data, kind), job.k)
                })
                .collect();
            rank::top_k(runs, job.k)?
        }
        RankOrder::Encoded => {
            let engine = workload::named("rank-encoded", kind)?;
            let aux = rank_encoded::Args { kind }.to_aux()?;
            let sorted = engine::run_stage(
                "rank-encoded",
                engine::shards_to_inputs(shards),
                &engine,
                &aux,
                1,
            )?;
            let data = String::from_utf8_lossy(&sorted[0].data);
            rank::select(rank_encoded::decode_sorted(&data)?, job.k)?
        }
    };
    info!(
        analysis = job.analysis.name(),
        k = job.k,
        emitted = entries.len(),
        "ranking complete"
    );
    Ok(entries)
}

/// Render ranked entries as one output shard.
pub fn render(entries: &[RankedEntry]) -> Shard {
    let mut data = String::new();
    for entry in entries {
        data.push_str(&entry.to_string());
        data.push('\n');
    }
    Shard {
        index: 0,
        data: Bytes::from(data),
    }
}

/// The whole pipeline over in-memory input splits.
pub fn run_pipeline(job: &Job, inputs: Vec<KeyValue>) -> Result<Vec<RankedEntry>> {
    job.validate()?;
    let by_month = aggregate_by_month(job, inputs)?;
    let across = aggregate_across_months(job, engine::shards_to_inputs(&by_month))?;
    select_top_k(job, &across)
}

fn sibling(output: &str, suffix: &str) -> String {
    format!("{}{}", output.trim_end_matches('/'), suffix)
}

fn rank_and_write(job: &Job, by_month: Vec<KeyValue>) -> Result<()> {
    let across = aggregate_across_months(job, by_month)?;
    let temp = sibling(&job.output, "_temp");
    engine::write_shards(Path::new(&temp), &across)?;

    let entries = select_top_k(job, &across)?;
    engine::write_shards(Path::new(&job.output), &[render(&entries)])
}

/// Run a job against the file system.
pub fn run_job(job: &Job) -> Result<()> {
    job.validate()?;
    info!(
        analysis = job.analysis.name(),
        mode = ?job.mode,
        input = %job.input,
        output = %job.output,
        "starting job"
    );
    let inputs = engine::read_inputs(&job.input)
        .with_context(|| format!("reading input `{}`", job.input))?;

    match job.mode {
        Mode::ByMonth => {
            let shards = aggregate_by_month(job, inputs)?;
            engine::write_shards(Path::new(&job.output), &shards)
        }
        Mode::TopK => rank_and_write(job, inputs),
        Mode::Run => {
            let shards = aggregate_by_month(job, inputs)?;
            engine::write_shards(Path::new(&sibling(&job.output, "_by_month")), &shards)?;
            rank_and_write(job, engine::shards_to_inputs(&shards))
        }
    }
}
