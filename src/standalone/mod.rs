use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use crate::aggregate::AggregateKind;
use crate::rank::RankOrder;
use crate::trip::record::{BoundingBox, Profile};
use crate::trip::Analysis;

pub mod engine;
pub mod runner;

#[derive(Parser, Debug)]
#[command(name = "mrtopk", version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Aggregate raw trips per month and route/location
    ByMonth {
        #[arg(value_enum)]
        analysis: Analysis,

        /// Input file, directory, or glob of raw trip records
        input: String,

        /// Output directory for the per-month shards
        output: String,

        /// Number of shards; months are spread over them round-robin
        #[arg(default_value_t = 12, value_parser = clap::value_parser!(u32).range(1..))]
        num_shards: u32,

        #[command(flatten)]
        filters: Filters,
    },
    /// Rank the output of `by-month` and keep the top K
    TopK {
        #[arg(value_enum)]
        analysis: Analysis,

        /// Directory or glob holding `by-month` output
        input: String,

        /// Output directory for the ranking
        output: String,

        /// Entries to keep (per subgroup, for popular-locations)
        #[arg(default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..))]
        k: u32,

        /// Shards for the cross-month aggregation
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        shards: u32,

        #[arg(long, value_enum, default_value_t = RankOrder::Native)]
        order: RankOrder,
    },
    /// Run `by-month` and `top-k` back to back
    Run {
        #[arg(value_enum)]
        analysis: Analysis,

        /// Input file, directory, or glob of raw trip records
        input: String,

        /// Output directory for the ranking
        output: String,

        #[arg(long, default_value_t = 12, value_parser = clap::value_parser!(u32).range(1..))]
        shards: u32,

        #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..))]
        k: u32,

        #[arg(long, value_enum, default_value_t = RankOrder::Native)]
        order: RankOrder,

        #[command(flatten)]
        filters: Filters,
    },
}

/// Overrides for an analysis' default validation profile.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct Filters {
    /// Only keep trips picked up in this year
    #[arg(long)]
    pub year: Option<String>,

    /// Drop fares outside (0, MAX_FARE]
    #[arg(long)]
    pub max_fare: Option<f64>,

    /// Require coordinates inside the New York City bounding box
    #[arg(long, action = clap::ArgAction::Set)]
    pub bbox: Option<bool>,

    /// First field that marks a header row
    #[arg(long)]
    pub header: Option<String>,
}

impl Filters {
    pub fn apply(&self, mut profile: Profile) -> Profile {
        if let Some(year) = &self.year {
            profile.target_year = year.clone();
        }
        if let Some(max_fare) = self.max_fare {
            profile.max_fare = Some(max_fare);
        }
        if let Some(bbox) = self.bbox {
            profile.bbox = bbox.then_some(BoundingBox::NYC);
        }
        if let Some(header) = &self.header {
            profile.header_sentinel = header.clone();
        }
        profile
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    ByMonth,
    TopK,
    Run,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub mode: Mode,
    pub analysis: Analysis,
    pub input: String,
    pub output: String,
    pub profile: Profile,
    pub num_shards: u32,
    pub k: usize,
    pub order: RankOrder,
}

impl Job {
    /// A job with the analysis' defaults.
    pub fn new(mode: Mode, analysis: Analysis, input: &str, output: &str) -> Self {
        Self {
            mode,
            analysis,
            input: input.to_string(),
            output: output.to_string(),
            profile: analysis.profile(),
            num_shards: 12,
            k: 5,
            order: RankOrder::Native,
        }
    }

    /// Reject configurations that cannot run, before any data is read.
    pub fn validate(&self) -> Result<()> {
        if self.num_shards == 0 {
            bail!("number of shards must be at least 1");
        }
        if self.k == 0 {
            bail!("k must be at least 1");
        }
        if self.input.is_empty() || self.output.is_empty() {
            bail!("input and output paths are required");
        }
        if self.order == RankOrder::Encoded && self.analysis.kind() != AggregateKind::Count {
            bail!(
                "{} ranks fares, which the encoded ordering cannot hold",
                self.analysis.name()
            );
        }
        Ok(())
    }
}

impl From<Args> for Job {
    fn from(args: Args) -> Self {
        match args.command {
            Commands::ByMonth {
                analysis,
                input,
                output,
                num_shards,
                filters,
            } => Job {
                profile: filters.apply(analysis.profile()),
                num_shards,
                ..Job::new(Mode::ByMonth, analysis, &input, &output)
            },
            Commands::TopK {
                analysis,
                input,
                output,
                k,
                shards,
                order,
            } => Job {
                num_shards: shards,
                k: k as usize,
                order,
                ..Job::new(Mode::TopK, analysis, &input, &output)
            },
            Commands::Run {
                analysis,
                input,
                output,
                shards,
                k,
                order,
                filters,
            } => Job {
                profile: filters.apply(analysis.profile()),
                num_shards: shards,
                k: k as usize,
                order,
                ..Job::new(Mode::Run, analysis, &input, &output)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(argv: &[&str]) -> Job {
        Job::from(Args::try_parse_from(argv).unwrap())
    }

    #[test]
    fn positional_parameters_default() {
        let j = job(&["mrtopk", "by-month", "popular-routes", "in", "out"]);
        assert_eq!(j.mode, Mode::ByMonth);
        assert_eq!(j.num_shards, 12);

        let j = job(&["mrtopk", "top-k", "nightlife-spots", "in", "out", "10"]);
        assert_eq!(j.k, 10);
        assert_eq!(j.num_shards, 1);
        assert_eq!(j.order, RankOrder::Native);
    }

    #[test]
    fn filters_override_the_profile() {
        let j = job(&[
            "mrtopk",
            "run",
            "nightlife-spots",
            "in",
            "out",
            "--year",
            "2014",
            "--bbox",
            "false",
            "--max-fare",
            "100",
        ]);
        assert_eq!(j.profile.target_year, "2014");
        assert_eq!(j.profile.bbox, None);
        assert_eq!(j.profile.max_fare, Some(100.0));
        assert!(j.profile.hours.is_some());
    }

    #[test]
    fn rejects_unusable_configuration() {
        assert!(Args::try_parse_from(["mrtopk", "top-k", "popular-routes", "in", "out", "0"]).is_err());
        assert!(Args::try_parse_from(["mrtopk", "by-month", "popular-routes", "in", "out", "x"]).is_err());
        assert!(Args::try_parse_from(["mrtopk", "run", "taxi-routes", "in", "out"]).is_err());

        let mut j = Job::new(Mode::Run, Analysis::ExpensiveRoutes, "in", "out");
        assert!(j.validate().is_ok());
        j.order = RankOrder::Encoded;
        assert!(j.validate().is_err());
        let j = Job {
            k: 0,
            ..Job::new(Mode::TopK, Analysis::PopularRoutes, "in", "out")
        };
        assert!(j.validate().is_err());
    }
}
