// Copyright (C) 2025 Zihan Li and Ethan Uppal.

use clap::Parser;
use dashmap::DashMap;
use loop_fuzzer::FuzzerBuilder;
use pdg::{NoPrediction, NoSpeculation};
use pdg_analysis::{AnalysisSession, FlatEstimator, SuggestOptions};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

#[derive(Parser)]
struct Args {
    /// First seed of the sweep
    #[arg(long, default_value_t = 0)]
    start: u64,

    /// Number of seeds to sweep
    #[arg(short, long, default_value_t = 1000)]
    count: u64,

    /// Op count mean (of normal distribution)
    #[arg(short = 'n', long, default_value_t = 32)]
    num_ops: usize,

    /// Thread budget for each suggested pipeline
    #[arg(short, long, default_value_t = 25)]
    threads: u32,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let histogram: DashMap<String, u64> = DashMap::new();
    (args.start..args.start + args.count)
        .into_par_iter()
        .for_each(|seed| {
            let rng = ChaCha8Rng::seed_from_u64(seed);
            let mut fuzzer = FuzzerBuilder::with_rng(rng)
                .num_ops(args.num_ops, args.num_ops as f64 / 4.0)
                .finish();
            let (body, mut oracle) = fuzzer.fuzz();

            let options = SuggestOptions {
                thread_budget: args.threads,
                abort_if_no_parallel_stage: false,
                ..SuggestOptions::default()
            };
            let mut session = AnalysisSession::new(
                &body,
                &mut oracle,
                &NoSpeculation,
                &NoPrediction,
                options,
            );
            let pipeline = session.suggest(&FlatEstimator).expect("abort disabled");

            assert!(
                pipeline.validate(session.graph()),
                "seed {seed} produced an invalid pipeline"
            );
            assert!(
                pipeline.num_threads() <= args.threads,
                "seed {seed} exceeded the thread budget"
            );

            *histogram.entry(pipeline.summary()).or_insert(0) += 1;
        });

    let mut entries: Vec<(String, u64)> = histogram.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    for (summary, count) in entries {
        println!("{count:8}  {summary}");
    }
}
