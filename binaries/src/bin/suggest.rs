// Copyright (C) 2025 Zihan Li and Ethan Uppal.

use clap::Parser;
use loop_fuzzer::FuzzerBuilder;
use pdg::{NoPrediction, NoSpeculation};
use pdg_analysis::{
    AnalysisSession, DotPrinter, FlatEstimator, StageKind, SuggestOptions,
};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

#[derive(Parser)]
struct Args {
    /// Random seed for the fuzzed loop
    #[arg(short, long)]
    seed: Option<u64>,

    /// Op count mean (of normal distribution)
    #[arg(short = 'n', long, default_value_t = 32)]
    num_ops: usize,

    /// Fraction of body ops touching memory
    #[arg(long, default_value_t = 0.4)]
    mem_fraction: f64,

    /// Number of disjoint memory regions
    #[arg(long, default_value_t = 4)]
    regions: u32,

    /// Fraction of regions carrying state across iterations
    #[arg(long, default_value_t = 0.5)]
    carried_fraction: f64,

    /// Thread budget for the suggested pipeline
    #[arg(short, long, default_value_t = 25)]
    threads: u32,

    /// Disable replicable stages
    #[arg(long)]
    no_replicable: bool,

    /// Disable parallel stages
    #[arg(long)]
    no_parallel: bool,

    /// Keep scheduling even when no parallel stage is worthwhile
    #[arg(long)]
    no_abort: bool,

    /// Dismiss remediable anti and output memory dependences
    #[arg(long)]
    ignore_anti_output: bool,

    /// Emit the pipeline as graphviz dot
    #[arg(long)]
    dot: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let rng = if let Some(seed) = args.seed {
        ChaCha8Rng::seed_from_u64(seed)
    } else {
        ChaCha8Rng::from_os_rng()
    };
    let mut fuzzer = FuzzerBuilder::with_rng(rng)
        .num_ops(args.num_ops, args.num_ops as f64 / 8.0)
        .mem_fraction(args.mem_fraction, 0.5)
        .regions(args.regions, args.carried_fraction)
        .finish();
    let (body, mut oracle) = fuzzer.fuzz();

    let mut buf = String::new();
    loop_ir::printer::Printer::new(&mut buf)
        .print_loop(&body)
        .unwrap();
    println!("{buf}");

    let options = SuggestOptions {
        thread_budget: args.threads,
        ignore_anti_output: args.ignore_anti_output,
        include_replicable_stages: !args.no_replicable,
        include_parallel_stages: !args.no_parallel,
        abort_if_no_parallel_stage: !args.no_abort,
        ..SuggestOptions::default()
    };
    let mut session = AnalysisSession::new(
        &body,
        &mut oracle,
        &NoSpeculation,
        &NoPrediction,
        options,
    );

    match session.suggest(&FlatEstimator) {
        Some(pipeline) => {
            println!("{pipeline}");
            for (i, stage) in pipeline.stages.iter().enumerate() {
                let kind = match stage.kind {
                    StageKind::Sequential => "sequential".to_string(),
                    StageKind::Replicable => "replicable".to_string(),
                    StageKind::Parallel { factor } => format!("parallel x{factor}"),
                };
                println!(
                    "stage {i} ({kind}): {} members, {} replicated",
                    stage.members.len(),
                    stage.replicated.len()
                );
            }
            println!(
                "{} cross-stage control deps, {} cross-stage memory flows",
                pipeline.cross_stage_deps.len(),
                pipeline.cross_stage_mem_flows.len()
            );
            println!(
                "{} of {} ops were eligible for a parallel stage",
                session
                    .components()
                    .upper_bound_parallel_stage(session.graph())
                    .len(),
                body.len()
            );

            if args.dot {
                let mut dot = String::new();
                DotPrinter::new(&mut dot)
                    .print_pipeline(session.graph(), &pipeline)
                    .unwrap();
                println!("{dot}");
            }
        }
        None => println!("no worthwhile parallel stage; keeping the loop sequential"),
    }

    let stats = session.into_stats();
    eprintln!("{} oracle queries", stats.num_queries);
}
