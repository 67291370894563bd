// Copyright (C) 2025 Zihan Li and Ethan Uppal.

use clap::Parser;
use loop_fuzzer::FuzzerBuilder;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

#[derive(Parser, Debug)]
struct Args {
    /// Random seed
    #[arg(short, long)]
    seed: Option<u64>,

    /// Op count mean (of normal distribution)
    #[arg(short = 'n', long, default_value_t = 32)]
    num_ops: usize,

    /// Op count std (of normal distribution)
    #[arg(long, default_value_t = 0.0)]
    num_ops_std: f64,

    /// Fraction of body ops touching memory
    #[arg(long, default_value_t = 0.4)]
    mem_fraction: f64,

    /// Fraction of memory ops that are stores
    #[arg(long, default_value_t = 0.5)]
    store_fraction: f64,

    /// Number of disjoint memory regions
    #[arg(long, default_value_t = 4)]
    regions: u32,

    /// Fraction of regions carrying state across iterations
    #[arg(long, default_value_t = 0.5)]
    carried_fraction: f64,
}

fn main() {
    let args = Args::parse();
    let rng = if let Some(seed) = args.seed {
        ChaCha8Rng::seed_from_u64(seed)
    } else {
        ChaCha8Rng::from_os_rng()
    };
    let mut fuzzer = FuzzerBuilder::with_rng(rng)
        .num_ops(args.num_ops, args.num_ops_std)
        .mem_fraction(args.mem_fraction, args.store_fraction)
        .regions(args.regions, args.carried_fraction)
        .finish();
    let (body, _oracle) = fuzzer.fuzz();

    let mut buf = String::new();
    let mut pretty_printer = loop_ir::printer::Printer::new(&mut buf);
    pretty_printer.print_loop(&body).unwrap();
    println!("{buf}");
}
