use divan::{Bencher, black_box};
use loop_fuzzer::FuzzerBuilder;
use pdg::{NoPrediction, NoSpeculation};
use pdg_analysis::{FlatEstimator, SuggestOptions};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

fn main() {
    divan::main();
}

#[divan::bench(args = [16, 64, 256])]
fn suggest_fuzzed_loop(bencher: Bencher, num_ops: usize) {
    let rng = ChaCha8Rng::seed_from_u64(42);
    let mut fuzzer = FuzzerBuilder::with_rng(rng).num_ops(num_ops, 0.0).finish();
    let (body, mut oracle) = fuzzer.fuzz();
    let options = SuggestOptions {
        abort_if_no_parallel_stage: false,
        ..SuggestOptions::default()
    };

    bencher.bench_local(|| {
        black_box(pdg_analysis::suggest(
            &body,
            &mut oracle,
            &NoSpeculation,
            &NoPrediction,
            &FlatEstimator,
            &options,
        ))
    })
}
