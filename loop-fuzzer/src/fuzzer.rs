// Copyright (C) 2025 Zihan Li and Ethan Uppal.

use loop_ir::builder::LoopBuilder;
use loop_ir::ir::{LoopBody, MemEffect, Op, OpIdx, Variable};
use rand::prelude::*;
use rand_distr::Normal;

use crate::oracle::RegionOracle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlannedKind {
    Phi,
    Value,
    Load,
    Store,
    Call,
    Branch,
}

impl PlannedKind {
    fn defines(self) -> bool {
        matches!(self, PlannedKind::Phi | PlannedKind::Value | PlannedKind::Load)
    }
}

pub struct FuzzerBuilder<R: Rng> {
    fuzzer: Fuzzer<R>,
}

impl<R: Rng> FuzzerBuilder<R> {
    pub fn with_rng(rng: R) -> Self {
        Self {
            fuzzer: Fuzzer {
                rng,
                num_ops_mean: 32,
                num_ops_std: 0.0,
                mem_fraction: 0.4,
                store_fraction: 0.5,
                call_fraction: 0.05,
                phi_fraction: 0.15,
                branch_fraction: 0.1,
                num_regions: 4,
                carried_region_fraction: 0.5,
            },
        }
    }

    pub fn num_ops(mut self, mean: usize, std: f64) -> Self {
        self.fuzzer.num_ops_mean = mean;
        self.fuzzer.num_ops_std = std;
        self
    }

    /// Fraction of body ops that touch memory, and how many of those are
    /// stores.
    pub fn mem_fraction(mut self, mem: f64, stores: f64) -> Self {
        self.fuzzer.mem_fraction = mem;
        self.fuzzer.store_fraction = stores;
        self
    }

    pub fn call_fraction(mut self, fraction: f64) -> Self {
        self.fuzzer.call_fraction = fraction;
        self
    }

    pub fn phi_fraction(mut self, fraction: f64) -> Self {
        self.fuzzer.phi_fraction = fraction;
        self
    }

    pub fn branch_fraction(mut self, fraction: f64) -> Self {
        self.fuzzer.branch_fraction = fraction;
        self
    }

    pub fn regions(mut self, num_regions: u32, carried_fraction: f64) -> Self {
        self.fuzzer.num_regions = num_regions.max(1);
        self.fuzzer.carried_region_fraction = carried_fraction;
        self
    }

    pub fn finish(self) -> Fuzzer<R> {
        self.fuzzer
    }
}

pub struct Fuzzer<R: Rng> {
    rng: R,
    num_ops_mean: usize,
    num_ops_std: f64,
    mem_fraction: f64,
    store_fraction: f64,
    call_fraction: f64,
    phi_fraction: f64,
    branch_fraction: f64,
    num_regions: u32,
    carried_region_fraction: f64,
}

impl<R: Rng> Fuzzer<R> {
    /// Generates one loop and a matching region oracle. The loop always
    /// validates: phis first (their carried uses point at later defs), a
    /// body of value/load/store/call/branch ops chained through earlier
    /// defs, and a branch latch at the end.
    pub fn fuzz(&mut self) -> (LoopBody, RegionOracle) {
        let n = self.sample_op_count();
        let num_phis =
            ((n as f64 * self.phi_fraction).round() as usize).clamp(1, n - 2);

        let mut kinds = vec![PlannedKind::Phi; num_phis];
        for _ in num_phis..n - 1 {
            kinds.push(self.sample_body_kind());
        }
        // carried uses need at least one loop-local definition
        kinds[num_phis] = PlannedKind::Value;
        kinds.push(PlannedKind::Branch);

        // assign destination registers up front so phis can name defs
        // that appear later in the body
        let mut next_var = 0u32;
        let dests: Vec<Option<Variable>> = kinds
            .iter()
            .map(|kind| {
                let defines = kind.defines()
                    || (*kind == PlannedKind::Call && self.rng.random_bool(0.5));
                defines.then(|| {
                    let var = Variable(next_var);
                    next_var += 1;
                    var
                })
            })
            .collect();
        let later_defs: Vec<Variable> =
            dests[num_phis..].iter().flatten().copied().collect();

        let mut oracle = RegionOracle::new(self.num_regions);
        for region in 0..self.num_regions {
            let carried = self.rng.random_bool(self.carried_region_fraction);
            oracle.set_carried(region, carried);
        }

        let mut builder = LoopBuilder::new();
        let mut available: Vec<Variable> = vec![];
        let mut branches: Vec<(usize, OpIdx)> = vec![];
        let mut indices: Vec<OpIdx> = vec![];

        for (i, (&kind, &dest)) in kinds.iter().zip(&dests).enumerate() {
            let uses = self.sample_uses(&available, kind);
            let op = match kind {
                PlannedKind::Phi => {
                    let carried = *later_defs.choose(&mut self.rng).unwrap();
                    Op::phi(dest.unwrap(), uses, [carried])
                }
                PlannedKind::Value => Op::value(dest.unwrap(), uses),
                PlannedKind::Load => Op::load(dest.unwrap(), uses),
                PlannedKind::Store => Op::store(uses),
                PlannedKind::Call => Op::call(dest, uses, self.sample_call_effect()),
                PlannedKind::Branch => Op::branch(uses),
            };
            let affects_memory = op.effect.affects_memory();
            let idx = builder.push(op);
            indices.push(idx);

            if affects_memory {
                let region = self.rng.random_range(0..self.num_regions);
                oracle.assign(idx, region);
            }
            if kind == PlannedKind::Branch {
                branches.push((i, idx));
            }
            if let Some(var) = dest {
                available.push(var);
            }
        }

        let &(_, latch) = branches.last().unwrap();
        builder.latch(latch);
        for &(position, branch) in &branches[..branches.len() - 1] {
            let num_controlled = self.rng.random_range(1..=2);
            for &controlled in indices[position + 1..]
                .choose_multiple(&mut self.rng, num_controlled)
            {
                builder.control(branch, controlled);
            }
        }

        let body = builder.finish().expect("fuzzed loop failed validation");
        (body, oracle)
    }

    fn sample_op_count(&mut self) -> usize {
        let normal = Normal::new(self.num_ops_mean as f64, self.num_ops_std)
            .expect("invalid op count distribution");
        (self.rng.sample(normal).round() as i64).max(4) as usize
    }

    fn sample_body_kind(&mut self) -> PlannedKind {
        if self.rng.random_bool(self.mem_fraction) {
            if self.rng.random_bool(self.store_fraction) {
                PlannedKind::Store
            } else {
                PlannedKind::Load
            }
        } else if self.rng.random_bool(self.call_fraction) {
            PlannedKind::Call
        } else if self.rng.random_bool(self.branch_fraction) {
            PlannedKind::Branch
        } else {
            PlannedKind::Value
        }
    }

    fn sample_call_effect(&mut self) -> MemEffect {
        match self.rng.random_range(0..4) {
            0 => MemEffect::None,
            1 => MemEffect::Read,
            2 => MemEffect::Write,
            _ => MemEffect::ReadWrite,
        }
    }

    fn sample_uses(&mut self, available: &[Variable], kind: PlannedKind) -> Vec<Variable> {
        // phis merge the loop entry with their carried value
        if kind == PlannedKind::Phi || available.is_empty() {
            return vec![];
        }
        let count = self.rng.random_range(1..=2.min(available.len()));
        available
            .choose_multiple(&mut self.rng, count)
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn fuzzed_loops_validate_and_have_a_latch() {
        for seed in 0..32 {
            let rng = ChaCha8Rng::seed_from_u64(seed);
            let mut fuzzer = FuzzerBuilder::with_rng(rng)
                .num_ops(24, 4.0)
                .mem_fraction(0.5, 0.5)
                .finish();
            let (body, _oracle) = fuzzer.fuzz();
            assert!(body.len() >= 4);
            assert!(body.latch.is_some());
        }
    }

    #[test]
    fn same_seed_reproduces_the_loop() {
        let print = |seed: u64| {
            let rng = ChaCha8Rng::seed_from_u64(seed);
            let mut fuzzer = FuzzerBuilder::with_rng(rng).finish();
            let (body, _) = fuzzer.fuzz();
            let mut buf = String::new();
            loop_ir::printer::Printer::new(&mut buf)
                .print_loop(&body)
                .unwrap();
            buf
        };
        assert_eq!(print(7), print(7));
        assert_ne!(print(7), print(8));
    }

    #[test]
    fn memory_ops_are_assigned_regions() {
        let rng = ChaCha8Rng::seed_from_u64(3);
        let mut fuzzer = FuzzerBuilder::with_rng(rng)
            .mem_fraction(1.0, 0.5)
            .finish();
        let (body, oracle) = fuzzer.fuzz();
        for (idx, op) in body.iter() {
            assert_eq!(
                oracle.region_of(idx).is_some(),
                op.effect.affects_memory()
            );
        }
    }
}
