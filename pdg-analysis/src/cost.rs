use loop_ir::ir::{LoopBody, OpIdx};
use pdg::{VertexId, Vertices};
use slotmap::SecondaryMap;

use crate::stage::{Stage, StageKind};

/// Relative execution cost of operations and how well they scale across
/// parallel workers.
pub trait PerformanceEstimator {
    /// Relative cost of one operation per iteration.
    fn weight(&self, body: &LoopBody, op: OpIdx) -> f64;

    /// In [0, 1]: the fraction of this operation's cost that a parallel
    /// worker actually executes (1 = perfectly partitionable).
    fn parallelization_weight(&self, body: &LoopBody, op: OpIdx) -> f64;

    fn vertex_weight(&self, body: &LoopBody, vertices: &Vertices, v: VertexId) -> f64 {
        self.weight(body, vertices.get(v))
    }

    fn weight_of_vertices(
        &self,
        body: &LoopBody,
        vertices: &Vertices,
        members: &[VertexId],
    ) -> f64 {
        members
            .iter()
            .map(|&v| self.vertex_weight(body, vertices, v))
            .sum()
    }

    fn loop_weight(&self, body: &LoopBody) -> f64 {
        body.iter().map(|(op, _)| self.weight(body, op)).sum()
    }

    /// The pipeline runs at the pace of its slowest stage: a parallel
    /// stage divides its member weight by the effective worker count, and
    /// every stage pays full price for its replicated prefix.
    fn pipeline_weight(
        &self,
        body: &LoopBody,
        vertices: &Vertices,
        stages: &[Stage],
    ) -> f64 {
        let mut slowest = 0.0f64;
        for stage in stages {
            debug_assert!(stage.kind != StageKind::Replicable, "expand first");

            let members = self.weight_of_vertices(body, vertices, &stage.members);
            let effective = match stage.kind {
                StageKind::Parallel { factor } if !stage.members.is_empty() => {
                    let average = stage
                        .members
                        .iter()
                        .map(|&v| self.parallelization_weight(body, vertices.get(v)))
                        .sum::<f64>()
                        / stage.members.len() as f64;
                    (factor as f64 * average).round().max(1.0)
                }
                _ => 1.0,
            };
            let replicated = self.weight_of_vertices(body, vertices, &stage.replicated);
            slowest = slowest.max(members / effective + replicated);
        }
        slowest
    }
}

/// Every operation costs 1 and parallelizes perfectly.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlatEstimator;

impl PerformanceEstimator for FlatEstimator {
    fn weight(&self, _body: &LoopBody, _op: OpIdx) -> f64 {
        1.0
    }

    fn parallelization_weight(&self, _body: &LoopBody, _op: OpIdx) -> f64 {
        1.0
    }
}

/// Profile-backed estimator: per-op weights and execution fractions, both
/// defaulting to 1 for unprofiled operations.
#[derive(Debug, Default, Clone)]
pub struct ProfileEstimator {
    weights: SecondaryMap<OpIdx, f64>,
    execution_fractions: SecondaryMap<OpIdx, f64>,
}

impl ProfileEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_weight(&mut self, op: OpIdx, weight: f64) {
        self.weights.insert(op, weight);
    }

    pub fn set_execution_fraction(&mut self, op: OpIdx, fraction: f64) {
        self.execution_fractions.insert(op, fraction.clamp(0.0, 1.0));
    }
}

impl PerformanceEstimator for ProfileEstimator {
    fn weight(&self, _body: &LoopBody, op: OpIdx) -> f64 {
        self.weights.get(op).copied().unwrap_or(1.0)
    }

    fn parallelization_weight(&self, _body: &LoopBody, op: OpIdx) -> f64 {
        self.execution_fractions.get(op).copied().unwrap_or(1.0)
    }
}
