// Copyright (C) 2025 Zihan Li and Ethan Uppal.

use std::fmt;

use loop_ir::ir::OpKind;
use pdg::{DepFlags, DependenceGraph, VertexId, Vertices};

use crate::scc::Components;

const COMMUNICATION: DepFlags = DepFlags::II_REG
    .union(DepFlags::LC_REG)
    .union(DepFlags::II_MEM)
    .union(DepFlags::LC_MEM)
    .union(DepFlags::II_CTRL)
    .union(DepFlags::LC_CTRL);

const MEMORY: DepFlags = DepFlags::II_MEM.union(DepFlags::LC_MEM);

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum StageKind {
    Sequential,
    Replicable,
    Parallel { factor: u32 },
}

/// One pipeline stage. `members` is sorted; `replicated` holds copies of
/// upstream replicable work that runs redundantly inside this stage.
#[derive(Debug, Clone)]
pub struct Stage {
    pub kind: StageKind,
    pub members: Vec<VertexId>,
    pub replicated: Vec<VertexId>,
}

impl Stage {
    pub fn from_sccs(kind: StageKind, components: &Components, sccs: &[usize]) -> Self {
        let mut members: Vec<VertexId> = sccs
            .iter()
            .flat_map(|&i| components.get(i).iter().copied())
            .collect();
        members.sort();
        Stage {
            kind,
            members,
            replicated: vec![],
        }
    }

    /// The whole loop as a single sequential stage.
    pub fn degenerate(vertices: &Vertices) -> Self {
        Stage {
            kind: StageKind::Sequential,
            members: vertices.iter().collect(),
            replicated: vec![],
        }
    }

    pub fn parallel_factor(&self) -> u32 {
        match self.kind {
            StageKind::Parallel { factor } => factor,
            _ => 1,
        }
    }

    pub fn contains(&self, v: VertexId) -> bool {
        self.members.binary_search(&v).is_ok()
    }

    /// Whether this stage produces a value, memory state, or control
    /// decision that `other` consumes, judged from the known edges. A
    /// control-only consumer still counts: it must recompute the branch
    /// to know whether its own members run.
    pub fn communicates_to(&self, other: &Stage, graph: &DependenceGraph) -> bool {
        self.members.iter().any(|&src| {
            other
                .members
                .iter()
                .any(|&dst| graph.edges().has(src, dst, COMMUNICATION))
        })
    }
}

/// A control dependence whose branch lands in a different stage than the
/// operation it controls.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct CrossStageDep {
    pub src: VertexId,
    pub dst: VertexId,
    pub flags: DepFlags,
}

/// A memory dependence crossing stages: the consumer observes values the
/// producer's iteration has not committed yet.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct CrossStageMemFlow {
    pub src: VertexId,
    pub dst: VertexId,
    pub carried: bool,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
    pub cross_stage_deps: Vec<CrossStageDep>,
    pub cross_stage_mem_flows: Vec<CrossStageMemFlow>,
}

impl Pipeline {
    /// The trivial plan: run the whole loop in one sequential stage.
    pub fn degenerate(vertices: &Vertices) -> Self {
        Pipeline {
            stages: vec![Stage::degenerate(vertices)],
            cross_stage_deps: vec![],
            cross_stage_mem_flows: vec![],
        }
    }

    /// `DSWP[S-P4-S]` style shorthand.
    pub fn summary(&self) -> String {
        self.to_string()
    }

    pub fn stage_of(&self, v: VertexId) -> Option<usize> {
        self.stages.iter().position(|stage| stage.contains(v))
    }

    pub fn may_execute_in_parallel_stage(&self, v: VertexId) -> bool {
        self.stages.iter().any(|stage| {
            matches!(stage.kind, StageKind::Parallel { .. })
                && (stage.contains(v) || stage.replicated.contains(&v))
        })
    }

    pub fn num_threads(&self) -> u32 {
        self.stages.iter().map(Stage::parallel_factor).sum()
    }

    /// Folds every replicable stage into the replicated sets of the later
    /// stages it feeds, then drops it; a replicable stage feeding nobody
    /// downgrades to a plain sequential stage. Returns whether the stage
    /// list changed.
    pub fn expand_replicated_stages(&mut self, graph: &DependenceGraph) -> bool {
        expand_stages(&mut self.stages, graph)
    }

    /// Debug-build validation of the three pipeline invariants.
    pub fn assert_pipeline_property(&self, graph: &DependenceGraph) {
        debug_assert!(self.validate(graph), "pipeline invariants violated");
    }

    /// Partition completeness, pipeline-order soundness, parallel-stage
    /// soundness, and no unexpanded replicable stage.
    pub fn validate(&self, graph: &DependenceGraph) -> bool {
        let n = graph.num_vertices();
        let mut seen = vec![false; n];
        for stage in &self.stages {
            if stage.kind == StageKind::Replicable {
                return false;
            }
            for &v in &stage.members {
                if seen[v.0 as usize] {
                    return false;
                }
                seen[v.0 as usize] = true;
            }
        }
        // a vertex missing from every member list must live on as a
        // replicated copy somewhere
        for (index, &covered) in seen.iter().enumerate() {
            if covered {
                continue;
            }
            let v = VertexId(index as u32);
            if !self.stages.iter().any(|stage| stage.replicated.contains(&v)) {
                return false;
            }
        }

        // no known dependence may point from a later stage to an earlier one
        for (later_index, later) in self.stages.iter().enumerate() {
            for earlier in &self.stages[..later_index] {
                for &src in &later.members {
                    for dst in earlier.members.iter().chain(&earlier.replicated) {
                        if graph.has_edge(src, *dst) {
                            return false;
                        }
                    }
                }
            }
        }

        // parallel stages tolerate no known loop-carried edge among members
        for stage in &self.stages {
            if !matches!(stage.kind, StageKind::Parallel { .. }) {
                continue;
            }
            for &v in &stage.members {
                for &w in &stage.members {
                    if graph.edges().has_loop_carried_edge(v, w) {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Records the dependences the runtime must forward between stages:
    /// control edges whose branch lands elsewhere, and memory edges whose
    /// endpoints straddle a stage boundary. A stage holding a replicated
    /// copy of the source computes it locally and needs no forwarding.
    pub fn materialize_cross_stage_edges(&mut self, graph: &DependenceGraph) {
        let mut deps = vec![];
        let mut flows = vec![];

        let crosses = |src: VertexId, dst: VertexId| {
            self.stages
                .iter()
                .any(|stage| hosts(stage, dst) && !hosts(stage, src))
        };

        for src in graph.vertices().iter() {
            let is_branch =
                graph.body().op(graph.vertices().get(src)).kind == OpKind::Branch;

            if is_branch {
                for dst in graph.edges().successors_filtered(src, DepFlags::CTRL) {
                    if crosses(src, dst) {
                        let flags = graph.edges().find(src, dst) & DepFlags::CTRL;
                        deps.push(CrossStageDep { src, dst, flags });
                    }
                }
            }

            for dst in graph.edges().successors_filtered(src, MEMORY) {
                if !crosses(src, dst) {
                    continue;
                }
                let flags = graph.edges().find(src, dst);
                if flags.contains(DepFlags::II_MEM) {
                    flows.push(CrossStageMemFlow {
                        src,
                        dst,
                        carried: false,
                    });
                }
                if flags.contains(DepFlags::LC_MEM) {
                    flows.push(CrossStageMemFlow {
                        src,
                        dst,
                        carried: true,
                    });
                }
            }
        }

        self.cross_stage_deps = deps;
        self.cross_stage_mem_flows = flows;
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DSWP[")?;
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                write!(f, "-")?;
            }
            match stage.kind {
                StageKind::Sequential => write!(f, "S")?,
                StageKind::Replicable => write!(f, "R")?,
                StageKind::Parallel { factor } => write!(f, "P{factor}")?,
            }
        }
        write!(f, "]")
    }
}

fn hosts(stage: &Stage, v: VertexId) -> bool {
    stage.contains(v) || stage.replicated.contains(&v)
}

/// Stage-list form of [`Pipeline::expand_replicated_stages`], usable on
/// candidate partitions before a [`Pipeline`] exists.
pub(crate) fn expand_stages(stages: &mut Vec<Stage>, graph: &DependenceGraph) -> bool {
    let mut changed = false;
    for i in (0..stages.len()).rev() {
        if stages[i].kind != StageKind::Replicable {
            continue;
        }
        changed = true;

        let mut any_consumer = false;
        for j in i + 1..stages.len() {
            if stages[j].kind == StageKind::Replicable {
                continue;
            }
            if !stages[i].communicates_to(&stages[j], graph) {
                continue;
            }
            any_consumer = true;
            let members = stages[i].members.clone();
            let replicated = &mut stages[j].replicated;
            for v in members {
                if !replicated.contains(&v) {
                    replicated.push(v);
                }
            }
            replicated.sort();
        }

        if !any_consumer {
            stages[i].kind = StageKind::Sequential;
        }
    }
    stages.retain(|stage| stage.kind != StageKind::Replicable);
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use loop_ir::builder::LoopBuilder;
    use loop_ir::ir::{Op, Variable};
    use pdg::{NoMemoryDeps, NoPrediction, NoSpeculation};

    fn stage(kind: StageKind, members: Vec<VertexId>) -> Stage {
        Stage {
            kind,
            members,
            replicated: vec![],
        }
    }

    #[test]
    fn summary_shorthand() {
        let pipeline = Pipeline {
            stages: vec![
                stage(StageKind::Sequential, vec![VertexId(0)]),
                stage(StageKind::Parallel { factor: 4 }, vec![VertexId(1)]),
                stage(StageKind::Sequential, vec![VertexId(2)]),
            ],
            cross_stage_deps: vec![],
            cross_stage_mem_flows: vec![],
        };
        assert_eq!(pipeline.summary(), "DSWP[S-P4-S]");
        assert_eq!(pipeline.num_threads(), 6);
        assert_eq!(pipeline.stage_of(VertexId(1)), Some(1));
        assert!(pipeline.may_execute_in_parallel_stage(VertexId(1)));
        assert!(!pipeline.may_execute_in_parallel_stage(VertexId(0)));
    }

    #[test]
    fn expansion_folds_replicable_work_into_its_consumer() {
        // v0 = value; store v0
        let mut builder = LoopBuilder::new();
        builder.push(Op::value(Variable(0), []));
        builder.push(Op::store([Variable(0)]));
        let body = builder.finish().unwrap();
        let mut oracle = NoMemoryDeps;
        let graph = DependenceGraph::build(
            &body,
            &mut oracle,
            &NoSpeculation,
            &NoPrediction,
            false,
        );

        let mut pipeline = Pipeline {
            stages: vec![
                stage(StageKind::Replicable, vec![VertexId(0)]),
                stage(StageKind::Sequential, vec![VertexId(1)]),
            ],
            cross_stage_deps: vec![],
            cross_stage_mem_flows: vec![],
        };
        assert!(pipeline.expand_replicated_stages(&graph));
        assert_eq!(pipeline.stages.len(), 1);
        assert_eq!(pipeline.stages[0].members, vec![VertexId(1)]);
        assert_eq!(pipeline.stages[0].replicated, vec![VertexId(0)]);
    }

    #[test]
    fn expansion_follows_control_only_communication() {
        // v0 = value; br v0 guarding a store: the only edge into the
        // later stage is the control decision
        let mut builder = LoopBuilder::new();
        builder.push(Op::value(Variable(0), []));
        let guard = builder.push(Op::branch([Variable(0)]));
        let store = builder.push(Op::store([]));
        builder.control(guard, store);
        let body = builder.finish().unwrap();
        let mut oracle = NoMemoryDeps;
        let graph = DependenceGraph::build(
            &body,
            &mut oracle,
            &NoSpeculation,
            &NoPrediction,
            false,
        );

        let mut pipeline = Pipeline {
            stages: vec![
                stage(StageKind::Replicable, vec![VertexId(0), VertexId(1)]),
                stage(StageKind::Sequential, vec![VertexId(2)]),
            ],
            cross_stage_deps: vec![],
            cross_stage_mem_flows: vec![],
        };
        assert!(pipeline.expand_replicated_stages(&graph));
        assert_eq!(pipeline.stages.len(), 1);
        assert_eq!(pipeline.stages[0].members, vec![VertexId(2)]);
        assert_eq!(
            pipeline.stages[0].replicated,
            vec![VertexId(0), VertexId(1)]
        );
    }

    #[test]
    fn replicable_stage_without_consumers_turns_sequential() {
        // two independent ops
        let mut builder = LoopBuilder::new();
        builder.push(Op::value(Variable(0), []));
        builder.push(Op::value(Variable(1), []));
        let body = builder.finish().unwrap();
        let mut oracle = NoMemoryDeps;
        let graph = DependenceGraph::build(
            &body,
            &mut oracle,
            &NoSpeculation,
            &NoPrediction,
            false,
        );

        let mut pipeline = Pipeline {
            stages: vec![
                stage(StageKind::Replicable, vec![VertexId(0)]),
                stage(StageKind::Sequential, vec![VertexId(1)]),
            ],
            cross_stage_deps: vec![],
            cross_stage_mem_flows: vec![],
        };
        assert!(pipeline.expand_replicated_stages(&graph));
        assert_eq!(pipeline.stages.len(), 2);
        assert!(pipeline.stages.iter().all(|s| s.kind == StageKind::Sequential));
    }

    #[test]
    fn validation_rejects_backward_edges_and_incomplete_partitions() {
        // v0 = value; v1 = value v0
        let mut builder = LoopBuilder::new();
        builder.push(Op::value(Variable(0), []));
        builder.push(Op::value(Variable(1), [Variable(0)]));
        let body = builder.finish().unwrap();
        let mut oracle = NoMemoryDeps;
        let graph = DependenceGraph::build(
            &body,
            &mut oracle,
            &NoSpeculation,
            &NoPrediction,
            false,
        );

        let forward = Pipeline {
            stages: vec![
                stage(StageKind::Sequential, vec![VertexId(0)]),
                stage(StageKind::Sequential, vec![VertexId(1)]),
            ],
            cross_stage_deps: vec![],
            cross_stage_mem_flows: vec![],
        };
        assert!(forward.validate(&graph));

        let backward = Pipeline {
            stages: vec![
                stage(StageKind::Sequential, vec![VertexId(1)]),
                stage(StageKind::Sequential, vec![VertexId(0)]),
            ],
            cross_stage_deps: vec![],
            cross_stage_mem_flows: vec![],
        };
        assert!(!backward.validate(&graph));

        let incomplete = Pipeline {
            stages: vec![stage(StageKind::Sequential, vec![VertexId(0)])],
            cross_stage_deps: vec![],
            cross_stage_mem_flows: vec![],
        };
        assert!(!incomplete.validate(&graph));
    }
}
