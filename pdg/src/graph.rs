// Copyright (C) 2025 Zihan Li and Ethan Uppal.

use std::collections::HashMap;

use log::debug;
use loop_ir::ir::{LoopBody, OpIdx};

use crate::edge::{Carry, Channel, DepFlags, PartialEdgeSet};
use crate::oracle::{
    ControlSpeculator, DependenceOracle, ModRefResult, PredictionSpeculator,
    TemporalRelation,
};
use crate::vertices::{VertexId, Vertices};

#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct QueryStats {
    /// Oracle probes issued, forward and reverse counted separately.
    pub num_queries: u64,
    pub num_complaints: u64,
    pub num_useful_remedies: u64,
    pub num_unneeded_remedies: u64,
}

/// The program dependence graph of one loop. Register and control edges
/// are computed eagerly at construction; memory edges are discovered
/// lazily, one oracle query at a time, and cached in the partial edge
/// relation.
pub struct DependenceGraph<'a> {
    body: &'a LoopBody,
    vertices: Vertices,
    edges: PartialEdgeSet,
    oracle: &'a mut dyn DependenceOracle,
    ctrlspec: &'a dyn ControlSpeculator,
    ignore_anti_output: bool,
    remediated: HashMap<(VertexId, VertexId, Carry, Channel), u32>,
    stats: QueryStats,
}

impl<'a> DependenceGraph<'a> {
    pub fn build(
        body: &'a LoopBody,
        oracle: &'a mut dyn DependenceOracle,
        ctrlspec: &'a dyn ControlSpeculator,
        predspec: &dyn PredictionSpeculator,
        ignore_anti_output: bool,
    ) -> Self {
        let vertices = Vertices::new(body);
        let edges = PartialEdgeSet::new(vertices.len());
        let mut graph = Self {
            body,
            vertices,
            edges,
            oracle,
            ctrlspec,
            ignore_anti_output,
            remediated: HashMap::new(),
            stats: QueryStats::default(),
        };
        graph.compute_register_deps(predspec);
        graph.compute_control_deps();
        debug!(
            "built dependence graph: {} vertices, {} eagerly known pairs",
            graph.vertices.len(),
            graph.edges.len()
        );
        graph
    }

    pub fn body(&self) -> &LoopBody {
        self.body
    }

    pub fn vertices(&self) -> &Vertices {
        &self.vertices
    }

    pub fn edges(&self) -> &PartialEdgeSet {
        &self.edges
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn stats(&self) -> &QueryStats {
        &self.stats
    }

    fn compute_register_deps(&mut self, predspec: &dyn PredictionSpeculator) {
        let mut def_of = HashMap::new();
        for v in self.vertices.iter() {
            if let Some(dest) = self.body.op(self.vertices.get(v)).dest {
                def_of.insert(dest, v);
            }
        }

        for user in self.vertices.iter() {
            let op_idx = self.vertices.get(user);
            let op = self.body.op(op_idx);

            for used in op.uses.iter() {
                if let Some(&source) = def_of.get(used) {
                    self.edges.add_ii_reg(source, user);
                }
            }

            if op.carried_uses.is_empty() || predspec.is_predictable(op_idx, self.body) {
                continue;
            }
            for used in op.carried_uses.iter() {
                if let Some(&source) = def_of.get(used) {
                    self.edges.add_lc_reg(source, user);
                }
            }
        }
    }

    fn compute_control_deps(&mut self) {
        for &(branch, controlled) in &self.body.controls {
            let src = self.vertices.id_of(branch).expect("branch not in loop");
            let dst = self
                .vertices
                .id_of(controlled)
                .expect("controlled op not in loop");
            self.edges.add_ii_ctrl(src, dst);
        }

        // The latch decides whether the next iteration runs at all, so it
        // sources a loop-carried control dep to every vertex that is not
        // already transitively control-dependent on it within the
        // iteration.
        let Some(latch) = self.body.latch else {
            return;
        };
        let latch = self.vertices.id_of(latch).expect("latch not in loop");

        let mut covered = vec![false; self.vertices.len()];
        let mut fringe = vec![latch];
        while let Some(v) = fringe.pop() {
            let successors: Vec<_> = self
                .edges
                .successors_filtered(v, DepFlags::II_CTRL)
                .collect();
            for succ in successors {
                if !covered[succ.0 as usize] {
                    covered[succ.0 as usize] = true;
                    fringe.push(succ);
                }
            }
        }

        for dst in self.vertices.iter() {
            if !covered[dst.0 as usize] {
                self.edges.add_lc_ctrl(latch, dst);
            }
        }
    }

    fn probe(&mut self, src: OpIdx, rel: TemporalRelation, dst: OpIdx) -> ModRefResult {
        self.stats.num_queries += 1;
        self.oracle.mod_ref(src, rel, dst, self.body)
    }

    fn query_memory_dep(
        &mut self,
        sop: OpIdx,
        dop: OpIdx,
        forward_rel: TemporalRelation,
        reverse_rel: TemporalRelation,
    ) -> bool {
        let src_effect = self.body.op(sop).effect;
        let dst_effect = self.body.op(dop).effect;
        if !src_effect.affects_memory() || !dst_effect.affects_memory() {
            return false;
        }
        if !src_effect.writes() && !dst_effect.writes() {
            return false;
        }

        let forward = self.probe(sop, forward_rel, dop);
        if forward == ModRefResult::NoModRef {
            return false;
        }

        let reverse = if forward_rel != reverse_rel || sop != dop {
            let reverse = self.probe(dop, reverse_rel, sop);
            if reverse == ModRefResult::NoModRef {
                return false;
            }
            reverse
        } else {
            forward
        };

        // read-after-read is not a dependence
        if forward == ModRefResult::Ref && reverse == ModRefResult::Ref {
            return false;
        }

        if self.ignore_anti_output {
            if forward_rel != reverse_rel {
                // across iterations only flow (write to read) matters
                return forward.mods() && reverse.refs();
            }
            // within one iteration dismiss a pure anti dependence
            if forward == ModRefResult::Ref && reverse.mods() {
                return false;
            }
        }

        true
    }

    /// Is there an intra-iteration dependence from `src` to `dst`? Issues
    /// oracle probes only when the memory channel is unknown (or `force`
    /// is set and no cheaper channel already answers).
    pub fn query_intra_iteration_memory_dep(
        &mut self,
        src: VertexId,
        dst: VertexId,
        force: bool,
    ) -> bool {
        let has_edge = self.edges.has_intra_iteration_edge(src, dst);
        if (!force && has_edge) || self.edges.known_intra_iteration_mem(src, dst) {
            return has_edge;
        }

        let sop = self.vertices.get(src);
        let dop = self.vertices.get(dst);

        let maybe_dep = self.ctrlspec.is_reachable(sop, dop, self.body)
            && self.query_memory_dep(
                sop,
                dop,
                TemporalRelation::Same,
                TemporalRelation::Same,
            );

        self.edges.add_ii_mem(src, dst, maybe_dep);
        maybe_dep
    }

    /// Loop-carried counterpart of
    /// [`Self::query_intra_iteration_memory_dep`].
    pub fn query_loop_carried_memory_dep(
        &mut self,
        src: VertexId,
        dst: VertexId,
        force: bool,
    ) -> bool {
        let has_edge = self.edges.has_loop_carried_edge(src, dst);
        if (!force && has_edge) || self.edges.known_loop_carried_mem(src, dst) {
            return has_edge;
        }

        let sop = self.vertices.get(src);
        let dop = self.vertices.get(dst);

        let maybe_dep = self.query_memory_dep(
            sop,
            dop,
            TemporalRelation::Before,
            TemporalRelation::After,
        );

        self.edges.add_lc_mem(src, dst, maybe_dep);
        maybe_dep
    }

    pub fn has_edge(&self, src: VertexId, dst: VertexId) -> bool {
        self.edges.has_edge(src, dst)
    }

    pub fn has_intra_iteration_edge(&self, src: VertexId, dst: VertexId) -> bool {
        self.edges.has_intra_iteration_edge(src, dst)
    }

    pub fn has_loop_carried_edge(&self, src: VertexId, dst: VertexId) -> bool {
        self.edges.has_loop_carried_edge(src, dst)
    }

    pub fn has_channel_edge(
        &self,
        src: VertexId,
        dst: VertexId,
        carry: Carry,
        channel: Channel,
    ) -> bool {
        self.edges
            .has(src, dst, DepFlags::present_bit(carry, channel))
    }

    /// Neither temporal direction of the memory channel has been decided.
    pub fn unknown(&self, src: VertexId, dst: VertexId) -> bool {
        !self.edges.known_loop_carried_mem(src, dst)
            && !self.edges.known_intra_iteration_mem(src, dst)
    }

    pub fn unknown_loop_carried(&self, src: VertexId, dst: VertexId) -> bool {
        !self.edges.known_loop_carried_mem(src, dst)
    }

    pub fn may_touch_memory(&self, v: VertexId) -> bool {
        self.body.op(self.vertices.get(v)).effect.affects_memory()
    }

    pub fn may_write_memory(&self, v: VertexId) -> bool {
        self.body.op(self.vertices.get(v)).effect.writes()
    }

    pub fn is_speculatively_dead(&self, v: VertexId) -> bool {
        self.ctrlspec.is_speculatively_dead(self.vertices.get(v))
    }

    /// Drop one dependence the planner has remediated.
    pub fn remove_edge(
        &mut self,
        src: VertexId,
        dst: VertexId,
        carry: Carry,
        channel: Channel,
    ) {
        self.edges.remove(src, dst, carry, channel);
    }

    pub fn set_remediated_edge_cost(
        &mut self,
        cost: u32,
        src: VertexId,
        dst: VertexId,
        carry: Carry,
        channel: Channel,
    ) {
        self.remediated.insert((src, dst, carry, channel), cost);
    }

    /// Total remediation cost to break every loop-carried channel present
    /// between `src` and `dst`, or `None` if some channel has no remedy.
    pub fn removable_loop_carried_edge(
        &self,
        src: VertexId,
        dst: VertexId,
    ) -> Option<u32> {
        let mut cost = 0;
        for channel in [Channel::Mem, Channel::Ctrl, Channel::Reg] {
            if !self.has_channel_edge(src, dst, Carry::Carried, channel) {
                continue;
            }
            cost += self
                .remediated
                .get(&(src, dst, Carry::Carried, channel))?;
        }
        Some(cost)
    }

    pub fn note_complaint(&mut self) {
        self.stats.num_complaints += 1;
    }

    pub fn note_useful_remedy(&mut self) {
        self.stats.num_useful_remedies += 1;
    }

    pub fn note_unneeded_remedy(&mut self) {
        self.stats.num_unneeded_remedies += 1;
    }
}
