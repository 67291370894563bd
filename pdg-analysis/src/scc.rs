// Copyright (C) 2025 Zihan Li and Ethan Uppal.

use fixedbitset::FixedBitSet;
use log::{debug, warn};
use loop_ir::ir::OpIdx;
use pdg::{DependenceGraph, PartialEdgeSet, VertexId};

use crate::bitmatrix::BitMatrix;

/// A set of SCCs, referred to by index into [`Components`].
pub type SccSet = Vec<usize>;

/// The DAG-SCC view of a dependence graph: the strongly connected
/// components of the currently known edges, in reverse topological order,
/// plus the (monotonic) sequential classification of each vertex.
pub struct Components {
    sccs: Vec<Vec<VertexId>>,
    in_sequential_stage: FixedBitSet,
    ordered: BitMatrix,
    ordered_dirty: bool,
}

impl Components {
    pub fn new(num_vertices: usize) -> Self {
        Self {
            sccs: vec![],
            in_sequential_stage: FixedBitSet::with_capacity(num_vertices),
            ordered: BitMatrix::new(0),
            ordered_dirty: true,
        }
    }

    pub fn len(&self) -> usize {
        self.sccs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sccs.is_empty()
    }

    pub fn get(&self, i: usize) -> &[VertexId] {
        &self.sccs[i]
    }

    pub fn iter(&self) -> impl Iterator<Item = &[VertexId]> {
        self.sccs.iter().map(Vec::as_slice)
    }

    pub fn set_sequential(&mut self, scc: &[VertexId]) {
        for &v in scc {
            self.set_sequential_vertex(v);
        }
    }

    pub fn set_sequential_vertex(&mut self, v: VertexId) {
        self.in_sequential_stage.insert(v.0 as usize);
    }

    // Only the experiment constructors may undo a classification; the
    // analysis itself is monotonic.
    pub(crate) fn set_parallel(&mut self, scc: &[VertexId]) {
        for &v in scc {
            self.in_sequential_stage.remove(v.0 as usize);
        }
    }

    pub fn must_be_in_sequential_stage(&self, scc: &[VertexId]) -> bool {
        self.must_be_in_sequential_stage_vertex(scc[0])
    }

    pub fn must_be_in_sequential_stage_vertex(&self, v: VertexId) -> bool {
        self.in_sequential_stage.contains(v.0 as usize)
    }

    /// Any known edge from a vertex of `a` to a vertex of `b`? Reads the
    /// cache only, never the oracle.
    pub fn has_edge(graph: &DependenceGraph, a: &[VertexId], b: &[VertexId]) -> bool {
        a.iter()
            .any(|&src| b.iter().any(|&dst| graph.has_edge(src, dst)))
    }

    /// Tarjan's algorithm over the currently known edge set. An SCC whose
    /// members already show a loop-carried edge among themselves is
    /// sequential from birth.
    pub fn recompute(&mut self, graph: &DependenceGraph) {
        struct Visitor<'a> {
            edges: &'a PartialEdgeSet,
            val: usize,
            preorder: Vec<Option<usize>>,
            stack: Vec<VertexId>,
            in_stack: FixedBitSet,
            sccs: Vec<Vec<VertexId>>,
            sequential: FixedBitSet,
        }

        impl Visitor<'_> {
            fn tarjan(&mut self, current: VertexId) -> usize {
                self.preorder[current.0 as usize] = Some(self.val);
                let mut lowest = self.val;
                self.val += 1;
                self.stack.push(current);
                self.in_stack.insert(current.0 as usize);

                let successors: Vec<_> =
                    self.edges.successors(current).map(|(v, _)| v).collect();
                for successor in successors {
                    if self.in_stack.contains(successor.0 as usize) {
                        lowest = lowest
                            .min(self.preorder[successor.0 as usize].unwrap());
                    } else if self.preorder[successor.0 as usize].is_none() {
                        lowest = lowest.min(self.tarjan(successor));
                    }
                }

                if lowest == self.preorder[current.0 as usize].unwrap() {
                    let mut vertices = vec![];
                    while let Some(v) = self.stack.pop() {
                        vertices.push(v);
                        self.in_stack.remove(v.0 as usize);
                        if v == current {
                            break;
                        }
                    }

                    let carried_within = vertices.iter().any(|&v| {
                        vertices
                            .iter()
                            .any(|&w| self.edges.has_loop_carried_edge(v, w))
                    });
                    if carried_within {
                        for &v in &vertices {
                            self.sequential.insert(v.0 as usize);
                        }
                    }

                    self.sccs.push(vertices);
                }
                lowest
            }
        }

        let n = graph.num_vertices();
        debug!("(re-)computing SCCs on a graph of {n} vertices");

        let mut visitor = Visitor {
            edges: graph.edges(),
            val: 0,
            preorder: vec![None; n],
            stack: vec![],
            in_stack: FixedBitSet::with_capacity(n),
            sccs: vec![],
            sequential: FixedBitSet::with_capacity(n),
        };
        for v in graph.vertices().iter() {
            if visitor.preorder[v.0 as usize].is_none() {
                visitor.tarjan(v);
            }
        }

        self.sccs = visitor.sccs;
        self.in_sequential_stage = visitor.sequential;
        self.ordered_dirty = true;
        debug!("done (re-)computing SCCs => {}", self.sccs.len());
    }

    /// O(S^2) pairwise cache-read edge tests over the reverse topological
    /// order, then transitive closure.
    pub fn compute_reachability_among_sccs(&mut self, graph: &DependenceGraph) {
        let n = self.sccs.len();
        self.ordered.resize(n);
        for late in 0..n {
            for early in late + 1..n {
                if Self::has_edge(graph, &self.sccs[early], &self.sccs[late]) {
                    self.ordered.set(early, late);
                }
            }
        }
        self.ordered.transitive_closure();
        self.ordered_dirty = false;
    }

    pub fn ordered_before(&self, early: usize, late: usize) -> bool {
        debug_assert!(
            !self.ordered_dirty,
            "must run compute_reachability_among_sccs() first"
        );
        self.ordered.test(early, late)
    }

    pub fn ordered_before_any(&self, early: usize, lates: &[usize]) -> bool {
        lates.iter().any(|&late| self.ordered_before(early, late))
    }

    pub fn any_ordered_before(&self, earlies: &[usize], late: usize) -> bool {
        earlies
            .iter()
            .any(|&early| self.ordered_before(early, late))
    }

    /// A parallel stage is worth anything only if some non-sequential SCC
    /// holds a memory-affecting, not speculatively dead operation.
    pub fn has_nontrivial_parallel_stage(&self, graph: &DependenceGraph) -> bool {
        for scc in self.iter() {
            if self.must_be_in_sequential_stage(scc) {
                continue;
            }
            for &v in scc {
                if !graph.may_touch_memory(v) {
                    continue;
                }
                if graph.is_speculatively_dead(v) {
                    continue;
                }
                return true;
            }
        }
        debug!("has no non-trivial parallel stage");
        false
    }

    /// Every operation that might still land in a parallel stage.
    pub fn upper_bound_parallel_stage(&self, graph: &DependenceGraph) -> Vec<OpIdx> {
        let mut ops = vec![];
        for scc in self.iter() {
            if self.must_be_in_sequential_stage(scc) {
                continue;
            }
            ops.extend(scc.iter().map(|&v| graph.vertices().get(v)));
        }
        ops
    }
}

fn query_loop_carried_mem_between(
    graph: &mut DependenceGraph,
    sources: &[VertexId],
    dests: &[VertexId],
) -> bool {
    for &src in sources {
        if !graph.may_touch_memory(src) {
            continue;
        }
        for &dst in dests {
            if !graph.may_touch_memory(dst) {
                continue;
            }
            if graph.query_loop_carried_memory_dep(src, dst, false) {
                return true;
            }
        }
    }
    false
}

fn query_intra_iteration_mem_between(
    graph: &mut DependenceGraph,
    sources: &[VertexId],
    dests: &[VertexId],
) -> bool {
    for &src in sources {
        if !graph.may_touch_memory(src) {
            continue;
        }
        for &dst in dests {
            if !graph.may_touch_memory(dst) {
                continue;
            }
            if graph.query_intra_iteration_memory_dep(src, dst, false) {
                return true;
            }
        }
    }
    false
}

/// Mark SCCs sequential when some member carries a memory dep onto
/// itself. Cannot change the SCC structure.
fn exclude_loop_carried_reflexive_deps(
    graph: &mut DependenceGraph,
    components: &mut Components,
) {
    debug!("begin exclude_loop_carried_reflexive_deps()");
    for i in 0..components.len() {
        if components.must_be_in_sequential_stage(components.get(i)) {
            continue;
        }
        let scc = components.get(i).to_vec();
        for &v in &scc {
            if graph.query_loop_carried_memory_dep(v, v, false) {
                components.set_sequential(&scc);
                break;
            }
        }
    }
}

/// Mark SCCs sequential when any member pair carries a memory dep.
/// Cannot change the SCC structure.
fn exclude_loop_carried_deps_within_scc(
    graph: &mut DependenceGraph,
    components: &mut Components,
) {
    debug!("begin exclude_loop_carried_deps_within_scc()");
    for i in 0..components.len() {
        if components.must_be_in_sequential_stage(components.get(i)) {
            continue;
        }
        let scc = components.get(i).to_vec();
        let mut killed = false;
        for &v in &scc {
            if !graph.may_touch_memory(v) {
                continue;
            }
            for &w in &scc {
                if graph.query_loop_carried_memory_dep(v, w, false) {
                    components.set_sequential(&scc);
                    killed = true;
                    break;
                }
            }
            if killed {
                break;
            }
        }
    }
}

/// The reverse topological order sometimes lacks an explicit edge between
/// SCCs it nevertheless orders. Probe those unordered pairs in the
/// with-the-grain direction so later pivoting sees them.
fn query_unrelated_sccs_with_the_grain(
    graph: &mut DependenceGraph,
    components: &mut Components,
) -> bool {
    debug!("begin query_unrelated_sccs_with_the_grain()");
    let n = components.len();

    let mut non_mem_singletons = FixedBitSet::with_capacity(n);
    for (i, scc) in components.iter().enumerate() {
        if scc.len() == 1 && !graph.may_touch_memory(scc[0]) {
            non_mem_singletons.insert(i);
        }
    }

    let mut changed = false;
    for late in 0..n {
        if non_mem_singletons.contains(late) {
            continue;
        }
        for early in late + 1..n {
            if non_mem_singletons.contains(early) {
                continue;
            }
            if Components::has_edge(graph, components.get(early), components.get(late)) {
                continue;
            }
            let earlier = components.get(early).to_vec();
            let later = components.get(late).to_vec();
            if query_loop_carried_mem_between(graph, &earlier, &later)
                || query_intra_iteration_mem_between(graph, &earlier, &later)
            {
                changed = true;
            }
        }
    }
    changed
}

/// Probe in the against-the-grain direction. Any hit closes a cycle
/// between two SCCs, so the caller must recompute the structure.
fn query_against_the_grain(
    graph: &mut DependenceGraph,
    components: &mut Components,
) -> bool {
    debug!("begin query_against_the_grain()");
    let n = components.len();
    let mut changed = false;
    for late in 0..n {
        let later = components.get(late);
        if later.len() == 1 && !graph.may_touch_memory(later[0]) {
            continue;
        }
        let later = later.to_vec();
        for early in late + 1..n {
            let earlier = components.get(early).to_vec();
            if query_loop_carried_mem_between(graph, &later, &earlier)
                || query_intra_iteration_mem_between(graph, &later, &earlier)
            {
                changed = true;
                break;
            }
        }
    }
    changed
}

/// With-the-grain loop-carried probes restricted to parallel SCC pairs:
/// these are exactly the edges that would force RULE 2 splits later.
fn query_loop_carried_mem_deps_within_parallel_stage(
    graph: &mut DependenceGraph,
    components: &mut Components,
) {
    debug!("begin query_loop_carried_mem_deps_within_parallel_stage()");
    let n = components.len();
    for late in 0..n {
        let later = components.get(late);
        if later.len() == 1 && !graph.may_touch_memory(later[0]) {
            continue;
        }
        if components.must_be_in_sequential_stage(later) {
            continue;
        }
        let later = later.to_vec();
        for early in late + 1..n {
            if components.must_be_in_sequential_stage(components.get(early)) {
                continue;
            }
            let earlier = components.get(early).to_vec();
            if query_loop_carried_mem_between(graph, &earlier, &later) {
                break;
            }
        }
    }
}

/// Discover the DAG-SCC structure with as few oracle probes as possible:
/// cheap reflexive and within-SCC tests first, then with-the-grain probes
/// of unordered pairs, then against-the-grain probes that may merge SCCs
/// (recomputing after each merge), and a final parallel-pair sweep.
///
/// Returns `false` when `abort_if_no_parallel_stage` is set and the
/// parallel stage upper bound becomes trivial.
pub fn compute_dag_scc(
    graph: &mut DependenceGraph,
    components: &mut Components,
    abort_if_no_parallel_stage: bool,
    recompute_cap: u32,
) -> bool {
    components.recompute(graph);
    if abort_if_no_parallel_stage && !components.has_nontrivial_parallel_stage(graph) {
        return false;
    }

    exclude_loop_carried_reflexive_deps(graph, components);
    if abort_if_no_parallel_stage && !components.has_nontrivial_parallel_stage(graph) {
        return false;
    }

    exclude_loop_carried_deps_within_scc(graph, components);
    if abort_if_no_parallel_stage && !components.has_nontrivial_parallel_stage(graph) {
        return false;
    }

    query_unrelated_sccs_with_the_grain(graph, components);

    let mut merged = query_against_the_grain(graph, components);
    let mut rounds = 0u32;
    while merged {
        if rounds >= recompute_cap {
            // each merge strictly shrinks the SCC count, so this only
            // triggers on a pathological oracle
            warn!("dag-scc merge loop hit its recompute cap ({recompute_cap})");
            break;
        }
        rounds += 1;

        components.recompute(graph);
        if abort_if_no_parallel_stage
            && !components.has_nontrivial_parallel_stage(graph)
        {
            return false;
        }

        query_unrelated_sccs_with_the_grain(graph, components);
        merged = query_against_the_grain(graph, components);
    }

    query_loop_carried_mem_deps_within_parallel_stage(graph, components);
    if abort_if_no_parallel_stage && !components.has_nontrivial_parallel_stage(graph) {
        return false;
    }

    exclude_loop_carried_deps_within_scc(graph, components);
    if abort_if_no_parallel_stage && !components.has_nontrivial_parallel_stage(graph) {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use loop_fuzzer::RegionOracle;
    use loop_ir::builder::LoopBuilder;
    use loop_ir::ir::{Op, Variable};
    use pdg::{NoMemoryDeps, NoPrediction, NoSpeculation};

    #[test]
    fn register_cycle_forms_one_parallel_scc() {
        // v0 = phi(^v2); v1 = op v0; v2 = op v1
        let mut builder = LoopBuilder::new();
        builder.push(Op::phi(Variable(0), [], [Variable(2)]));
        builder.push(Op::value(Variable(1), [Variable(0)]));
        builder.push(Op::value(Variable(2), [Variable(1)]));
        let body = builder.finish().unwrap();

        let mut oracle = NoMemoryDeps;
        let graph = DependenceGraph::build(
            &body,
            &mut oracle,
            &NoSpeculation,
            &NoPrediction,
            false,
        );

        let mut components = Components::new(graph.num_vertices());
        components.recompute(&graph);

        // LC reg edge v2 -> phi closes a cycle, and marks it sequential
        assert_eq!(components.len(), 1);
        assert!(components.must_be_in_sequential_stage(components.get(0)));
    }

    #[test]
    fn chain_yields_reverse_topological_singletons() {
        // v0 = op; v1 = op v0; v2 = op v1
        let mut builder = LoopBuilder::new();
        builder.push(Op::value(Variable(0), []));
        builder.push(Op::value(Variable(1), [Variable(0)]));
        builder.push(Op::value(Variable(2), [Variable(1)]));
        let body = builder.finish().unwrap();

        let mut oracle = NoMemoryDeps;
        let graph = DependenceGraph::build(
            &body,
            &mut oracle,
            &NoSpeculation,
            &NoPrediction,
            false,
        );

        let mut components = Components::new(graph.num_vertices());
        components.recompute(&graph);

        assert_eq!(components.len(), 3);
        // reverse topological: the chain's tail comes first
        assert_eq!(components.get(0), &[VertexId(2)]);
        assert_eq!(components.get(2), &[VertexId(0)]);

        components.compute_reachability_among_sccs(&graph);
        assert!(components.ordered_before(2, 0));
        assert!(components.ordered_before(2, 1));
        assert!(!components.ordered_before(0, 2));
    }

    #[test]
    fn sequential_classification_survives_scc_merges() {
        // two stores in one carried region: the reflexive probes mark
        // each singleton sequential before any structure changes
        let mut builder = LoopBuilder::new();
        let first = builder.push(Op::store([]));
        let second = builder.push(Op::store([]));
        let body = builder.finish().unwrap();

        let mut oracle = RegionOracle::new(1);
        oracle.assign(first, 0);
        oracle.assign(second, 0);
        oracle.set_carried(0, true);

        let mut graph = DependenceGraph::build(
            &body,
            &mut oracle,
            &NoSpeculation,
            &NoPrediction,
            false,
        );
        let mut components = Components::new(graph.num_vertices());
        components.recompute(&graph);
        assert_eq!(components.len(), 2);

        exclude_loop_carried_reflexive_deps(&mut graph, &mut components);
        for scc in components.iter() {
            assert!(components.must_be_in_sequential_stage(scc));
        }

        // the carried region also links the two stores in both
        // directions, so the against-the-grain probe closes a cycle
        query_unrelated_sccs_with_the_grain(&mut graph, &mut components);
        assert!(query_against_the_grain(&mut graph, &mut components));

        // recomputing merges the singletons; the sequential mark must
        // not come off in the process
        components.recompute(&graph);
        assert_eq!(components.len(), 1);
        assert!(components.must_be_in_sequential_stage(components.get(0)));
        assert!(components.upper_bound_parallel_stage(&graph).is_empty());
    }

    #[test]
    fn recompute_is_idempotent_after_dag_scc() {
        let mut builder = LoopBuilder::new();
        builder.push(Op::phi(Variable(0), [], [Variable(1)]));
        builder.push(Op::value(Variable(1), [Variable(0)]));
        builder.push(Op::load(Variable(2), [Variable(1)]));
        builder.push(Op::store([Variable(2)]));
        let body = builder.finish().unwrap();

        let mut oracle = NoMemoryDeps;
        let mut graph = DependenceGraph::build(
            &body,
            &mut oracle,
            &NoSpeculation,
            &NoPrediction,
            false,
        );

        let mut components = Components::new(graph.num_vertices());
        assert!(compute_dag_scc(&mut graph, &mut components, true, 32));

        let sccs_before: Vec<Vec<VertexId>> =
            components.iter().map(|scc| scc.to_vec()).collect();
        let sequential_before: Vec<bool> = components
            .iter()
            .map(|scc| components.must_be_in_sequential_stage(scc))
            .collect();

        assert!(compute_dag_scc(&mut graph, &mut components, true, 32));
        let sccs_after: Vec<Vec<VertexId>> =
            components.iter().map(|scc| scc.to_vec()).collect();
        let sequential_after: Vec<bool> = components
            .iter()
            .map(|scc| components.must_be_in_sequential_stage(scc))
            .collect();

        assert_eq!(sccs_before, sccs_after);
        assert_eq!(sequential_before, sequential_after);
    }
}
