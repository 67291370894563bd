// Copyright (C) 2025 Zihan Li and Ethan Uppal.

use log::debug;
use loop_ir::ir::{LoopBody, OpKind};
use pdg::{
    ControlSpeculator, DependenceGraph, DependenceOracle, PredictionSpeculator,
    VertexId,
};

use crate::cost::PerformanceEstimator;
use crate::minflow::{CAP_INF, Network, Node};
use crate::scc::{Components, SccSet, compute_dag_scc};
use crate::stage::{Pipeline, Stage, StageKind, expand_stages};

#[derive(Debug, Clone)]
pub struct SuggestOptions {
    pub thread_budget: u32,
    pub ignore_anti_output: bool,
    pub include_replicable_stages: bool,
    pub include_parallel_stages: bool,
    pub abort_if_no_parallel_stage: bool,
    pub recompute_cap: u32,
    pub max_partition_evals: u64,
}

impl Default for SuggestOptions {
    fn default() -> Self {
        Self {
            thread_budget: 25,
            ignore_anti_output: false,
            include_replicable_stages: true,
            include_parallel_stages: true,
            abort_if_no_parallel_stage: true,
            recompute_cap: 32,
            max_partition_evals: 100_000,
        }
    }
}

/// Shared countdown over partition evaluations. When it runs dry the
/// recursion stops enumerating splits and falls back to the greedy
/// heuristic.
struct SearchBudget {
    remaining: u64,
}

impl SearchBudget {
    fn new(limit: u64) -> Self {
        Self { remaining: limit }
    }

    fn spend(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }

    fn exhausted(&self) -> bool {
        self.remaining == 0
    }
}

/// A scored candidate partition of some SCC subset.
struct Partition {
    score: f64,
    num_threads: u32,
    stages: Vec<Stage>,
}

impl Partition {
    fn improves_on(&self, best: &Option<Partition>) -> bool {
        match best {
            None => true,
            Some(best) => {
                self.score < best.score
                    || (self.score == best.score && self.num_threads < best.num_threads)
            }
        }
    }
}

/// Full pipeline suggestion for one loop: builds the dependence graph,
/// refines the DAG-SCC, searches thread splits, expands replicable
/// stages, validates, and records the cross-stage traffic.
///
/// Returns `None` only when `abort_if_no_parallel_stage` fires during the
/// DAG-SCC refinement.
pub fn suggest(
    body: &LoopBody,
    oracle: &mut dyn DependenceOracle,
    ctrlspec: &dyn ControlSpeculator,
    predspec: &dyn PredictionSpeculator,
    estimator: &dyn PerformanceEstimator,
    options: &SuggestOptions,
) -> Option<Pipeline> {
    let mut graph = DependenceGraph::build(
        body,
        oracle,
        ctrlspec,
        predspec,
        options.ignore_anti_output,
    );
    let mut components = Components::new(graph.num_vertices());
    if !compute_dag_scc(
        &mut graph,
        &mut components,
        options.abort_if_no_parallel_stage,
        options.recompute_cap,
    ) {
        debug!("refinement found no worthwhile parallel stage");
        return None;
    }
    components.compute_reachability_among_sccs(&graph);
    Some(suggest_with(&graph, &components, estimator, options))
}

/// The search half of [`suggest`], for callers that already hold a
/// refined graph (reachability must be computed).
pub fn suggest_with(
    graph: &DependenceGraph,
    components: &Components,
    estimator: &dyn PerformanceEstimator,
    options: &SuggestOptions,
) -> Pipeline {
    let all: SccSet = (0..components.len()).collect();
    let mut search = SearchBudget::new(options.max_partition_evals);
    let partition = doall_and_pipeline(
        graph,
        components,
        estimator,
        options,
        &all,
        options.thread_budget,
        &mut search,
    );

    let mut pipeline = match partition {
        Some(partition) => Pipeline {
            stages: partition.stages,
            cross_stage_deps: vec![],
            cross_stage_mem_flows: vec![],
        },
        None => Pipeline::degenerate(graph.vertices()),
    };
    pipeline.expand_replicated_stages(graph);
    // a replicable stage that found no consumer comes out of expansion
    // as an extra sequential stage the split search never counted
    if pipeline.num_threads() > options.thread_budget {
        let fallback =
            greedy_dswp(graph, components, estimator, &all, options.thread_budget);
        pipeline.stages = fallback.stages;
    }
    pipeline.assert_pipeline_property(graph);
    pipeline.materialize_cross_stage_edges(graph);
    debug!("suggesting {pipeline}");
    pipeline
}

/// Splits `all` (pivots excluded) into the SCCs ordered before some
/// pivot, those ordered after some pivot, and the rest.
pub fn pivot(
    components: &Components,
    all: &[usize],
    pivots: &[usize],
) -> (SccSet, SccSet, SccSet) {
    let mut before = vec![];
    let mut after = vec![];
    let mut flexible = vec![];
    for &scc in all {
        if pivots.contains(&scc) {
            continue;
        }
        // an scc ordered both ways around the pivots lands in `before`
        if pivots.iter().any(|&p| components.ordered_before(scc, p)) {
            before.push(scc);
        } else if pivots.iter().any(|&p| components.ordered_before(p, scc)) {
            after.push(scc);
        } else {
            flexible.push(scc);
        }
    }
    (before, after, flexible)
}

fn contains_parallel_scc(components: &Components, sccs: &[usize]) -> bool {
    sccs.iter()
        .any(|&scc| !components.must_be_in_sequential_stage(components.get(scc)))
}

fn doall_and_pipeline(
    graph: &DependenceGraph,
    components: &Components,
    estimator: &dyn PerformanceEstimator,
    options: &SuggestOptions,
    sccs: &[usize],
    budget: u32,
    search: &mut SearchBudget,
) -> Option<Partition> {
    if sccs.is_empty() {
        return None;
    }

    if !search.exhausted() {
        if options.include_parallel_stages
            && let Some(partition) = try_parallel_split(
                graph, components, estimator, options, sccs, budget, search,
            )
        {
            return Some(partition);
        }
        if options.include_replicable_stages
            && let Some(partition) = try_replicable_split(
                graph, components, estimator, options, sccs, budget, search,
            )
        {
            return Some(partition);
        }
    }

    Some(greedy_dswp(graph, components, estimator, sccs, budget))
}

/// Scores a candidate stage list by its expanded pipeline weight.
fn score_stages(
    graph: &DependenceGraph,
    estimator: &dyn PerformanceEstimator,
    stages: &[Stage],
) -> f64 {
    let mut expanded = stages.to_vec();
    expand_stages(&mut expanded, graph);
    estimator.pipeline_weight(graph.body(), graph.vertices(), &expanded)
}

fn try_parallel_split(
    graph: &DependenceGraph,
    components: &Components,
    estimator: &dyn PerformanceEstimator,
    options: &SuggestOptions,
    sccs: &[usize],
    budget: u32,
    search: &mut SearchBudget,
) -> Option<Partition> {
    let max_parallel =
        find_max_parallel_stage(graph, components, estimator, sccs, options)?;
    let (mut before, mut after, flexible) = pivot(components, sccs, &max_parallel);
    if after.is_empty() {
        before.extend(flexible);
    } else {
        after.extend(flexible);
    }

    let budget = budget as i64;
    let min_before: i64 = if before.is_empty() { 0 } else { 1 };
    let min_par: i64 = 2;
    let min_after: i64 = if after.is_empty() { 0 } else { 1 };

    let mut max_before = budget - min_par - min_after;
    if !contains_parallel_scc(components, &before) {
        max_before = max_before.min(before.len() as i64);
    }
    let mut max_after = budget - min_before - min_par;
    if !contains_parallel_scc(components, &after) {
        max_after = max_after.min(after.len() as i64);
    }

    let mut best: Option<Partition> = None;
    'enumeration: for nbefore in min_before..=max_before {
        let before_partition = doall_and_pipeline(
            graph, components, estimator, options, &before, nbefore as u32, search,
        );
        let before_threads =
            before_partition.as_ref().map_or(0, |p| p.num_threads) as i64;

        for nafter in min_after..=max_after {
            let after_partition = doall_and_pipeline(
                graph, components, estimator, options, &after, nafter as u32, search,
            );
            let after_threads =
                after_partition.as_ref().map_or(0, |p| p.num_threads) as i64;

            let max_factor = budget - before_threads - after_threads;
            for factor in (2..=max_factor).rev() {
                if !search.spend() {
                    break 'enumeration;
                }

                let mut stages = before_partition
                    .as_ref()
                    .map_or(vec![], |p| p.stages.clone());
                stages.push(Stage::from_sccs(
                    StageKind::Parallel {
                        factor: factor as u32,
                    },
                    components,
                    &max_parallel,
                ));
                stages.extend(
                    after_partition.as_ref().map_or(vec![], |p| p.stages.clone()),
                );

                let candidate = Partition {
                    score: score_stages(graph, estimator, &stages),
                    num_threads: (before_threads + factor + after_threads) as u32,
                    stages,
                };
                if candidate.improves_on(&best) {
                    best = Some(candidate);
                }
            }
        }
    }

    best.filter(|partition| partition.num_threads as i64 <= budget)
}

fn try_replicable_split(
    graph: &DependenceGraph,
    components: &Components,
    estimator: &dyn PerformanceEstimator,
    options: &SuggestOptions,
    sccs: &[usize],
    budget: u32,
    search: &mut SearchBudget,
) -> Option<Partition> {
    let max_replicable =
        find_max_replicable_stage(graph, components, estimator, sccs)?;
    let (mut before, mut after, flexible) = pivot(components, sccs, &max_replicable);
    if after.is_empty() {
        before.extend(flexible);
    } else {
        after.extend(flexible);
    }

    let budget = budget as i64;
    let min_before: i64 = if before.is_empty() { 0 } else { 1 };
    let min_after: i64 = if after.is_empty() { 0 } else { 1 };
    let mut max_before = budget - min_after;
    if !contains_parallel_scc(components, &before) {
        max_before = max_before.min(before.len() as i64);
    }

    let mut best: Option<Partition> = None;
    'enumeration: for nbefore in (min_before..=max_before).rev() {
        let before_partition = doall_and_pipeline(
            graph, components, estimator, options, &before, nbefore as u32, search,
        );
        let before_threads =
            before_partition.as_ref().map_or(0, |p| p.num_threads) as i64;

        let mut max_after = budget - before_threads;
        if !contains_parallel_scc(components, &after) {
            max_after = max_after.min(after.len() as i64);
        }
        for nafter in (min_after..=max_after).rev() {
            if !search.spend() {
                break 'enumeration;
            }

            let after_partition = doall_and_pipeline(
                graph, components, estimator, options, &after, nafter as u32, search,
            );
            let after_threads =
                after_partition.as_ref().map_or(0, |p| p.num_threads) as i64;
            if before_threads + after_threads > budget {
                continue;
            }

            let mut stages = before_partition
                .as_ref()
                .map_or(vec![], |p| p.stages.clone());
            stages.push(Stage::from_sccs(
                StageKind::Replicable,
                components,
                &max_replicable,
            ));
            stages.extend(
                after_partition.as_ref().map_or(vec![], |p| p.stages.clone()),
            );

            let candidate = Partition {
                score: score_stages(graph, estimator, &stages),
                // a replicable stage rides along inside its consumers
                num_threads: (before_threads + after_threads) as u32,
                stages,
            };
            if candidate.improves_on(&best) {
                best = Some(candidate);
            }
        }
    }

    best.filter(|partition| partition.num_threads as i64 <= budget)
}

/// Ottoni-style fallback: spread the SCCs over at most `budget`
/// sequential stages, balancing stage weight with an in-degree bucket
/// queue.
fn greedy_dswp(
    graph: &DependenceGraph,
    components: &Components,
    estimator: &dyn PerformanceEstimator,
    sccs: &[usize],
    budget: u32,
) -> Partition {
    let body = graph.body();
    let vertices = graph.vertices();
    let scc_weight = |scc: usize| {
        estimator.weight_of_vertices(body, vertices, components.get(scc))
    };

    let num_stages = (budget as usize).clamp(1, sccs.len());
    if num_stages == 1 {
        let stage = Stage::from_sccs(StageKind::Sequential, components, sccs);
        let score = estimator.weight_of_vertices(body, vertices, &stage.members);
        return Partition {
            score,
            num_threads: 1,
            stages: vec![stage],
        };
    }

    let mut indegree = vec![0usize; sccs.len()];
    for (ti, &target) in sccs.iter().enumerate() {
        for &source in sccs {
            if source != target
                && Components::has_edge(
                    graph,
                    components.get(source),
                    components.get(target),
                )
            {
                indegree[ti] += 1;
            }
        }
    }
    let mut buckets: Vec<Vec<usize>> = vec![vec![]; sccs.len()];
    for (i, &degree) in indegree.iter().enumerate() {
        buckets[degree].push(i);
    }

    let total: f64 = sccs.iter().map(|&scc| scc_weight(scc)).sum();
    let mut remaining_weight = total;
    let mut stages_left = num_stages;
    let mut assigned = vec![false; sccs.len()];
    let mut num_assigned = 0;
    let mut stages: Vec<Stage> = vec![];

    while num_assigned < sccs.len() && stages_left > 0 {
        let target_weight = if stages_left == 1 {
            // the last stage takes everything that is left
            2.0 * total
        } else {
            remaining_weight / stages_left as f64
        };

        let mut members: SccSet = vec![];
        let mut stage_weight = 0.0f64;
        loop {
            // pick from the ready bucket: zero-weight SCCs immediately,
            // otherwise whichever lands the stage closest to its target
            let mut choice: Option<(usize, f64, f64)> = None;
            for (i, &pi) in buckets[0].iter().enumerate() {
                let weight = scc_weight(sccs[pi]);
                if weight == 0.0 {
                    choice = Some((i, weight, 0.0));
                    break;
                }
                let distance = (stage_weight + weight - target_weight).abs();
                if choice.is_none_or(|(_, _, best)| distance < best) {
                    choice = Some((i, weight, distance));
                }
            }
            let Some((bucket_index, weight, _)) = choice else {
                break;
            };

            let pi = buckets[0].swap_remove(bucket_index);
            let scc = sccs[pi];
            assigned[pi] = true;
            num_assigned += 1;
            members.push(scc);
            stage_weight += weight;

            for (ti, &target) in sccs.iter().enumerate() {
                if assigned[ti] || ti == pi {
                    continue;
                }
                if Components::has_edge(
                    graph,
                    components.get(scc),
                    components.get(target),
                ) {
                    let degree = indegree[ti];
                    let slot = buckets[degree]
                        .iter()
                        .position(|&p| p == ti)
                        .expect("bucket queue out of sync");
                    buckets[degree].swap_remove(slot);
                    indegree[ti] = degree - 1;
                    buckets[degree - 1].push(ti);
                }
            }

            if stage_weight >= target_weight && stages_left > 1 {
                break;
            }
        }

        if members.is_empty() {
            break;
        }
        remaining_weight -= stage_weight;
        stages_left -= 1;
        stages.push(Stage::from_sccs(StageKind::Sequential, components, &members));
    }

    let score = stages
        .iter()
        .map(|stage| estimator.weight_of_vertices(body, vertices, &stage.members))
        .fold(0.0, f64::max);
    Partition {
        score,
        num_threads: stages.len() as u32,
        stages,
    }
}

fn loop_carried_between(
    graph: &DependenceGraph,
    sources: &[VertexId],
    dests: &[VertexId],
) -> bool {
    sources.iter().any(|&src| {
        dests
            .iter()
            .any(|&dst| graph.edges().has_loop_carried_edge(src, dst))
    })
}

fn is_replicable(graph: &DependenceGraph, members: &[VertexId]) -> bool {
    members.iter().all(|&v| !graph.may_write_memory(v))
}

fn is_lightweight(graph: &DependenceGraph, members: &[VertexId]) -> bool {
    members.iter().all(|&v| {
        let kind = graph.body().op(graph.vertices().get(v)).kind;
        matches!(kind, OpKind::Phi | OpKind::Branch) || graph.is_speculatively_dead(v)
    })
}

fn find_max_parallel_stage(
    graph: &DependenceGraph,
    components: &Components,
    estimator: &dyn PerformanceEstimator,
    sccs: &[usize],
    options: &SuggestOptions,
) -> Option<SccSet> {
    let good = |scc: usize| {
        let members = components.get(scc);
        let parallel = !components.must_be_in_sequential_stage(members);
        if !options.include_replicable_stages {
            parallel
        } else {
            // tiny all-replicable SCCs are better served by replication
            parallel
                && !(is_replicable(graph, members) && is_lightweight(graph, members))
        }
    };
    let incompatible = |scc1: usize, scc2: usize| {
        loop_carried_between(graph, components.get(scc1), components.get(scc2))
    };
    find_max_good_stage(graph, components, estimator, sccs, good, incompatible)
}

fn find_max_replicable_stage(
    graph: &DependenceGraph,
    components: &Components,
    estimator: &dyn PerformanceEstimator,
    sccs: &[usize],
) -> Option<SccSet> {
    let good = |scc: usize| is_replicable(graph, components.get(scc));
    find_max_good_stage(graph, components, estimator, sccs, good, |_, _| false)
}

/// Selects the heaviest mergeable subset of the `good` SCCs by a min-cut:
/// evicting an SCC cuts one of its finite terminal edges, while infinite
/// edges encode pairs that must not end up merged.
fn find_max_good_stage(
    graph: &DependenceGraph,
    components: &Components,
    estimator: &dyn PerformanceEstimator,
    sccs: &[usize],
    good: impl Fn(usize) -> bool,
    incompatible: impl Fn(usize, usize) -> bool,
) -> Option<SccSet> {
    let (good_sccs, bad_sccs): (SccSet, SccSet) =
        sccs.iter().copied().partition(|&scc| good(scc));
    if good_sccs.is_empty() {
        return None;
    }

    let mut network = Network::new();
    for &scc in &good_sccs {
        let weight = estimator.weight_of_vertices(
            graph.body(),
            graph.vertices(),
            components.get(scc),
        );
        let capacity = 1 + (100.0 * weight) as u64;
        network.add_edge(Node::Source, Node::Left(scc as u32), capacity);
        network.add_edge(Node::Right(scc as u32), Node::Sink, capacity);
    }

    // RULE 1: good SCCs straddling an excluded SCC cannot merge without
    // putting that SCC inside a cycle
    for &bad in &bad_sccs {
        let (before, after, _) = pivot(components, &good_sccs, &[bad]);
        for &a in &before {
            for &b in &after {
                network.add_edge(Node::Left(a as u32), Node::Right(b as u32), CAP_INF);
            }
        }
    }

    // RULE 2: incompatible pairs, widened to everything ordered around them
    for &scc1 in &good_sccs {
        for &scc2 in &good_sccs {
            if !incompatible(scc1, scc2) {
                continue;
            }
            let mut upstream: SccSet = good_sccs
                .iter()
                .copied()
                .filter(|&p| components.ordered_before(p, scc1))
                .collect();
            upstream.push(scc1);
            let mut downstream: SccSet = good_sccs
                .iter()
                .copied()
                .filter(|&s| components.ordered_before(scc2, s))
                .collect();
            downstream.push(scc2);
            for &a in &upstream {
                for &b in &downstream {
                    network.add_edge(
                        Node::Left(a as u32),
                        Node::Right(b as u32),
                        CAP_INF,
                    );
                }
            }
        }
    }

    let cut = network.min_cut();
    let survivors: SccSet = good_sccs
        .iter()
        .copied()
        .filter(|&scc| {
            !cut.contains(&Node::Left(scc as u32))
                && !cut.contains(&Node::Right(scc as u32))
        })
        .collect();
    if survivors.is_empty() {
        None
    } else {
        Some(survivors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::FlatEstimator;
    use loop_ir::builder::LoopBuilder;
    use loop_ir::ir::{Op, Variable};
    use pdg::{NoMemoryDeps, NoPrediction, NoSpeculation};

    fn chain_loop(n: u32) -> LoopBody {
        let mut builder = LoopBuilder::new();
        builder.push(Op::value(Variable(0), []));
        for i in 1..n {
            builder.push(Op::value(Variable(i), [Variable(i - 1)]));
        }
        builder.finish().unwrap()
    }

    #[test]
    fn pivot_separates_ordered_sccs() {
        let body = chain_loop(3);
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
        components.compute_reachability_among_sccs(&graph);

        // reverse topological order: scc 2 holds the first op of the chain
        let middle = components
            .iter()
            .position(|scc| scc == &[VertexId(1)])
            .unwrap();
        let all: SccSet = (0..components.len()).collect();
        let (before, after, flexible) = pivot(&components, &all, &[middle]);
        assert_eq!(before.len(), 1);
        assert_eq!(after.len(), 1);
        assert!(flexible.is_empty());
        assert_eq!(components.get(before[0]), &[VertexId(0)]);
        assert_eq!(components.get(after[0]), &[VertexId(2)]);
    }

    #[test]
    fn greedy_balances_a_chain_over_the_budget() {
        let body = chain_loop(4);
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
        components.compute_reachability_among_sccs(&graph);

        let all: SccSet = (0..components.len()).collect();
        let partition = greedy_dswp(&graph, &components, &FlatEstimator, &all, 2);
        assert_eq!(partition.num_threads, 2);
        assert_eq!(partition.stages.len(), 2);
        assert_eq!(partition.score, 2.0);
        // stages come out in pipeline order
        assert_eq!(partition.stages[0].members, vec![VertexId(0), VertexId(1)]);
        assert_eq!(partition.stages[1].members, vec![VertexId(2), VertexId(3)]);
    }

    #[test]
    fn greedy_with_budget_one_is_the_degenerate_plan() {
        let body = chain_loop(3);
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

        let all: SccSet = (0..components.len()).collect();
        let partition = greedy_dswp(&graph, &components, &FlatEstimator, &all, 1);
        assert_eq!(partition.num_threads, 1);
        assert_eq!(partition.stages.len(), 1);
        assert_eq!(partition.stages[0].members.len(), 3);
    }

    #[test]
    fn max_parallel_stage_excludes_sequential_sccs() {
        // a register cycle through a phi is sequential, the rest is not
        let mut builder = LoopBuilder::new();
        builder.push(Op::phi(Variable(0), [], [Variable(1)]));
        builder.push(Op::value(Variable(1), [Variable(0)]));
        builder.push(Op::store([Variable(1)]));
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
        components.compute_reachability_among_sccs(&graph);

        let all: SccSet = (0..components.len()).collect();
        let options = SuggestOptions::default();
        let stage = find_max_parallel_stage(
            &graph,
            &components,
            &FlatEstimator,
            &all,
            &options,
        )
        .unwrap();
        assert_eq!(stage.len(), 1);
        assert_eq!(components.get(stage[0]), &[VertexId(2)]);
    }
}
