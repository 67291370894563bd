use loop_ir::ir::LoopBody;
use pdg::{
    ControlSpeculator, DependenceGraph, DependenceOracle, PredictionSpeculator,
    QueryStats,
};

use crate::cost::PerformanceEstimator;
use crate::scc::{Components, compute_dag_scc};
use crate::schedule::{SuggestOptions, suggest_with};
use crate::stage::Pipeline;

/// Everything the analysis accumulates for one loop: the lazily filled
/// dependence graph, its DAG-SCC view, and the knobs. One session per
/// loop; a new scheduling run starts from a fresh session.
pub struct AnalysisSession<'a> {
    graph: DependenceGraph<'a>,
    components: Components,
    options: SuggestOptions,
    refined: Option<bool>,
}

impl<'a> AnalysisSession<'a> {
    pub fn new(
        body: &'a LoopBody,
        oracle: &'a mut dyn DependenceOracle,
        ctrlspec: &'a dyn ControlSpeculator,
        predspec: &dyn PredictionSpeculator,
        options: SuggestOptions,
    ) -> Self {
        let graph = DependenceGraph::build(
            body,
            oracle,
            ctrlspec,
            predspec,
            options.ignore_anti_output,
        );
        let components = Components::new(graph.num_vertices());
        Self {
            graph,
            components,
            options,
            refined: None,
        }
    }

    /// Runs (or re-runs) the DAG-SCC refinement. `false` means the abort
    /// knob fired and no parallel stage is worth pursuing.
    pub fn compute_dag_scc(&mut self) -> bool {
        let ok = compute_dag_scc(
            &mut self.graph,
            &mut self.components,
            self.options.abort_if_no_parallel_stage,
            self.options.recompute_cap,
        );
        if ok {
            self.components.compute_reachability_among_sccs(&self.graph);
        }
        self.refined = Some(ok);
        ok
    }

    /// Suggests a pipeline, refining first if that has not happened yet.
    pub fn suggest(&mut self, estimator: &dyn PerformanceEstimator) -> Option<Pipeline> {
        let ok = match self.refined {
            Some(ok) => ok,
            None => self.compute_dag_scc(),
        };
        if !ok {
            return None;
        }
        Some(suggest_with(
            &self.graph,
            &self.components,
            estimator,
            &self.options,
        ))
    }

    pub fn graph(&self) -> &DependenceGraph<'a> {
        &self.graph
    }

    pub fn components(&self) -> &Components {
        &self.components
    }

    pub fn options(&self) -> &SuggestOptions {
        &self.options
    }

    pub fn into_stats(self) -> QueryStats {
        *self.graph.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::FlatEstimator;
    use loop_ir::builder::LoopBuilder;
    use loop_ir::ir::{Op, Variable};
    use pdg::{NoMemoryDeps, NoPrediction, NoSpeculation};

    #[test]
    fn session_suggests_and_reports_stats() {
        let mut builder = LoopBuilder::new();
        builder.push(Op::value(Variable(0), []));
        builder.push(Op::load(Variable(1), [Variable(0)]));
        builder.push(Op::store([Variable(1)]));
        let body = builder.finish().unwrap();

        let mut oracle = NoMemoryDeps;
        let mut session = AnalysisSession::new(
            &body,
            &mut oracle,
            &NoSpeculation,
            &NoPrediction,
            SuggestOptions::default(),
        );

        let pipeline = session.suggest(&FlatEstimator).expect("not aborted");
        assert!(!pipeline.stages.is_empty());
        assert!(pipeline.num_threads() <= session.options().thread_budget);

        let stats = session.into_stats();
        assert!(stats.num_queries > 0);
    }
}
