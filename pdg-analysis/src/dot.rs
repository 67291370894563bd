use std::fmt;

use loop_ir::ir::OpKind;
use pdg::{DepFlags, DependenceGraph};

use crate::scc::Components;
use crate::stage::{Pipeline, StageKind};

const EDGE_STYLES: [(DepFlags, &str, &str); 6] = [
    (DepFlags::II_CTRL, "blue", "solid"),
    (DepFlags::LC_CTRL, "blue", "dashed"),
    (DepFlags::II_REG, "black", "solid"),
    (DepFlags::LC_REG, "black", "dashed"),
    (DepFlags::II_MEM, "red", "solid"),
    (DepFlags::LC_MEM, "red", "dashed"),
];

fn kind_name(kind: OpKind) -> &'static str {
    match kind {
        OpKind::Value => "value",
        OpKind::Phi => "phi",
        OpKind::Branch => "br",
        OpKind::Call => "call",
        OpKind::Load => "load",
        OpKind::Store => "store",
    }
}

/// Graphviz rendering of graphs and pipelines, for eyeballing plans.
pub struct DotPrinter<'formatter, W: fmt::Write> {
    out: &'formatter mut W,
}

impl<'formatter, W: fmt::Write> DotPrinter<'formatter, W> {
    pub fn new(out: &'formatter mut W) -> Self {
        Self { out }
    }

    fn print_vertex(&mut self, graph: &DependenceGraph, v: pdg::VertexId) -> fmt::Result {
        let kind = graph.body().op(graph.vertices().get(v)).kind;
        writeln!(self.out, "    v{} [label=\"v{}: {}\"];", v.0, v.0, kind_name(kind))
    }

    fn print_edges(&mut self, graph: &DependenceGraph) -> fmt::Result {
        for src in graph.vertices().iter() {
            for (dst, flags) in graph.edges().successors(src) {
                for (bit, color, style) in EDGE_STYLES {
                    if flags.contains(bit) {
                        writeln!(
                            self.out,
                            "  v{} -> v{} [color={color}, style={style}];",
                            src.0, dst.0
                        )?;
                    }
                }
            }
        }
        Ok(())
    }

    /// SCC clusters: sequential in red, parallel-eligible in dark green.
    pub fn print_graph(
        &mut self,
        graph: &DependenceGraph,
        components: &Components,
    ) -> fmt::Result {
        writeln!(self.out, "digraph pdg {{")?;
        for (i, scc) in components.iter().enumerate() {
            let (color, tag) = if components.must_be_in_sequential_stage(scc) {
                ("red", "S")
            } else {
                ("darkgreen", "P")
            };
            writeln!(self.out, "  subgraph cluster_scc{i} {{")?;
            writeln!(self.out, "    color={color}; label=\"{tag} {i}\";")?;
            for &v in scc {
                self.print_vertex(graph, v)?;
            }
            writeln!(self.out, "  }}")?;
        }
        self.print_edges(graph)?;
        writeln!(self.out, "}}")
    }

    /// Stage clusters with replicated members highlighted in orange.
    pub fn print_pipeline(
        &mut self,
        graph: &DependenceGraph,
        pipeline: &Pipeline,
    ) -> fmt::Result {
        writeln!(self.out, "digraph pipeline {{")?;
        for (i, stage) in pipeline.stages.iter().enumerate() {
            let label = match stage.kind {
                StageKind::Sequential => "S".to_string(),
                StageKind::Replicable => "R".to_string(),
                StageKind::Parallel { factor } => format!("P{factor}"),
            };
            writeln!(self.out, "  subgraph cluster_stage{i} {{")?;
            writeln!(self.out, "    label=\"stage {i} ({label})\";")?;
            for &v in &stage.replicated {
                let kind = graph.body().op(graph.vertices().get(v)).kind;
                writeln!(
                    self.out,
                    "    rep{i}_v{} [label=\"rep v{}: {}\", color=orange];",
                    v.0,
                    v.0,
                    kind_name(kind)
                )?;
            }
            for &v in &stage.members {
                self.print_vertex(graph, v)?;
            }
            writeln!(self.out, "  }}")?;
        }
        self.print_edges(graph)?;
        writeln!(self.out, "}}")
    }
}
