// Copyright (C) 2025 Zihan Li and Ethan Uppal.

pub mod edge;
pub mod graph;
pub mod oracle;
pub mod vertices;

pub use edge::{Carry, Channel, DepFlags, PartialEdgeSet};
pub use graph::{DependenceGraph, QueryStats};
pub use oracle::{
    AliasResult, ControlSpeculator, DependenceOracle, ModRefResult,
    NoMemoryDeps, NoPrediction, NoSpeculation, OracleChain,
    PredictionSpeculator, TemporalRelation,
};
pub use vertices::{VertexId, Vertices};
