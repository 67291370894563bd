// Copyright (C) 2025 Zihan Li and Ethan Uppal.

pub mod bitmatrix;
pub mod cost;
pub mod dot;
pub mod minflow;
pub mod scc;
pub mod schedule;
pub mod session;
pub mod stage;

pub use cost::{FlatEstimator, PerformanceEstimator, ProfileEstimator};
pub use dot::DotPrinter;
pub use scc::{Components, compute_dag_scc};
pub use schedule::{SuggestOptions, suggest, suggest_with};
pub use session::AnalysisSession;
pub use stage::{Pipeline, Stage, StageKind};
