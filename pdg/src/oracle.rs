// Copyright (C) 2025 Zihan Li and Ethan Uppal.

use loop_ir::ir::{LoopBody, OpIdx};

/// Where the source operation sits in time relative to the destination:
/// `Same` iteration, or an earlier/later iteration.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum TemporalRelation {
    Before,
    Same,
    After,
}

impl TemporalRelation {
    pub fn inverse(self) -> Self {
        match self {
            TemporalRelation::Before => TemporalRelation::After,
            TemporalRelation::Same => TemporalRelation::Same,
            TemporalRelation::After => TemporalRelation::Before,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum AliasResult {
    NoAlias,
    MayAlias,
    MustAlias,
}

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum ModRefResult {
    NoModRef,
    Ref,
    Mod,
    ModRef,
}

impl ModRefResult {
    pub fn mods(self) -> bool {
        matches!(self, ModRefResult::Mod | ModRefResult::ModRef)
    }

    pub fn refs(self) -> bool {
        matches!(self, ModRefResult::Ref | ModRefResult::ModRef)
    }

    pub fn union(self, other: ModRefResult) -> ModRefResult {
        match (self.mods() || other.mods(), self.refs() || other.refs()) {
            (false, false) => ModRefResult::NoModRef,
            (false, true) => ModRefResult::Ref,
            (true, false) => ModRefResult::Mod,
            (true, true) => ModRefResult::ModRef,
        }
    }

    /// Anything more precise than the worst case counts as an answer.
    pub fn is_definite(self) -> bool {
        self != ModRefResult::ModRef
    }
}

/// Answers dependence queries between two operations of the loop. Oracles
/// are total: they always answer, possibly with the conservative worst
/// case. Implementations may cache internally, hence `&mut self`.
pub trait DependenceOracle {
    /// How does `src` (executing at `rel` relative to `dst`) affect the
    /// memory accessed by `dst`?
    fn mod_ref(
        &mut self,
        src: OpIdx,
        rel: TemporalRelation,
        dst: OpIdx,
        body: &LoopBody,
    ) -> ModRefResult;

    fn alias(
        &mut self,
        a: OpIdx,
        rel: TemporalRelation,
        b: OpIdx,
        body: &LoopBody,
    ) -> AliasResult {
        if self.mod_ref(a, rel, b, body) == ModRefResult::NoModRef
            && self.mod_ref(b, rel.inverse(), a, body) == ModRefResult::NoModRef
        {
            AliasResult::NoAlias
        } else {
            AliasResult::MayAlias
        }
    }

    fn points_to_constant_memory(&mut self, _op: OpIdx, _body: &LoopBody) -> bool {
        false
    }
}

/// An explicit ordered list of oracles. The first definite answer wins;
/// if every member answers with the worst case, so does the chain.
#[derive(Default)]
pub struct OracleChain {
    oracles: Vec<Box<dyn DependenceOracle>>,
}

impl OracleChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, oracle: Box<dyn DependenceOracle>) -> &mut Self {
        self.oracles.push(oracle);
        self
    }
}

impl DependenceOracle for OracleChain {
    fn mod_ref(
        &mut self,
        src: OpIdx,
        rel: TemporalRelation,
        dst: OpIdx,
        body: &LoopBody,
    ) -> ModRefResult {
        for oracle in &mut self.oracles {
            let result = oracle.mod_ref(src, rel, dst, body);
            if result.is_definite() {
                return result;
            }
        }
        ModRefResult::ModRef
    }

    fn alias(
        &mut self,
        a: OpIdx,
        rel: TemporalRelation,
        b: OpIdx,
        body: &LoopBody,
    ) -> AliasResult {
        for oracle in &mut self.oracles {
            let result = oracle.alias(a, rel, b, body);
            if result != AliasResult::MayAlias {
                return result;
            }
        }
        AliasResult::MayAlias
    }

    fn points_to_constant_memory(&mut self, op: OpIdx, body: &LoopBody) -> bool {
        self.oracles
            .iter_mut()
            .any(|oracle| oracle.points_to_constant_memory(op, body))
    }
}

/// Test double: no memory dependences at all.
pub struct NoMemoryDeps;

impl DependenceOracle for NoMemoryDeps {
    fn mod_ref(
        &mut self,
        _src: OpIdx,
        _rel: TemporalRelation,
        _dst: OpIdx,
        _body: &LoopBody,
    ) -> ModRefResult {
        ModRefResult::NoModRef
    }
}

pub trait ControlSpeculator {
    fn is_speculatively_dead(&self, op: OpIdx) -> bool;

    /// Can `dst` execute after `src` within one iteration? Gates
    /// intra-iteration memory queries.
    fn is_reachable(&self, src: OpIdx, dst: OpIdx, body: &LoopBody) -> bool;
}

/// Test double: nothing is dead, everything is reachable.
pub struct NoSpeculation;

impl ControlSpeculator for NoSpeculation {
    fn is_speculatively_dead(&self, _op: OpIdx) -> bool {
        false
    }

    fn is_reachable(&self, _src: OpIdx, _dst: OpIdx, _body: &LoopBody) -> bool {
        true
    }
}

pub trait PredictionSpeculator {
    /// A predictable loop-carried register source suppresses its carried
    /// register edge during graph construction.
    fn is_predictable(&self, op: OpIdx, body: &LoopBody) -> bool;
}

pub struct NoPrediction;

impl PredictionSpeculator for NoPrediction {
    fn is_predictable(&self, _op: OpIdx, _body: &LoopBody) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loop_ir::builder::LoopBuilder;
    use loop_ir::ir::{Op, Variable};

    struct Always(ModRefResult);

    impl DependenceOracle for Always {
        fn mod_ref(
            &mut self,
            _src: OpIdx,
            _rel: TemporalRelation,
            _dst: OpIdx,
            _body: &LoopBody,
        ) -> ModRefResult {
            self.0
        }
    }

    fn one_op_loop() -> (LoopBody, OpIdx) {
        let mut builder = LoopBuilder::new();
        let op = builder.push(Op::store([]));
        builder.push(Op::value(Variable(0), []));
        let body = builder.finish().unwrap();
        (body, op)
    }

    #[test]
    fn union_is_bitwise() {
        assert_eq!(
            ModRefResult::Ref.union(ModRefResult::Mod),
            ModRefResult::ModRef
        );
        assert_eq!(
            ModRefResult::NoModRef.union(ModRefResult::Ref),
            ModRefResult::Ref
        );
    }

    #[test]
    fn chain_takes_first_definite_answer() {
        let (body, op) = one_op_loop();
        let mut chain = OracleChain::new();
        chain.push(Box::new(Always(ModRefResult::ModRef)));
        chain.push(Box::new(Always(ModRefResult::Ref)));
        chain.push(Box::new(Always(ModRefResult::NoModRef)));
        assert_eq!(
            chain.mod_ref(op, TemporalRelation::Same, op, &body),
            ModRefResult::Ref
        );
    }

    #[test]
    fn empty_chain_is_conservative() {
        let (body, op) = one_op_loop();
        let mut chain = OracleChain::new();
        assert_eq!(
            chain.mod_ref(op, TemporalRelation::Before, op, &body),
            ModRefResult::ModRef
        );
        assert_eq!(
            chain.alias(op, TemporalRelation::Same, op, &body),
            AliasResult::MayAlias
        );
    }
}
