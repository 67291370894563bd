// Copyright (C) 2025 Zihan Li and Ethan Uppal.

use std::collections::HashMap;

use slotmap::SlotMap;
use thiserror::Error;

use crate::ir::{LoopBody, MemEffect, Op, OpIdx, OpKind, Variable};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoopBuildError {
    #[error("loop body contains no operations")]
    Empty,
    #[error("variable v{} is defined more than once", (.0).0)]
    Redefined(Variable),
    #[error("variable v{} is used but never defined", (.0).0)]
    Undefined(Variable),
    #[error("control dependence source is not a branch")]
    ControlSourceNotBranch,
    #[error("latch is not a branch")]
    LatchNotBranch,
    #[error("memory effect inconsistent with operation kind")]
    EffectMismatch,
}

/// Accumulates operations and control structure, then validates into an
/// immutable [`LoopBody`].
#[derive(Default)]
pub struct LoopBuilder {
    ops: SlotMap<OpIdx, Op>,
    order: Vec<OpIdx>,
    controls: Vec<(OpIdx, OpIdx)>,
    latch: Option<OpIdx>,
}

impl LoopBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: Op) -> OpIdx {
        let idx = self.ops.insert(op);
        self.order.push(idx);
        idx
    }

    /// Declare that `branch` controls whether `controlled` executes this
    /// iteration.
    pub fn control(&mut self, branch: OpIdx, controlled: OpIdx) {
        self.controls.push((branch, controlled));
    }

    pub fn latch(&mut self, branch: OpIdx) {
        self.latch = Some(branch);
    }

    pub fn finish(self) -> Result<LoopBody, LoopBuildError> {
        if self.order.is_empty() {
            return Err(LoopBuildError::Empty);
        }

        let mut defined: HashMap<Variable, OpIdx> = HashMap::new();
        for (idx, op) in &self.ops {
            let effect_ok = match op.kind {
                OpKind::Value | OpKind::Phi | OpKind::Branch => {
                    op.effect == MemEffect::None
                }
                OpKind::Load => op.effect == MemEffect::Read,
                OpKind::Store => op.effect == MemEffect::Write,
                OpKind::Call => true,
            };
            if !effect_ok {
                return Err(LoopBuildError::EffectMismatch);
            }

            if let Some(dest) = op.dest
                && defined.insert(dest, idx).is_some()
            {
                return Err(LoopBuildError::Redefined(dest));
            }
        }

        for (_, op) in &self.ops {
            for &used in op.uses.iter().chain(op.carried_uses.iter()) {
                if !defined.contains_key(&used) {
                    return Err(LoopBuildError::Undefined(used));
                }
            }
        }

        for &(branch, _) in &self.controls {
            if self.ops[branch].kind != OpKind::Branch {
                return Err(LoopBuildError::ControlSourceNotBranch);
            }
        }

        if let Some(latch) = self.latch
            && self.ops[latch].kind != OpKind::Branch
        {
            return Err(LoopBuildError::LatchNotBranch);
        }

        Ok(LoopBody {
            ops: self.ops,
            order: self.order,
            controls: self.controls,
            latch: self.latch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_loop() {
        assert_eq!(LoopBuilder::new().finish().unwrap_err(), LoopBuildError::Empty);
    }

    #[test]
    fn rejects_undefined_use() {
        let mut builder = LoopBuilder::new();
        builder.push(Op::value(Variable(0), [Variable(7)]));
        assert_eq!(
            builder.finish().unwrap_err(),
            LoopBuildError::Undefined(Variable(7))
        );
    }

    #[test]
    fn rejects_double_definition() {
        let mut builder = LoopBuilder::new();
        builder.push(Op::value(Variable(0), []));
        builder.push(Op::value(Variable(0), []));
        assert_eq!(
            builder.finish().unwrap_err(),
            LoopBuildError::Redefined(Variable(0))
        );
    }

    #[test]
    fn rejects_non_branch_latch_and_control() {
        let mut builder = LoopBuilder::new();
        let v = builder.push(Op::value(Variable(0), []));
        builder.latch(v);
        assert_eq!(builder.finish().unwrap_err(), LoopBuildError::LatchNotBranch);

        let mut builder = LoopBuilder::new();
        let v = builder.push(Op::value(Variable(0), []));
        let w = builder.push(Op::store([Variable(0)]));
        builder.control(v, w);
        assert_eq!(
            builder.finish().unwrap_err(),
            LoopBuildError::ControlSourceNotBranch
        );
    }

    #[test]
    fn rejects_effect_mismatch() {
        let mut builder = LoopBuilder::new();
        builder.push(Op {
            dest: Some(Variable(0)),
            kind: OpKind::Load,
            effect: MemEffect::Write,
            ..Op::default()
        });
        assert_eq!(builder.finish().unwrap_err(), LoopBuildError::EffectMismatch);
    }

    #[test]
    fn builds_a_small_loop() {
        let mut builder = LoopBuilder::new();
        let phi = builder.push(Op::phi(Variable(0), [], [Variable(1)]));
        let add = builder.push(Op::value(Variable(1), [Variable(0)]));
        let exit = builder.push(Op::branch([Variable(1)]));
        builder.control(exit, add);
        builder.latch(exit);

        let body = builder.finish().unwrap();
        assert_eq!(body.len(), 3);
        assert_eq!(body.order, vec![phi, add, exit]);
        assert_eq!(body.latch, Some(exit));
    }
}
