use slotmap::{SlotMap, new_key_type};

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub struct Variable(pub u32);

new_key_type! { pub struct OpIdx; }

#[derive(Debug, Default, PartialEq, Eq, Hash, Clone, Copy)]
pub enum MemEffect {
    #[default]
    None,
    Read,
    Write,
    ReadWrite,
}

impl MemEffect {
    pub fn reads(self) -> bool {
        matches!(self, MemEffect::Read | MemEffect::ReadWrite)
    }

    pub fn writes(self) -> bool {
        matches!(self, MemEffect::Write | MemEffect::ReadWrite)
    }

    pub fn affects_memory(self) -> bool {
        !matches!(self, MemEffect::None)
    }
}

#[derive(Debug, Default, PartialEq, Eq, Hash, Clone, Copy)]
pub enum OpKind {
    #[default]
    Value,
    Phi,
    Branch,
    Call,
    Load,
    Store,
}

/// One operation of the loop body. `uses` name same-iteration register
/// sources; `carried_uses` consume the value produced in the previous
/// iteration (phi back-edges).
#[derive(Debug, Default, PartialEq, Eq, Clone)]
pub struct Op {
    pub dest: Option<Variable>,
    pub uses: Box<[Variable]>,
    pub carried_uses: Box<[Variable]>,
    pub kind: OpKind,
    pub effect: MemEffect,
}

impl Op {
    pub fn value(dest: Variable, uses: impl Into<Box<[Variable]>>) -> Self {
        Op {
            dest: Some(dest),
            uses: uses.into(),
            ..Op::default()
        }
    }

    pub fn phi(
        dest: Variable,
        uses: impl Into<Box<[Variable]>>,
        carried_uses: impl Into<Box<[Variable]>>,
    ) -> Self {
        Op {
            dest: Some(dest),
            uses: uses.into(),
            carried_uses: carried_uses.into(),
            kind: OpKind::Phi,
            ..Op::default()
        }
    }

    pub fn branch(uses: impl Into<Box<[Variable]>>) -> Self {
        Op {
            uses: uses.into(),
            kind: OpKind::Branch,
            ..Op::default()
        }
    }

    pub fn load(dest: Variable, uses: impl Into<Box<[Variable]>>) -> Self {
        Op {
            dest: Some(dest),
            uses: uses.into(),
            kind: OpKind::Load,
            effect: MemEffect::Read,
            ..Op::default()
        }
    }

    pub fn store(uses: impl Into<Box<[Variable]>>) -> Self {
        Op {
            uses: uses.into(),
            kind: OpKind::Store,
            effect: MemEffect::Write,
            ..Op::default()
        }
    }

    pub fn call(
        dest: Option<Variable>,
        uses: impl Into<Box<[Variable]>>,
        effect: MemEffect,
    ) -> Self {
        Op {
            dest,
            uses: uses.into(),
            kind: OpKind::Call,
            effect,
            ..Op::default()
        }
    }
}

/// An immutable single loop. `order` fixes a deterministic program order
/// over the arena; `controls` lists intra-iteration control pairs
/// (branch, controlled); `latch` is the back-edge branch.
#[derive(Debug, Default, Clone)]
pub struct LoopBody {
    pub ops: SlotMap<OpIdx, Op>,
    pub order: Vec<OpIdx>,
    pub controls: Vec<(OpIdx, OpIdx)>,
    pub latch: Option<OpIdx>,
}

impl LoopBody {
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn op(&self, idx: OpIdx) -> &Op {
        &self.ops[idx]
    }

    /// Operations in program order.
    pub fn iter(&self) -> impl Iterator<Item = (OpIdx, &Op)> {
        self.order.iter().map(|&idx| (idx, &self.ops[idx]))
    }
}
