use std::fmt;

use crate::ir::{LoopBody, MemEffect, Op, OpKind};

pub struct Printer<'formatter, W: fmt::Write> {
    f: &'formatter mut W,
}

impl<'formatter, W: fmt::Write> Printer<'formatter, W> {
    pub fn new(f: &'formatter mut W) -> Self {
        Self { f }
    }

    pub fn print_loop(&mut self, body: &LoopBody) -> fmt::Result {
        writeln!(self.f, "loop {{")?;
        for (idx, op) in body.iter() {
            write!(self.f, "  ")?;
            self.print_op(op)?;
            if body.latch == Some(idx) {
                write!(self.f, " latch")?;
            }
            writeln!(self.f)?;
        }
        writeln!(self.f, "}}")
    }

    pub fn print_op(&mut self, op: &Op) -> fmt::Result {
        if let Some(dest) = op.dest {
            write!(self.f, "v{} = ", dest.0)?;
        }
        let mnemonic = match op.kind {
            OpKind::Value => "op",
            OpKind::Phi => "phi",
            OpKind::Branch => "br",
            OpKind::Call => "call",
            OpKind::Load => "load",
            OpKind::Store => "store",
        };
        write!(self.f, "{}", mnemonic)?;
        for (i, used) in op.uses.iter().enumerate() {
            let separator = if i == 0 { " " } else { ", " };
            write!(self.f, "{}v{}", separator, used.0)?;
        }
        // carried uses read the previous iteration's value
        for used in op.carried_uses.iter() {
            write!(self.f, " ^v{}", used.0)?;
        }
        match op.effect {
            MemEffect::None => Ok(()),
            MemEffect::Read => write!(self.f, " [mem:r]"),
            MemEffect::Write => write!(self.f, " [mem:w]"),
            MemEffect::ReadWrite => write!(self.f, " [mem:rw]"),
        }
    }
}
