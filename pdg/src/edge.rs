// Copyright (C) 2025 Zihan Li and Ethan Uppal.

use std::collections::BTreeMap;

use bitflags::bitflags;

use crate::vertices::VertexId;

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Channel {
    Ctrl,
    Reg,
    Mem,
}

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Carry {
    Intra,
    Carried,
}

bitflags! {
    /// Per-pair dependence knowledge. Control and register channels are
    /// eager and therefore always known; memory channels are three-state:
    /// nothing may be concluded from a clear `II_MEM`/`LC_MEM` bit until
    /// the matching `*_MEM_KNOWN` bit is set.
    #[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
    pub struct DepFlags: u8 {
        const II_CTRL = 1 << 0;
        const LC_CTRL = 1 << 1;
        const II_REG = 1 << 2;
        const LC_REG = 1 << 3;
        const II_MEM = 1 << 4;
        const LC_MEM = 1 << 5;
        const II_MEM_KNOWN = 1 << 6;
        const LC_MEM_KNOWN = 1 << 7;
    }
}

impl DepFlags {
    pub const PRESENT: DepFlags = DepFlags::II_CTRL
        .union(DepFlags::LC_CTRL)
        .union(DepFlags::II_REG)
        .union(DepFlags::LC_REG)
        .union(DepFlags::II_MEM)
        .union(DepFlags::LC_MEM);

    pub const INTRA: DepFlags = DepFlags::II_CTRL
        .union(DepFlags::II_REG)
        .union(DepFlags::II_MEM);

    pub const CARRIED: DepFlags = DepFlags::LC_CTRL
        .union(DepFlags::LC_REG)
        .union(DepFlags::LC_MEM);

    pub const CTRL: DepFlags = DepFlags::II_CTRL.union(DepFlags::LC_CTRL);

    pub fn is_edge(self) -> bool {
        self.intersects(DepFlags::PRESENT)
    }

    /// The present bit for one (carry, channel) pair.
    pub fn present_bit(carry: Carry, channel: Channel) -> DepFlags {
        match (carry, channel) {
            (Carry::Intra, Channel::Ctrl) => DepFlags::II_CTRL,
            (Carry::Intra, Channel::Reg) => DepFlags::II_REG,
            (Carry::Intra, Channel::Mem) => DepFlags::II_MEM,
            (Carry::Carried, Channel::Ctrl) => DepFlags::LC_CTRL,
            (Carry::Carried, Channel::Reg) => DepFlags::LC_REG,
            (Carry::Carried, Channel::Mem) => DepFlags::LC_MEM,
        }
    }
}

/// The partial edge relation: a sparse adjacency holding whatever is
/// currently known about each vertex pair. Absent entries mean "no edge
/// known, memory unknown".
pub struct PartialEdgeSet {
    adjacency: Vec<BTreeMap<u32, DepFlags>>,
}

impl PartialEdgeSet {
    pub fn new(num_vertices: usize) -> Self {
        Self {
            adjacency: vec![BTreeMap::new(); num_vertices],
        }
    }

    pub fn num_vertices(&self) -> usize {
        self.adjacency.len()
    }

    /// Number of vertex pairs holding any knowledge.
    pub fn len(&self) -> usize {
        self.adjacency.iter().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn find(&self, src: VertexId, dst: VertexId) -> DepFlags {
        self.adjacency[src.0 as usize]
            .get(&dst.0)
            .copied()
            .unwrap_or_default()
    }

    fn entry(&mut self, src: VertexId, dst: VertexId) -> &mut DepFlags {
        self.adjacency[src.0 as usize].entry(dst.0).or_default()
    }

    pub fn add_ii_ctrl(&mut self, src: VertexId, dst: VertexId) {
        self.entry(src, dst).insert(DepFlags::II_CTRL);
    }

    pub fn add_lc_ctrl(&mut self, src: VertexId, dst: VertexId) {
        self.entry(src, dst).insert(DepFlags::LC_CTRL);
    }

    pub fn add_ii_reg(&mut self, src: VertexId, dst: VertexId) {
        self.entry(src, dst).insert(DepFlags::II_REG);
    }

    pub fn add_lc_reg(&mut self, src: VertexId, dst: VertexId) {
        self.entry(src, dst).insert(DepFlags::LC_REG);
    }

    /// Record a memory query result. Knowledge only accumulates: a present
    /// bit is never cleared here and the known bit is never unset.
    pub fn add_ii_mem(&mut self, src: VertexId, dst: VertexId, present: bool) {
        let entry = self.entry(src, dst);
        if present {
            entry.insert(DepFlags::II_MEM);
        }
        entry.insert(DepFlags::II_MEM_KNOWN);
    }

    pub fn add_lc_mem(&mut self, src: VertexId, dst: VertexId, present: bool) {
        let entry = self.entry(src, dst);
        if present {
            entry.insert(DepFlags::LC_MEM);
        }
        entry.insert(DepFlags::LC_MEM_KNOWN);
    }

    /// Clear one present bit. A known memory channel stays known (it
    /// becomes known-absent).
    pub fn remove(&mut self, src: VertexId, dst: VertexId, carry: Carry, channel: Channel) {
        if let Some(flags) = self.adjacency[src.0 as usize].get_mut(&dst.0) {
            flags.remove(DepFlags::present_bit(carry, channel));
        }
    }

    pub fn has(&self, src: VertexId, dst: VertexId, filter: DepFlags) -> bool {
        self.find(src, dst).intersects(filter)
    }

    pub fn has_edge(&self, src: VertexId, dst: VertexId) -> bool {
        self.has(src, dst, DepFlags::PRESENT)
    }

    pub fn has_intra_iteration_edge(&self, src: VertexId, dst: VertexId) -> bool {
        self.has(src, dst, DepFlags::INTRA)
    }

    pub fn has_loop_carried_edge(&self, src: VertexId, dst: VertexId) -> bool {
        self.has(src, dst, DepFlags::CARRIED)
    }

    pub fn known_intra_iteration_mem(&self, src: VertexId, dst: VertexId) -> bool {
        self.has(src, dst, DepFlags::II_MEM_KNOWN)
    }

    pub fn known_loop_carried_mem(&self, src: VertexId, dst: VertexId) -> bool {
        self.has(src, dst, DepFlags::LC_MEM_KNOWN)
    }

    /// Successors of `src` along any present edge, in ascending vertex
    /// order, with the knowledge flags for each pair.
    pub fn successors(
        &self,
        src: VertexId,
    ) -> impl Iterator<Item = (VertexId, DepFlags)> + '_ {
        self.adjacency[src.0 as usize]
            .iter()
            .filter(|(_, flags)| flags.is_edge())
            .map(|(&dst, &flags)| (VertexId(dst), flags))
    }

    /// Successors reached through at least one of the `filter` bits.
    pub fn successors_filtered(
        &self,
        src: VertexId,
        filter: DepFlags,
    ) -> impl Iterator<Item = VertexId> + '_ {
        self.adjacency[src.0 as usize]
            .iter()
            .filter(move |(_, flags)| flags.intersects(filter))
            .map(|(&dst, _)| VertexId(dst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_knowledge_accumulates() {
        let mut edges = PartialEdgeSet::new(2);
        let (a, b) = (VertexId(0), VertexId(1));

        assert!(!edges.known_loop_carried_mem(a, b));
        edges.add_lc_mem(a, b, false);
        assert!(edges.known_loop_carried_mem(a, b));
        assert!(!edges.has_loop_carried_edge(a, b));

        edges.add_lc_mem(a, b, true);
        assert!(edges.has_loop_carried_edge(a, b));

        // a later absent answer must not erase the present bit
        edges.add_lc_mem(a, b, false);
        assert!(edges.has_loop_carried_edge(a, b));
    }

    #[test]
    fn removal_keeps_memory_known() {
        let mut edges = PartialEdgeSet::new(2);
        let (a, b) = (VertexId(0), VertexId(1));
        edges.add_lc_mem(a, b, true);
        edges.remove(a, b, Carry::Carried, Channel::Mem);
        assert!(!edges.has_loop_carried_edge(a, b));
        assert!(edges.known_loop_carried_mem(a, b));
    }

    #[test]
    fn filtered_successors() {
        let mut edges = PartialEdgeSet::new(3);
        edges.add_ii_reg(VertexId(0), VertexId(1));
        edges.add_lc_ctrl(VertexId(0), VertexId(2));
        edges.add_ii_mem(VertexId(0), VertexId(2), false);

        let regs: Vec<_> = edges
            .successors_filtered(VertexId(0), DepFlags::II_REG)
            .collect();
        assert_eq!(regs, vec![VertexId(1)]);

        // known-absent memory alone is not an edge
        let all: Vec<_> = edges.successors(VertexId(0)).map(|(v, _)| v).collect();
        assert_eq!(all, vec![VertexId(1), VertexId(2)]);
    }
}
