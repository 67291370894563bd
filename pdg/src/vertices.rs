use loop_ir::ir::{LoopBody, OpIdx};
use slotmap::SecondaryMap;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub struct VertexId(pub u32);

/// Dense zero-based numbering of every operation in the loop, assigned in
/// program order. Immutable once built.
pub struct Vertices {
    order: Vec<OpIdx>,
    index: SecondaryMap<OpIdx, u32>,
}

impl Vertices {
    pub fn new(body: &LoopBody) -> Self {
        let order = body.order.clone();
        let mut index = SecondaryMap::with_capacity(order.len());
        for (i, &op) in order.iter().enumerate() {
            index.insert(op, i as u32);
        }
        Self { order, index }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, v: VertexId) -> OpIdx {
        self.order[v.0 as usize]
    }

    pub fn id_of(&self, op: OpIdx) -> Option<VertexId> {
        self.index.get(op).map(|&i| VertexId(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = VertexId> {
        (0..self.order.len() as u32).map(VertexId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loop_ir::builder::LoopBuilder;
    use loop_ir::ir::{Op, Variable};

    #[test]
    fn ids_follow_program_order() {
        let mut builder = LoopBuilder::new();
        let a = builder.push(Op::value(Variable(0), []));
        let b = builder.push(Op::value(Variable(1), [Variable(0)]));
        let body = builder.finish().unwrap();

        let vertices = Vertices::new(&body);
        assert_eq!(vertices.len(), 2);
        assert_eq!(vertices.get(VertexId(0)), a);
        assert_eq!(vertices.get(VertexId(1)), b);
        assert_eq!(vertices.id_of(b), Some(VertexId(1)));
    }
}
