use loop_ir::ir::{LoopBody, OpIdx};
use pdg::{DependenceOracle, ModRefResult, TemporalRelation};
use slotmap::SecondaryMap;

/// Synthetic dependence oracle: every memory operation belongs to one
/// region; operations interfere only within their region, and a region
/// either carries its state across iterations or does not. Answers are a
/// pure function of the assignment, so repeated queries are stable.
#[derive(Debug, Default, Clone)]
pub struct RegionOracle {
    regions: SecondaryMap<OpIdx, u32>,
    carried: Vec<bool>,
}

impl RegionOracle {
    pub fn new(num_regions: u32) -> Self {
        Self {
            regions: SecondaryMap::new(),
            carried: vec![false; num_regions as usize],
        }
    }

    pub fn assign(&mut self, op: OpIdx, region: u32) {
        debug_assert!((region as usize) < self.carried.len());
        self.regions.insert(op, region);
    }

    pub fn set_carried(&mut self, region: u32, carried: bool) {
        self.carried[region as usize] = carried;
    }

    pub fn region_of(&self, op: OpIdx) -> Option<u32> {
        self.regions.get(op).copied()
    }
}

impl DependenceOracle for RegionOracle {
    fn mod_ref(
        &mut self,
        src: OpIdx,
        rel: TemporalRelation,
        dst: OpIdx,
        body: &LoopBody,
    ) -> ModRefResult {
        let (Some(&src_region), Some(&dst_region)) =
            (self.regions.get(src), self.regions.get(dst))
        else {
            return ModRefResult::NoModRef;
        };
        if src_region != dst_region {
            return ModRefResult::NoModRef;
        }
        if rel != TemporalRelation::Same && !self.carried[src_region as usize] {
            return ModRefResult::NoModRef;
        }

        let effect = body.op(src).effect;
        match (effect.reads(), effect.writes()) {
            (true, true) => ModRefResult::ModRef,
            (false, true) => ModRefResult::Mod,
            (true, false) => ModRefResult::Ref,
            (false, false) => ModRefResult::NoModRef,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loop_ir::builder::LoopBuilder;
    use loop_ir::ir::{Op, Variable};

    #[test]
    fn regions_partition_the_memory() {
        let mut builder = LoopBuilder::new();
        let a = builder.push(Op::value(Variable(0), []));
        let load = builder.push(Op::load(Variable(1), [Variable(0)]));
        let store = builder.push(Op::store([Variable(1)]));
        let body = builder.finish().unwrap();

        let mut oracle = RegionOracle::new(2);
        oracle.assign(load, 0);
        oracle.assign(store, 1);

        // different regions, and non-memory ops, never interfere
        assert_eq!(
            oracle.mod_ref(store, TemporalRelation::Same, load, &body),
            ModRefResult::NoModRef
        );
        assert_eq!(
            oracle.mod_ref(a, TemporalRelation::Same, store, &body),
            ModRefResult::NoModRef
        );

        oracle.assign(store, 0);
        assert_eq!(
            oracle.mod_ref(store, TemporalRelation::Same, load, &body),
            ModRefResult::Mod
        );
        assert_eq!(
            oracle.mod_ref(load, TemporalRelation::Same, store, &body),
            ModRefResult::Ref
        );

        // cross-iteration interference only for carried regions
        assert_eq!(
            oracle.mod_ref(store, TemporalRelation::Before, load, &body),
            ModRefResult::NoModRef
        );
        oracle.set_carried(0, true);
        assert_eq!(
            oracle.mod_ref(store, TemporalRelation::Before, load, &body),
            ModRefResult::Mod
        );
    }
}
