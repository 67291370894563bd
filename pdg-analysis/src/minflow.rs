use std::collections::{HashMap, VecDeque};

use log::trace;

/// Unbounded capacity. Arithmetic treats it as absorbing.
pub const CAP_INF: u64 = u64::MAX;

/// Flow network node. `Left(i)`/`Right(i)` are the split halves of SCC
/// `i`; non-mergeability edges run `Left(a) -> Right(b)`, and cutting
/// either terminal edge of an SCC evicts it from the candidate stage.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub enum Node {
    Source,
    Sink,
    Left(u32),
    Right(u32),
}

/// A directed flow network with source/sink terminals.
#[derive(Default)]
pub struct Network {
    adjacency: HashMap<Node, Vec<Node>>,
    capacity: HashMap<(Node, Node), u64>,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a directed edge. Parallel edges collapse to the larger
    /// capacity.
    pub fn add_edge(&mut self, from: Node, to: Node, capacity: u64) {
        let slot = self.capacity.entry((from, to)).or_insert(0);
        if *slot == 0 {
            self.adjacency.entry(from).or_default().push(to);
            // reverse residual traversal needs the back direction too
            self.adjacency.entry(to).or_default().push(from);
        }
        *slot = (*slot).max(capacity);
    }

    fn residual(&self, flow: &HashMap<(Node, Node), u64>, from: Node, to: Node) -> u64 {
        let forward = match self.capacity.get(&(from, to)) {
            Some(&CAP_INF) => CAP_INF,
            Some(&cap) => cap - flow.get(&(from, to)).copied().unwrap_or(0),
            None => 0,
        };
        if forward == CAP_INF {
            return CAP_INF;
        }
        let reverse = flow.get(&(to, from)).copied().unwrap_or(0);
        forward.saturating_add(reverse)
    }

    fn find_augmenting_path(
        &self,
        flow: &HashMap<(Node, Node), u64>,
    ) -> Option<Vec<Node>> {
        let mut predecessor: HashMap<Node, Node> = HashMap::new();
        let mut queue = VecDeque::from([Node::Source]);
        while let Some(current) = queue.pop_front() {
            let Some(neighbors) = self.adjacency.get(&current) else {
                continue;
            };
            for &next in neighbors {
                if next == Node::Source || predecessor.contains_key(&next) {
                    continue;
                }
                if self.residual(flow, current, next) == 0 {
                    continue;
                }
                predecessor.insert(next, current);
                if next == Node::Sink {
                    let mut path = vec![Node::Sink];
                    let mut node = Node::Sink;
                    while node != Node::Source {
                        node = predecessor[&node];
                        path.push(node);
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }
        None
    }

    fn push_flow(&self, flow: &mut HashMap<(Node, Node), u64>, path: &[Node]) {
        let bottleneck = path
            .windows(2)
            .map(|pair| self.residual(flow, pair[0], pair[1]))
            .min()
            .unwrap_or(0);
        debug_assert!(bottleneck > 0 && bottleneck < CAP_INF);

        for pair in path.windows(2) {
            let (from, to) = (pair[0], pair[1]);
            // cancel opposing flow before adding forward flow
            let opposing = flow.entry((to, from)).or_insert(0);
            let cancelled = bottleneck.min(*opposing);
            *opposing -= cancelled;
            *flow.entry((from, to)).or_insert(0) += bottleneck - cancelled;
        }
    }

    /// Runs Edmonds-Karp and returns every node incident to a saturated
    /// boundary edge of the minimum cut.
    pub fn min_cut(&self) -> Vec<Node> {
        let mut flow: HashMap<(Node, Node), u64> = HashMap::new();
        let mut augmentations = 0usize;
        while let Some(path) = self.find_augmenting_path(&flow) {
            self.push_flow(&mut flow, &path);
            augmentations += 1;
        }
        trace!("max flow reached after {augmentations} augmenting paths");

        // source side of the residual graph
        let mut reachable: HashMap<Node, ()> = HashMap::from([(Node::Source, ())]);
        let mut queue = VecDeque::from([Node::Source]);
        while let Some(current) = queue.pop_front() {
            let Some(neighbors) = self.adjacency.get(&current) else {
                continue;
            };
            for &next in neighbors {
                if reachable.contains_key(&next) {
                    continue;
                }
                if self.residual(&flow, current, next) == 0 {
                    continue;
                }
                reachable.insert(next, ());
                queue.push_back(next);
            }
        }

        let mut cut = vec![];
        for &(from, to) in self.capacity.keys() {
            if reachable.contains_key(&from) != reachable.contains_key(&to) {
                cut.push(from);
                cut.push(to);
            }
        }
        cut.sort();
        cut.dedup();
        cut
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cuts_the_cheaper_side() {
        // Source -1-> Left(0) -INF-> Right(0) -100-> Sink
        let mut network = Network::new();
        network.add_edge(Node::Source, Node::Left(0), 1);
        network.add_edge(Node::Left(0), Node::Right(0), CAP_INF);
        network.add_edge(Node::Right(0), Node::Sink, 100);

        let cut = network.min_cut();
        assert_eq!(cut, vec![Node::Source, Node::Left(0)]);
    }

    #[test]
    fn infinite_conflict_edge_evicts_the_lighter_candidate() {
        // two candidates that may not share a stage: flow only crosses the
        // infinite conflict edge, and the cut pays for the cheaper eviction
        let mut network = Network::new();
        network.add_edge(Node::Source, Node::Left(0), 1 + 100 * 5);
        network.add_edge(Node::Right(0), Node::Sink, 1 + 100 * 5);
        network.add_edge(Node::Source, Node::Left(1), 1 + 100 * 2);
        network.add_edge(Node::Right(1), Node::Sink, 1 + 100 * 2);
        network.add_edge(Node::Left(0), Node::Right(1), CAP_INF);

        let cut = network.min_cut();
        assert_eq!(cut, vec![Node::Sink, Node::Right(1)]);
    }

    #[test]
    fn conflict_free_candidates_are_kept_for_free() {
        let mut network = Network::new();
        network.add_edge(Node::Source, Node::Left(0), 1);
        network.add_edge(Node::Right(0), Node::Sink, 1);
        network.add_edge(Node::Source, Node::Left(1), 1);
        network.add_edge(Node::Right(1), Node::Sink, 1);
        // no conflict edges: nothing connects Source to Sink
        let cut = network.min_cut();
        assert!(cut.is_empty());
    }
}
