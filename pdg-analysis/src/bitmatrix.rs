use fixedbitset::FixedBitSet;

/// Square bit matrix, used for the ordered-before relation over SCC
/// indices.
#[derive(Debug, Clone)]
pub struct BitMatrix {
    n: usize,
    bits: FixedBitSet,
}

impl BitMatrix {
    pub fn new(n: usize) -> Self {
        Self {
            n,
            bits: FixedBitSet::with_capacity(n * n),
        }
    }

    pub fn resize(&mut self, n: usize) {
        self.n = n;
        self.bits = FixedBitSet::with_capacity(n * n);
    }

    pub fn set(&mut self, i: usize, j: usize) {
        self.bits.insert(i * self.n + j);
    }

    pub fn test(&self, i: usize, j: usize) -> bool {
        self.bits.contains(i * self.n + j)
    }

    /// Warshall's algorithm.
    pub fn transitive_closure(&mut self) {
        for k in 0..self.n {
            for i in 0..self.n {
                if !self.test(i, k) {
                    continue;
                }
                for j in 0..self.n {
                    if self.test(k, j) {
                        self.set(i, j);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closure_of_a_chain() {
        let mut m = BitMatrix::new(4);
        m.set(0, 1);
        m.set(1, 2);
        m.set(2, 3);
        m.transitive_closure();
        assert!(m.test(0, 3));
        assert!(m.test(1, 3));
        assert!(!m.test(3, 0));
        assert!(!m.test(0, 0));
    }
}
