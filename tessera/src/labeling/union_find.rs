//! Union-find over 1-based labels. Label 0 is background and is never merged.

/// Disjoint sets whose root is always the smallest label in the set.
#[derive(Debug, Clone)]
pub(crate) struct UnionFind {
    /// `parent[label]`; slot 0 is reserved for background.
    parent: Vec<u32>,
}

impl UnionFind {
    pub(crate) fn new() -> Self {
        let mut parent = Vec::with_capacity(256);
        parent.push(0);
        Self { parent }
    }

    /// Singleton sets for labels `1..=len`.
    pub(crate) fn with_len(len: u32) -> Self {
        Self {
            parent: (0..=len).collect(),
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> u32 {
        (self.parent.len() - 1) as u32
    }

    #[inline]
    pub(crate) fn make_set(&mut self) -> u32 {
        let label = self.parent.len() as u32;
        self.parent.push(label);
        label
    }

    /// Find root with iterative path compression (two-pass).
    #[inline]
    pub(crate) fn find(&mut self, label: u32) -> u32 {
        let mut root = label;
        while self.parent[root as usize] != root {
            root = self.parent[root as usize];
        }

        let mut current = label;
        while current != root {
            let next = self.parent[current as usize];
            self.parent[current as usize] = root;
            current = next;
        }
        root
    }

    /// Merges the sets of `a` and `b`; the smaller root wins.
    /// Returns true if the sets were distinct.
    #[inline]
    pub(crate) fn union(&mut self, a: u32, b: u32) -> bool {
        debug_assert!(a != 0 && b != 0, "background cannot be merged");
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a == root_b {
            return false;
        }
        let (smaller, larger) = if root_a < root_b {
            (root_a, root_b)
        } else {
            (root_b, root_a)
        };
        self.parent[larger as usize] = smaller;
        true
    }

    /// Table mapping every label to its root. Entry 0 maps to 0.
    pub(crate) fn root_map(&mut self) -> Vec<u32> {
        (0..=self.len()).map(|label| self.find(label)).collect()
    }

    /// Table mapping every label to a dense id in `1..=n`, numbered in
    /// increasing order of the set roots. Returns the table and `n`.
    ///
    /// Roots are the minimal labels of their sets, so scanning labels upward
    /// meets each root before any other member of its set.
    pub(crate) fn dense_map(&mut self) -> (Vec<u32>, u32) {
        let len = self.len();
        let mut map = vec![0u32; len as usize + 1];
        let mut count = 0u32;
        for label in 1..=len {
            let root = self.find(label);
            if root == label {
                count += 1;
                map[label as usize] = count;
            } else {
                map[label as usize] = map[root as usize];
            }
        }
        (map, count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_set_hands_out_sequential_labels() {
        let mut uf = UnionFind::new();
        assert_eq!(uf.make_set(), 1);
        assert_eq!(uf.make_set(), 2);
        assert_eq!(uf.make_set(), 3);
        assert_eq!(uf.len(), 3);
    }

    #[test]
    fn union_keeps_smallest_root() {
        let mut uf = UnionFind::with_len(6);
        assert!(uf.union(5, 3));
        assert!(uf.union(6, 5));
        assert!(!uf.union(3, 6));
        assert_eq!(uf.find(6), 3);
        assert!(uf.union(6, 2));
        assert_eq!(uf.find(5), 2);
        assert_eq!(uf.find(3), 2);
        assert_eq!(uf.find(1), 1);
    }

    #[test]
    fn root_map_keeps_background() {
        let mut uf = UnionFind::with_len(4);
        uf.union(4, 2);
        assert_eq!(uf.root_map(), vec![0, 1, 2, 3, 2]);
    }

    #[test]
    fn dense_map_numbers_by_root_order() {
        let mut uf = UnionFind::with_len(6);
        uf.union(2, 5);
        uf.union(1, 4);
        uf.union(6, 3);
        let (map, count) = uf.dense_map();
        assert_eq!(count, 3);
        assert_eq!(map, vec![0, 1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn dense_map_empty() {
        let (map, count) = UnionFind::new().dense_map();
        assert_eq!(count, 0);
        assert_eq!(map, vec![0]);
    }
}
