//! Spanning tree selection for counter placement.
//!
//! Flow conservation makes it unnecessary to count every edge: once the edges *off* a spanning
//! tree of the function graph carry counters, the remaining edge counts can be recovered
//! arithmetically (see the [`solve`] module). The tree is grown greedily in priority passes so
//! that edges which must not, or should rather not, carry an increment end up on the tree:
//! abnormal and fake edges first along with edges into the exit block, then critical edges whose
//! instrumentation would force an edge split, then everything else.
//!
//! There is no physical edge from exit back to entry, yet conservation treats a finished run as
//! exactly that wrap-around. The builder therefore merges exit and entry into one group before the
//! first pass, as if such an edge were already on the tree.
//!
//! [`solve`]: ../solve/index.html

use cfg::{Cfg, EdgeFlags};

use fixedbitset::FixedBitSet;
use petgraph::graph::{EdgeIndex, NodeIndex};

//----------------------------------------------------------------------------------------------------------------------
//{{{ UnionFind

/// Union-find over block indices.
///
/// Tracks which blocks are already connected through the tree; an edge whose endpoints share a
/// group would close a cycle and must stay off the tree.
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    /// Creates `n` singleton groups.
    pub fn new(n: usize) -> UnionFind {
        UnionFind {
            parent: (0..n).collect(),
        }
    }

    /// Finds the representative of the group `x` belongs to, compressing the visited path.
    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut current = x;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    /// Merges the groups of `a` and `b`.
    ///
    /// # Panics
    ///
    /// Panics if both are already in the same group. Callers must check with [`in_same_group`]
    /// first; merging a group with itself would put a cycle on the tree.
    ///
    /// [`in_same_group`]: #method.in_same_group
    pub fn union(&mut self, a: usize, b: usize) {
        let root_a = self.find(a);
        let root_b = self.find(b);
        assert_ne!(root_a, root_b, "blocks {} and {} are already connected", a, b);
        self.parent[root_a] = root_b;
    }

    /// Whether `a` and `b` are currently in the same group.
    pub fn in_same_group(&mut self, a: usize, b: usize) -> bool {
        self.find(a) == self.find(b)
    }
}

//}}}
//----------------------------------------------------------------------------------------------------------------------
//{{{ SpanningTree

/// The edges selected to carry no counter.
///
/// # Examples
///
/// ```rust
/// # extern crate fixedbitset;
/// # extern crate arcflow;
/// # fn main() {
/// use arcflow::cfg::{Cfg, EdgeFlags};
/// use arcflow::raw::BlockAttr;
/// use arcflow::spanning::SpanningTree;
/// use fixedbitset::FixedBitSet;
///
/// // entry -> a -> exit, a linear function.
/// let mut cfg = Cfg::new();
/// let a = cfg.add_block(BlockAttr::empty());
/// let entry_a = cfg.add_edge(cfg.entry(), a, EdgeFlags::empty());
/// let a_exit = cfg.add_edge(a, cfg.exit(), EdgeFlags::empty());
///
/// let ignore = FixedBitSet::with_capacity(cfg.edge_count());
/// let tree = SpanningTree::build(&cfg, &ignore);
/// // the edge into exit is protected; the counter will sit on entry -> a.
/// assert!(tree.is_on_tree(a_exit));
/// assert!(!tree.is_on_tree(entry_a));
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SpanningTree {
    on_tree: FixedBitSet,
}

impl SpanningTree {
    /// Chooses a spanning tree of `cfg`, ignoring the edges set in `ignore`.
    ///
    /// The scan order is fixed: blocks by ascending index, outgoing edges of each block oldest
    /// first. Building the same graph twice therefore yields the same tree, which the counter
    /// slot assignment depends on.
    pub fn build(cfg: &Cfg, ignore: &FixedBitSet) -> SpanningTree {
        let mut on_tree = FixedBitSet::with_capacity(cfg.edge_count());
        let mut groups = UnionFind::new(cfg.block_count());

        // stand-in for the virtual wrap-around edge from exit to entry.
        groups.union(cfg.exit().index(), cfg.entry().index());

        Self::grow(cfg, ignore, &mut on_tree, &mut groups, |cfg, edge| {
            let (_, target) = cfg.endpoints(edge);
            let flags = cfg.edge_flags(edge);
            flags.intersects(EdgeFlags::ABNORMAL | EdgeFlags::ABNORMAL_CALL | EdgeFlags::FAKE) || target == cfg.exit()
        });
        Self::grow(cfg, ignore, &mut on_tree, &mut groups, |cfg, edge| cfg.is_critical(edge));
        Self::grow(cfg, ignore, &mut on_tree, &mut groups, |_, _| true);

        SpanningTree { on_tree }
    }

    /// One selection pass. Every non-ignored edge accepted by `priority` whose endpoints are not
    /// yet connected joins the tree.
    fn grow<F>(cfg: &Cfg, ignore: &FixedBitSet, on_tree: &mut FixedBitSet, groups: &mut UnionFind, priority: F)
    where
        F: Fn(&Cfg, EdgeIndex) -> bool,
    {
        for block in 0..cfg.block_count() {
            for &edge in cfg.out_edges(NodeIndex::new(block)) {
                if ignore.contains(edge.index()) || !priority(cfg, edge) {
                    continue;
                }
                let (source, target) = cfg.endpoints(edge);
                if groups.in_same_group(source.index(), target.index()) {
                    continue;
                }
                trace!("tree-edge {} -> {}", source.index(), target.index());
                on_tree.insert(edge.index());
                groups.union(source.index(), target.index());
            }
        }
    }

    /// Whether `edge` was placed on the tree.
    pub fn is_on_tree(&self, edge: EdgeIndex) -> bool {
        self.on_tree.contains(edge.index())
    }

    /// Number of edges on the tree.
    pub fn edge_count(&self) -> usize {
        self.on_tree.ones().count()
    }
}

//}}}

#[cfg(test)]
mod tests {
    use super::{SpanningTree, UnionFind};
    use cfg::{Cfg, EdgeFlags};
    use raw::BlockAttr;

    use fixedbitset::FixedBitSet;
    use petgraph::graph::EdgeIndex;

    #[test]
    fn test_union_find() {
        let mut groups = UnionFind::new(5);
        assert!(!groups.in_same_group(0, 4));
        groups.union(0, 1);
        groups.union(2, 3);
        assert!(groups.in_same_group(0, 1));
        assert!(!groups.in_same_group(1, 2));
        groups.union(1, 3);
        assert!(groups.in_same_group(0, 2));
        assert!(groups.in_same_group(3, 0));
        assert!(!groups.in_same_group(0, 4));
        assert_eq!(groups.find(4), 4);
    }

    #[test]
    #[should_panic(expected = "already connected")]
    fn test_union_of_connected_blocks_panics() {
        let mut groups = UnionFind::new(3);
        groups.union(0, 1);
        groups.union(1, 2);
        groups.union(2, 0);
    }

    fn no_ignore(cfg: &Cfg) -> FixedBitSet {
        FixedBitSet::with_capacity(cfg.edge_count())
    }

    #[test]
    fn test_diamond_tree_size() {
        // entry -> a -> {b, c} -> d -> exit.
        let mut cfg = Cfg::new();
        let a = cfg.add_block(BlockAttr::empty());
        let b = cfg.add_block(BlockAttr::empty());
        let c = cfg.add_block(BlockAttr::empty());
        let d = cfg.add_block(BlockAttr::empty());
        cfg.add_edge(cfg.entry(), a, EdgeFlags::empty());
        cfg.add_edge(a, b, EdgeFlags::empty());
        cfg.add_edge(a, c, EdgeFlags::empty());
        let bd = cfg.add_edge(b, d, EdgeFlags::empty());
        let cd = cfg.add_edge(c, d, EdgeFlags::empty());
        cfg.add_edge(d, cfg.exit(), EdgeFlags::empty());

        let tree = SpanningTree::build(&cfg, &no_ignore(&cfg));
        // a spanning tree over 6 blocks has 5 edges, one of which is the virtual wrap-around.
        assert_eq!(tree.edge_count(), 4);
        assert!(!tree.is_on_tree(bd));
        assert!(!tree.is_on_tree(cd));
    }

    #[test]
    fn test_fake_edges_join_first() {
        // two parallel edges a -> b; the fake one must win the tree spot.
        let mut cfg = Cfg::new();
        let a = cfg.add_block(BlockAttr::empty());
        let b = cfg.add_block(BlockAttr::empty());
        cfg.add_edge(cfg.entry(), a, EdgeFlags::empty());
        let fake = cfg.add_edge(a, b, EdgeFlags::FAKE);
        let real = cfg.add_edge(a, b, EdgeFlags::empty());
        cfg.add_edge(b, cfg.exit(), EdgeFlags::empty());

        let tree = SpanningTree::build(&cfg, &no_ignore(&cfg));
        assert!(tree.is_on_tree(fake));
        assert!(!tree.is_on_tree(real));
    }

    #[test]
    fn test_critical_edges_join_before_ordinary() {
        // a -> c is critical (a branches, c joins). in a plain scan the ordinary edge
        // entry -> a would claim the tree spot that a -> c needs.
        let mut cfg = Cfg::new();
        let a = cfg.add_block(BlockAttr::empty());
        let b = cfg.add_block(BlockAttr::empty());
        let c = cfg.add_block(BlockAttr::empty());
        let entry_a = cfg.add_edge(cfg.entry(), a, EdgeFlags::empty());
        cfg.add_edge(a, b, EdgeFlags::empty());
        let ac = cfg.add_edge(a, c, EdgeFlags::empty());
        cfg.add_edge(b, c, EdgeFlags::empty());
        cfg.add_edge(c, cfg.exit(), EdgeFlags::empty());
        assert!(cfg.is_critical(ac));

        let tree = SpanningTree::build(&cfg, &no_ignore(&cfg));
        assert!(tree.is_on_tree(ac));
        assert!(!tree.is_on_tree(entry_a));
    }

    #[test]
    fn test_ignored_edges_stay_off_tree() {
        let mut cfg = Cfg::new();
        let a = cfg.add_block(BlockAttr::empty());
        let b = cfg.add_block(BlockAttr::empty());
        cfg.add_edge(cfg.entry(), a, EdgeFlags::empty());
        let ab = cfg.add_edge(a, b, EdgeFlags::ABNORMAL);
        let ab2 = cfg.add_edge(a, b, EdgeFlags::empty());
        cfg.add_edge(b, cfg.exit(), EdgeFlags::empty());

        let mut ignore = no_ignore(&cfg);
        ignore.insert(ab.index());
        let tree = SpanningTree::build(&cfg, &ignore);
        // with the abnormal edge out of play, the ordinary parallel edge is treed instead.
        assert!(!tree.is_on_tree(ab));
        assert!(tree.is_on_tree(ab2));
    }

    #[test]
    fn test_deterministic() {
        let build = || {
            let mut cfg = Cfg::new();
            let blocks: Vec<_> = (0..4).map(|_| cfg.add_block(BlockAttr::empty())).collect();
            cfg.add_edge(cfg.entry(), blocks[0], EdgeFlags::empty());
            cfg.add_edge(blocks[0], blocks[1], EdgeFlags::empty());
            cfg.add_edge(blocks[0], blocks[2], EdgeFlags::empty());
            cfg.add_edge(blocks[1], blocks[3], EdgeFlags::empty());
            cfg.add_edge(blocks[2], blocks[3], EdgeFlags::empty());
            cfg.add_edge(blocks[3], blocks[0], EdgeFlags::empty());
            cfg.add_edge(blocks[3], cfg.exit(), EdgeFlags::empty());
            let tree = SpanningTree::build(&cfg, &FixedBitSet::with_capacity(cfg.edge_count()));
            (0..cfg.edge_count()).map(|i| tree.is_on_tree(EdgeIndex::new(i))).collect::<Vec<_>>()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn test_single_block_function() {
        // entry -> a -> exit with an extra fake edge a -> exit for a non-returning call.
        let mut cfg = Cfg::new();
        let a = cfg.add_block(BlockAttr::CALL_SITE);
        let entry_a = cfg.add_edge(cfg.entry(), a, EdgeFlags::empty());
        let a_exit = cfg.add_edge(a, cfg.exit(), EdgeFlags::empty());
        let a_exit_fake = cfg.add_edge(a, cfg.exit(), EdgeFlags::FAKE);

        let tree = SpanningTree::build(&cfg, &no_ignore(&cfg));
        assert!(tree.is_on_tree(a_exit));
        assert!(!tree.is_on_tree(a_exit_fake));
        assert!(!tree.is_on_tree(entry_a));
    }
}
