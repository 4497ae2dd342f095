//! Function control-flow graphs, in the shape the instrumentation planner consumes.
//!
//! A [`Cfg`] is built by a compiler frontend before instrumentation. Two synthetic blocks exist
//! from the start: the *entry* block at index 0 and the *exit* block at index 1; real blocks are
//! numbered from 2 onwards. Node indices double as the wire-level [`BlockIndex`] values of the
//! graph file, so a parsed graph record can be related back to the blocks without a translation
//! table.
//!
//! [`Cfg`]: struct.Cfg.html
//! [`BlockIndex`]: ../raw/struct.BlockIndex.html

use raw::BlockAttr;

use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};

bitflags! {
    /// Compile-time properties of a control-flow edge.
    ///
    /// `FAKE` and `FALLTHROUGH` survive into the graph file as [`ArcAttr`] bits; the rest only
    /// steer spanning tree construction and counter placement.
    ///
    /// [`ArcAttr`]: ../raw/struct.ArcAttr.html
    #[derive(Default)]
    pub struct EdgeFlags: u16 {
        /// Control continues into the target without a jump.
        const FALLTHROUGH = 0x1;
        /// The edge is taken by abnormal control transfer, e.g. unwinding.
        const ABNORMAL = 0x2;
        /// The edge is an abnormal transfer out of a call.
        const ABNORMAL_CALL = 0x4;
        /// The edge does not exist at run time. It closes the graph around constructs like
        /// `abort()` so that flow conservation holds on every block.
        const FAKE = 0x8;
        /// Force the edge to be treated as critical even if its degrees do not say so.
        const CRITICAL = 0x10;
    }
}

/// A control-flow graph of one function.
///
/// # Examples
///
/// ```rust
/// use arcflow::cfg::{Cfg, EdgeFlags};
/// use arcflow::raw::BlockAttr;
///
/// let mut cfg = Cfg::new();
/// let body = cfg.add_block(BlockAttr::empty());
/// let (entry, exit) = (cfg.entry(), cfg.exit());
/// cfg.add_edge(entry, body, EdgeFlags::empty());
/// cfg.add_edge(body, exit, EdgeFlags::empty());
/// assert_eq!(cfg.block_count(), 3);
/// assert_eq!(body.index(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct Cfg {
    graph: DiGraph<BlockAttr, EdgeFlags>,
    // petgraph iterates adjacent edges most-recent-first; counter slots depend on the insertion
    // order, so the ordered adjacency is kept separately.
    out_edges: Vec<Vec<EdgeIndex>>,
    in_edges: Vec<Vec<EdgeIndex>>,
}

impl Cfg {
    /// Creates a graph containing only the entry and exit blocks.
    pub fn new() -> Cfg {
        let mut cfg = Cfg {
            graph: DiGraph::new(),
            out_edges: Vec::new(),
            in_edges: Vec::new(),
        };
        let entry = cfg.add_block(BlockAttr::empty());
        let exit = cfg.add_block(BlockAttr::empty());
        debug_assert_eq!(entry.index(), 0);
        debug_assert_eq!(exit.index(), 1);
        cfg
    }

    /// The synthetic entry block. Every run of the function starts here.
    pub fn entry(&self) -> NodeIndex {
        NodeIndex::new(0)
    }

    /// The synthetic exit block. Every run of the function ends here.
    pub fn exit(&self) -> NodeIndex {
        NodeIndex::new(1)
    }

    /// Adds a block and returns its index.
    pub fn add_block(&mut self, attr: BlockAttr) -> NodeIndex {
        let node = self.graph.add_node(attr);
        self.out_edges.push(Vec::new());
        self.in_edges.push(Vec::new());
        node
    }

    /// Adds a directed edge. The exit block has no outgoing edges and the entry block no incoming
    /// ones; a violation is a caller bug.
    pub fn add_edge(&mut self, source: NodeIndex, target: NodeIndex, flags: EdgeFlags) -> EdgeIndex {
        debug_assert_ne!(source, self.exit(), "edge out of the exit block");
        debug_assert_ne!(target, self.entry(), "edge into the entry block");
        let edge = self.graph.add_edge(source, target, flags);
        self.out_edges[source.index()].push(edge);
        self.in_edges[target.index()].push(edge);
        edge
    }

    /// Number of blocks, the two synthetic ones included.
    pub fn block_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// The attributes of a block.
    pub fn block_attr(&self, block: NodeIndex) -> BlockAttr {
        self.graph[block]
    }

    /// The flags of an edge.
    pub fn edge_flags(&self, edge: EdgeIndex) -> EdgeFlags {
        self.graph[edge]
    }

    /// The `(source, target)` blocks of an edge.
    pub fn endpoints(&self, edge: EdgeIndex) -> (NodeIndex, NodeIndex) {
        self.graph.edge_endpoints(edge).expect("edge of this graph")
    }

    /// Outgoing edges of a block, oldest first.
    pub fn out_edges(&self, block: NodeIndex) -> &[EdgeIndex] {
        &self.out_edges[block.index()]
    }

    /// Incoming edges of a block, oldest first.
    pub fn in_edges(&self, block: NodeIndex) -> &[EdgeIndex] {
        &self.in_edges[block.index()]
    }

    /// Whether an edge is critical.
    ///
    /// A critical edge leaves a block with several successors and enters a block with several
    /// predecessors, so an increment can only be attached to it by splitting the edge.
    pub fn is_critical(&self, edge: EdgeIndex) -> bool {
        if self.graph[edge].contains(EdgeFlags::CRITICAL) {
            return true;
        }
        let (source, target) = self.endpoints(edge);
        self.out_edges[source.index()].len() >= 2 && self.in_edges[target.index()].len() >= 2
    }
}

impl Default for Cfg {
    fn default() -> Cfg {
        Cfg::new()
    }
}
