//! Counter placement planning and graph file emission.
//!
//! A [`Plan`] decides, for one function, which edges receive a counter increment and which slot of
//! the function's counter array each increment bumps. The decisions follow from the spanning tree:
//! every edge off the tree is counted, every edge on the tree is reconstructed later by the
//! [`solve`] module. The plan also produces the records of the graph file, which is how the
//! decisions are communicated to the offline tools.
//!
//! [`Plan`]: struct.Plan.html
//! [`solve`]: ../solve/index.html

use cfg::{Cfg, EdgeFlags};
use raw::{Arc, ArcAttr, Arcs, BlockIndex, Blocks, Function, Record};
use spanning::SpanningTree;

use fixedbitset::FixedBitSet;
use petgraph::graph::{EdgeIndex, NodeIndex};

/// Receiver of the planned increments, typically a code generator.
pub trait InstrumentSink {
    /// Called once per counted edge, in ascending slot order.
    ///
    /// `needs_split` is set when the edge is critical: the increment can be placed in neither
    /// endpoint block, so the edge has to be split around a fresh block first.
    fn attach_increment(&mut self, edge: EdgeIndex, slot: usize, needs_split: bool);
}

/// The instrumentation plan of one function.
///
/// # Examples
///
/// ```rust
/// use arcflow::cfg::{Cfg, EdgeFlags};
/// use arcflow::instrument::Plan;
/// use arcflow::raw::BlockAttr;
///
/// // entry -> a -> exit, a linear function.
/// let mut cfg = Cfg::new();
/// let a = cfg.add_block(BlockAttr::empty());
/// let entry_a = cfg.add_edge(cfg.entry(), a, EdgeFlags::empty());
/// let a_exit = cfg.add_edge(a, cfg.exit(), EdgeFlags::empty());
///
/// let plan = Plan::new(&cfg);
/// // one counter suffices: the edge into exit is on the tree.
/// assert_eq!(plan.n_slots(), 1);
/// assert_eq!(plan.slot(entry_a), Some(0));
/// assert_eq!(plan.slot(a_exit), None);
/// ```
#[derive(Debug, Clone)]
pub struct Plan {
    tree: SpanningTree,
    ignore: FixedBitSet,
    slots: Vec<Option<usize>>,
    instrumented: Vec<EdgeIndex>,
}

impl Plan {
    /// Plans the instrumentation of `cfg`.
    ///
    /// Interior abnormal edges are excluded from profiling entirely; the frontend is expected to
    /// have compensated with fake edges, which keep flow conservation intact without them. Fake
    /// edges that did not make it onto the spanning tree are excluded as well, since they can
    /// never be executed and counting them would be wasted work.
    pub fn new(cfg: &Cfg) -> Plan {
        let mut ignore = FixedBitSet::with_capacity(cfg.edge_count());
        let mut ignored = 0usize;
        for block in 0..cfg.block_count() {
            for &edge in cfg.out_edges(NodeIndex::new(block)) {
                let (source, target) = cfg.endpoints(edge);
                let flags = cfg.edge_flags(edge);
                if flags.intersects(EdgeFlags::ABNORMAL | EdgeFlags::ABNORMAL_CALL) && source != cfg.entry() && target != cfg.exit() {
                    ignore.insert(edge.index());
                    ignored += 1;
                }
            }
        }

        let tree = SpanningTree::build(cfg, &ignore);

        for block in 0..cfg.block_count() {
            for &edge in cfg.out_edges(NodeIndex::new(block)) {
                if cfg.edge_flags(edge).contains(EdgeFlags::FAKE) && !ignore.contains(edge.index()) && !tree.is_on_tree(edge) {
                    ignore.insert(edge.index());
                    ignored += 1;
                }
            }
        }

        let mut slots = vec![None; cfg.edge_count()];
        let mut instrumented = Vec::new();
        for block in 0..cfg.block_count() {
            for &edge in cfg.out_edges(NodeIndex::new(block)) {
                if ignore.contains(edge.index()) || tree.is_on_tree(edge) {
                    continue;
                }
                // an abnormal edge here means the frontend built a graph that cannot be profiled.
                debug_assert!(!cfg.edge_flags(edge).contains(EdgeFlags::ABNORMAL), "abnormal edge left to instrument");
                slots[edge.index()] = Some(instrumented.len());
                instrumented.push(edge);
            }
        }

        debug!(
            "planned {} blocks, {} edges, {} ignored, {} instrumented",
            cfg.block_count(),
            cfg.edge_count(),
            ignored,
            instrumented.len()
        );

        Plan {
            tree,
            ignore,
            slots,
            instrumented,
        }
    }

    /// Number of counter slots the function needs.
    pub fn n_slots(&self) -> usize {
        self.instrumented.len()
    }

    /// The counter slot assigned to `edge`, or `None` if the edge is not counted.
    pub fn slot(&self, edge: EdgeIndex) -> Option<usize> {
        self.slots[edge.index()]
    }

    /// The counted edges, indexed by slot.
    pub fn instrumented_edges(&self) -> &[EdgeIndex] {
        &self.instrumented
    }

    /// Whether `edge` is on the spanning tree.
    pub fn is_on_tree(&self, edge: EdgeIndex) -> bool {
        self.tree.is_on_tree(edge)
    }

    /// Whether `edge` is excluded from profiling.
    pub fn is_ignored(&self, edge: EdgeIndex) -> bool {
        self.ignore.contains(edge.index())
    }

    /// Feeds every planned increment to `sink`, in ascending slot order.
    pub fn instrument<S: InstrumentSink>(&self, cfg: &Cfg, sink: &mut S) {
        for (slot, &edge) in self.instrumented.iter().enumerate() {
            let (source, target) = cfg.endpoints(edge);
            let needs_split = cfg.is_critical(edge);
            debug!("edge {} -> {} instrumented{}", source.index(), target.index(), if needs_split { " (and split)" } else { "" });
            sink.attach_increment(edge, slot, needs_split);
        }
        debug!("{} edges instrumented", self.instrumented.len());
    }

    /// Produces the records describing this function in a graph file.
    ///
    /// The record order is fixed: the function announcement, the block list, then one arc list per
    /// block except exit, in block order. Ignored edges are left out entirely; the remaining arcs
    /// of each block appear oldest first, so the counted arcs, read in file order, line up with
    /// the counter slots.
    pub fn graph_records(&self, cfg: &Cfg, function: Function) -> Vec<Record> {
        let mut records = Vec::with_capacity(1 + cfg.block_count());
        records.push(Record::Function(function));
        records.push(Record::Blocks(Blocks {
            flags: (0..cfg.block_count()).map(|block| cfg.block_attr(NodeIndex::new(block))).collect(),
        }));
        for block in 0..cfg.block_count() {
            let node = NodeIndex::new(block);
            if node == cfg.exit() {
                continue;
            }
            let arcs = cfg
                .out_edges(node)
                .iter()
                .filter(|&&edge| !self.ignore.contains(edge.index()))
                .map(|&edge| {
                    let (_, target) = cfg.endpoints(edge);
                    let flags = cfg.edge_flags(edge);
                    let mut attr = ArcAttr::empty();
                    if self.tree.is_on_tree(edge) {
                        attr |= ArcAttr::ON_TREE;
                    }
                    if flags.contains(EdgeFlags::FAKE) {
                        attr |= ArcAttr::FAKE;
                    }
                    if flags.contains(EdgeFlags::FALLTHROUGH) {
                        attr |= ArcAttr::FALLTHROUGH;
                    }
                    Arc {
                        dest_block: BlockIndex(target.index() as u32),
                        flags: attr,
                    }
                })
                .collect();
            records.push(Record::Arcs(Arcs {
                src_block: BlockIndex(block as u32),
                arcs,
            }));
        }
        records
    }
}
