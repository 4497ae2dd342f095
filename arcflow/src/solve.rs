//! Offline recovery of full execution counts from the counted edges.
//!
//! The instrumented program records only the edges off the spanning tree. Flow conservation
//! states that a block runs as often as its incoming edges are taken, and as often as its
//! outgoing ones. [`solve`] seeds the counted edges with their merged counter values and then
//! propagates those two equations to a fixpoint, recovering every block count and every tree edge
//! count. Branch probabilities fall out at the end.
//!
//! Counter values are untrusted input. A profile that disagrees with the graph surfaces either as
//! an [`UnsolvedFlowGraph`] error or, where a single count is merely implausible, as a clamped
//! value with a warning.
//!
//! [`solve`]: fn.solve.html
//! [`UnsolvedFlowGraph`]: ../error/enum.ErrorKind.html#variant.UnsolvedFlowGraph

use cfg::{Cfg, EdgeFlags};
use error::{ErrorKind, Result};
use instrument::Plan;
use intern::Symbol;
use raw::{BlockAttr, CounterFile, CounterKind, Record, Type};

use petgraph::graph::{EdgeIndex, NodeIndex};

/// Scale of branch probabilities: an edge taken on every run of its source block has this
/// probability.
pub const BRANCH_PROB_BASE: u32 = 10_000;

/// The recovered execution counts of one function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowSolution {
    /// Execution count of each block, indexed by block index.
    pub block_counts: Vec<i64>,
    /// Execution count of each edge, indexed by edge index. Ignored edges stay at 0.
    pub edge_counts: Vec<i64>,
    /// How often each edge is taken per run of its source block, scaled by
    /// [`BRANCH_PROB_BASE`], indexed by edge index.
    ///
    /// [`BRANCH_PROB_BASE`]: constant.BRANCH_PROB_BASE.html
    pub probabilities: Vec<u32>,
}

/// Sum of the counts currently attached to `edges`.
///
/// Edges without a solved count hold 0, so including them does not hurt.
fn sum(edges: &[EdgeIndex], edge_counts: &[i64]) -> i64 {
    edges.iter().map(|&edge| edge_counts[edge.index()]).sum()
}

/// The single edge of `edges` still missing its count.
fn find_unknown(edges: &[EdgeIndex], edge_valid: &[bool], plan: &Plan) -> EdgeIndex {
    edges
        .iter()
        .cloned()
        .find(|&edge| !edge_valid[edge.index()] && !plan.is_ignored(edge))
        .expect("an edge without a count yet")
}

/// Recovers all block and edge counts of `cfg` from the merged counter values of its `plan`.
///
/// `counts` holds one value per plan slot, as produced by the runtime and merged across program
/// runs; see [`exec_counts`] for pulling them out of a parsed data file.
///
/// # Errors
///
/// * Returns [`CountsMismatch`] if `counts` does not have exactly one value per slot.
/// * Returns [`UnsolvedFlowGraph`] if the flow equations leave some block undetermined, which
///   means the profile does not belong to this graph.
///
/// [`exec_counts`]: fn.exec_counts.html
/// [`CountsMismatch`]: ../error/enum.ErrorKind.html#variant.CountsMismatch
/// [`UnsolvedFlowGraph`]: ../error/enum.ErrorKind.html#variant.UnsolvedFlowGraph
pub fn solve(cfg: &Cfg, plan: &Plan, counts: &[u64]) -> Result<FlowSolution> {
    ensure!(
        counts.len() == plan.n_slots(),
        ErrorKind::CountsMismatch("arc", Type::Data, plan.n_slots(), counts.len())
    );

    let n_blocks = cfg.block_count();
    let n_edges = cfg.edge_count();

    let mut block_counts = vec![0i64; n_blocks];
    let mut edge_counts = vec![0i64; n_edges];
    let mut block_valid = vec![false; n_blocks];
    let mut edge_valid = vec![false; n_edges];
    let mut succ_count = vec![0i32; n_blocks];
    let mut pred_count = vec![0i32; n_blocks];

    for block in 0..n_blocks {
        let node = NodeIndex::new(block);
        succ_count[block] = cfg.out_edges(node).iter().filter(|&&edge| !plan.is_ignored(edge)).count() as i32;
        pred_count[block] = cfg.in_edges(node).iter().filter(|&&edge| !plan.is_ignored(edge)).count() as i32;
    }
    // the wrap-around from exit to entry is not an edge of the graph. pinning these two degrees
    // keeps the missing edge from ever being "the last unknown" of either block.
    succ_count[cfg.exit().index()] = 2;
    pred_count[cfg.entry().index()] = 2;

    for (slot, &edge) in plan.instrumented_edges().iter().enumerate() {
        let (source, target) = cfg.endpoints(edge);
        edge_counts[edge.index()] = counts[slot] as i64;
        edge_valid[edge.index()] = true;
        succ_count[source.index()] -= 1;
        pred_count[target.index()] -= 1;
        trace!("seed edge {} -> {}, count {}", source.index(), target.index(), counts[slot]);
    }
    debug!("{} edge counts seeded", counts.len());

    // sweep from high block indices to low ones until nothing changes. counters gravitate to the
    // later edges, so this direction converges in a few passes.
    let mut passes = 0;
    let mut changes = true;
    while changes {
        passes += 1;
        changes = false;
        for block in (0..n_blocks).rev() {
            let node = NodeIndex::new(block);
            if !block_valid[block] {
                if succ_count[block] == 0 {
                    block_counts[block] = sum(cfg.out_edges(node), &edge_counts);
                    block_valid[block] = true;
                    changes = true;
                } else if pred_count[block] == 0 {
                    block_counts[block] = sum(cfg.in_edges(node), &edge_counts);
                    block_valid[block] = true;
                    changes = true;
                }
            }
            if block_valid[block] {
                if succ_count[block] == 1 {
                    let edge = find_unknown(cfg.out_edges(node), &edge_valid, plan);
                    edge_counts[edge.index()] = block_counts[block] - sum(cfg.out_edges(node), &edge_counts);
                    edge_valid[edge.index()] = true;
                    succ_count[block] -= 1;
                    let (_, target) = cfg.endpoints(edge);
                    pred_count[target.index()] -= 1;
                    changes = true;
                }
                if pred_count[block] == 1 {
                    let edge = find_unknown(cfg.in_edges(node), &edge_valid, plan);
                    edge_counts[edge.index()] = block_counts[block] - sum(cfg.in_edges(node), &edge_counts);
                    edge_valid[edge.index()] = true;
                    pred_count[block] -= 1;
                    let (source, _) = cfg.endpoints(edge);
                    succ_count[source.index()] -= 1;
                    changes = true;
                }
            }
        }
    }
    debug!("graph solving took {} passes", passes);

    // a correctly solved graph drains every degree of every real block.
    let unsolved = (2..n_blocks)
        .filter(|&block| succ_count[block] != 0 || pred_count[block] != 0)
        .count();
    if unsolved != 0 {
        bail!(ErrorKind::UnsolvedFlowGraph(unsolved));
    }

    let mut probabilities = vec![0u32; n_edges];
    for block in 0..n_blocks {
        let node = NodeIndex::new(block);
        if block_counts[block] < 0 {
            warn!("corrupted profile: run count of block {} computed as {}", block, block_counts[block]);
            block_counts[block] = 0;
        }
        let block_count = block_counts[block];
        for &edge in cfg.out_edges(node) {
            let (_, target) = cfg.endpoints(edge);
            let to_exit = target == cfg.exit();
            let count = edge_counts[edge.index()];
            // a function can return twice, through setjmp or fork. the surplus cannot be drawn as
            // an extra entry edge, so it surfaces as impossible counts around the call block;
            // absorb them instead of flagging corruption.
            if ((count < 0 && to_exit) || (count > block_count && !to_exit)) && cfg.block_attr(node).contains(BlockAttr::CALL_SITE) {
                edge_counts[edge.index()] = if count < 0 { 0 } else { block_count };
            }
            let count = edge_counts[edge.index()];
            if count < 0 || count > block_count {
                warn!("corrupted profile: count of edge {} -> {} computed as {}", block, target.index(), count);
                edge_counts[edge.index()] = block_count / 2;
            }
        }
        if block_count != 0 {
            for &edge in cfg.out_edges(node) {
                let scaled = edge_counts[edge.index()] * i64::from(BRANCH_PROB_BASE) + block_count / 2;
                probabilities[edge.index()] = (scaled / block_count) as u32;
            }
        } else {
            // the block never ran, so distribute the probability evenly over the plausible
            // successors. fake and abnormal edges only get a share when nothing else leaves the
            // block, as behind a noreturn call.
            let complex = EdgeFlags::ABNORMAL | EdgeFlags::ABNORMAL_CALL | EdgeFlags::FAKE;
            let normal: Vec<EdgeIndex> = cfg
                .out_edges(node)
                .iter()
                .cloned()
                .filter(|&edge| !cfg.edge_flags(edge).intersects(complex))
                .collect();
            if !normal.is_empty() {
                for &edge in &normal {
                    probabilities[edge.index()] = BRANCH_PROB_BASE / normal.len() as u32;
                }
            } else {
                let all = cfg.out_edges(node);
                for &edge in all {
                    probabilities[edge.index()] = BRANCH_PROB_BASE / all.len() as u32;
                }
            }
        }
    }

    Ok(FlowSolution {
        block_counts,
        edge_counts,
        probabilities,
    })
}

/// Finds, in a parsed data file, the merged counter values of the function identified by `name`
/// and `checksum`.
///
/// Returns `None` when the data file has no matching function, which is normal for code that was
/// never linked into a profiled program. A function of the right name but a different checksum is
/// skipped with a warning: its counters belong to another revision of the code.
pub fn exec_counts(data: &CounterFile, name: Symbol, checksum: u32) -> Option<&[u64]> {
    let mut in_function = false;
    for record in &data.records {
        match *record {
            Record::Function(ref function) => {
                in_function = function.name == name && function.checksum == checksum;
                if function.name == name && function.checksum != checksum {
                    warn!("checksum of function {:?} does not match the data file, counters ignored", name);
                }
            },
            Record::Counts(ref counts) if in_function && counts.kind == CounterKind::Arcs => {
                return Some(&counts.counts);
            },
            _ => {},
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::{exec_counts, solve, BRANCH_PROB_BASE};
    use cfg::{Cfg, EdgeFlags};
    use error::ErrorKind;
    use instrument::Plan;
    use intern::Interner;
    use raw::*;

    #[test]
    fn test_linear_function() {
        let mut cfg = Cfg::new();
        let a = cfg.add_block(BlockAttr::empty());
        cfg.add_edge(cfg.entry(), a, EdgeFlags::empty());
        cfg.add_edge(a, cfg.exit(), EdgeFlags::empty());
        let plan = Plan::new(&cfg);
        assert_eq!(plan.n_slots(), 1);

        let solution = solve(&cfg, &plan, &[7]).unwrap();
        assert_eq!(solution.block_counts, vec![7, 7, 7]);
        assert_eq!(solution.edge_counts, vec![7, 7]);
        assert_eq!(solution.probabilities, vec![BRANCH_PROB_BASE, BRANCH_PROB_BASE]);
    }

    #[test]
    fn test_diamond_recovers_tree_edges() {
        // entry -> a -> {b, c} -> d -> exit; only b->d and c->d carry counters.
        let mut cfg = Cfg::new();
        let a = cfg.add_block(BlockAttr::empty());
        let b = cfg.add_block(BlockAttr::empty());
        let c = cfg.add_block(BlockAttr::empty());
        let d = cfg.add_block(BlockAttr::empty());
        let entry_a = cfg.add_edge(cfg.entry(), a, EdgeFlags::empty());
        let ab = cfg.add_edge(a, b, EdgeFlags::empty());
        let ac = cfg.add_edge(a, c, EdgeFlags::empty());
        let bd = cfg.add_edge(b, d, EdgeFlags::empty());
        let cd = cfg.add_edge(c, d, EdgeFlags::empty());
        let d_exit = cfg.add_edge(d, cfg.exit(), EdgeFlags::empty());
        let plan = Plan::new(&cfg);
        assert_eq!(plan.instrumented_edges(), &[bd, cd]);

        let solution = solve(&cfg, &plan, &[3, 4]).unwrap();
        assert_eq!(solution.block_counts[a.index()], 7);
        assert_eq!(solution.block_counts[b.index()], 3);
        assert_eq!(solution.block_counts[c.index()], 4);
        assert_eq!(solution.block_counts[d.index()], 7);
        assert_eq!(solution.edge_counts[entry_a.index()], 7);
        assert_eq!(solution.edge_counts[ab.index()], 3);
        assert_eq!(solution.edge_counts[ac.index()], 4);
        assert_eq!(solution.edge_counts[d_exit.index()], 7);
        // probabilities of a's two branches round to a full base together.
        let taken_b = solution.probabilities[ab.index()];
        let taken_c = solution.probabilities[ac.index()];
        assert_eq!(taken_b + taken_c, BRANCH_PROB_BASE);
        assert!(taken_b < taken_c);
    }

    #[test]
    fn test_zero_profile_distributes_probabilities() {
        let mut cfg = Cfg::new();
        let a = cfg.add_block(BlockAttr::empty());
        let b = cfg.add_block(BlockAttr::empty());
        let c = cfg.add_block(BlockAttr::empty());
        cfg.add_edge(cfg.entry(), a, EdgeFlags::empty());
        let ab = cfg.add_edge(a, b, EdgeFlags::empty());
        let ac = cfg.add_edge(a, c, EdgeFlags::empty());
        cfg.add_edge(b, cfg.exit(), EdgeFlags::empty());
        cfg.add_edge(c, cfg.exit(), EdgeFlags::empty());
        let plan = Plan::new(&cfg);

        let solution = solve(&cfg, &plan, &vec![0; plan.n_slots()]).unwrap();
        assert!(solution.block_counts.iter().all(|&count| count == 0));
        assert_eq!(solution.probabilities[ab.index()], BRANCH_PROB_BASE / 2);
        assert_eq!(solution.probabilities[ac.index()], BRANCH_PROB_BASE / 2);
    }

    #[test]
    fn test_fake_edge_gets_no_share_of_zero_profile() {
        let mut cfg = Cfg::new();
        let a = cfg.add_block(BlockAttr::CALL_SITE);
        cfg.add_edge(cfg.entry(), a, EdgeFlags::empty());
        let a_exit = cfg.add_edge(a, cfg.exit(), EdgeFlags::empty());
        let a_exit_fake = cfg.add_edge(a, cfg.exit(), EdgeFlags::FAKE);
        let plan = Plan::new(&cfg);

        let solution = solve(&cfg, &plan, &vec![0; plan.n_slots()]).unwrap();
        assert_eq!(solution.probabilities[a_exit.index()], BRANCH_PROB_BASE);
        assert_eq!(solution.probabilities[a_exit_fake.index()], 0);
    }

    #[test]
    fn test_wrong_count_length() {
        let mut cfg = Cfg::new();
        let a = cfg.add_block(BlockAttr::empty());
        cfg.add_edge(cfg.entry(), a, EdgeFlags::empty());
        cfg.add_edge(a, cfg.exit(), EdgeFlags::empty());
        let plan = Plan::new(&cfg);

        match solve(&cfg, &plan, &[1, 2]) {
            Err(ref e) => match *e.kind() {
                ErrorKind::CountsMismatch("arc", Type::Data, 1, 2) => {},
                ref k => panic!("unexpected error {:?}", k),
            },
            Ok(_) => panic!("length mismatch accepted"),
        }
    }

    #[test]
    fn test_call_block_absorbs_fork_counts() {
        // a calls fork(): the child's extra returns push a->b beyond a's own count, and the
        // balance shows up as a negative count on a -> c.
        let mut cfg = Cfg::new();
        let a = cfg.add_block(BlockAttr::CALL_SITE);
        let b = cfg.add_block(BlockAttr::empty());
        let c = cfg.add_block(BlockAttr::empty());
        let entry_a = cfg.add_edge(cfg.entry(), a, EdgeFlags::empty());
        let ab = cfg.add_edge(a, b, EdgeFlags::empty());
        let ac = cfg.add_edge(a, c, EdgeFlags::empty());
        let b_exit = cfg.add_edge(b, cfg.exit(), EdgeFlags::empty());
        let c_exit = cfg.add_edge(c, cfg.exit(), EdgeFlags::empty());
        let plan = Plan::new(&cfg);
        assert_eq!(plan.instrumented_edges(), &[ab, ac]);

        // -2 stored by the runtime wraps around to a huge unsigned value.
        let minus_two = (-2i64) as u64;
        let solution = solve(&cfg, &plan, &[9, minus_two]).unwrap();
        assert_eq!(solution.block_counts[a.index()], 7);
        assert_eq!(solution.block_counts[b.index()], 9);
        // c's negative count is clamped.
        assert_eq!(solution.block_counts[c.index()], 0);
        // the overshooting call edge is absorbed into a's count.
        assert_eq!(solution.edge_counts[ab.index()], 7);
        // the negative edge out of a non-call block is clamped to half the block count.
        assert_eq!(solution.edge_counts[ac.index()], 3);
        assert_eq!(solution.edge_counts[c_exit.index()], 0);
        assert_eq!(solution.edge_counts[entry_a.index()], 7);
        assert_eq!(solution.edge_counts[b_exit.index()], 9);
    }

    #[test]
    fn test_exec_counts_lookup() {
        let mut interner = Interner::new();
        let main = interner.intern("main".to_owned().into_boxed_str());
        let helper = interner.intern("helper".to_owned().into_boxed_str());
        let data = CounterFile {
            ty: Type::Data,
            version: CURRENT_VERSION,
            records: vec![
                Record::Function(Function {
                    name: main,
                    checksum: 10,
                    source: None,
                }),
                Record::Counts(Counts {
                    kind: CounterKind::Arcs,
                    counts: vec![1, 2, 3],
                }),
                Record::Function(Function {
                    name: helper,
                    checksum: 20,
                    source: None,
                }),
                Record::Counts(Counts {
                    kind: CounterKind::Arcs,
                    counts: vec![4],
                }),
            ],
        };

        assert_eq!(exec_counts(&data, main, 10), Some(&[1, 2, 3][..]));
        assert_eq!(exec_counts(&data, helper, 20), Some(&[4][..]));
        // a stale checksum must not resolve to the other revision's counters.
        assert_eq!(exec_counts(&data, main, 11), None);
        assert_eq!(exec_counts(&data, interner.intern("absent".to_owned().into_boxed_str()), 0), None);
    }
}
