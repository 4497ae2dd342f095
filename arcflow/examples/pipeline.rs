//! End-to-end walkthrough: plan counters for a tiny function, simulate a few runs, flush the
//! profile to disk twice and recover every block and edge count from the merged data file.

#[macro_use]
extern crate error_chain;
extern crate arcflow;
extern crate env_logger;
extern crate tempdir;

use arcflow::cfg::EdgeFlags;
use arcflow::raw::{BlockAttr, CounterFile, Function, Source, Type, CURRENT_VERSION};
use arcflow::runtime::{CounterSet, FunctionCounters, Registry};
use arcflow::solve::{exec_counts, solve};
use arcflow::{Cfg, Interner, Plan, Result, Writer};
use tempdir::TempDir;

use std::fs::File;
use std::sync::Arc;

quick_main!(run);

fn run() -> Result<()> {
    env_logger::init();

    // the flow graph of: fn divide(a: u32, b: u32) -> u32 { if b == 0 { 0 } else { a / b } }
    let mut cfg = Cfg::new();
    let check = cfg.add_block(BlockAttr::empty());
    let zero = cfg.add_block(BlockAttr::empty());
    let div = cfg.add_block(BlockAttr::empty());
    let join = cfg.add_block(BlockAttr::empty());
    let entry_check = cfg.add_edge(cfg.entry(), check, EdgeFlags::empty());
    let check_zero = cfg.add_edge(check, zero, EdgeFlags::empty());
    let check_div = cfg.add_edge(check, div, EdgeFlags::FALLTHROUGH);
    let zero_join = cfg.add_edge(zero, join, EdgeFlags::empty());
    let div_join = cfg.add_edge(div, join, EdgeFlags::FALLTHROUGH);
    let join_exit = cfg.add_edge(join, cfg.exit(), EdgeFlags::FALLTHROUGH);

    let plan = Plan::new(&cfg);
    println!("{} of {} edges carry a counter", plan.n_slots(), cfg.edge_count());

    // write the graph file, as the build step of an instrumenting frontend would. a real
    // frontend derives the checksum by hashing the graph; a literal does fine here.
    let checksum = 0x0163_0005;
    let dir = TempDir::new("arcflow-pipeline")?;
    let mut interner = Interner::new();
    let name = interner.intern("divide".to_owned().into_boxed_str());
    let filename = interner.intern("divide.rs".to_owned().into_boxed_str());
    let graph_path = dir.path().join("divide.afgr");
    Writer::new(File::create(&graph_path)?, &interner).write_file(&CounterFile {
        ty: Type::Graph,
        version: CURRENT_VERSION,
        records: plan.graph_records(&cfg, Function {
            name,
            checksum,
            source: Some(Source { filename, line: 1 }),
        }),
    })?;
    println!("wrote flow graph to {}", graph_path.display());

    // the runtime side of the same build: one counter slot per counted edge.
    let set = Arc::new(CounterSet {
        filename: dir.path().join("divide.afda"),
        functions: vec![FunctionCounters::new("divide", checksum, plan.n_slots())],
    });
    let mut registry = Registry::new();
    registry.register(Arc::clone(&set));

    // simulate the instrumented program: walking a path bumps the counters of its counted
    // edges, exactly what the increments attached through `InstrumentSink` would do.
    let counters = &set.functions[0];
    let execute = |path: &[_], times: u64| for _ in 0..times {
        for &edge in path {
            if let Some(slot) = plan.slot(edge) {
                counters.increment(slot);
            }
        }
    };

    // first process: 2 divisions by zero, 5 ordinary ones.
    execute(&[entry_check, check_zero, zero_join, join_exit], 2);
    execute(&[entry_check, check_div, div_join, join_exit], 5);
    registry.flush();

    // second process, merging into the same data file.
    execute(&[entry_check, check_div, div_join, join_exit], 3);
    registry.flush();

    // offline analysis: load the merged profile and put the counts back on the graph.
    let data = CounterFile::open(&set.filename, &mut interner)?;
    let counts = exec_counts(&data, name, checksum).expect("function missing from profile");
    let solution = solve(&cfg, &plan, counts)?;

    println!("function ran {} times in total", solution.block_counts[cfg.entry().index()]);
    for (index, count) in solution.block_counts.iter().enumerate() {
        println!("block {:2}: {:6} runs", index, count);
    }
    for &(label, edge) in &[("b == 0", check_zero), ("b != 0", check_div)] {
        let probability = solution.probabilities[edge.index()];
        println!(
            "{} branch taken {} times ({}.{:02}%)",
            label,
            solution.edge_counts[edge.index()],
            probability / 100,
            probability % 100,
        );
    }
    Ok(())
}
