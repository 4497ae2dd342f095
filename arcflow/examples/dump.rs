//! Prints a graph or data file as JSON.

#[macro_use]
extern crate error_chain;
extern crate arcflow;
extern crate env_logger;
extern crate serde_json;

use arcflow::{CounterFile, Interner, Result};

use std::env;
use std::io::stdout;

quick_main!(run);

fn run() -> Result<()> {
    env_logger::init();

    let filename = env::args_os().nth(1).expect("filename");
    let mut interner = Interner::new();
    let parsed = CounterFile::open(filename, &mut interner)?;
    serde_json::to_writer_pretty(stdout(), &interner.with(&parsed))?;
    Ok(())
}
