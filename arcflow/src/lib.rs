#![recursion_limit="128"] // needed for error_chain.

#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate log;
#[cfg(feature = "serde")]
#[macro_use]
extern crate serde;
#[cfg(feature = "serde_json")]
extern crate serde_json;
extern crate byteorder;
extern crate petgraph;
extern crate fixedbitset;
extern crate fs2;
extern crate num_traits; // required for shawshank
extern crate shawshank;

#[cfg(test)]
extern crate tempdir;

#[macro_use]
pub mod intern;
mod utils;
pub mod error;
pub mod raw;
pub mod reader;
pub mod writer;
pub mod cfg;
pub mod spanning;
pub mod instrument;
pub mod solve;
pub mod runtime;

pub use cfg::Cfg;
pub use error::{ErrorKind, Result};
pub use instrument::Plan;
pub use intern::{Interner, Symbol};
pub use raw::CounterFile;
pub use reader::Reader;
pub use runtime::{CounterSet, FunctionCounters, Registry};
pub use solve::{solve, FlowSolution};
pub use writer::Writer;
