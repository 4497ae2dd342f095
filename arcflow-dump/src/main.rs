//! `arcflow-dump` prints the contents of arcflow graph (`*.afgr`) and data (`*.afda`) files as
//! one annotated line per record, mainly for debugging programs which produce such files.

#![recursion_limit = "128"] // needed for error_chain.
#![allow(dangerous_implicit_autorefs)] // fired inside clap 2.x's crate_authors! expansion.

#[macro_use]
extern crate clap;
#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate log;
extern crate arcflow;
extern crate env_logger;
extern crate termcolor;

mod dump;
mod error;

use clap::ArgMatches;
use error::Error;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use std::io::{Result, Write};
use std::path::Path;
use std::process::exit;

/// Program entry. Dumps every file named on the command line, and exits with a failure status if
/// any of them could not be read.
fn main() {
    let matches = parse_args();
    env_logger::init();
    debug!("matches = {:?}", matches);

    let long = matches.is_present("long");
    let mut success = true;
    for filename in matches.values_of_os("FILE").expect("FILE is required") {
        if let Err(error) = dump::dump_path(Path::new(filename), long) {
            print_error(&error).expect("error while printing error 🤷");
            success = false;
        }
    }
    if !success {
        exit(1);
    }
}

/// Parses the command line arguments using `clap`.
fn parse_args() -> ArgMatches<'static> {
    clap_app!(arcflow_dump =>
        (bin_name: "arcflow-dump")
        (author: crate_authors!(", "))
        (about: crate_description!())
        (version: crate_version!())
        (@setting DeriveDisplayOrder)
        (@setting ArgRequiredElseHelp)
        (@arg long: -l --long "Dump the contents of each record, not only its headline")
        (@arg FILE: +required ... "Graph or data files to dump")
    ).get_matches()
}

/// Prints an error and the causes to `stderr`.
fn print_error(error: &Error) -> Result<()> {
    let stream = StandardStream::stderr(ColorChoice::Auto);
    let mut lock = stream.lock();

    for (i, e) in error.iter().enumerate() {
        if i == 0 {
            lock.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_intense(true).set_bold(true))?;
            write!(lock, "error: ")?;
        } else {
            lock.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true))?;
            write!(lock, "caused by: ")?;
        }
        lock.reset()?;
        writeln!(lock, "{}", e)?;
    }
    if let Some(backtrace) = error.backtrace() {
        writeln!(lock, "\n{:?}", backtrace)?;
    }
    Ok(())
}
