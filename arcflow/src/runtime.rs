//! In-process execution counters and the flushing runtime.
//!
//! An instrumented program keeps one [`CounterSet`] per object file, holding a block of atomic
//! counters for every profiled function. The increments attached by
//! [`Plan::instrument`](../instrument/struct.Plan.html#method.instrument) bump these counters as
//! the program runs. A [`Registry`] collects all sets of the program and, on
//! [`flush`](struct.Registry.html#method.flush), folds their values into the data files on disk.
//!
//! Flushing never overwrites: each data file is locked, parsed, merged with the in-memory values
//! and rewritten, so profiles accumulate across runs and across concurrently exiting processes.
//! A file that cannot be merged, because it is corrupt or belongs to a different build, is left
//! exactly as it was and the set is taken out of service for the rest of the process.
//!
//! The counters are safe to bump from any thread. The [`Registry`] itself is not synchronized;
//! wrap it in a lock if several threads may register or flush.
//!
//! [`CounterSet`]: struct.CounterSet.html
//! [`Registry`]: struct.Registry.html

use error::{ErrorKind, Result};
use intern::Interner;
use raw::{CounterFile, CounterKind, Counts, Function, Record, Summary, Type, CURRENT_VERSION};
use reader::Reader;
use writer::Writer;

use fs2::FileExt;

use std::cmp::max;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

//----------------------------------------------------------------------------------------------------------------------
//{{{ FunctionCounters & CounterSet

/// The live counters of one instrumented function.
pub struct FunctionCounters {
    /// Name of the function, as spelled in its graph file.
    pub name: String,
    /// Checksum tying the counters to one revision of the function's flow graph.
    pub checksum: u32,
    counts: Box<[AtomicU64]>,
}

impl FunctionCounters {
    /// Creates the counters of one function, all zero, with one slot per counted edge.
    pub fn new(name: &str, checksum: u32, slots: usize) -> FunctionCounters {
        FunctionCounters {
            name: name.to_owned(),
            checksum,
            counts: (0..slots).map(|_| AtomicU64::new(0)).collect::<Vec<_>>().into_boxed_slice(),
        }
    }

    /// Bumps one counter. This is the operation the instrumented code runs on every counted edge,
    /// so it is a single relaxed atomic add.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is not below the slot count the counters were created with.
    pub fn increment(&self, slot: usize) {
        self.counts[slot].fetch_add(1, Ordering::Relaxed);
    }

    /// Reads one counter.
    pub fn count(&self, slot: usize) -> u64 {
        self.counts[slot].load(Ordering::Relaxed)
    }

    /// Number of counter slots.
    pub fn n_counters(&self) -> usize {
        self.counts.len()
    }

    fn snapshot(&self) -> Vec<u64> {
        self.counts.iter().map(|count| count.load(Ordering::Relaxed)).collect()
    }

    fn reset(&self) {
        for count in self.counts.iter() {
            count.store(0, Ordering::Relaxed);
        }
    }
}

/// The counters of all functions sharing one data file, usually one object file's worth.
///
/// The function order fixes the record order in the data file, so it must not change between runs
/// of the same build.
pub struct CounterSet {
    /// Path of the data file the counters merge into.
    pub filename: PathBuf,
    /// Per-function counters, in the order their records appear on disk.
    pub functions: Vec<FunctionCounters>,
}

impl CounterSet {
    fn reset(&self) {
        for function in &self.functions {
            function.reset();
        }
    }
}

//}}}
//----------------------------------------------------------------------------------------------------------------------
//{{{ Registry

struct RegisteredSet {
    set: Arc<CounterSet>,
    dead: bool,
}

/// All counter sets of one program, and the machinery to flush them.
pub struct Registry {
    interner: Interner,
    sets: Vec<RegisteredSet>,
    crc32: u32,
}

impl Registry {
    pub fn new() -> Registry {
        Registry {
            interner: Interner::new(),
            sets: Vec::new(),
            crc32: 0,
        }
    }

    /// Adds one counter set to the program.
    ///
    /// Registration order matters twice: it fixes the program checksum, and it is the order the
    /// sets are flushed in.
    pub fn register(&mut self, set: Arc<CounterSet>) {
        self.crc32 = crc32_extend(self.crc32, set.filename.to_string_lossy().as_bytes());
        trace!("registered counter set {:?}, program checksum {:08x}", set.filename, self.crc32);
        self.sets.push(RegisteredSet { set, dead: false });
    }

    /// The checksum identifying this program in the shared data files.
    ///
    /// Two programs built from the same objects produce the same checksum, so their runs merge
    /// into one program summary; any other program linking a subset of the objects gets its own.
    pub fn program_checksum(&self) -> u32 {
        self.crc32
    }

    /// Number of sets taken out of service by a failed flush.
    pub fn dead_sets(&self) -> usize {
        self.sets.iter().filter(|entry| entry.dead).count()
    }

    /// Merges every live counter set into its data file and resets the counters.
    ///
    /// Failures are not fatal to the program being profiled: a set whose file cannot be opened,
    /// parsed or merged is logged, left untouched on disk and skipped on later flushes. Call this
    /// once at program exit, or earlier to checkpoint long-running processes.
    pub fn flush(&mut self) {
        let Registry { ref mut interner, ref mut sets, crc32 } = *self;

        // totals of this invocation over the whole program, shared by every program summary.
        let mut program = RunTotals::default();
        for entry in sets.iter().filter(|entry| !entry.dead) {
            for function in &entry.set.functions {
                program.absorb(&function.snapshot());
            }
        }
        debug!("flushing {} counter sets, {} counters, program checksum {:08x}", sets.len(), program.num, crc32);

        let mut runs = None;
        for entry in sets.iter_mut() {
            if entry.dead {
                continue;
            }
            match flush_set(interner, &entry.set, &program, crc32) {
                Ok(merged_runs) => match runs {
                    None => runs = Some(merged_runs),
                    Some(first) => if first != merged_runs {
                        warn!("invocation mismatch, some data files may have been removed");
                    },
                },
                Err(e) => {
                    warn!("cannot flush counters to `{}`: {}", entry.set.filename.display(), e);
                    for cause in e.iter().skip(1) {
                        warn!("  caused by: {}", cause);
                    }
                    entry.dead = true;
                },
            }
        }

        for entry in sets.iter() {
            entry.set.reset();
        }
    }
}

impl Default for Registry {
    fn default() -> Registry {
        Registry::new()
    }
}

/// Locks one data file, merges one set's counters into it and rewrites it in place.
///
/// Returns the number of runs recorded for this program after the merge. The file is only
/// touched after the whole merge succeeded, so any error leaves it as found.
fn flush_set(interner: &mut Interner, set: &CounterSet, program: &RunTotals, program_checksum: u32) -> Result<u32> {
    let file = OpenOptions::new().read(true).write(true).create(true).open(&set.filename)?;
    file.lock_exclusive()?;

    let had_content = file.metadata()?.len() != 0;
    let disk = if had_content {
        let parsed = Reader::new(BufReader::new(&file), interner)?.parse()?;
        ensure!(parsed.ty == Type::Data, ErrorKind::UnknownFileType(parsed.ty.magic()));
        parsed.records
    } else {
        Vec::new()
    };
    let (records, runs) = merge(interner, disk, had_content, set, program, program_checksum)?;

    file.set_len(0)?;
    (&file).seek(SeekFrom::Start(0))?;
    {
        let mut buffer = BufWriter::new(&file);
        Writer::new(&mut buffer, interner).write_file(&CounterFile {
            ty: Type::Data,
            version: CURRENT_VERSION,
            records,
        })?;
        buffer.flush()?;
    }
    file.unlock()?;
    Ok(runs)
}

//}}}
//----------------------------------------------------------------------------------------------------------------------
//{{{ Merging

/// Totals of one invocation, feeding [`Summary::add_run`](../raw/struct.Summary.html#method.add_run).
#[derive(Debug, Default)]
struct RunTotals {
    num: u32,
    sum: u64,
    max: u64,
}

impl RunTotals {
    fn absorb(&mut self, counts: &[u64]) {
        self.num += counts.len() as u32;
        for &count in counts {
            self.sum += count;
            self.max = max(self.max, count);
        }
    }
}

/// Folds one set's counters into the records parsed from its data file.
///
/// `disk` is empty for a freshly created file; `had_content` tells the two cases apart, because
/// for an existing file the functions on disk must match the set exactly. Returns the rewritten
/// records in canonical order, and the run count of this program's summary after the merge.
fn merge(
    interner: &mut Interner,
    disk: Vec<Record>,
    had_content: bool,
    set: &CounterSet,
    program: &RunTotals,
    program_checksum: u32,
) -> Result<(Vec<Record>, u32)> {
    let snapshots = set.functions.iter().map(FunctionCounters::snapshot).collect::<Vec<_>>();
    let mut object = RunTotals::default();
    for snapshot in &snapshots {
        object.absorb(snapshot);
    }

    // index the disk records; a data file is flat, so a small state machine suffices.
    let mut disk_functions = HashMap::with_capacity(set.functions.len());
    let mut object_summary = Summary::default();
    let mut program_summaries = Vec::new();
    let mut current = None;
    for record in disk {
        match record {
            Record::Function(function) => {
                current = Some(function.name);
                if disk_functions.insert(function.name, (function.checksum, Vec::new())).is_some() {
                    bail!(ErrorKind::FunctionMismatch(interner[function.name].to_owned()));
                }
            },
            Record::Counts(counts) => {
                let name = current.ok_or(ErrorKind::RecordWithoutFunction)?;
                let entry = disk_functions.get_mut(&name).expect("current function just indexed");
                entry.1.extend(counts.counts);
            },
            Record::ObjectSummary(summary) => object_summary = summary,
            Record::ProgramSummary(summary) => program_summaries.push(summary),
            record => bail!(ErrorKind::UnexpectedRecord(record.tag())),
        }
    }

    let mut records = Vec::with_capacity(2 * set.functions.len() + 2 + program_summaries.len());
    for (function, snapshot) in set.functions.iter().zip(&snapshots) {
        let name = interner.intern(function.name.as_str().into());
        let mut counts = snapshot.clone();
        match disk_functions.remove(&name) {
            Some((checksum, disk_counts)) => {
                ensure!(
                    checksum == function.checksum,
                    ErrorKind::ChecksumMismatch("function", function.name.clone())
                );
                ensure!(
                    disk_counts.len() == counts.len(),
                    ErrorKind::CountsMismatch("arc", Type::Data, counts.len(), disk_counts.len())
                );
                for (count, disk_count) in counts.iter_mut().zip(disk_counts) {
                    *count += disk_count;
                }
            },
            None => ensure!(!had_content, ErrorKind::FunctionMismatch(function.name.clone())),
        }
        records.push(Record::Function(Function {
            name,
            checksum: function.checksum,
            source: None,
        }));
        records.push(Record::Counts(Counts {
            kind: CounterKind::Arcs,
            counts,
        }));
    }
    if let Some(&name) = disk_functions.keys().next() {
        bail!(ErrorKind::FunctionMismatch(interner[name].to_owned()));
    }

    object_summary.add_run(object.num, object.sum, object.max);
    records.push(Record::ObjectSummary(object_summary));

    // our program summary is updated in place; summaries of other programs sharing the file pass
    // through untouched.
    let runs = match program_summaries.iter().position(|summary| summary.checksum == program_checksum) {
        Some(index) => {
            let summary = &mut program_summaries[index];
            summary.add_run(program.num, program.sum, program.max);
            summary.runs
        },
        None => {
            let mut summary = Summary {
                checksum: program_checksum,
                ..Summary::default()
            };
            summary.add_run(program.num, program.sum, program.max);
            let runs = summary.runs;
            program_summaries.push(summary);
            runs
        },
    };
    records.extend(program_summaries.into_iter().map(Record::ProgramSummary));

    Ok((records, runs))
}

//}}}
//----------------------------------------------------------------------------------------------------------------------
//{{{ Checksum

/// Extends the program checksum with one more filename.
///
/// A plain CRC-32 (polynomial 0x04c11db7, most significant bit first) over the filename bytes and
/// one trailing NUL, so the identity is stable across runs and does not collide when one filename
/// is a prefix of the next.
fn crc32_extend(mut crc32: u32, bytes: &[u8]) -> u32 {
    for &byte in bytes.iter().chain(Some(&0)) {
        let mut value = u32::from(byte) << 24;
        for _ in 0..8 {
            let feedback = if (value ^ crc32) & 0x8000_0000 != 0 { 0x04c1_1db7 } else { 0 };
            crc32 = (crc32 << 1) ^ feedback;
            value <<= 1;
        }
    }
    crc32
}

//}}}
