//! Rendering of parsed graph and data files.
//!
//! Every output line is prefixed with the name of the dumped file, so the dumps of several files
//! can be concatenated or piped through `grep` and the lines stay attributable. Records are
//! indented by their nesting level, which is recovered from the tag numbering scheme alone; a
//! record whose tag contradicts the records around it is pointed out but still printed.

use error::Result;

use arcflow::Interner;
use arcflow::raw::{ArcAttr, Arcs, Blocks, CounterFile, Counts, CURRENT_VERSION, EOF_TAG, Function, Record, Summary, Tag, Type};

use std::io::{self, Write};
use std::path::Path;

/// Opens, parses and prints one file to the standard output.
///
/// Each file gets a fresh [`Interner`]; nothing is shared between files.
///
/// # Errors
///
/// Returns the parse error of a file which is not in the graph/data format, or any I/O error.
///
/// [`Interner`]: ../../arcflow/intern/struct.Interner.html
pub fn dump_path(path: &Path, long: bool) -> Result<()> {
    let mut interner = Interner::new();
    let file = CounterFile::open(path, &mut interner)?;
    let filename = path.display().to_string();
    let stdout = io::stdout();
    write_dump(&mut stdout.lock(), &filename, &file, &interner, long)
}

/// Prints the dump of one parsed file to `out`.
fn write_dump<W: Write>(out: &mut W, filename: &str, file: &CounterFile, interner: &Interner, long: bool) -> Result<()> {
    let kind = match file.ty {
        Type::Graph => "graph",
        Type::Data => "data",
    };
    writeln!(out, "{}:{}:magic `{}':version `{}'", filename, kind, file.ty, file.version)?;
    if file.version != CURRENT_VERSION {
        writeln!(out, "{}:warning:current version is `{}'", filename, CURRENT_VERSION)?;
    }

    // the innermost tag seen at each nesting level, for the placement check below.
    let mut depth = 0;
    let mut enclosing = [EOF_TAG; 4];
    for record in &file.records {
        let tag = record.tag();
        let (tag_depth, well_formed) = nesting_depth(tag);
        if !well_formed {
            writeln!(out, "{}:tag `{:08x}' is invalid", filename, tag)?;
        }
        if depth != 0 && depth < tag_depth && !tag.is_subtag_of(enclosing[depth - 1]) {
            writeln!(out, "{}:tag `{:08x}' is incorrectly placed", filename, tag)?;
        }
        depth = tag_depth;
        enclosing[depth - 1] = tag;

        write!(
            out,
            "{}:{:indent$}{:08x}:{:4}:{}",
            filename,
            "",
            tag,
            record.length(interner),
            record_name(record),
            indent = depth * 2
        )?;
        match *record {
            Record::Function(ref function) => write_function(out, function, interner)?,
            Record::Blocks(ref blocks) => write_blocks(out, filename, blocks, long)?,
            Record::Arcs(ref arcs) => write_arcs(out, filename, arcs, long)?,
            Record::Counts(ref counts) => write_counts(out, filename, counts, long)?,
            Record::ObjectSummary(ref summary) | Record::ProgramSummary(ref summary) => write_summary(out, filename, summary)?,
            Record::Unknown(_) => {},
        }
        writeln!(out)?;
    }
    Ok(())
}

/// The nesting level a tag claims through the numbering scheme, from 1 (top level) to 4, and
/// whether the claim is well-formed. A tag which clears a partial byte fits no level.
fn nesting_depth(tag: Tag) -> (usize, bool) {
    let mut mask = tag.mask() >> 1;
    let mut depth = 4;
    while mask != 0 {
        if mask & 0xff != 0xff {
            return (depth, false);
        }
        depth -= 1;
        mask >>= 8;
    }
    (depth, true)
}

fn record_name(record: &Record) -> &'static str {
    match *record {
        Record::Function(_) => "FUNCTION",
        Record::Blocks(_) => "BLOCKS",
        Record::Arcs(_) => "ARCS",
        Record::Counts(_) => "COUNTERS",
        Record::ObjectSummary(_) => "OBJECT_SUMMARY",
        Record::ProgramSummary(_) => "PROGRAM_SUMMARY",
        Record::Unknown(_) => "UNKNOWN",
    }
}

fn write_function<W: Write>(out: &mut W, function: &Function, interner: &Interner) -> Result<()> {
    write!(out, " `{}', checksum=0x{:08x}", &interner[function.name], function.checksum)?;
    if let Some(ref source) = function.source {
        write!(out, ", {}:{}", &interner[source.filename], source.line)?;
    }
    Ok(())
}

fn write_blocks<W: Write>(out: &mut W, filename: &str, blocks: &Blocks, long: bool) -> Result<()> {
    write!(out, " {} blocks", blocks.flags.len())?;
    if long {
        for (i, flags) in blocks.flags.iter().enumerate() {
            if i % 8 == 0 {
                write!(out, "\n{}:\t\t{}", filename, i)?;
            }
            write!(out, " {:04x}", flags.bits())?;
        }
    }
    Ok(())
}

fn write_arcs<W: Write>(out: &mut W, filename: &str, arcs: &Arcs, long: bool) -> Result<()> {
    write!(out, " {} arcs", arcs.arcs.len())?;
    if long {
        for (i, arc) in arcs.arcs.iter().enumerate() {
            if i % 4 == 0 {
                write!(out, "\n{}:\tblock {}:", filename, arcs.src_block)?;
            }
            write!(out, " {}", arc.dest_block)?;
            write_arc_attrs(out, arc.flags)?;
        }
    }
    Ok(())
}

/// Prints the attribute list of an arc, e.g. `(tree,fall)`. Unflagged arcs print nothing.
fn write_arc_attrs<W: Write>(out: &mut W, flags: ArcAttr) -> Result<()> {
    if flags.is_empty() {
        return Ok(());
    }
    let mut sep = '(';
    for &(attr, name) in &[(ArcAttr::ON_TREE, "tree"), (ArcAttr::FAKE, "fake"), (ArcAttr::FALLTHROUGH, "fall")] {
        if flags.contains(attr) {
            write!(out, "{}{}", sep, name)?;
            sep = ',';
        }
    }
    write!(out, ")")?;
    Ok(())
}

fn write_counts<W: Write>(out: &mut W, filename: &str, counts: &Counts, long: bool) -> Result<()> {
    write!(out, " {} {} counts", counts.kind.name(), counts.counts.len())?;
    if long {
        for (i, count) in counts.counts.iter().enumerate() {
            if i % 4 == 0 {
                write!(out, "\n{}:\t\t{}", filename, i)?;
            }
            write!(out, " {}", count)?;
        }
    }
    Ok(())
}

fn write_summary<W: Write>(out: &mut W, filename: &str, summary: &Summary) -> Result<()> {
    write!(out, " checksum=0x{:08x}", summary.checksum)?;
    write!(
        out,
        "\n{}:\t\tcounts={}, runs={}, sum_all={}, run_max={}, sum_max={}",
        filename, summary.num, summary.runs, summary.sum, summary.max, summary.sum_max
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::write_dump;

    use arcflow::Interner;
    use arcflow::raw::{Arc, ArcAttr, Arcs, BlockAttr, BlockIndex, Blocks, CounterFile, CounterKind, Counts, CURRENT_VERSION, Function, Record, Source, Summary, Tag, Type, UnknownRecord, Version};

    fn render(filename: &str, file: &CounterFile, interner: &Interner, long: bool) -> String {
        let mut buffer = Vec::new();
        write_dump(&mut buffer, filename, file, interner, long).unwrap();
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn test_dump_graph_file() {
        let mut interner = Interner::new();
        let name = interner.intern("divide".to_owned().into_boxed_str());
        let filename = interner.intern("src/lib.rs".to_owned().into_boxed_str());
        let file = CounterFile {
            ty: Type::Graph,
            version: CURRENT_VERSION,
            records: vec![
                Record::Function(Function {
                    name,
                    checksum: 0xc0de,
                    source: Some(Source {
                        filename,
                        line: 7,
                    }),
                }),
                Record::Blocks(Blocks {
                    flags: vec![BlockAttr::default(), BlockAttr::default(), BlockAttr::CALL_SITE],
                }),
                Record::Arcs(Arcs {
                    src_block: BlockIndex(0),
                    arcs: vec![
                        Arc {
                            dest_block: BlockIndex(2),
                            flags: ArcAttr::ON_TREE | ArcAttr::FALLTHROUGH,
                        },
                        Arc {
                            dest_block: BlockIndex(1),
                            flags: ArcAttr::FAKE,
                        },
                    ],
                }),
            ],
        };

        assert_eq!(
            render("a.afgr", &file, &interner, true),
            "a.afgr:graph:magic `afgr':version `010*'\n\
             a.afgr:  01000000:  36:FUNCTION `divide', checksum=0x0000c0de, src/lib.rs:7\n\
             a.afgr:    01410000:  12:BLOCKS 3 blocks\n\
             a.afgr:\t\t0 0000 0000 0001\n\
             a.afgr:    01430000:  20:ARCS 2 arcs\n\
             a.afgr:\tblock 0: 2(tree,fall) 1(fake)\n"
        );
    }

    #[test]
    fn test_dump_data_file() {
        let mut interner = Interner::new();
        let name = interner.intern("divide".to_owned().into_boxed_str());
        let file = CounterFile {
            ty: Type::Data,
            version: Version::try_from(0x30_30_39_2a).unwrap(), // "009*"
            records: vec![
                Record::Function(Function {
                    name,
                    checksum: 0xc0de,
                    source: None,
                }),
                Record::Counts(Counts {
                    kind: CounterKind::Arcs,
                    counts: vec![3, 5, 0, 0, 8],
                }),
                Record::ObjectSummary(Summary {
                    checksum: 0,
                    num: 5,
                    runs: 2,
                    sum: 16,
                    max: 8,
                    sum_max: 13,
                }),
            ],
        };

        assert_eq!(
            render("a.afda", &file, &interner, true),
            "a.afda:data:magic `afda':version `009*'\n\
             a.afda:warning:current version is `010*'\n\
             a.afda:  01000000:  16:FUNCTION `divide', checksum=0x0000c0de\n\
             a.afda:    01a10000:  40:COUNTERS arcs 5 counts\n\
             a.afda:\t\t0 3 5 0 0\n\
             a.afda:\t\t4 8\n\
             a.afda:  a1000000:  36:OBJECT_SUMMARY checksum=0x00000000\n\
             a.afda:\t\tcounts=5, runs=2, sum_all=16, run_max=8, sum_max=13\n"
        );
    }

    #[test]
    fn test_dump_flags_misplaced_records() {
        let mut interner = Interner::new();
        let name = interner.intern("f".to_owned().into_boxed_str());
        let file = CounterFile {
            ty: Type::Data,
            version: CURRENT_VERSION,
            records: vec![
                Record::Function(Function {
                    name,
                    checksum: 0,
                    source: None,
                }),
                Record::ObjectSummary(Summary::default()),
                // counters may nest under a function, not under a summary.
                Record::Counts(Counts {
                    kind: CounterKind::Arcs,
                    counts: vec![1],
                }),
                // 0x01_02_00_00 clears a partial byte, which no nesting level does.
                Record::Unknown(UnknownRecord {
                    tag: Tag(0x01_02_00_00),
                    payload: vec![0; 8],
                }),
            ],
        };

        assert_eq!(
            render("t.afda", &file, &interner, false),
            "t.afda:data:magic `afda':version `010*'\n\
             t.afda:  01000000:  12:FUNCTION `f', checksum=0x00000000\n\
             t.afda:  a1000000:  36:OBJECT_SUMMARY checksum=0x00000000\n\
             t.afda:\t\tcounts=0, runs=0, sum_all=0, run_max=0, sum_max=0\n\
             t.afda:tag `01a10000' is incorrectly placed\n\
             t.afda:    01a10000:   8:COUNTERS arcs 1 counts\n\
             t.afda:tag `01020000' is invalid\n\
             t.afda:    01020000:   8:UNKNOWN\n"
        );
    }
}
