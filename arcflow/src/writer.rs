//! Writer of [`CounterFile`] format.
//!
//! The writer is the inverse of the [`reader`]: serializing a parsed file and parsing it back
//! yields the same records. Output is always in native little-endian convention; the
//! byte-swapping support of the reader exists only to accept files from foreign machines.
//!
//! [`CounterFile`]: ../raw/struct.CounterFile.html
//! [`reader`]: ../reader/index.html

use error::Result;
use intern::{Interner, Symbol, UNKNOWN_SYMBOL};
use raw::*;
use utils::round_up_4;

use byteorder::{LittleEndian, WriteBytesExt};

use std::io::Write;

/// The writer of a graph or data file.
///
/// # Examples
///
/// ```rust
/// use arcflow::raw::{CURRENT_VERSION, CounterKind, Counts, Record, Type};
/// use arcflow::writer::Writer;
/// use arcflow::Interner;
/// # use arcflow::Result;
///
/// # fn main() { run().unwrap(); }
/// # fn run() -> Result<()> {
/// let interner = Interner::new();
/// let mut buffer = Vec::new();
/// {
///     let mut writer = Writer::new(&mut buffer, &interner);
///     writer.write_header(Type::Data, CURRENT_VERSION)?;
///     writer.write_record(&Record::Counts(Counts {
///         kind: CounterKind::Arcs,
///         counts: vec![5, 0, 7],
///     }))?;
/// }
/// // 8 bytes of header, 8 bytes of record header, 24 bytes of counters.
/// assert_eq!(buffer.len(), 40);
/// # Ok(()) }
/// ```
#[derive(Debug)]
pub struct Writer<'si, W> {
    writer: W,
    interner: &'si Interner,
}

impl<'si, W: Write> Writer<'si, W> {
    /// Creates a new writer.
    ///
    /// The interner must be the one the records' symbols were interned into.
    pub fn new(writer: W, interner: &'si Interner) -> Writer<'si, W> {
        Writer { writer, interner }
    }

    /// Writes a 32-bit number.
    fn write_32(&mut self, value: u32) -> Result<()> {
        self.writer.write_u32::<LittleEndian>(value)?;
        Ok(())
    }

    /// Writes a 64-bit number, low half first.
    fn write_64(&mut self, value: u64) -> Result<()> {
        self.writer.write_u64::<LittleEndian>(value)?;
        Ok(())
    }

    /// Writes a length-prefixed string, padded with zero bytes to a 4-byte boundary.
    ///
    /// [`UNKNOWN_SYMBOL`] is written as the null string, a single zero length word.
    ///
    /// [`UNKNOWN_SYMBOL`]: ../intern/constant.UNKNOWN_SYMBOL.html
    fn write_string(&mut self, symbol: Symbol) -> Result<()> {
        if symbol == UNKNOWN_SYMBOL {
            return self.write_32(0);
        }
        let string = &self.interner[symbol];
        let length = string.len() as u32;
        self.write_32(length)?;
        self.writer.write_all(string.as_bytes())?;
        let padding = (round_up_4(length) - length) as usize;
        self.writer.write_all(&[0u8; 3][..padding])?;
        Ok(())
    }

    /// Writes the file header.
    ///
    /// # Errors
    ///
    /// Returns [`Io`] on I/O failure.
    ///
    /// [`Io`]: ../error/enum.ErrorKind.html#variant.Io
    pub fn write_header(&mut self, ty: Type, version: Version) -> Result<()> {
        trace!("write-header: {} {}", ty, version);
        self.write_32(ty.magic())?;
        self.write_32(version.raw())?;
        Ok(())
    }

    /// Writes a single record, including its tag and length header.
    ///
    /// # Errors
    ///
    /// Returns [`Io`] on I/O failure.
    ///
    /// [`Io`]: ../error/enum.ErrorKind.html#variant.Io
    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        let tag = record.tag();
        let length = record.length(self.interner);
        trace!("write-record: tag = {0}, length = {1} (0x{1:x})", tag, length);
        self.write_32(tag.0)?;
        self.write_32(length)?;
        match *record {
            Record::Function(ref function) => {
                self.write_string(function.name)?;
                self.write_32(function.checksum)?;
                if let Some(ref source) = function.source {
                    self.write_string(source.filename)?;
                    self.write_32(source.line)?;
                }
            },
            Record::Blocks(ref blocks) => for flags in &blocks.flags {
                self.write_32(u32::from(flags.bits()))?;
            },
            Record::Arcs(ref arcs) => {
                self.write_32(arcs.src_block.0)?;
                for arc in &arcs.arcs {
                    self.write_32(arc.dest_block.0)?;
                    self.write_32(u32::from(arc.flags.bits()))?;
                }
            },
            Record::Counts(ref counts) => for &count in &counts.counts {
                self.write_64(count)?;
            },
            Record::ObjectSummary(ref summary) |
            Record::ProgramSummary(ref summary) => self.write_summary(summary)?,
            Record::Unknown(ref unknown) => self.writer.write_all(&unknown.payload)?,
        }
        Ok(())
    }

    /// Writes the fields of a summary record.
    fn write_summary(&mut self, summary: &Summary) -> Result<()> {
        self.write_32(summary.checksum)?;
        self.write_32(summary.num)?;
        self.write_32(summary.runs)?;
        self.write_64(summary.sum)?;
        self.write_64(summary.max)?;
        self.write_64(summary.sum_max)?;
        Ok(())
    }

    /// Writes a whole parsed file, header and records in order.
    ///
    /// Together with [`Reader::parse`] this round-trips: every record, including unrecognized
    /// ones, is reproduced in its original position.
    ///
    /// # Errors
    ///
    /// Returns [`Io`] on I/O failure.
    ///
    /// [`Reader::parse`]: ../reader/struct.Reader.html#method.parse
    /// [`Io`]: ../error/enum.ErrorKind.html#variant.Io
    pub fn write_file(&mut self, file: &CounterFile) -> Result<()> {
        self.write_header(file.ty, file.version)?;
        for record in &file.records {
            self.write_record(record)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Writer;
    use intern::{Interner, UNKNOWN_SYMBOL};
    use raw::*;
    use reader::Reader;

    fn sample_graph(interner: &mut Interner) -> CounterFile {
        let name = interner.intern("divide".to_owned().into_boxed_str());
        let filename = interner.intern("src/divide.rs".to_owned().into_boxed_str());
        CounterFile {
            ty: Type::Graph,
            version: CURRENT_VERSION,
            records: vec![
                Record::Function(Function {
                    name,
                    checksum: 0xdead_beef,
                    source: Some(Source {
                        filename,
                        line: 42,
                    }),
                }),
                Record::Blocks(Blocks {
                    flags: vec![BlockAttr::empty(), BlockAttr::empty(), BlockAttr::CALL_SITE, BlockAttr::empty()],
                }),
                Record::Arcs(Arcs {
                    src_block: BlockIndex(0),
                    arcs: vec![
                        Arc {
                            dest_block: BlockIndex(2),
                            flags: ArcAttr::empty(),
                        },
                    ],
                }),
                Record::Arcs(Arcs {
                    src_block: BlockIndex(2),
                    arcs: vec![
                        Arc {
                            dest_block: BlockIndex(3),
                            flags: ArcAttr::FALLTHROUGH,
                        },
                        Arc {
                            dest_block: BlockIndex(1),
                            flags: ArcAttr::ON_TREE,
                        },
                    ],
                }),
            ],
        }
    }

    #[test]
    fn test_graph_round_trip() {
        let mut interner = Interner::new();
        let file = sample_graph(&mut interner);

        let mut buffer = Vec::new();
        Writer::new(&mut buffer, &interner).write_file(&file).unwrap();
        let parsed = Reader::new(&buffer[..], &mut interner).unwrap().parse().unwrap();
        assert_eq!(file, parsed);
    }

    #[test]
    fn test_data_round_trip_with_unknown_record() {
        let mut interner = Interner::new();
        let name = interner.intern("divide".to_owned().into_boxed_str());
        let file = CounterFile {
            ty: Type::Data,
            version: CURRENT_VERSION,
            records: vec![
                Record::Function(Function {
                    name,
                    checksum: 77,
                    source: None,
                }),
                Record::Counts(Counts {
                    kind: CounterKind::Arcs,
                    counts: vec![9, 0, 1 << 40],
                }),
                Record::Unknown(UnknownRecord {
                    tag: Tag(0x0d_00_00_00),
                    payload: b"odd payload!".to_vec(),
                }),
                Record::ProgramSummary(Summary {
                    checksum: 0x17,
                    num: 3,
                    runs: 2,
                    sum: 10,
                    max: 9,
                    sum_max: 18,
                }),
            ],
        };

        let mut buffer = Vec::new();
        Writer::new(&mut buffer, &interner).write_file(&file).unwrap();
        let parsed = Reader::new(&buffer[..], &mut interner).unwrap().parse().unwrap();
        assert_eq!(file, parsed);

        // rewriting the reparsed file must reproduce the bytes exactly.
        let mut rewritten = Vec::new();
        Writer::new(&mut rewritten, &interner).write_file(&parsed).unwrap();
        assert_eq!(buffer, rewritten);
    }

    #[test]
    fn test_null_string() {
        let mut interner = Interner::new();
        let file = CounterFile {
            ty: Type::Data,
            version: CURRENT_VERSION,
            records: vec![
                Record::Function(Function {
                    name: UNKNOWN_SYMBOL,
                    checksum: 0,
                    source: None,
                }),
            ],
        };

        let mut buffer = Vec::new();
        Writer::new(&mut buffer, &interner).write_file(&file).unwrap();
        // header + record header + null name + checksum.
        assert_eq!(buffer.len(), 8 + 8 + 4 + 4);

        let parsed = Reader::new(&buffer[..], &mut interner).unwrap().parse().unwrap();
        assert_eq!(file, parsed);
    }
}
