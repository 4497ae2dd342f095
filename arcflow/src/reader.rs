//! Reader of [`CounterFile`] format.
//!
//! Graph and data files share one record-oriented container format; see the [`raw`] module for the
//! model it is parsed into. The reader tracks its byte position so that parse errors can report
//! where in the file they happened.
//!
//! [`CounterFile`]: ../raw/struct.CounterFile.html
//! [`raw`]: ../raw/index.html

use error::*;
use intern::{Interner, Symbol, UNKNOWN_SYMBOL};
use raw::*;
use utils::round_up_4;

use byteorder::{LittleEndian, ReadBytesExt};

use std::io::{self, Read, Take};
use std::iter::FromIterator;
use std::result::Result as StdResult;

/// The reader of a graph or data file.
///
/// # Examples
///
/// ```rust
/// use arcflow::raw::{CURRENT_VERSION, Type};
/// use arcflow::reader::Reader;
/// use arcflow::writer::Writer;
/// use arcflow::Interner;
/// # use arcflow::Result;
///
/// # fn main() { run().unwrap(); }
/// # fn run() -> Result<()> {
/// let mut interner = Interner::new();
/// let mut buffer = Vec::new();
/// {
///     let mut writer = Writer::new(&mut buffer, &interner);
///     writer.write_header(Type::Data, CURRENT_VERSION)?;
/// }
///
/// // read the header.
/// let mut reader = Reader::new(&buffer[..], &mut interner)?;
/// // read the content.
/// let file = reader.parse()?;
/// assert_eq!(file.ty, Type::Data);
/// assert!(file.records.is_empty());
/// # Ok(()) }
/// ```
#[derive(Debug)]
pub struct Reader<'si, R> {
    reader: R,
    cursor: u64,
    ty: Type,
    version: Version,
    is_big_endian: bool,
    interner: &'si mut Interner,
}

/// Consumes the whole reader to the end.
fn consume_to_end<R: Read>(reader: &mut R) -> Result<()> {
    loop {
        let mut buf = [0u8; 64];
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(_) => continue,
            Err(e) => {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                } else {
                    bail!(e);
                }
            },
        }
    }
    Ok(())
}

#[test]
fn test_consume_to_end() {
    (|| -> Result<()> {
        let mut reader = &b"one23456789two45678"[..];
        let mut top = [0u8; 3];
        reader.read_exact(&mut top)?;
        consume_to_end(&mut reader.by_ref().take(11))?;
        let mut bottom = [0u8; 5];
        reader.read_exact(&mut bottom)?;
        assert_eq!(&top, b"one");
        assert_eq!(&bottom, b"two45");
        assert_eq!(reader, b"678");
        Ok(())
    })().unwrap();
}

/// Re-wraps a clean end-of-file error as a positioned hard error.
///
/// Running out of bytes *inside* a record means the file is truncated, not complete, and must not
/// silently terminate record iteration.
fn harden<T>(cursor: u64, res: Result<T>) -> Result<T> {
    res.map_err(|e| if e.is_eof() {
        Error::with_chain(e, ErrorKind::AtLocation(Location::Cursor(cursor)))
    } else {
        e
    })
}

impl<'si, R: Read> Reader<'si, R> {
    /// Advances the reader cursor by `count` bytes. If `res` is an error, include the file position information to the
    /// error, otherwise return `res` as-is.
    fn advance_cursor<T, E: Into<Error>>(&mut self, count: u64, res: StdResult<T, E>) -> Result<T> {
        Location::Cursor(self.cursor).wrap(|| {
            self.cursor += count;
            res
        })
    }

    /// Reads a 32-bit number in file byte order.
    ///
    /// # Errors
    ///
    /// Returns [`Io`] on I/O failure, e.g. reaching end-of-file.
    ///
    /// [`Io`]: ../error/enum.ErrorKind.html#variant.Io
    fn read_32(&mut self) -> Result<u32> {
        let value = self.reader.read_u32::<LittleEndian>();
        let mut value = self.advance_cursor(4, value)?;
        if self.is_big_endian {
            value = value.swap_bytes();
        }
        Ok(value)
    }

    /// Reads a 64-bit number in file byte order. The low 32-bit half is stored first.
    ///
    /// # Errors
    ///
    /// Returns [`Io`] on I/O failure, e.g. reaching end-of-file.
    ///
    /// [`Io`]: ../error/enum.ErrorKind.html#variant.Io
    fn read_64(&mut self) -> Result<u64> {
        let value = self.reader.read_u64::<LittleEndian>();
        let mut value = self.advance_cursor(8, value)?;
        if self.is_big_endian {
            value = value.rotate_left(32).swap_bytes();
        }
        Ok(value)
    }

    /// Reads a length-prefixed string and interns it.
    ///
    /// A zero length is the null string, which interns to [`UNKNOWN_SYMBOL`].
    ///
    /// # Errors
    ///
    /// * Returns [`Io`] on I/O failure, e.g. reaching end-of-file.
    /// * Returns [`FromUtf8`] if the string is not encoded in UTF-8.
    ///
    /// [`UNKNOWN_SYMBOL`]: ../intern/constant.UNKNOWN_SYMBOL.html
    /// [`Io`]: ../error/enum.ErrorKind.html#variant.Io
    /// [`FromUtf8`]: ../error/enum.ErrorKind.html#variant.FromUtf8
    fn read_string(&mut self) -> Result<Symbol> {
        let length = self.read_32()?;
        if length == 0 {
            return Ok(UNKNOWN_SYMBOL);
        }
        let padded = u64::from(round_up_4(length));
        let mut buf = Vec::with_capacity(padded as usize);
        let cursor = self.cursor;
        let value = self.reader.by_ref().take(padded).read_to_end(&mut buf);
        let read = self.advance_cursor(padded, value)?;
        if (read as u64) < padded {
            return harden(cursor, Err(ErrorKind::Eof.into()));
        }
        buf.truncate(length as usize);
        let string = Location::Cursor(cursor).wrap(|| String::from_utf8(buf))?;
        Ok(self.interner.intern(string.into_boxed_str()))
    }

    /// Reads something from this reader using the provided function `f`, until end-of-file is encountered.
    ///
    /// The result is a collection of returned values of `f`.
    fn until_eof<C, T, F>(&mut self, f: F) -> Result<C>
    where
        F: FnMut(&mut Self) -> Result<T>,
        C: FromIterator<T>,
    {
        UntilEof(self, f).collect()
    }

    /// Parses the header of the file, and creates a new counter file reader.
    ///
    /// Files written on a machine of the opposite endianness are detected from the byte-swapped
    /// magic and read transparently. A version other than [`CURRENT_VERSION`] is accepted with a
    /// warning as long as it is well-formed.
    ///
    /// # Errors
    ///
    /// * Returns [`UnknownFileType`] if the reader is not in graph/data format.
    /// * Returns [`UnsupportedVersion`] if the version word cannot be interpreted.
    /// * Returns [`Io`] on I/O failure.
    ///
    /// [`CURRENT_VERSION`]: ../raw/constant.CURRENT_VERSION.html
    /// [`UnknownFileType`]: ../error/enum.ErrorKind.html#variant.UnknownFileType
    /// [`UnsupportedVersion`]: ../error/enum.ErrorKind.html#variant.UnsupportedVersion
    /// [`Io`]: ../error/enum.ErrorKind.html#variant.Io
    pub fn new(mut reader: R, interner: &'si mut Interner) -> Result<Reader<'si, R>> {
        trace!("file-magic");
        let (ty, is_big_endian) = match reader.read_u32::<LittleEndian>()? {
            0x61_66_67_72 => (Type::Graph, false),
            0x72_67_66_61 => (Type::Graph, true),
            0x61_66_64_61 => (Type::Data, false),
            0x61_64_66_61 => (Type::Data, true),
            magic => bail!(ErrorKind::UnknownFileType(magic)),
        };
        let mut result = Reader {
            reader,
            ty,
            is_big_endian,
            interner,
            cursor: 4,
            version: INVALID_VERSION,
        };
        trace!("file-version @ 0x{:x}", result.cursor);
        let version = result.read_32()?;
        let version = Location::Cursor(result.cursor - 4).wrap(|| Version::try_from(version))?;
        if version != CURRENT_VERSION {
            warn!("file version \"{}\" differs from the supported version \"{}\", reading anyway", version, CURRENT_VERSION);
        }
        result.version = version;
        Ok(result)
    }

    /// Parses the content of the reader, to produce a [`CounterFile`] structure.
    ///
    /// Records with an unrecognized tag are preserved as [`Unknown`] records, with a warning.
    ///
    /// # Errors
    ///
    /// * Returns [`FromUtf8`] if any string in the file is not UTF-8 encoded.
    /// * Returns [`Io`] on I/O failure, including a record shorter than its declared length.
    ///
    /// [`CounterFile`]: ../raw/struct.CounterFile.html
    /// [`Unknown`]: ../raw/enum.Record.html#variant.Unknown
    /// [`FromUtf8`]: ../error/enum.ErrorKind.html#variant.FromUtf8
    /// [`Io`]: ../error/enum.ErrorKind.html#variant.Io
    pub fn parse(&mut self) -> Result<CounterFile> {
        let records = self.until_eof(|s| {
            let cursor = s.cursor;
            let (tag, mut subreader) = s.read_record_header()?;
            trace!("parse-record @ 0x{:x}; tag = {}", cursor, tag);
            let record = harden(cursor, subreader.parse_record(tag))?;
            harden(cursor, consume_to_end(&mut subreader.reader))?;
            if subreader.reader.limit() != 0 {
                return harden(cursor, Err(ErrorKind::Eof.into()));
            }
            Ok(record)
        })?;
        Ok(CounterFile {
            ty: self.ty,
            version: self.version,
            records,
        })
    }

    /// Reads the header of a record. Returns the record tag, and a reader that is specialized for
    /// reading this record.
    ///
    /// # Errors
    ///
    /// * Returns [`Eof`] if the end-of-file marker tag is reached.
    /// * Returns [`Io`] on I/O failure.
    ///
    /// [`Eof`]: ../error/enum.ErrorKind.html#variant.Eof
    /// [`Io`]: ../error/enum.ErrorKind.html#variant.Io
    fn read_record_header(&mut self) -> Result<(Tag, Reader<Take<&mut R>>)> {
        trace!("record-tag @ 0x{:x}", self.cursor);
        let tag = Tag(self.read_32()?);
        if tag == EOF_TAG {
            trace!("**** end-of-file marker @ 0x{:x}", self.cursor - 4);
            bail!(ErrorKind::Eof);
        }
        trace!("record-length @ 0x{:x}", self.cursor);
        let length = u64::from(harden(self.cursor, self.read_32())?);
        let subreader = Reader {
            reader: self.reader.by_ref().take(length),
            cursor: self.cursor,
            ty: self.ty,
            version: self.version,
            is_big_endian: self.is_big_endian,
            interner: self.interner,
        };
        debug!("record-header: tag = {0}, length = {1} (0x{1:x}), range = 0x{2:x} .. 0x{3:x}", tag, length, self.cursor, self.cursor + length);
        self.cursor += length;
        Ok((tag, subreader))
    }

    /// Parses the payload of a single record according to its tag.
    fn parse_record(&mut self, tag: Tag) -> Result<Record> {
        Ok(match tag {
            FUNCTION_TAG => Record::Function(self.parse_function()?),
            BLOCKS_TAG => Record::Blocks(self.parse_blocks()?),
            ARCS_TAG => Record::Arcs(self.parse_arcs()?),
            OBJECT_SUMMARY_TAG => Record::ObjectSummary(self.parse_summary()?),
            PROGRAM_SUMMARY_TAG => Record::ProgramSummary(self.parse_summary()?),
            tag => {
                if let Some(kind) = tag.counter_kind() {
                    Record::Counts(self.parse_counts(kind)?)
                } else {
                    warn!("unknown record tag {}, keeping its payload verbatim", tag);
                    Record::Unknown(self.parse_unknown(tag)?)
                }
            },
        })
    }

    /// Parses the function announcement record.
    ///
    /// # Errors
    ///
    /// * Returns [`FromUtf8`] if the function name or file name is not UTF-8 encoded.
    /// * Returns [`Io`] on I/O failure.
    ///
    /// [`FromUtf8`]: ../error/enum.ErrorKind.html#variant.FromUtf8
    /// [`Io`]: ../error/enum.ErrorKind.html#variant.Io
    fn parse_function(&mut self) -> Result<Function> {
        trace!("function-name @ 0x{:x}", self.cursor);
        let name = self.read_string()?;
        trace!("function-checksum @ 0x{:x}", self.cursor);
        let checksum = self.read_32()?;
        let source = if self.ty == Type::Graph {
            trace!("function-source @ 0x{:x}", self.cursor);
            Some(self.read_source()?)
        } else {
            None
        };
        Ok(Function {
            name,
            checksum,
            source,
        })
    }

    /// Reads the source position of a function.
    ///
    /// # Errors
    ///
    /// * Returns [`FromUtf8`] if the file name is not UTF-8 encoded.
    /// * Returns [`Io`] on I/O failure.
    ///
    /// [`FromUtf8`]: ../error/enum.ErrorKind.html#variant.FromUtf8
    /// [`Io`]: ../error/enum.ErrorKind.html#variant.Io
    fn read_source(&mut self) -> Result<Source> {
        trace!("source-filename @ 0x{:x}", self.cursor);
        let filename = self.read_string()?;
        trace!("source-line @ 0x{:x}", self.cursor);
        let line = self.read_32()?;
        Ok(Source {
            filename,
            line,
        })
    }

    /// Parses the block list record.
    ///
    /// # Errors
    ///
    /// * Returns [`UnsupportedAttr`] if a block carries flags this crate does not know.
    /// * Returns [`Io`] on I/O failure.
    ///
    /// [`UnsupportedAttr`]: ../error/enum.ErrorKind.html#variant.UnsupportedAttr
    /// [`Io`]: ../error/enum.ErrorKind.html#variant.Io
    fn parse_blocks(&mut self) -> Result<Blocks> {
        trace!("blocks-flags @ 0x{:x}", self.cursor);
        let flags = self.until_eof(|s| {
            let raw_flag = s.read_32()?;
            Location::Cursor(s.cursor - 4).wrap(|| BlockAttr::from_wire(raw_flag))
        })?;
        Ok(Blocks { flags })
    }

    /// Parses an arc list record.
    ///
    /// # Errors
    ///
    /// * Returns [`UnsupportedAttr`] if an arc carries flags this crate does not know.
    /// * Returns [`Io`] on I/O failure.
    ///
    /// [`UnsupportedAttr`]: ../error/enum.ErrorKind.html#variant.UnsupportedAttr
    /// [`Io`]: ../error/enum.ErrorKind.html#variant.Io
    fn parse_arcs(&mut self) -> Result<Arcs> {
        trace!("arcs-block-no @ 0x{:x}", self.cursor);
        let src_block = BlockIndex(self.read_32()?);
        trace!("arcs-arcs @ 0x{:x}", self.cursor);
        let arcs = self.until_eof(|s| {
            trace!("arc-dest-block @ 0x{:x}", s.cursor);
            let dest_block = BlockIndex(s.read_32()?);
            trace!("arc-flags @ 0x{:x}", s.cursor);
            let raw_flags = s.read_32()?;
            let flags = Location::Cursor(s.cursor - 4).wrap(|| ArcAttr::from_wire(raw_flags))?;
            Ok(Arc { dest_block, flags })
        })?;
        Ok(Arcs { src_block, arcs })
    }

    /// Parses a counter values record.
    ///
    /// # Errors
    ///
    /// * Returns [`Io`] on I/O failure.
    ///
    /// [`Io`]: ../error/enum.ErrorKind.html#variant.Io
    fn parse_counts(&mut self, kind: CounterKind) -> Result<Counts> {
        trace!("counts-values @ 0x{:x}", self.cursor);
        let counts = self.until_eof(Self::read_64)?;
        Ok(Counts { kind, counts })
    }

    /// Parses an object or program summary record.
    ///
    /// # Errors
    ///
    /// * Returns [`Io`] on I/O failure.
    ///
    /// [`Io`]: ../error/enum.ErrorKind.html#variant.Io
    fn parse_summary(&mut self) -> Result<Summary> {
        trace!("summary-checksum @ 0x{:x}", self.cursor);
        let checksum = self.read_32()?;
        trace!("summary-num @ 0x{:x}", self.cursor);
        let num = self.read_32()?;
        trace!("summary-runs @ 0x{:x}", self.cursor);
        let runs = self.read_32()?;
        trace!("summary-sum @ 0x{:x}", self.cursor);
        let sum = self.read_64()?;
        trace!("summary-max @ 0x{:x}", self.cursor);
        let max = self.read_64()?;
        trace!("summary-sum-max @ 0x{:x}", self.cursor);
        let sum_max = self.read_64()?;
        Ok(Summary {
            checksum,
            num,
            runs,
            sum,
            max,
            sum_max,
        })
    }

    /// Reads the payload of an unrecognized record verbatim.
    ///
    /// The bytes are kept exactly as stored, without endianness conversion, so that rewriting the
    /// file reproduces them bit-for-bit.
    ///
    /// # Errors
    ///
    /// * Returns [`Io`] on I/O failure.
    ///
    /// [`Io`]: ../error/enum.ErrorKind.html#variant.Io
    fn parse_unknown(&mut self, tag: Tag) -> Result<UnknownRecord> {
        trace!("unknown-payload @ 0x{:x}", self.cursor);
        let cursor = self.cursor;
        let mut payload = Vec::new();
        let res = self.reader.read_to_end(&mut payload);
        let read = Location::Cursor(cursor).wrap(|| res)?;
        self.cursor += read as u64;
        Ok(UnknownRecord { tag, payload })
    }
}

/// An iterator which reads from a reader until it produces an end-of-file error.
struct UntilEof<'a, S: 'a, T, F>(&'a mut S, F)
where
    F: FnMut(&mut S) -> Result<T>;

impl<'a, S: 'a, T, F> Iterator for UntilEof<'a, S, T, F>
where
    F: FnMut(&mut S) -> Result<T>,
{
    type Item = Result<T>;
    fn next(&mut self) -> Option<Result<T>> {
        match (self.1)(self.0) {
            Err(ref e) if e.is_eof() => {
                trace!("**** reached eof");
                None
            },
            x => Some(x),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Reader;
    use error::ErrorKind;
    use intern::Interner;
    use raw::{CURRENT_VERSION, DATA_MAGIC, FUNCTION_TAG, Record, Type};

    use byteorder::{LittleEndian, WriteBytesExt};

    #[test]
    fn test_truncated_record_is_rejected() {
        let mut bytes = Vec::new();
        bytes.write_u32::<LittleEndian>(DATA_MAGIC).unwrap();
        bytes.write_u32::<LittleEndian>(CURRENT_VERSION.raw()).unwrap();
        bytes.write_u32::<LittleEndian>(FUNCTION_TAG.0).unwrap();
        bytes.write_u32::<LittleEndian>(16).unwrap();
        // only 4 of the promised 16 payload bytes are present.
        bytes.write_u32::<LittleEndian>(0).unwrap();

        let mut interner = Interner::new();
        let mut reader = Reader::new(&bytes[..], &mut interner).unwrap();
        let err = reader.parse().unwrap_err();
        assert!(!err.is_eof());
    }

    #[test]
    fn test_byte_swapped_header() {
        // a data file produced on a big-endian machine: every 32-bit word is byte-reversed.
        let mut bytes = Vec::new();
        for word in &[DATA_MAGIC, CURRENT_VERSION.raw(), FUNCTION_TAG.0, 8, 0, 0x1234_5678] {
            bytes.write_u32::<LittleEndian>(word.swap_bytes()).unwrap();
        }

        let mut interner = Interner::new();
        let mut reader = Reader::new(&bytes[..], &mut interner).unwrap();
        let file = reader.parse().unwrap();
        assert_eq!(file.ty, Type::Data);
        assert_eq!(file.version, CURRENT_VERSION);
        assert_eq!(file.records.len(), 1);
        match file.records[0] {
            Record::Function(ref function) => {
                assert_eq!(function.checksum, 0x1234_5678);
                assert_eq!(function.source, None);
            },
            ref r => panic!("unexpected record {:?}", r),
        }
    }

    #[test]
    fn test_unknown_magic() {
        let mut bytes = Vec::new();
        bytes.write_u32::<LittleEndian>(0x7f45_4c46).unwrap();
        let mut interner = Interner::new();
        match Reader::new(&bytes[..], &mut interner) {
            Err(ref e) => match *e.kind() {
                ErrorKind::UnknownFileType(magic) => assert_eq!(magic, 0x7f45_4c46),
                ref k => panic!("unexpected error {:?}", k),
            },
            Ok(_) => panic!("header should have been rejected"),
        }
    }
}
