//! The raw structures of graph and data files.
//!
//! Both file types share one container layout: a magic word, a version word, then tagged records
//! until the end of the file. [`CounterFile`] is the parsed form of one file, [`Record`] one of
//! its records. Nothing here interprets the profile; the flow semantics live in
//! [`cfg`](../cfg/index.html), [`instrument`](../instrument/index.html) and
//! [`solve`](../solve/index.html).
//!
//! [`CounterFile`]: struct.CounterFile.html
//! [`Record`]: enum.Record.html

use error::*;
#[cfg(feature = "serde")]
use intern::SerializeWithInterner;
use intern::{Interner, Symbol, UNKNOWN_SYMBOL};
use reader::Reader;
use utils::round_up_4;

use byteorder::{BigEndian, ByteOrder};
#[cfg(feature = "serde")]
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use std::cmp::max;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
#[cfg(feature = "serde")]
use std::result::Result as StdResult;
use std::str::FromStr;

//----------------------------------------------------------------------------------------------------------------------
//{{{ CounterFile

derive_serialize_with_interner! {
    /// The raw content of a graph or data file.
    #[derive(Clone, PartialEq, Eq, Hash, Debug)]
    #[cfg_attr(feature="serde", derive(Serialize, Deserialize))]
    pub struct CounterFile {
        pub ty: Type,
        pub version: Version,
        pub records: Vec<Record>,
    }
}

impl CounterFile {
    /// Opens and parses a whole file. Errors are tagged with the file name.
    pub fn open<P: AsRef<Path>>(p: P, interner: &mut Interner) -> Result<CounterFile> {
        debug!("open counter file {:?}", p.as_ref());
        Location::File(p.as_ref().to_owned()).wrap(|| -> Result<CounterFile> {
            Reader::new(BufReader::new(File::open(p)?), interner)?.parse()
        })
    }
}

//}}}
//----------------------------------------------------------------------------------------------------------------------
//{{{ Type

/// The file type.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Type {
    /// The graph file describing the control-flow structure, with file extension `*.afgr`.
    Graph,
    /// The data file holding execution counters, with file extension `*.afda`.
    Data,
}

/// Magic of a graph file, the bytes `"afgr"`.
pub const GRAPH_MAGIC: u32 = 0x61_66_67_72;
/// Magic of a data file, the bytes `"afda"`.
pub const DATA_MAGIC: u32 = 0x61_66_64_61;

impl Type {
    /// The magic word identifying this file type.
    pub fn magic(self) -> u32 {
        match self {
            Type::Graph => GRAPH_MAGIC,
            Type::Data => DATA_MAGIC,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(match *self {
            Type::Graph => "afgr",
            Type::Data => "afda",
        })
    }
}

//}}}
//----------------------------------------------------------------------------------------------------------------------
//{{{ Tag

/// The tag of a record.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Tag(pub u32);

/// The tag for the end of file.
pub const EOF_TAG: Tag = Tag(0);
/// The tag for a function announcement record.
pub const FUNCTION_TAG: Tag = Tag(0x01_00_00_00);
/// The tag for a basic-block record.
pub const BLOCKS_TAG: Tag = Tag(0x01_41_00_00);
/// The tag for an arcs record.
pub const ARCS_TAG: Tag = Tag(0x01_43_00_00);
/// The base tag for counter records. The record for counter kind *k* is tagged
/// `COUNTER_BASE_TAG + (k << 17)`.
pub const COUNTER_BASE_TAG: Tag = Tag(0x01_a1_00_00);
/// The tag for an object-summary record.
pub const OBJECT_SUMMARY_TAG: Tag = Tag(0xa1_00_00_00);
/// The tag for a program-summary record.
pub const PROGRAM_SUMMARY_TAG: Tag = Tag(0xa3_00_00_00);

impl Tag {
    /// The bits which vary among this tag and its sub-record tags.
    ///
    /// The tag numbering scheme clears one more low byte per nesting level, so the mask of an
    /// outer tag covers the masks of everything nested below it.
    pub fn mask(self) -> u32 {
        self.0.wrapping_sub(1) ^ self.0
    }

    /// Checks whether this tag announces a record nested directly below records of `tag`.
    pub fn is_subtag_of(self, tag: Tag) -> bool {
        tag.mask() >> 8 == self.mask() && (self.0 ^ tag.0) & !tag.mask() == 0
    }

    /// The counter kind of this tag, if it is a counter record tag.
    pub fn counter_kind(self) -> Option<CounterKind> {
        if self == COUNTER_BASE_TAG {
            Some(CounterKind::Arcs)
        } else {
            None
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "0x{:08x}", self.0)
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "Tag(0x{:08x})", self.0)
    }
}

impl fmt::LowerHex for Tag {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(fmt)
    }
}

impl fmt::UpperHex for Tag {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(fmt)
    }
}

//}}}
//----------------------------------------------------------------------------------------------------------------------
//{{{ CounterKind

/// The kind of a counter record.
///
/// Only flat edge counters exist today. The tag arithmetic leaves room for further kinds, which
/// is why the enum exists at all.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CounterKind {
    /// Execution counts of instrumented arcs.
    Arcs,
}

impl CounterKind {
    /// The record tag for this counter kind.
    pub fn tag(self) -> Tag {
        Tag(COUNTER_BASE_TAG.0 + ((self as u32) << 17))
    }

    /// Short name of the counter kind, as printed by the dump tool.
    pub fn name(self) -> &'static str {
        match self {
            CounterKind::Arcs => "arcs",
        }
    }
}

//}}}
//----------------------------------------------------------------------------------------------------------------------
//{{{ Version

/// File version.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version(u32);

/// An invalid file version.
pub const INVALID_VERSION: Version = Version(0);

/// The version written by this crate, `"010*"`.
pub const CURRENT_VERSION: Version = Version(0x30_31_30_2a);

impl Version {
    /// Converts a raw version number to a `Version` structure.
    ///
    /// The version word is four packed ASCII bytes ending in `b'*'`. Words of any other shape
    /// cannot come from a compatible writer, so no record of the file can be trusted.
    ///
    /// # Errors
    ///
    /// Returns [`UnsupportedVersion`](../error/enum.ErrorKind.html#variant.UnsupportedVersion) if
    /// the version does not have the expected shape.
    pub fn try_from(raw_version: u32) -> Result<Version> {
        ensure!(raw_version & 0x80_80_80_ff == 0x2a, ErrorKind::UnsupportedVersion(raw_version));
        Ok(Version(raw_version))
    }

    /// The raw version word.
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "Version(\"{}\")", self)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "{}{}{}{}",
            (self.0 >> 24 & 0xff) as u8 as char,
            (self.0 >> 16 & 0xff) as u8 as char,
            (self.0 >> 8 & 0xff) as u8 as char,
            (self.0 & 0xff) as u8 as char,
        )
    }
}

impl FromStr for Version {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        ensure!(s.len() == 4, ErrorKind::UnsupportedVersion(0));
        let raw_version = BigEndian::read_u32(s.as_bytes());
        Version::try_from(raw_version)
    }
}

#[cfg(feature = "serde")]
impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> StdResult<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> StdResult<Self, D::Error> {
        use serde::de::Error;
        let s = <&'de str>::deserialize(deserializer)?;
        Version::from_str(s).map_err(D::Error::custom)
    }
}

//}}}
//----------------------------------------------------------------------------------------------------------------------
//{{{ Record

/// A record in a graph or data file.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Record {
    Function(Function),
    Blocks(Blocks),
    Arcs(Arcs),
    Counts(Counts),
    ObjectSummary(Summary),
    ProgramSummary(Summary),
    Unknown(UnknownRecord),
}

impl Record {
    /// The tag this record is stored under.
    pub fn tag(&self) -> Tag {
        match *self {
            Record::Function(_) => FUNCTION_TAG,
            Record::Blocks(_) => BLOCKS_TAG,
            Record::Arcs(_) => ARCS_TAG,
            Record::Counts(ref counts) => counts.kind.tag(),
            Record::ObjectSummary(_) => OBJECT_SUMMARY_TAG,
            Record::ProgramSummary(_) => PROGRAM_SUMMARY_TAG,
            Record::Unknown(ref unknown) => unknown.tag,
        }
    }

    /// The byte length of this record's payload on the wire, excluding the tag and length words.
    ///
    /// Strings need the `interner` to measure their current spelling; everything else has a fixed
    /// layout. Always a multiple of 4.
    pub fn length(&self, interner: &Interner) -> u32 {
        fn string_length(symbol: Symbol, interner: &Interner) -> u32 {
            if symbol == UNKNOWN_SYMBOL {
                4
            } else {
                4 + round_up_4(interner[symbol].len() as u32)
            }
        }

        match *self {
            Record::Function(ref function) => {
                let mut length = string_length(function.name, interner) + 4;
                if let Some(ref source) = function.source {
                    length += string_length(source.filename, interner) + 4;
                }
                length
            },
            Record::Blocks(ref blocks) => 4 * blocks.flags.len() as u32,
            Record::Arcs(ref arcs) => 4 + 8 * arcs.arcs.len() as u32,
            Record::Counts(ref counts) => 8 * counts.counts.len() as u32,
            Record::ObjectSummary(_) | Record::ProgramSummary(_) => 36,
            Record::Unknown(ref unknown) => unknown.payload.len() as u32,
        }
    }
}

#[cfg(feature = "serde")]
impl SerializeWithInterner for Record {
    fn serialize_with_interner<S: Serializer>(&self, serializer: S, interner: &Interner) -> StdResult<S::Ok, S::Error> {
        match *self {
            Record::Function(ref function) => serializer.serialize_newtype_variant("Record", 0, "Function", &interner.with(function)),
            _ => self.serialize(serializer),
        }
    }
}

//}}}
//----------------------------------------------------------------------------------------------------------------------
//{{{ Function & Source

derive_serialize_with_interner! {
    /// A function announcement.
    ///
    /// The pair (`name`, `checksum`) identifies a function when a data file is merged; see
    /// [`runtime`](../runtime/index.html). The checksum is computed from the function's
    /// control-flow graph by the instrumenting compiler, so it changes whenever the shape of the
    /// graph does.
    #[derive(Clone, PartialEq, Eq, Hash, Debug)]
    #[cfg_attr(feature="serde", derive(Serialize, Deserialize))]
    pub struct Function {
        pub name: Symbol,
        pub checksum: u32,
        /// Source attribution, present in graph files only.
        #[cfg_attr(feature="serde", serde(default, skip_serializing_if="Option::is_none"))]
        pub source: Option<Source>,
    }
}

derive_serialize_with_interner! {
    /// Source location of a function.
    #[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
    #[cfg_attr(feature="serde", derive(Serialize, Deserialize))]
    pub struct Source {
        /// File name.
        pub filename: Symbol,
        /// Line number of the function's definition.
        pub line: u32,
    }
}

//}}}
//----------------------------------------------------------------------------------------------------------------------
//{{{ Blocks

macro_rules! derive_serde_for_attr {
    ($flags:path, $kind:expr, $allowed_from_wire:expr) => {
        #[cfg(feature="serde")]
        impl Serialize for $flags {
            fn serialize<S: Serializer>(&self, serializer: S) -> StdResult<S::Ok, S::Error> {
                serializer.serialize_u16(self.bits())
            }
        }

        #[cfg(feature="serde")]
        impl<'de> Deserialize<'de> for $flags {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> StdResult<Self, D::Error> {
                use ::serde::de::Error;
                let b = u16::deserialize(deserializer)?;
                <$flags>::from_bits(b).ok_or_else(|| D::Error::custom(ErrorKind::UnsupportedAttr($kind, b as u32)))
            }
        }

        impl $flags {
            /// Validates a flag word read from a file.
            ///
            /// # Errors
            ///
            /// Returns [`UnsupportedAttr`](../error/enum.ErrorKind.html#variant.UnsupportedAttr)
            /// if any unknown bit is set.
            pub fn from_wire(flags: u32) -> Result<$flags> {
                ensure!(flags & !(($allowed_from_wire).bits() as u32) == 0, ErrorKind::UnsupportedAttr($kind, flags));
                Ok(<$flags>::from_bits_truncate(flags as u16))
            }
        }
    }
}

/// List of basic blocks.
///
/// The record stores one flag word per block, covering every block of the function including the
/// entry and exit pseudo-blocks. The wire index of a block is its position here: entry is 0, exit
/// is 1, real blocks follow from 2.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Blocks {
    pub flags: Vec<BlockAttr>,
}

bitflags! {
    /// Attributes of a block.
    #[derive(Default)]
    pub struct BlockAttr: u16 {
        /// The block ends in a call.
        const CALL_SITE = 0x1;
    }
}

derive_serde_for_attr! {
    BlockAttr, "block", BlockAttr::CALL_SITE
}

/// Index to a block in the basic blocks list.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BlockIndex(pub u32);

impl fmt::Debug for BlockIndex {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "BI({})", self.0)
    }
}

impl fmt::Display for BlockIndex {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(fmt)
    }
}

impl From<BlockIndex> for usize {
    fn from(i: BlockIndex) -> usize {
        i.0 as usize
    }
}

//}}}
//----------------------------------------------------------------------------------------------------------------------
//{{{ Arcs

/// List of arcs (out-going edges) from a single source block.
///
/// A graph file carries one such record per block except the exit block, in block index order,
/// and each record lists its arcs in the builder's traversal order. Arcs without
/// [`ON_TREE`](struct.ArcAttr.html#associatedconstant.ON_TREE) are the instrumented ones; their
/// order across the whole function is the counter slot order of the data file.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Arcs {
    pub src_block: BlockIndex,
    pub arcs: Vec<Arc>,
}

bitflags! {
    /// Attributes of an arc.
    #[derive(Default)]
    pub struct ArcAttr: u16 {
        /// The arc is on the spanning tree and carries no counter.
        const ON_TREE = 1;
        /// The arc stands in for abnormal control flow.
        const FAKE = 2;
        /// Control falls through without a jump.
        const FALLTHROUGH = 4;
    }
}

derive_serde_for_attr! {
    ArcAttr, "arc", ArcAttr::ON_TREE | ArcAttr::FAKE | ArcAttr::FALLTHROUGH
}

/// An arc destination.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Arc {
    pub dest_block: BlockIndex,
    pub flags: ArcAttr,
}

//}}}
//----------------------------------------------------------------------------------------------------------------------
//{{{ Counts

/// Counters recorded for one function, in slot order.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Counts {
    pub kind: CounterKind,
    pub counts: Vec<u64>,
}

//}}}
//----------------------------------------------------------------------------------------------------------------------
//{{{ UnknownRecord

/// A record with an unrecognized tag, preserved byte-for-byte.
///
/// Unknown records are tolerated when reading so that newer producers stay readable, and they are
/// written back verbatim when rewriting a file.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct UnknownRecord {
    pub tag: Tag,
    pub payload: Vec<u8>,
}

//}}}
//----------------------------------------------------------------------------------------------------------------------
//{{{ Summary

/// Accumulated statistics over all runs merged into a data file.
///
/// An object summary describes one data file and carries checksum 0. A program summary describes
/// one *program* using the file; its checksum identifies the program (see
/// [`Registry::program_checksum`](../runtime/struct.Registry.html#method.program_checksum)), and a
/// data file shared by several programs holds one program summary per program.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Summary {
    pub checksum: u32,
    /// Number of counters summarized.
    pub num: u32,
    /// Number of runs merged.
    pub runs: u32,
    /// Total of all counter values over all runs.
    pub sum: u64,
    /// Largest single counter value seen in any one run.
    pub max: u64,
    /// Sum of each run's largest counter value.
    pub sum_max: u64,
}

impl Summary {
    /// Folds one run's statistics into the summary.
    pub fn add_run(&mut self, num: u32, run_sum: u64, run_max: u64) {
        self.num = num;
        self.runs += 1;
        self.sum += run_sum;
        self.max = max(self.max, run_max);
        self.sum_max += run_max;
    }
}

//}}}

derive_serialize_with_interner! {
    direct: Type, Tag, CounterKind, Version, BlockAttr, ArcAttr, Blocks, BlockIndex, Arcs, Counts, UnknownRecord, Summary
}
