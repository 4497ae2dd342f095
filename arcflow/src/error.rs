//! Errors related to the `arcflow` crate.
//!
//! Please see documentation of the [`error-chain` crate](https://docs.rs/error-chain/0.12.0/error_chain/) for detailed
//! usage.

use raw::{Tag, Type};

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::result::Result as StdResult;
use std::string::FromUtf8Error;

error_chain! {
    foreign_links {
        Io(io::Error) /** Wrapper of standard I/O error. */;
        FromUtf8(FromUtf8Error) /** Wrapper of UTF-8 decode error. */;
        Json(::serde_json::Error) #[cfg(feature="serde_json")] /** Wrapper of JSON error. */;
    }

    errors {
        /// Trying to read a file which is not in the graph/data format.
        UnknownFileType(magic: u32) {
            description("unknown file type")
            display("unknown file type, magic 0x{:08x} not recognized", magic)
        }

        /// The file's version word fails the packed-ASCII shape check, so none of its records can
        /// be parsed safely.
        UnsupportedVersion(version: u32) {
            description("unsupported version")
            display("unsupported version 0x{:08x}", version)
        }

        /// Reached the end of a record when reading. Usually not fatal.
        Eof {
            description("encountered EOF record")
        }

        /// Encountered an unknown block/arc flag.
        UnsupportedAttr(kind: &'static str, raw_flag: u32) {
            description("unsupported flags")
            display("unsupported {} flags 0x{:x}", kind, raw_flag)
        }

        /// A function's checksum on disk differs from the in-memory one of the same name. The
        /// instrumented binary has changed since the data file was written, so their counters must
        /// not be mixed.
        ChecksumMismatch(kind: &'static str, name: String) {
            description("checksum mismatch")
            display("{} checksum mismatch for `{}`, corrupt or outdated data file", kind, name)
        }

        /// A data file being merged does not carry the same set of functions as the registered
        /// counters, e.g. the file was produced by a different build of the program.
        FunctionMismatch(name: String) {
            description("merge mismatch")
            display("merge mismatch for function `{}`", name)
        }

        /// A data file being merged contains a record the merge engine does not expect. The file
        /// is left untouched rather than rewritten around content we do not understand.
        UnexpectedRecord(tag: Tag) {
            description("unexpected record")
            display("unexpected {} record in data file", tag)
        }

        /// The expected and actual numbers of counters differ.
        CountsMismatch(kind: &'static str, ty: Type, expected: usize, actual: usize) {
            description("counts mismatch")
            display("{0} counts mismatch on *.{3}, expecting {1} {0}, received {2} {0}", kind, expected, actual, ty)
        }

        /// A counts record appeared before any function announcement.
        RecordWithoutFunction {
            description("record without function")
            display("counts record appears before any function record")
        }

        /// The flow equations cannot be solved with the provided counter values. The data file
        /// does not belong to this graph, or has been corrupted.
        UnsolvedFlowGraph(blocks: usize) {
            description("unsolved flow graph")
            display("flow graph is inconsistent with the profile, {} blocks left unsolved", blocks)
        }

        /// Wrapper of a [`Location`](enum.Location.html), describing where another error happened.
        AtLocation(location: Location) {
            description("error location")
            display("{}", location)
        }
    }
}

//----------------------------------------------------------------------------------------------------------------------

/// The source location of an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Location {
    /// No location information.
    None,
    /// Error happened when reading or writing this file.
    File(PathBuf),
    /// Error happened at this byte position of the stream.
    Cursor(u64),
    /// Error happened while handling the record with this index.
    RecordIndex(usize),
}

impl fmt::Display for Location {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Location::None => Ok(()),
            Location::File(ref path) => write!(fmt, "in file {}", path.display()),
            Location::Cursor(cursor) => write!(fmt, "at file position {0} (0x{0:x})", cursor),
            Location::RecordIndex(index) => write!(fmt, "at record index {}", index),
        }
    }
}

impl Location {
    /// Runs `f`, wrapping any error it produces with location information.
    pub fn wrap<T, E: Into<Error>, F: FnOnce() -> StdResult<T, E>>(self, f: F) -> Result<T> {
        f().map_err(|e| self.wrap_error(e))
    }

    /// Attaches location information to an existing error.
    ///
    /// End-of-file errors pass through unwrapped. They terminate the record iteration of a
    /// well-formed file, so they must stay recognizable by [`is_eof()`].
    ///
    /// [`is_eof()`]: struct.Error.html#method.is_eof
    pub fn wrap_error<E: Into<Error>>(self, e: E) -> Error {
        let error = e.into();
        if let Location::None = self {
            error
        } else if error.is_eof() {
            error
        } else {
            Error::with_chain(error, ErrorKind::AtLocation(self))
        }
    }
}

impl Error {
    /// Checks whether the error is caused by reaching the end of file.
    pub fn is_eof(&self) -> bool {
        match *self.kind() {
            ErrorKind::Io(ref e) => e.kind() == io::ErrorKind::UnexpectedEof,
            ErrorKind::Eof => true,
            _ => false,
        }
    }
}

#[test]
fn test_eof_is_never_wrapped() {
    let eof = Error::from(ErrorKind::Eof);
    let wrapped = Location::Cursor(100).wrap_error(eof);
    assert!(wrapped.is_eof());

    let other = Error::from(ErrorKind::UnknownFileType(99));
    let wrapped = Location::Cursor(100).wrap_error(other);
    assert!(!wrapped.is_eof());
    match *wrapped.kind() {
        ErrorKind::AtLocation(Location::Cursor(100)) => {},
        ref kind => panic!("unexpected error kind {:?}", kind),
    }
}
