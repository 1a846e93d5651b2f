use std::error::Error;
use std::fmt;
use std::io;
use std::str;

use crate::tags::Tag;

/// SCM TIFF error kinds.
#[derive(Debug)]
pub enum ScmError {
    /// The file is not a well-formed SCM TIFF.
    FormatError(FormatError),

    /// An I/O error occurred while reading or writing the container.
    IoError(io::Error),

    /// An integer conversion to or from a platform size failed, either due to
    /// limits of the platform size or limits of the format.
    IntSizeError,

    /// A container operation was invoked with incompatible arguments.
    UsageError(UsageError),
}

/// The file is not formatted properly.
///
/// The list of variants may grow to incorporate errors of future features.
/// Matching against this exhaustively is not covered by interface stability
/// guarantees.
#[derive(Debug)]
#[non_exhaustive]
pub enum FormatError {
    SignatureInvalid,
    UnsupportedVersion(u16),
    ImageFileDirectoryNotFound,
    RequiredFieldMissing(Tag),
    UnexpectedFieldType(Tag, u16),
    UnsupportedBitDepth(u64),
    UnsupportedChannelCount(u64),
    InvalidDimensions(u64, u64),
    InconsistentStripCount { actual: u64, expected: u64 },
    UnexpectedInflatedLength { actual: usize, expected: usize },
    Inflate(io::Error),
    Deflate(io::Error),
    InvalidDescription,
}

impl fmt::Display for FormatError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        use self::FormatError::*;
        match *self {
            SignatureInvalid => write!(fmt, "TIFF signature invalid."),
            UnsupportedVersion(v) => write!(fmt, "TIFF version {} is not BigTIFF.", v),
            ImageFileDirectoryNotFound => write!(fmt, "Image file directory not found."),
            RequiredFieldMissing(tag) => write!(fmt, "Required field `{:?}` not found.", tag),
            UnexpectedFieldType(tag, t) => {
                write!(fmt, "Field `{:?}` has unexpected type {}.", tag, t)
            }
            UnsupportedBitDepth(b) => write!(fmt, "{} bits per channel is unsupported.", b),
            UnsupportedChannelCount(c) => write!(fmt, "{} channels is unsupported.", c),
            InvalidDimensions(w, h) => write!(fmt, "Invalid dimensions: {}x{}.", w, h),
            InconsistentStripCount { actual, expected } => write!(
                fmt,
                "Strip count inconsistent with rows per strip: got {}, expected {}.",
                actual, expected
            ),
            UnexpectedInflatedLength { actual, expected } => write!(
                fmt,
                "Decompression returned different amount of bytes than expected: got {}, expected {}.",
                actual, expected
            ),
            Inflate(ref e) => write!(fmt, "Strip inflate failed: {}", e),
            Deflate(ref e) => write!(fmt, "Strip deflate failed: {}", e),
            InvalidDescription => write!(fmt, "Description string is not valid ASCII."),
        }
    }
}

/// The caller attempted to use the container in a way that is incompatible
/// with a specific file.
#[derive(Debug)]
pub enum UsageError {
    /// `repeat` requires identical page geometry in source and destination.
    GeometryMismatch,
    /// A page buffer of the wrong length was supplied.
    InvalidPageLength { actual: usize, expected: usize },
}

impl fmt::Display for UsageError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use self::UsageError::*;
        match *self {
            GeometryMismatch => write!(
                fmt,
                "Source and destination disagree on page size, channels, bit depth, \
                 signedness, or rows per strip."
            ),
            InvalidPageLength { actual, expected } => write!(
                fmt,
                "Page buffer holds {} samples, page geometry requires {}.",
                actual, expected
            ),
        }
    }
}

impl fmt::Display for ScmError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        match *self {
            ScmError::FormatError(ref e) => write!(fmt, "Format error: {}", e),
            ScmError::IoError(ref e) => e.fmt(fmt),
            ScmError::IntSizeError => write!(fmt, "Platform or format size limits exceeded"),
            ScmError::UsageError(ref e) => write!(fmt, "Usage error: {}", e),
        }
    }
}

impl Error for ScmError {
    fn cause(&self) -> Option<&dyn Error> {
        match *self {
            ScmError::IoError(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ScmError {
    fn from(err: io::Error) -> ScmError {
        ScmError::IoError(err)
    }
}

impl From<str::Utf8Error> for ScmError {
    fn from(_err: str::Utf8Error) -> ScmError {
        ScmError::FormatError(FormatError::InvalidDescription)
    }
}

impl From<FormatError> for ScmError {
    fn from(err: FormatError) -> ScmError {
        ScmError::FormatError(err)
    }
}

impl From<UsageError> for ScmError {
    fn from(err: UsageError) -> ScmError {
        ScmError::UsageError(err)
    }
}

impl From<std::num::TryFromIntError> for ScmError {
    fn from(_err: std::num::TryFromIntError) -> ScmError {
        ScmError::IntSizeError
    }
}

/// Result of a container operation.
pub type ScmResult<T> = Result<T, ScmError>;

/// An input image could not be loaded.
#[derive(Debug)]
pub enum LoadError {
    IoError(io::Error),
    /// The codec for the input format rejected the file.
    Decode(image::ImageError),
    /// A PDS label was missing or malformed.
    Label(String),
    /// The file extension selects no known decoder.
    UnknownExtension(String),
}

impl fmt::Display for LoadError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        match *self {
            LoadError::IoError(ref e) => e.fmt(fmt),
            LoadError::Decode(ref e) => e.fmt(fmt),
            LoadError::Label(ref s) => write!(fmt, "PDS label error: {}", s),
            LoadError::UnknownExtension(ref s) => {
                write!(fmt, "No decoder for file extension {:?}.", s)
            }
        }
    }
}

impl Error for LoadError {
    fn cause(&self) -> Option<&dyn Error> {
        match *self {
            LoadError::IoError(ref e) => Some(e),
            LoadError::Decode(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for LoadError {
    fn from(err: io::Error) -> LoadError {
        LoadError::IoError(err)
    }
}

impl From<image::ImageError> for LoadError {
    fn from(err: image::ImageError) -> LoadError {
        LoadError::Decode(err)
    }
}
