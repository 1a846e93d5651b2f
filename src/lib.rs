//! Conversion of map-projected rasters into Spherical Cube Map TIFFs.
//!
//! A Spherical Cube Map (SCM) tiles the sphere with six quad-trees of
//! square pages and stores them in a BigTIFF container: one IFD per page,
//! zlib-compressed strips, a breadth-first page index on every IFD, and
//! optional appended catalog and extrema regions. Consumers navigate the
//! IFD chain or the sorted catalog and decompress pages on demand.
//!
//! The [`scm`] module implements the container, [`image`] the projected
//! input rasters, [`cube`] the sphere geometry, and [`convert`] the
//! resampling driver that ties them together.

pub mod convert;
pub mod cube;
mod error;
pub mod image;
pub mod scm;
pub mod tags;

pub use self::error::{FormatError, LoadError, ScmError, ScmResult, UsageError};
pub use self::scm::{Catalog, Scm};

/// Byte order of a raster buffer or container file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    /// little endian byte order
    LittleEndian,
    /// big endian byte order
    BigEndian,
}
