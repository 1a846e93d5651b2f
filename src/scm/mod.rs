//! The SCM container: a BigTIFF file in which each page is one tile of a
//! six-rooted quad-tree over the sphere.
//!
//! Pages are appended monotonically. Each append writes a placeholder IFD,
//! the zlib-compressed strips, and the strip arrays, then rewrites the IFD
//! in place and threads it onto the predecessor's next-IFD pointer. The
//! file is never rewritten except for those two patches and, on finalize,
//! the catalog/extrema fields of every IFD.

use std::io::{Read, Seek, Write};

use log::{debug, info};

use crate::cube::page_child;
use crate::error::{FormatError, ScmResult, UsageError};
use crate::tags::{
    Tag, Type, COMPRESSION_DEFLATE, SAMPLE_FORMAT_IEEEFP, SAMPLE_FORMAT_INT, SAMPLE_FORMAT_UINT,
};
use crate::ByteOrder;

mod data;
mod ifd;

use self::data::{full_scale, SampleCodec};
use self::ifd::{Field, Ifd, ScmStream, FIRST_IFD_POS, HEADER_LEN, NEXT_POS};

/// Default number of rows per compressed strip.
const ROWS_PER_STRIP: u32 = 16;

/// A spherical cube map held in a seekable stream.
///
/// All pages share the geometry fixed at creation: `n` samples per side
/// plus a one-sample border, `c` channels, `b` bits per channel with
/// signedness `g`.
pub struct Scm<S> {
    stream: ScmStream<S>,
    n: u32,
    c: u32,
    b: u32,
    g: bool,
    r: u32,
    norm0: f64,
    norm1: f64,
    description: String,
    desc_field: Field,
}

impl<S: Read + Write + Seek> Scm<S> {
    /// Create an SCM with the given page geometry, writing the BigTIFF
    /// header and description preface. The stream is truncated logically:
    /// all content is written from position zero.
    pub fn create(
        stream: S,
        n: u32,
        c: u32,
        b: u32,
        g: bool,
        text: &str,
    ) -> ScmResult<Scm<S>> {
        if n == 0 {
            return Err(FormatError::InvalidDimensions(u64::from(n), u64::from(n)).into());
        }
        if !(1..=4).contains(&c) {
            return Err(FormatError::UnsupportedChannelCount(u64::from(c)).into());
        }
        if !matches!(b, 8 | 16 | 32) {
            return Err(FormatError::UnsupportedBitDepth(u64::from(b)).into());
        }
        if !text.is_ascii() {
            return Err(FormatError::InvalidDescription.into());
        }

        let bo = ByteOrder::LittleEndian;
        let mut stream = ScmStream::new(stream, bo)?;
        ifd::write_header(&mut stream)?;

        let desc_field = Field::ascii(Tag::ImageDescription, text, HEADER_LEN, bo);
        if text.len() + 1 > 8 {
            stream.write_all(text.as_bytes())?;
            stream.write_all(&[0])?;
        }
        stream.align()?;
        stream.flush()?;

        Ok(Scm {
            stream,
            n,
            c,
            b,
            g,
            r: ROWS_PER_STRIP,
            norm0: 0.0,
            norm1: full_scale(b, g),
            description: text.to_owned(),
            desc_field,
        })
    }

    /// Open an existing SCM, validating the header and taking the page
    /// geometry from the first IFD.
    pub fn open(mut stream: S) -> ScmResult<Scm<S>> {
        stream.seek(std::io::SeekFrom::Start(0))?;
        let bo = ifd::sniff_byte_order(&mut stream)?;
        let mut stream = ScmStream::new(stream, bo)?;

        let first = ifd::read_header(&mut stream)?;
        if first == 0 {
            return Err(FormatError::ImageFileDirectoryNotFound.into());
        }
        let ifd = Ifd::read(&mut stream, first)?;

        let width = ifd.image_width.value(bo);
        let length = ifd.image_length.value(bo);
        if width != length || width < 3 {
            return Err(FormatError::InvalidDimensions(width, length).into());
        }
        let n = u32::try_from(width)? - 2;

        let c = ifd.samples_per_pixel.value(bo);
        if !(1..=4).contains(&c) {
            return Err(FormatError::UnsupportedChannelCount(c).into());
        }
        let c = c as u32;

        let bits = ifd.bits_per_sample.values(&mut stream)?;
        let b = *bits
            .first()
            .ok_or(FormatError::RequiredFieldMissing(Tag::BitsPerSample))?;
        if !matches!(b, 8 | 16 | 32) {
            return Err(FormatError::UnsupportedBitDepth(b).into());
        }
        let b = b as u32;

        let format = ifd.sample_format.values(&mut stream)?;
        let g = format.first().copied() == Some(u64::from(SAMPLE_FORMAT_INT));

        let r = ifd.rows_per_strip.value(bo);
        if r == 0 {
            return Err(FormatError::RequiredFieldMissing(Tag::RowsPerStrip).into());
        }
        let r = u32::try_from(r)?;

        let description = if ifd.description.count > 0 {
            let raw = ifd.description.raw_bytes(&mut stream)?;
            let end = raw.iter().position(|&x| x == 0).unwrap_or(raw.len());
            std::str::from_utf8(&raw[..end])?.to_owned()
        } else {
            String::new()
        };
        let desc_field = ifd.description;

        Ok(Scm {
            stream,
            n,
            c,
            b,
            g,
            r,
            norm0: 0.0,
            norm1: full_scale(b, g),
            description,
            desc_field,
        })
    }

    /// Set the normalization window applied when encoding and decoding
    /// integer samples. A degenerate window restores the full-scale default.
    pub fn set_norm(&mut self, norm0: f64, norm1: f64) {
        if norm1 > norm0 {
            self.norm0 = norm0;
            self.norm1 = norm1;
        } else {
            self.norm0 = 0.0;
            self.norm1 = full_scale(self.b, self.g);
        }
    }

    /// Samples per page side, excluding the border.
    pub fn n(&self) -> u32 {
        self.n
    }

    /// Channels per sample.
    pub fn channels(&self) -> u32 {
        self.c
    }

    /// Bits per channel.
    pub fn bits(&self) -> u32 {
        self.b
    }

    /// Whether integer samples are signed.
    pub fn is_signed(&self) -> bool {
        self.g
    }

    /// Rows per compressed strip.
    pub fn rows_per_strip(&self) -> u32 {
        self.r
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.stream.byte_order()
    }

    /// Number of float samples in one bordered (n+2) x (n+2) page.
    pub fn page_samples(&self) -> usize {
        let side = self.n as usize + 2;
        side * side * self.c as usize
    }

    /// Allocate a zeroed buffer sized for one page.
    pub fn alloc_page(&self) -> Vec<f32> {
        vec![0.0; self.page_samples()]
    }

    fn codec(&self) -> SampleCodec {
        SampleCodec::new(self.b, self.g, self.norm0, self.norm1)
    }

    fn sample_type(&self) -> Type {
        match (self.b, self.g) {
            (8, false) => Type::Byte,
            (8, true) => Type::SByte,
            (16, false) => Type::Short,
            (16, true) => Type::SShort,
            _ => Type::Float,
        }
    }

    fn row_bytes(&self) -> usize {
        (self.n as usize + 2) * self.c as usize * (self.b as usize / 8)
    }

    fn row_samples(&self) -> usize {
        (self.n as usize + 2) * self.c as usize
    }

    fn strip_count(&self) -> u32 {
        (self.n + 2).div_ceil(self.r)
    }

    /// The geometry fields shared by every page IFD, with strip and
    /// finalize fields left as placeholders.
    fn base_ifd(&self, index: u64) -> Ifd {
        let bo = self.stream.byte_order();
        let side = u64::from(self.n) + 2;
        let bits = vec![u64::from(self.b); self.c as usize];
        let format = u64::from(match (self.b, self.g) {
            (32, _) => SAMPLE_FORMAT_IEEEFP,
            (_, true) => SAMPLE_FORMAT_INT,
            _ => SAMPLE_FORMAT_UINT,
        });
        let formats = vec![format; self.c as usize];
        let photometric = if self.c >= 3 { 2 } else { 1 };

        Ifd {
            image_width: Field::scalar(Tag::ImageWidth, Type::Long, side, bo),
            image_length: Field::scalar(Tag::ImageLength, Type::Long, side, bo),
            bits_per_sample: Field::inline_array(Tag::BitsPerSample, Type::Short, &bits, bo),
            compression: Field::scalar(
                Tag::Compression,
                Type::Short,
                u64::from(COMPRESSION_DEFLATE),
                bo,
            ),
            photometric: Field::scalar(Tag::PhotometricInterpretation, Type::Short, photometric, bo),
            description: self.desc_field,
            strip_offsets: Field::empty(Tag::StripOffsets),
            orientation: Field::scalar(Tag::Orientation, Type::Short, 1, bo),
            samples_per_pixel: Field::scalar(
                Tag::SamplesPerPixel,
                Type::Short,
                u64::from(self.c),
                bo,
            ),
            rows_per_strip: Field::scalar(Tag::RowsPerStrip, Type::Short, u64::from(self.r), bo),
            strip_byte_counts: Field::empty(Tag::StripByteCounts),
            planar_config: Field::scalar(Tag::PlanarConfiguration, Type::Short, 1, bo),
            sample_format: Field::inline_array(Tag::SampleFormat, Type::Short, &formats, bo),
            page_index: Field::scalar(Tag::PageIndex, Type::Long, index, bo),
            page_catalog: Field::empty(Tag::PageCatalog),
            page_minima: Field::empty(Tag::PageMinima),
            page_maxima: Field::empty(Tag::PageMaxima),
            next: 0,
        }
    }

    /// Build a strip array field, writing the array out of line at the
    /// current position when it does not fit the inline word.
    fn array_field(&mut self, tag: Tag, ftype: Type, values: &[u64]) -> ScmResult<Field> {
        let bo = self.stream.byte_order();
        if values.len() as u64 * ftype.byte_len() <= 8 {
            Ok(Field::inline_array(tag, ftype, values, bo))
        } else {
            let offset = self.stream.position();
            for &v in values {
                match ftype {
                    Type::Long8 => self.stream.write_u64(v)?,
                    Type::Long => self.stream.write_u32(u32::try_from(v)?)?,
                    _ => unreachable!("strip arrays are LONG or LONG8"),
                }
            }
            Ok(Field::offset(tag, ftype, values.len() as u64, offset, bo))
        }
    }

    /// Patch the predecessor's next-IFD pointer, or the header's first-IFD
    /// pointer when this is the first page.
    fn link_list(&mut self, o: u64, prev: u64) -> ScmResult<()> {
        if prev == 0 {
            self.stream.goto(FIRST_IFD_POS)?;
        } else {
            self.stream.goto(prev + NEXT_POS)?;
        }
        self.stream.write_u64(o)?;
        Ok(())
    }

    /// Append a page at end of file. `prev` is the offset of the previous
    /// IFD (zero for the first page), `index` the breadth-first page index,
    /// and `page` one bordered float page. Returns the new IFD's offset.
    pub fn append(&mut self, prev: u64, index: u64, page: &[f32]) -> ScmResult<u64> {
        if page.len() != self.page_samples() {
            return Err(UsageError::InvalidPageLength {
                actual: page.len(),
                expected: self.page_samples(),
            }
            .into());
        }

        let bo = self.stream.byte_order();
        let codec = self.codec();
        let rows = self.n as usize + 2;
        let rps = self.r as usize;

        let o = self.stream.seek_end()?;
        let mut ifd = self.base_ifd(index);
        ifd.write(&mut self.stream, o)?;

        let mut offsets = Vec::with_capacity(self.strip_count() as usize);
        let mut counts = Vec::with_capacity(self.strip_count() as usize);
        let mut raw = Vec::with_capacity(rps * self.row_bytes());

        for strip in page.chunks(rps * self.row_samples()) {
            raw.clear();
            codec.encode(strip, &mut raw, bo);
            let zipped = data::deflate(&raw)?;
            offsets.push(self.stream.position());
            counts.push(zipped.len() as u64);
            self.stream.write_all(&zipped)?;
        }
        debug_assert_eq!(offsets.len(), self.strip_count() as usize);
        debug_assert_eq!(rows.div_ceil(rps), offsets.len());

        ifd.strip_offsets = self.array_field(Tag::StripOffsets, Type::Long8, &offsets)?;
        ifd.strip_byte_counts = self.array_field(Tag::StripByteCounts, Type::Long, &counts)?;
        self.stream.align()?;

        ifd.write(&mut self.stream, o)?;
        self.link_list(o, prev)?;
        self.stream.seek_end()?;
        self.stream.flush()?;

        debug!("appended page {} at offset {}", index, o);
        Ok(o)
    }

    /// Copy the page at offset `o` of `src` into this file without
    /// re-encoding the strip data. Source and destination must share their
    /// page geometry exactly.
    pub fn repeat<T: Read + Write + Seek>(
        &mut self,
        prev: u64,
        src: &mut Scm<T>,
        o: u64,
    ) -> ScmResult<u64> {
        if self.n != src.n
            || self.c != src.c
            || self.b != src.b
            || self.g != src.g
            || self.r != src.r
        {
            return Err(UsageError::GeometryMismatch.into());
        }

        let src_bo = src.stream.byte_order();
        let src_ifd = Ifd::read(&mut src.stream, o)?;
        let index = src_ifd.page_index.value(src_bo);
        let strips = src.read_raw_strips(&src_ifd)?;

        let o = self.stream.seek_end()?;
        let mut ifd = self.base_ifd(index);
        ifd.write(&mut self.stream, o)?;

        let mut offsets = Vec::with_capacity(strips.len());
        let mut counts = Vec::with_capacity(strips.len());
        for strip in &strips {
            offsets.push(self.stream.position());
            counts.push(strip.len() as u64);
            self.stream.write_all(strip)?;
        }

        ifd.strip_offsets = self.array_field(Tag::StripOffsets, Type::Long8, &offsets)?;
        ifd.strip_byte_counts = self.array_field(Tag::StripByteCounts, Type::Long, &counts)?;
        self.stream.align()?;

        ifd.write(&mut self.stream, o)?;
        self.link_list(o, prev)?;
        self.stream.seek_end()?;
        self.stream.flush()?;

        debug!("repeated page {} at offset {}", index, o);
        Ok(o)
    }

    /// Offset of the first IFD, or zero when no page has been appended.
    pub fn rewind(&mut self) -> ScmResult<u64> {
        ifd::read_header(&mut self.stream)
    }

    /// Read the page index and next-IFD offset of the IFD at `o`.
    pub fn read_node(&mut self, o: u64) -> ScmResult<(u64, u64)> {
        let bo = self.stream.byte_order();
        let ifd = Ifd::read(&mut self.stream, o)?;
        Ok((ifd.page_index.value(bo), ifd.next))
    }

    /// Read and decode the page at IFD offset `o` into `page`.
    pub fn read_page(&mut self, o: u64, page: &mut [f32]) -> ScmResult<()> {
        if page.len() != self.page_samples() {
            return Err(UsageError::InvalidPageLength {
                actual: page.len(),
                expected: self.page_samples(),
            }
            .into());
        }

        let bo = self.stream.byte_order();
        let codec = self.codec();
        let ifd = Ifd::read(&mut self.stream, o)?;

        let offsets = ifd.strip_offsets.values(&mut self.stream)?;
        let counts = ifd.strip_byte_counts.values(&mut self.stream)?;
        let expected = u64::from(self.strip_count());
        if offsets.len() != counts.len() || offsets.len() as u64 != expected {
            return Err(FormatError::InconsistentStripCount {
                actual: offsets.len() as u64,
                expected,
            }
            .into());
        }

        let rps = self.r as usize;
        let rows = self.n as usize + 2;
        for (k, (&off, &len)) in offsets.iter().zip(&counts).enumerate() {
            let strip_rows = rps.min(rows - k * rps);
            self.stream.goto(off)?;
            let mut zipped = vec![0u8; usize::try_from(len)?];
            self.stream.read_exact(&mut zipped)?;
            let raw = data::inflate(&zipped, strip_rows * self.row_bytes())?;

            let at = k * rps * self.row_samples();
            codec.decode(&raw, &mut page[at..at + strip_rows * self.row_samples()], bo);
        }
        Ok(())
    }

    /// Read the compressed strips of an IFD verbatim.
    fn read_raw_strips(&mut self, ifd: &Ifd) -> ScmResult<Vec<Vec<u8>>> {
        let offsets = ifd.strip_offsets.values(&mut self.stream)?;
        let counts = ifd.strip_byte_counts.values(&mut self.stream)?;
        if offsets.len() != counts.len() {
            return Err(FormatError::InconsistentStripCount {
                actual: counts.len() as u64,
                expected: offsets.len() as u64,
            }
            .into());
        }

        let mut strips = Vec::with_capacity(offsets.len());
        for (&off, &len) in offsets.iter().zip(&counts) {
            self.stream.goto(off)?;
            let mut buf = vec![0u8; usize::try_from(len)?];
            self.stream.read_exact(&mut buf)?;
            strips.push(buf);
        }
        Ok(strips)
    }

    /// Walk the IFD chain collecting (page index, IFD offset) pairs, sorted
    /// by index.
    pub fn scan_catalog(&mut self) -> ScmResult<Catalog> {
        let mut pairs = Vec::new();
        let mut o = self.rewind()?;
        while o != 0 {
            let (index, next) = self.read_node(o)?;
            pairs.push((index, o));
            o = next;
        }
        Ok(Catalog::new(pairs))
    }

    /// Append the sorted catalog at end of file and link it from every IFD.
    pub fn make_catalog(&mut self) -> ScmResult<()> {
        let catalog = self.scan_catalog()?;
        if catalog.is_empty() {
            return Ok(());
        }

        let o = self.stream.seek_end()?;
        for &(x, off) in catalog.pairs() {
            self.stream.write_u64(x)?;
            self.stream.write_u64(off)?;
        }

        let bo = self.stream.byte_order();
        let field = Field::offset(
            Tag::PageCatalog,
            Type::Long8,
            2 * catalog.len() as u64,
            o,
            bo,
        );

        let mut p = self.rewind()?;
        while p != 0 {
            let mut ifd = Ifd::read(&mut self.stream, p)?;
            ifd.page_catalog = field;
            ifd.write(&mut self.stream, p)?;
            p = ifd.next;
        }
        self.stream.flush()?;

        info!("catalog of {} pages at offset {}", catalog.len(), o);
        Ok(())
    }

    /// Read the catalog linked from the first IFD, if the file was
    /// finalized with one.
    pub fn read_catalog(&mut self) -> ScmResult<Option<Catalog>> {
        let first = self.rewind()?;
        if first == 0 {
            return Ok(None);
        }
        let ifd = Ifd::read(&mut self.stream, first)?;
        if ifd.page_catalog.count == 0 {
            return Ok(None);
        }

        let flat = ifd.page_catalog.values(&mut self.stream)?;
        let pairs = flat.chunks_exact(2).map(|p| (p[0], p[1])).collect();
        Ok(Some(Catalog::new(pairs)))
    }

    /// Compute per-page channel extrema, append them, and link them from
    /// every IFD.
    ///
    /// Pages are processed deepest-last-first within the sorted catalog: a
    /// page whose four children all appear later in the catalog takes the
    /// channel-wise min/max of its children; any other page is scanned
    /// sample by sample.
    pub fn make_extrema(&mut self) -> ScmResult<()> {
        let catalog = self.scan_catalog()?;
        if catalog.is_empty() {
            return Ok(());
        }

        let l = catalog.len();
        let c = self.c as usize;
        let mut minf = vec![f32::MAX; c * l];
        let mut maxf = vec![f32::MIN; c * l];
        let mut page = self.alloc_page();

        for i in (0..l).rev() {
            let (x, off) = catalog.pairs()[i];

            let children: [Option<usize>; 4] = std::array::from_fn(|k| {
                catalog.position_from(i + 1, page_child(x, k as u64))
            });

            if children.iter().all(Option::is_some) {
                for child in children.iter().flatten() {
                    for j in 0..c {
                        minf[i * c + j] = minf[i * c + j].min(minf[child * c + j]);
                        maxf[i * c + j] = maxf[i * c + j].max(maxf[child * c + j]);
                    }
                }
            } else {
                self.read_page(off, &mut page)?;
                for sample in page.chunks_exact(c) {
                    for j in 0..c {
                        minf[i * c + j] = minf[i * c + j].min(sample[j]);
                        maxf[i * c + j] = maxf[i * c + j].max(sample[j]);
                    }
                }
            }
        }

        let bo = self.stream.byte_order();
        let codec = self.codec();
        let mut minb = Vec::with_capacity(c * l * codec.sample_len());
        let mut maxb = Vec::with_capacity(c * l * codec.sample_len());
        codec.encode(&minf, &mut minb, bo);
        codec.encode(&maxf, &mut maxb, bo);

        self.stream.seek_end()?;
        let o0 = self.stream.position();
        self.stream.write_all(&minb)?;
        let o1 = self.stream.position();
        self.stream.write_all(&maxb)?;

        let ftype = self.sample_type();
        let count = (c * l) as u64;
        let min_field = Field::offset(Tag::PageMinima, ftype, count, o0, bo);
        let max_field = Field::offset(Tag::PageMaxima, ftype, count, o1, bo);

        let mut p = self.rewind()?;
        while p != 0 {
            let mut ifd = Ifd::read(&mut self.stream, p)?;
            ifd.page_minima = min_field;
            ifd.page_maxima = max_field;
            ifd.write(&mut self.stream, p)?;
            p = ifd.next;
        }
        self.stream.flush()?;

        info!("extrema of {} pages at offsets {} and {}", l, o0, o1);
        Ok(())
    }

    /// Read the per-page extrema linked from the first IFD, if the file was
    /// finalized with them. Returned in catalog order, `channels()` floats
    /// per page.
    pub fn read_extrema(&mut self) -> ScmResult<Option<(Vec<f32>, Vec<f32>)>> {
        let first = self.rewind()?;
        if first == 0 {
            return Ok(None);
        }
        let ifd = Ifd::read(&mut self.stream, first)?;
        if ifd.page_minima.count == 0 || ifd.page_maxima.count == 0 {
            return Ok(None);
        }

        let bo = self.stream.byte_order();
        let codec = self.codec();

        let raw = ifd.page_minima.raw_bytes(&mut self.stream)?;
        let mut minima = vec![0f32; raw.len() / codec.sample_len()];
        codec.decode(&raw, &mut minima, bo);

        let raw = ifd.page_maxima.raw_bytes(&mut self.stream)?;
        let mut maxima = vec![0f32; raw.len() / codec.sample_len()];
        codec.decode(&raw, &mut maxima, bo);

        Ok(Some((minima, maxima)))
    }

    /// Append the optional trailing regions. The convert driver leaves both
    /// off by default; readers tolerate either form.
    pub fn finalize(&mut self, with_catalog: bool, with_extrema: bool) -> ScmResult<()> {
        if with_catalog {
            self.make_catalog()?;
        }
        if with_extrema {
            self.make_extrema()?;
        }
        Ok(())
    }

    /// Consume the container, returning the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream.into_inner()
    }
}

/// The sorted (page index, IFD offset) table of a container.
#[derive(Clone, Debug)]
pub struct Catalog {
    pairs: Vec<(u64, u64)>,
}

impl Catalog {
    fn new(mut pairs: Vec<(u64, u64)>) -> Catalog {
        pairs.sort_unstable_by_key(|p| p.0);
        Catalog { pairs }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs(&self) -> &[(u64, u64)] {
        &self.pairs
    }

    /// IFD offset of page `x`, if present.
    pub fn search(&self, x: u64) -> Option<u64> {
        self.position_from(0, x).map(|i| self.pairs[i].1)
    }

    /// Array position of page `x` at or after `from`, with a constant-time
    /// bounds reject ahead of the binary search.
    fn position_from(&self, from: usize, x: u64) -> Option<usize> {
        let a = self.pairs.get(from..)?;
        if a.is_empty() || x < a[0].0 || x > a[a.len() - 1].0 {
            return None;
        }
        a.binary_search_by_key(&x, |p| p.0).ok().map(|i| i + from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn memory_scm(n: u32, c: u32, b: u32, g: bool) -> Scm<Cursor<Vec<u8>>> {
        Scm::create(Cursor::new(Vec::new()), n, c, b, g, "test container").unwrap()
    }

    fn ramp_page(scm: &Scm<Cursor<Vec<u8>>>) -> Vec<f32> {
        let len = scm.page_samples();
        (0..len).map(|i| (i % 251) as f32 / 255.0).collect()
    }

    #[test]
    fn create_then_open_preserves_parameters() {
        let mut scm = memory_scm(8, 3, 16, false);
        let page = ramp_page(&scm);
        scm.append(0, 0, &page).unwrap();

        let scm = Scm::open(scm.into_inner()).unwrap();
        assert_eq!(scm.n(), 8);
        assert_eq!(scm.channels(), 3);
        assert_eq!(scm.bits(), 16);
        assert!(!scm.is_signed());
        assert_eq!(scm.rows_per_strip(), 16);
        assert_eq!(scm.description(), "test container");
    }

    #[test]
    fn open_rejects_empty_file() {
        let scm = memory_scm(8, 1, 8, false);
        assert!(matches!(
            Scm::open(scm.into_inner()),
            Err(crate::ScmError::FormatError(
                FormatError::ImageFileDirectoryNotFound
            ))
        ));
    }

    #[test]
    fn append_rejects_wrong_page_length() {
        let mut scm = memory_scm(8, 1, 8, false);
        assert!(matches!(
            scm.append(0, 0, &[0.0; 10]),
            Err(crate::ScmError::UsageError(
                UsageError::InvalidPageLength { .. }
            ))
        ));
    }

    #[test]
    fn short_description_is_inlined() {
        let mut scm = Scm::create(Cursor::new(Vec::new()), 4, 1, 8, false, "tiny").unwrap();
        let page = scm.alloc_page();
        scm.append(0, 0, &page).unwrap();

        let scm = Scm::open(scm.into_inner()).unwrap();
        assert_eq!(scm.description(), "tiny");
    }

    #[test]
    fn multi_strip_pages_round_trip() {
        // n = 30 gives a 32-row page: two full strips of 16 rows.
        let mut scm = memory_scm(30, 2, 8, false);
        let page = ramp_page(&scm);
        let o = scm.append(0, 0, &page).unwrap();

        let mut back = scm.alloc_page();
        scm.read_page(o, &mut back).unwrap();
        for (a, b) in page.iter().zip(&back) {
            assert!((a - b).abs() <= 1.0 / 255.0);
        }
    }

    #[test]
    fn ragged_final_strip_round_trips() {
        // n = 20 gives a 22-row page: one 16-row strip and one 6-row strip.
        let mut scm = memory_scm(20, 1, 16, false);
        let page = ramp_page(&scm);
        let o = scm.append(0, 3, &page).unwrap();

        let mut back = scm.alloc_page();
        scm.read_page(o, &mut back).unwrap();
        for (a, b) in page.iter().zip(&back) {
            assert!((a - b).abs() <= 1.0 / 65535.0);
        }
    }

    #[test]
    fn signed_page_round_trips() {
        let mut scm = memory_scm(6, 1, 8, true);
        let len = scm.page_samples();
        let page: Vec<f32> = (0..len)
            .map(|i| (i as f32 / len as f32) * 2.0 - 1.0)
            .collect();
        let o = scm.append(0, 0, &page).unwrap();

        let mut back = scm.alloc_page();
        scm.read_page(o, &mut back).unwrap();
        for (a, b) in page.iter().zip(&back) {
            assert!((a - b).abs() <= 1.0 / 127.0);
        }
    }

    #[test]
    fn float_page_is_bit_exact() {
        let mut scm = memory_scm(6, 2, 32, false);
        let len = scm.page_samples();
        let page: Vec<f32> = (0..len).map(|i| (i as f32).sin() * 1e3).collect();
        let o = scm.append(0, 0, &page).unwrap();

        let mut back = scm.alloc_page();
        scm.read_page(o, &mut back).unwrap();
        assert_eq!(page, back);
    }

    #[test]
    fn chain_follows_write_order() {
        let mut scm = memory_scm(4, 1, 8, false);
        let page = scm.alloc_page();

        let mut prev = 0;
        let mut offsets = Vec::new();
        for x in [2u64, 0, 5, 1] {
            prev = scm.append(prev, x, &page).unwrap();
            offsets.push(prev);
        }

        let mut o = scm.rewind().unwrap();
        for (written, &expected) in offsets.iter().enumerate() {
            assert_eq!(o, expected);
            let (index, next) = scm.read_node(o).unwrap();
            assert_eq!(index, [2u64, 0, 5, 1][written]);
            o = next;
        }
        assert_eq!(o, 0);
    }

    #[test]
    fn catalog_sorts_and_searches() {
        let mut scm = memory_scm(4, 1, 8, false);
        let page = scm.alloc_page();

        let mut prev = 0;
        let mut by_index = std::collections::HashMap::new();
        for x in [9u64, 6, 29, 0, 17] {
            prev = scm.append(prev, x, &page).unwrap();
            by_index.insert(x, prev);
        }

        let catalog = scm.scan_catalog().unwrap();
        assert_eq!(catalog.len(), 5);
        let indices: Vec<u64> = catalog.pairs().iter().map(|p| p.0).collect();
        assert_eq!(indices, vec![0, 6, 9, 17, 29]);

        for (&x, &o) in &by_index {
            assert_eq!(catalog.search(x), Some(o));
        }
        assert_eq!(catalog.search(1), None);
        assert_eq!(catalog.search(30), None);
    }

    #[test]
    fn make_catalog_links_every_ifd() {
        let mut scm = memory_scm(4, 1, 8, false);
        let page = scm.alloc_page();

        let mut prev = 0;
        for x in [4u64, 1, 3] {
            prev = scm.append(prev, x, &page).unwrap();
        }
        scm.make_catalog().unwrap();

        // Every IFD references the same catalog region.
        let bo = scm.byte_order();
        let mut seen = Vec::new();
        let mut o = scm.rewind().unwrap();
        while o != 0 {
            let ifd = Ifd::read(&mut scm.stream, o).unwrap();
            assert_eq!(ifd.page_catalog.count, 6);
            seen.push(ifd.page_catalog.value(bo));
            o = ifd.next;
        }
        assert_eq!(seen.len(), 3);
        assert!(seen.windows(2).all(|w| w[0] == w[1]));

        // And a reopened file can read it back.
        let mut scm = Scm::open(scm.into_inner()).unwrap();
        let catalog = scm.read_catalog().unwrap().unwrap();
        let indices: Vec<u64> = catalog.pairs().iter().map(|p| p.0).collect();
        assert_eq!(indices, vec![1, 3, 4]);
    }

    #[test]
    fn repeat_copies_strips_verbatim() {
        let mut src = memory_scm(8, 1, 8, false);
        let page = ramp_page(&src);
        let o1 = src.append(0, 7, &page).unwrap();
        let o2 = src.append(o1, 8, &page).unwrap();

        let mut dst = memory_scm(8, 1, 8, false);
        let p1 = dst.repeat(0, &mut src, o1).unwrap();
        dst.repeat(p1, &mut src, o2).unwrap();

        let src_ifd = Ifd::read(&mut src.stream, o1).unwrap();
        let dst_ifd = Ifd::read(&mut dst.stream, p1).unwrap();
        assert_eq!(
            src.read_raw_strips(&src_ifd).unwrap(),
            dst.read_raw_strips(&dst_ifd).unwrap()
        );

        let catalog = dst.scan_catalog().unwrap();
        assert_eq!(catalog.search(7), Some(p1));

        let mut back = dst.alloc_page();
        dst.read_page(p1, &mut back).unwrap();
        for (a, b) in page.iter().zip(&back) {
            assert!((a - b).abs() <= 1.0 / 255.0);
        }
    }

    #[test]
    fn repeat_rejects_mismatched_geometry() {
        let mut src = memory_scm(8, 1, 8, false);
        let page = src.alloc_page();
        let o = src.append(0, 0, &page).unwrap();

        let mut dst = memory_scm(8, 1, 16, false);
        assert!(matches!(
            dst.repeat(0, &mut src, o),
            Err(crate::ScmError::UsageError(UsageError::GeometryMismatch))
        ));
    }

    #[test]
    fn extrema_merge_from_children() {
        let mut scm = memory_scm(4, 1, 8, false);
        let len = scm.page_samples();

        // Root page 0 and its four children, each a constant page.
        let mut prev = 0;
        prev = scm.append(prev, 0, &vec![0.5; len]).unwrap();
        for (k, v) in [(0u64, 0.2f32), (1, 0.8), (2, 0.4), (3, 0.6)] {
            prev = scm.append(prev, 6 + k, &vec![v; len]).unwrap();
        }
        // A lone page elsewhere, scanned directly.
        scm.append(prev, 3, &vec![1.0; len]).unwrap();

        scm.make_extrema().unwrap();
        let (minima, maxima) = scm.read_extrema().unwrap().unwrap();
        assert_eq!(minima.len(), 6);

        // Catalog order: 0, 3, 6, 7, 8, 9. Page 0 merges its children's
        // extrema and ignores its own samples.
        let tol = 1.0 / 255.0;
        assert!((minima[0] - 0.2).abs() <= tol);
        assert!((maxima[0] - 0.8).abs() <= tol);
        assert!((minima[1] - 1.0).abs() <= tol);
        assert!((maxima[1] - 1.0).abs() <= tol);
        assert!((minima[2] - 0.2).abs() <= tol);
        assert!((maxima[5] - 0.6).abs() <= tol);
    }

    #[test]
    fn extrema_are_monotone_over_descendants() {
        let mut scm = memory_scm(4, 2, 16, false);
        let len = scm.page_samples();

        let mut prev = 0;
        let mut value = 0.05f32;
        for x in [0u64, 6, 7, 8, 9] {
            let page: Vec<f32> = (0..len)
                .map(|i| value + (i % 7) as f32 * 0.01)
                .collect();
            prev = scm.append(prev, x, &page).unwrap();
            value += 0.1;
        }

        scm.make_extrema().unwrap();
        let (minima, maxima) = scm.read_extrema().unwrap().unwrap();

        let catalog = scm.scan_catalog().unwrap();
        let root = catalog.pairs().iter().position(|p| p.0 == 0).unwrap();
        for child in 1..5 {
            for j in 0..2 {
                assert!(minima[root * 2 + j] <= minima[child * 2 + j]);
                assert!(maxima[root * 2 + j] >= maxima[child * 2 + j]);
            }
        }
    }
}
