//! BigTIFF plumbing for the SCM container.
//!
//! Every page IFD carries the same field set in ascending tag order, so an
//! IFD occupies a fixed number of bytes and can be pre-written as a
//! placeholder and later rewritten in place once strip offsets are known.

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::error::{FormatError, ScmResult};
use crate::tags::{Tag, Type};
use crate::ByteOrder;

/// BigTIFF version number.
const VERSION_BIGTIFF: u16 = 43;

/// Byte length of the file header: byte order, version, offset size, pad,
/// and the pointer to the first IFD.
pub const HEADER_LEN: u64 = 16;

/// File offset of the first-IFD pointer within the header.
pub const FIRST_IFD_POS: u64 = 8;

/// Number of fields in every page IFD.
pub const FIELD_COUNT: u64 = 17;

/// Byte length of one IFD field entry.
const ENTRY_LEN: u64 = 20;

/// Byte length of a page IFD: entry count, entries, next-IFD pointer.
pub const IFD_LEN: u64 = 8 + FIELD_COUNT * ENTRY_LEN + 8;

/// File offset of an IFD's next-IFD pointer relative to the IFD start.
pub const NEXT_POS: u64 = 8 + FIELD_COUNT * ENTRY_LEN;

/// Byte-order-aware stream with the running file offset tracked alongside,
/// so sequential writes know where values land without querying the OS.
pub struct ScmStream<S> {
    inner: S,
    byte_order: ByteOrder,
    offset: u64,
}

impl<S> ScmStream<S> {
    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    pub fn position(&self) -> u64 {
        self.offset
    }
}

impl<S: Seek> ScmStream<S> {
    pub fn new(mut inner: S, byte_order: ByteOrder) -> io::Result<Self> {
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self {
            inner,
            byte_order,
            offset: 0,
        })
    }

    pub fn goto(&mut self, offset: u64) -> io::Result<()> {
        self.inner.seek(SeekFrom::Start(offset))?;
        self.offset = offset;
        Ok(())
    }

    pub fn seek_end(&mut self) -> io::Result<u64> {
        self.offset = self.inner.seek(SeekFrom::End(0))?;
        Ok(self.offset)
    }
}

impl<S: Read> ScmStream<S> {
    pub fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.inner.read_exact(buf)?;
        self.offset += buf.len() as u64;
        Ok(())
    }

    pub fn read_u16(&mut self) -> io::Result<u16> {
        let mut n = [0u8; 2];
        self.read_exact(&mut n)?;
        Ok(match self.byte_order {
            ByteOrder::LittleEndian => u16::from_le_bytes(n),
            ByteOrder::BigEndian => u16::from_be_bytes(n),
        })
    }

    pub fn read_u32(&mut self) -> io::Result<u32> {
        let mut n = [0u8; 4];
        self.read_exact(&mut n)?;
        Ok(match self.byte_order {
            ByteOrder::LittleEndian => u32::from_le_bytes(n),
            ByteOrder::BigEndian => u32::from_be_bytes(n),
        })
    }

    pub fn read_u64(&mut self) -> io::Result<u64> {
        let mut n = [0u8; 8];
        self.read_exact(&mut n)?;
        Ok(match self.byte_order {
            ByteOrder::LittleEndian => u64::from_le_bytes(n),
            ByteOrder::BigEndian => u64::from_be_bytes(n),
        })
    }
}

impl<S: Write> ScmStream<S> {
    pub fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.inner.write_all(buf)?;
        self.offset += buf.len() as u64;
        Ok(())
    }

    pub fn write_u16(&mut self, n: u16) -> io::Result<()> {
        match self.byte_order {
            ByteOrder::LittleEndian => self.write_all(&n.to_le_bytes()),
            ByteOrder::BigEndian => self.write_all(&n.to_be_bytes()),
        }
    }

    pub fn write_u32(&mut self, n: u32) -> io::Result<()> {
        match self.byte_order {
            ByteOrder::LittleEndian => self.write_all(&n.to_le_bytes()),
            ByteOrder::BigEndian => self.write_all(&n.to_be_bytes()),
        }
    }

    pub fn write_u64(&mut self, n: u64) -> io::Result<()> {
        match self.byte_order {
            ByteOrder::LittleEndian => self.write_all(&n.to_le_bytes()),
            ByteOrder::BigEndian => self.write_all(&n.to_be_bytes()),
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    /// Pad to a two-byte boundary so the next IFD sits short-aligned.
    pub fn align(&mut self) -> io::Result<()> {
        if self.offset % 2 != 0 {
            self.write_all(&[0])?;
        }
        Ok(())
    }
}

/// Read the first two header bytes to learn the file's byte order.
pub fn sniff_byte_order<R: Read>(reader: &mut R) -> ScmResult<ByteOrder> {
    let mut magic = [0u8; 2];
    reader.read_exact(&mut magic)?;
    match &magic {
        b"II" => Ok(ByteOrder::LittleEndian),
        b"MM" => Ok(ByteOrder::BigEndian),
        _ => Err(FormatError::SignatureInvalid.into()),
    }
}

/// Write a BigTIFF header with a zero first-IFD pointer. The pointer is
/// patched by the first page append.
pub fn write_header<S: Write + Seek>(stream: &mut ScmStream<S>) -> ScmResult<()> {
    match stream.byte_order() {
        ByteOrder::LittleEndian => stream.write_all(b"II")?,
        ByteOrder::BigEndian => stream.write_all(b"MM")?,
    }
    stream.write_u16(VERSION_BIGTIFF)?;
    stream.write_u16(8)?;
    stream.write_u16(0)?;
    stream.write_u64(0)?;
    Ok(())
}

/// Validate the header at the current stream start and return the first-IFD
/// pointer. The byte order must already have been sniffed.
pub fn read_header<S: Read + Seek>(stream: &mut ScmStream<S>) -> ScmResult<u64> {
    stream.goto(0)?;

    let mut magic = [0u8; 2];
    stream.read_exact(&mut magic)?;
    match (&magic, stream.byte_order()) {
        (b"II", ByteOrder::LittleEndian) | (b"MM", ByteOrder::BigEndian) => {}
        _ => return Err(FormatError::SignatureInvalid.into()),
    }

    let version = stream.read_u16()?;
    if version != VERSION_BIGTIFF {
        return Err(FormatError::UnsupportedVersion(version).into());
    }
    let offset_size = stream.read_u16()?;
    let zero = stream.read_u16()?;
    if offset_size != 8 || zero != 0 {
        return Err(FormatError::SignatureInvalid.into());
    }

    Ok(stream.read_u64()?)
}

/// One 20-byte IFD field. The value word holds either the encoded value
/// (when it fits in eight bytes) or the file offset of the value array.
#[derive(Clone, Copy, Debug, Default)]
pub struct Field {
    pub tag: u16,
    pub ftype: u16,
    pub count: u64,
    word: [u8; 8],
}

impl Field {
    /// A field whose entire value fits the inline word: a single integer of
    /// the type's width.
    pub fn scalar(tag: Tag, ftype: Type, value: u64, bo: ByteOrder) -> Field {
        let mut word = [0u8; 8];
        pack_int(&mut word, 0, ftype.byte_len() as usize, value, bo);
        Field {
            tag: tag.to_u16(),
            ftype: ftype.to_u16(),
            count: 1,
            word,
        }
    }

    /// An array small enough to fit the inline word.
    pub fn inline_array(tag: Tag, ftype: Type, values: &[u64], bo: ByteOrder) -> Field {
        let size = ftype.byte_len() as usize;
        debug_assert!(values.len() * size <= 8);
        let mut word = [0u8; 8];
        for (i, v) in values.iter().enumerate() {
            pack_int(&mut word, i * size, size, *v, bo);
        }
        Field {
            tag: tag.to_u16(),
            ftype: ftype.to_u16(),
            count: values.len() as u64,
            word,
        }
    }

    /// An ASCII field. Strings of up to seven characters are stored inline
    /// with their terminating NUL; longer ones reference `offset`, where the
    /// caller has written the string.
    pub fn ascii(tag: Tag, text: &str, offset: u64, bo: ByteOrder) -> Field {
        let count = text.len() as u64 + 1;
        if count <= 8 {
            let mut word = [0u8; 8];
            word[..text.len()].copy_from_slice(text.as_bytes());
            Field {
                tag: tag.to_u16(),
                ftype: Type::Ascii.to_u16(),
                count,
                word,
            }
        } else {
            Field::offset(tag, Type::Ascii, count, offset, bo)
        }
    }

    /// A field whose value lives elsewhere in the file at `offset`.
    pub fn offset(tag: Tag, ftype: Type, count: u64, offset: u64, bo: ByteOrder) -> Field {
        let mut word = [0u8; 8];
        pack_int(&mut word, 0, 8, offset, bo);
        Field {
            tag: tag.to_u16(),
            ftype: ftype.to_u16(),
            count,
            word,
        }
    }

    /// An all-zero placeholder preserving only the tag, so the IFD layout
    /// stays fixed before the real value is patched in.
    pub fn empty(tag: Tag) -> Field {
        Field {
            tag: tag.to_u16(),
            ftype: 0,
            count: 0,
            word: [0u8; 8],
        }
    }

    /// Whether `count` values of the field type fit the inline word.
    pub fn is_inline(&self) -> bool {
        self.byte_len() <= 8
    }

    fn byte_len(&self) -> u64 {
        self.count
            * Type::from_u16(self.ftype)
                .map(|t| t.byte_len())
                .unwrap_or(0)
    }

    /// The value of a single-element field, or the offset word of an
    /// out-of-line one.
    pub fn value(&self, bo: ByteOrder) -> u64 {
        let len = if self.is_inline() && self.count == 1 {
            Type::from_u16(self.ftype).map(|t| t.byte_len()).unwrap_or(8) as usize
        } else {
            8
        };
        unpack_int(&self.word, 0, len.max(1), bo)
    }

    /// All values of the field widened to u64, reading the out-of-line array
    /// from the stream when the value does not fit inline.
    pub fn values<S: Read + Seek>(&self, stream: &mut ScmStream<S>) -> ScmResult<Vec<u64>> {
        let ftype = Type::from_u16(self.ftype).ok_or(FormatError::UnexpectedFieldType(
            Tag::from_u16_exhaustive(self.tag),
            self.ftype,
        ))?;
        let size = ftype.byte_len() as usize;
        let count = usize::try_from(self.count)?;
        let bo = stream.byte_order();

        let mut out = Vec::with_capacity(count);
        if self.is_inline() {
            for i in 0..count {
                out.push(unpack_int(&self.word, i * size, size, bo));
            }
        } else {
            let pos = stream.position();
            stream.goto(unpack_int(&self.word, 0, 8, bo))?;
            let mut buf = vec![0u8; count * size];
            stream.read_exact(&mut buf)?;
            stream.goto(pos)?;
            for i in 0..count {
                out.push(unpack_int(&buf, i * size, size, bo));
            }
        }
        Ok(out)
    }

    /// Read the raw bytes of an out-of-line or inline value.
    pub fn raw_bytes<S: Read + Seek>(&self, stream: &mut ScmStream<S>) -> ScmResult<Vec<u8>> {
        let len = usize::try_from(self.byte_len())?;
        if self.is_inline() {
            Ok(self.word[..len].to_vec())
        } else {
            let pos = stream.position();
            stream.goto(self.value(stream.byte_order()))?;
            let mut buf = vec![0u8; len];
            stream.read_exact(&mut buf)?;
            stream.goto(pos)?;
            Ok(buf)
        }
    }

    fn write<S: Write + Seek>(&self, stream: &mut ScmStream<S>) -> io::Result<()> {
        stream.write_u16(self.tag)?;
        stream.write_u16(self.ftype)?;
        stream.write_u64(self.count)?;
        stream.write_all(&self.word)
    }

    fn read<S: Read + Seek>(stream: &mut ScmStream<S>) -> io::Result<Field> {
        let tag = stream.read_u16()?;
        let ftype = stream.read_u16()?;
        let count = stream.read_u64()?;
        let mut word = [0u8; 8];
        stream.read_exact(&mut word)?;
        Ok(Field {
            tag,
            ftype,
            count,
            word,
        })
    }
}

fn pack_int(buf: &mut [u8], at: usize, size: usize, value: u64, bo: ByteOrder) {
    let bytes = match bo {
        ByteOrder::LittleEndian => value.to_le_bytes(),
        ByteOrder::BigEndian => value.to_be_bytes(),
    };
    match bo {
        ByteOrder::LittleEndian => buf[at..at + size].copy_from_slice(&bytes[..size]),
        ByteOrder::BigEndian => buf[at..at + size].copy_from_slice(&bytes[8 - size..]),
    }
}

fn unpack_int(buf: &[u8], at: usize, size: usize, bo: ByteOrder) -> u64 {
    let mut bytes = [0u8; 8];
    match bo {
        ByteOrder::LittleEndian => {
            bytes[..size].copy_from_slice(&buf[at..at + size]);
            u64::from_le_bytes(bytes)
        }
        ByteOrder::BigEndian => {
            bytes[8 - size..].copy_from_slice(&buf[at..at + size]);
            u64::from_be_bytes(bytes)
        }
    }
}

/// One page IFD with the fixed SCM field set, in ascending tag order.
#[derive(Clone, Debug)]
pub struct Ifd {
    pub image_width: Field,
    pub image_length: Field,
    pub bits_per_sample: Field,
    pub compression: Field,
    pub photometric: Field,
    pub description: Field,
    pub strip_offsets: Field,
    pub orientation: Field,
    pub samples_per_pixel: Field,
    pub rows_per_strip: Field,
    pub strip_byte_counts: Field,
    pub planar_config: Field,
    pub sample_format: Field,
    pub page_index: Field,
    pub page_catalog: Field,
    pub page_minima: Field,
    pub page_maxima: Field,
    pub next: u64,
}

impl Ifd {
    fn fields(&self) -> [&Field; FIELD_COUNT as usize] {
        [
            &self.image_width,
            &self.image_length,
            &self.bits_per_sample,
            &self.compression,
            &self.photometric,
            &self.description,
            &self.strip_offsets,
            &self.orientation,
            &self.samples_per_pixel,
            &self.rows_per_strip,
            &self.strip_byte_counts,
            &self.planar_config,
            &self.sample_format,
            &self.page_index,
            &self.page_catalog,
            &self.page_minima,
            &self.page_maxima,
        ]
    }

    /// Write this IFD at offset `o`, leaving the stream position just past
    /// the IFD so strip data follows directly.
    pub fn write<S: Write + Seek>(&self, stream: &mut ScmStream<S>, o: u64) -> ScmResult<()> {
        stream.goto(o)?;
        stream.write_u64(FIELD_COUNT)?;
        for field in self.fields() {
            field.write(stream)?;
        }
        stream.write_u64(self.next)?;
        Ok(())
    }

    /// Read the IFD at offset `o`. Unknown tags are skipped; fields absent
    /// from the file keep zeroed placeholders.
    pub fn read<S: Read + Seek>(stream: &mut ScmStream<S>, o: u64) -> ScmResult<Ifd> {
        stream.goto(o)?;
        let count = stream.read_u64()?;

        let mut ifd = Ifd::zeroed();
        for _ in 0..count {
            let field = Field::read(stream)?;
            match Tag::from_u16(field.tag) {
                Some(Tag::ImageWidth) => ifd.image_width = field,
                Some(Tag::ImageLength) => ifd.image_length = field,
                Some(Tag::BitsPerSample) => ifd.bits_per_sample = field,
                Some(Tag::Compression) => ifd.compression = field,
                Some(Tag::PhotometricInterpretation) => ifd.photometric = field,
                Some(Tag::ImageDescription) => ifd.description = field,
                Some(Tag::StripOffsets) => ifd.strip_offsets = field,
                Some(Tag::Orientation) => ifd.orientation = field,
                Some(Tag::SamplesPerPixel) => ifd.samples_per_pixel = field,
                Some(Tag::RowsPerStrip) => ifd.rows_per_strip = field,
                Some(Tag::StripByteCounts) => ifd.strip_byte_counts = field,
                Some(Tag::PlanarConfiguration) => ifd.planar_config = field,
                Some(Tag::SampleFormat) => ifd.sample_format = field,
                Some(Tag::PageIndex) => ifd.page_index = field,
                Some(Tag::PageCatalog) => ifd.page_catalog = field,
                Some(Tag::PageMinima) => ifd.page_minima = field,
                Some(Tag::PageMaxima) => ifd.page_maxima = field,
                Some(Tag::Unknown(_)) => {}
                None => {}
            }
        }
        ifd.next = stream.read_u64()?;
        Ok(ifd)
    }

    fn zeroed() -> Ifd {
        Ifd {
            image_width: Field::empty(Tag::ImageWidth),
            image_length: Field::empty(Tag::ImageLength),
            bits_per_sample: Field::empty(Tag::BitsPerSample),
            compression: Field::empty(Tag::Compression),
            photometric: Field::empty(Tag::PhotometricInterpretation),
            description: Field::empty(Tag::ImageDescription),
            strip_offsets: Field::empty(Tag::StripOffsets),
            orientation: Field::empty(Tag::Orientation),
            samples_per_pixel: Field::empty(Tag::SamplesPerPixel),
            rows_per_strip: Field::empty(Tag::RowsPerStrip),
            strip_byte_counts: Field::empty(Tag::StripByteCounts),
            planar_config: Field::empty(Tag::PlanarConfiguration),
            sample_format: Field::empty(Tag::SampleFormat),
            page_index: Field::empty(Tag::PageIndex),
            page_catalog: Field::empty(Tag::PageCatalog),
            page_minima: Field::empty(Tag::PageMinima),
            page_maxima: Field::empty(Tag::PageMaxima),
            next: 0,
        }
    }
}
