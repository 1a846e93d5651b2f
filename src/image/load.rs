//! Input decoders: thin glue yielding an [`Image`] plus projection
//! parameters.
//!
//! JPEG, PNG, and TIFF inputs decode through the `image` crate and carry no
//! geodetic metadata, so they sample as whole-sphere spheremaps. PDS3
//! products (`.img` with an attached label, or a detached `.lbl`) keep
//! their raster memory-mapped and select a projection from the label.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::error::LoadError;
use crate::ByteOrder;

use super::projection::torad;
use super::{Geodetic, Image, PixelBuffer, Projection};

/// Load the input at `path`, selecting a decoder by file extension.
pub fn load(path: &Path) -> Result<Image, LoadError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" | "png" | "tif" | "tiff" => load_raster(path),
        "img" | "lbl" => load_pds(path),
        _ => Err(LoadError::UnknownExtension(ext)),
    }
}

/// Decode a conventional raster through the `image` crate, preserving its
/// channel count and bit depth.
fn load_raster(path: &Path) -> Result<Image, LoadError> {
    use image::DynamicImage;

    let decoded = image::open(path)?;
    let w = decoded.width();
    let h = decoded.height();

    let (c, b, data) = match decoded {
        DynamicImage::ImageLuma8(im) => (1, 8, im.into_raw()),
        DynamicImage::ImageLumaA8(im) => (2, 8, im.into_raw()),
        DynamicImage::ImageRgb8(im) => (3, 8, im.into_raw()),
        DynamicImage::ImageRgba8(im) => (4, 8, im.into_raw()),
        DynamicImage::ImageLuma16(im) => (1, 16, bytes_of_u16(&im.into_raw())),
        DynamicImage::ImageLumaA16(im) => (2, 16, bytes_of_u16(&im.into_raw())),
        DynamicImage::ImageRgb16(im) => (3, 16, bytes_of_u16(&im.into_raw())),
        DynamicImage::ImageRgba16(im) => (4, 16, bytes_of_u16(&im.into_raw())),
        DynamicImage::ImageRgb32F(im) => (3, 32, bytes_of_f32(&im.into_raw())),
        DynamicImage::ImageRgba32F(im) => (4, 32, bytes_of_f32(&im.into_raw())),
        other => (3, 8, other.into_rgb8().into_raw()),
    };

    Ok(Image::from_buffer(
        PixelBuffer::Owned(data),
        w,
        h,
        c,
        b,
        false,
        ByteOrder::LittleEndian,
    ))
}

fn bytes_of_u16(values: &[u16]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn bytes_of_f32(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Load a PDS3 product. A `.lbl` is a detached label naming the raster
/// file; a `.img` carries its label at the start of the file.
fn load_pds(path: &Path) -> Result<Image, LoadError> {
    let text = read_label_text(path)?;
    let label = parse_label(&text);

    let w: u32 = label_num(&label, "LINE_SAMPLES")? as u32;
    let h: u32 = label_num(&label, "LINES")? as u32;
    let b: u32 = label_num(&label, "SAMPLE_BITS")? as u32;
    let c: u32 = label
        .get("BANDS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(1);

    if !matches!(b, 8 | 16 | 32) {
        return Err(LoadError::Label(format!("unsupported SAMPLE_BITS {}", b)));
    }
    if !(1..=4).contains(&c) {
        return Err(LoadError::Label(format!("unsupported BANDS {}", c)));
    }

    let sample_type = label
        .get("SAMPLE_TYPE")
        .map(String::as_str)
        .unwrap_or("MSB_UNSIGNED_INTEGER");
    let byte_order = if sample_type.contains("LSB") || sample_type.contains("PC") {
        ByteOrder::LittleEndian
    } else {
        ByteOrder::BigEndian
    };
    let signed = b < 32
        && sample_type.contains("INTEGER")
        && !sample_type.contains("UNSIGNED");

    let (raster_path, offset) = locate_raster(path, &label)?;
    let file = File::open(&raster_path)?;
    // Safety: the mapping is read-only and held for the image's lifetime.
    let map = unsafe { Mmap::map(&file)? };

    let len = w as usize * h as usize * c as usize * b as usize / 8;
    if map.len() < offset + len {
        return Err(LoadError::Label(format!(
            "raster {:?} holds {} bytes, label requires {}",
            raster_path,
            map.len(),
            offset + len
        )));
    }

    let mut img = Image::from_buffer(
        PixelBuffer::Mapped { map, start: offset },
        w,
        h,
        c,
        b,
        signed,
        byte_order,
    );

    img.projection = match label
        .get("MAP_PROJECTION_TYPE")
        .map(String::as_str)
        .unwrap_or("")
    {
        "EQUIRECTANGULAR" => Projection::Equirectangular,
        "ORTHOGRAPHIC" => Projection::Orthographic,
        "POLAR STEREOGRAPHIC" => Projection::Stereographic,
        "SIMPLE CYLINDRICAL" => Projection::Cylindrical,
        _ => Projection::Default,
    };

    img.geo = Geodetic {
        latp: torad(label_num_or(&label, "CENTER_LATITUDE", 0.0)),
        lonp: torad(label_num_or(&label, "CENTER_LONGITUDE", 0.0)),
        l0: label_num_or(&label, "LINE_PROJECTION_OFFSET", 0.0),
        s0: label_num_or(&label, "SAMPLE_PROJECTION_OFFSET", 0.0),
        res: label_num_or(&label, "MAP_RESOLUTION", 1.0),
        scale: label_num_or(&label, "MAP_SCALE", 1.0),
        radius: label_num_or(&label, "A_AXIS_RADIUS", 1.0),
    };

    Ok(img)
}

fn read_label_text(path: &Path) -> Result<String, LoadError> {
    let bytes = std::fs::read(path)?;
    // An attached label occupies the head of the file; stop at END or at
    // the first stretch of non-text.
    let printable = bytes
        .iter()
        .position(|&x| x != b'\r' && x != b'\n' && x != b'\t' && !(0x20..0x7F).contains(&x))
        .unwrap_or(bytes.len());
    Ok(String::from_utf8_lossy(&bytes[..printable]).into_owned())
}

/// Flatten a PDS3 label into keyword/value pairs. Object nesting is
/// ignored; the keys this loader consumes do not collide across objects.
fn parse_label(text: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line == "END" {
            break;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().to_owned();
        let value = value
            .trim()
            .trim_matches(|ch| ch == '"' || ch == '\'' || ch == '(' || ch == ')')
            .to_owned();
        map.entry(key).or_insert(value);
    }
    map
}

fn label_num(label: &HashMap<String, String>, key: &str) -> Result<f64, LoadError> {
    label
        .get(key)
        .and_then(|v| parse_num(v))
        .ok_or_else(|| LoadError::Label(format!("missing or malformed {}", key)))
}

fn label_num_or(label: &HashMap<String, String>, key: &str, default: f64) -> f64 {
    label.get(key).and_then(|v| parse_num(v)).unwrap_or(default)
}

/// Parse a label number, dropping a trailing units expression such as
/// `<KM/PIXEL>`.
fn parse_num(value: &str) -> Option<f64> {
    value
        .split(|ch: char| ch == '<' || ch.is_whitespace())
        .next()?
        .parse()
        .ok()
}

/// Resolve the raster file and byte offset from the `^IMAGE` pointer: a
/// quoted file name for a detached product, or a record number into the
/// labelled file itself.
fn locate_raster(
    path: &Path,
    label: &HashMap<String, String>,
) -> Result<(std::path::PathBuf, usize), LoadError> {
    match label.get("^IMAGE") {
        Some(pointer) => {
            if let Ok(record) = pointer.parse::<usize>() {
                let record_bytes = label_num(label, "RECORD_BYTES")? as usize;
                Ok((path.to_owned(), record.saturating_sub(1) * record_bytes))
            } else {
                let name = pointer.trim_matches('"');
                let sibling = path.with_file_name(name);
                Ok((sibling, 0))
            }
        }
        None if path.extension().and_then(|e| e.to_str()) == Some("lbl") => {
            // A detached label without a pointer: assume the raster sits
            // beside it with the same stem.
            Ok((path.with_extension("img"), 0))
        }
        None => Err(LoadError::Label("missing ^IMAGE pointer".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flat_label() {
        let text = "PDS_VERSION_ID = PDS3\r\n\
                    RECORD_BYTES = 1024\r\n\
                    ^IMAGE = 2\r\n\
                    OBJECT = IMAGE\r\n\
                    LINES = 180\r\n\
                    LINE_SAMPLES = 360\r\n\
                    SAMPLE_BITS = 16\r\n\
                    SAMPLE_TYPE = MSB_INTEGER\r\n\
                    END_OBJECT = IMAGE\r\n\
                    END\r\n\
                    IGNORED = 1\r\n";
        let label = parse_label(text);
        assert_eq!(label.get("LINES").unwrap(), "180");
        assert_eq!(label.get("^IMAGE").unwrap(), "2");
        assert!(!label.contains_key("IGNORED"));
    }

    #[test]
    fn number_parsing_strips_units() {
        assert_eq!(parse_num("4.0 <KM/PIXEL>"), Some(4.0));
        assert_eq!(parse_num("1737.4<KM>"), Some(1737.4));
        assert_eq!(parse_num("-90.0"), Some(-90.0));
        assert_eq!(parse_num("N/A"), None);
    }

    #[test]
    fn unknown_extension_is_rejected() {
        assert!(matches!(
            load(Path::new("input.bmp")),
            Err(LoadError::UnknownExtension(_))
        ));
    }
}
