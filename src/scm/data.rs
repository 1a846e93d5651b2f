//! Strip data conversion: float samples to and from the container's native
//! binary representation, and zlib compression of the result.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{FormatError, ScmResult};
use crate::ByteOrder;

/// Full-scale magnitude of the container's integer representation.
pub(crate) fn full_scale(bits: u32, signed: bool) -> f64 {
    match (bits, signed) {
        (8, false) => 255.0,
        (8, true) => 127.0,
        (16, false) => 65535.0,
        (16, true) => 32767.0,
        _ => 1.0,
    }
}

/// Converts float samples to the container's (bits, signedness) encoding and
/// back, applying the normalization window symmetrically. With the default
/// window the conversion is plain full-scale quantization; 32-bit float
/// containers carry raw IEEE bits and ignore the window.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SampleCodec {
    bits: u32,
    signed: bool,
    norm0: f64,
    knorm: f64,
}

impl SampleCodec {
    pub fn new(bits: u32, signed: bool, norm0: f64, norm1: f64) -> SampleCodec {
        let full = full_scale(bits, signed);
        let (norm0, knorm) = if norm1 > norm0 {
            (norm0, 1.0 / (norm1 - norm0))
        } else {
            (0.0, 1.0 / full)
        };
        SampleCodec {
            bits,
            signed,
            norm0,
            knorm,
        }
    }

    /// Bytes per encoded sample.
    pub fn sample_len(&self) -> usize {
        self.bits as usize / 8
    }

    fn window(&self, v: f64) -> f64 {
        let full = full_scale(self.bits, self.signed);
        let lo = if self.signed { -1.0 } else { 0.0 };
        ((v * full - self.norm0) * self.knorm).clamp(lo, 1.0)
    }

    fn unwindow(&self, t: f64) -> f32 {
        let full = full_scale(self.bits, self.signed);
        ((t / self.knorm + self.norm0) / full) as f32
    }

    /// Append the encoding of `src` to `dst`.
    pub fn encode(&self, src: &[f32], dst: &mut Vec<u8>, bo: ByteOrder) {
        match (self.bits, self.signed) {
            (8, false) => {
                for &v in src {
                    dst.push((self.window(f64::from(v)) * 255.0).round() as u8);
                }
            }
            (8, true) => {
                for &v in src {
                    dst.push((self.window(f64::from(v)) * 127.0).round() as i8 as u8);
                }
            }
            (16, false) => {
                for &v in src {
                    let q = (self.window(f64::from(v)) * 65535.0).round() as u16;
                    match bo {
                        ByteOrder::LittleEndian => dst.extend_from_slice(&q.to_le_bytes()),
                        ByteOrder::BigEndian => dst.extend_from_slice(&q.to_be_bytes()),
                    }
                }
            }
            (16, true) => {
                for &v in src {
                    let q = (self.window(f64::from(v)) * 32767.0).round() as i16;
                    match bo {
                        ByteOrder::LittleEndian => dst.extend_from_slice(&q.to_le_bytes()),
                        ByteOrder::BigEndian => dst.extend_from_slice(&q.to_be_bytes()),
                    }
                }
            }
            _ => {
                for &v in src {
                    let q = v.to_bits();
                    match bo {
                        ByteOrder::LittleEndian => dst.extend_from_slice(&q.to_le_bytes()),
                        ByteOrder::BigEndian => dst.extend_from_slice(&q.to_be_bytes()),
                    }
                }
            }
        }
    }

    /// Decode `dst.len()` samples from `src`.
    pub fn decode(&self, src: &[u8], dst: &mut [f32], bo: ByteOrder) {
        debug_assert_eq!(src.len(), dst.len() * self.sample_len());
        match (self.bits, self.signed) {
            (8, false) => {
                for (v, &q) in dst.iter_mut().zip(src) {
                    *v = self.unwindow(f64::from(q) / 255.0);
                }
            }
            (8, true) => {
                for (v, &q) in dst.iter_mut().zip(src) {
                    *v = self.unwindow(f64::from(q as i8) / 127.0);
                }
            }
            (16, false) => {
                for (v, q) in dst.iter_mut().zip(src.chunks_exact(2)) {
                    let q = match bo {
                        ByteOrder::LittleEndian => u16::from_le_bytes([q[0], q[1]]),
                        ByteOrder::BigEndian => u16::from_be_bytes([q[0], q[1]]),
                    };
                    *v = self.unwindow(f64::from(q) / 65535.0);
                }
            }
            (16, true) => {
                for (v, q) in dst.iter_mut().zip(src.chunks_exact(2)) {
                    let q = match bo {
                        ByteOrder::LittleEndian => i16::from_le_bytes([q[0], q[1]]),
                        ByteOrder::BigEndian => i16::from_be_bytes([q[0], q[1]]),
                    };
                    *v = self.unwindow(f64::from(q) / 32767.0);
                }
            }
            _ => {
                for (v, q) in dst.iter_mut().zip(src.chunks_exact(4)) {
                    let q = match bo {
                        ByteOrder::LittleEndian => u32::from_le_bytes([q[0], q[1], q[2], q[3]]),
                        ByteOrder::BigEndian => u32::from_be_bytes([q[0], q[1], q[2], q[3]]),
                    };
                    *v = f32::from_bits(q);
                }
            }
        }
    }
}

/// Zlib-deflate one strip.
pub(crate) fn deflate(bytes: &[u8]) -> ScmResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .and_then(|_| encoder.finish())
        .map_err(|e| FormatError::Deflate(e).into())
}

/// Zlib-inflate one strip, checking the inflated length against the strip
/// geometry.
pub(crate) fn inflate(bytes: &[u8], expected: usize) -> ScmResult<Vec<u8>> {
    let mut out = Vec::with_capacity(expected);
    ZlibDecoder::new(bytes)
        .read_to_end(&mut out)
        .map_err(FormatError::Inflate)?;
    if out.len() != expected {
        return Err(FormatError::UnexpectedInflatedLength {
            actual: out.len(),
            expected,
        }
        .into());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_window_is_full_scale() {
        let codec = SampleCodec::new(8, false, 0.0, 255.0);
        let mut bytes = Vec::new();
        codec.encode(&[0.0, 0.5, 1.0], &mut bytes, ByteOrder::LittleEndian);
        assert_eq!(bytes, vec![0, 128, 255]);

        let mut back = [0f32; 3];
        codec.decode(&bytes, &mut back, ByteOrder::LittleEndian);
        assert!((back[1] - 128.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn degenerate_window_falls_back() {
        // b = 32 leaves the window at 0/0; integer types must not divide by it.
        let codec = SampleCodec::new(16, false, 0.0, 0.0);
        let mut bytes = Vec::new();
        codec.encode(&[1.0], &mut bytes, ByteOrder::LittleEndian);
        assert_eq!(bytes, vec![0xFF, 0xFF]);
    }

    #[test]
    fn custom_window_round_trips() {
        let codec = SampleCodec::new(16, false, 100.0, 1000.0);
        let src = [0.002, 0.005, 0.01];
        let mut bytes = Vec::new();
        codec.encode(&src, &mut bytes, ByteOrder::LittleEndian);

        let mut back = [0f32; 3];
        codec.decode(&bytes, &mut back, ByteOrder::LittleEndian);
        for (a, b) in src.iter().zip(&back) {
            assert!((a - b).abs() < 1e-4, "{} vs {}", a, b);
        }
    }

    #[test]
    fn signed_samples_round_trip() {
        let codec = SampleCodec::new(8, true, 0.0, 127.0);
        let src = [-1.0, -0.5, 0.0, 0.5, 1.0];
        let mut bytes = Vec::new();
        codec.encode(&src, &mut bytes, ByteOrder::LittleEndian);

        let mut back = [0f32; 5];
        codec.decode(&bytes, &mut back, ByteOrder::LittleEndian);
        for (a, b) in src.iter().zip(&back) {
            assert!((a - b).abs() <= 1.0 / 127.0);
        }
    }

    #[test]
    fn float_samples_are_bit_exact() {
        let codec = SampleCodec::new(32, false, 0.0, 0.0);
        let src = [0.25f32, -17.5, 1e-20, f32::MAX];
        let mut bytes = Vec::new();
        codec.encode(&src, &mut bytes, ByteOrder::BigEndian);

        let mut back = [0f32; 4];
        codec.decode(&bytes, &mut back, ByteOrder::BigEndian);
        assert_eq!(src, back);
    }

    #[test]
    fn deflate_inflate_round_trip() {
        let data: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let packed = deflate(&data).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(inflate(&packed, data.len()).unwrap(), data);
    }

    #[test]
    fn inflate_rejects_short_data() {
        let packed = deflate(&[1, 2, 3]).unwrap();
        assert!(inflate(&packed, 4).is_err());
    }
}
