//! Map projections relating sphere directions to raster line/sample
//! coordinates.
//!
//! Each projection derives longitude and latitude from the direction,
//! computes the source pixel position from the image's geodetic parameters,
//! and samples through the bilinear filter. The orthographic and
//! stereographic projections additionally fade their values near the limb,
//! where the source data grows unreliable.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

use crate::cube::Vector;

use super::Image;

pub(crate) fn torad(d: f64) -> f64 {
    d * PI / 180.0
}

pub(crate) fn todeg(r: f64) -> f64 {
    r * 180.0 / PI
}

/// Normalize an angle into [0, 2pi).
pub(crate) fn tolon(a: f64) -> f64 {
    let b = a % (2.0 * PI);
    if b < 0.0 {
        b + 2.0 * PI
    } else {
        b
    }
}

/// Smoothstep from 1 below `a` down to 0 above `b`.
pub(crate) fn blend(a: f64, b: f64, k: f64) -> f64 {
    if k <= a {
        return 1.0;
    }
    if b <= k {
        return 0.0;
    }
    let t = 1.0 - (k - a) / (b - a);
    3.0 * t * t - 2.0 * t * t * t
}

/// Minimum angular difference between two angles, in [0, pi].
pub(crate) fn adiff(a: f64, b: f64) -> f64 {
    let d = (a - b).abs();
    if d < PI {
        d
    } else {
        2.0 * PI - d
    }
}

/// The projection of an input raster.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Projection {
    Equirectangular,
    Orthographic,
    Stereographic,
    Cylindrical,
    /// Whole-sphere spheremap with one line per latitude step; the fallback
    /// for plain images carrying no geodetic metadata.
    Default,
    /// Analytic pattern deriving channel values from the direction itself;
    /// full coverage everywhere.
    Test,
}

impl Projection {
    /// Sample the image in the given direction, writing the channel values
    /// and returning the coverage.
    pub(crate) fn project(&self, img: &Image, v: &Vector, out: &mut [f64; 4]) -> f64 {
        match *self {
            Projection::Equirectangular => equirectangular(img, v, out),
            Projection::Orthographic => orthographic(img, v, out),
            Projection::Stereographic => stereographic(img, v, out),
            Projection::Cylindrical => cylindrical(img, v, out),
            Projection::Default => spheremap(img, v, out),
            Projection::Test => test(img, v, out),
        }
    }
}

fn equirectangular(img: &Image, v: &Vector, out: &mut [f64; 4]) -> f64 {
    let lon = tolon(v[0].atan2(-v[2]));
    let lat = v[1].asin();
    let geo = &img.geo;

    let x = geo.radius * (lon - geo.lonp) * geo.latp.cos();
    let y = geo.radius * lat;

    let l = geo.l0 - y / geo.scale;
    let s = geo.s0 + x / geo.scale;

    img.linear(l, s, out)
}

fn orthographic(img: &Image, v: &Vector, out: &mut [f64; 4]) -> f64 {
    let lon = tolon(v[0].atan2(-v[2]));
    let lat = v[1].asin();
    let geo = &img.geo;

    let x = geo.radius * lat.cos() * (lon - geo.lonp).sin();
    let y = geo.radius * lat.sin();

    let l = geo.l0 - y / geo.scale;
    let s = geo.s0 + x / geo.scale;

    let a = img.linear(l, s, out);

    let k = blend(torad(20.0), torad(40.0), adiff(lon, geo.lonp))
        * blend(torad(60.0), torad(70.0), adiff(lat, geo.latp));
    for x in out[..img.channels() as usize].iter_mut() {
        *x *= k;
    }
    a
}

fn stereographic(img: &Image, v: &Vector, out: &mut [f64; 4]) -> f64 {
    let lon = tolon(v[0].atan2(-v[2]));
    let lat = v[1].asin();
    let geo = &img.geo;

    let (x, y) = if geo.latp > 0.0 {
        let r = 2.0 * geo.radius * (FRAC_PI_4 - lat / 2.0).tan();
        (r * (lon - geo.lonp).sin(), -r * (lon - geo.lonp).cos())
    } else {
        let r = 2.0 * geo.radius * (FRAC_PI_4 + lat / 2.0).tan();
        (r * (lon - geo.lonp).sin(), r * (lon - geo.lonp).cos())
    };

    let l = geo.l0 - y / geo.scale;
    let s = geo.s0 + x / geo.scale;

    let a = img.linear(l, s, out);

    let k = blend(torad(20.0), torad(30.0), adiff(lat, geo.latp));
    for x in out[..img.channels() as usize].iter_mut() {
        *x *= k;
    }
    a
}

fn cylindrical(img: &Image, v: &Vector, out: &mut [f64; 4]) -> f64 {
    let lon = tolon(v[0].atan2(-v[2]));
    let lat = v[1].asin();
    let geo = &img.geo;

    let s = geo.s0 + geo.res * (todeg(lon) - todeg(geo.lonp));
    let l = geo.l0 - geo.res * (todeg(lat) - todeg(geo.latp));

    img.linear(l, s, out)
}

fn spheremap(img: &Image, v: &Vector, out: &mut [f64; 4]) -> f64 {
    // Unwrapped longitude in (-pi, pi]: the seam sits at the image edges.
    let lon = v[0].atan2(-v[2]);
    let lat = v[1].asin();

    let l = f64::from(img.height() - 1) * 0.5 * (FRAC_PI_2 - lat) / FRAC_PI_2;
    let s = f64::from(img.width()) * 0.5 * (PI + lon) / PI;

    img.linear(l, s, out)
}

fn test(img: &Image, v: &Vector, out: &mut [f64; 4]) -> f64 {
    let c = img.channels() as usize;
    for k in 0..c.min(3) {
        out[k] = (v[k] + 1.0) / 2.0;
    }
    if c == 4 {
        out[3] = 1.0;
    }
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tolon_wraps_into_range() {
        assert!((tolon(-PI / 2.0) - 1.5 * PI).abs() < 1e-12);
        assert!((tolon(2.5 * PI) - 0.5 * PI).abs() < 1e-12);
        assert_eq!(tolon(0.0), 0.0);
    }

    #[test]
    fn blend_edges_and_midpoint() {
        assert_eq!(blend(1.0, 2.0, 0.5), 1.0);
        assert_eq!(blend(1.0, 2.0, 3.0), 0.0);
        assert!((blend(1.0, 2.0, 1.5) - 0.5).abs() < 1e-12);
        // Degenerate window behaves as a step.
        assert_eq!(blend(1.0, 1.0, 0.9), 1.0);
        assert_eq!(blend(1.0, 1.0, 1.1), 0.0);
    }

    #[test]
    fn adiff_takes_short_way_around() {
        assert!((adiff(0.1, 2.0 * PI - 0.1) - 0.2).abs() < 1e-12);
        assert!((adiff(0.0, PI) - PI).abs() < 1e-12);
        assert_eq!(adiff(1.0, 1.0), 0.0);
    }
}
