//! The convert driver: re-projects an input raster into the pages of a
//! spherical cube map.
//!
//! For each page at the working depth, every interior pixel is sampled
//! with a five-tap quincunx filter. Pixels are independent, so each output
//! row is filled in parallel; the only shared datum is the per-page hit
//! count, a plain sum reduction. Appending to the container remains
//! strictly sequential.

use std::io::{Read, Seek, Write};

use log::{debug, info};
use rayon::prelude::*;

use crate::cube::{self, Vector};
use crate::error::ScmResult;
use crate::image::Image;
use crate::scm::Scm;

/// Corner directions of the pixel at row `i`, column `j` of an `n`-by-`n`
/// grid spanning the page corners `u`.
fn corner_vectors(u: &[Vector; 4], i: usize, j: usize, n: usize) -> [Vector; 4] {
    let r0 = i as f64 / n as f64;
    let r1 = (i + 1) as f64 / n as f64;
    let c0 = j as f64 / n as f64;
    let c1 = (j + 1) as f64 / n as f64;

    [
        cube::normalize(&cube::slerp2(&u[0], &u[1], &u[2], &u[3], c0, r0)),
        cube::normalize(&cube::slerp2(&u[0], &u[1], &u[2], &u[3], c1, r0)),
        cube::normalize(&cube::slerp2(&u[0], &u[1], &u[2], &u[3], c0, r1)),
        cube::normalize(&cube::slerp2(&u[0], &u[1], &u[2], &u[3], c1, r1)),
    ]
}

/// The five quincunx taps of a pixel: the midpoints of the center with each
/// corner, plus the center itself.
fn sample_vectors(v: &[Vector; 4]) -> [Vector; 5] {
    let center = cube::mid4(&v[0], &v[1], &v[2], &v[3]);
    [
        cube::mid2(&center, &v[0]),
        cube::mid2(&center, &v[1]),
        cube::mid2(&center, &v[2]),
        cube::mid2(&center, &v[3]),
        center,
    ]
}

/// Sample the pixel at row `i`, column `j` of the page with corners `c`,
/// accumulating into the pixel's channel slice. Returns whether any tap
/// had coverage.
fn sample(img: &Image, i: usize, j: usize, n: usize, c: &[Vector; 4], x: &mut [f32]) -> bool {
    let v = corner_vectors(c, i, j, n);
    let w = sample_vectors(&v);
    let channels = img.channels() as usize;

    let mut acc = [0.0f64; 4];
    let mut coverage = 0.0;
    for tap in &w {
        let mut t = [0.0f64; 4];
        let a = img.sample(tap, &mut t);
        if a > 0.0 {
            for k in 0..channels {
                acc[k] += t[k] / 5.0;
            }
            coverage += a;
        }
    }

    for k in 0..channels {
        x[k] += acc[k] as f32;
    }
    coverage > 0.0
}

/// Convert the input into all pages at depth `d`, appending each covered
/// page to the container. Fully uncovered pages are omitted, leaving the
/// output sparse.
pub fn process<S: Read + Write + Seek>(scm: &mut Scm<S>, img: &Image, d: u32) -> ScmResult<()> {
    let n = scm.n() as usize;
    let grid = n + 2;
    let channels = scm.channels() as usize;
    let stride = grid * channels;

    let corners = cube::corners_at_depth(d);
    let x0 = if d > 0 { cube::page_count(d - 1) } else { 0 };

    let mut page = scm.alloc_page();
    let mut prev = 0u64;
    let mut written = 0u64;

    for (p, u) in corners.iter().enumerate() {
        let x = x0 + p as u64;
        page.fill(0.0);

        // Interior rows 1..=n; the border stays zero for the neighbour
        // reconstruction pass of downstream consumers.
        let hits: usize = page[stride..stride * (n + 1)]
            .par_chunks_mut(stride)
            .enumerate()
            .map(|(r, row)| {
                let mut k = 0;
                for col in 0..n {
                    let cell = &mut row[(col + 1) * channels..(col + 2) * channels];
                    if sample(img, r, col, grid, u, cell) {
                        k += 1;
                    }
                }
                k
            })
            .sum();

        if hits > 0 {
            prev = scm.append(prev, x, &page)?;
            written += 1;
        } else {
            debug!("page {} has no coverage, skipped", x);
        }
    }

    info!(
        "wrote {} of {} pages at depth {}",
        written,
        corners.len(),
        d
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::page_corners;

    #[test]
    fn taps_are_unit_and_distinct() {
        let corners = page_corners(0);
        let v = corner_vectors(&corners, 3, 4, 10);
        let w = sample_vectors(&v);

        for tap in &w {
            assert!((cube::dot(tap, tap) - 1.0).abs() < 1e-12);
        }
        for a in 0..5 {
            for b in a + 1..5 {
                assert!(cube::dot(&w[a], &w[b]) < 1.0 - 1e-12);
            }
        }
    }

    #[test]
    fn taps_surround_the_pixel_center() {
        // The center tap is the average direction of the corner taps.
        let corners = page_corners(4);
        let v = corner_vectors(&corners, 0, 0, 6);
        let w = sample_vectors(&v);

        let sum = cube::normalize(&[
            w[0][0] + w[1][0] + w[2][0] + w[3][0],
            w[0][1] + w[1][1] + w[2][1] + w[3][1],
            w[0][2] + w[1][2] + w[2][2] + w[3][2],
        ]);
        assert!(cube::dot(&sum, &w[4]) > 1.0 - 1e-6);
    }

    #[test]
    fn fully_covered_pixel_averages_taps() {
        let img = Image::test_pattern(3);
        let corners = page_corners(0);
        let mut cell = [0.0f32; 3];
        assert!(sample(&img, 2, 2, 6, &corners, &mut cell));

        // The test pattern reads (dir + 1) / 2; every tap of face +X points
        // dominantly along +X, so channel 0 sits near 1.
        assert!(cell[0] > 0.8);
        assert!(cell[1] > 0.0 && cell[1] < 1.0);
    }
}
