extern crate scmtiff;

use std::io::Cursor;

use scmtiff::convert::process;
use scmtiff::cube;
use scmtiff::image::{Image, Projection};
use scmtiff::Scm;

/// A constant-gray spheremap input: every sample reads 128/255.
fn gray_spheremap(w: u32, h: u32) -> Image {
    let mut img = Image::new(w, h, 1, 8, false);
    img.data_mut().fill(128);
    img
}

#[test]
fn constant_gray_yields_six_pages() {
    let img = gray_spheremap(16, 8);
    let mut scm = Scm::create(Cursor::new(Vec::new()), 8, 1, 8, false, "s1").unwrap();
    process(&mut scm, &img, 0).unwrap();

    let catalog = scm.scan_catalog().unwrap();
    assert_eq!(catalog.len(), 6);
    let indices: Vec<u64> = catalog.pairs().iter().map(|p| p.0).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);

    // The seam-free faces (+X, -X, -Z) reconstruct the constant exactly;
    // every face keeps its border zeroed.
    let mut page = scm.alloc_page();
    let expected = 128.0 / 255.0;
    for face in [0u64, 1, 5] {
        let o = catalog.search(face).unwrap();
        scm.read_page(o, &mut page).unwrap();
        for r in 0..10 {
            for c in 0..10 {
                let v = page[r * 10 + c];
                if r == 0 || r == 9 || c == 0 || c == 9 {
                    assert_eq!(v, 0.0, "face {} border ({}, {})", face, r, c);
                } else {
                    assert!(
                        (v - expected).abs() < 1e-6,
                        "face {} interior ({}, {}) = {}",
                        face,
                        r,
                        c,
                        v
                    );
                }
            }
        }
    }
}

#[test]
fn depth_one_emits_the_child_range() {
    let mut img = Image::new(64, 32, 1, 16, false);
    for y in 0..32usize {
        for x in 0..64usize {
            let v = (x as f32 / 64.0 * 65535.0) as u16;
            let at = (y * 64 + x) * 2;
            img.data_mut()[at..at + 2].copy_from_slice(&v.to_le_bytes());
        }
    }

    let mut scm = Scm::create(Cursor::new(Vec::new()), 4, 1, 16, false, "s2").unwrap();
    process(&mut scm, &img, 1).unwrap();

    let catalog = scm.scan_catalog().unwrap();
    assert_eq!(catalog.len(), 24);

    // No root page is present; face 0's four children are.
    assert_eq!(catalog.search(0), None);
    for k in 0..4 {
        let child = cube::page_child(0, k);
        assert!(catalog.search(child).is_some(), "child {} missing", child);
        assert_eq!(cube::page_depth(child), 1);
        assert_eq!(cube::page_parent(child), 0);
    }
    assert_eq!(
        (0..4).map(|k| cube::page_child(0, k)).collect::<Vec<_>>(),
        vec![6, 7, 8, 9]
    );
}

#[test]
fn saturation_high_input_reads_as_one() {
    // Every 32-bit sample holds the instrumentation-saturation-high code,
    // which the sampler reads as 1.0.
    let mut img = Image::new(4, 2, 1, 32, false);
    for chunk in img.data_mut().chunks_exact_mut(4) {
        chunk.copy_from_slice(&0xFF7FFFFFu32.to_le_bytes());
    }

    let mut scm = Scm::create(Cursor::new(Vec::new()), 4, 1, 32, false, "s5").unwrap();
    process(&mut scm, &img, 0).unwrap();

    let catalog = scm.scan_catalog().unwrap();
    let o = catalog.search(0).unwrap();
    let mut page = scm.alloc_page();
    scm.read_page(o, &mut page).unwrap();

    for r in 1..5 {
        for c in 1..5 {
            assert!((page[r * 6 + c] - 1.0).abs() < 1e-6);
        }
    }
}

#[test]
fn test_pattern_round_trips_through_resampling() {
    // The analytic pattern makes the expected pixel value exact up to the
    // quincunx tap radius: channel k of the sample at a pixel's center
    // direction is (dir[k] + 1) / 2.
    let img = Image::test_pattern(3);
    let n = 16u32;
    let grid = (n + 2) as usize;

    let mut scm = Scm::create(Cursor::new(Vec::new()), n, 3, 32, false, "idem").unwrap();
    process(&mut scm, &img, 0).unwrap();

    let catalog = scm.scan_catalog().unwrap();
    assert_eq!(catalog.len(), 6);

    let mut page = scm.alloc_page();
    for face in 0..6u64 {
        let corners = cube::page_corners(face);
        scm.read_page(catalog.search(face).unwrap(), &mut page).unwrap();

        for r in 0..n as usize {
            for c in 0..n as usize {
                let center = cube::normalize(&cube::slerp2(
                    &corners[0],
                    &corners[1],
                    &corners[2],
                    &corners[3],
                    (c as f64 + 0.5) / grid as f64,
                    (r as f64 + 0.5) / grid as f64,
                ));
                let at = ((r + 1) * grid + (c + 1)) * 3;
                for k in 0..3 {
                    let expected = (center[k] + 1.0) / 2.0;
                    let got = f64::from(page[at + k]);
                    assert!(
                        (got - expected).abs() < 0.02,
                        "face {} pixel ({}, {}) channel {}: {} vs {}",
                        face,
                        r,
                        c,
                        k,
                        got,
                        expected
                    );
                }
            }
        }
    }
}

#[test]
fn uncovered_faces_are_omitted() {
    // A small equirectangular map spanning only low longitudes: the -X
    // face projects entirely past the raster's right edge.
    let mut img = Image::new(4, 4, 1, 8, false);
    img.data_mut().fill(200);
    img.projection = Projection::Equirectangular;
    img.geo.l0 = 2.0;
    img.geo.s0 = 2.0;
    img.geo.scale = 1.0;
    img.geo.radius = 1.0;

    let mut scm = Scm::create(Cursor::new(Vec::new()), 8, 1, 8, false, "sparse").unwrap();
    process(&mut scm, &img, 0).unwrap();

    let catalog = scm.scan_catalog().unwrap();
    assert!(catalog.search(0).is_some(), "+X face should be covered");
    assert_eq!(catalog.search(1), None, "-X face should be omitted");
    assert!(catalog.len() < 6);
}
