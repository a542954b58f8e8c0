//! Rectangular dilation with the anchor semantics of common vision toolkits.
//!
//! `imageproc::morphology::dilate` only offers odd, centred squares. Stroke
//! thickening needs arbitrary `k×k` kernels (including even `k`), so this
//! is a separable max filter whose anchor sits at `k / 2`.

use image::GrayImage;

/// Dilate with a `k×k` rectangle. `k <= 1` returns a copy.
pub fn dilate_rect(image: &GrayImage, k: u32) -> GrayImage {
    if k <= 1 {
        return image.clone();
    }
    let horizontal = max_filter_rows(image, k);
    max_filter_cols(&horizontal, k)
}

fn window(k: u32) -> (i64, i64) {
    let anchor = (k / 2) as i64;
    (-anchor, k as i64 - 1 - anchor)
}

fn max_filter_rows(image: &GrayImage, k: u32) -> GrayImage {
    let (w, h) = image.dimensions();
    let (lo, hi) = window(k);
    let src = image.as_raw();
    let mut out = vec![0u8; src.len()];
    for y in 0..h as usize {
        let row = &src[y * w as usize..(y + 1) * w as usize];
        for x in 0..w as i64 {
            let a = (x + lo).max(0) as usize;
            let b = (x + hi).min(w as i64 - 1) as usize;
            out[y * w as usize + x as usize] = row[a..=b].iter().copied().max().unwrap_or(0);
        }
    }
    GrayImage::from_raw(w, h, out).unwrap_or_else(|| GrayImage::new(w, h))
}

fn max_filter_cols(image: &GrayImage, k: u32) -> GrayImage {
    let (w, h) = image.dimensions();
    let (lo, hi) = window(k);
    let mut out = GrayImage::new(w, h);
    for x in 0..w {
        for y in 0..h as i64 {
            let a = (y + lo).max(0) as u32;
            let b = (y + hi).min(h as i64 - 1) as u32;
            let v = (a..=b).map(|yy| image.get_pixel(x, yy).0[0]).max().unwrap_or(0);
            out.put_pixel(x, y as u32, image::Luma([v]));
        }
    }
    out
}
