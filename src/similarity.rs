//! Structural similarity (SSIM) between two luma planes.
//!
//! ## Algorithm
//!
//! 1. Both planes are box-downscaled by [`ssim_scale`] (about 256px on the
//!    short edge) unless `metric.downscale` is off.
//! 2. Square windows of `metric.window` pixels are placed every
//!    `metric.stride` pixels over the valid region. A plane thinner than the
//!    window shrinks the window to its short edge.
//! 3. Per window, mean, variance and covariance come from exact integer
//!    summed-area tables and are combined with the standard SSIM formula
//!    (`C1 = (0.01·255)²`, `C2 = (0.03·255)²`).
//! 4. The score is the mean over all windows, clamped to `[0, 1]`.
//!
//! ## Determinism
//!
//! Window statistics are integers, so they do not depend on summation order.
//! With `metric.parallel` the window rows are scored on the rayon pool, but
//! the per-row sums are collected in row order and added sequentially: the
//! result is bit-identical for any thread count. The same construction makes
//! `ssim(a, a) == 1.0` and `ssim(a, b) == ssim(b, a)` hold exactly.

use crate::analysis::{downscale_plane, ssim_scale};
use crate::config::MetricConfig;
use rayon::prelude::*;
use std::borrow::Cow;
use thiserror::Error;

const C1: f64 = (0.01 * 255.0) * (0.01 * 255.0);
const C2: f64 = (0.03 * 255.0) * (0.03 * 255.0);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimilarityError {
    #[error("dimension mismatch: {left_width}x{left_height} vs {right_width}x{right_height}")]
    DimensionMismatch {
        left_width: u32,
        left_height: u32,
        right_width: u32,
        right_height: u32,
    },
    #[error("invalid buffer: {0}")]
    InvalidBuffer(String),
}

/// Borrowed 8-bit luma plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LumaView<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
}

impl<'a> LumaView<'a> {
    pub fn new(data: &'a [u8], width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
        }
    }
}

/// SSIM of two same-sized luma planes, in `[0, 1]`.
pub fn ssim(a: LumaView<'_>, b: LumaView<'_>, metric: &MetricConfig) -> Result<f64, SimilarityError> {
    if a.width != b.width || a.height != b.height {
        return Err(SimilarityError::DimensionMismatch {
            left_width: a.width,
            left_height: a.height,
            right_width: b.width,
            right_height: b.height,
        });
    }
    check_buffer(&a, "first")?;
    check_buffer(&b, "second")?;

    let stride = metric.stride.max(1) as usize;
    let scale = if metric.downscale {
        ssim_scale(a.width, a.height)
    } else {
        1
    };
    let (pa, width, height) = scaled(a, scale);
    let (pb, _, _) = scaled(b, scale);

    // Planes narrower than the window are scored with the largest square
    // that fits, down to single pixels.
    let window = metric.window.max(1).min(width).min(height);

    let tables = SummedAreas::new(&pa, &pb, width as usize, height as usize);
    let window = window as usize;
    let rows: Vec<usize> = (0..=height as usize - window).step_by(stride).collect();
    let cols: Vec<usize> = (0..=width as usize - window).step_by(stride).collect();

    let score_row = |&y: &usize| -> f64 {
        cols.iter()
            .map(|&x| tables.window_ssim(x, y, window))
            .sum::<f64>()
    };
    let row_sums: Vec<f64> = if metric.parallel {
        rows.par_iter().map(score_row).collect()
    } else {
        rows.iter().map(score_row).collect()
    };

    let total: f64 = row_sums.iter().sum();
    let count = (rows.len() * cols.len()) as f64;
    Ok((total / count).clamp(0.0, 1.0))
}

fn check_buffer(view: &LumaView<'_>, which: &str) -> Result<(), SimilarityError> {
    if view.data.is_empty() || view.width == 0 || view.height == 0 {
        return Err(SimilarityError::InvalidBuffer(format!("{which} buffer is empty")));
    }
    let expected = view.width as usize * view.height as usize;
    if view.data.len() != expected {
        return Err(SimilarityError::InvalidBuffer(format!(
            "{which} buffer holds {} bytes, {}x{} needs {expected}",
            view.data.len(),
            view.width,
            view.height
        )));
    }
    Ok(())
}

fn scaled<'a>(view: LumaView<'a>, scale: u32) -> (Cow<'a, [u8]>, u32, u32) {
    if scale <= 1 {
        (Cow::Borrowed(view.data), view.width, view.height)
    } else {
        let (plane, w, h) = downscale_plane(view.data, view.width, view.height, scale);
        (Cow::Owned(plane), w, h)
    }
}

/// Inclusive-prefix sums of x, y, x², y² and xy over a `(w+1)×(h+1)` grid.
struct SummedAreas {
    stride: usize,
    x: Vec<u64>,
    y: Vec<u64>,
    xx: Vec<u64>,
    yy: Vec<u64>,
    xy: Vec<u64>,
}

/// Window sums of the five tables.
struct WindowSums {
    x: u64,
    y: u64,
    xx: u64,
    yy: u64,
    xy: u64,
}

impl SummedAreas {
    fn new(a: &[u8], b: &[u8], width: usize, height: usize) -> Self {
        let stride = width + 1;
        let size = stride * (height + 1);
        let mut tables = Self {
            stride,
            x: vec![0; size],
            y: vec![0; size],
            xx: vec![0; size],
            yy: vec![0; size],
            xy: vec![0; size],
        };

        for row in 0..height {
            let (mut rx, mut ry, mut rxx, mut ryy, mut rxy) = (0u64, 0u64, 0u64, 0u64, 0u64);
            for col in 0..width {
                let pa = a[row * width + col] as u64;
                let pb = b[row * width + col] as u64;
                rx += pa;
                ry += pb;
                rxx += pa * pa;
                ryy += pb * pb;
                rxy += pa * pb;

                let above = row * stride + col + 1;
                let here = (row + 1) * stride + col + 1;
                tables.x[here] = tables.x[above] + rx;
                tables.y[here] = tables.y[above] + ry;
                tables.xx[here] = tables.xx[above] + rxx;
                tables.yy[here] = tables.yy[above] + ryy;
                tables.xy[here] = tables.xy[above] + rxy;
            }
        }
        tables
    }

    fn sums(&self, x: usize, y: usize, size: usize) -> WindowSums {
        let top_left = y * self.stride + x;
        let top_right = y * self.stride + x + size;
        let bottom_left = (y + size) * self.stride + x;
        let bottom_right = (y + size) * self.stride + x + size;
        let rect = |t: &[u64]| (t[bottom_right] + t[top_left]) - (t[top_right] + t[bottom_left]);
        WindowSums {
            x: rect(&self.x),
            y: rect(&self.y),
            xx: rect(&self.xx),
            yy: rect(&self.yy),
            xy: rect(&self.xy),
        }
    }

    fn window_ssim(&self, x: usize, y: usize, size: usize) -> f64 {
        let s = self.sums(x, y, size);
        let n = (size * size) as i64;
        let nf = n as f64;
        let n2 = (n * n) as f64;

        let (sx, sy) = (s.x as i64, s.y as i64);
        let var_x = (n * s.xx as i64 - sx * sx) as f64 / n2;
        let var_y = (n * s.yy as i64 - sy * sy) as f64 / n2;
        let cov = (n * s.xy as i64 - sx * sy) as f64 / n2;
        let mu_x = sx as f64 / nf;
        let mu_y = sy as f64 / nf;

        let numerator = (2.0 * (mu_x * mu_y) + C1) * (2.0 * cov + C2);
        let denominator = (mu_x * mu_x + mu_y * mu_y + C1) * (var_x + var_y + C2);
        numerator / denominator
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric() -> MetricConfig {
        MetricConfig::default()
    }

    fn pattern(width: u32, height: u32, seed: u32) -> Vec<u8> {
        let mut state = seed.wrapping_mul(2_654_435_761).max(1);
        (0..width * height)
            .map(|i| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                let (x, y) = (i % width, i / width);
                ((x * 3 + y * 5) as u8).wrapping_add((state % 32) as u8)
            })
            .collect()
    }

    #[test]
    fn identical_planes_score_exactly_one() {
        for (w, h) in [(8, 8), (37, 21), (300, 200), (700, 530)] {
            let data = pattern(w, h, 7);
            let view = LumaView::new(&data, w, h);
            assert_eq!(ssim(view, view, &metric()).unwrap(), 1.0, "{w}x{h}");
        }
    }

    #[test]
    fn uniform_planes_score_one() {
        let data = vec![17u8; 32 * 32];
        let view = LumaView::new(&data, 32, 32);
        assert_eq!(ssim(view, view, &metric()).unwrap(), 1.0);
    }

    #[test]
    fn score_is_symmetric() {
        let a = pattern(64, 48, 1);
        let b = pattern(64, 48, 2);
        let va = LumaView::new(&a, 64, 48);
        let vb = LumaView::new(&b, 64, 48);
        let ab = ssim(va, vb, &metric()).unwrap();
        let ba = ssim(vb, va, &metric()).unwrap();
        assert_eq!(ab, ba);
        assert!(ab < 1.0);
    }

    #[test]
    fn more_distortion_scores_lower() {
        let a = pattern(64, 64, 3);
        let distort = |amount: i32| -> Vec<u8> {
            a.iter()
                .enumerate()
                .map(|(i, &v)| {
                    let d = if i % 2 == 0 { amount } else { -amount };
                    (v as i32 + d).clamp(0, 255) as u8
                })
                .collect()
        };
        let mild = distort(2);
        let heavy = distort(20);
        let va = LumaView::new(&a, 64, 64);
        let s_mild = ssim(va, LumaView::new(&mild, 64, 64), &metric()).unwrap();
        let s_heavy = ssim(va, LumaView::new(&heavy, 64, 64), &metric()).unwrap();
        assert!(s_mild > s_heavy, "{s_mild} <= {s_heavy}");
        assert!(s_heavy >= 0.0);
    }

    #[test]
    fn inverted_image_clamps_to_zero_or_more() {
        let a = pattern(32, 32, 4);
        let inverted: Vec<u8> = a.iter().map(|v| 255 - v).collect();
        let score = ssim(
            LumaView::new(&a, 32, 32),
            LumaView::new(&inverted, 32, 32),
            &metric(),
        )
        .unwrap();
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn parallel_and_sequential_agree_bitwise() {
        let a = pattern(513, 389, 5);
        let b = pattern(513, 389, 6);
        let sequential = MetricConfig {
            parallel: false,
            ..MetricConfig::default()
        };
        let parallel = MetricConfig {
            parallel: true,
            ..MetricConfig::default()
        };
        let va = LumaView::new(&a, 513, 389);
        let vb = LumaView::new(&b, 513, 389);
        let s1 = ssim(va, vb, &sequential).unwrap();
        let s2 = ssim(va, vb, &parallel).unwrap();
        assert_eq!(s1.to_bits(), s2.to_bits());
    }

    #[test]
    fn stride_reduces_window_count_but_keeps_self_similarity() {
        let a = pattern(40, 40, 8);
        let coarse = MetricConfig {
            stride: 4,
            ..MetricConfig::default()
        };
        let view = LumaView::new(&a, 40, 40);
        assert_eq!(ssim(view, view, &coarse).unwrap(), 1.0);
    }

    #[test]
    fn mismatched_dimensions_error() {
        let a = vec![0u8; 16 * 16];
        let b = vec![0u8; 16 * 8 * 2];
        let err = ssim(LumaView::new(&a, 16, 16), LumaView::new(&b, 32, 8), &metric()).unwrap_err();
        assert_eq!(
            err,
            SimilarityError::DimensionMismatch {
                left_width: 16,
                left_height: 16,
                right_width: 32,
                right_height: 8,
            }
        );
    }

    #[test]
    fn empty_buffer_is_invalid() {
        let err = ssim(LumaView::new(&[], 0, 0), LumaView::new(&[], 0, 0), &metric()).unwrap_err();
        assert!(matches!(err, SimilarityError::InvalidBuffer(_)));
    }

    #[test]
    fn thin_planes_shrink_the_window() {
        for (w, h) in [(7, 20), (400, 6), (1, 1), (3, 1)] {
            let a = pattern(w, h, 9);
            let view = LumaView::new(&a, w, h);
            assert_eq!(ssim(view, view, &metric()).unwrap(), 1.0, "{w}x{h}");
        }
    }

    #[test]
    fn thin_plane_distortion_scores_below_one() {
        let a = pattern(400, 6, 10);
        let b: Vec<u8> = a.iter().map(|v| v.saturating_add(40)).collect();
        let score = ssim(
            LumaView::new(&a, 400, 6),
            LumaView::new(&b, 400, 6),
            &metric(),
        )
        .unwrap();
        assert!(score > 0.0 && score < 1.0, "{score}");
    }

    #[test]
    fn single_pixel_compares_luminance_only() {
        let a = [100u8];
        let b = [110u8];
        let score = ssim(LumaView::new(&a, 1, 1), LumaView::new(&b, 1, 1), &metric()).unwrap();
        let expected = (2.0 * 100.0 * 110.0 + C1) / (100.0 * 100.0 + 110.0 * 110.0 + C1);
        assert!((score - expected).abs() < 1e-12, "{score} vs {expected}");
    }

    #[test]
    fn short_buffer_is_invalid() {
        let a = vec![0u8; 10];
        let b = vec![0u8; 64];
        let err = ssim(LumaView::new(&a, 8, 8), LumaView::new(&b, 8, 8), &metric()).unwrap_err();
        assert!(matches!(err, SimilarityError::InvalidBuffer(msg) if msg.contains("first")));
    }
}
