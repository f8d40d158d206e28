//! Pure pixel calculations shared by the codec, the metric, and the search.
//!
//! All functions here are pure and testable without any I/O or encoding.

/// Fixed-point BT.601 luma weights (sum to `1 << 16`).
const LUMA_R: u32 = 19_595;
const LUMA_G: u32 = 38_470;
const LUMA_B: u32 = 7_471;

/// Convert interleaved RGB8 to a BT.601 luma plane.
///
/// Uses the same weights JPEG uses for its Y channel, so a decode → luma
/// round trip tracks the encoder's own luma and chroma error only leaks in
/// through rounding and clamping.
///
/// # Examples
/// ```
/// # use jpeg_recompress::analysis::rgb_to_luma;
/// assert_eq!(rgb_to_luma(&[255, 255, 255, 0, 0, 0]), vec![255, 0]);
/// ```
pub fn rgb_to_luma(rgb: &[u8]) -> Vec<u8> {
    rgb.chunks_exact(3)
        .map(|px| {
            let y = LUMA_R * px[0] as u32 + LUMA_G * px[1] as u32 + LUMA_B * px[2] as u32 + 32_768;
            (y >> 16) as u8
        })
        .collect()
}

/// Average chroma deviation inside 2×2 blocks.
///
/// For every complete 2×2 block, measures how far each pixel's Cb and Cr sit
/// from the block's mean chroma, which is exactly the information 4:2:0
/// subsampling throws away. Returns the mean absolute deviation per pixel
/// (in 8-bit chroma units), or `0.0` for images smaller than one block.
pub fn chroma_detail(rgb: &[u8], width: u32, height: u32) -> f64 {
    let (w, h) = (width as usize, height as usize);
    if w < 2 || h < 2 || rgb.len() < w * h * 3 {
        return 0.0;
    }

    let chroma = |x: usize, y: usize| -> (f64, f64) {
        let i = (y * w + x) * 3;
        let (r, g, b) = (rgb[i] as f64, rgb[i + 1] as f64, rgb[i + 2] as f64);
        (
            -0.168736 * r - 0.331264 * g + 0.5 * b,
            0.5 * r - 0.418688 * g - 0.081312 * b,
        )
    };

    let mut total = 0.0;
    let mut blocks = 0usize;
    for by in (0..h - 1).step_by(2) {
        for bx in (0..w - 1).step_by(2) {
            let px = [
                chroma(bx, by),
                chroma(bx + 1, by),
                chroma(bx, by + 1),
                chroma(bx + 1, by + 1),
            ];
            let mean_cb = px.iter().map(|p| p.0).sum::<f64>() / 4.0;
            let mean_cr = px.iter().map(|p| p.1).sum::<f64>() / 4.0;
            total += px
                .iter()
                .map(|p| (p.0 - mean_cb).abs() + (p.1 - mean_cr).abs())
                .sum::<f64>()
                / 4.0;
            blocks += 1;
        }
    }

    total / blocks as f64
}

/// Downscale factor applied before SSIM: `max(1, round(min(w, h) / 256))`.
///
/// Large photos are compared at roughly 256px on the short edge, which is
/// both faster and closer to how the distortion is perceived at viewing
/// distance.
pub fn ssim_scale(width: u32, height: u32) -> u32 {
    let short = width.min(height) as f64;
    ((short / 256.0).round() as u32).max(1)
}

/// Box-average a plane by an integer factor.
///
/// Returns the downscaled plane and its dimensions (`floor(w / scale)` ×
/// `floor(h / scale)`). Trailing rows/columns that do not fill a whole block
/// are dropped. Each output pixel is the rounded integer mean of its block.
pub fn downscale_plane(plane: &[u8], width: u32, height: u32, scale: u32) -> (Vec<u8>, u32, u32) {
    if scale <= 1 {
        return (plane.to_vec(), width, height);
    }
    let (w, s) = (width as usize, scale as usize);
    let out_w = width / scale;
    let out_h = height / scale;
    let area = (s * s) as u32;

    let mut out = Vec::with_capacity((out_w * out_h) as usize);
    for oy in 0..out_h as usize {
        for ox in 0..out_w as usize {
            let mut sum = 0u32;
            for y in oy * s..(oy + 1) * s {
                let row = &plane[y * w + ox * s..y * w + (ox + 1) * s];
                sum += row.iter().map(|&v| v as u32).sum::<u32>();
            }
            out.push(((sum + area / 2) / area) as u8);
        }
    }
    (out, out_w, out_h)
}

/// Midpoint of `[low, high]`, snapped down to the `step` grid anchored at `low`.
///
/// Callers guarantee `low <= high`; the result always lies in that range.
///
/// ```text
/// midpoint_quality(40, 95, 1) == 67
/// midpoint_quality(40, 95, 2) == 66
/// midpoint_quality(40, 95, 5) == 65
/// ```
pub fn midpoint_quality(low: i32, high: i32, step: i32) -> i32 {
    let step = step.max(1);
    let offset = (high - low) / 2;
    low + (offset / step) * step
}
