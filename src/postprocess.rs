use image::{GrayImage, Luma};
use rayon::prelude::*;

use crate::errors::{Result, SegMaskError};
use crate::types::{Interpolation, UpsampledMask};

/// Resample a model-resolution mask onto the source frame's pixel grid.
///
/// Pixel centres are aligned (`src = (dst + 0.5) * scale - 0.5`), so equal source
/// and target sizes map every pixel onto itself. Values are not clamped.
pub fn upsample(
    mask: &[f32],
    model_width: u32,
    model_height: u32,
    target_width: u32,
    target_height: u32,
    interpolation: Interpolation,
) -> Result<UpsampledMask> {
    let _span = tracing::debug_span!("postprocess").entered();

    if model_width == 0 || model_height == 0 || target_width == 0 || target_height == 0 {
        return Err(SegMaskError::validation(
            "mask size",
            format!(
                "cannot resample {}x{} to {}x{}",
                model_width, model_height, target_width, target_height
            ),
        ));
    }
    let expected = model_width as usize * model_height as usize;
    if mask.len() != expected {
        return Err(SegMaskError::validation(
            "mask",
            format!(
                "has {} values, model declares {}x{}",
                mask.len(),
                model_width,
                model_height
            ),
        ));
    }

    let values = match interpolation {
        Interpolation::Bilinear => bilinear(
            mask,
            model_width as usize,
            model_height as usize,
            target_width as usize,
            target_height as usize,
        ),
        Interpolation::Nearest => nearest(
            mask,
            model_width as usize,
            model_height as usize,
            target_width as usize,
            target_height as usize,
        ),
    };

    UpsampledMask::new(target_width, target_height, values)
}

/// Render a mask as 8-bit grayscale for inspection.
pub fn mask_to_luma(mask: &UpsampledMask) -> GrayImage {
    let width = mask.width();
    let values = mask.values();
    GrayImage::from_fn(width, mask.height(), |x, y| {
        let value = values[(y * width + x) as usize];
        Luma([(value * 255.0).round().clamp(0.0, 255.0) as u8])
    })
}

/// Source-axis sample position for each destination index.
struct AxisSample {
    lower: usize,
    upper: usize,
    weight: f32,
}

fn axis_samples(src_len: usize, dst_len: usize) -> Vec<AxisSample> {
    let scale = src_len as f32 / dst_len as f32;
    let last = src_len - 1;
    (0..dst_len)
        .map(|dst| {
            let position = ((dst as f32 + 0.5) * scale - 0.5).max(0.0);
            let lower = (position.floor() as usize).min(last);
            let upper = (lower + 1).min(last);
            AxisSample {
                lower,
                upper,
                weight: position - lower as f32,
            }
        })
        .collect()
}

fn bilinear(
    mask: &[f32],
    src_width: usize,
    src_height: usize,
    dst_width: usize,
    dst_height: usize,
) -> Vec<f32> {
    let columns = axis_samples(src_width, dst_width);
    let rows = axis_samples(src_height, dst_height);

    let mut values = vec![0.0f32; dst_width * dst_height];
    values
        .par_chunks_mut(dst_width)
        .zip(rows.par_iter())
        .for_each(|(out_row, row)| {
            let top = &mask[row.lower * src_width..(row.lower + 1) * src_width];
            let bottom = &mask[row.upper * src_width..(row.upper + 1) * src_width];
            for (out, column) in out_row.iter_mut().zip(&columns) {
                let upper_value = lerp(top[column.lower], top[column.upper], column.weight);
                let lower_value = lerp(bottom[column.lower], bottom[column.upper], column.weight);
                *out = lerp(upper_value, lower_value, row.weight);
            }
        });
    values
}

fn nearest(
    mask: &[f32],
    src_width: usize,
    src_height: usize,
    dst_width: usize,
    dst_height: usize,
) -> Vec<f32> {
    let pick = |src_len: usize, dst_len: usize| -> Vec<usize> {
        let scale = src_len as f32 / dst_len as f32;
        (0..dst_len)
            .map(|dst| (((dst as f32 + 0.5) * scale).floor() as usize).min(src_len - 1))
            .collect()
    };
    let columns = pick(src_width, dst_width);
    let rows = pick(src_height, dst_height);

    let mut values = vec![0.0f32; dst_width * dst_height];
    values
        .par_chunks_mut(dst_width)
        .zip(rows.par_iter())
        .for_each(|(out_row, &row)| {
            let source = &mask[row * src_width..(row + 1) * src_width];
            for (out, &column) in out_row.iter_mut().zip(&columns) {
                *out = source[column];
            }
        });
    values
}

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    if t == 0.0 {
        a
    } else {
        a + (b - a) * t
    }
}
