use rayon::prelude::*;

use crate::errors::{Result, SegMaskError};
use crate::types::{CompositeParameters, Frame, UpsampledMask};

/// Keep foreground pixels and paint everything else with the replacement color.
///
/// A pixel is foreground only when its mask value is strictly greater than the
/// threshold; a value equal to the threshold is background. The source frame is
/// left untouched.
pub fn composite(
    frame: &Frame,
    mask: &UpsampledMask,
    params: &CompositeParameters,
) -> Result<Frame> {
    if (frame.width(), frame.height()) != (mask.width(), mask.height()) {
        return Err(SegMaskError::validation(
            "mask",
            format!(
                "is {}x{} but frame {} is {}x{}",
                mask.width(),
                mask.height(),
                frame.index,
                frame.width(),
                frame.height()
            ),
        ));
    }

    let threshold = params.threshold();
    let replacement = params.color().rgba().0;

    let mut image = frame.image.clone();
    image
        .par_chunks_exact_mut(4)
        .zip(mask.values().par_iter())
        .for_each(|(pixel, &probability)| {
            if !is_foreground(probability, threshold) {
                pixel.copy_from_slice(&replacement);
            }
        });

    Ok(Frame::new(frame.index, image))
}

/// NaN never counts as foreground.
#[inline]
fn is_foreground(probability: f32, threshold: f32) -> bool {
    probability > threshold
}
