use image::{imageops, imageops::FilterType, RgbaImage};
use ndarray::Array4;

use crate::errors::{Result, SegMaskError};
use crate::types::{Frame, InputTensor};

/// Stretch `frame` to `model_width x model_height` and lay it out as an NHWC tensor.
///
/// The aspect ratio is not preserved. Alpha is ignored; RGB is divided by 255 and
/// written interleaved (`R, G, B, R, G, B, ...`) row by row.
pub fn to_tensor(frame: &Frame, model_width: u32, model_height: u32) -> Result<InputTensor> {
    let _span = tracing::debug_span!("preprocess", frame = frame.index).entered();

    if model_width == 0 || model_height == 0 {
        return Err(SegMaskError::validation(
            "model input size",
            format!("must be non-zero, got {}x{}", model_width, model_height),
        ));
    }

    let resized = resize_rgba(&frame.image, model_width, model_height);
    let data: Vec<f32> = resized
        .pixels()
        .flat_map(|pixel| {
            let [r, g, b, _] = pixel.0;
            [r, g, b]
        })
        .map(|channel| f32::from(channel) / 255.0)
        .collect();

    let tensor = Array4::from_shape_vec(
        (1, model_height as usize, model_width as usize, 3),
        data,
    )?;
    Ok(tensor)
}

fn resize_rgba(image: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    if image.dimensions() == (width, height) {
        image.clone()
    } else {
        imageops::resize(image, width, height, FilterType::Triangle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn solid_frame(width: u32, height: u32, color: [u8; 4]) -> Frame {
        Frame::new(1, RgbaImage::from_pixel(width, height, Rgba(color)))
    }

    #[test]
    fn test_tensor_shape_is_nhwc() -> Result<()> {
        let frame = solid_frame(640, 360, [10, 20, 30, 255]);
        let tensor = to_tensor(&frame, 224, 128)?;
        assert_eq!(tensor.shape(), &[1, 128, 224, 3]);
        Ok(())
    }

    #[test]
    fn test_channels_normalized_in_rgb_order() -> Result<()> {
        let frame = solid_frame(8, 8, [255, 0, 51, 7]);
        let tensor = to_tensor(&frame, 4, 4)?;
        for y in 0..4 {
            for x in 0..4 {
                assert!((tensor[[0, y, x, 0]] - 1.0).abs() < 1e-6);
                assert!(tensor[[0, y, x, 1]].abs() < 1e-6);
                assert!((tensor[[0, y, x, 2]] - 0.2).abs() < 1e-6);
            }
        }
        Ok(())
    }

    #[test]
    fn test_interleaved_layout_follows_pixel_grid() -> Result<()> {
        let mut image = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255]));
        image.put_pixel(1, 0, Rgba([255, 255, 255, 255]));
        let tensor = to_tensor(&Frame::new(1, image), 2, 2)?;

        let flat = tensor.as_slice().unwrap();
        assert_eq!(&flat[0..3], &[0.0, 0.0, 0.0]);
        assert_eq!(&flat[3..6], &[1.0, 1.0, 1.0]);
        assert_eq!(&flat[6..12], &[0.0; 6]);
        Ok(())
    }

    #[test]
    fn test_preprocessing_is_deterministic() -> Result<()> {
        let image = RgbaImage::from_fn(37, 23, |x, y| {
            Rgba([(x * 7) as u8, (y * 11) as u8, ((x + y) * 3) as u8, 255])
        });
        let frame = Frame::new(3, image);

        let first = to_tensor(&frame, 16, 9)?;
        let second = to_tensor(&frame, 16, 9)?;

        let first_bits: Vec<u32> = first.iter().map(|v| v.to_bits()).collect();
        let second_bits: Vec<u32> = second.iter().map(|v| v.to_bits()).collect();
        assert_eq!(first_bits, second_bits);
        Ok(())
    }

    #[test]
    fn test_zero_model_size_rejected() {
        let frame = solid_frame(4, 4, [0, 0, 0, 255]);
        assert!(to_tensor(&frame, 0, 4).is_err());
    }
}
