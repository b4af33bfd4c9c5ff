//! Conversions between images and the flat NCHW `f32` buffers the backends
//! exchange with the model.
//!
//! Matches torchvision's `Resize((256, 256))` + `ToTensor()` on the way in and
//! `ToPILImage()` on a clamped output on the way out.

use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};

use super::InferenceError;

/// Pix2Pix generators are trained on square 256x256 inputs.
pub const MODEL_INPUT_SIZE: u32 = 256;

/// Resize to the model resolution and lay out as `[1, 3, H, W]` in `[0, 1]`.
pub fn to_input_tensor(image: &DynamicImage) -> (Vec<f32>, [usize; 4]) {
    let size = MODEL_INPUT_SIZE;
    let rgb = image.to_rgb8();
    let resized = imageops::resize(&rgb, size, size, FilterType::Triangle);

    let plane = (size * size) as usize;
    let mut data = vec![0.0f32; 3 * plane];
    for (x, y, pixel) in resized.enumerate_pixels() {
        let idx = (y * size + x) as usize;
        for (channel, &value) in pixel.0.iter().enumerate() {
            data[channel * plane + idx] = f32::from(value) / 255.0;
        }
    }

    (data, [1, 3, size as usize, size as usize])
}

/// Build an RGB image from the first batch element of a model output.
///
/// Accepts `[N, C, H, W]` or `[C, H, W]` with one or three channels. Values
/// are clamped to `[0, 1]` then scaled and truncated to `u8`.
pub fn from_output_tensor(data: &[f32], shape: &[usize]) -> Result<RgbImage, InferenceError> {
    let (channels, height, width) = match *shape {
        [_, c, h, w] | [c, h, w] => (c, h, w),
        _ => return Err(InferenceError::OutputShape(shape.to_vec())),
    };

    let Some((plane, len)) = height
        .checked_mul(width)
        .and_then(|plane| Some((plane, plane.checked_mul(channels)?)))
    else {
        return Err(InferenceError::OutputShape(shape.to_vec()));
    };
    if !matches!(channels, 1 | 3) || plane == 0 || data.len() < len {
        return Err(InferenceError::OutputShape(shape.to_vec()));
    }
    let (Ok(w), Ok(h)) = (u32::try_from(width), u32::try_from(height)) else {
        return Err(InferenceError::OutputShape(shape.to_vec()));
    };

    let sample = |channel: usize, idx: usize| to_u8(data[channel * plane + idx]);

    let mut image = RgbImage::new(w, h);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let idx = y as usize * width + x as usize;
        *pixel = if channels == 3 {
            Rgb([sample(0, idx), sample(1, idx), sample(2, idx)])
        } else {
            let v = sample(0, idx);
            Rgb([v, v, v])
        };
    }
    Ok(image)
}

fn to_u8(value: f32) -> u8 {
    // NaN saturates to 0 in the cast
    (value.clamp(0.0, 1.0) * 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_is_nchw_at_model_resolution() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(31, 17, Rgb([255, 0, 51])));
        let (data, shape) = to_input_tensor(&image);

        assert_eq!(shape, [1, 3, 256, 256]);
        assert_eq!(data.len(), 3 * 256 * 256);

        let plane = 256 * 256;
        assert_eq!(data[0], 1.0);
        assert_eq!(data[plane], 0.0);
        assert!((data[2 * plane] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn input_converts_grayscale_to_three_channels() {
        let gray = image::GrayImage::from_pixel(8, 8, image::Luma([255]));
        let (data, shape) = to_input_tensor(&DynamicImage::ImageLuma8(gray));
        assert_eq!(shape[1], 3);
        assert!(data.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn output_clamps_out_of_range_values() {
        // [1, 3, 1, 2]: R = [-0.5, 2.0], G = [0.5, 1.0], B = [0.0, NaN]
        let data = [-0.5, 2.0, 0.5, 1.0, 0.0, f32::NAN];
        let image = from_output_tensor(&data, &[1, 3, 1, 2]).unwrap();

        assert_eq!(image.dimensions(), (2, 1));
        assert_eq!(image.get_pixel(0, 0).0, [0, 127, 0]);
        assert_eq!(image.get_pixel(1, 0).0, [255, 255, 0]);
    }

    #[test]
    fn output_uses_first_batch_element() {
        let mut data = vec![1.0f32; 3 * 4];
        data.extend(vec![0.0f32; 3 * 4]);
        let image = from_output_tensor(&data, &[2, 3, 2, 2]).unwrap();
        assert!(image.pixels().all(|p| p.0 == [255, 255, 255]));
    }

    #[test]
    fn output_accepts_unbatched_and_single_channel() {
        let image = from_output_tensor(&[0.0, 1.0], &[1, 1, 2]).unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(image.get_pixel(1, 0).0, [255, 255, 255]);
    }

    #[test]
    fn output_rejects_bad_shapes() {
        assert!(matches!(
            from_output_tensor(&[0.0; 4], &[4]),
            Err(InferenceError::OutputShape(_))
        ));
        assert!(matches!(
            from_output_tensor(&[0.0; 8], &[1, 2, 2, 2]),
            Err(InferenceError::OutputShape(_))
        ));
        // Dimensions whose product overflows usize
        assert!(matches!(
            from_output_tensor(&[0.0; 3], &[1, 3, usize::MAX, 2]),
            Err(InferenceError::OutputShape(_))
        ));
        // Buffer shorter than the declared shape
        assert!(matches!(
            from_output_tensor(&[0.0; 3], &[1, 3, 2, 2]),
            Err(InferenceError::OutputShape(_))
        ));
    }
}
