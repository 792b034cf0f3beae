//! Image-to-tensor transforms feeding the frozen encoder.
//!
//! [`CanonicalTransform`] is deterministic and is the only variant accepted by
//! embedding collection and scoring. [`AugmentTransform`] is randomized and is
//! only meant for extractor fine-tuning experiments.

pub mod augment;
pub mod canonical;

use image::{Rgb, RgbImage};
use ndarray::Array3;

pub use augment::{AugmentConfig, AugmentTransform};
pub use canonical::CanonicalTransform;

pub const INPUT_SIZE: u32 = 224;
pub const CHANNELS: usize = 3;

/// Per-channel statistics of the encoder's pretraining data.
pub const CHANNEL_MEAN: [f32; CHANNELS] = [0.485, 0.456, 0.406];
pub const CHANNEL_STD: [f32; CHANNELS] = [0.229, 0.224, 0.225];

/// Channel-major `(3, 224, 224)` normalized tensor.
pub type Tensor = Array3<f32>;

/// Scales to [0, 1] and normalizes each channel. Expects an image already
/// resized to the input size.
pub fn to_tensor(rgb: &RgbImage) -> Tensor {
    let (width, height) = rgb.dimensions();
    let mut tensor = Array3::zeros((CHANNELS, height as usize, width as usize));

    for (x, y, pixel) in rgb.enumerate_pixels() {
        for c in 0..CHANNELS {
            let unit = pixel[c] as f32 / 255.0;
            tensor[[c, y as usize, x as usize]] = (unit - CHANNEL_MEAN[c]) / CHANNEL_STD[c];
        }
    }

    tensor
}

/// Inverse of [`to_tensor`], for looking at what the encoder is fed.
pub fn to_image(tensor: &Tensor) -> RgbImage {
    let (_, height, width) = tensor.dim();
    let mut image = RgbImage::new(width as u32, height as u32);

    for y in 0..height {
        for x in 0..width {
            let mut pixel = [0u8; CHANNELS];
            for c in 0..CHANNELS {
                let unit = tensor[[c, y, x]] * CHANNEL_STD[c] + CHANNEL_MEAN[c];
                pixel[c] = (unit.clamp(0.0, 1.0) * 255.0).round() as u8;
            }
            image.put_pixel(x as u32, y as u32, Rgb(pixel));
        }
    }

    image
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_tensor_normalizes_per_channel() {
        let image = RgbImage::from_pixel(4, 2, Rgb([255, 0, 128]));
        let tensor = to_tensor(&image);

        assert_eq!(tensor.dim(), (3, 2, 4));
        assert!((tensor[[0, 0, 0]] - (1.0 - 0.485) / 0.229).abs() < 1e-6);
        assert!((tensor[[1, 1, 3]] - (0.0 - 0.456) / 0.224).abs() < 1e-6);
    }

    #[test]
    fn test_to_image_inverts_to_tensor() {
        let image = RgbImage::from_fn(8, 8, |x, y| Rgb([(x * 30) as u8, (y * 30) as u8, 77]));
        let restored = to_image(&to_tensor(&image));
        assert_eq!(image, restored);
    }
}
