use image::{DynamicImage, imageops::{self, FilterType}};

use super::{INPUT_SIZE, Tensor, to_tensor};

/// Deterministic resize + normalize, shared by boundary fitting and inference.
#[derive(Debug, Clone, Copy, Default)]
pub struct CanonicalTransform;

impl CanonicalTransform {
    pub fn new() -> Self {
        Self
    }

    pub fn apply(&self, image: &DynamicImage) -> Tensor {
        let rgb = image.to_rgb8();
        let resized = imageops::resize(&rgb, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);
        to_tensor(&resized)
    }
}

#[cfg(test)]
mod tests {
    use image::{GrayImage, Luma, Rgb, RgbImage};

    use super::*;

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        }))
    }

    #[test]
    fn test_output_shape_is_fixed() {
        let transform = CanonicalTransform::new();
        for (w, h) in [(640, 480), (100, 300), (224, 224)] {
            assert_eq!(transform.apply(&gradient(w, h)).dim(), (3, 224, 224));
        }
    }

    #[test]
    fn test_repeated_calls_are_bit_identical() {
        let transform = CanonicalTransform::new();
        let image = gradient(333, 251);

        let first = transform.apply(&image);
        let second = transform.apply(&image);
        assert_eq!(first, second);
    }

    #[test]
    fn test_grayscale_input_becomes_three_channels() {
        let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(50, 50, Luma([200])));
        let tensor = CanonicalTransform::new().apply(&gray);

        let unit = 200.0 / 255.0;
        assert!((tensor[[0, 10, 10]] - (unit - 0.485) / 0.229).abs() < 1e-5);
        assert!((tensor[[2, 10, 10]] - (unit - 0.406) / 0.225).abs() < 1e-5);
    }
}
