use std::f32::consts::PI;

use image::{
    DynamicImage, Rgb, RgbImage,
    imageops::{self, FilterType},
};
use imageproc::geometric_transformations::{Interpolation, Projection, rotate_about_center, warp};
use rand::{Rng, seq::SliceRandom};

use crate::{
    error::{DetectorError, Result},
    image_utils::{hsv_to_rgb, luminance, rgb_to_hsv},
};

use super::{INPUT_SIZE, Tensor, to_tensor};

#[derive(Debug, Clone)]
pub struct AugmentConfig {
    pub flip_probability: f64,
    pub max_rotation_degrees: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub hue: f32,
    pub perspective_distortion: f32,
    pub perspective_probability: f64,
    pub grayscale_probability: f64,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            flip_probability: 0.5,
            max_rotation_degrees: 15.0,
            brightness: 0.2,
            contrast: 0.2,
            saturation: 0.2,
            hue: 0.1,
            perspective_distortion: 0.2,
            perspective_probability: 0.5,
            grayscale_probability: 0.1,
        }
    }
}

impl AugmentConfig {
    pub fn validate(&self) -> Result<()> {
        let probabilities = [
            ("flip_probability", self.flip_probability),
            ("perspective_probability", self.perspective_probability),
            ("grayscale_probability", self.grayscale_probability),
        ];
        for (name, p) in probabilities {
            if !(0.0..=1.0).contains(&p) {
                return Err(DetectorError::InvalidParameter(format!(
                    "{} must be in [0, 1], got {}",
                    name, p
                )));
            }
        }

        let magnitudes = [
            ("max_rotation_degrees", self.max_rotation_degrees, f32::INFINITY),
            ("brightness", self.brightness, f32::INFINITY),
            ("contrast", self.contrast, f32::INFINITY),
            ("saturation", self.saturation, f32::INFINITY),
            ("hue", self.hue, 0.5),
            ("perspective_distortion", self.perspective_distortion, 1.0),
        ];
        for (name, value, max) in magnitudes {
            if !value.is_finite() || !(0.0..=max).contains(&value) {
                return Err(DetectorError::InvalidParameter(format!(
                    "{} must be in [0, {}], got {}",
                    name, max, value
                )));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Jitter {
    Brightness(f32),
    Contrast(f32),
    Saturation(f32),
    Hue(f32),
}

/// Heavy randomized augmentation. Never feeds boundary fitting or scoring.
pub struct AugmentTransform {
    config: AugmentConfig,
}

impl AugmentTransform {
    pub fn new() -> Self {
        Self {
            config: AugmentConfig::default(),
        }
    }

    pub fn with_config(config: AugmentConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn apply<R: Rng + ?Sized>(&self, image: &DynamicImage, rng: &mut R) -> Tensor {
        let rgb = image.to_rgb8();
        let mut img = imageops::resize(&rgb, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);

        if rng.gen_bool(self.config.flip_probability) {
            img = imageops::flip_horizontal(&img);
        }

        img = self.random_rotation(&img, rng);
        img = self.color_jitter(&img, rng);

        if rng.gen_bool(self.config.perspective_probability) {
            img = self.random_perspective(&img, rng);
        }

        if rng.gen_bool(self.config.grayscale_probability) {
            img = grayscale(&img);
        }

        to_tensor(&img)
    }

    fn random_rotation<R: Rng + ?Sized>(&self, img: &RgbImage, rng: &mut R) -> RgbImage {
        let max = self.config.max_rotation_degrees;
        if max <= 0.0 {
            return img.clone();
        }

        let degrees = rng.gen_range(-max..=max);
        rotate_about_center(img, degrees * PI / 180.0, Interpolation::Nearest, Rgb([0, 0, 0]))
    }

    fn color_jitter<R: Rng + ?Sized>(&self, img: &RgbImage, rng: &mut R) -> RgbImage {
        let mut ops = Vec::with_capacity(4);

        if self.config.brightness > 0.0 {
            ops.push(Jitter::Brightness(factor(rng, self.config.brightness)));
        }
        if self.config.contrast > 0.0 {
            ops.push(Jitter::Contrast(factor(rng, self.config.contrast)));
        }
        if self.config.saturation > 0.0 {
            ops.push(Jitter::Saturation(factor(rng, self.config.saturation)));
        }
        if self.config.hue > 0.0 {
            let hue = self.config.hue;
            ops.push(Jitter::Hue(rng.gen_range(-hue..=hue)));
        }

        ops.shuffle(rng);

        ops.into_iter().fold(img.clone(), |acc, op| match op {
            Jitter::Brightness(f) => adjust_brightness(&acc, f),
            Jitter::Contrast(f) => adjust_contrast(&acc, f),
            Jitter::Saturation(f) => adjust_saturation(&acc, f),
            Jitter::Hue(shift) => adjust_hue(&acc, shift),
        })
    }

    fn random_perspective<R: Rng + ?Sized>(&self, img: &RgbImage, rng: &mut R) -> RgbImage {
        let (width, height) = img.dimensions();
        let (w, h) = (width as i64, height as i64);
        let dx = (self.config.perspective_distortion * (width / 2) as f32) as i64;
        let dy = (self.config.perspective_distortion * (height / 2) as f32) as i64;

        let mut pick = |lo: i64, hi: i64| rng.gen_range(lo..hi) as f32;

        let start = [
            (0.0, 0.0),
            ((w - 1) as f32, 0.0),
            ((w - 1) as f32, (h - 1) as f32),
            (0.0, (h - 1) as f32),
        ];
        let end = [
            (pick(0, dx + 1), pick(0, dy + 1)),
            (pick(w - dx - 1, w), pick(0, dy + 1)),
            (pick(w - dx - 1, w), pick(h - dy - 1, h)),
            (pick(0, dx + 1), pick(h - dy - 1, h)),
        ];

        match Projection::from_control_points(start, end) {
            Some(projection) => warp(img, &projection, Interpolation::Bilinear, Rgb([0, 0, 0])),
            None => img.clone(),
        }
    }
}

impl Default for AugmentTransform {
    fn default() -> Self {
        Self::new()
    }
}

fn factor<R: Rng + ?Sized>(rng: &mut R, spread: f32) -> f32 {
    rng.gen_range((1.0 - spread).max(0.0)..=(1.0 + spread))
}

fn map_pixels(img: &RgbImage, f: impl Fn([f32; 3]) -> [f32; 3]) -> RgbImage {
    let mut out = img.clone();
    for pixel in out.pixels_mut() {
        let unit = [
            pixel[0] as f32 / 255.0,
            pixel[1] as f32 / 255.0,
            pixel[2] as f32 / 255.0,
        ];
        let mapped = f(unit);
        for c in 0..3 {
            pixel[c] = (mapped[c].clamp(0.0, 1.0) * 255.0).round() as u8;
        }
    }
    out
}

fn blend(a: [f32; 3], b: [f32; 3], ratio: f32) -> [f32; 3] {
    [
        ratio * a[0] + (1.0 - ratio) * b[0],
        ratio * a[1] + (1.0 - ratio) * b[1],
        ratio * a[2] + (1.0 - ratio) * b[2],
    ]
}

fn adjust_brightness(img: &RgbImage, f: f32) -> RgbImage {
    map_pixels(img, |p| blend(p, [0.0; 3], f))
}

fn adjust_contrast(img: &RgbImage, f: f32) -> RgbImage {
    let count = (img.width() * img.height()).max(1) as f32;
    let mean = img
        .pixels()
        .map(|p| luminance(&Rgb([p[0] as f32, p[1] as f32, p[2] as f32])) / 255.0)
        .sum::<f32>()
        / count;

    map_pixels(img, |p| blend(p, [mean; 3], f))
}

fn adjust_saturation(img: &RgbImage, f: f32) -> RgbImage {
    map_pixels(img, |p| {
        let gray = luminance(&Rgb(p));
        blend(p, [gray; 3], f)
    })
}

fn adjust_hue(img: &RgbImage, shift: f32) -> RgbImage {
    map_pixels(img, |p| {
        let (h, s, v) = rgb_to_hsv(p[0], p[1], p[2]);
        let (r, g, b) = hsv_to_rgb(h + shift, s, v);
        [r, g, b]
    })
}

fn grayscale(img: &RgbImage) -> RgbImage {
    map_pixels(img, |p| {
        let gray = luminance(&Rgb(p));
        [gray; 3]
    })
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::preprocess::CanonicalTransform;

    fn sample() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(300, 200, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x * y) % 256) as u8])
        }))
    }

    #[test]
    fn test_augmented_shape_matches_canonical() {
        let mut rng = StdRng::seed_from_u64(7);
        let tensor = AugmentTransform::new().apply(&sample(), &mut rng);

        assert_eq!(tensor.dim(), (3, 224, 224));
        assert!(tensor.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_same_seed_reproduces_different_seed_varies() {
        let transform = AugmentTransform::new();
        let image = sample();

        let a = transform.apply(&image, &mut StdRng::seed_from_u64(1));
        let b = transform.apply(&image, &mut StdRng::seed_from_u64(1));
        let c = transform.apply(&image, &mut StdRng::seed_from_u64(2));

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_disabled_augmentation_equals_canonical() {
        let config = AugmentConfig {
            flip_probability: 0.0,
            max_rotation_degrees: 0.0,
            brightness: 0.0,
            contrast: 0.0,
            saturation: 0.0,
            hue: 0.0,
            perspective_distortion: 0.2,
            perspective_probability: 0.0,
            grayscale_probability: 0.0,
        };
        let image = sample();
        let mut rng = StdRng::seed_from_u64(3);

        let augmented = AugmentTransform::with_config(config)
            .unwrap()
            .apply(&image, &mut rng);
        assert_eq!(augmented, CanonicalTransform::new().apply(&image));
    }

    #[test]
    fn test_out_of_range_config_is_rejected() {
        let bad_flip = AugmentConfig {
            flip_probability: 1.5,
            ..Default::default()
        };
        let bad_hue = AugmentConfig {
            hue: 0.7,
            ..Default::default()
        };
        let bad_brightness = AugmentConfig {
            brightness: f32::NAN,
            ..Default::default()
        };

        for config in [bad_flip, bad_hue, bad_brightness] {
            assert!(matches!(
                AugmentTransform::with_config(config).err(),
                Some(DetectorError::InvalidParameter(_))
            ));
        }
        assert!(AugmentTransform::with_config(AugmentConfig::default()).is_ok());
    }

    #[test]
    fn test_grayscale_equalizes_channels() {
        let img = RgbImage::from_pixel(4, 4, Rgb([200, 30, 90]));
        let gray = grayscale(&img);
        let p = gray.get_pixel(0, 0);
        assert_eq!(p[0], p[1]);
        assert_eq!(p[1], p[2]);
    }

    #[test]
    fn test_zero_hue_shift_is_identity() {
        let img = RgbImage::from_fn(6, 6, |x, y| Rgb([(x * 40) as u8, (y * 40) as u8, 120]));
        assert_eq!(adjust_hue(&img, 0.0), img);
    }
}
