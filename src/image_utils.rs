use std::{fs, io::Cursor, path::Path};

use image::{DynamicImage, ImageReader, Rgb};

use crate::error::{DetectorError, Result};

/// Opens an image from disk, sniffing the format from its content.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(DetectorError::InputNotFound(path.to_path_buf()));
    }

    let bytes = fs::read(path)?;
    decode_image(&bytes, &path.display().to_string())
}

pub fn decode_image(bytes: &[u8], origin: &str) -> Result<DynamicImage> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?;

    reader.decode().map_err(|source| DetectorError::Decode {
        origin: origin.to_string(),
        source,
    })
}

pub fn luminance(pixel: &Rgb<f32>) -> f32 {
    0.299 * pixel[0] + 0.587 * pixel[1] + 0.114 * pixel[2]
}

/// Hue in [0, 1), saturation and value in [0, 1].
pub fn rgb_to_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue = if delta <= f32::EPSILON {
        0.0
    } else if max == r {
        ((g - b) / delta).rem_euclid(6.0) / 6.0
    } else if max == g {
        ((b - r) / delta + 2.0) / 6.0
    } else {
        ((r - g) / delta + 4.0) / 6.0
    };

    let saturation = if max <= f32::EPSILON { 0.0 } else { delta / max };

    (hue, saturation, max)
}

pub fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (f32, f32, f32) {
    let h6 = h.rem_euclid(1.0) * 6.0;
    let sector = h6.floor();
    let frac = h6 - sector;

    let p = v * (1.0 - s);
    let q = v * (1.0 - s * frac);
    let t = v * (1.0 - s * (1.0 - frac));

    match sector as u32 % 6 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    }
}
