use std::fs;
use std::path::Path;

use image::{Rgba, RgbaImage};

use crate::pipeline::error::JobError;

pub const BUILTIN_PRESET_NAMES: [&str; 2] = ["creative", "mobile-ui"];
pub const PALETTE_NAMES: [&str; 1] = ["manito"];

const ALPHA_CUTOFF: u8 = 128;
const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    name: String,
    colors: Vec<Rgba<u8>>,
}

impl Palette {
    pub fn named(name: &str) -> Option<Self> {
        let colors = match name.trim() {
            "manito" => vec![
                Rgba([42, 157, 143, 255]),
                Rgba([231, 111, 81, 255]),
                Rgba([245, 240, 232, 255]),
                Rgba([255, 255, 255, 255]),
            ],
            _ => return None,
        };
        Some(Self {
            name: name.trim().to_string(),
            colors,
        })
    }

    pub fn logo_default() -> Self {
        Self {
            name: String::from("logo"),
            colors: vec![
                Rgba([42, 157, 143, 255]),
                Rgba([231, 111, 81, 255]),
                Rgba([255, 255, 255, 255]),
                Rgba([0, 0, 0, 255]),
            ],
        }
    }

    /// Unknown or absent names fall back to the default logo palette.
    pub fn named_or_default(name: Option<&str>) -> Self {
        name.and_then(Self::named).unwrap_or_else(Self::logo_default)
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn colors(&self) -> &[Rgba<u8>] {
        self.colors.as_slice()
    }

    /// Nearest palette color by squared RGB distance. Mostly transparent
    /// pixels collapse to fully transparent black. Ties go to the earlier
    /// palette entry.
    pub fn nearest(&self, pixel: Rgba<u8>) -> Rgba<u8> {
        if pixel[3] < ALPHA_CUTOFF {
            return TRANSPARENT;
        }
        self.colors
            .iter()
            .copied()
            .min_by_key(|color| squared_rgb_distance(pixel, *color))
            .unwrap_or(pixel)
    }
}

fn squared_rgb_distance(a: Rgba<u8>, b: Rgba<u8>) -> u32 {
    (0..3)
        .map(|i| {
            let d = i32::from(a[i]) - i32::from(b[i]);
            (d * d) as u32
        })
        .sum()
}

/// Picks the palette name implied by a preset list: the first entry that is
/// not one of the bundled presets.
pub fn palette_for_presets(preset_spec: &str) -> Option<String> {
    preset_spec
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .find(|name| !BUILTIN_PRESET_NAMES.contains(name))
        .map(str::to_string)
}

pub fn quantize_image(image: &RgbaImage, palette: &Palette) -> RgbaImage {
    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        *pixel = palette.nearest(*pixel);
    }
    out
}

pub fn quantize_file(input: &Path, output: &Path, palette: &Palette) -> Result<(), JobError> {
    let image = image::open(input)
        .map_err(|e| JobError::PostProcess(format!("open '{}': {e}", input.display())))?
        .to_rgba8();
    let quantized = quantize_image(&image, palette);
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| JobError::write_failure(parent, e))?;
    }
    quantized
        .save_with_format(output, image::ImageFormat::Png)
        .map_err(|e| JobError::write_failure(output, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::{SystemTime, UNIX_EPOCH};

    /// 1x1 GIF89a whose only pixel is white.
    const WHITE_GIF_1X1: &[u8] = &[
        b'G', b'I', b'F', b'8', b'9', b'a', 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0xFF, 0xFF,
        0xFF, 0x00, 0x00, 0x00, 0x2C, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02,
        0x02, 0x44, 0x01, 0x00, 0x3B,
    ];

    fn sample_image() -> RgbaImage {
        RgbaImage::from_fn(4, 2, |x, y| match (x, y) {
            (0, 0) => Rgba([40, 150, 140, 255]),
            (1, 0) => Rgba([230, 100, 90, 200]),
            (2, 0) => Rgba([250, 250, 250, 255]),
            (3, 0) => Rgba([10, 10, 10, 255]),
            (_, _) => Rgba([200, 200, 200, 100]),
        })
    }

    #[test]
    fn maps_pixels_to_nearest_palette_color() {
        let palette = Palette::logo_default();
        let out = quantize_image(&sample_image(), &palette);
        assert_eq!(*out.get_pixel(0, 0), Rgba([42, 157, 143, 255]));
        assert_eq!(*out.get_pixel(1, 0), Rgba([231, 111, 81, 255]));
        assert_eq!(*out.get_pixel(2, 0), Rgba([255, 255, 255, 255]));
        assert_eq!(*out.get_pixel(3, 0), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn low_alpha_pixels_become_transparent() {
        let palette = Palette::logo_default();
        let out = quantize_image(&sample_image(), &palette);
        assert_eq!(*out.get_pixel(0, 1), Rgba([0, 0, 0, 0]));
        assert_eq!(
            palette.nearest(Rgba([42, 157, 143, 127])),
            Rgba([0, 0, 0, 0])
        );
    }

    #[test]
    fn quantization_is_idempotent() {
        let palette = Palette::named("manito").expect("manito palette");
        let once = quantize_image(&sample_image(), &palette);
        let twice = quantize_image(&once, &palette);
        assert_eq!(once, twice);
        assert!(twice
            .pixels()
            .all(|p| p[3] == 0 || palette.colors().contains(p)));
    }

    #[test]
    fn equidistant_pixel_prefers_earlier_color() {
        let palette = Palette::logo_default();
        let tie = Palette {
            name: String::from("tie"),
            colors: vec![Rgba([0, 0, 0, 255]), Rgba([2, 0, 0, 255])],
        };
        assert_eq!(tie.nearest(Rgba([1, 0, 0, 255])), Rgba([0, 0, 0, 255]));
        assert_eq!(palette.nearest(Rgba([20, 20, 20, 255])), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn palette_follows_first_project_preset() {
        assert_eq!(palette_for_presets("creative, manito,brand"), Some(String::from("manito")));
        assert_eq!(palette_for_presets("creative,mobile-ui"), None);
        assert_eq!(palette_for_presets(""), None);
    }

    #[test]
    fn unknown_palette_name_falls_back_to_logo_default() {
        assert_eq!(Palette::named_or_default(Some("brand")).name(), "logo");
        assert_eq!(Palette::named_or_default(Some("manito")).name(), "manito");
        assert_eq!(Palette::named_or_default(None), Palette::logo_default());
    }

    #[test]
    fn quantize_file_reads_gif_input() {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();
        let root = std::env::temp_dir().join(format!("imagen_palette_gif_{stamp}"));
        fs::create_dir_all(root.as_path()).expect("temp root should exist");
        let input = root.join("mark.gif");
        let output = root.join("quantized/mark.png");
        fs::write(input.as_path(), WHITE_GIF_1X1).expect("write gif");

        quantize_file(input.as_path(), output.as_path(), &Palette::logo_default())
            .expect("gif should quantize");
        let written = image::open(output.as_path()).expect("png").to_rgba8();
        assert_eq!(*written.get_pixel(0, 0), Rgba([255, 255, 255, 255]));
        let _ = fs::remove_dir_all(root);
    }
}
