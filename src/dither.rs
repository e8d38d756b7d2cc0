//! # Icon Dithering
//!
//! Turn icons arrive as small RGBA bitmaps. The peripheral only shows 1-bit
//! pixels, so each icon is scaled, reduced to a tiny palette and dithered into
//! a packed [`DitheredImage`].
//!
//! ## Algorithm
//! 1. **Scale** to the target size with nearest-neighbour sampling
//! 2. **Quantize** each channel into 4 levels (0, 0.4, 0.7, 1); fully
//!    transparent pixels become opaque black, the background convention of the
//!    source icon set
//! 3. **Palette**: distinct quantized colors sorted by `sqrt(r²+g²+b²+a²)/2`
//! 4. **Dither**: darkest entry is foreground, lightest is background; gray
//!    pixels are set by a checkerboard when they sit in a gray group, and
//!    dark grays touching 2+ foreground pixels are filled so thin strokes
//!    keep their corners
//!
//! The whole path is integer-indexed and deterministic: the same source and
//! size always produce the same buffer.

use crate::DitheredImage;
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

/// Output levels of the four quantization buckets.
const LEVELS: [f32; 4] = [0.0, 0.4, 0.7, 1.0];

/// Quantized alpha below this counts as transparent.
const TRANSPARENT_ALPHA: f32 = 0.1;

/// Result of [`compress`].
#[derive(Clone, Debug, PartialEq)]
pub enum Compressed {
    /// Dithered, device-ready buffer
    Dithered(DitheredImage),
    /// The palette had fewer than 2 colors; the scaled source is returned as is
    Unchanged(RgbaImage),
}

impl Compressed {
    /// Device-ready buffer. A palette-less image is uniform, so it packs as
    /// all background.
    pub fn into_image(self) -> DitheredImage {
        match self {
            Compressed::Dithered(image) => image,
            Compressed::Unchanged(scaled) => DitheredImage::blank(scaled.width(), scaled.height()),
        }
    }
}

/// RGBA color with every channel reduced to a bucket index (0..=3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct Quantized([u8; 4]);

impl Quantized {
    const BLACK: Quantized = Quantized([0, 0, 0, 3]);

    fn from_pixel(pixel: &Rgba<u8>) -> Self {
        let q = Quantized(pixel.0.map(bucket));
        if LEVELS[q.0[3] as usize] < TRANSPARENT_ALPHA {
            return Self::BLACK;
        }
        q
    }

    /// Perceptual brightness proxy.
    fn brightness(&self) -> f32 {
        let sum: f32 = self.0.iter().map(|&b| LEVELS[b as usize].powi(2)).sum();
        sum.sqrt() / 2.0
    }
}

fn bucket(value: u8) -> u8 {
    let v = value as f32 / 255.0;
    if v < 0.25 {
        0
    } else if v < 0.5 {
        1
    } else if v < 0.75 {
        2
    } else {
        3
    }
}

/// Compress `source` into a `width`×`height` monochrome image.
///
/// `None` yields a blank image of the requested size.
pub fn compress(source: Option<&RgbaImage>, width: u32, height: u32) -> Compressed {
    let Some(source) = source else {
        return Compressed::Dithered(DitheredImage::blank(width, height));
    };
    if width == 0 || height == 0 {
        return Compressed::Dithered(DitheredImage::blank(width, height));
    }

    let scaled = if source.dimensions() == (width, height) {
        source.clone()
    } else {
        imageops::resize(source, width, height, FilterType::Nearest)
    };
    dither(scaled)
}

fn dither(source: RgbaImage) -> Compressed {
    let (width, height) = source.dimensions();
    let quantized: Vec<Quantized> = source.pixels().map(Quantized::from_pixel).collect();

    let palette = palette(&quantized);
    log::debug!("icon palette has {} colors", palette.len());
    if palette.len() < 2 {
        log::warn!("unable to dither a palette of {} colors, need at least 2", palette.len());
        return Compressed::Unchanged(source);
    }

    // Palette rank of every pixel, 0 = darkest
    let ranks: Vec<usize> = quantized
        .iter()
        .map(|q| palette.binary_search_by(|p| order(p, q)).unwrap_or(0))
        .collect();

    let foreground = 0;
    let background = palette.len() - 1;
    let rank_at = |x: i64, y: i64| -> Option<usize> {
        if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
            return None;
        }
        Some(ranks[(y as u32 * width + x as u32) as usize])
    };

    let mut out = DitheredImage::blank(width, height);
    for y in 0..height {
        for x in 0..width {
            let rank = ranks[(y * width + x) as usize];
            if rank == foreground {
                out.set_pixel(x, y, true);
                continue;
            }
            if rank == background {
                continue;
            }

            let mut has_gray_neighbor = false;
            let mut foreground_neighbors = 0;
            for dy in -1..=1i64 {
                for dx in -1..=1i64 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let Some(neighbor) = rank_at(x as i64 + dx, y as i64 + dy) else {
                        continue;
                    };
                    if neighbor != foreground && neighbor != background {
                        has_gray_neighbor = true;
                    }
                    if neighbor == foreground {
                        foreground_neighbors += 1;
                    }
                }
            }

            // Dark grays next to foreground fill in, so corners do not drop out
            let dark_half = rank <= palette.len() / 2;
            if dark_half && foreground_neighbors >= 2 {
                out.set_pixel(x, y, true);
            }
            // Only dither grays that form a group
            if x % 2 != y % 2 && has_gray_neighbor {
                out.set_pixel(x, y, true);
            }
        }
    }

    Compressed::Dithered(out)
}

/// Total order of palette entries: brightness, then bucket values.
fn order(a: &Quantized, b: &Quantized) -> std::cmp::Ordering {
    a.brightness()
        .total_cmp(&b.brightness())
        .then_with(|| a.cmp(b))
}

fn palette(pixels: &[Quantized]) -> Vec<Quantized> {
    let mut palette = pixels.to_vec();
    palette.sort_by(order);
    palette.dedup();
    palette
}
