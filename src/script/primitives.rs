//! Image primitives exposed to custom transforms, and the sandboxed engine.
//!
//! Scripts see a single opaque `Tile` type. Every primitive except
//! `set_pixel` returns a new tile, so both `invert(tile)` and
//! `tile.invert()` work and the caller's tile is left alone. `set_pixel`
//! writes in place and is meant to be called as `t.set_pixel(x, y, r, g, b)`.
//!
//! The engine has no file system, module import, `eval` or host access.
//! Operation count, call depth, expression depth and collection sizes are
//! bounded.

use image::imageops::{self, colorops};
use image::{GrayImage, Rgb, RgbImage};
use rhai::module_resolvers::DummyModuleResolver;
use rhai::{Array, Dynamic, Engine, EvalAltResult, Position, FLOAT, INT};
use tracing::{debug, info};

/// Largest tile a script may allocate with `new_tile`.
pub const MAX_SCRIPT_TILE_SIDE: INT = 4096;

/// An RGB tile as seen by scripts.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile(pub RgbImage);

type ScriptResult<T> = Result<T, Box<EvalAltResult>>;

// =============================================================================
// Engine
// =============================================================================

/// Build a sandboxed engine with the tile primitives registered.
pub fn build_engine(max_operations: u64) -> Engine {
    let mut engine = Engine::new();

    engine
        .set_max_operations(max_operations)
        .set_max_call_levels(32)
        .set_max_expr_depths(64, 32)
        .set_max_string_size(64 * 1024)
        .set_max_array_size(1 << 20)
        .set_max_map_size(1 << 16)
        .set_module_resolver(DummyModuleResolver::new());
    engine.disable_symbol("eval");

    engine.on_print(|text| info!(target: "script", "{}", text));
    engine.on_debug(|text, source, pos: Position| {
        debug!(target: "script", source = source.unwrap_or("process_tile"), %pos, "{}", text)
    });

    register_tile_api(&mut engine);
    engine
}

fn register_tile_api(engine: &mut Engine) {
    engine.register_type_with_name::<Tile>("Tile");

    engine
        .register_get("width", |t: &mut Tile| t.0.width() as INT)
        .register_get("height", |t: &mut Tile| t.0.height() as INT);

    engine
        .register_fn("invert", |t: &mut Tile| Tile(invert(&t.0)))
        .register_fn("grayscale", |t: &mut Tile| Tile(grayscale(&t.0)))
        .register_fn("autocontrast", |t: &mut Tile| Tile(autocontrast(&t.0, 0.0)))
        .register_fn("autocontrast", |t: &mut Tile, cutoff: FLOAT| {
            Tile(autocontrast(&t.0, cutoff))
        })
        .register_fn("autocontrast", |t: &mut Tile, cutoff: INT| {
            Tile(autocontrast(&t.0, cutoff as f64))
        })
        .register_fn("posterize", |t: &mut Tile, bits: INT| {
            Tile(posterize(&t.0, bits.clamp(1, 8) as u32))
        })
        .register_fn("solarize", |t: &mut Tile, threshold: INT| {
            Tile(solarize(&t.0, clamp_u8(threshold)))
        })
        .register_fn("flip", |t: &mut Tile| Tile(imageops::flip_vertical(&t.0)))
        .register_fn("mirror", |t: &mut Tile| Tile(imageops::flip_horizontal(&t.0)))
        .register_fn("brighten", |t: &mut Tile, delta: INT| {
            Tile(colorops::brighten(&t.0, delta.clamp(-255, 255) as i32))
        })
        .register_fn("contrast", |t: &mut Tile, factor: FLOAT| Tile(contrast(&t.0, factor)))
        .register_fn("contrast", |t: &mut Tile, factor: INT| {
            Tile(contrast(&t.0, factor as f64))
        })
        .register_fn("blur", |t: &mut Tile, sigma: FLOAT| Tile(blur(&t.0, sigma)))
        .register_fn("blur", |t: &mut Tile, sigma: INT| Tile(blur(&t.0, sigma as f64)))
        .register_fn("threshold", |t: &mut Tile, level: INT| {
            Tile(threshold(&t.0, clamp_u8(level)))
        })
        .register_fn("equalize", |t: &mut Tile| Tile(equalize(&t.0)));

    engine
        .register_fn("get_pixel", get_pixel)
        .register_fn("set_pixel", set_pixel)
        .register_fn("new_tile", new_tile);
}

fn clamp_u8(value: INT) -> u8 {
    value.clamp(0, 255) as u8
}

fn check_coords(t: &Tile, x: INT, y: INT) -> ScriptResult<(u32, u32)> {
    let (w, h) = t.0.dimensions();
    if x < 0 || y < 0 || x >= w as INT || y >= h as INT {
        return Err(format!("pixel ({}, {}) is outside the {}x{} tile", x, y, w, h).into());
    }
    Ok((x as u32, y as u32))
}

fn get_pixel(t: &mut Tile, x: INT, y: INT) -> ScriptResult<Array> {
    let (x, y) = check_coords(t, x, y)?;
    let Rgb(channels) = *t.0.get_pixel(x, y);
    Ok(channels.iter().map(|c| Dynamic::from(*c as INT)).collect())
}

fn set_pixel(t: &mut Tile, x: INT, y: INT, r: INT, g: INT, b: INT) -> ScriptResult<()> {
    let (x, y) = check_coords(t, x, y)?;
    t.0.put_pixel(x, y, Rgb([clamp_u8(r), clamp_u8(g), clamp_u8(b)]));
    Ok(())
}

fn new_tile(width: INT, height: INT) -> ScriptResult<Tile> {
    let valid = 1..=MAX_SCRIPT_TILE_SIDE;
    if !valid.contains(&width) || !valid.contains(&height) {
        return Err(format!(
            "tile size {}x{} must be between 1 and {} on each side",
            width, height, MAX_SCRIPT_TILE_SIDE
        )
        .into());
    }
    Ok(Tile(RgbImage::new(width as u32, height as u32)))
}

// =============================================================================
// Pixel Operations
// =============================================================================

pub fn invert(img: &RgbImage) -> RgbImage {
    let mut out = img.clone();
    colorops::invert(&mut out);
    out
}

/// Rec. 601 luma replicated into all three channels.
pub fn grayscale(img: &RgbImage) -> RgbImage {
    gray_to_rgb(&imageops::grayscale(img))
}

fn gray_to_rgb(gray: &GrayImage) -> RgbImage {
    RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y).0[0];
        Rgb([v, v, v])
    })
}

fn map_channels(img: &RgbImage, luts: &[[u8; 256]; 3]) -> RgbImage {
    let mut out = img.clone();
    for px in out.pixels_mut() {
        for (c, lut) in px.0.iter_mut().zip(luts) {
            *c = lut[*c as usize];
        }
    }
    out
}

fn histograms(img: &RgbImage) -> [[u64; 256]; 3] {
    let mut hist = [[0u64; 256]; 3];
    for px in img.pixels() {
        for (h, c) in hist.iter_mut().zip(px.0) {
            h[c as usize] += 1;
        }
    }
    hist
}

/// Stretch each channel to the full range after discarding `cutoff` percent
/// of pixels at both ends of its histogram.
pub fn autocontrast(img: &RgbImage, cutoff: f64) -> RgbImage {
    let total = img.width() as u64 * img.height() as u64;
    let clip = ((total as f64) * cutoff.clamp(0.0, 49.0) / 100.0) as u64;
    let mut luts = [[0u8; 256]; 3];

    for (lut, hist) in luts.iter_mut().zip(histograms(img).iter()) {
        let mut seen = 0;
        let lo = hist
            .iter()
            .position(|n| {
                seen += n;
                seen > clip
            })
            .unwrap_or(0);
        seen = 0;
        let hi = 255
            - hist
                .iter()
                .rev()
                .position(|n| {
                    seen += n;
                    seen > clip
                })
                .unwrap_or(0);

        for (i, v) in lut.iter_mut().enumerate() {
            *v = if hi <= lo {
                i as u8
            } else {
                let scaled = (i as f64 - lo as f64) * 255.0 / (hi - lo) as f64;
                scaled.round().clamp(0.0, 255.0) as u8
            };
        }
    }

    map_channels(img, &luts)
}

/// Keep the `bits` most significant bits of every channel.
pub fn posterize(img: &RgbImage, bits: u32) -> RgbImage {
    let mask = !(0xFFu8.checked_shr(bits).unwrap_or(0));
    let mut out = img.clone();
    for c in out.iter_mut() {
        *c &= mask;
    }
    out
}

/// Invert every channel value at or above `threshold`.
pub fn solarize(img: &RgbImage, threshold: u8) -> RgbImage {
    let mut out = img.clone();
    for c in out.iter_mut() {
        if *c >= threshold {
            *c = 255 - *c;
        }
    }
    out
}

/// Scale distance from the mean luma by `factor` (1.0 is the identity).
pub fn contrast(img: &RgbImage, factor: f64) -> RgbImage {
    let gray = imageops::grayscale(img);
    let count = (gray.width() as u64 * gray.height() as u64).max(1);
    let mean = gray.iter().map(|v| *v as u64).sum::<u64>() as f64 / count as f64;

    let mut lut = [0u8; 256];
    for (i, v) in lut.iter_mut().enumerate() {
        *v = (mean + factor * (i as f64 - mean)).round().clamp(0.0, 255.0) as u8;
    }
    map_channels(img, &[lut; 3])
}

pub fn blur(img: &RgbImage, sigma: f64) -> RgbImage {
    if sigma <= 0.0 {
        return img.clone();
    }
    imageops::blur(img, sigma as f32)
}

/// Binarise on luma: above `level` becomes white, the rest black.
pub fn threshold(img: &RgbImage, level: u8) -> RgbImage {
    let mut gray = imageops::grayscale(img);
    for v in gray.iter_mut() {
        *v = if *v > level { 255 } else { 0 };
    }
    gray_to_rgb(&gray)
}

/// Per-channel histogram equalisation.
pub fn equalize(img: &RgbImage) -> RgbImage {
    let total = img.width() as u64 * img.height() as u64;
    let mut luts = [[0u8; 256]; 3];

    for (lut, hist) in luts.iter_mut().zip(histograms(img).iter()) {
        let first = hist.iter().position(|n| *n > 0).unwrap_or(0);
        let base = hist[first];
        let span = total.saturating_sub(base);

        let mut cumulative = 0u64;
        for (i, v) in lut.iter_mut().enumerate() {
            cumulative += hist[i];
            *v = if span == 0 {
                i as u8
            } else {
                let scaled = cumulative.saturating_sub(base) as f64 * 255.0 / span as f64;
                scaled.round().clamp(0.0, 255.0) as u8
            };
        }
    }

    map_channels(img, &luts)
}
