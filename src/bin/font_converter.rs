//! Bakes a TrueType font into the bitmap font format loaded by
//! `Renderer::load_bitmap_font`.
//!
//! ```text
//! font-converter <input.ttf> <output.fgbf> [size_px] [family] [weight]
//! ```
use std::path::PathBuf;
use std::{env, fs, process};

use flashhook::fonts::bitmap::{BitmapFont, BitmapGlyph};
use flashhook::fonts::{AtlasPacker, FontStyle, FontWeight};
use rusttype::{point, Font, Scale};
use tracing::{debug, error, info, warn};

const ATLAS_SIZE: u32 = 1024;
const PADDING: u32 = 1;
const CODEPOINTS: std::ops::RangeInclusive<u32> = 32..=255;

struct Args {
    input: PathBuf,
    output: PathBuf,
    size_px: u16,
    family: Option<String>,
    weight: FontWeight,
}

fn parse_args() -> Option<Args> {
    let mut args = env::args().skip(1);
    let input = args.next()?.into();
    let output = args.next()?.into();
    let size_px = match args.next() {
        Some(s) => s.parse().ok()?,
        None => 16,
    };
    let family = args.next();
    let weight = match args.next() {
        Some(s) => FontWeight(s.parse().ok()?),
        None => FontWeight::NORMAL,
    };
    Some(Args { input, output, size_px, family, weight })
}

fn convert(args: &Args) -> Result<BitmapFont, String> {
    let data = fs::read(&args.input).map_err(|e| format!("{}: {e}", args.input.display()))?;
    let font = Font::try_from_vec(data).ok_or("not a TrueType font")?;

    let family = args
        .family
        .clone()
        .or_else(|| args.input.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "font".to_string());

    let scale = Scale::uniform(args.size_px as f32);
    let ascent = font.v_metrics(scale).ascent.round();

    let mut packer = AtlasPacker::new(ATLAS_SIZE, ATLAS_SIZE, PADDING);
    let mut coverage = vec![0u8; (ATLAS_SIZE * ATLAS_SIZE) as usize];
    let mut glyphs = Vec::new();

    for cp in CODEPOINTS {
        let Some(ch) = char::from_u32(cp) else { continue };
        let glyph = font.glyph(ch);
        if glyph.id().0 == 0 {
            continue;
        }

        let glyph = glyph.scaled(scale);
        let advance = glyph.h_metrics().advance_width;
        let glyph = glyph.positioned(point(0.0, 0.0));

        let Some(bb) = glyph.pixel_bounding_box() else {
            // Whitespace
            glyphs.push(BitmapGlyph {
                codepoint: cp,
                x: 0,
                y: 0,
                w: 0,
                h: 0,
                advance,
                bearing_x: 0.0,
                bearing_y: 0.0,
            });
            continue;
        };

        let (w, h) = (bb.width() as u32, bb.height() as u32);
        let Some((x, y)) = packer.place(w, h) else {
            warn!("Atlas full at U+{cp:04X}, {} glyphs baked", glyphs.len());
            break;
        };

        glyph.draw(|gx, gy, v| {
            let idx = ((y + gy) * ATLAS_SIZE + x + gx) as usize;
            coverage[idx] = (v * 255.0).round() as u8;
        });

        glyphs.push(BitmapGlyph {
            codepoint: cp,
            x: x as u16,
            y: y as u16,
            w: w as u16,
            h: h as u16,
            advance,
            bearing_x: bb.min.x as f32,
            bearing_y: -bb.min.y as f32,
        });
    }

    debug!("Baked {} glyphs of {family}", glyphs.len());

    Ok(BitmapFont {
        family,
        weight: args.weight,
        style: FontStyle::Normal,
        size_px: args.size_px,
        ascent,
        width: ATLAS_SIZE as u16,
        height: ATLAS_SIZE as u16,
        glyphs,
        coverage,
    })
}

fn main() {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let Some(args) = parse_args() else {
        eprintln!("usage: font-converter <input.ttf> <output.fgbf> [size_px] [family] [weight]");
        process::exit(2);
    };

    let font = match convert(&args) {
        Ok(font) => font,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        },
    };

    let bytes = font.to_bytes();
    if let Err(e) = fs::write(&args.output, &bytes) {
        error!("{}: {e}", args.output.display());
        process::exit(1);
    }

    info!(
        "Wrote {} ({} glyphs, {} bytes)",
        args.output.display(),
        font.glyphs.len(),
        bytes.len()
    );
}
