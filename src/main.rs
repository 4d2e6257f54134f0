use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use image::{ImageBuffer, Rgba, RgbaImage};
use log::info;
use rayon::prelude::*;

use osdcomp::format::{Registry, YUV420P8};
use osdcomp::image::{AlphaMode, ChromaLocation, Image, ImageParams, Matrix, Range};
use osdcomp::{composite, LibassPart, OverlayItem, OverlayList, OverlayParts, RgbaPart};

/// Simple color holder, same shape as the frame-trail demo's.
#[derive(Clone, Copy, Debug)]
struct Color {
    r: u8,
    g: u8,
    b: u8,
}

impl Color {
    fn from_hex(s: &str) -> Result<Self> {
        let trimmed = s.trim_start_matches('#');
        if trimmed.len() != 6 {
            return Err(anyhow!("color must be 6 hex digits (e.g. #RRGGBB)"));
        }
        let r = u8::from_str_radix(&trimmed[0..2], 16)?;
        let g = u8::from_str_radix(&trimmed[2..4], 16)?;
        let b = u8::from_str_radix(&trimmed[4..6], 16)?;
        Ok(Color { r, g, b })
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Burn captions and RGBA bitmaps into a directory of video frames", long_about = None)]
struct Cli {
    /// Directory containing input frames (PNG recommended)
    #[arg(short, long, value_name = "DIR")]
    input_dir: PathBuf,

    /// Directory containing RGBA caption bitmaps, one per frame (matched by sorted order)
    #[arg(short = 'c', long, value_name = "DIR")]
    captions_dir: Option<PathBuf>,

    /// Directory to write the composited frames
    #[arg(short, long, value_name = "DIR", default_value = "output_frames")]
    output_dir: PathBuf,

    /// Optional cap on number of frames to process (useful for quick tests)
    #[arg(long)]
    limit: Option<usize>,

    /// Number of worker threads (default: all logical cores)
    #[arg(short = 't', long)]
    threads: Option<usize>,

    /// Synthetic ASS glyph color hex (#RRGGBB), burned into the top-left corner every frame
    #[arg(long)]
    caption_color: Option<String>,

    /// Tint multiplied into every loaded RGBA caption bitmap (#RRGGBB)
    #[arg(long)]
    rgba_tint: Option<String>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Cli::parse();
    let settings = osdcomp::config::load_settings().unwrap_or_default();

    let threads = args.threads.or_else(|| {
        if settings.threads > 0 {
            Some(settings.threads as usize)
        } else {
            None
        }
    });
    if let Some(t) = threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(t)
            .build_global()
            .context("failed to configure thread pool")?;
    }

    let caption_color = Color::from_hex(
        args.caption_color.as_deref().unwrap_or(&settings.caption_color),
    )?;
    let rgba_tint = Color::from_hex(args.rgba_tint.as_deref().unwrap_or(&settings.rgba_tint))?;

    let mut entries = list_images(&args.input_dir)?;
    let captions = match &args.captions_dir {
        Some(dir) => list_images(dir)?,
        None => Vec::new(),
    };

    let limit = args.limit.or_else(|| {
        if settings.part_limit > 0 {
            Some(settings.part_limit as usize)
        } else {
            None
        }
    });
    if let Some(limit) = limit {
        entries.truncate(limit);
    }

    if entries.is_empty() {
        return Err(anyhow!("input directory is empty"));
    }

    fs::create_dir_all(&args.output_dir)?;

    let frames: Vec<RgbaImage> = entries
        .iter()
        .map(|path| -> Result<RgbaImage> {
            Ok(image::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?
                .to_rgba8())
        })
        .collect::<Result<Vec<_>>>()?;

    let (width, height) = frames[0].dimensions();
    for (idx, frame) in frames.iter().enumerate() {
        if frame.dimensions() != (width, height) {
            return Err(anyhow!(
                "frame {} has different dimensions; all frames must match",
                entries[idx].display()
            ));
        }
    }

    let captions: Vec<Option<RgbaImage>> = (0..frames.len())
        .map(|i| captions.get(i).map(|p| image::open(p).map(|im| im.to_rgba8())))
        .map(|r| r.transpose())
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to open a caption bitmap")?;

    info!(
        "burning {} frame(s) at {}x{}, {} caption bitmap(s) supplied",
        frames.len(),
        width,
        height,
        captions.iter().filter(|c| c.is_some()).count()
    );

    let registry = Registry::new();
    let params = ImageParams {
        format: YUV420P8,
        width,
        height,
        matrix: Matrix::Bt601,
        range: Range::Limited,
        chroma_location: ChromaLocation::Center,
        alpha: AlphaMode::None,
    };

    let counter = AtomicUsize::new(0);

    frames
        .par_iter()
        .zip(captions.par_iter())
        .enumerate()
        .try_for_each_init(
            osdcomp::pipeline::CompositorCache::new,
            |cache, (i, (frame, caption))| -> Result<()> {
                let mut dst = rgba_to_yuv420p8(&registry, frame, width, height);

                let overlay = build_overlay(i as u64, width, height, caption_color, rgba_tint, caption);

                if !composite(cache, &registry, &mut dst, params, &overlay) {
                    return Err(anyhow!("compositing failed for frame {}", entries[i].display()));
                }

                let out = yuv420p8_to_rgba(&dst, width, height);
                let out_name = entries[i]
                    .file_name()
                    .map(|n| n.to_owned())
                    .ok_or_else(|| anyhow!("bad filename"))?;
                let mut out_path = args.output_dir.clone();
                out_path.push(out_name);
                image::save_buffer(&out_path, &out, width, height, image::ColorType::Rgba8)
                    .with_context(|| format!("failed to save {}", out_path.display()))?;

                let done = counter.fetch_add(1, Ordering::Relaxed) + 1;
                if done % 25 == 0 || done == frames.len() {
                    info!("processed {} / {}", done, frames.len());
                }
                Ok(())
            },
        )?;

    info!("done. wrote {} frames to {}", frames.len(), args.output_dir.display());
    Ok(())
}

/// One overlay-input carrying a synthetic top-left ASS glyph plus, if a
/// caption bitmap was supplied for this frame, a tinted RGBA part at full
/// canvas size.
fn build_overlay(
    change_id: u64,
    width: u32,
    height: u32,
    caption_color: Color,
    rgba_tint: Color,
    caption: &Option<RgbaImage>,
) -> OverlayList {
    let glyph_w = 32u32.min(width);
    let glyph_h = 16u32.min(height);
    let color = ((caption_color.r as u32) << 24)
        | ((caption_color.g as u32) << 16)
        | ((caption_color.b as u32) << 8);
    let glyph = LibassPart {
        x: 4,
        y: 4,
        w: glyph_w,
        h: glyph_h,
        bitmap: vec![200u8; (glyph_w * glyph_h) as usize],
        stride: glyph_w as usize,
        color,
    };

    let mut items = vec![OverlayItem {
        index: 0,
        change_id,
        parts: OverlayParts::Libass(vec![glyph]),
    }];

    if let Some(caption) = caption {
        let (cw, ch) = caption.dimensions();
        let stride = cw as usize * 4;
        let mut bitmap = vec![0u8; stride * ch as usize];
        for (px, sp) in bitmap.chunks_exact_mut(4).zip(caption.pixels()) {
            px[0] = ((sp[0] as u32 * rgba_tint.r as u32) / 255) as u8;
            px[1] = ((sp[1] as u32 * rgba_tint.g as u32) / 255) as u8;
            px[2] = ((sp[2] as u32 * rgba_tint.b as u32) / 255) as u8;
            px[3] = sp[3];
        }
        let part = RgbaPart {
            x: 0,
            y: 0,
            w: cw,
            h: ch,
            dw: width,
            dh: height,
            bitmap,
            stride,
        };
        items.push(OverlayItem {
            index: 1,
            change_id,
            parts: OverlayParts::Rgba(vec![part]),
        });
    }

    OverlayList {
        change_id,
        width,
        height,
        items,
    }
}

/// BT.601 full-precision RGB -> 4:2:0 limited-range YUV, averaging 2x2
/// luma blocks for each chroma sample (teacher-style scalar per-pixel loop,
/// generalized from `main::blend_pixel`'s nested-loop shape).
fn rgba_to_yuv420p8(registry: &Registry, frame: &RgbaImage, width: u32, height: u32) -> Image {
    let desc = registry.describe(YUV420P8).unwrap().clone();
    let mut img = Image::alloc(desc, width, height);

    for y in 0..height {
        for x in 0..width {
            let p = frame.get_pixel(x, y);
            let (r, g, b) = (p[0] as f32, p[1] as f32, p[2] as f32);
            let yv = 0.299 * r + 0.587 * g + 0.114 * b;
            img.planes[0].set_u8(x, y, (16.0 + yv / 255.0 * 219.0).round() as u8);
        }
    }

    let cw = (width >> 1).max(1);
    let ch = (height >> 1).max(1);
    for cy in 0..ch {
        for cx in 0..cw {
            let mut cb_sum = 0.0f32;
            let mut cr_sum = 0.0f32;
            let mut n = 0.0f32;
            for dy in 0..2u32 {
                for dx in 0..2u32 {
                    let x = (cx * 2 + dx).min(width - 1);
                    let y = (cy * 2 + dy).min(height - 1);
                    let p = frame.get_pixel(x, y);
                    let (r, g, b) = (p[0] as f32, p[1] as f32, p[2] as f32);
                    cb_sum += -0.168736 * r - 0.331264 * g + 0.5 * b + 127.5;
                    cr_sum += 0.5 * r - 0.418688 * g - 0.081312 * b + 127.5;
                    n += 1.0;
                }
            }
            let cb = (cb_sum / n) / 255.0;
            let cr = (cr_sum / n) / 255.0;
            img.planes[1].set_u8(cx, cy, (16.0 + cb * 224.0).round().clamp(0.0, 255.0) as u8);
            img.planes[2].set_u8(cx, cy, (16.0 + cr * 224.0).round().clamp(0.0, 255.0) as u8);
        }
    }
    img
}

/// Inverse of [`rgba_to_yuv420p8`], for writing a viewable PNG preview.
fn yuv420p8_to_rgba(img: &Image, width: u32, height: u32) -> RgbaImage {
    let mut out: RgbaImage = ImageBuffer::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let yv = (img.planes[0].get_u8(x, y) as f32 - 16.0) / 219.0;
            let cb = (img.planes[1].get_u8(x >> 1, y >> 1) as f32 - 16.0) / 224.0 - 0.5;
            let cr = (img.planes[2].get_u8(x >> 1, y >> 1) as f32 - 16.0) / 224.0 - 0.5;

            let r = (yv + 1.402 * cr) * 255.0;
            let g = (yv - 0.344136 * cb - 0.714136 * cr) * 255.0;
            let b = (yv + 1.772 * cb) * 255.0;

            out.put_pixel(
                x,
                y,
                Rgba([
                    r.round().clamp(0.0, 255.0) as u8,
                    g.round().clamp(0.0, 255.0) as u8,
                    b.round().clamp(0.0, 255.0) as u8,
                    255,
                ]),
            );
        }
    }
    out
}

fn list_images(dir: &PathBuf) -> Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("failed to read directory {}", dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| matches_ignore_case(ext, &["png", "jpg", "jpeg", "bmp", "tga", "gif"]))
                .unwrap_or(false)
        })
        .collect();
    entries.sort();
    Ok(entries)
}

fn matches_ignore_case(ext: &str, list: &[&str]) -> bool {
    list.iter().any(|e| e.eq_ignore_ascii_case(ext))
}
