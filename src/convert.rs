//! Component D — Overlay Converter (spec §4.D).
//!
//! Converts the BGRA `rgba_overlay` into `video_overlay` (the video's own
//! colorspace), in two modes: whole-image (one pass over the full buffer)
//! and tiled (only tiles touching a dirty slice are converted). When chroma
//! is subsampled, also derives the chroma-resolution alpha plane
//! (`calpha_overlay`) used later by the Blender for subsampled planes.

use crate::dirty_map::{DirtyMap, SLICE_W};
use crate::image::{ChromaLocation, Image, Matrix, Range};

pub const TILE_H: u32 = 4;

fn kr_kb(matrix: Matrix) -> (f32, f32) {
    match matrix {
        Matrix::Rgb => (0.0, 0.0),
        Matrix::Bt601 => (0.299, 0.114),
        Matrix::Bt709 => (0.2126, 0.0722),
        Matrix::Bt2020 => (0.2627, 0.0593),
    }
}

/// Premultiplied BGRA8 -> (y, u, v, a), all in `[0, 1]`.
fn bgra_to_yuva(px: [u8; 4], kr: f32, kb: f32) -> (f32, f32, f32, f32) {
    let b = px[0] as f32 / 255.0;
    let g = px[1] as f32 / 255.0;
    let r = px[2] as f32 / 255.0;
    let a = px[3] as f32 / 255.0;
    let y = kr * r + (1.0 - kr - kb) * g + kb * b;
    let u = (b - y) / (2.0 * (1.0 - kb)) + 0.5;
    let v = (r - y) / (2.0 * (1.0 - kr)) + 0.5;
    (y, u, v, a)
}

fn plane_index(img: &Image, want_y: bool, want_u: bool, want_v: bool, want_a: bool) -> Option<usize> {
    use crate::format::Component;
    img.desc.planes.iter().position(|p| {
        (want_y && p.components.contains(&Component::Y))
            || (want_u && p.components.contains(&Component::U))
            || (want_v && p.components.contains(&Component::V))
            || (want_a && p.components.contains(&Component::A))
    })
}

/// Converts the `[x0,x1) x [y0,y1)` (luma-resolution, full-overlay-space)
/// rectangle of `rgba` into `video`'s Y/U/V(+A) planes, and the matching
/// chroma-resolution rectangle of `calpha` if present.
///
/// `video_overlay` is never itself a decodable video signal, only a carrier
/// for the overlay's samples in the destination's component layout, so Y/U/V
/// are always encoded full-scale here, the same way alpha already is below —
/// matching the `Range::Full` the Blender decodes this buffer with.
#[allow(clippy::too_many_arguments)]
fn convert_rect(
    rgba: &Image,
    video: &mut Image,
    calpha: Option<&mut Image>,
    matrix: Matrix,
    chroma_location: ChromaLocation,
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
) {
    let (kr, kb) = kr_kb(matrix);
    let xs = video.desc.xs;
    let ys = video.desc.ys;

    let y_idx = plane_index(video, true, false, false, false);
    let u_idx = plane_index(video, false, true, false, false);
    let v_idx = plane_index(video, false, false, true, false);
    let a_idx = plane_index(video, false, false, false, true);

    // Full-resolution Y and A.
    for y in y0..y1 {
        for x in x0..x1 {
            let src = rgba.planes[0].pixel_bgra(x, y);
            let (yy, _, _, aa) = bgra_to_yuva(src, kr, kb);
            if let Some(pi) = y_idx {
                let raw = crate::repack::PlanarRepacker::from_unit(yy, Range::Full);
                video.planes[pi].set_u8(x, y, raw);
            }
            if let Some(pi) = a_idx {
                let raw = (aa * 255.0).round().clamp(0.0, 255.0) as u8;
                video.planes[pi].set_u8(x, y, raw);
            }
        }
    }

    if u_idx.is_none() && v_idx.is_none() {
        return;
    }

    let bw = 1u32 << xs;
    let bh = 1u32 << ys;
    let cx0 = x0 >> xs;
    let cx1 = x1.div_ceil(bw);
    let cy0 = y0 >> ys;
    let cy1 = y1.div_ceil(bh);

    for cy in cy0..cy1 {
        for cx in cx0..cx1 {
            let (u, v) = if chroma_location == ChromaLocation::Center || bw * bh == 1 {
                let mut su = 0.0f32;
                let mut sv = 0.0f32;
                let mut n = 0u32;
                for dy in 0..bh {
                    for dx in 0..bw {
                        let px = cx * bw + dx;
                        let py = cy * bh + dy;
                        if px >= rgba.width || py >= rgba.height {
                            continue;
                        }
                        let src = rgba.planes[0].pixel_bgra(px, py);
                        let (_, uu, vv, _) = bgra_to_yuva(src, kr, kb);
                        su += uu;
                        sv += vv;
                        n += 1;
                    }
                }
                if n == 0 {
                    (0.5, 0.5)
                } else {
                    (su / n as f32, sv / n as f32)
                }
            } else {
                // Left/TopLeft: co-site with the top-left luma sample.
                let px = (cx * bw).min(rgba.width - 1);
                let py = (cy * bh).min(rgba.height - 1);
                let src = rgba.planes[0].pixel_bgra(px, py);
                let (_, uu, vv, _) = bgra_to_yuva(src, kr, kb);
                (uu, vv)
            };

            if let Some(pi) = u_idx {
                let raw = crate::repack::PlanarRepacker::from_unit_chroma(u, Range::Full);
                video.planes[pi].set_u8(cx, cy, raw);
            }
            if let Some(pi) = v_idx {
                let raw = crate::repack::PlanarRepacker::from_unit_chroma(v, Range::Full);
                video.planes[pi].set_u8(cx, cy, raw);
            }
        }
    }

    if let Some(calpha) = calpha {
        for cy in cy0..cy1 {
            for cx in cx0..cx1 {
                let mut sum = 0u32;
                let mut n = 0u32;
                for dy in 0..bh {
                    for dx in 0..bw {
                        let px = cx * bw + dx;
                        let py = cy * bh + dy;
                        if px >= video.width || py >= video.height {
                            continue;
                        }
                        if let Some(pi) = a_idx {
                            sum += video.planes[pi].get_u8(px, py) as u32;
                            n += 1;
                        }
                    }
                }
                let avg = if n == 0 { 0 } else { (sum / n) as u8 };
                calpha.planes[0].set_u8(cx, cy, avg);
            }
        }
    }
}

/// Whole-image conversion (spec §4.D mode 1).
pub fn convert_whole(
    rgba: &Image,
    video: &mut Image,
    calpha: Option<&mut Image>,
    matrix: Matrix,
    chroma_location: ChromaLocation,
) {
    convert_rect(
        rgba,
        video,
        calpha,
        matrix,
        chroma_location,
        0,
        0,
        rgba.width,
        rgba.height,
    );
}

/// Tiled conversion (spec §4.D mode 2): only converts `(SLICE_W, TILE_H)`
/// tiles that contain at least one non-empty slice on any of their rows.
/// Chroma placement is forced to *center* regardless of the video's chroma
/// location, since tile-local scaling loses the global convention.
pub fn convert_tiled(
    rgba: &Image,
    video: &mut Image,
    mut calpha: Option<&mut Image>,
    matrix: Matrix,
    dirty: &DirtyMap,
) {
    debug_assert_eq!(rgba.width % SLICE_W, 0);
    debug_assert_eq!(rgba.height % TILE_H, 0);

    let tiles_x = rgba.width / SLICE_W;
    let tiles_y = rgba.height / TILE_H;

    for ty in 0..tiles_y {
        for sx in 0..tiles_x as usize {
            let tile_non_empty = (0..TILE_H).any(|row| {
                let y = ty * TILE_H + row;
                !dirty.slice(sx, y).is_empty()
            });
            if !tile_non_empty {
                continue;
            }
            let x0 = sx as u32 * SLICE_W;
            let y0 = ty * TILE_H;
            convert_rect(
                rgba,
                video,
                calpha.as_deref_mut(),
                matrix,
                ChromaLocation::Center,
                x0,
                y0,
                x0 + SLICE_W,
                y0 + TILE_H,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{Registry, BGRA8, YUVA420P8};

    fn make_rgba(w: u32, h: u32, px: [u8; 4]) -> Image {
        let reg = Registry::new();
        let desc = reg.describe(BGRA8).unwrap().clone();
        let mut img = Image::alloc(desc, w, h);
        for y in 0..h {
            for x in 0..w {
                img.planes[0].set_bgra(x, y, px);
            }
        }
        img
    }

    #[test]
    fn white_opaque_converts_to_luma_white_neutral_chroma() {
        let reg = Registry::new();
        let video_desc = reg.describe(YUVA420P8).unwrap().clone();
        let rgba = make_rgba(16, 16, [255, 255, 255, 255]);
        let mut video = Image::alloc(video_desc, 16, 16);
        convert_whole(&rgba, &mut video, None, Matrix::Bt601, ChromaLocation::Center);
        assert_eq!(video.planes[0].get_u8(0, 0), 255);
        assert!((video.planes[1].get_u8(0, 0) as i32 - 128).abs() <= 1);
        assert!((video.planes[2].get_u8(0, 0) as i32 - 128).abs() <= 1);
        assert_eq!(video.planes[3].get_u8(0, 0), 255);
    }

    #[test]
    fn tiled_and_whole_match_when_chroma_location_is_center_and_not_subsampled() {
        let reg = Registry::new();
        let video_desc = reg.describe(crate::format::YUVA444P8).unwrap().clone();
        let rgba = make_rgba(SLICE_W, TILE_H, [10, 20, 30, 200]);

        let mut video_a = Image::alloc(video_desc.clone(), SLICE_W, TILE_H);
        convert_whole(&rgba, &mut video_a, None, Matrix::Bt709, ChromaLocation::Center);

        let mut video_b = Image::alloc(video_desc, SLICE_W, TILE_H);
        let mut dirty = DirtyMap::new(SLICE_W, TILE_H);
        dirty.mark_rect(0, 0, SLICE_W, TILE_H, 1, 1, SLICE_W, TILE_H);
        convert_tiled(&rgba, &mut video_b, None, Matrix::Bt709, &dirty);

        assert_eq!(video_a.planes[0].data, video_b.planes[0].data);
        assert_eq!(video_a.planes[1].data, video_b.planes[1].data);
        assert_eq!(video_a.planes[2].data, video_b.planes[2].data);
    }

    #[test]
    fn tile_is_converted_when_only_its_last_row_is_dirty() {
        let reg = Registry::new();
        let video_desc = reg.describe(YUVA420P8).unwrap().clone();
        let rgba = make_rgba(SLICE_W, TILE_H, [9, 9, 9, 255]);
        let mut video = Image::alloc(video_desc, SLICE_W, TILE_H);
        for p in &mut video.planes {
            p.data.fill(77);
        }
        let mut dirty = DirtyMap::new(SLICE_W, TILE_H);
        // Only row TILE_H - 1 is marked; the tile as a whole must still convert.
        dirty.mark_rect(0, TILE_H - 1, SLICE_W, TILE_H, 1, 1, SLICE_W, TILE_H);
        convert_tiled(&rgba, &mut video, None, Matrix::Bt601, &dirty);
        assert!(video.planes[0].data.iter().any(|&b| b != 77));
    }

    #[test]
    fn tiled_mode_skips_clean_tiles() {
        let reg = Registry::new();
        let video_desc = reg.describe(YUVA420P8).unwrap().clone();
        let rgba = make_rgba(SLICE_W * 2, TILE_H * 2, [1, 2, 3, 4]);
        let mut video = Image::alloc(video_desc, SLICE_W * 2, TILE_H * 2);
        // Touch every plane with a sentinel so we can detect "left alone".
        for p in &mut video.planes {
            p.data.fill(77);
        }
        let dirty = DirtyMap::new(SLICE_W * 2, TILE_H * 2); // nothing marked
        convert_tiled(&rgba, &mut video, None, Matrix::Bt601, &dirty);
        assert!(video.planes[0].data.iter().all(|&b| b == 77));
    }
}
