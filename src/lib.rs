//! Subtitle/OSD compositor core: blends pre-rasterized overlay bitmaps
//! (libass-style coverage glyphs and straight-alpha RGBA bitmaps) onto a
//! destination video frame whose pixel format, chroma subsampling, range,
//! and alpha mode are only known at runtime.
//!
//! The public entry point is [`composite`]; everything it needs lives on a
//! [`CompositorCache`] that the caller owns and reuses frame to frame.

pub mod ass;
pub mod blend;
pub mod config;
pub mod convert;
pub mod dirty_map;
pub mod error;
pub mod format;
pub mod image;
pub mod pipeline;
pub mod premul;
pub mod repack;
pub mod scaler;
pub mod stager;

use log::warn;

use crate::error::Result;
use crate::format::Registry;
use crate::image::{Image, ImageParams};
use crate::pipeline::CompositorCache;
use crate::scaler::{Bgra8Buf, SoftwareScaler};

/// A monochrome 8-bit coverage bitmap tinted by a single color, per §4.B.
/// `color` is `0xRRGGBBAA` with an *inverse* alpha in the low byte.
#[derive(Clone, Debug)]
pub struct LibassPart {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
    pub bitmap: Vec<u8>,
    pub stride: usize,
    pub color: u32,
}

/// A straight-premultiplied BGRA bitmap blitted at `(x, y)` and drawn at
/// display size `(dw, dh)`, whose own pixel dimensions are `(w, h)`.
#[derive(Clone, Debug)]
pub struct RgbaPart {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
    pub dw: u32,
    pub dh: u32,
    pub bitmap: Vec<u8>,
    pub stride: usize,
}

/// Which overlay-bitmap format an [`OverlayItem`]'s parts carry. Mirrors the
/// spec's `supported_formats` table: these are the only two accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverlayFormat {
    Libass,
    Rgba,
}

/// Returns whether `fmt` is an overlay-bitmap format the core accepts.
/// Both variants of [`OverlayFormat`] are, by construction, the only ones
/// representable in an [`OverlayItem`] — this exists as the spec's named
/// "constant table" collaborator surface.
pub fn supports_overlay_format(fmt: OverlayFormat) -> bool {
    matches!(fmt, OverlayFormat::Libass | OverlayFormat::Rgba)
}

/// One overlay-input's parts, homogeneous in format per the spec's "a format
/// tag (LIBASS or RGBA) ... and a list of parts".
#[derive(Clone, Debug)]
pub enum OverlayParts {
    Libass(Vec<LibassPart>),
    Rgba(Vec<RgbaPart>),
}

/// One overlay-input index: a slot in the Part Cache, its own `change_id`,
/// and its parts.
#[derive(Clone, Debug)]
pub struct OverlayItem {
    pub index: usize,
    pub change_id: u64,
    pub parts: OverlayParts,
}

/// The full set of overlay inputs for one `composite` call: a monotonic
/// `change_id` over the whole set, the overlay's logical bounding box, and
/// the per-input items.
#[derive(Clone, Debug)]
pub struct OverlayList {
    pub change_id: u64,
    pub width: u32,
    pub height: u32,
    pub items: Vec<OverlayItem>,
}

impl OverlayList {
    pub fn empty(change_id: u64, width: u32, height: u32) -> Self {
        OverlayList {
            change_id,
            width,
            height,
            items: Vec::new(),
        }
    }
}

/// Re-renders `rgba_overlay` from scratch: clears it, replays every part of
/// every overlay-input item (Components A/B/C), then converts it into the
/// video colorspace (Component D).
fn render_overlay(cache: &mut CompositorCache, overlay: &OverlayList) {
    let align_x = cache.built().align_x;
    let align_y = cache.built().align_y;
    let w = cache.built().w;
    let h = cache.built().h;

    {
        let (dirty, rgba) = cache.dirty_and_overlay();
        dirty.clear_overlay(rgba);
    }

    for item in &overlay.items {
        assert!(
            item.index < crate::stager::MAX_OSD_PARTS,
            "overlay-input index out of range"
        );
        match &item.parts {
            OverlayParts::Libass(parts) => {
                for part in parts {
                    let (dirty, rgba) = cache.dirty_and_overlay();
                    crate::ass::blend_glyph(
                        rgba, dirty, align_x, align_y, w, h, part.x, part.y, &part.bitmap,
                        part.stride, part.w, part.h, part.color,
                    );
                }
            }
            OverlayParts::Rgba(parts) => {
                let soft = SoftwareScaler::new();
                let scale_fn = move |src: &Bgra8Buf, dw: u32, dh: u32| {
                    soft.scale_to(src, dw, dh)
                        .unwrap_or_else(|_| Bgra8Buf::new(dw.max(1), dh.max(1)))
                };
                for (bi, part) in parts.iter().enumerate() {
                    let (dirty, rgba, part_cache) = cache.dirty_overlay_and_part(item.index);
                    crate::stager::stage_bitmap(
                        rgba, dirty, align_x, align_y, w, h, part_cache, bi, item.change_id,
                        part.x, part.y, part.dw, part.dh, part.w, part.h, &part.bitmap,
                        part.stride, &scale_fn,
                    );
                }
            }
        }
    }

    cache.convert_overlay();
}

/// Wraps the Blender with the Premul Wrap (Component G), scaling to a
/// premultiplied copy of `dst` first iff the destination's alpha mode needs
/// it.
fn blend_with_premul(cache: &mut CompositorCache, dst: &mut Image) -> Result<()> {
    let alpha = cache.built().params.alpha;
    // `built().w`/`h` may be padded past the destination's real size (for
    // alignment, or further for tiling); `dst` is only ever allocated at
    // its true params dimensions, so the premultiply region must match that.
    let w = cache.built().params.width;
    let h = cache.built().params.height;
    let scaler = SoftwareScaler::new();
    crate::premul::with_premultiplied(dst, alpha, &scaler, 0, 0, w, h, |d, _, _, _, _| {
        crate::blend::blend_dirty_slices(&mut *cache, d)
    })
}

/// Spec §6's single entry point: update or validate `cache` for `params`,
/// re-render the overlay if `overlay.change_id` advanced, then blend onto
/// `dst`. Returns `false` (and resets `cache`) on any allocation/backend
/// failure; never partially updates `dst` beyond what a failed blend may
/// have already written (spec §7: non-fatal error, retried on next call).
///
/// # Panics
/// On precondition violations (spec §7.4): `dst`'s format doesn't match
/// `params.format`, or `dst` is smaller than the overlay list's bounding
/// box. These are programming errors, not recoverable runtime conditions.
pub fn composite(
    cache: &mut CompositorCache,
    registry: &Registry,
    dst: &mut Image,
    params: ImageParams,
    overlay: &OverlayList,
) -> bool {
    assert_eq!(
        dst.desc.id, params.format,
        "dst's format must match params.format"
    );
    assert!(
        params.bounding_box_fits(overlay.width, overlay.height),
        "destination is smaller than the overlay list's bounding box"
    );

    if cache.ensure_built(registry, params).is_err() {
        return false;
    }

    if cache.change_id != Some(overlay.change_id) {
        render_overlay(cache, overlay);
        cache.change_id = Some(overlay.change_id);
    }

    match blend_with_premul(cache, dst) {
        Ok(()) => true,
        Err(e) => {
            warn!("composite: blend failed, resetting cache: {e}");
            cache.reset();
            false
        }
    }
}

/// Diagnostic string reporting the cache's chosen formats, per spec §6.
pub fn debug_info(cache: &CompositorCache) -> String {
    cache.debug_info()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{BGRA8, YUV420P8};
    use crate::image::{AlphaMode, ChromaLocation, Matrix, Range};

    fn yuv420_params(w: u32, h: u32) -> ImageParams {
        ImageParams {
            format: YUV420P8,
            width: w,
            height: h,
            matrix: Matrix::Bt601,
            range: Range::Limited,
            chroma_location: ChromaLocation::Center,
            alpha: AlphaMode::None,
        }
    }

    fn bgra_params(w: u32, h: u32, alpha: AlphaMode) -> ImageParams {
        ImageParams {
            format: BGRA8,
            width: w,
            height: h,
            matrix: Matrix::Rgb,
            range: Range::Full,
            chroma_location: ChromaLocation::Center,
            alpha,
        }
    }

    // Scenario 1: empty overlay leaves dst untouched and any_osd is false.
    #[test]
    fn empty_overlay_leaves_destination_unchanged() {
        let reg = Registry::new();
        let mut cache = CompositorCache::new();
        let desc = reg.describe(BGRA8).unwrap().clone();
        let mut dst = Image::alloc(desc, 64, 64);
        for y in 0..64 {
            for x in 0..64 {
                dst.planes[0].set_bgra(x, y, [10, 20, 30, 255]);
            }
        }
        let before = dst.planes[0].data.clone();

        let overlay = OverlayList::empty(1, 64, 64);
        let ok = composite(
            &mut cache,
            &reg,
            &mut dst,
            bgra_params(64, 64, AlphaMode::None),
            &overlay,
        );
        assert!(ok);
        assert_eq!(dst.planes[0].data, before);
        assert!(!cache.any_osd());
    }

    // Scenario 2: single opaque white ASS glyph over a zeroed BGRA dst.
    #[test]
    fn single_ass_glyph_paints_solid_color() {
        let reg = Registry::new();
        let mut cache = CompositorCache::new();
        let desc = reg.describe(BGRA8).unwrap().clone();
        let mut dst = Image::alloc(desc, 8, 8);

        let glyph = LibassPart {
            x: 0,
            y: 0,
            w: 8,
            h: 8,
            bitmap: vec![255u8; 64],
            stride: 8,
            color: 0xFF_00_00_00,
        };
        let overlay = OverlayList {
            change_id: 1,
            width: 8,
            height: 8,
            items: vec![OverlayItem {
                index: 0,
                change_id: 1,
                parts: OverlayParts::Libass(vec![glyph]),
            }],
        };

        let ok = composite(
            &mut cache,
            &reg,
            &mut dst,
            bgra_params(8, 8, AlphaMode::Premultiplied),
            &overlay,
        );
        assert!(ok);
        for y in 0..8u32 {
            for x in 0..8u32 {
                assert_eq!(dst.planes[0].pixel_bgra(x, y), [0, 0, 255, 255]);
            }
        }
    }

    // Scenario 3: RGBA part clipped at a negative origin.
    #[test]
    fn clipped_rgba_part_places_bottom_right_quadrant() {
        let reg = Registry::new();
        let mut cache = CompositorCache::new();
        let desc = reg.describe(BGRA8).unwrap().clone();
        let mut dst = Image::alloc(desc, 16, 16);

        let stride = 8 * 4;
        let mut bitmap = vec![0u8; stride * 8];
        for px in bitmap.chunks_exact_mut(4) {
            px.copy_from_slice(&[50, 60, 70, 255]);
        }
        let part = RgbaPart {
            x: -4,
            y: -4,
            w: 8,
            h: 8,
            dw: 8,
            dh: 8,
            bitmap,
            stride,
        };
        let overlay = OverlayList {
            change_id: 1,
            width: 16,
            height: 16,
            items: vec![OverlayItem {
                index: 0,
                change_id: 1,
                parts: OverlayParts::Rgba(vec![part]),
            }],
        };

        let ok = composite(
            &mut cache,
            &reg,
            &mut dst,
            bgra_params(16, 16, AlphaMode::Premultiplied),
            &overlay,
        );
        assert!(ok);
        for y in 0..4u32 {
            for x in 0..4u32 {
                assert_eq!(dst.planes[0].pixel_bgra(x, y), [50, 60, 70, 255]);
            }
        }
        assert_eq!(dst.planes[0].pixel_bgra(4, 4), [0, 0, 0, 0]);
    }

    // Scenario 4: a white LIBASS square over a YUV420P limited-range grey dst.
    #[test]
    fn yuv420_destination_gets_limited_range_white_square() {
        let reg = Registry::new();
        let mut cache = CompositorCache::new();
        let desc = reg.describe(YUV420P8).unwrap().clone();
        let mut dst = Image::alloc(desc, 32, 32);
        for p in &mut dst.planes {
            p.data.fill(126); // arbitrary mid-range grey
        }

        let glyph = LibassPart {
            x: 8,
            y: 8,
            w: 16,
            h: 16,
            bitmap: vec![255u8; 256],
            stride: 16,
            color: 0xFF_FF_FF_00,
        };
        let overlay = OverlayList {
            change_id: 1,
            width: 32,
            height: 32,
            items: vec![OverlayItem {
                index: 0,
                change_id: 1,
                parts: OverlayParts::Libass(vec![glyph]),
            }],
        };

        let ok = composite(&mut cache, &reg, &mut dst, yuv420_params(32, 32), &overlay);
        assert!(ok);

        for y in 8..24u32 {
            for x in 8..24u32 {
                assert!((dst.planes[0].get_u8(x, y) as i32 - 235).abs() <= 1);
            }
        }
        for y in (8..24u32).step_by(2) {
            for x in (8..24u32).step_by(2) {
                assert!((dst.planes[1].get_u8(x / 2, y / 2) as i32 - 128).abs() <= 1);
                assert!((dst.planes[2].get_u8(x / 2, y / 2) as i32 - 128).abs() <= 1);
            }
        }
        assert_eq!(dst.planes[0].get_u8(0, 0), 126);
    }

    // Scenario 5: repeating the same change_id skips the RGBA rescale.
    #[test]
    fn repeated_change_id_skips_rescaling() {
        let reg = Registry::new();
        let mut cache = CompositorCache::new();
        let desc = reg.describe(YUV420P8).unwrap().clone();
        let mut dst = Image::alloc(desc, 32, 32);

        let stride = 4 * 4;
        let mut bitmap = vec![0u8; stride * 4];
        for px in bitmap.chunks_exact_mut(4) {
            px.copy_from_slice(&[1, 2, 3, 255]);
        }
        // Display size differs from source size so the stager must scale.
        let part = RgbaPart {
            x: 0,
            y: 0,
            w: 4,
            h: 4,
            dw: 16,
            dh: 16,
            bitmap,
            stride,
        };
        let overlay = OverlayList {
            change_id: 1,
            width: 32,
            height: 32,
            items: vec![OverlayItem {
                index: 0,
                change_id: 1,
                parts: OverlayParts::Rgba(vec![part]),
            }],
        };

        assert!(composite(&mut cache, &reg, &mut dst, yuv420_params(32, 32), &overlay));
        let first = dst.planes[0].data.clone();
        assert!(composite(&mut cache, &reg, &mut dst, yuv420_params(32, 32), &overlay));
        assert_eq!(dst.planes[0].data, first, "repeated change_id must be idempotent");
    }

    // Scenario 6: premul wrap round-trips a straight-alpha BGRA destination.
    #[test]
    fn premul_wrap_round_trips_straight_alpha_destination() {
        let reg = Registry::new();
        let mut cache = CompositorCache::new();
        let desc = reg.describe(BGRA8).unwrap().clone();
        let mut dst = Image::alloc(desc, 8, 8);

        let stride = 8 * 4;
        let mut bitmap = vec![0u8; stride * 8];
        for px in bitmap.chunks_exact_mut(4) {
            px.copy_from_slice(&[0, 0, 255, 255]);
        }
        let part = RgbaPart {
            x: 0,
            y: 0,
            w: 8,
            h: 8,
            dw: 8,
            dh: 8,
            bitmap,
            stride,
        };
        let overlay = OverlayList {
            change_id: 1,
            width: 8,
            height: 8,
            items: vec![OverlayItem {
                index: 0,
                change_id: 1,
                parts: OverlayParts::Rgba(vec![part]),
            }],
        };

        let ok = composite(
            &mut cache,
            &reg,
            &mut dst,
            bgra_params(8, 8, AlphaMode::Straight),
            &overlay,
        );
        assert!(ok);
        for y in 0..8u32 {
            for x in 0..8u32 {
                assert_eq!(dst.planes[0].pixel_bgra(x, y), [0, 0, 255, 255]);
            }
        }
    }

    #[test]
    fn mismatched_dst_format_panics() {
        let reg = Registry::new();
        let mut cache = CompositorCache::new();
        let desc = reg.describe(BGRA8).unwrap().clone();
        let mut dst = Image::alloc(desc, 8, 8);
        let overlay = OverlayList::empty(1, 8, 8);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            composite(&mut cache, &reg, &mut dst, yuv420_params(8, 8), &overlay)
        }));
        assert!(result.is_err());
    }
}
