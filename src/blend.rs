//! Component F — Blender (spec §4.F).
//!
//! Walks the dirty map in `align_y`-row bands; for each non-empty slice
//! column, repacks overlay/destination/chroma-alpha into float, applies the
//! premultiplied-over blend, and repacks the result back into `dst`.

use crate::dirty_map::SLICE_W;
use crate::error::Result;
use crate::format::{Component, FormatDescriptor};
use crate::image::Image;
use crate::pipeline::CompositorCache;
use crate::repack::Repack;

/// `dst = overlay + dst * (1 - alpha)`, the premultiplied-over formula,
/// applied in place to one float sample.
#[inline]
fn blend_sample(overlay: f32, dst: f32, alpha: f32) -> f32 {
    overlay + dst * (1.0 - alpha)
}

/// Locate `comp` within `desc`: which plane carries it, and at what
/// component offset in that plane. The overlay format always carries every
/// component the destination does (it is built either by mirroring the
/// destination's planes or, for packed RGB destinations, by literally being
/// the same packed layout), so plane *index* alone isn't a safe way to line
/// up samples across the two descriptors — their plane counts can differ
/// (packed BGRA vs. planar GBR). Matching by component kind instead handles
/// both shapes uniformly.
fn find_component(desc: &FormatDescriptor, comp: Component) -> (usize, usize) {
    for (pi, p) in desc.planes.iter().enumerate() {
        if let Some(ci) = p.components.iter().position(|c| *c == comp) {
            return (pi, ci);
        }
    }
    panic!("overlay format is missing component {comp:?} that the destination carries");
}

/// Repacks, blends, and repacks back one `[x, x+w) x [y, y+band_h)` slice.
#[allow(clippy::too_many_arguments)]
fn blend_region(
    built: &mut crate::pipeline::Built,
    repack: &dyn Repack,
    dst: &mut Image,
    x: u32,
    y: u32,
    w: u32,
    band_h: u32,
) -> Result<()> {
    let overlay_src: &Image = built.video_overlay.as_ref().unwrap_or(&built.rgba_overlay);

    repack.line(
        &built.overlay_to_f32,
        overlay_src,
        &mut built.overlay_tmp,
        x,
        y,
        0,
        0,
        w,
        band_h,
    )?;
    repack.line(&built.video_to_f32, dst, &mut built.video_tmp, x, y, 0, 0, w, band_h)?;

    if let (Some(calpha_overlay), Some(calpha_tmp), Some(calpha_to_f32)) = (
        built.calpha_overlay.as_ref(),
        built.calpha_tmp.as_mut(),
        built.calpha_to_f32.as_ref(),
    ) {
        let xs = built.overlay_desc.xs;
        let ys = built.overlay_desc.ys;
        repack.line(
            calpha_to_f32,
            calpha_overlay,
            calpha_tmp,
            x >> xs,
            y >> ys,
            0,
            0,
            (w >> xs).max(1),
            (band_h >> ys).max(1),
        )?;
    }

    let (alpha_plane_idx, alpha_component) = find_component(&built.overlay_desc, Component::A);

    for (pi, plane_desc) in built.dst_desc.planes.clone().iter().enumerate() {
        let xs = if plane_desc.subsampled { built.dst_desc.xs } else { 0 };
        let ys = if plane_desc.subsampled { built.dst_desc.ys } else { 0 };
        let pw = (w >> xs).max(1);
        let ph = (band_h >> ys).max(1);

        for (c, &comp) in plane_desc.components.clone().iter().enumerate() {
            let (opi, oci) = find_component(&built.overlay_desc, comp);
            for row in 0..ph {
                for col in 0..pw {
                    let a = if plane_desc.subsampled {
                        built
                            .calpha_tmp
                            .as_ref()
                            .map(|c| c.planes[0].get(col, row, 0))
                            .unwrap_or(1.0)
                    } else {
                        built.overlay_tmp.planes[alpha_plane_idx].get(col, row, alpha_component)
                    };
                    let o = built.overlay_tmp.planes[opi].get(col, row, oci);
                    let d = built.video_tmp.planes[pi].get(col, row, c);
                    built.video_tmp.planes[pi].set(col, row, c, blend_sample(o, d, a));
                }
            }
        }
    }

    repack.line_back(
        &built.video_from_f32,
        &built.video_tmp,
        dst,
        0,
        0,
        x,
        y,
        w,
        band_h,
    )?;
    Ok(())
}

/// Blends every dirty slice of `cache`'s overlay onto `dst`.
///
/// The overlay/dirty-map buffers are allocated padded out to `SLICE_W`/
/// `TILE_H` when tiled, which can exceed the destination's real
/// `params.width`/`params.height` by up to a tile. Every region handed to
/// `blend_region` is clipped back down to those real dimensions so the
/// Blender never reads or writes past `dst`'s actual bounds.
pub fn blend_dirty_slices(cache: &mut CompositorCache, dst: &mut Image) -> Result<()> {
    let align_y = cache.built().align_y;
    let h = cache.built().h.min(cache.built().params.height);
    let true_w = cache.built().params.width;
    let s_w = cache.dirty_map().s_w();

    let mut y = 0u32;
    while y < h {
        let band_h = (y + align_y).min(h) - y;
        for sx in 0..s_w {
            let mut x0 = SLICE_W;
            let mut x1 = 0u32;
            for row in y..(y + band_h) {
                let s = cache.dirty_map().slice(sx, row);
                if !s.is_empty() {
                    x0 = x0.min(s.x0);
                    x1 = x1.max(s.x1);
                }
            }
            if x0 > x1 {
                continue;
            }
            let col = sx as u32 * SLICE_W;
            let x = col + x0;
            if x >= true_w {
                continue;
            }
            let w = (x1 - x0).min(true_w - x);
            debug_assert_eq!(x % cache.built().align_x, 0);
            let (built, repack) = cache.parts_for_blend();
            blend_region(built, repack, dst, x, y, w, band_h)?;
        }
        y += align_y;
    }
    Ok(())
}
