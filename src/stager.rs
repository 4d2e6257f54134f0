//! Component C — RGBA Bitmap Stager (spec §4.C) and the Part Cache (§3).
//!
//! Clips an external straight-premultiplied BGRA bitmap against the
//! destination, scales it once (then caches the scaled result keyed by the
//! producer's `change_id`), and blends it "over premul" into the overlay.

use std::collections::HashMap;

use crate::dirty_map::DirtyMap;
use crate::image::Image;
use crate::scaler::Bgra8Buf;

/// Cap on distinct overlay-input indices the cache tracks (spec §3).
pub const MAX_OSD_PARTS: usize = 64;

/// Scaled-bitmap cache for a single overlay-input index, keyed by
/// `bitmap_index` within that input's part list. Invalidated wholesale
/// whenever the input's `change_id` advances.
#[derive(Default)]
pub struct PartCache {
    change_id: Option<u64>,
    entries: HashMap<usize, Bgra8Buf>,
}

impl PartCache {
    pub fn new() -> Self {
        PartCache::default()
    }

    fn sync_change_id(&mut self, change_id: u64) {
        if self.change_id != Some(change_id) {
            self.entries.clear();
            self.change_id = Some(change_id);
        }
    }
}

/// One [`PartCache`] per overlay-input index, capped at [`MAX_OSD_PARTS`].
pub struct PartCacheStore {
    parts: Vec<PartCache>,
}

impl PartCacheStore {
    pub fn new() -> Self {
        PartCacheStore {
            parts: (0..MAX_OSD_PARTS).map(|_| PartCache::new()).collect(),
        }
    }

    pub fn part_mut(&mut self, index: usize) -> &mut PartCache {
        assert!(index < MAX_OSD_PARTS, "overlay-input index out of range");
        &mut self.parts[index]
    }
}

impl Default for PartCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

fn extract_region(bitmap: &[u8], stride: usize, x0: u32, y0: u32, w: u32, h: u32) -> Bgra8Buf {
    let mut buf = Bgra8Buf::new(w, h);
    for row in 0..h {
        let src_off = (y0 as usize + row as usize) * stride + x0 as usize * 4;
        let dst_off = row as usize * buf.stride;
        buf.data[dst_off..dst_off + buf.stride]
            .copy_from_slice(&bitmap[src_off..src_off + buf.stride]);
    }
    buf
}

fn blend_over_premul(overlay: &mut Image, src: &Bgra8Buf, x0: u32, y0: u32) {
    let plane = &mut overlay.planes[0];
    for row in 0..src.height {
        let dst_y = y0 + row;
        for col in 0..src.width {
            let dst_x = x0 + col;
            let s = src.pixel(col, row);
            let inv = 65025u32 - s[3] as u32 * 255;
            let o = dst_y as usize * plane.stride + dst_x as usize * 4;
            let d = &mut plane.data[o..o + 4];
            for c in 0..4 {
                d[c] = (s[c] as u32 + (d[c] as u32 * inv) / 65025).min(255) as u8;
            }
        }
    }
}

/// Clip, scale-and-cache, and composite one RGBA part onto the overlay.
#[allow(clippy::too_many_arguments)]
pub fn stage_bitmap(
    overlay: &mut Image,
    dirty: &mut DirtyMap,
    align_x: u32,
    align_y: u32,
    w: u32,
    h: u32,
    cache: &mut PartCache,
    bitmap_index: usize,
    change_id: u64,
    x: i32,
    y: i32,
    dw_src: u32,
    dh_src: u32,
    sw_src: u32,
    sh_src: u32,
    bitmap: &[u8],
    stride: usize,
    scaler: &dyn Fn(&Bgra8Buf, u32, u32) -> Bgra8Buf,
) {
    cache.sync_change_id(change_id);

    let x1f = x + dw_src as i32;
    let y1f = y + dh_src as i32;
    let x0 = x.max(0).min(w as i32);
    let y0 = y.max(0).min(h as i32);
    let x1 = x1f.max(0).min(w as i32);
    let y1 = y1f.max(0).min(h as i32);
    if x1 <= x0 || y1 <= y0 {
        return;
    }
    let dw = (x1 - x0) as u32;
    let dh = (y1 - y0) as u32;

    let fx = dw_src as f32 / sw_src as f32;
    let fy = dh_src as f32 / sh_src as f32;
    let sx = (((x0 - x) as f32) / fx).clamp(0.0, sw_src as f32) as u32;
    let sy = (((y0 - y) as f32) / fy).clamp(0.0, sh_src as f32) as u32;
    let mut sw = ((dw as f32) / fx).clamp(1.0, sw_src as f32) as u32;
    let mut sh = ((dh as f32) / fy).clamp(1.0, sh_src as f32) as u32;
    sw = sw.min(sw_src - sx).max(1);
    sh = sh.min(sh_src - sy).max(1);

    let region = extract_region(bitmap, stride, sx, sy, sw, sh);

    if (dw, dh) != (sw, sh) {
        if !cache.entries.contains_key(&bitmap_index) {
            let scaled = scaler(&region, dw, dh);
            cache.entries.insert(bitmap_index, scaled);
        }
        let scaled = cache.entries.get(&bitmap_index).unwrap();
        blend_over_premul(overlay, scaled, x0 as u32, y0 as u32);
    } else {
        blend_over_premul(overlay, &region, x0 as u32, y0 as u32);
    }

    dirty.mark_rect(x0 as u32, y0 as u32, x1 as u32, y1 as u32, align_x, align_y, w, h);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{Registry, BGRA8};
    use crate::scaler::SoftwareScaler;

    fn solid_bitmap(w: u32, h: u32, px: [u8; 4]) -> (Vec<u8>, usize) {
        let stride = w as usize * 4;
        let mut data = vec![0u8; stride * h as usize];
        for row in data.chunks_exact_mut(stride) {
            for p in row.chunks_exact_mut(4) {
                p.copy_from_slice(&px);
            }
        }
        (data, stride)
    }

    #[test]
    fn clipped_negative_origin_places_bottom_right_quadrant() {
        let reg = Registry::new();
        let desc = reg.describe(BGRA8).unwrap().clone();
        let mut overlay = Image::alloc(desc, 16, 16);
        let mut dirty = DirtyMap::new(16, 16);
        let mut cache = PartCache::new();
        let (bitmap, stride) = solid_bitmap(8, 8, [50, 60, 70, 255]);
        let soft = SoftwareScaler::new();
        let scale_fn = |src: &Bgra8Buf, dw: u32, dh: u32| soft.scale_to(src, dw, dh).unwrap();

        stage_bitmap(
            &mut overlay, &mut dirty, 1, 1, 16, 16, &mut cache, 0, 1, -4, -4, 8, 8, 8, 8, &bitmap,
            stride, &scale_fn,
        );

        let plane = &overlay.planes[0];
        for y in 0..4u32 {
            for x in 0..4u32 {
                let o = y as usize * plane.stride + x as usize * 4;
                assert_eq!(&plane.data[o..o + 4], &[50, 60, 70, 255]);
            }
        }
        for y in 4..16u32 {
            let o = y as usize * plane.stride + 0;
            assert_eq!(&plane.data[o..o + 4], &[0, 0, 0, 0]);
        }
    }

    #[test]
    fn change_id_bump_invalidates_scaled_cache() {
        let reg = Registry::new();
        let desc = reg.describe(BGRA8).unwrap().clone();
        let mut overlay = Image::alloc(desc, 32, 32);
        let mut dirty = DirtyMap::new(32, 32);
        let mut cache = PartCache::new();
        let (bitmap, stride) = solid_bitmap(4, 4, [1, 2, 3, 255]);
        let calls = std::cell::Cell::new(0);
        let scale_fn = |src: &Bgra8Buf, dw: u32, dh: u32| {
            calls.set(calls.get() + 1);
            SoftwareScaler::new().scale_to(src, dw, dh).unwrap()
        };

        stage_bitmap(
            &mut overlay, &mut dirty, 1, 1, 32, 32, &mut cache, 0, 1, 0, 0, 16, 16, 4, 4, &bitmap,
            stride, &scale_fn,
        );
        assert_eq!(calls.get(), 1);
        stage_bitmap(
            &mut overlay, &mut dirty, 1, 1, 32, 32, &mut cache, 0, 1, 0, 0, 16, 16, 4, 4, &bitmap,
            stride, &scale_fn,
        );
        assert_eq!(calls.get(), 1, "same change_id must not rescale");

        stage_bitmap(
            &mut overlay, &mut dirty, 1, 1, 32, 32, &mut cache, 0, 2, 0, 0, 16, 16, 4, 4, &bitmap,
            stride, &scale_fn,
        );
        assert_eq!(calls.get(), 2, "change_id bump must invalidate the cached scale");
    }
}
