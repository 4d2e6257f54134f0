//! Component B — ASS Rasterizer (spec §4.B).
//!
//! Blends a monochrome 8-bit coverage bitmap, tinted by a single RGBA
//! color, into the BGRA-premultiplied overlay.

use crate::dirty_map::DirtyMap;
use crate::image::Image;

/// `color` is packed `0xRRGGBBAA` where the low byte is an *inverse* alpha:
/// `a = 255 - (color & 0xff)`.
pub fn blend_glyph(
    overlay: &mut Image,
    dirty: &mut DirtyMap,
    align_x: u32,
    align_y: u32,
    w: u32,
    h: u32,
    x: i32,
    y: i32,
    bitmap: &[u8],
    stride: usize,
    bw: u32,
    bh: u32,
    color: u32,
) {
    let r = ((color >> 24) & 0xFF) as u32;
    let g = ((color >> 16) & 0xFF) as u32;
    let b = ((color >> 8) & 0xFF) as u32;
    let a = 255 - (color & 0xFF);

    let plane = &mut overlay.planes[0];

    for j in 0..bh {
        let dy = y + j as i32;
        if dy < 0 || dy as u32 >= overlay.height {
            continue;
        }
        let src_row = &bitmap[j as usize * stride..j as usize * stride + bw as usize];
        for (i, &v) in src_row.iter().enumerate() {
            let dx = x + i as i32;
            if dx < 0 || dx as u32 >= overlay.width {
                continue;
            }
            if v == 0 {
                continue;
            }
            let v = v as u32;
            let aa = a * v;
            let inv = 65025 - aa;

            let o = dy as usize * plane.stride + dx as usize * 4;
            let px = &mut plane.data[o..o + 4];
            let db = px[0] as u32;
            let dg = px[1] as u32;
            let dr = px[2] as u32;
            let da = px[3] as u32;

            px[0] = ((v * b * a + db * inv) / 65025) as u8;
            px[1] = ((v * g * a + dg * inv) / 65025) as u8;
            px[2] = ((v * r * a + dr * inv) / 65025) as u8;
            px[3] = ((aa * 255 + da * inv) / 65025) as u8;
        }
    }

    let x0 = x.max(0) as u32;
    let y0 = y.max(0) as u32;
    let x1 = ((x + bw as i32).max(0) as u32).min(overlay.width);
    let y1 = ((y + bh as i32).max(0) as u32).min(overlay.height);
    if x1 > x0 && y1 > y0 {
        dirty.mark_rect(x0, y0, x1, y1, align_x, align_y, w, h);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{Registry, BGRA8};

    #[test]
    fn opaque_white_coverage_over_pure_red_yields_solid_red() {
        let reg = Registry::new();
        let desc = reg.describe(BGRA8).unwrap().clone();
        let mut overlay = Image::alloc(desc, 8, 8);
        let mut dirty = DirtyMap::new(8, 8);
        let bitmap = vec![255u8; 64];
        // 0xRRGGBBAA with R=255, a = 255 - 0x00 = 255.
        let color = 0xFF_00_00_00u32;
        blend_glyph(&mut overlay, &mut dirty, 1, 1, 8, 8, 0, 0, &bitmap, 8, 8, 8, color);

        for y in 0..8u32 {
            for x in 0..8u32 {
                let o = y as usize * overlay.planes[0].stride + x as usize * 4;
                let px = &overlay.planes[0].data[o..o + 4];
                assert_eq!(px, &[0, 0, 255, 255]);
            }
        }
        assert!(dirty.any_osd);
    }

    #[test]
    fn zero_coverage_leaves_overlay_untouched() {
        let reg = Registry::new();
        let desc = reg.describe(BGRA8).unwrap().clone();
        let mut overlay = Image::alloc(desc, 4, 4);
        let mut dirty = DirtyMap::new(4, 4);
        let bitmap = vec![0u8; 16];
        blend_glyph(
            &mut overlay,
            &mut dirty,
            1,
            1,
            4,
            4,
            0,
            0,
            &bitmap,
            4,
            4,
            4,
            0xFF000000,
        );
        assert!(overlay.planes[0].data.iter().all(|&b| b == 0));
    }

    #[test]
    fn glyph_clipped_at_negative_origin() {
        let reg = Registry::new();
        let desc = reg.describe(BGRA8).unwrap().clone();
        let mut overlay = Image::alloc(desc, 4, 4);
        let mut dirty = DirtyMap::new(4, 4);
        let bitmap = vec![255u8; 4]; // 2x2 glyph
        blend_glyph(
            &mut overlay,
            &mut dirty,
            1,
            1,
            4,
            4,
            -1,
            -1,
            &bitmap,
            2,
            2,
            2,
            0xFF000000,
        );
        // Only the bottom-right pixel of the glyph (0,0) in dst coords lands.
        let o = 0;
        let px = &overlay.planes[0].data[o..o + 4];
        assert_eq!(px, &[0, 0, 255, 255]);
    }
}
