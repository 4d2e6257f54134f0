//! Component G — Premul Wrap (spec §4.G).
//!
//! Straight-alpha destinations need the Blender's math (which assumes
//! premultiplied samples) run on a premultiplied copy. This wraps a
//! destination region: premultiply in, delegate, unpremultiply back out.
//! A no-op pass-through when the destination is already premultiplied or
//! carries no alpha at all.

use crate::error::Result;
use crate::image::{AlphaMode, Image};
use crate::scaler::{Bgra8Buf, Scaler};

/// Only meaningful for packed BGRA destinations — planar YUV/GBR
/// destinations are always treated as already premultiplied (spec §3).
fn extract_bgra(img: &Image, x0: u32, y0: u32, w: u32, h: u32) -> Bgra8Buf {
    let mut buf = Bgra8Buf::new(w, h);
    for row in 0..h {
        for col in 0..w {
            let px = img.planes[0].pixel_bgra(x0 + col, y0 + row);
            buf.put_pixel(col, row, px);
        }
    }
    buf
}

fn store_bgra(img: &mut Image, x0: u32, y0: u32, buf: &Bgra8Buf) {
    for row in 0..buf.height {
        for col in 0..buf.width {
            img.planes[0].set_bgra(x0 + col, y0 + row, buf.pixel(col, row));
        }
    }
}

/// Runs `blend` with `dst`'s `[x0,x1) x [y0,y1)` BGRA region temporarily
/// premultiplied, then un-premultiplies the result back in place. No-op
/// wrapper when `mode` is not `AlphaMode::Straight`.
pub fn with_premultiplied<F>(
    dst: &mut Image,
    mode: AlphaMode,
    scaler: &dyn Scaler,
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
    mut blend: F,
) -> Result<()>
where
    F: FnMut(&mut Image, u32, u32, u32, u32) -> Result<()>,
{
    if mode != AlphaMode::Straight {
        return blend(dst, x0, y0, x1, y1);
    }

    let w = x1 - x0;
    let h = y1 - y0;
    let mut scratch = extract_bgra(dst, x0, y0, w, h);
    scaler.premultiply(&mut scratch)?;
    store_bgra(dst, x0, y0, &scratch);

    blend(dst, x0, y0, x1, y1)?;

    let mut scratch = extract_bgra(dst, x0, y0, w, h);
    scaler.unpremultiply(&mut scratch)?;
    store_bgra(dst, x0, y0, &scratch);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{Registry, BGRA8};
    use crate::scaler::SoftwareScaler;

    #[test]
    fn straight_alpha_round_trips_through_premultiply_unpremultiply() {
        let reg = Registry::new();
        let desc = reg.describe(BGRA8).unwrap().clone();
        let mut img = Image::alloc(desc, 2, 2);
        img.planes[0].set_bgra(0, 0, [200, 100, 50, 128]);
        let scaler = SoftwareScaler::new();

        with_premultiplied(&mut img, AlphaMode::Straight, &scaler, 0, 0, 2, 2, |_, _, _, _, _| {
            Ok(())
        })
        .unwrap();

        let px = img.planes[0].pixel_bgra(0, 0);
        assert!((px[0] as i32 - 200).abs() <= 2);
        assert_eq!(px[3], 128);
    }

    #[test]
    fn premultiplied_destination_is_left_untouched() {
        let reg = Registry::new();
        let desc = reg.describe(BGRA8).unwrap().clone();
        let mut img = Image::alloc(desc, 2, 2);
        img.planes[0].set_bgra(0, 0, [200, 100, 50, 128]);
        let scaler = SoftwareScaler::new();

        with_premultiplied(
            &mut img,
            AlphaMode::Premultiplied,
            &scaler,
            0,
            0,
            2,
            2,
            |_, _, _, _, _| Ok(()),
        )
        .unwrap();

        assert_eq!(img.planes[0].pixel_bgra(0, 0), [200, 100, 50, 128]);
    }
}
