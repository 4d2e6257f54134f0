//! Scaler collaborator (spec §6): `alloc`/`supports`/`scale`, plus the
//! alpha-aware premultiply/unpremultiply conversion used by the Premul Wrap
//! (§4.G) and the RGBA Bitmap Stager's once-then-cache resize (§4.C).
//!
//! The spec treats this as an opaque external backend; this module supplies
//! a straightforward software implementation so the crate is runnable.
//! Built on scalar loops in the style of the teacher's pixel-at-a-time
//! blending (`frame-trails::main::overlay_tinted`) rather than on the
//! `image` crate's own resize (the compositor operates on raw strided
//! BGRA8 buffers, not `image::RgbaImage`).

use crate::error::{Error, Result};

/// A rectangular premultiplied-BGRA8 buffer — the only pixel shape the
/// scaler needs to understand (overlay bitmaps and their scaled/premultiplied
/// variants are always BGRA8).
#[derive(Clone, Debug)]
pub struct Bgra8Buf {
    pub data: Vec<u8>,
    pub stride: usize,
    pub width: u32,
    pub height: u32,
}

impl Bgra8Buf {
    pub fn new(width: u32, height: u32) -> Self {
        let stride = width as usize * 4;
        Bgra8Buf {
            data: vec![0u8; stride * height as usize],
            stride,
            width,
            height,
        }
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let o = y as usize * self.stride + x as usize * 4;
        [self.data[o], self.data[o + 1], self.data[o + 2], self.data[o + 3]]
    }

    #[inline]
    pub fn put_pixel(&mut self, x: u32, y: u32, p: [u8; 4]) {
        let o = y as usize * self.stride + x as usize * 4;
        self.data[o..o + 4].copy_from_slice(&p);
    }
}

pub trait Scaler {
    /// Premultiply an image's alpha in place; straight -> premultiplied.
    fn premultiply(&self, buf: &mut Bgra8Buf) -> Result<()>;

    /// Un-premultiply an image's alpha in place; premultiplied -> straight.
    fn unpremultiply(&self, buf: &mut Bgra8Buf) -> Result<()>;
}

/// Software bilinear scaler operating directly on [`Bgra8Buf`]s, with a
/// `(dst_w, dst_h)` target baked in via [`SoftwareScaler::scale_to`].
#[derive(Clone, Copy)]
pub struct SoftwareScaler;

impl SoftwareScaler {
    pub fn new() -> Self {
        SoftwareScaler
    }

    pub fn scale_to(&self, src: &Bgra8Buf, dst_w: u32, dst_h: u32) -> Result<Bgra8Buf> {
        if dst_w == 0 || dst_h == 0 || src.width == 0 || src.height == 0 {
            return Err(Error::Backend("scale: zero-sized image".into()));
        }
        let mut dst = Bgra8Buf::new(dst_w, dst_h);
        let x_ratio = src.width as f32 / dst_w as f32;
        let y_ratio = src.height as f32 / dst_h as f32;
        for dy in 0..dst_h {
            let sy = ((dy as f32 + 0.5) * y_ratio - 0.5).clamp(0.0, (src.height - 1) as f32);
            let sy0 = sy.floor() as u32;
            let sy1 = (sy0 + 1).min(src.height - 1);
            let fy = sy - sy0 as f32;
            for dx in 0..dst_w {
                let sx = ((dx as f32 + 0.5) * x_ratio - 0.5).clamp(0.0, (src.width - 1) as f32);
                let sx0 = sx.floor() as u32;
                let sx1 = (sx0 + 1).min(src.width - 1);
                let fx = sx - sx0 as f32;

                let p00 = src.pixel(sx0, sy0);
                let p10 = src.pixel(sx1, sy0);
                let p01 = src.pixel(sx0, sy1);
                let p11 = src.pixel(sx1, sy1);

                let mut out = [0u8; 4];
                for c in 0..4 {
                    let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
                    let bot = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
                    out[c] = (top * (1.0 - fy) + bot * fy).round() as u8;
                }
                dst.put_pixel(dx, dy, out);
            }
        }
        Ok(dst)
    }
}

impl Default for SoftwareScaler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scaler for SoftwareScaler {
    fn premultiply(&self, buf: &mut Bgra8Buf) -> Result<()> {
        for px in buf.data.chunks_exact_mut(4) {
            let a = px[3] as u32;
            px[0] = ((px[0] as u32 * a) / 255) as u8;
            px[1] = ((px[1] as u32 * a) / 255) as u8;
            px[2] = ((px[2] as u32 * a) / 255) as u8;
        }
        Ok(())
    }

    fn unpremultiply(&self, buf: &mut Bgra8Buf) -> Result<()> {
        for px in buf.data.chunks_exact_mut(4) {
            let a = px[3];
            if a == 0 {
                continue;
            }
            px[0] = ((px[0] as u32 * 255) / a as u32).min(255) as u8;
            px[1] = ((px[1] as u32 * 255) / a as u32).min(255) as u8;
            px[2] = ((px[2] as u32 * 255) / a as u32).min(255) as u8;
        }
        Ok(())
    }
}

/// Counts invocations for testing invariant 5 / scenario 5 (change
/// detection skips re-scaling unchanged parts) without needing real image
/// I/O, the way a unit test in this codebase would stub an external
/// collaborator.
#[cfg(test)]
pub struct InstrumentedScaler {
    pub inner: SoftwareScaler,
    pub scale_calls: std::cell::Cell<usize>,
}

#[cfg(test)]
impl InstrumentedScaler {
    pub fn new() -> Self {
        InstrumentedScaler {
            inner: SoftwareScaler::new(),
            scale_calls: std::cell::Cell::new(0),
        }
    }

    pub fn scale_to(&self, src: &Bgra8Buf, dst_w: u32, dst_h: u32) -> Result<Bgra8Buf> {
        self.scale_calls.set(self.scale_calls.get() + 1);
        self.inner.scale_to(src, dst_w, dst_h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_to_identity_size_preserves_pixels() {
        let mut src = Bgra8Buf::new(2, 2);
        src.put_pixel(0, 0, [10, 20, 30, 255]);
        src.put_pixel(1, 0, [40, 50, 60, 255]);
        src.put_pixel(0, 1, [70, 80, 90, 255]);
        src.put_pixel(1, 1, [100, 110, 120, 255]);
        let scaler = SoftwareScaler::new();
        let out = scaler.scale_to(&src, 2, 2).unwrap();
        assert_eq!(out.pixel(0, 0), [10, 20, 30, 255]);
        assert_eq!(out.pixel(1, 1), [100, 110, 120, 255]);
    }

    #[test]
    fn premultiply_then_unpremultiply_roundtrips() {
        let mut buf = Bgra8Buf::new(1, 1);
        buf.put_pixel(0, 0, [200, 100, 50, 128]);
        let scaler = SoftwareScaler::new();
        scaler.premultiply(&mut buf).unwrap();
        let premul = buf.pixel(0, 0);
        assert!(premul[0] < 200);
        scaler.unpremultiply(&mut buf).unwrap();
        let back = buf.pixel(0, 0);
        // Integer division round-trip bounded by a few LSB.
        assert!((back[0] as i32 - 200).abs() <= 2);
        assert_eq!(back[3], 128);
    }
}
