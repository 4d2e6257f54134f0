//! Repack collaborator (spec §6): row-granularity transforms between a
//! packed/planar pixel layout and an internal planar-float layout, plus the
//! "required alignment" query the Pipeline Builder reads (§4.E.5).
//!
//! Backed here by a scalar per-row conversion (grounded on the scalar
//! fallback path in `other_examples/92857530_imazen-zenavif__yuv_convert_fast.rs`,
//! minus its SIMD fast path, which is out of scope for an opaque, swappable
//! collaborator).

use crate::error::{Error, Result};
use crate::format::FormatDescriptor;
use crate::image::{Image, Range};

/// Row-transform direction, matching `create_planar(fmt, reverse, flags)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    ToFloat,
    FromFloat,
}

/// A plane of float32 samples in `[0, 1]` (already range-expanded if the
/// source was limited-range integer video). `components_per_pixel` is >1
/// only for packed formats (e.g. BGRA8's single plane); planar formats keep
/// one component per plane and so use 1.
#[derive(Clone, Debug)]
pub struct FloatPlane {
    pub data: Vec<f32>,
    pub stride: usize,
    pub width: u32,
    pub height: u32,
    pub components_per_pixel: usize,
}

impl FloatPlane {
    pub fn zeroed(width: u32, height: u32, components_per_pixel: usize) -> Self {
        FloatPlane {
            data: vec![0.0; width as usize * height as usize * components_per_pixel],
            stride: width as usize * components_per_pixel,
            width,
            height,
            components_per_pixel,
        }
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32, c: usize) -> f32 {
        self.data[y as usize * self.stride + x as usize * self.components_per_pixel + c]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, c: usize, v: f32) {
        self.data[y as usize * self.stride + x as usize * self.components_per_pixel + c] = v;
    }
}

/// A planar-float companion image: one [`FloatPlane`] per plane of some
/// [`FormatDescriptor`].
#[derive(Clone, Debug)]
pub struct FloatImage {
    pub desc: FormatDescriptor,
    pub width: u32,
    pub height: u32,
    pub planes: Vec<FloatPlane>,
}

impl FloatImage {
    pub fn alloc(desc: FormatDescriptor, width: u32, height: u32) -> Self {
        let planes = desc
            .planes
            .iter()
            .map(|p| {
                let (pw, ph) = if p.subsampled {
                    ((width >> desc.xs).max(1), (height >> desc.ys).max(1))
                } else {
                    (width, height)
                };
                FloatPlane::zeroed(pw, ph, p.components.len())
            })
            .collect();
        FloatImage {
            desc,
            width,
            height,
            planes,
        }
    }
}

/// A repack context: fixed source/destination format + direction, created
/// once by the Pipeline Builder and reused every frame.
pub struct RepackCtx {
    pub format: FormatDescriptor,
    pub direction: Direction,
    pub range: Range,
}

pub trait Repack {
    /// Allocation-free query: row/column alignment this backend requires of
    /// both source and destination buffers.
    fn alignment(&self) -> (u32, u32);

    /// u8-planar `src` region `[src_x, src_x+width) x [src_y, src_y+height)`
    /// -> f32-planar `dst` region at `(dst_x, dst_y)`.
    fn line(
        &self,
        ctx: &RepackCtx,
        src: &Image,
        dst: &mut FloatImage,
        src_x: u32,
        src_y: u32,
        dst_x: u32,
        dst_y: u32,
        width: u32,
        height: u32,
    ) -> Result<()>;

    /// f32-planar `src` -> u8-planar `dst`, the inverse of [`Repack::line`].
    fn line_back(
        &self,
        ctx: &RepackCtx,
        src: &FloatImage,
        dst: &mut Image,
        src_x: u32,
        src_y: u32,
        dst_x: u32,
        dst_y: u32,
        width: u32,
        height: u32,
    ) -> Result<()>;
}

/// Software planar repacker: per-row scalar integer<->float conversion,
/// honoring limited/full range for the luma/alpha-like "full-scale" planes
/// it is given (chroma re-centering around 0.5 is the caller's job in the
/// Blender, since only it knows which planes are chroma).
pub struct PlanarRepacker;

impl PlanarRepacker {
    pub fn new() -> Self {
        PlanarRepacker
    }

    pub(crate) fn to_unit(v: u8, range: Range) -> f32 {
        match range {
            Range::Full => v as f32 / 255.0,
            Range::Limited => ((v as f32 - 16.0) / 219.0).clamp(0.0, 1.0),
        }
    }

    pub(crate) fn from_unit(v: f32, range: Range) -> u8 {
        let v = v.clamp(0.0, 1.0);
        match range {
            Range::Full => (v * 255.0).round() as u8,
            Range::Limited => (16.0 + v * 219.0).round().clamp(0.0, 255.0) as u8,
        }
    }

    /// Chroma uses a wider limited-range span (16-240) than luma (16-235),
    /// so that neutral chroma (128) maps exactly to 0.5.
    pub(crate) fn to_unit_chroma(v: u8, range: Range) -> f32 {
        match range {
            Range::Full => v as f32 / 255.0,
            Range::Limited => ((v as f32 - 16.0) / 224.0).clamp(0.0, 1.0),
        }
    }

    pub(crate) fn from_unit_chroma(v: f32, range: Range) -> u8 {
        let v = v.clamp(0.0, 1.0);
        match range {
            Range::Full => (v * 255.0).round() as u8,
            Range::Limited => (16.0 + v * 224.0).round().clamp(0.0, 255.0) as u8,
        }
    }
}

impl Default for PlanarRepacker {
    fn default() -> Self {
        Self::new()
    }
}

impl Repack for PlanarRepacker {
    fn alignment(&self) -> (u32, u32) {
        (16, 2)
    }

    fn line(
        &self,
        ctx: &RepackCtx,
        src: &Image,
        dst: &mut FloatImage,
        src_x: u32,
        src_y: u32,
        dst_x: u32,
        dst_y: u32,
        width: u32,
        height: u32,
    ) -> Result<()> {
        if src.desc.plane_count() != dst.desc.plane_count() {
            return Err(Error::Backend(
                "repack: plane count mismatch between src and dst".into(),
            ));
        }
        for (pi, plane_desc) in src.desc.planes.iter().enumerate() {
            let shift_x = if plane_desc.subsampled { src.desc.xs } else { 0 };
            let shift_y = if plane_desc.subsampled { src.desc.ys } else { 0 };
            let bpp = plane_desc.components.len();
            let chroma = plane_desc.subsampled;
            for row in 0..(height >> shift_y).max(1) {
                let sy = (src_y >> shift_y) + row;
                let dyp = (dst_y >> shift_y) + row;
                for col in 0..(width >> shift_x).max(1) {
                    let sx = (src_x >> shift_x) + col;
                    let dxp = (dst_x >> shift_x) + col;
                    for c in 0..bpp {
                        let raw = plane_byte(src, pi, sx, sy, c, bpp);
                        let f = if chroma {
                            Self::to_unit_chroma(raw, ctx.range)
                        } else {
                            Self::to_unit(raw, ctx.range)
                        };
                        dst.planes[pi].set(dxp, dyp, c, f);
                    }
                }
            }
        }
        Ok(())
    }

    fn line_back(
        &self,
        ctx: &RepackCtx,
        src: &FloatImage,
        dst: &mut Image,
        src_x: u32,
        src_y: u32,
        dst_x: u32,
        dst_y: u32,
        width: u32,
        height: u32,
    ) -> Result<()> {
        for (pi, plane_desc) in dst.desc.planes.clone().iter().enumerate() {
            let shift_x = if plane_desc.subsampled { dst.desc.xs } else { 0 };
            let shift_y = if plane_desc.subsampled { dst.desc.ys } else { 0 };
            let bpp = plane_desc.components.len();
            let chroma = plane_desc.subsampled;
            for row in 0..(height >> shift_y).max(1) {
                let sy = (src_y >> shift_y) + row;
                let dyp = (dst_y >> shift_y) + row;
                for col in 0..(width >> shift_x).max(1) {
                    let sx = (src_x >> shift_x) + col;
                    let dxp = (dst_x >> shift_x) + col;
                    for c in 0..bpp {
                        let f = src.planes[pi].get(sx, sy, c);
                        let raw = if chroma {
                            Self::from_unit_chroma(f, ctx.range)
                        } else {
                            Self::from_unit(f, ctx.range)
                        };
                        set_plane_byte(dst, pi, dxp, dyp, c, bpp, raw);
                    }
                }
            }
        }
        Ok(())
    }
}

fn plane_byte(img: &Image, plane: usize, x: u32, y: u32, comp: usize, bpp: usize) -> u8 {
    let sample_size = img.desc.sample_size as usize;
    debug_assert_eq!(sample_size, 1, "repack only handles 8-bit integer planes");
    let row = img.planes[plane].row(y);
    row[x as usize * bpp + comp]
}

fn set_plane_byte(img: &mut Image, plane: usize, x: u32, y: u32, comp: usize, bpp: usize, v: u8) {
    let row = img.planes[plane].row_mut(y);
    row[x as usize * bpp + comp] = v;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{Registry, BGRA8};

    #[test]
    fn roundtrip_bgra_through_float() {
        let reg = Registry::new();
        let desc = reg.describe(BGRA8).unwrap().clone();
        let mut src = Image::alloc(desc.clone(), 4, 2);
        src.planes[0].data[0..4].copy_from_slice(&[10, 20, 30, 255]);

        let repack = PlanarRepacker::new();
        let ctx = RepackCtx {
            format: desc.clone(),
            direction: Direction::ToFloat,
            range: Range::Full,
        };
        let mut f = FloatImage::alloc(desc.to_float(), 4, 2);
        repack.line(&ctx, &src, &mut f, 0, 0, 0, 0, 4, 2).unwrap();
        assert!((f.planes[0].get(0, 0, 0) - 10.0 / 255.0).abs() < 1e-6);
        assert!((f.planes[0].get(0, 0, 3) - 1.0).abs() < 1e-6);

        let mut back = Image::alloc(desc, 4, 2);
        repack
            .line_back(&ctx, &f, &mut back, 0, 0, 0, 0, 4, 2)
            .unwrap();
        assert_eq!(&back.planes[0].data[0..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn limited_range_maps_16_235_to_unit() {
        assert!((PlanarRepacker::to_unit(16, Range::Limited) - 0.0).abs() < 1e-6);
        assert!((PlanarRepacker::to_unit(235, Range::Limited) - 1.0).abs() < 1e-3);
        assert_eq!(PlanarRepacker::from_unit(0.0, Range::Limited), 16);
    }
}
