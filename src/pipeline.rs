//! Component E — Pipeline Builder (spec §4.E).
//!
//! Owns every intermediate buffer the Blender and Overlay Converter read
//! from, and (re)builds them whenever the destination's [`ImageParams`]
//! change. This is the `CompositorCache` of spec §3.

use log::{debug, warn};

use crate::convert::TILE_H;
use crate::dirty_map::{DirtyMap, SLICE_W};
use crate::error::{Error, Result};
use crate::format::{Component, FormatDescriptor, PlaneLayout, Registry, SampleType, BGRA8};
use crate::image::{align_up, AlphaMode, Image, ImageParams, Range};
use crate::repack::{Direction, FloatImage, PlanarRepacker, Repack, RepackCtx};
use crate::scaler::SoftwareScaler;
use crate::stager::PartCacheStore;

fn build_overlay_format(dst: &FormatDescriptor) -> Option<FormatDescriptor> {
    let as_uint8 = FormatDescriptor {
        id: dst.id,
        planes: dst.planes.clone(),
        xs: dst.xs,
        ys: dst.ys,
        sample_type: SampleType::UInt,
        sample_size: 1,
    };
    as_uint8.with_alpha_plane()
}

fn chroma_alpha_format() -> FormatDescriptor {
    FormatDescriptor {
        id: crate::format::FormatId(u32::MAX),
        planes: vec![PlaneLayout {
            components: vec![Component::A],
            subsampled: false,
        }],
        xs: 0,
        ys: 0,
        sample_type: SampleType::UInt,
        sample_size: 1,
    }
}

/// The built pipeline state for one fixed set of destination [`ImageParams`].
/// Rebuilt wholesale (`Invalid` -> rebuilt) whenever `params` changes.
pub(crate) struct Built {
    pub(crate) params: ImageParams,
    pub(crate) dst_desc: FormatDescriptor,
    pub(crate) overlay_desc: FormatDescriptor,
    pub(crate) tiled: bool,
    pub(crate) need_premul: bool,
    pub(crate) align_x: u32,
    pub(crate) align_y: u32,
    pub(crate) w: u32,
    pub(crate) h: u32,

    pub(crate) rgba_overlay: Image,
    pub(crate) video_overlay: Option<Image>,
    pub(crate) calpha_overlay: Option<Image>,

    pub(crate) overlay_tmp: FloatImage,
    pub(crate) video_tmp: FloatImage,
    pub(crate) calpha_tmp: Option<FloatImage>,

    pub(crate) video_to_f32: RepackCtx,
    pub(crate) video_from_f32: RepackCtx,
    pub(crate) overlay_to_f32: RepackCtx,
    pub(crate) calpha_to_f32: Option<RepackCtx>,
}

/// Spec §3's Compositor Cache: the single stateful object `composite()`
/// threads through every call, memoizing pipelines across frames whose
/// destination parameters don't change and overlay renders across frames
/// whose input `change_id` doesn't change.
pub struct CompositorCache {
    built: Option<Built>,
    dirty: DirtyMap,
    pub(crate) part_caches: PartCacheStore,
    pub(crate) change_id: Option<u64>,
    pub(crate) repack: PlanarRepacker,
    pub(crate) scaler: SoftwareScaler,
}

impl CompositorCache {
    pub fn new() -> Self {
        CompositorCache {
            built: None,
            dirty: DirtyMap::new(1, 1),
            part_caches: PartCacheStore::new(),
            change_id: None,
            repack: PlanarRepacker::new(),
            scaler: SoftwareScaler::new(),
        }
    }

    pub fn params(&self) -> Option<ImageParams> {
        self.built.as_ref().map(|b| b.params)
    }

    pub fn is_built(&self) -> bool {
        self.built.is_some()
    }

    pub fn any_osd(&self) -> bool {
        self.dirty.any_osd
    }

    pub fn dirty_map(&self) -> &DirtyMap {
        &self.dirty
    }

    pub fn dirty_map_mut(&mut self) -> &mut DirtyMap {
        &mut self.dirty
    }

    pub fn tiled(&self) -> bool {
        self.built.as_ref().map(|b| b.tiled).unwrap_or(false)
    }

    pub fn rgba_overlay(&self) -> &Image {
        &self.built.as_ref().expect("pipeline not built").rgba_overlay
    }

    pub fn rgba_overlay_mut(&mut self) -> &mut Image {
        &mut self.built.as_mut().expect("pipeline not built").rgba_overlay
    }

    pub fn video_overlay(&self) -> Option<&Image> {
        self.built.as_ref().and_then(|b| b.video_overlay.as_ref())
    }

    /// The alpha plane of `video_overlay` as a view, per spec §3's
    /// "`alpha_overlay` is a non-owning view". Rust has no sound way to
    /// store this as a literal aliasing field alongside its owner, so it is
    /// computed on demand instead (see DESIGN.md).
    pub fn alpha_overlay_plane(&self) -> Option<&crate::image::PlaneBuf> {
        let v = self.built.as_ref()?.video_overlay.as_ref()?;
        let idx = v.desc.alpha_plane_index()?;
        Some(&v.planes[idx])
    }

    pub fn reset(&mut self) {
        self.built = None;
        self.change_id = None;
        self.dirty = DirtyMap::new(1, 1);
    }

    /// Spec §4.E: (re)allocate everything when `params` differs from the
    /// cached set, or on first use.
    pub fn ensure_built(&mut self, registry: &Registry, params: ImageParams) -> Result<()> {
        if let Some(b) = &self.built {
            if b.params == params {
                return Ok(());
            }
        }
        debug!("pipeline: rebuilding for changed destination params");
        match self.rebuild(registry, params) {
            Ok(built) => {
                self.built = Some(built);
                self.change_id = None;
                Ok(())
            }
            Err(e) => {
                warn!("pipeline rebuild failed: {e}");
                self.reset();
                Err(e)
            }
        }
    }

    fn rebuild(&mut self, registry: &Registry, params: ImageParams) -> Result<Built> {
        let dst_desc = registry
            .describe(params.format)
            .ok_or_else(|| Error::UnsupportedFormat(format!("{:?}", params.format)))?
            .clone();

        // "RGB with >=3 planes" (spec: GBRP8/GBRAP8), not packed BGRA8 itself
        // (which is already the overlay format and has only one plane).
        let is_multiplane_rgb = dst_desc.planes.len() >= 3
            && dst_desc
                .planes
                .iter()
                .any(|p| p.components.contains(&Component::G));

        let (overlay_desc, tiled) = if is_multiplane_rgb {
            let bgra = registry.describe(BGRA8).unwrap().clone();
            (bgra, false)
        } else {
            let od = build_overlay_format(&dst_desc).ok_or_else(|| {
                Error::UnsupportedFormat("destination format has no room for an alpha plane".into())
            })?;
            let tiled = od.is_subsampled();
            (od, tiled)
        };

        // A BGRA8 destination's overlay format literally *is* BGRA8 (§4.E.8):
        // no separate `video_overlay` to allocate or convert into, the Blender
        // reads straight from `rgba_overlay`.
        let video_overlay_coincides = is_multiplane_rgb || overlay_desc.id == BGRA8;

        let repack = PlanarRepacker::new();
        let (align_x, align_y) = repack.alignment();
        if align_x > SLICE_W || align_y > TILE_H {
            return Err(Error::Backend(format!(
                "repack alignment ({align_x}, {align_y}) exceeds (SLICE_W, TILE_H)"
            )));
        }

        let mut w = align_up(params.width, align_x);
        let mut h = align_up(params.height, align_y);
        if tiled {
            w = align_up(w, SLICE_W);
            h = align_up(h, TILE_H);
        }

        let rgba_overlay = Image::alloc(registry.describe(BGRA8).unwrap().clone(), w, h);
        let overlay_tmp = FloatImage::alloc(overlay_desc.to_float(), SLICE_W, align_y);
        let video_tmp = FloatImage::alloc(dst_desc.to_float(), SLICE_W, align_y);

        let video_to_f32 = RepackCtx {
            format: dst_desc.clone(),
            direction: Direction::ToFloat,
            range: params.range,
        };
        let video_from_f32 = RepackCtx {
            format: dst_desc.clone(),
            direction: Direction::FromFloat,
            range: params.range,
        };
        let overlay_to_f32 = RepackCtx {
            format: overlay_desc.clone(),
            direction: Direction::ToFloat,
            range: Range::Full,
        };

        let (video_overlay, calpha_overlay, calpha_tmp, calpha_to_f32) = if video_overlay_coincides
        {
            (None, None, None, None)
        } else {
            let vo = Image::alloc(overlay_desc.clone(), w, h);
            if overlay_desc.is_subsampled() {
                let cw = (w >> overlay_desc.xs).max(1);
                let ch = (h >> overlay_desc.ys).max(1);
                let ca_desc = chroma_alpha_format();
                let calpha_overlay = Image::alloc(ca_desc.clone(), cw, ch);
                let ctw = ((SLICE_W >> overlay_desc.xs).max(1)).min(SLICE_W);
                let cth = (align_y >> overlay_desc.ys).max(1);
                let calpha_tmp = FloatImage::alloc(ca_desc.to_float(), ctw, cth);
                let calpha_to_f32 = RepackCtx {
                    format: ca_desc,
                    direction: Direction::ToFloat,
                    range: Range::Full,
                };
                (Some(vo), Some(calpha_overlay), Some(calpha_tmp), Some(calpha_to_f32))
            } else {
                (Some(vo), None, None, None)
            }
        };

        self.dirty = DirtyMap::new(w, h);
        self.part_caches = PartCacheStore::new();

        let need_premul = params.alpha != AlphaMode::Premultiplied && dst_desc.has_alpha();

        Ok(Built {
            params,
            dst_desc,
            overlay_desc,
            tiled,
            need_premul,
            align_x,
            align_y,
            w,
            h,
            rgba_overlay,
            video_overlay,
            calpha_overlay,
            overlay_tmp,
            video_tmp,
            calpha_tmp,
            video_to_f32,
            video_from_f32,
            overlay_to_f32,
            calpha_to_f32,
        })
    }

    pub fn debug_info(&self) -> String {
        match &self.built {
            None => "osdcomp: pipeline not built".to_string(),
            Some(b) => format!(
                "osdcomp: align=({},{}) overlay={} overlay_f32={} video_f32={} \
                 video_overlay={} calpha={} calpha_f32={}",
                b.align_x,
                b.align_y,
                b.overlay_desc,
                b.overlay_desc.to_float(),
                b.dst_desc.to_float(),
                b.video_overlay
                    .as_ref()
                    .map(|i| i.desc.to_string())
                    .unwrap_or_else(|| "<coincides with rgba_overlay>".into()),
                b.calpha_overlay
                    .as_ref()
                    .map(|i| i.desc.to_string())
                    .unwrap_or_else(|| "<none>".into()),
                b.calpha_tmp
                    .as_ref()
                    .map(|_| "gray_f32".to_string())
                    .unwrap_or_else(|| "<none>".into()),
            ),
        }
    }
}

impl Default for CompositorCache {
    fn default() -> Self {
        Self::new()
    }
}

// Accessors the Blender needs that aren't simple field reads, kept crate-
// visible rather than public API surface.
impl CompositorCache {
    pub(crate) fn built(&self) -> &Built {
        self.built.as_ref().expect("pipeline not built")
    }

    pub(crate) fn built_mut(&mut self) -> &mut Built {
        self.built.as_mut().expect("pipeline not built")
    }

    /// Split borrow for the Blender: the built pipeline state plus the
    /// repack backend, both needed at once but stored in disjoint fields.
    pub(crate) fn parts_for_blend(&mut self) -> (&mut Built, &PlanarRepacker) {
        (self.built.as_mut().expect("pipeline not built"), &self.repack)
    }

    /// Split borrow for rendering (A/B): the dirty map and the BGRA overlay
    /// it tracks, stored in disjoint fields (`self.dirty` at the top level,
    /// `rgba_overlay` inside `Built`).
    pub(crate) fn dirty_and_overlay(&mut self) -> (&mut DirtyMap, &mut Image) {
        let built = self.built.as_mut().expect("pipeline not built");
        (&mut self.dirty, &mut built.rgba_overlay)
    }

    /// As [`CompositorCache::dirty_and_overlay`], plus the Part Cache entry
    /// for one overlay-input index (Component C's per-part scaled-bitmap
    /// cache).
    pub(crate) fn dirty_overlay_and_part(
        &mut self,
        index: usize,
    ) -> (&mut DirtyMap, &mut Image, &mut crate::stager::PartCache) {
        let built = self.built.as_mut().expect("pipeline not built");
        let part = self.part_caches.part_mut(index);
        (&mut self.dirty, &mut built.rgba_overlay, part)
    }

    /// Component D: convert the whole or dirty-tiled `rgba_overlay` into
    /// `video_overlay`'s colorspace, a no-op when the overlay format
    /// coincides with BGRA (`video_overlay` is `None`).
    pub(crate) fn convert_overlay(&mut self) {
        let dirty = &self.dirty;
        let built = self.built.as_mut().expect("pipeline not built");
        let matrix = built.params.matrix;
        let chroma_location = built.params.chroma_location;
        let tiled = built.tiled;
        let rgba = &built.rgba_overlay;
        let video_overlay = &mut built.video_overlay;
        let calpha_overlay = &mut built.calpha_overlay;
        if let Some(vo) = video_overlay.as_mut() {
            if tiled {
                crate::convert::convert_tiled(rgba, vo, calpha_overlay.as_mut(), matrix, dirty);
            } else {
                crate::convert::convert_whole(rgba, vo, calpha_overlay.as_mut(), matrix, chroma_location);
            }
        }
    }
}
