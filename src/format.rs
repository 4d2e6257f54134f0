//! Pixel format descriptor oracle.
//!
//! Stands in for the image-format-descriptor database the spec treats as an
//! external collaborator (§6): given a [`FormatId`] it returns plane count,
//! per-plane component layout, chroma shifts, component type/size and
//! alpha-present flag. It also answers the reverse query used by the
//! Pipeline Builder (§4.E.3/4): "find the format id matching this shape".

use std::fmt;

/// One pixel/sample component a plane can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Component {
    B,
    G,
    R,
    A,
    Y,
    U,
    V,
}

/// Integer vs. float sample storage, per §3's "component type".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SampleType {
    UInt,
    Float,
}

/// Layout of one plane: which components it packs, and whether it is the
/// (horizontally/vertically) subsampled chroma plane.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaneLayout {
    pub components: Vec<Component>,
    pub subsampled: bool,
}

impl PlaneLayout {
    fn single(c: Component, subsampled: bool) -> Self {
        PlaneLayout {
            components: vec![c],
            subsampled,
        }
    }
}

/// Opaque handle identifying a pixel format. Stable across calls to the
/// registry; the actual numeric value carries no meaning of its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FormatId(pub u32);

/// Everything the Pipeline Builder / Overlay Converter / Blender need to
/// know about a format without interpreting pixel bytes themselves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormatDescriptor {
    pub id: FormatId,
    pub planes: Vec<PlaneLayout>,
    /// log2 horizontal chroma reduction.
    pub xs: u8,
    /// log2 vertical chroma reduction.
    pub ys: u8,
    pub sample_type: SampleType,
    /// Bytes per component.
    pub sample_size: u8,
}

impl FormatDescriptor {
    pub fn plane_count(&self) -> usize {
        self.planes.len()
    }

    pub fn has_alpha(&self) -> bool {
        self.planes
            .iter()
            .any(|p| p.components.contains(&Component::A))
    }

    pub fn alpha_plane_index(&self) -> Option<usize> {
        self.planes
            .iter()
            .position(|p| p.components.contains(&Component::A))
    }

    pub fn is_subsampled(&self) -> bool {
        self.xs > 0 || self.ys > 0
    }

    /// Companion descriptor with the same shape, but float32 samples.
    pub fn to_float(&self) -> FormatDescriptor {
        FormatDescriptor {
            id: self.id,
            planes: self.planes.clone(),
            xs: self.xs,
            ys: self.ys,
            sample_type: SampleType::Float,
            sample_size: 4,
        }
    }

    /// A copy of this descriptor with an appended single-component alpha
    /// plane at full (non-subsampled) resolution, per §4.E.3. Fails (returns
    /// `None`) if the format already has 4 planes without alpha.
    pub fn with_alpha_plane(&self) -> Option<FormatDescriptor> {
        if self.has_alpha() {
            return Some(self.clone());
        }
        if self.planes.len() >= 4 {
            return None;
        }
        let mut planes = self.planes.clone();
        planes.push(PlaneLayout::single(Component::A, false));
        Some(FormatDescriptor {
            id: self.id,
            planes,
            xs: self.xs,
            ys: self.ys,
            sample_type: self.sample_type,
            sample_size: self.sample_size,
        })
    }
}

impl fmt::Display for FormatDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fmt#{}({}p, xs={}, ys={}, {:?}{}, alpha={})",
            self.id.0,
            self.plane_count(),
            self.xs,
            self.ys,
            self.sample_type,
            self.sample_size * 8,
            self.has_alpha()
        )
    }
}

/// What the caller wants when asking the oracle to "locate the format id
/// that matches a constructed descriptor" (§6).
#[derive(Clone, Debug)]
pub struct FormatQuery {
    pub planar_like: FormatId,
    pub sample_type: SampleType,
    pub sample_size: u8,
    pub require_alpha: bool,
}

/// Fixed table of well-known formats. A pure lookup, as the spec requires
/// of this collaborator — no allocation, no mutation, no I/O.
pub struct Registry {
    formats: Vec<FormatDescriptor>,
}

pub const BGRA8: FormatId = FormatId(1);
pub const GRAY8: FormatId = FormatId(2);
pub const GRAY_F32: FormatId = FormatId(3);
pub const YUV420P8: FormatId = FormatId(10);
pub const YUV422P8: FormatId = FormatId(11);
pub const YUV444P8: FormatId = FormatId(12);
pub const YUVA420P8: FormatId = FormatId(13);
pub const YUVA422P8: FormatId = FormatId(14);
pub const YUVA444P8: FormatId = FormatId(15);
pub const GBRP8: FormatId = FormatId(20);
pub const GBRAP8: FormatId = FormatId(21);
pub const YUV420P_F32: FormatId = FormatId(30);
pub const YUV422P_F32: FormatId = FormatId(31);
pub const YUV444P_F32: FormatId = FormatId(32);
pub const YUVA420P_F32: FormatId = FormatId(33);
pub const YUVA422P_F32: FormatId = FormatId(34);
pub const YUVA444P_F32: FormatId = FormatId(35);
pub const GBRP_F32: FormatId = FormatId(40);
pub const GBRAP_F32: FormatId = FormatId(41);
pub const BGRA_F32: FormatId = FormatId(42);

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        use Component::*;
        let yuv = |id, xs, ys| FormatDescriptor {
            id,
            planes: vec![
                PlaneLayout::single(Y, false),
                PlaneLayout::single(U, true),
                PlaneLayout::single(V, true),
            ],
            xs,
            ys,
            sample_type: SampleType::UInt,
            sample_size: 1,
        };
        let yuva = |id, xs, ys| FormatDescriptor {
            id,
            planes: vec![
                PlaneLayout::single(Y, false),
                PlaneLayout::single(U, true),
                PlaneLayout::single(V, true),
                PlaneLayout::single(A, false),
            ],
            xs,
            ys,
            sample_type: SampleType::UInt,
            sample_size: 1,
        };
        let gbr = |id| FormatDescriptor {
            id,
            planes: vec![
                PlaneLayout::single(G, false),
                PlaneLayout::single(B, false),
                PlaneLayout::single(R, false),
            ],
            xs: 0,
            ys: 0,
            sample_type: SampleType::UInt,
            sample_size: 1,
        };
        let gbra = |id| FormatDescriptor {
            id,
            planes: vec![
                PlaneLayout::single(G, false),
                PlaneLayout::single(B, false),
                PlaneLayout::single(R, false),
                PlaneLayout::single(A, false),
            ],
            xs: 0,
            ys: 0,
            sample_type: SampleType::UInt,
            sample_size: 1,
        };

        let formats = vec![
            FormatDescriptor {
                id: BGRA8,
                planes: vec![PlaneLayout {
                    components: vec![B, G, R, A],
                    subsampled: false,
                }],
                xs: 0,
                ys: 0,
                sample_type: SampleType::UInt,
                sample_size: 1,
            },
            FormatDescriptor {
                id: GRAY8,
                planes: vec![PlaneLayout::single(Y, false)],
                xs: 0,
                ys: 0,
                sample_type: SampleType::UInt,
                sample_size: 1,
            },
            FormatDescriptor {
                id: GRAY_F32,
                planes: vec![PlaneLayout::single(Y, false)],
                xs: 0,
                ys: 0,
                sample_type: SampleType::Float,
                sample_size: 4,
            },
            yuv(YUV420P8, 1, 1),
            yuv(YUV422P8, 1, 0),
            yuv(YUV444P8, 0, 0),
            yuva(YUVA420P8, 1, 1),
            yuva(YUVA422P8, 1, 0),
            yuva(YUVA444P8, 0, 0),
            gbr(GBRP8),
            gbra(GBRAP8),
        ];
        let mut formats = formats;
        // Float companions, derived mechanically from their integer twins.
        for (src, dst_id) in [
            (YUV420P8, YUV420P_F32),
            (YUV422P8, YUV422P_F32),
            (YUV444P8, YUV444P_F32),
            (YUVA420P8, YUVA420P_F32),
            (YUVA422P8, YUVA422P_F32),
            (YUVA444P8, YUVA444P_F32),
            (GBRP8, GBRP_F32),
            (GBRAP8, GBRAP_F32),
            (BGRA8, BGRA_F32),
        ] {
            let base = formats.iter().find(|f| f.id == src).unwrap().clone();
            let mut f = base.to_float();
            f.id = dst_id;
            formats.push(f);
        }
        Registry { formats }
    }

    pub fn describe(&self, id: FormatId) -> Option<&FormatDescriptor> {
        self.formats.iter().find(|f| f.id == id)
    }

    /// "Locate the format id that matches a constructed descriptor" (§6).
    /// Used by the Pipeline Builder to find the float-planar companion of a
    /// destination format, and to find an alpha-augmented variant.
    pub fn find(&self, query: &FormatQuery) -> Option<FormatId> {
        let base = self.describe(query.planar_like)?;
        self.formats
            .iter()
            .find(|f| {
                f.xs == base.xs
                    && f.ys == base.ys
                    && f.sample_type == query.sample_type
                    && f.sample_size == query.sample_size
                    && f.has_alpha() == query.require_alpha
                    && plane_component_shape_matches(base, f)
            })
            .map(|f| f.id)
    }
}

/// Plane layouts match "modulo alpha" (§4.E.4): same component kinds on the
/// shared planes, ignoring a trailing alpha plane either side may or may not
/// have.
fn plane_component_shape_matches(a: &FormatDescriptor, b: &FormatDescriptor) -> bool {
    let strip_alpha = |f: &FormatDescriptor| -> Vec<Vec<Component>> {
        f.planes
            .iter()
            .filter(|p| !p.components.contains(&Component::A))
            .map(|p| p.components.clone())
            .collect()
    };
    strip_alpha(a) == strip_alpha(b)
}
