//! # Visual elements
//!
//! The drawable content of a document. Elements live in a flat map keyed by [`ElementId`], and
//! the [layer tree](super::graph) references them by id to give them order and nesting.

use crate::{blend::Blend, id::ElementId};
use std::sync::Arc;

/// An RGBA8 raster buffer. Shared, as undo/redo keeps old buffers alive without copying.
#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub pixels: Arc<[u8]>,
}
impl Bitmap {
    /// A fully transparent bitmap.
    #[must_use]
    pub fn transparent(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize * 4;
        Self {
            width,
            height,
            pixels: vec![0; len].into(),
        }
    }
    pub fn from_rgba8(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, BitmapError> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() == expected {
            Ok(Self {
                width,
                height,
                pixels: pixels.into(),
            })
        } else {
            Err(BitmapError::SizeMismatch {
                expected,
                actual: pixels.len(),
            })
        }
    }
}
// Don't dump megabytes of pixels into logs.
impl std::fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bitmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BitmapError {
    #[error("expected {expected} bytes of rgba8, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
}

#[derive(Clone, Copy, PartialEq, Debug, serde::Serialize, serde::Deserialize)]
pub struct PathPoint {
    pub position: [f32; 2],
    /// Bezier handles, relative to `position`.
    pub in_handle: Option<[f32; 2]>,
    pub out_handle: Option<[f32; 2]>,
}

#[derive(Clone, PartialEq, Debug, Default)]
pub struct VectorPath {
    pub points: Vec<PathPoint>,
    pub closed: bool,
}

/// A single value inside a filter's settings.
#[derive(Clone, PartialEq, Debug, serde::Serialize, serde::Deserialize)]
pub enum FilterSetting {
    Bool(bool),
    Number(f64),
    Text(String),
    Color([f32; 4]),
}

/// A filter attached to an element, eg. a blur or a stroke. The pixel work is done elsewhere,
/// this only records what is attached and how it is configured.
#[derive(Clone, PartialEq, Debug)]
pub struct FilterEntry {
    pub uid: ElementId,
    /// Which filter implementation to use, eg. `"@inkstack/gauss-blur"`.
    pub kind: String,
    pub enabled: bool,
    pub opacity: f32,
    pub settings: std::collections::BTreeMap<String, FilterSetting>,
}
impl FilterEntry {
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            uid: ElementId::generate(),
            kind: kind.into(),
            enabled: true,
            opacity: 1.0,
            settings: std::collections::BTreeMap::new(),
        }
    }
}

#[derive(Clone, PartialEq, Debug, strum::AsRefStr)]
pub enum ElementKind {
    /// Raster layer.
    Canvas { bitmap: Bitmap },
    VectorObject {
        path: VectorPath,
        stroke: Option<[f32; 4]>,
        fill: Option<[f32; 4]>,
    },
    /// Groups vector objects (or other groups). The only kind allowed to have children.
    VectorGroup,
    Text {
        content: String,
        font_family: String,
        font_size: f32,
    },
}
impl ElementKind {
    /// Whether a layer node holding this kind may have child nodes.
    #[must_use]
    pub fn is_container(&self) -> bool {
        matches!(self, Self::VectorGroup)
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct VisualElement {
    pub id: ElementId,
    pub name: String,
    pub visible: bool,
    pub blend: Blend,
    pub filters: Vec<FilterEntry>,
    pub kind: ElementKind,
}
impl VisualElement {
    fn with_kind(id: ElementId, kind: ElementKind) -> Self {
        Self {
            name: String::new(),
            id,
            visible: true,
            blend: Blend::default(),
            filters: Vec::new(),
            kind,
        }
    }
    #[must_use]
    pub fn canvas(id: ElementId, width: u32, height: u32) -> Self {
        Self::with_kind(
            id,
            ElementKind::Canvas {
                bitmap: Bitmap::transparent(width, height),
            },
        )
    }
    #[must_use]
    pub fn group(id: ElementId) -> Self {
        Self::with_kind(id, ElementKind::VectorGroup)
    }
    #[must_use]
    pub fn vector_object(id: ElementId, path: VectorPath) -> Self {
        Self::with_kind(
            id,
            ElementKind::VectorObject {
                path,
                stroke: Some([0.0, 0.0, 0.0, 1.0]),
                fill: None,
            },
        )
    }
    #[must_use]
    pub fn text(id: ElementId, content: impl Into<String>) -> Self {
        Self::with_kind(
            id,
            ElementKind::Text {
                content: content.into(),
                font_family: "sans-serif".to_owned(),
                font_size: 16.0,
            },
        )
    }
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
    #[must_use]
    pub fn is_container(&self) -> bool {
        self.kind.is_container()
    }
    #[must_use]
    pub fn filter(&self, uid: &ElementId) -> Option<&FilterEntry> {
        self.filters.iter().find(|filter| &filter.uid == uid)
    }
    pub fn filter_mut(&mut self, uid: &ElementId) -> Option<&mut FilterEntry> {
        self.filters.iter_mut().find(|filter| &filter.uid == uid)
    }
}
