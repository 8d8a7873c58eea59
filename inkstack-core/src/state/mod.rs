//! # State
//!
//! The document data that commands mutate: the [layer tree](graph), the flat map of
//! [visual elements](element), and the [`Document`] tying them together.

pub mod document;
pub mod element;
pub mod graph;

pub use document::{CanvasSize, DetachedSubtree, Document, DocumentID, Relocation};
pub use element::{ElementKind, VisualElement};
pub use graph::{LayerPath, MoveDestination, Placement};

use crate::id::ElementId;

/// A requested mutation that is structurally invalid. Nothing was changed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidMutation {
    #[error("no layer at {0}")]
    PathNotFound(LayerPath),
    #[error("{0} cannot hold child layers")]
    NotContainer(LayerPath),
    #[error("element {0} already exists")]
    DuplicateElement(ElementId),
    #[error("element {0} not found")]
    UnknownElement(ElementId),
    #[error("can't move {moved} into itself or its own children")]
    WouldCycle { moved: LayerPath },
    #[error("the root layer can't be moved or removed")]
    RootLayer,
    #[error("element {0} is not a raster canvas")]
    NotACanvas(ElementId),
    #[error("element {element} has no filter {filter}")]
    UnknownFilter { element: ElementId, filter: ElementId },
    #[error("filter {0} is already attached")]
    DuplicateFilter(ElementId),
    #[error("canvas size must be non-zero")]
    EmptyCanvas,
}

/// Broken internal invariant. This is a bug, and carries whatever context was at hand for
/// reporting.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invariant violated: {message}")]
pub struct InvariantViolation {
    pub message: String,
    pub metadata: Vec<(&'static str, String)>,
}
impl InvariantViolation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            metadata: Vec::new(),
        }
    }
    #[must_use]
    pub fn with(mut self, key: &'static str, value: impl std::fmt::Display) -> Self {
        self.metadata.push((key, value.to_string()));
        self
    }
}
