use super::{out_of_order, Command, CommandError};
use crate::{
    id::ElementId,
    state::{CanvasSize, Document},
};

/// Change the render area of the document. The DPI is kept.
pub struct ResizeCanvas {
    width: u32,
    height: u32,
    /// The size to restore on undo, once applied.
    previous: Option<CanvasSize>,
    applied: bool,
    disposed: bool,
    /// Every layer renders against the canvas, so every layer is stale.
    effected: Vec<ElementId>,
}
impl ResizeCanvas {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            previous: None,
            applied: false,
            disposed: false,
            effected: Vec::new(),
        }
    }
}
#[async_trait::async_trait]
impl Command for ResizeCanvas {
    fn name(&self) -> &str {
        "Resize Canvas"
    }
    async fn apply(&mut self, document: &mut Document) -> Result<(), CommandError> {
        if self.disposed {
            return Err(CommandError::Disposed);
        }
        if self.applied {
            return Err(out_of_order(&*self, "apply"));
        }
        let size = CanvasSize {
            width: self.width,
            height: self.height,
            dpi: document.canvas().dpi,
        };
        self.previous = Some(document.set_canvas(size)?);
        self.effected = document.layers().iter().cloned().collect();
        self.applied = true;
        Ok(())
    }
    async fn undo(&mut self, document: &mut Document) -> Result<(), CommandError> {
        if self.disposed {
            return Err(CommandError::Disposed);
        }
        let (true, Some(previous)) = (self.applied, self.previous) else {
            return Err(out_of_order(&*self, "undo"));
        };
        document.set_canvas(previous)?;
        self.applied = false;
        Ok(())
    }
    fn effected_element_ids(&self) -> &[ElementId] {
        &self.effected
    }
    fn dispose(&mut self) {
        self.disposed = true;
        self.previous = None;
    }
}
