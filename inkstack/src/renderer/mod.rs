//! # Renderer
//!
//! The pixel work itself lives behind [`Renderer`]. This module decides *when* it runs (see
//! [`scheduler`]) and *what* it is asked to redraw ([`RenderScope`]).

pub mod scheduler;

pub use scheduler::{
    JobHandle, JobID, JobOutcome, Priority, RenderFuture, RenderScheduler, SchedulerConfig,
    SchedulerError, SchedulerEvent,
};

use inkstack_core::{
    id::ElementId,
    state::{Document, ElementKind},
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Which part of a document to redraw.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum RenderScope {
    Everything,
    /// Only these elements are stale. Their ancestors' composites are too, which is the
    /// renderer's business.
    Elements(Arc<[ElementId]>),
}
impl RenderScope {
    #[must_use]
    pub fn contains(&self, id: &ElementId) -> bool {
        match self {
            Self::Everything => true,
            Self::Elements(ids) => ids.contains(id),
        }
    }
}

/// Draws documents. Implementations should check `token` between units of work and return
/// early once it's cancelled. What they return after cancellation is ignored.
#[async_trait::async_trait]
pub trait Renderer: Send + Sync + 'static {
    async fn render(
        &self,
        document: &Document,
        scope: &RenderScope,
        token: &CancellationToken,
    ) -> anyhow::Result<()>;
}

/// Walks the layers in scope and logs what a real renderer would draw. Used where no graphics
/// device is available.
#[derive(Default)]
pub struct SummaryRenderer;
#[async_trait::async_trait]
impl Renderer for SummaryRenderer {
    async fn render(
        &self,
        document: &Document,
        scope: &RenderScope,
        token: &CancellationToken,
    ) -> anyhow::Result<()> {
        let mut drawn = 0usize;
        let mut pixels = 0u64;
        for id in document.layers().iter() {
            if token.is_cancelled() {
                log::trace!("render cancelled after {drawn} layers");
                return Ok(());
            }
            if !scope.contains(id) {
                continue;
            }
            let Some(element) = document.element(id) else {
                anyhow::bail!("layer {id} references a missing element");
            };
            if !element.visible {
                continue;
            }
            if let ElementKind::Canvas { bitmap } = &element.kind {
                pixels += u64::from(bitmap.width) * u64::from(bitmap.height);
            }
            drawn += 1;
            // Stand-in for real work, so cancellation has somewhere to land.
            tokio::task::yield_now().await;
        }
        let canvas = document.canvas();
        log::info!(
            "rendered {drawn} layers ({pixels} raster px) of {:?} at {}x{}",
            document.name,
            canvas.width,
            canvas.height
        );
        Ok(())
    }
}
