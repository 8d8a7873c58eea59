//! An open document, its history, and the renders that keep up with it.

use crate::{
    global::preferences::Preferences,
    renderer::{
        JobHandle, Priority, RenderFuture, RenderScheduler, RenderScope, Renderer, SchedulerError,
    },
};
use inkstack_core::{
    commands::Command,
    history::{CommandInfo, History, HistoryError, HistoryEvent, Subscription},
    state::Document,
};
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;

pub struct EditorSession {
    history: Arc<History>,
    scheduler: RenderScheduler,
    renderer: Arc<dyn Renderer>,
    /// Turns history changes into finish renders.
    invalidator: Subscription,
}
impl EditorSession {
    /// Render jobs are spawned onto `runtime`.
    pub fn new(
        document: Document,
        renderer: Arc<dyn Renderer>,
        preferences: &Preferences,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        let history = Arc::new(History::new(document, preferences.history));
        let scheduler = RenderScheduler::new(preferences.scheduler, runtime);
        let invalidator = {
            // Weak, as the history owns this observer.
            let weak = Arc::downgrade(&history);
            let scheduler = scheduler.clone();
            let renderer = renderer.clone();
            history.subscribe(move |event| {
                let HistoryEvent::Affect(ids) = event else {
                    return Ok(());
                };
                let scope = RenderScope::Elements(ids.clone());
                scheduler.enqueue(
                    Priority::Finish,
                    render_job(weak.clone(), renderer.clone(), scope),
                )?;
                Ok(())
            })
        };
        Self {
            history,
            scheduler,
            renderer,
            invalidator,
        }
    }
    #[must_use]
    pub fn history(&self) -> &Arc<History> {
        &self.history
    }
    #[must_use]
    pub fn scheduler(&self) -> &RenderScheduler {
        &self.scheduler
    }
    pub async fn perform(&self, command: Box<dyn Command>) -> Result<CommandInfo, HistoryError> {
        self.history.perform(command).await
    }
    pub async fn undo(&self) -> Result<bool, HistoryError> {
        self.history.undo().await
    }
    pub async fn redo(&self) -> Result<bool, HistoryError> {
        self.history.redo().await
    }
    /// Quick render during an interaction. Superseded by later previews and any finish render.
    pub fn request_preview(&self, scope: RenderScope) -> Result<JobHandle, SchedulerError> {
        self.request(Priority::Preview, scope)
    }
    /// Background render, for when nothing more urgent is waiting.
    pub fn request_idle(&self, scope: RenderScope) -> Result<JobHandle, SchedulerError> {
        self.request(Priority::IdleQueue, scope)
    }
    fn request(&self, priority: Priority, scope: RenderScope) -> Result<JobHandle, SchedulerError> {
        self.scheduler.enqueue(
            priority,
            render_job(Arc::downgrade(&self.history), self.renderer.clone(), scope),
        )
    }
    /// Stop rendering and tear down the history. Later operations fail.
    pub async fn dispose(&self) {
        self.scheduler.close();
        self.history.unsubscribe(self.invalidator);
        self.history.dispose().await;
    }
}

/// Render the document as it is when the job starts.
fn render_job(
    history: Weak<History>,
    renderer: Arc<dyn Renderer>,
    scope: RenderScope,
) -> impl FnOnce(CancellationToken) -> RenderFuture + Send + 'static {
    move |token: CancellationToken| -> RenderFuture {
        Box::pin(async move {
            let Some(history) = history.upgrade() else {
                // Session went away while this was queued.
                return Ok(());
            };
            // Waits out any command in flight, then renders a consistent copy.
            let document = history.snapshot().await?;
            drop(history);
            if token.is_cancelled() {
                return Ok(());
            }
            renderer.render(&document, &scope, &token).await
        })
    }
}
