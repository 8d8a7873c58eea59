//! # History
//!
//! The history owns a document and every [`Command`] performed on it, keeping track of
//! undo/redo state. It is the ground truth for the current state of the document: all changes go
//! through [`History::perform`], and all reads through [`History::inspect`].
//!
//! Operations are serialized with a [`MutexResource`], so only one command is ever mid-flight,
//! even across its await points. Callers are served in the order they arrived.
//!
//! There's no redo tree. Performing a new command after an undo discards (and disposes) the
//! redo stack.

pub mod observers;

use crate::{
    commands::{Command, CommandError},
    id::ElementId,
    mutex::{MutexError, MutexResource},
    state::Document,
};
pub use observers::{ObserverErrors, ObserverFailure, Subscription};
use std::{collections::VecDeque, sync::Arc};

pub type CommandID = crate::FuzzID<CommandInfo>;

/// Identifies one performed command.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CommandInfo {
    pub id: CommandID,
    pub name: String,
}

#[derive(Clone, Debug, strum::AsRefStr, strum::IntoStaticStr)]
pub enum HistoryEvent {
    /// A new command was performed.
    Do(CommandInfo),
    Undo(CommandInfo),
    Redo(CommandInfo),
    /// These elements' rendered output is stale.
    Affect(Arc<[ElementId]>),
}

#[derive(thiserror::Error, Debug)]
pub enum HistoryError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("history has been disposed")]
    Disposed,
    /// The operation completed, but some observers failed to handle it.
    #[error(transparent)]
    Observers(#[from] ObserverErrors),
}
impl From<MutexError> for HistoryError {
    fn from(value: MutexError) -> Self {
        match value {
            MutexError::Disposed => Self::Disposed,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// How many commands to keep for undo. The oldest are dropped past this. `None` is unbounded.
    pub max_undo_depth: Option<usize>,
}
impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_undo_depth: Some(256),
        }
    }
}

struct Entry {
    info: CommandInfo,
    command: Box<dyn Command>,
}
impl Entry {
    fn dispose(mut self) {
        log::trace!("disposing {} ({})", self.info.name, self.info.id);
        self.command.dispose();
    }
    fn affect(&self) -> HistoryEvent {
        HistoryEvent::Affect(self.command.effected_element_ids().into())
    }
}

struct HistoryState {
    document: Document,
    /// Most recent last.
    undo_stack: VecDeque<Entry>,
    /// Most recent last.
    redo_stack: Vec<Entry>,
}

pub struct History {
    state: MutexResource<HistoryState>,
    observers: observers::Observers,
    config: HistoryConfig,
}
impl History {
    #[must_use]
    pub fn new(document: Document, config: HistoryConfig) -> Self {
        Self {
            state: MutexResource::new(HistoryState {
                document,
                undo_stack: VecDeque::new(),
                redo_stack: Vec::new(),
            }),
            observers: observers::Observers::default(),
            config,
        }
    }
    /// Apply `command` and push it to the undo stack, discarding the redo stack.
    ///
    /// If the command fails, it is disposed and the stacks are left untouched. An
    /// [`HistoryError::Observers`] means the command *was* performed.
    pub async fn perform(&self, mut command: Box<dyn Command>) -> Result<CommandInfo, HistoryError> {
        let mut state = self.state.ensure().await?;
        let info = CommandInfo {
            id: CommandID::default(),
            name: command.name().to_owned(),
        };
        log::trace!("performing {} ({})", info.name, info.id);
        if let Err(err) = command.apply(&mut state.document).await {
            log::debug!("{} failed: {err}", info.name);
            command.dispose();
            return Err(err.into());
        }
        for stale in state.redo_stack.drain(..) {
            stale.dispose();
        }
        let entry = Entry {
            info: info.clone(),
            command,
        };
        let events = [HistoryEvent::Do(info.clone()), entry.affect()];
        state.undo_stack.push_back(entry);
        if let Some(max) = self.config.max_undo_depth {
            while state.undo_stack.len() > max {
                // Unwrap ok - len > max >= 0
                state.undo_stack.pop_front().unwrap().dispose();
            }
        }
        let emitted = self.observers.emit(&events);
        drop(state);
        Self::settle(emitted).await?;
        Ok(info)
    }
    /// Undo the most recent command. Returns `false` if there was nothing to undo.
    ///
    /// If the command fails to undo, it stays on the undo stack.
    pub async fn undo(&self) -> Result<bool, HistoryError> {
        let mut state = self.state.ensure().await?;
        let Some(mut entry) = state.undo_stack.pop_back() else {
            return Ok(false);
        };
        log::trace!("undoing {} ({})", entry.info.name, entry.info.id);
        if let Err(err) = entry.command.undo(&mut state.document).await {
            log::warn!("undo of {} failed: {err}", entry.info.name);
            state.undo_stack.push_back(entry);
            return Err(err.into());
        }
        let events = [entry.affect(), HistoryEvent::Undo(entry.info.clone())];
        state.redo_stack.push(entry);
        let emitted = self.observers.emit(&events);
        drop(state);
        Self::settle(emitted).await?;
        Ok(true)
    }
    /// Redo the most recently undone command. Returns `false` if there was nothing to redo.
    ///
    /// If the command fails to redo, it stays on the redo stack.
    pub async fn redo(&self) -> Result<bool, HistoryError> {
        let mut state = self.state.ensure().await?;
        let Some(mut entry) = state.redo_stack.pop() else {
            return Ok(false);
        };
        log::trace!("redoing {} ({})", entry.info.name, entry.info.id);
        if let Err(err) = entry.command.redo(&mut state.document).await {
            log::warn!("redo of {} failed: {err}", entry.info.name);
            state.redo_stack.push(entry);
            return Err(err.into());
        }
        let events = [entry.affect(), HistoryEvent::Redo(entry.info.clone())];
        state.undo_stack.push_back(entry);
        let emitted = self.observers.emit(&events);
        drop(state);
        Self::settle(emitted).await?;
        Ok(true)
    }
    /// Observer failures are reported only after yielding, so whatever the observers kicked off
    /// gets a chance to run first.
    async fn settle(emitted: Result<(), ObserverErrors>) -> Result<(), HistoryError> {
        if emitted.is_err() {
            tokio::task::yield_now().await;
        }
        emitted.map_err(Into::into)
    }
    /// View the document, waiting for any command in flight to finish first.
    pub async fn inspect<F, T>(&self, read: F) -> Result<T, HistoryError>
    where
        F: FnOnce(&Document) -> T,
    {
        let state = self.state.ensure().await?;
        Ok(read(&state.document))
    }
    /// Clone of the current document.
    pub async fn snapshot(&self) -> Result<Document, HistoryError> {
        self.inspect(Document::clone).await
    }
    /// Name of the command [`Self::undo`] would undo.
    pub async fn peek_undo(&self) -> Result<Option<CommandInfo>, HistoryError> {
        let state = self.state.ensure().await?;
        Ok(state.undo_stack.back().map(|entry| entry.info.clone()))
    }
    pub async fn peek_redo(&self) -> Result<Option<CommandInfo>, HistoryError> {
        let state = self.state.ensure().await?;
        Ok(state.redo_stack.last().map(|entry| entry.info.clone()))
    }
    pub async fn can_undo(&self) -> Result<bool, HistoryError> {
        Ok(self.undo_len().await? != 0)
    }
    pub async fn can_redo(&self) -> Result<bool, HistoryError> {
        Ok(self.redo_len().await? != 0)
    }
    pub async fn undo_len(&self) -> Result<usize, HistoryError> {
        Ok(self.state.ensure().await?.undo_stack.len())
    }
    pub async fn redo_len(&self) -> Result<usize, HistoryError> {
        Ok(self.state.ensure().await?.redo_stack.len())
    }
    /// Call `observer` with every event from now on, until unsubscribed or disposed.
    pub fn subscribe(
        &self,
        observer: impl Fn(&HistoryEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Subscription {
        self.observers.subscribe(observer)
    }
    /// Returns whether `subscription` was still subscribed.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.observers.unsubscribe(subscription)
    }
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.state.is_closed()
    }
    /// Tear down. Queued operations are rejected, a command in flight is allowed to finish, then
    /// every command on both stacks is disposed. Every later operation fails with
    /// [`HistoryError::Disposed`]. Calling this again does nothing.
    pub async fn dispose(&self) {
        let Ok(mut state) = self.state.close_and_ensure().await else {
            return;
        };
        self.observers.clear();
        let undone = state.redo_stack.len();
        let done = state.undo_stack.len();
        for entry in state.redo_stack.drain(..).rev() {
            entry.dispose();
        }
        for entry in state.undo_stack.drain(..).rev() {
            entry.dispose();
        }
        log::debug!("history disposed, dropped {done} done and {undone} undone commands");
    }
}
