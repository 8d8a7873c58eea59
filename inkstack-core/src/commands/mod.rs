//! # Commands
//!
//! Commands are the way the document is modified. Every change goes through one, so that it can
//! be undone and redone by the [history](crate::history).
//!
//! A command does its work on the first [`Command::apply`] and keeps whatever it needs to reverse
//! that work exactly (a detached subtree, the previous bitmap, the old index of a moved layer).
//! [`Command::undo`] and [`Command::redo`] then replay that record instead of recomputing it.

mod document;
mod element;
mod group;
mod layer;

pub use document::ResizeCanvas;
pub use element::{ElementPatch, FilterChange, PatchFilter, ReplaceBitmap, UpdateElement};
pub use group::CommandGroup;
pub use layer::{AddLayer, MoveLayer, RemoveLayer};

use crate::{
    id::ElementId,
    state::{document::DocumentError, Document, InvalidMutation, InvariantViolation},
};

#[derive(thiserror::Error, Debug)]
pub enum CommandError {
    /// The requested change is not valid for the current document. Nothing was changed.
    #[error(transparent)]
    Invalid(#[from] InvalidMutation),
    /// A bug. The document may be in any state.
    #[error(transparent)]
    InvariantViolation(#[from] InvariantViolation),
    #[error("command has been disposed")]
    Disposed,
    /// Fetching or decoding what the command needed failed. Nothing was changed.
    #[error("failed to prepare command: {0:#}")]
    Preparation(anyhow::Error),
}
impl From<DocumentError> for CommandError {
    fn from(value: DocumentError) -> Self {
        match value {
            DocumentError::Invalid(invalid) => Self::Invalid(invalid),
            DocumentError::Violation(violation) => Self::InvariantViolation(violation),
        }
    }
}
impl CommandError {
    /// Whether this was caused by a bad request rather than a bug.
    #[must_use]
    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::Invalid(_) | Self::Preparation(_))
    }
}

/// `apply`, `undo`, or `redo` called when the command wasn't in a state to allow it.
pub(crate) fn out_of_order(command: &dyn Command, operation: &'static str) -> CommandError {
    InvariantViolation::new("command operation called out of order")
        .with("command", command.name())
        .with("operation", operation)
        .into()
}

/// A reversible change to a [`Document`].
///
/// Each operation runs to completion or returns an error, and is not re-entrant. An error from
/// [`Command::apply`] must leave the document as it was.
#[async_trait::async_trait]
pub trait Command: Send + Sync {
    /// Short human readable name, eg. for an "Undo Move Layer" menu entry.
    fn name(&self) -> &str;
    async fn apply(&mut self, document: &mut Document) -> Result<(), CommandError>;
    async fn undo(&mut self, document: &mut Document) -> Result<(), CommandError>;
    async fn redo(&mut self, document: &mut Document) -> Result<(), CommandError> {
        self.apply(document).await
    }
    /// Elements whose rendered output is stale after this command was applied, undone, or redone.
    fn effected_element_ids(&self) -> &[ElementId];
    /// Release anything held for undo/redo. Safe to call more than once; later operations fail
    /// with [`CommandError::Disposed`].
    fn dispose(&mut self) {}
}

#[cfg(test)]
pub(crate) mod test {
    use super::Command;
    use crate::state::Document;

    /// Apply, undo, and redo, checking the document matches at each step.
    pub(crate) async fn round_trip(command: &mut dyn Command, document: &mut Document) {
        let before = document.clone();
        command.apply(document).await.unwrap();
        let after = document.clone();
        document.validate().unwrap();

        command.undo(document).await.unwrap();
        assert_eq!(*document, before, "undo of {} did not restore", command.name());
        document.validate().unwrap();

        command.redo(document).await.unwrap();
        assert_eq!(*document, after, "redo of {} did not reproduce", command.name());
        document.validate().unwrap();
    }
}
