use super::{Command, CommandError};
use crate::{
    id::ElementId,
    state::{Document, InvariantViolation},
};

#[derive(Copy, Clone, PartialEq, Eq, Debug, strum::AsRefStr)]
enum Step {
    Apply,
    Undo,
    Redo,
}
impl Step {
    /// The step that reverses this one.
    fn inverse(self) -> Self {
        match self {
            Self::Apply | Self::Redo => Self::Undo,
            Self::Undo => Self::Redo,
        }
    }
    async fn run(self, command: &mut dyn Command, document: &mut Document) -> Result<(), CommandError> {
        match self {
            Self::Apply => command.apply(document).await,
            Self::Undo => command.undo(document).await,
            Self::Redo => command.redo(document).await,
        }
    }
}

/// Several commands acting as one. Children are applied and redone in order and undone in
/// reverse. If any child fails, the children already run are reversed so the group as a whole
/// either happens or doesn't.
pub struct CommandGroup {
    name: String,
    commands: Vec<Box<dyn Command>>,
    effected: Vec<ElementId>,
    disposed: bool,
}
impl CommandGroup {
    pub fn new(name: impl Into<String>, commands: Vec<Box<dyn Command>>) -> Self {
        Self {
            name: name.into(),
            commands,
            effected: Vec::new(),
            disposed: false,
        }
    }
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
    async fn run(&mut self, document: &mut Document, step: Step) -> Result<(), CommandError> {
        if self.disposed {
            return Err(CommandError::Disposed);
        }
        let order: Vec<usize> = if step == Step::Undo {
            (0..self.commands.len()).rev().collect()
        } else {
            (0..self.commands.len()).collect()
        };
        for (done, &idx) in order.iter().enumerate() {
            let Err(err) = step.run(self.commands[idx].as_mut(), document).await else {
                continue;
            };
            log::debug!(
                "{} of {:?} failed at child {idx}, rolling back {done} children",
                step.as_ref(),
                self.name
            );
            for &rollback in order[..done].iter().rev() {
                let command = self.commands[rollback].as_mut();
                if let Err(rollback_err) = step.inverse().run(command, document).await {
                    log::error!("rollback of {:?} failed: {rollback_err}", command.name());
                    return Err(InvariantViolation::new("command group rollback failed")
                        .with("group", &self.name)
                        .with("child", command.name())
                        .with("cause", &err)
                        .with("rollback", rollback_err)
                        .into());
                }
            }
            return Err(err);
        }
        self.collect_effected();
        Ok(())
    }
    /// Union of the children's ids, first occurrence order.
    fn collect_effected(&mut self) {
        let mut seen = hashbrown::HashSet::new();
        self.effected = self
            .commands
            .iter()
            .flat_map(|command| command.effected_element_ids())
            .filter(|id| seen.insert(*id))
            .cloned()
            .collect();
    }
}
#[async_trait::async_trait]
impl Command for CommandGroup {
    fn name(&self) -> &str {
        &self.name
    }
    async fn apply(&mut self, document: &mut Document) -> Result<(), CommandError> {
        self.run(document, Step::Apply).await
    }
    async fn undo(&mut self, document: &mut Document) -> Result<(), CommandError> {
        self.run(document, Step::Undo).await
    }
    async fn redo(&mut self, document: &mut Document) -> Result<(), CommandError> {
        self.run(document, Step::Redo).await
    }
    fn effected_element_ids(&self) -> &[ElementId] {
        &self.effected
    }
    fn dispose(&mut self) {
        self.disposed = true;
        for command in &mut self.commands {
            command.dispose();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::commands::{test::round_trip, AddLayer, MoveLayer, RemoveLayer};
    use crate::state::{
        document::test::{children, grouped_document, id, path},
        LayerPath, MoveDestination, VisualElement,
    };

    #[tokio::test]
    async fn undo_runs_in_reverse() {
        let mut document = grouped_document();
        // Undoing these in forward order would remove group-3 before its child.
        let mut group = CommandGroup::new(
            "Add Title",
            vec![
                Box::new(AddLayer::new(
                    VisualElement::group(id("group-3")),
                    LayerPath::root(),
                    0,
                )),
                Box::new(AddLayer::new(
                    VisualElement::text(id("text-1"), "Title"),
                    path(&["group-3"]),
                    -1,
                )),
            ],
        );
        round_trip(&mut group, &mut document).await;
        assert_eq!(children(&document, &[]), ["group-3", "group-1", "group-2"]);
        assert_eq!(group.effected_element_ids(), [id("group-3"), id("text-1")]);
    }
    #[tokio::test]
    async fn failure_rolls_back() {
        let mut document = grouped_document();
        let before = document.clone();
        let mut group = CommandGroup::new(
            "Tidy",
            vec![
                Box::new(RemoveLayer::new(path(&["group-2"]))),
                Box::new(AddLayer::new(
                    VisualElement::text(id("text-1"), "Label"),
                    LayerPath::root(),
                    -1,
                )),
                // Canvas can't hold children.
                Box::new(MoveLayer::new(
                    path(&["text-1"]),
                    MoveDestination::parse(&["group-1", "canvas-1", "PLACE_IT"]).unwrap(),
                )),
            ],
        );
        let err = group.apply(&mut document).await.unwrap_err();
        assert!(err.is_user_error());
        assert_eq!(document, before);
        document.validate().unwrap();
    }
    #[tokio::test]
    async fn dispose_reaches_children() {
        let mut document = grouped_document();
        let mut group = CommandGroup::new(
            "Remove",
            vec![Box::new(RemoveLayer::new(path(&["group-2"])))],
        );
        group.apply(&mut document).await.unwrap();
        group.dispose();
        assert!(matches!(
            group.undo(&mut document).await,
            Err(CommandError::Disposed)
        ));
        assert!(matches!(
            group.commands[0].undo(&mut document).await,
            Err(CommandError::Disposed)
        ));
    }
}
