//! Structural commands: adding, removing, and moving layers.

use super::{out_of_order, Command, CommandError};
use crate::{
    id::ElementId,
    state::{
        DetachedSubtree, Document, LayerPath, MoveDestination, Relocation, VisualElement,
    },
};

enum AddState {
    Pending(VisualElement),
    Applied(LayerPath),
    /// Undone, holding the removed node to restore as-is on redo.
    Undone(DetachedSubtree),
    Disposed,
}

/// Insert a new element and the layer node referencing it.
pub struct AddLayer {
    parent: LayerPath,
    index: isize,
    state: AddState,
    effected: [ElementId; 1],
}
impl AddLayer {
    /// Add `element` under `parent` at `index`. Negative indices append.
    #[must_use]
    pub fn new(element: VisualElement, parent: LayerPath, index: isize) -> Self {
        Self {
            parent,
            index,
            effected: [element.id.clone()],
            state: AddState::Pending(element),
        }
    }
}
#[async_trait::async_trait]
impl Command for AddLayer {
    fn name(&self) -> &str {
        "Add Layer"
    }
    async fn apply(&mut self, document: &mut Document) -> Result<(), CommandError> {
        match std::mem::replace(&mut self.state, AddState::Disposed) {
            AddState::Pending(element) => {
                match document.add_layer_node(element.clone(), &self.parent, self.index) {
                    Ok(path) => {
                        self.state = AddState::Applied(path);
                        Ok(())
                    }
                    Err(err) => {
                        self.state = AddState::Pending(element);
                        Err(err.into())
                    }
                }
            }
            AddState::Disposed => Err(CommandError::Disposed),
            other => {
                self.state = other;
                Err(out_of_order(&*self, "apply"))
            }
        }
    }
    async fn undo(&mut self, document: &mut Document) -> Result<(), CommandError> {
        match std::mem::replace(&mut self.state, AddState::Disposed) {
            AddState::Applied(path) => match document.remove_layer_node(&path) {
                Ok(detached) => {
                    self.state = AddState::Undone(detached);
                    Ok(())
                }
                Err(err) => {
                    self.state = AddState::Applied(path);
                    Err(err.into())
                }
            },
            AddState::Disposed => Err(CommandError::Disposed),
            other => {
                self.state = other;
                Err(out_of_order(&*self, "undo"))
            }
        }
    }
    async fn redo(&mut self, document: &mut Document) -> Result<(), CommandError> {
        match std::mem::replace(&mut self.state, AddState::Disposed) {
            AddState::Undone(detached) => {
                if let Err(err) = document.restore_subtree(&detached) {
                    self.state = AddState::Undone(detached);
                    return Err(err.into());
                }
                self.state = AddState::Applied(detached.parent.join(detached.shape.id.clone()));
                Ok(())
            }
            AddState::Disposed => Err(CommandError::Disposed),
            other => {
                self.state = other;
                Err(out_of_order(&*self, "redo"))
            }
        }
    }
    fn effected_element_ids(&self) -> &[ElementId] {
        &self.effected
    }
    fn dispose(&mut self) {
        self.state = AddState::Disposed;
    }
}

/// Remove a layer, its children, and every element they reference.
pub struct RemoveLayer {
    path: LayerPath,
    /// Some while applied.
    detached: Option<DetachedSubtree>,
    effected: Vec<ElementId>,
    disposed: bool,
}
impl RemoveLayer {
    #[must_use]
    pub fn new(path: LayerPath) -> Self {
        Self {
            effected: path.target().cloned().into_iter().collect(),
            path,
            detached: None,
            disposed: false,
        }
    }
    fn remove(&mut self, document: &mut Document) -> Result<(), CommandError> {
        if self.disposed {
            return Err(CommandError::Disposed);
        }
        if self.detached.is_some() {
            return Err(out_of_order(&*self, "apply"));
        }
        let detached = document.remove_layer_node(&self.path)?;
        self.effected = detached.shape.ids().cloned().collect();
        // The parent's composite changed too.
        self.effected.extend(detached.parent.target().cloned());
        self.detached = Some(detached);
        Ok(())
    }
}
#[async_trait::async_trait]
impl Command for RemoveLayer {
    fn name(&self) -> &str {
        "Remove Layer"
    }
    async fn apply(&mut self, document: &mut Document) -> Result<(), CommandError> {
        self.remove(document)
    }
    async fn undo(&mut self, document: &mut Document) -> Result<(), CommandError> {
        if self.disposed {
            return Err(CommandError::Disposed);
        }
        let Some(detached) = self.detached.take() else {
            return Err(out_of_order(&*self, "undo"));
        };
        if let Err(err) = document.restore_subtree(&detached) {
            self.detached = Some(detached);
            return Err(err.into());
        }
        Ok(())
    }
    async fn redo(&mut self, document: &mut Document) -> Result<(), CommandError> {
        self.remove(document)
    }
    fn effected_element_ids(&self) -> &[ElementId] {
        &self.effected
    }
    fn dispose(&mut self) {
        self.disposed = true;
        self.detached = None;
    }
}

enum MoveState {
    Pending,
    Applied(Relocation),
    Undone(Relocation),
    Disposed,
}

/// Move a layer and its children somewhere else in the tree.
pub struct MoveLayer {
    source: LayerPath,
    destination: MoveDestination,
    state: MoveState,
    effected: smallvec::SmallVec<[ElementId; 3]>,
}
impl MoveLayer {
    #[must_use]
    pub fn new(source: LayerPath, destination: MoveDestination) -> Self {
        Self {
            effected: source.target().cloned().into_iter().collect(),
            source,
            destination,
            state: MoveState::Pending,
        }
    }
}
#[async_trait::async_trait]
impl Command for MoveLayer {
    fn name(&self) -> &str {
        "Move Layer"
    }
    async fn apply(&mut self, document: &mut Document) -> Result<(), CommandError> {
        match self.state {
            MoveState::Pending => (),
            MoveState::Disposed => return Err(CommandError::Disposed),
            MoveState::Applied(_) | MoveState::Undone(_) => {
                return Err(out_of_order(&*self, "apply"))
            }
        }
        let relocation = document.move_layer_node_over(&self.source, &self.destination)?;
        self.effected = std::iter::once(relocation.id.clone())
            .chain(relocation.from_parent.target().cloned())
            .chain(relocation.to_parent.target().cloned())
            .collect();
        self.effected.dedup();
        self.state = MoveState::Applied(relocation);
        Ok(())
    }
    async fn undo(&mut self, document: &mut Document) -> Result<(), CommandError> {
        match &self.state {
            MoveState::Applied(relocation) => {
                document.revert_relocation(relocation)?;
                let relocation = relocation.clone();
                self.state = MoveState::Undone(relocation);
                Ok(())
            }
            MoveState::Disposed => Err(CommandError::Disposed),
            MoveState::Pending | MoveState::Undone(_) => Err(out_of_order(&*self, "undo")),
        }
    }
    async fn redo(&mut self, document: &mut Document) -> Result<(), CommandError> {
        match &self.state {
            MoveState::Undone(relocation) => {
                document.replay_relocation(relocation)?;
                let relocation = relocation.clone();
                self.state = MoveState::Applied(relocation);
                Ok(())
            }
            MoveState::Disposed => Err(CommandError::Disposed),
            MoveState::Pending | MoveState::Applied(_) => Err(out_of_order(&*self, "redo")),
        }
    }
    fn effected_element_ids(&self) -> &[ElementId] {
        &self.effected
    }
    fn dispose(&mut self) {
        self.state = MoveState::Disposed;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::commands::test::round_trip;
    use crate::state::document::test::{children, grouped_document, id, path};

    #[tokio::test]
    async fn add_round_trip() {
        let mut document = grouped_document();
        let mut add = AddLayer::new(
            VisualElement::text(id("text-1"), "hello"),
            path(&["group-2"]),
            0,
        );
        round_trip(&mut add, &mut document).await;
        assert_eq!(children(&document, &["group-2"]), ["text-1"]);
        assert_eq!(add.effected_element_ids(), [id("text-1")]);
    }
    #[tokio::test]
    async fn failed_add_can_retry() {
        let mut document = grouped_document();
        let before = document.clone();
        let mut add = AddLayer::new(
            VisualElement::text(id("text-1"), "hello"),
            path(&["group-1", "canvas-1"]),
            -1,
        );
        let err = add.apply(&mut document).await.unwrap_err();
        assert!(err.is_user_error());
        assert_eq!(document, before);
        // Still pending, so undo is out of order.
        assert!(matches!(
            add.undo(&mut document).await,
            Err(CommandError::InvariantViolation(_))
        ));
    }
    #[tokio::test]
    async fn remove_round_trip() {
        let mut document = grouped_document();
        let mut remove = RemoveLayer::new(path(&["group-1"]));
        round_trip(&mut remove, &mut document).await;
        assert_eq!(children(&document, &[]), ["group-2"]);
        let mut effected = remove.effected_element_ids().to_vec();
        effected.sort();
        assert_eq!(effected, [id("canvas-1"), id("group-1")]);
    }
    #[tokio::test]
    async fn move_round_trip() {
        let mut document = grouped_document();
        let mut move_layer = MoveLayer::new(
            path(&["group-1"]),
            MoveDestination::parse(&["group-2", "PLACE_IT"]).unwrap(),
        );
        round_trip(&mut move_layer, &mut document).await;
        assert_eq!(children(&document, &["group-2", "group-1"]), ["canvas-1"]);
        assert_eq!(
            move_layer.effected_element_ids(),
            [id("group-1"), id("group-2")]
        );
    }
    #[tokio::test]
    async fn disposed_refuses() {
        let mut document = grouped_document();
        let mut move_layer =
            MoveLayer::new(path(&["group-1"]), MoveDestination::parse(&["group-2"]).unwrap());
        move_layer.apply(&mut document).await.unwrap();
        move_layer.dispose();
        move_layer.dispose();
        assert!(matches!(
            move_layer.undo(&mut document).await,
            Err(CommandError::Disposed)
        ));
    }
}
