use super::{
    element::VisualElement,
    graph::{LayerPath, LayerTree, MoveDestination, Placement, SubtreeShape, TreeError},
    InvalidMutation, InvariantViolation,
};
use crate::id::ElementId;

pub type DocumentID = crate::FuzzID<Document>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error(transparent)]
    Invalid(#[from] InvalidMutation),
    #[error(transparent)]
    Violation(#[from] InvariantViolation),
}
impl From<TreeError> for DocumentError {
    fn from(value: TreeError) -> Self {
        match value {
            TreeError::PathNotFound(path) => InvalidMutation::PathNotFound(path).into(),
            TreeError::DuplicateId(id) => InvalidMutation::DuplicateElement(id).into(),
            TreeError::IsRoot => InvalidMutation::RootLayer.into(),
            // Callers with a source path at hand replace this with a better one.
            TreeError::WouldCycle => InvalidMutation::WouldCycle {
                moved: LayerPath::root(),
            }
            .into(),
            TreeError::Malformed(what) => InvariantViolation::new(what).into(),
        }
    }
}

/// The render area of a document.
#[derive(Copy, Clone, PartialEq, Debug, serde::Serialize, serde::Deserialize)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
    /// Controls the interpretation of physical units into pixels and vice-versa.
    pub dpi: f32,
}
impl CanvasSize {
    pub fn new(width: u32, height: u32) -> Result<Self, InvalidMutation> {
        if width == 0 || height == 0 {
            Err(InvalidMutation::EmptyCanvas)
        } else {
            Ok(Self {
                width,
                height,
                ..Self::default()
            })
        }
    }
}
impl Default for CanvasSize {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1080,
            dpi: 150.0,
        }
    }
}

/// Where a moved node came from and where it ended up, enough to replay or revert the move
/// exactly.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Relocation {
    pub id: ElementId,
    pub from_parent: LayerPath,
    pub from_index: usize,
    pub to_parent: LayerPath,
    pub to_index: usize,
}

/// A subtree removed from the document, along with every element it referenced.
#[derive(Clone, PartialEq, Debug)]
pub struct DetachedSubtree {
    pub parent: LayerPath,
    pub index: usize,
    pub shape: SubtreeShape,
    /// In the pre-order of `shape`.
    pub elements: Vec<VisualElement>,
}

#[derive(Clone)]
pub struct Document {
    id: DocumentID,
    /// Name of the document, inferred from its path or generated.
    pub name: String,
    canvas: CanvasSize,
    layers: LayerTree,
    elements: hashbrown::HashMap<ElementId, VisualElement>,
}
impl Default for Document {
    fn default() -> Self {
        Self::new("New Document", CanvasSize::default())
    }
}
impl Document {
    pub fn new(name: impl Into<String>, canvas: CanvasSize) -> Self {
        Self {
            id: DocumentID::default(),
            name: name.into(),
            canvas,
            layers: LayerTree::default(),
            elements: hashbrown::HashMap::new(),
        }
    }
    #[must_use]
    pub fn id(&self) -> DocumentID {
        self.id
    }
    #[must_use]
    pub fn canvas(&self) -> CanvasSize {
        self.canvas
    }
    /// Replace the canvas metadata, returning the old one.
    pub fn set_canvas(&mut self, canvas: CanvasSize) -> Result<CanvasSize, InvalidMutation> {
        if canvas.width == 0 || canvas.height == 0 {
            return Err(InvalidMutation::EmptyCanvas);
        }
        Ok(std::mem::replace(&mut self.canvas, canvas))
    }
    #[must_use]
    pub fn layers(&self) -> &LayerTree {
        &self.layers
    }
    #[must_use]
    pub fn element(&self, id: &ElementId) -> Option<&VisualElement> {
        self.elements.get(id)
    }
    /// Mutable access to an element's content.
    ///
    /// Turning a container with children into a leaf kind breaks the tree, and will be reported
    /// by [`Self::validate`].
    pub fn element_mut(&mut self, id: &ElementId) -> Option<&mut VisualElement> {
        self.elements.get_mut(id)
    }
    /// Iterate all elements, in arbitrary order.
    pub fn elements(&self) -> impl Iterator<Item = &VisualElement> + '_ {
        self.elements.values()
    }
    /// Whether the node at `path` may accept children. Unresolvable paths can't.
    #[must_use]
    pub fn is_child_containable_node(&self, path: &LayerPath) -> bool {
        match path.target() {
            None => true,
            Some(id) => {
                self.layers.exists(path)
                    && self
                        .elements
                        .get(id)
                        .is_some_and(VisualElement::is_container)
            }
        }
    }
    /// Error for why `path` can't take children, if it can't.
    fn check_container(&self, path: &LayerPath) -> Result<(), InvalidMutation> {
        if self.is_child_containable_node(path) {
            Ok(())
        } else if self.layers.exists(path) {
            Err(InvalidMutation::NotContainer(path.clone()))
        } else {
            Err(InvalidMutation::PathNotFound(path.clone()))
        }
    }
    /// Insert `element` as a child of the node at `parent`, at `index` (negative appends).
    /// Returns the path of the new node.
    pub fn add_layer_node(
        &mut self,
        element: VisualElement,
        parent: &LayerPath,
        index: isize,
    ) -> Result<LayerPath, DocumentError> {
        self.check_container(parent)?;
        if self.elements.contains_key(&element.id) || self.layers.contains(&element.id) {
            return Err(InvalidMutation::DuplicateElement(element.id).into());
        }
        self.layers
            .insert(parent, element.id.clone(), Placement::from(index))?;
        let path = parent.join(element.id.clone());
        self.elements.insert(element.id.clone(), element);
        Ok(path)
    }
    /// Move the subtree at `source` to `destination`, see [`MoveDestination`].
    /// On error, the tree is left untouched.
    pub fn move_layer_node_over(
        &mut self,
        source: &LayerPath,
        destination: &MoveDestination,
    ) -> Result<Relocation, DocumentError> {
        let id = source.target().cloned().ok_or(InvalidMutation::RootLayer)?;
        if !self.layers.exists(source) {
            return Err(InvalidMutation::PathNotFound(source.clone()).into());
        }
        let (from_parent, from_index) = self
            .layers
            .location_of(&id)
            .ok_or_else(|| InvariantViolation::new("resolved node has no location").with("id", &id))?;

        let result = match destination {
            MoveDestination::Into { container, index } => {
                self.check_container(container)?;
                self.layers
                    .relocate(source, container, Placement::from(*index))
            }
            MoveDestination::Over(target) => {
                let parent = target.parent().ok_or(InvalidMutation::RootLayer)?;
                if !self.layers.exists(target) {
                    return Err(InvalidMutation::PathNotFound(target.clone()).into());
                }
                self.check_container(&parent)?;
                self.layers.relocate_over(source, target)
            }
        };
        match result {
            Ok(()) => {
                let (to_parent, to_index) = self.layers.location_of(&id).ok_or_else(|| {
                    InvariantViolation::new("moved node has no location").with("id", &id)
                })?;
                Ok(Relocation {
                    id,
                    from_parent,
                    from_index,
                    to_parent,
                    to_index,
                })
            }
            Err(TreeError::WouldCycle) => Err(InvalidMutation::WouldCycle {
                moved: source.clone(),
            }
            .into()),
            Err(other) => Err(other.into()),
        }
    }
    fn place_node(
        &mut self,
        id: &ElementId,
        parent: &LayerPath,
        index: usize,
    ) -> Result<(), DocumentError> {
        let current = self
            .layers
            .path_of(id)
            .ok_or_else(|| InvalidMutation::UnknownElement(id.clone()))?;
        self.check_container(parent)?;
        self.layers
            .relocate(&current, parent, Placement::Index(index))?;
        Ok(())
    }
    /// Put a moved node back where it was.
    pub fn revert_relocation(&mut self, relocation: &Relocation) -> Result<(), DocumentError> {
        self.place_node(&relocation.id, &relocation.from_parent, relocation.from_index)
    }
    /// Perform a recorded move again, without re-resolving its destination.
    pub fn replay_relocation(&mut self, relocation: &Relocation) -> Result<(), DocumentError> {
        self.place_node(&relocation.id, &relocation.to_parent, relocation.to_index)
    }
    /// Remove the subtree at `path` and every element it references.
    pub fn remove_layer_node(&mut self, path: &LayerPath) -> Result<DetachedSubtree, DocumentError> {
        let id = path.target().ok_or(InvalidMutation::RootLayer)?;
        if !self.layers.exists(path) {
            return Err(InvalidMutation::PathNotFound(path.clone()).into());
        }
        let (parent, index) = self
            .layers
            .location_of(id)
            .ok_or_else(|| InvariantViolation::new("resolved node has no location").with("id", id))?;
        let shape = self.layers.subtree_shape(path)?;
        // Check before touching anything, so a failure leaves the document intact.
        if let Some(missing) = shape.ids().find(|id| !self.elements.contains_key(*id)) {
            return Err(InvariantViolation::new("layer references a missing element")
                .with("id", missing)
                .with("path", path)
                .into());
        }
        self.layers.detach(path)?;
        let elements = shape
            .ids()
            .filter_map(|id| self.elements.remove(id))
            .collect();
        Ok(DetachedSubtree {
            parent,
            index,
            shape,
            elements,
        })
    }
    /// Reinsert a subtree from [`Self::remove_layer_node`], at its old position.
    pub fn restore_subtree(&mut self, detached: &DetachedSubtree) -> Result<(), DocumentError> {
        self.check_container(&detached.parent)?;
        if let Some(element) = detached
            .elements
            .iter()
            .find(|element| self.elements.contains_key(&element.id))
        {
            return Err(InvalidMutation::DuplicateElement(element.id.clone()).into());
        }
        self.layers.attach(
            &detached.parent,
            &detached.shape,
            Placement::Index(detached.index),
        )?;
        self.elements.extend(
            detached
                .elements
                .iter()
                .map(|element| (element.id.clone(), element.clone())),
        );
        Ok(())
    }
    /// Check the structural invariants: every referenced element exists and is referenced
    /// once, every element is referenced, and only containers have children.
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        let mut seen = hashbrown::HashSet::with_capacity(self.layers.len());
        for id in self.layers.iter() {
            if !seen.insert(id) {
                return Err(InvariantViolation::new("element referenced twice").with("id", id));
            }
            let Some(element) = self.elements.get(id) else {
                return Err(
                    InvariantViolation::new("layer references a missing element").with("id", id)
                );
            };
            let path = self.layers.path_of(id).ok_or_else(|| {
                InvariantViolation::new("layer not reachable from root").with("id", id)
            })?;
            let has_children = self
                .layers
                .children_of(&path)
                .is_some_and(|mut children| children.next().is_some());
            if has_children && !element.is_container() {
                return Err(InvariantViolation::new("leaf layer has children")
                    .with("id", id)
                    .with("kind", element.kind.as_ref()));
            }
        }
        if seen.len() != self.layers.len() {
            return Err(InvariantViolation::new("indexed layers not reachable from root")
                .with("reachable", seen.len())
                .with("indexed", self.layers.len()));
        }
        if let Some(orphan) = self.elements.keys().find(|id| !seen.contains(id)) {
            return Err(InvariantViolation::new("element not referenced by any layer")
                .with("id", orphan));
        }
        Ok(())
    }
}
/// Structural equality: canvas, name, elements, and tree shape. The document id is not
/// compared, so a snapshot equals the document it was taken from.
impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.canvas == other.canvas
            && self.elements == other.elements
            && self.layers == other.layers
    }
}
impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("canvas", &self.canvas)
            .field("layers", &self.layers)
            .field("elements", &self.elements.len())
            .finish()
    }
}
