//! # Layer tree
//!
//! The layers of the document form a tree. Every node but the root references exactly one
//! [visual element](super::element) by id, and the order of a node's children is the paint order
//! (first child painted first, so later siblings are "over" earlier ones).
//!
//! The tree itself knows nothing about what kind of element a node references. Whether a node
//! may hold children is decided by the [`Document`](super::Document), which owns both the tree and the
//! elements.
//!
//! Nodes live in an [`id_tree`] arena, with an element id -> arena id index so that resolving a
//! path is a lookup per segment rather than a walk.

mod path;

pub use path::{LayerPath, MoveDestination};

use crate::id::ElementId;

#[derive(Clone, PartialEq, Debug)]
enum LayerNodeData {
    Root,
    Element(ElementId),
}
impl LayerNodeData {
    fn element(&self) -> Option<&ElementId> {
        match self {
            Self::Element(id) => Some(id),
            Self::Root => None,
        }
    }
}

/// Owned description of a subtree's structure, without arena handles.
/// Also serves as the comparable "shape" of a whole tree.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SubtreeShape {
    pub id: ElementId,
    pub children: Vec<SubtreeShape>,
}
impl SubtreeShape {
    #[must_use]
    pub fn leaf(id: ElementId) -> Self {
        Self {
            id,
            children: Vec::new(),
        }
    }
    /// Every id in this subtree, pre-order.
    pub fn ids(&self) -> impl Iterator<Item = &ElementId> + '_ {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let next = stack.pop()?;
            stack.extend(next.children.iter().rev());
            Some(&next.id)
        })
    }
}

/// Where, among a parent's children, a node is placed.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Placement {
    Append,
    /// Clamped to append if too large.
    Index(usize),
}
impl From<isize> for Placement {
    /// Negative indices append.
    fn from(value: isize) -> Self {
        usize::try_from(value).map_or(Self::Append, Self::Index)
    }
}
impl From<Option<usize>> for Placement {
    fn from(value: Option<usize>) -> Self {
        value.map_or(Self::Append, Self::Index)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("no node at {0}")]
    PathNotFound(LayerPath),
    #[error("element {0} is already in the tree")]
    DuplicateId(ElementId),
    #[error("can't move a node into itself or its own [grand]children")]
    WouldCycle,
    #[error("the root can't be moved or removed")]
    IsRoot,
    /// Arena and index disagree. A bug, not a user error.
    #[error("tree malformed: {0}")]
    Malformed(&'static str),
}

pub struct LayerTree {
    tree: id_tree::Tree<LayerNodeData>,
    ids: hashbrown::HashMap<ElementId, id_tree::NodeId>,
}
impl Default for LayerTree {
    fn default() -> Self {
        Self {
            tree: id_tree::TreeBuilder::new()
                .with_root(id_tree::Node::new(LayerNodeData::Root))
                .build(),
            ids: hashbrown::HashMap::new(),
        }
    }
}
impl LayerTree {
    fn root_id(&self) -> &id_tree::NodeId {
        // unwrap ok - built with a root, and the root is never removed.
        self.tree.root_node_id().unwrap()
    }
    fn node(&self, id: &id_tree::NodeId) -> Result<&id_tree::Node<LayerNodeData>, TreeError> {
        self.tree
            .get(id)
            .map_err(|_| TreeError::Malformed("indexed node missing from arena"))
    }
    /// Find the arena node of a path, checking every segment is a child of the one before.
    fn resolve(&self, path: &LayerPath) -> Option<&id_tree::NodeId> {
        let mut current = self.root_id();
        for id in path.iter() {
            let next = self.ids.get(id)?;
            if self.tree.get(next).ok()?.parent() != Some(current) {
                return None;
            }
            current = next;
        }
        Some(current)
    }
    fn resolve_or_err(&self, path: &LayerPath) -> Result<id_tree::NodeId, TreeError> {
        self.resolve(path)
            .cloned()
            .ok_or_else(|| TreeError::PathNotFound(path.clone()))
    }
    /// Number of nodes, not counting the root.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
    #[must_use]
    pub fn contains(&self, id: &ElementId) -> bool {
        self.ids.contains_key(id)
    }
    #[must_use]
    pub fn exists(&self, path: &LayerPath) -> bool {
        self.resolve(path).is_some()
    }
    /// The full path to the node referencing this element.
    #[must_use]
    pub fn path_of(&self, id: &ElementId) -> Option<LayerPath> {
        let node_id = self.ids.get(id)?;
        let mut ids: Vec<ElementId> = self
            .tree
            .ancestor_ids(node_id)
            .ok()?
            .filter_map(|ancestor| self.tree.get(ancestor).ok()?.data().element().cloned())
            .collect();
        ids.reverse();
        ids.push(id.clone());
        Some(LayerPath::new(ids))
    }
    /// The parent path and child index of this element's node.
    #[must_use]
    pub fn location_of(&self, id: &ElementId) -> Option<(LayerPath, usize)> {
        let node_id = self.ids.get(id)?;
        let parent = self.tree.get(node_id).ok()?.parent()?;
        let index = self
            .tree
            .children_ids(parent)
            .ok()?
            .position(|child| child == node_id)?;
        let parent_path = self.path_of(id)?.parent()?;
        Some((parent_path, index))
    }
    /// Iterate the element ids of the children of the node at `path`, in paint order.
    pub fn children_of(&self, path: &LayerPath) -> Option<impl Iterator<Item = &ElementId> + '_> {
        let node_id = self.resolve(path)?;
        Some(
            self.tree
                .children_ids(node_id)
                .ok()?
                .filter_map(|child| self.tree.get(child).ok()?.data().element()),
        )
    }
    /// Iterate the children of the root.
    pub fn iter_top_level(&self) -> impl Iterator<Item = &ElementId> + '_ {
        self.tree
            .children(self.root_id())
            .into_iter()
            .flatten()
            .filter_map(|child| child.data().element())
    }
    /// Iterate every element id in the tree, pre-order (parents before their children).
    pub fn iter(&self) -> impl Iterator<Item = &ElementId> + '_ {
        self.tree
            .traverse_pre_order(self.root_id())
            .into_iter()
            .flatten()
            .filter_map(|node| node.data().element())
    }
    fn shape_of(&self, node_id: &id_tree::NodeId) -> Result<Vec<SubtreeShape>, TreeError> {
        let node = self.node(node_id)?;
        node.children()
            .iter()
            .map(|child| {
                let id = self
                    .node(child)?
                    .data()
                    .element()
                    .cloned()
                    .ok_or(TreeError::Malformed("root found below root"))?;
                Ok(SubtreeShape {
                    id,
                    children: self.shape_of(child)?,
                })
            })
            .collect()
    }
    /// The structure of the entire tree, as the shapes of each top-level node.
    #[must_use]
    pub fn shape(&self) -> Vec<SubtreeShape> {
        // Only fails on a malformed arena, in which case there is no meaningful shape.
        self.shape_of(self.root_id()).unwrap_or_default()
    }
    /// The structure of the subtree at `path`.
    pub fn subtree_shape(&self, path: &LayerPath) -> Result<SubtreeShape, TreeError> {
        let id = path.target().cloned().ok_or(TreeError::IsRoot)?;
        let node_id = self.resolve_or_err(path)?;
        Ok(SubtreeShape {
            id,
            children: self.shape_of(&node_id)?,
        })
    }
    fn place(&mut self, node_id: &id_tree::NodeId, placement: Placement) -> Result<(), TreeError> {
        let Placement::Index(index) = placement else {
            // Inserting and moving both append already.
            return Ok(());
        };
        let parent = self
            .node(node_id)?
            .parent()
            .cloned()
            .ok_or(TreeError::IsRoot)?;
        let last = self.node(&parent)?.children().len().saturating_sub(1);
        self.tree
            .make_nth_sibling(node_id, index.min(last))
            .map_err(|_| TreeError::Malformed("placed node missing from arena"))
    }
    /// Insert a childless node referencing `id` under the node at `parent`.
    pub(crate) fn insert(
        &mut self,
        parent: &LayerPath,
        id: ElementId,
        placement: Placement,
    ) -> Result<(), TreeError> {
        if self.ids.contains_key(&id) {
            return Err(TreeError::DuplicateId(id));
        }
        let parent_id = self.resolve_or_err(parent)?;
        let new_node = self
            .tree
            .insert(
                id_tree::Node::new(LayerNodeData::Element(id.clone())),
                id_tree::InsertBehavior::UnderNode(&parent_id),
            )
            .map_err(|_| TreeError::Malformed("resolved parent missing from arena"))?;
        self.ids.insert(id, new_node.clone());
        self.place(&new_node, placement)
    }
    /// Reinsert a previously detached subtree, whole.
    pub(crate) fn attach(
        &mut self,
        parent: &LayerPath,
        shape: &SubtreeShape,
        placement: Placement,
    ) -> Result<(), TreeError> {
        if let Some(duplicate) = shape.ids().find(|id| self.ids.contains_key(*id)) {
            return Err(TreeError::DuplicateId(duplicate.clone()));
        }
        self.insert(parent, shape.id.clone(), placement)?;
        let own_path = parent.join(shape.id.clone());
        for child in &shape.children {
            self.attach(&own_path, child, Placement::Append)?;
        }
        Ok(())
    }
    /// Remove the subtree at `path`, returning its shape.
    pub(crate) fn detach(&mut self, path: &LayerPath) -> Result<SubtreeShape, TreeError> {
        let shape = self.subtree_shape(path)?;
        let node_id = self.resolve_or_err(path)?;
        self.tree
            .remove_node(node_id, id_tree::RemoveBehavior::DropChildren)
            .map_err(|_| TreeError::Malformed("resolved node missing from arena"))?;
        for id in shape.ids() {
            self.ids.remove(id);
        }
        Ok(shape)
    }
    /// Move the subtree at `source` to be a child of `parent`.
    /// Children are brought along for the ride!
    pub(crate) fn relocate(
        &mut self,
        source: &LayerPath,
        parent: &LayerPath,
        placement: Placement,
    ) -> Result<(), TreeError> {
        if source.is_root() {
            return Err(TreeError::IsRoot);
        }
        let source_id = self.resolve_or_err(source)?;
        let parent_id = self.resolve_or_err(parent)?;
        // Are we trying to reparent to one of this node's own children, or itself?
        let parent_ancestors = self
            .tree
            .ancestor_ids(&parent_id)
            .map_err(|_| TreeError::Malformed("resolved parent missing from arena"))?;
        if std::iter::once(&parent_id)
            .chain(parent_ancestors)
            .any(|ancestor| *ancestor == source_id)
        {
            return Err(TreeError::WouldCycle);
        }
        self.tree
            .move_node(&source_id, id_tree::MoveBehavior::ToParent(&parent_id))
            .map_err(|_| TreeError::Malformed("resolved node missing from arena"))?;
        self.place(&source_id, placement)
    }
    /// Move the subtree at `source` to sit directly after `target` among `target`'s siblings.
    pub(crate) fn relocate_over(
        &mut self,
        source: &LayerPath,
        target: &LayerPath,
    ) -> Result<(), TreeError> {
        let parent = target.parent().ok_or(TreeError::IsRoot)?;
        if source == target {
            return Err(TreeError::WouldCycle);
        }
        // Append first, so the target's index no longer counts the source.
        self.relocate(source, &parent, Placement::Append)?;
        let target_id = target.target().ok_or(TreeError::IsRoot)?;
        let (_, target_index) = self
            .location_of(target_id)
            .ok_or_else(|| TreeError::PathNotFound(target.clone()))?;
        let source_id = self.resolve_or_err(&parent.join(
            source.target().cloned().ok_or(TreeError::IsRoot)?,
        ))?;
        self.place(&source_id, Placement::Index(target_index + 1))
    }
}
/// Very expensive clone impl!
impl Clone for LayerTree {
    fn clone(&self) -> Self {
        let tree = self.tree.clone();
        // Arena ids are not carried over by the clone, rebuild the index from the node data.
        let mut ids = hashbrown::HashMap::with_capacity(self.ids.len());
        if let Some(root) = tree.root_node_id() {
            for node_id in tree.traverse_pre_order_ids(root).into_iter().flatten() {
                if let Some(id) = tree.get(&node_id).ok().and_then(|node| node.data().element()) {
                    ids.insert(id.clone(), node_id.clone());
                }
            }
        }
        Self { tree, ids }
    }
}
impl PartialEq for LayerTree {
    fn eq(&self, other: &Self) -> bool {
        self.shape() == other.shape()
    }
}
impl std::fmt::Debug for LayerTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.shape()).finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn id(s: &str) -> ElementId {
        ElementId::new(s).unwrap()
    }
    fn path(segments: &[&str]) -> LayerPath {
        LayerPath::parse(segments).unwrap()
    }
    fn top_level(tree: &LayerTree) -> Vec<&str> {
        tree.iter_top_level().map(ElementId::as_str).collect()
    }

    #[test]
    fn insert_and_resolve() {
        let mut tree = LayerTree::default();
        tree.insert(&LayerPath::root(), id("b"), Placement::Append)
            .unwrap();
        tree.insert(&LayerPath::root(), id("a"), Placement::Index(0))
            .unwrap();
        tree.insert(&LayerPath::root(), id("c"), Placement::Index(99))
            .unwrap();
        tree.insert(&path(&["a"]), id("a1"), Placement::Append)
            .unwrap();

        assert_eq!(top_level(&tree), ["a", "b", "c"]);
        assert_eq!(tree.path_of(&id("a1")), Some(path(&["a", "a1"])));
        assert_eq!(tree.location_of(&id("c")), Some((LayerPath::root(), 2)));
        // Right ids, wrong chain.
        assert!(!tree.exists(&path(&["b", "a1"])));
        assert_eq!(
            tree.insert(&LayerPath::root(), id("a1"), Placement::Append),
            Err(TreeError::DuplicateId(id("a1")))
        );
        let pre_order: Vec<_> = tree.iter().map(ElementId::as_str).collect();
        assert_eq!(pre_order, ["a", "a1", "b", "c"]);
    }
    #[test]
    fn detach_and_attach() {
        let mut tree = LayerTree::default();
        for top in ["a", "b", "c"] {
            tree.insert(&LayerPath::root(), id(top), Placement::Append)
                .unwrap();
        }
        tree.insert(&path(&["b"]), id("b1"), Placement::Append)
            .unwrap();
        let before = tree.shape();

        let shape = tree.detach(&path(&["b"])).unwrap();
        assert_eq!(shape.ids().map(ElementId::as_str).collect::<Vec<_>>(), ["b", "b1"]);
        assert_eq!(top_level(&tree), ["a", "c"]);
        assert!(!tree.contains(&id("b1")));

        tree.attach(&LayerPath::root(), &shape, Placement::Index(1))
            .unwrap();
        assert_eq!(tree.shape(), before);
    }
    #[test]
    fn relocate_rejects_cycles() {
        let mut tree = LayerTree::default();
        tree.insert(&LayerPath::root(), id("a"), Placement::Append)
            .unwrap();
        tree.insert(&path(&["a"]), id("b"), Placement::Append)
            .unwrap();
        let before = tree.shape();
        assert_eq!(
            tree.relocate(&path(&["a"]), &path(&["a", "b"]), Placement::Append),
            Err(TreeError::WouldCycle)
        );
        assert_eq!(
            tree.relocate(&path(&["a"]), &path(&["a"]), Placement::Append),
            Err(TreeError::WouldCycle)
        );
        assert_eq!(tree.shape(), before);
    }
    #[test]
    fn relocate_over_reorders() {
        let mut tree = LayerTree::default();
        for top in ["a", "b", "c"] {
            tree.insert(&LayerPath::root(), id(top), Placement::Append)
                .unwrap();
        }
        tree.relocate_over(&path(&["c"]), &path(&["a"])).unwrap();
        assert_eq!(top_level(&tree), ["a", "c", "b"]);
        tree.relocate_over(&path(&["a"]), &path(&["b"])).unwrap();
        assert_eq!(top_level(&tree), ["c", "b", "a"]);
    }
    #[test]
    fn clone_keeps_index() {
        let mut tree = LayerTree::default();
        tree.insert(&LayerPath::root(), id("soup"), Placement::Append)
            .unwrap();
        let mut clone = tree.clone();
        assert_eq!(clone, tree);
        clone
            .insert(&path(&["soup"]), id("noodle"), Placement::Append)
            .unwrap();
        assert_eq!(clone.path_of(&id("noodle")), Some(path(&["soup", "noodle"])));
        assert!(!tree.contains(&id("noodle")));
    }
}
