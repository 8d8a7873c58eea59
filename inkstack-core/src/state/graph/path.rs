use crate::id::{ElementId, ElementIdError, PLACEHOLDER_MARKER};

/// Address of a layer node, as the ids of each node on the way down from (but excluding) the root.
/// The empty path is the root itself.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct LayerPath(smallvec::SmallVec<[ElementId; 4]>);
impl LayerPath {
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }
    pub fn new(ids: impl IntoIterator<Item = ElementId>) -> Self {
        Self(ids.into_iter().collect())
    }
    /// Parse string segments. Fails on empty or reserved ids, including the placeholder marker.
    pub fn parse<S: AsRef<str>>(segments: &[S]) -> Result<Self, ElementIdError> {
        segments
            .iter()
            .map(|segment| ElementId::new(segment))
            .collect::<Result<_, _>>()
            .map(Self)
    }
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    /// The id of the addressed node, or `None` for the root.
    #[must_use]
    pub fn target(&self) -> Option<&ElementId> {
        self.0.last()
    }
    /// Path of the parent, or `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        let (_, parent) = self.0.split_last()?;
        Some(Self(parent.iter().cloned().collect()))
    }
    #[must_use]
    pub fn join(&self, id: ElementId) -> Self {
        let mut joined = self.clone();
        joined.0.push(id);
        joined
    }
    pub fn iter(&self) -> impl Iterator<Item = &ElementId> + '_ {
        self.0.iter()
    }
}
impl FromIterator<ElementId> for LayerPath {
    fn from_iter<I: IntoIterator<Item = ElementId>>(iter: I) -> Self {
        Self::new(iter)
    }
}
impl std::fmt::Display for LayerPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("/")?;
        for (idx, id) in self.0.iter().enumerate() {
            if idx != 0 {
                f.write_str("/")?;
            }
            f.write_str(id.as_str())?;
        }
        Ok(())
    }
}
impl std::fmt::Debug for LayerPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LayerPath({self})")
    }
}

/// Where a moved subtree lands.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum MoveDestination {
    /// Directly after (visually above) the target node, among the target's siblings.
    Over(LayerPath),
    /// As a child of the container. `None` appends, `Some(n)` places it at the placeholder's
    /// position `n`; too large of an index is clamped to the end.
    Into {
        container: LayerPath,
        index: Option<usize>,
    },
}
impl MoveDestination {
    /// Parse a destination written as id segments, where a trailing [`PLACEHOLDER_MARKER`]
    /// means "into the node before it" rather than "over it".
    ///
    /// `["group-2", "PLACE_IT"]` is `Into { container: /group-2, index: None }`,
    /// `["group-2"]` is `Over(/group-2)`.
    pub fn parse<S: AsRef<str>>(segments: &[S]) -> Result<Self, ElementIdError> {
        match segments.split_last() {
            None => Ok(Self::Into {
                container: LayerPath::root(),
                index: None,
            }),
            Some((last, rest)) if last.as_ref() == PLACEHOLDER_MARKER => Ok(Self::Into {
                container: LayerPath::parse(rest)?,
                index: None,
            }),
            Some(_) => LayerPath::parse(segments).map(Self::Over),
        }
    }
}
