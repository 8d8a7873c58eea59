//! # IDs
//! Two kinds of identifiers live here:
//!
//! * [`FuzzID<T>`], a process-unique numeric id namespaced by the type `T`. Used for things that
//!   never leave the process, like history entries, documents, and render jobs.
//! * [`ElementId`], the stable string id of a visual element. Callers may pick these themselves
//!   (`"canvas-1"`) or generate one with [`ElementId::generate`].

use std::sync::atomic::{AtomicU64, Ordering};

// Next available id, by namespace type.
static ID_SERVER: parking_lot::RwLock<std::collections::BTreeMap<std::any::TypeId, AtomicU64>> =
    parking_lot::const_rwlock(std::collections::BTreeMap::new());

/// ID that is guarunteed unique within this execution of the program.
/// IDs with different types may share a value but should not be considered equal.
pub struct FuzzID<T: std::any::Any> {
    id: std::num::NonZeroU64,
    _phantom: std::marker::PhantomData<fn() -> T>,
}
impl<T: std::any::Any> Clone for FuzzID<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T: std::any::Any> Copy for FuzzID<T> {}
impl<T: std::any::Any> PartialEq for FuzzID<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl<T: std::any::Any> Eq for FuzzID<T> {}
impl<T: std::any::Any> std::hash::Hash for FuzzID<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
impl<T: std::any::Any> PartialOrd for FuzzID<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<T: std::any::Any> Ord for FuzzID<T> {
    /// Ids of one namespace are handed out in increasing order, so this orders by allocation.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl<T: std::any::Any> FuzzID<T> {
    /// Get the raw numeric value of this ID.
    /// IDs from differing namespaces may share the same numeric ID!
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id.get()
    }
    fn next() -> Self {
        let ty = std::any::TypeId::of::<T>();
        let fetched = {
            let read = ID_SERVER.upgradable_read();
            if let Some(counter) = read.get(&ty) {
                counter.fetch_add(1, Ordering::Relaxed)
            } else {
                // First id of this namespace. Rare, so upgrade to exclusive access here.
                let mut write = parking_lot::RwLockUpgradableReadGuard::upgrade(read);
                write
                    .entry(ty)
                    .or_insert_with(|| AtomicU64::new(1))
                    .fetch_add(1, Ordering::Relaxed)
            }
        };
        let Some(id) = std::num::NonZeroU64::new(fetched) else {
            // Wrapped all the way around. Nothing sane left to hand out.
            log::error!("{} ID overflow!", std::any::type_name::<T>());
            panic!("{} ID overflow!", std::any::type_name::<T>());
        };
        Self {
            id,
            _phantom: std::marker::PhantomData,
        }
    }
}
impl<T: std::any::Any> Default for FuzzID<T> {
    fn default() -> Self {
        Self::next()
    }
}
impl<T: std::any::Any> std::fmt::Display for FuzzID<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // rsplit always yields at least one element.
        write!(
            f,
            "{}#{}",
            std::any::type_name::<T>()
                .rsplit("::")
                .next()
                .unwrap_or_default(),
            self.id
        )
    }
}
impl<T: std::any::Any> std::fmt::Debug for FuzzID<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        <Self as std::fmt::Display>::fmt(self, f)
    }
}

/// The placeholder marker used as the final segment of a move destination.
/// It is never a valid element id.
pub const PLACEHOLDER_MARKER: &str = "PLACE_IT";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ElementIdError {
    #[error("element id is empty")]
    Empty,
    #[error("{PLACEHOLDER_MARKER:?} is reserved")]
    Reserved,
}

/// Stable id of a visual element. Cheap to clone.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ElementId(std::sync::Arc<str>);
impl ElementId {
    pub fn new(id: impl AsRef<str>) -> Result<Self, ElementIdError> {
        let id = id.as_ref();
        if id.is_empty() {
            Err(ElementIdError::Empty)
        } else if id == PLACEHOLDER_MARKER {
            Err(ElementIdError::Reserved)
        } else {
            Ok(Self(id.into()))
        }
    }
    /// A fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string().into())
    }
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl TryFrom<String> for ElementId {
    type Error = ElementIdError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}
impl TryFrom<&str> for ElementId {
    type Error = ElementIdError;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}
impl From<ElementId> for String {
    fn from(value: ElementId) -> Self {
        value.0.as_ref().to_owned()
    }
}
impl AsRef<str> for ElementId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
impl std::borrow::Borrow<str> for ElementId {
    fn borrow(&self) -> &str {
        &self.0
    }
}
impl std::fmt::Display for ElementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
impl std::fmt::Debug for ElementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

#[cfg(test)]
mod test {
    use super::{ElementId, ElementIdError, FuzzID};

    // Tests run in one process sharing the id server, so each uses its own namespace.
    #[test]
    fn ids_unique_and_ordered() {
        struct Namespace;
        type TestID = FuzzID<Namespace>;

        let ids: Vec<TestID> = (0..256).map(|_| TestID::default()).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), ids.len(), "had duplicate ids");
        assert_eq!(sorted, ids);
    }
    #[test]
    fn display_names_namespace() {
        struct Soup;
        let id = FuzzID::<Soup>::default();
        assert_eq!(id.to_string(), format!("Soup#{}", id.id()));
    }
    #[test]
    fn element_id_rejects_reserved() {
        assert_eq!(ElementId::new(""), Err(ElementIdError::Empty));
        assert_eq!(ElementId::new("PLACE_IT"), Err(ElementIdError::Reserved));
        assert_eq!(ElementId::new("canvas-1").unwrap().as_str(), "canvas-1");
        assert_ne!(ElementId::generate(), ElementId::generate());
    }
}
