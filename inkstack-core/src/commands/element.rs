//! Commands editing a single element in place: its properties, its filters, its pixels.

use super::{out_of_order, Command, CommandError};
use crate::{
    blend::Blend,
    id::ElementId,
    state::{
        element::{Bitmap, FilterEntry, FilterSetting},
        Document, ElementKind, InvalidMutation, VisualElement,
    },
};

/// Where a swapping command currently stands. Each successful operation flips between
/// `Applied` and `Undone`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum SwapState {
    Pending,
    Applied,
    Undone,
    Disposed,
}
impl SwapState {
    /// Check `operation` is allowed from this state.
    fn check(self, command: &dyn Command, operation: &'static str) -> Result<(), CommandError> {
        let allowed = match (self, operation) {
            (Self::Disposed, _) => return Err(CommandError::Disposed),
            (Self::Pending, "apply") | (Self::Applied, "undo") | (Self::Undone, "redo") => true,
            _ => false,
        };
        if allowed {
            Ok(())
        } else {
            Err(out_of_order(command, operation))
        }
    }
    fn flipped(self) -> Self {
        match self {
            Self::Pending | Self::Undone => Self::Applied,
            Self::Applied => Self::Undone,
            Self::Disposed => Self::Disposed,
        }
    }
}

fn element_mut<'a>(
    document: &'a mut Document,
    target: &ElementId,
) -> Result<&'a mut VisualElement, CommandError> {
    document
        .element_mut(target)
        .ok_or_else(|| InvalidMutation::UnknownElement(target.clone()).into())
}

/// Property changes for an element. `None` fields are left alone.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct ElementPatch {
    pub name: Option<String>,
    pub visible: Option<bool>,
    pub blend: Option<Blend>,
}
impl ElementPatch {
    /// Write the patch into `element`, returning the patch that reverses it.
    fn apply_to(self, element: &mut VisualElement) -> Self {
        Self {
            name: self
                .name
                .map(|name| std::mem::replace(&mut element.name, name)),
            visible: self
                .visible
                .map(|visible| std::mem::replace(&mut element.visible, visible)),
            blend: self
                .blend
                .map(|blend| std::mem::replace(&mut element.blend, blend)),
        }
    }
}

/// Change an element's name, visibility, or blend.
pub struct UpdateElement {
    target: [ElementId; 1],
    /// The patch to write next. After each write this holds its inverse.
    patch: ElementPatch,
    state: SwapState,
}
impl UpdateElement {
    #[must_use]
    pub fn new(target: ElementId, patch: ElementPatch) -> Self {
        Self {
            target: [target],
            patch,
            state: SwapState::Pending,
        }
    }
    fn swap(&mut self, document: &mut Document, operation: &'static str) -> Result<(), CommandError> {
        self.state.check(&*self, operation)?;
        let element = element_mut(document, &self.target[0])?;
        self.patch = std::mem::take(&mut self.patch).apply_to(element);
        self.state = self.state.flipped();
        Ok(())
    }
}
#[async_trait::async_trait]
impl Command for UpdateElement {
    fn name(&self) -> &str {
        "Update Element"
    }
    async fn apply(&mut self, document: &mut Document) -> Result<(), CommandError> {
        self.swap(document, "apply")
    }
    async fn undo(&mut self, document: &mut Document) -> Result<(), CommandError> {
        self.swap(document, "undo")
    }
    async fn redo(&mut self, document: &mut Document) -> Result<(), CommandError> {
        self.swap(document, "redo")
    }
    fn effected_element_ids(&self) -> &[ElementId] {
        &self.target
    }
    fn dispose(&mut self) {
        self.state = SwapState::Disposed;
        self.patch = ElementPatch::default();
    }
}

/// An edit to an element's filter stack.
#[derive(Clone, PartialEq, Debug)]
pub enum FilterChange {
    /// Insert a filter at `index`, or at the end of the stack if `None` or out of range.
    Attach {
        filter: FilterEntry,
        index: Option<usize>,
    },
    Detach { uid: ElementId },
    SetEnabled { uid: ElementId, enabled: bool },
    /// Clamped into `[0, 1]`.
    SetOpacity { uid: ElementId, opacity: f32 },
    /// Set one setting, or remove it when `value` is `None`.
    SetSetting {
        uid: ElementId,
        key: String,
        value: Option<FilterSetting>,
    },
}
impl FilterChange {
    /// Apply to `element`, returning the change that reverses it. On error the element is
    /// untouched.
    fn apply_to(self, element: &mut VisualElement) -> Result<Self, InvalidMutation> {
        let element_id = element.id.clone();
        let unknown = |uid: &ElementId| InvalidMutation::UnknownFilter {
            element: element_id.clone(),
            filter: uid.clone(),
        };
        match self {
            Self::Attach { filter, index } => {
                if element.filter(&filter.uid).is_some() {
                    return Err(InvalidMutation::DuplicateFilter(filter.uid));
                }
                let uid = filter.uid.clone();
                let len = element.filters.len();
                element
                    .filters
                    .insert(index.unwrap_or(len).min(len), filter);
                Ok(Self::Detach { uid })
            }
            Self::Detach { uid } => {
                let Some(index) = element.filters.iter().position(|filter| filter.uid == uid) else {
                    return Err(unknown(&uid));
                };
                let filter = element.filters.remove(index);
                Ok(Self::Attach {
                    filter,
                    index: Some(index),
                })
            }
            Self::SetEnabled { uid, enabled } => {
                let Some(filter) = element.filter_mut(&uid) else {
                    return Err(unknown(&uid));
                };
                let enabled = std::mem::replace(&mut filter.enabled, enabled);
                Ok(Self::SetEnabled { uid, enabled })
            }
            Self::SetOpacity { uid, opacity } => {
                let Some(filter) = element.filter_mut(&uid) else {
                    return Err(unknown(&uid));
                };
                let opacity = if opacity.is_nan() {
                    0.0
                } else {
                    opacity.clamp(0.0, 1.0)
                };
                let opacity = std::mem::replace(&mut filter.opacity, opacity);
                Ok(Self::SetOpacity { uid, opacity })
            }
            Self::SetSetting { uid, key, value } => {
                let Some(filter) = element.filter_mut(&uid) else {
                    return Err(unknown(&uid));
                };
                let value = match value {
                    Some(value) => filter.settings.insert(key.clone(), value),
                    None => filter.settings.remove(&key),
                };
                Ok(Self::SetSetting { uid, key, value })
            }
        }
    }
}

/// Edit the filter stack of an element.
pub struct PatchFilter {
    name: &'static str,
    target: [ElementId; 1],
    /// The change to make next. After each change this holds its inverse.
    change: Option<FilterChange>,
    state: SwapState,
}
impl PatchFilter {
    #[must_use]
    pub fn new(target: ElementId, change: FilterChange) -> Self {
        let name = match &change {
            FilterChange::Attach { .. } => "Add Filter",
            FilterChange::Detach { .. } => "Remove Filter",
            _ => "Edit Filter",
        };
        Self {
            name,
            target: [target],
            change: Some(change),
            state: SwapState::Pending,
        }
    }
    fn swap(&mut self, document: &mut Document, operation: &'static str) -> Result<(), CommandError> {
        self.state.check(&*self, operation)?;
        let Some(change) = self.change.take() else {
            return Err(out_of_order(&*self, operation));
        };
        let element = match element_mut(document, &self.target[0]) {
            Ok(element) => element,
            Err(err) => {
                self.change = Some(change);
                return Err(err);
            }
        };
        // apply_to consumes the change, keep a copy to restore on failure.
        match change.clone().apply_to(element) {
            Ok(inverse) => {
                self.change = Some(inverse);
                self.state = self.state.flipped();
                Ok(())
            }
            Err(err) => {
                self.change = Some(change);
                Err(err.into())
            }
        }
    }
}
#[async_trait::async_trait]
impl Command for PatchFilter {
    fn name(&self) -> &str {
        self.name
    }
    async fn apply(&mut self, document: &mut Document) -> Result<(), CommandError> {
        self.swap(document, "apply")
    }
    async fn undo(&mut self, document: &mut Document) -> Result<(), CommandError> {
        self.swap(document, "undo")
    }
    async fn redo(&mut self, document: &mut Document) -> Result<(), CommandError> {
        self.swap(document, "redo")
    }
    fn effected_element_ids(&self) -> &[ElementId] {
        &self.target
    }
    fn dispose(&mut self) {
        self.state = SwapState::Disposed;
        self.change = None;
    }
}

type BitmapFuture =
    std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<Bitmap>> + Send>>;

/// Swap the pixels of a raster canvas.
///
/// The new pixels may still be loading or decoding when the command is created, see
/// [`ReplaceBitmap::from_future`]. After the first apply the command holds whichever buffer is
/// not in the document, so undo and redo are both a swap.
pub struct ReplaceBitmap {
    target: [ElementId; 1],
    held: Option<Bitmap>,
    // Mutex is only here to make the command Sync, it's only ever accessed through `&mut self`.
    loading: parking_lot::Mutex<Option<BitmapFuture>>,
    state: SwapState,
}
impl ReplaceBitmap {
    #[must_use]
    pub fn new(target: ElementId, bitmap: Bitmap) -> Self {
        Self {
            target: [target],
            held: Some(bitmap),
            loading: parking_lot::Mutex::new(None),
            state: SwapState::Pending,
        }
    }
    /// Replace with the bitmap `future` resolves to. It is awaited on first apply, and an error
    /// from it fails that apply with [`CommandError::Preparation`].
    pub fn from_future<F>(target: ElementId, future: F) -> Self
    where
        F: std::future::Future<Output = anyhow::Result<Bitmap>> + Send + 'static,
    {
        Self {
            target: [target],
            held: None,
            loading: parking_lot::Mutex::new(Some(Box::pin(future))),
            state: SwapState::Pending,
        }
    }
    fn canvas_bitmap<'a>(
        document: &'a mut Document,
        target: &ElementId,
    ) -> Result<&'a mut Bitmap, CommandError> {
        match &mut element_mut(document, target)?.kind {
            ElementKind::Canvas { bitmap } => Ok(bitmap),
            _ => Err(InvalidMutation::NotACanvas(target.clone()).into()),
        }
    }
    fn swap(&mut self, document: &mut Document) -> Result<(), CommandError> {
        if self.held.is_none() {
            return Err(out_of_order(&*self, "swap"));
        }
        let bitmap = Self::canvas_bitmap(document, &self.target[0])?;
        if let Some(held) = self.held.as_mut() {
            std::mem::swap(bitmap, held);
        }
        self.state = self.state.flipped();
        Ok(())
    }
}
#[async_trait::async_trait]
impl Command for ReplaceBitmap {
    fn name(&self) -> &str {
        "Replace Bitmap"
    }
    async fn apply(&mut self, document: &mut Document) -> Result<(), CommandError> {
        self.state.check(&*self, "apply")?;
        // Fail before waiting on a load that could never be used.
        Self::canvas_bitmap(document, &self.target[0])?;
        if self.held.is_none() {
            let Some(loading) = self.loading.get_mut().take() else {
                return Err(out_of_order(&*self, "apply"));
            };
            let bitmap = loading.await.map_err(CommandError::Preparation)?;
            log::trace!(
                "loaded {}x{} bitmap for {}",
                bitmap.width,
                bitmap.height,
                self.target[0]
            );
            self.held = Some(bitmap);
        }
        self.swap(document)
    }
    async fn undo(&mut self, document: &mut Document) -> Result<(), CommandError> {
        self.state.check(&*self, "undo")?;
        self.swap(document)
    }
    async fn redo(&mut self, document: &mut Document) -> Result<(), CommandError> {
        self.state.check(&*self, "redo")?;
        self.swap(document)
    }
    fn effected_element_ids(&self) -> &[ElementId] {
        &self.target
    }
    fn dispose(&mut self) {
        self.state = SwapState::Disposed;
        self.held = None;
        *self.loading.get_mut() = None;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::blend::BlendMode;
    use crate::commands::test::round_trip;
    use crate::state::document::test::{grouped_document, id};

    #[tokio::test]
    async fn update_round_trip() {
        let mut document = grouped_document();
        let mut update = UpdateElement::new(
            id("canvas-1"),
            ElementPatch {
                name: Some("Sketch".to_owned()),
                visible: Some(false),
                blend: Some(Blend {
                    mode: BlendMode::Multiply,
                    ..Blend::default()
                }),
            },
        );
        round_trip(&mut update, &mut document).await;
        let canvas = document.element(&id("canvas-1")).unwrap();
        assert_eq!(canvas.name, "Sketch");
        assert!(!canvas.visible);
        assert_eq!(canvas.blend.mode, BlendMode::Multiply);
    }
    #[tokio::test]
    async fn update_unknown_element() {
        let mut document = grouped_document();
        let mut update = UpdateElement::new(id("nope"), ElementPatch::default());
        let err = update.apply(&mut document).await.unwrap_err();
        assert!(matches!(
            err,
            CommandError::Invalid(InvalidMutation::UnknownElement(_))
        ));
    }
    #[tokio::test]
    async fn filter_attach_detach() {
        let mut document = grouped_document();
        let blur = FilterEntry::new("@inkstack/gauss-blur");
        let uid = blur.uid.clone();
        let mut attach = PatchFilter::new(
            id("group-1"),
            FilterChange::Attach {
                filter: blur,
                index: None,
            },
        );
        round_trip(&mut attach, &mut document).await;

        let mut detach = PatchFilter::new(id("group-1"), FilterChange::Detach { uid: uid.clone() });
        assert_eq!(detach.name(), "Remove Filter");
        round_trip(&mut detach, &mut document).await;
        assert!(document.element(&id("group-1")).unwrap().filter(&uid).is_none());
    }
    #[tokio::test]
    async fn filter_settings() {
        let mut document = grouped_document();
        let blur = FilterEntry::new("@inkstack/gauss-blur");
        let uid = blur.uid.clone();
        document
            .element_mut(&id("canvas-1"))
            .unwrap()
            .filters
            .push(blur);

        let mut set = PatchFilter::new(
            id("canvas-1"),
            FilterChange::SetSetting {
                uid: uid.clone(),
                key: "radius".to_owned(),
                value: Some(FilterSetting::Number(4.0)),
            },
        );
        round_trip(&mut set, &mut document).await;
        let mut fade = PatchFilter::new(
            id("canvas-1"),
            FilterChange::SetOpacity {
                uid: uid.clone(),
                opacity: 7.0,
            },
        );
        round_trip(&mut fade, &mut document).await;

        let filter = document.element(&id("canvas-1")).unwrap().filter(&uid).unwrap();
        assert_eq!(filter.settings["radius"], FilterSetting::Number(4.0));
        assert_eq!(filter.opacity, 1.0);
    }
    #[tokio::test]
    async fn filter_unknown_uid() {
        let mut document = grouped_document();
        let mut toggle = PatchFilter::new(
            id("canvas-1"),
            FilterChange::SetEnabled {
                uid: id("missing"),
                enabled: false,
            },
        );
        let err = toggle.apply(&mut document).await.unwrap_err();
        assert!(matches!(
            err,
            CommandError::Invalid(InvalidMutation::UnknownFilter { .. })
        ));
        // Still pending, a retry fails the same way rather than out of order.
        assert!(toggle.apply(&mut document).await.unwrap_err().is_user_error());
    }
    #[tokio::test]
    async fn bitmap_swap() {
        let mut document = grouped_document();
        let red = Bitmap::from_rgba8(1, 1, vec![255, 0, 0, 255]).unwrap();
        let mut replace = ReplaceBitmap::new(id("canvas-1"), red.clone());
        round_trip(&mut replace, &mut document).await;
        let ElementKind::Canvas { bitmap } = &document.element(&id("canvas-1")).unwrap().kind
        else {
            panic!("canvas-1 is not a canvas");
        };
        assert_eq!(*bitmap, red);
    }
    #[tokio::test]
    async fn bitmap_from_future() {
        let mut document = grouped_document();
        let mut replace = ReplaceBitmap::from_future(id("canvas-1"), async {
            tokio::task::yield_now().await;
            Ok::<_, anyhow::Error>(Bitmap::transparent(2, 2))
        });
        round_trip(&mut replace, &mut document).await;

        let before = document.clone();
        let mut failing = ReplaceBitmap::from_future(id("canvas-1"), async {
            Err::<Bitmap, _>(anyhow::anyhow!("decode failed"))
        });
        let err = failing.apply(&mut document).await.unwrap_err();
        assert!(matches!(err, CommandError::Preparation(_)));
        assert_eq!(document, before);
    }
    #[tokio::test]
    async fn bitmap_needs_canvas() {
        let mut document = grouped_document();
        let mut replace = ReplaceBitmap::new(id("group-1"), Bitmap::transparent(1, 1));
        let err = replace.apply(&mut document).await.unwrap_err();
        assert!(matches!(
            err,
            CommandError::Invalid(InvalidMutation::NotACanvas(_))
        ));
    }
}
