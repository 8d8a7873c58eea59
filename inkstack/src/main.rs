#![warn(clippy::pedantic)]

use inkstack::{
    global::preferences::Preferences,
    renderer::{RenderScope, SummaryRenderer},
    EditorSession,
};
use inkstack_core::{
    commands::{AddLayer, CommandGroup, ElementPatch, MoveLayer, ReplaceBitmap, UpdateElement},
    id::ElementId,
    state::{
        element::{Bitmap, PathPoint, VectorPath},
        CanvasSize, Document, LayerPath, MoveDestination, VisualElement,
    },
};
use std::sync::Arc;

use anyhow::Result as AnyResult;

/// Stand-in for decoding an image file off the main task.
async fn decode_checkerboard(size: u32) -> AnyResult<Bitmap> {
    tokio::task::yield_now().await;
    let pixels = (0..size * size)
        .flat_map(|idx| {
            let light = ((idx % size) + (idx / size)) % 2 == 0;
            let value = if light { 0xEE } else { 0x33 };
            [value, value, value, 0xFF]
        })
        .collect();
    Ok(Bitmap::from_rgba8(size, size, pixels)?)
}

/// Drive a scripted editing session against the logging renderer.
async fn run_demo(preferences: Preferences, runtime: tokio::runtime::Handle) -> AnyResult<()> {
    let document = Document::new("Untitled", CanvasSize::new(1080, 1080)?);
    let session = EditorSession::new(document, Arc::new(SummaryRenderer), &preferences, runtime);

    let mut events = session.scheduler().subscribe();
    let event_logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log::debug!("{event:?}"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(num)) => {
                    log::warn!("Lost {num} scheduler events!");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    });

    let background = ElementId::new("background")?;
    let shapes = ElementId::new("shapes")?;
    let triangle = ElementId::new("triangle")?;

    session
        .perform(Box::new(AddLayer::new(
            VisualElement::canvas(background.clone(), 1080, 1080).named("Background"),
            LayerPath::root(),
            -1,
        )))
        .await?;
    let path = VectorPath {
        points: [[0.0, 0.0], [100.0, 0.0], [50.0, 80.0]]
            .into_iter()
            .map(|position| PathPoint {
                position,
                in_handle: None,
                out_handle: None,
            })
            .collect(),
        closed: true,
    };
    session
        .perform(Box::new(CommandGroup::new(
            "Add Shapes",
            vec![
                Box::new(AddLayer::new(
                    VisualElement::group(shapes.clone()).named("Shapes"),
                    LayerPath::root(),
                    -1,
                )),
                Box::new(AddLayer::new(
                    VisualElement::vector_object(triangle.clone(), path).named("Triangle"),
                    LayerPath::new([shapes.clone()]),
                    -1,
                )),
            ],
        )))
        .await?;
    session
        .perform(Box::new(ReplaceBitmap::from_future(
            background.clone(),
            decode_checkerboard(8),
        )))
        .await?;

    // Dragging the shapes below the background shows previews along the way.
    for _ in 0..3 {
        let _ = session.request_preview(RenderScope::Elements(vec![shapes.clone()].into()))?;
        tokio::task::yield_now().await;
    }
    session
        .perform(Box::new(MoveLayer::new(
            LayerPath::new([shapes.clone()]),
            MoveDestination::Into {
                container: LayerPath::root(),
                index: Some(0),
            },
        )))
        .await?;

    // Not a container, so this is refused and nothing changes.
    let refused = session
        .perform(Box::new(MoveLayer::new(
            LayerPath::new([shapes.clone()]),
            MoveDestination::Into {
                container: LayerPath::new([background.clone()]),
                index: None,
            },
        )))
        .await;
    if let Err(e) = refused {
        log::info!("Move refused as expected: {e}");
    }

    session
        .perform(Box::new(UpdateElement::new(
            triangle.clone(),
            ElementPatch {
                visible: Some(false),
                ..ElementPatch::default()
            },
        )))
        .await?;
    session.undo().await?;
    session.undo().await?;
    session.redo().await?;

    let settled = session.request_idle(RenderScope::Everything)?.outcome().await;
    log::info!("Final idle render: {settled:?}");
    let summary = session
        .history()
        .inspect(|document| format!("{document:?}"))
        .await?;
    log::info!("Document after session: {summary}");
    log::info!(
        "{} commands to undo, {} to redo",
        session.history().undo_len().await?,
        session.history().redo_len().await?
    );

    session.dispose().await;
    event_logger.abort();
    Ok(())
}

fn main() -> AnyResult<()> {
    let has_term = std::io::IsTerminal::is_terminal(&std::io::stdin());
    // Log to a terminal, if available. Else, log to "log.out" in the working directory.
    if has_term {
        env_logger::builder()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        let _ = simple_logging::log_to_file("log.out", log::LevelFilter::Debug);
    }

    let preferences = Preferences::load();
    if let Err(e) = preferences.save() {
        log::warn!("Failed to save preferences:\n{e:?}");
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(run_demo(preferences, runtime.handle().clone()));
    if let Err(e) = &result {
        log::error!("Session exited with err:\n{e:?}");
    }
    result
}
