#![warn(clippy::pedantic)]

pub mod global;
pub mod renderer;
pub mod session;

pub use session::EditorSession;
