pub mod blend;
pub mod commands;
pub mod history;
pub mod id;
pub mod mutex;
pub mod state;

pub use id::FuzzID;
