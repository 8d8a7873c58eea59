//! User-global settings, shared by every session.

pub mod preferences;
