//! Shared type infrastructure: binary encoding traits and common aliases.

pub mod encoding;
pub mod wrapper_types;
