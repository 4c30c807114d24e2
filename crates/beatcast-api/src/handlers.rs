//! Request handlers.

pub mod exports;
pub mod health;
pub mod render;

pub use exports::*;
pub use health::*;
pub use render::*;
