//! Application services layer: store contracts and the fallback engine.

pub mod error;
pub mod fallback;
pub mod store;
