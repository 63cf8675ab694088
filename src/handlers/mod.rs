//! HTTP handlers for resource CRUD and association reads/attaches.

pub mod association;
pub mod resource;
pub use association::*;
pub use resource::*;
