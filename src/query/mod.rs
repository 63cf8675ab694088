//! Read-side query model and association rewriting.

mod filter;
mod find;
pub mod association;

pub use association::{for_belongs_to_many, for_has_many, rewrite};
pub use filter::Filter;
pub use find::{FindQuery, Include, OrderBy, ThroughOptions};
