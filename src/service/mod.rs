//! Write pipeline: index resolution, soft-delete reconciliation, conflict translation,
//! write orchestration, and find-or-create partitioning.

pub mod conflict;
pub mod identity;
pub mod paranoid;
pub mod partition;
mod validation;
mod writer;

pub use partition::{partition, Partition};
pub use validation::RequestValidator;
pub use writer::{WriteOutcome, WriteService};
