//! # Repository Layer
//!
//! SeaORM access for the pipes tables. Every method is scoped by workspace
//! except the autosync and queue scans.

pub mod authorization;
pub mod id_mapping;
pub mod import;
pub mod pipe;
pub mod queue;

pub use authorization::{AuthorizationRepository, AuthorizationStoreError};
pub use id_mapping::IdMappingRepository;
pub use import::ImportRepository;
pub use pipe::PipeRepository;
pub use queue::{PRIORITY_HIGH, PRIORITY_NORMAL, QueueRepository, QueuedRun};
