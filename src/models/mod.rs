//! # Data Models
//!
//! SeaORM entities for the pipes tables.

pub mod authorization;
pub mod id_mapping;
pub mod import;
pub mod pipe;
pub mod pipe_status;
pub mod queued_pipe;

pub use authorization::Entity as Authorization;
pub use id_mapping::Entity as IdMapping;
pub use import::Entity as Import;
pub use pipe::Entity as Pipe;
pub use pipe_status::Entity as PipeStatus;
pub use queued_pipe::Entity as QueuedPipe;
