//! SQLite persistence for strand
//!
//! Implements the narrow repository traits the engine and the connection
//! manager consume: runs and their node records, workflow definitions
//! (stored verbatim as JSON), and registered tool servers (with the
//! transport serialized as a tagged union).

mod db;
mod error;
mod run_repository;
mod server_repository;
mod workflow_repository;

pub use db::{Database, DatabasePool};
pub use error::{Result, StoreError};
pub use run_repository::RunRepository;
pub use server_repository::ServerRepository;
pub use workflow_repository::WorkflowRepository;
