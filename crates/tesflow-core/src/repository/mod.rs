//! Repository trait definitions (ports).
//!
//! The infrastructure layer (tesflow-infra) implements these traits; the
//! core crate never depends on a specific storage technology.

pub mod memory;
pub mod run_state;

pub use memory::InMemoryRunStore;
pub use run_state::RunStateRepository;
