//! Builders that assemble the engine from configuration and collaborators.

pub mod orchestrator_builder;

pub use orchestrator_builder::OrchestratorBuilder;
