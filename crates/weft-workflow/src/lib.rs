//! Weft Workflow
//!
//! Validates a [`WorkflowDefinition`](weft_config::WorkflowDefinition) into a
//! [`Graph`]: the form the executor schedules against.
//!
//! Validation is a pure function of the definition:
//! - Node ids are unique and every edge references existing nodes
//! - The edges form a DAG (cycles are reported with their path)
//! - Entry points (nodes without incoming edges) satisfy the trigger policy
//! - The topological order is deterministic, ties broken by node array order

mod error;
mod graph;

pub use error::DefinitionError;
pub use graph::Graph;
