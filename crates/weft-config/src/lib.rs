//! Weft Config
//!
//! This crate contains the serializable workflow definition types for weft.
//! A definition is authored once (JSON or TOML), saved, and then snapshotted
//! into every instance created from it.
//!
//! Definitions can be loaded from:
//! - JSON files (via CLI with `weft run workflow.json`)
//! - Storage (as JSON blobs, see `weft-store`)
//!
//! The engine validates a definition into a graph (`weft-workflow`) and
//! resolves every node `type` against the component registry before running it.

mod definition;
mod edge;
mod node;
mod retry;

pub use definition::{TriggerPolicy, WorkflowDefinition};
pub use edge::Edge;
pub use node::NodeDef;
pub use retry::RetryPolicy;
