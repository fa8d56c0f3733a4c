//! Weft Component
//!
//! The contract between the engine and step implementations.
//!
//! - [`Component`]: the unit of work. `execute` never fails at the Rust level;
//!   every failure is returned as data inside a [`ComponentResult`].
//! - [`ExecutionContext`]: the per-step input, built fresh for every attempt.
//! - [`ComponentRegistry`]: an immutable map from node type to component
//!   factory, built once at startup through [`RegistryBuilder`].
//!
//! Components may be invoked more than once for the same node (retries), so
//! implementations must be safe to re-apply. A component whose external
//! dependency is unreachable should prefer a best-effort result marked
//! [`ComponentResult::degraded`] over a hard failure.

pub mod builtin;
mod component;
mod context;
mod error;
mod metadata;
mod registry;
mod result;

pub use component::{Component, ComponentKind};
pub use context::ExecutionContext;
pub use error::RegistryError;
pub use metadata::ComponentMetadata;
pub use registry::{ComponentFactory, ComponentRegistry, RegistryBuilder};
pub use result::{ComponentError, ComponentResult, ErrorKind};
