use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use weft_config::RetryPolicy;

use crate::component::Component;
use crate::error::RegistryError;
use crate::metadata::ComponentMetadata;

/// Produces a fresh component instance for one attempt.
pub type ComponentFactory = Arc<dyn Fn() -> Arc<dyn Component> + Send + Sync>;

#[derive(Clone)]
struct Registration {
  factory: ComponentFactory,
  metadata: ComponentMetadata,
  retry: Option<RetryPolicy>,
}

/// Collects component registrations at startup.
///
/// ```ignore
/// let mut builder = RegistryBuilder::new();
/// builder
///   .register("sheets_read", || SheetsReader::new(client.clone()))?
///   .register_with_retry("ai_process", retry, || AiProcess::default())?;
/// let registry = builder.build();
/// ```
pub struct RegistryBuilder {
  entries: HashMap<String, Registration>,
  default_retry: RetryPolicy,
}

impl Default for RegistryBuilder {
  fn default() -> Self {
    Self::new()
  }
}

impl RegistryBuilder {
  pub fn new() -> Self {
    Self {
      entries: HashMap::new(),
      default_retry: RetryPolicy::default(),
    }
  }

  /// Register a component type.
  ///
  /// The factory is called once here to capture metadata, then once per attempt.
  pub fn register<F, C>(&mut self, node_type: &str, factory: F) -> Result<&mut Self, RegistryError>
  where
    F: Fn() -> C + Send + Sync + 'static,
    C: Component + 'static,
  {
    self.insert(node_type, wrap(factory), None)
  }

  /// Register a component type with its own retry policy.
  pub fn register_with_retry<F, C>(
    &mut self,
    node_type: &str,
    retry: RetryPolicy,
    factory: F,
  ) -> Result<&mut Self, RegistryError>
  where
    F: Fn() -> C + Send + Sync + 'static,
    C: Component + 'static,
  {
    self.insert(node_type, wrap(factory), Some(retry))
  }

  /// Set the retry policy of an already registered type.
  pub fn set_retry(&mut self, node_type: &str, retry: RetryPolicy) -> Result<&mut Self, RegistryError> {
    let entry = self
      .entries
      .get_mut(node_type)
      .ok_or_else(|| RegistryError::NotFound {
        node_type: node_type.to_string(),
      })?;
    entry.retry = Some(retry);
    Ok(self)
  }

  /// Retry policy for types without their own.
  pub fn default_retry(&mut self, retry: RetryPolicy) -> &mut Self {
    self.default_retry = retry;
    self
  }

  /// Freeze the registrations.
  pub fn build(self) -> ComponentRegistry {
    ComponentRegistry {
      entries: self.entries,
      default_retry: self.default_retry,
    }
  }

  fn insert(
    &mut self,
    node_type: &str,
    factory: ComponentFactory,
    retry: Option<RetryPolicy>,
  ) -> Result<&mut Self, RegistryError> {
    if self.entries.contains_key(node_type) {
      return Err(RegistryError::AlreadyRegistered {
        node_type: node_type.to_string(),
      });
    }
    let metadata = factory().metadata();
    self.entries.insert(
      node_type.to_string(),
      Registration {
        factory,
        metadata,
        retry,
      },
    );
    Ok(self)
  }
}

fn wrap<F, C>(factory: F) -> ComponentFactory
where
  F: Fn() -> C + Send + Sync + 'static,
  C: Component + 'static,
{
  Arc::new(move || Arc::new(factory()) as Arc<dyn Component>)
}

/// Immutable map from node type to component factory.
#[derive(Clone)]
pub struct ComponentRegistry {
  entries: HashMap<String, Registration>,
  default_retry: RetryPolicy,
}

impl fmt::Debug for ComponentRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ComponentRegistry")
      .field("types", &self.types())
      .field("default_retry", &self.default_retry)
      .finish()
  }
}

impl ComponentRegistry {
  pub fn builder() -> RegistryBuilder {
    RegistryBuilder::new()
  }

  pub fn contains(&self, node_type: &str) -> bool {
    self.entries.contains_key(node_type)
  }

  /// Create a component instance for one attempt.
  pub fn instantiate(&self, node_type: &str) -> Result<Arc<dyn Component>, RegistryError> {
    self
      .entries
      .get(node_type)
      .map(|entry| (entry.factory)())
      .ok_or_else(|| RegistryError::NotFound {
        node_type: node_type.to_string(),
      })
  }

  pub fn metadata(&self, node_type: &str) -> Option<&ComponentMetadata> {
    self.entries.get(node_type).map(|entry| &entry.metadata)
  }

  pub fn is_trigger(&self, node_type: &str) -> bool {
    self
      .metadata(node_type)
      .is_some_and(|metadata| metadata.kind.is_trigger())
  }

  /// Retry policy for a node type, falling back to the registry default.
  pub fn retry_policy(&self, node_type: &str) -> &RetryPolicy {
    self
      .entries
      .get(node_type)
      .and_then(|entry| entry.retry.as_ref())
      .unwrap_or(&self.default_retry)
  }

  pub fn default_retry(&self) -> &RetryPolicy {
    &self.default_retry
  }

  /// Registered node types, sorted.
  pub fn types(&self) -> Vec<String> {
    let mut types: Vec<String> = self.entries.keys().cloned().collect();
    types.sort();
    types
  }
}
