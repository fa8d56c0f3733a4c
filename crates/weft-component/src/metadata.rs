use serde::{Deserialize, Serialize};

use crate::component::ComponentKind;

/// Metadata describing a component type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentMetadata {
  /// Display name, e.g. "Google Sheets reader"
  pub name: String,

  /// Short description of what the component does
  pub description: String,

  pub kind: ComponentKind,

  /// JSON Schema of the accepted `config` parameters
  #[serde(default)]
  pub input_schema: serde_json::Value,

  /// JSON Schema of the fields in `output_data`
  ///
  /// Downstream placeholders should reference these named fields.
  #[serde(default)]
  pub output_schema: serde_json::Value,
}

impl ComponentMetadata {
  pub fn new(name: impl Into<String>, description: impl Into<String>, kind: ComponentKind) -> Self {
    Self {
      name: name.into(),
      description: description.into(),
      kind,
      input_schema: serde_json::json!({ "type": "object" }),
      output_schema: serde_json::json!({ "type": "object" }),
    }
  }

  pub fn with_input_schema(mut self, schema: serde_json::Value) -> Self {
    self.input_schema = schema;
    self
  }

  pub fn with_output_schema(mut self, schema: serde_json::Value) -> Self {
    self.output_schema = schema;
    self
  }

  /// Names of the declared output fields, in schema order.
  pub fn output_fields(&self) -> Vec<String> {
    self
      .output_schema
      .get("properties")
      .and_then(|p| p.as_object())
      .map(|props| props.keys().cloned().collect())
      .unwrap_or_default()
  }
}
