//! Local tool definitions and the registry the agent consults first.
//!
//! A [`Tool`] pairs a name, a description and a JSON Schema for its parameters with an
//! async handler. Tools are registered in a [`ToolRegistry`]; the agent looks tools up
//! by name at call time, so every invocation reaches exactly the tool the model asked
//! for.
//!
//! The model never sees handlers, only [`ToolSpec`] descriptors. Remote tools
//! discovered from tool servers are described with the same type, which lets the agent
//! merge both sources into one list for the backend.
//!
//! # Schema shorthand
//!
//! Parameter schemas can be written in full JSON Schema or in a shorthand that maps
//! parameter names to type names:
//!
//! ```rust
//! use llm_conduit::tool;
//! use serde_json::json;
//!
//! let add = tool("add", "Add two numbers")
//!     .param("a", "number")
//!     .param("b", "number")
//!     .build(|args| async move {
//!         let a = args["a"].as_f64().unwrap_or(0.0);
//!         let b = args["b"].as_f64().unwrap_or(0.0);
//!         Ok(json!(a + b))
//!     });
//!
//! assert_eq!(add.spec().parameters["required"], json!(["a", "b"]));
//! ```
//!
//! Shorthand entries may also be objects with `optional`, `required` or `default`
//! keys; parameters with a default or marked optional are left out of `required`.

use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Type-erased async tool body.
pub type ToolHandler =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync>;

/// Model-facing description of a tool: what the backend is told it may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema object describing the arguments.
    #[serde(default = "empty_object_schema", alias = "inputSchema")]
    pub parameters: Value,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

fn empty_object_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {},
        "required": []
    })
}

/// An in-process tool.
#[derive(Clone)]
pub struct Tool {
    name: String,
    description: String,
    input_schema: Value,
    handler: ToolHandler,
}

impl Tool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: normalize_schema(input_schema),
            handler: Arc::new(move |args| Box::pin(handler(args))),
        }
    }

    /// Runs the tool body with JSON arguments.
    pub async fn execute(&self, arguments: Value) -> Result<Value> {
        (self.handler)(arguments).await
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec::new(&self.name, &self.description, self.input_schema.clone())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .finish()
    }
}

/// Expands shorthand parameter maps into a full JSON Schema object.
fn normalize_schema(schema: Value) -> Value {
    let Some(obj) = schema.as_object() else {
        return empty_object_schema();
    };

    // Already a complete schema
    if obj.contains_key("type") && obj.contains_key("properties") {
        return schema;
    }

    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();

    for (param_name, param_type) in obj {
        if let Some(type_str) = param_type.as_str() {
            properties.insert(param_name.clone(), type_to_json_schema(type_str));
            required.push(param_name.clone());
        } else if let Some(prop) = param_type.as_object() {
            let mut prop = prop.clone();

            // `optional` and per-property `required` are shorthand, not JSON Schema
            let is_optional = prop
                .remove("optional")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let is_required = prop.remove("required").and_then(|v| v.as_bool());
            let has_default = prop.contains_key("default");

            properties.insert(param_name.clone(), Value::Object(prop));

            match is_required {
                Some(true) => required.push(param_name.clone()),
                Some(false) => {}
                None if is_optional || has_default => {}
                None => required.push(param_name.clone()),
            }
        }
    }

    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required
    })
}

fn type_to_json_schema(type_str: &str) -> Value {
    let json_type = match type_str {
        "string" | "str" => "string",
        "integer" | "int" | "i32" | "i64" | "u32" | "u64" => "integer",
        "number" | "float" | "f32" | "f64" => "number",
        "boolean" | "bool" => "boolean",
        "array" | "list" | "vec" => "array",
        "object" | "dict" | "map" => "object",
        // Unknown type names fall back to string
        _ => "string",
    };

    serde_json::json!({ "type": json_type })
}

/// Builder for [`Tool`] with shorthand parameters.
pub struct ToolBuilder {
    name: String,
    description: String,
    schema: Value,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema: serde_json::json!({}),
        }
    }

    /// Replaces the whole schema (full JSON Schema or shorthand map).
    pub fn schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }

    /// Adds one required parameter in shorthand form.
    pub fn param(mut self, name: &str, type_str: &str) -> Self {
        if let Some(obj) = self.schema.as_object_mut() {
            obj.insert(name.to_string(), Value::String(type_str.to_string()));
        } else {
            let mut obj = serde_json::Map::new();
            obj.insert(name.to_string(), Value::String(type_str.to_string()));
            self.schema = Value::Object(obj);
        }
        self
    }

    pub fn build<F, Fut>(self, handler: F) -> Tool
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Tool::new(self.name, self.description, self.schema, handler)
    }
}

/// Starts building a tool.
pub fn tool(name: impl Into<String>, description: impl Into<String>) -> ToolBuilder {
    ToolBuilder::new(name, description)
}

/// Name-keyed set of local tools, kept in registration order.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tool, replacing any existing tool with the same name in place.
    pub fn register(&mut self, tool: Tool) {
        let tool = Arc::new(tool);
        match self.tools.iter_mut().find(|t| t.name() == tool.name()) {
            Some(slot) => *slot = tool,
            None => self.tools.push(tool),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl FromIterator<Tool> for ToolRegistry {
    fn from_iter<I: IntoIterator<Item = Tool>>(iter: I) -> Self {
        let mut registry = ToolRegistry::new();
        for tool in iter {
            registry.register(tool);
        }
        registry
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.tools.iter().map(|t| t.name()))
            .finish()
    }
}
