use std::collections::HashMap;

use {
    async_trait::async_trait,
    kestrel_protocol::{InvocationRequest, InvocationResult},
    serde_json::{Map, Value, json},
};

/// Something that can execute capability invocations.
///
/// The orchestration loop only talks to capabilities through this seam; the
/// production implementation is the validating dispatcher.
#[async_trait]
pub trait CapabilityInvoker: Send + Sync {
    fn registry(&self) -> &CapabilityRegistry;

    /// Run one invocation. Never fails: every problem is a `Failure` result.
    async fn invoke(&self, request: InvocationRequest) -> InvocationResult;
}

// ── Descriptors ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    StringList,
    Object,
    /// Opaque identifier, accepted as a string or an integer.
    Id,
}

impl ParamKind {
    fn json_schema(self) -> Value {
        match self {
            ParamKind::String => json!({ "type": "string" }),
            ParamKind::StringList => json!({ "type": "array", "items": { "type": "string" } }),
            ParamKind::Object => json!({ "type": "object" }),
            ParamKind::Id => json!({ "type": ["string", "integer"] }),
        }
    }

    fn label(self) -> &'static str {
        match self {
            ParamKind::String => "a string",
            ParamKind::StringList => "a list of strings",
            ParamKind::Object => "an object",
            ParamKind::Id => "a string or an integer",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::StringList => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
            ParamKind::Object => value.is_object(),
            ParamKind::Id => value.is_string() || value.is_u64(),
        }
    }
}

/// One named argument of a capability.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
    pub description: String,
    /// Enumerated allowed values (string params only).
    pub allowed: Option<Vec<String>>,
}

impl ParamSpec {
    pub fn required(name: &str, kind: ParamKind, description: &str) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            description: description.into(),
            allowed: None,
        }
    }

    pub fn optional(name: &str, kind: ParamKind, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }

    pub fn one_of(mut self, values: &[&str]) -> Self {
        self.allowed = Some(values.iter().map(|v| (*v).to_string()).collect());
        self
    }
}

/// Static description of one capability: what the model sees and what the
/// dispatcher validates against.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParamSpec>,
}

/// Ways an argument object can violate a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaViolation {
    #[error("missing required argument: {0}")]
    Missing(String),
    #[error("argument '{name}' must be {expected}")]
    WrongType { name: String, expected: &'static str },
    #[error("argument '{name}' must be one of [{}], got '{value}'", .allowed.join(", "))]
    NotAllowed {
        name: String,
        value: String,
        allowed: Vec<String>,
    },
}

impl CapabilityDescriptor {
    pub fn new(name: &str, description: &str, parameters: Vec<ParamSpec>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// JSON Schema of the argument object.
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        for p in &self.parameters {
            let mut schema = p.kind.json_schema();
            schema["description"] = Value::String(p.description.clone());
            if let Some(allowed) = &p.allowed {
                schema["enum"] = json!(allowed);
            }
            properties.insert(p.name.clone(), schema);
        }
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Check presence, type and enumerated values. Unknown keys are ignored
    /// here; typed decoding downstream drops them.
    pub fn validate(&self, args: &Map<String, Value>) -> Result<(), SchemaViolation> {
        for p in &self.parameters {
            let value = match args.get(&p.name) {
                None | Some(Value::Null) if p.required => {
                    return Err(SchemaViolation::Missing(p.name.clone()));
                },
                None | Some(Value::Null) => continue,
                Some(v) => v,
            };
            if !p.kind.accepts(value) {
                return Err(SchemaViolation::WrongType {
                    name: p.name.clone(),
                    expected: p.kind.label(),
                });
            }
            if let Some(allowed) = &p.allowed
                && let Some(s) = value.as_str()
                && !allowed.iter().any(|a| a == s)
            {
                return Err(SchemaViolation::NotAllowed {
                    name: p.name.clone(),
                    value: s.to_string(),
                    allowed: allowed.clone(),
                });
            }
        }
        Ok(())
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate capability name: {0}")]
    DuplicateName(String),
    #[error("invalid capability name: '{0}'")]
    InvalidName(String),
}

/// The fixed, ordered set of capabilities. Read-only once built.
#[derive(Debug)]
pub struct CapabilityRegistry {
    descriptors: Vec<CapabilityDescriptor>,
    index: HashMap<String, usize>,
}

impl CapabilityRegistry {
    pub fn new(descriptors: Vec<CapabilityDescriptor>) -> Result<Self, RegistryError> {
        let mut index = HashMap::with_capacity(descriptors.len());
        for (i, d) in descriptors.iter().enumerate() {
            let valid = !d.name.is_empty()
                && d
                    .name
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
            if !valid {
                return Err(RegistryError::InvalidName(d.name.clone()));
            }
            if index.insert(d.name.clone(), i).is_some() {
                return Err(RegistryError::DuplicateName(d.name.clone()));
            }
        }
        Ok(Self { descriptors, index })
    }

    pub fn get(&self, name: &str) -> Option<&CapabilityDescriptor> {
        self.index.get(name).and_then(|&i| self.descriptors.get(i))
    }

    pub fn list(&self) -> &[CapabilityDescriptor] {
        &self.descriptors
    }

    pub fn names(&self) -> Vec<&str> {
        self.descriptors.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Tool advertisements in the function-calling shape model backends expect.
    pub fn function_schemas(&self) -> Vec<Value> {
        self.descriptors
            .iter()
            .map(|d| {
                json!({
                    "type": "function",
                    "function": {
                        "name": d.name,
                        "description": d.description,
                        "parameters": d.input_schema(),
                    }
                })
            })
            .collect()
    }

    /// The read-only manifest document.
    pub fn manifest(&self, service: &str, version: &str) -> Value {
        let tools: Vec<Value> = self
            .descriptors
            .iter()
            .map(|d| {
                json!({
                    "name": d.name,
                    "description": d.description,
                    "input_schema": d.input_schema(),
                })
            })
            .collect();
        json!({
            "name": service,
            "version": version,
            "tools": tools,
        })
    }
}
