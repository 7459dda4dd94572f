use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool call requested by the model inside a stream packet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDirective {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolDirective {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: None,
            function: FunctionCall {
                name: name.into(),
                arguments,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// Arguments as a JSON value.
    ///
    /// Some servers send arguments as an object, others as a JSON-encoded
    /// string. Strings that parse as JSON are unwrapped; anything else is
    /// passed through untouched.
    pub fn arguments(&self) -> Value {
        match &self.function.arguments {
            Value::String(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::debug!(
                        target: "parley::tools",
                        tool = %self.function.name,
                        "Tool arguments are not JSON, passing raw string: {e}"
                    );
                    Value::String(raw.clone())
                }
            },
            Value::Null => Value::Object(serde_json::Map::new()),
            other => other.clone(),
        }
    }
}

/// A function exported by a tool source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Value,
}

/// The functions exported by one tool source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ToolSourceCatalog {
    pub source_id: String,
    pub tools: Vec<ToolDescriptor>,
}

impl ToolSourceCatalog {
    pub fn new(source_id: impl Into<String>, tools: Vec<ToolDescriptor>) -> Self {
        Self {
            source_id: source_id.into(),
            tools,
        }
    }

    pub fn find(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|tool| tool.name == name)
    }
}
