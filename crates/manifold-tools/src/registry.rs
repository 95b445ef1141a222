use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One parameter of a tool, as shown to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParam {
    pub name: String,
    /// Loose semantic type hint ("string", "number", ...).
    pub semantic_type: String,
    pub required: bool,
    pub description: String,
}

impl ToolParam {
    pub fn required(name: &str, semantic_type: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            semantic_type: semantic_type.to_string(),
            required: true,
            description: description.to_string(),
        }
    }

    pub fn optional(name: &str, semantic_type: &str, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, semantic_type, description)
        }
    }
}

/// Introspection record served on `GET /tools` and folded into prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub summary: String,
    pub parameters: Vec<ToolParam>,
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("missing required argument '{name}'")]
    MissingArgument { name: String },

    #[error("invalid argument '{name}': {detail}")]
    InvalidArgument { name: String, detail: String },

    #[error("tool failed: {0}")]
    Failed(String),
}

/// A callable tool. Descriptors are declared alongside the implementation
/// rather than derived by reflection.
#[async_trait]
pub trait GatewayTool: Send + Sync {
    fn name(&self) -> &str;
    fn summary(&self) -> &str;
    fn parameters(&self) -> Vec<ToolParam>;

    /// Run the tool. `args` is the JSON object from the request body.
    async fn invoke(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError>;

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            summary: self.summary().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Name-keyed collection of tools. Sorted so descriptor listings are
/// deterministic.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn GatewayTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in tool.
    pub fn with_builtins(client: reqwest::Client) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::tools::web_search::WebSearch::from_env(
            client.clone(),
        )));
        registry.register(Arc::new(crate::tools::weather::GetWeather::new(client)));
        registry.register(Arc::new(crate::tools::calculator::Calculator));
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn GatewayTool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn GatewayTool>> {
        self.tools.get(name).cloned()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.values().map(|t| t.descriptor()).collect()
    }
}

/// Reject calls missing a declared required argument before the tool runs.
pub fn check_required(
    descriptor: &ToolDescriptor,
    args: &serde_json::Value,
) -> Result<(), ToolError> {
    for param in descriptor.parameters.iter().filter(|p| p.required) {
        if args.get(&param.name).is_none() {
            return Err(ToolError::MissingArgument {
                name: param.name.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl GatewayTool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn summary(&self) -> &str {
            "Echo the input back"
        }
        fn parameters(&self) -> Vec<ToolParam> {
            vec![ToolParam::required("text", "string", "Text to echo")]
        }
        async fn invoke(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
            Ok(serde_json::json!({ "echo": args["text"] }))
        }
    }

    #[test]
    fn descriptors_are_sorted_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        registry.register(Arc::new(crate::tools::calculator::Calculator));

        let names: Vec<String> = registry.descriptors().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["calculator", "echo"]);
    }

    #[test]
    fn required_arguments_are_enforced() {
        let desc = Echo.descriptor();
        assert!(check_required(&desc, &serde_json::json!({"text": "hi"})).is_ok());
        assert!(matches!(
            check_required(&desc, &serde_json::json!({})),
            Err(ToolError::MissingArgument { .. })
        ));
    }
}
