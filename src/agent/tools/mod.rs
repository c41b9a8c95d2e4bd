//! Tools the model may call while composing a reply
//!
//! Every built-in tool is stateless: clock lookups, arithmetic, and chance.

mod calculator;
mod chance;
mod clock;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{Error, Result};

pub use calculator::{CalculatorTool, evaluate};
pub use chance::{CoinFlipTool, DiceTool, RandomNumberTool};
pub use clock::{CurrentDateTool, CurrentTimeTool};

/// A function the model can invoke
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON schema of the arguments object
    fn parameters(&self) -> serde_json::Value;

    /// Run the tool with JSON-encoded arguments
    ///
    /// # Errors
    ///
    /// Returns error if the arguments are malformed or the tool fails
    async fn execute(&self, arguments: &str) -> Result<String>;
}

/// Tool definition as sent to the chat completions API
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: &'static str,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: serde_json::Value,
}

/// Registered tools by name
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, Arc<dyn Tool>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.tools.keys()).finish()
    }
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in tools
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CurrentTimeTool));
        registry.register(Arc::new(CurrentDateTool));
        registry.register(Arc::new(CalculatorTool));
        registry.register(Arc::new(DiceTool));
        registry.register(Arc::new(CoinFlipTool));
        registry.register(Arc::new(RandomNumberTool));
        registry
    }

    /// Add a tool, replacing any tool of the same name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name(), tool);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.tools.keys().copied().collect()
    }

    /// Definitions for every registered tool
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|tool| ToolDefinition {
                tool_type: "function",
                function: FunctionDefinition {
                    name: tool.name(),
                    description: tool.description(),
                    parameters: tool.parameters(),
                },
            })
            .collect()
    }

    /// Run a named tool
    ///
    /// # Errors
    ///
    /// Returns error if the tool is unknown or fails
    pub async fn execute(&self, name: &str, arguments: &str) -> Result<String> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| Error::Tool(format!("unknown tool: {name}")))?;
        tracing::debug!(tool = name, "executing tool");
        tool.execute(arguments).await
    }
}

/// Decode a tool's JSON arguments; an empty string counts as `{}`
fn parse_arguments<T: DeserializeOwned>(arguments: &str) -> Result<T> {
    let arguments = if arguments.trim().is_empty() {
        "{}"
    } else {
        arguments
    };
    serde_json::from_str(arguments).map_err(|e| Error::Tool(format!("invalid arguments: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let registry = ToolRegistry::with_builtins();
        assert_eq!(
            registry.names(),
            vec![
                "calculator",
                "current_date",
                "current_time",
                "flip_coin",
                "random_number",
                "roll_dice",
            ]
        );

        let defs = registry.definitions();
        let json = serde_json::to_value(&defs[0]).unwrap();
        assert_eq!(json["type"], "function");
        assert_eq!(json["function"]["name"], "calculator");
        assert_eq!(json["function"]["parameters"]["required"][0], "expression");
    }

    #[tokio::test]
    async fn registry_runs_calculator() {
        let out = ToolRegistry::with_builtins()
            .execute("calculator", r#"{"expression": "15% of 80"}"#)
            .await
            .unwrap();
        assert_eq!(out, "12");
    }

    #[test]
    fn unknown_tool_is_an_error() {
        let err = tokio_test::block_on(ToolRegistry::new().execute("nope", "{}")).unwrap_err();
        assert!(matches!(err, Error::Tool(_)));
    }

    #[test]
    fn empty_arguments_count_as_object() {
        #[derive(serde::Deserialize)]
        struct Args {
            #[serde(default)]
            sides: Option<u32>,
        }
        let args: Args = parse_arguments("  ").unwrap();
        assert!(args.sides.is_none());
        assert!(matches!(
            parse_arguments::<Args>("not json"),
            Err(Error::Tool(_))
        ));
    }
}
