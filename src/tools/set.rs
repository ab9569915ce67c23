//! Ordered tool registry handed to a generation call.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::tool::Tool;
use crate::provider::ToolDefinition;

/// How the model may pick tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Required,
    Tool {
        #[serde(rename = "toolName")]
        tool_name: String,
    },
}

/// Tools available to the model, kept in declaration order.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
    timeout: Option<Duration>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool, replacing any earlier tool with the same name.
    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.insert(Arc::new(tool));
        self
    }

    pub fn insert(&mut self, tool: Arc<dyn Tool>) {
        match self.tools.iter().position(|t| t.name() == tool.name()) {
            Some(index) => self.tools[index] = tool,
            None => self.tools.push(tool),
        }
    }

    /// Fail executions that run longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.iter()
    }

    /// Provider-facing definitions, restricted to `active` when given.
    pub fn definitions(&self, active: Option<&[String]>) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .filter(|t| active.map_or(true, |names| names.iter().any(|n| n == t.name())))
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters().schema.clone(),
            })
            .collect()
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSet")
            .field("tools", &self.names())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{AgentTool, ToolParameters};

    fn client(name: &str) -> AgentTool {
        AgentTool::client_side(name, format!("{name} tool"), ToolParameters::empty())
    }

    #[test]
    fn keeps_declaration_order() {
        let tools = ToolSet::new().with(client("weather")).with(client("calc"));

        assert_eq!(tools.names(), vec!["weather", "calc"]);
    }

    #[test]
    fn same_name_replaces_in_place() {
        let tools = ToolSet::new()
            .with(client("weather"))
            .with(client("calc"))
            .with(AgentTool::client_side("weather", "v2", ToolParameters::empty()));

        assert_eq!(tools.len(), 2);
        assert_eq!(tools.get("weather").unwrap().description(), "v2");
    }

    #[test]
    fn definitions_respect_active_filter() {
        let tools = ToolSet::new().with(client("weather")).with(client("calc"));
        let active = vec!["calc".to_string()];

        let defs = tools.definitions(Some(&active));

        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "calc");
    }
}
