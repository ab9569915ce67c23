//! Tool registry, call resolution and execution.

pub mod arguments;
pub mod executor;
pub mod resolver;
pub mod set;
pub mod tool;
pub mod types;

pub use arguments::ToolArguments;
pub use executor::{execute_tool_call, execute_tools};
pub use resolver::{parse_tool_call, resolve_tool_call, ToolCallRepair, ToolCallRepairRequest};
pub use set::{ToolChoice, ToolSet};
pub use tool::{AgentTool, Tool, ToolExecutionContext};
pub use types::{ParameterBuilder, ToolParameters};
