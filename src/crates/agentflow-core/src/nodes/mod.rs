//! Built-in node kinds: agent, tool, output selector, human pause

pub mod agent;
pub mod human;
pub mod output;
pub mod tool;

pub use agent::{Agent, AgentNode};
pub use human::{HumanNode, ResponseValidator};
pub use output::{OutputNode, OutputSelector};
pub use tool::{
    AuthContext, GraphCoordinates, ParamMapper, Tool, ToolContext, ToolNode, ToolResult,
    ToolResultKind,
};
