pub mod endpoint;
pub mod registry;
pub mod schema;

pub use endpoint::{EndpointConfig, MCP_PATH, router, serve};
pub use registry::ToolRegistry;
