pub mod error;
pub mod registry;
pub mod schema;
pub mod traits;

// Re-export common types
pub use error::{ErrorKind, ToolError, ToolResult};
pub use registry::{CapabilityRegistry, Registration};
pub use schema::{InputSchema, ParamSpec, ParamType, ValidatedArgs};
pub use traits::{Provider, ProviderClient, RawResult, Shape, ToolDescriptor};
