pub mod error;
pub mod result;
pub mod schema;

pub use error::ToolError;
pub use result::{ToolInvocation, ToolOutput, ToolOutputPart};
pub use schema::{FunctionCall, ToolDescriptor, ToolDirective, ToolSourceCatalog};
