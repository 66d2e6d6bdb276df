//! Error types for frontdesk-tools

use thiserror::Error;

/// Tool dispatch error type
///
/// Only caller mistakes surface as errors. Denials, timeouts, and execution
/// failures are dispatch *outcomes* — they come back inside a
/// [`Dispatch`](crate::Dispatch) so the audit record is never lost.
#[derive(Debug, Error)]
pub enum ToolError {
    /// No tool is registered under the requested name
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// A tool spec failed validation at registration time
    #[error("invalid tool spec '{name}': {message}")]
    InvalidSpec {
        /// Tool name being registered
        name: String,
        /// What was wrong with the spec
        message: String,
    },

    /// A tool name was registered twice
    #[error("tool already registered: {0}")]
    DuplicateTool(String),

    /// Parameters failed the tool's basic shape check
    #[error("invalid parameters for '{tool}': {message}")]
    InvalidParams {
        /// Tool the parameters were for
        tool: String,
        /// What was wrong
        message: String,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ToolError>;
