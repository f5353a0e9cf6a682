//! Error types for the conduit pipeline

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error, e.g. while talking to a tool server process
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// API error from the model server
    #[error("API error: {0}")]
    Api(String),

    /// Streaming error
    #[error("Streaming error: {0}")]
    Stream(String),

    /// Tool execution error
    #[error("Tool execution error: {0}")]
    Tool(String),

    /// No registry or tool server offers a tool with this name
    #[error("Tool {0} not found on any server")]
    ToolNotFound(String),

    /// A tool server failed to start, list, call or close
    #[error("Tool server '{server}' failed: {message}")]
    ToolServer { server: String, message: String },

    /// The circuit breaker guarding a target is open
    #[error("Circuit breaker is OPEN for {target}. Too many failures.")]
    CircuitOpen { target: String },

    /// A routing strategy was given no targets to try
    #[error("No targets configured")]
    NoTargets,

    /// Structured output could not be decoded; carries the raw model text
    #[error("Failed to parse structured output: {message}. Raw: {raw}")]
    StructuredOutput { message: String, raw: String },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Timeout error
    #[error("Request timeout")]
    Timeout,

    /// Other errors
    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new API error
    pub fn api(msg: impl Into<String>) -> Self {
        Error::Api(msg.into())
    }

    /// Create a new stream error
    pub fn stream(msg: impl Into<String>) -> Self {
        Error::Stream(msg.into())
    }

    /// Create a new tool error
    pub fn tool(msg: impl Into<String>) -> Self {
        Error::Tool(msg.into())
    }

    /// Create a tool-not-found error
    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Error::ToolNotFound(name.into())
    }

    /// Create a tool server error for the named server
    pub fn tool_server(server: impl Into<String>, msg: impl Into<String>) -> Self {
        Error::ToolServer {
            server: server.into(),
            message: msg.into(),
        }
    }

    /// Create a circuit-open rejection for a target
    pub fn circuit_open(target: impl Into<String>) -> Self {
        Error::CircuitOpen {
            target: target.into(),
        }
    }

    /// Create a structured output decoding error
    pub fn structured_output(msg: impl Into<String>, raw: impl Into<String>) -> Self {
        Error::StructuredOutput {
            message: msg.into(),
            raw: raw.into(),
        }
    }

    /// Create a new invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create a new other error
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Create a timeout error
    pub fn timeout() -> Self {
        Error::Timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_config() {
        let err = Error::config("Invalid model");
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(err.to_string(), "Invalid configuration: Invalid model");
    }

    #[test]
    fn test_error_tool_not_found() {
        let err = Error::tool_not_found("get_weather");
        assert!(matches!(err, Error::ToolNotFound(_)));
        assert_eq!(err.to_string(), "Tool get_weather not found on any server");
    }

    #[test]
    fn test_error_tool_server() {
        let err = Error::tool_server("files", "spawn failed");
        assert_eq!(err.to_string(), "Tool server 'files' failed: spawn failed");
    }

    #[test]
    fn test_error_circuit_open() {
        let err = Error::circuit_open("gpt-4");
        assert!(matches!(err, Error::CircuitOpen { .. }));
        assert!(err.to_string().contains("OPEN for gpt-4"));
    }

    #[test]
    fn test_error_structured_output_keeps_raw() {
        let err = Error::structured_output("expected value", "not json");
        match &err {
            Error::StructuredOutput { raw, .. } => assert_eq!(raw, "not json"),
            other => panic!("unexpected variant: {other:?}"),
        }
        assert!(err.to_string().ends_with("Raw: not json"));
    }

    #[test]
    fn test_error_timeout() {
        let err = Error::timeout();
        assert!(matches!(err, Error::Timeout));
        assert_eq!(err.to_string(), "Request timeout");
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
