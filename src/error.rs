use thiserror::Error;

/// Rejected while building the test model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("suite name must not be empty")]
    EmptySuiteName,
    #[error("test case name must not be empty")]
    EmptyCaseName,
    #[error("test function name must not be empty (case '{case}')")]
    EmptyFunctionName { case: String },
    #[error("loop test '{function}' has an empty iteration range {start}..{end}")]
    EmptyLoopRange {
        function: String,
        start: i32,
        end: i32,
    },
}

/// An environment or file setting that could not be interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{key}: expected a non-negative number, got '{value}'")]
    InvalidNumber { key: String, value: String },
    #[error("{key}: expected 'yes' or 'no', got '{value}'")]
    InvalidSwitch { key: String, value: String },
}

/// Malformed traffic between a parent run and its child process.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed child address '{0}'")]
    BadAddress(String),
    #[error("child address '{0}' does not name a registered test")]
    UnknownTest(String),
    #[error("undecodable child report: {0}")]
    BadReport(#[from] serde_json::Error),
}
