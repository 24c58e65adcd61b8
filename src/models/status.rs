use serde::{Deserialize, Serialize};

/// Terminal outcome of one executed test function or fixture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Returned without signalling a failure.
    Pass,
    /// Explicitly signalled a failure.
    Fail,
    /// Terminated abnormally: panic, signal, unexpected exit or timeout.
    Error,
}

impl Status {
    pub fn is_failure(&self) -> bool {
        !matches!(self, Status::Pass)
    }
}

/// Which part of a test produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Context {
    Setup,
    #[default]
    Test,
    Teardown,
}
