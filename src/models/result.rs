use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::status::{Context, Status};
use crate::assert::Location;

/// Longest diagnostic message kept, in bytes. Longer messages are truncated.
pub const MAX_MESSAGE_LEN: usize = 4096;

/// Who a record belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestId {
    pub suite: String,
    pub case: String,
    pub function: String,
    /// Loop iteration, for loop tests only.
    pub iteration: Option<i32>,
}

/// Outcome of one executed test function (or fixture). Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    id: TestId,
    status: Status,
    context: Context,
    message: Option<String>,
    location: Option<Location>,
    duration: Duration,
}

impl ResultRecord {
    pub fn new(id: TestId, status: Status, context: Context) -> Self {
        Self {
            id,
            status,
            context,
            message: None,
            location: None,
            duration: Duration::ZERO,
        }
    }

    /// Attach a message, stored verbatim up to [`MAX_MESSAGE_LEN`] bytes.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(bounded(message.into()));
        self
    }

    pub fn with_location(mut self, location: Option<Location>) -> Self {
        self.location = location;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn id(&self) -> &TestId {
        &self.id
    }

    pub fn suite(&self) -> &str {
        &self.id.suite
    }

    pub fn case(&self) -> &str {
        &self.id.case
    }

    pub fn function(&self) -> &str {
        &self.id.function
    }

    pub fn iteration(&self) -> Option<i32> {
        self.id.iteration
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn context(&self) -> Context {
        self.context
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

/// Truncate to at most `MAX_MESSAGE_LEN` bytes without splitting a char.
fn bounded(mut message: String) -> String {
    if message.len() > MAX_MESSAGE_LEN {
        let mut cut = MAX_MESSAGE_LEN;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
    }
    message
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> TestId {
        TestId {
            suite: "S".into(),
            case: "C".into(),
            function: "f".into(),
            iteration: None,
        }
    }

    #[test]
    fn message_is_stored_verbatim() {
        let rec = ResultRecord::new(id(), Status::Fail, Context::Test).with_message("50% of %s");
        assert_eq!(rec.message(), Some("50% of %s"));
    }

    #[test]
    fn long_message_is_truncated_on_char_boundary() {
        let long = "é".repeat(MAX_MESSAGE_LEN);
        let rec = ResultRecord::new(id(), Status::Fail, Context::Test).with_message(long);
        let msg = rec.message().unwrap();
        assert!(msg.len() <= MAX_MESSAGE_LEN);
        assert_eq!(msg.len(), MAX_MESSAGE_LEN);
        assert!(msg.chars().all(|c| c == 'é'));

        let odd = format!("x{}", "é".repeat(MAX_MESSAGE_LEN));
        let rec = ResultRecord::new(id(), Status::Fail, Context::Test).with_message(odd);
        assert_eq!(rec.message().unwrap().len(), MAX_MESSAGE_LEN - 1);
    }
}
