//! Running test code inside the current process.
//!
//! Both the inline executor and an isolated child use this; only where the
//! process boundary sits differs.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::assert::{Failure, Location, Outcome};
use crate::models::{Context, ResultRecord, Status, TestCase, TestFunction, TestId};

/// How one execution ended, before it is tied to a test identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub status: Status,
    pub context: Context,
    pub message: Option<String>,
    pub location: Option<Location>,
}

impl Completion {
    pub fn pass() -> Self {
        Self {
            status: Status::Pass,
            context: Context::Test,
            message: None,
            location: None,
        }
    }

    pub fn failed(failure: Failure, context: Context) -> Self {
        Self {
            status: Status::Fail,
            context,
            message: Some(failure.message().to_string()),
            location: failure.location().cloned(),
        }
    }

    pub fn error(message: impl Into<String>, context: Context) -> Self {
        Self {
            status: Status::Error,
            context,
            message: Some(message.into()),
            location: None,
        }
    }

    pub fn into_record(self, id: TestId, duration: Duration) -> ResultRecord {
        let record = ResultRecord::new(id, self.status, self.context)
            .with_location(self.location)
            .with_duration(duration);
        match self.message {
            Some(message) => record.with_message(message),
            None => record,
        }
    }
}

/// Call `f`, turning a returned failure or a panic into a completion.
pub fn guarded<F>(f: F, context: Context) -> Result<(), Completion>
where
    F: FnOnce() -> Outcome,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(failure)) => Err(Completion::failed(failure, context)),
        Err(payload) => Err(Completion::error(
            format!("panicked: {}", panic_message(payload.as_ref())),
            context,
        )),
    }
}

/// Checked setups, the body, then checked teardowns.
///
/// A setup failure skips the body. A teardown failure only replaces a
/// passing result; the first failing teardown stops the rest.
pub fn execute_in_process(
    case: &TestCase,
    function: &TestFunction,
    iteration: Option<i32>,
) -> Completion {
    for hook in case.checked_setups() {
        if let Err(completion) = guarded(|| hook(), Context::Setup) {
            return completion;
        }
    }

    let mut completion = match guarded(|| function.call(iteration), Context::Test) {
        Ok(()) => Completion::pass(),
        Err(completion) => completion,
    };

    for hook in case.checked_teardowns() {
        if let Err(failed) = guarded(|| hook(), Context::Teardown) {
            if completion.status == Status::Pass {
                completion = failed;
            }
            break;
        }
    }
    completion
}

fn panic_message<'a>(payload: &'a (dyn Any + Send + 'static)) -> &'a str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "Box<dyn Any>"
    }
}
