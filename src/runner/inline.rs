use anyhow::Result;
use async_trait::async_trait;

use super::body::{self, Completion};
use super::isolated::signal_name;
use super::{Executor, IsolationMode, Target};
use crate::events::EventSender;
use crate::models::{Context, Expectation};

/// Runs every function on the runner's own thread.
///
/// Panics are contained, but a real fault takes the whole run down and
/// timeouts are not enforced.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

#[async_trait]
impl Executor for InlineExecutor {
    async fn execute(&self, target: &Target<'_>, _events: Option<&EventSender>) -> Result<Completion> {
        let needs_isolation = match target.function.expectation() {
            Expectation::Return => None,
            Expectation::Exit(code) => Some(format!(
                "Expected exit value {code} can only be checked in isolated mode"
            )),
            Expectation::Signal(sig) => Some(format!(
                "Expected signal {sig} ({}) can only be checked in isolated mode",
                signal_name(sig)
            )),
        };
        if let Some(message) = needs_isolation {
            return Ok(Completion::error(message, Context::Test));
        }
        Ok(body::execute_in_process(
            target.case,
            target.function,
            target.address.iteration,
        ))
    }

    fn mode(&self) -> IsolationMode {
        IsolationMode::Inline
    }
}
