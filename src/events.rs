use tokio::sync::mpsc;

use crate::models::{ResultRecord, RunSummary};

/// Progress events streamed out of a run for an external reporter.
#[derive(Debug, Clone)]
pub enum RunEvent {
    RunStarted,
    CaseStarted {
        suite: String,
        case: String,
    },
    /// The case was filtered out; none of its functions run.
    CaseSkipped {
        suite: String,
        case: String,
    },
    TestStarted {
        suite: String,
        case: String,
        function: String,
        iteration: Option<i32>,
    },
    TestFinished {
        record: ResultRecord,
    },
    CaseFinished {
        suite: String,
        case: String,
    },
    /// A line a child process printed that was not a result report.
    Output {
        line: String,
    },
    RunFinished {
        summary: RunSummary,
    },
}

pub type EventSender = mpsc::UnboundedSender<RunEvent>;

/// Send if anyone is listening; a dropped receiver is not an error.
pub(crate) fn emit(tx: Option<&EventSender>, event: RunEvent) {
    if let Some(tx) = tx {
        let _ = tx.send(event);
    }
}
