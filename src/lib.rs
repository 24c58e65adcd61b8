//! Unit test execution with tag filtering and per-test process isolation.
//!
//! Tests are grouped as [`Suite`] → [`TestCase`] → test function. A
//! [`Runner`] walks the registered suites in order, selects cases by tag
//! expression, runs each selected function either in a child process
//! ([`IsolationMode::Isolated`]) or in-process ([`IsolationMode::Inline`]) and
//! collects one [`ResultRecord`] per execution into a [`RunReport`].
//!
//! ```no_run
//! use checkrun::{Filter, IsolationMode, Outcome, Runner, Suite, TestCase, check};
//!
//! fn adds() -> Outcome {
//!     check!(1 + 1 == 2);
//!     Ok(())
//! }
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let mut case = TestCase::tagged("arith", "fast")?;
//! case.add_test("adds", adds)?;
//! let mut suite = Suite::new("core")?;
//! suite.add_case(case);
//!
//! let mut runner = Runner::new(suite);
//! runner.serve_child();
//! let report = runner
//!     .run(&Filter::tags(Some("fast"), None), IsolationMode::Isolated)
//!     .await?;
//! assert_eq!(report.total_failed(), 0);
//! # Ok(())
//! # }
//! ```

pub mod assert;
pub mod config;
pub mod error;
pub mod events;
pub mod log;
pub mod models;
pub mod report;
pub mod runner;
pub mod tags;

pub use assert::{Failure, Location, Outcome};
pub use config::Config;
pub use error::{ConfigError, ModelError, ProtocolError};
pub use events::{EventSender, RunEvent};
pub use models::{
    Context, Expectation, Hook, MAX_MESSAGE_LEN, ResultRecord, RunSummary, Status, Suite, TestCase,
    TestFunction, TestId,
};
pub use report::RunReport;
pub use runner::{Completion, Executor, Filter, IsolationMode, Runner, Target};
pub use tags::TagSet;
