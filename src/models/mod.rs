pub mod result;
pub mod status;
pub mod suite;

pub use result::{MAX_MESSAGE_LEN, ResultRecord, RunSummary, TestId};
pub use status::{Context, Status};
pub use suite::{Expectation, Fixture, Hook, Suite, TestBody, TestCase, TestFunction};
