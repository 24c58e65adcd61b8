//! The child side of isolated execution.
//!
//! A child is started with `CHECKRUN_CHILD=<suite>:<case>:<function>[:<iteration>]`,
//! replays the case's unchecked setups, runs that single function (with its
//! checked fixtures) and prints one line
//! `CHECKRUN_RESULT:<json>` to stdout before exiting with status 0. Anything
//! else on stdout is ordinary test output.

use std::io::{self, Write};

use anyhow::{Context as _, Result};
use tracing::{debug, error};

use super::body::{self, Completion};
use super::{Address, Runner};
use crate::error::ProtocolError;
use crate::models::{Context, Suite, TestCase, TestFunction};

pub const ENV_CHILD: &str = "CHECKRUN_CHILD";
pub const REPORT_PREFIX: &str = "CHECKRUN_RESULT:";

/// Exit status of a child that could not make sense of its address.
pub const PROTOCOL_EXIT: i32 = 125;

impl Runner {
    /// Act as an isolated child if this process was started as one.
    ///
    /// Returns immediately in a normal process. In a child it runs the
    /// addressed function, reports the result and exits, so it never returns.
    /// Call it after all suites are registered and before running them.
    pub fn serve_child(&self) {
        let Ok(address) = std::env::var(ENV_CHILD) else {
            return;
        };
        let code = match serve(self.suites(), &address) {
            Ok(()) => 0,
            Err(e) => {
                error!(address = %address, error = %e, "child could not run its test");
                eprintln!("checkrun child {address}: {e:#}");
                PROTOCOL_EXIT
            }
        };
        std::process::exit(code);
    }
}

fn serve(suites: &[Suite], raw: &str) -> Result<()> {
    let address: Address = raw.parse()?;
    let (case, function) =
        locate(suites, &address).ok_or_else(|| ProtocolError::UnknownTest(raw.to_string()))?;
    debug!(%address, case = case.name(), function = function.name(), "child running test");

    let completion = match prepare(case) {
        Ok(()) => body::execute_in_process(case, function, address.iteration),
        Err(completion) => completion,
    };
    write_report(&mut io::stdout().lock(), &completion).context("failed to report result")
}

/// Replay the case's unchecked setups so the function sees the state they
/// build. The parent already recorded their outcome; here a failure only
/// stands in for the function's result.
fn prepare(case: &TestCase) -> Result<(), Completion> {
    for hook in case.unchecked_setups() {
        body::guarded(|| hook(), Context::Setup)?;
    }
    Ok(())
}

fn locate<'a>(suites: &'a [Suite], address: &Address) -> Option<(&'a TestCase, &'a TestFunction)> {
    let case = suites.get(address.suite)?.cases().get(address.case)?;
    let function = case.functions().get(address.function)?;
    Some((case, function))
}

/// Starts with a newline so the report begins a line even if the test left
/// partial output behind.
pub fn write_report<W: Write>(out: &mut W, completion: &Completion) -> Result<()> {
    let json = serde_json::to_string(completion)?;
    writeln!(out)?;
    writeln!(out, "{REPORT_PREFIX}{json}")?;
    out.flush()?;
    Ok(())
}

/// `None` for ordinary output lines. Works on raw bytes since test output
/// need not be UTF-8.
pub fn parse_report_line(line: &[u8]) -> Option<Result<Completion, ProtocolError>> {
    let payload = line.strip_prefix(REPORT_PREFIX.as_bytes())?;
    Some(serde_json::from_slice(payload.trim_ascii_end()).map_err(ProtocolError::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert::{Failure, Outcome};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn report_line_round_trip() {
        let completion = Completion::failed(Failure::new("Yellow fail"), Context::Test);
        let mut out = Vec::new();
        write_report(&mut out, &completion).unwrap();
        let text = String::from_utf8(out).unwrap();

        let mut lines = text.lines();
        assert_eq!(lines.next(), Some(""));
        let parsed = parse_report_line(lines.next().unwrap().as_bytes())
            .unwrap()
            .unwrap();
        assert_eq!(parsed, completion);
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn ordinary_and_broken_lines() {
        assert!(parse_report_line(b"hello from the test").is_none());
        assert!(parse_report_line(b"\xff\xfe garbage").is_none());
        assert!(parse_report_line(b" CHECKRUN_RESULT:{}").is_none());
        assert!(matches!(
            parse_report_line(b"CHECKRUN_RESULT:{not json"),
            Some(Err(ProtocolError::BadReport(_)))
        ));
        let line = br#"CHECKRUN_RESULT:{"status":"pass","context":"test","message":null,"location":null}"#;
        let mut crlf = line.to_vec();
        crlf.extend_from_slice(b"\r\n");
        assert_eq!(
            parse_report_line(&crlf).unwrap().unwrap(),
            Completion::pass()
        );
    }

    #[test]
    fn locate_checks_every_index() {
        let mut case = TestCase::new("c").unwrap();
        case.add_test("f", || Ok(())).unwrap();
        let mut suite = Suite::new("s").unwrap();
        suite.add_case(case);
        let suites = vec![suite];

        let at = |s, c, f| Address {
            suite: s,
            case: c,
            function: f,
            iteration: None,
        };
        assert!(locate(&suites, &at(0, 0, 0)).is_some());
        assert!(locate(&suites, &at(1, 0, 0)).is_none());
        assert!(locate(&suites, &at(0, 1, 0)).is_none());
        assert!(locate(&suites, &at(0, 0, 1)).is_none());
    }

    #[test]
    fn serve_rejects_unknown_addresses() {
        let suites = vec![Suite::new("s").unwrap()];
        assert!(serve(&suites, "nonsense").is_err());
        assert!(serve(&suites, "0:0:0").is_err());
    }

    #[test]
    fn unchecked_setups_are_replayed_before_the_function() {
        static READY: AtomicBool = AtomicBool::new(false);
        let mut case = TestCase::new("c").unwrap();
        case.add_unchecked_fixture(
            Some(Arc::new(|| -> Outcome {
                READY.store(true, Ordering::SeqCst);
                Ok(())
            })),
            None,
        );
        assert!(prepare(&case).is_ok());
        assert!(READY.load(Ordering::SeqCst));

        let mut broken = TestCase::new("broken").unwrap();
        broken.add_unchecked_fixture(
            Some(Arc::new(|| -> Outcome { Err(Failure::new("no database")) })),
            None,
        );
        let completion = prepare(&broken).unwrap_err();
        assert_eq!(completion.context, Context::Setup);
        assert_eq!(completion.message.as_deref(), Some("no database"));
    }
}
