use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use super::body::Completion;
use super::child::{self, ENV_CHILD};
use super::{Address, Executor, IsolationMode, Target};
use crate::events::{EventSender, RunEvent, emit};
use crate::models::{Context, Expectation, Status};

pub const TIMEOUT_MESSAGE: &str = "Test timeout expired";

/// How long output may keep flowing after the test process has exited.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Guard that kills the child process (and its entire process group) on drop.
struct ChildGuard {
    child: Option<tokio::process::Child>,
    /// Process group ID saved at spawn time so we can kill the whole group.
    #[cfg(unix)]
    pgid: Option<u32>,
}

impl ChildGuard {
    fn new(child: tokio::process::Child) -> Self {
        #[cfg(unix)]
        let pgid = child.id();
        Self {
            child: Some(child),
            #[cfg(unix)]
            pgid,
        }
    }

    async fn wait(&mut self) -> Result<ExitStatus> {
        let child = self.child.as_mut().context("child already reaped")?;
        child.wait().await.context("failed to wait for test process")
    }

    fn kill_group(&mut self) {
        // Also takes out anything the test forked.
        #[cfg(unix)]
        if let Some(pgid) = self.pgid.take() {
            unsafe { libc::kill(-(pgid as libc::pid_t), libc::SIGKILL) };
        }
        if let Some(ref mut child) = self.child {
            let _ = child.start_kill();
        }
    }

    /// Kill and reap, so no zombie is left behind after a timeout.
    async fn terminate(&mut self) {
        self.kill_group();
        if let Some(mut child) = self.child.take() {
            let _ = child.wait().await;
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        self.kill_group();
    }
}

/// Runs each function in a fresh child process.
///
/// The child is the same program (normally the current executable) started
/// with `CHECKRUN_CHILD` naming the function; it must call
/// [`super::Runner::serve_child`] after registering the same suites.
#[derive(Debug, Clone)]
pub struct IsolatedExecutor {
    program: PathBuf,
    args: Vec<OsString>,
}

impl IsolatedExecutor {
    pub fn new(program: impl Into<PathBuf>, args: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Re-invoke the running executable with the arguments it was given.
    pub fn for_current_exe() -> Result<Self> {
        let program = std::env::current_exe().context("failed to locate the current executable")?;
        let args = std::env::args_os().skip(1).collect();
        Ok(Self::new(program, args))
    }

    fn command(&self, target: &Target<'_>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env(ENV_CHILD, target.address.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, so a timeout kill reaches grandchildren too.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.as_std_mut().process_group(0);
        }
        cmd
    }
}

#[async_trait]
impl Executor for IsolatedExecutor {
    async fn execute(&self, target: &Target<'_>, events: Option<&EventSender>) -> Result<Completion> {
        let mut cmd = self.command(target);
        debug!(address = %target.address, cmd = ?cmd.as_std(), "spawning test process");

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.program.display()))?;
        let stdout = child.stdout.take().context("missing stdout")?;
        let stderr = child.stderr.take().context("missing stderr")?;
        let mut guard = ChildGuard::new(child);

        // Both pipes drain in the background so a noisy child never blocks.
        let mut stdout_handle = tokio::spawn(collect_stdout(stdout, target.address, events.cloned()));
        let mut stderr_handle = tokio::spawn(forward_lines(stderr, events.cloned()));

        let waited = match target.timeout {
            Some(limit) => tokio::time::timeout(limit, guard.wait()).await.ok(),
            None => Some(guard.wait().await),
        };
        let Some(status) = waited else {
            warn!(address = %target.address, timeout = ?target.timeout, "test timed out, killing");
            guard.terminate().await;
            stdout_handle.abort();
            stderr_handle.abort();
            return Ok(Completion::error(TIMEOUT_MESSAGE, Context::Test));
        };
        let status = status?;

        // Anything the test forked may still hold the pipes open.
        drop(guard);
        let report = match tokio::time::timeout(DRAIN_GRACE, &mut stdout_handle).await {
            Ok(joined) => joined.ok().flatten(),
            Err(_) => {
                warn!(address = %target.address, "test output did not close after exit");
                stdout_handle.abort();
                None
            }
        };
        if tokio::time::timeout(DRAIN_GRACE, &mut stderr_handle).await.is_err() {
            stderr_handle.abort();
        }

        let termination = Termination::from(status);
        debug!(address = %target.address, ?termination, reported = report.is_some(), "test process ended");
        Ok(classify(target.function.expectation(), report, termination))
    }

    fn mode(&self) -> IsolationMode {
        IsolationMode::Isolated
    }
}

/// Call `on_line` for every `\n`-terminated chunk until EOF, line ending
/// stripped. Output is raw bytes; nothing here assumes UTF-8.
async fn read_lines<R, F>(reader: R, mut on_line: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(&[u8]),
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = buf.strip_suffix(b"\n").unwrap_or(&buf[..]);
                on_line(line.strip_suffix(b"\r").unwrap_or(line));
            }
            Err(e) => {
                warn!(error = %e, "failed to read test output");
                break;
            }
        }
    }
}

/// Drain stdout, forwarding ordinary output and keeping the last report.
async fn collect_stdout<R: AsyncRead + Unpin>(
    reader: R,
    address: Address,
    events: Option<EventSender>,
) -> Option<Completion> {
    let mut report = None;
    read_lines(reader, |line| match child::parse_report_line(line) {
        Some(Ok(completion)) => report = Some(completion),
        Some(Err(e)) => warn!(%address, error = %e, "bad child report"),
        None if line.trim_ascii().is_empty() => {}
        None => emit(
            events.as_ref(),
            RunEvent::Output {
                line: String::from_utf8_lossy(line).into_owned(),
            },
        ),
    })
    .await;
    report
}

async fn forward_lines<R: AsyncRead + Unpin>(reader: R, events: Option<EventSender>) {
    read_lines(reader, |line| {
        let line = String::from_utf8_lossy(line).into_owned();
        debug!(line = %line, "[stderr]");
        emit(events.as_ref(), RunEvent::Output { line });
    })
    .await;
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    Signaled(i32),
    Unknown,
}

impl From<ExitStatus> for Termination {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Termination::Exited(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(sig) = status.signal() {
                return Termination::Signaled(sig);
            }
        }
        Termination::Unknown
    }
}

/// Decide the outcome of an isolated run from what the child reported (if
/// anything) and how it ended.
pub fn classify(expect: Expectation, report: Option<Completion>, termination: Termination) -> Completion {
    match termination {
        Termination::Signaled(sig) => match expect {
            Expectation::Signal(want) if want == sig => Completion::pass(),
            Expectation::Signal(want) => Completion::error(
                format!(
                    "Received signal {sig} ({}), expected {want} ({})",
                    signal_name(sig),
                    signal_name(want)
                ),
                Context::Test,
            ),
            _ => Completion::error(
                format!("Received signal {sig} ({})", signal_name(sig)),
                Context::Test,
            ),
        },
        Termination::Exited(code) => match report {
            Some(report) if report.status != Status::Pass => report,
            Some(report) => match expect {
                Expectation::Return if code == 0 => report,
                Expectation::Return => Completion::error(
                    format!("Early exit with return value {code}"),
                    Context::Test,
                ),
                Expectation::Exit(want) => fail(format!(
                    "Test returned normally but expected exit value {want}"
                )),
                Expectation::Signal(want) => fail(format!(
                    "Test completed but expected signal {want} ({})",
                    signal_name(want)
                )),
            },
            None => match expect {
                Expectation::Return if code == 0 => Completion::pass(),
                Expectation::Exit(want) if want == code => Completion::pass(),
                Expectation::Exit(want) => Completion::error(
                    format!("Early exit with return value {code}, expected {want}"),
                    Context::Test,
                ),
                _ => Completion::error(
                    format!("Early exit with return value {code}"),
                    Context::Test,
                ),
            },
        },
        Termination::Unknown => report.unwrap_or_else(|| {
            Completion::error("Test process ended without a status", Context::Test)
        }),
    }
}

fn fail(message: String) -> Completion {
    Completion {
        status: Status::Fail,
        context: Context::Test,
        message: Some(message),
        location: None,
    }
}

/// Human-readable name of a signal number.
pub fn signal_name(sig: i32) -> &'static str {
    #[cfg(unix)]
    {
        match sig {
            libc::SIGHUP => "Hangup",
            libc::SIGINT => "Interrupt",
            libc::SIGQUIT => "Quit",
            libc::SIGILL => "Illegal instruction",
            libc::SIGTRAP => "Trace/breakpoint trap",
            libc::SIGABRT => "Aborted",
            libc::SIGBUS => "Bus error",
            libc::SIGFPE => "Floating point exception",
            libc::SIGKILL => "Killed",
            libc::SIGUSR1 => "User defined signal 1",
            libc::SIGSEGV => "Segmentation fault",
            libc::SIGUSR2 => "User defined signal 2",
            libc::SIGPIPE => "Broken pipe",
            libc::SIGALRM => "Alarm clock",
            libc::SIGTERM => "Terminated",
            _ => "Unknown signal",
        }
    }
    #[cfg(not(unix))]
    {
        let _ = sig;
        "Unknown signal"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert::Failure;
    use pretty_assertions::assert_eq;

    fn failed(msg: &str) -> Completion {
        Completion::failed(Failure::bare(msg), Context::Test)
    }

    fn message(c: &Completion) -> &str {
        c.message.as_deref().unwrap_or_default()
    }

    #[test]
    fn reported_results_pass_through() {
        let c = classify(Expectation::Return, Some(Completion::pass()), Termination::Exited(0));
        assert_eq!(c, Completion::pass());

        let c = classify(Expectation::Return, Some(failed("Red fail")), Termination::Exited(0));
        assert_eq!(c, failed("Red fail"));

        let c = classify(Expectation::Signal(6), Some(failed("no abort")), Termination::Exited(0));
        assert_eq!(c, failed("no abort"));
    }

    #[test]
    fn early_exits() {
        let c = classify(Expectation::Return, None, Termination::Exited(0));
        assert_eq!(c.status, Status::Pass);

        let c = classify(Expectation::Return, None, Termination::Exited(1));
        assert_eq!(c.status, Status::Error);
        assert_eq!(message(&c), "Early exit with return value 1");

        let c = classify(Expectation::Exit(3), None, Termination::Exited(3));
        assert_eq!(c.status, Status::Pass);

        let c = classify(Expectation::Exit(3), None, Termination::Exited(4));
        assert_eq!(message(&c), "Early exit with return value 4, expected 3");

        let c = classify(Expectation::Exit(3), Some(Completion::pass()), Termination::Exited(0));
        assert_eq!(c.status, Status::Fail);
        assert_eq!(message(&c), "Test returned normally but expected exit value 3");
    }

    #[test]
    fn signals() {
        let c = classify(Expectation::Return, None, Termination::Signaled(11));
        assert_eq!(c.status, Status::Error);
        assert!(message(&c).starts_with("Received signal 11 ("));

        let c = classify(Expectation::Signal(11), None, Termination::Signaled(11));
        assert_eq!(c.status, Status::Pass);

        let c = classify(Expectation::Signal(6), None, Termination::Signaled(11));
        assert_eq!(c.status, Status::Error);
        assert!(message(&c).contains(", expected 6 ("));

        let c = classify(Expectation::Signal(6), Some(Completion::pass()), Termination::Exited(0));
        assert_eq!(c.status, Status::Fail);
        assert!(message(&c).starts_with("Test completed but expected signal 6"));
    }

    #[tokio::test]
    async fn stdout_reader_handles_binary_output() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut out = b"\xff\xfe garbage\nplain\r\n".to_vec();
        child::write_report(&mut out, &failed("should be recorded")).unwrap();
        out.extend_from_slice(b"no newline at the end");
        let address = Address {
            suite: 0,
            case: 0,
            function: 0,
            iteration: None,
        };

        let report = collect_stdout(&out[..], address, Some(tx)).await;
        assert_eq!(report, Some(failed("should be recorded")));

        let mut lines = Vec::new();
        while let Ok(RunEvent::Output { line }) = rx.try_recv() {
            lines.push(line);
        }
        assert_eq!(
            lines,
            vec!["\u{fffd}\u{fffd} garbage", "plain", "no newline at the end"]
        );
    }

    #[tokio::test]
    async fn large_output_is_drained_to_the_end() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut out = Vec::new();
        for i in 0..20_000 {
            out.extend_from_slice(format!("line {i} ").as_bytes());
            out.extend_from_slice(b"\xc3\n");
        }
        child::write_report(&mut out, &Completion::pass()).unwrap();

        let address = Address {
            suite: 0,
            case: 0,
            function: 0,
            iteration: None,
        };
        let report = collect_stdout(&out[..], address, Some(tx)).await;
        assert_eq!(report, Some(Completion::pass()));
        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 20_000);
    }

    #[cfg(unix)]
    #[test]
    fn termination_from_raw_status() {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(Termination::from(ExitStatus::from_raw(0)), Termination::Exited(0));
        assert_eq!(Termination::from(ExitStatus::from_raw(3 << 8)), Termination::Exited(3));
        assert_eq!(
            Termination::from(ExitStatus::from_raw(libc::SIGSEGV)),
            Termination::Signaled(libc::SIGSEGV)
        );
        assert_eq!(signal_name(libc::SIGSEGV), "Segmentation fault");
        assert_eq!(signal_name(libc::SIGABRT), "Aborted");
    }
}
