pub mod body;
pub mod child;
pub mod inline;
pub mod isolated;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{Config, FilterConfig};
use crate::error::ProtocolError;
use crate::events::{EventSender, RunEvent, emit};
use crate::models::{Context, ResultRecord, Suite, TestCase, TestFunction, TestId};
use crate::report::RunReport;
use crate::tags::TagFilter;

pub use body::Completion;
pub use inline::InlineExecutor;
pub use isolated::IsolatedExecutor;

/// Where test functions execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationMode {
    /// One child process per function; crashes and timeouts are contained.
    #[default]
    Isolated,
    /// Everything runs in the runner's process. Meant for debugging.
    Inline,
}

/// Selection applied to one run.
///
/// `include`/`exclude` follow the tag rules in [`crate::tags`]; `suite` and
/// `case` are glob patterns over names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub suite: Option<String>,
    pub case: Option<String>,
    pub include: Option<String>,
    pub exclude: Option<String>,
}

impl Filter {
    /// Selects everything.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn tags(include: Option<&str>, exclude: Option<&str>) -> Self {
        Self {
            include: include.map(str::to_string),
            exclude: exclude.map(str::to_string),
            ..Self::default()
        }
    }

    pub fn with_suite(mut self, pattern: impl Into<String>) -> Self {
        self.suite = Some(pattern.into());
        self
    }

    pub fn with_case(mut self, pattern: impl Into<String>) -> Self {
        self.case = Some(pattern.into());
        self
    }

    pub fn from_config(config: &FilterConfig) -> Self {
        Self {
            suite: config.suite.clone(),
            case: config.case.clone(),
            include: config.include_tags.clone(),
            exclude: config.exclude_tags.clone(),
        }
    }
}

/// Glob over names; a pattern that does not compile matches itself literally.
struct NameSelector {
    pattern: Option<std::result::Result<glob::Pattern, String>>,
}

impl NameSelector {
    fn new(pattern: Option<&str>) -> Self {
        let pattern = pattern.map(|p| glob::Pattern::new(p).map_err(|_| p.to_string()));
        Self { pattern }
    }

    fn matches(&self, name: &str) -> bool {
        match &self.pattern {
            None => true,
            Some(Ok(glob)) => glob.matches(name),
            Some(Err(literal)) => literal == name,
        }
    }
}

/// Position of one function execution in the registered model. Child
/// processes receive it to find the function they should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    pub suite: usize,
    pub case: usize,
    pub function: usize,
    pub iteration: Option<i32>,
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.suite, self.case, self.function)?;
        if let Some(i) = self.iteration {
            write!(f, ":{i}")?;
        }
        Ok(())
    }
}

impl FromStr for Address {
    type Err = ProtocolError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bad = || ProtocolError::BadAddress(s.to_string());
        let parts: Vec<&str> = s.split(':').collect();
        if !(3..=4).contains(&parts.len()) {
            return Err(bad());
        }
        let index = |p: &str| p.parse::<usize>().map_err(|_| bad());
        let iteration = match parts.get(3) {
            Some(p) => Some(p.parse::<i32>().map_err(|_| bad())?),
            None => None,
        };
        Ok(Self {
            suite: index(parts[0])?,
            case: index(parts[1])?,
            function: index(parts[2])?,
            iteration,
        })
    }
}

/// One function execution handed to an [`Executor`].
pub struct Target<'a> {
    pub address: Address,
    pub suite: &'a Suite,
    pub case: &'a TestCase,
    pub function: &'a TestFunction,
    /// `None` when no timeout applies.
    pub timeout: Option<Duration>,
}

impl Target<'_> {
    pub fn id(&self) -> TestId {
        TestId {
            suite: self.suite.name().to_string(),
            case: self.case.name().to_string(),
            function: self.function.name().to_string(),
            iteration: self.address.iteration,
        }
    }
}

/// Runs a single test function and reports how it ended.
#[async_trait]
pub trait Executor: Send + Sync {
    /// `Err` is reserved for infrastructure failures that make the rest of
    /// the run meaningless; test failures are reported through [`Completion`].
    async fn execute(&self, target: &Target<'_>, events: Option<&EventSender>) -> Result<Completion>;

    fn mode(&self) -> IsolationMode;
}

/// Construct the executor for `mode`.
pub fn executor_for(mode: IsolationMode) -> Result<Arc<dyn Executor>> {
    Ok(match mode {
        IsolationMode::Inline => Arc::new(InlineExecutor),
        IsolationMode::Isolated => Arc::new(IsolatedExecutor::for_current_exe()?),
    })
}

/// Owns the registered suites and the report of the most recent run.
pub struct Runner {
    suites: Vec<Suite>,
    config: Config,
    report: RunReport,
    events: Option<EventSender>,
}

impl Runner {
    pub fn new(suite: Suite) -> Self {
        let mut runner = Self::empty();
        runner.add_suite(suite);
        runner
    }

    pub fn empty() -> Self {
        Self {
            suites: Vec::new(),
            config: Config::default(),
            report: RunReport::new(),
            events: None,
        }
    }

    pub fn add_suite(&mut self, suite: Suite) -> &mut Self {
        self.suites.push(suite);
        self
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Stream progress events to `tx` during every run.
    pub fn with_events(mut self, tx: EventSender) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn suites(&self) -> &[Suite] {
        &self.suites
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Report of the last run (empty before the first).
    pub fn report(&self) -> &RunReport {
        &self.report
    }

    pub fn total_run(&self) -> usize {
        self.report.total_run()
    }

    pub fn total_failed(&self) -> usize {
        self.report.total_failed()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ResultRecord> {
        self.report.failures()
    }

    /// Run with the filter and isolation mode from the runner's [`Config`].
    pub async fn run_configured(&mut self) -> Result<&RunReport> {
        let filter = Filter::from_config(&self.config.filter);
        let mode = self.config.isolation;
        self.run(&filter, mode).await
    }

    pub async fn run(&mut self, filter: &Filter, mode: IsolationMode) -> Result<&RunReport> {
        let executor = executor_for(mode)?;
        self.run_with(executor.as_ref(), filter).await
    }

    /// Walk suites, cases and functions in registration order, executing
    /// every selected function through `executor`. The previous report is
    /// replaced.
    pub async fn run_with(&mut self, executor: &dyn Executor, filter: &Filter) -> Result<&RunReport> {
        let started = Instant::now();
        let tags = TagFilter::new(filter.include.as_deref(), filter.exclude.as_deref());
        let suite_sel = NameSelector::new(filter.suite.as_deref());
        let case_sel = NameSelector::new(filter.case.as_deref());
        let events = self.events.as_ref();
        let mut report = RunReport::new();

        info!(mode = ?executor.mode(), suites = self.suites.len(), "run started");
        emit(events, RunEvent::RunStarted);

        for (si, suite) in self.suites.iter().enumerate() {
            if !suite_sel.matches(suite.name()) {
                debug!(suite = suite.name(), "suite not selected");
                continue;
            }
            for (ci, case) in suite.cases().iter().enumerate() {
                if !case_sel.matches(case.name()) || !tags.should_run(case.tag_set()) {
                    debug!(suite = suite.name(), case = case.name(), tags = case.tags(), "case skipped");
                    emit(
                        events,
                        RunEvent::CaseSkipped {
                            suite: suite.name().to_string(),
                            case: case.name().to_string(),
                        },
                    );
                    continue;
                }
                let run = CaseRun {
                    executor,
                    events,
                    timeout: self.config.effective_timeout(case.timeout()),
                    suite_index: si,
                    suite,
                    case_index: ci,
                    case,
                };
                run.execute(&mut report).await?;
            }
        }

        report.set_duration(started.elapsed());
        let summary = report.summary();
        info!(
            total = summary.total,
            failed = summary.failed,
            errors = summary.errors,
            "run finished"
        );
        emit(events, RunEvent::RunFinished { summary });
        self.report = report;
        Ok(&self.report)
    }
}

/// One selected case within a run.
struct CaseRun<'a> {
    executor: &'a dyn Executor,
    events: Option<&'a EventSender>,
    timeout: Option<Duration>,
    suite_index: usize,
    suite: &'a Suite,
    case_index: usize,
    case: &'a TestCase,
}

impl CaseRun<'_> {
    async fn execute(&self, report: &mut RunReport) -> Result<()> {
        emit(
            self.events,
            RunEvent::CaseStarted {
                suite: self.suite.name().to_string(),
                case: self.case.name().to_string(),
            },
        );

        for hook in self.case.unchecked_setups() {
            if let Err(completion) = body::guarded(|| hook(), Context::Setup) {
                warn!(
                    suite = self.suite.name(),
                    case = self.case.name(),
                    error = completion.message.as_deref().unwrap_or_default(),
                    "unchecked setup failed, skipping case"
                );
                self.record(report, completion.into_record(self.fixture_id("(setup)"), Duration::ZERO));
                self.finish();
                return Ok(());
            }
        }

        for (fi, function) in self.case.functions().iter().enumerate() {
            for iteration in function.iterations() {
                let target = Target {
                    address: Address {
                        suite: self.suite_index,
                        case: self.case_index,
                        function: fi,
                        iteration,
                    },
                    suite: self.suite,
                    case: self.case,
                    function,
                    timeout: self.timeout,
                };
                emit(
                    self.events,
                    RunEvent::TestStarted {
                        suite: self.suite.name().to_string(),
                        case: self.case.name().to_string(),
                        function: function.name().to_string(),
                        iteration,
                    },
                );
                let started = Instant::now();
                let completion = self.executor.execute(&target, self.events).await?;
                debug!(address = %target.address, status = ?completion.status, "test finished");
                self.record(report, completion.into_record(target.id(), started.elapsed()));
            }
        }

        for hook in self.case.unchecked_teardowns() {
            if let Err(completion) = body::guarded(|| hook(), Context::Teardown) {
                warn!(
                    suite = self.suite.name(),
                    case = self.case.name(),
                    error = completion.message.as_deref().unwrap_or_default(),
                    "unchecked teardown failed"
                );
                self.record(report, completion.into_record(self.fixture_id("(teardown)"), Duration::ZERO));
            }
        }

        self.finish();
        Ok(())
    }

    fn record(&self, report: &mut RunReport, record: ResultRecord) {
        emit(
            self.events,
            RunEvent::TestFinished {
                record: record.clone(),
            },
        );
        report.record(record);
    }

    fn finish(&self) {
        emit(
            self.events,
            RunEvent::CaseFinished {
                suite: self.suite.name().to_string(),
                case: self.case.name().to_string(),
            },
        );
    }

    fn fixture_id(&self, function: &str) -> TestId {
        TestId {
            suite: self.suite.name().to_string(),
            case: self.case.name().to_string(),
            function: function.to_string(),
            iteration: None,
        }
    }
}
