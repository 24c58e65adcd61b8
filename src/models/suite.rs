use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use crate::assert::Outcome;
use crate::error::ModelError;
use crate::tags::{self, TagSet};

/// Body of a test function; receives the loop iteration (0 for plain tests).
pub type TestBody = Arc<dyn Fn(i32) -> Outcome + Send + Sync>;

/// Setup or teardown hook.
pub type Hook = Arc<dyn Fn() -> Outcome + Send + Sync>;

/// How a function is expected to terminate when run in isolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expectation {
    /// Returns normally (exit value 0).
    #[default]
    Return,
    /// Exits the process with this value.
    Exit(i32),
    /// Is killed by this signal number.
    Signal(i32),
}

pub struct TestFunction {
    name: String,
    body: TestBody,
    iterations: Option<Range<i32>>,
    expect: Expectation,
}

impl TestFunction {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn expectation(&self) -> Expectation {
        self.expect
    }

    /// Iterations to execute: `[None]` for a plain test, one `Some(i)` per
    /// loop index otherwise.
    pub fn iterations(&self) -> Vec<Option<i32>> {
        match &self.iterations {
            Some(range) => range.clone().map(Some).collect(),
            None => vec![None],
        }
    }

    pub(crate) fn call(&self, iteration: Option<i32>) -> Outcome {
        (self.body)(iteration.unwrap_or(0))
    }
}

impl fmt::Debug for TestFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestFunction")
            .field("name", &self.name)
            .field("iterations", &self.iterations)
            .field("expect", &self.expect)
            .finish_non_exhaustive()
    }
}

/// A setup/teardown pair; either half may be absent.
#[derive(Clone, Default)]
pub struct Fixture {
    pub setup: Option<Hook>,
    pub teardown: Option<Hook>,
}

pub struct TestCase {
    name: String,
    tags: TagSet,
    functions: Vec<TestFunction>,
    unchecked: Vec<Fixture>,
    checked: Vec<Fixture>,
    /// `None` inherits the run's default; `Some(ZERO)` disables the timeout.
    timeout: Option<Duration>,
}

impl TestCase {
    pub fn new(name: impl Into<String>) -> Result<Self, ModelError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ModelError::EmptyCaseName);
        }
        Ok(Self {
            name,
            tags: TagSet::default(),
            functions: Vec::new(),
            unchecked: Vec::new(),
            checked: Vec::new(),
            timeout: None,
        })
    }

    pub fn tagged(name: impl Into<String>, tags: &str) -> Result<Self, ModelError> {
        let mut case = Self::new(name)?;
        case.set_tags(Some(tags));
        Ok(case)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replace the tag set. `None` or an empty string clears it.
    pub fn set_tags(&mut self, tags: Option<&str>) -> &mut Self {
        self.tags = TagSet::parse(tags);
        self
    }

    pub fn tag_set(&self) -> &TagSet {
        &self.tags
    }

    /// Normalized tag string.
    pub fn tags(&self) -> &str {
        self.tags.as_str()
    }

    /// Write the normalized tag string into `buf` (NUL-terminated, truncated
    /// to `buf.len() - 1` bytes) and return its untruncated length. Pass an
    /// empty slice to query the length alone.
    pub fn get_tags(&self, buf: &mut [u8]) -> usize {
        tags::copy_to_buffer(self.tags.as_str(), buf)
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn add_test<F>(&mut self, name: &str, f: F) -> Result<&mut Self, ModelError>
    where
        F: Fn() -> Outcome + Send + Sync + 'static,
    {
        self.push(name, Arc::new(move |_: i32| f()), None, Expectation::Return)
    }

    /// Register a test that runs once per index in `range`, each run producing
    /// its own result.
    pub fn add_loop_test<F>(
        &mut self,
        name: &str,
        f: F,
        range: Range<i32>,
    ) -> Result<&mut Self, ModelError>
    where
        F: Fn(i32) -> Outcome + Send + Sync + 'static,
    {
        if range.is_empty() {
            return Err(ModelError::EmptyLoopRange {
                function: name.to_string(),
                start: range.start,
                end: range.end,
            });
        }
        self.push(name, Arc::new(f), Some(range), Expectation::Return)
    }

    /// Register a test that passes only when its process exits with `code`.
    pub fn add_exit_test<F>(&mut self, name: &str, f: F, code: i32) -> Result<&mut Self, ModelError>
    where
        F: Fn() -> Outcome + Send + Sync + 'static,
    {
        let expect = if code == 0 {
            Expectation::Return
        } else {
            Expectation::Exit(code)
        };
        self.push(name, Arc::new(move |_: i32| f()), None, expect)
    }

    /// Register a test that passes only when its process is killed by `signal`.
    pub fn add_signal_test<F>(
        &mut self,
        name: &str,
        f: F,
        signal: i32,
    ) -> Result<&mut Self, ModelError>
    where
        F: Fn() -> Outcome + Send + Sync + 'static,
    {
        let expect = if signal == 0 {
            Expectation::Return
        } else {
            Expectation::Signal(signal)
        };
        self.push(name, Arc::new(move |_: i32| f()), None, expect)
    }

    fn push(
        &mut self,
        name: &str,
        body: TestBody,
        iterations: Option<Range<i32>>,
        expect: Expectation,
    ) -> Result<&mut Self, ModelError> {
        if name.is_empty() {
            return Err(ModelError::EmptyFunctionName {
                case: self.name.clone(),
            });
        }
        self.functions.push(TestFunction {
            name: name.to_string(),
            body,
            iterations,
            expect,
        });
        Ok(self)
    }

    /// Hooks run once per run in the runner's own process, around all of
    /// this case's functions.
    pub fn add_unchecked_fixture(
        &mut self,
        setup: Option<Hook>,
        teardown: Option<Hook>,
    ) -> &mut Self {
        self.unchecked.push(Fixture { setup, teardown });
        self
    }

    /// Hooks run around every function, in the function's own execution
    /// context.
    pub fn add_checked_fixture(&mut self, setup: Option<Hook>, teardown: Option<Hook>) -> &mut Self {
        self.checked.push(Fixture { setup, teardown });
        self
    }

    pub fn functions(&self) -> &[TestFunction] {
        &self.functions
    }

    /// Unchecked setups in registration order.
    pub fn unchecked_setups(&self) -> impl Iterator<Item = &Hook> {
        self.unchecked.iter().filter_map(|f| f.setup.as_ref())
    }

    /// Unchecked teardowns, last registered first.
    pub fn unchecked_teardowns(&self) -> impl Iterator<Item = &Hook> {
        self.unchecked.iter().rev().filter_map(|f| f.teardown.as_ref())
    }

    pub fn checked_setups(&self) -> impl Iterator<Item = &Hook> {
        self.checked.iter().filter_map(|f| f.setup.as_ref())
    }

    pub fn checked_teardowns(&self) -> impl Iterator<Item = &Hook> {
        self.checked.iter().rev().filter_map(|f| f.teardown.as_ref())
    }
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("name", &self.name)
            .field("tags", &self.tags.as_str())
            .field("functions", &self.functions)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct Suite {
    name: String,
    cases: Vec<TestCase>,
}

impl Suite {
    pub fn new(name: impl Into<String>) -> Result<Self, ModelError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ModelError::EmptySuiteName);
        }
        Ok(Self {
            name,
            cases: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_case(&mut self, case: TestCase) -> &mut Self {
        self.cases.push(case);
        self
    }

    pub fn cases(&self) -> &[TestCase] {
        &self.cases
    }

    /// First case registered under `name`.
    pub fn find_case(&self, name: &str) -> Option<&TestCase> {
        self.cases.iter().find(|c| c.name == name)
    }

    pub fn find_case_mut(&mut self, name: &str) -> Option<&mut TestCase> {
        self.cases.iter_mut().find(|c| c.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pass() -> Outcome {
        Ok(())
    }

    #[test]
    fn empty_names_are_rejected() {
        assert_eq!(Suite::new("").unwrap_err(), ModelError::EmptySuiteName);
        assert_eq!(TestCase::new("").unwrap_err(), ModelError::EmptyCaseName);
        let mut case = TestCase::new("c").unwrap();
        assert_eq!(
            case.add_test("", pass).unwrap_err(),
            ModelError::EmptyFunctionName { case: "c".into() }
        );
    }

    #[test]
    fn empty_loop_range_is_rejected() {
        let mut case = TestCase::new("c").unwrap();
        let err = case.add_loop_test("l", |_| Ok(()), 3..3).unwrap_err();
        assert!(matches!(err, ModelError::EmptyLoopRange { start: 3, end: 3, .. }));
    }

    #[test]
    fn set_tags_replaces_and_normalizes() {
        let mut case = TestCase::tagged("c", "  Red   Blue ").unwrap();
        assert_eq!(case.tags(), "Red Blue");
        case.set_tags(Some("Green"));
        assert_eq!(case.tags(), "Green");
        assert!(!case.tag_set().contains("Red"));
        case.set_tags(None);
        assert_eq!(case.tags(), "");
        case.set_tags(Some(""));
        assert!(case.tag_set().is_empty());
    }

    #[test]
    fn get_tags_size_query_then_copy() {
        let case = TestCase::tagged("c", "Red Blue").unwrap();
        let len = case.get_tags(&mut []);
        assert_eq!(len, 8);

        let mut small = [0u8; 5];
        assert_eq!(case.get_tags(&mut small), 8);
        assert_eq!(&small, b"Red \0");

        let mut buf = vec![0u8; len + 1];
        assert_eq!(case.get_tags(&mut buf), len);
        assert_eq!(&buf[..len], case.tags().as_bytes());
        assert_eq!(buf[len], 0);
    }

    #[test]
    fn functions_keep_registration_order() {
        let mut case = TestCase::new("c").unwrap();
        case.add_test("b", pass)
            .unwrap()
            .add_test("a", pass)
            .unwrap()
            .add_loop_test("l", |_| Ok(()), 0..3)
            .unwrap();
        let names: Vec<_> = case.functions().iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["b", "a", "l"]);
        assert_eq!(case.functions()[0].iterations(), vec![None]);
        assert_eq!(
            case.functions()[2].iterations(),
            vec![Some(0), Some(1), Some(2)]
        );
    }

    #[test]
    fn zero_exit_or_signal_means_plain_return() {
        let mut case = TestCase::new("c").unwrap();
        case.add_exit_test("e0", pass, 0).unwrap();
        case.add_exit_test("e3", pass, 3).unwrap();
        case.add_signal_test("s0", pass, 0).unwrap();
        case.add_signal_test("s6", pass, 6).unwrap();
        let expects: Vec<_> = case.functions().iter().map(|f| f.expectation()).collect();
        assert_eq!(
            expects,
            vec![
                Expectation::Return,
                Expectation::Exit(3),
                Expectation::Return,
                Expectation::Signal(6)
            ]
        );
    }

    #[test]
    fn teardowns_run_in_reverse_registration_order() {
        let hook = |_: &str| -> Hook { Arc::new(|| -> Outcome { Ok(()) }) };
        let mut case = TestCase::new("c").unwrap();
        case.add_unchecked_fixture(Some(hook("s1")), Some(hook("t1")));
        case.add_unchecked_fixture(None, Some(hook("t2")));
        assert_eq!(case.unchecked_setups().count(), 1);
        let first_teardown = case.unchecked_teardowns().next().unwrap();
        let t2 = case.unchecked[1].teardown.as_ref().unwrap();
        assert!(Arc::ptr_eq(first_teardown, t2));
    }
}
