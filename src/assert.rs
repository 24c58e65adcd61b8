//! The failure primitive test bodies use to end with a diagnostic.
//!
//! A body returns [`Outcome`]; `Err(Failure)` marks the test as failed. The
//! macros return early, so the first failure a body signals is the one that
//! gets recorded.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Source position of a signalled failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    pub line: u32,
}

impl Location {
    #[track_caller]
    pub fn caller() -> Self {
        let loc = std::panic::Location::caller();
        Self {
            file: loc.file().to_string(),
            line: loc.line(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    message: String,
    location: Option<Location>,
}

impl Failure {
    #[track_caller]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: Some(Location::caller()),
        }
    }

    /// A failure with no source position, e.g. synthesized by the runner.
    pub fn bare(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: None,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "{}: {}", loc, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for Failure {}

/// What a test body, fixture or hook returns.
pub type Outcome = Result<(), Failure>;

/// Return a [`Failure`] built from a format string.
#[macro_export]
macro_rules! fail {
    ($($arg:tt)+) => {
        return ::core::result::Result::Err($crate::Failure::new(::std::format!($($arg)+)))
    };
}

/// Fail unless `cond` holds.
#[macro_export]
macro_rules! check {
    ($cond:expr $(,)?) => {
        if !$cond {
            $crate::fail!("Assertion '{}' failed", ::core::stringify!($cond));
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::fail!($($arg)+);
        }
    };
}

/// Fail unless both operands compare equal.
#[macro_export]
macro_rules! check_eq {
    ($left:expr, $right:expr $(,)?) => {
        match (&$left, &$right) {
            (l, r) => {
                if !(*l == *r) {
                    $crate::fail!(
                        "Assertion '{} == {}' failed: {} == {:?}, {} == {:?}",
                        ::core::stringify!($left),
                        ::core::stringify!($right),
                        ::core::stringify!($left),
                        l,
                        ::core::stringify!($right),
                        r
                    );
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn always_fails() -> Outcome {
        fail!("Red fail");
    }

    fn fails_twice() -> Outcome {
        check!(1 + 1 == 3, "first {}", 1);
        check!(false, "second");
        Ok(())
    }

    fn compares(a: i32, b: i32) -> Outcome {
        check_eq!(a, b);
        Ok(())
    }

    #[test]
    fn fail_records_message_and_location() {
        let err = always_fails().unwrap_err();
        assert_eq!(err.message(), "Red fail");
        let loc = err.location().unwrap();
        assert!(loc.file.ends_with("assert.rs"));
        assert!(loc.line > 0);
    }

    #[test]
    fn first_signal_wins() {
        assert_eq!(fails_twice().unwrap_err().message(), "first 1");
    }

    #[test]
    fn check_without_message_names_the_condition() {
        fn body() -> Outcome {
            let x = 2;
            check!(x > 5);
            Ok(())
        }
        assert_eq!(body().unwrap_err().message(), "Assertion 'x > 5' failed");
    }

    #[test]
    fn check_eq_shows_both_sides() {
        assert!(compares(3, 3).is_ok());
        assert_eq!(
            compares(1, 2).unwrap_err().message(),
            "Assertion 'a == b' failed: a == 1, b == 2"
        );
    }

    #[test]
    fn percent_signs_are_plain_data() {
        fn body() -> Outcome {
            let got = "100%s done %d";
            fail!("Expected {}, got {}", "ok", got);
        }
        assert_eq!(body().unwrap_err().message(), "Expected ok, got 100%s done %d");
    }
}
