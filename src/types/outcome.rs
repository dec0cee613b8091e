//! Two-valued outcome type.
//!
//! An [`Outcome`] is what a resolved [`Promise`](crate::Promise) holds: either
//! the produced value or the failure that prevented it. Unlike a plain
//! [`Result`], the accessors are strict: asking a failure for its value (or a
//! success for its failure) is a programming error and panics.
//!
//! # Example
//!
//! ```ignore
//! use vatflow::Outcome;
//!
//! let ok: Outcome<u32> = Outcome::Success(7);
//! assert_eq!(*ok.value(), 7);
//! assert_eq!(ok.force().unwrap(), 7);
//! ```

use crate::error::{Error, Result};
use std::fmt;

/// The terminal result of an asynchronous operation.
#[derive(Clone, PartialEq)]
pub enum Outcome<T> {
    /// The operation produced a value.
    Success(T),
    /// The operation failed.
    Failure(Error),
}

impl<T> Outcome<T> {
    /// Returns true for [`Outcome::Success`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns true for [`Outcome::Failure`].
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Converts into a [`Result`], re-raising the failure as `Err`.
    pub fn force(self) -> Result<T> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failure(error) => Err(error),
        }
    }

    /// Returns the success value.
    ///
    /// # Panics
    ///
    /// Panics if the outcome is a failure.
    #[must_use]
    pub fn value(&self) -> &T {
        match self {
            Self::Success(value) => value,
            Self::Failure(error) => panic!("Outcome is a failure: {error}"),
        }
    }

    /// Returns the failure.
    ///
    /// # Panics
    ///
    /// Panics if the outcome is a success.
    #[must_use]
    pub fn failure(&self) -> &Error {
        match self {
            Self::Success(_) => panic!("Outcome is a success"),
            Self::Failure(error) => error,
        }
    }

    /// Maps the success value, leaving a failure untouched.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Success(value) => Outcome::Success(f(value)),
            Self::Failure(error) => Outcome::Failure(error),
        }
    }

    /// Borrows the outcome as a `Result` of references.
    pub fn as_result(&self) -> std::result::Result<&T, &Error> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failure(error) => Err(error),
        }
    }
}

impl<T> From<Result<T>> for Outcome<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(error) => Self::Failure(error),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Outcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(value) => f.debug_tuple("Success").field(value).finish(),
            Self::Failure(error) => f.debug_tuple("Failure").field(&error.to_string()).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn init_test(test_name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(test_name);
    }

    #[test]
    fn force_reraises_failure() {
        init_test("force_reraises_failure");
        let failed: Outcome<u8> = Outcome::Failure(Error::closed("gone"));
        let err = failed.force().unwrap_err();
        crate::assert_with_log!(
            err.kind() == ErrorKind::Closed,
            "failure kind survives force",
            ErrorKind::Closed,
            err.kind()
        );
        crate::test_complete!("force_reraises_failure");
    }

    #[test]
    #[should_panic(expected = "Outcome is a failure")]
    fn value_on_failure_panics() {
        let failed: Outcome<u8> = Outcome::Failure(Error::usage("nope"));
        let _ = failed.value();
    }

    #[test]
    #[should_panic(expected = "Outcome is a success")]
    fn failure_on_success_panics() {
        let ok = Outcome::Success(1_u8);
        let _ = ok.failure();
    }

    #[test]
    fn result_conversions() {
        init_test("result_conversions");
        let outcome: Outcome<i32> = Ok(5).into();
        crate::assert_with_log!(outcome.is_success(), "ok becomes success", true, outcome.is_success());
        let mapped = outcome.map(|v| v * 2);
        crate::assert_with_log!(*mapped.value() == 10, "mapped value", 10, *mapped.value());
        let back: Result<i32> = Outcome::<i32>::Failure(Error::protocol("x")).force();
        crate::assert_with_log!(back.is_err(), "failure becomes err", true, back.is_err());
        crate::test_complete!("result_conversions");
    }
}
