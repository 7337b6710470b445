use std::backtrace::Backtrace;

use crate::error::FetchError;

/// Outcome of a `try_*` call: never an `Err`, the failure is data.
#[derive(Debug)]
pub enum FetchResult<T> {
    Success(T),
    Failure {
        error: FetchError,
        /// Captured where the failure was converted. Honors `RUST_BACKTRACE`.
        trace: Backtrace,
    },
}

impl<T> FetchResult<T> {
    /// Wraps `error`, capturing a backtrace at the call site.
    #[must_use]
    pub fn failure(error: FetchError) -> Self {
        Self::Failure {
            error,
            trace: Backtrace::capture(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    /// Returns the success value, dropping any failure.
    #[must_use]
    pub fn success(self) -> Option<T> {
        match self {
            Self::Success(value) => Some(value),
            Self::Failure { .. } => None,
        }
    }

    /// Returns the failure, if any.
    #[must_use]
    pub fn error(&self) -> Option<&FetchError> {
        match self {
            Self::Success(_) => None,
            Self::Failure { error, .. } => Some(error),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> FetchResult<U> {
        match self {
            Self::Success(value) => FetchResult::Success(f(value)),
            Self::Failure { error, trace } => FetchResult::Failure { error, trace },
        }
    }

    /// Converts back into a plain `Result`, dropping the trace.
    ///
    /// # Errors
    ///
    /// Returns the captured error for a failure.
    pub fn into_result(self) -> Result<T, FetchError> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failure { error, .. } => Err(error),
        }
    }
}

impl<T> From<Result<T, FetchError>> for FetchResult<T> {
    fn from(result: Result<T, FetchError>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(error) => Self::failure(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        let ok: FetchResult<u8> = Ok(7).into();
        assert!(ok.is_success());
        assert_eq!(ok.map(|v| v * 2).success(), Some(14));

        let failed: FetchResult<u8> = Err(FetchError::invalid_url("nope")).into();
        assert!(failed.is_failure());
        assert!(matches!(failed.error(), Some(FetchError::InvalidUrl { .. })));
        assert!(matches!(failed.into_result(), Err(FetchError::InvalidUrl { .. })));
    }
}
