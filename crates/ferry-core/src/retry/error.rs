use std::error::Error;
use std::fmt;

/// Why the retry engine gave up.
///
/// Every variant carries the unwrapped original error (never the
/// `Classified` wrapper) and the number of invocations that were made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Retryable, but the attempt limit was reached.
    Exhausted { attempts: u32, source: E },

    /// Marked unrecoverable; no further attempts were made.
    Unrecoverable { attempts: u32, source: E },

    /// Not marked retryable; returned after the failing call.
    NotRetryable { attempts: u32, source: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. }
            | RetryError::Unrecoverable { attempts, .. }
            | RetryError::NotRetryable { attempts, .. } => *attempts,
        }
    }

    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, RetryError::Unrecoverable { .. })
    }

    pub fn inner(&self) -> &E {
        match self {
            RetryError::Exhausted { source, .. }
            | RetryError::Unrecoverable { source, .. }
            | RetryError::NotRetryable { source, .. } => source,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { source, .. }
            | RetryError::Unrecoverable { source, .. }
            | RetryError::NotRetryable { source, .. } => source,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    // transparent
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner().fmt(f)
    }
}

impl<E: Error + 'static> Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner().source()
    }
}
