//! Error classification for the retry engine.

use std::error::Error;
use std::fmt;

/// An error tagged with how the retry engine should treat it.
///
/// Retry is opt-in: only `Retryable` is attempted again. `Plain` is what an
/// untagged error becomes and is returned as-is after the first failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified<E> {
    /// Transient; worth repeating.
    Retryable(E),

    /// Will never succeed by repeating (bad payload, permanent rejection).
    Unrecoverable(E),

    /// Not marked either way.
    Plain(E),
}

/// The tag of a [`Classified`] error, without the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Retryable,
    Unrecoverable,
    Plain,
}

/// Mark `err` as retryable.
pub fn retryable<E>(err: E) -> Classified<E> {
    Classified::Retryable(err)
}

/// Mark `err` as unrecoverable.
pub fn unrecoverable<E>(err: E) -> Classified<E> {
    Classified::Unrecoverable(err)
}

impl<E> Classified<E> {
    pub fn plain(err: E) -> Self {
        Classified::Plain(err)
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Classified::Retryable(_) => ErrorClass::Retryable,
            Classified::Unrecoverable(_) => ErrorClass::Unrecoverable,
            Classified::Plain(_) => ErrorClass::Plain,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Classified::Retryable(_))
    }

    pub fn inner(&self) -> &E {
        match self {
            Classified::Retryable(err)
            | Classified::Unrecoverable(err)
            | Classified::Plain(err) => err,
        }
    }

    /// Drop the tag and return the original error.
    pub fn into_inner(self) -> E {
        match self {
            Classified::Retryable(err)
            | Classified::Unrecoverable(err)
            | Classified::Plain(err) => err,
        }
    }

    pub fn map<F, U>(self, f: F) -> Classified<U>
    where
        F: FnOnce(E) -> U,
    {
        match self {
            Classified::Retryable(err) => Classified::Retryable(f(err)),
            Classified::Unrecoverable(err) => Classified::Unrecoverable(f(err)),
            Classified::Plain(err) => Classified::Plain(f(err)),
        }
    }
}

impl<E: fmt::Display> fmt::Display for Classified<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classified::Retryable(err) => write!(f, "retryable: {err}"),
            Classified::Unrecoverable(err) => write!(f, "unrecoverable: {err}"),
            Classified::Plain(err) => err.fmt(f),
        }
    }
}

impl<E: Error + 'static> Error for Classified<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.inner())
    }
}
