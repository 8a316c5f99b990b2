//! Participant identities in log lines, hidden behind the `pii` feature.

use std::fmt;
use std::ops::Deref;

/// An identity that formats as `{REDACTED}` when the `pii` feature is on.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pii<T>(pub T);

const REDACTED: &str = "{REDACTED}";

impl<T: fmt::Display> fmt::Display for Pii<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if cfg!(feature = "pii") {
            return f.write_str(REDACTED);
        }
        self.0.fmt(f)
    }
}

impl<T: fmt::Debug> fmt::Debug for Pii<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if cfg!(feature = "pii") {
            return f.write_str(REDACTED);
        }
        self.0.fmt(f)
    }
}

impl<T> Deref for Pii<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}
