mod future_ext;
mod init;

use std::fmt;
use std::time::Duration;

pub use init::{init_logging, LoggingTask};

pub(crate) mod prelude {
    pub(crate) use super::{tracing_duration, tracing_err};
    pub(crate) use super::future_ext::FutureExt as _;

    // Not all of them are used, but it's convenient to have every logging
    // macro at hand without importing it manually.
    #[allow(unused_imports)]
    pub(crate) use tracing::{
        debug, debug_span, error, error_span, info, info_span, instrument, trace, trace_span, warn,
        warn_span, Instrument as _,
    };
}

/// Records the error with its chain of sources as a field of an event
#[must_use]
pub fn tracing_err<'a, E: std::error::Error + 'static>(err: &'a E) -> impl tracing::Value + 'a {
    err as &dyn std::error::Error
}

/// Durations of attempts and requests, rounded to hundredths
pub(crate) fn tracing_duration(duration: Duration) -> impl tracing::Value {
    tracing::field::display(Rounded(duration))
}

struct Rounded(Duration);

impl fmt::Display for Rounded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2?}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_are_rounded() {
        assert_eq!(Rounded(Duration::from_millis(1234)).to_string(), "1.23s");
        assert_eq!(Rounded(Duration::from_micros(4500)).to_string(), "4.50ms");
    }
}
