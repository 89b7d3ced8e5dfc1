//! Runtime environment detection.
//!
//! Provides a single source of truth for determining whether the process is
//! running under the test suite, based on the `DTACHD_ENV` environment
//! variable. Test mode only affects path defaults: sockets and PID
//! files land under the OS temp directory either way, but test mode keys
//! them so parallel test runs never collide.

/// Runtime environment for the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Normal operation (default).
    Production,
    /// Running under the test suite.
    Test,
}

impl Environment {
    /// Detect current environment from `DTACHD_ENV`.
    #[must_use]
    pub fn current() -> Self {
        match std::env::var("DTACHD_ENV").as_deref() {
            Ok("test") => Self::Test,
            _ => Self::Production,
        }
    }

    #[must_use]
    pub fn is_test(self) -> bool {
        self == Self::Test
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// Convenience function to check whether we're running under `#[test]` or
/// an integration test that set `DTACHD_ENV=test`.
#[must_use]
pub fn is_any_test() -> bool {
    cfg!(test) || Environment::current().is_test()
}
