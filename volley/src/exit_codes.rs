#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// One or more checks failed (only with `--fail-on-check-failures`).
    ChecksFailed = 10,

    /// Invalid CLI/config/settings (bad flags, unreadable config, invalid scenarios, ...).
    InvalidInput = 30,

    /// Internal/runtime error.
    RuntimeError = 40,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn from_checks(checks_failed: bool, fail_on_check_failures: bool) -> Self {
        if checks_failed && fail_on_check_failures {
            Self::ChecksFailed
        } else {
            Self::Success
        }
    }
}
