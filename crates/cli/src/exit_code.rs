//! Process exit codes
//!
//! Scripts rely on these values; keep them stable.

use rcopy_core::Error;

/// Exit status of an rcopy invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Everything was copied
    Success = 0,
    /// Failure, including a finished run where some units failed
    GeneralError = 1,
    /// Invalid arguments
    UsageError = 2,
    /// Storage backend unreachable or misbehaving
    NetworkError = 3,
    /// Session, alias or object does not exist
    NotFound = 5,
    /// Interrupted; the session can be resumed
    Interrupted = 130,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl From<&Error> for ExitCode {
    fn from(error: &Error) -> Self {
        match error {
            Error::InvalidPath(_) | Error::IsDirectory(_) => Self::UsageError,
            Error::Network(_) => Self::NetworkError,
            Error::NotFound(_) => Self::NotFound,
            Error::Io(_)
            | Error::Json(_)
            | Error::Config(_)
            | Error::Session(_)
            | Error::General(_) => Self::GeneralError,
        }
    }
}

/// Exit code for an error that reached the binary edge
pub fn for_error(error: &anyhow::Error) -> ExitCode {
    error
        .downcast_ref::<Error>()
        .map(ExitCode::from)
        .unwrap_or(ExitCode::GeneralError)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context as _;

    #[test]
    fn test_exit_code_values() {
        assert_eq!(ExitCode::Success.as_i32(), 0);
        assert_eq!(ExitCode::UsageError.as_i32(), 2);
        assert_eq!(ExitCode::NotFound.as_i32(), 5);
        assert_eq!(ExitCode::Interrupted.as_i32(), 130);
    }

    #[test]
    fn test_from_core_error() {
        assert_eq!(
            ExitCode::from(&Error::Network("reset".into())),
            ExitCode::NetworkError
        );
        assert_eq!(
            ExitCode::from(&Error::InvalidPath("x".into())),
            ExitCode::UsageError
        );
        assert_eq!(
            ExitCode::from(&Error::Session("corrupt".into())),
            ExitCode::GeneralError
        );
    }

    #[test]
    fn test_for_error_looks_through_context() {
        let result: Result<(), Error> = Err(Error::NotFound("abc".into()));
        let err = result.context("Failed to open session").unwrap_err();
        assert_eq!(for_error(&err), ExitCode::NotFound);
        assert_eq!(for_error(&anyhow::anyhow!("plain")), ExitCode::GeneralError);
    }
}
