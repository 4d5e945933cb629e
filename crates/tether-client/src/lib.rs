//! Tether Client - CLI for talking to Hosts through the relay
//!
//! This crate provides a command-line interface for:
//! - Listing online Hosts
//! - Pairing with a Host (code + OTP exchange)
//! - Sending command requests under a paired session
//! - Inspecting the cached session state

pub mod cache;
pub mod cli;
pub mod ops;
pub mod output;

pub use cli::Cli;
pub use output::OutputFormat;

/// Exit codes for CLI operations.
///
/// Machine-readable status for scripting:
/// - 0: success
/// - 1: general error
/// - 2: authentication failed
/// - 3: deadline expired (request may still be pending)
/// - 4: not paired with a Host yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    AuthenticationFailed = 2,
    Timeout = 3,
    NotPaired = 4,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl ExitCode {
    pub fn to_exit_code(self) -> std::process::ExitCode {
        std::process::ExitCode::from(self as u8)
    }
}

#[cfg(test)]
mod exit_code_tests {
    use super::*;

    #[test]
    fn test_exit_code_values() {
        assert_eq!(ExitCode::Success as i32, 0);
        assert_eq!(ExitCode::GeneralError as i32, 1);
        assert_eq!(ExitCode::AuthenticationFailed as i32, 2);
        assert_eq!(ExitCode::Timeout as i32, 3);
        assert_eq!(ExitCode::NotPaired as i32, 4);
    }

    #[test]
    fn test_exit_code_to_process_exit_code() {
        let _ = ExitCode::Success.to_exit_code();
        let _ = ExitCode::Timeout.to_exit_code();
    }
}
