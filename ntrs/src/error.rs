//! Error types for ntrs operations

use ntcall::NtStatus;
use thiserror::Error;

/// Error type for ntrs operations
#[derive(Error, Debug)]
pub enum Error {
    /// A native call returned a failure status
    #[error("{operation} failed (NTSTATUS: {status})")]
    Nt {
        /// Name of the failing native routine
        operation: &'static str,
        /// The status it returned
        status: NtStatus,
    },

    /// An export or module could not be found
    #[error("Unresolved: {0}")]
    Unresolved(String),

    /// Invalid parameter provided
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Mapping or parsing a PE image failed
    #[error(transparent)]
    Image(#[from] ntcall::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The status carried by a failed native call
    pub fn status(&self) -> Option<NtStatus> {
        match self {
            Error::Nt { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type for ntrs operations
pub type Result<T> = std::result::Result<T, Error>;

/// Turns a status into a [`Result`].
pub trait StatusExt {
    /// `Ok` for any success-class status (informational and warnings
    /// included), otherwise [`Error::Nt`] naming `operation`.
    fn into_result(self, operation: &'static str) -> Result<NtStatus>;
}

impl StatusExt for NtStatus {
    fn into_result(self, operation: &'static str) -> Result<NtStatus> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::Nt {
                operation,
                status: self,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_class_is_ok() {
        assert!(NtStatus::SUCCESS.into_result("NtClose").is_ok());
        assert_eq!(NtStatus::TIMEOUT.into_result("NtWaitForSingleObject").unwrap(), NtStatus::TIMEOUT);
    }

    #[test]
    fn test_failure_carries_operation_and_status() {
        let err = NtStatus::ACCESS_DENIED.into_result("NtOpenProcess").unwrap_err();
        assert_eq!(err.status(), Some(NtStatus::ACCESS_DENIED));
        assert_eq!(err.to_string(), "NtOpenProcess failed (NTSTATUS: 0xc0000022)");

        // warnings are failures too
        assert!(NtStatus::BUFFER_OVERFLOW.into_result("NtQueryObject").is_err());
    }

    #[test]
    fn test_image_errors_convert() {
        let err: Error = ntcall::Error::Parse("bad magic".into()).into();
        assert_eq!(err.to_string(), "PE parse error: bad magic");
        assert_eq!(err.status(), None);
    }
}
