//! NTSTATUS values

use std::fmt;

macro_rules! status_codes {
    ($($(#[$meta:meta])* $name:ident = $value:literal;)*) => {
        ::paste::paste! {
            impl NtStatus {
                $(
                    $(#[$meta])*
                    pub const $name: NtStatus = NtStatus::from_bits($value);
                )*

                $(
                    #[doc = concat!("Returns true if the status is `", stringify!($name), "`")]
                    #[inline]
                    pub const fn [<$name:lower>](&self) -> bool {
                        self.0 == Self::$name.0
                    }
                )*
            }
        }
    };
}

/// A signed 32-bit NT status code.
///
/// Ordering compares the signed value, so every error (high bit set) sorts
/// below [`NtStatus::SUCCESS`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct NtStatus(pub i32);

status_codes! {
    /// STATUS_SUCCESS
    SUCCESS = 0x0000_0000;
    /// STATUS_TIMEOUT
    TIMEOUT = 0x0000_0102;
    /// STATUS_BUFFER_OVERFLOW
    BUFFER_OVERFLOW = 0x8000_0005;
    /// STATUS_INFO_LENGTH_MISMATCH
    INFO_LENGTH_MISMATCH = 0xC000_0004;
    /// STATUS_ACCESS_VIOLATION
    ACCESS_VIOLATION = 0xC000_0005;
    /// STATUS_INVALID_HANDLE
    INVALID_HANDLE = 0xC000_0008;
    /// STATUS_INVALID_PARAMETER
    INVALID_PARAMETER = 0xC000_000D;
    /// STATUS_INVALID_SYSTEM_SERVICE, also reported when a syscall or gate
    /// target could not be resolved
    INVALID_SYSTEM_SERVICE = 0xC000_001C;
    /// STATUS_ACCESS_DENIED
    ACCESS_DENIED = 0xC000_0022;
}

impl NtStatus {
    /// Builds a status from its unsigned hex spelling
    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        NtStatus(bits as i32)
    }

    /// Returns the raw signed value
    #[inline]
    pub const fn code(&self) -> i32 {
        self.0
    }

    /// Returns the value as the unsigned hex spelling used in headers
    #[inline]
    pub const fn bits(&self) -> u32 {
        self.0 as u32
    }

    /// NT_SUCCESS: informational and warning codes count as success too
    #[inline]
    pub const fn is_success(&self) -> bool {
        self.0 >= 0
    }

    /// Returns true if the severity bits mark an error
    #[inline]
    pub const fn is_error(&self) -> bool {
        (self.0 as u32) >> 30 == 3
    }

    /// Truncates a register-width return value to a status
    #[inline]
    pub const fn from_register(value: u64) -> Self {
        NtStatus(value as u32 as i32)
    }
}

impl fmt::Debug for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NtStatus(0x{:08x})", self.0 as u32)
    }
}

impl fmt::Display for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0 as u32)
    }
}

impl From<i32> for NtStatus {
    fn from(code: i32) -> Self {
        NtStatus(code)
    }
}

impl From<NtStatus> for i32 {
    fn from(status: NtStatus) -> Self {
        status.0
    }
}

impl From<NtStatus> for bool {
    fn from(status: NtStatus) -> Self {
        status.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_classification() {
        let status = NtStatus(0);
        assert!(status.success());
        assert!(status.is_success());
        assert!(!status.access_violation());
        assert_eq!(status, NtStatus::default());
    }

    #[test]
    fn test_failure_classification() {
        let status = NtStatus::from_bits(0xC000_0005);
        assert!(status.access_violation());
        assert!(!status.success());
        assert!(!status.is_success());
        assert!(status.is_error());

        assert!(NtStatus::from_bits(0xC000_0004).info_length_mismatch());
        assert!(NtStatus::from_bits(0xC000_000D).invalid_parameter());
        assert!(NtStatus::from_bits(0xC000_001C).invalid_system_service());
        assert!(NtStatus::from_bits(0xC000_0022).access_denied());
    }

    #[test]
    fn test_ordering_is_signed() {
        assert!(!(NtStatus(-1) > NtStatus(0)));
        assert!(NtStatus(-1) < NtStatus(0));
        // unsigned spelling would order these the other way round
        assert!(NtStatus::ACCESS_VIOLATION < NtStatus::SUCCESS);
        assert!(NtStatus::ACCESS_VIOLATION.bits() > NtStatus::SUCCESS.bits());
    }

    #[test]
    fn test_informational_is_success() {
        // STATUS_PENDING
        let pending = NtStatus::from_bits(0x0000_0103);
        assert!(pending.is_success());
        assert!(!pending.success());
        assert!(bool::from(pending));
    }

    #[test]
    fn test_display_format() {
        assert_eq!(format!("{}", NtStatus::ACCESS_DENIED), "0xc0000022");
        assert_eq!(
            format!("{:?}", NtStatus::INVALID_SYSTEM_SERVICE),
            "NtStatus(0xc000001c)"
        );
    }

    #[test]
    fn test_from_register_truncates() {
        assert_eq!(
            NtStatus::from_register(0xFFFF_FFFF_C000_0022),
            NtStatus::ACCESS_DENIED
        );
        assert_eq!(NtStatus::from_register(0x1_0000_0000), NtStatus::SUCCESS);
    }
}
