//! Handles and register-width argument widening
//!
//! Every argument handed to a syscall or pushed through the gate travels as a
//! 64-bit register value. How a narrower value is widened depends on what it
//! is: pointers and unsigned integers are zero-extended, handles and signed
//! integers are sign-extended. Pseudo-handles such as `-1` (current process)
//! only keep their meaning on the 64-bit side when sign-extended, and real
//! pointers above 2 GB are corrupted when they are.

use crate::status::NtStatus;
use std::ffi::c_void;
use std::fmt;

/// Zero-extends a 32-bit pointer value.
#[inline]
pub const fn extend_pointer(pointer: u32) -> u64 {
    pointer as u64
}

/// Sign-extends a 32-bit handle value.
#[inline]
pub const fn extend_handle(handle: u32) -> u64 {
    handle as i32 as i64 as u64
}

/// Narrows a 64-bit handle returned by the kernel to the native handle width,
/// keeping `-1`/`-2` style pseudo-handles intact.
#[inline]
pub const fn narrow_handle(handle: u64) -> isize {
    handle as i64 as isize
}

/// A kernel object handle (or pseudo-handle) of native width.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Handle(pub isize);

impl Handle {
    /// The null handle
    pub const NULL: Handle = Handle(0);
    /// INVALID_HANDLE_VALUE
    pub const INVALID: Handle = Handle(-1);
    /// NtCurrentProcess(); shares its value with [`Handle::INVALID`]
    pub const CURRENT_PROCESS: Handle = Handle(-1);
    /// NtCurrentThread()
    pub const CURRENT_THREAD: Handle = Handle(-2);

    /// Wraps a raw handle value
    #[inline]
    pub const fn from_raw(raw: isize) -> Self {
        Handle(raw)
    }

    /// Wraps a handle received as a 64-bit register value
    #[inline]
    pub const fn from_register(value: u64) -> Self {
        Handle(narrow_handle(value))
    }

    /// Returns the raw handle value
    #[inline]
    pub const fn as_raw(&self) -> isize {
        self.0
    }

    /// Returns the handle as the pointer-typed value Win32 APIs use
    #[inline]
    pub fn as_ptr(&self) -> *mut c_void {
        self.0 as *mut c_void
    }

    /// Neither null nor INVALID_HANDLE_VALUE.
    ///
    /// The current-process pseudo-handle shares its value with
    /// INVALID_HANDLE_VALUE and is therefore reported as invalid here.
    #[inline]
    pub const fn is_valid(&self) -> bool {
        self.0 != 0 && self.0 != -1
    }
}

impl Default for Handle {
    fn default() -> Self {
        Handle::INVALID
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:#x})", self.0)
    }
}

/// Widens a syscall argument to a 64-bit register value.
pub trait IntoRegister {
    fn into_register(self) -> u64;
}

macro_rules! zero_extend {
    ($($ty:ty),*) => {
        $(impl IntoRegister for $ty {
            #[inline]
            fn into_register(self) -> u64 {
                self as u64
            }
        })*
    };
}

macro_rules! sign_extend {
    ($($ty:ty),*) => {
        $(impl IntoRegister for $ty {
            #[inline]
            fn into_register(self) -> u64 {
                self as i64 as u64
            }
        })*
    };
}

zero_extend!(u8, u16, u32, u64, usize);
sign_extend!(i8, i16, i32, i64, isize);

impl IntoRegister for bool {
    #[inline]
    fn into_register(self) -> u64 {
        self as u64
    }
}

impl IntoRegister for Handle {
    #[inline]
    fn into_register(self) -> u64 {
        self.0 as i64 as u64
    }
}

impl IntoRegister for NtStatus {
    #[inline]
    fn into_register(self) -> u64 {
        self.0 as i64 as u64
    }
}

impl<T> IntoRegister for *const T {
    #[inline]
    fn into_register(self) -> u64 {
        self as usize as u64
    }
}

impl<T> IntoRegister for *mut T {
    #[inline]
    fn into_register(self) -> u64 {
        self as usize as u64
    }
}

impl<T> IntoRegister for &T {
    #[inline]
    fn into_register(self) -> u64 {
        (self as *const T).into_register()
    }
}

impl<T> IntoRegister for &mut T {
    #[inline]
    fn into_register(self) -> u64 {
        (self as *mut T).into_register()
    }
}

impl<T> IntoRegister for Option<&T> {
    #[inline]
    fn into_register(self) -> u64 {
        self.map_or(0, IntoRegister::into_register)
    }
}

impl<T> IntoRegister for Option<&mut T> {
    #[inline]
    fn into_register(self) -> u64 {
        self.map_or(0, IntoRegister::into_register)
    }
}

/// Narrows a 64-bit register return value to the caller's requested type.
pub trait FromRegister {
    fn from_register(value: u64) -> Self;
}

macro_rules! truncate {
    ($($ty:ty),*) => {
        $(impl FromRegister for $ty {
            #[inline]
            fn from_register(value: u64) -> Self {
                value as $ty
            }
        })*
    };
}

truncate!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);

impl FromRegister for NtStatus {
    #[inline]
    fn from_register(value: u64) -> Self {
        NtStatus::from_register(value)
    }
}

impl FromRegister for Handle {
    #[inline]
    fn from_register(value: u64) -> Self {
        Handle::from_register(value)
    }
}
