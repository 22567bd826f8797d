//! RAII wrapper for kernel handles

use crate::{Result, StatusExt};
use ntcall::Handle;
use ntcall::nt;
use std::fmt;
use std::time::Duration;

/// Outcome of a wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    Signaled,
    TimedOut,
}

/// An owned kernel handle, closed with `NtClose` on drop.
pub struct OwnedHandle {
    handle: Handle,
}

impl OwnedHandle {
    /// Takes ownership of `handle`.
    ///
    /// Returns `None` for the null and invalid handles.
    ///
    /// # Safety
    /// `handle` must be open and not owned by anything else.
    pub unsafe fn from_raw(handle: Handle) -> Option<Self> {
        handle.is_valid().then_some(OwnedHandle { handle })
    }

    /// The handle, still owned by `self`
    pub fn as_handle(&self) -> Handle {
        self.handle
    }

    /// Gives up ownership without closing.
    pub fn into_raw(self) -> Handle {
        let handle = self.handle;
        std::mem::forget(self);
        handle
    }

    /// Closes now and reports the status of `NtClose`.
    pub fn close(self) -> Result<()> {
        let handle = self.into_raw();
        unsafe { nt::nt_close(handle) }.into_result("NtClose")?;
        Ok(())
    }

    /// Waits for the object to become signaled, forever when `timeout` is `None`.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<WaitResult> {
        wait_for(self.handle, timeout)
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        unsafe {
            nt::nt_close(self.handle);
        }
    }
}

impl fmt::Debug for OwnedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OwnedHandle").field(&self.handle).finish()
    }
}

/// Relative NT timeout: negative, in 100ns units
pub(crate) fn relative_timeout(timeout: Duration) -> i64 {
    let ticks = timeout.as_nanos() / 100;
    -(i64::try_from(ticks).unwrap_or(i64::MAX))
}

pub(crate) fn wait_for(handle: Handle, timeout: Option<Duration>) -> Result<WaitResult> {
    let ticks = timeout.map(relative_timeout);
    let status = unsafe { nt::nt_wait_for_single_object(handle, false, ticks.as_ref()) }
        .into_result("NtWaitForSingleObject")?;
    Ok(if status.timeout() {
        WaitResult::TimedOut
    } else {
        WaitResult::Signaled
    })
}
