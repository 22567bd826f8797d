//! Threads: creation, suspension and context access

use crate::handle::{OwnedHandle, WaitResult, wait_for};
use crate::process::Process;
use crate::{Error, Result, StatusExt};
use ntcall::flags::{CreateThreadFlags, ThreadAccess};
use ntcall::rtl::{ThreadBasicInformation, ThreadInfoClass};
use ntcall::{Handle, nt};
use std::ffi::c_void;
use std::fmt;
use std::mem::size_of;
use std::time::Duration;

/// A thread, either opened/created or the current one.
pub struct Thread {
    handle: Handle,
    _owner: Option<OwnedHandle>,
}

impl Thread {
    /// The current thread through its pseudo-handle
    pub fn current() -> Self {
        Thread {
            handle: Handle::CURRENT_THREAD,
            _owner: None,
        }
    }

    /// Opens thread `tid` with `access`.
    pub fn open(tid: u32, access: ThreadAccess) -> Result<Self> {
        let mut handle = Handle::INVALID;
        unsafe { nt::nt_open_thread(tid, access, &mut handle) }.into_result("NtOpenThread")?;
        Self::owning(handle, "NtOpenThread")
    }

    fn owning(handle: Handle, operation: &str) -> Result<Self> {
        let owner = unsafe { OwnedHandle::from_raw(handle) }
            .ok_or_else(|| Error::InvalidParameter(format!("{} returned {:?}", operation, handle)))?;
        Ok(Thread {
            handle,
            _owner: Some(owner),
        })
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// ThreadBasicInformation
    pub fn basic_information(&self) -> Result<ThreadBasicInformation> {
        let mut info = ThreadBasicInformation::default();
        unsafe {
            nt::nt_query_information_thread(
                self.handle,
                ThreadInfoClass::BASIC_INFORMATION,
                &mut info as *mut ThreadBasicInformation as *mut c_void,
                size_of::<ThreadBasicInformation>() as u32,
                None,
            )
        }
        .into_result("NtQueryInformationThread")?;
        Ok(info)
    }

    pub fn id(&self) -> Result<u32> {
        Ok(self.basic_information()?.client_id.unique_thread as u32)
    }

    /// Win32 start address of the thread
    pub fn start_address(&self) -> Result<u64> {
        let mut start = 0u64;
        unsafe {
            nt::nt_query_information_thread(
                self.handle,
                ThreadInfoClass::QUERY_SET_WIN32_START_ADDRESS,
                &mut start as *mut u64 as *mut c_void,
                size_of::<u64>() as u32,
                None,
            )
        }
        .into_result("NtQueryInformationThread")?;
        Ok(start)
    }

    /// Suspends the thread; returns the previous suspend count.
    pub fn suspend(&self) -> Result<u32> {
        let mut previous = 0u32;
        unsafe { nt::nt_suspend_thread(self.handle, Some(&mut previous)) }.into_result("NtSuspendThread")?;
        Ok(previous)
    }

    /// Resumes the thread; returns the previous suspend count.
    pub fn resume(&self) -> Result<u32> {
        let mut previous = 0u32;
        unsafe { nt::nt_resume_thread(self.handle, Some(&mut previous)) }.into_result("NtResumeThread")?;
        Ok(previous)
    }

    /// Waits for the thread to exit, forever when `timeout` is `None`.
    pub fn join(&self, timeout: Option<Duration>) -> Result<WaitResult> {
        wait_for(self.handle, timeout)
    }

    /// Exit status once the thread has finished
    pub fn exit_status(&self) -> Result<ntcall::NtStatus> {
        Ok(ntcall::NtStatus(self.basic_information()?.exit_status))
    }

    /// Fills a CONTEXT record.
    ///
    /// # Safety
    /// `context` must point to a CONTEXT of the thread's architecture, aligned
    /// to 16 bytes, with `ContextFlags` set.
    pub unsafe fn get_context(&self, context: *mut c_void) -> Result<()> {
        unsafe { nt::nt_get_context_thread(self.handle, context) }.into_result("NtGetContextThread")?;
        Ok(())
    }

    /// Loads a CONTEXT record into the thread.
    ///
    /// # Safety
    /// As for [`Thread::get_context`]; the thread continues with the new
    /// register state.
    pub unsafe fn set_context(&self, context: *const c_void) -> Result<()> {
        unsafe { nt::nt_set_context_thread(self.handle, context) }.into_result("NtSetContextThread")?;
        Ok(())
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread").field("handle", &self.handle).finish()
    }
}

/// Builder for `NtCreateThreadEx`
///
/// ```no_run
/// use ntrs::Process;
///
/// # fn entry() -> u64 { 0 }
/// let process = Process::current();
/// let thread = unsafe { process.thread(entry()).argument(7).suspended().spawn() }.unwrap();
/// thread.resume().unwrap();
/// ```
pub struct ThreadBuilder<'p> {
    process: &'p Process,
    start_routine: u64,
    argument: u64,
    access: ThreadAccess,
    flags: CreateThreadFlags,
    zero_bits: u64,
    stack_size: u64,
    maximum_stack_size: u64,
}

impl<'p> ThreadBuilder<'p> {
    pub(crate) fn new(process: &'p Process, start_routine: u64) -> Self {
        ThreadBuilder {
            process,
            start_routine,
            argument: 0,
            access: ThreadAccess::ALL,
            flags: CreateThreadFlags::empty(),
            zero_bits: 0,
            stack_size: 0,
            maximum_stack_size: 0,
        }
    }

    /// Value passed to the start routine
    pub fn argument(mut self, argument: u64) -> Self {
        self.argument = argument;
        self
    }

    pub fn access(mut self, access: ThreadAccess) -> Self {
        self.access = access;
        self
    }

    pub fn flags(mut self, flags: CreateThreadFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Creates the thread suspended.
    pub fn suspended(self) -> Self {
        self.flags(CreateThreadFlags::CREATE_SUSPENDED)
    }

    /// Initial commit and maximum reserve of the stack; 0 takes the image defaults.
    pub fn stack(mut self, commit: u64, reserve: u64) -> Self {
        self.stack_size = commit;
        self.maximum_stack_size = reserve;
        self
    }

    pub fn zero_bits(mut self, zero_bits: u64) -> Self {
        self.zero_bits = zero_bits;
        self
    }

    /// Creates the thread.
    ///
    /// # Safety
    /// The start routine must be a valid thread entry point in the target
    /// process, and `argument` must be what it expects.
    pub unsafe fn spawn(self) -> Result<Thread> {
        if self.start_routine == 0 {
            return Err(Error::InvalidParameter("thread start routine is null".into()));
        }
        let mut handle = Handle::INVALID;
        unsafe {
            nt::nt_create_thread_ex(
                &mut handle,
                self.access,
                None,
                self.process.handle(),
                self.start_routine,
                self.argument,
                self.flags,
                self.zero_bits,
                self.stack_size,
                self.maximum_stack_size,
                0,
            )
        }
        .into_result("NtCreateThreadEx")?;
        Thread::owning(handle, "NtCreateThreadEx")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_collects_options() {
        let process = Process::current();
        let builder = process
            .thread(0x1000)
            .argument(42)
            .suspended()
            .flags(CreateThreadFlags::HIDE_FROM_DEBUGGER)
            .stack(0x1000, 0x10_0000);
        assert_eq!(builder.argument, 42);
        assert_eq!(
            builder.flags,
            CreateThreadFlags::CREATE_SUSPENDED | CreateThreadFlags::HIDE_FROM_DEBUGGER
        );
        assert_eq!((builder.stack_size, builder.maximum_stack_size), (0x1000, 0x10_0000));
    }

    #[test]
    fn test_null_start_routine_is_refused() {
        let process = Process::current();
        let result = unsafe { process.thread(0).spawn() };
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[cfg(not(windows))]
    #[test]
    fn test_native_calls_fail_cleanly() {
        let thread = Thread::current();
        assert!(thread.suspend().unwrap_err().status().is_some_and(|s| s.invalid_system_service()));
        assert!(Thread::open(1, ThreadAccess::QUERY_LIMITED_INFORMATION).is_err());
    }

    // a WoW64 caller would get a 64-bit thread at 32-bit code
    #[cfg(all(windows, target_pointer_width = "64"))]
    #[test]
    fn test_spawn_and_join() {
        unsafe extern "system" fn entry(argument: *mut c_void) -> u32 {
            argument as usize as u32 + 1
        }

        let process = Process::current();
        let thread = unsafe { process.thread(entry as usize as u64).argument(41).suspended().spawn() }.unwrap();
        assert_eq!(thread.resume().unwrap(), 1);
        assert_eq!(thread.join(Some(Duration::from_secs(10))).unwrap(), WaitResult::Signaled);
        assert_eq!(thread.exit_status().unwrap(), ntcall::NtStatus(42));
        assert_ne!(thread.id().unwrap(), 0);
    }
}
