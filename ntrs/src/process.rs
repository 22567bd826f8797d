//! Processes: opening, memory, suspension and the remote loader list

use crate::handle::OwnedHandle;
use crate::memory::{Allocation, ProtectionGuard};
use crate::thread::ThreadBuilder;
use crate::{Error, Result, StatusExt};
use ntcall::flags::{AllocationType, PageProtection, ProcessAccess};
use ntcall::layout::X64;
use ntcall::rtl::{MemoryBasicInformation, MemoryInfoClass, ProcessBasicInformation, ProcessInfoClass};
use ntcall::{Handle, Loader, Memory, ModuleEntry, NtStatus, nt};
use std::ffi::c_void;
use std::fmt;
use std::mem::size_of;

/// A process, either opened by id or the current one.
pub struct Process {
    handle: Handle,
    _owner: Option<OwnedHandle>,
}

impl Process {
    /// The current process through its pseudo-handle.
    ///
    /// Suspending or resuming through this value is a no-op: the
    /// pseudo-handle shares its value with the invalid handle.
    pub fn current() -> Self {
        Process {
            handle: Handle::CURRENT_PROCESS,
            _owner: None,
        }
    }

    /// Opens process `pid` with `access`.
    pub fn open(pid: u32, access: ProcessAccess) -> Result<Self> {
        let mut handle = Handle::INVALID;
        unsafe { nt::nt_open_process(pid, access, &mut handle) }.into_result("NtOpenProcess")?;
        Ok(Self::from_owned(unsafe { OwnedHandle::from_raw(handle) }.ok_or_else(|| {
            Error::InvalidParameter(format!("NtOpenProcess returned {:?}", handle))
        })?))
    }

    /// Wraps an already opened process handle.
    pub fn from_owned(handle: OwnedHandle) -> Self {
        Process {
            handle: handle.as_handle(),
            _owner: Some(handle),
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// ProcessBasicInformation
    pub fn basic_information(&self) -> Result<ProcessBasicInformation> {
        let mut info = ProcessBasicInformation::default();
        unsafe {
            nt::nt_query_information_process(
                self.handle,
                ProcessInfoClass::BASIC_INFORMATION,
                &mut info as *mut ProcessBasicInformation as *mut c_void,
                size_of::<ProcessBasicInformation>() as u32,
                None,
            )
        }
        .into_result("NtQueryInformationProcess")?;
        Ok(info)
    }

    pub fn id(&self) -> Result<u32> {
        Ok(self.basic_information()?.unique_process_id as u32)
    }

    /// Address of the (64-bit) PEB
    pub fn peb(&self) -> Result<u64> {
        Ok(self.basic_information()?.peb_base_address)
    }

    /// True if the process runs 32-bit code under WoW64
    pub fn is_wow64(&self) -> Result<bool> {
        let mut peb32 = 0u64;
        unsafe {
            nt::nt_query_information_process(
                self.handle,
                ProcessInfoClass::WOW64_INFORMATION,
                &mut peb32 as *mut u64 as *mut c_void,
                size_of::<u64>() as u32,
                None,
            )
        }
        .into_result("NtQueryInformationProcess")?;
        Ok(peb32 != 0)
    }

    /// Commits `size` read/write (or other `protect`) bytes anywhere in the process.
    pub fn allocate(&self, size: u64, protect: PageProtection) -> Result<Allocation<'_>> {
        if size == 0 {
            return Err(Error::InvalidParameter("allocation size is zero".into()));
        }
        Allocation::new(self.handle, size, protect)
    }

    /// Allocates at a fixed `base` with an explicit allocation type.
    pub fn allocate_at(
        &self,
        base: u64,
        size: u64,
        allocation_type: AllocationType,
        protect: PageProtection,
    ) -> Result<Allocation<'_>> {
        Allocation::at(self.handle, base, size, allocation_type, protect)
    }

    /// Reprotects `base..base + size` until the guard drops.
    pub fn protect(&self, base: u64, size: u64, protect: PageProtection) -> Result<ProtectionGuard<'_>> {
        ProtectionGuard::new(self.handle, base, size, protect)
    }

    /// Reads into `buf`; returns how many bytes were copied.
    pub fn read(&self, address: u64, buf: &mut [u8]) -> Result<usize> {
        let mut copied = 0u64;
        unsafe {
            nt::nt_read_virtual_memory(
                self.handle,
                address,
                buf.as_mut_ptr() as *mut c_void,
                buf.len() as u64,
                Some(&mut copied),
            )
        }
        .into_result("NtReadVirtualMemory")?;
        Ok(copied as usize)
    }

    /// Writes `data`; returns how many bytes were copied.
    pub fn write(&self, address: u64, data: &[u8]) -> Result<usize> {
        let mut copied = 0u64;
        unsafe {
            nt::nt_write_virtual_memory(
                self.handle,
                address,
                data.as_ptr() as *const c_void,
                data.len() as u64,
                Some(&mut copied),
            )
        }
        .into_result("NtWriteVirtualMemory")?;
        Ok(copied as usize)
    }

    /// MemoryBasicInformation for the region containing `address`
    pub fn query_memory(&self, address: u64) -> Result<MemoryBasicInformation> {
        let mut info = MemoryBasicInformation::default();
        unsafe {
            nt::nt_query_virtual_memory(
                self.handle,
                address,
                MemoryInfoClass::BASIC_INFORMATION,
                &mut info as *mut MemoryBasicInformation as *mut c_void,
                size_of::<MemoryBasicInformation>() as u64,
                None,
            )
        }
        .into_result("NtQueryVirtualMemory")?;
        Ok(info)
    }

    /// Every region of the address space, from address 0 upwards
    pub fn regions(&self) -> Regions<'_> {
        Regions {
            process: self,
            next: Some(0),
        }
    }

    pub fn suspend(&self) -> Result<()> {
        unsafe { nt::nt_suspend_process(self.handle) }.into_result("NtSuspendProcess")?;
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        unsafe { nt::nt_resume_process(self.handle) }.into_result("NtResumeProcess")?;
        Ok(())
    }

    /// Terminates the process with `exit_status`.
    pub fn terminate(&self, exit_status: NtStatus) -> Result<()> {
        unsafe { nt::nt_terminate_process(self.handle, exit_status) }.into_result("NtTerminateProcess")?;
        Ok(())
    }

    /// Starts building a thread that runs `start_routine` in this process.
    pub fn thread(&self, start_routine: u64) -> ThreadBuilder<'_> {
        ThreadBuilder::new(self, start_routine)
    }

    /// Loader view of this process's 64-bit module list.
    pub fn loader(&self) -> Result<Loader<&Self, X64>> {
        Ok(Loader::new(self, self.peb()?))
    }

    /// Loaded modules in load order
    pub fn modules(&self) -> Result<Vec<ModuleEntry>> {
        Ok(self.loader()?.modules().collect())
    }
}

impl Memory for Process {
    fn read(&self, address: u64, buf: &mut [u8]) -> bool {
        address != 0 && matches!(Process::read(self, address, buf), Ok(n) if n == buf.len())
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process").field("handle", &self.handle).finish()
    }
}

/// Iterator over the regions of a process's address space
pub struct Regions<'p> {
    process: &'p Process,
    next: Option<u64>,
}

impl Iterator for Regions<'_> {
    type Item = MemoryBasicInformation;

    fn next(&mut self) -> Option<Self::Item> {
        let address = self.next?;
        let Ok(info) = self.process.query_memory(address) else {
            self.next = None;
            return None;
        };
        self.next = info
            .base_address
            .checked_add(info.region_size)
            .filter(|&next| info.region_size != 0 && next > address);
        Some(info)
    }
}
