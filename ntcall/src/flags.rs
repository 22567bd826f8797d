//! Access masks, allocation and protection flags

use crate::handle::IntoRegister;
use bitflags::bitflags;

bitflags! {
    /// PROCESS_* access rights
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ProcessAccess: u32 {
        const TERMINATE = 0x0001;
        const CREATE_THREAD = 0x0002;
        const SET_SESSION_ID = 0x0004;
        const VM_OPERATION = 0x0008;
        const VM_READ = 0x0010;
        const VM_WRITE = 0x0020;
        const DUP_HANDLE = 0x0040;
        const CREATE_PROCESS = 0x0080;
        const SET_QUOTA = 0x0100;
        const SET_INFORMATION = 0x0200;
        const QUERY_INFORMATION = 0x0400;
        const SUSPEND_RESUME = 0x0800;
        const QUERY_LIMITED_INFORMATION = 0x1000;
        const SET_LIMITED_INFORMATION = 0x2000;
        const DELETE = 0x0001_0000;
        const READ_CONTROL = 0x0002_0000;
        const WRITE_DAC = 0x0004_0000;
        const WRITE_OWNER = 0x0008_0000;
        const SYNCHRONIZE = 0x0010_0000;

        /// PROCESS_ALL_ACCESS
        const ALL = 0x001F_FFFF;
    }
}

bitflags! {
    /// THREAD_* access rights
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ThreadAccess: u32 {
        const TERMINATE = 0x0001;
        const SUSPEND_RESUME = 0x0002;
        const GET_CONTEXT = 0x0008;
        const SET_CONTEXT = 0x0010;
        const SET_INFORMATION = 0x0020;
        const QUERY_INFORMATION = 0x0040;
        const SET_THREAD_TOKEN = 0x0080;
        const IMPERSONATE = 0x0100;
        const DIRECT_IMPERSONATION = 0x0200;
        const SET_LIMITED_INFORMATION = 0x0400;
        const QUERY_LIMITED_INFORMATION = 0x0800;
        const RESUME = 0x1000;
        const DELETE = 0x0001_0000;
        const READ_CONTROL = 0x0002_0000;
        const WRITE_DAC = 0x0004_0000;
        const WRITE_OWNER = 0x0008_0000;
        const SYNCHRONIZE = 0x0010_0000;

        /// THREAD_ALL_ACCESS
        const ALL = 0x001F_FFFF;
    }
}

bitflags! {
    /// SECTION_* access rights
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SectionAccess: u32 {
        const QUERY = 0x0001;
        const MAP_WRITE = 0x0002;
        const MAP_READ = 0x0004;
        const MAP_EXECUTE = 0x0008;
        const EXTEND_SIZE = 0x0010;
        const MAP_EXECUTE_EXPLICIT = 0x0020;

        /// SECTION_ALL_ACCESS
        const ALL = 0x000F_001F;
    }
}

bitflags! {
    /// MEM_* allocation type
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AllocationType: u32 {
        const COMMIT = 0x0000_1000;
        const RESERVE = 0x0000_2000;
        const RESET = 0x0008_0000;
        const TOP_DOWN = 0x0010_0000;
        const WRITE_WATCH = 0x0020_0000;
        const PHYSICAL = 0x0040_0000;
        const RESET_UNDO = 0x0100_0000;
        const LARGE_PAGES = 0x2000_0000;
    }
}

impl Default for AllocationType {
    fn default() -> Self {
        AllocationType::COMMIT | AllocationType::RESERVE
    }
}

bitflags! {
    /// MEM_* free type
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FreeType: u32 {
        const DECOMMIT = 0x4000;
        const RELEASE = 0x8000;
    }
}

bitflags! {
    /// PAGE_* protection
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PageProtection: u32 {
        const NO_ACCESS = 0x0001;
        const READONLY = 0x0002;
        const READWRITE = 0x0004;
        const WRITECOPY = 0x0008;
        const EXECUTE = 0x0010;
        const EXECUTE_READ = 0x0020;
        const EXECUTE_READWRITE = 0x0040;
        const EXECUTE_WRITECOPY = 0x0080;
        const GUARD = 0x0100;
        const NOCACHE = 0x0200;
        const WRITECOMBINE = 0x0400;
    }
}

impl PageProtection {
    /// Any of the executable protections
    pub fn is_executable(&self) -> bool {
        self.intersects(
            PageProtection::EXECUTE
                | PageProtection::EXECUTE_READ
                | PageProtection::EXECUTE_READWRITE
                | PageProtection::EXECUTE_WRITECOPY,
        )
    }

    /// Any of the writable protections
    pub fn is_writable(&self) -> bool {
        self.intersects(
            PageProtection::READWRITE
                | PageProtection::WRITECOPY
                | PageProtection::EXECUTE_READWRITE
                | PageProtection::EXECUTE_WRITECOPY,
        )
    }
}

bitflags! {
    /// SEC_* section allocation attributes
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SectionAttributes: u32 {
        const FILE = 0x0080_0000;
        const IMAGE = 0x0100_0000;
        const RESERVE = 0x0400_0000;
        const COMMIT = 0x0800_0000;
        const NOCACHE = 0x1000_0000;
        const LARGE_PAGES = 0x8000_0000;
    }
}

bitflags! {
    /// THREAD_CREATE_FLAGS_* for NtCreateThreadEx
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CreateThreadFlags: u32 {
        const CREATE_SUSPENDED = 0x0001;
        const SKIP_THREAD_ATTACH = 0x0002;
        const HIDE_FROM_DEBUGGER = 0x0004;
        const LOADER_WORKER = 0x0010;
        const SKIP_LOADER_INIT = 0x0020;
        const BYPASS_PROCESS_FREEZE = 0x0040;
    }
}

macro_rules! flags_into_register {
    ($($ty:ty),*) => {
        $(impl IntoRegister for $ty {
            #[inline]
            fn into_register(self) -> u64 {
                self.bits() as u64
            }
        })*
    };
}

flags_into_register!(
    ProcessAccess,
    ThreadAccess,
    SectionAccess,
    AllocationType,
    FreeType,
    PageProtection,
    SectionAttributes,
    CreateThreadFlags
);
