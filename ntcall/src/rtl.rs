//! Native structures and information classes passed to the façade
//!
//! Layouts are the 64-bit ones. Both transports end up in 64-bit `ntdll`
//! (directly, or through the gate from a WoW64 thread), so these are what
//! the kernel side reads regardless of the caller's bitness.

use crate::handle::IntoRegister;

macro_rules! info_class {
    ($(#[$meta:meta])* $name:ident { $($(#[$cmeta:meta])* $konst:ident = $value:literal,)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(transparent)]
        pub struct $name(pub u32);

        impl $name {
            $($(#[$cmeta])* pub const $konst: $name = $name($value);)*
        }

        impl IntoRegister for $name {
            #[inline]
            fn into_register(self) -> u64 {
                self.0 as u64
            }
        }
    };
}

info_class! {
    /// PROCESSINFOCLASS
    ProcessInfoClass {
        BASIC_INFORMATION = 0,
        DEBUG_PORT = 7,
        WOW64_INFORMATION = 26,
        IMAGE_FILE_NAME = 27,
        BREAK_ON_TERMINATION = 29,
        PROTECTION_INFORMATION = 61,
    }
}

info_class! {
    /// THREADINFOCLASS
    ThreadInfoClass {
        BASIC_INFORMATION = 0,
        TIMES = 1,
        QUERY_SET_WIN32_START_ADDRESS = 9,
        HIDE_FROM_DEBUGGER = 17,
    }
}

info_class! {
    /// SYSTEM_INFORMATION_CLASS
    SystemInfoClass {
        BASIC_INFORMATION = 0,
        PROCESS_INFORMATION = 5,
        MODULE_INFORMATION = 11,
        HANDLE_INFORMATION = 16,
        EXTENDED_HANDLE_INFORMATION = 64,
    }
}

info_class! {
    /// OBJECT_INFORMATION_CLASS
    ObjectInfoClass {
        BASIC_INFORMATION = 0,
        NAME_INFORMATION = 1,
        TYPE_INFORMATION = 2,
    }
}

info_class! {
    /// SECTION_INFORMATION_CLASS
    SectionInfoClass {
        BASIC_INFORMATION = 0,
        IMAGE_INFORMATION = 1,
    }
}

info_class! {
    /// MEMORY_INFORMATION_CLASS
    MemoryInfoClass {
        BASIC_INFORMATION = 0,
        WORKING_SET_INFORMATION = 1,
        MAPPED_FILENAME_INFORMATION = 2,
        REGION_INFORMATION = 3,
    }
}

/// SECTION_INHERIT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum SectionInherit {
    Share = 1,
    Unmap = 2,
}

impl IntoRegister for SectionInherit {
    #[inline]
    fn into_register(self) -> u64 {
        self as u32 as u64
    }
}

/// UNICODE_STRING (64-bit layout)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct UnicodeString {
    /// Length in bytes, without terminator
    pub length: u16,
    pub maximum_length: u16,
    pub buffer: u64,
}

/// OBJECT_ATTRIBUTES (64-bit layout)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct ObjectAttributes {
    pub length: u32,
    pub root_directory: u64,
    pub object_name: u64,
    pub attributes: u32,
    pub security_descriptor: u64,
    pub security_quality_of_service: u64,
}

impl ObjectAttributes {
    /// OBJ_INHERIT
    pub const INHERIT: u32 = 0x02;
    /// OBJ_CASE_INSENSITIVE
    pub const CASE_INSENSITIVE: u32 = 0x40;
    /// OBJ_KERNEL_HANDLE
    pub const KERNEL_HANDLE: u32 = 0x200;

    /// Empty attributes with the length field filled in
    pub const fn new() -> Self {
        ObjectAttributes {
            length: std::mem::size_of::<ObjectAttributes>() as u32,
            root_directory: 0,
            object_name: 0,
            attributes: 0,
            security_descriptor: 0,
            security_quality_of_service: 0,
        }
    }
}

impl Default for ObjectAttributes {
    fn default() -> Self {
        Self::new()
    }
}

/// CLIENT_ID (64-bit layout)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct ClientId {
    pub unique_process: u64,
    pub unique_thread: u64,
}

/// PROCESS_BASIC_INFORMATION (64-bit layout)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct ProcessBasicInformation {
    pub exit_status: i32,
    pub peb_base_address: u64,
    pub affinity_mask: u64,
    pub base_priority: i32,
    pub unique_process_id: u64,
    pub inherited_from_unique_process_id: u64,
}

/// THREAD_BASIC_INFORMATION (64-bit layout)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct ThreadBasicInformation {
    pub exit_status: i32,
    pub teb_base_address: u64,
    pub client_id: ClientId,
    pub affinity_mask: u64,
    pub priority: i32,
    pub base_priority: i32,
}

/// SECTION_BASIC_INFORMATION (64-bit layout)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct SectionBasicInformation {
    pub base_address: u64,
    pub allocation_attributes: u32,
    pub maximum_size: i64,
}

/// MEMORY_BASIC_INFORMATION (64-bit layout)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct MemoryBasicInformation {
    pub base_address: u64,
    pub allocation_base: u64,
    pub allocation_protect: u32,
    pub partition_id: u16,
    pub region_size: u64,
    pub state: u32,
    pub protect: u32,
    pub kind: u32,
}

impl MemoryBasicInformation {
    /// MEM_COMMIT
    pub const COMMIT: u32 = 0x1000;
    /// MEM_RESERVE
    pub const RESERVE: u32 = 0x2000;
    /// MEM_FREE
    pub const FREE: u32 = 0x1_0000;

    pub fn is_committed(&self) -> bool {
        self.state == Self::COMMIT
    }

    pub fn is_free(&self) -> bool {
        self.state == Self::FREE
    }
}
