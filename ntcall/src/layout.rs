//! TEB / PEB / loader-entry offsets per address width

use crate::memory::Memory;

/// Field offsets of the undocumented process structures for one address width.
pub trait Arch {
    /// Pointer size in bytes
    const POINTER_SIZE: u64;

    /// TEB -> ProcessEnvironmentBlock
    const TEB_PEB: u64;
    /// TEB -> ClientId.UniqueProcess
    const TEB_PROCESS_ID: u64;
    /// TEB -> ClientId.UniqueThread
    const TEB_THREAD_ID: u64;

    /// PEB -> ImageBaseAddress
    const PEB_IMAGE_BASE: u64;
    /// PEB -> Ldr
    const PEB_LDR: u64;

    /// PEB_LDR_DATA -> InLoadOrderModuleList
    const LDR_IN_LOAD_ORDER: u64;

    /// LDR_DATA_TABLE_ENTRY -> DllBase
    const ENTRY_DLL_BASE: u64;
    /// LDR_DATA_TABLE_ENTRY -> SizeOfImage
    const ENTRY_SIZE_OF_IMAGE: u64;
    /// LDR_DATA_TABLE_ENTRY -> FullDllName
    const ENTRY_FULL_DLL_NAME: u64;
    /// LDR_DATA_TABLE_ENTRY -> BaseDllName
    const ENTRY_BASE_DLL_NAME: u64;

    /// UNICODE_STRING -> Buffer
    const UNICODE_STRING_BUFFER: u64;

    fn read_pointer<M: Memory + ?Sized>(memory: &M, address: u64) -> Option<u64> {
        if Self::POINTER_SIZE == 8 {
            memory.read_u64(address)
        } else {
            memory.read_u32(address).map(u64::from)
        }
    }
}

/// 32-bit layouts
#[derive(Debug, Clone, Copy)]
pub enum X86 {}

/// 64-bit layouts
#[derive(Debug, Clone, Copy)]
pub enum X64 {}

impl Arch for X86 {
    const POINTER_SIZE: u64 = 4;

    const TEB_PEB: u64 = 0x30;
    const TEB_PROCESS_ID: u64 = 0x20;
    const TEB_THREAD_ID: u64 = 0x24;

    const PEB_IMAGE_BASE: u64 = 0x08;
    const PEB_LDR: u64 = 0x0C;

    const LDR_IN_LOAD_ORDER: u64 = 0x0C;

    const ENTRY_DLL_BASE: u64 = 0x18;
    const ENTRY_SIZE_OF_IMAGE: u64 = 0x20;
    const ENTRY_FULL_DLL_NAME: u64 = 0x24;
    const ENTRY_BASE_DLL_NAME: u64 = 0x2C;

    const UNICODE_STRING_BUFFER: u64 = 0x04;
}

impl Arch for X64 {
    const POINTER_SIZE: u64 = 8;

    const TEB_PEB: u64 = 0x60;
    const TEB_PROCESS_ID: u64 = 0x40;
    const TEB_THREAD_ID: u64 = 0x48;

    const PEB_IMAGE_BASE: u64 = 0x10;
    const PEB_LDR: u64 = 0x18;

    const LDR_IN_LOAD_ORDER: u64 = 0x10;

    const ENTRY_DLL_BASE: u64 = 0x30;
    const ENTRY_SIZE_OF_IMAGE: u64 = 0x40;
    const ENTRY_FULL_DLL_NAME: u64 = 0x48;
    const ENTRY_BASE_DLL_NAME: u64 = 0x58;

    const UNICODE_STRING_BUFFER: u64 = 0x08;
}

/// Layout of the build target
#[cfg(target_pointer_width = "64")]
pub type Native = X64;
/// Layout of the build target
#[cfg(target_pointer_width = "32")]
pub type Native = X86;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::SnapshotMemory;

    #[test]
    fn test_pointer_width_reads() {
        let memory = SnapshotMemory::new().with(0x100, vec![0x78, 0x56, 0x34, 0x12, 0xEF, 0xCD, 0xAB, 0x89]);
        assert_eq!(X86::read_pointer(&memory, 0x100), Some(0x1234_5678));
        assert_eq!(X64::read_pointer(&memory, 0x100), Some(0x89AB_CDEF_1234_5678));
    }

    #[test]
    fn test_entry_names_follow_list_links() {
        // three LIST_ENTRYs precede DllBase
        assert_eq!(X86::ENTRY_DLL_BASE, 3 * 2 * X86::POINTER_SIZE);
        assert_eq!(X64::ENTRY_DLL_BASE, 3 * 2 * X64::POINTER_SIZE);
        // FullDllName (one UNICODE_STRING) sits between SizeOfImage and BaseDllName
        assert_eq!(X86::ENTRY_BASE_DLL_NAME - X86::ENTRY_FULL_DLL_NAME, 8);
        assert_eq!(X64::ENTRY_BASE_DLL_NAME - X64::ENTRY_FULL_DLL_NAME, 16);
    }
}
