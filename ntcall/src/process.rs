//! The current process, seen natively
//!
//! `gs` (64-bit) or `fs` (32-bit) addresses the TEB of the running thread,
//! which leads to the PEB and from there to the loader list.

use crate::layout::{self, Arch};
use crate::loader::Loader;
use crate::memory::LocalMemory;
use crate::pe::ExportTarget;

macro_rules! teb_read {
    ($offset:expr) => {{
        #[cfg(all(windows, target_arch = "x86_64"))]
        {
            let value: u64;
            // SAFETY: gs always addresses the current TEB
            unsafe {
                std::arch::asm!(
                    "mov {}, gs:[{off}]",
                    out(reg) value,
                    off = const $offset,
                    options(nostack, readonly, preserves_flags)
                );
            }
            value
        }
        #[cfg(all(windows, target_arch = "x86"))]
        {
            let value: u32;
            // SAFETY: fs always addresses the current TEB
            unsafe {
                std::arch::asm!(
                    "mov {}, fs:[{off}]",
                    out(reg) value,
                    off = const $offset,
                    options(nostack, readonly, preserves_flags)
                );
            }
            u64::from(value)
        }
        #[cfg(not(all(windows, any(target_arch = "x86_64", target_arch = "x86"))))]
        {
            let _ = $offset;
            0u64
        }
    }};
}

/// PEB of the current process, 0 off Windows
pub fn current_peb() -> u64 {
    teb_read!(<layout::Native as Arch>::TEB_PEB)
}

/// Process id from the current TEB, 0 off Windows
pub fn current_pid() -> u32 {
    teb_read!(<layout::Native as Arch>::TEB_PROCESS_ID) as u32
}

/// Thread id from the current TEB, 0 off Windows
pub fn current_tid() -> u32 {
    teb_read!(<layout::Native as Arch>::TEB_THREAD_ID) as u32
}

/// Loader view of the current process
pub fn current_loader() -> Loader<LocalMemory, layout::Native> {
    // SAFETY: the PEB and everything reachable from it stays mapped while the
    // process runs; a zero PEB makes every lookup fail before any read
    let memory = unsafe { LocalMemory::new() };
    Loader::new(memory, current_peb())
}

/// Base of a loaded module by lowercase name hash, or 0.
///
/// An invalid hash returns the main executable.
pub fn get_module_handle(name_hash: u32) -> u64 {
    current_loader().module_handle(name_hash, true)
}

/// Export of a loaded module by name hash or ordinal, or 0
pub fn get_proc_address(module: u64, target: ExportTarget) -> u64 {
    current_loader().proc_address(module, target, true)
}
