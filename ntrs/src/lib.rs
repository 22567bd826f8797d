//! Safe, ergonomic Rust API over ntcall
//!
//! Every native call goes through `ntcall`'s direct-syscall (or WoW64
//! gate) bindings; this crate adds owned handles that close themselves,
//! memory regions and mapped views that are released on drop, builders and
//! `Result`s instead of raw status codes.
//!
//! # Example
//!
//! ```no_run
//! use ntrs::{PageProtection, Process, ProcessAccess};
//!
//! let target = Process::open(1234, ProcessAccess::ALL)?;
//! let region = target.allocate(0x1000, PageProtection::READWRITE)?;
//! target.write(region.base(), b"hello")?;
//!
//! for module in target.modules()? {
//!     println!("{:#x} {}", module.base, module.base_name_lossy());
//! }
//! # Ok::<(), ntrs::Error>(())
//! ```

mod error;
mod handle;
mod image;
mod memory;
mod process;
mod section;
mod thread;

pub use error::{Error, Result, StatusExt};
pub use handle::{OwnedHandle, WaitResult};
pub use image::{Image, SyscallEntry};
pub use memory::{Allocation, ProtectionGuard};
pub use process::{Process, Regions};
pub use section::{MappedView, Section};
pub use thread::{Thread, ThreadBuilder};

pub use ntcall::flags::{
    AllocationType, CreateThreadFlags, FreeType, PageProtection, ProcessAccess, SectionAccess,
    SectionAttributes, ThreadAccess,
};
pub use ntcall::hash;
pub use ntcall::rtl::MemoryBasicInformation;
pub use ntcall::{Export, Handle, ModuleEntry, NtStatus};

/// Base address of a module loaded in the current process, by name
/// (case-insensitive, e.g. `"kernel32.dll"`).
pub fn module_handle(name: &str) -> Result<u64> {
    match ntcall::process::current_loader().module_handle_by_name(name) {
        0 => Err(Error::Unresolved(name.to_string())),
        base => Ok(base),
    }
}

/// Export `function` of the module loaded as `module` in the current process.
///
/// Forwarders into other loaded modules are followed.
pub fn proc_address(module: &str, function: &str) -> Result<u64> {
    let base = module_handle(module)?;
    let target = ntcall::ExportTarget::from_name(function, false);
    match ntcall::process::current_loader().proc_address(base, target, false) {
        0 => Err(Error::Unresolved(format!("{}!{}", module, function))),
        address => Ok(address),
    }
}

/// Name of the syscall transport compiled into this build
pub fn transport() -> &'static str {
    ntcall::nt::transport_name()
}

/// Resolves every syscall site now and lists `(export, target)` pairs;
/// the target is 0 where resolution failed.
pub fn syscall_sites() -> Vec<(&'static str, u64)> {
    ntcall::nt::prefetch();
    ntcall::nt::cached_targets().collect()
}
