//! Direct NT system calls without going through `ntdll` call sites
//!
//! Native entry points are found by walking the loader list in the PEB and
//! parsing export tables by hand, so nothing here calls `GetModuleHandle`,
//! `GetProcAddress` or any other hookable API. On 64-bit Windows the syscall
//! number is read out of the `ntdll` stub and issued directly; a 32-bit
//! process under WoW64 switches to long mode and calls 64-bit `ntdll` itself
//! (heaven's gate). Either way callers use the same [`nt`] functions.
//!
//! The resolution primitives (hashing, export lookup, loader walk, syscall
//! numbers) work on any [`memory::Memory`] view, so they also run against a
//! PE file mapped with [`image::MappedImage`] or a synthetic snapshot on any
//! host.

#![allow(clippy::missing_safety_doc)]

macro_rules! debug_log {
    ($($arg:tt)*) => {
        #[cfg(feature = "debug-logs")]
        eprintln!($($arg)*)
    };
}

macro_rules! debug_log_return {
    ($tag:literal, $fmt:literal, $expr:expr) => {{
        #[cfg(feature = "debug-logs")]
        {
            let result = $expr;
            eprintln!(concat!($tag, " -> ", $fmt), result);
            result
        }
        #[cfg(not(feature = "debug-logs"))]
        {
            $expr
        }
    }};
}

pub mod flags;
#[cfg(all(windows, target_arch = "x86"))]
pub mod gate;
pub mod handle;
pub mod hash;
pub mod image;
pub mod layout;
pub mod loader;
pub mod memory;
pub mod nt;
pub mod pe;
pub mod process;
pub mod rtl;
pub mod status;
pub mod syscall;
pub mod transport;

pub use handle::{FromRegister, Handle, IntoRegister};
pub use image::MappedImage;
pub use loader::{Loader, ModuleEntry};
pub use memory::{LocalMemory, Memory, SnapshotMemory};
pub use pe::{Export, ExportTarget};
pub use status::NtStatus;
pub use transport::SyscallSite;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("PE parse error: {0}")]
    Parse(String),
    #[error("Unsupported image: {0}")]
    UnsupportedImage(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
