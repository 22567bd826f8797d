//! How a native call reaches the kernel, and the per-call-site cache
//!
//! A [`Transport`] turns a (module hash, function hash) pair into a cached
//! target and later invokes that target with register-width arguments:
//!
//! * [`DirectSyscall`] (64-bit Windows): the target is the syscall number read
//!   from the `ntdll` stub, invoked through the syscall trampoline.
//! * [`HeavensGate`] (32-bit Windows under WoW64): the target is the address
//!   of the 64-bit `ntdll` export, invoked through the gate.
//! * [`Unsupported`] (everything else): nothing resolves.
//!
//! [`SyscallSite`] stores the resolved target for one binding. Resolution is
//! lazy and idempotent: two threads racing on an empty site both compute the
//! same value, so a relaxed store is enough.

use crate::status::NtStatus;
use std::sync::atomic::{AtomicU64, Ordering};

/// Resolution and invocation strategy for native calls.
pub trait Transport {
    /// Short name for diagnostics
    const NAME: &'static str;

    /// Resolves a binding to its cached target, or 0.
    fn resolve(module_hash: u32, function_hash: u32) -> u64;

    /// Invokes a nonzero `target` from [`Transport::resolve`] and returns the
    /// raw result register.
    ///
    /// # Safety
    ///
    /// `args` must be valid for the native routine behind `target`.
    unsafe fn invoke(target: u64, args: &[u64]) -> u64;
}

/// Direct `syscall` on x86_64 Windows
#[derive(Debug, Clone, Copy)]
pub enum DirectSyscall {}

/// 64-bit calls from a WoW64 thread
#[derive(Debug, Clone, Copy)]
pub enum HeavensGate {}

/// No native path; every site stays unresolved
#[derive(Debug, Clone, Copy)]
pub enum Unsupported {}

#[cfg(all(windows, target_arch = "x86_64"))]
impl Transport for DirectSyscall {
    const NAME: &'static str = "syscall";

    fn resolve(module_hash: u32, function_hash: u32) -> u64 {
        let loader = crate::process::current_loader();
        let function = loader.resolve(module_hash, function_hash);
        u64::from(crate::syscall::syscall_id(loader.memory(), function))
    }

    unsafe fn invoke(target: u64, args: &[u64]) -> u64 {
        unsafe { crate::syscall::syscall(target as u32, args) }
    }
}

#[cfg(all(windows, target_arch = "x86"))]
impl Transport for HeavensGate {
    const NAME: &'static str = "wow64";

    fn resolve(module_hash: u32, function_hash: u32) -> u64 {
        if !crate::gate::is_wow64() {
            debug_log!("[TRANSPORT] not running under WoW64");
            return 0;
        }
        crate::gate::loader().resolve(module_hash, function_hash)
    }

    unsafe fn invoke(target: u64, args: &[u64]) -> u64 {
        unsafe { crate::gate::x64_call(target, args) }
    }
}

impl Transport for Unsupported {
    const NAME: &'static str = "unsupported";

    fn resolve(_module_hash: u32, _function_hash: u32) -> u64 {
        0
    }

    unsafe fn invoke(_target: u64, _args: &[u64]) -> u64 {
        NtStatus::INVALID_SYSTEM_SERVICE.bits() as u64
    }
}

/// Transport of the build target
#[cfg(all(windows, target_arch = "x86_64"))]
pub type Native = DirectSyscall;
/// Transport of the build target
#[cfg(all(windows, target_arch = "x86"))]
pub type Native = HeavensGate;
/// Transport of the build target
#[cfg(not(all(windows, any(target_arch = "x86_64", target_arch = "x86"))))]
pub type Native = Unsupported;

/// Cached resolution for one native entry point.
#[derive(Debug)]
pub struct SyscallSite {
    module_hash: u32,
    function_hash: u32,
    target: AtomicU64,
}

impl SyscallSite {
    pub const fn new(module_hash: u32, function_hash: u32) -> Self {
        SyscallSite {
            module_hash,
            function_hash,
            target: AtomicU64::new(0),
        }
    }

    pub fn module_hash(&self) -> u32 {
        self.module_hash
    }

    pub fn function_hash(&self) -> u32 {
        self.function_hash
    }

    /// Whatever is cached right now, without resolving
    pub fn cached(&self) -> u64 {
        self.target.load(Ordering::Relaxed)
    }

    /// Cached target, resolving through `T` on first use.
    ///
    /// A failed resolution is not cached, so the next call tries again.
    pub fn target<T: Transport>(&self) -> u64 {
        let cached = self.cached();
        if cached != 0 {
            return cached;
        }
        let resolved = T::resolve(self.module_hash, self.function_hash);
        debug_log!(
            "[TRANSPORT] {} {:#010x}!{:#010x} -> {:#x}",
            T::NAME,
            self.module_hash,
            self.function_hash,
            resolved
        );
        if resolved != 0 {
            self.target.store(resolved, Ordering::Relaxed);
        }
        resolved
    }

    /// Resolves (if needed) and invokes this site.
    ///
    /// An unresolvable site returns STATUS_INVALID_SYSTEM_SERVICE without
    /// invoking anything.
    ///
    /// # Safety
    ///
    /// `args` must match the native routine behind this site.
    pub unsafe fn call<T: Transport>(&self, args: &[u64]) -> NtStatus {
        let target = self.target::<T>();
        if target == 0 {
            return NtStatus::INVALID_SYSTEM_SERVICE;
        }
        NtStatus::from_register(unsafe { T::invoke(target, args) })
    }
}
