//! Syscall numbers and the direct-syscall trampoline
//!
//! A 64-bit `ntdll` stub looks like
//!
//! ```text
//! 4C 8B D1          mov r10, rcx
//! B8 xx xx 00 00    mov eax, <syscall number>
//! ...               syscall / ret
//! ```
//!
//! so the number is the little-endian immediate at offset 4. The trampoline
//! replays that stub with the number and arguments supplied at run time.

use crate::handle::FromRegister;
use crate::memory::Memory;
use crate::status::NtStatus;

/// Offset of the syscall number inside an `ntdll` stub
pub const STUB_ID_OFFSET: usize = 4;

/// Most arguments one call can carry
pub const MAX_ARGS: usize = 16;

/// Decodes the syscall number from the first bytes of a stub.
///
/// Returns 0 when the immediate is not positive or does not fit the 16-bit
/// service-number domain, which is what a hooked or reshaped stub looks like.
pub fn syscall_id_from_stub(stub: &[u8]) -> u32 {
    let Some(bytes) = stub.get(STUB_ID_OFFSET..STUB_ID_OFFSET + 4) else {
        return 0;
    };
    let id = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if id > 0 && id < u16::MAX as i32 {
        id as u32
    } else {
        debug_log!("[SYSCALL] rejected stub immediate {:#x}", id);
        0
    }
}

/// Reads the stub at `function` and decodes its syscall number, or 0.
pub fn syscall_id<M: Memory + ?Sized>(memory: &M, function: u64) -> u32 {
    if function == 0 {
        return 0;
    }
    match memory.read_array::<{ STUB_ID_OFFSET + 4 }>(function) {
        Some(stub) => syscall_id_from_stub(&stub),
        None => 0,
    }
}

/// Builds the argument array for [`syscall`], widening each argument with
/// [`IntoRegister`](crate::IntoRegister).
#[macro_export]
macro_rules! syscall_args {
    ($($arg:expr),* $(,)?) => {
        [$($crate::IntoRegister::into_register($arg)),*]
    };
}

/// Issues syscall `id` directly, bypassing the `ntdll` stub.
///
/// ```ignore
/// let status: NtStatus = syscall!(id, Handle::CURRENT_PROCESS, NtStatus::SUCCESS);
/// ```
#[macro_export]
macro_rules! syscall {
    ($id:expr $(, $arg:expr)* $(,)?) => {
        $crate::syscall::syscall($id, &$crate::syscall_args!($($arg),*))
    };
}

/// Issues syscall `id` with up to [`MAX_ARGS`] register-width arguments and
/// returns the raw result narrowed to `R`.
///
/// More than [`MAX_ARGS`] arguments is refused with STATUS_INVALID_PARAMETER
/// without entering the kernel.
///
/// # Safety
///
/// The arguments must be valid for the system service `id` names.
#[cfg(all(windows, target_arch = "x86_64"))]
pub unsafe fn syscall<R: FromRegister>(id: u32, args: &[u64]) -> R {
    if args.len() > MAX_ARGS {
        return R::from_register(NtStatus::INVALID_PARAMETER.bits() as u64);
    }
    let mut slots = [0u64; MAX_ARGS];
    slots[..args.len()].copy_from_slice(args);
    R::from_register(unsafe { trampoline::syscall_trampoline(id, args.len(), slots.as_ptr()) })
}

/// Without a direct-syscall transport every call reports an unresolvable service.
///
/// # Safety
///
/// Always safe; kept `unsafe` to match the real trampoline.
#[cfg(not(all(windows, target_arch = "x86_64")))]
pub unsafe fn syscall<R: FromRegister>(_id: u32, _args: &[u64]) -> R {
    R::from_register(NtStatus::INVALID_SYSTEM_SERVICE.bits() as u64)
}

#[cfg(all(windows, target_arch = "x86_64"))]
mod trampoline {
    /// `rcx` = syscall number, `rdx` = argument count, `r8` = argument array
    /// (at least four readable slots).
    ///
    /// Arguments 1-4 go to `r10`, `rdx`, `r8`, `r9`; the rest are copied to
    /// `[rsp + 0x28]` onwards, which is where the kernel expects them after
    /// the return-address slot and 32 bytes of home space.
    #[unsafe(naked)]
    pub unsafe extern "win64" fn syscall_trampoline(_id: u32, _count: usize, _args: *const u64) -> u64 {
        std::arch::naked_asm!(
            "push rbx",
            "push rsi",
            "push rdi",
            "mov rbx, rsp",
            "mov r11d, ecx",
            "mov rax, r8",
            // spilled = max(count - 4, 0)
            "xor ecx, ecx",
            "cmp rdx, 4",
            "jbe 2f",
            "lea rcx, [rdx - 4]",
            "2:",
            "lea rdx, [rcx * 8 + 0x28]",
            "sub rsp, rdx",
            "and rsp, -16",
            "lea rsi, [rax + 0x20]",
            "lea rdi, [rsp + 0x28]",
            "rep movsq",
            "mov r10, [rax]",
            "mov rdx, [rax + 0x08]",
            "mov r8, [rax + 0x10]",
            "mov r9, [rax + 0x18]",
            "mov eax, r11d",
            "syscall",
            "mov rsp, rbx",
            "pop rdi",
            "pop rsi",
            "pop rbx",
            "ret",
        )
    }
}
