//! Heaven's gate: 64-bit calls and memory access from a WoW64 thread
//!
//! A 32-bit thread on 64-bit Windows can switch its code segment from `0x23`
//! (compatibility mode) to `0x33` (long mode) with a far return, run 64-bit
//! code, and come back the same way. Everything 64-bit this crate needs from
//! a WoW64 process goes through the three routines here:
//!
//! * [`x64_call`]: call a 64-bit function with register-width arguments
//! * [`x64_memcpy`] / [`x64_memcmp`]: copy or compare memory at a 64-bit address
//! * [`x64_teb`]: the 64-bit TEB, taken from `r12` in long mode
//!
//! The assembler only speaks 32-bit here, so long-mode code is written as
//! 32-bit mnemonics behind a `REX.W` (`0x48`) or `REX.WR` (`0x4C`) prefix
//! byte, and the mode switches themselves are emitted as raw bytes.
//!
//! Values crossing into 64-bit land must be widened with the right
//! extension: [`crate::handle::extend_pointer`] for pointers and
//! [`crate::handle::extend_handle`] for handles.

use crate::layout::{Arch, X64};
use crate::loader::Loader;
use crate::memory::Memory;
use crate::status::NtStatus;
use crate::syscall::MAX_ARGS;

/// Argument block shared with the long-mode call routine
#[repr(C)]
struct GateFrame {
    function: u64,
    args: u64,
    count: u64,
    result: u64,
}

/// `push 0x33; call $+5; add dword [esp], 5; retf`
macro_rules! enter_long_mode {
    () => {
        concat!(
            ".byte 0x6A, 0x33\n",
            ".byte 0xE8, 0x00, 0x00, 0x00, 0x00\n",
            ".byte 0x83, 0x04, 0x24, 0x05\n",
            ".byte 0xCB\n",
        )
    };
}

/// `call $+5; mov dword [rsp + 4], 0x23; add dword [rsp], 0xD; retf`
macro_rules! leave_long_mode {
    () => {
        concat!(
            ".byte 0xE8, 0x00, 0x00, 0x00, 0x00\n",
            ".byte 0xC7, 0x44, 0x24, 0x04, 0x23, 0x00, 0x00, 0x00\n",
            ".byte 0x83, 0x04, 0x24, 0x0D\n",
            ".byte 0xCB\n",
        )
    };
}

/// cdecl, `frame` at `[esp + 4]`.
///
/// FS is forced to `0x2B` for the excursion and restored afterwards, the
/// stack is realigned to 16 bytes, arguments 1-4 go to `rcx`, `rdx`, `r8`,
/// `r9` and the rest are pushed in reverse above 32 bytes of home space.
#[unsafe(naked)]
unsafe extern "C" fn gate_call(_frame: *mut GateFrame) {
    std::arch::naked_asm!(
        "push ebp",
        "mov ebp, esp",
        "push ebx",
        "push esi",
        "push edi",
        "sub esp, 8",
        "mov ebx, [ebp + 8]",
        "mov word ptr [ebp - 16], fs",
        "mov eax, 0x2B",
        "mov fs, ax",
        "mov [ebp - 20], esp",
        "and esp, 0xFFFFFFF0",
        enter_long_mode!(),
        // long mode; clear the upper halves of rsp and rbx
        "mov esp, esp",
        "mov ebx, ebx",
        // mov rsi, [rbx + 8]
        ".byte 0x48",
        "mov esi, [ebx + 8]",
        // mov rcx, [rsi]
        ".byte 0x48",
        "mov ecx, [esi]",
        // mov rdx, [rsi + 8]
        ".byte 0x48",
        "mov edx, [esi + 8]",
        // mov r8, [rsi + 0x10]
        ".byte 0x4C",
        "mov eax, [esi + 0x10]",
        // mov r9, [rsi + 0x18]
        ".byte 0x4C",
        "mov ecx, [esi + 0x18]",
        // rax = max(count - 4, 0)
        ".byte 0x48",
        "mov eax, [ebx + 0x10]",
        ".byte 0x48",
        "sub eax, 4",
        "jg 3f",
        "xor eax, eax",
        "3:",
        // odd number of pushes: pad so the call site stays 16-byte aligned
        "test al, 1",
        "jz 4f",
        ".byte 0x48",
        "sub esp, 8",
        "4:",
        // lea rdi, [rsi + rax * 8 + 0x18]  (last argument)
        ".byte 0x48",
        "lea edi, [esi + eax * 8 + 0x18]",
        "5:",
        ".byte 0x48",
        "test eax, eax",
        "jz 6f",
        // push qword ptr [rdi]
        "push dword ptr [edi]",
        ".byte 0x48",
        "sub edi, 8",
        ".byte 0x48",
        "sub eax, 1",
        "jmp 5b",
        "6:",
        ".byte 0x48",
        "sub esp, 0x20",
        // call qword ptr [rbx]
        "call dword ptr [ebx]",
        // mov [rbx + 0x18], rax
        ".byte 0x48",
        "mov [ebx + 0x18], eax",
        leave_long_mode!(),
        // compatibility mode again
        "mov ax, ds",
        "mov ss, ax",
        "mov esp, [ebp - 20]",
        "mov ax, word ptr [ebp - 16]",
        "mov fs, ax",
        "add esp, 8",
        "pop edi",
        "pop esi",
        "pop ebx",
        "pop ebp",
        "ret",
    )
}

/// cdecl `(dst: *mut u8, src: u64, len: u32)`
#[unsafe(naked)]
unsafe extern "C" fn gate_memcpy(_dst: *mut u8, _src: u64, _len: u32) {
    std::arch::naked_asm!(
        "push esi",
        "push edi",
        enter_long_mode!(),
        "mov esp, esp",
        "mov edi, [esp + 12]",
        // mov rsi, [rsp + 16]
        ".byte 0x48",
        "mov esi, [esp + 16]",
        "mov ecx, [esp + 24]",
        "cld",
        "rep movsb",
        leave_long_mode!(),
        "mov ax, ds",
        "mov ss, ax",
        "pop edi",
        "pop esi",
        "ret",
    )
}

/// cdecl `(left: *const u8, right: u64, len: u32) -> u32`, 1 when equal
#[unsafe(naked)]
unsafe extern "C" fn gate_memcmp(_left: *const u8, _right: u64, _len: u32) -> u32 {
    std::arch::naked_asm!(
        "push esi",
        "push edi",
        enter_long_mode!(),
        "mov esp, esp",
        "mov esi, [esp + 12]",
        // mov rdi, [rsp + 16]
        ".byte 0x48",
        "mov edi, [esp + 16]",
        "mov ecx, [esp + 24]",
        // ZF=1 so an empty range compares equal
        "xor eax, eax",
        "cld",
        "repe cmpsb",
        "jne 2f",
        "mov eax, 1",
        "2:",
        leave_long_mode!(),
        "mov cx, ds",
        "mov ss, cx",
        "pop edi",
        "pop esi",
        "ret",
    )
}

/// cdecl `(out: *mut u64)`
#[unsafe(naked)]
unsafe extern "C" fn gate_teb(_out: *mut u64) {
    std::arch::naked_asm!(
        enter_long_mode!(),
        "mov esp, esp",
        "mov ecx, [esp + 4]",
        // mov [rcx], r12
        ".byte 0x4C",
        "mov [ecx], esp",
        leave_long_mode!(),
        "mov ax, ds",
        "mov ss, ax",
        "ret",
    )
}

/// True when this 32-bit thread runs under WoW64.
///
/// Reads `WOW32Reserved` from the 32-bit TEB, which holds the address of
/// the 64-bit transition stub and is null on native 32-bit Windows.
pub fn is_wow64() -> bool {
    let reserved: u32;
    // SAFETY: fs always addresses the current 32-bit TEB
    unsafe {
        std::arch::asm!(
            "mov {}, fs:[0xC0]",
            out(reg) reserved,
            options(nostack, readonly, preserves_flags)
        );
    }
    reserved != 0
}

/// Calls the 64-bit function at `function` with `args` in the Win64
/// calling convention and returns `rax`.
///
/// Refuses (STATUS_INVALID_SYSTEM_SERVICE) a null target and (STATUS_INVALID_PARAMETER)
/// more than [`MAX_ARGS`] arguments without switching modes.
///
/// # Safety
///
/// `function` must be 64-bit code that is safe to call with `args`, and
/// every pointer in `args` must be extended correctly.
pub unsafe fn x64_call(function: u64, args: &[u64]) -> u64 {
    if function == 0 {
        return NtStatus::INVALID_SYSTEM_SERVICE.bits() as u64;
    }
    if args.len() > MAX_ARGS {
        return NtStatus::INVALID_PARAMETER.bits() as u64;
    }
    let mut slots = [0u64; MAX_ARGS];
    slots[..args.len()].copy_from_slice(args);

    let mut frame = GateFrame {
        function,
        args: slots.as_ptr() as usize as u64,
        count: args.len() as u64,
        result: 0,
    };
    unsafe { gate_call(&mut frame) };
    frame.result
}

/// Copies `dst.len()` bytes from the 64-bit address `src`.
///
/// # Safety
///
/// `src..src + dst.len()` must be readable in the 64-bit address space.
pub unsafe fn x64_memcpy(dst: &mut [u8], src: u64) {
    if dst.is_empty() {
        return;
    }
    unsafe { gate_memcpy(dst.as_mut_ptr(), src, dst.len() as u32) }
}

/// Compares `left` with memory at the 64-bit address `right`.
///
/// # Safety
///
/// `right..right + left.len()` must be readable in the 64-bit address space.
pub unsafe fn x64_memcmp(left: &[u8], right: u64) -> bool {
    unsafe { gate_memcmp(left.as_ptr(), right, left.len() as u32) != 0 }
}

/// Address of the 64-bit TEB of the current thread
pub fn x64_teb() -> u64 {
    let mut teb = 0u64;
    // SAFETY: only reads r12 in long mode; callers gate on `is_wow64`
    unsafe { gate_teb(&mut teb) };
    teb
}

/// Address of the 64-bit PEB
pub fn x64_peb() -> u64 {
    x64_teb()
        .checked_add(X64::TEB_PEB)
        .and_then(|field| Wow64Memory.read_u64(field))
        .unwrap_or(0)
}

/// Process id from the 64-bit TEB
pub fn x64_pid() -> u32 {
    x64_teb()
        .checked_add(X64::TEB_PROCESS_ID)
        .and_then(|field| Wow64Memory.read_u64(field))
        .map_or(0, |pid| pid as u32)
}

/// The 64-bit address space of the current WoW64 process.
///
/// Null reads fail; everything else is trusted like [`crate::memory::LocalMemory`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Wow64Memory;

const PAGE_SIZE: u64 = 0x1000;

impl Memory for Wow64Memory {
    fn read(&self, address: u64, buf: &mut [u8]) -> bool {
        if address == 0 || address.checked_add(buf.len() as u64).is_none() {
            return false;
        }
        // SAFETY: loader and image structures are trusted to be mapped
        unsafe { x64_memcpy(buf, address) };
        true
    }

    // copies up to the end of the current page at a time
    fn read_c_string(&self, address: u64, max_len: usize) -> Option<Vec<u8>> {
        let mut out = Vec::new();
        let mut cursor = address;
        while out.len() < max_len {
            let in_page = (PAGE_SIZE - (cursor & (PAGE_SIZE - 1))).min(64);
            let chunk = in_page.min((max_len - out.len()) as u64) as usize;
            let mut buf = [0u8; 64];
            if !self.read(cursor, &mut buf[..chunk]) {
                return None;
            }
            if let Some(nul) = buf[..chunk].iter().position(|&b| b == 0) {
                out.extend_from_slice(&buf[..nul]);
                return Some(out);
            }
            out.extend_from_slice(&buf[..chunk]);
            cursor = cursor.checked_add(chunk as u64)?;
        }
        None
    }
}

/// Loader view of the 64-bit half of this process
pub fn loader() -> Loader<Wow64Memory, X64> {
    let peb = if is_wow64() { x64_peb() } else { 0 };
    Loader::new(Wow64Memory, peb)
}

/// 64-bit module base by lowercase name hash, or 0
pub fn x64_get_module_handle(name_hash: u32) -> u64 {
    loader().module_handle(name_hash, true)
}

/// 64-bit export address, or 0
pub fn x64_get_proc_address(module: u64, target: crate::pe::ExportTarget, lowercase: bool) -> u64 {
    loader().proc_address(module, target, lowercase)
}
