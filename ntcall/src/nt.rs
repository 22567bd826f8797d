//! `nt_*` operations
//!
//! [`raw`] holds one lazily resolved binding per `ntdll` export, with the
//! exact native argument list. The functions in this module sit on top and
//! give each operation its Rust shape: references instead of pointers,
//! `Option` for optional out-parameters, typed flags and handles.
//!
//! Every argument crosses as a 64-bit register value, so address-sized
//! parameters (`SIZE_T`, `PVOID` targets) are `u64` and structures use the
//! 64-bit layouts from [`crate::rtl`], whichever transport is compiled in.
//! Handle outputs land in a 64-bit local first and are narrowed into the
//! caller's [`Handle`].
//!
//! Failure to resolve a binding returns STATUS_INVALID_SYSTEM_SERVICE. A few
//! operations refuse an invalid handle (null or `-1`) up front and report
//! success without issuing the call; this includes the `-1` current-process
//! pseudo-handle.

use crate::flags::{
    AllocationType, CreateThreadFlags, FreeType, PageProtection, ProcessAccess, SectionAccess,
    SectionAttributes, ThreadAccess,
};
use crate::handle::{Handle, IntoRegister};
use crate::rtl::{
    ClientId, MemoryInfoClass, ObjectAttributes, ObjectInfoClass, ProcessInfoClass,
    SectionInfoClass, SectionInherit, SystemInfoClass, ThreadInfoClass,
};
use crate::status::NtStatus;
use crate::transport::{Native, SyscallSite, Transport};
use std::ffi::c_void;
use std::ptr;

/// Raw native entry points
pub mod raw {
    use crate::flags::{
        AllocationType, CreateThreadFlags, FreeType, PageProtection, ProcessAccess, SectionAccess,
        SectionAttributes, ThreadAccess,
    };
    use crate::handle::Handle;
    use crate::rtl::{
        ClientId, MemoryInfoClass, ObjectAttributes, ObjectInfoClass, ProcessInfoClass,
        SectionInfoClass, SectionInherit, SystemInfoClass, ThreadInfoClass,
    };
    use crate::status::NtStatus;
    use std::ffi::c_void;

    ntcall_proc::nt_syscalls! {
        module: "ntdll.dll";

        fn NtOpenProcess(
            process: *mut u64,
            access: ProcessAccess,
            attributes: *const ObjectAttributes,
            client_id: *const ClientId,
        ) -> NtStatus;

        fn NtOpenThread(
            thread: *mut u64,
            access: ThreadAccess,
            attributes: *const ObjectAttributes,
            client_id: *const ClientId,
        ) -> NtStatus;

        fn NtClose(handle: Handle) -> NtStatus;

        fn NtAllocateVirtualMemory(
            process: Handle,
            base_address: *mut u64,
            zero_bits: u64,
            region_size: *mut u64,
            allocation_type: AllocationType,
            protect: PageProtection,
        ) -> NtStatus;

        fn NtFreeVirtualMemory(
            process: Handle,
            base_address: *mut u64,
            region_size: *mut u64,
            free_type: FreeType,
        ) -> NtStatus;

        fn NtProtectVirtualMemory(
            process: Handle,
            base_address: *mut u64,
            region_size: *mut u64,
            protect: PageProtection,
            old_protect: *mut u32,
        ) -> NtStatus;

        fn NtReadVirtualMemory(
            process: Handle,
            base_address: u64,
            buffer: *mut c_void,
            size: u64,
            bytes_read: *mut u64,
        ) -> NtStatus;

        fn NtWriteVirtualMemory(
            process: Handle,
            base_address: u64,
            buffer: *const c_void,
            size: u64,
            bytes_written: *mut u64,
        ) -> NtStatus;

        fn NtCreateThreadEx(
            thread: *mut u64,
            access: ThreadAccess,
            attributes: *const ObjectAttributes,
            process: Handle,
            start_routine: u64,
            argument: u64,
            flags: CreateThreadFlags,
            zero_bits: u64,
            stack_size: u64,
            maximum_stack_size: u64,
            attribute_list: u64,
        ) -> NtStatus;

        fn NtSuspendThread(thread: Handle, previous_suspend_count: *mut u32) -> NtStatus;

        fn NtResumeThread(thread: Handle, previous_suspend_count: *mut u32) -> NtStatus;

        fn NtGetContextThread(thread: Handle, context: *mut c_void) -> NtStatus;

        fn NtSetContextThread(thread: Handle, context: *const c_void) -> NtStatus;

        fn NtCreateSection(
            section: *mut u64,
            access: SectionAccess,
            attributes: *const ObjectAttributes,
            maximum_size: *mut i64,
            protect: PageProtection,
            allocation_attributes: SectionAttributes,
            file: Handle,
        ) -> NtStatus;

        fn NtMapViewOfSection(
            section: Handle,
            process: Handle,
            base_address: *mut u64,
            zero_bits: u64,
            commit_size: u64,
            section_offset: *mut i64,
            view_size: *mut u64,
            inherit: SectionInherit,
            allocation_type: AllocationType,
            protect: PageProtection,
        ) -> NtStatus;

        fn NtUnmapViewOfSection(process: Handle, base_address: u64) -> NtStatus;

        fn NtExtendSection(section: Handle, new_size: *mut i64) -> NtStatus;

        fn NtQueryInformationProcess(
            process: Handle,
            class: ProcessInfoClass,
            buffer: *mut c_void,
            length: u32,
            return_length: *mut u32,
        ) -> NtStatus;

        fn NtQueryInformationThread(
            thread: Handle,
            class: ThreadInfoClass,
            buffer: *mut c_void,
            length: u32,
            return_length: *mut u32,
        ) -> NtStatus;

        fn NtQuerySystemInformation(
            class: SystemInfoClass,
            buffer: *mut c_void,
            length: u32,
            return_length: *mut u32,
        ) -> NtStatus;

        fn NtQueryObject(
            handle: Handle,
            class: ObjectInfoClass,
            buffer: *mut c_void,
            length: u32,
            return_length: *mut u32,
        ) -> NtStatus;

        fn NtQuerySection(
            section: Handle,
            class: SectionInfoClass,
            buffer: *mut c_void,
            length: u64,
            return_length: *mut u64,
        ) -> NtStatus;

        fn NtQueryVirtualMemory(
            process: Handle,
            base_address: u64,
            class: MemoryInfoClass,
            buffer: *mut c_void,
            length: u64,
            return_length: *mut u64,
        ) -> NtStatus;

        fn NtWaitForSingleObject(handle: Handle, alertable: bool, timeout: *const i64) -> NtStatus;

        fn NtSuspendProcess(process: Handle) -> NtStatus;

        fn NtResumeProcess(process: Handle) -> NtStatus;

        fn NtTerminateProcess(process: Handle, exit_status: NtStatus) -> NtStatus;
    }
}

pub use raw::sites;

/// Resolves every binding now; returns how many resolved.
pub fn prefetch() -> usize {
    sites()
        .iter()
        .filter(|(_, site)| site.target::<Native>() != 0)
        .count()
}

/// (export name, cached target) for every binding, without resolving
pub fn cached_targets() -> impl Iterator<Item = (&'static str, u64)> {
    sites().iter().map(|(name, site)| (*name, site.cached()))
}

/// Looks up a binding's site by export name
pub fn site(name: &str) -> Option<&'static SyscallSite> {
    sites()
        .iter()
        .find(|(export, _)| export.eq_ignore_ascii_case(name))
        .map(|(_, site)| *site)
}

/// Name of the compiled-in transport
pub fn transport_name() -> &'static str {
    <Native as Transport>::NAME
}

fn out_ptr<T>(out: Option<&mut T>) -> *mut T {
    out.map_or(ptr::null_mut(), |out| out as *mut T)
}

fn in_ptr<T>(input: Option<&T>) -> *const T {
    input.map_or(ptr::null(), |input| input as *const T)
}

/// Opens process `pid`. `process` receives the handle (or an invalid one).
///
/// # Safety
///
/// Issues a native call; see the individual function contracts in `ntdll`.
pub unsafe fn nt_open_process(pid: u32, access: ProcessAccess, process: &mut Handle) -> NtStatus {
    let attributes = ObjectAttributes::new();
    let client_id = ClientId {
        unique_process: u64::from(pid),
        unique_thread: 0,
    };
    let mut handle = Handle::INVALID.into_register();
    let status = unsafe { raw::nt_open_process(&mut handle, access, &attributes, &client_id) };
    *process = Handle::from_register(handle);
    status
}

/// Opens thread `tid`. `thread` receives the handle (or an invalid one).
///
/// # Safety
///
/// Issues a native call.
pub unsafe fn nt_open_thread(tid: u32, access: ThreadAccess, thread: &mut Handle) -> NtStatus {
    let attributes = ObjectAttributes::new();
    let client_id = ClientId {
        unique_process: 0,
        unique_thread: u64::from(tid),
    };
    let mut handle = Handle::INVALID.into_register();
    let status = unsafe { raw::nt_open_thread(&mut handle, access, &attributes, &client_id) };
    *thread = Handle::from_register(handle);
    status
}

/// Closes `handle`; an invalid handle is a successful no-op.
///
/// # Safety
///
/// `handle` must not be in use elsewhere.
pub unsafe fn nt_close(handle: Handle) -> NtStatus {
    if !handle.is_valid() {
        return NtStatus::SUCCESS;
    }
    unsafe { raw::nt_close(handle) }
}

/// Reserves and/or commits memory in `process`.
///
/// `base_address` is in/out (0 lets the kernel choose), as is
/// `region_size`, which is rounded up to page granularity.
///
/// # Safety
///
/// Issues a native call that changes the address space of `process`.
pub unsafe fn nt_allocate_virtual_memory(
    process: Handle,
    base_address: &mut u64,
    zero_bits: u64,
    region_size: &mut u64,
    allocation_type: AllocationType,
    protect: PageProtection,
) -> NtStatus {
    unsafe {
        raw::nt_allocate_virtual_memory(process, base_address, zero_bits, region_size, allocation_type, protect)
    }
}

/// # Safety
///
/// Nothing may use the freed range afterwards.
pub unsafe fn nt_free_virtual_memory(
    process: Handle,
    base_address: &mut u64,
    region_size: &mut u64,
    free_type: FreeType,
) -> NtStatus {
    unsafe { raw::nt_free_virtual_memory(process, base_address, region_size, free_type) }
}

/// Changes the protection of a range; `old_protect` receives the previous
/// protection of the first page.
///
/// # Safety
///
/// Code relying on the old protection of the range must not run meanwhile.
pub unsafe fn nt_protect_virtual_memory(
    process: Handle,
    base_address: &mut u64,
    region_size: &mut u64,
    protect: PageProtection,
    old_protect: &mut PageProtection,
) -> NtStatus {
    let mut old = 0u32;
    let status = unsafe { raw::nt_protect_virtual_memory(process, base_address, region_size, protect, &mut old) };
    *old_protect = PageProtection::from_bits_retain(old);
    status
}

/// Copies `size` bytes at `base_address` in `process` into `buffer`.
///
/// # Safety
///
/// `buffer` must be writable for `size` bytes.
pub unsafe fn nt_read_virtual_memory(
    process: Handle,
    base_address: u64,
    buffer: *mut c_void,
    size: u64,
    bytes_read: Option<&mut u64>,
) -> NtStatus {
    unsafe { raw::nt_read_virtual_memory(process, base_address, buffer, size, out_ptr(bytes_read)) }
}

/// Copies `size` bytes from `buffer` to `base_address` in `process`.
///
/// # Safety
///
/// `buffer` must be readable for `size` bytes.
pub unsafe fn nt_write_virtual_memory(
    process: Handle,
    base_address: u64,
    buffer: *const c_void,
    size: u64,
    bytes_written: Option<&mut u64>,
) -> NtStatus {
    unsafe { raw::nt_write_virtual_memory(process, base_address, buffer, size, out_ptr(bytes_written)) }
}

/// Starts a thread at `start_routine(argument)` in `process`.
///
/// # Safety
///
/// `start_routine` must be a valid thread entry in the target process.
#[allow(clippy::too_many_arguments)]
pub unsafe fn nt_create_thread_ex(
    thread: &mut Handle,
    access: ThreadAccess,
    attributes: Option<&ObjectAttributes>,
    process: Handle,
    start_routine: u64,
    argument: u64,
    flags: CreateThreadFlags,
    zero_bits: u64,
    stack_size: u64,
    maximum_stack_size: u64,
    attribute_list: u64,
) -> NtStatus {
    let mut handle = Handle::INVALID.into_register();
    let status = unsafe {
        raw::nt_create_thread_ex(
            &mut handle,
            access,
            in_ptr(attributes),
            process,
            start_routine,
            argument,
            flags,
            zero_bits,
            stack_size,
            maximum_stack_size,
            attribute_list,
        )
    };
    *thread = Handle::from_register(handle);
    status
}

/// Suspends `thread`; an invalid handle is a successful no-op.
///
/// # Safety
///
/// Suspending a thread that holds a lock this thread needs deadlocks.
pub unsafe fn nt_suspend_thread(thread: Handle, previous_suspend_count: Option<&mut u32>) -> NtStatus {
    if !thread.is_valid() {
        return NtStatus::SUCCESS;
    }
    let mut count = 0u32;
    let status = unsafe { raw::nt_suspend_thread(thread, &mut count) };
    if let Some(previous) = previous_suspend_count {
        *previous = count;
    }
    status
}

/// Resumes `thread`; an invalid handle is a successful no-op.
///
/// # Safety
///
/// Issues a native call.
pub unsafe fn nt_resume_thread(thread: Handle, previous_suspend_count: Option<&mut u32>) -> NtStatus {
    if !thread.is_valid() {
        return NtStatus::SUCCESS;
    }
    unsafe { raw::nt_resume_thread(thread, out_ptr(previous_suspend_count)) }
}

/// # Safety
///
/// `context` must point to a suitably aligned CONTEXT of the target's
/// architecture with `ContextFlags` set.
pub unsafe fn nt_get_context_thread(thread: Handle, context: *mut c_void) -> NtStatus {
    unsafe { raw::nt_get_context_thread(thread, context) }
}

/// # Safety
///
/// As for [`nt_get_context_thread`]; the thread resumes with this context.
pub unsafe fn nt_set_context_thread(thread: Handle, context: *const c_void) -> NtStatus {
    unsafe { raw::nt_set_context_thread(thread, context) }
}

/// Creates a section object, pagefile-backed when `file` is null.
///
/// # Safety
///
/// Issues a native call.
pub unsafe fn nt_create_section(
    section: &mut Handle,
    access: SectionAccess,
    attributes: Option<&ObjectAttributes>,
    maximum_size: Option<&mut i64>,
    protect: PageProtection,
    allocation_attributes: SectionAttributes,
    file: Handle,
) -> NtStatus {
    let mut handle = Handle::INVALID.into_register();
    let status = unsafe {
        raw::nt_create_section(
            &mut handle,
            access,
            in_ptr(attributes),
            out_ptr(maximum_size),
            protect,
            allocation_attributes,
            file,
        )
    };
    *section = Handle::from_register(handle);
    status
}

/// Maps a view of `section` into `process`; `base_address` and `view_size`
/// receive the placement of the view.
///
/// # Safety
///
/// Issues a native call that changes the address space of `process`.
#[allow(clippy::too_many_arguments)]
pub unsafe fn nt_map_view_of_section(
    section: Handle,
    process: Handle,
    base_address: &mut u64,
    zero_bits: u64,
    commit_size: u64,
    section_offset: Option<&mut i64>,
    view_size: &mut u64,
    inherit: SectionInherit,
    allocation_type: AllocationType,
    protect: PageProtection,
) -> NtStatus {
    unsafe {
        raw::nt_map_view_of_section(
            section,
            process,
            base_address,
            zero_bits,
            commit_size,
            out_ptr(section_offset),
            view_size,
            inherit,
            allocation_type,
            protect,
        )
    }
}

/// # Safety
///
/// Nothing may use the view afterwards.
pub unsafe fn nt_unmap_view_of_section(process: Handle, base_address: u64) -> NtStatus {
    unsafe { raw::nt_unmap_view_of_section(process, base_address) }
}

/// Grows a section; `new_size` receives the resulting size.
///
/// # Safety
///
/// Issues a native call.
pub unsafe fn nt_extend_section(section: Handle, new_size: &mut i64) -> NtStatus {
    unsafe { raw::nt_extend_section(section, new_size) }
}

/// # Safety
///
/// `buffer` must be writable for `length` bytes.
pub unsafe fn nt_query_information_process(
    process: Handle,
    class: ProcessInfoClass,
    buffer: *mut c_void,
    length: u32,
    return_length: Option<&mut u32>,
) -> NtStatus {
    unsafe { raw::nt_query_information_process(process, class, buffer, length, out_ptr(return_length)) }
}

/// # Safety
///
/// `buffer` must be writable for `length` bytes.
pub unsafe fn nt_query_information_thread(
    thread: Handle,
    class: ThreadInfoClass,
    buffer: *mut c_void,
    length: u32,
    return_length: Option<&mut u32>,
) -> NtStatus {
    unsafe { raw::nt_query_information_thread(thread, class, buffer, length, out_ptr(return_length)) }
}

/// # Safety
///
/// `buffer` must be writable for `length` bytes.
pub unsafe fn nt_query_system_information(
    class: SystemInfoClass,
    buffer: *mut c_void,
    length: u32,
    return_length: Option<&mut u32>,
) -> NtStatus {
    unsafe { raw::nt_query_system_information(class, buffer, length, out_ptr(return_length)) }
}

/// # Safety
///
/// `buffer` must be writable for `length` bytes.
pub unsafe fn nt_query_object(
    handle: Handle,
    class: ObjectInfoClass,
    buffer: *mut c_void,
    length: u32,
    return_length: Option<&mut u32>,
) -> NtStatus {
    unsafe { raw::nt_query_object(handle, class, buffer, length, out_ptr(return_length)) }
}

/// # Safety
///
/// `buffer` must be writable for `length` bytes.
pub unsafe fn nt_query_section(
    section: Handle,
    class: SectionInfoClass,
    buffer: *mut c_void,
    length: u64,
    return_length: Option<&mut u64>,
) -> NtStatus {
    unsafe { raw::nt_query_section(section, class, buffer, length, out_ptr(return_length)) }
}

/// # Safety
///
/// `buffer` must be writable for `length` bytes.
pub unsafe fn nt_query_virtual_memory(
    process: Handle,
    base_address: u64,
    class: MemoryInfoClass,
    buffer: *mut c_void,
    length: u64,
    return_length: Option<&mut u64>,
) -> NtStatus {
    unsafe { raw::nt_query_virtual_memory(process, base_address, class, buffer, length, out_ptr(return_length)) }
}

/// Waits on `handle`; `timeout` is in 100ns units, negative for relative.
/// `None` waits forever. An invalid handle is a successful no-op.
///
/// # Safety
///
/// Issues a native call that may block indefinitely.
pub unsafe fn nt_wait_for_single_object(handle: Handle, alertable: bool, timeout: Option<&i64>) -> NtStatus {
    if !handle.is_valid() {
        return NtStatus::SUCCESS;
    }
    unsafe { raw::nt_wait_for_single_object(handle, alertable, in_ptr(timeout)) }
}

/// Suspends every thread of `process`; an invalid handle is a successful no-op.
///
/// # Safety
///
/// Issues a native call.
pub unsafe fn nt_suspend_process(process: Handle) -> NtStatus {
    if !process.is_valid() {
        return NtStatus::SUCCESS;
    }
    unsafe { raw::nt_suspend_process(process) }
}

/// Resumes every thread of `process`; an invalid handle is a successful no-op.
///
/// # Safety
///
/// Issues a native call.
pub unsafe fn nt_resume_process(process: Handle) -> NtStatus {
    if !process.is_valid() {
        return NtStatus::SUCCESS;
    }
    unsafe { raw::nt_resume_process(process) }
}

/// # Safety
///
/// Terminating the current process does not return.
pub unsafe fn nt_terminate_process(process: Handle, exit_status: NtStatus) -> NtStatus {
    unsafe { raw::nt_terminate_process(process, exit_status) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_table() {
        let module = crate::fnv1a_lower!("ntdll.dll");
        assert_eq!(sites().len(), 27);
        for (name, site) in sites() {
            assert!(name.starts_with("Nt"), "{name}");
            assert_eq!(site.module_hash(), module);
            assert_eq!(site.function_hash(), crate::hash::fnv1a_str(name, true));
        }
        assert!(site("ntclose").is_some());
        assert!(site("NtCreateThreadEx").is_some());
        assert!(site("NtCreateThread").is_none());
    }

    #[test]
    fn test_invalid_handle_short_circuits() {
        let mut count = 7u32;
        let timeout = -1i64;
        unsafe {
            assert_eq!(nt_close(Handle::INVALID), NtStatus::SUCCESS);
            assert_eq!(nt_close(Handle::NULL), NtStatus::SUCCESS);
            assert_eq!(nt_suspend_process(Handle::INVALID), NtStatus::SUCCESS);
            assert_eq!(nt_resume_process(Handle::NULL), NtStatus::SUCCESS);
            assert_eq!(nt_suspend_thread(Handle::INVALID, Some(&mut count)), NtStatus::SUCCESS);
            assert_eq!(nt_resume_thread(Handle::NULL, Some(&mut count)), NtStatus::SUCCESS);
            assert_eq!(nt_wait_for_single_object(Handle::INVALID, false, Some(&timeout)), NtStatus::SUCCESS);
        }
        // untouched
        assert_eq!(count, 7);
    }

    #[cfg(not(windows))]
    #[test]
    fn test_unsupported_transport() {
        assert_eq!(transport_name(), "unsupported");
        assert_eq!(prefetch(), 0);
        assert!(cached_targets().all(|(_, target)| target == 0));

        let mut process = Handle::CURRENT_THREAD;
        let status = unsafe { nt_open_process(1, ProcessAccess::ALL, &mut process) };
        assert_eq!(status, NtStatus::INVALID_SYSTEM_SERVICE);
        assert_eq!(process, Handle::INVALID);

        let mut base = 0u64;
        let mut size = 0x1000u64;
        let status = unsafe {
            nt_allocate_virtual_memory(
                Handle::CURRENT_PROCESS,
                &mut base,
                0,
                &mut size,
                AllocationType::default(),
                PageProtection::READWRITE,
            )
        };
        assert!(status.invalid_system_service());
        assert!(!status.is_success());
        assert!(status.is_error());
    }

    #[cfg(windows)]
    #[test]
    fn test_query_current_process() {
        use crate::rtl::ProcessBasicInformation;

        let mut info = ProcessBasicInformation::default();
        let mut written = 0u32;
        let status = unsafe {
            nt_query_information_process(
                Handle::CURRENT_PROCESS,
                ProcessInfoClass::BASIC_INFORMATION,
                &mut info as *mut ProcessBasicInformation as *mut c_void,
                std::mem::size_of::<ProcessBasicInformation>() as u32,
                Some(&mut written),
            )
        };
        assert!(status.is_success(), "{status}");
        assert_eq!(info.unique_process_id, u64::from(std::process::id()));
        assert_eq!(written as usize, std::mem::size_of::<ProcessBasicInformation>());
        assert_ne!(site("NtQueryInformationProcess").map_or(0, |s| s.cached()), 0);
    }

    #[cfg(windows)]
    #[test]
    fn test_allocate_protect_free_round() {
        let mut base = 0u64;
        let mut size = 0x1000u64;
        unsafe {
            let status = nt_allocate_virtual_memory(
                Handle::CURRENT_PROCESS,
                &mut base,
                0,
                &mut size,
                AllocationType::default(),
                PageProtection::READWRITE,
            );
            assert!(status.is_success(), "{status}");
            assert_ne!(base, 0);

            let mut old = PageProtection::empty();
            let (mut at, mut len) = (base, size);
            let status = nt_protect_virtual_memory(
                Handle::CURRENT_PROCESS,
                &mut at,
                &mut len,
                PageProtection::READONLY,
                &mut old,
            );
            assert!(status.is_success(), "{status}");
            assert_eq!(old, PageProtection::READWRITE);

            let mut len = 0u64;
            let status = nt_free_virtual_memory(Handle::CURRENT_PROCESS, &mut base, &mut len, FreeType::RELEASE);
            assert!(status.is_success(), "{status}");
        }
    }
}
