//! Loader-list module locator
//!
//! Finds loaded modules by walking `PEB->Ldr->InLoadOrderModuleList`
//! instead of asking the loader. The list is circular: the walk ends when a
//! `Flink` leads back to the list head. Nothing is locked, so a module being
//! loaded or unloaded concurrently can produce a torn read; the walk is
//! capped at [`MAX_MODULES`] entries so a corrupted link cannot spin forever.

use crate::hash::{self, fnv1a_wide};
use crate::layout::Arch;
use crate::memory::Memory;
use crate::pe::{self, ExportTarget, ModuleLocator};
use std::marker::PhantomData;

/// Upper bound on loader entries visited in one walk
pub const MAX_MODULES: usize = 0x4000;

/// One `LDR_DATA_TABLE_ENTRY`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleEntry {
    /// Address of the entry itself
    pub entry: u64,
    pub base: u64,
    pub size_of_image: u32,
    /// `BaseDllName`, `None` when its buffer pointer is null
    pub base_name: Option<Vec<u16>>,
    /// `FullDllName`, `None` when its buffer pointer is null
    pub full_name: Option<Vec<u16>>,
}

impl ModuleEntry {
    pub fn base_name_lossy(&self) -> String {
        self.base_name.as_deref().map(String::from_utf16_lossy).unwrap_or_default()
    }

    pub fn full_name_lossy(&self) -> String {
        self.full_name.as_deref().map(String::from_utf16_lossy).unwrap_or_default()
    }
}

/// A process's loader state seen through a memory view with layout `A`.
pub struct Loader<M, A> {
    memory: M,
    peb: u64,
    _arch: PhantomData<A>,
}

impl<M: Memory, A: Arch> Loader<M, A> {
    pub fn new(memory: M, peb: u64) -> Self {
        Loader {
            memory,
            peb,
            _arch: PhantomData,
        }
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    pub fn peb(&self) -> u64 {
        self.peb
    }

    /// `PEB->ImageBaseAddress`, or 0
    pub fn image_base(&self) -> u64 {
        if self.peb == 0 {
            return 0;
        }
        self.peb
            .checked_add(A::PEB_IMAGE_BASE)
            .and_then(|field| A::read_pointer(&self.memory, field))
            .unwrap_or(0)
    }

    /// Address of the `InLoadOrderModuleList` head, or 0 when there is no loader data
    fn list_head(&self) -> u64 {
        if self.peb == 0 {
            return 0;
        }
        let ldr = self
            .peb
            .checked_add(A::PEB_LDR)
            .and_then(|field| A::read_pointer(&self.memory, field));
        match ldr {
            Some(ldr) if ldr != 0 => ldr.checked_add(A::LDR_IN_LOAD_ORDER).unwrap_or(0),
            _ => 0,
        }
    }

    /// Iterates loader entries in load order
    pub fn modules(&self) -> Modules<'_, M, A> {
        let head = self.list_head();
        let first = if head == 0 {
            0
        } else {
            A::read_pointer(&self.memory, head).unwrap_or(0)
        };
        Modules {
            loader: self,
            head,
            next: first,
            remaining: MAX_MODULES,
        }
    }

    /// Base address of the first module whose base name hashes to `name_hash`.
    ///
    /// An invalid hash (0 or the bare offset basis) matches the first entry
    /// with a name, which is the main executable. Returns 0 when nothing matches.
    pub fn module_handle(&self, name_hash: u32, lowercase: bool) -> u64 {
        let any = !hash::is_valid(name_hash);
        let found = self
            .modules()
            .find(|module| match &module.base_name {
                Some(_) if any => true,
                Some(name) => fnv1a_wide(name, lowercase) == name_hash,
                None => false,
            })
            .map_or(0, |module| module.base);

        debug_log!("[LOADER] module {:#010x} -> {:#x}", name_hash, found);
        found
    }

    /// [`Loader::module_handle`] by name, compared case-insensitively
    pub fn module_handle_by_name(&self, name: &str) -> u64 {
        self.module_handle(hash::fnv1a_str(name, true), true)
    }

    /// Resolves an export of the module at `module`, chasing forwarders
    /// through this loader's module list.
    pub fn proc_address(&self, module: u64, target: ExportTarget, lowercase: bool) -> u64 {
        pe::find_export(&self.memory, self, module, target, lowercase)
    }

    /// Module lookup followed by export lookup, both by lowercase hash
    pub fn resolve(&self, module_hash: u32, function_hash: u32) -> u64 {
        let module = self.module_handle(module_hash, true);
        if module == 0 {
            return 0;
        }
        debug_log_return!(
            "[LOADER] resolve",
            "{:#x}",
            self.proc_address(module, ExportTarget::Name(function_hash), true)
        )
    }
}

impl<M: Memory, A: Arch> ModuleLocator for Loader<M, A> {
    fn locate(&self, name_hash: u32) -> u64 {
        self.module_handle(name_hash, true)
    }
}

/// Iterator over loader entries, see [`Loader::modules`]
pub struct Modules<'a, M, A> {
    loader: &'a Loader<M, A>,
    head: u64,
    next: u64,
    remaining: usize,
}

impl<M: Memory, A: Arch> Modules<'_, M, A> {
    fn unicode_string(&self, address: u64) -> Option<Vec<u16>> {
        let memory = &self.loader.memory;
        let length = memory.read_u16(address)?;
        let buffer = A::read_pointer(memory, address.checked_add(A::UNICODE_STRING_BUFFER)?)?;
        if buffer == 0 {
            return None;
        }
        memory.read_wide(buffer, length as usize / 2)
    }
}

impl<M: Memory, A: Arch> Iterator for Modules<'_, M, A> {
    type Item = ModuleEntry;

    fn next(&mut self) -> Option<ModuleEntry> {
        if self.next == 0 || self.next == self.head || self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        // InLoadOrderLinks is the first field, so the link is the entry
        let entry = self.next;
        let memory = &self.loader.memory;
        self.next = A::read_pointer(memory, entry).unwrap_or(0);

        // an entry whose fields wrap is read as empty rather than at address 0
        let field = |offset: u64| entry.checked_add(offset);
        Some(ModuleEntry {
            entry,
            base: field(A::ENTRY_DLL_BASE)
                .and_then(|at| A::read_pointer(memory, at))
                .unwrap_or(0),
            size_of_image: field(A::ENTRY_SIZE_OF_IMAGE)
                .and_then(|at| memory.read_u32(at))
                .unwrap_or(0),
            base_name: field(A::ENTRY_BASE_DLL_NAME).and_then(|at| self.unicode_string(at)),
            full_name: field(A::ENTRY_FULL_DLL_NAME).and_then(|at| self.unicode_string(at)),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::hash::fnv1a_lower;
    use crate::layout::{X64, X86};
    use crate::memory::SnapshotMemory;

    /// Lays out PEB, PEB_LDR_DATA and one entry per module (with name
    /// buffers) in a snapshot. Returns the memory and the PEB address.
    pub(crate) fn build_loader<A: Arch>(modules: &[(&str, u64)]) -> (SnapshotMemory, u64) {
        const PEB: u64 = 0x1000;
        const LDR: u64 = 0x2000;
        const ENTRIES: u64 = 0x3000;
        const ENTRY_STRIDE: u64 = 0x100;
        const NAMES: u64 = 0x8000;

        let ptr = |v: u64| -> Vec<u8> {
            if A::POINTER_SIZE == 8 {
                v.to_le_bytes().to_vec()
            } else {
                (v as u32).to_le_bytes().to_vec()
            }
        };
        let put = |buf: &mut Vec<u8>, at: u64, bytes: &[u8]| {
            let at = at as usize;
            buf[at..at + bytes.len()].copy_from_slice(bytes);
        };

        let mut peb = vec![0u8; 0x100];
        put(&mut peb, A::PEB_LDR, &ptr(LDR));
        put(&mut peb, A::PEB_IMAGE_BASE, &ptr(modules.first().map_or(0, |m| m.1)));

        let head = LDR + A::LDR_IN_LOAD_ORDER;
        let entry_at = |i: usize| ENTRIES + i as u64 * ENTRY_STRIDE;
        let mut ldr = vec![0u8; 0x100];
        let first = if modules.is_empty() { head } else { entry_at(0) };
        let last = if modules.is_empty() { head } else { entry_at(modules.len() - 1) };
        put(&mut ldr, A::LDR_IN_LOAD_ORDER, &ptr(first));
        put(&mut ldr, A::LDR_IN_LOAD_ORDER + A::POINTER_SIZE, &ptr(last));

        let mut entries = vec![0u8; modules.len() * ENTRY_STRIDE as usize];
        let mut names = Vec::new();
        for (i, &(name, base)) in modules.iter().enumerate() {
            let at = i as u64 * ENTRY_STRIDE;
            let flink = if i + 1 == modules.len() { head } else { entry_at(i + 1) };
            let blink = if i == 0 { head } else { entry_at(i - 1) };
            put(&mut entries, at, &ptr(flink));
            put(&mut entries, at + A::POINTER_SIZE, &ptr(blink));
            put(&mut entries, at + A::ENTRY_DLL_BASE, &ptr(base));
            put(&mut entries, at + A::ENTRY_SIZE_OF_IMAGE, &0x1000u32.to_le_bytes());

            let wide: Vec<u8> = name.encode_utf16().flat_map(u16::to_le_bytes).collect();
            let buffer = NAMES + names.len() as u64;
            let length = (wide.len() as u16).to_le_bytes();
            for field in [A::ENTRY_BASE_DLL_NAME, A::ENTRY_FULL_DLL_NAME] {
                put(&mut entries, at + field, &length);
                put(&mut entries, at + field + 2, &length);
                put(&mut entries, at + field + A::UNICODE_STRING_BUFFER, &ptr(buffer));
            }
            names.extend_from_slice(&wide);
            names.extend_from_slice(&[0, 0]);
        }

        let memory = SnapshotMemory::new()
            .with(PEB, peb)
            .with(LDR, ldr)
            .with(ENTRIES, entries)
            .with(NAMES, names);
        (memory, PEB)
    }

    const MODULES: &[(&str, u64)] = &[
        ("app.exe", 0x7FF6_0000_0000),
        ("ntdll.dll", 0x7FF0_0000_0000),
        ("KERNEL32.DLL", 0x7FFE_0000_0000),
    ];

    #[test]
    fn test_locate_case_insensitive() {
        let (memory, peb) = build_loader::<X64>(MODULES);
        let loader = Loader::<_, X64>::new(memory, peb);

        assert_eq!(loader.module_handle(fnv1a_lower(b"ntdll.dll"), true), 0x7FF0_0000_0000);
        assert_eq!(loader.module_handle(fnv1a_lower(b"NTDLL.DLL"), true), 0x7FF0_0000_0000);
        assert_eq!(loader.module_handle_by_name("kernel32.dll"), 0x7FFE_0000_0000);
        assert_eq!(loader.module_handle_by_name("missing.dll"), 0);
    }

    #[test]
    fn test_case_sensitive_compare() {
        let (memory, peb) = build_loader::<X64>(MODULES);
        let loader = Loader::<_, X64>::new(memory, peb);
        assert_eq!(loader.module_handle(crate::hash::fnv1a(b"KERNEL32.DLL"), false), 0x7FFE_0000_0000);
        assert_eq!(loader.module_handle(crate::hash::fnv1a(b"kernel32.dll"), false), 0);
    }

    #[test]
    fn test_invalid_hash_returns_first_module() {
        let (memory, peb) = build_loader::<X64>(MODULES);
        let loader = Loader::<_, X64>::new(memory, peb);
        assert_eq!(loader.module_handle(0, true), 0x7FF6_0000_0000);
        assert_eq!(loader.module_handle(crate::hash::FNV_OFFSET_BASIS, true), 0x7FF6_0000_0000);
        assert_eq!(loader.image_base(), 0x7FF6_0000_0000);
    }

    #[test]
    fn test_walk_visits_each_entry_once() {
        for n in [0usize, 1, 2, 7] {
            let names: Vec<String> = (0..n).map(|i| format!("m{i}.dll")).collect();
            let modules: Vec<(&str, u64)> = names
                .iter()
                .enumerate()
                .map(|(i, name)| (name.as_str(), 0x1000_0000 * (i as u64 + 1)))
                .collect();
            let (memory, peb) = build_loader::<X64>(&modules);
            let loader = Loader::<_, X64>::new(memory, peb);

            let visited: Vec<u64> = loader.modules().map(|m| m.base).collect();
            let expected: Vec<u64> = modules.iter().map(|m| m.1).collect();
            assert_eq!(visited, expected);
            let distinct: std::collections::HashSet<u64> = visited.iter().copied().collect();
            assert_eq!(distinct.len(), n);
        }
    }

    #[test]
    fn test_peb_at_top_of_address_space() {
        let memory = SnapshotMemory::new().with(u64::MAX - 0xF, vec![0xFF; 0xF]);
        let loader = Loader::<_, X64>::new(memory, u64::MAX - 0x8);
        assert_eq!(loader.image_base(), 0);
        assert_eq!(loader.modules().count(), 0);
        assert_eq!(loader.module_handle(0, true), 0);
    }

    #[test]
    fn test_walk_terminates_on_corrupt_link() {
        let (mut memory, peb) = build_loader::<X64>(&[("a.dll", 0x1000_0000), ("b.dll", 0x2000_0000)]);
        // point the second entry back at itself instead of at the head
        memory.insert(0x3100, 0x3100u64.to_le_bytes().to_vec());
        let loader = Loader::<_, X64>::new(memory, peb);
        assert_eq!(loader.modules().count(), MAX_MODULES);
        assert_eq!(loader.module_handle_by_name("missing.dll"), 0);
    }

    #[test]
    fn test_null_peb_and_ldr() {
        let loader = Loader::<_, X64>::new(SnapshotMemory::new(), 0);
        assert_eq!(loader.modules().count(), 0);
        assert_eq!(loader.module_handle(0, true), 0);

        let memory = SnapshotMemory::new().with(0x1000, vec![0u8; 0x100]);
        let loader = Loader::<_, X64>::new(memory, 0x1000);
        assert_eq!(loader.module_handle_by_name("ntdll.dll"), 0);
    }

    #[test]
    fn test_entry_without_name_is_skipped() {
        let (mut memory, peb) = build_loader::<X64>(&[("a.dll", 0x1000_0000), ("b.dll", 0x2000_0000)]);
        // null out the first entry's BaseDllName buffer
        memory.insert(0x3000 + X64::ENTRY_BASE_DLL_NAME + X64::UNICODE_STRING_BUFFER, vec![0u8; 8]);
        let loader = Loader::<_, X64>::new(memory, peb);
        assert_eq!(loader.module_handle(0, true), 0x2000_0000);
        assert_eq!(loader.module_handle_by_name("a.dll"), 0);
    }

    #[test]
    fn test_x86_layout() {
        let (memory, peb) = build_loader::<X86>(&[("ntdll.dll", 0x7700_0000), ("kernel32.dll", 0x7600_0000)]);
        let loader = Loader::<_, X86>::new(memory, peb);
        assert_eq!(loader.module_handle_by_name("KERNEL32.dll"), 0x7600_0000);
        let names: Vec<String> = loader.modules().map(|m| m.base_name_lossy()).collect();
        assert_eq!(names, ["ntdll.dll", "kernel32.dll"]);
    }
}
