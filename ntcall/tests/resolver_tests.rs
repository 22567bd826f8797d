use ntcall::hash::fnv1a_str;
use ntcall::layout::{Arch, X64, X86};
use ntcall::syscall::syscall_id;
use ntcall::{ExportTarget, Loader, SnapshotMemory, fnv1a_lower};
use pretty_assertions::assert_eq;

/// A module as the loader maps it: headers, export directory at 0x1000 and
/// code stubs at 0x2000 (0x20 bytes per entry).
struct Module<'a> {
    name: &'a str,
    base: u64,
    code: Vec<(&'a str, Vec<u8>)>,
    forwarders: Vec<(&'a str, &'a str)>,
}

fn stub(id: u32) -> Vec<u8> {
    let mut bytes = vec![0x4C, 0x8B, 0xD1, 0xB8];
    bytes.extend_from_slice(&id.to_le_bytes());
    bytes.extend_from_slice(&[0x0F, 0x05, 0xC3]);
    bytes
}

fn put(buf: &mut [u8], at: usize, bytes: &[u8]) {
    buf[at..at + bytes.len()].copy_from_slice(bytes);
}

fn build_image<A: Arch>(module: &Module) -> Vec<u8> {
    let mut image = vec![0u8; 0x3000];
    put(&mut image, 0, &0x5A4Du16.to_le_bytes());
    put(&mut image, 0x3C, &0x80u32.to_le_bytes());
    put(&mut image, 0x80, &0x4550u32.to_le_bytes());

    let optional = 0x80 + 24;
    let directories = if A::POINTER_SIZE == 8 {
        put(&mut image, optional, &0x20Bu16.to_le_bytes());
        put(&mut image, optional + 108, &16u32.to_le_bytes());
        optional + 112
    } else {
        put(&mut image, optional, &0x10Bu16.to_le_bytes());
        put(&mut image, optional + 92, &16u32.to_le_bytes());
        optional + 96
    };

    let dir = 0x1000;
    let total = module.code.len() + module.forwarders.len();
    let functions = dir + 40;
    let names = functions + 4 * total;
    let ordinals = names + 4 * total;
    let mut strings = ordinals + 2 * total;
    let mut write_str = |image: &mut Vec<u8>, s: &str| {
        let at = strings;
        put(image, at, s.as_bytes());
        strings += s.len() + 1;
        at as u32
    };

    let dll = write_str(&mut image, module.name);
    put(&mut image, dir + 12, &dll.to_le_bytes());
    put(&mut image, dir + 16, &1u32.to_le_bytes());
    put(&mut image, dir + 20, &(total as u32).to_le_bytes());
    put(&mut image, dir + 24, &(total as u32).to_le_bytes());
    put(&mut image, dir + 28, &(functions as u32).to_le_bytes());
    put(&mut image, dir + 32, &(names as u32).to_le_bytes());
    put(&mut image, dir + 36, &(ordinals as u32).to_le_bytes());

    for (i, (name, bytes)) in module.code.iter().enumerate() {
        let rva = 0x2000 + 0x20 * i;
        put(&mut image, rva, bytes);
        let name_rva = write_str(&mut image, name);
        put(&mut image, functions + 4 * i, &(rva as u32).to_le_bytes());
        put(&mut image, names + 4 * i, &name_rva.to_le_bytes());
        put(&mut image, ordinals + 2 * i, &(i as u16).to_le_bytes());
    }
    for (j, (name, forward)) in module.forwarders.iter().enumerate() {
        let i = module.code.len() + j;
        let name_rva = write_str(&mut image, name);
        let forward_rva = write_str(&mut image, forward);
        put(&mut image, functions + 4 * i, &forward_rva.to_le_bytes());
        put(&mut image, names + 4 * i, &name_rva.to_le_bytes());
        put(&mut image, ordinals + 2 * i, &(i as u16).to_le_bytes());
    }

    put(&mut image, directories, &(dir as u32).to_le_bytes());
    put(&mut image, directories + 4, &((strings - dir) as u32).to_le_bytes());
    image
}

/// PEB at 0x1000, loader data at 0x2000, entries from 0x3000, names at 0x8000
fn build_process<A: Arch>(modules: &[Module]) -> (SnapshotMemory, u64) {
    const PEB: u64 = 0x1000;
    const LDR: u64 = 0x2000;
    const ENTRIES: u64 = 0x3000;
    const STRIDE: u64 = 0x100;
    const NAMES: u64 = 0x8000;

    let ptr = |v: u64| -> Vec<u8> {
        if A::POINTER_SIZE == 8 {
            v.to_le_bytes().to_vec()
        } else {
            (v as u32).to_le_bytes().to_vec()
        }
    };
    let head = LDR + A::LDR_IN_LOAD_ORDER;
    let entry_at = |i: usize| ENTRIES + i as u64 * STRIDE;

    let mut peb = vec![0u8; 0x100];
    put(&mut peb, A::PEB_LDR as usize, &ptr(LDR));
    put(&mut peb, A::PEB_IMAGE_BASE as usize, &ptr(modules[0].base));

    let mut ldr = vec![0u8; 0x100];
    put(&mut ldr, A::LDR_IN_LOAD_ORDER as usize, &ptr(entry_at(0)));
    put(
        &mut ldr,
        (A::LDR_IN_LOAD_ORDER + A::POINTER_SIZE) as usize,
        &ptr(entry_at(modules.len() - 1)),
    );

    let mut entries = vec![0u8; modules.len() * STRIDE as usize];
    let mut names = Vec::new();
    let mut memory = SnapshotMemory::new();
    for (i, module) in modules.iter().enumerate() {
        let at = (i as u64 * STRIDE) as usize;
        let flink = if i + 1 == modules.len() { head } else { entry_at(i + 1) };
        put(&mut entries, at, &ptr(flink));
        put(&mut entries, at + A::ENTRY_DLL_BASE as usize, &ptr(module.base));
        put(&mut entries, at + A::ENTRY_SIZE_OF_IMAGE as usize, &0x3000u32.to_le_bytes());

        let wide: Vec<u8> = module.name.encode_utf16().flat_map(u16::to_le_bytes).collect();
        let buffer = NAMES + names.len() as u64;
        for field in [A::ENTRY_BASE_DLL_NAME, A::ENTRY_FULL_DLL_NAME] {
            let field = at + field as usize;
            put(&mut entries, field, &(wide.len() as u16).to_le_bytes());
            put(&mut entries, field + 2, &(wide.len() as u16).to_le_bytes());
            put(&mut entries, field + A::UNICODE_STRING_BUFFER as usize, &ptr(buffer));
        }
        names.extend_from_slice(&wide);
        names.extend_from_slice(&[0, 0]);

        memory.insert(module.base, build_image::<A>(module));
    }

    memory.insert(PEB, peb);
    memory.insert(LDR, ldr);
    memory.insert(ENTRIES, entries);
    memory.insert(NAMES, names);
    (memory, PEB)
}

fn sample_modules<'a>(app: u64, ntdll: u64, kernel32: u64) -> Vec<Module<'a>> {
    vec![
        Module {
            name: "app.exe",
            base: app,
            code: vec![("main", vec![0xC3])],
            forwarders: vec![],
        },
        Module {
            name: "ntdll.dll",
            base: ntdll,
            code: vec![
                ("NtClose", stub(0x0F)),
                ("NtOpenProcess", stub(0x26)),
                ("RtlAllocateHeap", vec![0x48, 0x89, 0x5C, 0x24, 0x08]),
                ("NtHooked", vec![0xE9, 0x00, 0x10, 0x00, 0x00, 0x90, 0x90, 0x90]),
            ],
            forwarders: vec![],
        },
        Module {
            name: "KERNEL32.DLL",
            base: kernel32,
            code: vec![("Sleep", vec![0xC3])],
            forwarders: vec![
                ("HeapAlloc", "NTDLL.RtlAllocateHeap"),
                ("CloseByOrdinal", "ntdll.#1"),
                ("Missing", "nothere.Function"),
                ("Loop", "kernel32.Loop"),
            ],
        },
    ]
}

#[test]
fn test_end_to_end_x64() {
    let (memory, peb) = build_process::<X64>(&sample_modules(0x1_4000_0000, 0x7FFA_0000_0000, 0x7FFB_0000_0000));
    let loader = Loader::<_, X64>::new(memory, peb);

    let names: Vec<String> = loader.modules().map(|m| m.base_name_lossy()).collect();
    assert_eq!(names, vec!["app.exe", "ntdll.dll", "KERNEL32.DLL"]);
    assert_eq!(loader.image_base(), 0x1_4000_0000);

    let ntdll = loader.module_handle(fnv1a_lower!("ntdll.dll"), true);
    let kernel32 = loader.module_handle_by_name("kernel32.dll");
    assert_eq!(ntdll, 0x7FFA_0000_0000);
    assert_eq!(kernel32, 0x7FFB_0000_0000);
    assert_eq!(loader.module_handle(fnv1a_str("kernel32.dll", false), false), 0);
    assert_eq!(loader.module_handle(0, true), 0x1_4000_0000);

    let heap_alloc = loader.proc_address(kernel32, ExportTarget::from_name("HeapAlloc", true), true);
    let direct = loader.proc_address(ntdll, ExportTarget::from_name("RtlAllocateHeap", true), true);
    assert_eq!(heap_alloc, direct);
    assert_eq!(heap_alloc, 0x7FFA_0000_2040);

    let by_ordinal = loader.proc_address(kernel32, ExportTarget::from_name("CloseByOrdinal", true), true);
    assert_eq!(by_ordinal, ntdll + 0x2000);

    assert_eq!(loader.proc_address(kernel32, ExportTarget::from_name("Missing", true), true), 0);
    assert_eq!(loader.proc_address(kernel32, ExportTarget::from_name("Loop", true), true), 0);
}

#[test]
fn test_syscall_ids_through_loader() {
    let (memory, peb) = build_process::<X64>(&sample_modules(0x1_4000_0000, 0x7FFA_0000_0000, 0x7FFB_0000_0000));
    let loader = Loader::<_, X64>::new(memory, peb);
    let ntdll = fnv1a_lower!("ntdll.dll");

    let id = |name: &str| syscall_id(loader.memory(), loader.resolve(ntdll, fnv1a_str(name, true)));
    assert_eq!(id("NtClose"), 0x0F);
    assert_eq!(id("ntopenprocess"), 0x26);
    assert_eq!(id("NtHooked"), 0);
    assert_eq!(id("NtDoesNotExist"), 0);
    assert_eq!(loader.resolve(fnv1a_lower!("win32u.dll"), fnv1a_str("NtClose", true)), 0);
}

#[test]
fn test_end_to_end_x86() {
    let (memory, peb) = build_process::<X86>(&sample_modules(0x0040_0000, 0x7700_0000, 0x7600_0000));
    let loader = Loader::<_, X86>::new(memory, peb);

    assert_eq!(loader.modules().count(), 3);
    let kernel32 = loader.module_handle_by_name("Kernel32.dll");
    assert_eq!(kernel32, 0x7600_0000);
    let heap_alloc = loader.proc_address(kernel32, ExportTarget::from_name("heapalloc", true), true);
    assert_eq!(heap_alloc, 0x7700_2040);
}

#[test]
fn test_export_listing() {
    let modules = sample_modules(0x1_4000_0000, 0x7FFA_0000_0000, 0x7FFB_0000_0000);
    let (memory, _) = build_process::<X64>(&modules);
    let listed = ntcall::pe::exports(&memory, 0x7FFB_0000_0000);

    let summary: Vec<(u16, Option<&str>, Option<&str>)> = listed
        .iter()
        .map(|e| (e.ordinal, e.name.as_deref(), e.forwarder.as_deref()))
        .collect();
    assert_eq!(
        summary,
        vec![
            (1, Some("Sleep"), None),
            (2, Some("HeapAlloc"), Some("NTDLL.RtlAllocateHeap")),
            (3, Some("CloseByOrdinal"), Some("ntdll.#1")),
            (4, Some("Missing"), Some("nothere.Function")),
            (5, Some("Loop"), Some("kernel32.Loop")),
        ]
    );
}

#[cfg(windows)]
#[test]
fn test_live_ntdll() {
    let ntdll = ntcall::process::get_module_handle(fnv1a_lower!("ntdll.dll"));
    assert_ne!(ntdll, 0);
    let close = ntcall::process::get_proc_address(ntdll, ExportTarget::from_name("NtClose", true));
    assert_ne!(close, 0);
    assert!(ntcall::nt::prefetch() > 0);
}
